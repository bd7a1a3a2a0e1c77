//! Reference model: interned identifiers and the whole-program view.
//!
//! Everything the optimizer rewrites is addressed through small interned ids
//! ([`TypeId`], [`MethodId`], [`FieldId`]) produced by one [`RefInterner`].
//! Identity is intern-table identity: lens maps, optimization info and keep
//! info key on ids, never on structural descriptors.
//!
//! [`ProgramView`] holds the closed whole-program set - class, method and
//! field definitions plus hierarchy queries (subtyping, package, nest) and
//! the keep info delivered by the external liveness analysis.

mod ids;
mod interner;
mod program;

pub use ids::{FieldId, MethodId, TypeId};
pub use interner::{FieldDesc, MethodDesc, MethodProto, RefInterner};
pub use program::{
    AccessFlags, ClassDef, FieldDef, KeepInfo, MethodDef, ProgramMethod, ProgramView,
};
