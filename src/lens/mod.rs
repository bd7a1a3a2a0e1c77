//! Deferred reference remapping through lens records.
//!
//! Structural optimizations never patch method bodies eagerly. Each one
//! appends a [`LensRecord`] to the shared [`LensChain`] describing how the
//! program's references changed; bodies are brought up to date later, in
//! bulk, by the [`crate::rewrite`] module. A method graph remembers the
//! chain snapshot it was last rewritten to (its code lens), and lookups
//! take that snapshot as an explicit stop id so already-applied records
//! are never applied twice.
//!
//! # Key invariants
//!
//! - The chain is append-only; records point strictly backward, so every
//!   lookup terminates.
//! - Lookups apply records oldest-first across the interval
//!   `(stop, head]`.
//! - References a record does not map pass through unchanged. That is the
//!   identity fallback for library references; program references are
//!   expected to be mapped by whichever record moved them.

mod chain;
mod lookup;
mod prototype;

pub use chain::{
    FieldMapping, InstructionRewriteHook, LensChain, LensId, LensRecord, MethodMapping,
};
pub use lookup::{FieldLookupResult, MethodLookupResult};
pub use prototype::{
    AppendedParameter, RemovedParameter, RetypedParameter, ReturnChange,
    RewrittenPrototypeDescription,
};
