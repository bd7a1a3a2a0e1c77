//! The per-method intermediate representation and its two borders.
//!
//! Methods arrive as register-based [`CodeObject`]s, are raised into an
//! SSA-like graph of [`BasicBlock`]s holding [`Instr`]uctions over
//! [`ValueId`]s, optimized in that form, and lowered back to a
//! [`CodeObject`] for the encoder.
//!
//! # Architecture
//!
//! - `types` - the small value-type lattice and constant values
//! - `code` - the register dialect exchanged with decoder and encoder
//! - `instruction` - the SSA instruction set
//! - `block` - basic blocks, phis and exception handler edges
//! - `graph` - the block and value arenas with CFG editing support
//! - `builder` - register code to SSA (maximal-phi construction)
//! - `lower` - SSA back to register code (phi elimination)
//!
//! # Key invariants
//!
//! - Every value is defined exactly once; operands refer to definitions by
//!   [`ValueId`] only.
//! - A phi's operand list is parallel to its block's predecessor list.
//! - Block and value ids are never reused; removed blocks become detached
//!   tombstones so ids held elsewhere stay valid.
//! - Each graph carries the lens snapshot its references are current
//!   against; see [`crate::lens`].

mod block;
mod builder;
mod code;
mod graph;
mod instruction;
mod lower;
mod types;

pub use block::{BasicBlock, BlockId, CatchHandler, Phi};
pub use builder::{build_ir, remove_trivial_phis};
pub use code::{CodeBlock, CodeInst, CodeObject, Register, MAX_ARGUMENTS};
pub use graph::{IrGraph, ValueId};
pub use instruction::{Instr, Instruction, InvokeKind};
pub use lower::lower;
pub use types::{BinopKind, ConstValue, IfKind, ValueType};
