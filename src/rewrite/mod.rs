//! Replay of lens records over method graphs.
//!
//! Structural optimizations record their reference changes in the
//! [`crate::lens`] chain instead of patching code eagerly. This module
//! closes the loop: [`LensCodeRewriter`] takes a graph whose references
//! are current as of its code lens, partitions the unapplied chain suffix
//! into [`RewriteInterval`]s, and applies each interval's substitutions,
//! cast insertions, prototype adjustments and custom hooks, finishing
//! with a type propagation sweep.
//!
//! Replaying is idempotent per head: a graph already at the chain head is
//! left untouched.

mod intervals;
mod rewriter;
mod typeprop;

pub use intervals::{unapplied_intervals, RewriteInterval};
pub use rewriter::LensCodeRewriter;
pub use typeprop::{propagate_types, value_type_of};
