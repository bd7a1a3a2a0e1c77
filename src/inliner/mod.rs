//! Heuristic inlining over the per-method IR.
//!
//! # Architecture
//!
//! - `constraint` computes where a body may legally move, from member
//!   access flags and the class hierarchy.
//! - `oracle` holds the pluggable [`InlineStrategy`] policy and the
//!   default heuristics.
//! - `inline` performs the splice: fresh callee IR per call site, lens
//!   replay, argument mapping and control-flow rewiring.
//!
//! # Key invariants
//!
//! - A callee body is built fresh for every splice, never shared.
//! - Splicing preserves the graph's predecessor ordering contract:
//!   exceptional edges precede normal ones per predecessor.
//! - Caller growth is bounded by the configured instruction allowance
//!   regardless of how call sites are classified.

mod constraint;
mod inline;
mod oracle;

pub use constraint::{
    compute_inlining_constraint, derive_constraint, Constraint, ConstraintWithTarget,
};
pub use inline::perform_inlining;
pub use oracle::{DefaultOracle, InlineAction, InlineReason, InlineStrategy, InlinerOptions};
