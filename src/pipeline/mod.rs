//! The wave-based optimization pipeline.
//!
//! # Architecture
//!
//! - `feedback` separates what workers learn during a wave from what
//!   readers may observe: the [`OptimizationInfoStore`] snapshot only
//!   changes at wave boundaries.
//! - `passes` holds the per-method passes: constant folding,
//!   devirtualization, dead code elimination and validation.
//! - `converter` drives one method through the fixed order: build IR,
//!   lens replay, passes, validation, lowering and write-back.
//! - `wave` runs bounded batches of methods in parallel and the boundary
//!   phase single threaded.
//!
//! # Key invariants
//!
//! - No reader observes a partially committed wave: feedback moves into
//!   the store only while the scheduler holds the converter exclusively.
//! - A method failing post-rewrite validation soft-fails into a throwing
//!   stub with a recorded [`Warning`]; the run continues.

mod converter;
mod feedback;
pub(crate) mod passes;
mod wave;

pub use converter::{Converter, MethodState, Warning};
pub use feedback::{CommittedFeedback, FeedbackBuffer, OptimizationInfo, OptimizationInfoStore};
pub use passes::{
    compute_optimization_info, devirtualize, fold_constants, remove_dead_code, throwing_stub,
    type_check,
};
pub use wave::{Wave, WaveScheduler};
