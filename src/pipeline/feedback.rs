//! Per-method optimization facts and the wave-boundary feedback buffer.
//!
//! Workers never write into the authoritative [`OptimizationInfoStore`]
//! directly. Facts computed during a wave accumulate in a
//! [`FeedbackBuffer`] and are committed by the scheduler in the
//! single-threaded wave-boundary phase, so every reader inside a wave
//! observes one consistent pre-wave snapshot.

use dashmap::{DashMap, DashSet};

use crate::{inliner::ConstraintWithTarget, ir::ConstValue, refs::MethodId};

/// Facts the passes derive about one method's finalized body.
#[derive(Debug, Clone)]
pub struct OptimizationInfo {
    /// Instruction count of the optimized body.
    pub instruction_count: usize,
    /// The constant every normal return yields, when there is one.
    pub returns_constant: Option<ConstValue>,
    /// The method cannot complete normally.
    pub never_returns_normally: bool,
    /// The body is small and effect-simple enough for simple inlining.
    pub simple_inlining_eligible: bool,
    /// Where the body may legally be placed.
    pub constraint: ConstraintWithTarget,
}

/// The authoritative store of committed [`OptimizationInfo`] records.
///
/// Written only at wave boundaries, read concurrently by every worker.
#[derive(Debug, Default)]
pub struct OptimizationInfoStore {
    infos: DashMap<MethodId, OptimizationInfo>,
}

impl OptimizationInfoStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        OptimizationInfoStore::default()
    }

    /// Returns the committed info for a method, if any wave produced one.
    #[must_use]
    pub fn get(&self, method: MethodId) -> Option<OptimizationInfo> {
        self.infos.get(&method).map(|i| i.clone())
    }

    /// Drops the record for a method whose body was invalidated.
    pub fn invalidate(&self, method: MethodId) {
        self.infos.remove(&method);
    }

    fn insert(&self, method: MethodId, info: OptimizationInfo) {
        self.infos.insert(method, info);
    }
}

/// Requests drained from a buffer at a wave boundary.
#[derive(Debug, Default)]
pub struct CommittedFeedback {
    /// Single-caller callees whose last call site was inlined away.
    pub removals: Vec<MethodId>,
    /// Processed methods that must be rebuilt in a later wave.
    pub stale: Vec<MethodId>,
}

/// Write side of the feedback cycle, filled concurrently during a wave.
#[derive(Debug, Default)]
pub struct FeedbackBuffer {
    pending: DashMap<MethodId, OptimizationInfo>,
    removals: DashSet<MethodId>,
    stale: DashSet<MethodId>,
}

impl FeedbackBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        FeedbackBuffer::default()
    }

    /// Records the info a worker computed for `method`. A later record in
    /// the same wave wins.
    pub fn record(&self, method: MethodId, info: OptimizationInfo) {
        self.pending.insert(method, info);
    }

    /// Requests removal of a method whose only call site was inlined.
    pub fn request_removal(&self, method: MethodId) {
        self.removals.insert(method);
    }

    /// Marks a processed method stale so the scheduler rebuilds it.
    pub fn mark_stale(&self, method: MethodId) {
        self.stale.insert(method);
    }

    /// Moves every pending record into `store` and drains the removal and
    /// stale requests.
    ///
    /// Takes `&mut self` so commits cannot race with a running wave.
    pub fn commit(&mut self, store: &OptimizationInfoStore) -> CommittedFeedback {
        for (method, info) in std::mem::take(&mut self.pending) {
            store.insert(method, info);
        }
        CommittedFeedback {
            removals: std::mem::take(&mut self.removals).into_iter().collect(),
            stale: std::mem::take(&mut self.stale).into_iter().collect(),
        }
    }
}
