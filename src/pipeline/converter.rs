//! Per-method orchestration: build, replay, optimize, validate, lower.

use dashmap::DashMap;
use strum::{EnumCount, EnumIter};

use crate::{
    inliner::{perform_inlining, DefaultOracle, InlineStrategy, InlinerOptions},
    ir::{build_ir, lower, IrGraph},
    lens::LensChain,
    pipeline::{
        passes::{
            compute_optimization_info, devirtualize, fold_constants, remove_dead_code,
            throwing_stub, type_check,
        },
        CommittedFeedback, FeedbackBuffer, OptimizationInfoStore,
    },
    refs::{MethodId, ProgramMethod, ProgramView},
    Result,
};

/// A non-fatal condition recorded during a run and reported at the end.
#[derive(Debug, Clone)]
pub struct Warning {
    /// The method the condition was observed on.
    pub method: MethodId,
    /// Human-readable description.
    pub message: String,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.method, self.message)
    }
}

/// Processing state of one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumCount, EnumIter)]
pub enum MethodState {
    /// Nothing built yet, or reset after going stale.
    #[default]
    NotBuilt,
    /// IR exists and is replayed to the chain head.
    Built,
    /// Optimization passes are running.
    Optimizing,
    /// Validated and lowered.
    Finalized,
    /// Written back; terminal until marked stale.
    Processed,
}

/// Drives every method through the fixed pass order.
///
/// One converter serves a whole run. Workers call [`Converter::process_method`]
/// concurrently through a shared reference; the scheduler alone calls
/// [`Converter::commit_wave`] between waves.
pub struct Converter<'a> {
    view: &'a ProgramView,
    chain: &'a LensChain,
    store: OptimizationInfoStore,
    feedback: FeedbackBuffer,
    states: DashMap<MethodId, MethodState>,
    warnings: boxcar::Vec<Warning>,
    strategy: Box<dyn InlineStrategy>,
    options: InlinerOptions,
}

impl<'a> Converter<'a> {
    /// Creates a converter with the default inlining oracle.
    #[must_use]
    pub fn new(view: &'a ProgramView, chain: &'a LensChain) -> Self {
        Self::with_strategy(
            view,
            chain,
            Box::new(DefaultOracle::new(InlinerOptions::default())),
            InlinerOptions::default(),
        )
    }

    /// Creates a converter with a caller-supplied inlining policy.
    #[must_use]
    pub fn with_strategy(
        view: &'a ProgramView,
        chain: &'a LensChain,
        strategy: Box<dyn InlineStrategy>,
        options: InlinerOptions,
    ) -> Self {
        Converter {
            view,
            chain,
            store: OptimizationInfoStore::new(),
            feedback: FeedbackBuffer::new(),
            states: DashMap::new(),
            warnings: boxcar::Vec::new(),
            strategy,
            options,
        }
    }

    /// The committed optimization info snapshot.
    #[must_use]
    pub fn store(&self) -> &OptimizationInfoStore {
        &self.store
    }

    /// The whole-program view the converter operates on.
    #[must_use]
    pub fn view(&self) -> &'a ProgramView {
        self.view
    }

    /// Current processing state of a method.
    #[must_use]
    pub fn state(&self, method: MethodId) -> MethodState {
        self.states.get(&method).map_or_else(MethodState::default, |s| *s)
    }

    /// Warnings accumulated so far, in recording order.
    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().map(|(_, w)| w)
    }

    fn set_state(&self, method: MethodId, state: MethodState) {
        self.states.insert(method, state);
    }

    /// Runs one method through build, lens replay, the pass sequence,
    /// validation and write-back.
    ///
    /// Methods whose keep info forbids code replacement are not modified,
    /// but their [`crate::pipeline::OptimizationInfo`] is still computed
    /// and buffered so later decisions about their callers stay sound.
    ///
    /// # Errors
    ///
    /// Propagates IR construction and lens replay failures. A post-rewrite
    /// validation failure is soft: the body is replaced by a throwing stub
    /// and a [`Warning`] is recorded.
    pub fn process_method(&self, method: ProgramMethod) -> Result<()> {
        let Some((code, code_lens)) = self
            .view
            .method_def(method.method)
            .and_then(|def| Some((def.code.clone()?, def.code_lens)))
        else {
            return Ok(());
        };
        self.set_state(method.method, MethodState::NotBuilt);

        let mut graph = build_ir(method, &code, code_lens)?;
        crate::rewrite::LensCodeRewriter::new(self.chain, self.view).rewrite(&mut graph)?;
        crate::rewrite::propagate_types(&mut graph, self.view);
        self.set_state(method.method, MethodState::Built);

        let keep = self.view.keep_info(method.method);
        self.set_state(method.method, MethodState::Optimizing);
        self.optimize(&mut graph, keep.allow_code_replacement)?;

        self.feedback
            .record(method.method, compute_optimization_info(&graph, self.view));

        if let Err(error) = type_check(&graph) {
            self.warnings.push(Warning {
                method: method.method,
                message: format!("replaced by throwing stub: {error}"),
            });
            if keep.allow_code_replacement {
                let stub = throwing_stub(
                    graph.num_args(),
                    "method body failed validation during optimization",
                );
                self.write_back(method.method, stub);
            }
            self.set_state(method.method, MethodState::Processed);
            return Ok(());
        }
        self.set_state(method.method, MethodState::Finalized);

        if keep.allow_code_replacement {
            let lowered = lower(&graph)?;
            self.write_back(method.method, lowered);
        }
        self.set_state(method.method, MethodState::Processed);
        Ok(())
    }

    /// Pass-through methods still run the graph-local passes so their
    /// recorded info reflects what the body actually does; only splicing
    /// is reserved for replaceable code.
    fn optimize(&self, graph: &mut IrGraph, allow_inlining_pass: bool) -> Result<()> {
        fold_constants(graph);
        devirtualize(graph, self.view);
        if allow_inlining_pass {
            perform_inlining(
                graph,
                self.view,
                self.chain,
                &self.store,
                &self.feedback,
                self.strategy.as_ref(),
                &self.options,
            )?;
        }
        remove_dead_code(graph);
        Ok(())
    }

    fn write_back(&self, method: MethodId, code: crate::ir::CodeObject) {
        if let Some(mut def) = self.view.method_def_mut(method) {
            def.code = Some(code);
            def.code_lens = self.chain.head();
        }
    }

    /// Wave-boundary phase, single threaded by construction (`&mut self`):
    /// publishes buffered info, removes callees whose last call site was
    /// inlined away, and resets stale methods to `NotBuilt`.
    pub fn commit_wave(&mut self) -> CommittedFeedback {
        let committed = self.feedback.commit(&self.store);
        for &method in &committed.removals {
            self.view.remove_method(method);
            self.store.invalidate(method);
            self.states.remove(&method);
        }
        for &method in &committed.stale {
            self.store.invalidate(method);
            self.set_state(method, MethodState::NotBuilt);
        }
        committed
    }

    /// Marks a processed method stale; the reset happens at the next
    /// wave boundary.
    pub fn mark_stale(&self, method: MethodId) {
        self.feedback.mark_stale(method);
    }
}
