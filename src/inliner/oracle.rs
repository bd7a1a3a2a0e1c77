//! Inlining policy: classifying call sites and admitting splices.

use strum::{EnumCount, EnumIter};

use crate::{
    pipeline::OptimizationInfoStore,
    refs::{AccessFlags, ProgramMethod, ProgramView},
};

/// Why a call site is (or is not) inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter)]
pub enum InlineReason {
    /// The callee must always disappear into its callers, e.g. a bridge.
    Always,
    /// The callee has exactly one call site and can be removed afterwards.
    SingleCaller,
    /// Worth inlining into several callers, deferred until enough info is
    /// committed.
    MultiCallerCandidate,
    /// Small and effect-simple enough to duplicate freely.
    Simple,
    /// Must not be inlined.
    Never,
}

impl InlineReason {
    /// Returns `true` if the reason admits splicing in the current wave.
    #[must_use]
    pub const fn admits_inlining(self) -> bool {
        matches!(self, Self::Always | Self::SingleCaller | Self::Simple)
    }

    /// Returns `true` if the per-callee size limit does not apply.
    ///
    /// The caller growth allowance still does.
    #[must_use]
    pub const fn bypasses_size_limit(self) -> bool {
        matches!(self, Self::Always | Self::SingleCaller)
    }
}

/// An admitted inlining decision for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineAction {
    /// The concrete callee to splice.
    pub target: ProgramMethod,
    /// Why it was admitted.
    pub reason: InlineReason,
}

/// Tunables for the inliner.
#[derive(Debug, Clone, Copy)]
pub struct InlinerOptions {
    /// Largest body `Simple` inlining duplicates.
    pub max_inlined_instructions: usize,
    /// How deep splicing recurses into already-spliced regions.
    pub max_inlining_depth: usize,
    /// Instruction budget one caller may gain across all splices.
    pub instruction_allowance: usize,
}

impl Default for InlinerOptions {
    fn default() -> Self {
        InlinerOptions {
            max_inlined_instructions: 3,
            max_inlining_depth: 3,
            instruction_allowance: 1500,
        }
    }
}

/// Pluggable inlining policy.
///
/// The pipeline holds one strategy per run; the default one is
/// [`DefaultOracle`].
pub trait InlineStrategy: Send + Sync {
    /// Classifies inlining `callee` into `caller`.
    fn reason(
        &self,
        view: &ProgramView,
        store: &OptimizationInfoStore,
        caller: ProgramMethod,
        callee: ProgramMethod,
    ) -> InlineReason;

    /// Returns the action when the call site is admitted right now.
    fn compute_action(
        &self,
        view: &ProgramView,
        store: &OptimizationInfoStore,
        caller: ProgramMethod,
        callee: ProgramMethod,
    ) -> Option<InlineAction>;
}

/// The default heuristic oracle.
///
/// Applies keep info, recursion, accessibility and size checks against
/// the committed pre-wave [`OptimizationInfoStore`] snapshot. Callees
/// without committed info are deferred as candidates, never admitted
/// blind, except for `Always` and `SingleCaller` callees whose
/// accessibility is re-checked against the freshly built body during the
/// splice.
#[derive(Debug, Default)]
pub struct DefaultOracle {
    options: InlinerOptions,
}

impl DefaultOracle {
    /// Creates an oracle with the given tunables.
    #[must_use]
    pub fn new(options: InlinerOptions) -> Self {
        DefaultOracle { options }
    }
}

impl InlineStrategy for DefaultOracle {
    fn reason(
        &self,
        view: &ProgramView,
        store: &OptimizationInfoStore,
        caller: ProgramMethod,
        callee: ProgramMethod,
    ) -> InlineReason {
        if callee.method == caller.method {
            return InlineReason::Never;
        }
        let keep = view.keep_info(callee.method);
        if !keep.allow_inlining || keep.pinned {
            return InlineReason::Never;
        }
        let Some(def) = view.method_def(callee.method) else {
            return InlineReason::Never;
        };
        if !def.has_code() || def.flags.contains(AccessFlags::ABSTRACT) {
            return InlineReason::Never;
        }
        // Static synchronized bodies need a class object to monitor,
        // which the IR cannot express at a splice site.
        if def
            .flags
            .contains(AccessFlags::SYNCHRONIZED | AccessFlags::STATIC)
        {
            return InlineReason::Never;
        }
        if def.flags.contains(AccessFlags::BRIDGE) {
            return InlineReason::Always;
        }
        if view.call_count(callee.method) == Some(1) {
            return InlineReason::SingleCaller;
        }
        match store.get(callee.method) {
            Some(info) => {
                if info.constraint == crate::inliner::ConstraintWithTarget::Never {
                    InlineReason::Never
                } else if info.simple_inlining_eligible
                    && info.instruction_count <= self.options.max_inlined_instructions
                {
                    InlineReason::Simple
                } else {
                    InlineReason::MultiCallerCandidate
                }
            }
            None => InlineReason::MultiCallerCandidate,
        }
    }

    fn compute_action(
        &self,
        view: &ProgramView,
        store: &OptimizationInfoStore,
        caller: ProgramMethod,
        callee: ProgramMethod,
    ) -> Option<InlineAction> {
        let reason = self.reason(view, store, caller, callee);
        if !reason.admits_inlining() {
            return None;
        }
        if let Some(info) = store.get(callee.method) {
            if !info.constraint.allows(view, caller.holder) {
                return None;
            }
            if !reason.bypasses_size_limit()
                && info.instruction_count > self.options.max_inlined_instructions
            {
                return None;
            }
        }
        Some(InlineAction {
            target: callee,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inliner::ConstraintWithTarget,
        ir::{CodeBlock, CodeInst, CodeObject},
        lens::LensId,
        pipeline::OptimizationInfo,
        refs::{ClassDef, KeepInfo, MethodDef, MethodId, MethodProto, TypeId},
    };

    fn setup() -> (ProgramView, OptimizationInfoStore, TypeId) {
        let view = ProgramView::new();
        let holder = view.interner.intern_type("com/example/A");
        view.add_class(ClassDef {
            ty: holder,
            super_type: None,
            interfaces: Vec::new(),
            flags: AccessFlags::PUBLIC,
            nest_host: None,
            methods: Vec::new(),
            fields: Vec::new(),
            has_class_initializer: false,
        });
        (view, OptimizationInfoStore::new(), holder)
    }

    fn add_method(view: &ProgramView, holder: TypeId, name: &str, flags: AccessFlags) -> MethodId {
        let id = view
            .interner
            .intern_method(holder, name, MethodProto::void());
        let mut code = CodeObject::new(0);
        code.blocks.push(CodeBlock {
            instructions: vec![CodeInst::Return { src: None }],
            catches: Vec::new(),
        });
        view.add_method(MethodDef {
            id,
            flags,
            code: Some(code),
            code_lens: LensId::BASE,
        });
        id
    }

    fn info(count: usize, constraint: ConstraintWithTarget) -> OptimizationInfo {
        OptimizationInfo {
            instruction_count: count,
            returns_constant: None,
            never_returns_normally: false,
            simple_inlining_eligible: true,
            constraint,
        }
    }

    fn commit(store: &OptimizationInfoStore, method: MethodId, record: OptimizationInfo) {
        let mut buffer = crate::pipeline::FeedbackBuffer::new();
        buffer.record(method, record);
        buffer.commit(store);
    }

    #[test]
    fn test_keep_info_blocks_inlining() {
        let (view, store, holder) = setup();
        let caller = add_method(&view, holder, "caller", AccessFlags::PUBLIC);
        let callee = add_method(&view, holder, "callee", AccessFlags::PUBLIC);
        view.set_keep_info(
            callee,
            KeepInfo {
                allow_inlining: false,
                allow_code_replacement: true,
                pinned: false,
            },
        );
        let oracle = DefaultOracle::default();
        assert_eq!(
            oracle.reason(
                &view,
                &store,
                ProgramMethod::new(holder, caller),
                ProgramMethod::new(holder, callee)
            ),
            InlineReason::Never
        );
    }

    #[test]
    fn test_recursion_is_never() {
        let (view, store, holder) = setup();
        let m = add_method(&view, holder, "recurse", AccessFlags::PUBLIC);
        let oracle = DefaultOracle::default();
        assert_eq!(
            oracle.reason(
                &view,
                &store,
                ProgramMethod::new(holder, m),
                ProgramMethod::new(holder, m)
            ),
            InlineReason::Never
        );
    }

    #[test]
    fn test_single_caller_classification() {
        let (view, store, holder) = setup();
        let caller = add_method(&view, holder, "caller", AccessFlags::PUBLIC);
        let callee = add_method(&view, holder, "callee", AccessFlags::PUBLIC);
        view.set_call_count(callee, 1);
        let oracle = DefaultOracle::default();
        assert_eq!(
            oracle.reason(
                &view,
                &store,
                ProgramMethod::new(holder, caller),
                ProgramMethod::new(holder, callee)
            ),
            InlineReason::SingleCaller
        );
    }

    #[test]
    fn test_bridge_is_always() {
        let (view, store, holder) = setup();
        let caller = add_method(&view, holder, "caller", AccessFlags::PUBLIC);
        let bridge = add_method(
            &view,
            holder,
            "bridge",
            AccessFlags::PUBLIC | AccessFlags::BRIDGE | AccessFlags::SYNTHETIC,
        );
        let oracle = DefaultOracle::default();
        assert_eq!(
            oracle.reason(
                &view,
                &store,
                ProgramMethod::new(holder, caller),
                ProgramMethod::new(holder, bridge)
            ),
            InlineReason::Always
        );
    }

    #[test]
    fn test_simple_respects_size_limit() {
        let (view, store, holder) = setup();
        let caller = ProgramMethod::new(holder, add_method(&view, holder, "caller", AccessFlags::PUBLIC));
        let small = add_method(&view, holder, "small", AccessFlags::PUBLIC);
        let big = add_method(&view, holder, "big", AccessFlags::PUBLIC);
        view.set_call_count(small, 4);
        view.set_call_count(big, 4);
        commit(&store, small, info(2, ConstraintWithTarget::Always));
        commit(&store, big, info(40, ConstraintWithTarget::Always));

        let oracle = DefaultOracle::default();
        assert_eq!(
            oracle.reason(&view, &store, caller, ProgramMethod::new(holder, small)),
            InlineReason::Simple
        );
        assert_eq!(
            oracle.reason(&view, &store, caller, ProgramMethod::new(holder, big)),
            InlineReason::MultiCallerCandidate
        );
        assert!(oracle
            .compute_action(&view, &store, caller, ProgramMethod::new(holder, big))
            .is_none());
    }

    #[test]
    fn test_constraint_blocks_action() {
        let (view, store, holder) = setup();
        let other = view.interner.intern_type("org/far/B");
        view.add_class(ClassDef {
            ty: other,
            super_type: None,
            interfaces: Vec::new(),
            flags: AccessFlags::PUBLIC,
            nest_host: None,
            methods: Vec::new(),
            fields: Vec::new(),
            has_class_initializer: false,
        });
        let caller = ProgramMethod::new(holder, add_method(&view, holder, "caller", AccessFlags::PUBLIC));
        let callee = add_method(&view, other, "callee", AccessFlags::PUBLIC);
        view.set_call_count(callee, 3);
        commit(&store, callee, info(2, ConstraintWithTarget::SameClass(other)));

        let oracle = DefaultOracle::default();
        assert!(oracle
            .compute_action(&view, &store, caller, ProgramMethod::new(other, callee))
            .is_none());
    }

    #[test]
    fn test_unknown_callee_is_deferred() {
        let (view, store, holder) = setup();
        let caller = ProgramMethod::new(holder, add_method(&view, holder, "caller", AccessFlags::PUBLIC));
        let callee = add_method(&view, holder, "callee", AccessFlags::PUBLIC);
        view.set_call_count(callee, 5);
        let oracle = DefaultOracle::default();
        assert_eq!(
            oracle.reason(&view, &store, caller, ProgramMethod::new(holder, callee)),
            InlineReason::MultiCallerCandidate
        );
    }
}
