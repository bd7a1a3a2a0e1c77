//! Accessibility constraints on moving code between classes.
//!
//! Inlining copies a callee's instructions into a caller that may live in
//! another class, nest or package. Every instruction that touches a
//! member or class imposes a constraint on where it may legally end up;
//! the callee's overall constraint is the meet of all of them, and the
//! oracle admits a call site only when the caller's context satisfies it.

use strum::{EnumCount, EnumIter};

use crate::{
    ir::{Instruction, IrGraph},
    refs::{AccessFlags, ProgramView, TypeId},
};

/// Constraint kind, ordered from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCount, EnumIter)]
pub enum Constraint {
    /// The code cannot move at all.
    Never,
    /// The code must stay inside one specific class.
    SameClass,
    /// The code must stay inside one nest.
    SameNest,
    /// The code must stay inside one package.
    Package,
    /// The code must stay inside subtypes of one class.
    Subclass,
    /// The code may move anywhere.
    Always,
}

/// A constraint paired with the holder it is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintWithTarget {
    /// No restriction.
    Always,
    /// Inlining is impossible.
    Never,
    /// Only into the named class.
    SameClass(TypeId),
    /// Only into the named class's nest.
    SameNest(TypeId),
    /// Only into the named class's package.
    Package(TypeId),
    /// Only into subtypes of the named class.
    Subclass(TypeId),
}

impl ConstraintWithTarget {
    /// The constraint kind, for ordering comparisons.
    #[must_use]
    pub fn constraint(&self) -> Constraint {
        match self {
            Self::Always => Constraint::Always,
            Self::Never => Constraint::Never,
            Self::SameClass(_) => Constraint::SameClass,
            Self::SameNest(_) => Constraint::SameNest,
            Self::Package(_) => Constraint::Package,
            Self::Subclass(_) => Constraint::Subclass,
        }
    }

    /// Returns `true` if code under this constraint may be placed in
    /// `context`.
    #[must_use]
    pub fn allows(&self, view: &ProgramView, context: TypeId) -> bool {
        match *self {
            Self::Always => true,
            Self::Never => false,
            Self::SameClass(holder) => context == holder,
            Self::SameNest(holder) => view.same_nest(context, holder),
            Self::Package(holder) => view.same_package(context, holder),
            Self::Subclass(holder) => view.is_subtype(context, holder),
        }
    }

    /// Greatest lower bound of two constraints.
    ///
    /// Equal kinds compare their holders; mixed kinds go through an
    /// explicit case analysis, strengthening where both restrictions can
    /// only be met in one class and collapsing to `Never` where they are
    /// incompatible.
    #[must_use]
    pub fn meet(self, other: Self, view: &ProgramView) -> Self {
        use ConstraintWithTarget::{Always, Never, Package, SameClass, SameNest, Subclass};

        if self == other {
            return self;
        }
        // Normalize so self is the more restrictive side.
        let (a, b) = if self.constraint() <= other.constraint() {
            (self, other)
        } else {
            (other, self)
        };
        match (a, b) {
            (Never, _) => Never,
            (a, Always) => a,
            (SameClass(h1), SameClass(h2)) => {
                if h1 == h2 {
                    SameClass(h1)
                } else {
                    Never
                }
            }
            (SameClass(h1), SameNest(h2)) => {
                if view.same_nest(h1, h2) {
                    SameClass(h1)
                } else {
                    Never
                }
            }
            (SameClass(h1), Package(h2)) => {
                if view.same_package(h1, h2) {
                    SameClass(h1)
                } else {
                    Never
                }
            }
            (SameClass(h1), Subclass(h2)) => {
                if view.is_subtype(h1, h2) {
                    SameClass(h1)
                } else {
                    Never
                }
            }
            (SameNest(h1), SameNest(h2)) => {
                if view.same_nest(h1, h2) {
                    SameNest(h1)
                } else {
                    Never
                }
            }
            (SameNest(h1), Package(h2)) => {
                // Nest members share a package.
                if view.same_package(h1, h2) {
                    SameNest(h1)
                } else {
                    Never
                }
            }
            (SameNest(h1), Subclass(h2)) => {
                // Only the nest member that is itself a subtype is known
                // to satisfy both.
                if view.is_subtype(h1, h2) {
                    SameClass(h1)
                } else {
                    Never
                }
            }
            (Package(h1), Package(h2)) => {
                if view.same_package(h1, h2) {
                    Package(h1)
                } else {
                    Never
                }
            }
            (Package(h1), Subclass(h2)) => {
                // The only class certain to be in the package and a
                // subtype is the package holder itself.
                if view.is_subtype(h1, h2) {
                    SameClass(h1)
                } else {
                    Never
                }
            }
            (Subclass(h1), Subclass(h2)) => {
                if view.is_subtype(h1, h2) {
                    Subclass(h1)
                } else if view.is_subtype(h2, h1) {
                    Subclass(h2)
                } else {
                    Never
                }
            }
            _ => Never,
        }
    }
}

/// Constraint the access flags of a member on `target_holder` impose on
/// code running in `context`.
#[must_use]
pub fn derive_constraint(
    view: &ProgramView,
    context: TypeId,
    target_holder: TypeId,
    flags: AccessFlags,
) -> ConstraintWithTarget {
    if flags.contains(AccessFlags::PUBLIC) {
        return ConstraintWithTarget::Always;
    }
    if flags.contains(AccessFlags::PRIVATE) {
        let in_nest = view
            .definition_for(target_holder)
            .is_some_and(|c| c.nest_host.is_some());
        if in_nest {
            return if view.same_nest(context, target_holder) {
                ConstraintWithTarget::SameNest(target_holder)
            } else {
                ConstraintWithTarget::Never
            };
        }
        return if context == target_holder {
            ConstraintWithTarget::SameClass(target_holder)
        } else {
            ConstraintWithTarget::Never
        };
    }
    if flags.contains(AccessFlags::PROTECTED) {
        if view.same_package(context, target_holder) {
            return ConstraintWithTarget::Package(target_holder);
        }
        return if view.is_subtype(context, target_holder) {
            ConstraintWithTarget::Subclass(target_holder)
        } else {
            ConstraintWithTarget::Never
        };
    }
    // Package private.
    if view.same_package(context, target_holder) {
        ConstraintWithTarget::Package(target_holder)
    } else {
        ConstraintWithTarget::Never
    }
}

/// Meet of the constraints of every instruction in `graph`, computed for
/// inlining the method into arbitrary callers.
///
/// `Never` short-circuits.
#[must_use]
pub fn compute_inlining_constraint(graph: &IrGraph, view: &ProgramView) -> ConstraintWithTarget {
    let context = graph.method().holder;
    let mut result = ConstraintWithTarget::Always;
    for id in graph.block_ids() {
        for instr in &graph.block(id).instructions {
            let constraint = instruction_constraint(view, context, &instr.kind);
            result = result.meet(constraint, view);
            if result == ConstraintWithTarget::Never {
                return result;
            }
        }
    }
    result
}

fn instruction_constraint(
    view: &ProgramView,
    context: TypeId,
    kind: &Instruction,
) -> ConstraintWithTarget {
    match kind {
        Instruction::Invoke { method, .. } => {
            let Some(resolved) = view.resolve_method(*method) else {
                // References outside the program resolve by identity and
                // keep their original accessibility.
                return ConstraintWithTarget::Always;
            };
            let Some(desc) = view.interner.method_desc(resolved) else {
                return ConstraintWithTarget::Always;
            };
            let holder = desc.holder;
            match view.method_def(resolved) {
                Some(def) => derive_constraint(view, context, holder, def.flags),
                None => ConstraintWithTarget::Always,
            }
        }
        Instruction::StaticGet { field }
        | Instruction::StaticPut { field, .. }
        | Instruction::InstanceGet { field, .. }
        | Instruction::InstancePut { field, .. } => {
            let Some(desc) = view.interner.field_desc(*field) else {
                return ConstraintWithTarget::Always;
            };
            let holder = desc.holder;
            match view.field_def(*field) {
                Some(def) => derive_constraint(view, context, holder, def.flags),
                None => ConstraintWithTarget::Always,
            }
        }
        Instruction::NewInstance { ty }
        | Instruction::CheckCast { ty, .. }
        | Instruction::InstanceOf { ty, .. }
        | Instruction::InitClass { ty } => match view.definition_for(*ty) {
            Some(class) if !class.flags.contains(AccessFlags::PUBLIC) => {
                ConstraintWithTarget::Package(*ty)
            }
            _ => ConstraintWithTarget::Always,
        },
        _ => ConstraintWithTarget::Always,
    }
}
