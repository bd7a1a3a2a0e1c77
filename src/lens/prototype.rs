//! Descriptions of prototype rewrites carried by lens records.
//!
//! When a lens changes a method's signature, call sites built against the
//! old signature must be adjusted mechanically. A
//! [`RewrittenPrototypeDescription`] captures everything the rewriter
//! needs for that: which parameters disappeared (and the constant the
//! callee now assumes for them), which changed type, which were appended
//! (and the constant the call site must materialize), and what happened
//! to the return value.
//!
//! Indices always refer to the parameter list as it was *before* the
//! description applies, receiver excluded.

use crate::{
    ir::ConstValue,
    refs::TypeId,
};

/// A parameter the rewrite removed.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedParameter {
    /// Index in the pre-rewrite parameter list.
    pub index: usize,
    /// The constant the callee observes in place of the argument.
    pub replacement: ConstValue,
}

/// A parameter whose type changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetypedParameter {
    /// Index in the pre-rewrite parameter list.
    pub index: usize,
    /// The parameter's new type. A narrower type obliges the call site to
    /// insert a checked cast.
    pub new_type: TypeId,
}

/// A trailing parameter the rewrite appended.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendedParameter {
    /// The appended parameter's type.
    pub ty: TypeId,
    /// The constant every call site materializes for it.
    pub value: ConstValue,
}

/// What a rewrite did to the return value.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnChange {
    /// The return value was removed; callers substitute this constant.
    RemovedWithConstant(ConstValue),
    /// The return type changed; callers may need a checked cast.
    Retyped(TypeId),
}

/// The accumulated signature delta between two snapshots of a method.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RewrittenPrototypeDescription {
    /// Removed parameters, ascending by index.
    pub removed: Vec<RemovedParameter>,
    /// Retyped parameters, ascending by index.
    pub retyped: Vec<RetypedParameter>,
    /// Appended trailing parameters, in order.
    pub appended: Vec<AppendedParameter>,
    /// Return value change, if any.
    pub return_change: Option<ReturnChange>,
}

impl RewrittenPrototypeDescription {
    /// The empty description: the prototype did not change.
    #[must_use]
    pub fn none() -> Self {
        RewrittenPrototypeDescription::default()
    }

    /// Returns `true` if applying this description changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.retyped.is_empty()
            && self.appended.is_empty()
            && self.return_change.is_none()
    }

    /// Parameter count after applying this description to a list of
    /// `arity` parameters.
    #[must_use]
    pub fn apply_to_arity(&self, arity: usize) -> usize {
        arity - self.removed.len() + self.appended.len()
    }

    /// Composes `self` (applied first) with `later` (applied to the
    /// intermediate prototype), producing one description over the
    /// original prototype. `original_arity` is the parameter count the
    /// combined description will be applied to.
    #[must_use]
    pub fn combine(&self, later: &Self, original_arity: usize) -> Self {
        if later.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return later.clone();
        }

        // Original indices that survive `self`, in intermediate order. The
        // intermediate list is the survivors followed by self's appended
        // parameters.
        let removed_by_self: Vec<usize> = self.removed.iter().map(|r| r.index).collect();
        let survivors: Vec<usize> = (0..original_arity)
            .filter(|index| !removed_by_self.contains(index))
            .collect();

        let mut combined = RewrittenPrototypeDescription {
            removed: self.removed.clone(),
            retyped: self.retyped.clone(),
            appended: self.appended.clone(),
            return_change: self.return_change.clone(),
        };

        let mut dropped_appended = Vec::new();
        for removal in &later.removed {
            if let Some(&original) = survivors.get(removal.index) {
                combined.removed.push(RemovedParameter {
                    index: original,
                    replacement: removal.replacement.clone(),
                });
                combined.retyped.retain(|r| r.index != original);
            } else {
                // Removing a parameter self appended cancels the append;
                // no call site ever materialized it.
                dropped_appended.push(removal.index - survivors.len());
            }
        }
        for retype in &later.retyped {
            if let Some(&original) = survivors.get(retype.index) {
                combined.retyped.retain(|r| r.index != original);
                combined.retyped.push(RetypedParameter {
                    index: original,
                    new_type: retype.new_type,
                });
            } else {
                let appended = retype.index - survivors.len();
                combined.appended[appended].ty = retype.new_type;
            }
        }
        let mut appended_index = 0usize;
        combined.appended.retain(|_| {
            let keep = !dropped_appended.contains(&appended_index);
            appended_index += 1;
            keep
        });
        combined.appended.extend(later.appended.iter().cloned());

        if later.return_change.is_some() {
            combined.return_change = later.return_change.clone();
        }
        combined.removed.sort_by_key(|r| r.index);
        combined.retyped.sort_by_key(|r| r.index);
        combined
    }
}
