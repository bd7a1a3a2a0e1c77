//! Results of resolving references through the lens chain.

use crate::{
    lens::RewrittenPrototypeDescription,
    refs::{FieldId, MethodId, TypeId},
};

/// The outcome of resolving a method reference through a chain interval.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodLookupResult {
    /// The reference in the current program.
    pub reference: MethodId,
    /// A more specific, accessible reference to bind the call to, when one
    /// was recorded.
    pub rebound: Option<MethodId>,
    /// Signature delta accumulated across the interval, expressed over the
    /// original prototype.
    pub prototype_changes: RewrittenPrototypeDescription,
}

impl MethodLookupResult {
    /// The identity result for an untouched reference.
    #[must_use]
    pub fn identity(reference: MethodId) -> Self {
        MethodLookupResult {
            reference,
            rebound: None,
            prototype_changes: RewrittenPrototypeDescription::none(),
        }
    }

    /// The reference the call should actually bind to.
    #[must_use]
    pub fn bound_reference(&self) -> MethodId {
        self.rebound.unwrap_or(self.reference)
    }

    /// Returns `true` if neither the reference nor the prototype changed.
    #[must_use]
    pub fn is_identity(&self, original: MethodId) -> bool {
        self.reference == original && self.rebound.is_none() && self.prototype_changes.is_empty()
    }
}

/// The outcome of resolving a field reference through a chain interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLookupResult {
    /// The reference in the current program.
    pub reference: FieldId,
    /// A more specific, accessible reference to bind the access to.
    pub rebound: Option<FieldId>,
    /// Type to checked-cast loaded values to, when the field's type no
    /// longer matches what the reading code expects.
    pub read_cast: Option<TypeId>,
    /// Type to checked-cast stored values to, when the field's type became
    /// narrower than what the writing code provides.
    pub write_cast: Option<TypeId>,
}

impl FieldLookupResult {
    /// The identity result for an untouched reference.
    #[must_use]
    pub fn identity(reference: FieldId) -> Self {
        FieldLookupResult {
            reference,
            rebound: None,
            read_cast: None,
            write_cast: None,
        }
    }

    /// The reference the access should actually bind to.
    #[must_use]
    pub fn bound_reference(&self) -> FieldId {
        self.rebound.unwrap_or(self.reference)
    }
}
