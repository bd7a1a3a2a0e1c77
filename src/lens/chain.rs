//! The append-only chain of lens records.
//!
//! Every structural optimization (merge, rename, signature change)
//! publishes one [`LensRecord`] describing how references written against
//! the previous program shape map to the new shape. Records form a chain
//! through their `previous` id; resolving a reference walks the chain from
//! a head down to an explicit stop id (exclusive) and applies the
//! collected maps oldest-first.
//!
//! The chain is an arena: records are addressed by [`LensId`] and are
//! never mutated or removed once appended, so concurrent readers need no
//! locks. Appends happen single-threaded at wave boundaries.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    ir::IrGraph,
    lens::{FieldLookupResult, MethodLookupResult, RewrittenPrototypeDescription},
    refs::{FieldId, MethodId, TypeId},
    Error, Result,
};

/// Identity of one lens record in the chain arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LensId(pub u32);

impl LensId {
    /// The identity baseline below every record. Walking past it means the
    /// whole chain has been applied.
    pub const BASE: LensId = LensId(u32::MAX);

    /// Creates a lens id from a raw arena index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        LensId(index)
    }

    /// Returns `true` for the baseline sentinel.
    #[must_use]
    pub const fn is_base(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Debug for LensId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_base() {
            write!(f, "LensId(BASE)")
        } else {
            write!(f, "LensId({})", self.0)
        }
    }
}

impl fmt::Display for LensId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_base() {
            write!(f, "lens-base")
        } else {
            write!(f, "lens{}", self.0)
        }
    }
}

/// A rewrite effect that cannot be expressed as pure reference
/// substitution, run by the rewriter against the exact chain snapshot the
/// owning record defines.
///
/// The canonical example is horizontal class merging, which must insert a
/// synthesized discriminant argument at every call site of the merged
/// method.
pub trait InstructionRewriteHook: Send + Sync {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Applies the effect to one method graph.
    ///
    /// # Errors
    ///
    /// Implementations surface [`crate::Error::InvalidIr`] when the graph
    /// does not satisfy their expectations.
    fn rewrite(&self, graph: &mut IrGraph) -> Result<()>;
}

/// How one record maps a method reference.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodMapping {
    /// The reference after this record.
    pub new_method: MethodId,
    /// A more specific accessible reference, when the producer of the
    /// record performed rebinding.
    pub rebound: Option<MethodId>,
    /// Signature delta this record introduces, over the pre-record
    /// prototype.
    pub prototype_changes: RewrittenPrototypeDescription,
}

impl MethodMapping {
    /// A plain rename with no signature change.
    #[must_use]
    pub fn renamed(new_method: MethodId) -> Self {
        MethodMapping {
            new_method,
            rebound: None,
            prototype_changes: RewrittenPrototypeDescription::none(),
        }
    }
}

/// How one record maps a field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    /// The reference after this record.
    pub new_field: FieldId,
    /// A more specific accessible reference, when recorded.
    pub rebound: Option<FieldId>,
    /// The field's type before this record.
    pub old_type: TypeId,
    /// The field's type after this record. Lookups compare the first and
    /// last types of an interval to decide whether accesses need casts.
    pub new_type: TypeId,
}

impl FieldMapping {
    /// A plain rename keeping the field's type.
    #[must_use]
    pub fn renamed(new_field: FieldId, ty: TypeId) -> Self {
        FieldMapping {
            new_field,
            rebound: None,
            old_type: ty,
            new_type: ty,
        }
    }
}

/// One chain record: partial maps from pre-record to post-record
/// references. Absent entries mean identity.
pub struct LensRecord {
    /// The record this one builds on, [`LensId::BASE`] for the first.
    pub previous: LensId,
    /// Type renames.
    pub type_map: HashMap<TypeId, TypeId>,
    /// Method renames and signature changes.
    pub method_map: HashMap<MethodId, MethodMapping>,
    /// Field renames and retypings.
    pub field_map: HashMap<FieldId, FieldMapping>,
    /// Effect the rewriter must run against this exact snapshot.
    pub hook: Option<Arc<dyn InstructionRewriteHook>>,
    /// Marks a snapshot all method code has been rewritten to.
    pub is_code_lens: bool,
}

impl LensRecord {
    /// An identity record on top of `previous`.
    #[must_use]
    pub fn new(previous: LensId) -> Self {
        LensRecord {
            previous,
            type_map: HashMap::new(),
            method_map: HashMap::new(),
            field_map: HashMap::new(),
            hook: None,
            is_code_lens: false,
        }
    }

    /// Adds a type rename.
    #[must_use]
    pub fn with_type_mapping(mut self, old: TypeId, new: TypeId) -> Self {
        self.type_map.insert(old, new);
        self
    }

    /// Adds a method mapping.
    #[must_use]
    pub fn with_method_mapping(mut self, old: MethodId, mapping: MethodMapping) -> Self {
        self.method_map.insert(old, mapping);
        self
    }

    /// Adds a field mapping.
    #[must_use]
    pub fn with_field_mapping(mut self, old: FieldId, mapping: FieldMapping) -> Self {
        self.field_map.insert(old, mapping);
        self
    }

    /// Attaches a custom rewrite hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn InstructionRewriteHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Marks the record as a method-code baseline.
    #[must_use]
    pub fn as_code_lens(mut self) -> Self {
        self.is_code_lens = true;
        self
    }

    /// Returns `true` if the record maps nothing and carries no hook.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.type_map.is_empty()
            && self.method_map.is_empty()
            && self.field_map.is_empty()
            && self.hook.is_none()
    }
}

impl fmt::Debug for LensRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LensRecord")
            .field("previous", &self.previous)
            .field("types", &self.type_map.len())
            .field("methods", &self.method_map.len())
            .field("fields", &self.field_map.len())
            .field("hook", &self.hook.as_ref().map(|h| h.name()))
            .field("is_code_lens", &self.is_code_lens)
            .finish()
    }
}

/// The shared, append-only record arena.
pub struct LensChain {
    records: boxcar::Vec<LensRecord>,
}

impl LensChain {
    /// Creates an empty chain whose head is [`LensId::BASE`].
    #[must_use]
    pub fn new() -> Self {
        LensChain {
            records: boxcar::Vec::new(),
        }
    }

    /// The most recently appended record, [`LensId::BASE`] when empty.
    #[must_use]
    pub fn head(&self) -> LensId {
        match self.records.count() {
            0 => LensId::BASE,
            n => LensId::new(n as u32 - 1),
        }
    }

    /// The most recent record marked as a code baseline, [`LensId::BASE`]
    /// when none is.
    #[must_use]
    pub fn latest_code_lens(&self) -> LensId {
        for index in (0..self.records.count()).rev() {
            if let Some(record) = self.records.get(index) {
                if record.is_code_lens {
                    return LensId::new(index as u32);
                }
            }
        }
        LensId::BASE
    }

    /// Appends a record and returns its id, the new head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownLens`] if the record's `previous` does not
    /// point strictly backward into the chain.
    pub fn append(&self, record: LensRecord) -> Result<LensId> {
        let next = self.records.count() as u32;
        if !record.previous.is_base() && record.previous.0 >= next {
            return Err(Error::UnknownLens(record.previous.0));
        }
        let index = self.records.push(record);
        Ok(LensId::new(index as u32))
    }

    /// Borrows a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownLens`] for ids never returned by
    /// [`LensChain::append`].
    pub fn record(&self, id: LensId) -> Result<&LensRecord> {
        self.records
            .get(id.0 as usize)
            .ok_or(Error::UnknownLens(id.0))
    }

    /// Collects the records on the walk from `from` down to `stop`
    /// (exclusive), returned oldest-first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownLens`] when `stop` is not on the walk and
    /// [`Error::LensCycle`] when the previous-chain does not terminate.
    pub fn records_between(&self, stop: LensId, from: LensId) -> Result<Vec<(LensId, &LensRecord)>> {
        let mut collected = Vec::new();
        let mut current = from;
        while current != stop {
            if current.is_base() {
                return Err(Error::UnknownLens(stop.0));
            }
            let record = self.record(current)?;
            collected.push((current, record));
            if collected.len() > self.records.count() {
                return Err(Error::LensCycle(current.0));
            }
            current = record.previous;
        }
        collected.reverse();
        Ok(collected)
    }

    /// Records from the head down to `stop` (exclusive), oldest-first.
    ///
    /// # Errors
    ///
    /// See [`LensChain::records_between`].
    pub fn records_since(&self, stop: LensId) -> Result<Vec<(LensId, &LensRecord)>> {
        self.records_between(stop, self.head())
    }

    /// Resolves a type reference from the snapshot `stop` to the head.
    ///
    /// # Errors
    ///
    /// See [`LensChain::records_between`].
    pub fn lookup_type(&self, ty: TypeId, stop: LensId) -> Result<TypeId> {
        self.lookup_type_between(ty, stop, self.head())
    }

    /// Resolves a type reference across the interval `(stop, from]`.
    ///
    /// # Errors
    ///
    /// See [`LensChain::records_between`].
    pub fn lookup_type_between(&self, ty: TypeId, stop: LensId, from: LensId) -> Result<TypeId> {
        let mut current = ty;
        for (_, record) in self.records_between(stop, from)? {
            if let Some(&mapped) = record.type_map.get(&current) {
                current = mapped;
            }
        }
        Ok(current)
    }

    /// Resolves a method reference from the snapshot `stop` to the head.
    /// `arity` is the referenced prototype's parameter count at `stop`,
    /// used to compose signature deltas.
    ///
    /// # Errors
    ///
    /// See [`LensChain::records_between`].
    pub fn lookup_method(
        &self,
        method: MethodId,
        arity: usize,
        stop: LensId,
    ) -> Result<MethodLookupResult> {
        self.lookup_method_between(method, arity, stop, self.head())
    }

    /// Resolves a method reference across the interval `(stop, from]`.
    ///
    /// # Errors
    ///
    /// See [`LensChain::records_between`].
    pub fn lookup_method_between(
        &self,
        method: MethodId,
        arity: usize,
        stop: LensId,
        from: LensId,
    ) -> Result<MethodLookupResult> {
        let mut result = MethodLookupResult::identity(method);
        for (_, record) in self.records_between(stop, from)? {
            if let Some(mapping) = record.method_map.get(&result.reference) {
                result.prototype_changes = result
                    .prototype_changes
                    .combine(&mapping.prototype_changes, arity);
                result.reference = mapping.new_method;
                if mapping.rebound.is_some() {
                    result.rebound = mapping.rebound;
                }
            }
            // A previously recorded rebinding target is itself subject to
            // later renames.
            if let Some(rebound) = result.rebound {
                if let Some(mapping) = record.method_map.get(&rebound) {
                    result.rebound = Some(mapping.new_method);
                }
            }
        }
        Ok(result)
    }

    /// Resolves a field reference from the snapshot `stop` to the head.
    ///
    /// # Errors
    ///
    /// See [`LensChain::records_between`].
    pub fn lookup_field(&self, field: FieldId, stop: LensId) -> Result<FieldLookupResult> {
        self.lookup_field_between(field, stop, self.head())
    }

    /// Resolves a field reference across the interval `(stop, from]`.
    ///
    /// Casts compare the interval's first recorded type with its last: a
    /// widen-then-narrow sequence that restores the original type yields
    /// no cast at all.
    ///
    /// # Errors
    ///
    /// See [`LensChain::records_between`].
    pub fn lookup_field_between(
        &self,
        field: FieldId,
        stop: LensId,
        from: LensId,
    ) -> Result<FieldLookupResult> {
        let mut result = FieldLookupResult::identity(field);
        let mut first_type = None;
        let mut last_type = None;
        for (_, record) in self.records_between(stop, from)? {
            if let Some(mapping) = record.field_map.get(&result.reference) {
                if first_type.is_none() {
                    first_type = Some(mapping.old_type);
                }
                last_type = Some(mapping.new_type);
                result.reference = mapping.new_field;
                if mapping.rebound.is_some() {
                    result.rebound = mapping.rebound;
                }
            }
            if let Some(rebound) = result.rebound {
                if let Some(mapping) = record.field_map.get(&rebound) {
                    result.rebound = Some(mapping.new_field);
                }
            }
        }
        if let (Some(first), Some(last)) = (first_type, last_type) {
            if first != last {
                result.read_cast = Some(first);
                result.write_cast = Some(last);
            }
        }
        Ok(result)
    }
}

impl Default for LensChain {
    fn default() -> Self {
        LensChain::new()
    }
}

impl fmt::Debug for LensChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LensChain")
            .field("records", &self.records.count())
            .field("head", &self.head())
            .finish()
    }
}
