//! Concurrent intern tables for type, method, and field references.
//!
//! Every reference the optimizer reasons about is interned exactly once and
//! addressed by a small id afterwards. Interning gives reference identity:
//! lens maps, keep info, and optimization info are all keyed by id, and two
//! references are "the same" iff they carry the same id from the same table.
//!
//! The tables are safe for concurrent interning from pipeline workers. A
//! `DashMap` deduplicates descriptors while a `boxcar::Vec` provides the
//! lock-free id -> descriptor direction.

use dashmap::{DashMap, DashSet};

use crate::refs::{FieldId, MethodId, TypeId};

/// A method's shape: return type and parameter types.
///
/// `None` as the return type means void. Parameter types never include the
/// receiver; instance invokes carry the receiver as a separate leading value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodProto {
    /// Return type, `None` for void.
    pub ret: Option<TypeId>,
    /// Parameter types, excluding any receiver.
    pub params: Vec<TypeId>,
}

impl MethodProto {
    /// Creates a prototype from a return type and parameters.
    #[must_use]
    pub fn new(ret: Option<TypeId>, params: Vec<TypeId>) -> Self {
        MethodProto { ret, params }
    }

    /// A prototype with no parameters and no return value.
    #[must_use]
    pub fn void() -> Self {
        MethodProto {
            ret: None,
            params: Vec::new(),
        }
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Full descriptor of an interned method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDesc {
    /// Holder type the signature is declared against.
    pub holder: TypeId,
    /// Method name.
    pub name: String,
    /// Signature shape.
    pub proto: MethodProto,
}

/// Full descriptor of an interned field reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDesc {
    /// Holder type the field is declared on.
    pub holder: TypeId,
    /// Field name.
    pub name: String,
    /// Declared field type.
    pub ty: TypeId,
}

/// Concurrent intern tables producing [`TypeId`], [`MethodId`] and [`FieldId`].
///
/// Type descriptors use JVM-style slash-separated binary names
/// (`com/example/Widget`); the package is everything before the last slash.
///
/// The interner also carries the explicit allow-list of library references:
/// references that are legitimately outside the whole-program set and for
/// which identity fallback in lens lookups is correct rather than a symptom
/// of a missing registration.
pub struct RefInterner {
    type_ids: DashMap<String, TypeId>,
    type_descs: boxcar::Vec<String>,

    method_ids: DashMap<MethodDesc, MethodId>,
    method_descs: boxcar::Vec<MethodDesc>,

    field_ids: DashMap<FieldDesc, FieldId>,
    field_descs: boxcar::Vec<FieldDesc>,

    library_types: DashSet<TypeId>,
}

impl RefInterner {
    /// Creates empty intern tables.
    #[must_use]
    pub fn new() -> Self {
        RefInterner {
            type_ids: DashMap::new(),
            type_descs: boxcar::Vec::new(),
            method_ids: DashMap::new(),
            method_descs: boxcar::Vec::new(),
            field_ids: DashMap::new(),
            field_descs: boxcar::Vec::new(),
            library_types: DashSet::new(),
        }
    }

    /// Interns a type by its binary name, returning its stable id.
    ///
    /// Repeated interning of an equal descriptor returns the same id.
    pub fn intern_type(&self, descriptor: &str) -> TypeId {
        if let Some(existing) = self.type_ids.get(descriptor) {
            return *existing;
        }
        *self
            .type_ids
            .entry(descriptor.to_string())
            .or_insert_with(|| {
                let index = self.type_descs.push(descriptor.to_string());
                TypeId::new(u32::try_from(index).expect("intern table overflow"))
            })
    }

    /// Interns a method reference, returning its stable id.
    pub fn intern_method(&self, holder: TypeId, name: &str, proto: MethodProto) -> MethodId {
        let desc = MethodDesc {
            holder,
            name: name.to_string(),
            proto,
        };
        if let Some(existing) = self.method_ids.get(&desc) {
            return *existing;
        }
        *self.method_ids.entry(desc.clone()).or_insert_with(|| {
            let index = self.method_descs.push(desc);
            MethodId::new(u32::try_from(index).expect("intern table overflow"))
        })
    }

    /// Interns a field reference, returning its stable id.
    pub fn intern_field(&self, holder: TypeId, name: &str, ty: TypeId) -> FieldId {
        let desc = FieldDesc {
            holder,
            name: name.to_string(),
            ty,
        };
        if let Some(existing) = self.field_ids.get(&desc) {
            return *existing;
        }
        *self.field_ids.entry(desc.clone()).or_insert_with(|| {
            let index = self.field_descs.push(desc);
            FieldId::new(u32::try_from(index).expect("intern table overflow"))
        })
    }

    /// Returns the binary name for a type id.
    #[must_use]
    pub fn type_descriptor(&self, ty: TypeId) -> Option<&str> {
        self.type_descs.get(ty.index() as usize).map(String::as_str)
    }

    /// Returns the descriptor for a method id.
    #[must_use]
    pub fn method_desc(&self, method: MethodId) -> Option<&MethodDesc> {
        self.method_descs.get(method.index() as usize)
    }

    /// Returns the descriptor for a field id.
    #[must_use]
    pub fn field_desc(&self, field: FieldId) -> Option<&FieldDesc> {
        self.field_descs.get(field.index() as usize)
    }

    /// Returns the package portion of a type's binary name.
    ///
    /// The empty string is the default package.
    #[must_use]
    pub fn package_of(&self, ty: TypeId) -> &str {
        match self.type_descriptor(ty) {
            Some(desc) => desc.rsplit_once('/').map_or("", |(pkg, _)| pkg),
            None => "",
        }
    }

    /// Marks a type as a known library reference.
    ///
    /// Library references are never remapped by any lens; identity fallback
    /// during lens lookup is expected for them. Program references that fall
    /// through every lens map without being allow-listed trip a debug
    /// assertion in the chain.
    pub fn mark_library(&self, ty: TypeId) {
        self.library_types.insert(ty);
    }

    /// Returns `true` if the type is on the library allow-list.
    #[must_use]
    pub fn is_library(&self, ty: TypeId) -> bool {
        self.library_types.contains(&ty)
    }

    /// Number of interned types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.type_descs.count()
    }

    /// Number of interned methods.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.method_descs.count()
    }

    /// Number of interned fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.field_descs.count()
    }
}

impl Default for RefInterner {
    fn default() -> Self {
        Self::new()
    }
}
