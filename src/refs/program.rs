//! Program definitions and the whole-program view.
//!
//! The optimizer operates on a closed world: every class that can be rewritten
//! is registered here, and everything else is a library reference resolved by
//! identity. [`ProgramView`] is the shared, concurrently-read container the
//! pipeline, rewriter and inliner all consult for definitions, hierarchy
//! queries and keep info.

use bitflags::bitflags;
use dashmap::{
    mapref::one::{Ref, RefMut},
    DashMap, DashSet,
};

use crate::{
    ir::CodeObject,
    lens::LensId,
    refs::{FieldId, MethodId, RefInterner, TypeId},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Member and class access flags
    pub struct AccessFlags: u32 {
        /// Accessible from everywhere
        const PUBLIC = 0x0001;
        /// Accessible only within the defining class (or nest)
        const PRIVATE = 0x0002;
        /// Accessible within the package and from subclasses
        const PROTECTED = 0x0004;
        /// No receiver
        const STATIC = 0x0008;
        /// Not overridable / not subclassable
        const FINAL = 0x0010;
        /// Method body holds the instance monitor while executing
        const SYNCHRONIZED = 0x0020;
        /// Compiler-synthesized bridge method
        const BRIDGE = 0x0040;
        /// Synthesized member not present in source
        const SYNTHETIC = 0x1000;
        /// No implementation in this class
        const ABSTRACT = 0x0400;
    }
}

impl AccessFlags {
    /// Returns `true` if neither public, private nor protected is set.
    #[must_use]
    pub fn is_package_private(self) -> bool {
        !self.intersects(AccessFlags::PUBLIC | AccessFlags::PRIVATE | AccessFlags::PROTECTED)
    }
}

/// A class definition inside the whole-program set.
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// The class's own type.
    pub ty: TypeId,
    /// Superclass, `None` for the root.
    pub super_type: Option<TypeId>,
    /// Implemented interfaces.
    pub interfaces: Vec<TypeId>,
    /// Class access flags.
    pub flags: AccessFlags,
    /// Nest host, if this class is a nest member. A class hosting its own
    /// nest lists itself.
    pub nest_host: Option<TypeId>,
    /// Methods declared on this class.
    pub methods: Vec<MethodId>,
    /// Fields declared on this class.
    pub fields: Vec<FieldId>,
    /// Whether the class has a static initializer with observable effects.
    pub has_class_initializer: bool,
}

/// A method definition: flags plus its (optional) code object.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// The interned reference this definition backs.
    pub id: MethodId,
    /// Method access flags.
    pub flags: AccessFlags,
    /// The method's code, `None` for abstract methods.
    pub code: Option<CodeObject>,
    /// The lens snapshot the stored code is current against. Decoded
    /// input starts at [`LensId::BASE`]; finalizing a method stamps the
    /// head it was written back under.
    pub code_lens: LensId,
}

impl MethodDef {
    /// Returns `true` if the method has a body the pipeline can process.
    #[must_use]
    pub fn has_code(&self) -> bool {
        self.code.is_some()
    }
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// The interned reference this definition backs.
    pub id: FieldId,
    /// Field access flags.
    pub flags: AccessFlags,
}

/// A program method handle: a holder class paired with a method reference.
///
/// This is the context object most operations reason about - accessibility,
/// nest and package questions are all asked relative to a `ProgramMethod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramMethod {
    /// The class the method is processed in the context of.
    pub holder: TypeId,
    /// The method reference.
    pub method: MethodId,
}

impl ProgramMethod {
    /// Creates a handle from a holder and method reference.
    #[must_use]
    pub const fn new(holder: TypeId, method: MethodId) -> Self {
        ProgramMethod { holder, method }
    }
}

/// Per-member permissions supplied by the external liveness analysis.
#[derive(Debug, Clone, Copy)]
pub struct KeepInfo {
    /// The member may be inlined into callers.
    pub allow_inlining: bool,
    /// The member's code may be replaced by optimized code.
    pub allow_code_replacement: bool,
    /// The member must survive shaking with its original signature.
    pub pinned: bool,
}

impl Default for KeepInfo {
    fn default() -> Self {
        KeepInfo {
            allow_inlining: true,
            allow_code_replacement: true,
            pinned: false,
        }
    }
}

/// The closed whole-program set with its intern tables and keep info.
///
/// All collection fields use thread-safe types so pipeline workers can
/// resolve references and mutate method code concurrently. The lens chain
/// is deliberately not stored here; it flows through the pipeline
/// explicitly.
pub struct ProgramView {
    /// Intern tables producing all reference ids.
    pub interner: RefInterner,

    /// Class definitions keyed by type.
    classes: DashMap<TypeId, ClassDef>,

    /// Method definitions keyed by reference.
    methods: DashMap<MethodId, MethodDef>,

    /// Field definitions keyed by reference.
    fields: DashMap<FieldId, FieldDef>,

    /// Keep info keyed by method; absent means default permissions.
    keep: DashMap<MethodId, KeepInfo>,

    /// Call-site counts from the external call graph, used for
    /// single-caller inlining decisions.
    call_counts: DashMap<MethodId, usize>,

    /// Methods the liveness analysis marked as reaching the pipeline.
    reachable: DashSet<MethodId>,
}

impl ProgramView {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        ProgramView {
            interner: RefInterner::new(),
            classes: DashMap::new(),
            methods: DashMap::new(),
            fields: DashMap::new(),
            keep: DashMap::new(),
            call_counts: DashMap::new(),
            reachable: DashSet::new(),
        }
    }

    /// Registers a class definition.
    pub fn add_class(&self, class: ClassDef) {
        self.classes.insert(class.ty, class);
    }

    /// Registers a method definition.
    pub fn add_method(&self, method: MethodDef) {
        self.methods.insert(method.id, method);
    }

    /// Registers a field definition.
    pub fn add_field(&self, field: FieldDef) {
        self.fields.insert(field.id, field);
    }

    /// Returns the class definition for a type, if it is in the program.
    #[must_use]
    pub fn definition_for(&self, ty: TypeId) -> Option<Ref<'_, TypeId, ClassDef>> {
        self.classes.get(&ty)
    }

    /// Returns the method definition for a reference, if present.
    #[must_use]
    pub fn method_def(&self, method: MethodId) -> Option<Ref<'_, MethodId, MethodDef>> {
        self.methods.get(&method)
    }

    /// Returns a mutable method definition, used when finalized code is
    /// written back.
    #[must_use]
    pub fn method_def_mut(&self, method: MethodId) -> Option<RefMut<'_, MethodId, MethodDef>> {
        self.methods.get_mut(&method)
    }

    /// Returns the field definition for a reference, if present.
    #[must_use]
    pub fn field_def(&self, field: FieldId) -> Option<Ref<'_, FieldId, FieldDef>> {
        self.fields.get(&field)
    }

    /// Removes a method definition from the program (tree shaking).
    pub fn remove_method(&self, method: MethodId) {
        self.methods.remove(&method);
        self.reachable.remove(&method);
    }

    /// Sets keep info for a method.
    pub fn set_keep_info(&self, method: MethodId, info: KeepInfo) {
        self.keep.insert(method, info);
    }

    /// Returns keep info for a method, defaulting to full permissions.
    #[must_use]
    pub fn keep_info(&self, method: MethodId) -> KeepInfo {
        self.keep.get(&method).map_or_else(KeepInfo::default, |k| *k)
    }

    /// Records how many call sites the external call graph found.
    pub fn set_call_count(&self, method: MethodId, count: usize) {
        self.call_counts.insert(method, count);
    }

    /// Returns the recorded call-site count, if known.
    #[must_use]
    pub fn call_count(&self, method: MethodId) -> Option<usize> {
        self.call_counts.get(&method).map(|c| *c)
    }

    /// Marks a method as reaching the pipeline.
    pub fn mark_reachable(&self, method: MethodId) {
        self.reachable.insert(method);
    }

    /// Returns `true` if the liveness analysis kept the method.
    #[must_use]
    pub fn is_reachable(&self, method: MethodId) -> bool {
        self.reachable.contains(&method)
    }

    /// Walks the superclass chain to decide subtyping.
    ///
    /// Interfaces participate: a class is a subtype of every interface it
    /// (or a superclass) implements. Types outside the program have no
    /// recorded hierarchy and only equal types compare as subtypes.
    #[must_use]
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        if sub == sup {
            return true;
        }
        let mut current = sub;
        loop {
            let Some(class) = self.classes.get(&current) else {
                return false;
            };
            if class.interfaces.iter().any(|&i| self.is_subtype(i, sup)) {
                return true;
            }
            match class.super_type {
                Some(parent) if parent == sup => return true,
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Returns `true` if both types live in the same package.
    #[must_use]
    pub fn same_package(&self, a: TypeId, b: TypeId) -> bool {
        self.interner.package_of(a) == self.interner.package_of(b)
    }

    /// Returns `true` if both types are members of the same nest.
    ///
    /// A class without a nest attribute hosts a nest of its own.
    #[must_use]
    pub fn same_nest(&self, a: TypeId, b: TypeId) -> bool {
        self.nest_host_of(a) == self.nest_host_of(b)
    }

    fn nest_host_of(&self, ty: TypeId) -> TypeId {
        self.classes
            .get(&ty)
            .and_then(|c| c.nest_host)
            .unwrap_or(ty)
    }

    /// Returns `true` if instantiating (or statically accessing) the type
    /// can trigger an observable class initializer.
    #[must_use]
    pub fn has_class_initializer(&self, ty: TypeId) -> bool {
        self.classes
            .get(&ty)
            .is_some_and(|c| c.has_class_initializer)
    }

    /// Resolves a method reference to its defining class.
    ///
    /// Walks the holder's superclass chain looking for a declaration with the
    /// same name and prototype, re-interning the reference against the class
    /// that actually defines it. Returns `None` when no program class defines
    /// the method.
    #[must_use]
    pub fn resolve_method(&self, method: MethodId) -> Option<MethodId> {
        let desc = self.interner.method_desc(method)?.clone();
        let mut current = desc.holder;
        loop {
            let class = self.classes.get(&current)?;
            let candidate = self
                .interner
                .intern_method(current, &desc.name, desc.proto.clone());
            if class.methods.contains(&candidate) {
                return Some(candidate);
            }
            current = class.super_type?;
        }
    }

    /// Resolves a virtual invoke to its single concrete dispatch target.
    ///
    /// Only sound targets are returned: the resolved definition must be
    /// final, private, static, or declared on a final class, so no subclass
    /// can override it.
    #[must_use]
    pub fn single_dispatch_target(&self, method: MethodId) -> Option<ProgramMethod> {
        let resolved = self.resolve_method(method)?;
        let def = self.methods.get(&resolved)?;
        if def.flags.contains(AccessFlags::ABSTRACT) {
            return None;
        }
        let holder = self.interner.method_desc(resolved)?.holder;
        let holder_final = self
            .classes
            .get(&holder)
            .is_some_and(|c| c.flags.contains(AccessFlags::FINAL));
        let devirtualizable = holder_final
            || def
                .flags
                .intersects(AccessFlags::FINAL | AccessFlags::PRIVATE | AccessFlags::STATIC);
        devirtualizable.then_some(ProgramMethod::new(holder, resolved))
    }
}

impl Default for ProgramView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::MethodProto;

    fn class(view: &ProgramView, name: &str, super_type: Option<TypeId>) -> TypeId {
        let ty = view.interner.intern_type(name);
        view.add_class(ClassDef {
            ty,
            super_type,
            interfaces: Vec::new(),
            flags: AccessFlags::PUBLIC,
            nest_host: None,
            methods: Vec::new(),
            fields: Vec::new(),
            has_class_initializer: false,
        });
        ty
    }

    #[test]
    fn test_subtype_chain() {
        let view = ProgramView::new();
        let root = class(&view, "com/example/Base", None);
        let mid = class(&view, "com/example/Mid", Some(root));
        let leaf = class(&view, "com/example/Leaf", Some(mid));
        let other = class(&view, "com/example/Other", Some(root));

        assert!(view.is_subtype(leaf, root));
        assert!(view.is_subtype(leaf, mid));
        assert!(view.is_subtype(leaf, leaf));
        assert!(!view.is_subtype(root, leaf));
        assert!(!view.is_subtype(leaf, other));
    }

    #[test]
    fn test_subtype_via_interface() {
        let view = ProgramView::new();
        let iface = class(&view, "com/example/Drawable", None);
        let ty = view.interner.intern_type("com/example/Widget");
        view.add_class(ClassDef {
            ty,
            super_type: None,
            interfaces: vec![iface],
            flags: AccessFlags::PUBLIC,
            nest_host: None,
            methods: Vec::new(),
            fields: Vec::new(),
            has_class_initializer: false,
        });
        assert!(view.is_subtype(ty, iface));
    }

    #[test]
    fn test_same_package_and_nest() {
        let view = ProgramView::new();
        let a = class(&view, "com/example/A", None);
        let b = class(&view, "com/example/B", None);
        let c = class(&view, "org/other/C", None);
        assert!(view.same_package(a, b));
        assert!(!view.same_package(a, c));

        // Without nest attributes every class hosts itself.
        assert!(!view.same_nest(a, b));

        let host = view.interner.intern_type("com/example/Host");
        let member = view.interner.intern_type("com/example/Host$Inner");
        for ty in [host, member] {
            view.add_class(ClassDef {
                ty,
                super_type: None,
                interfaces: Vec::new(),
                flags: AccessFlags::PUBLIC,
                nest_host: Some(host),
                methods: Vec::new(),
                fields: Vec::new(),
                has_class_initializer: false,
            });
        }
        assert!(view.same_nest(host, member));
    }

    #[test]
    fn test_resolve_method_walks_supers() {
        let view = ProgramView::new();
        let base = view.interner.intern_type("com/example/Base");
        let leaf = view.interner.intern_type("com/example/Leaf");
        let base_m = view
            .interner
            .intern_method(base, "run", MethodProto::void());
        view.add_class(ClassDef {
            ty: base,
            super_type: None,
            interfaces: Vec::new(),
            flags: AccessFlags::PUBLIC,
            nest_host: None,
            methods: vec![base_m],
            fields: Vec::new(),
            has_class_initializer: false,
        });
        view.add_class(ClassDef {
            ty: leaf,
            super_type: Some(base),
            interfaces: Vec::new(),
            flags: AccessFlags::PUBLIC,
            nest_host: None,
            methods: Vec::new(),
            fields: Vec::new(),
            has_class_initializer: false,
        });
        view.add_method(MethodDef {
            id: base_m,
            flags: AccessFlags::PUBLIC,
            code: None,
            code_lens: LensId::BASE,
        });

        let leaf_ref = view
            .interner
            .intern_method(leaf, "run", MethodProto::void());
        assert_eq!(view.resolve_method(leaf_ref), Some(base_m));
    }

    #[test]
    fn test_keep_info_defaults() {
        let view = ProgramView::new();
        let ty = view.interner.intern_type("com/example/A");
        let m = view.interner.intern_method(ty, "run", MethodProto::void());
        let info = view.keep_info(m);
        assert!(info.allow_inlining);
        assert!(info.allow_code_replacement);
        assert!(!info.pinned);

        view.set_keep_info(
            m,
            KeepInfo {
                allow_inlining: false,
                allow_code_replacement: true,
                pinned: true,
            },
        );
        assert!(!view.keep_info(m).allow_inlining);
    }
}
