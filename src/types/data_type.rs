//! Data type model: metadata, variants, members and the equivalence,
//! convertibility and assignability relations.

use std::sync::Arc;

use crate::compiler::intrinsics::Specializer;
use crate::types::{registry::TypeRegistry, FunctionId, ModuleId, TypeId};

/// Essential attributes of a data type.
///
/// Equivalence compares every field here except `size` and `is_host`;
/// see [`DataType::is_equivalent_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeMeta {
    /// Byte size of a value of this type
    pub size: u32,
    /// Bound to a native host type
    pub is_host: bool,
    /// Plain-old-data: trivially constructible, copyable and destructible
    pub is_pod: bool,
    /// Constructible without running user code
    pub is_trivially_constructible: bool,
    /// Copyable with a byte copy
    pub is_trivially_copyable: bool,
    /// Destructible without running user code
    pub is_trivially_destructible: bool,
    /// Fits in a register and passes by value
    pub is_primitive: bool,
    /// f32 or f64
    pub is_floating_point: bool,
    /// Whole-number type
    pub is_integral: bool,
    /// Unsigned integral type
    pub is_unsigned: bool,
    /// Function signature type
    pub is_function: bool,
    /// Uninstantiated template
    pub is_template: bool,
    /// Compiler-generated type without a user-visible name
    pub is_anonymous: bool,
}

/// Member access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessModifier {
    /// Visible everywhere
    #[default]
    Public,
    /// Visible only inside the declaring type or module
    Private,
}

/// Per-property capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropertyFlags {
    /// Property can be read
    pub can_read: bool,
    /// Property can be written
    pub can_write: bool,
    /// Property stores a pointer to the value rather than the value
    pub is_pointer: bool,
    /// Property is static (per-type, not per-instance)
    pub is_static: bool,
}

impl PropertyFlags {
    /// Read-write instance property
    pub fn rw() -> Self {
        Self {
            can_read: true,
            can_write: true,
            ..Self::default()
        }
    }

    /// Read-only instance property
    pub fn read_only() -> Self {
        Self {
            can_read: true,
            ..Self::default()
        }
    }
}

/// A named member of a type
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Member name
    pub name: String,
    /// Access control
    pub access: AccessModifier,
    /// Byte offset inside the owning type's layout
    pub offset: u64,
    /// Type of the member
    pub type_id: TypeId,
    /// Capability flags
    pub flags: PropertyFlags,
    /// Accessor invoked on read, if the property is not directly addressed
    pub getter: Option<FunctionId>,
    /// Accessor invoked on write, if the property is not directly addressed
    pub setter: Option<FunctionId>,
}

/// An inheritance base of a class type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseSpec {
    /// The inherited type
    pub type_id: TypeId,
    /// Byte offset of the base inside the derived layout
    pub offset: u64,
    /// Inheritance access
    pub access: AccessModifier,
}

/// How an argument travels into a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArgKind {
    /// Implicit pointer to the call context
    ContextPtr = 0,
    /// Implicit pointer to the return slot
    RetPtr = 1,
    /// Implicit pointer identifying the called function
    FuncPtr = 2,
    /// Implicit `this` pointer of a method call
    ThisPtr = 3,
    /// Explicit argument passed by pointer
    Pointer = 4,
    /// Explicit primitive passed by value
    Value = 5,
    /// Implicit pointer to captured data of a closure
    CapturePtr = 6,
}

impl ArgKind {
    /// Implicit arguments are injected by the compiler, not written by
    /// script code. The first four kinds are implicit.
    pub fn is_implicit(self) -> bool {
        matches!(
            self,
            ArgKind::ContextPtr | ArgKind::RetPtr | ArgKind::FuncPtr | ArgKind::ThisPtr
        )
    }
}

/// One argument descriptor of a function signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionArg {
    /// Passing discipline
    pub kind: ArgKind,
    /// Static type of the argument
    pub type_id: TypeId,
}

/// Structure of a function type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    /// Return type
    pub return_type: TypeId,
    /// Receiver type for methods
    pub this_type: Option<TypeId>,
    /// Return value is a pointer into caller-visible storage
    pub returns_pointer: bool,
    /// All arguments, implicit first in the fixed order
    /// `func_ptr`, `ret_ptr`, `context_ptr`, `this_ptr` (methods only),
    /// then explicit arguments
    pub args: Vec<FunctionArg>,
}

impl FunctionSignature {
    /// Descriptors of the explicit (script-visible) arguments
    pub fn explicit_args(&self) -> impl Iterator<Item = &FunctionArg> {
        self.args.iter().filter(|a| !a.kind.is_implicit())
    }

    /// Number of explicit arguments
    pub fn explicit_arg_count(&self) -> usize {
        self.explicit_args().count()
    }
}

/// Opaque template payload plus the callback that produces a
/// specialization for a set of template arguments.
#[derive(Clone)]
pub struct TemplateData {
    /// Template-context blob; opaque to the core, owned by whoever
    /// registered the template
    pub context: Arc<[u8]>,
    /// Produces the specialized type for the given arguments
    pub specializer: Specializer,
}

impl std::fmt::Debug for TemplateData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateData")
            .field("context_len", &self.context.len())
            .finish()
    }
}

/// Which variant of data type this is
#[derive(Debug, Clone)]
pub enum TypeKind {
    /// Struct or primitive with properties, methods, bases, destructor
    Plain,
    /// Function signature
    Function(FunctionSignature),
    /// Uninstantiated template
    Template(TemplateData),
    /// Refers to another type
    Alias {
        /// The referred-to type
        target: TypeId,
    },
    /// Plain type with named inheritance bases
    Class,
}

/// A registered data type.
///
/// Created by binders (host types) or by AST lowering (script types).
/// The declaring module owns it; the global registry indexes it.
#[derive(Debug, Clone)]
pub struct DataType {
    /// Stable 64-bit id
    pub id: TypeId,
    /// Short name
    pub name: String,
    /// Fully qualified name including module/namespace qualifiers
    pub fully_qualified_name: String,
    /// Attribute set
    pub meta: TypeMeta,
    /// Access control of the type itself
    pub access: AccessModifier,
    /// Declaring module, if any
    pub owner: Option<ModuleId>,
    /// Instance members
    pub properties: Vec<Property>,
    /// Inheritance bases (classes only)
    pub bases: Vec<BaseSpec>,
    /// Methods, by function id
    pub methods: Vec<FunctionId>,
    /// Destructor, if the type has one
    pub destructor: Option<FunctionId>,
    /// Variant payload
    pub kind: TypeKind,
    /// Template this type was specialized from, if any
    pub template_base: Option<TypeId>,
    /// Arguments used to specialize the template
    pub template_args: Vec<TypeId>,
}

impl DataType {
    /// Plain type with the given meta and no members.
    pub fn plain(name: &str, fully_qualified_name: &str, meta: TypeMeta) -> Self {
        Self {
            id: super::type_id_from_name(fully_qualified_name),
            name: name.to_string(),
            fully_qualified_name: fully_qualified_name.to_string(),
            meta,
            access: AccessModifier::Public,
            owner: None,
            properties: Vec::new(),
            bases: Vec::new(),
            methods: Vec::new(),
            destructor: None,
            kind: TypeKind::Plain,
            template_base: None,
            template_args: Vec::new(),
        }
    }

    /// Function type for a signature. The id is structural.
    pub fn function(sig: FunctionSignature) -> Self {
        let id = super::type_id_from_signature(&sig);
        let meta = TypeMeta {
            size: 8,
            is_function: true,
            ..TypeMeta::default()
        };
        Self {
            id,
            name: String::from("<signature>"),
            fully_qualified_name: format!("<signature {:#x}>", id.0),
            meta,
            access: AccessModifier::Public,
            owner: None,
            properties: Vec::new(),
            bases: Vec::new(),
            methods: Vec::new(),
            destructor: None,
            kind: TypeKind::Function(sig),
            template_base: None,
            template_args: Vec::new(),
        }
    }

    /// Alias referring to `target`.
    pub fn alias(name: &str, fully_qualified_name: &str, target: &DataType) -> Self {
        Self {
            id: super::type_id_from_name(fully_qualified_name),
            name: name.to_string(),
            fully_qualified_name: fully_qualified_name.to_string(),
            meta: target.meta,
            access: AccessModifier::Public,
            owner: None,
            properties: Vec::new(),
            bases: Vec::new(),
            methods: Vec::new(),
            destructor: None,
            kind: TypeKind::Alias { target: target.id },
            template_base: None,
            template_args: Vec::new(),
        }
    }

    /// Uninstantiated template type.
    pub fn template(name: &str, fully_qualified_name: &str, data: TemplateData) -> Self {
        let meta = TypeMeta {
            is_template: true,
            ..TypeMeta::default()
        };
        Self {
            id: super::type_id_from_name(fully_qualified_name),
            name: name.to_string(),
            fully_qualified_name: fully_qualified_name.to_string(),
            meta,
            access: AccessModifier::Public,
            owner: None,
            properties: Vec::new(),
            bases: Vec::new(),
            methods: Vec::new(),
            destructor: None,
            kind: TypeKind::Template(data),
            template_base: None,
            template_args: Vec::new(),
        }
    }

    /// The signature payload, if this is a function type.
    pub fn signature(&self) -> Option<&FunctionSignature> {
        match &self.kind {
            TypeKind::Function(sig) => Some(sig),
            _ => None,
        }
    }

    /// Follow the chain of aliases to the type being referred to.
    ///
    /// Returns this type's own id if it is not an alias. Cycles are
    /// broken by giving up after the registry's type count.
    pub fn effective_id(&self, registry: &TypeRegistry) -> TypeId {
        let mut current = self.id;
        let mut kind = self.kind.clone();
        let mut hops = registry.len() + 1;
        while let TypeKind::Alias { target } = kind {
            if hops == 0 {
                break;
            }
            hops -= 1;
            current = target;
            match registry.get(target) {
                Some(t) => kind = t.kind.clone(),
                None => break,
            }
        }
        current
    }

    /// Look up a property by name, optionally searching bases.
    pub fn prop<'a>(
        &'a self,
        name: &str,
        registry: &'a TypeRegistry,
        exclude_inherited: bool,
    ) -> Option<Property> {
        if let Some(p) = self.properties.iter().find(|p| p.name == name) {
            return Some(p.clone());
        }
        if exclude_inherited {
            return None;
        }
        for base in &self.bases {
            let base_tp = registry.get(base.type_id)?;
            if let Some(mut p) = base_tp.prop(name, registry, false) {
                p.offset += base.offset;
                return Some(p);
            }
        }
        None
    }

    /// Id equality after alias chasing.
    pub fn is_equal_to(&self, other: &DataType, registry: &TypeRegistry) -> bool {
        self.effective_id(registry) == other.effective_id(registry)
    }

    /// Structural equivalence.
    ///
    /// True iff every listed attribute matches, every method has a
    /// counterpart with the same name, signature id, access and
    /// staticness, every property matches on name, offset, access, flags
    /// and type, and the base lists are pairwise equivalent.
    pub fn is_equivalent_to(&self, other: &DataType, registry: &TypeRegistry) -> bool {
        let a = &self.meta;
        let b = &other.meta;
        let attrs_match = a.is_pod == b.is_pod
            && a.is_trivially_constructible == b.is_trivially_constructible
            && a.is_trivially_copyable == b.is_trivially_copyable
            && a.is_trivially_destructible == b.is_trivially_destructible
            && a.is_primitive == b.is_primitive
            && a.is_floating_point == b.is_floating_point
            && a.is_integral == b.is_integral
            && a.is_unsigned == b.is_unsigned
            && a.is_function == b.is_function
            && a.is_template == b.is_template;
        if !attrs_match {
            return false;
        }

        if let (TypeKind::Function(sa), TypeKind::Function(sb)) = (&self.kind, &other.kind) {
            if !signature_equivalent(sa, sb, registry) {
                return false;
            }
        }

        if self.methods.len() != other.methods.len() {
            return false;
        }
        for (ma, mb) in self.methods.iter().zip(other.methods.iter()) {
            let (fa, fb) = match (registry.function(*ma), registry.function(*mb)) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            if fa.name != fb.name
                || fa.signature != fb.signature
                || fa.access != fb.access
                || fa.is_method != fb.is_method
            {
                return false;
            }
        }

        if self.properties.len() != other.properties.len() {
            return false;
        }
        for (pa, pb) in self.properties.iter().zip(other.properties.iter()) {
            if pa.name != pb.name
                || pa.offset != pb.offset
                || pa.access != pb.access
                || pa.flags != pb.flags
                || pa.type_id != pb.type_id
            {
                return false;
            }
        }

        if self.bases.len() != other.bases.len() {
            return false;
        }
        for (ba, bb) in self.bases.iter().zip(other.bases.iter()) {
            let (ta, tb) = match (registry.get(ba.type_id), registry.get(bb.type_id)) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            if !ta.is_equivalent_to(&tb, registry) {
                return false;
            }
        }

        true
    }

    /// Whether this type can be converted to `to`.
    ///
    /// True if both are primitives, if `to` has a constructor taking
    /// exactly this type, or if this type has a cast method returning
    /// `to`.
    pub fn is_convertible_to(&self, to: &DataType, registry: &TypeRegistry) -> bool {
        if self.meta.is_primitive && to.meta.is_primitive {
            return true;
        }
        for mid in &to.methods {
            let Some(m) = registry.function(*mid) else {
                continue;
            };
            if m.name != "constructor" {
                continue;
            }
            let Some(sig_tp) = registry.get(m.signature) else {
                continue;
            };
            let Some(sig) = sig_tp.signature() else {
                continue;
            };
            let explicit: Vec<_> = sig.explicit_args().collect();
            if explicit.len() == 1 && explicit[0].type_id == self.id {
                return true;
            }
        }
        for mid in &self.methods {
            let Some(m) = registry.function(*mid) else {
                continue;
            };
            if !m.name.starts_with("operator ") {
                continue;
            }
            let Some(sig_tp) = registry.get(m.signature) else {
                continue;
            };
            if let Some(sig) = sig_tp.signature() {
                if sig.return_type == to.id {
                    return true;
                }
            }
        }
        false
    }

    /// Whether values of this type may be implicitly assigned to
    /// storage of type `to`.
    pub fn is_implicitly_assignable_to(&self, to: &DataType, registry: &TypeRegistry) -> bool {
        if self.meta.is_primitive && to.meta.is_primitive {
            return true;
        }
        if self.is_equal_to(to, registry) && self.meta.is_trivially_copyable {
            return true;
        }
        self.meta.is_trivially_copyable && self.is_equivalent_to(to, registry)
    }

    /// Whether the type can be constructed from the given argument types.
    pub fn is_constructable_with(&self, args: &[TypeId], registry: &TypeRegistry) -> bool {
        self.find_constructor(args, registry).is_some()
            || (self.meta.is_trivially_constructible && args.is_empty())
    }

    /// Find a declared constructor matching the argument types exactly.
    pub fn find_constructor(&self, args: &[TypeId], registry: &TypeRegistry) -> Option<FunctionId> {
        for mid in &self.methods {
            let m = registry.function(*mid)?;
            if m.name != "constructor" {
                continue;
            }
            let sig_tp = registry.get(m.signature)?;
            let sig = sig_tp.signature()?;
            let explicit: Vec<_> = sig.explicit_args().collect();
            if explicit.len() == args.len()
                && explicit.iter().zip(args.iter()).all(|(a, b)| a.type_id == *b)
            {
                return Some(*mid);
            }
        }
        None
    }

    /// Find methods matching a name and, optionally, a signature shape.
    pub fn find_methods(
        &self,
        name: &str,
        arg_types: Option<&[TypeId]>,
        registry: &TypeRegistry,
    ) -> Vec<FunctionId> {
        let mut out = Vec::new();
        for mid in &self.methods {
            let Some(m) = registry.function(*mid) else {
                continue;
            };
            if m.name != name {
                continue;
            }
            if let Some(want) = arg_types {
                let Some(sig_tp) = registry.get(m.signature) else {
                    continue;
                };
                let Some(sig) = sig_tp.signature() else {
                    continue;
                };
                let explicit: Vec<_> = sig.explicit_args().collect();
                if explicit.len() != want.len()
                    || !explicit.iter().zip(want.iter()).all(|(a, b)| a.type_id == *b)
                {
                    continue;
                }
            }
            out.push(*mid);
        }
        out
    }
}

/// Structural equivalence of two signatures: same thisness, same return
/// type, same argument kinds and types position by position.
pub fn signature_equivalent(
    a: &FunctionSignature,
    b: &FunctionSignature,
    _registry: &TypeRegistry,
) -> bool {
    a.this_type == b.this_type
        && a.return_type == b.return_type
        && a.returns_pointer == b.returns_pointer
        && a.args.len() == b.args.len()
        && a.args
            .iter()
            .zip(b.args.iter())
            .all(|(x, y)| x.kind == y.kind && x.type_id == y.type_id)
}
