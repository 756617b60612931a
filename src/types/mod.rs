//! # Type System
//!
//! Data types, function records and the registries that intern them.
//!
//! Every type carries a stable 64-bit id: named types hash their fully
//! qualified name, function types hash their structural signature. Two
//! registries exist per runtime: the type registry (all live types,
//! indexed by id, with a host-type name map) and the function registry
//! (32-bit ids assigned on insert, immutable after registration).

pub mod data_type;
pub mod function;
pub mod registry;

pub use data_type::{
    AccessModifier, ArgKind, BaseSpec, DataType, FunctionArg, FunctionSignature, Property,
    PropertyFlags, TemplateData, TypeKind, TypeMeta,
};
pub use function::{Function, FunctionFlags, FunctionImpl};
pub use registry::{FunctionRegistry, TypeRegistry};

use sha2::{Digest, Sha256};

/// Stable 64-bit identifier of a data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u64);

/// 32-bit identifier of a registered function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

/// 32-bit identifier of a module (hash of its source path)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

/// Hash a fully qualified name into a stable 64-bit type id.
///
/// Ids must be stable across processes so compiled modules can refer to
/// types by id; a truncated SHA-256 of the name gives that without a
/// global counter.
pub fn type_id_from_name(fully_qualified_name: &str) -> TypeId {
    let digest = Sha256::digest(fully_qualified_name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    TypeId(u64::from_le_bytes(bytes))
}

/// Hash a module source path into a stable module id.
pub fn module_id_from_path(path: &str) -> ModuleId {
    let digest = Sha256::digest(path.as_bytes());
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&digest[..4]);
    ModuleId(u32::from_le_bytes(bytes))
}

/// Hash a function signature's structure into a stable type id.
///
/// Two signatures with the same thisness, return type and argument
/// kinds/types share one id.
pub fn type_id_from_signature(sig: &FunctionSignature) -> TypeId {
    let mut hasher = Sha256::new();
    hasher.update(b"fn");
    hasher.update(sig.return_type.0.to_le_bytes());
    match sig.this_type {
        Some(t) => {
            hasher.update([1u8]);
            hasher.update(t.0.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
    hasher.update([u8::from(sig.returns_pointer)]);
    for arg in &sig.args {
        hasher.update([arg.kind as u8]);
        hasher.update(arg.type_id.0.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    TypeId(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_ids_are_stable_and_distinct() {
        let a = type_id_from_name("math::vec2f");
        let b = type_id_from_name("math::vec2f");
        let c = type_id_from_name("math::vec3f");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn signature_ids_are_structural() {
        let i32_id = type_id_from_name("i32");
        let sig_a = FunctionSignature {
            return_type: i32_id,
            this_type: None,
            returns_pointer: false,
            args: vec![FunctionArg {
                kind: ArgKind::Value,
                type_id: i32_id,
            }],
        };
        let sig_b = sig_a.clone();
        assert_eq!(type_id_from_signature(&sig_a), type_id_from_signature(&sig_b));

        let mut sig_c = sig_a.clone();
        sig_c.args[0].kind = ArgKind::Pointer;
        assert_ne!(type_id_from_signature(&sig_a), type_id_from_signature(&sig_c));
    }
}
