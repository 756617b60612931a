//! Builtin primitive types
//!
//! Registered once per runtime; the compiler and binder look these up
//! constantly, so their ids are cached in a small copyable struct.

use crate::types::{DataType, TypeId, TypeMeta, TypeRegistry};

/// Ids of the always-present builtin types
#[derive(Debug, Clone, Copy)]
pub struct Builtins {
    /// `void`
    pub void_t: TypeId,
    /// `bool`
    pub bool_t: TypeId,
    /// `i8`
    pub i8_t: TypeId,
    /// `i16`
    pub i16_t: TypeId,
    /// `i32`
    pub i32_t: TypeId,
    /// `i64`
    pub i64_t: TypeId,
    /// `u8`
    pub u8_t: TypeId,
    /// `u16`
    pub u16_t: TypeId,
    /// `u32`
    pub u32_t: TypeId,
    /// `u64`
    pub u64_t: TypeId,
    /// `f32`
    pub f32_t: TypeId,
    /// `f64`
    pub f64_t: TypeId,
    /// Untyped pointer
    pub ptr_t: TypeId,
    /// Type of the `null` literal
    pub null_t: TypeId,
    /// Error sentinel type carried by poison values
    pub poison_t: TypeId,
    /// Execution context type threaded through every call
    pub ectx_t: TypeId,
}

fn int_meta(size: u32, unsigned: bool) -> TypeMeta {
    TypeMeta {
        size,
        is_pod: true,
        is_trivially_constructible: true,
        is_trivially_copyable: true,
        is_trivially_destructible: true,
        is_primitive: true,
        is_integral: true,
        is_unsigned: unsigned,
        ..TypeMeta::default()
    }
}

fn float_meta(size: u32) -> TypeMeta {
    TypeMeta {
        size,
        is_pod: true,
        is_trivially_constructible: true,
        is_trivially_copyable: true,
        is_trivially_destructible: true,
        is_primitive: true,
        is_floating_point: true,
        ..TypeMeta::default()
    }
}

impl Builtins {
    /// Register the builtin types and return their ids.
    pub fn register(reg: &mut TypeRegistry) -> Self {
        let mut add = |name: &str, meta: TypeMeta| -> TypeId {
            let tp = DataType::plain(name, name, meta);
            let id = tp.id;
            // Builtins are registered exactly once per runtime
            let arc = reg.add(tp).expect("builtin type registered twice");
            reg.map_host_named(name, arc.id);
            id
        };

        let void_t = add("void", TypeMeta {
            is_pod: true,
            is_trivially_constructible: true,
            is_trivially_copyable: true,
            is_trivially_destructible: true,
            ..TypeMeta::default()
        });
        let bool_t = add("bool", int_meta(1, true));
        let i8_t = add("i8", int_meta(1, false));
        let i16_t = add("i16", int_meta(2, false));
        let i32_t = add("i32", int_meta(4, false));
        let i64_t = add("i64", int_meta(8, false));
        let u8_t = add("u8", int_meta(1, true));
        let u16_t = add("u16", int_meta(2, true));
        let u32_t = add("u32", int_meta(4, true));
        let u64_t = add("u64", int_meta(8, true));
        let f32_t = add("f32", float_meta(4));
        let f64_t = add("f64", float_meta(8));
        let ptr_t = add("$ptr", int_meta(8, true));
        let null_t = add("$null", int_meta(8, true));
        let poison_t = add("$poison", TypeMeta {
            size: 8,
            is_anonymous: true,
            ..TypeMeta::default()
        });
        let ectx_t = add("$ectx", int_meta(8, true));

        let b = Self {
            void_t,
            bool_t,
            i8_t,
            i16_t,
            i32_t,
            i64_t,
            u8_t,
            u16_t,
            u32_t,
            u64_t,
            f32_t,
            f64_t,
            ptr_t,
            null_t,
            poison_t,
            ectx_t,
        };

        // Map the Rust primitive type names so bound host signatures
        // resolve their argument types.
        reg.map_host_named(std::any::type_name::<bool>(), bool_t);
        reg.map_host_named(std::any::type_name::<i8>(), i8_t);
        reg.map_host_named(std::any::type_name::<i16>(), i16_t);
        reg.map_host_named(std::any::type_name::<i32>(), i32_t);
        reg.map_host_named(std::any::type_name::<i64>(), i64_t);
        reg.map_host_named(std::any::type_name::<u8>(), u8_t);
        reg.map_host_named(std::any::type_name::<u16>(), u16_t);
        reg.map_host_named(std::any::type_name::<u32>(), u32_t);
        reg.map_host_named(std::any::type_name::<u64>(), u64_t);
        reg.map_host_named(std::any::type_name::<f32>(), f32_t);
        reg.map_host_named(std::any::type_name::<f64>(), f64_t);
        reg.map_host_named(std::any::type_name::<()>(), void_t);

        b
    }

    /// Look a builtin up by its script-facing name.
    pub fn by_name(&self, name: &str) -> Option<TypeId> {
        Some(match name {
            "void" => self.void_t,
            "bool" => self.bool_t,
            "i8" => self.i8_t,
            "i16" => self.i16_t,
            "i32" => self.i32_t,
            "i64" => self.i64_t,
            "u8" => self.u8_t,
            "u16" => self.u16_t,
            "u32" => self.u32_t,
            "u64" => self.u64_t,
            "f32" => self.f32_t,
            "f64" => self.f64_t,
            _ => return None,
        })
    }
}
