//! Host-visible call values
//!
//! Arguments cross into the VM as typed [`CallArg`]s validated against
//! the target signature; results come back wrapped in an [`Object`].

use crate::builtins::Builtins;
use crate::types::{FunctionId, TypeId};

/// One argument of a host-initiated call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallArg {
    /// `i8`
    I8(i8),
    /// `i16`
    I16(i16),
    /// `i32`
    I32(i32),
    /// `i64`
    I64(i64),
    /// `u8`
    U8(u8),
    /// `u16`
    U16(u16),
    /// `u32`
    U32(u32),
    /// `u64`
    U64(u64),
    /// `f32`
    F32(f32),
    /// `f64`
    F64(f64),
    /// `bool`
    Bool(bool),
    /// Host object handle with its script type
    Object(u64, TypeId),
    /// Bare script function passed where a callback is expected; the
    /// call site wraps it and destroys the wrapper after the call
    Callback(FunctionId),
    /// Pre-wrapped callback record address; ownership stays with the
    /// application
    WrappedCallback(u64),
}

impl CallArg {
    /// Raw 64-bit representation placed in the argument register.
    /// Signed integers ride sign-extended so the VM's full-width
    /// comparisons see their value.
    pub fn bits(&self) -> u64 {
        match *self {
            CallArg::I8(v) => v as i64 as u64,
            CallArg::I16(v) => v as i64 as u64,
            CallArg::I32(v) => v as i64 as u64,
            CallArg::I64(v) => v as u64,
            CallArg::U8(v) => v as u64,
            CallArg::U16(v) => v as u64,
            CallArg::U32(v) => v as u64,
            CallArg::U64(v) => v,
            CallArg::F32(v) => v.to_bits() as u64,
            CallArg::F64(v) => v.to_bits(),
            CallArg::Bool(v) => u64::from(v),
            CallArg::Object(h, _) => h,
            CallArg::Callback(f) => f.0 as u64,
            CallArg::WrappedCallback(addr) => addr,
        }
    }

    /// Script type id of the argument.
    pub fn type_id(&self, b: &Builtins) -> Option<TypeId> {
        Some(match *self {
            CallArg::I8(_) => b.i8_t,
            CallArg::I16(_) => b.i16_t,
            CallArg::I32(_) => b.i32_t,
            CallArg::I64(_) => b.i64_t,
            CallArg::U8(_) => b.u8_t,
            CallArg::U16(_) => b.u16_t,
            CallArg::U32(_) => b.u32_t,
            CallArg::U64(_) => b.u64_t,
            CallArg::F32(_) => b.f32_t,
            CallArg::F64(_) => b.f64_t,
            CallArg::Bool(_) => b.bool_t,
            CallArg::Object(_, t) => t,
            CallArg::Callback(_) | CallArg::WrappedCallback(_) => return None,
        })
    }

    /// Whether the argument rides in a floating-point register.
    pub fn is_float(&self) -> bool {
        matches!(self, CallArg::F32(_) | CallArg::F64(_))
    }
}

/// Result payload of a call
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectData {
    /// Void result
    Void,
    /// Primitive bits
    Bits(u64),
    /// Host object handle
    Handle(u64),
    /// Script aggregate copied out of the return slot
    Bytes(Vec<u8>),
}

/// A typed value returned from a script call.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// Script type of the value
    pub type_id: TypeId,
    /// Payload
    pub data: ObjectData,
}

impl Object {
    /// Void result.
    pub fn void(type_id: TypeId) -> Self {
        Self {
            type_id,
            data: ObjectData::Void,
        }
    }

    /// Raw bits, when the result is a primitive.
    pub fn bits(&self) -> Option<u64> {
        match self.data {
            ObjectData::Bits(b) => Some(b),
            _ => None,
        }
    }

    /// As `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        self.bits().map(|b| b as i32)
    }

    /// As `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        self.bits().map(|b| b as i64)
    }

    /// As `u32`.
    pub fn as_u32(&self) -> Option<u32> {
        self.bits().map(|b| b as u32)
    }

    /// As `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        self.bits()
    }

    /// As `f32`.
    pub fn as_f32(&self) -> Option<f32> {
        self.bits().map(|b| f32::from_bits(b as u32))
    }

    /// As `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        self.bits().map(f64::from_bits)
    }

    /// As `bool`.
    pub fn as_bool(&self) -> Option<bool> {
        self.bits().map(|b| b != 0)
    }

    /// Host object handle, when the result is a bound type.
    pub fn handle(&self) -> Option<u64> {
        match self.data {
            ObjectData::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// Raw bytes of a script aggregate result.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.data {
            ObjectData::Bytes(b) => Some(b),
            _ => None,
        }
    }
}
