//! Thunks and argument marshalling
//!
//! Every bound host callable is reached through a thunk with one
//! uniform contract: it receives the return slot, the execution context
//! and the marshalled argument views, copies each argument into the
//! native call, invokes it, and places the result at the return slot.
//! Thunks are generated at bind time, monomorphized per signature shape
//! by the arity macros in [`crate::ffi::bind`]; primitives marshal
//! bit-exactly through 64-bit words.

use std::sync::Arc;

use crate::backend::vm::state::State;
use crate::error::RuntimeError;
use crate::runtime::execution::ExecutionContext;
use crate::runtime::host_objects::{Heap, HostObjects};

/// How an argument travels into the native call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// Bit-exact 64-bit word
    ByValue,
    /// Pointer (VM memory offset or host-object handle)
    ByRef,
}

/// One argument slot of a bound signature as seen at bind time
#[derive(Debug, Clone)]
pub struct ArgSpec {
    /// Stable host type key (`std::any::type_name` of the Rust type)
    pub key: String,
    /// Passing discipline
    pub mode: PassMode,
    /// The argument is a script callback wrapped in a `RawCallback`
    /// record; the wrapper's ownership is recorded per call site
    pub is_callback: bool,
}

impl ArgSpec {
    /// Value argument of a Rust type.
    pub fn value<T: 'static>() -> Self {
        Self {
            key: std::any::type_name::<T>().to_string(),
            mode: PassMode::ByValue,
            is_callback: false,
        }
    }

    /// Reference argument of a Rust type.
    pub fn reference<T: 'static>() -> Self {
        Self {
            key: std::any::type_name::<T>().to_string(),
            mode: PassMode::ByRef,
            is_callback: false,
        }
    }
}

/// The marshalled view of one host call.
///
/// `args` holds one 64-bit word per explicit argument: the raw bits of
/// primitives, a VM memory offset for script aggregates, or a host
/// object handle for bound types.
pub struct ThunkCall<'a> {
    /// VM execution state (registers and memory)
    pub state: &'a mut State,
    /// Host object slab
    pub objects: &'a mut HostObjects,
    /// Script heap
    pub heap: &'a mut Heap,
    /// The current call's execution context
    pub ectx: &'a mut ExecutionContext,
    /// Name of the bound function, for error messages
    pub func_name: &'a str,
    args: Vec<u64>,
    this: u64,
    ret_off: u64,
}

impl<'a> ThunkCall<'a> {
    /// Assemble a call view. `ret_off` of zero means no return storage.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &'a mut State,
        objects: &'a mut HostObjects,
        heap: &'a mut Heap,
        ectx: &'a mut ExecutionContext,
        func_name: &'a str,
        args: Vec<u64>,
        this: u64,
        ret_off: u64,
    ) -> Self {
        Self {
            state,
            objects,
            heap,
            ectx,
            func_name,
            args,
            this,
            ret_off,
        }
    }

    /// Raw bits of explicit argument `i`.
    pub fn arg_bits(&self, i: usize) -> Result<u64, RuntimeError> {
        self.args.get(i).copied().ok_or(RuntimeError::HostError {
            func: self.func_name.to_string(),
            message: format!("missing argument {i}"),
        })
    }

    /// Number of explicit arguments.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// The receiver handle/pointer for method thunks.
    pub fn this_bits(&self) -> u64 {
        self.this
    }

    /// Write raw result bits of `size` bytes at the return slot.
    pub fn write_ret_bits(&mut self, bits: u64, size: u32) -> Result<(), RuntimeError> {
        if self.ret_off == 0 {
            return Ok(());
        }
        self.state.store(self.ret_off, size, bits)
    }

    /// Record an error on the trace; the interpreter unwinds after the
    /// thunk returns.
    pub fn raise(&mut self, message: impl Into<String>) {
        self.ectx.trace.record(message.into());
    }
}

/// A bound host callable under the uniform thunk contract.
pub type Thunk = Arc<dyn Fn(&mut ThunkCall<'_>) -> Result<(), RuntimeError> + Send + Sync>;

/// Types that can arrive as a marshalled argument.
pub trait ScriptArg: Sized + 'static {
    /// Bind-time descriptor for this argument position.
    fn spec() -> ArgSpec;
    /// Reconstruct the value from the call view.
    fn from_call(call: &ThunkCall<'_>, index: usize) -> Result<Self, RuntimeError>;
}

macro_rules! impl_primitive_arg {
    ($($t:ty => $from:expr),* $(,)?) => {
        $(
            impl ScriptArg for $t {
                fn spec() -> ArgSpec {
                    ArgSpec::value::<$t>()
                }
                fn from_call(call: &ThunkCall<'_>, index: usize) -> Result<Self, RuntimeError> {
                    let bits = call.arg_bits(index)?;
                    #[allow(clippy::redundant_closure_call)]
                    Ok(($from)(bits))
                }
            }
        )*
    };
}

impl_primitive_arg! {
    i8 => |b: u64| b as i8,
    i16 => |b: u64| b as i16,
    i32 => |b: u64| b as i32,
    i64 => |b: u64| b as i64,
    u8 => |b: u64| b as u8,
    u16 => |b: u64| b as u16,
    u32 => |b: u64| b as u32,
    u64 => |b: u64| b,
    f32 => |b: u64| f32::from_bits(b as u32),
    f64 => f64::from_bits,
    bool => |b: u64| b != 0,
}

/// Marker wrapper forcing an aggregate to be passed by value. Binding a
/// function with such a parameter fails with the aggregate-by-value
/// error; the type exists so that the failure is expressible and
/// testable.
pub struct ByVal<T>(pub T);

impl<T: 'static> ScriptArg for ByVal<T> {
    fn spec() -> ArgSpec {
        ArgSpec {
            key: std::any::type_name::<T>().to_string(),
            mode: PassMode::ByValue,
            is_callback: false,
        }
    }
    fn from_call(call: &ThunkCall<'_>, _index: usize) -> Result<Self, RuntimeError> {
        Err(RuntimeError::HostError {
            func: call.func_name.to_string(),
            message: "aggregates cannot be passed by value".into(),
        })
    }
}

/// Types that can be written to a return slot.
pub trait ScriptReturn: 'static {
    /// Stable host type key of the return type.
    fn key() -> String;
    /// Place the value at the return slot.
    fn write(self, call: &mut ThunkCall<'_>) -> Result<(), RuntimeError>;
}

impl ScriptReturn for () {
    fn key() -> String {
        std::any::type_name::<()>().to_string()
    }
    fn write(self, _call: &mut ThunkCall<'_>) -> Result<(), RuntimeError> {
        Ok(())
    }
}

macro_rules! impl_primitive_ret {
    ($($t:ty => $size:expr, $bits:expr),* $(,)?) => {
        $(
            impl ScriptReturn for $t {
                fn key() -> String {
                    std::any::type_name::<$t>().to_string()
                }
                fn write(self, call: &mut ThunkCall<'_>) -> Result<(), RuntimeError> {
                    #[allow(clippy::redundant_closure_call)]
                    call.write_ret_bits(($bits)(self), $size)
                }
            }
        )*
    };
}

impl_primitive_ret! {
    i8 => 1, |v: i8| v as u8 as u64,
    i16 => 2, |v: i16| v as u16 as u64,
    i32 => 4, |v: i32| v as u32 as u64,
    i64 => 8, |v: i64| v as u64,
    u8 => 1, |v: u8| v as u64,
    u16 => 2, |v: u16| v as u64,
    u32 => 4, |v: u32| v as u64,
    u64 => 8, |v: u64| v,
    f32 => 4, |v: f32| v.to_bits() as u64,
    f64 => 8, |v: f64| v.to_bits(),
    bool => 1, |v: bool| u64::from(v),
}

/// Wraps an aggregate return: the value is placement-constructed into
/// the host object slab and its handle written at the return slot.
pub struct HostObject<T>(pub T);

impl<T: Send + 'static> ScriptReturn for HostObject<T> {
    fn key() -> String {
        std::any::type_name::<T>().to_string()
    }
    fn write(self, call: &mut ThunkCall<'_>) -> Result<(), RuntimeError> {
        let handle = call.objects.insert(self.0);
        call.write_ret_bits(handle, 8)
    }
}
