//! Script callbacks passed to host functions
//!
//! A script-side function value crossing into the host is wrapped in a
//! small `RawCallback` record holding the target function and its
//! captured data. When the application passes a bare function at call
//! time, the call site wraps it in a heap record it must destroy after
//! the call; a pre-wrapped callback stays owned by the caller. The
//! distinction is recorded per argument at bind time and the wrapper is
//! always owned by the outermost call frame that created it.

use crate::backend::vm::state::State;
use crate::error::RuntimeError;
use crate::ffi::thunk::{ArgSpec, PassMode, ScriptArg, ThunkCall};
use crate::types::FunctionId;

/// Byte size of the in-memory callback record
pub const RAW_CALLBACK_SIZE: u32 = 16;

/// In-memory layout: target function id at +0, captured-data pointer at
/// +8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCallback {
    /// Script function to invoke
    pub target_function: FunctionId,
    /// Captured-data pointer (0 when the callback captures nothing)
    pub captures: u64,
}

impl RawCallback {
    /// Write the record at `addr` in VM memory.
    pub fn write(&self, state: &mut State, addr: u64) -> Result<(), RuntimeError> {
        state.store(addr, 8, self.target_function.0 as u64)?;
        state.store(addr + 8, 8, self.captures)
    }

    /// Read a record from `addr` in VM memory.
    pub fn read(state: &State, addr: u64) -> Result<Self, RuntimeError> {
        let fid = state.load(addr, 8)? as u32;
        let captures = state.load(addr + 8, 8)?;
        Ok(Self {
            target_function: FunctionId(fid),
            captures,
        })
    }
}

/// Who destroys a callback wrapper after the call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOwnership {
    /// The call site created the wrapper and must destroy it
    CallSite,
    /// The application created the wrapper and keeps ownership
    Caller,
}

/// Host-side view of a script callback argument.
#[derive(Debug, Clone, Copy)]
pub struct Callback {
    /// The wrapped record
    pub raw: RawCallback,
    /// Address of the record in VM memory
    pub addr: u64,
}

impl ScriptArg for Callback {
    fn spec() -> ArgSpec {
        ArgSpec {
            key: std::any::type_name::<Callback>().to_string(),
            mode: PassMode::ByRef,
            is_callback: true,
        }
    }

    fn from_call(call: &ThunkCall<'_>, index: usize) -> Result<Self, RuntimeError> {
        let addr = call.arg_bits(index)?;
        let raw = RawCallback::read(call.state, addr)?;
        Ok(Self { raw, addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip() {
        let mut state = State::new(64);
        let cb = RawCallback {
            target_function: FunctionId(42),
            captures: 0xdead,
        };
        cb.write(&mut state, 16).unwrap();
        assert_eq!(RawCallback::read(&state, 16).unwrap(), cb);
    }
}
