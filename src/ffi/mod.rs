//! # FFI binding layer
//!
//! Exposes native callables to script code through bind-time generated
//! thunks: free functions, methods, constructors, destructors and
//! property accessors all share one thunk contract (return slot,
//! execution context, marshalled arguments).

pub mod bind;
pub mod callback;
pub mod thunk;
pub mod type_binder;

pub use bind::{destructor_thunk, MutRecv, NativeCtor, NativeFunction, RefRecv};
pub use callback::{Callback, CallbackOwnership, RawCallback, RAW_CALLBACK_SIZE};
pub use thunk::{ArgSpec, ByVal, HostObject, PassMode, ScriptArg, ScriptReturn, Thunk, ThunkCall};
pub use type_binder::{ObjectTypeBinder, ObjectTypeExtender, PrimitiveTypeBinder};

use std::sync::Arc;

use crate::error::{BindError, Result};
use crate::types::{
    ArgKind, Function, FunctionArg, FunctionRegistry, FunctionSignature, TypeRegistry,
};

/// Bind a free function (or a "fake instance" function whose first
/// parameter is a bound host type) into the registries.
pub fn bind_free_function<M, F: NativeFunction<M>>(
    types: &mut TypeRegistry,
    functions: &mut FunctionRegistry,
    name: &str,
    f: F,
) -> Result<Arc<Function>> {
    let ret_key = F::ret_key();
    let Some(ret) = types.host_id_by_key(&ret_key) else {
        return Err(BindError::FunctionReturnTypeUnbound {
            func: name.to_string(),
        }
        .into());
    };

    let ptr = types.host_id_by_key("$ptr").unwrap_or(ret);
    let mut sig_args = vec![
        FunctionArg {
            kind: ArgKind::FuncPtr,
            type_id: ptr,
        },
        FunctionArg {
            kind: ArgKind::RetPtr,
            type_id: ret,
        },
        FunctionArg {
            kind: ArgKind::ContextPtr,
            type_id: ptr,
        },
    ];

    // Fake-instance functions pass the receiver as the first explicit
    // argument, by pointer.
    if let Some(recv_key) = F::receiver_key() {
        let Some(recv) = types.host_id_by_key(&recv_key) else {
            return Err(BindError::ArgTypeUnbound {
                func: name.to_string(),
                index: 0,
            }
            .into());
        };
        sig_args.push(FunctionArg {
            kind: ArgKind::Pointer,
            type_id: recv,
        });
    }

    let base = usize::from(F::receiver_key().is_some());
    for (i, spec) in F::arg_specs().iter().enumerate() {
        let Some(tid) = types.host_id_by_key(&spec.key) else {
            return Err(BindError::ArgTypeUnbound {
                func: name.to_string(),
                index: base + i,
            }
            .into());
        };
        let is_primitive = types.get(tid).map(|t| t.meta.is_primitive).unwrap_or(false);
        if !is_primitive && spec.mode == PassMode::ByValue {
            return Err(BindError::ArgStructPassByValue {
                func: name.to_string(),
                index: base + i,
            }
            .into());
        }
        sig_args.push(FunctionArg {
            kind: if is_primitive && spec.mode == PassMode::ByValue {
                ArgKind::Value
            } else {
                ArgKind::Pointer
            },
            type_id: tid,
        });
    }

    let sig = FunctionSignature {
        return_type: ret,
        this_type: None,
        returns_pointer: false,
        args: sig_args,
    };
    let sig_tp = types.intern_signature(sig);
    let thunk = f.make_thunk(false, name.to_string());
    let func = Function::host(name, name, sig_tp.id, thunk, false);
    let registered = functions.add(func);
    types.sync_functions(functions.snapshot());
    Ok(registered)
}
