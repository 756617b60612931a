//! Bind-time thunk generation
//!
//! Variadic binding is a monomorphizing generic layer: one trait
//! implementation per signature shape, generated by the arity macros
//! below, so every bound function gets a thunk specialized to its exact
//! argument types with no runtime reflection. Methods bind native
//! `Fn(&T, ...)`/`Fn(&mut T, ...)` callables; the receiver arrives
//! either through the call context's `this` slot (true methods) or as
//! the first explicit argument ("fake instance" functions).

use std::sync::Arc;

use crate::error::RuntimeError;
use crate::ffi::thunk::{ArgSpec, ScriptArg, ScriptReturn, Thunk, ThunkCall};

/// A host callable that can be bound as a free function or method.
pub trait NativeFunction<Marker>: Send + Sync + 'static {
    /// Explicit argument descriptors (receiver excluded).
    fn arg_specs() -> Vec<ArgSpec>;
    /// Host type key of the return type.
    fn ret_key() -> String;
    /// Host type key of the receiver, for methods.
    fn receiver_key() -> Option<String>;
    /// Generate the thunk. With `receiver_from_this` the receiver is
    /// read from the call context's `this` slot; otherwise it is the
    /// first explicit argument.
    fn make_thunk(self, receiver_from_this: bool, name: String) -> Thunk;
}

/// A host callable usable as a constructor: produces the object placed
/// at the return slot.
pub trait NativeCtor<Marker>: Send + Sync + 'static {
    /// Explicit argument descriptors.
    fn arg_specs() -> Vec<ArgSpec>;
    /// Generate the constructor thunk.
    fn make_thunk(self, name: String) -> Thunk;
}

/// Destructor thunk for a bound type: drops the slab entry, running the
/// Rust `Drop`.
pub fn destructor_thunk<T: 'static>(name: String) -> Thunk {
    Arc::new(move |call: &mut ThunkCall<'_>| {
        let handle = call.this_bits();
        call.objects.remove(handle).map_err(|e| RuntimeError::HostError {
            func: name.clone(),
            message: e.to_string(),
        })
    })
}

/// Marker distinguishing `Fn(&T, ...)` impls
pub struct RefRecv;
/// Marker distinguishing `Fn(&mut T, ...)` impls
pub struct MutRecv;

macro_rules! impl_native {
    ($($A:ident $idx:tt),*) => {
        // Plain function: primitives in, primitive (or unit) out
        impl<F, R $(, $A)*> NativeFunction<fn($($A,)*) -> R> for F
        where
            F: Fn($($A),*) -> R + Send + Sync + 'static,
            R: ScriptReturn,
            $($A: ScriptArg,)*
        {
            fn arg_specs() -> Vec<ArgSpec> {
                vec![$($A::spec()),*]
            }
            fn ret_key() -> String {
                R::key()
            }
            fn receiver_key() -> Option<String> {
                None
            }
            fn make_thunk(self, _receiver_from_this: bool, _name: String) -> Thunk {
                Arc::new(move |call: &mut ThunkCall<'_>| {
                    #[allow(non_snake_case, unused_variables)]
                    {
                        $(let $A = $A::from_call(call, $idx)?;)*
                        let r = (self)($($A),*);
                        r.write(call)
                    }
                })
            }
        }

        // Shared-receiver method
        impl<F, T, R $(, $A)*> NativeFunction<(RefRecv, fn(T $(, $A)*) -> R)> for F
        where
            F: Fn(&T $(, $A)*) -> R + Send + Sync + 'static,
            T: Send + 'static,
            R: ScriptReturn,
            $($A: ScriptArg,)*
        {
            fn arg_specs() -> Vec<ArgSpec> {
                vec![$($A::spec()),*]
            }
            fn ret_key() -> String {
                R::key()
            }
            fn receiver_key() -> Option<String> {
                Some(std::any::type_name::<T>().to_string())
            }
            fn make_thunk(self, receiver_from_this: bool, name: String) -> Thunk {
                Arc::new(move |call: &mut ThunkCall<'_>| {
                    #[allow(non_snake_case, unused_variables)]
                    {
                        let (handle, base) = if receiver_from_this {
                            (call.this_bits(), 0usize)
                        } else {
                            (call.arg_bits(0)?, 1usize)
                        };
                        $(let $A = $A::from_call(call, base + $idx)?;)*
                        let this = call.objects.get::<T>(handle).map_err(|e| {
                            RuntimeError::HostError {
                                func: name.clone(),
                                message: e.to_string(),
                            }
                        })?;
                        let r = (self)(this $(, $A)*);
                        r.write(call)
                    }
                })
            }
        }

        // Exclusive-receiver method
        impl<F, T, R $(, $A)*> NativeFunction<(MutRecv, fn(T $(, $A)*) -> R)> for F
        where
            F: Fn(&mut T $(, $A)*) -> R + Send + Sync + 'static,
            T: Send + 'static,
            R: ScriptReturn,
            $($A: ScriptArg,)*
        {
            fn arg_specs() -> Vec<ArgSpec> {
                vec![$($A::spec()),*]
            }
            fn ret_key() -> String {
                R::key()
            }
            fn receiver_key() -> Option<String> {
                Some(std::any::type_name::<T>().to_string())
            }
            fn make_thunk(self, receiver_from_this: bool, name: String) -> Thunk {
                Arc::new(move |call: &mut ThunkCall<'_>| {
                    #[allow(non_snake_case, unused_variables)]
                    {
                        let (handle, base) = if receiver_from_this {
                            (call.this_bits(), 0usize)
                        } else {
                            (call.arg_bits(0)?, 1usize)
                        };
                        $(let $A = $A::from_call(call, base + $idx)?;)*
                        let this = call.objects.get_mut::<T>(handle).map_err(|e| {
                            RuntimeError::HostError {
                                func: name.clone(),
                                message: e.to_string(),
                            }
                        })?;
                        let r = (self)(this $(, $A)*);
                        r.write(call)
                    }
                })
            }
        }

        // Constructor: any Rust value out, stored in the slab, handle
        // written to the return slot
        impl<F, T $(, $A)*> NativeCtor<fn($($A,)*) -> T> for F
        where
            F: Fn($($A),*) -> T + Send + Sync + 'static,
            T: Send + 'static,
            $($A: ScriptArg,)*
        {
            fn arg_specs() -> Vec<ArgSpec> {
                vec![$($A::spec()),*]
            }
            fn make_thunk(self, _name: String) -> Thunk {
                Arc::new(move |call: &mut ThunkCall<'_>| {
                    #[allow(non_snake_case, unused_variables)]
                    {
                        $(let $A = $A::from_call(call, $idx)?;)*
                        let value = (self)($($A),*);
                        let handle = call.objects.insert(value);
                        call.write_ret_bits(handle, 8)
                    }
                })
            }
        }
    };
}

impl_native!();
impl_native!(A0 0);
impl_native!(A0 0, A1 1);
impl_native!(A0 0, A1 1, A2 2);
impl_native!(A0 0, A1 1, A2 2, A3 3);
impl_native!(A0 0, A1 1, A2 2, A3 3, A4 4);
impl_native!(A0 0, A1 1, A2 2, A3 3, A4 4, A5 5);
impl_native!(A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6);
impl_native!(A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6, A7 7);

#[cfg(test)]
mod tests {
    use super::*;

    fn specs_of<M, F: NativeFunction<M>>(_f: &F) -> (Vec<ArgSpec>, String, Option<String>) {
        (F::arg_specs(), F::ret_key(), F::receiver_key())
    }

    #[test]
    fn plain_function_shape() {
        let f = |a: i32, b: f64| -> u32 { (a as f64 + b) as u32 };
        let (args, ret, recv) = specs_of(&f);
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].key, std::any::type_name::<i32>());
        assert_eq!(ret, std::any::type_name::<u32>());
        assert!(recv.is_none());
    }

    #[test]
    fn method_shape_carries_receiver() {
        struct Widget;
        let f = |_w: &Widget, n: u32| -> u32 { n };
        let (args, _, recv) = specs_of(&f);
        assert_eq!(args.len(), 1);
        assert_eq!(recv.as_deref(), Some(std::any::type_name::<Widget>()));
    }
}
