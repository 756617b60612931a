//! Fluent type binders
//!
//! An [`ObjectTypeBinder`] accumulates constructors, an optional
//! destructor, methods (instance, static and "fake instance"),
//! and properties, then `finalize` produces the class type and
//! registers everything. [`PrimitiveTypeBinder`] behaves the same
//! without constructor/destructor semantics. [`ObjectTypeExtender`]
//! adds members to an already-registered type.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{BindError, Result};
use crate::ffi::bind::{destructor_thunk, NativeCtor, NativeFunction};
use crate::ffi::thunk::{ArgSpec, PassMode, Thunk};
use crate::module::Module;
use crate::types::{
    AccessModifier, ArgKind, DataType, Function, FunctionArg, FunctionRegistry, FunctionSignature,
    Property, PropertyFlags, TypeId, TypeKind, TypeMeta, TypeRegistry,
};

struct MethodSpec {
    name: String,
    args: Vec<ArgSpec>,
    ret_key: String,
    thunk: Thunk,
    is_static: bool,
    access: AccessModifier,
}

struct CtorSpec {
    args: Vec<ArgSpec>,
    thunk: Thunk,
}

struct PropSpec {
    name: String,
    key: String,
    getter: Thunk,
    setter: Option<Thunk>,
    is_static: bool,
    access: AccessModifier,
}

/// Shared member-accumulation state of the binders.
struct BinderCore {
    name: String,
    fully_qualified_name: String,
    access: AccessModifier,
    ctors: Vec<CtorSpec>,
    dtor: Option<Thunk>,
    methods: Vec<MethodSpec>,
    props: Vec<PropSpec>,
}

impl BinderCore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fully_qualified_name: name.to_string(),
            access: AccessModifier::Public,
            ctors: Vec::new(),
            dtor: None,
            methods: Vec::new(),
            props: Vec::new(),
        }
    }

    fn prop_exists(&self, name: &str) -> bool {
        self.props.iter().any(|p| p.name == name)
    }

    /// Resolve an argument spec against the registry.
    fn resolve_arg(
        types: &TypeRegistry,
        func: &str,
        index: usize,
        spec: &ArgSpec,
    ) -> Result<FunctionArg> {
        let Some(tid) = types_host_id(types, &spec.key) else {
            return Err(BindError::ArgTypeUnbound {
                func: func.to_string(),
                index,
            }
            .into());
        };
        let is_primitive = types.get(tid).map(|t| t.meta.is_primitive).unwrap_or(false);
        if !is_primitive && spec.mode == PassMode::ByValue {
            return Err(BindError::ArgStructPassByValue {
                func: func.to_string(),
                index,
            }
            .into());
        }
        Ok(FunctionArg {
            kind: if is_primitive && spec.mode == PassMode::ByValue {
                ArgKind::Value
            } else {
                ArgKind::Pointer
            },
            type_id: tid,
        })
    }

    /// Build and register one bound function.
    #[allow(clippy::too_many_arguments)]
    fn register_function(
        types: &mut TypeRegistry,
        functions: &mut FunctionRegistry,
        owner: &str,
        name: &str,
        this_type: Option<TypeId>,
        args: &[ArgSpec],
        ret_key: &str,
        thunk: Thunk,
        is_static: bool,
        method_like: bool,
    ) -> Result<Arc<Function>> {
        let fqn = format!("{}::{}", owner, name);
        let Some(ret) = types_host_id(types, ret_key) else {
            let err = if method_like {
                BindError::MethodReturnTypeUnbound {
                    method: fqn.clone(),
                }
            } else {
                BindError::FunctionReturnTypeUnbound { func: fqn.clone() }
            };
            return Err(err.into());
        };

        let mut sig_args = vec![
            FunctionArg {
                kind: ArgKind::FuncPtr,
                type_id: ret,
            },
            FunctionArg {
                kind: ArgKind::RetPtr,
                type_id: ret,
            },
            FunctionArg {
                kind: ArgKind::ContextPtr,
                type_id: ret,
            },
        ];
        // The implicit slots carry the untyped pointer type when it is
        // registered; fall back to the return type id otherwise.
        if let Some(ptr) = types_host_id(types, "$ptr") {
            sig_args[0].type_id = ptr;
            sig_args[2].type_id = ptr;
        }
        if let Some(this_tp) = this_type {
            sig_args.push(FunctionArg {
                kind: ArgKind::ThisPtr,
                type_id: this_tp,
            });
        }
        for (i, spec) in args.iter().enumerate() {
            sig_args.push(Self::resolve_arg(types, &fqn, i, spec)?);
        }

        let sig = FunctionSignature {
            return_type: ret,
            this_type,
            returns_pointer: false,
            args: sig_args,
        };
        let sig_tp = types.intern_signature(sig);

        let mut func = Function::host(name, &fqn, sig_tp.id, thunk, this_type.is_some());
        func.flags.is_static_method = is_static;
        Ok(functions.add(func))
    }
}

fn types_host_id(types: &TypeRegistry, key: &str) -> Option<TypeId> {
    types
        .all()
        .find(|t| t.fully_qualified_name == key)
        .map(|t| t.id)
        .or_else(|| {
            // Host map lookup by the Rust type name recorded at bind time
            types.host_id_by_key(key)
        })
}

/// Binds a host type `T` as a script class.
pub struct ObjectTypeBinder<T> {
    core: BinderCore,
    errors: Vec<crate::error::Error>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> ObjectTypeBinder<T> {
    /// Start binding `T` under a script-facing name.
    pub fn new(name: &str) -> Self {
        Self {
            core: BinderCore::new(name),
            errors: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Set the type's access modifier.
    pub fn access(mut self, access: AccessModifier) -> Self {
        self.core.access = access;
        self
    }

    /// Add a constructor overload.
    pub fn ctor<M, F: NativeCtor<M>>(mut self, f: F) -> Self {
        let name = format!("{}::constructor", self.core.name);
        self.core.ctors.push(CtorSpec {
            args: F::arg_specs(),
            thunk: f.make_thunk(name),
        });
        self
    }

    /// Add an instance method (`Fn(&T, ...)` or `Fn(&mut T, ...)`).
    pub fn method<M, F: NativeFunction<M>>(mut self, name: &str, f: F) -> Self {
        if F::receiver_key().as_deref() != Some(std::any::type_name::<T>()) {
            self.errors.push(
                BindError::MethodClassUnbound {
                    method: format!("{}::{}", self.core.name, name),
                }
                .into(),
            );
            return self;
        }
        let fqn = format!("{}::{}", self.core.name, name);
        self.core.methods.push(MethodSpec {
            name: name.to_string(),
            args: F::arg_specs(),
            ret_key: F::ret_key(),
            thunk: f.make_thunk(true, fqn),
            is_static: false,
            access: AccessModifier::Public,
        });
        self
    }

    /// Add a static method (no receiver).
    pub fn static_method<M, F: NativeFunction<M>>(mut self, name: &str, f: F) -> Self {
        let fqn = format!("{}::{}", self.core.name, name);
        self.core.methods.push(MethodSpec {
            name: name.to_string(),
            args: F::arg_specs(),
            ret_key: F::ret_key(),
            thunk: f.make_thunk(false, fqn),
            is_static: true,
            access: AccessModifier::Public,
        });
        self
    }

    /// Add a read-write property through accessor functions.
    pub fn prop<P, G, S>(mut self, name: &str, getter: G, setter: S) -> Self
    where
        P: crate::ffi::thunk::ScriptArg + crate::ffi::thunk::ScriptReturn,
        G: Fn(&T) -> P + Send + Sync + 'static,
        S: Fn(&mut T, P) + Send + Sync + 'static,
    {
        if self.core.prop_exists(name) {
            self.errors.push(
                BindError::PropAlreadyBound {
                    type_name: self.core.name.clone(),
                    prop: name.to_string(),
                }
                .into(),
            );
            return self;
        }
        let g_fqn = format!("{}::get_{}", self.core.name, name);
        let s_fqn = format!("{}::set_{}", self.core.name, name);
        self.core.props.push(PropSpec {
            name: name.to_string(),
            key: P::key(),
            getter: NativeFunction::<(crate::ffi::bind::RefRecv, fn(T) -> P)>::make_thunk(
                getter, true, g_fqn,
            ),
            setter: Some(NativeFunction::<(crate::ffi::bind::MutRecv, fn(T, P) -> ())>::make_thunk(
                setter, true, s_fqn,
            )),
            is_static: false,
            access: AccessModifier::Public,
        });
        self
    }

    /// Add a read-only property.
    pub fn prop_readonly<P, G>(mut self, name: &str, getter: G) -> Self
    where
        P: crate::ffi::thunk::ScriptArg + crate::ffi::thunk::ScriptReturn,
        G: Fn(&T) -> P + Send + Sync + 'static,
    {
        if self.core.prop_exists(name) {
            self.errors.push(
                BindError::PropAlreadyBound {
                    type_name: self.core.name.clone(),
                    prop: name.to_string(),
                }
                .into(),
            );
            return self;
        }
        let g_fqn = format!("{}::get_{}", self.core.name, name);
        self.core.props.push(PropSpec {
            name: name.to_string(),
            key: P::key(),
            getter: NativeFunction::<(crate::ffi::bind::RefRecv, fn(T) -> P)>::make_thunk(
                getter, true, g_fqn,
            ),
            setter: None,
            is_static: false,
            access: AccessModifier::Public,
        });
        self
    }

    /// Produce the class type and register it, its members and the host
    /// mapping. Errors collected during accumulation abort the bind.
    pub fn finalize(
        self,
        types: &mut TypeRegistry,
        functions: &mut FunctionRegistry,
        module: Option<&mut Module>,
    ) -> Result<Arc<DataType>> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        let core = self.core;

        let needs_drop = std::mem::needs_drop::<T>();
        let meta = TypeMeta {
            size: 8,
            is_host: true,
            is_trivially_constructible: core.ctors.is_empty(),
            is_trivially_copyable: false,
            is_trivially_destructible: !needs_drop,
            ..TypeMeta::default()
        };

        let mut tp = DataType::plain(&core.name, &core.fully_qualified_name, meta);
        tp.kind = TypeKind::Class;
        tp.access = core.access;
        let tid = tp.id;
        let arc = types.add(tp)?;
        types.map_host::<T>(tid);

        let mut method_ids = Vec::new();
        for ctor in &core.ctors {
            let f = BinderCore::register_function(
                types,
                functions,
                &core.name,
                "constructor",
                None,
                &ctor.args,
                std::any::type_name::<T>(),
                Arc::clone(&ctor.thunk),
                false,
                true,
            )?;
            method_ids.push(f.id);
        }

        for m in &core.methods {
            let this = if m.is_static { None } else { Some(tid) };
            let f = BinderCore::register_function(
                types,
                functions,
                &core.name,
                &m.name,
                this,
                &m.args,
                &m.ret_key,
                Arc::clone(&m.thunk),
                m.is_static,
                true,
            )?;
            method_ids.push(f.id);
        }

        let mut props = Vec::new();
        for p in &core.props {
            let Some(ptp) = types_host_id(types, &p.key) else {
                return Err(BindError::PropTypeUnbound {
                    type_name: core.name.clone(),
                    prop: p.name.clone(),
                }
                .into());
            };
            let getter = BinderCore::register_function(
                types,
                functions,
                &core.name,
                &format!("get_{}", p.name),
                Some(tid),
                &[],
                &p.key,
                Arc::clone(&p.getter),
                false,
                true,
            )?;
            let setter = match &p.setter {
                Some(s) => Some(
                    BinderCore::register_function(
                        types,
                        functions,
                        &core.name,
                        &format!("set_{}", p.name),
                        Some(tid),
                        &[ArgSpec {
                            key: p.key.clone(),
                            mode: PassMode::ByValue,
                            is_callback: false,
                        }],
                        std::any::type_name::<()>(),
                        Arc::clone(s),
                        false,
                        true,
                    )?
                    .id,
                ),
                None => None,
            };
            props.push(Property {
                name: p.name.clone(),
                access: p.access,
                offset: 0,
                type_id: ptp,
                flags: PropertyFlags {
                    can_read: true,
                    can_write: setter.is_some(),
                    is_pointer: false,
                    is_static: p.is_static,
                },
                getter: Some(getter.id),
                setter,
            });
        }

        // Destructor: explicit thunk, or synthesized from Drop unless
        // the type is trivially destructible.
        let dtor_thunk = core.dtor.or_else(|| {
            if needs_drop {
                Some(destructor_thunk::<T>(format!("{}::destructor", core.name)))
            } else {
                None
            }
        });
        let dtor_id = match dtor_thunk {
            Some(thunk) => Some(
                BinderCore::register_function(
                    types,
                    functions,
                    &core.name,
                    "destructor",
                    Some(tid),
                    &[],
                    std::any::type_name::<()>(),
                    thunk,
                    false,
                    true,
                )?
                .id,
            ),
            None => None,
        };

        let mut updated = (*arc).clone();
        updated.methods = method_ids;
        updated.properties = props;
        updated.destructor = dtor_id;
        if let Some(module) = module {
            updated.owner = Some(module.id);
            module.types.push(tid);
        }
        let finished = types.replace(updated);
        types.sync_functions(functions.snapshot());
        Ok(finished)
    }
}

/// Binds a host type as a script primitive: no constructor or
/// destructor semantics, values pass by bits.
pub struct PrimitiveTypeBinder<T> {
    core: BinderCore,
    errors: Vec<crate::error::Error>,
    size: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> PrimitiveTypeBinder<T> {
    /// Start binding `T` as a primitive.
    pub fn new(name: &str) -> Self {
        Self {
            core: BinderCore::new(name),
            errors: Vec::new(),
            size: std::mem::size_of::<T>().clamp(1, 8) as u32,
            _marker: PhantomData,
        }
    }

    /// Add a method; the first parameter receives the value itself.
    pub fn method<M, F: NativeFunction<M>>(mut self, name: &str, f: F) -> Self {
        let fqn = format!("{}::{}", self.core.name, name);
        self.core.methods.push(MethodSpec {
            name: name.to_string(),
            args: F::arg_specs(),
            ret_key: F::ret_key(),
            thunk: f.make_thunk(true, fqn),
            is_static: false,
            access: AccessModifier::Public,
        });
        self
    }

    /// Add a static method.
    pub fn static_method<M, F: NativeFunction<M>>(mut self, name: &str, f: F) -> Self {
        let fqn = format!("{}::{}", self.core.name, name);
        self.core.methods.push(MethodSpec {
            name: name.to_string(),
            args: F::arg_specs(),
            ret_key: F::ret_key(),
            thunk: f.make_thunk(false, fqn),
            is_static: true,
            access: AccessModifier::Public,
        });
        self
    }

    /// Register the primitive type and its members.
    pub fn finalize(
        self,
        types: &mut TypeRegistry,
        functions: &mut FunctionRegistry,
        module: Option<&mut Module>,
    ) -> Result<Arc<DataType>> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        let core = self.core;
        let meta = TypeMeta {
            size: self.size,
            is_host: true,
            is_pod: true,
            is_trivially_constructible: true,
            is_trivially_copyable: true,
            is_trivially_destructible: true,
            is_primitive: true,
            ..TypeMeta::default()
        };
        let tp = DataType::plain(&core.name, &core.fully_qualified_name, meta);
        let tid = tp.id;
        let arc = types.add(tp)?;
        types.map_host::<T>(tid);

        let mut method_ids = Vec::new();
        for m in &core.methods {
            let this = if m.is_static { None } else { Some(tid) };
            let f = BinderCore::register_function(
                types,
                functions,
                &core.name,
                &m.name,
                this,
                &m.args,
                &m.ret_key,
                Arc::clone(&m.thunk),
                m.is_static,
                true,
            )?;
            method_ids.push(f.id);
        }

        let mut updated = (*arc).clone();
        updated.methods = method_ids;
        if let Some(module) = module {
            updated.owner = Some(module.id);
            module.types.push(tid);
        }
        let finished = types.replace(updated);
        types.sync_functions(functions.snapshot());
        Ok(finished)
    }
}

/// Adds methods and properties to an already-registered host type.
pub struct ObjectTypeExtender<T> {
    methods: Vec<MethodSpec>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> ObjectTypeExtender<T> {
    /// Start extending `T`.
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Add an instance method.
    pub fn method<M, F: NativeFunction<M>>(mut self, name: &str, f: F) -> Self {
        self.methods.push(MethodSpec {
            name: name.to_string(),
            args: F::arg_specs(),
            ret_key: F::ret_key(),
            thunk: f.make_thunk(true, name.to_string()),
            is_static: false,
            access: AccessModifier::Public,
        });
        self
    }

    /// Apply the accumulated members to the registered type.
    pub fn finalize(
        self,
        types: &mut TypeRegistry,
        functions: &mut FunctionRegistry,
    ) -> Result<Arc<DataType>> {
        let Some(existing) = types.get_host::<T>() else {
            return Err(BindError::MethodClassUnbound {
                method: std::any::type_name::<T>().to_string(),
            }
            .into());
        };
        let tid = existing.id;
        let mut updated = (*existing).clone();
        for m in &self.methods {
            let f = BinderCore::register_function(
                types,
                functions,
                &updated.name.clone(),
                &m.name,
                Some(tid),
                &m.args,
                &m.ret_key,
                Arc::clone(&m.thunk),
                false,
                true,
            )?;
            updated.methods.push(f.id);
        }
        let finished = types.replace(updated);
        types.sync_functions(functions.snapshot());
        Ok(finished)
    }
}

impl<T: Send + 'static> Default for ObjectTypeExtender<T> {
    fn default() -> Self {
        Self::new()
    }
}
