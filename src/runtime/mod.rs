//! # Runtime
//!
//! The explicit runtime handle everything threads through: registries,
//! backend, host objects, heap and configuration. Construction is
//! `Runtime::new(config)`; teardown is drop. The compile pipeline and
//! the host-facing call API live here.

pub mod call;
pub mod execution;
pub mod host_objects;

pub use call::{CallArg, Object, ObjectData};
pub use execution::{CallTrace, ExecutionContext, TraceFrame};
pub use host_objects::{Heap, HostObjects};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::backend::vm::registers::VmReg;
use crate::backend::{FunctionLowering, HostDispatch, RegAllocStats, VmBackend};
use crate::builtins::Builtins;
use crate::compiler::logger::{LogCode, Logger, Severity};
use crate::compiler::Compiler;
use crate::config::Config;
use crate::error::{Error, Result, RuntimeError};
use crate::ffi::callback::{RawCallback, RAW_CALLBACK_SIZE};
use crate::ffi::thunk::ThunkCall;
use crate::ffi::type_binder::{ObjectTypeBinder, ObjectTypeExtender, PrimitiveTypeBinder};
use crate::ffi::NativeFunction;
use crate::lexer::Scanner;
use crate::module::Module;
use crate::optimizer::{optimize, CodeHolder};
use crate::parser::Parser;
use crate::runtime::execution::call_context;
use crate::types::{
    ArgKind, Function, FunctionArg, FunctionId, FunctionImpl, FunctionRegistry, FunctionSignature,
    ModuleId, TypeId, TypeRegistry,
};

/// Offsets of the bootstrap frame a host-initiated call writes at the
/// bottom of the stack region. The callee's frame starts past the
/// return slot, which is sized per call.
const BOOT_CCTX: u64 = 8;
const BOOT_RET: u64 = BOOT_CCTX + call_context::SIZE as u64;

/// The embeddable scripting runtime.
pub struct Runtime {
    config: Config,
    builtins: Builtins,
    types: RwLock<TypeRegistry>,
    functions: RwLock<FunctionRegistry>,
    modules: RwLock<HashMap<ModuleId, Arc<Module>>>,
    module_names: RwLock<HashMap<String, ModuleId>>,
    backend: Mutex<VmBackend>,
    objects: Mutex<HostObjects>,
    heap: Mutex<Heap>,
    /// Named host globals exposed to scripts through getter functions
    globals: Mutex<HashMap<String, u64>>,
}

impl Runtime {
    /// Create a runtime: registers the builtin types and the host
    /// allocator functions.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().map_err(Error::Workspace)?;

        let mut types = TypeRegistry::new();
        let builtins = Builtins::register(&mut types);
        let mut functions = FunctionRegistry::new();

        let backend = VmBackend::new(&config);
        let heap = Heap::new(config.stack_size as u64, config.memory_size as u64);

        let rt = Self {
            config,
            builtins,
            types: RwLock::new(types),
            functions: RwLock::new(functions),
            modules: RwLock::new(HashMap::new()),
            module_names: RwLock::new(HashMap::new()),
            backend: Mutex::new(backend),
            objects: Mutex::new(HostObjects::new()),
            heap: Mutex::new(heap),
            globals: Mutex::new(HashMap::new()),
        };
        rt.register_allocator_fns();
        Ok(rt)
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builtin type ids.
    pub fn builtins(&self) -> Builtins {
        self.builtins
    }

    /// The script heap allocator surface: `$newmem(size) -> ptr` and
    /// `$freemem(ptr)`. Aggregate `new` expressions lower to these.
    fn register_allocator_fns(&self) {
        let mut types = self.types.write();
        let mut functions = self.functions.write();
        let b = self.builtins;

        let make_sig = |types: &mut TypeRegistry, ret: TypeId, args: Vec<FunctionArg>| {
            let mut all = vec![
                FunctionArg {
                    kind: ArgKind::FuncPtr,
                    type_id: b.ptr_t,
                },
                FunctionArg {
                    kind: ArgKind::RetPtr,
                    type_id: ret,
                },
                FunctionArg {
                    kind: ArgKind::ContextPtr,
                    type_id: b.ptr_t,
                },
            ];
            all.extend(args);
            types
                .intern_signature(FunctionSignature {
                    return_type: ret,
                    this_type: None,
                    returns_pointer: false,
                    args: all,
                })
                .id
        };

        let newmem_sig = make_sig(
            &mut types,
            b.u64_t,
            vec![FunctionArg {
                kind: ArgKind::Value,
                type_id: b.u64_t,
            }],
        );
        let newmem = Function::host(
            "$newmem",
            "$newmem",
            newmem_sig,
            Arc::new(|call: &mut ThunkCall<'_>| {
                let size = call.arg_bits(0)?;
                let addr = call.heap.alloc(size)?;
                call.write_ret_bits(addr, 8)
            }),
            false,
        );
        functions.add(newmem);

        let freemem_sig = make_sig(
            &mut types,
            b.void_t,
            vec![FunctionArg {
                kind: ArgKind::Value,
                type_id: b.u64_t,
            }],
        );
        let freemem = Function::host(
            "$freemem",
            "$freemem",
            freemem_sig,
            Arc::new(|call: &mut ThunkCall<'_>| {
                let addr = call.arg_bits(0)?;
                call.heap.free(addr)
            }),
            false,
        );
        functions.add(freemem);
        types.sync_functions(functions.snapshot());
    }

    // ------------------------------------------------------------------
    // Host binding API
    // ------------------------------------------------------------------

    /// Bind a free native function under a script-facing name.
    pub fn bind_function<M, F: NativeFunction<M>>(
        &self,
        name: &str,
        f: F,
    ) -> Result<FunctionId> {
        let mut types = self.types.write();
        let mut functions = self.functions.write();
        let registered = crate::ffi::bind_free_function(&mut types, &mut functions, name, f)?;
        Ok(registered.id)
    }

    /// Start binding a host type as a script class.
    pub fn bind_type<T: Send + 'static>(&self, name: &str) -> ObjectTypeBinder<T> {
        ObjectTypeBinder::new(name)
    }

    /// Start binding a host type as a script primitive.
    pub fn bind_primitive<T: Send + 'static>(&self, name: &str) -> PrimitiveTypeBinder<T> {
        PrimitiveTypeBinder::new(name)
    }

    /// Start extending an already-bound type.
    pub fn extend_type<T: Send + 'static>(&self) -> ObjectTypeExtender<T> {
        ObjectTypeExtender::new()
    }

    /// Finish an object type binder against this runtime's registries.
    pub fn install_type<T: Send + 'static>(
        &self,
        binder: ObjectTypeBinder<T>,
    ) -> Result<Arc<crate::types::DataType>> {
        let mut types = self.types.write();
        let mut functions = self.functions.write();
        binder.finalize(&mut types, &mut functions, None)
    }

    /// Finish a primitive type binder.
    pub fn install_primitive<T: Send + 'static>(
        &self,
        binder: PrimitiveTypeBinder<T>,
    ) -> Result<Arc<crate::types::DataType>> {
        let mut types = self.types.write();
        let mut functions = self.functions.write();
        binder.finalize(&mut types, &mut functions, None)
    }

    /// Finish a type extender.
    pub fn install_extension<T: Send + 'static>(
        &self,
        ext: ObjectTypeExtender<T>,
    ) -> Result<Arc<crate::types::DataType>> {
        let mut types = self.types.write();
        let mut functions = self.functions.write();
        ext.finalize(&mut types, &mut functions)
    }

    /// Register an intrinsic: a function that expands to IR at its call
    /// sites instead of emitting a call. This is the mechanism generic
    /// containers are built on.
    pub fn bind_intrinsic(
        &self,
        name: &str,
        ret: TypeId,
        args: &[TypeId],
        gen: crate::compiler::intrinsics::IntrinsicFn,
    ) -> Result<FunctionId> {
        let mut types = self.types.write();
        let mut functions = self.functions.write();
        let b = self.builtins;

        let mut sig_args = vec![
            FunctionArg {
                kind: ArgKind::FuncPtr,
                type_id: b.ptr_t,
            },
            FunctionArg {
                kind: ArgKind::RetPtr,
                type_id: ret,
            },
            FunctionArg {
                kind: ArgKind::ContextPtr,
                type_id: b.ptr_t,
            },
        ];
        for tid in args {
            let is_primitive = types.get(*tid).map(|t| t.meta.is_primitive).unwrap_or(true);
            sig_args.push(FunctionArg {
                kind: if is_primitive {
                    ArgKind::Value
                } else {
                    ArgKind::Pointer
                },
                type_id: *tid,
            });
        }
        let sig = types.intern_signature(FunctionSignature {
            return_type: ret,
            this_type: None,
            returns_pointer: false,
            args: sig_args,
        });
        let func = Function::intrinsic(name, name, sig.id, gen, false);
        let registered = functions.add(func);
        types.sync_functions(functions.snapshot());
        Ok(registered.id)
    }

    /// Register an uninstantiated template type with its specializer
    /// callback. The context blob is opaque to the runtime.
    pub fn register_template(
        &self,
        name: &str,
        context: Arc<[u8]>,
        specializer: crate::compiler::intrinsics::Specializer,
    ) -> Result<TypeId> {
        let mut types = self.types.write();
        let tp = crate::types::DataType::template(
            name,
            name,
            crate::types::TemplateData {
                context,
                specializer,
            },
        );
        let arc = types.add(tp)?;
        Ok(arc.id)
    }

    /// Share mutable host state with scripts: the value moves into the
    /// object slab and a getter function named `name` returning it is
    /// bound.
    pub fn add_global<T: Send + 'static>(&self, name: &str, value: T) -> Result<u64> {
        let handle = self.objects.lock().insert(value);
        self.globals.lock().insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Handle of a registered global.
    pub fn global(&self, name: &str) -> Option<u64> {
        self.globals.lock().get(name).copied()
    }

    /// Create a host object and return its handle (for passing as a
    /// call argument).
    pub fn new_host_object<T: Send + 'static>(&self, value: T) -> u64 {
        self.objects.lock().insert(value)
    }

    /// Inspect a host object.
    pub fn with_host_object<T: 'static, R>(
        &self,
        handle: u64,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R> {
        let objects = self.objects.lock();
        let obj = objects.get::<T>(handle)?;
        Ok(f(obj))
    }

    /// Run a closure with read access to the type registry.
    pub fn with_types<R>(&self, f: impl FnOnce(&TypeRegistry) -> R) -> R {
        f(&self.types.read())
    }

    /// Run a closure with read access to the function registry.
    pub fn with_functions<R>(&self, f: impl FnOnce(&FunctionRegistry) -> R) -> R {
        f(&self.functions.read())
    }

    /// Number of live host objects (diagnostics).
    pub fn live_host_objects(&self) -> usize {
        self.objects.lock().live_count()
    }

    /// Number of live heap blocks (diagnostics).
    pub fn live_heap_blocks(&self) -> usize {
        self.heap.lock().live_blocks()
    }

    /// Allocation statistics recorded when a function was installed.
    pub fn alloc_stats(&self, fid: FunctionId) -> Option<RegAllocStats> {
        self.backend.lock().alloc_stats.get(&fid.0).copied()
    }

    /// Look up a registered module by name.
    pub fn module(&self, name: &str) -> Option<Arc<Module>> {
        let id = *self.module_names.read().get(name)?;
        self.modules.read().get(&id).cloned()
    }

    /// Find a function of a module by name.
    pub fn find_function(&self, module: &Module, name: &str) -> Option<FunctionId> {
        let functions = self.functions.read();
        module
            .functions
            .iter()
            .copied()
            .find(|fid| functions.get(*fid).map(|f| f.name == name).unwrap_or(false))
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    /// Compile source text into a module: parse, lower, optimize,
    /// allocate registers, encode and install. Refuses to emit when the
    /// log holds any error; the log is returned either way.
    pub fn compile(&self, path: &str, source: &str) -> Result<(Arc<Module>, Logger)> {
        let name = std::path::Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path)
            .to_string();
        tracing::debug!(path, "compiling module");

        let tokens = Scanner::new(source).scan_tokens();
        let mut parser = Parser::new(tokens);
        let ast = parser.parse();

        let mut types = self.types.write();
        let mut functions = self.functions.write();
        let modules_snapshot = self.modules.read().clone();
        let names_snapshot = self.module_names.read().clone();

        let module = Module::new(&name, path);
        let mut comp = Compiler::new(
            &mut types,
            &mut functions,
            &modules_snapshot,
            &names_snapshot,
            self.builtins,
            module,
        );
        for err in &parser.errors {
            comp.logger
                .submit(Severity::Error, LogCode::ParseError, err.span, err.message.clone());
        }
        comp.compile(&ast);

        let (logger, output) = comp.finish();
        if logger.has_errors() {
            let first = logger
                .errors()
                .next()
                .map(|m| m.message.clone())
                .unwrap_or_default();
            return Err(Error::Compile {
                error_count: logger.error_count(),
                first,
            });
        }

        // Install: data section first so module_data lowering can
        // resolve absolute addresses.
        let mut backend = self.backend.lock();
        backend.reserve_data(output.module.id, output.module.data_size());
        self.heap.lock().set_floor(backend.data_top());

        let data_bases = backend.data_bases.clone();
        for (def, fid) in output.funcs() {
            let Some(fid) = fid else { continue };
            let mut ch = CodeHolder::new(def.code.clone(), fid);
            if self.config.optimize {
                optimize(&mut ch);
            }
            let lowering = FunctionLowering::new(&types, &data_bases, def.arg_info.clone());
            let lowered = lowering.run(
                &mut ch,
                self.config.num_gp_registers,
                self.config.num_fp_registers,
            );
            let entry = backend.install_function(fid.0, lowered);
            functions.install_entry(fid, entry);
        }
        types.sync_functions(functions.snapshot());
        drop(backend);

        let module = Arc::new(output.module);
        self.modules.write().insert(module.id, Arc::clone(&module));
        self.module_names
            .write()
            .insert(module.name.clone(), module.id);

        drop(types);
        drop(functions);
        Ok((module, logger))
    }

    /// Run a module's generated init function. Idempotent; never races.
    pub fn init_module(&self, module: &Module) -> Result<()> {
        if !module.begin_init() {
            return Ok(());
        }
        if let Some(init) = module.init_function {
            self.call_function(init, None, &[])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Script-facing call API
    // ------------------------------------------------------------------

    /// Call a function by id with no receiver.
    pub fn call(&self, fid: FunctionId, args: &[CallArg]) -> Result<Object> {
        self.call_function(fid, None, args)
    }

    /// Call a method with a receiver.
    pub fn call_method(&self, fid: FunctionId, this: CallArg, args: &[CallArg]) -> Result<Object> {
        self.call_function(fid, Some(this), args)
    }

    /// Full call path: validate the signature against the provided
    /// argument types, construct an execution context, place arguments
    /// into the register file, run the backend, read the result back
    /// and surface trace errors as runtime exceptions.
    pub fn call_function(
        &self,
        fid: FunctionId,
        this: Option<CallArg>,
        args: &[CallArg],
    ) -> Result<Object> {
        let (func, sig, ret_meta) = {
            let functions = self.functions.read();
            let types = self.types.read();
            let func = functions
                .get(fid)
                .ok_or(RuntimeError::UnknownFunction { id: fid.0 })?;
            let sig_tp = types
                .get(func.signature)
                .ok_or(RuntimeError::UnknownFunction { id: fid.0 })?;
            let sig = sig_tp
                .signature()
                .ok_or(RuntimeError::UnknownFunction { id: fid.0 })?
                .clone();
            let ret_meta = types.get(sig.return_type).map(|t| t.meta);
            (func, sig, ret_meta)
        };

        // Signature validation
        let explicit: Vec<FunctionArg> = sig.explicit_args().copied().collect();
        if explicit.len() != args.len() {
            return Err(Error::CallSignatureMismatch {
                func: func.name.clone(),
                reason: format!("expected {} argument(s), got {}", explicit.len(), args.len()),
            });
        }
        if sig.this_type.is_some() != this.is_some() {
            return Err(Error::CallSignatureMismatch {
                func: func.name.clone(),
                reason: if this.is_some() {
                    "receiver provided for a non-method".into()
                } else {
                    "method called without a receiver".into()
                },
            });
        }
        for (i, (want, got)) in explicit.iter().zip(args.iter()).enumerate() {
            if matches!(got, CallArg::Callback(_) | CallArg::WrappedCallback(_)) {
                continue;
            }
            let got_tp = got.type_id(&self.builtins);
            if got_tp != Some(want.type_id) {
                return Err(Error::CallSignatureMismatch {
                    func: func.name.clone(),
                    reason: format!("argument {i} has the wrong type"),
                });
            }
        }

        // Ensure the owning module is initialized first
        if let Some(mid) = func.module {
            let module = self.modules.read().get(&mid).cloned();
            if let Some(module) = module {
                if !module.is_initialized() && module.init_function != Some(fid) {
                    self.init_module(&module)?;
                }
            }
        }

        let mut ectx = ExecutionContext::new();
        let mut backend = self.backend.lock();
        let mut objects = self.objects.lock();
        let mut heap = self.heap.lock();
        let types = self.types.read();
        let functions = self.functions.read();

        // Wrap bare callbacks; the wrappers belong to this call frame.
        let mut wrapped: Vec<u64> = Vec::new();
        let mut arg_bits: Vec<(u64, bool)> = Vec::new();
        for a in args {
            match a {
                CallArg::Callback(target) => {
                    let addr = heap.alloc(RAW_CALLBACK_SIZE as u64)?;
                    RawCallback {
                        target_function: *target,
                        captures: 0,
                    }
                    .write(&mut backend.interp.state, addr)?;
                    wrapped.push(addr);
                    arg_bits.push((addr, false));
                }
                other => arg_bits.push((other.bits(), other.is_float())),
            }
        }

        let ret_size = ret_meta.map(|m| m.size.max(1)).unwrap_or(8);
        let is_void = sig.return_type == self.builtins.void_t;
        let this_bits = this.map(|t| t.bits()).unwrap_or(0);

        let result = (|| -> Result<Object> {
            let state = &mut backend.interp.state;
            // Bootstrap frame at the bottom of the stack
            let ret_off = if is_void { 0 } else { BOOT_RET };
            state.store(BOOT_CCTX + call_context::FUNC_PTR as u64, 8, fid.0 as u64)?;
            state.store(BOOT_CCTX + call_context::RET_PTR as u64, 8, ret_off)?;
            state.store(BOOT_CCTX + call_context::CAPTURE_PTR as u64, 8, 0)?;
            state.store(BOOT_CCTX + call_context::ECTX as u64, 8, 0)?;
            state.store(BOOT_CCTX + call_context::THIS_PTR as u64, 8, this_bits)?;
            // Zero the return slot
            for i in 0..ret_size.div_ceil(8) {
                state.store(BOOT_RET + (i as u64) * 8, 8, 0)?;
            }

            state.set(VmReg::A0, BOOT_CCTX);
            let mut next_int = 1usize;
            let mut next_fp = 0usize;
            for (bits, is_float) in &arg_bits {
                if *is_float {
                    let r = VmReg::float_arg(next_fp).unwrap_or(VmReg::Fa15);
                    next_fp += 1;
                    state.set(r, *bits);
                } else {
                    let r = VmReg::int_arg(next_int).unwrap_or(VmReg::A15);
                    next_int += 1;
                    state.set(r, *bits);
                }
            }
            let boot_sp = (BOOT_RET + ret_size as u64).div_ceil(8) * 8 + 8;
            state.set(VmReg::Sp, boot_sp);

            match &func.body {
                FunctionImpl::Host(thunk) => {
                    let arg_words: Vec<u64> = arg_bits.iter().map(|(b, _)| *b).collect();
                    let mut call = ThunkCall::new(
                        state,
                        &mut objects,
                        &mut heap,
                        &mut ectx,
                        &func.name,
                        arg_words,
                        this_bits,
                        ret_off,
                    );
                    let thunk = Arc::clone(thunk);
                    thunk(&mut call)?;
                }
                FunctionImpl::Script { .. } => {
                    let entry = backend
                        .entry_of(fid.0)
                        .ok_or(RuntimeError::UnknownFunction { id: fid.0 })?;
                    // Split the backend so the interpreter and the
                    // dispatch tables can be borrowed independently.
                    let VmBackend {
                        interp,
                        code,
                        entries,
                        ..
                    } = &mut *backend;
                    let mut dispatch = HostDispatch {
                        types: &types,
                        functions: &functions,
                        objects: &mut objects,
                        heap: &mut heap,
                        entries,
                    };
                    interp.execute(code, entry, &mut dispatch, &mut ectx)?;
                }
                FunctionImpl::Intrinsic(_) => {
                    return Err(Error::CallSignatureMismatch {
                        func: func.name.clone(),
                        reason: "intrinsics cannot be called directly".into(),
                    });
                }
            }

            // Read back the result
            let state = &mut backend.interp.state;
            if is_void {
                return Ok(Object::void(sig.return_type));
            }
            let meta = ret_meta.unwrap_or_default();
            let data = if meta.is_primitive {
                ObjectData::Bits(state.load(BOOT_RET, meta.size.clamp(1, 8))?)
            } else if meta.is_host {
                ObjectData::Handle(state.load(BOOT_RET, 8)?)
            } else {
                ObjectData::Bytes(state.slice(BOOT_RET, ret_size)?.to_vec())
            };
            Ok(Object {
                type_id: sig.return_type,
                data,
            })
        })();

        // The outermost frame that created callback wrappers destroys
        // them, success or failure.
        for addr in wrapped {
            let _ = heap.free(addr);
        }

        if ectx.trace.has_error {
            return Err(RuntimeError::Trace(ectx.trace.error.clone()).into());
        }
        result
    }
}
