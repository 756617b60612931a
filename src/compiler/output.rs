//! Compilation output container
//!
//! Holds the module under construction, the function builders that feed
//! it, and the signature-interning logic: a lowered function searches
//! the output's own types first, then the global registry, for a
//! structurally equivalent signature before creating a new one.

use std::sync::Arc;

use crate::compiler::func_def::FunctionDef;
use crate::module::Module;
use crate::types::data_type::signature_equivalent;
use crate::types::{
    ArgKind, DataType, FunctionArg, FunctionId, FunctionSignature, TypeId, TypeKind, TypeRegistry,
};

/// Index of a function builder inside the output arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncRef(pub usize);

/// The module being produced plus all per-function IR.
pub struct OutputBuilder {
    /// Module under construction
    pub module: Module,
    funcs: Vec<FunctionDef>,
    /// Ids of types this module declared
    own_types: Vec<TypeId>,
    /// Resolved function ids, parallel to `funcs` once lowering finishes
    resolved: Vec<Option<FunctionId>>,
}

impl OutputBuilder {
    /// New output for a module.
    pub fn new(module: Module) -> Self {
        Self {
            module,
            funcs: Vec::new(),
            own_types: Vec::new(),
            resolved: Vec::new(),
        }
    }

    /// Add a function builder to the arena.
    pub fn add_func(&mut self, def: FunctionDef) -> FuncRef {
        self.funcs.push(def);
        self.resolved.push(None);
        FuncRef(self.funcs.len() - 1)
    }

    /// Builder by reference.
    pub fn func(&self, r: FuncRef) -> &FunctionDef {
        &self.funcs[r.0]
    }

    /// Mutable builder by reference.
    pub fn func_mut(&mut self, r: FuncRef) -> &mut FunctionDef {
        &mut self.funcs[r.0]
    }

    /// Number of function builders.
    pub fn func_count(&self) -> usize {
        self.funcs.len()
    }

    /// All builders with their resolved ids.
    pub fn funcs(&self) -> impl Iterator<Item = (&FunctionDef, Option<FunctionId>)> {
        self.funcs.iter().zip(self.resolved.iter().copied())
    }

    /// Record that a builder produced a registered function.
    pub fn resolve(&mut self, r: FuncRef, id: FunctionId) {
        self.resolved[r.0] = Some(id);
        self.funcs[r.0].output = Some(id);
        self.module.functions.push(id);
    }

    /// Resolved id of a builder, if lowering finished it.
    pub fn resolved_id(&self, r: FuncRef) -> Option<FunctionId> {
        self.resolved[r.0]
    }

    /// Record a type declared by this module.
    pub fn add_own_type(&mut self, id: TypeId) {
        self.own_types.push(id);
        self.module.types.push(id);
    }

    /// Build the full signature for a function builder, implicit
    /// arguments first in the fixed order, and intern it: the output's
    /// own types are searched first, then the global registry; only if
    /// neither holds a structural match is a new type created.
    pub fn intern_signature(
        &mut self,
        r: FuncRef,
        registry: &mut TypeRegistry,
    ) -> Arc<DataType> {
        let def = &self.funcs[r.0];
        let b = def.builtins();
        let mut args = vec![
            FunctionArg {
                kind: ArgKind::FuncPtr,
                type_id: b.ptr_t,
            },
            FunctionArg {
                kind: ArgKind::RetPtr,
                type_id: def.ret_type,
            },
            FunctionArg {
                kind: ArgKind::ContextPtr,
                type_id: b.ptr_t,
            },
        ];
        if let Some(this_tp) = def.this_type {
            args.push(FunctionArg {
                kind: ArgKind::ThisPtr,
                type_id: this_tp,
            });
        }
        args.extend(def.arg_info.iter().copied());

        let sig = FunctionSignature {
            return_type: def.ret_type,
            this_type: def.this_type,
            returns_pointer: false,
            args,
        };

        for own in &self.own_types {
            if let Some(tp) = registry.get(*own) {
                if let TypeKind::Function(existing) = &tp.kind {
                    if signature_equivalent(existing, &sig, registry) {
                        return tp;
                    }
                }
            }
        }

        if let Some(existing) = registry.find_equivalent_signature(&sig) {
            return existing;
        }

        let tp = registry.intern_signature(sig);
        self.own_types.push(tp.id);
        tp
    }
}
