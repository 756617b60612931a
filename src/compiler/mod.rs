//! # Compiler
//!
//! AST-to-IR lowering. Recursive descent over the AST with a context
//! holding the current module output, the current function builder, the
//! scope stack, a deferred queue for class methods (compiled after the
//! enclosing class is fully declared) and the diagnostic logger.
//!
//! Lowering never aborts on a script error: it logs the message,
//! substitutes the poison value and keeps going, and the pipeline
//! refuses to emit a module if any error was logged.

pub mod func_def;
pub mod intrinsics;
pub mod ir;
pub mod logger;
pub mod output;
pub mod scope;

mod expr;
mod stmt;

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtins::Builtins;
use crate::compiler::func_def::FunctionDef;
use crate::compiler::ir::Value;
use crate::compiler::logger::{LogCode, Logger};
use crate::compiler::output::{FuncRef, OutputBuilder};
use crate::compiler::scope::{ScopeStack, Symbol};
use crate::lexer::SourceSpan;
use crate::module::Module;
use crate::parser::ast::{Ast, ClassDecl, FunctionDecl, MethodDecl, MethodKind, StmtKind, TypeRef};
use crate::types::{
    AccessModifier, DataType, Function, FunctionId, FunctionRegistry, ModuleId, Property,
    PropertyFlags, TypeId, TypeKind, TypeMeta, TypeRegistry,
};

/// A class method whose body compilation was deferred until the class
/// declaration finished.
struct DeferredMethod {
    class_type: TypeId,
    method: MethodDecl,
    func_ref: FuncRef,
}

/// AST-to-IR lowering context for one module.
pub struct Compiler<'a> {
    /// Global type registry (write access for the compile duration)
    pub types: &'a mut TypeRegistry,
    /// Global function registry
    pub functions: &'a mut FunctionRegistry,
    /// Modules already registered with the runtime, for imports
    pub modules: &'a HashMap<ModuleId, Arc<Module>>,
    /// Module name -> id map for import resolution
    pub module_names: &'a HashMap<String, ModuleId>,
    /// Builtin type ids
    pub builtins: Builtins,
    /// Diagnostic log
    pub logger: Logger,
    /// Module output under construction
    pub output: OutputBuilder,

    cur_stack: Vec<(FuncRef, ScopeStack)>,
    deferred: Vec<DeferredMethod>,
    /// Name -> overloads for host functions and module functions
    global_fns: HashMap<String, Vec<FunctionId>>,
    /// Module-level symbols (types, enums, imports), visible from every
    /// function body in the module
    module_syms: HashMap<String, Symbol>,
    /// Ref of the module init function
    init_ref: Option<FuncRef>,
}

impl<'a> Compiler<'a> {
    /// New compiler for a module.
    pub fn new(
        types: &'a mut TypeRegistry,
        functions: &'a mut FunctionRegistry,
        modules: &'a HashMap<ModuleId, Arc<Module>>,
        module_names: &'a HashMap<String, ModuleId>,
        builtins: Builtins,
        module: Module,
    ) -> Self {
        let mut global_fns: HashMap<String, Vec<FunctionId>> = HashMap::new();
        for f in functions.all() {
            if f.module.is_none() && !f.is_method {
                global_fns.entry(f.name.clone()).or_default().push(f.id);
            }
        }
        Self {
            types,
            functions,
            modules,
            module_names,
            builtins,
            logger: Logger::new(),
            output: OutputBuilder::new(module),
            cur_stack: Vec::new(),
            deferred: Vec::new(),
            global_fns,
            module_syms: HashMap::new(),
            init_ref: None,
        }
    }

    /// Lower a parsed compilation unit into the output module.
    ///
    /// Declarations are hoisted first so bodies can reference functions
    /// and classes defined later in the file; module-level statements
    /// lower into the generated init function in source order; class
    /// method bodies compile last, after every class is fully declared.
    pub fn compile(&mut self, ast: &Ast) {
        let module_id = self.output.module.id;
        let mut init = FunctionDef::new(
            "__init__",
            module_id,
            None,
            self.builtins,
            SourceSpan::default(),
        );
        init.on_enter();
        let init_ref = self.output.add_func(init);
        self.init_ref = Some(init_ref);

        // Declaration pass: classes first (so function signatures can
        // reference them), then function signatures.
        self.cur_stack.push((init_ref, ScopeStack::new()));
        for stmt in &ast.stmts {
            match &stmt.kind {
                StmtKind::Class(c) => self.declare_class(c),
                StmtKind::Format {
                    name,
                    fields,
                    exported: _,
                } => self.declare_format(name, fields, stmt.span),
                StmtKind::Enum {
                    name,
                    variants,
                    exported: _,
                } => self.declare_enum(name, variants, stmt.span),
                StmtKind::Import { module, alias } => self.declare_import(module, alias, stmt.span),
                _ => {}
            }
        }
        for stmt in &ast.stmts {
            if let StmtKind::Function(f) = &stmt.kind {
                self.declare_function(f);
            }
        }

        // Body pass: module-level statements into init, function bodies
        // into their builders.
        for stmt in &ast.stmts {
            match &stmt.kind {
                StmtKind::Class(_)
                | StmtKind::Format { .. }
                | StmtKind::Enum { .. }
                | StmtKind::Import { .. } => {}
                StmtKind::Function(f) => self.compile_function_body(f),
                _ => self.lower_stmt(stmt),
            }
        }

        // Finish init
        let (r, sc) = self.cur_stack.pop().expect("init frame present");
        let objs = sc.all_stack_objects();
        self.cur_stack.push((r, sc));
        self.emit_scope_exit(&objs, true);
        self.cur_stack.pop();
        self.output.func_mut(init_ref).emit_final_ret();
        let init_id = self.register_output(init_ref);
        self.output.module.init_function = Some(init_id);

        // Drain deferred class methods
        let deferred = std::mem::take(&mut self.deferred);
        for d in deferred {
            self.compile_method_body(&d);
        }
    }

    // ------------------------------------------------------------------
    // Current-function plumbing
    // ------------------------------------------------------------------

    /// Ref of the function currently being lowered.
    pub fn cur_ref(&self) -> FuncRef {
        self.cur_stack.last().expect("no current function").0
    }

    /// Builder of the function currently being lowered.
    pub fn cur(&mut self) -> &mut FunctionDef {
        let r = self.cur_ref();
        self.output.func_mut(r)
    }

    /// Scope stack of the current function.
    pub fn scopes(&mut self) -> &mut ScopeStack {
        &mut self.cur_stack.last_mut().expect("no current function").1
    }

    /// Resolve a name: function scopes first, then module-level symbols.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.cur_stack
            .last()
            .and_then(|(_, s)| s.get(name))
            .cloned()
            .or_else(|| self.module_syms.get(name).cloned())
    }

    /// Overload set of a free function name (module first, then host).
    pub fn lookup_functions(&self, name: &str) -> Vec<FunctionId> {
        self.global_fns.get(name).cloned().unwrap_or_default()
    }

    /// Fetch a type by id.
    pub fn type_of(&self, id: TypeId) -> Option<Arc<DataType>> {
        self.types.get(id)
    }

    /// Log an error and return the poison value.
    pub fn error_value(&mut self, code: LogCode, span: SourceSpan, msg: impl Into<String>) -> Value {
        self.logger.error(code, span, msg);
        self.cur().poison()
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn declare_import(&mut self, module: &str, alias: &Option<String>, span: SourceSpan) {
        let Some(id) = self.module_names.get(module).copied() else {
            self.logger.error(
                LogCode::UnknownModule,
                span,
                format!("Unknown module '{}'", module),
            );
            return;
        };
        self.output.module.imports.push(id);
        let name = alias.as_deref().unwrap_or(module);
        self.module_syms.insert(name.to_string(), Symbol::Module(id));
    }

    fn declare_enum(&mut self, name: &str, variants: &[(String, Option<i64>)], span: SourceSpan) {
        let module = &self.output.module;
        let fqn = format!("{}::{}", module.name, name);
        let mut meta = TypeMeta {
            size: 4,
            is_pod: true,
            is_trivially_constructible: true,
            is_trivially_copyable: true,
            is_trivially_destructible: true,
            is_primitive: true,
            is_integral: true,
            ..TypeMeta::default()
        };
        meta.is_host = false;
        let mut tp = DataType::plain(name, &fqn, meta);
        tp.owner = Some(module.id);

        let mut next = 0i64;
        let mut map = HashMap::new();
        for (vname, explicit) in variants {
            let value = explicit.unwrap_or(next);
            next = value + 1;
            map.insert(vname.clone(), value);
            // Variants live in the property table as static constants so
            // other modules can resolve `Enum.value` through the type.
            tp.properties.push(Property {
                name: vname.clone(),
                access: AccessModifier::Public,
                offset: value as u64,
                type_id: self.builtins.i32_t,
                flags: PropertyFlags {
                    can_read: true,
                    can_write: false,
                    is_pointer: false,
                    is_static: true,
                },
                getter: None,
                setter: None,
            });
        }

        match self.types.add(tp) {
            Ok(arc) => {
                self.output.add_own_type(arc.id);
                self.module_syms.insert(
                    name.to_string(),
                    Symbol::Enum {
                        type_id: arc.id,
                        variants: map,
                    },
                );
            }
            Err(e) => self
                .logger
                .error(LogCode::DuplicateSymbol, span, e.to_string()),
        }
    }

    fn declare_format(&mut self, name: &str, fields: &[(String, TypeRef)], span: SourceSpan) {
        let fqn = format!("{}::{}", self.output.module.name, name);
        let mut props = Vec::new();
        let mut offset = 0u64;
        for (fname, fty) in fields {
            let Some(ftp) = self.resolve_type_ref(fty) else {
                self.logger.error(
                    LogCode::UnknownType,
                    fty.span,
                    format!("Unknown type '{}'", fty.name),
                );
                continue;
            };
            let size = self.type_of(ftp).map(|t| t.meta.size).unwrap_or(8) as u64;
            let align = size.min(8).max(1);
            offset = offset.div_ceil(align) * align;
            props.push(Property {
                name: fname.clone(),
                access: AccessModifier::Public,
                offset,
                type_id: ftp,
                flags: PropertyFlags::rw(),
                getter: None,
                setter: None,
            });
            offset += size;
        }
        let size = offset.div_ceil(8).max(1) * 8;

        let meta = TypeMeta {
            size: size as u32,
            is_pod: true,
            is_trivially_constructible: true,
            is_trivially_copyable: true,
            is_trivially_destructible: true,
            ..TypeMeta::default()
        };
        let mut tp = DataType::plain(name, &fqn, meta);
        tp.owner = Some(self.output.module.id);
        tp.properties = props;

        match self.types.add(tp) {
            Ok(arc) => {
                self.output.add_own_type(arc.id);
                self.module_syms.insert(name.to_string(), Symbol::Type(arc.id));
            }
            Err(e) => self
                .logger
                .error(LogCode::DuplicateSymbol, span, e.to_string()),
        }
    }

    /// Declare a class: compute the property layout, register the type,
    /// declare method signatures, and defer method bodies.
    fn declare_class(&mut self, c: &ClassDecl) {
        let fqn = format!("{}::{}", self.output.module.name, c.name);
        let module_id = self.output.module.id;

        let mut bases = Vec::new();
        let mut offset = 0u64;
        for bref in &c.bases {
            let Some(btp_id) = self.resolve_type_ref(bref) else {
                self.logger.error(
                    LogCode::UnknownType,
                    bref.span,
                    format!("Unknown base type '{}'", bref.name),
                );
                continue;
            };
            let bsize = self.type_of(btp_id).map(|t| t.meta.size).unwrap_or(0) as u64;
            bases.push(crate::types::BaseSpec {
                type_id: btp_id,
                offset,
                access: AccessModifier::Public,
            });
            offset += bsize.div_ceil(8) * 8;
        }

        let mut props = Vec::new();
        for p in &c.props {
            let Some(ptp) = self.resolve_type_ref(&p.ty) else {
                self.logger.error(
                    LogCode::UnknownType,
                    p.ty.span,
                    format!("Unknown type '{}'", p.ty.name),
                );
                continue;
            };
            let size = self.type_of(ptp).map(|t| t.meta.size).unwrap_or(8) as u64;
            let align = size.min(8).max(1);
            offset = offset.div_ceil(align) * align;
            props.push(Property {
                name: p.name.clone(),
                access: AccessModifier::Public,
                offset: if p.is_static { 0 } else { offset },
                type_id: ptp,
                flags: PropertyFlags {
                    can_read: true,
                    can_write: true,
                    is_pointer: false,
                    is_static: p.is_static,
                },
                getter: None,
                setter: None,
            });
            if !p.is_static {
                offset += size;
            }
        }
        let size = offset.div_ceil(8).max(1) * 8;

        let has_dtor = c.methods.iter().any(|m| m.kind == MethodKind::Destructor);
        let has_ctor = c.methods.iter().any(|m| m.kind == MethodKind::Constructor);
        let meta = TypeMeta {
            size: size as u32,
            is_trivially_constructible: !has_ctor,
            is_trivially_copyable: !has_dtor,
            is_trivially_destructible: !has_dtor,
            is_pod: !has_ctor && !has_dtor,
            ..TypeMeta::default()
        };

        let mut tp = DataType::plain(&c.name, &fqn, meta);
        tp.kind = TypeKind::Class;
        tp.owner = Some(module_id);
        tp.properties = props;
        tp.bases = bases;

        let class_id = tp.id;
        let arc = match self.types.add(tp) {
            Ok(arc) => arc,
            Err(e) => {
                self.logger
                    .error(LogCode::DuplicateSymbol, c.span, e.to_string());
                return;
            }
        };
        self.output.add_own_type(arc.id);
        self.module_syms
            .insert(c.name.clone(), Symbol::Type(class_id));

        // Static properties get storage in the module data section,
        // addressable as `ClassName::prop`.
        for p in &c.props {
            if p.is_static {
                if let Some(ptp) = self.resolve_type_ref(&p.ty) {
                    let size = self.type_of(ptp).map(|t| t.meta.size.max(1)).unwrap_or(8);
                    let slot_name = format!("{}::{}", c.name, p.name);
                    self.output
                        .module
                        .define_local(&slot_name, ptp, size, p.span);
                }
            }
        }

        // Declare method signatures now; enqueue bodies for after the
        // class (and every other top-level class) is fully declared.
        let mut method_ids = Vec::new();
        let mut dtor_id = None;
        for m in &c.methods {
            let this_type = if m.is_static { None } else { Some(class_id) };
            let fr = self.declare_function_with(&m.decl, this_type, Some(&c.name));
            let Some(fid) = self.output.resolved_id(fr) else {
                continue;
            };
            if m.kind == MethodKind::Destructor {
                dtor_id = Some(fid);
            } else {
                method_ids.push(fid);
            }
            self.deferred.push(DeferredMethod {
                class_type: class_id,
                method: m.clone(),
                func_ref: fr,
            });
        }

        // Re-register the type with its method table filled in.
        let mut updated = (*arc).clone();
        updated.methods = method_ids;
        updated.destructor = dtor_id;
        self.types.replace(updated);
        self.sync_function_mirror();
    }

    fn declare_function(&mut self, f: &FunctionDecl) -> FuncRef {
        self.declare_function_with(f, None, None)
    }

    /// Create the builder, intern the signature and register the
    /// function so call sites can reference it before the body exists.
    fn declare_function_with(
        &mut self,
        f: &FunctionDecl,
        this_type: Option<TypeId>,
        class_name: Option<&str>,
    ) -> FuncRef {
        let module_id = self.output.module.id;
        let mut def = FunctionDef::new(&f.name, module_id, this_type, self.builtins, f.span);

        if let Some(ret) = &f.ret {
            match self.resolve_type_ref(ret) {
                Some(tp) => def.set_ret_type(tp),
                None => self.logger.error(
                    LogCode::UnknownType,
                    ret.span,
                    format!("Unknown return type '{}'", ret.name),
                ),
            }
        }

        for p in &f.params {
            let Some(ptp) = self.resolve_type_ref(&p.ty) else {
                self.logger.error(
                    LogCode::UnknownType,
                    p.ty.span,
                    format!("Unknown type '{}'", p.ty.name),
                );
                continue;
            };
            let (is_primitive, is_function) = self
                .type_of(ptp)
                .map(|t| (t.meta.is_primitive, t.meta.is_function))
                .unwrap_or((true, false));
            def.add_arg(&p.name, ptp, is_primitive, is_function);
        }

        let fr = self.output.add_func(def);
        let sig = self.output.intern_signature(fr, self.types);

        let fqn = match class_name {
            Some(cls) => format!("{}::{}::{}", self.output.module.name, cls, f.name),
            None => format!("{}::{}", self.output.module.name, f.name),
        };
        let func = Function::script(&f.name, &fqn, sig.id, module_id, this_type.is_some());
        let registered = self.functions.add(func);
        self.output.resolve(fr, registered.id);
        self.sync_function_mirror();

        if this_type.is_none() {
            self.global_fns
                .entry(f.name.clone())
                .or_default()
                .push(registered.id);
        }
        fr
    }

    fn compile_function_body(&mut self, f: &FunctionDecl) {
        // The builder was created by the declaration pass; find it by
        // name among unfinished top-level functions.
        let Some(fr) = self.find_declared(&f.name, None) else {
            self.logger.error(
                LogCode::Internal,
                f.span,
                format!("Missing declaration for function '{}'", f.name),
            );
            return;
        };
        self.compile_body_into(fr, &f.body, None);
    }

    fn compile_method_body(&mut self, d: &DeferredMethod) {
        self.compile_body_into(d.func_ref, &d.method.decl.body, Some(d.class_type));
    }

    /// Lower a function body into its builder: bind arguments, emit the
    /// implicit prologue, lower the statements and guarantee a return.
    fn compile_body_into(&mut self, fr: FuncRef, body: &[crate::parser::ast::Stmt], _this: Option<TypeId>) {
        let mut scopes = ScopeStack::new();
        {
            let def = self.output.func_mut(fr);
            def.on_enter();
            // Copy arguments out of the argument registers so their
            // values survive nested calls.
            for i in 0..def.arg_count() {
                let v = def.arg(i).cloned().expect("argument exists");
                let name = def.arg_names[i].clone();
                let mut local = def.named_val(&name, v.type_id);
                local.is_pointer = v.is_pointer;
                local.is_function = v.is_function;
                def.add(crate::compiler::ir::Opcode::Assign)
                    .op(local.clone())
                    .op(v);
                scopes.add(&name, Symbol::Value(local));
            }
            if let Some(t) = def.this() {
                scopes.add("this", Symbol::Value(t));
            }
        }
        self.cur_stack.push((fr, scopes));

        for stmt in body {
            self.lower_stmt(stmt);
        }

        // Scope teardown for the fallthrough path; a trailing return
        // already destroyed everything.
        if !self.output.func(fr).ends_with_ret() {
            let objs = self.scopes().all_stack_objects();
            self.emit_scope_exit(&objs, true);
        }

        self.cur_stack.pop();

        let (ret_type, ret_set, ends_with_ret, name) = {
            let def = self.output.func(fr);
            (
                def.ret_type,
                def.ret_type_set,
                def.ends_with_ret(),
                def.name.clone(),
            )
        };
        if !ends_with_ret {
            let is_void = !ret_set || ret_type == self.builtins.void_t;
            if is_void {
                self.output.func_mut(fr).emit_final_ret();
            } else {
                let span = self.output.func(fr).span;
                let tname = self
                    .type_of(ret_type)
                    .map(|t| t.name.clone())
                    .unwrap_or_default();
                self.logger.error(
                    LogCode::FunctionMustReturnAValue,
                    span,
                    format!("Function '{}' must return a value of type '{}'", name, tname),
                );
            }
        }
    }

    /// Find the next declared-but-uncompiled builder for a name; a
    /// compiled body always holds at least its implicit prologue, so an
    /// empty body distinguishes pending overloads.
    fn find_declared(&self, name: &str, this: Option<TypeId>) -> Option<FuncRef> {
        for i in 0..self.output.func_count() {
            let def = self.output.func(FuncRef(i));
            if def.name == name
                && def.this_type == this
                && def.output.is_some()
                && def.code.is_empty()
            {
                return Some(FuncRef(i));
            }
        }
        None
    }

    fn register_output(&mut self, fr: FuncRef) -> FunctionId {
        if let Some(id) = self.output.resolved_id(fr) {
            return id;
        }
        let sig = self.output.intern_signature(fr, self.types);
        let module_id = self.output.module.id;
        let (name, is_method) = {
            let def = self.output.func(fr);
            (def.name.clone(), def.is_method)
        };
        let fqn = format!("{}::{}", self.output.module.name, name);
        let func = Function::script(&name, &fqn, sig.id, module_id, is_method);
        let registered = self.functions.add(func);
        self.output.resolve(fr, registered.id);
        self.sync_function_mirror();
        registered.id
    }

    /// Keep the type registry's function mirror fresh so equivalence
    /// checks can resolve method ids.
    fn sync_function_mirror(&mut self) {
        self.types.sync_functions(self.functions.snapshot());
    }

    // ------------------------------------------------------------------
    // Shared emission helpers
    // ------------------------------------------------------------------

    /// Resolve a written type reference: builtins, scope symbols,
    /// module-qualified names and template instantiations.
    pub fn resolve_type_ref(&mut self, r: &TypeRef) -> Option<TypeId> {
        if let Some(module) = &r.module {
            let mid = *self.module_names.get(module)?;
            let m = self.modules.get(&mid)?;
            let found = m
                .types
                .iter()
                .copied()
                .find(|t| self.types.get(*t).map(|tp| tp.name == r.name).unwrap_or(false))?;
            return Some(found);
        }

        let base = if let Some(b) = self.builtins.by_name(&r.name) {
            Some(b)
        } else {
            match self.lookup(&r.name) {
                Some(Symbol::Type(t)) => Some(t),
                Some(Symbol::Enum { type_id, .. }) => Some(type_id),
                _ => self
                    .types
                    .all()
                    .find(|t| t.name == r.name && !t.meta.is_anonymous)
                    .map(|t| t.id),
            }
        }?;

        if r.template_args.is_empty() {
            return Some(base);
        }

        // Template instantiation: resolve arguments, then run the
        // registered specializer.
        let mut args = Vec::new();
        for a in &r.template_args {
            args.push(self.resolve_type_ref(a)?);
        }
        let tp = self.types.get(base)?;
        let TypeKind::Template(data) = &tp.kind else {
            self.logger.error(
                LogCode::TemplateArgumentMismatch,
                r.span,
                format!("Type '{}' is not a template", r.name),
            );
            return None;
        };
        let spec = Arc::clone(&data.specializer);
        let module = self.output.module.id;
        let mut ctx = intrinsics::SpecializeCtx {
            types: &mut *self.types,
            functions: &mut *self.functions,
            module,
        };
        match spec(&mut ctx, &args) {
            Ok(id) => {
                self.sync_function_mirror();
                Some(id)
            }
            Err(e) => {
                self.logger
                    .error(LogCode::TemplateArgumentMismatch, r.span, e.to_string());
                None
            }
        }
    }

    /// The generated init function's builder ref.
    pub fn init_ref(&self) -> Option<FuncRef> {
        self.init_ref
    }

    /// Consume the compiler, yielding the diagnostic log and the module
    /// output for the pipeline to install.
    pub fn finish(self) -> (Logger, OutputBuilder) {
        (self.logger, self.output)
    }
}
