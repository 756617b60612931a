//! Statement lowering
//!
//! Variable declarations pick their storage strategy here: primitives
//! live in registers (function scope) or module data slots (module
//! scope); aggregates construct on the stack (function scope) or in
//! module memory (module scope); `new` construction happens in heap
//! memory and is lowered by the expression path.

use crate::compiler::ir::{Opcode, Value};
use crate::compiler::logger::LogCode;
use crate::compiler::scope::{ScopedObject, Symbol};
use crate::compiler::Compiler;
use crate::lexer::SourceSpan;
use crate::parser::ast::{Expr, Stmt, StmtKind, TypeRef};

impl Compiler<'_> {
    /// Lower one statement into the current function.
    pub fn lower_stmt(&mut self, s: &Stmt) {
        self.cur().current_span = s.span;
        match &s.kind {
            StmtKind::Import { .. }
            | StmtKind::Function(_)
            | StmtKind::Class(_)
            | StmtKind::Format { .. }
            | StmtKind::Enum { .. } => {
                // Declarations are handled by the declaration pass.
            }
            StmtKind::Let {
                name,
                ty,
                init,
                is_const: _,
            } => self.lower_let(name, ty.as_ref(), init.as_ref(), s.span),
            StmtKind::Return(value) => self.lower_return(value.as_ref(), s.span),
            StmtKind::Delete(e) => self.lower_delete(e, s.span),
            StmtKind::If { cond, then, other } => self.lower_if(cond, then, other.as_deref(), s.span),
            StmtKind::While { cond, body } => self.lower_while(cond, body, s.span),
            StmtKind::DoWhile { body, cond } => self.lower_do_while(body, cond, s.span),
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.lower_for(init.as_deref(), cond.as_ref(), step.as_ref(), body, s.span),
            StmtKind::Block(stmts) => self.lower_block(stmts),
            StmtKind::Expr(e) => {
                self.lower_expr(e);
            }
        }
    }

    /// Lower a statement in its own lexical scope, destroying scoped
    /// objects on exit.
    fn lower_scoped(&mut self, s: &Stmt) {
        self.scopes().push();
        self.lower_stmt(s);
        let scope = self.scopes().pop();
        self.emit_scope_exit(&scope.stack_objects, true);
    }

    fn lower_block(&mut self, stmts: &[Stmt]) {
        self.scopes().push();
        for s in stmts {
            self.lower_stmt(s);
        }
        let scope = self.scopes().pop();
        self.emit_scope_exit(&scope.stack_objects, true);
    }

    fn lower_let(
        &mut self,
        name: &str,
        ty: Option<&TypeRef>,
        init: Option<&Expr>,
        span: SourceSpan,
    ) {
        let declared = ty.and_then(|t| {
            let resolved = self.resolve_type_ref(t);
            if resolved.is_none() {
                self.logger.error(
                    LogCode::UnknownType,
                    t.span,
                    format!("Unknown type '{}'", t.name),
                );
            }
            resolved
        });

        let init_v = init.map(|e| self.lower_rvalue(e));
        let Some(tp) = declared.or_else(|| init_v.as_ref().map(|v| v.type_id)) else {
            self.logger.error(
                LogCode::TypeMismatch,
                span,
                format!("Variable '{}' needs a type or an initializer", name),
            );
            return;
        };

        let meta = self.type_of(tp).map(|t| t.meta).unwrap_or_default();
        let is_module_scope = Some(self.cur_ref()) == self.init_ref();

        // A pointer initializer (heap construction, aggregate call
        // result) binds directly; no new storage is created.
        if let Some(v) = &init_v {
            if v.is_pointer && !meta.is_primitive {
                let named = self.cur().promote(v, name);
                if !self.scopes().add(name, Symbol::Value(named)) {
                    self.logger.error(
                        LogCode::DuplicateSymbol,
                        span,
                        format!("Symbol '{}' is already defined", name),
                    );
                }
                return;
            }
        }

        if is_module_scope {
            self.lower_module_let(name, tp, meta.is_primitive, init_v, span);
            return;
        }

        if meta.is_primitive {
            let dst = self.cur().named_val(name, tp);
            let v = match init_v {
                Some(v) => self.convert(v, tp, span),
                None => self.cur().imm_u(0, tp),
            };
            self.cur().add(Opcode::Assign).op(dst.clone()).op(v);
            if !self.scopes().add(name, Symbol::Value(dst)) {
                self.logger.error(
                    LogCode::DuplicateSymbol,
                    span,
                    format!("Symbol '{}' is already defined", name),
                );
            }
            return;
        }

        // Aggregate local: on-stack construction, destroyed at scope exit
        let size = meta.size.max(8);
        let (mut ptr, alloc) = {
            let f = self.cur();
            f.stack(tp, size)
        };
        ptr.type_id = tp;
        let args = match init_v {
            Some(v) => vec![v],
            None => vec![],
        };
        self.construct_at(tp, ptr.clone(), args, span);

        // Host-bound objects are opaque handles: the constructor wrote
        // the handle into the slot, and the handle itself is the value
        // the rest of the function (and the destructor) sees.
        let value = if meta.is_host {
            let f = self.cur();
            let mut handle = f.val(tp);
            let zero = f.imm_u32(0);
            f.add(Opcode::Load).op(handle.clone()).op(ptr).op(zero);
            handle.is_pointer = true;
            handle
        } else {
            ptr
        };

        self.scopes().add_stack_object(ScopedObject {
            alloc: Some(alloc),
            ptr: value.clone(),
            type_id: tp,
        });
        let named = self.cur().promote(&value, name);
        if !self.scopes().add(name, Symbol::Value(named)) {
            self.logger.error(
                LogCode::DuplicateSymbol,
                span,
                format!("Symbol '{}' is already defined", name),
            );
        }
    }

    /// Module-scope variable: reserve a data slot and construct it in
    /// module memory during init.
    fn lower_module_let(
        &mut self,
        name: &str,
        tp: crate::types::TypeId,
        is_primitive: bool,
        init_v: Option<Value>,
        span: SourceSpan,
    ) {
        let size = self.type_of(tp).map(|t| t.meta.size.max(1)).unwrap_or(8);
        let slot = self.output.module.define_local(name, tp, size, span);
        let module = self.output.module.id;
        let addr = self.module_data_addr(module, slot);

        if is_primitive {
            let v = match init_v {
                Some(v) => self.convert(v, tp, span),
                None => self.cur().imm_u(0, tp),
            };
            let zero = self.cur().imm_u32(0);
            self.cur().add(Opcode::Store).op(v).op(addr).op(zero);
        } else {
            let mut dst = addr;
            dst.type_id = tp;
            let args = match init_v {
                Some(v) => vec![v],
                None => vec![],
            };
            self.construct_at(tp, dst, args, span);
        }
    }

    fn lower_return(&mut self, value: Option<&Expr>, span: SourceSpan) {
        let v = value.map(|e| self.lower_rvalue(e));

        let (ret_tp, ret_set) = {
            let f = self.cur();
            (f.ret_type, f.ret_type_set)
        };

        if let Some(v) = v {
            if !ret_set || ret_tp == self.builtins.void_t {
                self.logger.error(
                    LogCode::TypeMismatch,
                    span,
                    "Void function cannot return a value",
                );
            } else {
                let v = self.convert(v, ret_tp, span);
                let ret_meta = self.type_of(ret_tp).map(|t| t.meta).unwrap_or_default();
                // Host objects return their handle by value
                let by_value = ret_meta.is_primitive || ret_meta.is_host;
                let ret_ptr = self.cur().ret_ptr();
                if by_value {
                    let zero = self.cur().imm_u32(0);
                    self.cur().add(Opcode::Store).op(v).op(ret_ptr).op(zero);
                } else {
                    // Aggregate return: copy into the caller-reserved
                    // destination passed through the call context.
                    let size = self.type_of(ret_tp).map(|t| t.meta.size).unwrap_or(8);
                    let fr = self.cur_ref();
                    let f = self.output.func_mut(fr);
                    crate::compiler::intrinsics::emit_memcopy(f, &ret_ptr, &v, size);
                }
            }
        } else if ret_set && ret_tp != self.builtins.void_t {
            self.logger.error(
                LogCode::FunctionMustReturnAValue,
                span,
                "Non-void function must return a value",
            );
        }

        // Destroy every scoped object before leaving; the frame dies
        // with the return so the stack slots are not individually freed.
        let objs = self.scopes().all_stack_objects();
        self.emit_scope_exit(&objs, false);
        self.cur().add(Opcode::Ret);
    }

    fn lower_delete(&mut self, e: &Expr, span: SourceSpan) {
        let v = self.lower_expr(e);
        if v.is_poison() {
            return;
        }
        if !v.is_pointer {
            self.logger.error(
                LogCode::TypeMismatch,
                span,
                "Operand of 'delete' must be a pointer",
            );
            return;
        }
        let (dtor, is_host) = self
            .type_of(v.type_id)
            .map(|t| (t.destructor, t.meta.is_host))
            .unwrap_or((None, false));
        if let Some(dtor) = dtor {
            self.lower_direct_call(dtor, Some(v.clone()), vec![], span);
        }
        // Host objects live in the host slab, not the script heap
        if !is_host {
            let freemem = self.lookup_functions("$freemem");
            if let Some(freemem) = freemem.first().copied() {
                let b = self.builtins;
                let mut raw = v;
                raw.type_id = b.u64_t;
                raw.is_pointer = false;
                self.lower_direct_call(freemem, None, vec![raw], span);
            }
        }
    }

    fn lower_if(&mut self, cond: &Expr, then: &Stmt, other: Option<&Stmt>, span: SourceSpan) {
        let c = self.lower_rvalue(cond);
        let b = self.builtins.bool_t;
        let c = self.convert(c, b, span);

        let (l_then, l_else, l_end) = {
            let f = self.cur();
            (f.reserve_label(), f.reserve_label(), f.reserve_label())
        };
        let else_target = if other.is_some() { l_else } else { l_end };
        self.cur()
            .add(Opcode::Branch)
            .op(c)
            .label(l_then)
            .label(else_target);

        self.cur().place_label(l_then);
        self.lower_scoped(then);
        if other.is_some() {
            self.cur().add(Opcode::Jump).label(l_end);
            self.cur().place_label(l_else);
            self.lower_scoped(other.expect("guarded by is_some"));
        }
        self.cur().place_label(l_end);
    }

    fn lower_while(&mut self, cond: &Expr, body: &Stmt, span: SourceSpan) {
        let l_cond = self.cur().label();
        let c = self.lower_rvalue(cond);
        let b = self.builtins.bool_t;
        let c = self.convert(c, b, span);
        let (l_body, l_end) = {
            let f = self.cur();
            (f.reserve_label(), f.reserve_label())
        };
        self.cur()
            .add(Opcode::Branch)
            .op(c)
            .label(l_body)
            .label(l_end);
        self.cur().place_label(l_body);
        self.lower_scoped(body);
        self.cur().add(Opcode::Jump).label(l_cond);
        self.cur().place_label(l_end);
    }

    fn lower_do_while(&mut self, body: &Stmt, cond: &Expr, span: SourceSpan) {
        let l_body = self.cur().label();
        self.lower_scoped(body);
        let c = self.lower_rvalue(cond);
        let b = self.builtins.bool_t;
        let c = self.convert(c, b, span);
        let l_end = self.cur().reserve_label();
        self.cur()
            .add(Opcode::Branch)
            .op(c)
            .label(l_body)
            .label(l_end);
        self.cur().place_label(l_end);
    }

    fn lower_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
        span: SourceSpan,
    ) {
        self.scopes().push();
        if let Some(init) = init {
            self.lower_stmt(init);
        }
        let l_cond = self.cur().label();
        let (l_body, l_end) = {
            let f = self.cur();
            (f.reserve_label(), f.reserve_label())
        };
        match cond {
            Some(cond) => {
                let c = self.lower_rvalue(cond);
                let b = self.builtins.bool_t;
                let c = self.convert(c, b, span);
                self.cur()
                    .add(Opcode::Branch)
                    .op(c)
                    .label(l_body)
                    .label(l_end);
            }
            None => {
                self.cur().add(Opcode::Jump).label(l_body);
            }
        }
        self.cur().place_label(l_body);
        self.lower_scoped(body);
        if let Some(step) = step {
            self.lower_expr(step);
        }
        self.cur().add(Opcode::Jump).label(l_cond);
        self.cur().place_label(l_end);

        let scope = self.scopes().pop();
        self.emit_scope_exit(&scope.stack_objects, true);
    }

    /// Destructor calls for a set of scoped objects, optionally freeing
    /// their stack slots (skipped on return paths where the whole frame
    /// dies).
    pub(crate) fn emit_scope_exit(&mut self, objs: &[ScopedObject], free: bool) {
        for obj in objs.iter().rev() {
            let dtor = self.type_of(obj.type_id).and_then(|t| t.destructor);
            if let Some(dtor) = dtor {
                self.lower_direct_call(dtor, Some(obj.ptr.clone()), vec![], SourceSpan::default());
            }
            if free {
                if let Some(alloc) = obj.alloc {
                    self.cur().stack_free(alloc);
                }
            }
        }
    }
}
