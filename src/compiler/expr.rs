//! Expression lowering
//!
//! Expressions lower to a tree of Value-producing emissions. Binary and
//! unary operators dispatch on operand static types to the signed/
//! unsigned/f32/f64 opcode variants; member access resolves through the
//! six forms (type statics, module-qualified statics, module globals,
//! enum variants both bare and module-qualified, and instance
//! properties with getter dispatch).

use std::sync::Arc;

use crate::compiler::intrinsics::{emit_memcopy, IntrinsicCall};
use crate::compiler::ir::{ImmValue, Opcode, Value, ValueKind};
use crate::compiler::logger::LogCode;
use crate::compiler::scope::{ScopedObject, Symbol};
use crate::compiler::Compiler;
use crate::lexer::SourceSpan;
use crate::parser::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::runtime::execution::call_context;
use crate::types::{ArgKind, DataType, FunctionId, ModuleId, Property, TypeId};

/// Numeric dispatch class of a primitive type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NumClass {
    /// Signed integral
    Int,
    /// Unsigned integral
    Uint,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

/// Intermediate result of resolving a dotted path
pub(crate) enum PathTarget {
    /// An ordinary value
    Value(Value),
    /// A type name (class, format, enum)
    Type(TypeId),
    /// An imported module
    Module(ModuleId),
    /// A callable overload set
    Functions(Vec<FunctionId>),
}

impl Compiler<'_> {
    /// Lower one expression, returning the value holding its result.
    pub fn lower_expr(&mut self, e: &Expr) -> Value {
        match &e.kind {
            ExprKind::IntLit(v) => {
                let b = self.builtins;
                let tp = if *v <= i32::MAX as u64 { b.i32_t } else { b.i64_t };
                self.cur().imm_i(*v as i64, tp)
            }
            ExprKind::FloatLit(v) => {
                let tp = self.builtins.f64_t;
                self.cur().imm_f(*v, tp)
            }
            ExprKind::BoolLit(v) => {
                let tp = self.builtins.bool_t;
                self.cur().imm_u(u64::from(*v), tp)
            }
            ExprKind::NullLit => self.cur().null(),
            ExprKind::StrLit(_) => self.error_value(
                LogCode::UnknownType,
                e.span,
                "String literals require a bound string type",
            ),
            ExprKind::This => match self.cur().this() {
                Some(t) => t,
                None => self.error_value(
                    LogCode::ThisOutsideClass,
                    e.span,
                    "Use of 'this' keyword outside of class scope",
                ),
            },
            ExprKind::Ident(_) | ExprKind::Member { .. } => {
                match self.resolve_path(e) {
                    PathTarget::Value(v) => v,
                    PathTarget::Functions(fns) => {
                        // A bare function name evaluates to a callable
                        // value holding the function id.
                        let Some(fid) = fns.first().copied() else {
                            return self.cur().poison();
                        };
                        self.function_value(fid)
                    }
                    PathTarget::Type(_) | PathTarget::Module(_) => self.error_value(
                        LogCode::UnknownSymbol,
                        e.span,
                        "Expected a value, found a type or module name",
                    ),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs, e.span),
            ExprKind::Unary { op, expr } => self.lower_unary(*op, expr, e.span),
            ExprKind::Assign { target, value } => self.lower_assign(target, value, e.span),
            ExprKind::Call { callee, args } => self.lower_call_expr(callee, args, e.span),
            ExprKind::Index { obj, index } => self.lower_index(obj, index, e.span),
            ExprKind::New { ty, args } => self.lower_new(ty, args, e.span),
            ExprKind::Conditional { cond, then, other } => {
                self.lower_conditional(cond, then, other, e.span)
            }
        }
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    pub(crate) fn num_class(&self, tp: TypeId) -> NumClass {
        match self.type_of(tp) {
            Some(t) if t.meta.is_floating_point && t.meta.size == 8 => NumClass::F64,
            Some(t) if t.meta.is_floating_point => NumClass::F32,
            Some(t) if t.meta.is_unsigned => NumClass::Uint,
            _ => NumClass::Int,
        }
    }

    /// Pick the common type of a binary operation and convert both
    /// operands to it.
    fn unify(&mut self, l: Value, r: Value, span: SourceSpan) -> (Value, Value, TypeId) {
        if l.type_id == r.type_id {
            let tp = l.type_id;
            return (l, r, tp);
        }
        let rank = |c: NumClass| match c {
            NumClass::F64 => 3,
            NumClass::F32 => 2,
            NumClass::Uint => 1,
            NumClass::Int => 0,
        };
        let (lc, rc) = (self.num_class(l.type_id), self.num_class(r.type_id));
        let target = if rank(lc) >= rank(rc) { l.type_id } else { r.type_id };
        let l = self.convert(l, target, span);
        let r = self.convert(r, target, span);
        (l, r, target)
    }

    fn lower_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, span: SourceSpan) -> Value {
        let l = self.lower_rvalue(lhs);
        let r = self.lower_rvalue(rhs);
        if l.is_poison() || r.is_poison() {
            return self.cur().poison();
        }

        use BinaryOp::*;
        match op {
            LogicalAnd | LogicalOr => {
                let b = self.builtins.bool_t;
                let l = self.convert(l, b, span);
                let r = self.convert(r, b, span);
                let dst = self.cur().val(b);
                let opcode = if op == LogicalAnd { Opcode::LAnd } else { Opcode::LOr };
                self.cur().add(opcode).op(dst.clone()).op(l).op(r);
                dst
            }
            BitAnd | BitOr | BitXor | Shl | Shr => {
                let (l, r, tp) = self.unify(l, r, span);
                let opcode = match op {
                    BitAnd => Opcode::BAnd,
                    BitOr => Opcode::BOr,
                    BitXor => Opcode::Xor,
                    Shl => Opcode::Shl,
                    _ => Opcode::Shr,
                };
                let dst = self.cur().val(tp);
                self.cur().add(opcode).op(dst.clone()).op(l).op(r);
                dst
            }
            Add | Sub | Mul | Div | Mod => {
                let (l, r, tp) = self.unify(l, r, span);
                let c = self.num_class(tp);
                let opcode = arith_opcode(op, c);
                let dst = self.cur().val(tp);
                self.cur().add(opcode).op(dst.clone()).op(l).op(r);
                dst
            }
            Eq | NotEq | Lt | LtEq | Gt | GtEq => {
                let (l, r, tp) = self.unify(l, r, span);
                let c = self.num_class(tp);
                let opcode = compare_opcode(op, c);
                let bool_t = self.builtins.bool_t;
                let dst = self.cur().val(bool_t);
                self.cur().add(opcode).op(dst.clone()).op(l).op(r);
                dst
            }
        }
    }

    fn lower_unary(&mut self, op: UnaryOp, expr: &Expr, span: SourceSpan) -> Value {
        let v = self.lower_rvalue(expr);
        if v.is_poison() {
            return v;
        }
        let c = self.num_class(v.type_id);
        match op {
            UnaryOp::Neg => {
                let opcode = match c {
                    NumClass::F64 => Opcode::DNeg,
                    NumClass::F32 => Opcode::FNeg,
                    _ => Opcode::INeg,
                };
                let dst = self.cur().val(v.type_id);
                self.cur().add(opcode).op(dst.clone()).op(v);
                dst
            }
            UnaryOp::Not => {
                let b = self.builtins.bool_t;
                let v = self.convert(v, b, span);
                let dst = self.cur().val(b);
                self.cur().add(Opcode::Not).op(dst.clone()).op(v);
                dst
            }
            UnaryOp::BitNot => {
                let dst = self.cur().val(v.type_id);
                self.cur().add(Opcode::Inv).op(dst.clone()).op(v);
                dst
            }
            UnaryOp::PreInc | UnaryOp::PreDec => {
                if !v.is_reg() {
                    return self.error_value(
                        LogCode::NotAssignable,
                        span,
                        "Increment target must be a variable",
                    );
                }
                let opcode = match (op, c) {
                    (UnaryOp::PreInc, NumClass::F64) => Opcode::DInc,
                    (UnaryOp::PreInc, NumClass::F32) => Opcode::FInc,
                    (UnaryOp::PreInc, NumClass::Uint) => Opcode::UInc,
                    (UnaryOp::PreInc, NumClass::Int) => Opcode::IInc,
                    (_, NumClass::F64) => Opcode::DDec,
                    (_, NumClass::F32) => Opcode::FDec,
                    (_, NumClass::Uint) => Opcode::UDec,
                    (_, NumClass::Int) => Opcode::IDec,
                };
                self.cur().add(opcode).op(v.clone());
                v
            }
        }
    }

    fn lower_conditional(
        &mut self,
        cond: &Expr,
        then: &Expr,
        other: &Expr,
        span: SourceSpan,
    ) -> Value {
        let c = self.lower_rvalue(cond);
        let b = self.builtins.bool_t;
        let c = self.convert(c, b, span);

        let (l_then, l_else, l_end) = {
            let f = self.cur();
            (f.reserve_label(), f.reserve_label(), f.reserve_label())
        };
        self.cur()
            .add(Opcode::Branch)
            .op(c)
            .label(l_then)
            .label(l_else);

        self.cur().place_label(l_then);
        let tv = self.lower_rvalue(then);
        let dst = self.cur().val(tv.type_id);
        self.cur().add(Opcode::Reserve).op(dst.clone());
        self.cur().add(Opcode::Resolve).op(dst.clone()).op(tv);
        self.cur().add(Opcode::Jump).label(l_end);

        self.cur().place_label(l_else);
        let ov = self.lower_rvalue(other);
        let ov = self.convert(ov, dst.type_id, span);
        self.cur().add(Opcode::Resolve).op(dst.clone()).op(ov);

        self.cur().place_label(l_end);
        dst
    }

    // ------------------------------------------------------------------
    // Path resolution and member access
    // ------------------------------------------------------------------

    /// Resolve an expression that may denote a value, type, module or
    /// overload set. This implements the six member-access forms.
    pub(crate) fn resolve_path(&mut self, e: &Expr) -> PathTarget {
        match &e.kind {
            ExprKind::Ident(name) => {
                if let Some(sym) = self.lookup(name) {
                    return match sym {
                        Symbol::Value(v) => PathTarget::Value(self.materialize(v)),
                        Symbol::Type(t) => PathTarget::Type(t),
                        Symbol::Enum { type_id, .. } => PathTarget::Type(type_id),
                        Symbol::Module(m) => PathTarget::Module(m),
                        Symbol::Functions(f) => PathTarget::Functions(f),
                    };
                }
                let fns = self.lookup_functions(name);
                if !fns.is_empty() {
                    return PathTarget::Functions(fns);
                }
                // Module data of the module being compiled
                if let Some((slot, info)) = self.output.module.find_data(name) {
                    let (type_id, module) = (info.type_id, self.output.module.id);
                    return PathTarget::Value(self.module_data_value(module, slot, type_id));
                }
                // Registered type names (host-bound types in particular)
                if let Some(tid) = self
                    .types
                    .all()
                    .find(|t| t.name == *name && !t.meta.is_anonymous && !t.meta.is_function)
                    .map(|t| t.id)
                {
                    return PathTarget::Type(tid);
                }
                PathTarget::Value(self.error_value(
                    LogCode::UnknownSymbol,
                    e.span,
                    format!("Unknown symbol '{}'", name),
                ))
            }
            ExprKind::Member { obj, name } => {
                let base = self.resolve_path(obj);
                self.resolve_member(base, name, e.span)
            }
            _ => PathTarget::Value(self.lower_expr(e)),
        }
    }

    fn resolve_member(&mut self, base: PathTarget, name: &str, span: SourceSpan) -> PathTarget {
        match base {
            // ModuleName.x : type, enum, global variable or function
            PathTarget::Module(mid) => {
                let Some(m) = self.modules.get(&mid).cloned() else {
                    return PathTarget::Value(self.error_value(
                        LogCode::UnknownModule,
                        span,
                        "Module is not loaded",
                    ));
                };
                for t in &m.types {
                    if let Some(tp) = self.types.get(*t) {
                        if tp.name == name {
                            return PathTarget::Type(tp.id);
                        }
                    }
                }
                if let Some((slot, info)) = m.find_data(name) {
                    let type_id = info.type_id;
                    return PathTarget::Value(self.module_data_value(mid, slot, type_id));
                }
                let mut fns = Vec::new();
                for fid in &m.functions {
                    if let Some(f) = self.functions.get(*fid) {
                        if f.name == name && !f.is_method {
                            fns.push(*fid);
                        }
                    }
                }
                if !fns.is_empty() {
                    return PathTarget::Functions(fns);
                }
                PathTarget::Value(self.error_value(
                    LogCode::UnknownSymbol,
                    span,
                    format!("Module has no member '{}'", name),
                ))
            }
            // TypeName.x : enum variant, static property or static method
            PathTarget::Type(tid) => {
                let Some(tp) = self.type_of(tid) else {
                    return PathTarget::Value(self.cur().poison());
                };
                if let Some(p) = tp.properties.iter().find(|p| p.name == name) {
                    if p.flags.is_static {
                        if !p.flags.can_write && tp.meta.is_integral {
                            // Enum variant: the constant is the offset
                            let v = self.cur().imm_i(p.offset as i64, p.type_id);
                            return PathTarget::Value(v);
                        }
                        let p = p.clone();
                        return PathTarget::Value(self.static_prop_read(&tp, &p, span));
                    }
                }
                let methods = tp.find_methods(name, None, self.types);
                if !methods.is_empty() {
                    return PathTarget::Functions(methods);
                }
                PathTarget::Value(self.error_value(
                    LogCode::UnknownProperty,
                    span,
                    format!("Type '{}' has no static member '{}'", tp.name, name),
                ))
            }
            // expr.x : instance property or method
            PathTarget::Value(v) => {
                let Some(tp) = self.type_of(v.type_id) else {
                    return PathTarget::Value(self.cur().poison());
                };
                if let Some(p) = tp.prop(name, self.types, false) {
                    return PathTarget::Value(self.prop_read(&v, &p, span));
                }
                let methods = tp.find_methods(name, None, self.types);
                if !methods.is_empty() {
                    // Leave the receiver attached; the call lowering
                    // picks it back up.
                    return PathTarget::Functions(methods);
                }
                PathTarget::Value(self.error_value(
                    LogCode::UnknownProperty,
                    span,
                    format!("Type '{}' has no property '{}'", tp.name, name),
                ))
            }
            PathTarget::Functions(_) => PathTarget::Value(self.error_value(
                LogCode::UnknownSymbol,
                span,
                "Functions have no members",
            )),
        }
    }

    /// Turn an abstract symbol value into something instructions can
    /// use; module-data references emit their address materialization.
    pub(crate) fn materialize(&mut self, v: Value) -> Value {
        match v.kind {
            ValueKind::ModuleData { module, slot } => {
                self.module_data_value(module, slot, v.type_id)
            }
            _ => v,
        }
    }

    /// Emit `module_data` to obtain the address of a slot, then load the
    /// value for primitives or yield the pointer for aggregates.
    fn module_data_value(&mut self, module: ModuleId, slot: u32, type_id: TypeId) -> Value {
        let is_primitive = self
            .type_of(type_id)
            .map(|t| t.meta.is_primitive)
            .unwrap_or(true);
        let b = self.builtins;
        let f = self.cur();
        let mut addr = f.val(b.ptr_t);
        addr.is_pointer = true;
        let m_imm = f.imm_u32(module.0);
        let s_imm = f.imm_u32(slot);
        f.add(Opcode::ModuleData).op(addr.clone()).op(m_imm).op(s_imm);
        if is_primitive {
            let dst = f.val(type_id);
            let zero = f.imm_u32(0);
            f.add(Opcode::Load).op(dst.clone()).op(addr).op(zero);
            dst
        } else {
            let mut ptr = addr;
            ptr.type_id = type_id;
            ptr
        }
    }

    /// Address of a module data slot, without loading.
    pub(crate) fn module_data_addr(&mut self, module: ModuleId, slot: u32) -> Value {
        let b = self.builtins;
        let f = self.cur();
        let mut addr = f.val(b.ptr_t);
        addr.is_pointer = true;
        let m_imm = f.imm_u32(module.0);
        let s_imm = f.imm_u32(slot);
        f.add(Opcode::ModuleData).op(addr.clone()).op(m_imm).op(s_imm);
        addr
    }

    fn static_prop_slot(&mut self, tp: &DataType, prop: &Property) -> Option<(ModuleId, u32)> {
        let owner = tp.owner?;
        let slot_name = format!("{}::{}", tp.name, prop.name);
        if owner == self.output.module.id {
            self.output.module.find_data(&slot_name).map(|(s, _)| (owner, s))
        } else {
            self.modules
                .get(&owner)
                .and_then(|m| m.find_data(&slot_name).map(|(s, _)| (owner, s)))
        }
    }

    fn static_prop_read(&mut self, tp: &DataType, prop: &Property, span: SourceSpan) -> Value {
        if let Some(getter) = prop.getter {
            return self.lower_direct_call(getter, None, vec![], span);
        }
        let Some((module, slot)) = self.static_prop_slot(tp, prop) else {
            return self.error_value(
                LogCode::UnknownProperty,
                span,
                format!("Static property '{}' has no storage", prop.name),
            );
        };
        self.module_data_value(module, slot, prop.type_id)
    }

    /// Read an instance property: getter dispatch or direct load.
    fn prop_read(&mut self, base: &Value, prop: &Property, span: SourceSpan) -> Value {
        if !prop.flags.can_read {
            return self.error_value(
                LogCode::UnknownProperty,
                span,
                format!("Property '{}' is write-only", prop.name),
            );
        }
        if let Some(getter) = prop.getter {
            return self.lower_direct_call(getter, Some(base.clone()), vec![], span);
        }
        let is_primitive = self
            .type_of(prop.type_id)
            .map(|t| t.meta.is_primitive)
            .unwrap_or(true);
        let f = self.cur();
        if is_primitive {
            let dst = f.val(prop.type_id);
            let off = f.imm_u32(prop.offset as u32);
            f.add(Opcode::Load).op(dst.clone()).op(base.clone()).op(off);
            dst
        } else {
            // Aggregate member: produce a pointer into the object
            let b = f.builtins();
            let mut dst = f.val(b.ptr_t);
            let off = f.imm_u(prop.offset, b.u64_t);
            f.add(Opcode::UAdd).op(dst.clone()).op(base.clone()).op(off);
            dst.type_id = prop.type_id;
            dst.is_pointer = true;
            dst
        }
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    fn lower_assign(&mut self, target: &Expr, value: &Expr, span: SourceSpan) -> Value {
        let v = self.lower_rvalue(value);
        match &target.kind {
            ExprKind::Ident(name) => {
                let name = name.clone();
                match self.lookup(&name) {
                    Some(Symbol::Value(dst)) => self.assign_to(dst, v, span),
                    _ => {
                        if let Some((slot, info)) = self.output.module.find_data(&name) {
                            let (tp, module) = (info.type_id, self.output.module.id);
                            let addr = self.module_data_addr(module, slot);
                            let v = self.convert(v, tp, span);
                            let zero = self.cur().imm_u32(0);
                            self.cur().add(Opcode::Store).op(v.clone()).op(addr).op(zero);
                            v
                        } else {
                            self.error_value(
                                LogCode::UnknownSymbol,
                                span,
                                format!("Unknown symbol '{}'", name),
                            )
                        }
                    }
                }
            }
            ExprKind::Member { obj, name } => {
                let base = self.resolve_path(obj);
                match base {
                    PathTarget::Value(bv) => {
                        let Some(tp) = self.type_of(bv.type_id) else {
                            return self.cur().poison();
                        };
                        let Some(p) = tp.prop(name, self.types, false) else {
                            return self.error_value(
                                LogCode::UnknownProperty,
                                span,
                                format!("Type '{}' has no property '{}'", tp.name, name),
                            );
                        };
                        self.prop_write(&bv, &p, v, span)
                    }
                    PathTarget::Type(tid) => {
                        let Some(tp) = self.type_of(tid) else {
                            return self.cur().poison();
                        };
                        let Some(p) = tp.properties.iter().find(|p| p.name == *name).cloned()
                        else {
                            return self.error_value(
                                LogCode::UnknownProperty,
                                span,
                                format!("Type '{}' has no static member '{}'", tp.name, name),
                            );
                        };
                        if let Some(setter) = p.setter {
                            return self.lower_direct_call(setter, None, vec![v], span);
                        }
                        let Some((module, slot)) = self.static_prop_slot(&tp, &p) else {
                            return self.error_value(
                                LogCode::NotAssignable,
                                span,
                                format!("Cannot assign to '{}'", p.name),
                            );
                        };
                        let addr = self.module_data_addr(module, slot);
                        let v = self.convert(v, p.type_id, span);
                        let zero = self.cur().imm_u32(0);
                        self.cur().add(Opcode::Store).op(v.clone()).op(addr).op(zero);
                        v
                    }
                    _ => self.error_value(LogCode::NotAssignable, span, "Invalid assignment target"),
                }
            }
            ExprKind::Index { obj, index } => {
                let (addr, elem_tp) = self.index_address(obj, index, span);
                let v = self.convert(v, elem_tp, span);
                let zero = self.cur().imm_u32(0);
                self.cur().add(Opcode::Store).op(v.clone()).op(addr).op(zero);
                v
            }
            _ => self.error_value(LogCode::NotAssignable, span, "Invalid assignment target"),
        }
    }

    /// Assign into an existing value: register move or store through a
    /// pointer, converting first.
    pub(crate) fn assign_to(&mut self, dst: Value, v: Value, span: SourceSpan) -> Value {
        match dst.kind {
            ValueKind::ModuleData { module, slot } => {
                let addr = self.module_data_addr(module, slot);
                let v = self.convert(v, dst.type_id, span);
                let zero = self.cur().imm_u32(0);
                self.cur().add(Opcode::Store).op(v.clone()).op(addr).op(zero);
                v
            }
            _ if dst.is_pointer => {
                let meta = self.type_of(dst.type_id).map(|t| t.meta).unwrap_or_default();
                // Host handles copy like registers
                if meta.is_host && dst.is_reg() {
                    let v = self.convert(v, dst.type_id, span);
                    self.cur().add(Opcode::Assign).op(dst.clone()).op(v);
                    return dst;
                }
                let is_prim = meta.is_primitive;
                if is_prim {
                    let v = self.convert(v, dst.type_id, span);
                    let zero = self.cur().imm_u32(0);
                    self.cur()
                        .add(Opcode::Store)
                        .op(v.clone())
                        .op(dst.clone())
                        .op(zero);
                    v
                } else if v.is_pointer && v.type_id == dst.type_id {
                    // Aggregate assignment is a byte copy between the
                    // two storage locations.
                    let size = self.type_of(dst.type_id).map(|t| t.meta.size).unwrap_or(8);
                    let fr = self.cur_ref();
                    let f = self.output.func_mut(fr);
                    emit_memcopy(f, &dst, &v, size);
                    dst
                } else {
                    self.error_value(LogCode::TypeMismatch, span, "Incompatible assignment")
                }
            }
            ValueKind::Reg(_) => {
                let v = self.convert(v, dst.type_id, span);
                self.cur().add(Opcode::Assign).op(dst.clone()).op(v);
                dst
            }
            _ => self.error_value(LogCode::NotAssignable, span, "Invalid assignment target"),
        }
    }

    fn prop_write(&mut self, base: &Value, prop: &Property, v: Value, span: SourceSpan) -> Value {
        if !prop.flags.can_write {
            return self.error_value(
                LogCode::NotAssignable,
                span,
                format!("Property '{}' is read-only", prop.name),
            );
        }
        if let Some(setter) = prop.setter {
            return self.lower_direct_call(setter, Some(base.clone()), vec![v], span);
        }
        let v = self.convert(v, prop.type_id, span);
        let off = self.cur().imm_u32(prop.offset as u32);
        self.cur()
            .add(Opcode::Store)
            .op(v.clone())
            .op(base.clone())
            .op(off);
        v
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    fn index_address(&mut self, obj: &Expr, index: &Expr, span: SourceSpan) -> (Value, TypeId) {
        let base = self.lower_rvalue(obj);
        let idx = self.lower_rvalue(index);
        let elem_tp = base.type_id;
        let elem_size = self.type_of(elem_tp).map(|t| t.meta.size).unwrap_or(8);
        if !base.is_pointer {
            let p = self.error_value(LogCode::TypeMismatch, span, "Cannot index a non-pointer value");
            return (p, elem_tp);
        }
        let b = self.builtins;
        let idx = self.convert(idx, b.u64_t, span);
        let f = self.cur();
        let scaled = f.val(b.u64_t);
        let size_imm = f.imm_u(elem_size as u64, b.u64_t);
        f.add(Opcode::UMul).op(scaled.clone()).op(idx).op(size_imm);
        let mut addr = f.val(b.ptr_t);
        f.add(Opcode::UAdd).op(addr.clone()).op(base).op(scaled);
        addr.is_pointer = true;
        addr.type_id = elem_tp;
        (addr, elem_tp)
    }

    fn lower_index(&mut self, obj: &Expr, index: &Expr, span: SourceSpan) -> Value {
        let (addr, elem_tp) = self.index_address(obj, index, span);
        if addr.is_poison() {
            return addr;
        }
        let f = self.cur();
        let dst = f.val(elem_tp);
        let zero = f.imm_u32(0);
        f.add(Opcode::Load).op(dst.clone()).op(addr).op(zero);
        dst
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn lower_call_expr(&mut self, callee: &Expr, args: &[Expr], span: SourceSpan) -> Value {
        let mut arg_vals = Vec::with_capacity(args.len());
        for a in args {
            arg_vals.push(self.lower_rvalue(a));
        }

        // Method call with an explicit receiver
        if let ExprKind::Member { obj, name } = &callee.kind {
            let base = self.resolve_path(obj);
            match base {
                PathTarget::Value(recv) => {
                    let Some(tp) = self.type_of(recv.type_id) else {
                        return self.cur().poison();
                    };
                    let arg_types: Vec<TypeId> = arg_vals.iter().map(|a| a.type_id).collect();
                    let mut methods = tp.find_methods(name, Some(&arg_types), self.types);
                    if methods.is_empty() {
                        methods = tp.find_methods(name, None, self.types);
                    }
                    let Some(fid) = methods.first().copied() else {
                        return self.error_value(
                            LogCode::UnknownFunction,
                            span,
                            format!("Type '{}' has no method '{}'", tp.name, name),
                        );
                    };
                    return self.lower_direct_call(fid, Some(recv), arg_vals, span);
                }
                PathTarget::Type(tid) => {
                    let Some(tp) = self.type_of(tid) else {
                        return self.cur().poison();
                    };
                    let methods = tp.find_methods(name, None, self.types);
                    let Some(fid) = methods.first().copied() else {
                        return self.error_value(
                            LogCode::UnknownFunction,
                            span,
                            format!("Type '{}' has no static method '{}'", tp.name, name),
                        );
                    };
                    return self.lower_direct_call(fid, None, arg_vals, span);
                }
                PathTarget::Functions(fns) => {
                    let Some(fid) = self.pick_overload(&fns, &arg_vals) else {
                        return self.error_value(
                            LogCode::UnknownFunction,
                            span,
                            format!("No overload of '{}' matches", name),
                        );
                    };
                    return self.lower_direct_call(fid, None, arg_vals, span);
                }
                PathTarget::Module(_) => {
                    return self.error_value(LogCode::NotCallable, span, "Modules are not callable")
                }
            }
        }

        // Free function call, possibly an implicit method call inside a
        // class body.
        if let ExprKind::Ident(name) = &callee.kind {
            if let Some(this_tp) = self.cur().this_type {
                if let Some(tp) = self.type_of(this_tp) {
                    let methods = tp.find_methods(name, None, self.types);
                    if let Some(fid) = methods.first().copied() {
                        let this = self.cur().this();
                        return self.lower_direct_call(fid, this, arg_vals, span);
                    }
                }
            }
            let fns = self.lookup_functions(name);
            if !fns.is_empty() {
                let Some(fid) = self.pick_overload(&fns, &arg_vals) else {
                    return self.error_value(
                        LogCode::UnknownFunction,
                        span,
                        format!("No overload of '{}' matches the argument types", name),
                    );
                };
                return self.lower_direct_call(fid, None, arg_vals, span);
            }
        }

        self.error_value(LogCode::NotCallable, span, "Expression is not callable")
    }

    /// Prefer an exact signature match, then any overload with the right
    /// arity (conversions are applied by the call lowering).
    fn pick_overload(&self, fns: &[FunctionId], args: &[Value]) -> Option<FunctionId> {
        let mut arity_match = None;
        for fid in fns {
            let Some(f) = self.functions.get(*fid) else {
                continue;
            };
            let Some(sigtp) = self.types.get(f.signature) else {
                continue;
            };
            let Some(sig) = sigtp.signature() else {
                continue;
            };
            let explicit: Vec<_> = sig.explicit_args().collect();
            if explicit.len() != args.len() {
                continue;
            }
            if explicit
                .iter()
                .zip(args.iter())
                .all(|(e, a)| e.type_id == a.type_id)
            {
                return Some(*fid);
            }
            arity_match.get_or_insert(*fid);
        }
        arity_match
    }

    /// A callable value holding a function id.
    fn function_value(&mut self, fid: FunctionId) -> Value {
        let sig_tp = self
            .functions
            .get(fid)
            .map(|f| f.signature)
            .unwrap_or(self.builtins.ptr_t);
        let f = self.cur();
        let mut v = f.imm_u(fid.0 as u64, sig_tp);
        v.is_function = true;
        v
    }

    /// Lower a call to a known function: intrinsic expansion or the full
    /// call-context + param + call sequence.
    pub fn lower_direct_call(
        &mut self,
        fid: FunctionId,
        this: Option<Value>,
        args: Vec<Value>,
        span: SourceSpan,
    ) -> Value {
        self.lower_call_with_ret(fid, this, args, None, span)
    }

    /// Like [`Compiler::lower_direct_call`] but with an optional
    /// caller-chosen return destination (placement construction).
    pub fn lower_call_with_ret(
        &mut self,
        fid: FunctionId,
        this: Option<Value>,
        mut args: Vec<Value>,
        ret_dst: Option<Value>,
        span: SourceSpan,
    ) -> Value {
        let Some(func) = self.functions.get(fid) else {
            return self.error_value(LogCode::UnknownFunction, span, "Unknown function");
        };
        let Some(sig_tp) = self.types.get(func.signature) else {
            return self.error_value(LogCode::Internal, span, "Function has no signature");
        };
        let Some(sig) = sig_tp.signature().cloned() else {
            return self.error_value(LogCode::Internal, span, "Function has no signature");
        };

        let explicit: Vec<_> = sig.explicit_args().copied().collect();
        if explicit.len() != args.len() {
            return self.error_value(
                LogCode::UnknownFunction,
                span,
                format!(
                    "Function '{}' expects {} argument(s), got {}",
                    func.name,
                    explicit.len(),
                    args.len()
                ),
            );
        }
        for (i, a) in args.iter_mut().enumerate() {
            let want = explicit[i].type_id;
            if a.type_id != want {
                let converted = self.convert(a.clone(), want, span);
                *a = converted;
            }
        }

        // Intrinsics expand in place instead of emitting a call.
        if let Some(gen) = func.intrinsic_fn() {
            let fr = self.cur_ref();
            let ret_type = sig.return_type;
            let mut call = IntrinsicCall {
                func: self.output.func_mut(fr),
                types: &*self.types,
                this,
                args,
                dst: ret_dst,
                ret_type,
            };
            return match gen(&mut call) {
                Ok(v) => v,
                Err(e) => self.error_value(LogCode::Internal, span, e.to_string()),
            };
        }

        let ret_tp = sig.return_type;
        let is_void = ret_tp == self.builtins.void_t;
        let ret_meta = self.type_of(ret_tp).map(|t| t.meta);
        let ret_primitive = ret_meta.map(|m| m.is_primitive).unwrap_or(true);
        let ret_size = ret_meta.map(|m| m.size.max(8)).unwrap_or(8);

        // Caller-reserved return storage
        let mut ret_alloc = None;
        let ret_ptr = if let Some(dst) = &ret_dst {
            Some(dst.clone())
        } else if !is_void {
            let (ptr, alloc) = {
                let f = self.cur();
                f.stack(ret_tp, ret_size)
            };
            ret_alloc = Some(alloc);
            Some(ptr)
        } else {
            None
        };

        // Materialize the call context
        let b = self.builtins;
        let ectx = self.cur().ectx();
        let (cctx, cctx_alloc) = {
            let f = self.cur();
            f.stack(b.ptr_t, call_context::SIZE)
        };
        {
            let f = self.cur();
            let fid_imm = f.imm_u(fid.0 as u64, b.u64_t);
            let off = f.imm_u32(call_context::FUNC_PTR);
            f.add(Opcode::Store).op(fid_imm).op(cctx.clone()).op(off);

            let rv = match &ret_ptr {
                Some(p) => p.clone(),
                None => f.imm_u(0, b.u64_t),
            };
            let off = f.imm_u32(call_context::RET_PTR);
            f.add(Opcode::Store).op(rv).op(cctx.clone()).op(off);

            let zero = f.imm_u(0, b.u64_t);
            let off = f.imm_u32(call_context::CAPTURE_PTR);
            f.add(Opcode::Store).op(zero).op(cctx.clone()).op(off);

            let off = f.imm_u32(call_context::ECTX);
            f.add(Opcode::Store).op(ectx).op(cctx.clone()).op(off);

            let tv = match &this {
                Some(t) => t.clone(),
                None => f.imm_u(0, b.u64_t),
            };
            let off = f.imm_u32(call_context::THIS_PTR);
            f.add(Opcode::Store).op(tv).op(cctx.clone()).op(off);
        }

        // Parameters: context first, then explicit arguments
        {
            let f = self.cur();
            let kind_imm = f.imm_u(ArgKind::ContextPtr as u64, b.u8_t);
            f.add(Opcode::Param).op(cctx.clone()).op(kind_imm);
        }
        for (i, a) in args.iter().enumerate() {
            let f = self.cur();
            let kind_imm = f.imm_u(explicit[i].kind as u64, b.u8_t);
            f.add(Opcode::Param).op(a.clone()).op(kind_imm);
        }

        self.cur().add(Opcode::Call).func_id(fid);
        self.cur().stack_free(cctx_alloc);

        // Result readback
        if is_void {
            return self.cur().null();
        }
        let ret_host = ret_meta.map(|m| m.is_host).unwrap_or(false);
        if ret_primitive {
            let ptr = ret_ptr.expect("non-void call has return storage");
            let f = self.cur();
            let dst = f.val(ret_tp);
            let zero = f.imm_u32(0);
            f.add(Opcode::Load).op(dst.clone()).op(ptr).op(zero);
            if let Some(alloc) = ret_alloc {
                f.stack_free(alloc);
            }
            return dst;
        }
        if ret_host {
            // Host object result: keep the handle; the caller owns the
            // object and destroys it at scope exit.
            let ptr = ret_ptr.expect("non-void call has return storage");
            let f = self.cur();
            let mut handle = f.val(ret_tp);
            let zero = f.imm_u32(0);
            f.add(Opcode::Load).op(handle.clone()).op(ptr).op(zero);
            handle.is_pointer = true;
            if let Some(alloc) = ret_alloc {
                f.stack_free(alloc);
                // Slot already freed; scope exit only needs the handle
                // for destructor dispatch.
                let obj = ScopedObject {
                    alloc: None,
                    ptr: handle.clone(),
                    type_id: ret_tp,
                };
                self.scopes().add_stack_object(obj);
            }
            return handle;
        }

        // Aggregate result: the value carries its backing stack slot so
        // destruction is scheduled when the scope exits.
        let mut ptr = ret_ptr.expect("non-void call has return storage");
        ptr.type_id = ret_tp;
        ptr.is_pointer = true;
        if let Some(alloc) = ret_alloc {
            ptr.stack_src = Some(alloc);
            let obj = ScopedObject {
                alloc: Some(alloc),
                ptr: ptr.clone(),
                type_id: ret_tp,
            };
            self.scopes().add_stack_object(obj);
        }
        ptr
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// `new T(...)` constructs in heap memory obtained from the host
    /// allocator and returns the pointer.
    fn lower_new(&mut self, ty: &crate::parser::ast::TypeRef, args: &[Expr], span: SourceSpan) -> Value {
        let Some(tid) = self.resolve_type_ref(ty) else {
            return self.error_value(
                LogCode::UnknownType,
                span,
                format!("Unknown type '{}'", ty.name),
            );
        };
        let meta = self.type_of(tid).map(|t| t.meta).unwrap_or_default();
        let size = meta.size.max(8);

        let mut arg_vals = Vec::new();
        for a in args {
            arg_vals.push(self.lower_rvalue(a));
        }

        // Host objects live in the host slab; construct through a
        // scratch slot and keep only the handle.
        if meta.is_host {
            let (slot, alloc) = {
                let f = self.cur();
                f.stack(tid, 8)
            };
            self.construct_at(tid, slot.clone(), arg_vals, span);
            let f = self.cur();
            let mut handle = f.val(tid);
            let zero = f.imm_u32(0);
            f.add(Opcode::Load).op(handle.clone()).op(slot).op(zero);
            f.stack_free(alloc);
            handle.is_pointer = true;
            return handle;
        }

        let newmem = self.lookup_functions("$newmem");
        let Some(newmem) = newmem.first().copied() else {
            return self.error_value(LogCode::Internal, span, "Host allocator is not bound");
        };
        let b = self.builtins;
        let size_v = self.cur().imm_u(size as u64, b.u64_t);
        let mut ptr = self.lower_direct_call(newmem, None, vec![size_v], span);
        ptr.type_id = tid;
        ptr.is_pointer = true;

        self.construct_at(tid, ptr.clone(), arg_vals, span);
        ptr
    }

    /// Placement-construct a value of `tid` at the storage addressed by
    /// `dst`: declared constructor, POD memcopy, or trivial default.
    pub fn construct_at(&mut self, tid: TypeId, dst: Value, args: Vec<Value>, span: SourceSpan) {
        let Some(tp) = self.type_of(tid) else {
            return;
        };
        let arg_types: Vec<TypeId> = args.iter().map(|a| a.type_id).collect();

        if let Some(ctor) = tp.find_constructor(&arg_types, self.types) {
            let is_method = self
                .functions
                .get(ctor)
                .map(|f| f.is_method)
                .unwrap_or(true);
            if is_method {
                // Script constructor: receiver is the destination
                self.lower_direct_call(ctor, Some(dst), args, span);
            } else {
                // Host constructor: the thunk places the result at the
                // return slot
                self.lower_call_with_ret(ctor, None, args, Some(dst), span);
            }
            return;
        }

        if tp.meta.is_pod && args.len() == 1 && args[0].type_id == tid {
            let fr = self.cur_ref();
            let f = self.output.func_mut(fr);
            emit_memcopy(f, &dst, &args[0], tp.meta.size);
            return;
        }

        if args.is_empty() {
            if tp.meta.is_trivially_constructible {
                return;
            }
            // Primitive initialization defaults to zero
            if tp.meta.is_primitive {
                let zero = self.cur().imm_u(0, tid);
                let off = self.cur().imm_u32(0);
                self.cur().add(Opcode::Store).op(zero).op(dst).op(off);
                return;
            }
        }

        self.logger.error(
            LogCode::NoDefaultConstructor,
            span,
            format!("Type '{}' has no constructor matching the arguments", tp.name),
        );
    }

    // ------------------------------------------------------------------
    // Conversion
    // ------------------------------------------------------------------

    /// Lower an expression and collapse pointer-to-primitive values into
    /// loaded rvalues where an operand is expected.
    pub fn lower_rvalue(&mut self, e: &Expr) -> Value {
        let v = self.lower_expr(e);
        self.rvalue(v)
    }

    /// Collapse a pointer to a primitive into the loaded value.
    pub fn rvalue(&mut self, v: Value) -> Value {
        let is_prim = self
            .type_of(v.type_id)
            .map(|t| t.meta.is_primitive)
            .unwrap_or(false);
        if v.is_pointer && is_prim {
            let f = self.cur();
            let dst = f.val(v.type_id);
            let zero = f.imm_u32(0);
            f.add(Opcode::Load).op(dst.clone()).op(v).op(zero);
            return dst;
        }
        v
    }

    /// Convert a value to a target type, emitting `cvt` where needed.
    pub fn convert(&mut self, v: Value, to: TypeId, span: SourceSpan) -> Value {
        if v.type_id == to || v.is_poison() {
            return v;
        }
        if matches!(v.kind, ValueKind::Null) {
            let f = self.cur();
            return f.imm_u(0, to);
        }

        let from_tp = self.type_of(v.type_id);
        let to_tp = self.type_of(to);
        let (Some(from_tp), Some(to_tp)) = (from_tp, to_tp) else {
            return self.error_value(LogCode::UnknownType, span, "Conversion between unknown types");
        };

        // Pointer-typed values of the target type need no emission
        if v.is_pointer && from_tp.id == to_tp.id {
            return v;
        }

        if from_tp.meta.is_primitive && to_tp.meta.is_primitive {
            // Immediates convert at compile time
            if let Some(imm) = v.imm_value() {
                return self.convert_imm(imm, &from_tp, &to_tp);
            }
            let f = self.cur();
            let dst = f.val(to);
            let tp_imm = Value::imm(ImmValue::U(to.0), f.builtins().u64_t);
            f.add(Opcode::Cvt).op(dst.clone()).op(v).op(tp_imm);
            return dst;
        }

        if !from_tp.is_convertible_to(&to_tp, self.types) {
            return self.error_value(
                LogCode::TypeMismatch,
                span,
                format!(
                    "Type '{}' is not convertible to '{}'",
                    from_tp.name, to_tp.name
                ),
            );
        }

        // Converting constructor on the target type
        if to_tp.find_constructor(&[from_tp.id], self.types).is_some() {
            let size = to_tp.meta.size.max(8);
            let (dst, alloc) = {
                let f = self.cur();
                f.stack(to, size)
            };
            self.construct_at(to, dst.clone(), vec![v], span);
            let obj = ScopedObject {
                alloc: Some(alloc),
                ptr: dst.clone(),
                type_id: to,
            };
            self.scopes().add_stack_object(obj);
            return dst;
        }

        self.error_value(
            LogCode::TypeMismatch,
            span,
            format!("Cannot convert '{}' to '{}'", from_tp.name, to_tp.name),
        )
    }

    fn convert_imm(&mut self, imm: ImmValue, from: &Arc<DataType>, to: &Arc<DataType>) -> Value {
        let out = if to.meta.is_floating_point {
            let as_f = match imm {
                ImmValue::F(x) => x,
                ImmValue::I(x) => x as f64,
                ImmValue::U(x) => x as f64,
            };
            ImmValue::F(as_f)
        } else if from.meta.is_floating_point {
            let x = match imm {
                ImmValue::F(x) => x,
                ImmValue::I(x) => x as f64,
                ImmValue::U(x) => x as f64,
            };
            if to.meta.is_unsigned {
                ImmValue::U(x as u64)
            } else {
                ImmValue::I(x as i64)
            }
        } else if to.meta.is_unsigned {
            ImmValue::U(imm.as_u64())
        } else {
            ImmValue::I(imm.as_i64())
        };
        Value::imm(out, to.id)
    }
}

fn arith_opcode(op: BinaryOp, c: NumClass) -> Opcode {
    use BinaryOp::*;
    use NumClass::*;
    match (op, c) {
        (Add, Int) => Opcode::IAdd,
        (Add, Uint) => Opcode::UAdd,
        (Add, F32) => Opcode::FAdd,
        (Add, F64) => Opcode::DAdd,
        (Sub, Int) => Opcode::ISub,
        (Sub, Uint) => Opcode::USub,
        (Sub, F32) => Opcode::FSub,
        (Sub, F64) => Opcode::DSub,
        (Mul, Int) => Opcode::IMul,
        (Mul, Uint) => Opcode::UMul,
        (Mul, F32) => Opcode::FMul,
        (Mul, F64) => Opcode::DMul,
        (Div, Int) => Opcode::IDiv,
        (Div, Uint) => Opcode::UDiv,
        (Div, F32) => Opcode::FDiv,
        (Div, F64) => Opcode::DDiv,
        (Mod, Int) => Opcode::IMod,
        (Mod, Uint) => Opcode::UMod,
        (Mod, F32) => Opcode::FMod,
        (Mod, F64) => Opcode::DMod,
        _ => Opcode::Noop,
    }
}

fn compare_opcode(op: BinaryOp, c: NumClass) -> Opcode {
    use BinaryOp::*;
    use NumClass::*;
    match (op, c) {
        (Lt, Int) => Opcode::ILt,
        (Lt, Uint) => Opcode::ULt,
        (Lt, F32) => Opcode::FLt,
        (Lt, F64) => Opcode::DLt,
        (LtEq, Int) => Opcode::ILte,
        (LtEq, Uint) => Opcode::ULte,
        (LtEq, F32) => Opcode::FLte,
        (LtEq, F64) => Opcode::DLte,
        (Gt, Int) => Opcode::IGt,
        (Gt, Uint) => Opcode::UGt,
        (Gt, F32) => Opcode::FGt,
        (Gt, F64) => Opcode::DGt,
        (GtEq, Int) => Opcode::IGte,
        (GtEq, Uint) => Opcode::UGte,
        (GtEq, F32) => Opcode::FGte,
        (GtEq, F64) => Opcode::DGte,
        (Eq, Int) => Opcode::IEq,
        (Eq, Uint) => Opcode::UEq,
        (Eq, F32) => Opcode::FEq,
        (Eq, F64) => Opcode::DEq,
        (NotEq, Int) => Opcode::INeq,
        (NotEq, Uint) => Opcode::UNeq,
        (NotEq, F32) => Opcode::FNeq,
        (NotEq, F64) => Opcode::DNeq,
        _ => Opcode::Noop,
    }
}
