//! Per-function IR builder
//!
//! Owns the linear instruction vector and the label/register/stack
//! counters, manages the implicit pseudo-values (`@ectx`, `@fptr`,
//! `@ret`, `@caps`, `this`, `@poison`) and the argument list, and
//! guarantees a trailing `ret` on exit.

use crate::builtins::Builtins;
use crate::compiler::ir::{
    AllocId, ImmValue, Instruction, InstructionRef, LabelId, Opcode, VRegId, Value, ValueKind,
};
use crate::lexer::SourceSpan;
use crate::runtime::execution::call_context;
use crate::types::{ArgKind, FunctionArg, FunctionId, ModuleId, TypeId};

/// Chainable reference to a just-emitted instruction.
pub struct InstrBuilder<'a> {
    func: &'a mut FunctionDef,
    index: usize,
}

impl<'a> InstrBuilder<'a> {
    /// Append an operand.
    pub fn op(self, v: Value) -> Self {
        self.func.code[self.index].operands.push(v);
        self
    }

    /// Append a label operand.
    pub fn label(self, l: LabelId) -> Self {
        let tp = self.func.builtins.u32_t;
        self.func.code[self.index]
            .operands
            .push(Value::imm(ImmValue::U(l as u64), tp));
        self
    }

    /// Append a function-id operand.
    pub fn func_id(self, f: FunctionId) -> Self {
        let tp = self.func.builtins.u32_t;
        self.func.code[self.index]
            .operands
            .push(Value::imm(ImmValue::U(f.0 as u64), tp));
        self
    }

    /// Attach a comment shown in IR dumps.
    pub fn comment(self, c: &str) -> Self {
        self.func.code[self.index].comment = Some(c.to_string());
        self
    }

    /// Index of the instruction for later patching.
    pub fn index(&self) -> InstructionRef {
        InstructionRef(self.index)
    }
}

/// IR under construction for one function.
#[derive(Debug)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Module the function belongs to
    pub module: ModuleId,
    /// Declared return type
    pub ret_type: TypeId,
    /// Whether the return type was explicitly declared
    pub ret_type_set: bool,
    /// Receiver type for methods
    pub this_type: Option<TypeId>,
    /// Emitted instructions
    pub code: Vec<Instruction>,
    /// Explicit argument descriptors (no implicit entries)
    pub arg_info: Vec<FunctionArg>,
    /// Explicit argument names
    pub arg_names: Vec<String>,
    /// Declaration site
    pub span: SourceSpan,
    /// Current source location for newly added instructions
    pub current_span: SourceSpan,
    /// Registered output function id once resolved
    pub output: Option<FunctionId>,
    /// Treat as method when building the signature
    pub is_method: bool,

    builtins: Builtins,
    next_reg: VRegId,
    next_label: LabelId,
    next_alloc: AllocId,
    args: Vec<Value>,

    cctx_val: Value,
    ectx_val: Option<Value>,
    fptr_val: Option<Value>,
    retp_val: Option<Value>,
    caps_val: Option<Value>,
    this_val: Option<Value>,
    poison_val: Value,
}

impl FunctionDef {
    /// New builder for a function or method.
    pub fn new(
        name: &str,
        module: ModuleId,
        this_type: Option<TypeId>,
        builtins: Builtins,
        span: SourceSpan,
    ) -> Self {
        let mut cctx = Value::new(ValueKind::Arg(0), builtins.ptr_t);
        cctx.is_pointer = true;
        cctx.is_argument = true;

        let mut poison = Value::poison(builtins.poison_t);
        poison.name = Some("@poison".into());

        Self {
            name: name.to_string(),
            module,
            ret_type: builtins.void_t,
            ret_type_set: false,
            this_type,
            code: Vec::new(),
            arg_info: Vec::new(),
            arg_names: Vec::new(),
            span,
            current_span: span,
            output: None,
            is_method: this_type.is_some(),
            builtins,
            next_reg: 1,
            next_label: 1,
            next_alloc: 1,
            args: Vec::new(),
            cctx_val: cctx,
            ectx_val: None,
            fptr_val: None,
            retp_val: None,
            caps_val: None,
            this_val: None,
            poison_val: poison,
        }
    }

    /// The builtin type ids this builder was created with.
    pub fn builtins(&self) -> Builtins {
        self.builtins
    }

    /// Set the declared return type.
    pub fn set_ret_type(&mut self, tp: TypeId) {
        self.ret_type = tp;
        self.ret_type_set = true;
        if let Some(r) = &mut self.retp_val {
            r.type_id = tp;
        }
    }

    /// Append an instruction and return a chainable builder for its
    /// operands.
    pub fn add(&mut self, op: Opcode) -> InstrBuilder<'_> {
        self.code.push(Instruction::new(op, self.current_span));
        let index = self.code.len() - 1;
        InstrBuilder { func: self, index }
    }

    /// Fresh anonymous virtual register of a type.
    pub fn val(&mut self, tp: TypeId) -> Value {
        let id = self.next_reg;
        self.next_reg += 1;
        Value::reg(id, tp)
    }

    /// Fresh named virtual register of a type.
    pub fn named_val(&mut self, name: &str, tp: TypeId) -> Value {
        let mut v = self.val(tp);
        v.name = Some(name.to_string());
        v
    }

    /// Lift an anonymous temporary into a named symbol.
    pub fn promote(&mut self, v: &Value, name: &str) -> Value {
        let mut named = v.clone();
        named.name = Some(name.to_string());
        named
    }

    /// Unsigned immediate.
    pub fn imm_u(&self, v: u64, tp: TypeId) -> Value {
        Value::imm(ImmValue::U(v), tp)
    }

    /// Signed immediate.
    pub fn imm_i(&self, v: i64, tp: TypeId) -> Value {
        Value::imm(ImmValue::I(v), tp)
    }

    /// Floating-point immediate.
    pub fn imm_f(&self, v: f64, tp: TypeId) -> Value {
        Value::imm(ImmValue::F(v), tp)
    }

    /// `u32` immediate with the builtin type.
    pub fn imm_u32(&self, v: u32) -> Value {
        self.imm_u(v as u64, self.builtins.u32_t)
    }

    /// Emit a label at the current position and return its id.
    pub fn label(&mut self) -> LabelId {
        let l = self.next_label;
        self.next_label += 1;
        self.add(Opcode::Label).label(l);
        l
    }

    /// Reserve a label id without emitting it yet; place it later with
    /// [`FunctionDef::place_label`].
    pub fn reserve_label(&mut self) -> LabelId {
        let l = self.next_label;
        self.next_label += 1;
        l
    }

    /// Emit a previously reserved label at the current position.
    pub fn place_label(&mut self, l: LabelId) {
        self.add(Opcode::Label).label(l);
    }

    /// Reserve a stack allocation id.
    pub fn reserve_stack_id(&mut self) -> AllocId {
        let id = self.next_alloc;
        self.next_alloc += 1;
        id
    }

    /// Allocate stack storage for a type and return a pointer-typed
    /// value addressing it. The caller decides whether to register the
    /// allocation with the current scope.
    pub fn stack(&mut self, tp: TypeId, size: u32) -> (Value, AllocId) {
        let id = self.reserve_stack_id();
        let size_imm = self.imm_u32(size);
        let id_imm = self.imm_u32(id);
        self.add(Opcode::StackAllocate).op(size_imm).op(id_imm);

        let mut ptr = self.val(tp);
        let id_imm = self.imm_u32(id);
        self.add(Opcode::StackPtr).op(ptr.clone()).op(id_imm);
        ptr.is_pointer = true;
        ptr.stack_src = Some(id);
        (ptr, id)
    }

    /// Free a stack allocation.
    pub fn stack_free(&mut self, id: AllocId) {
        let id_imm = self.imm_u32(id);
        self.add(Opcode::StackFree).op(id_imm);
    }

    /// Declare an explicit argument.
    pub fn add_arg(&mut self, name: &str, tp: TypeId, is_primitive: bool, is_function: bool) {
        self.arg_info.push(FunctionArg {
            kind: if is_primitive {
                ArgKind::Value
            } else {
                ArgKind::Pointer
            },
            type_id: tp,
        });
        self.arg_names.push(name.to_string());

        let mut v = Value::new(ValueKind::Arg(self.args.len() as u32 + 1), tp);
        v.name = Some(name.to_string());
        v.is_argument = true;
        v.is_function = is_function;
        v.is_pointer = !is_primitive;
        self.args.push(v);
    }

    /// Explicit argument count.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Explicit argument value by index.
    pub fn arg(&self, idx: usize) -> Option<&Value> {
        self.args.get(idx)
    }

    /// The call-context pointer (argument zero).
    pub fn cctx(&self) -> Value {
        self.cctx_val.clone()
    }

    /// The execution context pseudo-value; valid after
    /// [`FunctionDef::on_enter`].
    pub fn ectx(&self) -> Value {
        self.ectx_val.clone().unwrap_or_else(|| self.poison())
    }

    /// The function pointer pseudo-value.
    pub fn fptr(&self) -> Value {
        self.fptr_val.clone().unwrap_or_else(|| self.poison())
    }

    /// The return pointer pseudo-value.
    pub fn ret_ptr(&self) -> Value {
        self.retp_val.clone().unwrap_or_else(|| self.poison())
    }

    /// The capture pointer pseudo-value.
    pub fn captures(&self) -> Value {
        self.caps_val.clone().unwrap_or_else(|| self.poison())
    }

    /// The `this` pseudo-value, if this is a method.
    pub fn this(&self) -> Option<Value> {
        self.this_val.clone()
    }

    /// The poison sentinel.
    pub fn poison(&self) -> Value {
        self.poison_val.clone()
    }

    /// A typed null value.
    pub fn null(&self) -> Value {
        let mut v = Value::imm(ImmValue::U(0), self.builtins.null_t);
        v.kind = ValueKind::Null;
        v
    }

    /// Emit the implicit argument setup: load `@ectx`, `@fptr`, `@ret`,
    /// `@caps` and optionally `this` from the call context pointer
    /// passed as the zeroth argument.
    pub fn on_enter(&mut self) {
        let cctx = self.cctx();

        let mut e = self.named_val("@ectx", self.builtins.ectx_t);
        e.is_pointer = true;
        let off = self.imm_u32(call_context::ECTX);
        self.add(Opcode::Load).op(e.clone()).op(cctx.clone()).op(off);
        self.ectx_val = Some(e);

        let mut fp = self.named_val("@fptr", self.builtins.ptr_t);
        fp.is_pointer = true;
        let off = self.imm_u32(call_context::FUNC_PTR);
        self.add(Opcode::Load).op(fp.clone()).op(cctx.clone()).op(off);
        self.fptr_val = Some(fp);

        let ret_tp = if self.ret_type_set {
            self.ret_type
        } else {
            self.builtins.ptr_t
        };
        let mut rp = self.named_val("@ret", ret_tp);
        rp.is_pointer = true;
        let off = self.imm_u32(call_context::RET_PTR);
        self.add(Opcode::Load).op(rp.clone()).op(cctx.clone()).op(off);
        self.retp_val = Some(rp);

        let mut cp = self.named_val("@caps", self.builtins.ptr_t);
        cp.is_pointer = true;
        let off = self.imm_u32(call_context::CAPTURE_PTR);
        self.add(Opcode::Load).op(cp.clone()).op(cctx.clone()).op(off);
        self.caps_val = Some(cp);

        if let Some(this_tp) = self.this_type {
            let mut t = self.named_val("this", this_tp);
            t.is_pointer = true;
            let off = self.imm_u32(call_context::THIS_PTR);
            self.add(Opcode::Load).op(t.clone()).op(cctx).op(off);
            self.this_val = Some(t);
        }
    }

    /// Whether the last emitted instruction is a `ret`.
    pub fn ends_with_ret(&self) -> bool {
        self.code.last().map(|i| i.op == Opcode::Ret).unwrap_or(false)
    }

    /// Append the final `ret`. The compiler calls this after checking
    /// the declared return type; a non-void function without a trailing
    /// return is reported before getting here.
    pub fn emit_final_ret(&mut self) {
        if !self.ends_with_ret() {
            self.add(Opcode::Ret);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    fn builder() -> FunctionDef {
        let mut reg = TypeRegistry::new();
        let b = Builtins::register(&mut reg);
        FunctionDef::new("f", ModuleId(1), None, b, SourceSpan::default())
    }

    #[test]
    fn enter_emits_implicit_loads() {
        let mut f = builder();
        f.on_enter();
        // @ectx, @fptr, @ret, @caps
        assert_eq!(f.code.len(), 4);
        assert!(f.code.iter().all(|i| i.op == Opcode::Load));
        assert_eq!(f.ectx().name.as_deref(), Some("@ectx"));
    }

    #[test]
    fn methods_also_load_this() {
        let mut reg = TypeRegistry::new();
        let b = Builtins::register(&mut reg);
        let mut f = FunctionDef::new("m", ModuleId(1), Some(b.i32_t), b, SourceSpan::default());
        f.on_enter();
        assert_eq!(f.code.len(), 5);
        assert!(f.this().is_some());
    }

    #[test]
    fn register_ids_are_dense() {
        let mut f = builder();
        let b = f.builtins();
        let a = f.val(b.i32_t);
        let c = f.val(b.i32_t);
        assert_eq!(a.reg_id(), Some(1));
        assert_eq!(c.reg_id(), Some(2));
    }

    #[test]
    fn stack_emits_allocate_and_ptr() {
        let mut f = builder();
        let b = f.builtins();
        let (ptr, id) = f.stack(b.i32_t, 4);
        assert!(ptr.is_pointer);
        assert_eq!(ptr.stack_src, Some(id));
        assert_eq!(f.code[0].op, Opcode::StackAllocate);
        assert_eq!(f.code[1].op, Opcode::StackPtr);
    }

    #[test]
    fn final_ret_is_emitted_once() {
        let mut f = builder();
        f.emit_final_ret();
        f.emit_final_ret();
        assert_eq!(f.code.len(), 1);
        assert_eq!(f.code[0].op, Opcode::Ret);
    }
}
