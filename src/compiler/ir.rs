//! Three-address intermediate representation
//!
//! Instructions hold an opcode, up to three operands and a source span.
//! A static table describes each opcode: operand count, per-operand kind,
//! which operand (if any) is assigned, and whether the instruction has
//! side effects. The register allocator and the optimizer consult the
//! table rather than matching on opcodes.

use crate::lexer::SourceSpan;
use crate::types::{ModuleId, TypeId};

/// Virtual register id, dense per function
pub type VRegId = u32;
/// Label id, dense per function
pub type LabelId = u32;
/// Stack allocation id, dense per function
pub type AllocId = u32;

/// IR opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    Noop,
    Label,
    StackAllocate,
    StackPtr,
    StackFree,
    ModuleData,
    Reserve,
    Resolve,
    Load,
    Store,
    Jump,
    Cvt,
    Param,
    Call,
    Ret,
    Branch,
    IAdd,
    UAdd,
    FAdd,
    DAdd,
    ISub,
    USub,
    FSub,
    DSub,
    IMul,
    UMul,
    FMul,
    DMul,
    IDiv,
    UDiv,
    FDiv,
    DDiv,
    IMod,
    UMod,
    FMod,
    DMod,
    ILt,
    ULt,
    FLt,
    DLt,
    ILte,
    ULte,
    FLte,
    DLte,
    IGt,
    UGt,
    FGt,
    DGt,
    IGte,
    UGte,
    FGte,
    DGte,
    IEq,
    UEq,
    FEq,
    DEq,
    INeq,
    UNeq,
    FNeq,
    DNeq,
    IInc,
    UInc,
    FInc,
    DInc,
    IDec,
    UDec,
    FDec,
    DDec,
    INeg,
    FNeg,
    DNeg,
    Not,
    Inv,
    Shl,
    Shr,
    LAnd,
    BAnd,
    LOr,
    BOr,
    Xor,
    Assign,
}

/// Number of IR opcodes
pub const OPCODE_COUNT: usize = Opcode::Assign as usize + 1;

/// What an operand slot accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Virtual register
    Reg,
    /// Register or immediate
    Val,
    /// Immediate only
    Imm,
    /// Label id
    Lbl,
    /// Function id
    Fun,
    /// Slot unused
    Nil,
}

/// Static description of one opcode
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    /// Mnemonic
    pub name: &'static str,
    /// How many operands the opcode takes
    pub operand_count: u8,
    /// Kind accepted at each operand slot
    pub operands: [OperandKind; 3],
    /// Which operand index the instruction assigns, if any
    pub assigns_operand: Option<u8>,
    /// Whether the instruction must never be eliminated
    pub has_side_effects: bool,
}

use OperandKind::{Fun, Imm as OImm, Lbl, Nil, Reg, Val};

const fn info(
    name: &'static str,
    operand_count: u8,
    operands: [OperandKind; 3],
    assigns_operand: Option<u8>,
    has_side_effects: bool,
) -> OpcodeInfo {
    OpcodeInfo {
        name,
        operand_count,
        operands,
        assigns_operand,
        has_side_effects,
    }
}

const fn binary(name: &'static str) -> OpcodeInfo {
    info(name, 3, [Reg, Val, Val], Some(0), false)
}

const fn unary(name: &'static str) -> OpcodeInfo {
    info(name, 2, [Reg, Val, Nil], Some(0), false)
}

const fn step(name: &'static str) -> OpcodeInfo {
    info(name, 1, [Reg, Nil, Nil], Some(0), false)
}

/// Static opcode table, indexed by `Opcode as usize`
pub const OPCODE_INFO: [OpcodeInfo; OPCODE_COUNT] = [
    info("noop", 0, [Nil, Nil, Nil], None, false),
    info("label", 1, [Lbl, Nil, Nil], None, false),
    info("stack_allocate", 2, [OImm, OImm, Nil], None, false),
    info("stack_ptr", 2, [Reg, OImm, Nil], Some(0), false),
    info("stack_free", 1, [OImm, Nil, Nil], None, false),
    info("module_data", 3, [Reg, OImm, OImm], Some(0), false),
    info("reserve", 1, [Reg, Nil, Nil], Some(0), false),
    info("resolve", 2, [Reg, Val, Nil], None, false),
    info("load", 3, [Reg, Reg, OImm], Some(0), false),
    info("store", 3, [Val, Reg, OImm], None, false),
    info("jump", 1, [Lbl, Nil, Nil], None, false),
    info("cvt", 3, [Reg, Val, OImm], Some(0), false),
    info("param", 2, [Val, OImm, Nil], None, false),
    info("call", 1, [Fun, Nil, Nil], None, true),
    info("ret", 0, [Nil, Nil, Nil], None, false),
    info("branch", 3, [Reg, Lbl, Lbl], None, false),
    binary("iadd"),
    binary("uadd"),
    binary("fadd"),
    binary("dadd"),
    binary("isub"),
    binary("usub"),
    binary("fsub"),
    binary("dsub"),
    binary("imul"),
    binary("umul"),
    binary("fmul"),
    binary("dmul"),
    binary("idiv"),
    binary("udiv"),
    binary("fdiv"),
    binary("ddiv"),
    binary("imod"),
    binary("umod"),
    binary("fmod"),
    binary("dmod"),
    binary("ilt"),
    binary("ult"),
    binary("flt"),
    binary("dlt"),
    binary("ilte"),
    binary("ulte"),
    binary("flte"),
    binary("dlte"),
    binary("igt"),
    binary("ugt"),
    binary("fgt"),
    binary("dgt"),
    binary("igte"),
    binary("ugte"),
    binary("fgte"),
    binary("dgte"),
    binary("ieq"),
    binary("ueq"),
    binary("feq"),
    binary("deq"),
    binary("ineq"),
    binary("uneq"),
    binary("fneq"),
    binary("dneq"),
    step("iinc"),
    step("uinc"),
    step("finc"),
    step("dinc"),
    step("idec"),
    step("udec"),
    step("fdec"),
    step("ddec"),
    unary("ineg"),
    unary("fneg"),
    unary("dneg"),
    unary("not"),
    unary("inv"),
    binary("shl"),
    binary("shr"),
    binary("land"),
    binary("band"),
    binary("lor"),
    binary("bor"),
    binary("xor"),
    unary("assign"),
];

impl Opcode {
    /// Static description of this opcode
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_INFO[self as usize]
    }
}

/// Immediate constant payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImmValue {
    /// Signed integer
    I(i64),
    /// Unsigned integer
    U(u64),
    /// Floating point
    F(f64),
}

impl ImmValue {
    /// Raw 64-bit representation
    pub fn bits(self) -> u64 {
        match self {
            ImmValue::I(v) => v as u64,
            ImmValue::U(v) => v,
            ImmValue::F(v) => v.to_bits(),
        }
    }

    /// As unsigned, truncating
    pub fn as_u64(self) -> u64 {
        match self {
            ImmValue::I(v) => v as u64,
            ImmValue::U(v) => v,
            ImmValue::F(v) => v as u64,
        }
    }

    /// As signed, truncating
    pub fn as_i64(self) -> i64 {
        match self {
            ImmValue::I(v) => v,
            ImmValue::U(v) => v as i64,
            ImmValue::F(v) => v as i64,
        }
    }
}

/// Storage class of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// Virtual register (physical register index after allocation)
    Reg(VRegId),
    /// Immediate constant
    Imm(ImmValue),
    /// Reference to a stack allocation
    Stack(AllocId),
    /// Spill slot assigned by the register allocator; the payload is a
    /// byte offset inside the function's spill area
    Spill(u32),
    /// Reference to a module data slot
    ModuleData {
        /// Owning module
        module: ModuleId,
        /// Slot index
        slot: u32,
    },
    /// Function argument by index (0 is the call context pointer)
    Arg(u32),
    /// The null sentinel
    Null,
    /// Error sentinel; lowering substitutes this after reporting an
    /// error so compilation can continue
    Poison,
}

/// An operand of an IR instruction: a typed reference to a register,
/// constant, stack slot, module data slot or argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    /// Storage class
    pub kind: ValueKind,
    /// Static type
    pub type_id: TypeId,
    /// Symbol name, for named values
    pub name: Option<String>,
    /// Value is a pointer to storage of `type_id`
    pub is_pointer: bool,
    /// Value is a function argument
    pub is_argument: bool,
    /// Value holds a callable
    pub is_function: bool,
    /// Stack allocation backing this pointer, for scoped destruction
    pub stack_src: Option<AllocId>,
}

impl Value {
    /// Fresh value of a storage class and type
    pub fn new(kind: ValueKind, type_id: TypeId) -> Self {
        Self {
            kind,
            type_id,
            name: None,
            is_pointer: false,
            is_argument: false,
            is_function: false,
            stack_src: None,
        }
    }

    /// Virtual register value
    pub fn reg(id: VRegId, type_id: TypeId) -> Self {
        Self::new(ValueKind::Reg(id), type_id)
    }

    /// Immediate value
    pub fn imm(v: ImmValue, type_id: TypeId) -> Self {
        Self::new(ValueKind::Imm(v), type_id)
    }

    /// Poison value
    pub fn poison(type_id: TypeId) -> Self {
        Self::new(ValueKind::Poison, type_id)
    }

    /// Register id, if this is a register
    pub fn reg_id(&self) -> Option<VRegId> {
        match self.kind {
            ValueKind::Reg(id) => Some(id),
            _ => None,
        }
    }

    /// Immediate payload, if this is an immediate
    pub fn imm_value(&self) -> Option<ImmValue> {
        match self.kind {
            ValueKind::Imm(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this value is a register reference
    pub fn is_reg(&self) -> bool {
        matches!(self.kind, ValueKind::Reg(_))
    }

    /// Whether this value is an immediate
    pub fn is_imm(&self) -> bool {
        matches!(self.kind, ValueKind::Imm(_))
    }

    /// Whether this value refers to a stack allocation
    pub fn is_stack(&self) -> bool {
        matches!(self.kind, ValueKind::Stack(_))
    }

    /// Whether this value is the poison sentinel
    pub fn is_poison(&self) -> bool {
        matches!(self.kind, ValueKind::Poison)
    }

    /// Display name or a placeholder
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anon>")
    }
}

/// One IR instruction
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Operation
    pub op: Opcode,
    /// Operand slots; only the first `operand_count` are meaningful
    pub operands: Vec<Value>,
    /// Source location the instruction was lowered from
    pub span: SourceSpan,
    /// Free-form annotation shown in IR dumps
    pub comment: Option<String>,
}

impl Instruction {
    /// New instruction with no operands yet
    pub fn new(op: Opcode, span: SourceSpan) -> Self {
        Self {
            op,
            operands: Vec::with_capacity(3),
            span,
            comment: None,
        }
    }

    /// The operand this instruction assigns, if any
    pub fn assigns(&self) -> Option<&Value> {
        let idx = self.op.info().assigns_operand? as usize;
        self.operands.get(idx)
    }

    /// Whether the instruction references virtual register `reg`.
    ///
    /// With `exclude_assignment` set, a pure assignment at the assigned
    /// operand slot does not count; single-operand read-modify-write
    /// opcodes (inc/dec) still do.
    pub fn involves(&self, reg: VRegId, exclude_assignment: bool) -> bool {
        let info = self.op.info();
        for (i, operand) in self.operands.iter().enumerate() {
            if operand.reg_id() != Some(reg) {
                continue;
            }
            if Some(i as u8) == info.assigns_operand {
                let reads_before_assign = info.operand_count == 1;
                if !reads_before_assign && exclude_assignment {
                    continue;
                }
            }
            return true;
        }
        false
    }

    /// Label operand at slot `idx`, if present and an immediate
    pub fn label_at(&self, idx: usize) -> Option<LabelId> {
        if self.op.info().operands.get(idx) != Some(&Lbl) {
            return None;
        }
        self.operands.get(idx)?.imm_value().map(|v| v.as_u64() as LabelId)
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.op == Opcode::Noop {
            if let Some(c) = &self.comment {
                return write!(f, "; {}", c);
            }
        }
        let inf = self.op.info();
        write!(f, "{}", inf.name)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i as u8 >= inf.operand_count {
                break;
            }
            match (&inf.operands[i], &operand.kind) {
                (Lbl, ValueKind::Imm(v)) => write!(f, " LABEL_{}", v.as_u64())?,
                (Fun, ValueKind::Imm(v)) => write!(f, " <fn {}>", v.as_u64())?,
                (_, ValueKind::Reg(id)) => {
                    if let Some(n) = &operand.name {
                        write!(f, " %{}({})", id, n)?;
                    } else {
                        write!(f, " %{}", id)?;
                    }
                }
                (_, ValueKind::Imm(ImmValue::I(v))) => write!(f, " {}", v)?,
                (_, ValueKind::Imm(ImmValue::U(v))) => write!(f, " {}", v)?,
                (_, ValueKind::Imm(ImmValue::F(v))) => write!(f, " {}", v)?,
                (_, ValueKind::Stack(id)) => write!(f, " stack[{}]", id)?,
                (_, ValueKind::Spill(off)) => write!(f, " spill[{}]", off)?,
                (_, ValueKind::ModuleData { module, slot }) => {
                    write!(f, " data[{}:{}]", module.0, slot)?
                }
                (_, ValueKind::Arg(i)) => write!(f, " arg[{}]", i)?,
                (_, ValueKind::Null) => write!(f, " null")?,
                (_, ValueKind::Poison) => write!(f, " poison")?,
            }
        }
        if let Some(c) = &self.comment {
            write!(f, " ; {}", c)?;
        }
        Ok(())
    }
}

/// Index of an emitted instruction inside its function, used to patch
/// operands after emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionRef(pub usize);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::type_id_from_name;

    #[test]
    fn table_covers_every_opcode() {
        // The last entry must describe the last opcode.
        assert_eq!(OPCODE_INFO.len(), OPCODE_COUNT);
        assert_eq!(Opcode::Assign.info().name, "assign");
        assert_eq!(Opcode::Noop.info().operand_count, 0);
        assert_eq!(Opcode::Call.info().has_side_effects, true);
    }

    #[test]
    fn assigns_follows_table() {
        let tp = type_id_from_name("i32");
        let mut i = Instruction::new(Opcode::IAdd, SourceSpan::default());
        i.operands.push(Value::reg(1, tp));
        i.operands.push(Value::reg(2, tp));
        i.operands.push(Value::imm(ImmValue::I(1), tp));
        assert_eq!(i.assigns().and_then(Value::reg_id), Some(1));

        let mut store = Instruction::new(Opcode::Store, SourceSpan::default());
        store.operands.push(Value::reg(1, tp));
        store.operands.push(Value::reg(2, tp));
        store.operands.push(Value::imm(ImmValue::U(0), tp));
        assert!(store.assigns().is_none());
    }

    #[test]
    fn involves_respects_assignment_exclusion() {
        let tp = type_id_from_name("i32");
        let mut i = Instruction::new(Opcode::IAdd, SourceSpan::default());
        i.operands.push(Value::reg(1, tp));
        i.operands.push(Value::reg(2, tp));
        i.operands.push(Value::reg(3, tp));
        assert!(i.involves(1, false));
        assert!(!i.involves(1, true));
        assert!(i.involves(2, true));

        // inc reads the register before writing it
        let mut inc = Instruction::new(Opcode::IInc, SourceSpan::default());
        inc.operands.push(Value::reg(1, tp));
        assert!(inc.involves(1, true));
    }
}
