//! VM instruction encoding
//!
//! An instruction is a 64-bit word with bit fields for the opcode,
//! three operand register slots, per-operand assigned flags and an
//! immediate-is-float flag, plus a separate 64-bit immediate payload.
//! The builder asserts that each appended operand is legal for the
//! opcode at the next free slot; the family classification below is the
//! single source of truth for what each opcode accepts.

use num_enum::TryFromPrimitive;

use super::registers::VmReg;

/// VM opcodes.
///
/// Vector instructions operate on memory-resident 2/3/4-vectors whose
/// addresses are held in general-purpose registers; the `dot` variants
/// write their scalar result to a floating-point register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum VmOp {
    Null = 0,
    Term,

    // memory
    Ld8,
    Ld16,
    Ld32,
    Ld64,
    St8,
    St16,
    St32,
    St64,
    Mptr,
    Mtfp,
    Mffp,

    // vector operations
    V2fAdd,
    V2fSub,
    V2fMul,
    V2fDiv,
    V2fNeg,
    V2fDot,
    V2dAdd,
    V2dSub,
    V2dMul,
    V2dDiv,
    V2dNeg,
    V2dDot,
    V3fAdd,
    V3fSub,
    V3fMul,
    V3fDiv,
    V3fNeg,
    V3fDot,
    V3dAdd,
    V3dSub,
    V3dMul,
    V3dDiv,
    V3dNeg,
    V3dDot,
    V4fAdd,
    V4fSub,
    V4fMul,
    V4fDiv,
    V4fNeg,
    V4fDot,
    V4dAdd,
    V4dSub,
    V4dMul,
    V4dDiv,
    V4dNeg,
    V4dDot,
    V3fCross,
    V3dCross,

    // signed arithmetic
    Add,
    Addi,
    Sub,
    Subi,
    Subir,
    Mul,
    Muli,
    Div,
    Divi,
    Divir,
    Neg,

    // unsigned arithmetic
    Addu,
    Addui,
    Subu,
    Subui,
    Subuir,
    Mulu,
    Mului,
    Divu,
    Divui,
    Divuir,

    // integer / floating point conversion
    CvtIf,
    CvtId,
    CvtIu,
    CvtUf,
    CvtUd,
    CvtUi,
    CvtFi,
    CvtFu,
    CvtFd,
    CvtDi,
    CvtDu,
    CvtDf,

    // f32 arithmetic
    Fadd,
    Faddi,
    Fsub,
    Fsubi,
    Fsubir,
    Fmul,
    Fmuli,
    Fdiv,
    Fdivi,
    Fdivir,
    Negf,

    // f64 arithmetic
    Dadd,
    Daddi,
    Dsub,
    Dsubi,
    Dsubir,
    Dmul,
    Dmuli,
    Ddiv,
    Ddivi,
    Ddivir,
    Negd,

    // integer comparison
    Lt,
    Lti,
    Lte,
    Ltei,
    Gt,
    Gti,
    Gte,
    Gtei,
    Cmp,
    Cmpi,
    Ncmp,
    Ncmpi,

    // f32 comparison
    Flt,
    Flti,
    Flte,
    Fltei,
    Fgt,
    Fgti,
    Fgte,
    Fgtei,
    Fcmp,
    Fcmpi,
    Fncmp,
    Fncmpi,

    // f64 comparison
    Dlt,
    Dlti,
    Dlte,
    Dltei,
    Dgt,
    Dgti,
    Dgte,
    Dgtei,
    Dcmp,
    Dcmpi,
    Dncmp,
    Dncmpi,

    // boolean
    And,
    Andi,
    Or,
    Ori,

    // bitwise
    Band,
    Bandi,
    Bor,
    Bori,
    Xor,
    Xori,
    Sl,
    Sli,
    Slir,
    Sr,
    Sri,
    Srir,

    // control flow
    Beqz,
    Bneqz,
    Bgtz,
    Bgtez,
    Bltz,
    Bltez,
    Jmp,
    Jmpr,
    Jal,
    Jalr,
}

/// Number of VM opcodes
pub const VM_OP_COUNT: usize = VmOp::Jalr as usize + 1;

#[inline]
fn between(x: VmOp, lo: VmOp, hi: VmOp) -> bool {
    (x as u8) >= (lo as u8) && (x as u8) <= (hi as u8)
}

impl VmOp {
    /// Family: no operands (`null`, `term`)
    pub fn is_type_0(self) -> bool {
        matches!(self, VmOp::Null | VmOp::Term)
    }

    /// Family: one 64-bit immediate (`jal`, `jmp`)
    pub fn is_type_1(self) -> bool {
        matches!(self, VmOp::Jal | VmOp::Jmp)
    }

    /// Family: one register (`jalr`, `jmpr`, conversions)
    pub fn is_type_2(self) -> bool {
        matches!(self, VmOp::Jalr | VmOp::Jmpr) || between(self, VmOp::CvtIf, VmOp::CvtDf)
    }

    /// Family: one register + one immediate (branches, `mptr`)
    pub fn is_type_3(self) -> bool {
        between(self, VmOp::Beqz, VmOp::Bltez) || self == VmOp::Mptr
    }

    /// Family: two registers (`mtfp`, `mffp`, negations)
    pub fn is_type_4(self) -> bool {
        matches!(
            self,
            VmOp::Mtfp
                | VmOp::Mffp
                | VmOp::Neg
                | VmOp::Negf
                | VmOp::Negd
                | VmOp::V2fNeg
                | VmOp::V2dNeg
                | VmOp::V3fNeg
                | VmOp::V3dNeg
                | VmOp::V4fNeg
                | VmOp::V4dNeg
        )
    }

    /// Family: two registers + one immediate offset (loads, stores)
    pub fn is_type_5(self) -> bool {
        between(self, VmOp::Ld8, VmOp::St64)
    }

    /// Family: two registers + one immediate (arith/compare with imm)
    pub fn is_type_6(self) -> bool {
        matches!(
            self,
            VmOp::Addi
                | VmOp::Subi
                | VmOp::Subir
                | VmOp::Muli
                | VmOp::Divi
                | VmOp::Divir
                | VmOp::Addui
                | VmOp::Subui
                | VmOp::Subuir
                | VmOp::Mului
                | VmOp::Divui
                | VmOp::Divuir
                | VmOp::Lti
                | VmOp::Ltei
                | VmOp::Gti
                | VmOp::Gtei
                | VmOp::Cmpi
                | VmOp::Ncmpi
                | VmOp::Faddi
                | VmOp::Fsubi
                | VmOp::Fsubir
                | VmOp::Fmuli
                | VmOp::Fdivi
                | VmOp::Fdivir
                | VmOp::Flti
                | VmOp::Fltei
                | VmOp::Fgti
                | VmOp::Fgtei
                | VmOp::Fcmpi
                | VmOp::Fncmpi
                | VmOp::Daddi
                | VmOp::Dsubi
                | VmOp::Dsubir
                | VmOp::Dmuli
                | VmOp::Ddivi
                | VmOp::Ddivir
                | VmOp::Dlti
                | VmOp::Dltei
                | VmOp::Dgti
                | VmOp::Dgtei
                | VmOp::Dcmpi
                | VmOp::Dncmpi
                | VmOp::Bandi
                | VmOp::Bori
                | VmOp::Xori
                | VmOp::Sli
                | VmOp::Slir
                | VmOp::Sri
                | VmOp::Srir
                | VmOp::Andi
                | VmOp::Ori
        )
    }

    /// Family: three registers
    pub fn is_type_7(self) -> bool {
        !self.is_type_0()
            && !self.is_type_1()
            && !self.is_type_2()
            && !self.is_type_3()
            && !self.is_type_4()
            && !self.is_type_5()
            && !self.is_type_6()
    }

    /// First operand is a register
    pub fn op1_is_register(self) -> bool {
        !self.is_type_0() && !self.is_type_1()
    }

    /// First operand is an immediate
    pub fn op1_is_immediate(self) -> bool {
        self.is_type_1()
    }

    /// Second operand is a register
    pub fn op2_is_register(self) -> bool {
        !self.is_type_0() && !self.is_type_1() && !self.is_type_2() && !self.is_type_3()
    }

    /// Second operand is an immediate
    pub fn op2_is_immediate(self) -> bool {
        self.is_type_3()
    }

    /// Third operand is a register
    pub fn op3_is_register(self) -> bool {
        self.is_type_7()
    }

    /// Third operand is an immediate
    pub fn op3_is_immediate(self) -> bool {
        self.is_type_5() || self.is_type_6()
    }

    /// Third operand may be a floating-point immediate
    pub fn op3_can_be_float(self) -> bool {
        self.is_type_6()
    }

    /// First operand must be a floating-point register
    pub fn op1_must_be_fpr(self) -> bool {
        self == VmOp::Mffp
            || between(self, VmOp::Fadd, VmOp::Negf)
            || between(self, VmOp::Dadd, VmOp::Negd)
            || matches!(
                self,
                VmOp::V2fDot | VmOp::V2dDot | VmOp::V3fDot | VmOp::V3dDot | VmOp::V4fDot | VmOp::V4dDot
            )
    }

    /// First operand may be a floating-point register
    pub fn op1_can_be_fpr(self) -> bool {
        self.is_type_5()
            || matches!(
                self,
                VmOp::CvtIf
                    | VmOp::CvtId
                    | VmOp::CvtUf
                    | VmOp::CvtUd
                    | VmOp::CvtFi
                    | VmOp::CvtFu
                    | VmOp::CvtFd
                    | VmOp::CvtDi
                    | VmOp::CvtDu
                    | VmOp::CvtDf
            )
    }

    /// Second operand must be a floating-point register
    pub fn op2_must_be_fpr(self) -> bool {
        self == VmOp::Mtfp
            || between(self, VmOp::Fadd, VmOp::Negf)
            || between(self, VmOp::Dadd, VmOp::Negd)
            || between(self, VmOp::Flt, VmOp::Dncmpi)
    }

    /// Third operand must be a floating-point register
    pub fn op3_must_be_fpr(self) -> bool {
        matches!(
            self,
            VmOp::Fadd
                | VmOp::Fsub
                | VmOp::Fmul
                | VmOp::Fdiv
                | VmOp::Dadd
                | VmOp::Dsub
                | VmOp::Dmul
                | VmOp::Ddiv
                | VmOp::Flt
                | VmOp::Flte
                | VmOp::Fgt
                | VmOp::Fgte
                | VmOp::Fcmp
                | VmOp::Fncmp
                | VmOp::Dlt
                | VmOp::Dlte
                | VmOp::Dgt
                | VmOp::Dgte
                | VmOp::Dcmp
                | VmOp::Dncmp
        )
    }

    /// Third operand must be a floating-point immediate
    pub fn op3_must_be_fpi(self) -> bool {
        matches!(
            self,
            VmOp::Faddi
                | VmOp::Fsubi
                | VmOp::Fsubir
                | VmOp::Fmuli
                | VmOp::Fdivi
                | VmOp::Fdivir
                | VmOp::Flti
                | VmOp::Fltei
                | VmOp::Fgti
                | VmOp::Fgtei
                | VmOp::Fcmpi
                | VmOp::Fncmpi
                | VmOp::Daddi
                | VmOp::Dsubi
                | VmOp::Dsubir
                | VmOp::Dmuli
                | VmOp::Ddivi
                | VmOp::Ddivir
                | VmOp::Dlti
                | VmOp::Dltei
                | VmOp::Dgti
                | VmOp::Dgtei
                | VmOp::Dcmpi
                | VmOp::Dncmpi
        )
    }

    /// Mnemonic for disassembly.
    pub fn name(self) -> &'static str {
        VM_OP_NAMES[self as usize]
    }
}

// Bit layout of the instruction word
const OP_SHIFT: u64 = 0;
const OP_MASK: u64 = 0xFF;
const OP1_SHIFT: u64 = 8;
const OP2_SHIFT: u64 = 15;
const OP3_SHIFT: u64 = 22;
const REG_MASK: u64 = 0x7F;
const OP1_ASSIGNED: u64 = 1 << 29;
const OP2_ASSIGNED: u64 = 1 << 30;
const OP3_ASSIGNED: u64 = 1 << 31;
const IMM_IS_FLOAT: u64 = 1 << 32;

/// One encoded VM instruction: the 64-bit word plus its immediate
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmInstruction {
    /// Bit-packed opcode, register fields and flags
    pub code: u64,
    /// Immediate payload (integer bits or f64 bits)
    pub imm: u64,
}

impl VmInstruction {
    /// Start building an instruction for an opcode.
    pub fn new(op: VmOp) -> Self {
        Self {
            code: (op as u64 & OP_MASK) << OP_SHIFT,
            imm: 0,
        }
    }

    /// Decoded opcode, if the word holds a valid one.
    pub fn op(&self) -> Option<VmOp> {
        VmOp::try_from(((self.code >> OP_SHIFT) & OP_MASK) as u8).ok()
    }

    fn flag(&self, f: u64) -> bool {
        self.code & f != 0
    }

    /// Append a register operand at the next slot. Panics if the opcode
    /// does not accept a register there or the register class is wrong.
    pub fn operand_reg(mut self, reg: VmReg) -> Self {
        let op = self.op().expect("building with a valid opcode");
        assert!(!op.is_type_0(), "instruction takes no operands");
        assert!(
            !op.is_type_1(),
            "instruction takes a single immediate operand"
        );
        assert!(!self.flag(OP3_ASSIGNED), "no instruction takes a 4th operand");

        let fpr_ok = |must: bool, can: bool, r: VmReg| {
            if must {
                r.is_fpr() || r == VmReg::Zero
            } else {
                !r.is_fpr() || can
            }
        };

        if self.flag(OP2_ASSIGNED) {
            assert!(op.op3_is_register(), "third operand cannot be a register");
            assert!(
                fpr_ok(op.op3_must_be_fpr(), false, reg),
                "invalid register class for operand 3"
            );
            self.code |= OP3_ASSIGNED | ((reg as u64 & REG_MASK) << OP3_SHIFT);
            return self;
        }
        if self.flag(OP1_ASSIGNED) {
            assert!(op.op2_is_register(), "second operand cannot be a register");
            assert!(
                fpr_ok(op.op2_must_be_fpr(), false, reg),
                "invalid register class for operand 2"
            );
            self.code |= OP2_ASSIGNED | ((reg as u64 & REG_MASK) << OP2_SHIFT);
            return self;
        }
        assert!(op.op1_is_register(), "first operand cannot be a register");
        assert!(
            fpr_ok(op.op1_must_be_fpr(), op.op1_can_be_fpr(), reg),
            "invalid register class for operand 1"
        );
        self.code |= OP1_ASSIGNED | ((reg as u64 & REG_MASK) << OP1_SHIFT);
        self
    }

    /// Append an integer immediate at the next slot.
    pub fn operand_imm(mut self, imm: u64) -> Self {
        let op = self.op().expect("building with a valid opcode");
        assert!(!op.is_type_0(), "instruction takes no operands");
        assert!(!self.flag(OP3_ASSIGNED), "no instruction takes a 4th operand");

        if self.flag(OP2_ASSIGNED) {
            assert!(op.op3_is_immediate(), "third operand is not an immediate");
            assert!(!op.op3_must_be_fpi(), "third operand must be floating point");
            self.code |= OP3_ASSIGNED;
            self.imm = imm;
            return self;
        }
        if self.flag(OP1_ASSIGNED) {
            assert!(op.op2_is_immediate(), "second operand is not an immediate");
            self.code |= OP2_ASSIGNED;
            self.imm = imm;
            return self;
        }
        assert!(op.op1_is_immediate(), "first operand is not an immediate");
        self.code |= OP1_ASSIGNED;
        self.imm = imm;
        self
    }

    /// Append a floating-point immediate as the third operand.
    pub fn operand_fimm(mut self, imm: f64) -> Self {
        let op = self.op().expect("building with a valid opcode");
        assert!(!op.is_type_0(), "instruction takes no operands");
        assert!(!self.flag(OP3_ASSIGNED), "no instruction takes a 4th operand");
        assert!(
            self.flag(OP2_ASSIGNED),
            "float immediates are only valid as the third operand"
        );
        assert!(op.op3_is_immediate(), "third operand is not an immediate");
        assert!(op.op3_can_be_float(), "third operand cannot be a float");
        self.code |= OP3_ASSIGNED | IMM_IS_FLOAT;
        self.imm = imm.to_bits();
        self
    }

    /// First register operand.
    pub fn op1(&self) -> Option<VmReg> {
        if !self.flag(OP1_ASSIGNED) || !self.op()?.op1_is_register() {
            return None;
        }
        VmReg::try_from(((self.code >> OP1_SHIFT) & REG_MASK) as u8).ok()
    }

    /// Second register operand.
    pub fn op2(&self) -> Option<VmReg> {
        if !self.flag(OP2_ASSIGNED) || !self.op()?.op2_is_register() {
            return None;
        }
        VmReg::try_from(((self.code >> OP2_SHIFT) & REG_MASK) as u8).ok()
    }

    /// Third register operand.
    pub fn op3(&self) -> Option<VmReg> {
        if !self.flag(OP3_ASSIGNED) || !self.op()?.op3_is_register() {
            return None;
        }
        VmReg::try_from(((self.code >> OP3_SHIFT) & REG_MASK) as u8).ok()
    }

    /// Immediate payload as unsigned.
    pub fn imm_u(&self) -> u64 {
        self.imm
    }

    /// Immediate payload as signed.
    pub fn imm_i(&self) -> i64 {
        self.imm as i64
    }

    /// Immediate payload as floating point.
    pub fn imm_f(&self) -> f64 {
        f64::from_bits(self.imm)
    }

    /// Whether the immediate payload is a float.
    pub fn imm_is_float(&self) -> bool {
        self.flag(IMM_IS_FLOAT)
    }
}

impl std::fmt::Display for VmInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(op) = self.op() else {
            return write!(f, "<invalid>");
        };
        write!(f, "{:<9}", op.name())?;
        if op.is_type_0() {
            return Ok(());
        }
        if op.is_type_1() {
            return write!(f, "{:#x}", self.imm_u());
        }
        if let Some(r) = self.op1() {
            write!(f, "{}", r)?;
        }
        if op.is_type_3() {
            return write!(f, ", {:#x}", self.imm_u());
        }
        if let Some(r) = self.op2() {
            if op.is_type_5() {
                return write!(f, ", {}({})", self.imm_u(), r);
            }
            write!(f, ", {}", r)?;
        }
        if let Some(r) = self.op3() {
            write!(f, ", {}", r)?;
        } else if op.op3_is_immediate() && op.is_type_6() {
            if self.imm_is_float() {
                write!(f, ", {}", self.imm_f())?;
            } else {
                write!(f, ", {}", self.imm_i())?;
            }
        }
        Ok(())
    }
}

const VM_OP_NAMES: [&str; VM_OP_COUNT] = [
    "null", "term", "ld8", "ld16", "ld32", "ld64", "st8", "st16", "st32", "st64", "mptr", "mtfp",
    "mffp", "v2fadd", "v2fsub", "v2fmul", "v2fdiv", "v2fneg", "v2fdot", "v2dadd", "v2dsub",
    "v2dmul", "v2ddiv", "v2dneg", "v2ddot", "v3fadd", "v3fsub", "v3fmul", "v3fdiv", "v3fneg",
    "v3fdot", "v3dadd", "v3dsub", "v3dmul", "v3ddiv", "v3dneg", "v3ddot", "v4fadd", "v4fsub",
    "v4fmul", "v4fdiv", "v4fneg", "v4fdot", "v4dadd", "v4dsub", "v4dmul", "v4ddiv", "v4dneg",
    "v4ddot", "v3fcross", "v3dcross", "add", "addi", "sub", "subi", "subir", "mul", "muli", "div",
    "divi", "divir", "neg", "addu", "addui", "subu", "subui", "subuir", "mulu", "mului", "divu",
    "divui", "divuir", "cvt.i.f", "cvt.i.d", "cvt.i.u", "cvt.u.f", "cvt.u.d", "cvt.u.i",
    "cvt.f.i", "cvt.f.u", "cvt.f.d", "cvt.d.i", "cvt.d.u", "cvt.d.f", "fadd", "faddi", "fsub",
    "fsubi", "fsubir", "fmul", "fmuli", "fdiv", "fdivi", "fdivir", "negf", "dadd", "daddi",
    "dsub", "dsubi", "dsubir", "dmul", "dmuli", "ddiv", "ddivi", "ddivir", "negd", "lt", "lti",
    "lte", "ltei", "gt", "gti", "gte", "gtei", "cmp", "cmpi", "ncmp", "ncmpi", "flt", "flti",
    "flte", "fltei", "fgt", "fgti", "fgte", "fgtei", "fcmp", "fcmpi", "fncmp", "fncmpi", "dlt",
    "dlti", "dlte", "dltei", "dgt", "dgti", "dgte", "dgtei", "dcmp", "dcmpi", "dncmp", "dncmpi",
    "and", "andi", "or", "ori", "band", "bandi", "bor", "bori", "xor", "xori", "sl", "sli",
    "slir", "sr", "sri", "srir", "beqz", "bneqz", "bgtz", "bgtez", "bltz", "bltez", "jmp",
    "jmpr", "jal", "jalr",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_has_exactly_one_family() {
        for x in 0..VM_OP_COUNT as u8 {
            let op = VmOp::try_from(x).expect("valid opcode");
            let families = [
                op.is_type_0(),
                op.is_type_1(),
                op.is_type_2(),
                op.is_type_3(),
                op.is_type_4(),
                op.is_type_5(),
                op.is_type_6(),
                op.is_type_7(),
            ];
            assert_eq!(
                families.iter().filter(|f| **f).count(),
                1,
                "{:?} must be in exactly one family",
                op
            );
        }
    }

    #[test]
    fn encode_decode_three_registers() {
        let i = VmInstruction::new(VmOp::Add)
            .operand_reg(VmReg::S0)
            .operand_reg(VmReg::S1)
            .operand_reg(VmReg::S2);
        assert_eq!(i.op(), Some(VmOp::Add));
        assert_eq!(i.op1(), Some(VmReg::S0));
        assert_eq!(i.op2(), Some(VmReg::S1));
        assert_eq!(i.op3(), Some(VmReg::S2));
    }

    #[test]
    fn encode_decode_load() {
        let i = VmInstruction::new(VmOp::Ld32)
            .operand_reg(VmReg::S3)
            .operand_reg(VmReg::Sp)
            .operand_imm(16);
        assert_eq!(i.op1(), Some(VmReg::S3));
        assert_eq!(i.op2(), Some(VmReg::Sp));
        assert_eq!(i.op3(), None);
        assert_eq!(i.imm_u(), 16);
    }

    #[test]
    fn encode_decode_float_immediate() {
        let i = VmInstruction::new(VmOp::Faddi)
            .operand_reg(VmReg::F0)
            .operand_reg(VmReg::F1)
            .operand_fimm(2.5);
        assert!(i.imm_is_float());
        assert_eq!(i.imm_f(), 2.5);
    }

    #[test]
    #[should_panic(expected = "invalid register class")]
    fn rejects_gpr_where_fpr_required() {
        let _ = VmInstruction::new(VmOp::Fadd)
            .operand_reg(VmReg::S0);
    }

    #[test]
    #[should_panic(expected = "single immediate")]
    fn rejects_register_on_jmp() {
        let _ = VmInstruction::new(VmOp::Jmp).operand_reg(VmReg::S0);
    }

    #[test]
    fn jal_takes_one_immediate() {
        let i = VmInstruction::new(VmOp::Jal).operand_imm(0x123);
        assert_eq!(i.imm_u(), 0x123);
        assert_eq!(i.op1(), None);
    }
}
