//! Encoder round-trip: for every opcode and every valid operand
//! combination, decoding an encoded instruction yields the original
//! opcode and operands.

use proptest::prelude::*;
use tsn::backend::vm::{VmInstruction, VmOp, VmReg, VM_OP_COUNT};

fn all_ops() -> impl Iterator<Item = VmOp> {
    (0..VM_OP_COUNT as u8).map(|x| VmOp::try_from(x).expect("valid opcode"))
}

/// A register legal for the given operand slot of an opcode.
fn reg_for(op: VmOp, slot: u8, pick: u8) -> VmReg {
    let must_fpr = match slot {
        1 => op.op1_must_be_fpr(),
        2 => op.op2_must_be_fpr(),
        _ => op.op3_must_be_fpr(),
    };
    if must_fpr {
        VmReg::try_from(VmReg::F0 as u8 + (pick % 16)).unwrap()
    } else {
        VmReg::try_from(VmReg::S0 as u8 + (pick % 16)).unwrap()
    }
}

fn encode(op: VmOp, pick: u8, imm: u64, fimm: f64) -> VmInstruction {
    let mut i = VmInstruction::new(op);
    if op.is_type_0() {
        return i;
    }
    if op.is_type_1() {
        return i.operand_imm(imm);
    }
    i = i.operand_reg(reg_for(op, 1, pick));
    if op.is_type_2() {
        return i;
    }
    if op.is_type_3() {
        return i.operand_imm(imm);
    }
    i = i.operand_reg(reg_for(op, 2, pick.wrapping_add(3)));
    if op.is_type_4() {
        return i;
    }
    if op.is_type_5() {
        return i.operand_imm(imm);
    }
    if op.is_type_6() {
        if op.op3_must_be_fpi() {
            return i.operand_fimm(fimm);
        }
        return i.operand_imm(imm);
    }
    i.operand_reg(reg_for(op, 3, pick.wrapping_add(7)))
}

#[test]
fn every_opcode_round_trips() {
    for op in all_ops() {
        let i = encode(op, 5, 0x1234, 2.5);
        assert_eq!(i.op(), Some(op), "{op:?} opcode survives");

        if op.is_type_0() {
            assert_eq!(i.op1(), None);
            continue;
        }
        if op.is_type_1() {
            assert_eq!(i.imm_u(), 0x1234);
            assert_eq!(i.op1(), None);
            continue;
        }
        assert_eq!(i.op1(), Some(reg_for(op, 1, 5)), "{op:?} operand 1");
        if op.is_type_2() {
            assert_eq!(i.op2(), None);
            continue;
        }
        if op.is_type_3() {
            assert_eq!(i.imm_u(), 0x1234);
            continue;
        }
        assert_eq!(i.op2(), Some(reg_for(op, 2, 8)), "{op:?} operand 2");
        if op.is_type_5() || (op.is_type_6() && !op.op3_must_be_fpi()) {
            assert_eq!(i.imm_u(), 0x1234);
            assert!(!i.imm_is_float());
        }
        if op.is_type_6() && op.op3_must_be_fpi() {
            assert!(i.imm_is_float());
            assert_eq!(i.imm_f(), 2.5);
        }
        if op.is_type_7() {
            assert_eq!(i.op3(), Some(reg_for(op, 3, 12)), "{op:?} operand 3");
        }
    }
}

#[test]
fn zero_register_is_legal_where_fprs_are_required() {
    // The zero register substitutes for either class.
    let i = VmInstruction::new(VmOp::Fadd)
        .operand_reg(VmReg::F0)
        .operand_reg(VmReg::Zero)
        .operand_reg(VmReg::F1);
    assert_eq!(i.op2(), Some(VmReg::Zero));
}

#[test]
fn distinct_registers_never_alias_in_the_word() {
    let i = VmInstruction::new(VmOp::Add)
        .operand_reg(VmReg::S0)
        .operand_reg(VmReg::S7)
        .operand_reg(VmReg::S15);
    assert_eq!(i.op1(), Some(VmReg::S0));
    assert_eq!(i.op2(), Some(VmReg::S7));
    assert_eq!(i.op3(), Some(VmReg::S15));
}

proptest! {
    #[test]
    fn round_trip_arbitrary_operands(
        op_idx in 0..VM_OP_COUNT as u8,
        pick in any::<u8>(),
        imm in any::<u64>(),
        fimm in any::<f64>(),
    ) {
        let op = VmOp::try_from(op_idx).unwrap();
        let i = encode(op, pick, imm, fimm);
        prop_assert_eq!(i.op(), Some(op));

        if op.op1_is_register() {
            prop_assert_eq!(i.op1(), Some(reg_for(op, 1, pick)));
        }
        if op.op2_is_register() {
            prop_assert_eq!(i.op2(), Some(reg_for(op, 2, pick.wrapping_add(3))));
        }
        if op.op3_is_register() {
            prop_assert_eq!(i.op3(), Some(reg_for(op, 3, pick.wrapping_add(7))));
        }
        if op.is_type_1() || op.is_type_3() || op.is_type_5()
            || (op.is_type_6() && !op.op3_must_be_fpi())
        {
            prop_assert_eq!(i.imm_u(), imm);
        }
        if op.is_type_6() && op.op3_must_be_fpi() {
            prop_assert_eq!(i.imm, fimm.to_bits());
        }
    }
}
