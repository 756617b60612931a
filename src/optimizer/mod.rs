//! # Optimizer
//!
//! Works on a [`CodeHolder`]: one function's instruction vector plus a
//! label map. Passes are deliberately conservative; the register
//! allocator (which also runs as a code-holder step) does the heavy
//! lifting for the backend.

use std::collections::HashMap;

use crate::compiler::ir::{Instruction, LabelId, Opcode};
use crate::types::FunctionId;

/// Label id -> instruction index map
#[derive(Debug, Default, Clone)]
pub struct LabelMap {
    map: HashMap<LabelId, usize>,
}

impl LabelMap {
    /// Build the map by scanning for `label` instructions.
    pub fn build(code: &[Instruction]) -> Self {
        let mut map = HashMap::new();
        for (idx, instr) in code.iter().enumerate() {
            if instr.op == Opcode::Label {
                if let Some(l) = instr.label_at(0) {
                    map.insert(l, idx);
                }
            }
        }
        Self { map }
    }

    /// Address of a label, if it exists.
    pub fn get(&self, l: LabelId) -> Option<usize> {
        self.map.get(&l).copied()
    }
}

/// One function's code on its way through optimization and backend
/// lowering.
#[derive(Debug)]
pub struct CodeHolder {
    /// The instruction vector
    pub code: Vec<Instruction>,
    /// Label addresses, kept in sync by [`CodeHolder::rebuild_labels`]
    pub labels: LabelMap,
    /// Function the code belongs to
    pub owner: FunctionId,
}

impl CodeHolder {
    /// Wrap a function's instructions.
    pub fn new(code: Vec<Instruction>, owner: FunctionId) -> Self {
        let labels = LabelMap::build(&code);
        Self {
            code,
            labels,
            owner,
        }
    }

    /// Recompute label addresses after instructions moved.
    pub fn rebuild_labels(&mut self) {
        self.labels = LabelMap::build(&self.code);
    }
}

/// A transformation over one function's code. Returns whether anything
/// changed so the driver can iterate to fixpoint.
pub trait OptimizationStep {
    /// Human-readable pass name for debug logs
    fn name(&self) -> &'static str;
    /// Run the pass.
    fn execute(&mut self, ch: &mut CodeHolder) -> bool;
}

/// Remove `noop` instructions left behind by other passes.
pub struct NoopRemoval;

impl OptimizationStep for NoopRemoval {
    fn name(&self) -> &'static str {
        "noop-removal"
    }

    fn execute(&mut self, ch: &mut CodeHolder) -> bool {
        let before = ch.code.len();
        ch.code.retain(|i| i.op != Opcode::Noop || i.comment.is_some());
        let changed = ch.code.len() != before;
        if changed {
            ch.rebuild_labels();
        }
        changed
    }
}

/// Drop instructions whose assigned register is never read anywhere in
/// the function. Side-effecting instructions and non-register
/// assignments are kept.
pub struct DeadValueElimination;

impl OptimizationStep for DeadValueElimination {
    fn name(&self) -> &'static str {
        "dead-value-elimination"
    }

    fn execute(&mut self, ch: &mut CodeHolder) -> bool {
        let mut changed = false;
        loop {
            let mut dead_index = None;
            'scan: for (idx, instr) in ch.code.iter().enumerate() {
                if instr.op.info().has_side_effects {
                    continue;
                }
                let Some(assigned) = instr.assigns() else {
                    continue;
                };
                let Some(reg) = assigned.reg_id() else {
                    continue;
                };
                // Pointer producers feed stores invisibly; keep them.
                if assigned.is_pointer {
                    continue;
                }
                for (other_idx, other) in ch.code.iter().enumerate() {
                    if other_idx == idx {
                        if other.involves(reg, true) {
                            continue 'scan;
                        }
                        continue;
                    }
                    if other.involves(reg, false) {
                        continue 'scan;
                    }
                }
                dead_index = Some(idx);
                break;
            }
            match dead_index {
                Some(idx) => {
                    tracing::trace!(index = idx, instr = %ch.code[idx], "removing dead value");
                    ch.code.remove(idx);
                    changed = true;
                }
                None => break,
            }
        }
        if changed {
            ch.rebuild_labels();
        }
        changed
    }
}

/// Run the standard pass list to fixpoint (bounded).
pub fn optimize(ch: &mut CodeHolder) {
    let mut passes: Vec<Box<dyn OptimizationStep>> =
        vec![Box::new(DeadValueElimination), Box::new(NoopRemoval)];
    for _ in 0..8 {
        let mut changed = false;
        for pass in &mut passes {
            if pass.execute(ch) {
                tracing::debug!(pass = pass.name(), "optimization pass changed code");
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{ImmValue, Value};
    use crate::lexer::SourceSpan;
    use crate::types::type_id_from_name;

    fn instr(op: Opcode, operands: Vec<Value>) -> Instruction {
        let mut i = Instruction::new(op, SourceSpan::default());
        i.operands = operands;
        i
    }

    #[test]
    fn label_map_finds_addresses() {
        let tp = type_id_from_name("u32");
        let code = vec![
            instr(Opcode::Noop, vec![]),
            instr(Opcode::Label, vec![Value::imm(ImmValue::U(1), tp)]),
            instr(Opcode::Ret, vec![]),
        ];
        let ch = CodeHolder::new(code, FunctionId(1));
        assert_eq!(ch.labels.get(1), Some(1));
        assert_eq!(ch.labels.get(2), None);
    }

    #[test]
    fn removes_unused_value() {
        let tp = type_id_from_name("i32");
        let code = vec![
            // %1 = 1 + 2, never read
            instr(
                Opcode::IAdd,
                vec![
                    Value::reg(1, tp),
                    Value::imm(ImmValue::I(1), tp),
                    Value::imm(ImmValue::I(2), tp),
                ],
            ),
            // %2 = 3 + 4, read by the store
            instr(
                Opcode::IAdd,
                vec![
                    Value::reg(2, tp),
                    Value::imm(ImmValue::I(3), tp),
                    Value::imm(ImmValue::I(4), tp),
                ],
            ),
            instr(
                Opcode::Store,
                vec![
                    Value::reg(2, tp),
                    Value::reg(3, tp),
                    Value::imm(ImmValue::U(0), tp),
                ],
            ),
            instr(Opcode::Ret, vec![]),
        ];
        let mut ch = CodeHolder::new(code, FunctionId(1));
        assert!(DeadValueElimination.execute(&mut ch));
        assert_eq!(ch.code.len(), 3);
        assert_eq!(ch.code[0].assigns().and_then(Value::reg_id), Some(2));
    }

    #[test]
    fn keeps_side_effects() {
        let tp = type_id_from_name("u32");
        let code = vec![instr(Opcode::Call, vec![Value::imm(ImmValue::U(7), tp)])];
        let mut ch = CodeHolder::new(code, FunctionId(1));
        assert!(!DeadValueElimination.execute(&mut ch));
        assert_eq!(ch.code.len(), 1);
    }
}
