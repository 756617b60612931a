//! IR-to-VM lowering
//!
//! Runs the register allocator over a function's code, lays out the
//! stack frame, then emits VM instructions. Physical GP registers map
//! to the `s` bank and FP registers to the `f` bank; both are
//! callee-saved, so the prologue stores every used register plus `$ra`
//! and each return restores them. Spilled operands reload into the
//! volatile `v`/`vf` scratch registers around each instruction.
//!
//! Frame layout, relative to `$sp` at entry:
//!
//! ```text
//! +0                saved $ra
//! +8                saved s/f registers used by the function
//! +8+saved          spill area
//! +8+saved+spills   ir stack allocations
//! ```
//!
//! Call sites advance `$sp` past the whole frame around the `jal` so
//! the callee starts with a clean frame base.

use std::collections::HashMap;

use crate::backend::regalloc::{RegAllocStats, RegisterAllocator, StackManager};
use crate::backend::vm::instruction::{VmInstruction, VmOp};
use crate::backend::vm::registers::VmReg;
use crate::compiler::ir::{ImmValue, Instruction, LabelId, Opcode, Value, ValueKind};
use crate::optimizer::CodeHolder;
use crate::types::{ArgKind, FunctionArg, TypeId, TypeRegistry};

/// Result of lowering one function
pub struct LoweredFunction {
    /// Emitted VM instructions (addresses are function-relative; the
    /// install step rebases label and jump targets)
    pub code: Vec<VmInstruction>,
    /// Allocation statistics for diagnostics
    pub stats: RegAllocStats,
}

/// Per-function lowering context.
pub struct FunctionLowering<'a> {
    types: &'a TypeRegistry,
    /// Module data section base addresses
    data_bases: &'a HashMap<u32, u64>,
    /// Explicit argument descriptors (for arg-register mapping)
    arg_info: Vec<FunctionArg>,

    code: Vec<VmInstruction>,
    label_addrs: HashMap<LabelId, u32>,
    /// (instruction index, label) pairs to patch after emission
    fixups: Vec<(usize, LabelId)>,
    /// alloc id -> frame offset
    alloc_offsets: HashMap<u32, u32>,
    frame_size: u32,
    spill_base: u32,
    saved_gp: Vec<u32>,
    saved_fp: Vec<u32>,
    /// Pending params for the next call: (value, kind)
    params: Vec<(Value, ArgKind)>,
}

impl<'a> FunctionLowering<'a> {
    /// New lowering for one function.
    pub fn new(
        types: &'a TypeRegistry,
        data_bases: &'a HashMap<u32, u64>,
        arg_info: Vec<FunctionArg>,
    ) -> Self {
        Self {
            types,
            data_bases,
            arg_info,
            code: Vec::new(),
            label_addrs: HashMap::new(),
            fixups: Vec::new(),
            alloc_offsets: HashMap::new(),
            frame_size: 0,
            spill_base: 0,
            saved_gp: Vec::new(),
            saved_fp: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Allocate registers and emit VM code for a function.
    pub fn run(
        mut self,
        ch: &mut CodeHolder,
        num_gp: u16,
        num_fp: u16,
    ) -> LoweredFunction {
        let mut allocator = RegisterAllocator::new(num_gp, num_fp);
        let stats = allocator.execute(ch, self.types);

        self.plan_frame(ch, &stats);
        self.emit_prologue();
        for idx in 0..ch.code.len() {
            let instr = ch.code[idx].clone();
            self.emit_instr(&instr);
        }
        self.patch_labels();

        LoweredFunction {
            code: self.code,
            stats,
        }
    }

    // ------------------------------------------------------------------
    // Frame planning
    // ------------------------------------------------------------------

    fn plan_frame(&mut self, ch: &CodeHolder, stats: &RegAllocStats) {
        // Which physical registers does the function touch
        let mut gp = std::collections::BTreeSet::new();
        let mut fp = std::collections::BTreeSet::new();
        for instr in &ch.code {
            for operand in &instr.operands {
                if let ValueKind::Reg(id) = operand.kind {
                    if self.is_fp_type(operand.type_id) && !operand.is_pointer {
                        fp.insert(id);
                    } else {
                        gp.insert(id);
                    }
                }
            }
        }
        self.saved_gp = gp.into_iter().collect();
        self.saved_fp = fp.into_iter().collect();

        let saved_bytes = (self.saved_gp.len() + self.saved_fp.len()) as u32 * 8;
        self.spill_base = 8 + saved_bytes;

        // Assign stack allocation offsets by replaying alloc/free order
        let mut mgr = StackManager::new();
        let mut max = 0u32;
        for instr in &ch.code {
            match instr.op {
                Opcode::StackAllocate => {
                    let size = imm_of(&instr.operands[0]).max(1) as u32;
                    let id = imm_of(&instr.operands[1]) as u32;
                    let aligned = size.div_ceil(8) * 8;
                    let off = mgr.alloc(aligned);
                    self.alloc_offsets.insert(id, off);
                    max = max.max(mgr.size());
                }
                Opcode::StackFree => {
                    let id = imm_of(&instr.operands[0]) as u32;
                    if let Some(off) = self.alloc_offsets.get(&id) {
                        mgr.free(*off);
                    }
                }
                _ => {}
            }
        }

        let alloc_base = self.spill_base + stats.spill_bytes.div_ceil(8) * 8;
        // Rebase allocation offsets past the spill area
        for off in self.alloc_offsets.values_mut() {
            *off += alloc_base;
        }
        self.frame_size = (alloc_base + max).div_ceil(8) * 8;
    }

    fn is_fp_type(&self, tp: TypeId) -> bool {
        self.types
            .get(tp)
            .map(|t| t.meta.is_floating_point)
            .unwrap_or(false)
    }

    fn type_size(&self, tp: TypeId) -> u32 {
        self.types
            .get(tp)
            .map(|t| t.meta.size.clamp(1, 8))
            .unwrap_or(8)
    }

    fn saved_slot(&self, is_fp: bool, idx: usize) -> u64 {
        let base = if is_fp { self.saved_gp.len() + idx } else { idx };
        8 + (base as u64) * 8
    }

    fn emit_prologue(&mut self) {
        self.push(
            VmInstruction::new(VmOp::St64)
                .operand_reg(VmReg::Ra)
                .operand_reg(VmReg::Sp)
                .operand_imm(0),
        );
        for i in 0..self.saved_gp.len() {
            let r = VmReg::saved_gp(self.saved_gp[i]).expect("gp register in range");
            let off = self.saved_slot(false, i);
            self.push(
                VmInstruction::new(VmOp::St64)
                    .operand_reg(r)
                    .operand_reg(VmReg::Sp)
                    .operand_imm(off),
            );
        }
        for i in 0..self.saved_fp.len() {
            let r = VmReg::saved_fp(self.saved_fp[i]).expect("fp register in range");
            let off = self.saved_slot(true, i);
            self.push(
                VmInstruction::new(VmOp::St64)
                    .operand_reg(r)
                    .operand_reg(VmReg::Sp)
                    .operand_imm(off),
            );
        }
    }

    fn emit_epilogue(&mut self) {
        for i in 0..self.saved_gp.len() {
            let r = VmReg::saved_gp(self.saved_gp[i]).expect("gp register in range");
            let off = self.saved_slot(false, i);
            self.push(
                VmInstruction::new(VmOp::Ld64)
                    .operand_reg(r)
                    .operand_reg(VmReg::Sp)
                    .operand_imm(off),
            );
        }
        for i in 0..self.saved_fp.len() {
            let r = VmReg::saved_fp(self.saved_fp[i]).expect("fp register in range");
            let off = self.saved_slot(true, i);
            self.push(
                VmInstruction::new(VmOp::Ld64)
                    .operand_reg(r)
                    .operand_reg(VmReg::Sp)
                    .operand_imm(off),
            );
        }
        self.push(
            VmInstruction::new(VmOp::Ld64)
                .operand_reg(VmReg::Ra)
                .operand_reg(VmReg::Sp)
                .operand_imm(0),
        );
        self.push(VmInstruction::new(VmOp::Jmpr).operand_reg(VmReg::Ra));
    }

    fn push(&mut self, i: VmInstruction) {
        self.code.push(i);
    }

    // ------------------------------------------------------------------
    // Operand materialization
    // ------------------------------------------------------------------

    /// Map an explicit argument index (1-based; 0 is the call context)
    /// to its argument register.
    fn arg_register(&self, idx: u32) -> VmReg {
        if idx == 0 {
            return VmReg::A0;
        }
        let mut next_int = 1; // a0 taken by the call context
        let mut next_fp = 0;
        for (i, a) in self.arg_info.iter().enumerate() {
            let is_fp = a.kind == ArgKind::Value && self.is_fp_type(a.type_id);
            if (i as u32) + 1 == idx {
                return if is_fp {
                    VmReg::float_arg(next_fp).unwrap_or(VmReg::Fa15)
                } else {
                    VmReg::int_arg(next_int).unwrap_or(VmReg::A15)
                };
            }
            if is_fp {
                next_fp += 1;
            } else {
                next_int += 1;
            }
        }
        VmReg::A15
    }

    /// Bring an operand into a register, using `scratch` when it is not
    /// already register-resident.
    fn read_operand(&mut self, v: &Value, scratch: Scratch) -> VmReg {
        let is_fp = self.is_fp_type(v.type_id) && !v.is_pointer;
        match &v.kind {
            ValueKind::Reg(id) => {
                if is_fp {
                    VmReg::saved_fp(*id).unwrap_or(VmReg::F15)
                } else {
                    VmReg::saved_gp(*id).unwrap_or(VmReg::S15)
                }
            }
            ValueKind::Spill(off) => {
                // Spill slots hold the full register word
                let r = scratch.pick(is_fp);
                self.push(
                    VmInstruction::new(VmOp::Ld64)
                        .operand_reg(r)
                        .operand_reg(VmReg::Sp)
                        .operand_imm((self.spill_base + off) as u64),
                );
                r
            }
            ValueKind::Imm(imm) => {
                let r = scratch.pick(is_fp);
                let class = self.num_class(v.type_id);
                self.materialize_imm(*imm, r, class);
                r
            }
            ValueKind::Arg(idx) => self.arg_register(*idx),
            ValueKind::Null => VmReg::Zero,
            ValueKind::Stack(_) | ValueKind::ModuleData { .. } | ValueKind::Poison => {
                // These forms never survive to the backend as general
                // operands; read zero to stay well formed.
                VmReg::Zero
            }
        }
    }

    /// Write-back half of operand access: spill-resident destinations
    /// store the scratch register after the operation.
    fn write_back(&mut self, v: &Value, reg: VmReg) {
        if let ValueKind::Spill(off) = v.kind {
            self.push(
                VmInstruction::new(VmOp::St64)
                    .operand_reg(reg)
                    .operand_reg(VmReg::Sp)
                    .operand_imm((self.spill_base + off) as u64),
            );
        }
    }

    /// Destination register for an assigned operand: its physical
    /// register, or a scratch that will be written back.
    fn dest_operand(&mut self, v: &Value) -> VmReg {
        let is_fp = self.is_fp_type(v.type_id) && !v.is_pointer;
        match &v.kind {
            ValueKind::Reg(id) => {
                if is_fp {
                    VmReg::saved_fp(*id).unwrap_or(VmReg::F15)
                } else {
                    VmReg::saved_gp(*id).unwrap_or(VmReg::S15)
                }
            }
            ValueKind::Spill(_) => {
                if is_fp {
                    VmReg::Vf3
                } else {
                    VmReg::V3
                }
            }
            ValueKind::Arg(idx) => self.arg_register(*idx),
            _ => VmReg::V3,
        }
    }

    fn materialize_imm(&mut self, imm: ImmValue, dst: VmReg, class: Class) {
        if dst.is_fpr() {
            // Load the bit pattern through a GP scratch, then move it
            // into the FP bank. f32 values store their 32-bit pattern.
            let bits = match imm {
                ImmValue::F(v) if class == Class::F32 => (v as f32).to_bits() as u64,
                ImmValue::F(v) => v.to_bits(),
                other if class == Class::F32 => (other.as_i64() as f32).to_bits() as u64,
                other => (other.as_i64() as f64).to_bits(),
            };
            self.push(
                VmInstruction::new(VmOp::Addui)
                    .operand_reg(VmReg::V2)
                    .operand_reg(VmReg::Zero)
                    .operand_imm(bits),
            );
            self.push(
                VmInstruction::new(VmOp::Mtfp)
                    .operand_reg(VmReg::V2)
                    .operand_reg(dst),
            );
        } else {
            self.push(
                VmInstruction::new(VmOp::Addui)
                    .operand_reg(dst)
                    .operand_reg(VmReg::Zero)
                    .operand_imm(imm.bits()),
            );
        }
    }

    // ------------------------------------------------------------------
    // Instruction emission
    // ------------------------------------------------------------------

    fn emit_instr(&mut self, instr: &Instruction) {
        match instr.op {
            Opcode::Noop => {}
            Opcode::Label => {
                if let Some(l) = instr.label_at(0) {
                    self.label_addrs.insert(l, self.code.len() as u32);
                }
            }
            Opcode::StackAllocate | Opcode::StackFree => {
                // Frame planning resolved these; no code.
            }
            Opcode::StackPtr => {
                let dst = self.dest_operand(&instr.operands[0]);
                let id = imm_of(&instr.operands[1]) as u32;
                let off = self.alloc_offsets.get(&id).copied().unwrap_or(0);
                self.push(
                    VmInstruction::new(VmOp::Addui)
                        .operand_reg(dst)
                        .operand_reg(VmReg::Sp)
                        .operand_imm(off as u64),
                );
                self.write_back(&instr.operands[0], dst);
            }
            Opcode::ModuleData => {
                let dst = self.dest_operand(&instr.operands[0]);
                let module = imm_of(&instr.operands[1]) as u32;
                let slot_addr = self.data_bases.get(&module).copied().unwrap_or(0)
                    + imm_of(&instr.operands[2]);
                self.push(
                    VmInstruction::new(VmOp::Mptr)
                        .operand_reg(dst)
                        .operand_imm(slot_addr),
                );
                self.write_back(&instr.operands[0], dst);
            }
            Opcode::Load => {
                let base = self.read_operand(&instr.operands[1], Scratch::B);
                let dst = self.dest_operand(&instr.operands[0]);
                let size = if instr.operands[0].is_pointer {
                    8
                } else {
                    self.type_size(instr.operands[0].type_id)
                };
                self.push(
                    VmInstruction::new(load_op(size))
                        .operand_reg(dst)
                        .operand_reg(base)
                        .operand_imm(imm_of(&instr.operands[2])),
                );
                // Narrow signed loads zero-extend in the word; restore
                // the sign with (x ^ m) - m, m = 2^(n-1).
                if size < 8 && !instr.operands[0].is_pointer && !dst.is_fpr() {
                    if let Some(t) = self.types.get(instr.operands[0].type_id) {
                        if t.meta.is_integral && !t.meta.is_unsigned {
                            let m = 1u64 << (size * 8 - 1);
                            self.push(
                                VmInstruction::new(VmOp::Xori)
                                    .operand_reg(dst)
                                    .operand_reg(dst)
                                    .operand_imm(m),
                            );
                            self.push(
                                VmInstruction::new(VmOp::Subi)
                                    .operand_reg(dst)
                                    .operand_reg(dst)
                                    .operand_imm(m),
                            );
                        }
                    }
                }
                self.write_back(&instr.operands[0], dst);
            }
            Opcode::Store => {
                let val = self.read_operand(&instr.operands[0], Scratch::A);
                let base = self.read_operand(&instr.operands[1], Scratch::B);
                let size = if instr.operands[0].is_pointer {
                    8
                } else {
                    self.type_size(instr.operands[0].type_id)
                };
                self.push(
                    VmInstruction::new(store_op(size))
                        .operand_reg(val)
                        .operand_reg(base)
                        .operand_imm(imm_of(&instr.operands[2])),
                );
            }
            Opcode::Jump => {
                if let Some(l) = instr.label_at(0) {
                    self.fixups.push((self.code.len(), l));
                }
                self.push(VmInstruction::new(VmOp::Jmp).operand_imm(0));
            }
            Opcode::Branch => {
                let cond = self.read_operand(&instr.operands[0], Scratch::A);
                if let Some(l) = instr.label_at(1) {
                    self.fixups.push((self.code.len(), l));
                }
                self.push(
                    VmInstruction::new(VmOp::Bneqz)
                        .operand_reg(cond)
                        .operand_imm(0),
                );
                if let Some(l) = instr.label_at(2) {
                    self.fixups.push((self.code.len(), l));
                }
                self.push(VmInstruction::new(VmOp::Jmp).operand_imm(0));
            }
            Opcode::Cvt => self.emit_cvt(instr),
            Opcode::Param => {
                let kind = match imm_of(&instr.operands[1]) {
                    x if x == ArgKind::ContextPtr as u64 => ArgKind::ContextPtr,
                    x if x == ArgKind::Pointer as u64 => ArgKind::Pointer,
                    _ => ArgKind::Value,
                };
                self.params.push((instr.operands[0].clone(), kind));
            }
            Opcode::Call => self.emit_call(instr),
            Opcode::Ret => self.emit_epilogue(),
            Opcode::Reserve => {}
            Opcode::Resolve | Opcode::Assign => {
                let dst_v = instr.operands[0].clone();
                let src_v = instr.operands[1].clone();
                self.emit_move(&dst_v, &src_v);
            }
            _ => self.emit_alu(instr),
        }
    }

    /// Register-to-register (or imm-to-register) move preserving bits.
    fn emit_move(&mut self, dst_v: &Value, src_v: &Value) {
        let dst_fp = self.is_fp_type(dst_v.type_id) && !dst_v.is_pointer;
        let src = self.read_operand(src_v, Scratch::A);
        let dst = self.dest_operand(dst_v);
        let src_fp = src.is_fpr();
        match (src_fp, dst_fp) {
            (false, false) => self.push(
                VmInstruction::new(VmOp::Addui)
                    .operand_reg(dst)
                    .operand_reg(src)
                    .operand_imm(0),
            ),
            (false, true) => self.push(
                VmInstruction::new(VmOp::Mtfp)
                    .operand_reg(src)
                    .operand_reg(dst),
            ),
            (true, false) => self.push(
                VmInstruction::new(VmOp::Mffp)
                    .operand_reg(src)
                    .operand_reg(dst),
            ),
            (true, true) => {
                self.push(
                    VmInstruction::new(VmOp::Mffp)
                        .operand_reg(src)
                        .operand_reg(VmReg::V2),
                );
                self.push(
                    VmInstruction::new(VmOp::Mtfp)
                        .operand_reg(VmReg::V2)
                        .operand_reg(dst),
                );
            }
        }
        self.write_back(dst_v, dst);
    }

    fn emit_cvt(&mut self, instr: &Instruction) {
        let target_tp = TypeId(imm_of(&instr.operands[2]));
        let src_v = &instr.operands[1];
        let dst_v = &instr.operands[0];

        let src_class = self.num_class(src_v.type_id);
        let dst_class = self.num_class(target_tp);

        // Copy the source bits into the destination's bank, then apply
        // the in-place conversion on the destination register.
        let dst = self.dest_operand(dst_v);
        let src = self.read_operand(src_v, Scratch::A);
        match (src.is_fpr(), dst.is_fpr()) {
            (false, false) => self.push(
                VmInstruction::new(VmOp::Addui)
                    .operand_reg(dst)
                    .operand_reg(src)
                    .operand_imm(0),
            ),
            (false, true) => self.push(
                VmInstruction::new(VmOp::Mtfp).operand_reg(src).operand_reg(dst),
            ),
            (true, false) => self.push(
                VmInstruction::new(VmOp::Mffp).operand_reg(src).operand_reg(dst),
            ),
            (true, true) => {
                self.push(
                    VmInstruction::new(VmOp::Mffp)
                        .operand_reg(src)
                        .operand_reg(VmReg::V2),
                );
                self.push(
                    VmInstruction::new(VmOp::Mtfp)
                        .operand_reg(VmReg::V2)
                        .operand_reg(dst),
                );
            }
        }

        if let Some(op) = cvt_op(src_class, dst_class) {
            self.push(VmInstruction::new(op).operand_reg(dst));
        }
        self.write_back(dst_v, dst);
    }

    fn emit_call(&mut self, instr: &Instruction) {
        let fid = imm_of(&instr.operands[0]);

        // Move pending params into the argument registers
        let params = std::mem::take(&mut self.params);
        let mut next_int = 0usize;
        let mut next_fp = 0usize;
        for (v, kind) in &params {
            let is_fp = *kind == ArgKind::Value && self.is_fp_type(v.type_id) && !v.is_pointer;
            let target = if is_fp {
                let r = VmReg::float_arg(next_fp).unwrap_or(VmReg::Fa15);
                next_fp += 1;
                r
            } else {
                let r = VmReg::int_arg(next_int).unwrap_or(VmReg::A15);
                next_int += 1;
                r
            };
            let src = self.read_operand(v, Scratch::A);
            match (src.is_fpr(), target.is_fpr()) {
                (false, false) => self.push(
                    VmInstruction::new(VmOp::Addui)
                        .operand_reg(target)
                        .operand_reg(src)
                        .operand_imm(0),
                ),
                (false, true) => self.push(
                    VmInstruction::new(VmOp::Mtfp)
                        .operand_reg(src)
                        .operand_reg(target),
                ),
                (true, true) => {
                    self.push(
                        VmInstruction::new(VmOp::Mffp)
                            .operand_reg(src)
                            .operand_reg(VmReg::V2),
                    );
                    self.push(
                        VmInstruction::new(VmOp::Mtfp)
                            .operand_reg(VmReg::V2)
                            .operand_reg(target),
                    );
                }
                (true, false) => self.push(
                    VmInstruction::new(VmOp::Mffp)
                        .operand_reg(src)
                        .operand_reg(target),
                ),
            }
        }

        // The callee's frame starts past ours
        self.push(
            VmInstruction::new(VmOp::Addui)
                .operand_reg(VmReg::Sp)
                .operand_reg(VmReg::Sp)
                .operand_imm(self.frame_size as u64),
        );
        self.push(VmInstruction::new(VmOp::Jal).operand_imm(fid));
        self.push(
            VmInstruction::new(VmOp::Subui)
                .operand_reg(VmReg::Sp)
                .operand_reg(VmReg::Sp)
                .operand_imm(self.frame_size as u64),
        );
    }

    fn num_class(&self, tp: TypeId) -> Class {
        match self.types.get(tp) {
            Some(t) if t.meta.is_floating_point && t.meta.size == 8 => Class::F64,
            Some(t) if t.meta.is_floating_point => Class::F32,
            Some(t) if t.meta.is_unsigned => Class::Uint,
            _ => Class::Int,
        }
    }

    /// Arithmetic, comparison, logic: pick the VM form for the operand
    /// shape (register-register, register-immediate, immediate-reversed).
    fn emit_alu(&mut self, instr: &Instruction) {
        use Opcode as O;

        // Single-operand read-modify-write (inc/dec)
        if matches!(
            instr.op,
            O::IInc | O::UInc | O::FInc | O::DInc | O::IDec | O::UDec | O::FDec | O::DDec
        ) {
            let v = &instr.operands[0];
            let r = self.read_operand(v, Scratch::A);
            let one = 1i64;
            let i = match instr.op {
                O::IInc => VmInstruction::new(VmOp::Addi)
                    .operand_reg(r)
                    .operand_reg(r)
                    .operand_imm(one as u64),
                O::UInc => VmInstruction::new(VmOp::Addui)
                    .operand_reg(r)
                    .operand_reg(r)
                    .operand_imm(1),
                O::FInc => VmInstruction::new(VmOp::Faddi)
                    .operand_reg(r)
                    .operand_reg(r)
                    .operand_fimm(1.0),
                O::DInc => VmInstruction::new(VmOp::Daddi)
                    .operand_reg(r)
                    .operand_reg(r)
                    .operand_fimm(1.0),
                O::IDec => VmInstruction::new(VmOp::Subi)
                    .operand_reg(r)
                    .operand_reg(r)
                    .operand_imm(one as u64),
                O::UDec => VmInstruction::new(VmOp::Subui)
                    .operand_reg(r)
                    .operand_reg(r)
                    .operand_imm(1),
                O::FDec => VmInstruction::new(VmOp::Fsubi)
                    .operand_reg(r)
                    .operand_reg(r)
                    .operand_fimm(1.0),
                _ => VmInstruction::new(VmOp::Dsubi)
                    .operand_reg(r)
                    .operand_reg(r)
                    .operand_fimm(1.0),
            };
            self.push(i);
            self.write_back(v, r);
            return;
        }

        // Unary ops
        if matches!(instr.op, O::INeg | O::FNeg | O::DNeg | O::Not | O::Inv) {
            let dst_v = &instr.operands[0];
            let src = self.read_operand(&instr.operands[1], Scratch::A);
            let dst = self.dest_operand(dst_v);
            match instr.op {
                O::INeg => self.push(
                    VmInstruction::new(VmOp::Neg).operand_reg(dst).operand_reg(src),
                ),
                O::FNeg => self.push(
                    VmInstruction::new(VmOp::Negf).operand_reg(dst).operand_reg(src),
                ),
                O::DNeg => self.push(
                    VmInstruction::new(VmOp::Negd).operand_reg(dst).operand_reg(src),
                ),
                O::Not => self.push(
                    VmInstruction::new(VmOp::Cmpi)
                        .operand_reg(dst)
                        .operand_reg(src)
                        .operand_imm(0),
                ),
                _ => self.push(
                    VmInstruction::new(VmOp::Xori)
                        .operand_reg(dst)
                        .operand_reg(src)
                        .operand_imm(u64::MAX),
                ),
            }
            self.write_back(dst_v, dst);
            return;
        }

        // Modulo has no VM instruction; synthesize q = a/b; m = a - q*b
        if matches!(instr.op, O::IMod | O::UMod | O::FMod | O::DMod) {
            self.emit_mod(instr);
            return;
        }

        let Some(shape) = alu_shape(instr.op) else {
            tracing::warn!(op = ?instr.op, "unhandled opcode in backend lowering");
            return;
        };

        let dst_v = instr.operands[0].clone();
        let a_v = instr.operands[1].clone();
        let b_v = instr.operands[2].clone();

        let dst = self.dest_operand(&dst_v);

        // Immediate third operand uses the `*i` form when one exists
        let b_imm = b_v.imm_value();
        if let (Some(imm), Some(imm_op)) = (b_imm, shape.imm) {
            let a = self.read_operand(&a_v, Scratch::A);
            let mut i = VmInstruction::new(imm_op).operand_reg(dst).operand_reg(a);
            i = if imm_op.op3_must_be_fpi() {
                i.operand_fimm(match imm {
                    ImmValue::F(f) => f,
                    other => other.as_i64() as f64,
                })
            } else {
                i.operand_imm(imm.bits())
            };
            self.push(i);
            self.write_back(&dst_v, dst);
            return;
        }

        let a = self.read_operand(&a_v, Scratch::A);
        let b = self.read_operand(&b_v, Scratch::B);
        self.push(
            VmInstruction::new(shape.reg)
                .operand_reg(dst)
                .operand_reg(a)
                .operand_reg(b),
        );
        self.write_back(&dst_v, dst);
    }

    fn emit_mod(&mut self, instr: &Instruction) {
        use Opcode as O;
        let dst_v = instr.operands[0].clone();
        let a = self.read_operand(&instr.operands[1], Scratch::A);
        let b = self.read_operand(&instr.operands[2], Scratch::B);
        let dst = self.dest_operand(&dst_v);

        match instr.op {
            O::IMod | O::UMod => {
                let (div, mul, sub) = if instr.op == O::IMod {
                    (VmOp::Div, VmOp::Mul, VmOp::Sub)
                } else {
                    (VmOp::Divu, VmOp::Mulu, VmOp::Subu)
                };
                self.push(
                    VmInstruction::new(div)
                        .operand_reg(VmReg::V3)
                        .operand_reg(a)
                        .operand_reg(b),
                );
                self.push(
                    VmInstruction::new(mul)
                        .operand_reg(VmReg::V3)
                        .operand_reg(VmReg::V3)
                        .operand_reg(b),
                );
                self.push(
                    VmInstruction::new(sub)
                        .operand_reg(dst)
                        .operand_reg(a)
                        .operand_reg(VmReg::V3),
                );
            }
            _ => {
                let f64_mode = instr.op == O::DMod;
                let (div, mul, sub, to_int, to_float) = if f64_mode {
                    (VmOp::Ddiv, VmOp::Dmul, VmOp::Dsub, VmOp::CvtDi, VmOp::CvtId)
                } else {
                    (VmOp::Fdiv, VmOp::Fmul, VmOp::Fsub, VmOp::CvtFi, VmOp::CvtIf)
                };
                // t = trunc(a / b)
                self.push(
                    VmInstruction::new(div)
                        .operand_reg(VmReg::Vf3)
                        .operand_reg(a)
                        .operand_reg(b),
                );
                self.push(VmInstruction::new(to_int).operand_reg(VmReg::Vf3));
                self.push(VmInstruction::new(to_float).operand_reg(VmReg::Vf3));
                // dst = a - t * b
                self.push(
                    VmInstruction::new(mul)
                        .operand_reg(VmReg::Vf3)
                        .operand_reg(VmReg::Vf3)
                        .operand_reg(b),
                );
                self.push(
                    VmInstruction::new(sub)
                        .operand_reg(dst)
                        .operand_reg(a)
                        .operand_reg(VmReg::Vf3),
                );
            }
        }
        self.write_back(&dst_v, dst);
    }

    fn patch_labels(&mut self) {
        for (idx, label) in std::mem::take(&mut self.fixups) {
            let addr = self.label_addrs.get(&label).copied().unwrap_or(0);
            self.code[idx].imm = addr as u64;
        }
    }
}

/// Scratch register sets for operand reloads
#[derive(Debug, Clone, Copy)]
enum Scratch {
    /// First scratch pair (v1 / vf1)
    A,
    /// Second scratch pair (v2 / vf2)
    B,
}

impl Scratch {
    fn pick(self, fp: bool) -> VmReg {
        match (self, fp) {
            (Scratch::A, false) => VmReg::V1,
            (Scratch::A, true) => VmReg::Vf1,
            (Scratch::B, false) => VmReg::V2,
            (Scratch::B, true) => VmReg::Vf2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Int,
    Uint,
    F32,
    F64,
}

struct AluShape {
    reg: VmOp,
    imm: Option<VmOp>,
}

fn shape(reg: VmOp, imm: Option<VmOp>) -> Option<AluShape> {
    Some(AluShape { reg, imm })
}

fn alu_shape(op: Opcode) -> Option<AluShape> {
    use Opcode as O;
    match op {
        O::IAdd => shape(VmOp::Add, Some(VmOp::Addi)),
        O::UAdd => shape(VmOp::Addu, Some(VmOp::Addui)),
        O::FAdd => shape(VmOp::Fadd, Some(VmOp::Faddi)),
        O::DAdd => shape(VmOp::Dadd, Some(VmOp::Daddi)),
        O::ISub => shape(VmOp::Sub, Some(VmOp::Subi)),
        O::USub => shape(VmOp::Subu, Some(VmOp::Subui)),
        O::FSub => shape(VmOp::Fsub, Some(VmOp::Fsubi)),
        O::DSub => shape(VmOp::Dsub, Some(VmOp::Dsubi)),
        O::IMul => shape(VmOp::Mul, Some(VmOp::Muli)),
        O::UMul => shape(VmOp::Mulu, Some(VmOp::Mului)),
        O::FMul => shape(VmOp::Fmul, Some(VmOp::Fmuli)),
        O::DMul => shape(VmOp::Dmul, Some(VmOp::Dmuli)),
        O::IDiv => shape(VmOp::Div, Some(VmOp::Divi)),
        O::UDiv => shape(VmOp::Divu, Some(VmOp::Divui)),
        O::FDiv => shape(VmOp::Fdiv, Some(VmOp::Fdivi)),
        O::DDiv => shape(VmOp::Ddiv, Some(VmOp::Ddivi)),
        O::ILt => shape(VmOp::Lt, Some(VmOp::Lti)),
        O::ULt => shape(VmOp::Lt, Some(VmOp::Lti)),
        O::FLt => shape(VmOp::Flt, Some(VmOp::Flti)),
        O::DLt => shape(VmOp::Dlt, Some(VmOp::Dlti)),
        O::ILte => shape(VmOp::Lte, Some(VmOp::Ltei)),
        O::ULte => shape(VmOp::Lte, Some(VmOp::Ltei)),
        O::FLte => shape(VmOp::Flte, Some(VmOp::Fltei)),
        O::DLte => shape(VmOp::Dlte, Some(VmOp::Dltei)),
        O::IGt => shape(VmOp::Gt, Some(VmOp::Gti)),
        O::UGt => shape(VmOp::Gt, Some(VmOp::Gti)),
        O::FGt => shape(VmOp::Fgt, Some(VmOp::Fgti)),
        O::DGt => shape(VmOp::Dgt, Some(VmOp::Dgti)),
        O::IGte => shape(VmOp::Gte, Some(VmOp::Gtei)),
        O::UGte => shape(VmOp::Gte, Some(VmOp::Gtei)),
        O::FGte => shape(VmOp::Fgte, Some(VmOp::Fgtei)),
        O::DGte => shape(VmOp::Dgte, Some(VmOp::Dgtei)),
        O::IEq => shape(VmOp::Cmp, Some(VmOp::Cmpi)),
        O::UEq => shape(VmOp::Cmp, Some(VmOp::Cmpi)),
        O::FEq => shape(VmOp::Fcmp, Some(VmOp::Fcmpi)),
        O::DEq => shape(VmOp::Dcmp, Some(VmOp::Dcmpi)),
        O::INeq => shape(VmOp::Ncmp, Some(VmOp::Ncmpi)),
        O::UNeq => shape(VmOp::Ncmp, Some(VmOp::Ncmpi)),
        O::FNeq => shape(VmOp::Fncmp, Some(VmOp::Fncmpi)),
        O::DNeq => shape(VmOp::Dncmp, Some(VmOp::Dncmpi)),
        O::Shl => shape(VmOp::Sl, Some(VmOp::Sli)),
        O::Shr => shape(VmOp::Sr, Some(VmOp::Sri)),
        O::LAnd => shape(VmOp::And, Some(VmOp::Andi)),
        O::LOr => shape(VmOp::Or, Some(VmOp::Ori)),
        O::BAnd => shape(VmOp::Band, Some(VmOp::Bandi)),
        O::BOr => shape(VmOp::Bor, Some(VmOp::Bori)),
        O::Xor => shape(VmOp::Xor, Some(VmOp::Xori)),
        _ => None,
    }
}

fn cvt_op(from: Class, to: Class) -> Option<VmOp> {
    use Class::*;
    match (from, to) {
        (Int, F32) => Some(VmOp::CvtIf),
        (Int, F64) => Some(VmOp::CvtId),
        (Int, Uint) => Some(VmOp::CvtIu),
        (Uint, F32) => Some(VmOp::CvtUf),
        (Uint, F64) => Some(VmOp::CvtUd),
        (Uint, Int) => Some(VmOp::CvtUi),
        (F32, Int) => Some(VmOp::CvtFi),
        (F32, Uint) => Some(VmOp::CvtFu),
        (F32, F64) => Some(VmOp::CvtFd),
        (F64, Int) => Some(VmOp::CvtDi),
        (F64, Uint) => Some(VmOp::CvtDu),
        (F64, F32) => Some(VmOp::CvtDf),
        _ => None,
    }
}

fn load_op(size: u32) -> VmOp {
    match size {
        1 => VmOp::Ld8,
        2 => VmOp::Ld16,
        4 => VmOp::Ld32,
        _ => VmOp::Ld64,
    }
}

fn store_op(size: u32) -> VmOp {
    match size {
        1 => VmOp::St8,
        2 => VmOp::St16,
        4 => VmOp::St32,
        _ => VmOp::St64,
    }
}

fn imm_of(v: &Value) -> u64 {
    v.imm_value().map(|i| i.as_u64()).unwrap_or(0)
}
