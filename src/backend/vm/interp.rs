//! Interpreter loop
//!
//! A single dispatch loop over decoded instruction words. The program
//! counter lives in `$ip`; it is incremented after each step unless a
//! branch or jump wrote it. Memory instructions are bounds checked and
//! raise a VM error through the execution context. `jal` targets are
//! function ids: script functions jump to their entry address, host
//! functions route through the trampoline supplied by the backend.

use super::instruction::{VmInstruction, VmOp};
use super::registers::VmReg;
use super::state::State;
use crate::error::RuntimeError;
use crate::runtime::execution::{ExecutionContext, TraceFrame};
use crate::types::FunctionId;

/// Where a `jal` lands
#[derive(Debug, Clone, Copy)]
pub enum JalTarget {
    /// Script function entry address
    Script(u32),
    /// Host function; the trampoline runs it
    Host,
}

/// Services the interpreter needs from the surrounding backend.
pub trait HostInterface {
    /// Resolve a `jal` function id.
    fn jal_target(&self, fid: u32) -> Option<JalTarget>;

    /// Run a host function: read arguments from the register file per
    /// the signature, build the argument views, invoke the thunk.
    fn call_host(
        &mut self,
        fid: u32,
        state: &mut State,
        ectx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError>;
}

/// The register VM.
#[derive(Debug)]
pub struct Interpreter {
    /// Execution state
    pub state: State,
    stack_size: u32,
    trap_div0: bool,
}

impl Interpreter {
    /// New VM with the given memory plan.
    pub fn new(mem_size: u32, stack_size: u32, trap_div0: bool) -> Self {
        Self {
            state: State::new(mem_size),
            stack_size,
            trap_div0,
        }
    }

    /// Execute from `entry` until the outermost return or a `term`.
    ///
    /// On error the trace on `ectx` carries the message and the frame
    /// stack at the point of failure.
    pub fn execute(
        &mut self,
        code: &[VmInstruction],
        entry: u32,
        host: &mut dyn HostInterface,
        ectx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let s = &mut self.state;
        s.set(VmReg::Ip, entry as u64);
        // Address 0 holds `term`; the outermost return lands there.
        s.set(VmReg::Ra, 0);

        let mut frames: Vec<TraceFrame> = Vec::new();

        macro_rules! fail {
            ($err:expr) => {{
                let err = $err;
                ectx.trace.record(err.to_string());
                ectx.trace.frames = frames.clone();
                return Err(err);
            }};
        }

        loop {
            let ip = self.state.get(VmReg::Ip);
            if ip >= code.len() as u64 {
                break;
            }
            if ectx.cancelled() {
                fail!(RuntimeError::Cancelled);
            }
            let sp = self.state.get(VmReg::Sp);
            if sp > self.stack_size as u64 {
                fail!(RuntimeError::StackOverflow {
                    sp,
                    stack_size: self.stack_size as u64,
                });
            }

            let instr = code[ip as usize];
            let Some(op) = instr.op() else {
                fail!(RuntimeError::InvalidInstruction { ip });
            };
            tracing::trace!(ip, %instr, "step");

            let s = &mut self.state;

            // Operand accessors; the encoder guarantees the slots are
            // populated for the family, so missing operands read $zero.
            let r1 = instr.op1().unwrap_or(VmReg::Zero);
            let r2 = instr.op2().unwrap_or(VmReg::Zero);
            let r3 = instr.op3().unwrap_or(VmReg::Zero);

            macro_rules! bin_i {
                ($f:expr) => {{
                    let v = $f(s.get_i(r2), s.get_i(r3));
                    s.set(r1, v as u64);
                }};
            }
            macro_rules! bin_ii {
                ($f:expr) => {{
                    let v = $f(s.get_i(r2), instr.imm_i());
                    s.set(r1, v as u64);
                }};
            }
            macro_rules! bin_u {
                ($f:expr) => {{
                    let v = $f(s.get(r2), s.get(r3));
                    s.set(r1, v);
                }};
            }
            macro_rules! bin_ui {
                ($f:expr) => {{
                    let v = $f(s.get(r2), instr.imm_u());
                    s.set(r1, v);
                }};
            }
            macro_rules! bin_f {
                ($f:expr) => {{
                    let v = $f(s.get_f32(r2), s.get_f32(r3));
                    s.set_f32(r1, v);
                }};
            }
            macro_rules! bin_fi {
                ($f:expr) => {{
                    let v = $f(s.get_f32(r2), instr.imm_f() as f32);
                    s.set_f32(r1, v);
                }};
            }
            macro_rules! bin_d {
                ($f:expr) => {{
                    let v = $f(s.get_f64(r2), s.get_f64(r3));
                    s.set_f64(r1, v);
                }};
            }
            macro_rules! bin_di {
                ($f:expr) => {{
                    let v = $f(s.get_f64(r2), instr.imm_f());
                    s.set_f64(r1, v);
                }};
            }
            macro_rules! cmp_f {
                ($f:expr) => {{
                    let v: bool = $f(s.get_f32(r2), s.get_f32(r3));
                    s.set(r1, u64::from(v));
                }};
            }
            macro_rules! cmp_fi {
                ($f:expr) => {{
                    let v: bool = $f(s.get_f32(r2), instr.imm_f() as f32);
                    s.set(r1, u64::from(v));
                }};
            }
            macro_rules! cmp_d {
                ($f:expr) => {{
                    let v: bool = $f(s.get_f64(r2), s.get_f64(r3));
                    s.set(r1, u64::from(v));
                }};
            }
            macro_rules! cmp_di {
                ($f:expr) => {{
                    let v: bool = $f(s.get_f64(r2), instr.imm_f());
                    s.set(r1, u64::from(v));
                }};
            }
            macro_rules! branch {
                ($cond:expr) => {{
                    if $cond {
                        s.set(VmReg::Ip, instr.imm_u());
                        continue;
                    }
                }};
            }
            macro_rules! load {
                ($size:expr) => {{
                    let addr = s.get(r2).wrapping_add(instr.imm_u());
                    match s.load(addr, $size) {
                        Ok(v) => s.set(r1, v),
                        Err(e) => fail!(e),
                    }
                }};
            }
            macro_rules! store {
                ($size:expr) => {{
                    let addr = s.get(r2).wrapping_add(instr.imm_u());
                    let v = s.get(r1);
                    if let Err(e) = s.store(addr, $size, v) {
                        fail!(e)
                    }
                }};
            }

            let div_i = |a: i64, b: i64| if b == 0 { None } else { Some(a.wrapping_div(b)) };
            let div_u = |a: u64, b: u64| if b == 0 { None } else { Some(a / b) };

            match op {
                VmOp::Null => {}
                VmOp::Term => break,

                // ---------------- memory ----------------
                VmOp::Ld8 => load!(1),
                VmOp::Ld16 => load!(2),
                VmOp::Ld32 => load!(4),
                VmOp::Ld64 => load!(8),
                VmOp::St8 => store!(1),
                VmOp::St16 => store!(2),
                VmOp::St32 => store!(4),
                VmOp::St64 => store!(8),
                VmOp::Mptr => s.set(r1, instr.imm_u()),
                VmOp::Mtfp => {
                    let v = s.get(r1);
                    s.set(r2, v);
                }
                VmOp::Mffp => {
                    let v = s.get(r1);
                    s.set(r2, v);
                }

                // ---------------- vectors ----------------
                VmOp::V2fAdd | VmOp::V2fSub | VmOp::V2fMul | VmOp::V2fDiv => {
                    if let Err(e) = self.vec_f32_bin(op, r1, r2, r3, 2) {
                        fail!(e)
                    }
                }
                VmOp::V3fAdd | VmOp::V3fSub | VmOp::V3fMul | VmOp::V3fDiv => {
                    if let Err(e) = self.vec_f32_bin(op, r1, r2, r3, 3) {
                        fail!(e)
                    }
                }
                VmOp::V4fAdd | VmOp::V4fSub | VmOp::V4fMul | VmOp::V4fDiv => {
                    if let Err(e) = self.vec_f32_bin(op, r1, r2, r3, 4) {
                        fail!(e)
                    }
                }
                VmOp::V2dAdd | VmOp::V2dSub | VmOp::V2dMul | VmOp::V2dDiv => {
                    if let Err(e) = self.vec_f64_bin(op, r1, r2, r3, 2) {
                        fail!(e)
                    }
                }
                VmOp::V3dAdd | VmOp::V3dSub | VmOp::V3dMul | VmOp::V3dDiv => {
                    if let Err(e) = self.vec_f64_bin(op, r1, r2, r3, 3) {
                        fail!(e)
                    }
                }
                VmOp::V4dAdd | VmOp::V4dSub | VmOp::V4dMul | VmOp::V4dDiv => {
                    if let Err(e) = self.vec_f64_bin(op, r1, r2, r3, 4) {
                        fail!(e)
                    }
                }
                VmOp::V2fNeg => {
                    if let Err(e) = self.vec_f32_neg(r1, r2, 2) {
                        fail!(e)
                    }
                }
                VmOp::V3fNeg => {
                    if let Err(e) = self.vec_f32_neg(r1, r2, 3) {
                        fail!(e)
                    }
                }
                VmOp::V4fNeg => {
                    if let Err(e) = self.vec_f32_neg(r1, r2, 4) {
                        fail!(e)
                    }
                }
                VmOp::V2dNeg => {
                    if let Err(e) = self.vec_f64_neg(r1, r2, 2) {
                        fail!(e)
                    }
                }
                VmOp::V3dNeg => {
                    if let Err(e) = self.vec_f64_neg(r1, r2, 3) {
                        fail!(e)
                    }
                }
                VmOp::V4dNeg => {
                    if let Err(e) = self.vec_f64_neg(r1, r2, 4) {
                        fail!(e)
                    }
                }
                VmOp::V2fDot => {
                    if let Err(e) = self.vec_f32_dot(r1, r2, r3, 2) {
                        fail!(e)
                    }
                }
                VmOp::V3fDot => {
                    if let Err(e) = self.vec_f32_dot(r1, r2, r3, 3) {
                        fail!(e)
                    }
                }
                VmOp::V4fDot => {
                    if let Err(e) = self.vec_f32_dot(r1, r2, r3, 4) {
                        fail!(e)
                    }
                }
                VmOp::V2dDot => {
                    if let Err(e) = self.vec_f64_dot(r1, r2, r3, 2) {
                        fail!(e)
                    }
                }
                VmOp::V3dDot => {
                    if let Err(e) = self.vec_f64_dot(r1, r2, r3, 3) {
                        fail!(e)
                    }
                }
                VmOp::V4dDot => {
                    if let Err(e) = self.vec_f64_dot(r1, r2, r3, 4) {
                        fail!(e)
                    }
                }
                VmOp::V3fCross => {
                    if let Err(e) = self.vec_f32_cross(r1, r2, r3) {
                        fail!(e)
                    }
                }
                VmOp::V3dCross => {
                    if let Err(e) = self.vec_f64_cross(r1, r2, r3) {
                        fail!(e)
                    }
                }

                // ---------------- signed arithmetic ----------------
                VmOp::Add => bin_i!(|a: i64, b: i64| a.wrapping_add(b)),
                VmOp::Addi => bin_ii!(|a: i64, b: i64| a.wrapping_add(b)),
                VmOp::Sub => bin_i!(|a: i64, b: i64| a.wrapping_sub(b)),
                VmOp::Subi => bin_ii!(|a: i64, b: i64| a.wrapping_sub(b)),
                VmOp::Subir => bin_ii!(|a: i64, b: i64| b.wrapping_sub(a)),
                VmOp::Mul => bin_i!(|a: i64, b: i64| a.wrapping_mul(b)),
                VmOp::Muli => bin_ii!(|a: i64, b: i64| a.wrapping_mul(b)),
                VmOp::Div => match div_i(s.get_i(r2), s.get_i(r3)) {
                    Some(v) => s.set(r1, v as u64),
                    None if self.trap_div0 => fail!(RuntimeError::DivisionByZero),
                    None => s.set(r1, 0),
                },
                VmOp::Divi => match div_i(s.get_i(r2), instr.imm_i()) {
                    Some(v) => s.set(r1, v as u64),
                    None if self.trap_div0 => fail!(RuntimeError::DivisionByZero),
                    None => s.set(r1, 0),
                },
                VmOp::Divir => match div_i(instr.imm_i(), s.get_i(r2)) {
                    Some(v) => s.set(r1, v as u64),
                    None if self.trap_div0 => fail!(RuntimeError::DivisionByZero),
                    None => s.set(r1, 0),
                },
                VmOp::Neg => {
                    let v = s.get_i(r2).wrapping_neg();
                    s.set(r1, v as u64);
                }

                // ---------------- unsigned arithmetic ----------------
                VmOp::Addu => bin_u!(|a: u64, b: u64| a.wrapping_add(b)),
                VmOp::Addui => bin_ui!(|a: u64, b: u64| a.wrapping_add(b)),
                VmOp::Subu => bin_u!(|a: u64, b: u64| a.wrapping_sub(b)),
                VmOp::Subui => bin_ui!(|a: u64, b: u64| a.wrapping_sub(b)),
                VmOp::Subuir => bin_ui!(|a: u64, b: u64| b.wrapping_sub(a)),
                VmOp::Mulu => bin_u!(|a: u64, b: u64| a.wrapping_mul(b)),
                VmOp::Mului => bin_ui!(|a: u64, b: u64| a.wrapping_mul(b)),
                VmOp::Divu => match div_u(s.get(r2), s.get(r3)) {
                    Some(v) => s.set(r1, v),
                    None if self.trap_div0 => fail!(RuntimeError::DivisionByZero),
                    None => s.set(r1, 0),
                },
                VmOp::Divui => match div_u(s.get(r2), instr.imm_u()) {
                    Some(v) => s.set(r1, v),
                    None if self.trap_div0 => fail!(RuntimeError::DivisionByZero),
                    None => s.set(r1, 0),
                },
                VmOp::Divuir => match div_u(instr.imm_u(), s.get(r2)) {
                    Some(v) => s.set(r1, v),
                    None if self.trap_div0 => fail!(RuntimeError::DivisionByZero),
                    None => s.set(r1, 0),
                },

                // ---------------- conversions (in place) ----------------
                VmOp::CvtIf => {
                    let v = s.get_i(r1) as f32;
                    s.set_f32(r1, v);
                }
                VmOp::CvtId => {
                    let v = s.get_i(r1) as f64;
                    s.set_f64(r1, v);
                }
                VmOp::CvtIu => {
                    let v = s.get_i(r1);
                    s.set(r1, v as u64);
                }
                VmOp::CvtUf => {
                    let v = s.get(r1) as f32;
                    s.set_f32(r1, v);
                }
                VmOp::CvtUd => {
                    let v = s.get(r1) as f64;
                    s.set_f64(r1, v);
                }
                VmOp::CvtUi => {
                    let v = s.get(r1) as i64;
                    s.set(r1, v as u64);
                }
                VmOp::CvtFi => {
                    let v = s.get_f32(r1) as i64;
                    s.set(r1, v as u64);
                }
                VmOp::CvtFu => {
                    let v = s.get_f32(r1) as u64;
                    s.set(r1, v);
                }
                VmOp::CvtFd => {
                    let v = s.get_f32(r1) as f64;
                    s.set_f64(r1, v);
                }
                VmOp::CvtDi => {
                    let v = s.get_f64(r1) as i64;
                    s.set(r1, v as u64);
                }
                VmOp::CvtDu => {
                    let v = s.get_f64(r1) as u64;
                    s.set(r1, v);
                }
                VmOp::CvtDf => {
                    let v = s.get_f64(r1) as f32;
                    s.set_f32(r1, v);
                }

                // ---------------- f32 arithmetic ----------------
                VmOp::Fadd => bin_f!(|a: f32, b: f32| a + b),
                VmOp::Faddi => bin_fi!(|a: f32, b: f32| a + b),
                VmOp::Fsub => bin_f!(|a: f32, b: f32| a - b),
                VmOp::Fsubi => bin_fi!(|a: f32, b: f32| a - b),
                VmOp::Fsubir => bin_fi!(|a: f32, b: f32| b - a),
                VmOp::Fmul => bin_f!(|a: f32, b: f32| a * b),
                VmOp::Fmuli => bin_fi!(|a: f32, b: f32| a * b),
                VmOp::Fdiv => bin_f!(|a: f32, b: f32| a / b),
                VmOp::Fdivi => bin_fi!(|a: f32, b: f32| a / b),
                VmOp::Fdivir => bin_fi!(|a: f32, b: f32| b / a),
                VmOp::Negf => {
                    let v = -s.get_f32(r2);
                    s.set_f32(r1, v);
                }

                // ---------------- f64 arithmetic ----------------
                VmOp::Dadd => bin_d!(|a: f64, b: f64| a + b),
                VmOp::Daddi => bin_di!(|a: f64, b: f64| a + b),
                VmOp::Dsub => bin_d!(|a: f64, b: f64| a - b),
                VmOp::Dsubi => bin_di!(|a: f64, b: f64| a - b),
                VmOp::Dsubir => bin_di!(|a: f64, b: f64| b - a),
                VmOp::Dmul => bin_d!(|a: f64, b: f64| a * b),
                VmOp::Dmuli => bin_di!(|a: f64, b: f64| a * b),
                VmOp::Ddiv => bin_d!(|a: f64, b: f64| a / b),
                VmOp::Ddivi => bin_di!(|a: f64, b: f64| a / b),
                VmOp::Ddivir => bin_di!(|a: f64, b: f64| b / a),
                VmOp::Negd => {
                    let v = -s.get_f64(r2);
                    s.set_f64(r1, v);
                }

                // ---------------- integer comparison ----------------
                VmOp::Lt => bin_i!(|a: i64, b: i64| i64::from(a < b)),
                VmOp::Lti => bin_ii!(|a: i64, b: i64| i64::from(a < b)),
                VmOp::Lte => bin_i!(|a: i64, b: i64| i64::from(a <= b)),
                VmOp::Ltei => bin_ii!(|a: i64, b: i64| i64::from(a <= b)),
                VmOp::Gt => bin_i!(|a: i64, b: i64| i64::from(a > b)),
                VmOp::Gti => bin_ii!(|a: i64, b: i64| i64::from(a > b)),
                VmOp::Gte => bin_i!(|a: i64, b: i64| i64::from(a >= b)),
                VmOp::Gtei => bin_ii!(|a: i64, b: i64| i64::from(a >= b)),
                VmOp::Cmp => bin_i!(|a: i64, b: i64| i64::from(a == b)),
                VmOp::Cmpi => bin_ii!(|a: i64, b: i64| i64::from(a == b)),
                VmOp::Ncmp => bin_i!(|a: i64, b: i64| i64::from(a != b)),
                VmOp::Ncmpi => bin_ii!(|a: i64, b: i64| i64::from(a != b)),

                // ---------------- f32 comparison ----------------
                VmOp::Flt => cmp_f!(|a: f32, b: f32| a < b),
                VmOp::Flti => cmp_fi!(|a: f32, b: f32| a < b),
                VmOp::Flte => cmp_f!(|a: f32, b: f32| a <= b),
                VmOp::Fltei => cmp_fi!(|a: f32, b: f32| a <= b),
                VmOp::Fgt => cmp_f!(|a: f32, b: f32| a > b),
                VmOp::Fgti => cmp_fi!(|a: f32, b: f32| a > b),
                VmOp::Fgte => cmp_f!(|a: f32, b: f32| a >= b),
                VmOp::Fgtei => cmp_fi!(|a: f32, b: f32| a >= b),
                VmOp::Fcmp => cmp_f!(|a: f32, b: f32| a == b),
                VmOp::Fcmpi => cmp_fi!(|a: f32, b: f32| a == b),
                VmOp::Fncmp => cmp_f!(|a: f32, b: f32| a != b),
                VmOp::Fncmpi => cmp_fi!(|a: f32, b: f32| a != b),

                // ---------------- f64 comparison ----------------
                VmOp::Dlt => cmp_d!(|a: f64, b: f64| a < b),
                VmOp::Dlti => cmp_di!(|a: f64, b: f64| a < b),
                VmOp::Dlte => cmp_d!(|a: f64, b: f64| a <= b),
                VmOp::Dltei => cmp_di!(|a: f64, b: f64| a <= b),
                VmOp::Dgt => cmp_d!(|a: f64, b: f64| a > b),
                VmOp::Dgti => cmp_di!(|a: f64, b: f64| a > b),
                VmOp::Dgte => cmp_d!(|a: f64, b: f64| a >= b),
                VmOp::Dgtei => cmp_di!(|a: f64, b: f64| a >= b),
                VmOp::Dcmp => cmp_d!(|a: f64, b: f64| a == b),
                VmOp::Dcmpi => cmp_di!(|a: f64, b: f64| a == b),
                VmOp::Dncmp => cmp_d!(|a: f64, b: f64| a != b),
                VmOp::Dncmpi => cmp_di!(|a: f64, b: f64| a != b),

                // ---------------- boolean ----------------
                VmOp::And => bin_u!(|a: u64, b: u64| u64::from(a != 0 && b != 0)),
                VmOp::Andi => bin_ui!(|a: u64, b: u64| u64::from(a != 0 && b != 0)),
                VmOp::Or => bin_u!(|a: u64, b: u64| u64::from(a != 0 || b != 0)),
                VmOp::Ori => bin_ui!(|a: u64, b: u64| u64::from(a != 0 || b != 0)),

                // ---------------- bitwise ----------------
                VmOp::Band => bin_u!(|a: u64, b: u64| a & b),
                VmOp::Bandi => bin_ui!(|a: u64, b: u64| a & b),
                VmOp::Bor => bin_u!(|a: u64, b: u64| a | b),
                VmOp::Bori => bin_ui!(|a: u64, b: u64| a | b),
                VmOp::Xor => bin_u!(|a: u64, b: u64| a ^ b),
                VmOp::Xori => bin_ui!(|a: u64, b: u64| a ^ b),
                VmOp::Sl => bin_u!(|a: u64, b: u64| a.wrapping_shl(b as u32)),
                VmOp::Sli => bin_ui!(|a: u64, b: u64| a.wrapping_shl(b as u32)),
                VmOp::Slir => bin_ui!(|a: u64, b: u64| b.wrapping_shl(a as u32)),
                VmOp::Sr => bin_u!(|a: u64, b: u64| a.wrapping_shr(b as u32)),
                VmOp::Sri => bin_ui!(|a: u64, b: u64| a.wrapping_shr(b as u32)),
                VmOp::Srir => bin_ui!(|a: u64, b: u64| b.wrapping_shr(a as u32)),

                // ---------------- control flow ----------------
                VmOp::Beqz => branch!(s.get_i(r1) == 0),
                VmOp::Bneqz => branch!(s.get_i(r1) != 0),
                VmOp::Bgtz => branch!(s.get_i(r1) > 0),
                VmOp::Bgtez => branch!(s.get_i(r1) >= 0),
                VmOp::Bltz => branch!(s.get_i(r1) < 0),
                VmOp::Bltez => branch!(s.get_i(r1) <= 0),
                VmOp::Jmp => {
                    s.set(VmReg::Ip, instr.imm_u());
                    continue;
                }
                VmOp::Jmpr => {
                    let target = s.get(r1);
                    if r1 == VmReg::Ra {
                        frames.pop();
                    }
                    s.set(VmReg::Ip, target);
                    continue;
                }
                VmOp::Jal => {
                    let fid = instr.imm_u() as u32;
                    match host.jal_target(fid) {
                        Some(JalTarget::Script(addr)) => {
                            frames.push(TraceFrame {
                                function: FunctionId(fid),
                                ip: ip as u32,
                            });
                            s.set(VmReg::Ra, ip + 1);
                            s.set(VmReg::Ip, addr as u64);
                            continue;
                        }
                        Some(JalTarget::Host) => {
                            if let Err(e) = host.call_host(fid, &mut self.state, ectx) {
                                ectx.trace.record(e.to_string());
                                ectx.trace.frames = frames.clone();
                                return Err(e);
                            }
                            if ectx.trace.has_error {
                                // Host thunks may record errors without
                                // returning one; unwind either way.
                                ectx.trace.frames = frames.clone();
                                return Err(RuntimeError::Trace(ectx.trace.error.clone()));
                            }
                        }
                        None => fail!(RuntimeError::UnknownFunction { id: fid }),
                    }
                }
                VmOp::Jalr => {
                    let target = s.get(r1);
                    s.set(VmReg::Ra, ip + 1);
                    s.set(VmReg::Ip, target);
                    continue;
                }
            }

            let next = self.state.get(VmReg::Ip) + 1;
            self.state.set(VmReg::Ip, next);
        }

        Ok(())
    }

    // Vector helpers operate on memory-resident vectors addressed by
    // general-purpose registers.

    fn vec_f32_bin(
        &mut self,
        op: VmOp,
        dst: VmReg,
        a: VmReg,
        b: VmReg,
        n: u32,
    ) -> Result<(), RuntimeError> {
        let (da, ab, bb) = (self.state.get(dst), self.state.get(a), self.state.get(b));
        for k in 0..n {
            let x = f32::from_bits(self.state.load(ab + (k * 4) as u64, 4)? as u32);
            let y = f32::from_bits(self.state.load(bb + (k * 4) as u64, 4)? as u32);
            let v = match op {
                VmOp::V2fAdd | VmOp::V3fAdd | VmOp::V4fAdd => x + y,
                VmOp::V2fSub | VmOp::V3fSub | VmOp::V4fSub => x - y,
                VmOp::V2fMul | VmOp::V3fMul | VmOp::V4fMul => x * y,
                _ => x / y,
            };
            self.state.store(da + (k * 4) as u64, 4, v.to_bits() as u64)?;
        }
        Ok(())
    }

    fn vec_f64_bin(
        &mut self,
        op: VmOp,
        dst: VmReg,
        a: VmReg,
        b: VmReg,
        n: u32,
    ) -> Result<(), RuntimeError> {
        let (da, ab, bb) = (self.state.get(dst), self.state.get(a), self.state.get(b));
        for k in 0..n {
            let x = f64::from_bits(self.state.load(ab + (k * 8) as u64, 8)?);
            let y = f64::from_bits(self.state.load(bb + (k * 8) as u64, 8)?);
            let v = match op {
                VmOp::V2dAdd | VmOp::V3dAdd | VmOp::V4dAdd => x + y,
                VmOp::V2dSub | VmOp::V3dSub | VmOp::V4dSub => x - y,
                VmOp::V2dMul | VmOp::V3dMul | VmOp::V4dMul => x * y,
                _ => x / y,
            };
            self.state.store(da + (k * 8) as u64, 8, v.to_bits())?;
        }
        Ok(())
    }

    fn vec_f32_neg(&mut self, dst: VmReg, src: VmReg, n: u32) -> Result<(), RuntimeError> {
        let (da, sa) = (self.state.get(dst), self.state.get(src));
        for k in 0..n {
            let x = f32::from_bits(self.state.load(sa + (k * 4) as u64, 4)? as u32);
            self.state.store(da + (k * 4) as u64, 4, (-x).to_bits() as u64)?;
        }
        Ok(())
    }

    fn vec_f64_neg(&mut self, dst: VmReg, src: VmReg, n: u32) -> Result<(), RuntimeError> {
        let (da, sa) = (self.state.get(dst), self.state.get(src));
        for k in 0..n {
            let x = f64::from_bits(self.state.load(sa + (k * 8) as u64, 8)?);
            self.state.store(da + (k * 8) as u64, 8, (-x).to_bits())?;
        }
        Ok(())
    }

    fn vec_f32_dot(&mut self, dst: VmReg, a: VmReg, b: VmReg, n: u32) -> Result<(), RuntimeError> {
        let (ab, bb) = (self.state.get(a), self.state.get(b));
        let mut acc = 0f32;
        for k in 0..n {
            let x = f32::from_bits(self.state.load(ab + (k * 4) as u64, 4)? as u32);
            let y = f32::from_bits(self.state.load(bb + (k * 4) as u64, 4)? as u32);
            acc += x * y;
        }
        self.state.set_f32(dst, acc);
        Ok(())
    }

    fn vec_f64_dot(&mut self, dst: VmReg, a: VmReg, b: VmReg, n: u32) -> Result<(), RuntimeError> {
        let (ab, bb) = (self.state.get(a), self.state.get(b));
        let mut acc = 0f64;
        for k in 0..n {
            let x = f64::from_bits(self.state.load(ab + (k * 8) as u64, 8)?);
            let y = f64::from_bits(self.state.load(bb + (k * 8) as u64, 8)?);
            acc += x * y;
        }
        self.state.set_f64(dst, acc);
        Ok(())
    }

    fn vec_f32_cross(&mut self, dst: VmReg, a: VmReg, b: VmReg) -> Result<(), RuntimeError> {
        let (da, ab, bb) = (self.state.get(dst), self.state.get(a), self.state.get(b));
        let mut av = [0f32; 3];
        let mut bv = [0f32; 3];
        for k in 0..3u64 {
            av[k as usize] = f32::from_bits(self.state.load(ab + k * 4, 4)? as u32);
            bv[k as usize] = f32::from_bits(self.state.load(bb + k * 4, 4)? as u32);
        }
        let out = [
            av[1] * bv[2] - av[2] * bv[1],
            av[2] * bv[0] - av[0] * bv[2],
            av[0] * bv[1] - av[1] * bv[0],
        ];
        for k in 0..3u64 {
            self.state.store(da + k * 4, 4, out[k as usize].to_bits() as u64)?;
        }
        Ok(())
    }

    fn vec_f64_cross(&mut self, dst: VmReg, a: VmReg, b: VmReg) -> Result<(), RuntimeError> {
        let (da, ab, bb) = (self.state.get(dst), self.state.get(a), self.state.get(b));
        let mut av = [0f64; 3];
        let mut bv = [0f64; 3];
        for k in 0..3u64 {
            av[k as usize] = f64::from_bits(self.state.load(ab + k * 8, 8)?);
            bv[k as usize] = f64::from_bits(self.state.load(bb + k * 8, 8)?);
        }
        let out = [
            av[1] * bv[2] - av[2] * bv[1],
            av[2] * bv[0] - av[0] * bv[2],
            av[0] * bv[1] - av[1] * bv[0],
        ];
        for k in 0..3u64 {
            self.state.store(da + k * 8, 8, out[k as usize].to_bits())?;
        }
        Ok(())
    }
}
