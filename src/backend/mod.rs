//! # Backend
//!
//! Takes optimized IR, runs the register allocator, encodes VM
//! instructions, and owns the installed code section plus the host-call
//! trampoline.

pub mod lower;
pub mod regalloc;
pub mod vm;

pub use lower::{FunctionLowering, LoweredFunction};
pub use regalloc::{RegAllocStats, RegisterAllocator, StackManager};

use std::collections::HashMap;

use crate::backend::vm::instruction::{VmInstruction, VmOp};
use crate::backend::vm::interp::{HostInterface, Interpreter, JalTarget};
use crate::backend::vm::registers::VmReg;
use crate::backend::vm::state::State;
use crate::config::Config;
use crate::error::RuntimeError;
use crate::ffi::thunk::ThunkCall;
use crate::runtime::execution::{call_context, ExecutionContext};
use crate::runtime::host_objects::{Heap, HostObjects};
use crate::types::{ArgKind, FunctionRegistry, ModuleId, TypeRegistry};

/// Installed code, function entry table and module data map.
pub struct VmBackend {
    /// The interpreter and its state
    pub interp: Interpreter,
    /// Global code section; address 0 holds `term` so the outermost
    /// return lands on it
    pub code: Vec<VmInstruction>,
    /// Function id -> entry address
    pub(crate) entries: HashMap<u32, u32>,
    /// Module id -> data section base address
    pub data_bases: HashMap<u32, u64>,
    data_top: u64,
    stack_size: u32,
    /// Per-function allocation statistics, for diagnostics
    pub alloc_stats: HashMap<u32, RegAllocStats>,
}

impl VmBackend {
    /// New backend for a memory plan.
    pub fn new(config: &Config) -> Self {
        Self {
            interp: Interpreter::new(
                config.memory_size,
                config.stack_size,
                config.trap_division_by_zero,
            ),
            code: vec![VmInstruction::new(VmOp::Term)],
            entries: HashMap::new(),
            data_bases: HashMap::new(),
            data_top: config.stack_size as u64,
            stack_size: config.stack_size,
            alloc_stats: HashMap::new(),
        }
    }

    /// Stack region size.
    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }

    /// Reserve a module's data section in memory and record its base.
    pub fn reserve_data(&mut self, module: ModuleId, size: u32) -> u64 {
        let base = self.data_top;
        self.data_top += size.div_ceil(8) as u64 * 8;
        self.data_bases.insert(module.0, base);
        base
    }

    /// Top of the data region; the heap floor.
    pub fn data_top(&self) -> u64 {
        self.data_top
    }

    /// Append a lowered function, rebasing its internal jump targets to
    /// the global code section, and record its entry address.
    pub fn install_function(&mut self, fid: u32, lowered: LoweredFunction) -> u32 {
        let base = self.code.len() as u32;
        for mut instr in lowered.code {
            if let Some(op) = instr.op() {
                let is_local_jump = op == VmOp::Jmp
                    || matches!(
                        op,
                        VmOp::Beqz
                            | VmOp::Bneqz
                            | VmOp::Bgtz
                            | VmOp::Bgtez
                            | VmOp::Bltz
                            | VmOp::Bltez
                    );
                if is_local_jump {
                    instr.imm += base as u64;
                }
            }
            self.code.push(instr);
        }
        self.entries.insert(fid, base);
        self.alloc_stats.insert(fid, lowered.stats);
        tracing::debug!(fid, base, "installed function");
        base
    }

    /// Entry address of an installed function.
    pub fn entry_of(&self, fid: u32) -> Option<u32> {
        self.entries.get(&fid).copied()
    }
}

/// Host services handed to the interpreter for one execution: function
/// resolution and the host-call trampoline.
pub struct HostDispatch<'a> {
    /// Type registry (read)
    pub types: &'a TypeRegistry,
    /// Function registry (read)
    pub functions: &'a FunctionRegistry,
    /// Host object slab
    pub objects: &'a mut HostObjects,
    /// Script heap
    pub heap: &'a mut Heap,
    /// Function entry table
    pub entries: &'a HashMap<u32, u32>,
}

impl HostInterface for HostDispatch<'_> {
    fn jal_target(&self, fid: u32) -> Option<JalTarget> {
        if let Some(addr) = self.entries.get(&fid) {
            return Some(JalTarget::Script(*addr));
        }
        let func = self.functions.get(crate::types::FunctionId(fid))?;
        if func.is_host() {
            Some(JalTarget::Host)
        } else {
            None
        }
    }

    /// The trampoline: load the target function, read its arguments
    /// from the register file according to the signature, build the
    /// argument views and invoke the bound thunk.
    fn call_host(
        &mut self,
        fid: u32,
        state: &mut State,
        ectx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let func = self
            .functions
            .get(crate::types::FunctionId(fid))
            .ok_or(RuntimeError::UnknownFunction { id: fid })?;
        let sig_tp = self
            .types
            .get(func.signature)
            .ok_or(RuntimeError::UnknownFunction { id: fid })?;
        let sig = sig_tp
            .signature()
            .ok_or(RuntimeError::UnknownFunction { id: fid })?
            .clone();
        let thunk = func
            .thunk()
            .cloned()
            .ok_or(RuntimeError::UnknownFunction { id: fid })?;

        let cctx = state.get(VmReg::A0);
        let ret_off = state.load(cctx + call_context::RET_PTR as u64, 8)?;
        let this = state.load(cctx + call_context::THIS_PTR as u64, 8)?;
        let caps = state.load(cctx + call_context::CAPTURE_PTR as u64, 8)?;
        ectx.capture_ptr = caps;
        ectx.ret_ptr = ret_off;
        ectx.func_ptr = fid as u64;

        let mut args = Vec::new();
        let mut next_int = 1usize; // a0 carries the call context
        let mut next_fp = 0usize;
        for arg in sig.explicit_args() {
            let is_fp = arg.kind == ArgKind::Value
                && self
                    .types
                    .get(arg.type_id)
                    .map(|t| t.meta.is_floating_point)
                    .unwrap_or(false);
            let bits = if is_fp {
                let r = VmReg::float_arg(next_fp).unwrap_or(VmReg::Fa15);
                next_fp += 1;
                state.get(r)
            } else {
                let r = VmReg::int_arg(next_int).unwrap_or(VmReg::A15);
                next_int += 1;
                state.get(r)
            };
            args.push(bits);
        }

        tracing::trace!(fid, func = %func.name, "host call");
        let mut call = ThunkCall::new(
            state,
            self.objects,
            self.heap,
            ectx,
            &func.name,
            args,
            this,
            ret_off,
        );
        thunk(&mut call)
    }
}
