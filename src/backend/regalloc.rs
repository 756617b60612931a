//! Linear-scan register allocation
//!
//! Two independent passes run over one function's code: one for integer
//! live ranges, one for floating-point live ranges. Live ranges are
//! extended to cover backward jumps into them (iterated to fixpoint) so
//! values stay alive across loop back edges. When the active set is
//! full, the range with the largest end is the spill candidate: it
//! either donates its physical register to the new range or the new
//! range itself is spilled. Spill slots come from a coalescing stack
//! manager.

use crate::compiler::ir::{Opcode, VRegId, ValueKind};
use crate::optimizer::CodeHolder;
use crate::types::TypeRegistry;

/// Sentinel for "not spilled"
const NO_STACK: u32 = u32::MAX;
/// Sentinel for "no physical register yet"
const NO_REG: u32 = u32::MAX;
/// Spill slots preserve the whole register word; narrow values ride
/// sign-extended in registers, so a narrower slot would corrupt them.
const SPILL_SLOT_SIZE: u32 = 8;

/// One slot in the stack frame partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    start: u32,
    end: u32,
    in_use: bool,
}

/// Manages spill-slot addresses as a sorted partition of the frame.
///
/// `alloc` prefers the first unused slot of exact size, then splits a
/// larger unused slot, then appends; `free` coalesces with adjacent
/// unused neighbours.
#[derive(Debug, Default)]
pub struct StackManager {
    slots: Vec<Slot>,
}

impl StackManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all slots.
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    /// Allocate `sz` bytes and return the slot's start offset.
    pub fn alloc(&mut self, sz: u32) -> u32 {
        for i in 0..self.slots.len() {
            if self.slots[i].in_use {
                continue;
            }
            let s_sz = self.slots[i].end - self.slots[i].start;
            if s_sz > sz {
                // Split the slot
                let split = Slot {
                    start: self.slots[i].start + sz,
                    end: self.slots[i].end,
                    in_use: false,
                };
                self.slots[i].end = self.slots[i].start + sz;
                self.slots[i].in_use = true;
                let start = self.slots[i].start;
                self.slots.insert(i + 1, split);
                return start;
            } else if s_sz == sz {
                self.slots[i].in_use = true;
                return self.slots[i].start;
            }
        }

        let start = self.slots.last().map(|s| s.end).unwrap_or(0);
        self.slots.push(Slot {
            start,
            end: start + sz,
            in_use: true,
        });
        start
    }

    /// Free the slot starting at `addr`, coalescing with unused
    /// neighbours.
    pub fn free(&mut self, addr: u32) {
        let Some(i) = self.slots.iter().position(|s| s.start == addr) else {
            debug_assert!(false, "freeing unknown stack slot {addr}");
            return;
        };
        self.slots[i].in_use = false;

        // Merge with the next slot
        if i + 1 < self.slots.len() && !self.slots[i + 1].in_use {
            self.slots[i].end = self.slots[i + 1].end;
            self.slots.remove(i + 1);
        }
        // Merge with the previous slot
        if i > 0 && !self.slots[i - 1].in_use {
            self.slots[i - 1].end = self.slots[i].end;
            self.slots.remove(i);
        }
        // Trailing unused space shrinks the frame
        while matches!(self.slots.last(), Some(s) if !s.in_use) {
            self.slots.pop();
        }
    }

    /// Current frame size in bytes.
    pub fn size(&self) -> u32 {
        self.slots.last().map(|s| s.end).unwrap_or(0)
    }
}

/// Live range of one virtual register
#[derive(Debug, Clone)]
struct Lifetime {
    reg_id: VRegId,
    new_id: u32,
    stack_loc: u32,
    begin: usize,
    end: usize,
    is_fp: bool,
}

impl Lifetime {
    fn spilled(&self) -> bool {
        self.stack_loc != NO_STACK
    }
}

/// Counters reported by one allocation run
#[derive(Debug, Default, Clone, Copy)]
pub struct RegAllocStats {
    /// Integer ranges pushed to stack slots
    pub gp_spills: u32,
    /// Floating-point ranges pushed to stack slots
    pub fp_spills: u32,
    /// Bytes of spill storage in the frame
    pub spill_bytes: u32,
}

/// Linear-scan allocator over separate GP and FP register classes.
pub struct RegisterAllocator {
    num_gp: u16,
    num_fp: u16,
    stack: StackManager,
    gp_lifetimes: Vec<Lifetime>,
    fp_lifetimes: Vec<Lifetime>,
}

impl RegisterAllocator {
    /// Allocator for a target with `num_gp` integer and `num_fp`
    /// floating-point registers.
    pub fn new(num_gp: u16, num_fp: u16) -> Self {
        Self {
            num_gp,
            num_fp,
            stack: StackManager::new(),
            gp_lifetimes: Vec::new(),
            fp_lifetimes: Vec::new(),
        }
    }

    /// Run allocation over one function. Afterwards every
    /// register-typed operand is either a physical register id in
    /// `1..=k` or a [`ValueKind::Spill`] stack-slot reference.
    pub fn execute(&mut self, ch: &mut CodeHolder, types: &TypeRegistry) -> RegAllocStats {
        tracing::debug!(function = ch.owner.0, "register allocation");
        self.stack.reset();
        self.calc_lifetimes(ch, types);

        let mut stats = RegAllocStats::default();
        let gp = std::mem::take(&mut self.gp_lifetimes);
        stats.gp_spills = self.allocate(gp, self.num_gp, false, ch, types);
        let fp = std::mem::take(&mut self.fp_lifetimes);
        stats.fp_spills = self.allocate(fp, self.num_fp, true, ch, types);
        stats.spill_bytes = self.stack.size();
        stats
    }

    /// Register class of a value. Pointers always ride in GP registers,
    /// whatever they point at.
    fn value_is_fp(&self, types: &TypeRegistry, v: &crate::compiler::ir::Value) -> bool {
        !v.is_pointer
            && types
                .get(v.type_id)
                .map(|t| t.meta.is_floating_point)
                .unwrap_or(false)
    }

    /// Compute live ranges: open at the producing instruction, extend
    /// to the last reference, then widen over backward jumps that land
    /// inside the range (to fixpoint).
    fn calc_lifetimes(&mut self, ch: &CodeHolder, types: &TypeRegistry) {
        self.gp_lifetimes.clear();
        self.fp_lifetimes.clear();

        let code = &ch.code;
        for i in 0..code.len() {
            let Some(assigned) = code[i].assigns() else {
                continue;
            };
            let Some(reg) = assigned.reg_id() else {
                continue;
            };
            if assigned.is_argument {
                continue;
            }
            let is_fp = self.value_is_fp(types, assigned);

            // Skip assignments inside an established range of the same
            // register (re-assignment within a live range).
            let ranges = if is_fp { &self.fp_lifetimes } else { &self.gp_lifetimes };
            if ranges
                .iter()
                .any(|l| l.reg_id == reg && l.begin <= i && l.end > i)
            {
                continue;
            }

            let mut l = Lifetime {
                reg_id: reg,
                new_id: NO_REG,
                stack_loc: NO_STACK,
                begin: i,
                end: i,
                is_fp,
            };

            let mut widen = true;
            while widen {
                // Forward extension to the last reference
                let mut j = l.end + 1;
                while j < code.len() {
                    let other = &code[j];
                    if let Some(a) = other.assigns() {
                        if a.reg_id() == Some(l.reg_id) {
                            if other.involves(l.reg_id, true) {
                                l.end = j;
                                j += 1;
                                continue;
                            }
                            break;
                        }
                    }
                    if other.involves(l.reg_id, false) {
                        l.end = j;
                    }
                    j += 1;
                }

                // Back-edge extension: a backward jump into the range
                // keeps the value live up to the jump itself.
                widen = false;
                for j in (l.end + 1)..code.len() {
                    let instr = &code[j];
                    let targets: [Option<usize>; 2] = match instr.op {
                        Opcode::Jump => [instr.label_at(0).and_then(|t| ch.labels.get(t)), None],
                        Opcode::Branch => [
                            instr.label_at(1).and_then(|t| ch.labels.get(t)),
                            instr.label_at(2).and_then(|t| ch.labels.get(t)),
                        ],
                        _ => [None, None],
                    };
                    for target in targets.into_iter().flatten() {
                        if target > j {
                            continue;
                        }
                        if l.begin < target && l.end >= target && l.end < j {
                            l.end = j;
                            widen = true;
                        }
                    }
                }
            }

            if l.is_fp {
                self.fp_lifetimes.push(l);
            } else {
                self.gp_lifetimes.push(l);
            }
        }
    }

    /// Linear scan over one register class; rewrites operands and
    /// returns the number of spilled ranges.
    fn allocate(
        &mut self,
        mut live: Vec<Lifetime>,
        k: u16,
        is_fp: bool,
        ch: &mut CodeHolder,
        types: &TypeRegistry,
    ) -> u32 {
        live.sort_by_key(|l| l.begin);

        let mut free_regs: Vec<u32> = (1..=k as u32).rev().collect();
        // Indices into `live`, kept sorted by range end
        let mut active: Vec<usize> = Vec::new();

        for idx in 0..live.len() {
            // Expire ranges that ended before this one begins
            let begin = live[idx].begin;
            let mut expired = Vec::new();
            for (pos, &a) in active.iter().enumerate() {
                if live[a].end >= begin {
                    break;
                }
                expired.push(pos);
                free_regs.push(live[a].new_id);
            }
            for pos in expired.into_iter().rev() {
                active.remove(pos);
            }

            if active.len() == k as usize {
                // Spill the active range with the largest end
                let victim_pos = active.len() - 1;
                let victim = active[victim_pos];
                if live[victim].end > live[idx].end {
                    // Steal the victim's register, spill the victim
                    live[idx].new_id = live[victim].new_id;
                    live[victim].stack_loc = self.stack.alloc(SPILL_SLOT_SIZE);
                    tracing::debug!(
                        reg = live[victim].reg_id,
                        slot = live[victim].stack_loc,
                        fp = is_fp,
                        "spilling active range"
                    );
                    active.remove(victim_pos);
                    active.push(idx);
                    active.sort_by_key(|&a| live[a].end);
                } else {
                    live[idx].stack_loc = self.stack.alloc(SPILL_SLOT_SIZE);
                    tracing::debug!(
                        reg = live[idx].reg_id,
                        slot = live[idx].stack_loc,
                        fp = is_fp,
                        "spilling new range"
                    );
                }
            } else {
                let reg = free_regs.pop().expect("free register available");
                live[idx].new_id = reg;
                active.push(idx);
                active.sort_by_key(|&a| live[a].end);
            }
        }

        // Rewrite operands to physical registers or spill slots
        struct Change {
            addr: usize,
            operand: usize,
            lifetime: usize,
        }
        let mut changes = Vec::new();
        for (li, l) in live.iter().enumerate() {
            for addr in l.begin..=l.end.min(ch.code.len() - 1) {
                for (oi, operand) in ch.code[addr].operands.iter().enumerate() {
                    if operand.reg_id() == Some(l.reg_id)
                        && self.value_is_fp(types, operand) == l.is_fp
                    {
                        changes.push(Change {
                            addr,
                            operand: oi,
                            lifetime: li,
                        });
                    }
                }
            }
        }

        for c in &changes {
            let l = &live[c.lifetime];
            let operand = &mut ch.code[c.addr].operands[c.operand];
            if l.spilled() {
                operand.kind = ValueKind::Spill(l.stack_loc);
                tracing::debug!(
                    addr = c.addr,
                    reg = l.reg_id,
                    slot = l.stack_loc,
                    "reallocate: register -> spill slot"
                );
            } else {
                operand.kind = ValueKind::Reg(l.new_id);
                tracing::debug!(
                    addr = c.addr,
                    reg = l.reg_id,
                    phys = l.new_id,
                    "reallocate: register -> physical"
                );
            }
        }

        live.iter().filter(|l| l.spilled()).count() as u32
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_reuses_exact_fit() {
        let mut m = StackManager::new();
        let a = m.alloc(8);
        let b = m.alloc(8);
        assert_eq!(a, 0);
        assert_eq!(b, 8);
        m.free(a);
        let c = m.alloc(8);
        assert_eq!(c, a);
    }

    #[test]
    fn stack_splits_larger_slot() {
        let mut m = StackManager::new();
        let a = m.alloc(16);
        let b = m.alloc(8);
        m.free(a);
        let c = m.alloc(4);
        // The 4-byte slot is carved from the freed 16-byte slot
        assert_eq!(c, 0);
        let d = m.alloc(8);
        assert_eq!(d, 4);
        assert!(b >= 16);
    }

    #[test]
    fn stack_coalesces_on_free() {
        let mut m = StackManager::new();
        let a = m.alloc(8);
        let b = m.alloc(8);
        let c = m.alloc(8);
        m.free(a);
        m.free(b);
        m.free(c);
        assert_eq!(m.size(), 0);
        let d = m.alloc(24);
        assert_eq!(d, 0);
    }
}
