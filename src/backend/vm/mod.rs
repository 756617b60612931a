//! # Register VM
//!
//! 64-bit instruction words executed by a dispatch loop over a fixed
//! register file and a flat memory buffer.

pub mod instruction;
pub mod interp;
pub mod registers;
pub mod state;

pub use instruction::{VmInstruction, VmOp, VM_OP_COUNT};
pub use interp::{HostInterface, Interpreter, JalTarget};
pub use registers::{VmReg, REGISTER_COUNT};
pub use state::State;
