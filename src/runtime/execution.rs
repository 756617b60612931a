//! Execution contexts and call traces

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::FunctionId;

/// Byte layout of the `call_context` record every script call
/// materializes on the VM stack. The callee's prologue loads its
/// implicit pseudo-values from these offsets.
pub mod call_context {
    /// Pointer identifying the called function
    pub const FUNC_PTR: u32 = 0;
    /// Pointer to the caller-reserved return slot
    pub const RET_PTR: u32 = 8;
    /// Pointer to captured data for closures
    pub const CAPTURE_PTR: u32 = 16;
    /// Execution context token
    pub const ECTX: u32 = 24;
    /// Receiver pointer for method calls
    pub const THIS_PTR: u32 = 32;
    /// Total record size
    pub const SIZE: u32 = 40;
}

/// Metadata of one frame recorded on a trace
#[derive(Debug, Clone)]
pub struct TraceFrame {
    /// Function the frame belongs to
    pub function: FunctionId,
    /// Instruction address inside the function
    pub ip: u32,
}

/// Error/state record threaded through a single top-level host call.
#[derive(Debug, Default)]
pub struct CallTrace {
    /// Whether an error was recorded
    pub has_error: bool,
    /// Rendered error message
    pub error: String,
    /// Per-frame metadata at the point of the error
    pub frames: Vec<TraceFrame>,
}

impl CallTrace {
    /// Record an error; the first error wins.
    pub fn record(&mut self, message: impl Into<String>) {
        if !self.has_error {
            self.has_error = true;
            self.error = message.into();
        }
    }
}

/// Per-call runtime object carrying the call trace, capture pointer and
/// return pointer. Heap-allocated per top-level host-initiated call,
/// exclusively owned by the calling thread, destroyed when the call
/// returns.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Error trace
    pub trace: CallTrace,
    /// Captured-data pointer for the current closure call
    pub capture_ptr: u64,
    /// Return slot pointer of the current call
    pub ret_ptr: u64,
    /// Pointer identifying the current function
    pub func_ptr: u64,
    /// Advisory cancellation flag; another thread may set it and the
    /// interpreter observes it at the next instruction boundary
    cancel: Arc<AtomicBool>,
}

impl ExecutionContext {
    /// New context for one top-level call.
    pub fn new() -> Self {
        Self {
            trace: CallTrace::default(),
            capture_ptr: 0,
            ret_ptr: 0,
            func_ptr: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle other threads can use to request cancellation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Whether cancellation was requested.
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let mut t = CallTrace::default();
        t.record("first");
        t.record("second");
        assert!(t.has_error);
        assert_eq!(t.error, "first");
    }

    #[test]
    fn cancel_flag_is_observable() {
        let ectx = ExecutionContext::new();
        let handle = ectx.cancel_handle();
        assert!(!ectx.cancelled());
        handle.store(true, Ordering::Relaxed);
        assert!(ectx.cancelled());
    }
}
