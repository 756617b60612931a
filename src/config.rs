//! Runtime and compiler configuration

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::Runtime`].
///
/// Covers the VM memory plan, the register budget handed to the
/// allocator, and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Size of the VM call stack region in bytes
    pub stack_size: u32,
    /// Total VM memory in bytes (stack + module data + heap)
    pub memory_size: u32,
    /// General-purpose registers available to the allocator
    pub num_gp_registers: u16,
    /// Floating-point registers available to the allocator
    pub num_fp_registers: u16,
    /// Emit per-decision debug logs from the allocator and backend
    pub debug_logging: bool,
    /// Run the IR optimizer before backend lowering
    pub optimize: bool,
    /// Raise a runtime error on integer division by zero instead of
    /// producing an unspecified value
    pub trap_division_by_zero: bool,
    /// Root directory for workspace scanning and the `.tsnc` cache
    pub workspace_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stack_size: 64 * 1024,
            memory_size: 1024 * 1024,
            num_gp_registers: 16,
            num_fp_registers: 16,
            debug_logging: false,
            optimize: true,
            trap_division_by_zero: true,
            workspace_root: String::from("."),
        }
    }
}

impl Config {
    /// Validate the memory plan. The stack must fit inside total memory
    /// with room left for module data and heap.
    pub fn validate(&self) -> Result<(), String> {
        if self.stack_size == 0 {
            return Err("stack_size must be non-zero".into());
        }
        if self.memory_size <= self.stack_size {
            return Err(format!(
                "memory_size ({}) must exceed stack_size ({})",
                self.memory_size, self.stack_size
            ));
        }
        if self.num_gp_registers == 0 || self.num_gp_registers > 16 {
            return Err("num_gp_registers must be in 1..=16".into());
        }
        if self.num_fp_registers == 0 || self.num_fp_registers > 16 {
            return Err("num_fp_registers must be in 1..=16".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_stack_larger_than_memory() {
        let cfg = Config {
            stack_size: 1024,
            memory_size: 512,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_register_budget() {
        let cfg = Config {
            num_gp_registers: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
