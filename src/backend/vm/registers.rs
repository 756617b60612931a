//! VM register bank
//!
//! A fixed file of 76 registers: the zero register, four general and
//! four floating-point return registers, sixteen integer and sixteen
//! floating-point argument registers, sixteen saved registers per
//! class, and the three control registers `ip`, `ra`, `sp`.

use num_enum::TryFromPrimitive;

/// One register of the VM register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum VmReg {
    Zero = 0,

    // return value storage
    V0,
    V1,
    V2,
    V3,
    Vf0,
    Vf1,
    Vf2,
    Vf3,

    // integer arguments
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    A8,
    A9,
    A10,
    A11,
    A12,
    A13,
    A14,
    A15,

    // floating-point arguments
    Fa0,
    Fa1,
    Fa2,
    Fa3,
    Fa4,
    Fa5,
    Fa6,
    Fa7,
    Fa8,
    Fa9,
    Fa10,
    Fa11,
    Fa12,
    Fa13,
    Fa14,
    Fa15,

    // saved integer registers
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    S12,
    S13,
    S14,
    S15,

    // saved floating-point registers
    F0,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    F13,
    F14,
    F15,

    // control
    Ip,
    Ra,
    Sp,
}

/// Total number of registers
pub const REGISTER_COUNT: usize = VmReg::Sp as usize + 1;

impl VmReg {
    /// Whether the register belongs to a floating-point bank.
    pub fn is_fpr(self) -> bool {
        let x = self as u8;
        (x >= VmReg::Vf0 as u8 && x <= VmReg::Vf3 as u8)
            || (x >= VmReg::Fa0 as u8 && x <= VmReg::Fa15 as u8)
            || (x >= VmReg::F0 as u8 && x <= VmReg::F15 as u8)
    }

    /// Whether the register is caller-volatile (return value banks).
    pub fn is_volatile(self) -> bool {
        let x = self as u8;
        x >= VmReg::V0 as u8 && x <= VmReg::Vf3 as u8
    }

    /// Whether the register carries call arguments.
    pub fn is_arg(self) -> bool {
        let x = self as u8;
        x >= VmReg::A0 as u8 && x <= VmReg::Fa15 as u8
    }

    /// Integer argument register by position.
    pub fn int_arg(i: usize) -> Option<VmReg> {
        if i < 16 {
            VmReg::try_from(VmReg::A0 as u8 + i as u8).ok()
        } else {
            None
        }
    }

    /// Floating-point argument register by position.
    pub fn float_arg(i: usize) -> Option<VmReg> {
        if i < 16 {
            VmReg::try_from(VmReg::Fa0 as u8 + i as u8).ok()
        } else {
            None
        }
    }

    /// Saved integer register by allocator index (1-based).
    pub fn saved_gp(i: u32) -> Option<VmReg> {
        if (1..=16).contains(&i) {
            VmReg::try_from(VmReg::S0 as u8 + (i - 1) as u8).ok()
        } else {
            None
        }
    }

    /// Saved floating-point register by allocator index (1-based).
    pub fn saved_fp(i: u32) -> Option<VmReg> {
        if (1..=16).contains(&i) {
            VmReg::try_from(VmReg::F0 as u8 + (i - 1) as u8).ok()
        } else {
            None
        }
    }

    /// Register mnemonic.
    pub fn name(self) -> &'static str {
        REGISTER_NAMES[self as usize]
    }
}

const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "zero", "v0", "v1", "v2", "v3", "vf0", "vf1", "vf2", "vf3", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "a8", "a9", "a10", "a11", "a12", "a13", "a14", "a15", "fa0", "fa1", "fa2",
    "fa3", "fa4", "fa5", "fa6", "fa7", "fa8", "fa9", "fa10", "fa11", "fa12", "fa13", "fa14",
    "fa15", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "s12",
    "s13", "s14", "s15", "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10",
    "f11", "f12", "f13", "f14", "f15", "ip", "ra", "sp",
];

impl std::fmt::Display for VmReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_boundaries() {
        assert_eq!(REGISTER_COUNT, 76);
        assert!(!VmReg::Zero.is_fpr());
        assert!(VmReg::Vf0.is_fpr());
        assert!(VmReg::Fa15.is_fpr());
        assert!(VmReg::F0.is_fpr());
        assert!(!VmReg::S15.is_fpr());
        assert!(VmReg::V0.is_volatile());
        assert!(VmReg::A3.is_arg());
        assert!(!VmReg::Ip.is_arg());
    }

    #[test]
    fn arg_register_mapping() {
        assert_eq!(VmReg::int_arg(0), Some(VmReg::A0));
        assert_eq!(VmReg::int_arg(15), Some(VmReg::A15));
        assert_eq!(VmReg::int_arg(16), None);
        assert_eq!(VmReg::float_arg(2), Some(VmReg::Fa2));
        assert_eq!(VmReg::saved_gp(1), Some(VmReg::S0));
        assert_eq!(VmReg::saved_fp(16), Some(VmReg::F15));
        assert_eq!(VmReg::saved_gp(17), None);
    }
}
