//! General-purpose and SSE register encodings shared by every instruction form.

/// A general-purpose x86-64 register, numbered the way the ISA numbers them so
/// `Reg as u8` is directly usable as a ModR/M or SIB field (low 3 bits) together
/// with the REX extension bit from [`Reg::needs_rex_extension`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits used directly in a ModR/M or SIB byte.
    pub fn low_bits(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register needs REX.R/X/B set to be addressable.
    pub fn needs_rex_extension(self) -> bool {
        (self as u8) & 0x8 != 0
    }

    /// Whether this register requires a SIB byte when used as a bare memory base
    /// (RSP and R12 alias the SIB-required encoding in ModR/M).
    pub fn requires_sib_as_base(self) -> bool {
        matches!(self, Reg::Rsp | Reg::R12)
    }

    /// Whether a `mod=00` encoding of this register as a base actually means
    /// RIP-relative (RBP/R13) and must be promoted to `mod=01, disp8=0`.
    pub fn is_disp0_escape(self) -> bool {
        matches!(self, Reg::Rbp | Reg::R13)
    }
}

/// An XMM register, used for SSE scalar-double codegen. XMM0 is the canonical
/// accumulator for the float expression codegen (see `tc::codegen::expr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
}

impl Xmm {
    pub fn low_bits(self) -> u8 {
        (self as u8) & 0x7
    }

    pub fn needs_rex_extension(self) -> bool {
        false
    }
}
