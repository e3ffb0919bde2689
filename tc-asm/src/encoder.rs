//! x86-64 instruction encoder (pipeline component 2).
//!
//! Every `emit_*` routine here writes a fully legal encoding for one instruction
//! form. All of them check [`CodeBuffer::has_overflowed`] up front; once a buffer
//! has overflowed, every encoder silently no-ops rather than writing past the
//! configured capacity.

use crate::buffer::CodeBuffer;
use crate::operand::{emit_rex, write_modrm_mem, write_modrm_reg, write_modrm_riprel, Mem};
use crate::reg::{Reg, Xmm};

/// The location of a 32-bit relative displacement field that must be patched
/// once its target address is known (forward function calls, forward jumps).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reloc {
    /// Byte offset, within the code buffer, of the first byte of the 4-byte
    /// displacement field.
    pub field_offset: usize,
}

impl Reloc {
    /// Compute the displacement to patch into this relocation's field given the
    /// final target offset, per the patching discipline in the design: relative
    /// offsets are measured from the end of the instruction, i.e.
    /// `field_offset + 4`.
    pub fn displacement(&self, target_offset: usize) -> i32 {
        (target_offset as i64 - (self.field_offset as i64 + 4)) as i32
    }
}

/// Condition codes for `Jcc`, indexed the way the ISA encodes them in the low
/// nibble of `0x70`/`0x0F 0x80`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cc {
    Eq = 0x4,
    NotEq = 0x5,
    Lt = 0xC,
    LtEq = 0xE,
    Gt = 0xF,
    GtEq = 0xD,
    Below = 0x2,
    BelowEq = 0x6,
    Above = 0x7,
    AboveEq = 0x3,
    Negative = 0x8,
    NonNegative = 0x9,
}

impl Cc {
    /// The complementary condition, used to invert a branch (e.g. to skip a
    /// "set true" block when the condition does *not* hold).
    pub fn invert(self) -> Cc {
        match self {
            Cc::Eq => Cc::NotEq,
            Cc::NotEq => Cc::Eq,
            Cc::Lt => Cc::GtEq,
            Cc::LtEq => Cc::Gt,
            Cc::Gt => Cc::LtEq,
            Cc::GtEq => Cc::Lt,
            Cc::Below => Cc::AboveEq,
            Cc::BelowEq => Cc::Above,
            Cc::Above => Cc::BelowEq,
            Cc::AboveEq => Cc::Below,
            Cc::Negative => Cc::NonNegative,
            Cc::NonNegative => Cc::Negative,
        }
    }
}

fn overflowed(buf: &CodeBuffer) -> bool {
    buf.has_overflowed()
}

/// `mov r64, imm64` (opcode `0xB8+rd`, followed by a raw 8-byte immediate).
pub fn emit_mov_reg_imm64(buf: &mut CodeBuffer, dst: Reg, imm: i64) {
    if overflowed(buf) {
        return;
    }
    emit_rex(buf, true, false, false, dst.needs_rex_extension());
    buf.push_u8(0xB8 + dst.low_bits());
    buf.push_u64(imm as u64);
}

/// `mov r64, r/m64` — load a GPR from a `[base+disp]` memory operand.
pub fn emit_mov_reg_mem(buf: &mut CodeBuffer, dst: Reg, src: Mem) {
    if overflowed(buf) {
        return;
    }
    emit_rex(buf, true, dst.needs_rex_extension(), false, src.base.needs_rex_extension());
    buf.push_u8(0x8B);
    write_modrm_mem(buf, dst.low_bits(), src);
}

/// `mov r/m64, r64` — store a GPR to a `[base+disp]` memory operand.
pub fn emit_mov_mem_reg(buf: &mut CodeBuffer, dst: Mem, src: Reg) {
    if overflowed(buf) {
        return;
    }
    emit_rex(buf, true, src.needs_rex_extension(), false, dst.base.needs_rex_extension());
    buf.push_u8(0x89);
    write_modrm_mem(buf, src.low_bits(), dst);
}

/// `mov r64, r64` register-to-register move.
pub fn emit_mov_reg_reg(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    if overflowed(buf) {
        return;
    }
    emit_rex(buf, true, src.needs_rex_extension(), false, dst.needs_rex_extension());
    buf.push_u8(0x89);
    write_modrm_reg(buf, src.low_bits(), dst);
}

/// A RIP-relative instruction (`lea`/`mov` with `mod=00, r/m=101`) is always
/// exactly this many bytes: REX.W + opcode + ModR/M + disp32.
const RIPREL_INSN_LEN: i64 = 7;

/// `lea r64, [rip + disp32]` — load the *address* of `target_offset` (a byte
/// offset into this same code buffer, e.g. a fixed IAT slot). The
/// displacement is measured from the end of this instruction, per x86-64
/// RIP-relative addressing, so it is computed from `buf.position()` here
/// rather than taken as a raw caller-supplied constant.
pub fn emit_lea_riprel(buf: &mut CodeBuffer, dst: Reg, target_offset: usize) {
    if overflowed(buf) {
        return;
    }
    let disp32 = riprel_disp(buf, target_offset);
    emit_rex(buf, true, dst.needs_rex_extension(), false, false);
    buf.push_u8(0x8D);
    write_modrm_riprel(buf, dst.low_bits(), disp32);
}

/// `mov r64, [rip + disp32]` — load the 8-byte *value* stored at
/// `target_offset` (the resolved import address sitting in an IAT slot), as
/// opposed to [`emit_lea_riprel`] which loads the slot's own address.
pub fn emit_mov_reg_riprel(buf: &mut CodeBuffer, dst: Reg, target_offset: usize) {
    if overflowed(buf) {
        return;
    }
    let disp32 = riprel_disp(buf, target_offset);
    emit_rex(buf, true, dst.needs_rex_extension(), false, false);
    buf.push_u8(0x8B);
    write_modrm_riprel(buf, dst.low_bits(), disp32);
}

fn riprel_disp(buf: &CodeBuffer, target_offset: usize) -> i32 {
    let end_of_insn = buf.position() as i64 + RIPREL_INSN_LEN;
    (target_offset as i64 - end_of_insn) as i32
}

/// `lea r64, [base + disp]` — address of a stack slot or other memory operand.
pub fn emit_lea_mem(buf: &mut CodeBuffer, dst: Reg, src: Mem) {
    if overflowed(buf) {
        return;
    }
    emit_rex(buf, true, dst.needs_rex_extension(), false, src.base.needs_rex_extension());
    buf.push_u8(0x8D);
    write_modrm_mem(buf, dst.low_bits(), src);
}

/// `mov r/m8, imm8` (`C6 /0 ib`) — store an immediate byte to memory.
pub fn emit_mov_mem_imm8(buf: &mut CodeBuffer, dst: Mem, imm8: u8) {
    if overflowed(buf) {
        return;
    }
    if dst.base.needs_rex_extension() {
        emit_rex(buf, false, false, false, true);
    }
    buf.push_u8(0xC6);
    write_modrm_mem(buf, 0, dst);
    buf.push_u8(imm8);
}

/// `mov r/m8, r8` (`88 /r`) — store the low byte of `src` to memory.
///
/// Only `Rax`/`Rcx`/`Rdx`/`Rbx` are accepted as `src`: their low-byte forms
/// (AL/CL/DL/BL) need no REX prefix. Addressing SIL/DIL/BPL/SPL instead
/// requires a REX prefix with every bit clear — the one case where a bare
/// `0x40` is the *correct* encoding rather than a defect — which callers in
/// this crate never need, so it is simply not supported here.
pub fn emit_mov_mem_reg8(buf: &mut CodeBuffer, dst: Mem, src: Reg) {
    debug_assert!(
        matches!(src, Reg::Rax | Reg::Rcx | Reg::Rdx | Reg::Rbx),
        "emit_mov_mem_reg8 only supports legacy byte-addressable registers"
    );
    if overflowed(buf) {
        return;
    }
    if dst.base.needs_rex_extension() {
        emit_rex(buf, false, false, false, true);
    }
    buf.push_u8(0x88);
    write_modrm_mem(buf, src.low_bits(), dst);
}

macro_rules! alu_reg_reg {
    ($name:ident, $opcode:literal) => {
        #[doc = concat!("ALU op (opcode 0x", stringify!($opcode), ") between two 64-bit GPRs: `dst <op>= src`.")]
        pub fn $name(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
            if overflowed(buf) {
                return;
            }
            emit_rex(buf, true, src.needs_rex_extension(), false, dst.needs_rex_extension());
            buf.push_u8($opcode);
            write_modrm_reg(buf, src.low_bits(), dst);
        }
    };
}

alu_reg_reg!(emit_add_reg_reg, 0x01);
alu_reg_reg!(emit_sub_reg_reg, 0x29);
alu_reg_reg!(emit_and_reg_reg, 0x21);
alu_reg_reg!(emit_or_reg_reg, 0x09);
alu_reg_reg!(emit_xor_reg_reg, 0x31);
alu_reg_reg!(emit_cmp_reg_reg, 0x39);
alu_reg_reg!(emit_test_reg_reg, 0x85);

/// `imul r64, r/m64` two-operand signed multiply (`0F AF /r`).
pub fn emit_imul_reg_reg(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    if overflowed(buf) {
        return;
    }
    emit_rex(buf, true, dst.needs_rex_extension(), false, src.needs_rex_extension());
    buf.push_u8(0x0F);
    buf.push_u8(0xAF);
    write_modrm_reg(buf, dst.low_bits(), src);
}

macro_rules! alu_reg_imm32 {
    ($name:ident, $ext:literal) => {
        #[doc = "ALU op against a sign-extended 32-bit immediate (`81 /r id`)."]
        pub fn $name(buf: &mut CodeBuffer, dst: Reg, imm: i32) {
            if overflowed(buf) {
                return;
            }
            emit_rex(buf, true, false, false, dst.needs_rex_extension());
            buf.push_u8(0x81);
            write_modrm_reg(buf, $ext, dst);
            buf.push_i32(imm);
        }
    };
}

alu_reg_imm32!(emit_add_reg_imm32, 0);
alu_reg_imm32!(emit_sub_reg_imm32, 5);
alu_reg_imm32!(emit_and_reg_imm32, 4);
alu_reg_imm32!(emit_cmp_reg_imm32, 7);

/// Signed 64/64 division: `cqo; idiv rdivisor`. Dividend must already be in
/// `rax`; quotient ends up in `rax`, remainder in `rdx`.
pub fn emit_idiv(buf: &mut CodeBuffer, divisor: Reg) {
    if overflowed(buf) {
        return;
    }
    // cqo: sign-extend rax into rdx:rax
    emit_rex(buf, true, false, false, false);
    buf.push_u8(0x99);
    emit_rex(buf, true, false, false, divisor.needs_rex_extension());
    buf.push_u8(0xF7);
    write_modrm_reg(buf, 7, divisor);
}

/// `neg r64` (`F7 /3`).
pub fn emit_neg(buf: &mut CodeBuffer, reg: Reg) {
    if overflowed(buf) {
        return;
    }
    emit_rex(buf, true, false, false, reg.needs_rex_extension());
    buf.push_u8(0xF7);
    write_modrm_reg(buf, 3, reg);
}

macro_rules! shift_imm8 {
    ($name:ident, $ext:literal) => {
        #[doc = "Shift/rotate by an immediate 8-bit count (`C1 /r ib`)."]
        pub fn $name(buf: &mut CodeBuffer, reg: Reg, count: u8) {
            if overflowed(buf) {
                return;
            }
            emit_rex(buf, true, false, false, reg.needs_rex_extension());
            buf.push_u8(0xC1);
            write_modrm_reg(buf, $ext, reg);
            buf.push_u8(count);
        }
    };
}

shift_imm8!(emit_shl, 4);
shift_imm8!(emit_shr, 5);
shift_imm8!(emit_sar, 7);

macro_rules! shift_cl {
    ($name:ident, $ext:literal) => {
        #[doc = "Shift/rotate by the count in `CL` (`D3 /r`)."]
        pub fn $name(buf: &mut CodeBuffer, reg: Reg) {
            if overflowed(buf) {
                return;
            }
            emit_rex(buf, true, false, false, reg.needs_rex_extension());
            buf.push_u8(0xD3);
            write_modrm_reg(buf, $ext, reg);
        }
    };
}

shift_cl!(emit_shl_cl, 4);
shift_cl!(emit_shr_cl, 5);
shift_cl!(emit_sar_cl, 7);

/// `push r64` (`50+rd`).
pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    if overflowed(buf) {
        return;
    }
    if reg.needs_rex_extension() {
        emit_rex(buf, false, false, false, true);
    }
    buf.push_u8(0x50 + reg.low_bits());
}

/// `pop r64` (`58+rd`).
pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    if overflowed(buf) {
        return;
    }
    if reg.needs_rex_extension() {
        emit_rex(buf, false, false, false, true);
    }
    buf.push_u8(0x58 + reg.low_bits());
}

/// `ret` (near return, `C3`).
pub fn emit_ret(buf: &mut CodeBuffer) {
    if overflowed(buf) {
        return;
    }
    buf.push_u8(0xC3);
}

/// `syscall` (`0F 05`).
pub fn emit_syscall(buf: &mut CodeBuffer) {
    if overflowed(buf) {
        return;
    }
    buf.push_u8(0x0F);
    buf.push_u8(0x05);
}

/// `call r/m64` indirect through a register (`FF /2`).
pub fn emit_call_indirect_reg(buf: &mut CodeBuffer, reg: Reg) {
    if overflowed(buf) {
        return;
    }
    if reg.needs_rex_extension() {
        emit_rex(buf, false, false, false, true);
    }
    buf.push_u8(0xFF);
    write_modrm_reg(buf, 2, reg);
}

/// Emit a near `call rel32` with a zero placeholder displacement and return the
/// [`Reloc`] describing the field that must be patched once the target is known.
pub fn emit_call_rel32_placeholder(buf: &mut CodeBuffer) -> Reloc {
    let reloc = reloc_for_e8_e9(buf);
    if overflowed(buf) {
        return reloc;
    }
    buf.push_u8(0xE8);
    buf.push_i32(0);
    reloc
}

/// Emit a near unconditional `jmp rel32` with a placeholder displacement.
pub fn emit_jmp_rel32_placeholder(buf: &mut CodeBuffer) -> Reloc {
    let reloc = reloc_for_e8_e9(buf);
    if overflowed(buf) {
        return reloc;
    }
    buf.push_u8(0xE9);
    buf.push_i32(0);
    reloc
}

/// Emit a near `Jcc rel32` (`0F 8x`) with a placeholder displacement.
pub fn emit_jcc_rel32_placeholder(buf: &mut CodeBuffer, cc: Cc) -> Reloc {
    let field_offset = buf.position() + 2;
    if overflowed(buf) {
        return Reloc { field_offset };
    }
    buf.push_u8(0x0F);
    buf.push_u8(0x80 + cc as u8);
    buf.push_i32(0);
    Reloc { field_offset }
}

/// Patch a previously emitted placeholder jump/call so it targets `target_offset`.
pub fn patch_reloc(buf: &mut CodeBuffer, reloc: Reloc, target_offset: usize) {
    let disp = reloc.displacement(target_offset);
    buf.patch_i32_at(reloc.field_offset, disp);
}

fn reloc_for_e8_e9(buf: &CodeBuffer) -> Reloc {
    Reloc {
        field_offset: buf.position() + 1,
    }
}

// --- SSE scalar-double forms -------------------------------------------------
//
// XMM0 is the canonical accumulator (see design §4.3): expression codegen
// always leaves a float result in xmm0 and reads operands back out of it.

fn emit_sse_f2_0f(buf: &mut CodeBuffer, opcode: u8, dst: Xmm, src: Xmm) {
    if overflowed(buf) {
        return;
    }
    buf.push_u8(0xF2);
    buf.push_u8(0x0F);
    buf.push_u8(opcode);
    write_modrm_xmm_xmm(buf, dst, src);
}

fn write_modrm_xmm_xmm(buf: &mut CodeBuffer, reg: Xmm, rm: Xmm) {
    let modrm = (0b11 << 6) | ((reg.low_bits() & 0x7) << 3) | rm.low_bits();
    buf.push_u8(modrm);
}

/// `movsd xmm_dst, xmm_src`.
pub fn emit_movsd_xmm_xmm(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_sse_f2_0f(buf, 0x10, dst, src);
}

/// `movsd xmm_dst, [base+disp]`.
pub fn emit_movsd_xmm_mem(buf: &mut CodeBuffer, dst: Xmm, src: Mem) {
    if overflowed(buf) {
        return;
    }
    buf.push_u8(0xF2);
    if src.base.needs_rex_extension() {
        emit_rex(buf, false, false, false, true);
    }
    buf.push_u8(0x0F);
    buf.push_u8(0x10);
    write_modrm_mem(buf, dst.low_bits(), src);
}

/// `movsd [base+disp], xmm_src`.
pub fn emit_movsd_mem_xmm(buf: &mut CodeBuffer, dst: Mem, src: Xmm) {
    if overflowed(buf) {
        return;
    }
    buf.push_u8(0xF2);
    if dst.base.needs_rex_extension() {
        emit_rex(buf, false, false, false, true);
    }
    buf.push_u8(0x0F);
    buf.push_u8(0x11);
    write_modrm_mem(buf, src.low_bits(), dst);
}

/// `addsd xmm_dst, xmm_src`.
pub fn emit_addsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_sse_f2_0f(buf, 0x58, dst, src);
}

/// `subsd xmm_dst, xmm_src`.
pub fn emit_subsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_sse_f2_0f(buf, 0x5C, dst, src);
}

/// `mulsd xmm_dst, xmm_src`.
pub fn emit_mulsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_sse_f2_0f(buf, 0x59, dst, src);
}

/// `divsd xmm_dst, xmm_src`.
pub fn emit_divsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_sse_f2_0f(buf, 0x5E, dst, src);
}

/// `cvtsi2sd xmm_dst, r64_src` — convert a signed 64-bit integer GPR to double.
pub fn emit_cvtsi2sd(buf: &mut CodeBuffer, dst: Xmm, src: Reg) {
    if overflowed(buf) {
        return;
    }
    buf.push_u8(0xF2);
    emit_rex(buf, true, false, false, src.needs_rex_extension());
    buf.push_u8(0x0F);
    buf.push_u8(0x2A);
    let modrm = (0b11 << 6) | ((dst.low_bits() & 0x7) << 3) | src.low_bits();
    buf.push_u8(modrm);
}

/// `cvttsd2si r64_dst, xmm_src` — truncating convert double to signed 64-bit integer.
pub fn emit_cvttsd2si(buf: &mut CodeBuffer, dst: Reg, src: Xmm) {
    if overflowed(buf) {
        return;
    }
    buf.push_u8(0xF2);
    emit_rex(buf, true, dst.needs_rex_extension(), false, false);
    buf.push_u8(0x0F);
    buf.push_u8(0x2C);
    let modrm = (0b11 << 6) | ((dst.low_bits() & 0x7) << 3) | src.low_bits();
    buf.push_u8(modrm);
}

/// `sqrtsd xmm_dst, xmm_src` — hardware scalar-double square root.
pub fn emit_sqrtsd(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    emit_sse_f2_0f(buf, 0x51, dst, src);
}

/// `comisd xmm_a, xmm_b` — ordered compare, sets EFLAGS for a subsequent `Jcc`.
pub fn emit_comisd(buf: &mut CodeBuffer, a: Xmm, b: Xmm) {
    if overflowed(buf) {
        return;
    }
    buf.push_u8(0x66);
    buf.push_u8(0x0F);
    buf.push_u8(0x2F);
    write_modrm_xmm_xmm(buf, a, b);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_reg_imm64_shape() {
        let mut buf = CodeBuffer::with_capacity(64);
        emit_mov_reg_imm64(&mut buf, Reg::Rax, 42);
        // REX.W (0x48) + B8 + 8-byte imm
        assert_eq!(buf.bytes(), &[0x48, 0xB8, 42, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn mov_reg_imm64_extended_register_sets_rex_b() {
        let mut buf = CodeBuffer::with_capacity(64);
        emit_mov_reg_imm64(&mut buf, Reg::R9, 1);
        assert_eq!(buf.bytes()[0], 0x49); // W + B
    }

    #[test]
    fn rsp_based_store_always_has_sib() {
        let mut buf = CodeBuffer::with_capacity(64);
        emit_mov_mem_reg(&mut buf, Mem::new(Reg::Rsp, 8), Reg::Rax);
        // 48 89 44 24 08  (REX.W, MOV, modrm, SIB, disp8)
        assert_eq!(buf.bytes().len(), 5);
        let modrm = buf.bytes()[2];
        assert_eq!(modrm & 0b111, 0b100, "rm field must select SIB");
    }

    #[test]
    fn rbp_zero_disp_is_promoted_to_disp8() {
        let mut buf = CodeBuffer::with_capacity(64);
        emit_mov_mem_reg(&mut buf, Mem::new(Reg::Rbp, 0), Reg::Rax);
        let modrm = buf.bytes()[2];
        let mode = modrm >> 6;
        assert_eq!(mode, 0b01, "rbp base with disp=0 must use mod=01 disp8=0");
    }

    #[test]
    fn rex_is_never_bare_0x40() {
        let mut buf = CodeBuffer::with_capacity(64);
        emit_ret(&mut buf);
        assert_eq!(buf.bytes(), &[0xC3]);
    }

    #[test]
    fn call_reloc_displacement_is_measured_from_instruction_end() {
        let mut buf = CodeBuffer::with_capacity(64);
        let reloc = emit_call_rel32_placeholder(&mut buf);
        assert_eq!(reloc.field_offset, 1);
        patch_reloc(&mut buf, reloc, 10);
        // instruction ends at offset 5; target 10 => disp 5
        assert_eq!(i32::from_le_bytes(buf.bytes()[1..5].try_into().unwrap()), 5);
    }

    #[test]
    fn byte_store_of_legacy_register_needs_no_rex() {
        let mut buf = CodeBuffer::with_capacity(64);
        emit_mov_mem_reg8(&mut buf, Mem::new(Reg::Rbp, -8), Reg::Rdx);
        // 88 /r modrm disp8, no REX byte at all
        assert_eq!(buf.bytes()[0], 0x88);
    }

    #[test]
    fn alu_reg_imm32_shape() {
        let mut buf = CodeBuffer::with_capacity(64);
        emit_sub_reg_imm32(&mut buf, Reg::Rsp, 32);
        // REX.W, 81 /5, imm32
        assert_eq!(buf.bytes()[0], 0x48);
        assert_eq!(buf.bytes()[1], 0x81);
        assert_eq!(i32::from_le_bytes(buf.bytes()[3..7].try_into().unwrap()), 32);
    }

    #[test]
    fn condition_code_inversion_round_trips() {
        assert_eq!(Cc::Lt.invert(), Cc::GtEq);
        assert_eq!(Cc::Eq.invert().invert(), Cc::Eq);
    }

    #[test]
    fn overflow_is_sticky_and_stops_writes() {
        let mut buf = CodeBuffer::with_capacity(1);
        emit_ret(&mut buf);
        assert!(!buf.has_overflowed());
        emit_ret(&mut buf);
        assert!(buf.has_overflowed());
        assert_eq!(buf.bytes().len(), 1);
    }
}
