//! Expression lowering. Two parallel paths, picked by [`infer_type`]: integer
//! (and bool/char, which are int-sized at the machine level) expressions
//! leave their result in `RAX`; float expressions leave theirs in `XMM0`.
//! Comparisons always produce an `Int` regardless of operand type.

use tc_asm::encoder::*;
use tc_asm::{Mem, Reg, Xmm};

use crate::ast::{BinOp, Node, NodeIdx, TemporalOp};
use crate::error::{CompileError, Result};
use crate::runtime::heap::ObjectId;
use crate::runtime::zone::Zone;
use crate::runtime::gap::GapMetadata;
use crate::storage::{TypeTag, VarStorage};
use crate::symbol::{djb2, StoragePayload};

use super::{emit_load_f64_imm, CodegenContext};

/// Default confidence threshold a `gap.compute` entry needs to cross before
/// the runtime treats it as migrated out of the UNKNOWN zone. Chosen once
/// here rather than per call site, since the source grammar never supplies
/// one explicitly.
const GAP_DEFAULT_MIGRATION_THRESHOLD: u8 = 80;

/// How many timelines a PRESENT zone entry may lag behind before a GC cycle
/// migrates it to PAST (design §4.6).
const TEMPORAL_MIGRATION_THRESHOLD: u64 = 64;

/// Allocate a heap object, running one mark-and-sweep/migration cycle and
/// retrying once if the bump allocator is full. Heap exhaustion that survives
/// a collection is a hard compile error rather than silently dropped
/// bookkeeping — a temporal value whose zone entry never got recorded would
/// make `gap.compute`/`>>` miscompile silently.
fn heap_alloc_with_gc(ctx: &mut CodegenContext, size: u32, temporal: bool) -> Result<ObjectId> {
    if let Some(id) = ctx.runtime.heap.alloc(size, temporal) {
        return Ok(id);
    }
    ctx.runtime.collect(TEMPORAL_MIGRATION_THRESHOLD);
    ctx.runtime
        .heap
        .alloc(size, temporal)
        .ok_or(CompileError::HeapExhaustedPostGc)
}

pub(crate) fn infer_type(ctx: &CodegenContext, node: NodeIdx) -> TypeTag {
    if node == 0 {
        return TypeTag::Int;
    }
    match *ctx.ast.get(node) {
        Node::Number(_) => TypeTag::Int,
        Node::Float(_) => TypeTag::Float,
        Node::Str { .. } => TypeTag::Str,
        Node::Identifier { offset, len } => {
            let hash = djb2(ctx.strings.get(offset, len));
            match ctx.symbols.resolve(hash).map(|s| s.storage) {
                Some(StoragePayload::Variable(_, ty)) => ty,
                _ => TypeTag::Int,
            }
        }
        Node::Binary { op, left, right } => match op {
            BinOp::Eq
            | BinOp::NotEq
            | BinOp::Lt
            | BinOp::LtEq
            | BinOp::Gt
            | BinOp::GtEq
            | BinOp::AndAnd
            | BinOp::OrOr
            | BinOp::AndAndDot
            | BinOp::OrOrDot
            | BinOp::Shl
            | BinOp::Shr => TypeTag::Int,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let l = infer_type(ctx, left);
                let r = infer_type(ctx, right);
                if l == TypeTag::Float || r == TypeTag::Float {
                    TypeTag::Float
                } else {
                    TypeTag::Int
                }
            }
        },
        Node::Intrinsic { .. } => TypeTag::Float,
        Node::GapCompute { expr } => infer_type(ctx, expr),
        _ => TypeTag::Int,
    }
}

fn load_var_storage_int(ctx: &mut CodegenContext, storage: VarStorage) {
    match storage {
        VarStorage::Register(r) => emit_mov_reg_reg(&mut ctx.buf, Reg::Rax, r),
        VarStorage::Stack(off) => emit_mov_reg_mem(&mut ctx.buf, Reg::Rax, Mem::new(Reg::Rbp, off)),
    }
}

pub(crate) fn store_var_storage_int(ctx: &mut CodegenContext, storage: VarStorage) {
    match storage {
        VarStorage::Register(r) => emit_mov_reg_reg(&mut ctx.buf, r, Reg::Rax),
        VarStorage::Stack(off) => emit_mov_mem_reg(&mut ctx.buf, Mem::new(Reg::Rbp, off), Reg::Rax),
    }
}

pub(crate) fn store_var_storage_float(ctx: &mut CodegenContext, storage: VarStorage) {
    match storage {
        VarStorage::Stack(off) => emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, off), Xmm::Xmm0),
        VarStorage::Register(_) => unreachable!("float variables are always stack-allocated"),
    }
}

/// Allocate storage for a freshly defined variable of type `tag`: a stack
/// slot for `Float` (there is no GPR-to-XMM move in this encoder, so a float
/// never lives in a register), otherwise a register if one is free.
pub(crate) fn allocate_storage(ctx: &mut CodegenContext, tag: TypeTag) -> VarStorage {
    if tag == TypeTag::Float {
        VarStorage::Stack(ctx.symbols.stack.alloc_slot())
    } else {
        match ctx.symbols.registers.alloc_general() {
            Some(r) => VarStorage::Register(r),
            None => VarStorage::Stack(ctx.symbols.stack.alloc_slot()),
        }
    }
}

fn int_cc_for(op: BinOp) -> Cc {
    match op {
        BinOp::Eq => Cc::Eq,
        BinOp::NotEq => Cc::NotEq,
        BinOp::Lt => Cc::Lt,
        BinOp::LtEq => Cc::LtEq,
        BinOp::Gt => Cc::Gt,
        BinOp::GtEq => Cc::GtEq,
        _ => unreachable!("not a comparison op"),
    }
}

fn float_cc_for(op: BinOp) -> Cc {
    // COMISD sets CF/ZF the same way an unsigned compare would, so the
    // unsigned condition codes are the ones that read its flags correctly.
    match op {
        BinOp::Eq => Cc::Eq,
        BinOp::NotEq => Cc::NotEq,
        BinOp::Lt => Cc::Below,
        BinOp::LtEq => Cc::BelowEq,
        BinOp::Gt => Cc::Above,
        BinOp::GtEq => Cc::AboveEq,
        _ => unreachable!("not a comparison op"),
    }
}

/// `cmp`/`comisd` has already set flags comparing the left operand against
/// the right; materialize a 0/1 `Int` result in `RAX` from `cc`.
fn lower_comparison_result(ctx: &mut CodegenContext, cc: Cc) {
    let to_true = emit_jcc_rel32_placeholder(&mut ctx.buf, cc);
    emit_mov_reg_imm64(&mut ctx.buf, Reg::Rax, 0);
    let to_end = emit_jmp_rel32_placeholder(&mut ctx.buf);
    let true_label = ctx.buf.position();
    patch_reloc(&mut ctx.buf, to_true, true_label);
    emit_mov_reg_imm64(&mut ctx.buf, Reg::Rax, 1);
    let end_label = ctx.buf.position();
    patch_reloc(&mut ctx.buf, to_end, end_label);
}

/// Normalize whatever is in `RAX` to a strict 0/1 boolean.
fn lower_bool_normalize(ctx: &mut CodegenContext) {
    emit_test_reg_reg(&mut ctx.buf, Reg::Rax, Reg::Rax);
    lower_comparison_result(ctx, Cc::NotEq);
}

fn lower_bool_expr(ctx: &mut CodegenContext, node: NodeIdx) -> Result<()> {
    lower_int_expr(ctx, node)?;
    lower_bool_normalize(ctx);
    Ok(())
}

fn lower_short_circuit(ctx: &mut CodegenContext, left: NodeIdx, right: NodeIdx, is_and: bool) -> Result<()> {
    lower_bool_expr(ctx, left)?;
    emit_test_reg_reg(&mut ctx.buf, Reg::Rax, Reg::Rax);
    let decisive = if is_and { Cc::Eq } else { Cc::NotEq };
    let skip_right = emit_jcc_rel32_placeholder(&mut ctx.buf, decisive);
    lower_bool_expr(ctx, right)?;
    let target = ctx.buf.position();
    patch_reloc(&mut ctx.buf, skip_right, target);
    Ok(())
}

fn lower_int_binary(ctx: &mut CodegenContext, op: BinOp, left: NodeIdx, right: NodeIdx) -> Result<()> {
    match op {
        BinOp::AndAnd | BinOp::AndAndDot => return lower_short_circuit(ctx, left, right, true),
        BinOp::OrOr | BinOp::OrOrDot => return lower_short_circuit(ctx, left, right, false),
        BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
            let is_float = infer_type(ctx, left) == TypeTag::Float || infer_type(ctx, right) == TypeTag::Float;
            if is_float {
                lower_float_expr(ctx, left)?;
                let spill = ctx.symbols.stack.alloc_slot();
                emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, spill), Xmm::Xmm0);
                lower_float_expr(ctx, right)?;
                emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
                emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, spill));
                emit_comisd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
                lower_comparison_result(ctx, float_cc_for(op));
            } else {
                lower_int_expr(ctx, left)?;
                emit_push(&mut ctx.buf, Reg::Rax);
                lower_int_expr(ctx, right)?;
                emit_mov_reg_reg(&mut ctx.buf, Reg::Rcx, Reg::Rax);
                emit_pop(&mut ctx.buf, Reg::Rax);
                emit_cmp_reg_reg(&mut ctx.buf, Reg::Rax, Reg::Rcx);
                lower_comparison_result(ctx, int_cc_for(op));
            }
            return Ok(());
        }
        _ => {}
    }

    lower_int_expr(ctx, left)?;
    emit_push(&mut ctx.buf, Reg::Rax);
    lower_int_expr(ctx, right)?;
    emit_mov_reg_reg(&mut ctx.buf, Reg::Rcx, Reg::Rax);
    emit_pop(&mut ctx.buf, Reg::Rax);
    match op {
        BinOp::Add => emit_add_reg_reg(&mut ctx.buf, Reg::Rax, Reg::Rcx),
        BinOp::Sub => emit_sub_reg_reg(&mut ctx.buf, Reg::Rax, Reg::Rcx),
        BinOp::Mul => emit_imul_reg_reg(&mut ctx.buf, Reg::Rax, Reg::Rcx),
        BinOp::Div => emit_idiv(&mut ctx.buf, Reg::Rcx),
        BinOp::Mod => {
            emit_idiv(&mut ctx.buf, Reg::Rcx);
            emit_mov_reg_reg(&mut ctx.buf, Reg::Rax, Reg::Rdx);
        }
        BinOp::Shl => emit_shl_cl(&mut ctx.buf, Reg::Rax),
        BinOp::Shr => emit_shr_cl(&mut ctx.buf, Reg::Rax),
        _ => unreachable!("comparisons and logical ops handled above"),
    }
    Ok(())
}

/// `fmod`-style remainder: there is no native float-division-remainder
/// instruction, so this truncates the quotient and reconstructs the
/// remainder by hand (`a - trunc(a/b)*b`).
fn lower_fmod(ctx: &mut CodegenContext) {
    let spill_dividend = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, spill_dividend), Xmm::Xmm0);
    emit_divsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_cvttsd2si(&mut ctx.buf, Reg::Rax, Xmm::Xmm0);
    emit_cvtsi2sd(&mut ctx.buf, Xmm::Xmm0, Reg::Rax);
    emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, spill_dividend));
    emit_subsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1);
}

fn lower_float_binary(ctx: &mut CodegenContext, op: BinOp, left: NodeIdx, right: NodeIdx) -> Result<()> {
    lower_float_expr(ctx, left)?;
    let spill = ctx.symbols.stack.alloc_slot();
    emit_movsd_mem_xmm(&mut ctx.buf, Mem::new(Reg::Rbp, spill), Xmm::Xmm0);
    lower_float_expr(ctx, right)?;
    emit_movsd_xmm_xmm(&mut ctx.buf, Xmm::Xmm1, Xmm::Xmm0);
    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, spill));
    match op {
        BinOp::Add => emit_addsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1),
        BinOp::Sub => emit_subsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1),
        BinOp::Mul => emit_mulsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1),
        BinOp::Div => emit_divsd(&mut ctx.buf, Xmm::Xmm0, Xmm::Xmm1),
        BinOp::Mod => lower_fmod(ctx),
        _ => {
            return Err(CompileError::CodegenUnsupportedFeature {
                what: "non-arithmetic binary op in a float expression".to_string(),
            })
        }
    }
    Ok(())
}

/// Registers a GAP-metadata entry for an UNKNOWN-zone value and leaves the
/// computed value in `RAX`; shared by both the statement-level
/// `gap.compute/ … \` form and any nested occurrence inside an expression.
pub(crate) fn lower_gap_compute(ctx: &mut CodegenContext, node: NodeIdx, expr: NodeIdx) -> Result<()> {
    lower_int_expr(ctx, expr)?;
    let id = heap_alloc_with_gc(ctx, 8, false)?;
    let timeline = ctx.runtime.gc.current_timeline();
    ctx.runtime.zones.insert(Zone::Unknown, id, timeline, 0);
    let var_hash = (node as u32).wrapping_mul(2_654_435_761);
    ctx.runtime.gap.register(GapMetadata {
        var_hash,
        confidence: 0,
        missing_data: true,
        migration_threshold: GAP_DEFAULT_MIGRATION_THRESHOLD,
        target_zone: Zone::Unknown,
    });
    Ok(())
}

/// `Timing` nodes carry no target-variable binding — they are anonymous
/// compile-time bookkeeping wrapped around an inner value, which passes
/// through as the node's own result. `WriteFuture` additionally records a
/// heap object in the FUTURE zone; the read/shift variants only consult
/// zone/gap metadata conceptually and have no further runtime effect here.
pub(crate) fn lower_timing(ctx: &mut CodegenContext, op: TemporalOp, expr: NodeIdx) -> Result<()> {
    lower_int_expr(ctx, expr)?;
    if op == TemporalOp::WriteFuture {
        let id = heap_alloc_with_gc(ctx, 8, true)?;
        let timeline = ctx.runtime.gc.current_timeline();
        ctx.runtime.zones.insert(Zone::Future, id, timeline, 0);
    }
    Ok(())
}

pub(crate) fn lower_int_expr(ctx: &mut CodegenContext, node: NodeIdx) -> Result<()> {
    if node == 0 {
        emit_mov_reg_imm64(&mut ctx.buf, Reg::Rax, 0);
        return Ok(());
    }
    match *ctx.ast.get(node) {
        Node::Number(n) => {
            emit_mov_reg_imm64(&mut ctx.buf, Reg::Rax, n);
            Ok(())
        }
        Node::Float(f) => {
            emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, f);
            emit_cvttsd2si(&mut ctx.buf, Reg::Rax, Xmm::Xmm0);
            Ok(())
        }
        Node::Identifier { offset, len } => {
            let hash = djb2(ctx.strings.get(offset, len));
            match ctx.symbols.resolve(hash).map(|s| s.storage) {
                Some(StoragePayload::Variable(storage, _)) => {
                    load_var_storage_int(ctx, storage);
                }
                Some(StoragePayload::Constant(v)) => {
                    emit_mov_reg_imm64(&mut ctx.buf, Reg::Rax, v);
                }
                Some(StoragePayload::Temporal(storage)) => {
                    load_var_storage_int(ctx, storage);
                }
                // undefined identifier, or a non-scalar symbol referenced by
                // value: loading an uninitialized variable is zero.
                _ => emit_mov_reg_imm64(&mut ctx.buf, Reg::Rax, 0),
            }
            Ok(())
        }
        Node::Binary { op, left, right } => lower_int_binary(ctx, op, left, right),
        Node::Intrinsic { name_offset, name_len, arg } => {
            super::intrinsics::lower_intrinsic(ctx, name_offset, name_len, arg)?;
            emit_cvttsd2si(&mut ctx.buf, Reg::Rax, Xmm::Xmm0);
            Ok(())
        }
        Node::GapCompute { expr } => lower_gap_compute(ctx, node, expr),
        Node::Str { .. } => Err(CompileError::CodegenUnsupportedFeature {
            what: "string literal used in an integer expression context".to_string(),
        }),
        other => Err(CompileError::CodegenUnsupportedFeature {
            what: format!("{other:?} cannot appear in an integer expression"),
        }),
    }
}

pub(crate) fn lower_float_expr(ctx: &mut CodegenContext, node: NodeIdx) -> Result<()> {
    if node == 0 {
        emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 0.0);
        return Ok(());
    }
    match *ctx.ast.get(node) {
        Node::Float(f) => {
            emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, f);
            Ok(())
        }
        Node::Number(n) => {
            emit_mov_reg_imm64(&mut ctx.buf, Reg::Rax, n);
            emit_cvtsi2sd(&mut ctx.buf, Xmm::Xmm0, Reg::Rax);
            Ok(())
        }
        Node::Identifier { offset, len } => {
            let hash = djb2(ctx.strings.get(offset, len));
            match ctx.symbols.resolve(hash).map(|s| s.storage) {
                Some(StoragePayload::Variable(VarStorage::Stack(off), TypeTag::Float)) => {
                    emit_movsd_xmm_mem(&mut ctx.buf, Xmm::Xmm0, Mem::new(Reg::Rbp, off));
                }
                Some(StoragePayload::Variable(storage, _)) => {
                    load_var_storage_int(ctx, storage);
                    emit_cvtsi2sd(&mut ctx.buf, Xmm::Xmm0, Reg::Rax);
                }
                Some(StoragePayload::Constant(v)) => {
                    emit_mov_reg_imm64(&mut ctx.buf, Reg::Rax, v);
                    emit_cvtsi2sd(&mut ctx.buf, Xmm::Xmm0, Reg::Rax);
                }
                _ => emit_load_f64_imm(&mut ctx.buf, Xmm::Xmm0, 0.0),
            }
            Ok(())
        }
        Node::Binary { op, left, right } => lower_float_binary(ctx, op, left, right),
        Node::Intrinsic { name_offset, name_len, arg } => {
            super::intrinsics::lower_intrinsic(ctx, name_offset, name_len, arg)
        }
        Node::GapCompute { expr } => {
            lower_gap_compute(ctx, node, expr)?;
            emit_cvtsi2sd(&mut ctx.buf, Xmm::Xmm0, Reg::Rax);
            Ok(())
        }
        other => Err(CompileError::CodegenUnsupportedFeature {
            what: format!("{other:?} cannot appear in a float expression"),
        }),
    }
}
