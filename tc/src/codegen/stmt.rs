//! Statement lowering: one function per [`Node`] variant that can appear at
//! statement position, plus the int/float print routine shared by every
//! `Output` verb.

use tc_asm::encoder::*;
use tc_asm::{Mem, Reg};

use crate::ast::{Node, NodeIdx};
use crate::error::{CompileError, Result};
use crate::lexer::VarType;
use crate::platform::Platform;
use crate::storage::{TypeTag, VarStorage};
use crate::symbol::{djb2, Array4dLayout, SymbolKind, StoragePayload};

use super::expr;
use super::{emit_guarded_print_absolute, emit_guarded_print_reg, string_vaddr, with_call_guard, CodegenContext, VARIABLE_REGS};

pub(crate) fn lower_stmt_chain(ctx: &mut CodegenContext, mut node: NodeIdx) -> Result<()> {
    loop {
        if node == 0 {
            return Ok(());
        }
        match *ctx.ast.get(node) {
            Node::Chain { item, next } => {
                lower_stmt(ctx, item)?;
                node = next;
            }
            _ => return lower_stmt(ctx, node),
        }
    }
}

fn lower_stmt(ctx: &mut CodegenContext, node: NodeIdx) -> Result<()> {
    match *ctx.ast.get(node) {
        Node::VarDef { ty, name_offset, name_len, init } => lower_var_def(ctx, ty, name_offset, name_len, init),
        Node::FuncDef { name_offset, name_len, body, param_count } => {
            lower_func_def(ctx, name_offset, name_len, body, param_count)
        }
        Node::Output { verb: _, content, .. } => lower_output(ctx, content),
        Node::Call { callee, args_head } => lower_call(ctx, callee, args_head),
        Node::DoBlock { body } => lower_do_block(ctx, body),
        Node::Array4dDef { name_offset, name_len, dims } => lower_array4d_def(ctx, name_offset, name_len, dims),
        Node::Assign { target, value } => lower_assign(ctx, target, value),
        Node::Timing { op, expr: inner, .. } => expr::lower_timing(ctx, op, inner),
        Node::GapCompute { expr: inner } => expr::lower_gap_compute(ctx, node, inner).map(|_| ()),
        Node::Poison => Err(CompileError::AstCorrupt { node_index: node }),
        _ => {
            // A bare literal/identifier reached statement position (grammar
            // allows it as the fallback arm of `parse_statement`); evaluate
            // it for any side effects and discard the result.
            match expr::infer_type(ctx, node) {
                TypeTag::Float => expr::lower_float_expr(ctx, node),
                _ => expr::lower_int_expr(ctx, node),
            }
        }
    }
}

fn resolve_type_tag(ctx: &CodegenContext, ty: VarType, init: NodeIdx) -> TypeTag {
    match ty {
        VarType::Int => TypeTag::Int,
        VarType::Float => TypeTag::Float,
        VarType::Str => TypeTag::Str,
        VarType::Bool => TypeTag::Bool,
        VarType::Char => TypeTag::Char,
        VarType::Untyped => {
            if init == 0 {
                TypeTag::Int
            } else {
                expr::infer_type(ctx, init)
            }
        }
    }
}

fn lower_var_def(ctx: &mut CodegenContext, ty: VarType, name_offset: u32, name_len: u32, init: NodeIdx) -> Result<()> {
    let name_hash = djb2(ctx.strings.get(name_offset, name_len));
    let tag = resolve_type_tag(ctx, ty, init);

    let storage = match tag {
        TypeTag::Float => {
            expr::lower_float_expr(ctx, init)?;
            let storage = expr::allocate_storage(ctx, TypeTag::Float);
            expr::store_var_storage_float(ctx, storage);
            storage
        }
        TypeTag::Str => {
            let vaddr = match init {
                0 => 0i64,
                n => match *ctx.ast.get(n) {
                    Node::Str { offset, .. } => string_vaddr(ctx, offset) as i64,
                    _ => {
                        return Err(CompileError::CodegenUnsupportedFeature {
                            what: "a string variable's initializer must be a string literal".to_string(),
                        })
                    }
                },
            };
            emit_mov_reg_imm64(&mut ctx.buf, Reg::Rax, vaddr);
            let storage = expr::allocate_storage(ctx, TypeTag::Str);
            expr::store_var_storage_int(ctx, storage);
            storage
        }
        _ => {
            expr::lower_int_expr(ctx, init)?;
            let storage = expr::allocate_storage(ctx, tag);
            expr::store_var_storage_int(ctx, storage);
            storage
        }
    };

    ctx.symbols.define(name_hash, name_offset, name_len, SymbolKind::Variable, StoragePayload::Variable(storage, tag))
}

fn lower_assign(ctx: &mut CodegenContext, target: NodeIdx, value: NodeIdx) -> Result<()> {
    let (offset, len) = match *ctx.ast.get(target) {
        Node::Identifier { offset, len } => (offset, len),
        _ => {
            return Err(CompileError::CodegenUnsupportedFeature {
                what: "assignment target must be a plain identifier".to_string(),
            })
        }
    };
    let name_hash = djb2(ctx.strings.get(offset, len));
    match ctx.symbols.resolve(name_hash).map(|s| s.storage) {
        Some(StoragePayload::Variable(storage, TypeTag::Float)) => {
            expr::lower_float_expr(ctx, value)?;
            expr::store_var_storage_float(ctx, storage);
            Ok(())
        }
        Some(StoragePayload::Variable(storage, _)) => {
            expr::lower_int_expr(ctx, value)?;
            expr::store_var_storage_int(ctx, storage);
            Ok(())
        }
        _ => {
            // assigning to a name with no prior `var.`-declaration defines it
            // on the spot, matching "loading an undefined variable yields
            // zero" — writing one is symmetric.
            let tag = expr::infer_type(ctx, value);
            let storage = match tag {
                TypeTag::Float => {
                    expr::lower_float_expr(ctx, value)?;
                    let storage = expr::allocate_storage(ctx, TypeTag::Float);
                    expr::store_var_storage_float(ctx, storage);
                    storage
                }
                _ => {
                    expr::lower_int_expr(ctx, value)?;
                    let storage = expr::allocate_storage(ctx, tag);
                    expr::store_var_storage_int(ctx, storage);
                    storage
                }
            };
            ctx.symbols.define(name_hash, offset, len, SymbolKind::Variable, StoragePayload::Variable(storage, tag))
        }
    }
}

/// `|name| func.can < body : >` — an implicit single parameter bound to the
/// fixed identifier `arg`, since the parser captures a name-less parameter
/// count of 1 and nothing else. The body is skipped over at the point it's
/// encountered (a `jmp` straight to the resume point) since a function
/// definition reached during ordinary top-to-bottom codegen is not itself
/// executed there.
fn lower_func_def(
    ctx: &mut CodegenContext,
    name_offset: u32,
    name_len: u32,
    body: NodeIdx,
    param_count: u8,
) -> Result<()> {
    let name_hash = djb2(ctx.strings.get(name_offset, name_len));
    let skip_body = emit_jmp_rel32_placeholder(&mut ctx.buf);

    let reg_snapshot = ctx.symbols.registers.snapshot();
    let stack_snapshot = ctx.symbols.stack.snapshot();
    ctx.symbols.registers.restore(0);
    ctx.symbols.stack.restore(0);
    ctx.symbols.push_scope();

    let entry_offset = ctx.buf.position() as u32;
    emit_push(&mut ctx.buf, Reg::Rbp);
    emit_mov_reg_reg(&mut ctx.buf, Reg::Rbp, Reg::Rsp);
    for r in VARIABLE_REGS {
        emit_push(&mut ctx.buf, r);
    }

    let arg_src = match ctx.platform {
        Platform::Windows => Reg::Rcx,
        Platform::Linux | Platform::MacOs => Reg::Rdi,
    };
    let arg_slot = ctx.symbols.stack.alloc_slot();
    emit_mov_mem_reg(&mut ctx.buf, Mem::new(Reg::Rbp, arg_slot), arg_src);
    if param_count > 0 {
        let arg_hash = djb2(b"arg");
        ctx.symbols.define(
            arg_hash,
            0,
            0,
            SymbolKind::Variable,
            StoragePayload::Variable(VarStorage::Stack(arg_slot), TypeTag::Int),
        )?;
    }

    emit_sub_reg_imm32(&mut ctx.buf, Reg::Rsp, 0);
    let locals_field = ctx.buf.position() - 4;

    lower_stmt_chain(ctx, body)?;

    // `push rbp` plus the 9 callee-saved pushes above leave RSP 8 bytes shy
    // of 16-aligned (10 pushes, 80 bytes — a multiple of 16 — on top of the
    // `call`-pushed return address, which itself leaves RSP 8 mod 16). A call
    // guard's own pushes are a multiple of 16 too, so whatever residue the
    // locals `sub` leaves is exactly what lands at the next `call`/indirect
    // call; every stack slot is 8 bytes, so this frame's total is always 0
    // or 8 mod 16 already, and only the former needs a padding slot.
    let mut locals = ctx.symbols.stack.total_bytes();
    if locals % 16 == 0 {
        locals += 8;
    }
    ctx.buf.patch_i32_at(locals_field, locals);

    // 9 callee-saved pushes above rbp, 8 bytes each — undo the locals `sub`
    // by landing rsp right where those pushes left it.
    emit_lea_mem(&mut ctx.buf, Reg::Rsp, Mem::new(Reg::Rbp, -(8 * VARIABLE_REGS.len() as i32)));
    for r in VARIABLE_REGS.into_iter().rev() {
        emit_pop(&mut ctx.buf, r);
    }
    emit_pop(&mut ctx.buf, Reg::Rbp);
    emit_ret(&mut ctx.buf);

    ctx.symbols.pop_scope();
    ctx.symbols.registers.restore(reg_snapshot);
    ctx.symbols.stack.restore(stack_snapshot);

    ctx.functions.define(&mut ctx.buf, name_hash, entry_offset, param_count);

    let resume = ctx.buf.position();
    patch_reloc(&mut ctx.buf, skip_body, resume);
    Ok(())
}

/// `^name/ args \` — only the first argument is passed through (the callee
/// only ever has the one implicit `arg` parameter); any further ones are
/// still evaluated in order for their side effects, then discarded.
fn lower_call(ctx: &mut CodegenContext, callee: NodeIdx, args_head: NodeIdx) -> Result<()> {
    let (offset, len) = match *ctx.ast.get(callee) {
        Node::Identifier { offset, len } => (offset, len),
        _ => {
            return Err(CompileError::CodegenUnsupportedFeature {
                what: "call target must be a plain identifier".to_string(),
            })
        }
    };
    let name_hash = djb2(ctx.strings.get(offset, len));

    let arg_dst = match ctx.platform {
        Platform::Windows => Reg::Rcx,
        Platform::Linux | Platform::MacOs => Reg::Rdi,
    };

    let mut cur = args_head;
    let mut first = true;
    while cur != 0 {
        let (item, next) = match *ctx.ast.get(cur) {
            Node::Chain { item, next } => (item, next),
            _ => break,
        };
        expr::lower_int_expr(ctx, item)?;
        if first {
            emit_mov_reg_reg(&mut ctx.buf, arg_dst, Reg::Rax);
            first = false;
        }
        cur = next;
    }

    with_call_guard(ctx, |ctx| {
        let reloc = emit_call_rel32_placeholder(&mut ctx.buf);
        ctx.functions.call_site(&mut ctx.buf, name_hash, reloc);
    });
    Ok(())
}

fn lower_do_block(ctx: &mut CodegenContext, body: NodeIdx) -> Result<()> {
    ctx.runtime.arena.enter_action();
    let result = lower_stmt_chain(ctx, body);
    ctx.runtime.arena.exit_action();
    result
}

fn lower_array4d_def(ctx: &mut CodegenContext, name_offset: u32, name_len: u32, dims: [u16; 4]) -> Result<()> {
    let count = dims.iter().map(|d| *d as usize).product::<usize>().max(1);
    let mut base = 0i32;
    for i in 0..count {
        let slot = ctx.symbols.stack.alloc_slot();
        if i == 0 {
            base = slot;
        }
    }
    let name_hash = djb2(ctx.strings.get(name_offset, name_len));
    ctx.symbols.define(
        name_hash,
        name_offset,
        name_len,
        SymbolKind::Array4d,
        StoragePayload::Array4d(Array4dLayout { dims, base_stack_offset: base }),
    )
}

fn lower_output(ctx: &mut CodegenContext, content: NodeIdx) -> Result<()> {
    if let Node::Str { offset, len } = *ctx.ast.get(content) {
        let addr = string_vaddr(ctx, offset);
        return emit_guarded_print_absolute(ctx, addr, len as u64);
    }
    match expr::infer_type(ctx, content) {
        TypeTag::Float => {
            expr::lower_float_expr(ctx, content)?;
            emit_cvttsd2si(&mut ctx.buf, Reg::Rax, tc_asm::Xmm::Xmm0);
            print_int(ctx)
        }
        TypeTag::Str => Err(CompileError::CodegenUnsupportedFeature {
            what: "printing a string-typed value requires a literal operand".to_string(),
        }),
        _ => {
            expr::lower_int_expr(ctx, content)?;
            print_int(ctx)
        }
    }
}

/// Convert the signed integer in `RAX` to decimal text in a 24-byte stack
/// scratch buffer, trailing `\n` included, and print it. Uses only `RAX`,
/// `RCX`, `RDX`, `RSI`, `RDI` — the five registers no user variable is ever
/// resident in — so it never needs the call guard for its own arithmetic,
/// only around the final print.
fn print_int(ctx: &mut CodegenContext) -> Result<()> {
    let mut offs = [0i32; 3];
    for o in offs.iter_mut() {
        *o = ctx.symbols.stack.alloc_slot();
    }
    let base = *offs.iter().min().unwrap();
    let buf_end = base + 24;

    emit_lea_mem(&mut ctx.buf, Reg::Rsi, Mem::new(Reg::Rbp, buf_end));
    emit_sub_reg_imm32(&mut ctx.buf, Reg::Rsi, 1);
    emit_mov_mem_imm8(&mut ctx.buf, Mem::new(Reg::Rsi, 0), b'\n');

    emit_mov_reg_imm64(&mut ctx.buf, Reg::Rdi, 0);
    emit_test_reg_reg(&mut ctx.buf, Reg::Rax, Reg::Rax);
    let skip_negate = emit_jcc_rel32_placeholder(&mut ctx.buf, Cc::NonNegative);
    emit_mov_reg_imm64(&mut ctx.buf, Reg::Rdi, 1);
    emit_neg(&mut ctx.buf, Reg::Rax);
    let after_negate = ctx.buf.position();
    patch_reloc(&mut ctx.buf, skip_negate, after_negate);

    emit_mov_reg_imm64(&mut ctx.buf, Reg::Rcx, 10);
    let loop_start = ctx.buf.position();
    emit_idiv(&mut ctx.buf, Reg::Rcx);
    emit_add_reg_imm32(&mut ctx.buf, Reg::Rdx, b'0' as i32);
    emit_sub_reg_imm32(&mut ctx.buf, Reg::Rsi, 1);
    emit_mov_mem_reg8(&mut ctx.buf, Mem::new(Reg::Rsi, 0), Reg::Rdx);
    emit_test_reg_reg(&mut ctx.buf, Reg::Rax, Reg::Rax);
    let loop_back = emit_jcc_rel32_placeholder(&mut ctx.buf, Cc::NotEq);
    patch_reloc(&mut ctx.buf, loop_back, loop_start);

    emit_test_reg_reg(&mut ctx.buf, Reg::Rdi, Reg::Rdi);
    let skip_sign = emit_jcc_rel32_placeholder(&mut ctx.buf, Cc::Eq);
    emit_sub_reg_imm32(&mut ctx.buf, Reg::Rsi, 1);
    emit_mov_mem_imm8(&mut ctx.buf, Mem::new(Reg::Rsi, 0), b'-');
    let after_sign = ctx.buf.position();
    patch_reloc(&mut ctx.buf, skip_sign, after_sign);

    emit_lea_mem(&mut ctx.buf, Reg::Rcx, Mem::new(Reg::Rbp, buf_end));
    emit_sub_reg_reg(&mut ctx.buf, Reg::Rcx, Reg::Rsi);

    emit_guarded_print_reg(ctx, Reg::Rsi, Reg::Rcx)
}
