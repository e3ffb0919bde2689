//! Codegen orchestration (pipeline components 4–8, 11): walks the AST pool
//! once and emits x86-64 machine code directly into a single in-memory
//! [`CodeBuffer`], threading the symbol table, function table, and temporal
//! runtime model the rest of the compiler owns.
//!
//! The emitted image is laid out as `[string pool][generated code]`: the
//! interned string pool is embedded verbatim as a read-only data blob ahead
//! of the entry point (see [`ast::StringPool::raw`]), so every string
//! literal's address is just a fixed code-buffer offset resolved once up
//! front rather than a separate relocation.

pub mod expr;
pub mod intrinsics;
pub mod stmt;

use tc_asm::encoder::{
    emit_and_reg_imm32, emit_jmp_rel32_placeholder, emit_mov_reg_imm64, emit_movsd_xmm_mem,
    emit_pop, emit_push, patch_reloc,
};
use tc_asm::{CodeBuffer, Reg, Xmm};

use crate::ast::{AstPool, Node, NodeIdx, StringPool};
use crate::container::elf;
use crate::error::{CompileError, Result};
use crate::functions::FunctionTable;
use crate::platform::{self, Platform};
use crate::runtime::TemporalRuntime;
use crate::symbol::SymbolTable;

/// Sizing knobs a caller (the driver, via CLI/env overrides) picks once per
/// compilation; see design §4.9's CLI > env > default precedence.
#[derive(Debug, Clone, Copy)]
pub struct CodegenOptions {
    pub code_capacity: usize,
    pub symbol_capacity: usize,
    pub arena_capacity: usize,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            code_capacity: tc_asm::DEFAULT_CODE_CAPACITY,
            symbol_capacity: 1024,
            arena_capacity: 1 << 20,
        }
    }
}

pub struct EmittedProgram {
    pub code: Vec<u8>,
    pub entry_offset: u32,
}

/// Everything a single codegen pass threads through its node visitors.
pub struct CodegenContext<'a> {
    pub ast: &'a AstPool,
    pub strings: &'a StringPool,
    pub symbols: SymbolTable,
    pub functions: FunctionTable,
    pub runtime: TemporalRuntime,
    pub platform: Platform,
    pub buf: CodeBuffer,
    /// Buffer offset where the embedded string pool bytes begin (0 if the
    /// pool is empty — nothing is ever addressed there in that case).
    pub strings_base: u32,
}

/// Absolute virtual address of a string literal at `(offset, len)` in the
/// interned pool.
pub(crate) fn string_vaddr(ctx: &CodegenContext, offset: u32) -> u64 {
    absolute_vaddr(ctx.platform, ctx.strings_base + offset)
}

/// Registers an ordinary variable might be resident in at any point in the
/// program (see `storage::GP_CALLEE_SAVED`/`TEMPORAL_CALLEE_SAVED`). Any
/// codegen sequence that calls into something this compiler didn't itself
/// generate — a print syscall, a user function call — pushes all nine before
/// and pops them after, so that callee's own register use can never corrupt
/// a live variable.
pub(crate) const VARIABLE_REGS: [Reg; 9] =
    [Reg::Rbx, Reg::R8, Reg::R9, Reg::R10, Reg::R11, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

fn push_call_guard(buf: &mut CodeBuffer) {
    for r in VARIABLE_REGS {
        emit_push(buf, r);
    }
    emit_push(buf, Reg::Rax); // alignment padding: 10 pushes keeps rsp%16 invariant
}

fn pop_call_guard(buf: &mut CodeBuffer) {
    emit_pop(buf, Reg::Rax);
    for r in VARIABLE_REGS.into_iter().rev() {
        emit_pop(buf, r);
    }
}

/// Print a compile-time-known (address, length) — a string literal sitting
/// in the embedded rodata prefix.
pub(crate) fn emit_guarded_print_absolute(
    ctx: &mut CodegenContext,
    addr: u64,
    len: u64,
) -> Result<()> {
    push_call_guard(&mut ctx.buf);
    platform::emit_print_bytes(&mut ctx.buf, ctx.platform, addr, len)?;
    pop_call_guard(&mut ctx.buf);
    Ok(())
}

/// Print a runtime-computed (address, length) pair, e.g. the itoa scratch
/// buffer. `addr_reg` must be `Rsi` (the one scratch register both
/// platforms' print emitters read before clobbering); `len_reg` may be any
/// register, including ones the guard protects, since it is moved into `R8`
/// only after the guard has saved that register's prior value.
pub(crate) fn emit_guarded_print_reg(
    ctx: &mut CodegenContext,
    addr_reg: Reg,
    len_reg: Reg,
) -> Result<()> {
    debug_assert_eq!(addr_reg, Reg::Rsi, "addr_reg must be Rsi, the only register both platforms' print paths leave untouched until it is read");
    push_call_guard(&mut ctx.buf);
    tc_asm::encoder::emit_mov_reg_reg(&mut ctx.buf, Reg::R8, len_reg);
    platform::emit_print_bytes_reg(&mut ctx.buf, ctx.platform, addr_reg, Reg::R8)?;
    pop_call_guard(&mut ctx.buf);
    Ok(())
}

/// Wrap a user function call (or anything else using the System V / MS x64
/// calling convention) with the same protect-then-restore discipline.
pub(crate) fn with_call_guard(ctx: &mut CodegenContext, body: impl FnOnce(&mut CodegenContext)) {
    push_call_guard(&mut ctx.buf);
    body(ctx);
    pop_call_guard(&mut ctx.buf);
}

/// Load an arbitrary `f64` immediate into an XMM register. There is no
/// GPR-to-XMM bit-move in this encoder, so the bit pattern is round-tripped
/// through the native stack: push the raw bits, `movsd` them back out as a
/// double, then discard the stack slot.
pub(crate) fn emit_load_f64_imm(buf: &mut CodeBuffer, dst: Xmm, value: f64) {
    emit_mov_reg_imm64(buf, Reg::Rax, value.to_bits() as i64);
    emit_push(buf, Reg::Rax);
    emit_movsd_xmm_mem(buf, dst, tc_asm::Mem::new(Reg::Rsp, 0));
    emit_pop(buf, Reg::Rax);
}

/// Absolute virtual address of a byte offset in the final code buffer, once
/// the container header (ELF) or section base (PE) is accounted for. Used to
/// turn a string literal's pool offset into an immediate operand.
pub(crate) fn absolute_vaddr(platform: Platform, offset: u32) -> u64 {
    match platform {
        // The Mach-O writer doesn't exist yet (container::write always
        // rejects MacOs); codegen still needs *some* answer here for a
        // macOS-targeted compile to reach that later, more informative
        // error instead of panicking mid-codegen, so it reuses the ELF
        // fixed-base convention as a placeholder.
        Platform::Linux | Platform::MacOs => elf::vaddr_of(offset as usize),
        Platform::Windows => {
            crate::container::pe::IMAGE_BASE + (crate::container::pe::SECTION_RVA + offset) as u64
        }
    }
}

fn ast_uses_temporal_runtime(ast: &AstPool, node: NodeIdx) -> bool {
    if node == 0 {
        return false;
    }
    match ast.get(node) {
        Node::Timing { .. } | Node::DoBlock { .. } | Node::GapCompute { .. } => true,
        Node::Binary { left, right, .. } => {
            ast_uses_temporal_runtime(ast, *left) || ast_uses_temporal_runtime(ast, *right)
        }
        Node::Assign { target, value } => {
            ast_uses_temporal_runtime(ast, *target) || ast_uses_temporal_runtime(ast, *value)
        }
        Node::Call { args_head, .. } => ast_uses_temporal_runtime(ast, *args_head),
        Node::Chain { item, next } => {
            ast_uses_temporal_runtime(ast, *item) || ast_uses_temporal_runtime(ast, *next)
        }
        Node::VarDef { init, .. } => ast_uses_temporal_runtime(ast, *init),
        Node::FuncDef { body, .. } => ast_uses_temporal_runtime(ast, *body),
        Node::Output { content, next_chained, .. } => {
            ast_uses_temporal_runtime(ast, *content) || ast_uses_temporal_runtime(ast, *next_chained)
        }
        Node::Intrinsic { arg, .. } => ast_uses_temporal_runtime(ast, *arg),
        _ => false,
    }
}

/// Emit a complete program: the rodata prefix, the runtime prelude (if the
/// source actually uses a temporal construct), the lowered statement chain,
/// and the final exit sequence.
pub fn emit_program(
    ast: &AstPool,
    strings: &StringPool,
    root: NodeIdx,
    platform: Platform,
    options: CodegenOptions,
) -> Result<EmittedProgram> {
    let mut buf = CodeBuffer::with_capacity(options.code_capacity);

    // The ELF writer fixes the entry point at buffer offset 0 (design
    // §4.7), so read-only data can never precede the first instruction the
    // way a linker-built binary's .rodata section would. Instead, when the
    // source has string literals, offset 0 holds a `jmp` over the embedded
    // pool bytes straight into the generated code that follows them.
    let mut strings_base = 0u32;
    if !strings.is_empty() {
        let over_data = emit_jmp_rel32_placeholder(&mut buf);
        strings_base = buf.position() as u32;
        buf.push_bytes(strings.raw());
        let resume = buf.position();
        patch_reloc(&mut buf, over_data, resume);
    }
    let entry_offset = 0u32;

    // Process entry hands off with RSP ≡ 8 mod 16 (SysV/Win64 both leave it
    // this way), not 16-byte aligned, and nothing downstream re-establishes
    // it: a `call` to a user function or a Windows IAT thunk assumes the
    // latter. Clear the low 4 bits once, here, rather than re-deriving the
    // alignment class at every call site.
    emit_and_reg_imm32(&mut buf, Reg::Rsp, -16);

    let needs_runtime = ast_uses_temporal_runtime(ast, root);
    if needs_runtime {
        if platform == Platform::Windows {
            return Err(CompileError::PlatformUnsupported {
                what: "temporal operators (do/>>/gap.compute) on windows".to_string(),
            });
        }
        crate::runtime::codegen::emit_runtime_prelude(&mut buf, platform)?;
    }

    let mut ctx = CodegenContext {
        ast,
        strings,
        symbols: SymbolTable::with_capacity(options.symbol_capacity),
        functions: FunctionTable::new(),
        runtime: TemporalRuntime::new(options.arena_capacity),
        platform,
        buf,
        strings_base,
    };

    stmt::lower_stmt_chain(&mut ctx, root)?;
    platform::emit_exit(&mut ctx.buf, ctx.platform, 0)?;

    if !ctx.functions.is_empty_fixups() {
        let names = ctx
            .functions
            .unresolved_fixup_hashes()
            .iter()
            .map(|h| format!("{h:#x}"))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(CompileError::FixupUnresolvedAtFinalize { name: names });
    }
    if ctx.buf.has_overflowed() {
        return Err(CompileError::CodegenBufferOverflow { capacity: ctx.buf.capacity() });
    }

    Ok(EmittedProgram { code: ctx.buf.bytes().to_vec(), entry_offset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::StringPool;

    #[test]
    fn empty_program_emits_just_the_exit_sequence() {
        let ast = AstPool::with_capacity(8);
        let strings = StringPool::with_capacity(8);
        let prog = emit_program(&ast, &strings, 0, Platform::Linux, CodegenOptions::default()).unwrap();
        assert_eq!(prog.entry_offset, 0);
        assert!(!prog.code.is_empty());
    }
}
