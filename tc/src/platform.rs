//! Platform layer (pipeline component 9): syscalls / console writes and
//! process exit, one tagged-dispatch emitter per target (design §9:
//! "platform codegen is a tagged dispatch inside emitter helpers").

use std::str::FromStr;

use tc_asm::encoder::{emit_mov_reg_imm64, emit_mov_reg_reg, emit_mov_reg_riprel, emit_syscall};
use tc_asm::{CodeBuffer, Reg};

use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    MacOs,
}

impl FromStr for Platform {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            "macos" => Ok(Platform::MacOs),
            other => Err(CompileError::PlatformUnsupported { what: other.to_string() }),
        }
    }
}

/// Code-buffer-local byte offsets of the two IAT slots the minimal PE writer
/// lays down (`container::pe::IAT_OFFSET_IN_SECTION` and the slot after it).
/// Since the section's raw data starts at buffer offset 0 and that offset is
/// also `container::pe::SECTION_RVA`, these double as RVAs minus `SECTION_RVA`.
/// If the PE layout is ever regenerated these must change in lockstep (open
/// question carried verbatim from the design).
pub const PE_IAT_GET_STD_HANDLE: usize = 0x1060;
pub const PE_IAT_WRITE_CONSOLE_A: usize = 0x1068;

/// Emit a write of `len` bytes at `text_addr` (an absolute virtual address
/// already resident in the image, e.g. inside the code segment) to stdout,
/// followed by nothing else — callers chain `emit_exit` separately.
pub fn emit_print_bytes(
    buf: &mut CodeBuffer,
    platform: Platform,
    text_addr: u64,
    len: u64,
) -> Result<(), CompileError> {
    match platform {
        Platform::Linux | Platform::MacOs => {
            // write(1, text_addr, len)
            emit_mov_reg_imm64(buf, Reg::Rax, 1);
            emit_mov_reg_imm64(buf, Reg::Rdi, 1);
            emit_mov_reg_imm64(buf, Reg::Rsi, text_addr as i64);
            emit_mov_reg_imm64(buf, Reg::Rdx, len as i64);
            emit_syscall(buf);
            Ok(())
        }
        Platform::Windows => {
            // call *[rip-relative GetStdHandle slot](-11) -> rax = handle
            //
            // The IAT slot holds the resolved function pointer *value*, not its
            // own address, so the slot's contents must be loaded (`mov`) before
            // calling through it — loading the slot's address (`lea`) and
            // calling that would jump into the import table itself.
            emit_mov_reg_imm64(buf, Reg::Rcx, -11i64);
            emit_mov_reg_riprel(buf, Reg::Rax, PE_IAT_GET_STD_HANDLE);
            emit_call_indirect(buf, Reg::Rax);
            // call *[rip-relative WriteConsoleA slot](handle, text_addr, len, nullptr, nullptr)
            tc_asm::encoder::emit_mov_reg_reg(buf, Reg::Rcx, Reg::Rax);
            emit_mov_reg_imm64(buf, Reg::Rdx, text_addr as i64);
            emit_mov_reg_imm64(buf, Reg::R8, len as i64);
            emit_mov_reg_imm64(buf, Reg::R9, 0);
            emit_mov_reg_riprel(buf, Reg::Rax, PE_IAT_WRITE_CONSOLE_A);
            emit_call_indirect(buf, Reg::Rax);
            Ok(())
        }
    }
}

/// Register-addressed variant of [`emit_print_bytes`], for output whose
/// address/length are only known at runtime (e.g. the itoa scratch buffer).
/// `addr_reg`/`len_reg` must not be `Rcx`/`Rdx`/`R8`/`R9` on the Windows path
/// or `Rdi`/`Rsi`/`Rdx` on the Linux/macOS path — callers pick scratch
/// registers the calling convention doesn't otherwise need at the call site.
pub fn emit_print_bytes_reg(
    buf: &mut CodeBuffer,
    platform: Platform,
    addr_reg: Reg,
    len_reg: Reg,
) -> Result<(), CompileError> {
    match platform {
        Platform::Linux | Platform::MacOs => {
            emit_mov_reg_imm64(buf, Reg::Rax, 1);
            emit_mov_reg_imm64(buf, Reg::Rdi, 1);
            emit_mov_reg_reg(buf, Reg::Rsi, addr_reg);
            emit_mov_reg_reg(buf, Reg::Rdx, len_reg);
            emit_syscall(buf);
            Ok(())
        }
        Platform::Windows => {
            emit_mov_reg_imm64(buf, Reg::Rcx, -11i64);
            emit_mov_reg_riprel(buf, Reg::Rax, PE_IAT_GET_STD_HANDLE);
            emit_call_indirect(buf, Reg::Rax);
            emit_mov_reg_reg(buf, Reg::Rcx, Reg::Rax);
            emit_mov_reg_reg(buf, Reg::Rdx, addr_reg);
            emit_mov_reg_reg(buf, Reg::R8, len_reg);
            emit_mov_reg_imm64(buf, Reg::R9, 0);
            emit_mov_reg_riprel(buf, Reg::Rax, PE_IAT_WRITE_CONSOLE_A);
            emit_call_indirect(buf, Reg::Rax);
            Ok(())
        }
    }
}

/// Emit the process-exit sequence with an immediate status code.
pub fn emit_exit(buf: &mut CodeBuffer, platform: Platform, code: i64) -> Result<(), CompileError> {
    match platform {
        Platform::Linux | Platform::MacOs => {
            emit_mov_reg_imm64(buf, Reg::Rax, 60);
            emit_mov_reg_imm64(buf, Reg::Rdi, code);
            emit_syscall(buf);
            Ok(())
        }
        Platform::Windows => {
            // Microsoft x64: the host process-exits the thread on `ret` from
            // the entry point per the generated-binary ABI (design §6); the
            // exit status is simply left in eax.
            emit_mov_reg_imm64(buf, Reg::Rax, code);
            tc_asm::encoder::emit_ret(buf);
            Ok(())
        }
    }
}

fn emit_call_indirect(buf: &mut CodeBuffer, reg: Reg) {
    tc_asm::encoder::emit_call_indirect_reg(buf, reg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_exit_ends_in_syscall() {
        let mut buf = CodeBuffer::with_capacity(64);
        emit_exit(&mut buf, Platform::Linux, 0).unwrap();
        let bytes = buf.bytes();
        assert_eq!(&bytes[bytes.len() - 2..], &[0x0F, 0x05]);
    }

    #[test]
    fn unknown_platform_string_is_rejected() {
        assert!("beos".parse::<Platform>().is_err());
    }
}
