//! Lowers the fixed part of the temporal runtime (region setup) into machine
//! code. This is deliberately small: the interesting state (arena offsets,
//! zone lists, GC color) lives in the [`super::TemporalRuntime`] model that
//! the rest of the compiler consults at compile time, not in memory the
//! generated program manages itself. What the generated program needs at
//! startup is simply the four `mmap` regions from design §6's persisted
//! layout table, reserved up front so later codegen can address into them
//! with fixed displacements.

use tc_asm::encoder::{emit_mov_reg_imm64, emit_mov_reg_reg, emit_syscall};
use tc_asm::{CodeBuffer, Reg};

use crate::error::CompileError;
use crate::platform::Platform;

/// Base and length (bytes) of each persisted region, per design §6.
pub const ARENA_BASE: u64 = 0x0010_0000;
pub const ARENA_LEN: u64 = 0x0060_0000;
pub const ZONES_BASE: u64 = 0x0070_0000;
pub const ZONES_LEN: u64 = 0x0030_0000;
pub const HEAP_BASE: u64 = 0x00A0_0000;
pub const HEAP_LEN: u64 = 0x0160_0000;
pub const GC_META_BASE: u64 = 0x0200_0000;
pub const GC_META_LEN: u64 = 0x0100_0000;

const PROT_READ_WRITE: i64 = 0x3;
const MAP_PRIVATE_ANON_FIXED: i64 = 0x32 | 0x10; // MAP_PRIVATE|MAP_ANONYMOUS|MAP_FIXED

struct Region {
    base: u64,
    len: u64,
}

const REGIONS: [Region; 4] = [
    Region { base: ARENA_BASE, len: ARENA_LEN },
    Region { base: ZONES_BASE, len: ZONES_LEN },
    Region { base: HEAP_BASE, len: HEAP_LEN },
    Region { base: GC_META_BASE, len: GC_META_LEN },
];

/// Emit the runtime prelude: one `mmap(addr, len, PROT_READ|PROT_WRITE,
/// MAP_PRIVATE|MAP_ANONYMOUS|MAP_FIXED, -1, 0)` per region. Only supported on
/// the syscall-based platforms; Windows temporal programs reserve their
/// regions through the PE loader's image layout instead (out of scope for
/// this lowering, tracked as a REDESIGN FLAG in DESIGN.md).
pub fn emit_runtime_prelude(buf: &mut CodeBuffer, platform: Platform) -> Result<(), CompileError> {
    match platform {
        Platform::Linux | Platform::MacOs => {
            for region in &REGIONS {
                emit_mmap_fixed(buf, platform, region.base, region.len);
            }
            Ok(())
        }
        Platform::Windows => Err(CompileError::PlatformUnsupported {
            what: "temporal runtime prelude on windows".to_string(),
        }),
    }
}

fn emit_mmap_fixed(buf: &mut CodeBuffer, platform: Platform, addr: u64, len: u64) {
    let syscall_no = match platform {
        Platform::Linux => 9,
        Platform::MacOs => 0x200_0000 + 197,
        Platform::Windows => unreachable!("windows handled by caller"),
    };
    emit_mov_reg_imm64(buf, Reg::Rax, syscall_no);
    emit_mov_reg_imm64(buf, Reg::Rdi, addr as i64);
    emit_mov_reg_imm64(buf, Reg::Rsi, len as i64);
    emit_mov_reg_imm64(buf, Reg::Rdx, PROT_READ_WRITE);
    emit_mov_reg_imm64(buf, Reg::R10, MAP_PRIVATE_ANON_FIXED);
    emit_mov_reg_imm64(buf, Reg::R8, -1);
    emit_mov_reg_imm64(buf, Reg::R9, 0);
    emit_syscall(buf);
    // mmap returns the mapped address in rax; since we requested MAP_FIXED at
    // a known address we don't need it, but zero it through rax->rax to keep
    // the epilogue's register-allocator assumptions about rax being
    // call-clobbered honest across platforms.
    emit_mov_reg_reg(buf, Reg::Rax, Reg::Rax);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_emits_one_syscall_per_region() {
        let mut buf = CodeBuffer::with_capacity(4096);
        emit_runtime_prelude(&mut buf, Platform::Linux).unwrap();
        let syscall_count = buf.bytes().windows(2).filter(|w| *w == [0x0F, 0x05]).count();
        assert_eq!(syscall_count, REGIONS.len());
    }

    #[test]
    fn windows_prelude_is_rejected() {
        let mut buf = CodeBuffer::with_capacity(64);
        assert!(emit_runtime_prelude(&mut buf, Platform::Windows).is_err());
    }
}
