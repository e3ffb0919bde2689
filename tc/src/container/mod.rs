//! Executable container writers (pipeline component 13): one hand-built
//! format per target platform, dispatched on `Platform`. Neither writer
//! shells out to a system linker/assembler — see [`elf`] and [`pe`].

pub mod elf;
pub mod pe;

use crate::error::{CompileError, Result};
use crate::platform::Platform;

/// Finished machine image ready to be written to disk, plus the data a
/// caller needs to report back (entry point, total size) without re-parsing
/// the container.
pub struct Executable {
    pub bytes: Vec<u8>,
    pub entry_vaddr: u64,
}

/// Serialize `code` (already fully resolved — no unresolved fixups) into a
/// complete executable for `platform`. `entry_offset` is the code-buffer
/// offset of the first instruction to execute, after any embedded rodata
/// prefix.
pub fn write(platform: Platform, code: &[u8], entry_offset: u32) -> Result<Executable> {
    match platform {
        Platform::Linux => {
            debug_assert_eq!(entry_offset, 0, "ELF entry is always the first code byte");
            let bytes = elf::write(code)?;
            Ok(Executable { bytes, entry_vaddr: elf::vaddr_of(0) })
        }
        Platform::Windows => {
            let bytes = pe::write(code, entry_offset)?;
            let entry_vaddr = pe::IMAGE_BASE + (pe::SECTION_RVA + entry_offset) as u64;
            Ok(Executable { bytes, entry_vaddr })
        }
        Platform::MacOs => Err(CompileError::PlatformUnsupported {
            what: "macos (Mach-O container not yet implemented)".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_dispatch_produces_elf_magic() {
        let exe = write(Platform::Linux, &[0xC3], 0).unwrap();
        assert_eq!(&exe.bytes[0..4], &[0x7f, b'E', b'L', b'F']);
    }

    #[test]
    fn windows_dispatch_produces_mz_magic() {
        let exe = write(Platform::Windows, &[0xC3], 0).unwrap();
        assert_eq!(&exe.bytes[0..2], b"MZ");
    }
}
