//! Linux ELF64 container writer.
//!
//! A single `Elf64_Ehdr` followed by one `PT_LOAD` `Elf64_Phdr` describing the
//! whole file mapped `R+X` at a fixed virtual base. File offset 0 maps to
//! `BASE_VADDR`, so every intra-code relative call/jump fixup computed during
//! codegen already lands correctly — no relocation pass is needed here.

use tc_asm::CodeBuffer;

use crate::error::{CompileError, Result};

/// Fixed load address (design §4.7 / §6).
pub const BASE_VADDR: u64 = 0x0040_0000;
pub const PAGE_ALIGN: u64 = 0x1000;

const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;

/// Bytes preceding the first emitted instruction in the final file — also the
/// quantity codegen adds to a code-buffer offset to get an absolute vaddr.
pub const HEADER_SIZE: u64 = EHDR_SIZE + PHDR_SIZE;

const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const EV_CURRENT: u32 = 1;
const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_R: u32 = 4;

/// Absolute virtual address of a given code-buffer offset once the ELF
/// header and program header precede it in the image.
pub fn vaddr_of(code_offset: usize) -> u64 {
    BASE_VADDR + HEADER_SIZE + code_offset as u64
}

/// Serialize `code` into a complete ELF64 executable image.
///
/// `entry_offset` is the code-buffer offset of the first instruction to run
/// (after any embedded read-only data prefix). Entry is always
/// `base + sizeof(Ehdr) + sizeof(Phdr)`, i.e. code always starts immediately
/// after the headers — `entry_offset` therefore must be `0` for a
/// well-formed program (validated by the driver before this is called).
pub fn write(code: &[u8]) -> Result<Vec<u8>> {
    let file_size = HEADER_SIZE + code.len() as u64;
    let mut out = CodeBuffer::with_capacity(file_size as usize);

    // e_ident
    out.push_bytes(&[0x7f, b'E', b'L', b'F']);
    out.push_u8(2); // ELFCLASS64
    out.push_u8(1); // ELFDATA2LSB
    out.push_u8(1); // EV_CURRENT
    out.push_u8(0); // ELFOSABI_SYSV
    out.push_bytes(&[0u8; 8]); // padding

    out.push_u16(ET_EXEC);
    out.push_u16(EM_X86_64);
    out.push_u32(EV_CURRENT);
    out.push_u64(BASE_VADDR + HEADER_SIZE); // e_entry
    out.push_u64(EHDR_SIZE); // e_phoff
    out.push_u64(0); // e_shoff
    out.push_u32(0); // e_flags
    out.push_u16(EHDR_SIZE as u16); // e_ehsize
    out.push_u16(PHDR_SIZE as u16); // e_phentsize
    out.push_u16(1); // e_phnum
    out.push_u16(0); // e_shentsize
    out.push_u16(0); // e_shnum
    out.push_u16(0); // e_shstrndx

    // single PT_LOAD Phdr covering the whole file
    out.push_u32(PT_LOAD);
    out.push_u32(PF_X | PF_R);
    out.push_u64(0); // p_offset
    out.push_u64(BASE_VADDR); // p_vaddr
    out.push_u64(BASE_VADDR); // p_paddr
    out.push_u64(file_size); // p_filesz
    out.push_u64(file_size); // p_memsz
    out.push_u64(PAGE_ALIGN); // p_align

    out.push_bytes(code);

    if out.has_overflowed() {
        return Err(CompileError::CodegenBufferOverflow { capacity: file_size as usize });
    }
    Ok(out.bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_matches_entry_formula() {
        assert_eq!(HEADER_SIZE, 120);
    }

    #[test]
    fn image_starts_with_elf_magic() {
        let img = write(&[0xC3]).unwrap();
        assert_eq!(&img[0..4], &[0x7f, b'E', b'L', b'F']);
    }

    #[test]
    fn entry_point_is_base_plus_header_size() {
        let img = write(&[0xC3]).unwrap();
        let entry = u64::from_le_bytes(img[24..32].try_into().unwrap());
        assert_eq!(entry, BASE_VADDR + HEADER_SIZE);
    }

    #[test]
    fn single_phdr_covers_the_whole_file() {
        let code = vec![0x90u8; 32];
        let img = write(&code).unwrap();
        let phnum = u16::from_le_bytes(img[56..58].try_into().unwrap());
        assert_eq!(phnum, 1);
        let filesz = u64::from_le_bytes(img[96..104].try_into().unwrap());
        assert_eq!(filesz, img.len() as u64);
    }
}
