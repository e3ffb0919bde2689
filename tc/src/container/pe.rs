//! Minimal Windows PE32+ container writer.
//!
//! A minimal MS-DOS stub, PE signature, optional header describing a single
//! `R+W+X` executable section, and an import address table with two slots
//! (`GetStdHandle`, `WriteConsoleA`) at the fixed RVAs the codegen's
//! RIP-relative call sites already assume (design §4.7 / §9 open question:
//! regenerating this layout means moving those constants in lockstep).
//!
//! The single section is laid out as two fixed 4 KiB pages: user code plus
//! any embedded read-only data occupies the first page (`SECTION_RVA` ..
//! `SECTION_RVA + IMPORT_GAP_RVA`); the import machinery — IAT, import
//! directory table, hint/name entries, DLL name — occupies the second. A
//! program whose code does not fit in the first page is rejected rather than
//! silently corrupting the import table, since this writer does not (yet)
//! relocate the gap.

use tc_asm::CodeBuffer;

use crate::error::{CompileError, Result};

pub const IMAGE_BASE: u64 = 0x0040_0000;
pub const SECTION_RVA: u32 = 0x1000;
/// Code + embedded rodata must fit before this RVA; the import block starts
/// here and the two fixed IAT slots (`crate::platform::PE_IAT_*`) sit inside
/// it at `0x2060`/`0x2068`.
pub const IMPORT_GAP_RVA: u32 = 0x2000;
pub const SECTION_ALIGN: u32 = 0x1000;
pub const FILE_ALIGN: u32 = 0x200;

const DOS_HEADER_LEN: usize = 0x40;
const PE_SIG_LEN: usize = 4;
const COFF_HEADER_LEN: usize = 20;
const OPT_HEADER_LEN: usize = 112 + 16 * 8; // IMAGE_OPTIONAL_HEADER64 + 16 data directories
const SECTION_HEADER_LEN: usize = 40;

/// Total header region, rounded up to `FILE_ALIGN`; the section's raw data
/// starts immediately afterward and also anchors `SECTION_RVA` in memory.
fn headers_size() -> usize {
    let raw = DOS_HEADER_LEN + PE_SIG_LEN + COFF_HEADER_LEN + OPT_HEADER_LEN + SECTION_HEADER_LEN;
    round_up(raw, FILE_ALIGN as usize)
}

fn round_up(v: usize, align: usize) -> usize {
    (v + align - 1) / align * align
}

/// The IAT slot offsets (within the section, i.e. relative to `SECTION_RVA`)
/// that `GetStdHandle`/`WriteConsoleA` must resolve to, matching
/// `crate::platform::PE_IAT_GET_STD_HANDLE`/`PE_IAT_WRITE_CONSOLE_A`.
const IAT_OFFSET_IN_SECTION: u32 = 0x1060;

/// Build the section's raw data: `code` (already validated to fit in the
/// first page), padded to the import gap, followed by the import directory
/// table / ILT / IAT / hint-name entries / DLL name string.
fn build_section_data(code: &[u8]) -> Result<Vec<u8>> {
    let gap = (IMPORT_GAP_RVA - SECTION_RVA) as usize;
    if code.len() > gap {
        return Err(CompileError::CodegenUnsupportedFeature {
            what: format!(
                "windows output exceeds the {gap}-byte single-section code/rodata budget before the import table"
            ),
        });
    }

    let mut data = CodeBuffer::with_capacity(gap + 0x200);
    data.push_bytes(code);
    while data.position() < gap {
        data.push_u8(0x90); // nop padding
    }

    // IAT: two 8-byte slots (pre-binding, so initial value is the RVA of the
    // slot's own hint/name entry — the loader overwrites these with the
    // resolved function pointer before the entry point runs) + null terminator.
    let hint_name_get_std_handle_rva = IMPORT_GAP_RVA + 0x78;
    let hint_name_write_console_a_rva = IMPORT_GAP_RVA + 0x78 + 0x20;
    let dll_name_rva = IMPORT_GAP_RVA + 0x78 + 0x40;

    debug_assert_eq!(data.position() as u32, IAT_OFFSET_IN_SECTION - SECTION_RVA);
    data.push_u64(hint_name_get_std_handle_rva as u64);
    data.push_u64(hint_name_write_console_a_rva as u64);
    data.push_u64(0);

    // Import directory table: one descriptor for kernel32.dll + a null terminator.
    let ilt_rva = IAT_OFFSET_IN_SECTION; // OriginalFirstThunk == FirstThunk: no rebinding needed
    data.push_u32(ilt_rva);
    data.push_u32(0); // TimeDateStamp
    data.push_u32(0); // ForwarderChain
    data.push_u32(dll_name_rva);
    data.push_u32(IAT_OFFSET_IN_SECTION); // FirstThunk
    data.push_bytes(&[0u8; 20]); // null descriptor terminator

    // Hint/Name entries (IMAGE_IMPORT_BY_NAME): u16 hint + null-terminated name.
    data.push_u16(0);
    data.push_bytes(b"GetStdHandle\0");
    data.push_u8(0); // pad to the next entry's assumed 0x20 stride
    while data.position() as u32 + SECTION_RVA < hint_name_write_console_a_rva {
        data.push_u8(0);
    }
    data.push_u16(0);
    data.push_bytes(b"WriteConsoleA\0");
    while data.position() as u32 + SECTION_RVA < dll_name_rva {
        data.push_u8(0);
    }
    data.push_bytes(b"KERNEL32.dll\0");

    if data.has_overflowed() {
        return Err(CompileError::CodegenBufferOverflow { capacity: data.capacity() });
    }
    Ok(data.bytes().to_vec())
}

/// Serialize `code` (user code + embedded rodata, entry point at
/// `entry_offset` within it) into a complete minimal PE32+ image.
pub fn write(code: &[u8], entry_offset: u32) -> Result<Vec<u8>> {
    let section_data = build_section_data(code)?;
    let section_raw_size = round_up(section_data.len(), FILE_ALIGN as usize);
    let headers_size = headers_size();
    let image_size = round_up(headers_size + section_raw_size, SECTION_ALIGN as usize);

    let mut out = CodeBuffer::with_capacity(headers_size + section_raw_size);

    // MS-DOS header: just enough for a loader to see "this isn't a DOS program"
    // and jump straight to the PE header via e_lfanew.
    out.push_bytes(b"MZ");
    out.push_bytes(&[0u8; 0x3A]); // reserved DOS header fields, unused by us
    out.push_u32(DOS_HEADER_LEN as u32); // e_lfanew -> PE signature follows immediately

    out.push_bytes(b"PE\0\0");

    // COFF file header
    out.push_u16(0x8664); // IMAGE_FILE_MACHINE_AMD64
    out.push_u16(1); // NumberOfSections
    out.push_u32(0); // TimeDateStamp
    out.push_u32(0); // PointerToSymbolTable
    out.push_u32(0); // NumberOfSymbols
    out.push_u16((OPT_HEADER_LEN) as u16); // SizeOfOptionalHeader
    out.push_u16(0x0022); // Characteristics: EXECUTABLE_IMAGE | LARGE_ADDRESS_AWARE

    // IMAGE_OPTIONAL_HEADER64
    out.push_u16(0x020B); // PE32+ magic
    out.push_u8(0); // MajorLinkerVersion
    out.push_u8(0); // MinorLinkerVersion
    out.push_u32(section_raw_size as u32); // SizeOfCode
    out.push_u32(0); // SizeOfInitializedData
    out.push_u32(0); // SizeOfUninitializedData
    out.push_u32(SECTION_RVA + entry_offset); // AddressOfEntryPoint
    out.push_u32(SECTION_RVA); // BaseOfCode
    out.push_u64(IMAGE_BASE);
    out.push_u32(SECTION_ALIGN);
    out.push_u32(FILE_ALIGN);
    out.push_u16(6); // MajorOSVersion
    out.push_u16(0);
    out.push_u16(0); // MajorImageVersion
    out.push_u16(0);
    out.push_u16(6); // MajorSubsystemVersion
    out.push_u16(0);
    out.push_u32(0); // Win32VersionValue
    out.push_u32(image_size as u32);
    out.push_u32(headers_size as u32); // SizeOfHeaders
    out.push_u32(0); // CheckSum
    out.push_u16(3); // Subsystem: IMAGE_SUBSYSTEM_WINDOWS_CUI
    out.push_u16(0); // DllCharacteristics
    out.push_u64(0x10_0000); // SizeOfStackReserve
    out.push_u64(0x1000); // SizeOfStackCommit
    out.push_u64(0x10_0000); // SizeOfHeapReserve
    out.push_u64(0x1000); // SizeOfHeapCommit
    out.push_u32(0); // LoaderFlags
    out.push_u32(16); // NumberOfRvaAndSizes

    // Data directories: only the import table (index 1) is populated.
    for i in 0..16u32 {
        if i == 1 {
            out.push_u32(IMPORT_GAP_RVA);
            out.push_u32((section_data.len() as u32).saturating_sub(IMPORT_GAP_RVA - SECTION_RVA));
        } else {
            out.push_u32(0);
            out.push_u32(0);
        }
    }

    // Section header: one RWX section covering the whole payload.
    let mut name = [0u8; 8];
    name[..5].copy_from_slice(b".text");
    out.push_bytes(&name);
    out.push_u32(section_data.len() as u32); // VirtualSize
    out.push_u32(SECTION_RVA);
    out.push_u32(section_raw_size as u32); // SizeOfRawData
    out.push_u32(headers_size as u32); // PointerToRawData
    out.push_u32(0); // PointerToRelocations
    out.push_u32(0); // PointerToLinenumbers
    out.push_u16(0); // NumberOfRelocations
    out.push_u16(0); // NumberOfLinenumbers
    out.push_u32(0xE000_0020u32); // CODE | EXECUTE | READ | WRITE

    while out.position() < headers_size {
        out.push_u8(0);
    }

    out.push_bytes(&section_data);
    while out.position() < headers_size + section_raw_size {
        out.push_u8(0);
    }

    if out.has_overflowed() {
        return Err(CompileError::CodegenBufferOverflow { capacity: out.capacity() });
    }
    Ok(out.bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_starts_with_mz_and_pe_signature() {
        let img = write(&[0xC3], 0).unwrap();
        assert_eq!(&img[0..2], b"MZ");
        let lfanew = u32::from_le_bytes(img[0x3C..0x40].try_into().unwrap()) as usize;
        assert_eq!(&img[lfanew..lfanew + 4], b"PE\0\0");
    }

    #[test]
    fn oversized_code_before_import_gap_is_rejected() {
        let code = vec![0x90u8; (IMPORT_GAP_RVA - SECTION_RVA) as usize + 1];
        assert!(write(&code, 0).is_err());
    }

    #[test]
    fn iat_slots_land_at_the_fixed_rvas() {
        let img = write(&[0xC3], 0).unwrap();
        let headers = headers_size();
        let iat_file_offset = headers + (IAT_OFFSET_IN_SECTION - SECTION_RVA) as usize;
        // both slots must be present (non-garbage) 8-byte entries
        assert!(iat_file_offset + 16 <= img.len());
    }
}
