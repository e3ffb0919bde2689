//! Function table and forward-reference fixup list (pipeline component 7).
//!
//! A call emitted before its callee is defined gets a placeholder `call
//! rel32` and a fixup entry keyed by the callee's name hash. When the
//! definition is later recorded, every matching fixup is patched and removed
//! — the standard one-pass-compiler forward-reference pattern (design §9).

use tc_asm::encoder::{patch_reloc, Reloc};
use tc_asm::CodeBuffer;

#[derive(Debug, Clone, Copy)]
pub struct FunctionEntry {
    pub name_hash: u32,
    pub code_offset: u32,
    pub param_count: u8,
    pub is_defined: bool,
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    call_site_reloc: Reloc,
    callee_name_hash: u32,
}

#[derive(Default)]
pub struct FunctionTable {
    functions: Vec<FunctionEntry>,
    fixups: Vec<Fixup>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, name_hash: u32) -> Option<&FunctionEntry> {
        self.functions.iter().find(|f| f.name_hash == name_hash)
    }

    pub fn find_mut(&mut self, name_hash: u32) -> Option<&mut FunctionEntry> {
        self.functions.iter_mut().find(|f| f.name_hash == name_hash)
    }

    /// Register a forward (or already-resolved) call site. If the callee is
    /// already defined the relocation is patched immediately; otherwise it is
    /// queued in the fixup list.
    pub fn call_site(&mut self, buf: &mut CodeBuffer, callee_name_hash: u32, reloc: Reloc) {
        if let Some(entry) = self.find(callee_name_hash) {
            if entry.is_defined {
                patch_reloc(buf, reloc, entry.code_offset as usize);
                return;
            }
        }
        self.fixups.push(Fixup { call_site_reloc: reloc, callee_name_hash });
    }

    /// Record a function definition's entry point, declaring a placeholder
    /// entry first if none existed, then draining every fixup that targets it.
    pub fn define(
        &mut self,
        buf: &mut CodeBuffer,
        name_hash: u32,
        code_offset: u32,
        param_count: u8,
    ) {
        if let Some(entry) = self.find_mut(name_hash) {
            entry.code_offset = code_offset;
            entry.param_count = param_count;
            entry.is_defined = true;
        } else {
            self.functions.push(FunctionEntry {
                name_hash,
                code_offset,
                param_count,
                is_defined: true,
            });
        }
        self.fixups.retain(|fx| {
            if fx.callee_name_hash == name_hash {
                patch_reloc(buf, fx.call_site_reloc, code_offset as usize);
                false
            } else {
                true
            }
        });
    }

    /// Names of every fixup still unresolved — non-empty means
    /// `fixup-unresolved-at-finalize`.
    pub fn unresolved_fixup_hashes(&self) -> Vec<u32> {
        self.fixups.iter().map(|fx| fx.callee_name_hash).collect()
    }

    pub fn is_empty_fixups(&self) -> bool {
        self.fixups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_asm::encoder::emit_call_rel32_placeholder;

    #[test]
    fn forward_call_is_patched_once_callee_is_defined() {
        let mut buf = CodeBuffer::with_capacity(64);
        let mut table = FunctionTable::new();
        let reloc = emit_call_rel32_placeholder(&mut buf);
        table.call_site(&mut buf, 42, reloc);
        assert!(!table.is_empty_fixups());

        // pad a bit then "define" the function at the current offset
        buf.push_u8(0x90);
        let target = buf.position() as u32;
        table.define(&mut buf, 42, target, 1);

        assert!(table.is_empty_fixups());
        let disp = i32::from_le_bytes(buf.bytes()[1..5].try_into().unwrap());
        assert_eq!(disp, reloc.displacement(target as usize));
    }

    #[test]
    fn call_to_already_defined_function_patches_immediately() {
        let mut buf = CodeBuffer::with_capacity(64);
        let mut table = FunctionTable::new();
        table.define(&mut buf, 7, 100, 0);
        let reloc = emit_call_rel32_placeholder(&mut buf);
        table.call_site(&mut buf, 7, reloc);
        assert!(table.is_empty_fixups());
    }
}
