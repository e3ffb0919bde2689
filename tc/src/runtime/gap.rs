//! UNKNOWN-zone confidence tracking ("gap" metadata, design §4.8).
//!
//! A value written into the UNKNOWN zone represents data the program doesn't
//! have yet — a read from a not-yet-computed FUTURE slot, say. Each such
//! value carries a confidence score and a migration threshold: once enough
//! corroborating writes raise confidence past the threshold, the runtime
//! promotes the value into its target zone.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct GapMetadata {
    pub var_hash: u32,
    pub confidence: u8,
    pub missing_data: bool,
    pub migration_threshold: u8,
    pub target_zone: crate::runtime::zone::Zone,
}

#[derive(Default)]
pub struct GapRegistry {
    entries: HashMap<u32, GapMetadata>,
}

impl GapRegistry {
    pub fn register(&mut self, meta: GapMetadata) {
        self.entries.insert(meta.var_hash, meta);
    }

    pub fn get(&self, var_hash: u32) -> Option<&GapMetadata> {
        self.entries.get(&var_hash)
    }

    /// Raise a variable's confidence, saturating at 100. Returns `true` once
    /// confidence crosses its migration threshold (caller is responsible for
    /// then actually moving the value and removing the gap entry).
    pub fn raise_confidence(&mut self, var_hash: u32, delta: u8) -> bool {
        let Some(meta) = self.entries.get_mut(&var_hash) else {
            return false;
        };
        meta.confidence = meta.confidence.saturating_add(delta);
        meta.confidence >= meta.migration_threshold
    }

    pub fn resolve(&mut self, var_hash: u32) -> Option<GapMetadata> {
        self.entries.remove(&var_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::zone::Zone;

    #[test]
    fn confidence_crosses_threshold() {
        let mut reg = GapRegistry::default();
        reg.register(GapMetadata {
            var_hash: 42,
            confidence: 0,
            missing_data: true,
            migration_threshold: 50,
            target_zone: Zone::Present,
        });
        assert!(!reg.raise_confidence(42, 30));
        assert!(reg.raise_confidence(42, 30));
    }

    #[test]
    fn confidence_saturates_at_u8_max() {
        let mut reg = GapRegistry::default();
        reg.register(GapMetadata {
            var_hash: 1,
            confidence: 250,
            missing_data: true,
            migration_threshold: 255,
            target_zone: Zone::Future,
        });
        reg.raise_confidence(1, 100);
        assert_eq!(reg.get(1).unwrap().confidence, 255);
    }

    #[test]
    fn resolve_removes_entry() {
        let mut reg = GapRegistry::default();
        reg.register(GapMetadata {
            var_hash: 7,
            confidence: 0,
            missing_data: true,
            migration_threshold: 10,
            target_zone: Zone::Unknown,
        });
        assert!(reg.resolve(7).is_some());
        assert!(reg.get(7).is_none());
    }
}
