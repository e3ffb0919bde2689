//! The four temporal zones and the entries that live in them.

use std::collections::HashMap;

use crate::runtime::heap::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    Past,
    Present,
    Future,
    Unknown,
}

impl Zone {
    pub const ALL: [Zone; 4] = [Zone::Past, Zone::Present, Zone::Future, Zone::Unknown];
}

/// One value's residency in a zone. `timeline_id` identifies which temporal
/// branch the value was written under; `temporal_offset` is its position on
/// that branch's timeline, used to order PRESENT entries when deciding what
/// has gone stale enough to migrate to PAST.
#[derive(Debug, Clone, Copy)]
pub struct ZoneEntry {
    pub value: ObjectId,
    pub timeline_id: u32,
    pub temporal_offset: u64,
    pub creating_timeline: u32,
    pub next: Option<u32>,
    pub prev: Option<u32>,
}

#[derive(Default)]
pub struct ZoneSet {
    entries: Vec<ZoneEntry>,
    heads: HashMap<Zone, Option<u32>>,
}

impl ZoneSet {
    pub fn new() -> Self {
        let mut heads = HashMap::new();
        for z in Zone::ALL {
            heads.insert(z, None);
        }
        Self { entries: Vec::new(), heads }
    }

    /// Insert `value` into `zone`, pushing it to the head of that zone's
    /// doubly-linked entry list.
    pub fn insert(
        &mut self,
        zone: Zone,
        value: ObjectId,
        timeline_id: u32,
        temporal_offset: u64,
    ) -> u32 {
        let idx = self.entries.len() as u32;
        let old_head = *self.heads.get(&zone).unwrap_or(&None);
        if let Some(h) = old_head {
            self.entries[h as usize].prev = Some(idx);
        }
        self.entries.push(ZoneEntry {
            value,
            timeline_id,
            temporal_offset,
            creating_timeline: timeline_id,
            next: old_head,
            prev: None,
        });
        self.heads.insert(zone, Some(idx));
        idx
    }

    pub fn head(&self, zone: Zone) -> Option<u32> {
        *self.heads.get(&zone).unwrap_or(&None)
    }

    pub fn entry(&self, idx: u32) -> &ZoneEntry {
        &self.entries[idx as usize]
    }

    pub fn iter_zone(&self, zone: Zone) -> impl Iterator<Item = &ZoneEntry> {
        let mut cur = self.head(zone);
        std::iter::from_fn(move || {
            let idx = cur?;
            let e = &self.entries[idx as usize];
            cur = e.next;
            Some(e)
        })
    }

    /// Relink every PRESENT entry older than `threshold` ticks on
    /// `current_timeline` into PAST, per design §4.6.
    pub fn migrate_present_to_past(&mut self, current_timeline: u32, threshold: u64) {
        let stale: Vec<u32> = self
            .present_indices()
            .into_iter()
            .filter(|&idx| {
                let e = &self.entries[idx as usize];
                e.timeline_id == current_timeline && e.temporal_offset + threshold <= current_timeline as u64
            })
            .collect();
        for idx in stale {
            self.unlink(Zone::Present, idx);
            self.relink_head(Zone::Past, idx);
        }
    }

    fn present_indices(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cur = self.head(Zone::Present);
        while let Some(idx) = cur {
            out.push(idx);
            cur = self.entries[idx as usize].next;
        }
        out
    }

    fn unlink(&mut self, zone: Zone, idx: u32) {
        let (prev, next) = {
            let e = &self.entries[idx as usize];
            (e.prev, e.next)
        };
        match prev {
            Some(p) => self.entries[p as usize].next = next,
            None => {
                self.heads.insert(zone, next);
            }
        }
        if let Some(n) = next {
            self.entries[n as usize].prev = prev;
        }
    }

    fn relink_head(&mut self, zone: Zone, idx: u32) {
        let old_head = self.head(zone);
        if let Some(h) = old_head {
            self.entries[h as usize].prev = Some(idx);
        }
        let e = &mut self.entries[idx as usize];
        e.next = old_head;
        e.prev = None;
        self.heads.insert(zone, Some(idx));
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

    #[test]
    fn insert_links_head_correctly() {
        let mut zs = ZoneSet::new();
        let a = zs.insert(Zone::Present, 0, 1, 0);
        let b = zs.insert(Zone::Present, 1, 1, 1);
        assert_eq!(zs.head(Zone::Present), Some(b));
        assert_eq!(zs.entry(b).next, Some(a));
        assert_eq!(zs.entry(a).prev, Some(b));
    }

    #[test]
    fn migration_moves_stale_entries_to_past() {
        let mut zs = ZoneSet::new();
        zs.insert(Zone::Present, 0, 1, 0);
        zs.migrate_present_to_past(1, 0);
        assert_eq!(zs.iter_zone(Zone::Present).count(), 0);
        assert_eq!(zs.iter_zone(Zone::Past).count(), 1);
    }

    #[test]
    fn each_zone_starts_empty() {
        let zs = ZoneSet::new();
        for z in Zone::ALL {
            assert!(zs.head(z).is_none());
        }
    }
}
