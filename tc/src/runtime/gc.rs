//! Mark-and-sweep collector over the RC heap's temporal objects.
//!
//! Roots are traced into the zone graph via [`TimelineLink`]s: an object in
//! one zone can keep an object in another zone alive if a timeline link
//! bridges them (e.g. a FUTURE value computed from a PRESENT one). Marking
//! walks both directions across a link, per design §4.7 ("temporal
//! reachability is not zone-local").

use crate::runtime::heap::{ObjectId, RcHeap};
use crate::runtime::zone::ZoneSet;

#[derive(Debug, Clone, Copy)]
pub struct Root {
    pub object: ObjectId,
    pub name_for_debug: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct TimelineLink {
    pub from_obj: ObjectId,
    pub to_obj: ObjectId,
    pub timeline_id: u32,
}

#[derive(Default)]
pub struct GcState {
    color: u16,
    current_timeline: u32,
    roots: Vec<Root>,
    links: Vec<TimelineLink>,
}

impl GcState {
    pub fn add_root(&mut self, root: Root) {
        self.roots.push(root);
    }

    pub fn add_timeline_link(&mut self, link: TimelineLink) {
        self.links.push(link);
    }

    pub fn current_timeline(&self) -> u32 {
        self.current_timeline
    }

    pub fn advance_timeline(&mut self) {
        self.current_timeline += 1;
    }

    pub fn color(&self) -> u16 {
        self.color
    }

    /// One full cycle: bump the color generation, mark everything reachable
    /// from roots (following timeline links bidirectionally), then sweep
    /// every object whose color didn't get updated this cycle.
    pub fn mark_and_sweep(&mut self, heap: &mut RcHeap, _zones: &ZoneSet) {
        self.color = self.color.wrapping_add(1);
        let generation = self.color;

        let mut worklist: Vec<ObjectId> = self.roots.iter().map(|r| r.object).collect();
        while let Some(obj) = worklist.pop() {
            if heap.get(obj).color() == generation {
                continue;
            }
            heap.mark(obj, generation);
            for link in &self.links {
                if link.from_obj == obj {
                    worklist.push(link.to_obj);
                }
                if link.to_obj == obj {
                    worklist.push(link.from_obj);
                }
            }
        }

        for id in heap.ids() {
            if heap.get(id).color() != generation {
                heap.clear_mark(id);
            }
        }
        heap.sweep_unmarked();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_object_is_swept() {
        let mut heap = RcHeap::with_capacity(1024);
        let zones = ZoneSet::new();
        let mut gc = GcState::default();
        let live = heap.alloc(8, false).unwrap();
        let dead = heap.alloc(8, false).unwrap();
        gc.add_root(Root { object: live, name_for_debug: "live" });

        gc.mark_and_sweep(&mut heap, &zones);

        assert!(heap.get(live).is_marked());
        assert_eq!(heap.get(dead).state(), crate::runtime::heap::ObjectState::Freed);
    }

    #[test]
    fn timeline_link_keeps_linked_object_alive() {
        let mut heap = RcHeap::with_capacity(1024);
        let zones = ZoneSet::new();
        let mut gc = GcState::default();
        let root_obj = heap.alloc(8, false).unwrap();
        let linked = heap.alloc(8, false).unwrap();
        gc.add_root(Root { object: root_obj, name_for_debug: "root" });
        gc.add_timeline_link(TimelineLink { from_obj: root_obj, to_obj: linked, timeline_id: 0 });

        gc.mark_and_sweep(&mut heap, &zones);

        assert_eq!(heap.get(linked).state(), crate::runtime::heap::ObjectState::Allocated);
    }

    #[test]
    fn color_advances_every_cycle() {
        let mut heap = RcHeap::with_capacity(1024);
        let zones = ZoneSet::new();
        let mut gc = GcState::default();
        gc.mark_and_sweep(&mut heap, &zones);
        let first = gc.color();
        gc.mark_and_sweep(&mut heap, &zones);
        assert_ne!(first, gc.color());
    }
}
