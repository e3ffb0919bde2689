//! Reference-counted heap objects and the flag bits the GC paints onto them.

bitflags::bitflags! {
    /// Low bits of an object's flags word: GC bookkeeping, not reference
    /// counting (that's a dedicated `u16` field). The design describes this
    /// as a `u16` that also somehow carries "an upper-16-bit GC color" — read
    /// literally that doesn't fit in 16 bits, so this implementation widens
    /// the field to `u32` and keeps the low 16 bits for these flags, the high
    /// 16 for the color (see [`RcObject::color`]). Recorded as a resolved
    /// open question in DESIGN.md.
    #[derive(Default, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u16 {
        const MARKED   = 0b0000_0001;
        const TEMPORAL = 0b0000_0010;
        const FREED    = 0b0000_0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Allocated,
    Freed,
}

#[derive(Clone, Copy)]
pub struct RcObject {
    pub size: u32,
    pub refcount: u16,
    flags: ObjectFlags,
    color: u16,
}

impl RcObject {
    pub fn state(&self) -> ObjectState {
        if self.flags.contains(ObjectFlags::FREED) {
            ObjectState::Freed
        } else {
            ObjectState::Allocated
        }
    }

    pub fn is_marked(&self) -> bool {
        self.flags.contains(ObjectFlags::MARKED)
    }

    pub fn color(&self) -> u16 {
        self.color
    }

    pub fn is_temporal(&self) -> bool {
        self.flags.contains(ObjectFlags::TEMPORAL)
    }
}

pub type ObjectId = u32;

#[derive(Default)]
pub struct RcHeap {
    objects: Vec<RcObject>,
    bump: usize,
    capacity: usize,
}

impl RcHeap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { objects: Vec::new(), bump: 0, capacity }
    }

    pub fn alloc(&mut self, size: u32, temporal: bool) -> Option<ObjectId> {
        let aligned = (size as usize + 7) & !7;
        if self.bump.checked_add(aligned)? > self.capacity {
            return None;
        }
        self.bump += aligned;
        let mut flags = ObjectFlags::empty();
        if temporal {
            flags |= ObjectFlags::TEMPORAL;
        }
        let id = self.objects.len() as ObjectId;
        self.objects.push(RcObject { size, refcount: 1, flags, color: 0 });
        Some(id)
    }

    pub fn get(&self, id: ObjectId) -> &RcObject {
        &self.objects[id as usize]
    }

    /// Increment a refcount. Saturates at `0xFFFF` — a no-op at saturation,
    /// per the design's testable invariant that refcounts never wrap.
    pub fn rc_inc(&mut self, id: ObjectId) {
        let obj = &mut self.objects[id as usize];
        if obj.refcount != u16::MAX {
            obj.refcount += 1;
        }
    }

    /// Decrement a refcount. Returns `true` if this drop took it to zero
    /// (the object transitions to `MARKED_FREED`).
    pub fn rc_dec(&mut self, id: ObjectId) -> bool {
        let obj = &mut self.objects[id as usize];
        if obj.refcount == u16::MAX {
            // saturated: a single dec does not necessarily mean the true
            // count reached zero, so we never free from a saturated count.
            return false;
        }
        if obj.refcount > 0 {
            obj.refcount -= 1;
        }
        if obj.refcount == 0 {
            obj.flags |= ObjectFlags::FREED;
            true
        } else {
            false
        }
    }

    pub(crate) fn mark(&mut self, id: ObjectId, color: u16) {
        let obj = &mut self.objects[id as usize];
        obj.flags |= ObjectFlags::MARKED;
        obj.color = color;
    }

    pub(crate) fn clear_mark(&mut self, id: ObjectId) {
        self.objects[id as usize].flags.remove(ObjectFlags::MARKED);
    }

    pub(crate) fn sweep_unmarked(&mut self) {
        for obj in self.objects.iter_mut() {
            if !obj.flags.contains(ObjectFlags::MARKED) && !obj.flags.contains(ObjectFlags::FREED) {
                obj.flags |= ObjectFlags::FREED;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> {
        0..self.objects.len() as ObjectId
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_saturates_instead_of_wrapping() {
        let mut heap = RcHeap::with_capacity(1024);
        let id = heap.alloc(8, false).unwrap();
        for _ in 0..70000 {
            heap.rc_inc(id);
        }
        assert_eq!(heap.get(id).refcount, u16::MAX);
    }

    #[test]
    fn refcount_zero_frees_object() {
        let mut heap = RcHeap::with_capacity(1024);
        let id = heap.alloc(8, false).unwrap();
        assert!(heap.rc_dec(id));
        assert_eq!(heap.get(id).state(), ObjectState::Freed);
    }

    #[test]
    fn heap_exhaustion_returns_none() {
        let mut heap = RcHeap::with_capacity(8);
        assert!(heap.alloc(8, false).is_some());
        assert!(heap.alloc(8, false).is_none());
    }
}
