//! Temporal memory runtime (pipeline component 10).
//!
//! This module is the reference model for the three-tier allocator the
//! design specifies: a bump arena reclaimed at action-block boundaries, a
//! reference-counted heap, and four temporal zones (PAST/PRESENT/FUTURE/
//! UNKNOWN) tied together by a mark-and-sweep collector that follows
//! cross-zone timeline links.
//!
//! The model lives here as plain Rust state machines so its invariants (RC
//! saturation, balanced arena enter/exit, monotonically increasing GC color,
//! …) are directly unit-testable. [`codegen`] lowers the subset of it the
//! generated program actually needs — region setup and the handful of
//! allocator entry points reachable from source-language temporal operators —
//! into the fixed machine-code prelude described in design §6's persisted
//! state layout table.

pub mod arena;
pub mod codegen;
pub mod gap;
pub mod gc;
pub mod heap;
pub mod zone;

pub use arena::Arena;
pub use gap::{GapMetadata, GapRegistry};
pub use gc::{GcState, Root, TimelineLink};
pub use heap::RcHeap;
pub use zone::{Zone, ZoneEntry, ZoneSet};

/// Aggregates every temporal-runtime global the design lists, mirroring
/// design §9's "global mutable state becomes explicit context": one struct
/// threaded by reference instead of free-floating statics.
#[derive(Default)]
pub struct TemporalRuntime {
    pub arena: Arena,
    pub heap: RcHeap,
    pub zones: ZoneSet,
    pub gc: GcState,
    pub gap: GapRegistry,
}

impl TemporalRuntime {
    pub fn new(arena_capacity: usize) -> Self {
        Self {
            arena: Arena::with_capacity(arena_capacity),
            ..Default::default()
        }
    }

    /// Run one mark-and-sweep cycle, migrating stale PRESENT entries to PAST
    /// as a side effect (design §4.6).
    pub fn collect(&mut self, migration_threshold: u64) {
        self.gc.mark_and_sweep(&mut self.heap, &self.zones);
        self.zones.migrate_present_to_past(self.gc.current_timeline(), migration_threshold);
    }
}
