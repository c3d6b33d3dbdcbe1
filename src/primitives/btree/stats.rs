use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of index statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeStatsSnapshot {
    /// Keyed searches (find, remove, insert positioning)
    pub searches: u64,
    /// Records inserted
    pub inserts: u64,
    /// Records removed by key or by rank
    pub removes: u64,
    /// Positional lookups and removals
    pub rank_ops: u64,
    /// Inserts rejected by fault injection
    pub injected_faults: u64,
}

/// Thread-safe statistics tracking for index operations.
#[derive(Default)]
pub struct BTreeStats {
    searches: AtomicU64,
    inserts: AtomicU64,
    removes: AtomicU64,
    rank_ops: AtomicU64,
    injected_faults: AtomicU64,
}

impl BTreeStats {
    pub(crate) fn inc_searches(&self) {
        self.searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_inserts(&self) {
        self.inserts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_removes(&self) {
        self.removes.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_rank_ops(&self) {
        self.rank_ops.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_injected_faults(&self) {
        self.injected_faults.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            searches: self.searches.load(AtomicOrdering::Relaxed),
            inserts: self.inserts.load(AtomicOrdering::Relaxed),
            removes: self.removes.load(AtomicOrdering::Relaxed),
            rank_ops: self.rank_ops.load(AtomicOrdering::Relaxed),
            injected_faults: self.injected_faults.load(AtomicOrdering::Relaxed),
        }
    }

    /// Emits the current counters as a tracing event.
    pub fn emit_tracing(&self) {
        let snap = self.snapshot();
        tracing::debug!(
            target: "dense_attr::btree::stats",
            searches = snap.searches,
            inserts = snap.inserts,
            removes = snap.removes,
            rank_ops = snap.rank_ops,
            injected_faults = snap.injected_faults,
            "btree stats"
        );
    }
}
