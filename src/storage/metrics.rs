use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hooks fired by [`DenseStorage`](super::DenseStorage) as it mutates or scans attributes.
pub trait AttrMetrics: Send + Sync {
    /// An attribute was published in the indices.
    ///
    /// # Parameters
    /// * `shared` - Whether the payload went to the shared-message table.
    fn attr_inserted(&self, shared: bool);

    /// An attribute was withdrawn from the indices and its payload released.
    fn attr_removed(&self);

    /// An attribute was renamed.
    fn attr_renamed(&self);

    /// An attribute's value was rewritten.
    ///
    /// # Parameters
    /// * `relocated` - Whether the payload moved and the index records were updated.
    fn attr_written(&self, relocated: bool);

    /// A sorted attribute table was materialized.
    fn table_built(&self, entries: usize);

    /// A half-applied operation was undone.
    fn rollback(&self, op: &'static str);
}

/// A no-op implementation of [`AttrMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl AttrMetrics for NoopMetrics {
    fn attr_inserted(&self, _shared: bool) {}
    fn attr_removed(&self) {}
    fn attr_renamed(&self) {}
    fn attr_written(&self, _relocated: bool) {}
    fn table_built(&self, _entries: usize) {}
    fn rollback(&self, _op: &'static str) {}
}

/// Atomic counters behind [`AttrMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Attributes inserted into the plain heap.
    pub inserted_heap: AtomicU64,

    /// Attributes inserted through the shared-message table.
    pub inserted_shared: AtomicU64,

    /// Attributes removed.
    pub removed: AtomicU64,

    /// Attributes renamed.
    pub renamed: AtomicU64,

    /// Value rewrites that stayed in place.
    pub written_in_place: AtomicU64,

    /// Value rewrites that moved the payload.
    pub written_relocated: AtomicU64,

    /// Tables materialized.
    pub tables_built: AtomicU64,

    /// Entries placed in materialized tables.
    pub table_entries: AtomicU64,

    /// Operations rolled back after a partial failure.
    pub rollbacks: AtomicU64,
}

impl AttrMetrics for CounterMetrics {
    fn attr_inserted(&self, shared: bool) {
        if shared {
            self.inserted_shared.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inserted_heap.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn attr_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    fn attr_renamed(&self) {
        self.renamed.fetch_add(1, Ordering::Relaxed);
    }

    fn attr_written(&self, relocated: bool) {
        if relocated {
            self.written_relocated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.written_in_place.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn table_built(&self, entries: usize) {
        self.tables_built.fetch_add(1, Ordering::Relaxed);
        self.table_entries
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    fn rollback(&self, _op: &'static str) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
pub fn default_metrics() -> Arc<dyn AttrMetrics> {
    Arc::new(NoopMetrics)
}
