#![forbid(unsafe_code)]

//! Ordered index over fixed-size records.
//!
//! The index never interprets record bytes itself: every keyed operation takes
//! a comparator that orders the search key against a stored record. Comparators
//! are fallible because resolving a hash tie may need to read a heap.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::{Addr, AttrError, IterControl, IterOrder, Result};

mod mem;
mod stats;

pub use mem::MemIndex;
pub use stats::{BTreeStats, BTreeStatsSnapshot};

/// Orders the search key against one stored record.
pub type RecordCmp<'a> = dyn FnMut(&[u8]) -> Result<Ordering> + 'a;

/// Receives a copy of a located or removed record.
pub type RecordSink<'a> = dyn FnMut(&[u8]) -> Result<()> + 'a;

/// Sorted store of fixed-size records.
///
/// Callbacks passed to `find`, `remove` and the rank operations run
/// after the index has released its own internal state, so they may touch
/// *other* indices and heaps. Comparators run during the search and must not
/// touch this index.
pub trait IndexStore: Send + Sync {
    /// Address this index was created at.
    fn addr(&self) -> Addr;

    /// Size of every record in bytes.
    fn record_size(&self) -> usize;

    /// Creation parameters.
    fn params(&self) -> BTreeParams;

    /// Number of stored records.
    fn len(&self) -> Result<u64>;

    /// Returns true when the index holds no records.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Inserts a record after every record comparing equal to it.
    fn insert(&self, record: &[u8], cmp: &mut RecordCmp<'_>) -> Result<()>;

    /// Passes the first record comparing equal to `found`; returns whether one existed.
    fn find(&self, cmp: &mut RecordCmp<'_>, found: &mut RecordSink<'_>) -> Result<bool>;

    /// Removes the first matching record once `removed` accepted it.
    /// A failing callback leaves the record in place.
    fn remove(&self, cmp: &mut RecordCmp<'_>, removed: &mut RecordSink<'_>) -> Result<bool>;

    /// Passes the `n`-th record in `order` to `found`.
    fn find_by_rank(&self, order: IterOrder, n: u64, found: &mut RecordSink<'_>) -> Result<()>;

    /// Removes the `n`-th record in `order` once `removed` accepted it.
    fn remove_by_rank(&self, order: IterOrder, n: u64, removed: &mut RecordSink<'_>)
        -> Result<()>;

    /// Visits every record in native order until the callback stops.
    fn iterate(&self, visit: &mut dyn FnMut(&[u8]) -> Result<IterControl>) -> Result<IterControl>;
}

/// Node sizing and rebalancing knobs fixed when an index is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BTreeParams {
    /// Node size in bytes.
    pub node_size: u32,
    /// Fill percentage at which a node splits.
    pub split_percent: u8,
    /// Fill percentage below which neighbouring nodes merge.
    pub merge_percent: u8,
}

impl Default for BTreeParams {
    fn default() -> Self {
        Self {
            node_size: 512,
            split_percent: 100,
            merge_percent: 40,
        }
    }
}

impl BTreeParams {
    /// Checks the parameters against the record size they will hold.
    pub fn validate(&self, record_size: usize) -> Result<()> {
        if record_size == 0 {
            return Err(AttrError::Invalid("index record size must be non-zero"));
        }
        if (self.node_size as usize) < record_size {
            return Err(AttrError::Invalid("index node smaller than one record"));
        }
        if self.merge_percent == 0
            || self.merge_percent >= self.split_percent
            || self.split_percent > 100
        {
            return Err(AttrError::Invalid(
                "index merge/split percentages out of order",
            ));
        }
        Ok(())
    }

    /// Records that fit in one node.
    pub fn records_per_node(&self, record_size: usize) -> usize {
        self.node_size as usize / record_size.max(1)
    }
}
