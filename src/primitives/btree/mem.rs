use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{BTreeParams, BTreeStats, IndexStore, RecordCmp, RecordSink};
use crate::types::{Addr, AttrError, IterControl, IterOrder, Result};

/// In-memory index keeping records in one sorted vector.
pub struct MemIndex {
    addr: Addr,
    record_size: usize,
    params: BTreeParams,
    records: Mutex<Vec<Vec<u8>>>,
    stats: Arc<BTreeStats>,
    insert_budget: Mutex<Option<u64>>,
}

impl MemIndex {
    /// Creates an empty index after validating `params` against `record_size`.
    pub fn new(addr: Addr, record_size: usize, params: BTreeParams) -> Result<Self> {
        params.validate(record_size)?;
        Ok(Self {
            addr,
            record_size,
            params,
            records: Mutex::new(Vec::new()),
            stats: Arc::new(BTreeStats::default()),
            insert_budget: Mutex::new(None),
        })
    }

    /// Shared handle to this index's statistics.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.stats)
    }

    /// Makes every insert after the next `n` successful ones fail with
    /// `CantInsert`. `None` disarms the fault.
    pub fn fail_inserts_after(&self, n: Option<u64>) {
        *self.insert_budget.lock() = n;
    }

    /// Copies every record in native order.
    pub fn records(&self) -> Vec<Vec<u8>> {
        self.records.lock().clone()
    }

    pub(crate) fn take_all(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.records.lock())
    }

    fn consume_insert_budget(&self) -> Result<()> {
        let mut budget = self.insert_budget.lock();
        match budget.as_mut() {
            Some(0) => {
                self.stats.inc_injected_faults();
                debug!(index = %self.addr, "btree.insert.injected_fault");
                Err(AttrError::CantInsert("injected index insert failure"))
            }
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_len(&self, record: &[u8]) -> Result<()> {
        if record.len() != self.record_size {
            return Err(AttrError::Invalid("record size does not match index"));
        }
        Ok(())
    }

    fn rank_position(len: usize, order: IterOrder, n: u64) -> Result<usize> {
        let count = len as u64;
        if n >= count {
            return Err(AttrError::BadIndex { n, count });
        }
        let n = n as usize;
        Ok(match order {
            IterOrder::Increasing | IterOrder::Native => n,
            IterOrder::Decreasing => len - 1 - n,
        })
    }

    /// Locates the first matching record and copies it out.
    fn locate(&self, cmp: &mut RecordCmp<'_>) -> Result<Option<(usize, Vec<u8>)>> {
        self.stats.inc_searches();
        let records = self.records.lock();
        let pos = lower_bound(&records, &mut *cmp)?;
        let Some(rec) = records.get(pos) else {
            return Ok(None);
        };
        if cmp(rec)? == Ordering::Equal {
            Ok(Some((pos, rec.clone())))
        } else {
            Ok(None)
        }
    }

    /// Removes `record` after a callback ran without the lock held.
    fn remove_exact(&self, hint: usize, record: &[u8]) -> Result<()> {
        let mut records = self.records.lock();
        let pos = if records.get(hint).map(Vec::as_slice) == Some(record) {
            hint
        } else {
            records
                .iter()
                .position(|r| r.as_slice() == record)
                .ok_or(AttrError::CantRemove("index record vanished during callback"))?
        };
        records.remove(pos);
        self.stats.inc_removes();
        Ok(())
    }
}

/// First position whose record is not ordered before the key.
fn lower_bound(records: &[Vec<u8>], cmp: &mut RecordCmp<'_>) -> Result<usize> {
    let (mut lo, mut hi) = (0usize, records.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp(&records[mid])? == Ordering::Greater {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// First position whose record is ordered after the key.
fn upper_bound(records: &[Vec<u8>], cmp: &mut RecordCmp<'_>) -> Result<usize> {
    let (mut lo, mut hi) = (0usize, records.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp(&records[mid])? == Ordering::Less {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}

impl IndexStore for MemIndex {
    fn addr(&self) -> Addr {
        self.addr
    }

    fn record_size(&self) -> usize {
        self.record_size
    }

    fn params(&self) -> BTreeParams {
        self.params
    }

    fn len(&self) -> Result<u64> {
        Ok(self.records.lock().len() as u64)
    }

    fn insert(&self, record: &[u8], cmp: &mut RecordCmp<'_>) -> Result<()> {
        self.check_len(record)?;
        self.consume_insert_budget()?;
        self.stats.inc_searches();
        let mut records = self.records.lock();
        let pos = upper_bound(&records, cmp)?;
        records.insert(pos, record.to_vec());
        self.stats.inc_inserts();
        trace!(index = %self.addr, pos, len = records.len(), "btree.insert");
        Ok(())
    }

    fn find(&self, cmp: &mut RecordCmp<'_>, found: &mut RecordSink<'_>) -> Result<bool> {
        match self.locate(cmp)? {
            Some((_, rec)) => {
                found(&rec)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, cmp: &mut RecordCmp<'_>, removed: &mut RecordSink<'_>) -> Result<bool> {
        let Some((pos, rec)) = self.locate(cmp)? else {
            return Ok(false);
        };
        removed(&rec)?;
        self.remove_exact(pos, &rec)?;
        trace!(index = %self.addr, pos, "btree.remove");
        Ok(true)
    }

    fn find_by_rank(&self, order: IterOrder, n: u64, found: &mut RecordSink<'_>) -> Result<()> {
        self.stats.inc_rank_ops();
        let rec = {
            let records = self.records.lock();
            let pos = Self::rank_position(records.len(), order, n)?;
            records[pos].clone()
        };
        found(&rec)
    }

    fn remove_by_rank(
        &self,
        order: IterOrder,
        n: u64,
        removed: &mut RecordSink<'_>,
    ) -> Result<()> {
        self.stats.inc_rank_ops();
        let (pos, rec) = {
            let records = self.records.lock();
            let pos = Self::rank_position(records.len(), order, n)?;
            (pos, records[pos].clone())
        };
        removed(&rec)?;
        self.remove_exact(pos, &rec)?;
        trace!(index = %self.addr, pos, "btree.remove_by_rank");
        Ok(())
    }

    fn iterate(&self, visit: &mut dyn FnMut(&[u8]) -> Result<IterControl>) -> Result<IterControl> {
        let snapshot = self.records();
        for rec in &snapshot {
            if visit(rec)? == IterControl::Stop {
                return Ok(IterControl::Stop);
            }
        }
        Ok(IterControl::Continue)
    }
}
