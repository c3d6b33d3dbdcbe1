#![forbid(unsafe_code)]

//! Address registry standing in for the container file.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::primitives::btree::{BTreeParams, IndexStore, MemIndex, RecordSink};
use crate::primitives::heap::{HeapStore, MemHeap};
use crate::primitives::shared::{MemSharedTable, SharedMessages};
use crate::types::{Addr, AttrError, Result};

/// Allocates, opens, and frees heaps and indices by address.
///
/// Open handles are reference counted; dropping one closes it.
pub trait FileSpace: Send + Sync {
    /// Allocates an empty heap.
    fn create_heap(&self) -> Result<Addr>;
    /// Opens the heap at `addr`.
    fn open_heap(&self, addr: Addr) -> Result<Arc<dyn HeapStore>>;
    /// Frees the heap at `addr` and every object in it.
    fn delete_heap(&self, addr: Addr) -> Result<()>;
    /// Allocates an empty index for records of `record_size` bytes.
    fn create_index(&self, record_size: usize, params: BTreeParams) -> Result<Addr>;
    /// Opens the index at `addr`.
    fn open_index(&self, addr: Addr) -> Result<Arc<dyn IndexStore>>;
    /// Frees the index at `addr`, handing each record to `per_record` first.
    fn delete_index(&self, addr: Addr, per_record: Option<&mut RecordSink<'_>>) -> Result<()>;
    /// The file-wide shared-message table.
    fn shared(&self) -> Arc<dyn SharedMessages>;
}

/// In-memory [`FileSpace`].
pub struct MemSpace {
    next_addr: AtomicU64,
    heaps: Mutex<FxHashMap<Addr, Arc<MemHeap>>>,
    indices: Mutex<FxHashMap<Addr, Arc<MemIndex>>>,
    shared: Arc<MemSharedTable>,
    fail_index_creation: Mutex<bool>,
}

const FIRST_ADDR: u64 = 0x800;
const ADDR_STRIDE: u64 = 0x200;

impl MemSpace {
    /// A space whose shared-message table is disabled.
    pub fn new() -> Self {
        Self::with_shared(MemSharedTable::disabled())
    }

    /// A space using `shared` as its shared-message table.
    pub fn with_shared(shared: MemSharedTable) -> Self {
        Self {
            next_addr: AtomicU64::new(FIRST_ADDR),
            heaps: Mutex::new(FxHashMap::default()),
            indices: Mutex::new(FxHashMap::default()),
            shared: Arc::new(shared),
            fail_index_creation: Mutex::new(false),
        }
    }

    /// Concrete shared table, for inspection.
    pub fn shared_table(&self) -> Arc<MemSharedTable> {
        Arc::clone(&self.shared)
    }

    /// Concrete heap at `addr`, if allocated.
    pub fn mem_heap(&self, addr: Addr) -> Option<Arc<MemHeap>> {
        self.heaps.lock().get(&addr).cloned()
    }

    /// Concrete index at `addr`, if allocated.
    pub fn mem_index(&self, addr: Addr) -> Option<Arc<MemIndex>> {
        self.indices.lock().get(&addr).cloned()
    }

    /// Whether anything is allocated at `addr`.
    pub fn is_resolvable(&self, addr: Addr) -> bool {
        self.heaps.lock().contains_key(&addr) || self.indices.lock().contains_key(&addr)
    }

    /// Number of live heaps and indices.
    pub fn allocated(&self) -> usize {
        self.heaps.lock().len() + self.indices.lock().len()
    }

    /// Makes subsequent `create_index` calls fail with `CantAllocate`.
    pub fn fail_index_creation(&self, fail: bool) {
        *self.fail_index_creation.lock() = fail;
    }

    fn next_addr(&self) -> Addr {
        Addr(self.next_addr.fetch_add(ADDR_STRIDE, Ordering::Relaxed))
    }
}

impl Default for MemSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSpace for MemSpace {
    fn create_heap(&self) -> Result<Addr> {
        let addr = self.next_addr();
        self.heaps.lock().insert(addr, Arc::new(MemHeap::new(addr)));
        debug!(addr = %addr, "space.create_heap");
        Ok(addr)
    }

    fn open_heap(&self, addr: Addr) -> Result<Arc<dyn HeapStore>> {
        let heap: Arc<dyn HeapStore> = self
            .heaps
            .lock()
            .get(&addr)
            .cloned()
            .ok_or(AttrError::NotFound("heap"))?;
        Ok(heap)
    }

    fn delete_heap(&self, addr: Addr) -> Result<()> {
        let heap = self
            .heaps
            .lock()
            .remove(&addr)
            .ok_or(AttrError::NotFound("heap"))?;
        heap.metrics().emit_tracing();
        debug!(addr = %addr, "space.delete_heap");
        Ok(())
    }

    fn create_index(&self, record_size: usize, params: BTreeParams) -> Result<Addr> {
        if *self.fail_index_creation.lock() {
            return Err(AttrError::CantAllocate("index allocation refused"));
        }
        let addr = self.next_addr();
        let index = MemIndex::new(addr, record_size, params)
            .map_err(|_| AttrError::CantAllocate("invalid index parameters"))?;
        self.indices.lock().insert(addr, Arc::new(index));
        debug!(addr = %addr, record_size, "space.create_index");
        Ok(addr)
    }

    fn open_index(&self, addr: Addr) -> Result<Arc<dyn IndexStore>> {
        let index: Arc<dyn IndexStore> = self
            .indices
            .lock()
            .get(&addr)
            .cloned()
            .ok_or(AttrError::NotFound("index"))?;
        Ok(index)
    }

    fn delete_index(&self, addr: Addr, per_record: Option<&mut RecordSink<'_>>) -> Result<()> {
        let index = self
            .indices
            .lock()
            .remove(&addr)
            .ok_or(AttrError::NotFound("index"))?;
        index.stats().emit_tracing();
        let records = index.take_all();
        debug!(addr = %addr, records = records.len(), "space.delete_index");
        if let Some(cb) = per_record {
            for rec in &records {
                cb(rec)?;
            }
        }
        Ok(())
    }

    fn shared(&self) -> Arc<dyn SharedMessages> {
        self.shared.clone()
    }
}
