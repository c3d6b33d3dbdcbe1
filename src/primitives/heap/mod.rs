#![forbid(unsafe_code)]

//! Fractal-heap style object store: variable-length blobs behind fixed-width ids.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::types::checksum::object_crc32;
use crate::types::{Addr, AttrError, HeapId, Result, HEAP_ID_LEN};

/// Object store addressed by [`HeapId`].
///
/// `op` lends the stored bytes to a callback without copying them. While the
/// callback runs the object is pinned and any call back into the same heap
/// fails with [`AttrError::Pinned`]; callbacks must copy what they need.
pub trait HeapStore: Send + Sync {
    /// Address this heap was created at.
    fn addr(&self) -> Addr;

    /// Width of the ids this heap hands out.
    fn id_len(&self) -> usize {
        HEAP_ID_LEN
    }

    /// Stores a new object.
    fn insert(&self, obj: &[u8]) -> Result<HeapId>;

    /// Returns an owned copy of an object.
    fn read(&self, id: &HeapId) -> Result<Vec<u8>>;

    /// Replaces an object. Same-sized writes happen in place; otherwise the
    /// object may move, in which case `id` is updated and `true` returned.
    fn write(&self, id: &mut HeapId, obj: &[u8]) -> Result<bool>;

    /// Frees an object.
    fn remove(&self, id: &HeapId) -> Result<()>;

    /// Runs `f` against the stored bytes while the object is pinned.
    fn op(&self, id: &HeapId, f: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()>;
}

/// Runs a by-value operator through [`HeapStore::op`] and hands back its owned result.
///
/// The `'static` bound keeps borrowed views of the pinned bytes from escaping.
pub fn op_owned<H, T, F>(heap: &H, id: &HeapId, f: F) -> Result<T>
where
    H: HeapStore + ?Sized,
    T: 'static,
    F: FnOnce(&[u8]) -> Result<T>,
{
    let mut f = Some(f);
    let mut out = None;
    heap.op(id, &mut |obj| {
        let f = f
            .take()
            .ok_or(AttrError::Invalid("heap operator invoked twice"))?;
        out = Some(f(obj)?);
        Ok(())
    })?;
    out.ok_or(AttrError::Corruption("heap operator was never invoked"))
}

/// Counters for heap traffic.
#[derive(Default)]
pub struct HeapMetrics {
    objects_inserted: AtomicU64,
    objects_removed: AtomicU64,
    objects_relocated: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

/// Point-in-time copy of [`HeapMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapMetricsSnapshot {
    /// Objects stored via `insert`.
    pub objects_inserted: u64,
    /// Objects freed via `remove`.
    pub objects_removed: u64,
    /// Writes that had to move the object.
    pub objects_relocated: u64,
    /// Bytes accepted by `insert` and `write`.
    pub bytes_written: u64,
    /// Bytes handed out by `read` and `op`.
    pub bytes_read: u64,
}

impl HeapMetricsSnapshot {
    /// Objects currently alive according to the counters.
    pub fn live_objects(&self) -> i64 {
        self.objects_inserted as i64 - self.objects_removed as i64
    }
}

impl HeapMetrics {
    /// Creates a snapshot of the current counters.
    pub fn snapshot(&self) -> HeapMetricsSnapshot {
        HeapMetricsSnapshot {
            objects_inserted: self.objects_inserted.load(Ordering::Relaxed),
            objects_removed: self.objects_removed.load(Ordering::Relaxed),
            objects_relocated: self.objects_relocated.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    /// Emits the counters as a tracing event.
    pub fn emit_tracing(&self) {
        let snap = self.snapshot();
        tracing::debug!(
            target: "dense_attr::heap::metrics",
            objects_inserted = snap.objects_inserted,
            objects_removed = snap.objects_removed,
            objects_relocated = snap.objects_relocated,
            bytes_written = snap.bytes_written,
            bytes_read = snap.bytes_read,
            "heap metrics"
        );
    }
}

struct HeapObject {
    bytes: Vec<u8>,
    crc: u32,
}

impl HeapObject {
    fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            crc: object_crc32(bytes),
        }
    }

    fn verified(&self) -> Result<&[u8]> {
        if object_crc32(&self.bytes) != self.crc {
            return Err(AttrError::Corruption("heap object checksum mismatch"));
        }
        Ok(&self.bytes)
    }
}

#[derive(Default)]
struct HeapState {
    next_object: u64,
    objects: FxHashMap<u64, HeapObject>,
}

impl HeapState {
    fn allocate(&mut self, bytes: &[u8]) -> Result<HeapId> {
        let id = HeapId::managed(self.next_object)?;
        self.next_object += 1;
        self.objects.insert(id.object()?, HeapObject::new(bytes));
        Ok(id)
    }

    fn get(&self, id: &HeapId) -> Result<&HeapObject> {
        self.objects
            .get(&id.object()?)
            .ok_or(AttrError::NotFound("heap object"))
    }
}

/// In-memory heap with per-object CRC32 and pin tracking.
pub struct MemHeap {
    addr: Addr,
    state: Mutex<HeapState>,
    pinned: AtomicBool,
    metrics: Arc<HeapMetrics>,
}

/// Clears the pin flag when an operator returns or unwinds.
struct PinGuard<'a>(&'a AtomicBool);

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MemHeap {
    /// Creates an empty heap at `addr`.
    pub fn new(addr: Addr) -> Self {
        Self {
            addr,
            state: Mutex::new(HeapState::default()),
            pinned: AtomicBool::new(false),
            metrics: Arc::new(HeapMetrics::default()),
        }
    }

    /// Shared handle to this heap's counters.
    pub fn metrics(&self) -> Arc<HeapMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of objects currently stored.
    pub fn live_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Flips a bit in a stored object without updating its checksum.
    pub fn corrupt_object(&self, id: &HeapId, byte: usize) -> Result<()> {
        let mut state = self.state.lock();
        let obj = state
            .objects
            .get_mut(&id.object()?)
            .ok_or(AttrError::NotFound("heap object"))?;
        let slot = obj
            .bytes
            .get_mut(byte)
            .ok_or(AttrError::Invalid("corruption offset past object end"))?;
        *slot ^= 0xff;
        Ok(())
    }

    fn ensure_unpinned(&self) -> Result<()> {
        if self.pinned.load(Ordering::Acquire) {
            return Err(AttrError::Pinned);
        }
        Ok(())
    }
}

impl HeapStore for MemHeap {
    fn addr(&self) -> Addr {
        self.addr
    }

    fn insert(&self, obj: &[u8]) -> Result<HeapId> {
        self.ensure_unpinned()?;
        let id = self.state.lock().allocate(obj)?;
        self.metrics.objects_inserted.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .bytes_written
            .fetch_add(obj.len() as u64, Ordering::Relaxed);
        trace!(heap = %self.addr, id = %id, len = obj.len(), "heap.insert");
        Ok(id)
    }

    fn read(&self, id: &HeapId) -> Result<Vec<u8>> {
        self.ensure_unpinned()?;
        let state = self.state.lock();
        let bytes = state.get(id)?.verified()?.to_vec();
        self.metrics
            .bytes_read
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(bytes)
    }

    fn write(&self, id: &mut HeapId, obj: &[u8]) -> Result<bool> {
        self.ensure_unpinned()?;
        let mut state = self.state.lock();
        let key = id.object()?;
        let current = state
            .objects
            .get_mut(&key)
            .ok_or(AttrError::NotFound("heap object"))?;
        self.metrics
            .bytes_written
            .fetch_add(obj.len() as u64, Ordering::Relaxed);
        if current.bytes.len() == obj.len() {
            *current = HeapObject::new(obj);
            trace!(heap = %self.addr, id = %id, "heap.write.in_place");
            return Ok(false);
        }
        state.objects.remove(&key);
        let moved = state.allocate(obj)?;
        self.metrics
            .objects_relocated
            .fetch_add(1, Ordering::Relaxed);
        trace!(heap = %self.addr, from = %id, to = %moved, "heap.write.relocated");
        *id = moved;
        Ok(true)
    }

    fn remove(&self, id: &HeapId) -> Result<()> {
        self.ensure_unpinned()?;
        self.state
            .lock()
            .objects
            .remove(&id.object()?)
            .ok_or(AttrError::NotFound("heap object"))?;
        self.metrics.objects_removed.fetch_add(1, Ordering::Relaxed);
        trace!(heap = %self.addr, id = %id, "heap.remove");
        Ok(())
    }

    fn op(&self, id: &HeapId, f: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        if self.pinned.swap(true, Ordering::AcqRel) {
            return Err(AttrError::Pinned);
        }
        let _pin = PinGuard(&self.pinned);
        let state = self.state.lock();
        let bytes = state.get(id)?.verified()?;
        self.metrics
            .bytes_read
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        f(bytes)
    }
}
