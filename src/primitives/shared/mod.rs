#![forbid(unsafe_code)]

//! Content-addressed, reference-counted message table.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;
use xxhash_rust::xxh64::xxh64;

use crate::types::{AttrError, HeapId, Result, SharedHandle};

/// Deduplicating store shared by every object in a file.
pub trait SharedMessages: Send + Sync {
    /// Whether this file shares messages at all.
    fn is_enabled(&self) -> bool;

    /// Shares `payload` if the table tracks messages like it. An identical
    /// payload already present gains one reference; a new payload gets
    /// refcount 1. Returns `None` when the payload stays unshared.
    fn try_share(&self, payload: &[u8]) -> Result<Option<SharedHandle>>;

    /// Whether an identical payload is already stored.
    fn is_shared(&self, payload: &[u8]) -> Result<bool>;

    /// Owned copy of a shared payload.
    fn read(&self, handle: SharedHandle) -> Result<Vec<u8>>;

    /// Runs `f` against a shared payload.
    fn op(&self, handle: SharedHandle, f: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()>;

    /// Drops one reference and returns what is left; the payload is freed at zero.
    fn delete(&self, handle: SharedHandle) -> Result<u64>;

    /// Current reference count.
    fn refcount(&self, handle: SharedHandle) -> Result<u64>;

    /// Adds one reference to an existing payload.
    fn incr_refcount(&self, handle: SharedHandle) -> Result<u64>;

    /// Rebuilds a handle from the heap id stored in an index record.
    fn reconstitute(&self, heap_id: HeapId) -> Result<SharedHandle>;
}

/// Runs a by-value operator through [`SharedMessages::op`].
pub fn op_owned<S, T, F>(table: &S, handle: SharedHandle, f: F) -> Result<T>
where
    S: SharedMessages + ?Sized,
    T: 'static,
    F: FnOnce(&[u8]) -> Result<T>,
{
    let mut f = Some(f);
    let mut out = None;
    table.op(handle, &mut |payload| {
        let f = f
            .take()
            .ok_or(AttrError::Invalid("shared operator invoked twice"))?;
        out = Some(f(payload)?);
        Ok(())
    })?;
    out.ok_or(AttrError::Corruption("shared operator was never invoked"))
}

/// Configuration of a [`MemSharedTable`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SharedTableOptions {
    /// Master switch.
    pub enabled: bool,
    /// Payloads shorter than this stay unshared.
    pub min_size: usize,
}

impl SharedTableOptions {
    /// Sharing enabled for payloads of at least `min_size` bytes.
    pub fn enabled(min_size: usize) -> Self {
        Self {
            enabled: true,
            min_size,
        }
    }
}

struct SharedEntry {
    payload: Vec<u8>,
    fingerprint: u64,
    refcount: u64,
}

#[derive(Default)]
struct SharedState {
    next: u64,
    entries: FxHashMap<SharedHandle, SharedEntry>,
    by_fingerprint: FxHashMap<u64, SmallVec<[SharedHandle; 2]>>,
}

impl SharedState {
    fn lookup(&self, fingerprint: u64, payload: &[u8]) -> Option<SharedHandle> {
        self.by_fingerprint.get(&fingerprint).and_then(|bucket| {
            bucket
                .iter()
                .copied()
                .find(|h| self.entries.get(h).is_some_and(|e| e.payload == payload))
        })
    }

    fn entry_mut(&mut self, handle: SharedHandle) -> Result<&mut SharedEntry> {
        self.entries
            .get_mut(&handle)
            .ok_or(AttrError::ShareError("shared message not found"))
    }
}

/// In-memory shared-message table keyed by xxh64 fingerprints.
pub struct MemSharedTable {
    options: SharedTableOptions,
    state: Mutex<SharedState>,
    shares: AtomicU64,
    reuses: AtomicU64,
}

impl MemSharedTable {
    /// Creates an empty table.
    pub fn new(options: SharedTableOptions) -> Self {
        Self {
            options,
            state: Mutex::new(SharedState::default()),
            shares: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
        }
    }

    /// A table that never shares anything.
    pub fn disabled() -> Self {
        Self::new(SharedTableOptions::default())
    }

    /// Number of distinct payloads stored.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true when no payload is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(new entries, reused entries)` handed out by `try_share`.
    pub fn share_counts(&self) -> (u64, u64) {
        (
            self.shares.load(Ordering::Relaxed),
            self.reuses.load(Ordering::Relaxed),
        )
    }

    /// Stores `payload` with refcount 1 regardless of the size threshold,
    /// as a component message (datatype or dataspace) would be.
    pub fn share_component(&self, payload: &[u8]) -> Result<SharedHandle> {
        if !self.options.enabled {
            return Err(AttrError::ShareError("message sharing disabled"));
        }
        Ok(self.share_unchecked(payload))
    }

    fn share_unchecked(&self, payload: &[u8]) -> SharedHandle {
        let fingerprint = xxh64(payload, 0);
        let mut state = self.state.lock();
        if let Some(handle) = state.lookup(fingerprint, payload) {
            if let Some(entry) = state.entries.get_mut(&handle) {
                entry.refcount += 1;
                self.reuses.fetch_add(1, Ordering::Relaxed);
                trace!(handle = %handle, refcount = entry.refcount, "shared.reuse");
                return handle;
            }
        }
        let handle = SharedHandle(HeapId(state.next.to_le_bytes()));
        state.next += 1;
        state.entries.insert(
            handle,
            SharedEntry {
                payload: payload.to_vec(),
                fingerprint,
                refcount: 1,
            },
        );
        state
            .by_fingerprint
            .entry(fingerprint)
            .or_default()
            .push(handle);
        self.shares.fetch_add(1, Ordering::Relaxed);
        trace!(handle = %handle, len = payload.len(), "shared.insert");
        handle
    }
}

impl SharedMessages for MemSharedTable {
    fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    fn try_share(&self, payload: &[u8]) -> Result<Option<SharedHandle>> {
        if !self.options.enabled || payload.len() < self.options.min_size {
            return Ok(None);
        }
        Ok(Some(self.share_unchecked(payload)))
    }

    fn is_shared(&self, payload: &[u8]) -> Result<bool> {
        if !self.options.enabled {
            return Ok(false);
        }
        let state = self.state.lock();
        Ok(state.lookup(xxh64(payload, 0), payload).is_some())
    }

    fn read(&self, handle: SharedHandle) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        Ok(state.entry_mut(handle)?.payload.clone())
    }

    fn op(&self, handle: SharedHandle, f: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        // Copy out so the callback may consult the table again.
        let payload = self.read(handle)?;
        f(&payload)
    }

    fn delete(&self, handle: SharedHandle) -> Result<u64> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(handle)?;
        entry.refcount -= 1;
        let left = entry.refcount;
        if left == 0 {
            let fingerprint = entry.fingerprint;
            state.entries.remove(&handle);
            if let Some(bucket) = state.by_fingerprint.get_mut(&fingerprint) {
                bucket.retain(|h| *h != handle);
                if bucket.is_empty() {
                    state.by_fingerprint.remove(&fingerprint);
                }
            }
        }
        trace!(handle = %handle, refcount = left, "shared.delete");
        Ok(left)
    }

    fn refcount(&self, handle: SharedHandle) -> Result<u64> {
        let mut state = self.state.lock();
        Ok(state.entry_mut(handle)?.refcount)
    }

    fn incr_refcount(&self, handle: SharedHandle) -> Result<u64> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(handle)?;
        entry.refcount += 1;
        Ok(entry.refcount)
    }

    fn reconstitute(&self, heap_id: HeapId) -> Result<SharedHandle> {
        let handle = SharedHandle(heap_id);
        if !self.state.lock().entries.contains_key(&handle) {
            return Err(AttrError::ShareError("record points at a missing shared message"));
        }
        Ok(handle)
    }
}
