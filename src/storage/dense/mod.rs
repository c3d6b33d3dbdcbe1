#![forbid(unsafe_code)]

//! Dense attribute storage: a heap of encoded attributes indexed by name
//! hash and, optionally, by creation order.
//!
//! Collaborator handles are opened per operation and dropped on every exit
//! path; the persistent state is the [`DenseInfo`] the caller keeps in the
//! object header.

mod boundary;
mod indices;
mod native;

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::primitives::btree::RecordSink;
use crate::primitives::space::FileSpace;
use crate::types::{Addr, AttrError, IndexType, IterControl, IterOrder, Result};

use self::boundary::PayloadStore;
use self::indices::IndexPair;
use self::native::NativeOrder;
use super::attr::Attribute;
use super::codec;
use super::metrics::{default_metrics, AttrMetrics};
use super::options::DenseOptions;
use super::record::{NameRecord, PayloadLoc, CORDER_RECORD_LEN, CREATION_INDEX_NONE, NAME_RECORD_LEN};
use super::table::{AttrTable, AttrVisitor, IterOutcome, OrderedAttrs};

/// Persistent description of one object's dense attribute storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DenseInfo {
    /// Heap holding unshared attribute payloads.
    pub heap_addr: Addr,
    /// Name index.
    pub name_index_addr: Addr,
    /// Creation-order index, when the object indexes creation order.
    pub corder_index_addr: Option<Addr>,
    /// Whether inserted attributes receive creation indices.
    pub track_creation_order: bool,
    /// Next creation index to hand out.
    pub max_corder: u32,
}

/// Handles opened for the duration of one operation.
struct Session {
    payloads: PayloadStore,
    indices: IndexPair,
}

/// Frees freshly created structures unless the creation completes.
struct PendingAllocs<'a> {
    space: &'a dyn FileSpace,
    heap: Option<Addr>,
    indices: Vec<Addr>,
}

impl PendingAllocs<'_> {
    fn commit(mut self) {
        self.heap = None;
        self.indices.clear();
    }
}

impl Drop for PendingAllocs<'_> {
    fn drop(&mut self) {
        for addr in self.indices.drain(..) {
            if let Err(err) = self.space.delete_index(addr, None) {
                warn!(addr = %addr, error = %err, "dense.create.cleanup_failed");
            }
        }
        if let Some(addr) = self.heap.take() {
            if let Err(err) = self.space.delete_heap(addr) {
                warn!(addr = %addr, error = %err, "dense.create.cleanup_failed");
            }
        }
    }
}

/// Dense attribute storage of one object.
pub struct DenseStorage {
    space: Arc<dyn FileSpace>,
    info: DenseInfo,
    options: DenseOptions,
    metrics: Arc<dyn AttrMetrics>,
}

impl std::fmt::Debug for DenseStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseStorage")
            .field("info", &self.info)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DenseStorage {
    /// Allocates the heap, the name index and, when requested, the
    /// creation-order index.
    ///
    /// Anything allocated before a failure is freed again.
    pub fn create(space: Arc<dyn FileSpace>, options: DenseOptions) -> Result<Self> {
        options.validate()?;
        let mut pending = PendingAllocs {
            space: &*space,
            heap: None,
            indices: Vec::new(),
        };
        let heap_addr = space
            .create_heap()
            .map_err(|_| AttrError::CantAllocate("unable to create attribute heap"))?;
        pending.heap = Some(heap_addr);
        let name_index_addr = space
            .create_index(NAME_RECORD_LEN, options.name_index)
            .map_err(|_| AttrError::CantAllocate("unable to create name index"))?;
        pending.indices.push(name_index_addr);
        let corder_index_addr = if options.index_creation_order {
            let addr = space
                .create_index(CORDER_RECORD_LEN, options.corder_index)
                .map_err(|_| AttrError::CantAllocate("unable to create creation order index"))?;
            pending.indices.push(addr);
            Some(addr)
        } else {
            None
        };
        pending.commit();

        let info = DenseInfo {
            heap_addr,
            name_index_addr,
            corder_index_addr,
            track_creation_order: options.track_creation_order,
            max_corder: 0,
        };
        debug!(
            heap = %heap_addr,
            name_index = %name_index_addr,
            corder_index = ?corder_index_addr,
            "dense.create"
        );
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        Ok(Self {
            space,
            info,
            options,
            metrics,
        })
    }

    /// Attaches to storage created earlier.
    pub fn open(space: Arc<dyn FileSpace>, info: DenseInfo, options: DenseOptions) -> Result<Self> {
        options.validate()?;
        if info.corder_index_addr.is_some() && !info.track_creation_order {
            return Err(AttrError::Corruption(
                "creation order indexed but not tracked",
            ));
        }
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        let storage = Self {
            space,
            info,
            options,
            metrics,
        };
        storage.session()?;
        trace!(heap = %info.heap_addr, "dense.open");
        Ok(storage)
    }

    /// Addresses and counters to persist.
    pub fn info(&self) -> DenseInfo {
        self.info
    }

    /// Options in effect.
    pub fn options(&self) -> &DenseOptions {
        &self.options
    }

    fn session(&self) -> Result<Session> {
        let heap = self.space.open_heap(self.info.heap_addr)?;
        let name = self.space.open_index(self.info.name_index_addr)?;
        let corder = self
            .info
            .corder_index_addr
            .map(|addr| self.space.open_index(addr))
            .transpose()?;
        Ok(Session {
            payloads: PayloadStore::new(heap, self.space.shared()),
            indices: IndexPair::new(name, corder, self.options.name_hash),
        })
    }

    /// Number of attributes stored.
    pub fn count(&self) -> Result<u64> {
        self.session()?.indices.len()
    }

    /// Whether an attribute called `name` is stored.
    pub fn exists(&self, name: &str) -> Result<bool> {
        let session = self.session()?;
        Ok(session.indices.find(&session.payloads, name)?.is_some())
    }

    /// Reads the attribute called `name`.
    pub fn open_lookup(&self, name: &str) -> Result<Attribute> {
        let session = self.session()?;
        let rec = session
            .indices
            .find(&session.payloads, name)?
            .ok_or(AttrError::NotFound("attribute"))?;
        session.payloads.load(rec.loc, rec.creation_index)
    }

    fn rollback(&self, payloads: &PayloadStore, loc: PayloadLoc, op: &'static str, err: &AttrError) {
        self.metrics.rollback(op);
        match payloads.unstore(loc) {
            Ok(()) => warn!(op, loc = ?loc, error = %err, "dense.rollback"),
            Err(undo) => warn!(
                op,
                loc = ?loc,
                error = %err,
                undo_error = %undo,
                "dense.rollback.orphaned"
            ),
        }
    }

    /// Stores `attr` and publishes it in the indices.
    ///
    /// No uniqueness check happens here; callers test [`exists`](Self::exists)
    /// first. On success `attr` carries its creation index and, when the
    /// payload went to the shared table, its shared handle.
    ///
    /// When creation order is tracked, a carried index below `max_corder` is
    /// replaced by a fresh one so indices stay unique within the object.
    /// On failure the carried index is restored.
    pub fn insert(&mut self, attr: &mut Attribute) -> Result<()> {
        let session = self.session()?;
        codec::set_version(attr, self.options.versions)?;

        let carried = attr.creation_index();
        let assigned = self.info.track_creation_order
            && carried.map_or(true, |c| c < self.info.max_corder);
        if assigned {
            if self.info.max_corder == CREATION_INDEX_NONE {
                return Err(AttrError::CantInsert("creation order exhausted"));
            }
            attr.set_creation_index(Some(self.info.max_corder));
        }
        let corder = attr.creation_index();
        if corder == Some(CREATION_INDEX_NONE) {
            return Err(AttrError::Invalid("creation index is reserved"));
        }
        if corder.is_none() && session.indices.has_corder() {
            return Err(AttrError::Invalid("creation order index needs a creation index"));
        }

        let previous = attr.shared_handle();
        let stored = match session.payloads.store(attr) {
            Ok(stored) => stored,
            Err(err) => {
                attr.set_creation_index(carried);
                return Err(err);
            }
        };
        let rec = NameRecord {
            hash: session.indices.hash_of(attr.name()),
            creation_index: corder,
            loc: stored.loc,
        };
        if let Err(err) = session.indices.insert(&session.payloads, &rec, attr.name()) {
            self.rollback(&session.payloads, stored.loc, "insert", &err);
            attr.set_shared_handle(previous);
            attr.set_creation_index(carried);
            return Err(err);
        }
        if stored.deduplicated {
            session
                .payloads
                .unlink_components(attr.shared_components())?;
        }
        if let Some(c) = corder {
            self.info.max_corder = self.info.max_corder.max(c.saturating_add(1));
        }
        self.metrics.attr_inserted(stored.loc.is_shared());
        debug!(attr = attr.name(), loc = ?stored.loc, corder = ?corder, "dense.insert");
        Ok(())
    }

    /// Rewrites the stored value of `attr`, located by its name.
    ///
    /// Shared payloads are re-shared; heap payloads are rewritten and, if the
    /// heap moves them, both index records follow.
    pub fn write(&self, attr: &mut Attribute) -> Result<()> {
        let session = self.session()?;
        let payloads = &session.payloads;
        let rec = session
            .indices
            .find(payloads, attr.name())?
            .ok_or(AttrError::NotFound("attribute"))?;
        codec::set_version(attr, self.options.versions)?;
        let bytes = codec::encode(attr, attr.version())?;

        let moved = match rec.loc {
            PayloadLoc::Shared(old) => {
                let new = payloads.reshare(old, &bytes)?;
                attr.set_shared_handle(Some(new));
                (new != old).then_some(PayloadLoc::Shared(new))
            }
            PayloadLoc::Heap(old) => {
                let mut id = old;
                let relocated = payloads
                    .heap()
                    .write(&mut id, &bytes)
                    .map_err(|_| AttrError::CantModify("unable to update attribute in heap"))?;
                attr.set_shared_handle(None);
                relocated.then_some(PayloadLoc::Heap(id))
            }
        };
        if let Some(loc) = moved {
            session.indices.relocate(payloads, &rec, attr.name(), loc)?;
        }
        attr.set_creation_index(rec.creation_index);
        self.metrics.attr_written(moved.is_some());
        debug!(attr = attr.name(), moved = ?moved, "dense.write");
        Ok(())
    }

    /// Renames `old_name` to `new_name`, keeping value and creation index.
    ///
    /// The renamed attribute is stored afresh, so it may gain or lose sharing.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let session = self.session()?;
        let payloads = &session.payloads;
        let old = session
            .indices
            .find(payloads, old_name)?
            .ok_or(AttrError::NotFound("attribute"))?;
        let mut attr = payloads.load(old.loc, old.creation_index)?;
        attr.set_shared_handle(None);
        attr.set_name(new_name)?;
        codec::set_version(&mut attr, self.options.versions)?;

        let stored = payloads.store(&mut attr)?;
        let rec = NameRecord {
            hash: session.indices.hash_of(new_name),
            creation_index: old.creation_index,
            loc: stored.loc,
        };
        if let Err(err) = session.indices.insert(payloads, &rec, new_name) {
            self.rollback(payloads, stored.loc, "rename", &err);
            return Err(err);
        }
        // the old record still owns its component references
        if !stored.deduplicated {
            payloads.link_components(&attr)?;
        }
        session.indices.remove_exact(payloads, &old, old_name)?;
        payloads.release(old.loc)?;
        self.metrics.attr_renamed();
        debug!(from = old_name, to = new_name, loc = ?stored.loc, "dense.rename");
        Ok(())
    }

    fn remove_in(&self, session: &Session, name: &str) -> Result<()> {
        let rec = session
            .indices
            .remove_by_name(&session.payloads, name)?
            .ok_or(AttrError::NotFound("attribute"))?;
        self.release_withdrawn(session, rec, name)
    }

    fn release_withdrawn(&self, session: &Session, rec: NameRecord, name: &str) -> Result<()> {
        if let Err(err) = session.payloads.release(rec.loc) {
            warn!(attr = name, loc = ?rec.loc, error = %err, "dense.remove.orphaned");
            return Err(err);
        }
        self.metrics.attr_removed();
        debug!(attr = name, loc = ?rec.loc, "dense.remove");
        Ok(())
    }

    /// Removes the attribute called `name`.
    pub fn remove(&self, name: &str) -> Result<()> {
        let session = self.session()?;
        self.remove_in(&session, name)
    }

    fn is_native(&self, session: &Session, idx_type: IndexType, order: IterOrder) -> bool {
        match (idx_type, order) {
            (IndexType::Name, IterOrder::Native) => true,
            (IndexType::CreationOrder, IterOrder::Native | IterOrder::Increasing) => {
                session.indices.has_corder()
            }
            _ => false,
        }
    }

    fn table_in(&self, session: &Session, idx_type: IndexType, order: IterOrder) -> Result<AttrTable> {
        let mut entries = Vec::new();
        session.indices.scan_names(&mut |rec| {
            entries.push(rec.and_then(|rec| session.payloads.load(rec.loc, rec.creation_index)));
            Ok(IterControl::Continue)
        })?;
        let table = AttrTable::sorted(entries, idx_type, order);
        self.metrics.table_built(table.len());
        trace!(entries = table.len(), idx_type = ?idx_type, order = ?order, "dense.build_table");
        Ok(table)
    }

    fn ordered<'s>(
        &self,
        session: &'s Session,
        idx_type: IndexType,
        order: IterOrder,
    ) -> Result<Box<dyn OrderedAttrs + 's>> {
        if self.is_native(session, idx_type, order) {
            Ok(Box::new(NativeOrder {
                indices: &session.indices,
                payloads: &session.payloads,
                idx_type,
            }))
        } else {
            Ok(Box::new(self.table_in(session, idx_type, order)?))
        }
    }

    /// Materializes every attribute sorted for `idx_type`/`order`.
    pub fn build_table(&self, idx_type: IndexType, order: IterOrder) -> Result<AttrTable> {
        let session = self.session()?;
        self.table_in(&session, idx_type, order)
    }

    /// Removes the `n`-th attribute in the given order.
    pub fn remove_by_index(&self, idx_type: IndexType, order: IterOrder, n: u64) -> Result<()> {
        let session = self.session()?;
        if self.is_native(&session, idx_type, order) {
            let rec = session.indices.remove_by_rank(
                &session.payloads,
                idx_type,
                IterOrder::Increasing,
                n,
            )?;
            let name = match session.payloads.stored_name(rec.loc) {
                Ok(name) => name,
                Err(err) => {
                    warn!(loc = ?rec.loc, error = %err, "dense.remove_by_index.unnamed");
                    String::new()
                }
            };
            return self.release_withdrawn(&session, rec, &name);
        }
        let table = self.table_in(&session, idx_type, order)?;
        let name = table.get(n)?.name().to_owned();
        self.remove_in(&session, &name)
    }

    /// Reads the `n`-th attribute in the given order.
    pub fn open_by_index(&self, idx_type: IndexType, order: IterOrder, n: u64) -> Result<Attribute> {
        let session = self.session()?;
        let attr = self.ordered(&session, idx_type, order)?.nth(n);
        attr
    }

    /// Calls `op` for each attribute in the given order, after passing over
    /// the first `skip`.
    pub fn iterate(
        &self,
        idx_type: IndexType,
        order: IterOrder,
        skip: u64,
        op: &mut AttrVisitor<'_>,
    ) -> Result<IterOutcome> {
        let session = self.session()?;
        let outcome = self.ordered(&session, idx_type, order)?.visit(skip, op)?;
        trace!(visited = outcome.visited, control = ?outcome.control, "dense.iterate");
        Ok(outcome)
    }

    /// Frees every payload, both indices and the heap.
    pub fn delete(self) -> Result<()> {
        let session = self.session()?;
        let payloads = &session.payloads;
        let mut released = 0u64;
        let mut release = |raw: &[u8]| -> Result<()> {
            let rec = NameRecord::decode(raw)?;
            payloads.release(rec.loc)?;
            released += 1;
            Ok(())
        };
        self.space
            .delete_index(self.info.name_index_addr, Some(&mut release as &mut RecordSink<'_>))?;
        if let Some(addr) = self.info.corder_index_addr {
            self.space.delete_index(addr, None)?;
        }
        self.space.delete_heap(self.info.heap_addr)?;
        debug!(heap = %self.info.heap_addr, released, "dense.delete");
        Ok(())
    }
}
