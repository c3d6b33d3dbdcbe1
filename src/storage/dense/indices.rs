//! The name index and its optional creation-order mirror, mutated only in pairs.
//!
//! Name records sort by `(hash, name, flags, heap id, creation index)`; the
//! name comes out of the payload, so equal hashes never decide anything on
//! their own. Creation-order records sort by `(creation index, flags, heap id)`.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::warn;

use crate::primitives::btree::IndexStore;
use crate::storage::options::NameHashFn;
use crate::storage::record::{CorderRecord, NameRecord, PayloadLoc, CREATION_INDEX_NONE};
use crate::types::{AttrError, IndexType, IterControl, IterOrder, Result};

use super::boundary::PayloadStore;

/// Search key for the name index.
struct NameKey<'a> {
    hash: u32,
    name: &'a str,
    exact: Option<&'a NameRecord>,
}

impl NameKey<'_> {
    fn order(&self, payloads: &PayloadStore, raw: &[u8]) -> Result<Ordering> {
        let rec = NameRecord::decode(raw)?;
        let ord = self.hash.cmp(&rec.hash);
        if ord != Ordering::Equal {
            return Ok(ord);
        }
        // the exact record's payload may already be gone during a relocation
        if self.exact.map(|e| e.loc) != Some(rec.loc) {
            let stored = payloads.stored_name(rec.loc)?;
            let ord = self.name.as_bytes().cmp(stored.as_bytes());
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        let Some(exact) = self.exact else {
            return Ok(Ordering::Equal);
        };
        let mine = exact.loc.heap_id();
        let theirs = rec.loc.heap_id();
        Ok((exact.loc.flags(), mine.as_bytes())
            .cmp(&(rec.loc.flags(), theirs.as_bytes()))
            .then_with(|| {
                exact
                    .creation_index
                    .unwrap_or(CREATION_INDEX_NONE)
                    .cmp(&rec.creation_index.unwrap_or(CREATION_INDEX_NONE))
            }))
    }
}

fn corder_order(key: &CorderRecord, raw: &[u8]) -> Result<Ordering> {
    let rec = CorderRecord::decode(raw)?;
    let mine = key.loc.heap_id();
    let theirs = rec.loc.heap_id();
    Ok(key
        .creation_index
        .cmp(&rec.creation_index)
        .then_with(|| {
            (key.loc.flags(), mine.as_bytes()).cmp(&(rec.loc.flags(), theirs.as_bytes()))
        }))
}

/// Both attribute indices behind one handle.
pub(crate) struct IndexPair {
    name: Arc<dyn IndexStore>,
    corder: Option<Arc<dyn IndexStore>>,
    hash: NameHashFn,
}

impl IndexPair {
    pub(crate) fn new(
        name: Arc<dyn IndexStore>,
        corder: Option<Arc<dyn IndexStore>>,
        hash: NameHashFn,
    ) -> Self {
        Self { name, corder, hash }
    }

    pub(crate) fn hash_of(&self, name: &str) -> u32 {
        (self.hash)(name.as_bytes())
    }

    pub(crate) fn has_corder(&self) -> bool {
        self.corder.is_some()
    }

    /// Index serving `idx_type`, if one exists.
    pub(crate) fn index_for(&self, idx_type: IndexType) -> Option<&Arc<dyn IndexStore>> {
        match idx_type {
            IndexType::Name => Some(&self.name),
            IndexType::CreationOrder => self.corder.as_ref(),
        }
    }

    pub(crate) fn len(&self) -> Result<u64> {
        self.name.len()
    }

    /// First record stored under `name`.
    pub(crate) fn find(&self, payloads: &PayloadStore, name: &str) -> Result<Option<NameRecord>> {
        let key = NameKey {
            hash: self.hash_of(name),
            name,
            exact: None,
        };
        let mut found = None;
        self.name.find(&mut |raw| key.order(payloads, raw), &mut |raw| {
            found = Some(NameRecord::decode(raw)?);
            Ok(())
        })?;
        Ok(found)
    }

    /// Walks the name index in stored order.
    pub(crate) fn scan_names(
        &self,
        visit: &mut dyn FnMut(Result<NameRecord>) -> Result<IterControl>,
    ) -> Result<IterControl> {
        self.name.iterate(&mut |raw| visit(NameRecord::decode(raw)))
    }

    /// Publishes `rec` in the name index and its mirror in the creation-order
    /// index. A failed mirror insert withdraws the name record again.
    pub(crate) fn insert(&self, payloads: &PayloadStore, rec: &NameRecord, name: &str) -> Result<()> {
        let key = NameKey {
            hash: rec.hash,
            name,
            exact: Some(rec),
        };
        self.name
            .insert(&rec.encode(), &mut |raw| key.order(payloads, raw))
            .map_err(|_| AttrError::CantInsert("unable to add to name index"))?;
        let Some(corder) = &self.corder else {
            return Ok(());
        };
        let mirrored = rec.mirror().and_then(|mirror| {
            corder
                .insert(&mirror.encode(), &mut |raw| corder_order(&mirror, raw))
                .map_err(|_| AttrError::CantInsert("unable to add to creation order index"))
        });
        if let Err(err) = mirrored {
            let withdrawn = self
                .name
                .remove(&mut |raw| key.order(payloads, raw), &mut |_| Ok(()));
            if !matches!(withdrawn, Ok(true)) {
                warn!(attr = name, error = %err, "dense.index.withdraw_failed");
            }
            return Err(err);
        }
        Ok(())
    }

    fn remove_mirror(&self, rec: &NameRecord) -> Result<()> {
        let Some(corder) = &self.corder else {
            return Ok(());
        };
        let mirror = rec.mirror()?;
        let removed = corder
            .remove(&mut |raw| corder_order(&mirror, raw), &mut |_| Ok(()))
            .map_err(|_| AttrError::CantRemove("unable to remove from creation order index"))?;
        if !removed {
            return Err(AttrError::CantRemove("creation order record missing"));
        }
        Ok(())
    }

    /// Withdraws the first record stored under `name` together with its
    /// mirror. Returns the withdrawn record.
    pub(crate) fn remove_by_name(
        &self,
        payloads: &PayloadStore,
        name: &str,
    ) -> Result<Option<NameRecord>> {
        let key = NameKey {
            hash: self.hash_of(name),
            name,
            exact: None,
        };
        self.remove_with(payloads, &key)
    }

    /// Withdraws exactly `rec`, stored under `name`, with its mirror.
    pub(crate) fn remove_exact(
        &self,
        payloads: &PayloadStore,
        rec: &NameRecord,
        name: &str,
    ) -> Result<()> {
        let key = NameKey {
            hash: rec.hash,
            name,
            exact: Some(rec),
        };
        match self.remove_with(payloads, &key)? {
            Some(_) => Ok(()),
            None => Err(AttrError::CantRemove("name index record missing")),
        }
    }

    fn remove_with(&self, payloads: &PayloadStore, key: &NameKey<'_>) -> Result<Option<NameRecord>> {
        let mut withdrawn = None;
        self.name
            .remove(&mut |raw| key.order(payloads, raw), &mut |raw| {
                let rec = NameRecord::decode(raw)?;
                self.remove_mirror(&rec)?;
                withdrawn = Some(rec);
                Ok(())
            })?;
        Ok(withdrawn)
    }

    /// Record at rank `n` of `idx_type`'s index.
    pub(crate) fn record_by_rank(
        &self,
        payloads: &PayloadStore,
        idx_type: IndexType,
        order: IterOrder,
        n: u64,
    ) -> Result<NameRecord> {
        let index = self
            .index_for(idx_type)
            .ok_or(AttrError::NotFound("creation order index"))?;
        let mut found = None;
        index.find_by_rank(order, n, &mut |raw| {
            found = Some(raw.to_vec());
            Ok(())
        })?;
        let raw = found.ok_or(AttrError::NotFound("attribute at rank"))?;
        self.name_record(payloads, idx_type, &raw)
    }

    /// Name record matching a raw record of `idx_type`'s index.
    pub(crate) fn name_record(
        &self,
        payloads: &PayloadStore,
        idx_type: IndexType,
        raw: &[u8],
    ) -> Result<NameRecord> {
        match idx_type {
            IndexType::Name => NameRecord::decode(raw),
            IndexType::CreationOrder => {
                let rec = CorderRecord::decode(raw)?;
                let name = payloads.stored_name(rec.loc)?;
                Ok(NameRecord {
                    hash: self.hash_of(&name),
                    creation_index: Some(rec.creation_index),
                    loc: rec.loc,
                })
            }
        }
    }

    /// Withdraws the record at rank `n` of `idx_type`'s index and its
    /// counterpart in the other index.
    pub(crate) fn remove_by_rank(
        &self,
        payloads: &PayloadStore,
        idx_type: IndexType,
        order: IterOrder,
        n: u64,
    ) -> Result<NameRecord> {
        let index = self
            .index_for(idx_type)
            .ok_or(AttrError::NotFound("creation order index"))?;
        let mut withdrawn = None;
        index.remove_by_rank(order, n, &mut |raw| {
            let rec = self.name_record(payloads, idx_type, raw)?;
            match idx_type {
                IndexType::Name => self.remove_mirror(&rec)?,
                IndexType::CreationOrder => {
                    let name = payloads.stored_name(rec.loc)?;
                    let key = NameKey {
                        hash: rec.hash,
                        name: &name,
                        exact: Some(&rec),
                    };
                    let removed = self
                        .name
                        .remove(&mut |other| key.order(payloads, other), &mut |_| Ok(()))?;
                    if !removed {
                        return Err(AttrError::CantRemove("name index record missing"));
                    }
                }
            }
            withdrawn = Some(rec);
            Ok(())
        })?;
        withdrawn.ok_or(AttrError::CantRemove("rank removal produced no record"))
    }

    /// Re-keys `old` (stored under `name`) to `new_loc` in both indices.
    pub(crate) fn relocate(
        &self,
        payloads: &PayloadStore,
        old: &NameRecord,
        old_name: &str,
        new_loc: PayloadLoc,
    ) -> Result<NameRecord> {
        let moved = NameRecord {
            loc: new_loc,
            ..*old
        };
        self.remove_exact(payloads, old, old_name)?;
        self.insert(payloads, &moved, old_name)?;
        Ok(moved)
    }
}
