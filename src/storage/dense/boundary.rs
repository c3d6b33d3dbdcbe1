//! Where an attribute payload lives and who holds references to it.
//!
//! Every unshared heap payload and every shared-table entry owns one
//! reference on each shared datatype/dataspace component it names.

use std::sync::Arc;

use tracing::trace;

use crate::primitives::heap::{self, HeapStore};
use crate::primitives::shared::{self, SharedMessages};
use crate::storage::attr::Attribute;
use crate::storage::codec::{self, RawAttribute};
use crate::storage::record::PayloadLoc;
use crate::types::{AttrError, Result, SharedHandle};

/// Outcome of placing a payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Stored {
    /// Where the bytes went.
    pub loc: PayloadLoc,
    /// `try_share` folded the payload into an entry that already owned
    /// references on the components.
    pub deduplicated: bool,
}

/// Plain heap plus the file's shared-message table.
pub(crate) struct PayloadStore {
    heap: Arc<dyn HeapStore>,
    shared: Arc<dyn SharedMessages>,
}

impl PayloadStore {
    pub(crate) fn new(heap: Arc<dyn HeapStore>, shared: Arc<dyn SharedMessages>) -> Self {
        Self { heap, shared }
    }

    pub(crate) fn heap(&self) -> &dyn HeapStore {
        &*self.heap
    }

    pub(crate) fn shared(&self) -> &dyn SharedMessages {
        &*self.shared
    }

    /// Decodes the payload at `loc` inside the pinned callback and hands back
    /// an owned copy.
    pub(crate) fn read_raw(&self, loc: PayloadLoc) -> Result<RawAttribute> {
        match loc {
            PayloadLoc::Heap(id) => heap::op_owned(self.heap(), &id, codec::decode_raw),
            PayloadLoc::Shared(h) => {
                let h = self.shared.reconstitute(h.0)?;
                shared::op_owned(self.shared(), h, codec::decode_raw)
            }
        }
    }

    /// Name of the attribute stored at `loc`.
    pub(crate) fn stored_name(&self, loc: PayloadLoc) -> Result<String> {
        Ok(self.read_raw(loc)?.name)
    }

    /// Full attribute at `loc`, components resolved after the pin is gone.
    pub(crate) fn load(&self, loc: PayloadLoc, creation_index: Option<u32>) -> Result<Attribute> {
        let raw = self.read_raw(loc)?;
        let mut attr = raw.resolve(Some(self.shared()))?;
        attr.set_creation_index(creation_index);
        if let PayloadLoc::Shared(h) = loc {
            attr.set_shared_handle(Some(h));
        }
        Ok(attr)
    }

    /// Places `attr`'s payload in the shared table when it takes it, in the
    /// heap otherwise. Already-shared attributes just gain a reference.
    pub(crate) fn store(&self, attr: &mut Attribute) -> Result<Stored> {
        if let Some(h) = attr.shared_handle() {
            let refs = self.shared.incr_refcount(h)?;
            trace!(handle = %h, refcount = refs, "dense.payload.relink");
            return Ok(Stored {
                loc: PayloadLoc::Shared(h),
                deduplicated: false,
            });
        }
        let bytes = codec::encode(attr, attr.version())?;
        if self.shared.is_enabled() {
            let existing = self.shared.is_shared(&bytes)?;
            if let Some(h) = self.shared.try_share(&bytes)? {
                attr.set_shared_handle(Some(h));
                trace!(handle = %h, existing, "dense.payload.shared");
                return Ok(Stored {
                    loc: PayloadLoc::Shared(h),
                    deduplicated: existing,
                });
            }
        }
        let id = self
            .heap
            .insert(&bytes)
            .map_err(|_| AttrError::CantInsert("unable to store attribute in heap"))?;
        trace!(heap = %self.heap.addr(), id = %id, len = bytes.len(), "dense.payload.heap");
        Ok(Stored {
            loc: PayloadLoc::Heap(id),
            deduplicated: false,
        })
    }

    /// Reverses a [`store`](Self::store) whose publication failed.
    ///
    /// Component references are left alone since none were moved yet.
    pub(crate) fn unstore(&self, loc: PayloadLoc) -> Result<()> {
        match loc {
            PayloadLoc::Heap(id) => self.heap.remove(&id),
            PayloadLoc::Shared(h) => self.shared.delete(h).map(|_| ()),
        }
    }

    /// Adds one reference to each shared component of `attr`.
    pub(crate) fn link_components(&self, attr: &Attribute) -> Result<()> {
        for h in attr.shared_components() {
            self.shared.incr_refcount(h)?;
        }
        Ok(())
    }

    /// Drops one reference from each of `handles`.
    pub(crate) fn unlink_components(
        &self,
        handles: impl IntoIterator<Item = SharedHandle>,
    ) -> Result<()> {
        for h in handles {
            self.shared
                .delete(h)
                .map_err(|_| AttrError::ShareError("unable to release shared component"))?;
        }
        Ok(())
    }

    /// Releases the payload a withdrawn index record pointed at.
    ///
    /// Heap payloads free their blob and component references; shared
    /// payloads lose one reference and free their components only when the
    /// entry itself goes away.
    pub(crate) fn release(&self, loc: PayloadLoc) -> Result<()> {
        let raw = self.read_raw(loc)?;
        match loc {
            PayloadLoc::Heap(id) => {
                self.unlink_components(raw.shared_components())?;
                self.heap
                    .remove(&id)
                    .map_err(|_| AttrError::CantRemove("unable to free attribute in heap"))?;
            }
            PayloadLoc::Shared(h) => {
                let left = self
                    .shared
                    .delete(h)
                    .map_err(|_| AttrError::ShareError("unable to release shared attribute"))?;
                if left == 0 {
                    self.unlink_components(raw.shared_components())?;
                }
            }
        }
        trace!(loc = ?loc, "dense.payload.release");
        Ok(())
    }

    /// Swaps a shared payload for one encoding `bytes`.
    ///
    /// The table must keep sharing the new content; component ownership
    /// follows whichever entries survive.
    pub(crate) fn reshare(&self, old: SharedHandle, bytes: &[u8]) -> Result<SharedHandle> {
        let new = self
            .shared
            .try_share(bytes)?
            .ok_or(AttrError::ShareError("attribute changed sharing status"))?;
        if new == old {
            self.shared.delete(old)?;
            return Ok(new);
        }
        let components = codec::decode_raw(bytes)?.shared_components();
        let left = self.shared.delete(old)?;
        let fresh = self.shared.refcount(new)? == 1;
        match (left == 0, fresh) {
            (true, false) => self.unlink_components(components)?,
            (false, true) => {
                for h in components {
                    self.shared.incr_refcount(h)?;
                }
            }
            _ => {}
        }
        trace!(from = %old, to = %new, "dense.payload.reshare");
        Ok(new)
    }
}
