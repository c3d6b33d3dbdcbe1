#![forbid(unsafe_code)]

//! Fixed-size records stored in the name and creation-order indices.
//!
//! ```text
//! name index:  hash:u32 | creation_index:u32 | flags:u8 | heap_id:[u8; 8]
//! corder index:           creation_index:u32 | flags:u8 | heap_id:[u8; 8]
//! ```

use crate::primitives::bytes::{buf::Cursor, le};
use crate::types::{AttrError, HeapId, Result, SharedHandle, HEAP_ID_LEN};

/// Record flag: `heap_id` addresses the shared-message table.
pub const FLAG_SHARED: u8 = 0x01;

/// On-disk stand-in for "creation order not tracked".
pub const CREATION_INDEX_NONE: u32 = u32::MAX;

/// Size of a name-index record.
pub const NAME_RECORD_LEN: usize = 4 + 4 + 1 + HEAP_ID_LEN;

/// Size of a creation-order-index record.
pub const CORDER_RECORD_LEN: usize = 4 + 1 + HEAP_ID_LEN;

/// Where an attribute's encoded bytes live.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PayloadLoc {
    /// Object in the dense heap.
    Heap(HeapId),
    /// Entry in the shared-message table.
    Shared(SharedHandle),
}

impl PayloadLoc {
    fn from_parts(flags: u8, heap_id: HeapId) -> Result<Self> {
        if flags & !FLAG_SHARED != 0 {
            return Err(AttrError::Corruption("unknown index record flags"));
        }
        Ok(if flags & FLAG_SHARED != 0 {
            PayloadLoc::Shared(SharedHandle(heap_id))
        } else {
            PayloadLoc::Heap(heap_id)
        })
    }

    /// Record flags implied by the location.
    pub fn flags(&self) -> u8 {
        match self {
            PayloadLoc::Heap(_) => 0,
            PayloadLoc::Shared(_) => FLAG_SHARED,
        }
    }

    /// Raw id as written into a record.
    pub fn heap_id(&self) -> HeapId {
        match self {
            PayloadLoc::Heap(id) => *id,
            PayloadLoc::Shared(h) => h.0,
        }
    }

    /// Whether the payload sits in the shared-message table.
    pub fn is_shared(&self) -> bool {
        matches!(self, PayloadLoc::Shared(_))
    }
}

fn encode_corder(index: Option<u32>) -> u32 {
    index.unwrap_or(CREATION_INDEX_NONE)
}

fn decode_corder(raw: u32) -> Option<u32> {
    (raw != CREATION_INDEX_NONE).then_some(raw)
}

/// Entry of the name index.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct NameRecord {
    /// Hash of the attribute name.
    pub hash: u32,
    /// Creation index, if tracked.
    pub creation_index: Option<u32>,
    /// Payload location; its kind fixes the shared flag.
    pub loc: PayloadLoc,
}

impl NameRecord {
    /// Serialises the record.
    pub fn encode(&self) -> [u8; NAME_RECORD_LEN] {
        let mut out = [0u8; NAME_RECORD_LEN];
        le::write_u32(&mut out[0..4], self.hash);
        le::write_u32(&mut out[4..8], encode_corder(self.creation_index));
        out[8] = self.loc.flags();
        out[9..].copy_from_slice(self.loc.heap_id().as_bytes());
        out
    }

    /// Parses a record.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != NAME_RECORD_LEN {
            return Err(AttrError::Corruption("name index record has wrong size"));
        }
        let mut cur = Cursor::new(src, "name index record truncated");
        let hash = cur.u32_le()?;
        let creation_index = decode_corder(cur.u32_le()?);
        let flags = cur.u8()?;
        let heap_id = HeapId::from_slice(cur.take(HEAP_ID_LEN)?)?;
        Ok(Self {
            hash,
            creation_index,
            loc: PayloadLoc::from_parts(flags, heap_id)?,
        })
    }

    /// Mirror record for the creation-order index.
    pub fn mirror(&self) -> Result<CorderRecord> {
        let creation_index = self
            .creation_index
            .ok_or(AttrError::Invalid("creation order index needs a creation index"))?;
        Ok(CorderRecord {
            creation_index,
            loc: self.loc,
        })
    }
}

/// Entry of the creation-order index.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct CorderRecord {
    /// Creation index.
    pub creation_index: u32,
    /// Payload location, identical to the paired name record's.
    pub loc: PayloadLoc,
}

impl CorderRecord {
    /// Serialises the record.
    pub fn encode(&self) -> [u8; CORDER_RECORD_LEN] {
        let mut out = [0u8; CORDER_RECORD_LEN];
        le::write_u32(&mut out[0..4], self.creation_index);
        out[4] = self.loc.flags();
        out[5..].copy_from_slice(self.loc.heap_id().as_bytes());
        out
    }

    /// Parses a record.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != CORDER_RECORD_LEN {
            return Err(AttrError::Corruption(
                "creation order record has wrong size",
            ));
        }
        let mut cur = Cursor::new(src, "creation order record truncated");
        let creation_index = cur.u32_le()?;
        let flags = cur.u8()?;
        let heap_id = HeapId::from_slice(cur.take(HEAP_ID_LEN)?)?;
        Ok(Self {
            creation_index,
            loc: PayloadLoc::from_parts(flags, heap_id)?,
        })
    }
}
