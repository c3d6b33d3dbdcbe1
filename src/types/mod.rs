#![forbid(unsafe_code)]

//! Identifiers, enums, and the error taxonomy shared by every layer.

use std::fmt;

pub mod checksum;

pub use checksum::{lookup3, Checksum, Crc32Fast};

/// Width in bytes of a fractal-heap object identifier.
pub const HEAP_ID_LEN: usize = 8;

/// File address of a heap or index inside a [`FileSpace`](crate::primitives::space::FileSpace).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Addr(pub u64);

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque fixed-width locator of an object stored in a heap.
///
/// Byte 0 carries the id type; the remaining bytes hold a little-endian
/// object number for managed objects.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct HeapId(pub [u8; HEAP_ID_LEN]);

const HEAP_ID_MANAGED: u8 = 0x00;
const HEAP_ID_MAX_OBJECT: u64 = (1 << 56) - 1;

impl HeapId {
    /// Builds a managed-object id from an object number.
    pub fn managed(object: u64) -> Result<Self> {
        if object > HEAP_ID_MAX_OBJECT {
            return Err(AttrError::CantAllocate("heap object number exhausted"));
        }
        let mut raw = [0u8; HEAP_ID_LEN];
        raw[0] = HEAP_ID_MANAGED;
        raw[1..].copy_from_slice(&object.to_le_bytes()[..HEAP_ID_LEN - 1]);
        Ok(Self(raw))
    }

    /// Returns the object number of a managed id.
    pub fn object(&self) -> Result<u64> {
        if self.0[0] != HEAP_ID_MANAGED {
            return Err(AttrError::Corruption("unknown heap id type"));
        }
        let mut wide = [0u8; 8];
        wide[..HEAP_ID_LEN - 1].copy_from_slice(&self.0[1..]);
        Ok(u64::from_le_bytes(wide))
    }

    /// Raw id bytes as they appear inside index records.
    pub fn as_bytes(&self) -> &[u8; HEAP_ID_LEN] {
        &self.0
    }

    /// Reads an id from exactly [`HEAP_ID_LEN`] bytes.
    pub fn from_slice(src: &[u8]) -> Result<Self> {
        let raw: [u8; HEAP_ID_LEN] = src
            .try_into()
            .map_err(|_| AttrError::Corruption("heap id has wrong length"))?;
        Ok(Self(raw))
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Handle of a message held by the shared-message table.
///
/// Shared handles reuse the heap id layout of the table's own heap, which is
/// why a name-index record can carry either kind in the same field.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SharedHandle(pub HeapId);

impl fmt::Display for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sohm:{}", self.0)
    }
}

/// Which index an ordered access goes through.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum IndexType {
    /// Attribute name, physically ordered by name hash.
    Name,
    /// Creation order.
    CreationOrder,
}

/// Requested traversal order.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum IterOrder {
    /// Ascending by the selected key.
    Increasing,
    /// Descending by the selected key.
    Decreasing,
    /// Whatever order the backing index stores records in.
    Native,
}

/// Returned by iteration callbacks to continue or stop early.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum IterControl {
    /// Keep visiting.
    Continue,
    /// Stop; the outcome reports this control value.
    Stop,
}

/// Character set of an attribute name.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum CharEncoding {
    /// 7-bit ASCII.
    #[default]
    Ascii,
    /// UTF-8.
    Utf8,
}

impl CharEncoding {
    /// On-disk code.
    pub fn code(self) -> u8 {
        match self {
            CharEncoding::Ascii => 0,
            CharEncoding::Utf8 => 1,
        }
    }

    /// Parses an on-disk code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CharEncoding::Ascii),
            1 => Ok(CharEncoding::Utf8),
            _ => Err(AttrError::Corruption("unknown character encoding")),
        }
    }
}

/// Errors raised by dense attribute storage and its collaborators.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AttrError {
    /// No attribute or object answers to the given key.
    #[error("not found: {0}")]
    NotFound(&'static str),
    /// The key is already present where uniqueness is required.
    #[error("already exists: {0}")]
    AlreadyExists(&'static str),
    /// Stored bytes do not decode.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A heap, index, or object could not be allocated.
    #[error("can't allocate: {0}")]
    CantAllocate(&'static str),
    /// An index or heap insertion failed.
    #[error("can't insert: {0}")]
    CantInsert(&'static str),
    /// An index or heap removal failed.
    #[error("can't remove: {0}")]
    CantRemove(&'static str),
    /// An in-place modification failed.
    #[error("can't modify: {0}")]
    CantModify(&'static str),
    /// Positional access past the end of the attribute set.
    #[error("index {n} out of range for {count} attributes")]
    BadIndex {
        /// Requested position.
        n: u64,
        /// Number of attributes present.
        count: u64,
    },
    /// The shared-message table refused or lost a message.
    #[error("shared message: {0}")]
    ShareError(&'static str),
    /// A format version outside the permitted bounds was required.
    #[error("version out of bounds: {0}")]
    BadRange(&'static str),
    /// A heap was re-entered while an object was pinned by an operator callback.
    #[error("heap object is pinned by an operator callback")]
    Pinned,
    /// Caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AttrError>;
