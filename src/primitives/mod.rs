//! Collaborators the dense attribute engine is built on.
//!
//! Each module pairs a trait seam with an in-memory implementation that
//! keeps the engine testable without a container file.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Ordered index over fixed-size records.
pub mod btree;

/// Heap of variable-length objects addressed by fixed-width ids.
pub mod heap;

/// Shared-message table for deduplicated payloads.
pub mod shared;

/// Address registry that allocates and frees heaps and indices.
pub mod space;
