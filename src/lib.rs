//! Dense attribute storage for a hierarchical, self-describing container format.
//!
//! Objects whose attributes outgrow their header keep them in a heap indexed
//! by name hash and, optionally, creation order; identical payloads can be
//! deduplicated through a file-wide shared-message table.

#![warn(missing_docs)]

/// Logging setup.
pub mod logging;
/// Collaborator seams and their in-memory implementations.
pub mod primitives;
/// The attribute engine.
pub mod storage;
/// Identifiers, enums and errors.
pub mod types;

pub use storage::{Attribute, DenseOptions, DenseStorage};
pub use types::{AttrError, IndexType, IterControl, IterOrder, Result};
