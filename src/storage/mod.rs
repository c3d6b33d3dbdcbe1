//! Dense attribute storage engine.
//!
//! Attributes too many or too large for an object header live here: encoded
//! payloads in a heap (or the file's shared-message table), found through a
//! name index and, optionally, a creation-order index.

/// In-memory attribute model.
pub mod attr;

/// Attribute message wire format.
pub mod codec;

/// Fixed-size index records.
pub mod record;

/// Sorted attribute tables.
pub mod table;

mod dense;
mod metrics;
mod options;

pub use attr::{AttrInfo, Attribute, Dataspace, Datatype, Extent, MAX_RANK, UNLIMITED};
pub use codec::{VersionBounds, ATTR_VERSION_LATEST};
pub use dense::{DenseInfo, DenseStorage};
pub use metrics::{default_metrics, AttrMetrics, CounterMetrics, NoopMetrics};
pub use options::{lookup3_name_hash, ConfigError, DenseOptions, NameHashFn};
pub use record::{CorderRecord, NameRecord, PayloadLoc, FLAG_SHARED};
pub use table::{AttrTable, AttrVisitor, IterOutcome};
