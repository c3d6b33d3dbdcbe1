//! Sorted attribute tables and the ordered-access contract shared with the
//! native index walkers.

use std::cmp::Ordering;

use crate::types::{AttrError, IndexType, IterControl, IterOrder, Result};

use super::attr::Attribute;

/// Callback handed each attribute of an ordered walk.
///
/// Entries whose payload does not decode arrive as `Err`; the callback
/// decides whether to stop, skip, or fail the whole walk.
pub type AttrVisitor<'a> = dyn FnMut(Result<&Attribute>) -> Result<IterControl> + 'a;

/// How an ordered walk ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IterOutcome {
    /// Control value returned by the last callback, `Continue` when exhausted.
    pub control: IterControl,
    /// Entries passed, skipped ones included.
    pub visited: u64,
}

/// Positional and sequential access to attributes in one particular order.
pub(crate) trait OrderedAttrs {
    /// Number of attributes in the sequence.
    fn count(&self) -> Result<u64>;

    /// The `n`-th attribute; `BadIndex` past the end.
    fn nth(&self, n: u64) -> Result<Attribute>;

    /// Walks the sequence, passing over the first `skip` entries unseen.
    fn visit(&self, skip: u64, op: &mut AttrVisitor<'_>) -> Result<IterOutcome>;
}

/// Attributes materialized from the name index and sorted on request.
#[derive(Debug, Default)]
pub struct AttrTable {
    entries: Vec<Result<Attribute>>,
}

fn by_creation_index(a: &Attribute, b: &Attribute, descending: bool) -> Ordering {
    match (a.creation_index(), b.creation_index()) {
        (Some(x), Some(y)) if descending => y.cmp(&x),
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl AttrTable {
    /// Sorts `entries` (given in name-index order) for `idx_type`/`order`.
    ///
    /// Names compare bytewise. Creation order without an explicit direction
    /// means increasing; untracked creation indices and undecodable entries
    /// always land at the end.
    pub(crate) fn sorted(
        mut entries: Vec<Result<Attribute>>,
        idx_type: IndexType,
        order: IterOrder,
    ) -> Self {
        let descending = order == IterOrder::Decreasing;
        if idx_type == IndexType::Name && order == IterOrder::Native {
            return Self { entries };
        }
        entries.sort_by(|a, b| match (a, b) {
            (Ok(a), Ok(b)) => match idx_type {
                IndexType::Name => {
                    let ord = a.name().as_bytes().cmp(b.name().as_bytes());
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
                IndexType::CreationOrder => by_creation_index(a, b, descending),
            },
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => Ordering::Equal,
        });
        Self { entries }
    }

    /// Number of entries, undecodable ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the table holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at position `n`.
    pub fn get(&self, n: u64) -> Result<&Attribute> {
        let count = self.entries.len() as u64;
        let entry = usize::try_from(n)
            .ok()
            .and_then(|i| self.entries.get(i))
            .ok_or(AttrError::BadIndex { n, count })?;
        entry.as_ref().map_err(Clone::clone)
    }

    /// All entries in table order.
    pub fn entries(&self) -> &[Result<Attribute>] {
        &self.entries
    }

    /// Walks at most `limit` entries after skipping `skip`.
    pub fn iterate(
        &self,
        skip: u64,
        limit: Option<u64>,
        op: &mut AttrVisitor<'_>,
    ) -> Result<IterOutcome> {
        let mut visited = 0u64;
        let mut called = 0u64;
        for entry in &self.entries {
            if limit.is_some_and(|max| called >= max) {
                break;
            }
            visited += 1;
            if visited <= skip {
                continue;
            }
            called += 1;
            let control = op(entry.as_ref().map_err(Clone::clone))?;
            if control == IterControl::Stop {
                return Ok(IterOutcome { control, visited });
            }
        }
        Ok(IterOutcome {
            control: IterControl::Continue,
            visited,
        })
    }
}

impl OrderedAttrs for AttrTable {
    fn count(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }

    fn nth(&self, n: u64) -> Result<Attribute> {
        self.get(n).cloned()
    }

    fn visit(&self, skip: u64, op: &mut AttrVisitor<'_>) -> Result<IterOutcome> {
        self.iterate(skip, None, op)
    }
}
