//! Streaming access straight off an index whose stored order is the one asked for.

use crate::storage::attr::Attribute;
use crate::storage::record::{CorderRecord, NameRecord, PayloadLoc};
use crate::storage::table::{AttrVisitor, IterOutcome, OrderedAttrs};
use crate::types::{AttrError, IndexType, IterControl, IterOrder, Result};

use super::boundary::PayloadStore;
use super::indices::IndexPair;

/// Walks one index in its own order, decoding each payload as it goes.
pub(crate) struct NativeOrder<'a> {
    pub(crate) indices: &'a IndexPair,
    pub(crate) payloads: &'a PayloadStore,
    pub(crate) idx_type: IndexType,
}

impl NativeOrder<'_> {
    fn location(&self, raw: &[u8]) -> Result<(PayloadLoc, Option<u32>)> {
        match self.idx_type {
            IndexType::Name => {
                let rec = NameRecord::decode(raw)?;
                Ok((rec.loc, rec.creation_index))
            }
            IndexType::CreationOrder => {
                let rec = CorderRecord::decode(raw)?;
                Ok((rec.loc, Some(rec.creation_index)))
            }
        }
    }
}

impl OrderedAttrs for NativeOrder<'_> {
    fn count(&self) -> Result<u64> {
        self.indices.len()
    }

    fn nth(&self, n: u64) -> Result<Attribute> {
        let rec = self
            .indices
            .record_by_rank(self.payloads, self.idx_type, IterOrder::Increasing, n)?;
        self.payloads.load(rec.loc, rec.creation_index)
    }

    fn visit(&self, skip: u64, op: &mut AttrVisitor<'_>) -> Result<IterOutcome> {
        let index = self
            .indices
            .index_for(self.idx_type)
            .ok_or(AttrError::NotFound("creation order index"))?;
        let mut visited = 0u64;
        let control = index.iterate(&mut |raw| {
            visited += 1;
            if visited <= skip {
                return Ok(IterControl::Continue);
            }
            let attr = self
                .location(raw)
                .and_then(|(loc, corder)| self.payloads.load(loc, corder));
            op(attr.as_ref().map_err(Clone::clone))
        })?;
        Ok(IterOutcome { control, visited })
    }
}
