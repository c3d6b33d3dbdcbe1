#![allow(dead_code)]

use std::sync::{Arc, Once};

use dense_attr::primitives::space::MemSpace;
use dense_attr::storage::{Attribute, Dataspace, Datatype, DenseOptions, DenseStorage, NameRecord};
use dense_attr::types::{IndexType, IterControl, IterOrder, Result};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("dense_attr=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

pub fn u32_attr(name: &str, value: u32) -> Attribute {
    Attribute::new(
        name,
        Datatype::integer(4, false).unwrap(),
        Dataspace::scalar(),
        value.to_le_bytes().to_vec(),
    )
    .unwrap()
}

pub fn u32_value(attr: &Attribute) -> u32 {
    u32::from_le_bytes(attr.data().try_into().unwrap())
}

pub fn storage_in(space: &Arc<MemSpace>, options: DenseOptions) -> DenseStorage {
    DenseStorage::create(space.clone(), options).unwrap()
}

pub fn fresh(options: DenseOptions) -> (Arc<MemSpace>, DenseStorage) {
    init_tracing();
    let space = Arc::new(MemSpace::new());
    let dense = storage_in(&space, options);
    (space, dense)
}

/// Names in iteration order; undecodable entries show up as `None`.
pub fn walk(
    dense: &DenseStorage,
    idx_type: IndexType,
    order: IterOrder,
    skip: u64,
) -> Result<Vec<Option<String>>> {
    let mut out = Vec::new();
    dense.iterate(idx_type, order, skip, &mut |entry| {
        out.push(entry.ok().map(|a| a.name().to_owned()));
        Ok(IterControl::Continue)
    })?;
    Ok(out)
}

pub fn names(dense: &DenseStorage, idx_type: IndexType, order: IterOrder) -> Vec<String> {
    walk(dense, idx_type, order, 0)
        .unwrap()
        .into_iter()
        .map(|n| n.expect("entry should decode"))
        .collect()
}

pub fn name_records(space: &MemSpace, dense: &DenseStorage) -> Vec<NameRecord> {
    space
        .mem_index(dense.info().name_index_addr)
        .expect("name index allocated")
        .records()
        .iter()
        .map(|raw| NameRecord::decode(raw).unwrap())
        .collect()
}
