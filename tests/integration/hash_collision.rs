#![allow(missing_docs)]

mod common;

use common::{fresh, name_records, names, u32_attr, u32_value};
use dense_attr::storage::DenseOptions;
use dense_attr::types::{AttrError, IndexType, IterOrder, Result};

fn constant_hash(_: &[u8]) -> u32 {
    7
}

fn colliding() -> DenseOptions {
    DenseOptions::new()
        .index_creation_order(true)
        .name_hash(constant_hash)
}

const NAMES: [&str; 6] = ["delta", "alpha", "echo", "charlie", "bravo", "foxtrot"];

#[test]
fn every_colliding_name_is_found() -> Result<()> {
    let (space, mut dense) = fresh(colliding());
    for (i, name) in NAMES.iter().enumerate() {
        dense.insert(&mut u32_attr(name, i as u32))?;
    }
    assert!(name_records(&space, &dense).iter().all(|r| r.hash == 7));

    for (i, name) in NAMES.iter().enumerate() {
        assert!(dense.exists(name)?);
        assert_eq!(u32_value(&dense.open_lookup(name)?), i as u32);
    }
    assert!(!dense.exists("golf")?);

    // same hash everywhere, so native order falls back to the names
    let mut sorted = NAMES.to_vec();
    sorted.sort_unstable();
    assert_eq!(names(&dense, IndexType::Name, IterOrder::Native), sorted);
    assert_eq!(
        names(&dense, IndexType::CreationOrder, IterOrder::Increasing),
        NAMES
    );
    Ok(())
}

#[test]
fn removal_touches_only_the_named_entry() -> Result<()> {
    let (_space, mut dense) = fresh(colliding());
    for (i, name) in NAMES.iter().enumerate() {
        dense.insert(&mut u32_attr(name, i as u32))?;
    }
    dense.remove("charlie")?;
    dense.remove("delta")?;
    assert!(matches!(dense.remove("charlie"), Err(AttrError::NotFound(_))));

    assert_eq!(dense.count()?, 4);
    for name in ["alpha", "bravo", "echo", "foxtrot"] {
        assert!(dense.exists(name)?, "{name} went missing");
    }
    assert_eq!(
        names(&dense, IndexType::CreationOrder, IterOrder::Increasing),
        ["alpha", "echo", "bravo", "foxtrot"]
    );
    Ok(())
}

#[test]
fn rename_within_a_collision_run() -> Result<()> {
    let (_space, mut dense) = fresh(colliding());
    for (i, name) in NAMES.iter().enumerate() {
        dense.insert(&mut u32_attr(name, i as u32))?;
    }
    dense.rename("echo", "aaa")?;
    assert!(!dense.exists("echo")?);
    let renamed = dense.open_lookup("aaa")?;
    assert_eq!(u32_value(&renamed), 2);
    assert_eq!(renamed.creation_index(), Some(2));
    assert_eq!(
        names(&dense, IndexType::Name, IterOrder::Native).first().map(String::as_str),
        Some("aaa")
    );

    let mut attr = dense.open_lookup("bravo")?;
    attr.set_data(99u32.to_le_bytes().to_vec())?;
    dense.write(&mut attr)?;
    assert_eq!(u32_value(&dense.open_lookup("bravo")?), 99);
    assert_eq!(u32_value(&dense.open_lookup("alpha")?), 1);
    Ok(())
}
