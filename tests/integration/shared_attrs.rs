#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{init_tracing, storage_in, u32_attr, u32_value};
use dense_attr::primitives::shared::{MemSharedTable, SharedMessages, SharedTableOptions};
use dense_attr::primitives::space::MemSpace;
use dense_attr::storage::{Attribute, Dataspace, Datatype, DenseOptions};
use dense_attr::types::{AttrError, Result, SharedHandle};

fn sharing_space(min_size: usize) -> Arc<MemSpace> {
    init_tracing();
    Arc::new(MemSpace::with_shared(MemSharedTable::new(
        SharedTableOptions::enabled(min_size),
    )))
}

fn shared_type_attr(table: &MemSharedTable, name: &str, value: f64) -> Result<(Attribute, SharedHandle)> {
    let dt = Datatype::float64();
    let handle = table.share_component(dt.message())?;
    let attr = Attribute::new(
        name,
        dt.into_shared(handle),
        Dataspace::scalar(),
        value.to_le_bytes().to_vec(),
    )?;
    Ok((attr, handle))
}

#[test]
fn identical_attributes_on_two_objects_share_one_entry() -> Result<()> {
    let space = sharing_space(0);
    let table = space.shared_table();
    let mut a = storage_in(&space, DenseOptions::new());
    let mut b = storage_in(&space, DenseOptions::new());

    let mut first = u32_attr("units", 5);
    a.insert(&mut first)?;
    let mut second = u32_attr("units", 5);
    b.insert(&mut second)?;

    let handle = first.shared_handle().expect("shared");
    assert_eq!(second.shared_handle(), Some(handle));
    assert_eq!(table.len(), 1);
    assert_eq!(table.refcount(handle)?, 2);
    assert_eq!(u32_value(&b.open_lookup("units")?), 5);
    assert_eq!(b.open_lookup("units")?.shared_handle(), Some(handle));

    a.remove("units")?;
    assert_eq!(table.refcount(handle)?, 1);
    assert_eq!(u32_value(&b.open_lookup("units")?), 5);
    b.delete()?;
    assert!(table.is_empty());
    Ok(())
}

#[test]
fn writing_a_shared_attribute_leaves_other_owners_alone() -> Result<()> {
    let space = sharing_space(0);
    let table = space.shared_table();
    let mut a = storage_in(&space, DenseOptions::new());
    let mut b = storage_in(&space, DenseOptions::new());
    a.insert(&mut u32_attr("units", 5))?;
    b.insert(&mut u32_attr("units", 5))?;

    let mut attr = a.open_lookup("units")?;
    let old = attr.shared_handle().expect("shared");
    attr.set_data(6u32.to_le_bytes().to_vec())?;
    a.write(&mut attr)?;

    let new = attr.shared_handle().expect("still shared");
    assert_ne!(new, old);
    assert_eq!(u32_value(&a.open_lookup("units")?), 6);
    assert_eq!(u32_value(&b.open_lookup("units")?), 5);
    assert_eq!(table.refcount(old)?, 1);
    assert_eq!(table.refcount(new)?, 1);

    // converging again folds both owners back onto one entry
    let mut attr = b.open_lookup("units")?;
    attr.set_data(6u32.to_le_bytes().to_vec())?;
    b.write(&mut attr)?;
    assert_eq!(attr.shared_handle(), Some(new));
    assert_eq!(table.refcount(new)?, 2);
    assert_eq!(table.len(), 1);
    Ok(())
}

#[test]
fn rename_moves_a_shared_attribute_to_a_new_entry() -> Result<()> {
    let space = sharing_space(0);
    let table = space.shared_table();
    let mut a = storage_in(&space, DenseOptions::new());
    let mut b = storage_in(&space, DenseOptions::new());
    a.insert(&mut u32_attr("units", 5))?;
    b.insert(&mut u32_attr("units", 5))?;

    a.rename("units", "unit_id")?;
    let renamed = a.open_lookup("unit_id")?;
    assert_eq!(u32_value(&renamed), 5);
    let kept = b.open_lookup("units")?;
    assert_ne!(renamed.shared_handle(), kept.shared_handle());
    assert_eq!(table.len(), 2);
    assert_eq!(table.refcount(kept.shared_handle().unwrap())?, 1);

    a.delete()?;
    b.delete()?;
    assert!(table.is_empty());
    Ok(())
}

#[test]
fn heap_payloads_own_their_shared_components() -> Result<()> {
    let space = sharing_space(usize::MAX);
    let table = space.shared_table();
    let mut dense = storage_in(&space, DenseOptions::new());

    let (mut gain, dt) = shared_type_attr(&table, "gain", 1.5)?;
    dense.insert(&mut gain)?;
    assert!(gain.shared_handle().is_none());
    assert_eq!(table.refcount(dt)?, 1);

    let (mut offset, same_dt) = shared_type_attr(&table, "offset", -3.0)?;
    assert_eq!(same_dt, dt);
    dense.insert(&mut offset)?;
    assert_eq!(table.refcount(dt)?, 2);

    dense.rename("gain", "scale")?;
    assert_eq!(table.refcount(dt)?, 2);
    let scale = dense.open_lookup("scale")?;
    assert_eq!(scale.datatype().shared(), Some(dt));
    assert_eq!(scale.data(), 1.5f64.to_le_bytes());

    dense.remove("offset")?;
    assert_eq!(table.refcount(dt)?, 1);
    dense.delete()?;
    assert!(table.is_empty());
    Ok(())
}

#[test]
fn deduplicated_attribute_returns_its_component_reference() -> Result<()> {
    let space = sharing_space(0);
    let table = space.shared_table();
    let mut a = storage_in(&space, DenseOptions::new());
    let mut b = storage_in(&space, DenseOptions::new());

    let (mut first, dt) = shared_type_attr(&table, "gain", 2.0)?;
    a.insert(&mut first)?;
    assert_eq!(table.refcount(dt)?, 1);

    let (mut second, _) = shared_type_attr(&table, "gain", 2.0)?;
    assert_eq!(table.refcount(dt)?, 2);
    b.insert(&mut second)?;
    let entry = second.shared_handle().expect("shared");
    assert_eq!(first.shared_handle(), Some(entry));
    assert_eq!(table.refcount(entry)?, 2);
    assert_eq!(table.refcount(dt)?, 1);

    a.remove("gain")?;
    assert_eq!(table.refcount(dt)?, 1);
    b.remove("gain")?;
    assert!(table.is_empty());
    Ok(())
}

#[test]
fn inserting_a_modified_copy_stores_the_new_value() -> Result<()> {
    let space = sharing_space(0);
    let table = space.shared_table();
    let mut a = storage_in(&space, DenseOptions::new());
    let mut b = storage_in(&space, DenseOptions::new());
    let mut c = storage_in(&space, DenseOptions::new());
    a.insert(&mut u32_attr("units", 5))?;
    let original = a.open_lookup("units")?.shared_handle().expect("shared");

    let mut same = a.open_lookup("units")?;
    c.insert(&mut same)?;
    assert_eq!(same.shared_handle(), Some(original));
    assert_eq!(table.refcount(original)?, 2);

    let mut copy = a.open_lookup("units")?;
    copy.set_data(9u32.to_le_bytes().to_vec())?;
    assert_eq!(copy.shared_handle(), None);
    b.insert(&mut copy)?;

    let stored = copy.shared_handle().expect("shared");
    assert_ne!(stored, original);
    assert_eq!(u32_value(&b.open_lookup("units")?), 9);
    assert_eq!(u32_value(&a.open_lookup("units")?), 5);
    assert_eq!(u32_value(&c.open_lookup("units")?), 5);
    assert_eq!(table.refcount(original)?, 2);
    assert_eq!(table.refcount(stored)?, 1);

    a.delete()?;
    b.delete()?;
    c.delete()?;
    assert!(table.is_empty());
    Ok(())
}

#[test]
fn rename_onto_an_existing_entry_shares_it() -> Result<()> {
    let space = sharing_space(0);
    let table = space.shared_table();
    let mut a = storage_in(&space, DenseOptions::new());
    let mut b = storage_in(&space, DenseOptions::new());

    let (mut scale, dt) = shared_type_attr(&table, "scale", 2.0)?;
    b.insert(&mut scale)?;
    let entry = scale.shared_handle().expect("shared");
    let (mut gain, _) = shared_type_attr(&table, "gain", 2.0)?;
    a.insert(&mut gain)?;
    assert_ne!(gain.shared_handle(), Some(entry));
    assert_eq!(table.refcount(dt)?, 2);
    assert_eq!(table.len(), 3);

    a.rename("gain", "scale")?;
    let renamed = a.open_lookup("scale")?;
    assert_eq!(renamed.shared_handle(), Some(entry));
    assert_eq!(renamed.data(), 2.0f64.to_le_bytes());
    assert!(!a.exists("gain")?);
    assert_eq!(table.refcount(entry)?, 2);
    assert_eq!(table.refcount(dt)?, 1);
    assert_eq!(table.len(), 2);

    a.delete()?;
    assert_eq!(table.refcount(entry)?, 1);
    assert_eq!(table.refcount(dt)?, 1);
    b.delete()?;
    assert!(table.is_empty());
    Ok(())
}

#[test]
fn record_of_a_vanished_shared_message_is_a_share_error() -> Result<()> {
    let space = sharing_space(0);
    let table = space.shared_table();
    let mut dense = storage_in(&space, DenseOptions::new());
    let mut attr = u32_attr("units", 5);
    dense.insert(&mut attr)?;

    let handle = attr.shared_handle().expect("shared");
    assert_eq!(table.delete(handle)?, 0);
    assert!(matches!(
        dense.open_lookup("units"),
        Err(AttrError::ShareError(_))
    ));
    Ok(())
}
