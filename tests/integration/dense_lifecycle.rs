#![allow(missing_docs)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{fresh, name_records, names, storage_in, u32_attr, u32_value};
use dense_attr::storage::{
    lookup3_name_hash, Attribute, CorderRecord, CounterMetrics, Dataspace, Datatype, DenseOptions,
    DenseStorage, VersionBounds,
};
use dense_attr::types::{AttrError, CharEncoding, IndexType, IterOrder, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[test]
fn three_attributes_in_every_name_order() -> Result<()> {
    let (_space, mut dense) = fresh(DenseOptions::new());
    for (i, name) in ["gamma", "alpha", "beta"].into_iter().enumerate() {
        dense.insert(&mut u32_attr(name, i as u32))?;
    }
    assert_eq!(dense.count()?, 3);

    let mut by_hash = vec!["alpha", "beta", "gamma"];
    by_hash.sort_by_key(|n| (lookup3_name_hash(n.as_bytes()), n.as_bytes().to_vec()));
    assert_eq!(names(&dense, IndexType::Name, IterOrder::Native), by_hash);
    assert_eq!(
        names(&dense, IndexType::Name, IterOrder::Increasing),
        ["alpha", "beta", "gamma"]
    );
    assert_eq!(
        names(&dense, IndexType::Name, IterOrder::Decreasing),
        ["gamma", "beta", "alpha"]
    );
    Ok(())
}

#[test]
fn lookup_returns_what_was_inserted() -> Result<()> {
    let (_space, mut dense) = fresh(DenseOptions::new());
    let mut scalar = u32_attr("units", 42);
    let mut vector = Attribute::new(
        "samples",
        Datatype::float64(),
        Dataspace::simple(&[3])?,
        [1.5f64, -2.0, 8.25]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
    )?;
    let mut label = Attribute::new(
        "température",
        Datatype::fixed_string(5, CharEncoding::Utf8)?,
        Dataspace::scalar(),
        b"kelvn".to_vec(),
    )?;
    let mut empty = Attribute::new(
        "marker",
        Datatype::integer(1, true)?,
        Dataspace::null(),
        Vec::new(),
    )?;
    for attr in [&mut scalar, &mut vector, &mut label, &mut empty] {
        dense.insert(attr)?;
    }

    assert_eq!(u32_value(&dense.open_lookup("units")?), 42);
    let read = dense.open_lookup("samples")?;
    assert_eq!(read.data(), vector.data());
    assert_eq!(read.dataspace(), vector.dataspace());
    let read = dense.open_lookup("température")?;
    assert_eq!(read.encoding(), CharEncoding::Utf8);
    assert_eq!(read.data(), b"kelvn");
    assert!(dense.open_lookup("marker")?.data().is_empty());

    assert!(!dense.exists("missing")?);
    assert!(matches!(
        dense.open_lookup("missing"),
        Err(AttrError::NotFound(_))
    ));
    Ok(())
}

#[test]
fn duplicate_names_are_stored_twice() -> Result<()> {
    let (_space, mut dense) = fresh(DenseOptions::new());
    dense.insert(&mut u32_attr("twin", 1))?;
    dense.insert(&mut u32_attr("twin", 2))?;
    assert_eq!(dense.count()?, 2);

    dense.remove("twin")?;
    assert!(dense.exists("twin")?);
    dense.remove("twin")?;
    assert_eq!(dense.count()?, 0);
    assert!(matches!(dense.remove("twin"), Err(AttrError::NotFound(_))));
    Ok(())
}

#[test]
fn rename_keeps_value_and_creation_index() -> Result<()> {
    let (_space, mut dense) = fresh(DenseOptions::new().index_creation_order(true));
    dense.insert(&mut u32_attr("first", 1))?;
    dense.insert(&mut u32_attr("second", 2))?;

    dense.rename("first", "renamed")?;
    assert!(!dense.exists("first")?);
    let attr = dense.open_lookup("renamed")?;
    assert_eq!(u32_value(&attr), 1);
    assert_eq!(attr.creation_index(), Some(0));
    assert_eq!(dense.count()?, 2);
    assert_eq!(
        names(&dense, IndexType::CreationOrder, IterOrder::Increasing),
        ["renamed", "second"]
    );
    assert!(matches!(
        dense.rename("first", "again"),
        Err(AttrError::NotFound(_))
    ));
    Ok(())
}

#[test]
fn delete_frees_every_structure() -> Result<()> {
    let (space, mut dense) = fresh(DenseOptions::new().index_creation_order(true));
    for i in 0..20 {
        dense.insert(&mut u32_attr(&format!("attr{i}"), i))?;
    }
    let info = dense.info();
    assert_eq!(space.allocated(), 3);
    dense.delete()?;

    assert_eq!(space.allocated(), 0);
    assert!(!space.is_resolvable(info.heap_addr));
    assert!(!space.is_resolvable(info.name_index_addr));
    assert!(!space.is_resolvable(info.corder_index_addr.unwrap()));
    Ok(())
}

#[test]
fn creation_indices_only_grow() -> Result<()> {
    let (_space, mut dense) = fresh(DenseOptions::new().index_creation_order(true));
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut live: Vec<String> = Vec::new();
    let mut last = None;

    for step in 0..300u32 {
        if live.is_empty() || rng.gen_bool(0.65) {
            let name = format!("a{step}");
            let mut attr = u32_attr(&name, step);
            dense.insert(&mut attr)?;
            let ci = attr.creation_index().expect("tracked");
            assert!(last.map_or(true, |prev| ci > prev));
            last = Some(ci);
            live.push(name);
        } else {
            let victim = live.swap_remove(rng.gen_range(0..live.len()));
            dense.remove(&victim)?;
        }
        assert_eq!(dense.info().max_corder, last.map_or(0, |ci| ci + 1));
    }

    let order = dense.build_table(IndexType::CreationOrder, IterOrder::Increasing)?;
    let cis: Vec<u32> = order
        .entries()
        .iter()
        .map(|e| e.as_ref().unwrap().creation_index().unwrap())
        .collect();
    assert!(cis.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(cis.len(), live.len());
    Ok(())
}

#[test]
fn copied_attribute_gets_a_fresh_creation_index() -> Result<()> {
    let options = DenseOptions::new().index_creation_order(true);
    let (space, mut a) = fresh(options.clone());
    let mut b = storage_in(&space, options);
    a.insert(&mut u32_attr("x", 1))?;
    b.insert(&mut u32_attr("p", 2))?;

    let mut copy = a.open_lookup("x")?;
    assert_eq!(copy.creation_index(), Some(0));
    b.insert(&mut copy)?;
    assert_eq!(copy.creation_index(), Some(1));
    assert_eq!(b.info().max_corder, 2);
    assert_eq!(b.open_lookup("x")?.creation_index(), Some(1));
    assert_eq!(a.open_lookup("x")?.creation_index(), Some(0));

    let cis: Vec<Option<u32>> = b
        .build_table(IndexType::CreationOrder, IterOrder::Increasing)?
        .entries()
        .iter()
        .map(|e| e.as_ref().unwrap().creation_index())
        .collect();
    assert_eq!(cis, [Some(0), Some(1)]);
    assert_eq!(
        names(&b, IndexType::CreationOrder, IterOrder::Native),
        ["p", "x"]
    );

    // an index past everything stored is kept as given
    let mut ahead = u32_attr("q", 3).with_creation_index(7);
    b.insert(&mut ahead)?;
    assert_eq!(ahead.creation_index(), Some(7));
    assert_eq!(b.info().max_corder, 8);
    Ok(())
}

#[test]
fn write_in_place_and_relocated() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let options = DenseOptions::new()
        .index_creation_order(true)
        .metrics(metrics.clone());
    let (space, mut dense) = fresh(options.clone());
    dense.insert(&mut u32_attr("alpha", 1))?;
    dense.insert(&mut u32_attr("beta", 2))?;

    let mut attr = dense.open_lookup("alpha")?;
    attr.set_data(7u32.to_le_bytes().to_vec())?;
    dense.write(&mut attr)?;
    assert_eq!(u32_value(&dense.open_lookup("alpha")?), 7);
    assert_eq!(metrics.written_in_place.load(Ordering::Relaxed), 1);

    // newer message layout changes the encoded size, so the heap moves it
    let before = name_records(&space, &dense);
    let relaxed = DenseStorage::open(
        space.clone(),
        dense.info(),
        options.versions(VersionBounds::latest()),
    )?;
    let mut attr = relaxed.open_lookup("alpha")?;
    attr.set_data(9u32.to_le_bytes().to_vec())?;
    relaxed.write(&mut attr)?;
    assert_eq!(metrics.written_relocated.load(Ordering::Relaxed), 1);
    assert_eq!(attr.creation_index(), Some(0));

    let read = relaxed.open_lookup("alpha")?;
    assert_eq!(u32_value(&read), 9);
    assert_eq!(read.version(), VersionBounds::latest().high);

    let after = name_records(&space, &dense);
    assert_eq!(after.len(), before.len());
    let moved = after
        .iter()
        .find(|r| r.creation_index == Some(0))
        .expect("alpha record");
    assert!(!before.iter().any(|r| r.loc == moved.loc));
    let corder: Vec<CorderRecord> = space
        .mem_index(dense.info().corder_index_addr.unwrap())
        .unwrap()
        .records()
        .iter()
        .map(|raw| CorderRecord::decode(raw))
        .collect::<Result<_>>()?;
    let mirror = corder.iter().find(|r| r.creation_index == 0).unwrap();
    assert_eq!(mirror.loc, moved.loc);
    Ok(())
}

#[test]
fn write_of_unknown_name_fails() {
    let (_space, dense) = fresh(DenseOptions::new());
    let mut attr = u32_attr("ghost", 0);
    assert!(matches!(dense.write(&mut attr), Err(AttrError::NotFound(_))));
}
