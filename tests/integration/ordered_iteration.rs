#![allow(missing_docs)]

mod common;

use common::{fresh, name_records, names, u32_attr, walk};
use dense_attr::storage::{lookup3_name_hash, DenseOptions, DenseStorage, PayloadLoc};
use dense_attr::types::{AttrError, IndexType, IterControl, IterOrder, Result};
use proptest::prelude::*;

const ORDERS: [(IndexType, IterOrder); 6] = [
    (IndexType::Name, IterOrder::Increasing),
    (IndexType::Name, IterOrder::Decreasing),
    (IndexType::Name, IterOrder::Native),
    (IndexType::CreationOrder, IterOrder::Increasing),
    (IndexType::CreationOrder, IterOrder::Decreasing),
    (IndexType::CreationOrder, IterOrder::Native),
];

fn options(indexed: bool) -> DenseOptions {
    if indexed {
        DenseOptions::new().index_creation_order(true)
    } else {
        DenseOptions::new().track_creation_order(true)
    }
}

fn populated(inserted: &[String], indexed: bool) -> DenseStorage {
    let (_space, mut dense) = fresh(options(indexed));
    for (i, name) in inserted.iter().enumerate() {
        dense.insert(&mut u32_attr(name, i as u32)).unwrap();
    }
    dense
}

/// Names in the order `(idx_type, order)` should produce.
fn expected(inserted: &[String], idx_type: IndexType, order: IterOrder) -> Vec<String> {
    let mut out = inserted.to_vec();
    match (idx_type, order) {
        (IndexType::Name, IterOrder::Native) => {
            out.sort_by_key(|n| (lookup3_name_hash(n.as_bytes()), n.clone()))
        }
        (IndexType::Name, _) => out.sort(),
        (IndexType::CreationOrder, _) => {}
    }
    if order == IterOrder::Decreasing {
        out.reverse();
    }
    out
}

fn unique_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z]{1,6}", 1..24)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn skip_drops_a_prefix_of_the_same_sequence(
        inserted in unique_names(),
        indexed in any::<bool>()
    ) {
        let dense = populated(&inserted, indexed);
        for (idx_type, order) in ORDERS {
            let full = names(&dense, idx_type, order);
            prop_assert_eq!(&full, &expected(&inserted, idx_type, order));
            for skip in 0..=full.len() + 1 {
                let tail: Vec<String> = walk(&dense, idx_type, order, skip as u64)
                    .unwrap()
                    .into_iter()
                    .flatten()
                    .collect();
                prop_assert_eq!(&tail[..], &full[skip.min(full.len())..]);
            }
            for (n, name) in full.iter().enumerate() {
                let attr = dense.open_by_index(idx_type, order, n as u64).unwrap();
                prop_assert_eq!(attr.name(), name.as_str());
            }
            let past = dense.open_by_index(idx_type, order, full.len() as u64);
            prop_assert!(matches!(past, Err(AttrError::BadIndex { .. })), "{:?}", past);
        }
    }

    #[test]
    fn remove_by_index_matches_remove_by_name(
        inserted in unique_names(),
        indexed in any::<bool>(),
        pick in any::<prop::sample::Index>(),
        which in 0usize..ORDERS.len()
    ) {
        let (idx_type, order) = ORDERS[which];
        let by_rank = populated(&inserted, indexed);
        let by_name = populated(&inserted, indexed);
        let order_before = expected(&inserted, idx_type, order);
        let n = pick.index(order_before.len());

        by_rank.remove_by_index(idx_type, order, n as u64).unwrap();
        by_name.remove(&order_before[n]).unwrap();

        prop_assert!(!by_rank.exists(&order_before[n]).unwrap());
        for (idx_type, order) in ORDERS {
            prop_assert_eq!(names(&by_rank, idx_type, order), names(&by_name, idx_type, order));
        }
        let past = by_rank.remove_by_index(idx_type, order, inserted.len() as u64);
        prop_assert!(matches!(past, Err(AttrError::BadIndex { .. })), "{:?}", past);
    }
}

#[test]
fn table_and_positional_reads_agree() -> Result<()> {
    let inserted: Vec<String> = ["kappa", "alpha", "omega", "delta"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let dense = populated(&inserted, true);
    for (idx_type, order) in ORDERS {
        let table = dense.build_table(idx_type, order)?;
        assert_eq!(table.len(), inserted.len());
        for n in 0..table.len() as u64 {
            assert_eq!(table.get(n)?, &dense.open_by_index(idx_type, order, n)?);
        }
    }
    Ok(())
}

#[test]
fn stop_ends_the_walk_and_reports_progress() -> Result<()> {
    let inserted: Vec<String> = (0..8).map(|i| format!("attr{i}")).collect();
    let dense = populated(&inserted, true);
    for (idx_type, order) in ORDERS {
        let mut seen = 0;
        let outcome = dense.iterate(idx_type, order, 2, &mut |_| {
            seen += 1;
            Ok(if seen == 3 {
                IterControl::Stop
            } else {
                IterControl::Continue
            })
        })?;
        assert_eq!(outcome.control, IterControl::Stop);
        assert_eq!(outcome.visited, 5);

        let outcome = dense.iterate(idx_type, order, 20, &mut |_| {
            panic!("nothing left to visit")
        })?;
        assert_eq!(outcome.control, IterControl::Continue);
        assert_eq!(outcome.visited, 8);

        let failed = dense.iterate(idx_type, order, 0, &mut |_| Err(AttrError::Invalid("halt")));
        assert_eq!(failed, Err(AttrError::Invalid("halt")));
    }
    Ok(())
}

#[test]
fn corrupt_payload_is_reported_not_skipped() -> Result<()> {
    let (space, mut dense) = fresh(DenseOptions::new().index_creation_order(true));
    for (i, name) in ["alpha", "victim", "beta", "gamma"].iter().enumerate() {
        dense.insert(&mut u32_attr(name, i as u32))?;
    }
    let hash = lookup3_name_hash(b"victim");
    let victim = name_records(&space, &dense)
        .into_iter()
        .find(|r| r.hash == hash)
        .expect("victim record");
    let PayloadLoc::Heap(id) = victim.loc else {
        panic!("expected a heap payload");
    };
    space
        .mem_heap(dense.info().heap_addr)
        .expect("heap")
        .corrupt_object(&id, 0)?;

    for idx_type in [IndexType::Name, IndexType::CreationOrder] {
        let sorted = walk(&dense, idx_type, IterOrder::Decreasing, 0)?;
        assert_eq!(sorted.len(), 4);
        assert_eq!(sorted[3], None);
        assert!(sorted[..3].iter().all(Option::is_some));

        let table = dense.build_table(idx_type, IterOrder::Increasing)?;
        assert!(matches!(table.get(3), Err(AttrError::Corruption(_))));
    }
    let native = walk(&dense, IndexType::Name, IterOrder::Native, 0)?;
    assert_eq!(native.iter().filter(|n| n.is_none()).count(), 1);
    let by_corder = walk(&dense, IndexType::CreationOrder, IterOrder::Native, 0)?;
    assert_eq!(by_corder[1], None);

    assert!(matches!(
        dense.open_lookup("victim"),
        Err(AttrError::Corruption(_))
    ));
    assert!(dense.open_lookup("gamma").is_ok());
    assert_eq!(dense.count()?, 4);

    // the record is withdrawn even though its payload cannot be read or freed
    let rank = native.iter().position(Option::is_none).expect("corrupt entry") as u64;
    assert!(matches!(
        dense.remove_by_index(IndexType::Name, IterOrder::Native, rank),
        Err(AttrError::Corruption(_))
    ));
    assert_eq!(dense.count()?, 3);
    assert!(walk(&dense, IndexType::CreationOrder, IterOrder::Native, 0)?
        .iter()
        .all(Option::is_some));
    Ok(())
}
