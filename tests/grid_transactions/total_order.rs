//! Total-Order Commit Tests
//!
//! Ordered prepares are validated in one global order at every owner; a write
//! skew found by any owner aborts the transaction everywhere.

use crate::common::*;
use std::thread;

fn ordered_grid(ownership: StaticOwnership) -> TestGrid {
    let config = GridConfig::default()
        .with_protocol(TransactionProtocol::TotalOrder)
        .with_write_skew_check(true)
        .with_l1(true);
    TestGrid::with(Grid::builder().nodes(3).config(config).ownership(ownership))
}

#[test]
fn suspended_transaction_fails_on_concurrent_update() {
    let grid = ordered_grid(pinned(3, &[("k", &[0, 1])]));
    grid.put(2, "k", "v1");

    let cache = grid.cache(2);
    let tm = cache.transaction_manager();
    let mut session = cache.session();

    tm.begin(&mut session).unwrap();
    assert_eq!(cache.get(&session, "k").unwrap(), Some(Value::from("v1")));
    assert!(grid.node(2).near_cache().contains(&Key::from("k")));
    cache.put(&session, "k", "v2").unwrap();
    let suspended = tm.suspend(&mut session).unwrap();

    // Auto-commit on the now unbound session
    cache.put(&session, "k", "v3").unwrap();
    assert!(!grid.node(2).near_cache().contains(&Key::from("k")));

    tm.resume(&mut session, suspended).unwrap();
    let err = tm.commit(&mut session).unwrap_err();
    assert!(
        matches!(err, CoreError::WriteSkewDetected { ref key, .. } if *key == Key::from("k")),
        "unexpected {}",
        err
    );

    for node in 0..3 {
        assert_eq!(grid.read(node, "k"), Some(Value::from("v3")));
    }
    assert_eq!(grid.stored_version(0, "k"), Some(2));
    assert_eq!(grid.stored_version(1, "k"), Some(2));
    assert!(grid.grid.is_quiescent());
}

#[test]
fn rejection_by_one_owner_aborts_everywhere() {
    let grid = ordered_grid(pinned(3, &[("a", &[0, 1]), ("b", &[1, 2])]));
    grid.put(0, "a", 1i64);
    grid.put(0, "b", 1i64);

    let cache = grid.cache(0);
    let tm = cache.transaction_manager();
    let mut session = cache.session();
    tm.begin(&mut session).unwrap();
    cache.get(&session, "b").unwrap();
    cache.put(&session, "a", 2i64).unwrap();
    cache.put(&session, "b", 2i64).unwrap();

    // Only owners of "b" can detect this
    grid.put(2, "b", 5i64);

    let err = tm.commit(&mut session).unwrap_err();
    assert!(matches!(err, CoreError::WriteSkewDetected { .. }));

    // Node 0 validated nothing and still never applied "a"
    assert_eq!(grid.stored(0, "a"), Some(Value::Int(1)));
    assert_eq!(grid.stored(1, "a"), Some(Value::Int(1)));
    assert_eq!(grid.stored(2, "b"), Some(Value::Int(5)));
    assert!(grid.grid.is_quiescent());
}

#[test]
fn owners_agree_after_concurrent_commits() {
    let hot: &[u32] = &[0, 1, 2];
    let config = GridConfig::default().with_protocol(TransactionProtocol::TotalOrder);
    let grid = TestGrid::with(
        Grid::builder()
            .nodes(3)
            .config(config)
            .ownership(pinned(3, &[("hot", hot), ("warm", &[1, 2])])),
    );

    thread::scope(|s| {
        for writer in 0..3u32 {
            let grid = &grid;
            s.spawn(move || {
                let cache = grid.cache(writer);
                let session = cache.session();
                for i in 0..10i64 {
                    let value = i64::from(writer) * 100 + i;
                    cache.put(&session, "hot", value).unwrap();
                    cache.put(&session, "warm", value).unwrap();
                }
            });
        }
    });

    let hot_value = grid.stored(0, "hot");
    assert!(hot_value.is_some());
    for node in 1..3 {
        assert_eq!(grid.stored(node, "hot"), hot_value);
        assert_eq!(grid.stored_version(node, "hot"), Some(30));
    }
    assert_eq!(grid.stored(1, "warm"), grid.stored(2, "warm"));
    assert_eq!(grid.stored_version(1, "warm"), Some(30));
    assert!(grid.grid.is_quiescent());
}

#[test]
fn ordered_prepares_are_counted_once_per_owner() {
    let grid = ordered_grid(pinned(3, &[("k", &[1, 2])]));
    let transport = grid.grid.cluster().transport();
    let before = transport.messages_of(MessageKind::OrderedPrepare);

    grid.put(0, "k", "v");
    assert_eq!(transport.messages_of(MessageKind::OrderedPrepare) - before, 2);
    assert_eq!(transport.messages_of(MessageKind::Prepare), 0);
}
