//! Write Skew Tests
//!
//! Two transactions that read the same version and both write the key: at
//! most one commits. Transactions on disjoint keys never conflict.

use crate::common::*;
use parking_lot::Mutex;
use std::sync::Barrier;
use std::thread;

fn skew_checked(protocol: TransactionProtocol) -> TestGrid {
    let config = GridConfig::default()
        .with_protocol(protocol)
        .with_write_skew_check(true);
    TestGrid::with(Grid::builder().nodes(3).config(config))
}

fn read_then_write(grid: &TestGrid, protocol: TransactionProtocol) {
    grid.put(0, "balance", 100i64);

    let a = grid.cache(1);
    let b = grid.cache(2);
    let mut sa = a.session();
    let mut sb = b.session();
    a.transaction_manager().begin(&mut sa).unwrap();
    b.transaction_manager().begin(&mut sb).unwrap();

    assert_eq!(a.get(&sa, "balance").unwrap(), Some(Value::Int(100)));
    assert_eq!(b.get(&sb, "balance").unwrap(), Some(Value::Int(100)));
    a.put(&sa, "balance", 90i64).unwrap();
    b.put(&sb, "balance", 80i64).unwrap();

    a.transaction_manager().commit(&mut sa).unwrap();
    let err = b.transaction_manager().commit(&mut sb).unwrap_err();
    match err {
        CoreError::WriteSkewDetected {
            key,
            expected,
            actual,
            ..
        } => {
            assert_eq!(key, Key::from("balance"));
            assert_eq!(expected, Some(1));
            assert_eq!(actual, Some(2));
        }
        other => panic!("{:?}: expected write skew, got {}", protocol, other),
    }

    for node in 0..3 {
        assert_eq!(grid.read(node, "balance"), Some(Value::Int(90)));
    }
    assert!(grid.grid.is_quiescent());
}

#[test]
fn second_writer_fails_two_phase() {
    let grid = skew_checked(TransactionProtocol::TwoPhase);
    read_then_write(&grid, TransactionProtocol::TwoPhase);
}

#[test]
fn second_writer_fails_total_order() {
    let grid = skew_checked(TransactionProtocol::TotalOrder);
    read_then_write(&grid, TransactionProtocol::TotalOrder);
}

#[test]
fn failed_writer_retries_successfully() {
    let grid = skew_checked(TransactionProtocol::TwoPhase);
    grid.put(0, "k", 1i64);

    let cache = grid.cache(1);
    let tm = cache.transaction_manager();
    let mut session = cache.session();
    tm.begin(&mut session).unwrap();
    cache.get(&session, "k").unwrap();
    grid.put(2, "k", 2i64);
    cache.put(&session, "k", 10i64).unwrap();

    let err = gridstore::Error::from(tm.commit(&mut session).unwrap_err());
    assert!(err.is_conflict());
    assert!(err.is_retryable());

    tm.begin(&mut session).unwrap();
    let current = cache.get(&session, "k").unwrap().and_then(|v| v.as_int());
    cache.put(&session, "k", current.unwrap_or(0) + 10).unwrap();
    tm.commit(&mut session).unwrap();
    assert_eq!(grid.read(0, "k"), Some(Value::Int(12)));
}

#[test]
fn concurrent_read_modify_write_at_most_one_commits() {
    for protocol in [TransactionProtocol::TwoPhase, TransactionProtocol::TotalOrder] {
        let grid = skew_checked(protocol);
        grid.put(0, "counter", 0i64);

        let barrier = Barrier::new(3);
        let outcomes: Mutex<Vec<std::result::Result<(), CoreError>>> = Mutex::new(Vec::new());
        thread::scope(|s| {
            for node in 0..3u32 {
                let grid = &grid;
                let barrier = &barrier;
                let outcomes = &outcomes;
                s.spawn(move || {
                    let cache = grid.cache(node);
                    let tm = cache.transaction_manager();
                    let mut session = cache.session();
                    tm.begin(&mut session).unwrap();
                    let seen = cache.get(&session, "counter").unwrap();
                    assert_eq!(seen, Some(Value::Int(0)));
                    barrier.wait();
                    cache.put(&session, "counter", i64::from(node) + 1).unwrap();
                    outcomes.lock().push(tm.commit(&mut session));
                });
            }
        });

        let outcomes = outcomes.into_inner();
        let committed = outcomes.iter().filter(|r| r.is_ok()).count();
        assert!(committed <= 1, "{:?}: {} writers committed", protocol, committed);
        for failure in outcomes.iter().filter_map(|r| r.as_ref().err()) {
            assert!(failure.is_rollback(), "{:?}: unexpected {}", protocol, failure);
        }

        let final_value = grid.read(0, "counter");
        for node in 1..3 {
            assert_eq!(grid.read(node, "counter"), final_value);
        }
        assert!(grid.grid.is_quiescent());
    }
}

#[test]
fn disjoint_keys_all_commit() {
    for protocol in [TransactionProtocol::TwoPhase, TransactionProtocol::TotalOrder] {
        let grid = skew_checked(protocol);
        for i in 0..8 {
            grid.put(0, &format!("acct:{}", i), 0i64);
        }

        let barrier = Barrier::new(8);
        thread::scope(|s| {
            for i in 0..8u32 {
                let grid = &grid;
                let barrier = &barrier;
                s.spawn(move || {
                    let cache = grid.cache(i % 3);
                    let tm = cache.transaction_manager();
                    let mut session = cache.session();
                    let key = format!("acct:{}", i);
                    tm.begin(&mut session).unwrap();
                    cache.get(&session, key.as_str()).unwrap();
                    barrier.wait();
                    cache.put(&session, key, i64::from(i)).unwrap();
                    tm.commit(&mut session).unwrap();
                });
            }
        });

        for i in 0..8 {
            assert_eq!(
                grid.read(2, &format!("acct:{}", i)),
                Some(Value::Int(i64::from(i)))
            );
        }
        assert!(grid.grid.is_quiescent());
    }
}

#[test]
fn without_skew_check_last_writer_wins() {
    let grid = TestGrid::new(3);
    grid.put(0, "k", 0i64);

    let a = grid.cache(1);
    let b = grid.cache(2);
    let mut sa = a.session();
    let mut sb = b.session();
    a.transaction_manager().begin(&mut sa).unwrap();
    b.transaction_manager().begin(&mut sb).unwrap();
    a.get(&sa, "k").unwrap();
    b.get(&sb, "k").unwrap();
    a.put(&sa, "k", 1i64).unwrap();
    b.put(&sb, "k", 2i64).unwrap();

    a.transaction_manager().commit(&mut sa).unwrap();
    b.transaction_manager().commit(&mut sb).unwrap();
    assert_eq!(grid.read(0, "k"), Some(Value::Int(2)));
}

#[test]
fn repeatable_read_pins_first_value() {
    let grid = TestGrid::new(3);
    grid.put(0, "k", "first");

    let cache = grid.cache(1);
    let mut session = cache.session();
    cache.transaction_manager().begin(&mut session).unwrap();
    assert_eq!(cache.get(&session, "k").unwrap(), Some(Value::from("first")));

    grid.put(2, "k", "second");
    assert_eq!(cache.get(&session, "k").unwrap(), Some(Value::from("first")));
    cache.transaction_manager().rollback(&mut session).unwrap();
    assert_eq!(cache.get(&session, "k").unwrap(), Some(Value::from("second")));
}

#[test]
fn read_committed_sees_latest_value() {
    let config = GridConfig::default().with_isolation(IsolationLevel::ReadCommitted);
    let grid = TestGrid::with(Grid::builder().nodes(3).config(config));
    grid.put(0, "k", "first");

    let cache = grid.cache(1);
    let mut session = cache.session();
    cache.transaction_manager().begin(&mut session).unwrap();
    assert_eq!(cache.get(&session, "k").unwrap(), Some(Value::from("first")));
    grid.put(2, "k", "second");
    assert_eq!(cache.get(&session, "k").unwrap(), Some(Value::from("second")));
    cache.transaction_manager().commit(&mut session).unwrap();
}
