//! Invocation Batching Tests
//!
//! Batches started over an external transaction, batches that own their
//! transaction, and the no-op cases of `end_batch`.

use crate::common::*;

fn batching_grid() -> TestGrid {
    TestGrid::with(Grid::builder().nodes(3).invocation_batching())
}

// ============================================================================
// Batch joined to an external transaction
// ============================================================================

#[test]
fn batch_inside_external_transaction_commits_with_it() {
    let grid = batching_grid();
    let cache = grid.cache(0);
    let tm = cache.transaction_manager();
    let mut session = cache.session();

    tm.begin(&mut session).unwrap();
    cache.put(&session, "k", "v").unwrap();
    assert!(cache.start_batch(&mut session).unwrap());
    cache.put(&session, "k2", "v2").unwrap();
    tm.commit(&mut session).unwrap();

    for node in 0..3 {
        assert_eq!(grid.read(node, "k"), Some(Value::from("v")));
        assert_eq!(grid.read(node, "k2"), Some(Value::from("v2")));
    }

    // The batch joined; ending it does not touch what the TM committed
    cache.end_batch(&mut session, false).unwrap();
    assert_eq!(grid.read(1, "k"), Some(Value::from("v")));
    assert_eq!(grid.read(2, "k2"), Some(Value::from("v2")));
    assert!(grid.grid.is_quiescent());
}

#[test]
fn end_batch_leaves_external_transaction_running() {
    let grid = batching_grid();
    let cache = grid.cache(1);
    let tm = cache.transaction_manager();
    let mut session = cache.session();

    let txn = tm.begin(&mut session).unwrap();
    cache.start_batch(&mut session).unwrap();
    cache.put(&session, "k", 1i64).unwrap();
    cache.end_batch(&mut session, true).unwrap();

    assert_eq!(tm.get_transaction(&session), Some(txn));
    assert_eq!(tm.status(txn), Some(TransactionStatus::Active));
    assert_eq!(grid.read(0, "k"), None);

    tm.rollback(&mut session).unwrap();
    assert_eq!(grid.read(0, "k"), None);
    assert!(grid.grid.is_quiescent());
}

// ============================================================================
// Batch owning its transaction
// ============================================================================

#[test]
fn batch_without_transaction_manager_commits_at_end() {
    let grid = batching_grid();
    let cache = grid.cache(0);
    let mut session = cache.session();

    assert!(cache.start_batch(&mut session).unwrap());
    cache.put(&session, "k", "v").unwrap();
    cache.put(&session, "k2", "v2").unwrap();

    // Concurrent readers see neither key
    for node in 0..3 {
        assert_eq!(grid.read(node, "k"), None);
        assert_eq!(grid.read(node, "k2"), None);
    }

    // The TM did not begin this transaction and refuses to commit it
    let misuse = cache.transaction_manager().commit(&mut session);
    assert!(matches!(misuse, Err(CoreError::NoActiveTransaction)));
    assert_eq!(grid.read(1, "k"), None);

    cache.end_batch(&mut session, true).unwrap();
    for node in 0..3 {
        assert_eq!(grid.read(node, "k"), Some(Value::from("v")));
        assert_eq!(grid.read(node, "k2"), Some(Value::from("v2")));
    }
    assert!(grid.grid.is_quiescent());
}

#[test]
fn batch_rolled_back_is_never_visible() {
    let grid = batching_grid();
    let cache = grid.cache(2);
    let mut session = cache.session();

    cache.start_batch(&mut session).unwrap();
    cache.put(&session, "k", "v").unwrap();
    cache.put(&session, "k2", "v2").unwrap();
    assert_eq!(grid.read(0, "k"), None);
    cache.end_batch(&mut session, false).unwrap();

    for node in 0..3 {
        assert_eq!(grid.read(node, "k"), None);
        assert_eq!(grid.read(node, "k2"), None);
        assert!(grid.node(node).store().is_empty());
    }
    assert!(grid.grid.is_quiescent());
}

#[test]
fn batch_reads_its_own_writes() {
    let grid = batching_grid();
    let cache = grid.cache(0);
    let mut session = cache.session();

    cache.start_batch(&mut session).unwrap();
    cache.put(&session, "k", 7i64).unwrap();
    assert_eq!(cache.get(&session, "k").unwrap(), Some(Value::Int(7)));
    cache.remove(&session, "k").unwrap();
    assert_eq!(cache.get(&session, "k").unwrap(), None);
    cache.end_batch(&mut session, true).unwrap();
    assert_eq!(grid.read(1, "k"), None);
}

#[test]
fn failed_batch_commit_surfaces_at_end_batch() {
    let grid = TestGrid::with(
        Grid::builder()
            .nodes(3)
            .invocation_batching()
            .write_skew_check(),
    );
    grid.put(0, "k", 1i64);

    let cache = grid.cache(1);
    let mut session = cache.session();
    cache.start_batch(&mut session).unwrap();
    assert_eq!(cache.get(&session, "k").unwrap(), Some(Value::Int(1)));

    grid.put(2, "k", 2i64);

    cache.put(&session, "k", 3i64).unwrap();
    let err = cache.end_batch(&mut session, true).unwrap_err();
    assert!(matches!(err, CoreError::WriteSkewDetected { .. }));
    assert!(!session.in_batch());
    assert_eq!(grid.read(0, "k"), Some(Value::Int(2)));
}

// ============================================================================
// No-op and misuse
// ============================================================================

#[test]
fn end_batch_without_batch_is_noop() {
    let grid = batching_grid();
    let cache = grid.cache(0);
    let mut session = cache.session();

    cache.end_batch(&mut session, true).unwrap();
    cache.end_batch(&mut session, false).unwrap();
    assert!(grid.grid.is_quiescent());
}

#[test]
fn nested_start_batch_is_noop() {
    let grid = batching_grid();
    let cache = grid.cache(0);
    let mut session = cache.session();

    assert!(cache.start_batch(&mut session).unwrap());
    assert!(!cache.start_batch(&mut session).unwrap());
    cache.put(&session, "k", "v").unwrap();
    cache.end_batch(&mut session, true).unwrap();

    // A second end has no batch left to end
    cache.end_batch(&mut session, false).unwrap();
    assert_eq!(grid.read(2, "k"), Some(Value::from("v")));
}

#[test]
fn begin_inside_owned_batch_rejected() {
    let grid = batching_grid();
    let cache = grid.cache(0);
    let mut session = cache.session();

    cache.start_batch(&mut session).unwrap();
    let owned = session.current().unwrap();
    let err = cache.transaction_manager().begin(&mut session).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyActive(t) if t == owned));
    cache.end_batch(&mut session, false).unwrap();
}

#[test]
fn start_batch_requires_batching() {
    let grid = TestGrid::new(2);
    let cache = grid.cache(0);
    let mut session = cache.session();

    assert!(matches!(
        cache.start_batch(&mut session),
        Err(CoreError::InvalidOperation(_))
    ));

    let txn = cache.transaction_manager().begin(&mut session).unwrap();
    assert!(matches!(
        cache.start_batch(&mut session),
        Err(CoreError::AlreadyActive(t)) if t == txn
    ));
}
