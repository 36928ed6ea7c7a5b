//! Lifecycle Tests
//!
//! Grid startup from code and from TOML, the process-wide manager registry,
//! and the transaction manager's begin/commit/suspend rules.

use crate::common::*;
use gridstore::engine::{create_manager, kill_manager, manager, DEFAULT_CACHE};
use std::io::Write;

// ============================================================================
// Startup and shutdown
// ============================================================================

#[test]
fn open_serves_every_node() {
    let grid = Grid::open(4).unwrap();
    assert_eq!(grid.cluster().nodes().len(), 4);
    assert_eq!(grid.cluster().name(), DEFAULT_CACHE);

    let cache = grid.cache(3).unwrap();
    cache.put(&cache.session(), "k", 1i64).unwrap();
    let reader = grid.cache(0).unwrap();
    assert_eq!(reader.get(&reader.session(), "k").unwrap(), Some(Value::Int(1)));
    grid.close();
}

#[test]
fn closed_grid_refuses_caches() {
    let grid = Grid::open(2).unwrap();
    grid.close();
    assert!(matches!(grid.cache(0), Err(gridstore::Error::Unavailable(NodeId(0)))));
    assert!(grid.cluster().live_nodes().is_empty());
}

#[test]
fn unknown_node_is_rejected() {
    let grid = Grid::open(2).unwrap();
    assert!(grid.cache(7).is_err());
    assert!(grid.crash_node(7).is_err());
}

#[test]
fn invalid_configuration_fails_to_open() {
    let config = GridConfig::default()
        .with_isolation(IsolationLevel::ReadCommitted)
        .with_write_skew_check(true);
    let err = Grid::builder().config(config).open().unwrap_err();
    assert!(matches!(err, gridstore::Error::Config(_)));
}

#[test]
fn configuration_loads_from_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "invocation_batching = true\n\n[transaction]\nprotocol = \"total_order\"\n\n[locking]\nwrite_skew_check = true\n\n[clustering]\nnum_owners = 3"
    )
    .unwrap();

    let grid = TestGrid::with(Grid::builder().nodes(3).config_file(file.path()).unwrap());
    let config = grid.grid.cluster().config();
    assert_eq!(config.transaction.protocol, TransactionProtocol::TotalOrder);
    assert!(config.locking.write_skew_check);
    assert!(config.invocation_batching);
    assert_eq!(config.clustering.num_owners, 3);

    // Every node owns every key
    grid.put(0, "k", "v");
    for node in 0..3 {
        assert_eq!(grid.stored(node, "k"), Some(Value::from("v")));
    }
}

#[test]
fn malformed_configuration_file_is_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[transaction]\nprotocol = \"three_phase\"").unwrap();
    let err = Grid::builder().config_file(file.path()).unwrap_err();
    assert!(matches!(err, gridstore::Error::Config(_)));

    let missing = Grid::builder().config_file("/definitely/not/here.toml");
    assert!(missing.is_err());
}

// ============================================================================
// Manager registry
// ============================================================================

#[test]
fn managers_are_registered_until_killed() {
    let first = create_manager(GridConfig::default(), 2).unwrap();
    let second = create_manager(GridConfig::default(), 2).unwrap();
    assert_ne!(first.id(), second.id());
    assert!(manager(first.id()).is_some());

    let cache = first.get_cache("orders", 1).unwrap();
    cache.put(&cache.session(), "o-1", "open").unwrap();
    assert_eq!(first.cache_names(), vec!["orders".to_string()]);
    assert!(second.cache_names().is_empty());

    assert!(kill_manager(first.id()));
    assert!(!kill_manager(first.id()));
    assert!(manager(first.id()).is_none());
    assert!(!first.is_running());
    assert!(first.get_cache("orders", 0).is_err());

    assert!(second.is_running());
    assert!(kill_manager(second.id()));
}

#[test]
fn named_caches_keep_their_own_configuration() {
    let manager = create_manager(GridConfig::default(), 3).unwrap();
    manager
        .define_configuration("batched", GridConfig::default().with_invocation_batching(true))
        .unwrap();

    let batched = manager.get_cache("batched", 0).unwrap();
    let mut session = batched.session();
    assert!(batched.start_batch(&mut session).unwrap());
    batched.put(&session, "k", "v").unwrap();
    batched.end_batch(&mut session, true).unwrap();

    let plain = manager.get_cache("plain", 0).unwrap();
    let mut session = plain.session();
    assert!(plain.start_batch(&mut session).is_err());
    assert_eq!(plain.get(&session, "k").unwrap(), None);

    // Too late once the cache runs
    assert!(manager
        .define_configuration("batched", GridConfig::default())
        .is_err());
    kill_manager(manager.id());
}

// ============================================================================
// Transaction manager
// ============================================================================

#[test]
fn status_follows_the_transaction() {
    let grid = TestGrid::new(3);
    let cache = grid.cache(0);
    let tm = cache.transaction_manager();
    let mut session = cache.session();

    assert_eq!(cache.transaction_status(&session), None);
    let txn = tm.begin(&mut session).unwrap();
    assert_eq!(tm.get_transaction(&session), Some(txn));
    assert_eq!(tm.status(txn), Some(TransactionStatus::Active));
    assert_eq!(cache.transaction_status(&session), Some(TransactionStatus::Active));

    cache.put(&session, "k", "v").unwrap();
    tm.commit(&mut session).unwrap();
    assert_eq!(tm.get_transaction(&session), None);
    assert_eq!(tm.status(txn), None);
    assert!(grid.grid.is_quiescent());
}

#[test]
fn misuse_is_a_lifecycle_error() {
    let grid = TestGrid::new(3);
    let cache = grid.cache(0);
    let tm = cache.transaction_manager();
    let mut session = cache.session();

    let err = gridstore::Error::from(tm.commit(&mut session).unwrap_err());
    assert!(matches!(err, gridstore::Error::Lifecycle(_)));
    assert!(!err.is_retryable());

    tm.begin(&mut session).unwrap();
    let err = gridstore::Error::from(tm.begin(&mut session).unwrap_err());
    assert!(matches!(err, gridstore::Error::Lifecycle(_)));
    tm.rollback(&mut session).unwrap();
    assert!(tm.rollback(&mut session).is_err());
}

#[test]
fn rollback_discards_buffered_writes() {
    let grid = TestGrid::new(3);
    let cache = grid.cache(1);
    let tm = cache.transaction_manager();
    let mut session = cache.session();

    tm.begin(&mut session).unwrap();
    cache.put(&session, "k", "v").unwrap();
    assert_eq!(cache.get(&session, "k").unwrap(), Some(Value::from("v")));
    tm.rollback(&mut session).unwrap();

    for node in 0..3 {
        assert_eq!(grid.read(node, "k"), None);
    }
    assert!(grid.grid.is_quiescent());
}

#[test]
fn suspended_transaction_keeps_its_writes() {
    let grid = TestGrid::new(3);
    let cache = grid.cache(0);
    let tm = cache.transaction_manager();
    let mut session = cache.session();

    let txn = tm.begin(&mut session).unwrap();
    cache.put(&session, "a", 1i64).unwrap();
    let suspended = tm.suspend(&mut session).unwrap();
    assert_eq!(suspended.txn_id(), txn);

    // Unbound: reads committed state and writes auto-commit
    assert_eq!(cache.get(&session, "a").unwrap(), None);
    cache.put(&session, "b", 2i64).unwrap();
    assert_eq!(grid.read(2, "b"), Some(Value::Int(2)));

    tm.resume(&mut session, suspended).unwrap();
    assert_eq!(cache.get(&session, "a").unwrap(), Some(Value::Int(1)));
    tm.commit(&mut session).unwrap();
    assert_eq!(grid.read(2, "a"), Some(Value::Int(1)));
}

#[test]
fn suspended_transaction_moves_between_sessions() {
    let grid = TestGrid::new(3);
    let cache = grid.cache(0);
    let tm = cache.transaction_manager();
    let mut first = cache.session();
    let mut second = cache.session();

    let txn = tm.begin(&mut first).unwrap();
    cache.put(&first, "k", "v").unwrap();
    let suspended = tm.suspend(&mut first).unwrap();

    tm.resume(&mut second, suspended).unwrap();
    assert_eq!(tm.get_transaction(&second), Some(txn));
    assert_eq!(tm.get_transaction(&first), None);
    tm.commit(&mut second).unwrap();
    assert_eq!(grid.read(1, "k"), Some(Value::from("v")));
}

#[test]
fn applied_outcomes_stay_within_history() {
    let grid = TestGrid::with(
        Grid::builder()
            .nodes(3)
            .config(GridConfig::default().with_outcome_history(8))
            .ownership(pinned(3, &[("k", &[1, 2])])),
    );
    for n in 0..50i64 {
        grid.put(0, "k", n);
    }

    assert_eq!(grid.node(1).outcomes().len(), 8);
    assert_eq!(grid.node(2).outcomes().len(), 8);
    assert_eq!(grid.read(2, "k"), Some(Value::Int(49)));
    assert!(grid.grid.is_quiescent());
}

#[test]
fn sessions_are_bound_to_their_node() {
    let grid = TestGrid::new(3);
    let local = grid.cache(0);
    let remote = grid.cache(1);
    let mut session = local.session();

    let err = remote.transaction_manager().begin(&mut session).unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation(_)));
    assert!(remote.put(&session, "k", "v").is_err());
    assert_eq!(grid.read(0, "k"), None);
}
