//! Recovery Tests
//!
//! A coordinator that dies during the commit phase leaves its transaction in
//! doubt on the survivors; operators settle it by forcing a decision or by
//! learning the one a participant already applied.

use crate::common::*;

/// Node 0 coordinates; "k" lives on nodes 1 and 2
fn recovery_grid() -> TestGrid {
    recovery_grid_with(GridConfig::default())
}

fn recovery_grid_with(config: GridConfig) -> TestGrid {
    TestGrid::with(
        Grid::builder()
            .nodes(3)
            .config(config)
            .ownership(pinned(3, &[("k", &[1, 2])])),
    )
}

/// Commit "k" from node 0 and crash node 0 after `commits` delivered decisions
fn commit_then_crash(grid: &TestGrid, commits: usize) -> (TxnId, CoreError) {
    grid.grid
        .cluster()
        .transport()
        .crash_after(NodeId(0), MessageKind::Commit, commits);

    let cache = grid.cache(0);
    let tm = cache.transaction_manager();
    let mut session = cache.session();
    let txn = tm.begin(&mut session).unwrap();
    cache.put(&session, "k", "v").unwrap();
    let err = tm.commit(&mut session).unwrap_err();

    grid.grid.crash_node(0).unwrap();
    (txn, err)
}

// ============================================================================
// Partially delivered commit
// ============================================================================

#[test]
fn coordinator_crash_mid_commit_is_in_doubt() {
    let grid = recovery_grid();
    let (txn, err) = commit_then_crash(&grid, 1);
    assert!(err.is_in_doubt(), "unexpected {}", err);

    assert_eq!(grid.stored(1, "k"), Some(Value::from("v")));
    assert_eq!(grid.stored(2, "k"), None);
    assert!(grid.node(2).is_prepared(txn));

    let in_doubt = grid.grid.list_in_doubt();
    assert_eq!(in_doubt.len(), 1);
    let entry = &in_doubt[0];
    assert_eq!(entry.txn_id, txn);
    assert_eq!(entry.coordinator, NodeId(0));
    assert_eq!(entry.participants, vec![NodeId(1), NodeId(2)]);
    assert_eq!(entry.reported_by, vec![NodeId(2)]);
    assert_eq!(entry.decision, Decision::Unknown);
}

#[test]
fn force_commit_completes_in_doubt_transaction() {
    let grid = recovery_grid();
    let (txn, _) = commit_then_crash(&grid, 1);

    grid.grid.force_commit(txn).unwrap();

    assert_eq!(grid.stored(1, "k"), Some(Value::from("v")));
    assert_eq!(grid.stored(2, "k"), Some(Value::from("v")));
    assert_eq!(grid.stored_version(1, "k"), grid.stored_version(2, "k"));
    assert!(grid.grid.list_in_doubt().is_empty());
    assert!(grid.node(2).recovery_log().is_empty());
    assert!(grid.grid.is_quiescent());

    // Already resolved
    assert!(matches!(
        grid.grid.force_commit(txn),
        Err(gridstore::Error::UnknownTransaction(t)) if t == txn
    ));
    assert!(matches!(
        grid.grid.force_rollback(txn),
        Err(gridstore::Error::UnknownTransaction(_))
    ));
}

#[test]
fn resolve_from_participants_propagates_applied_commit() {
    let grid = recovery_grid();
    let (txn, _) = commit_then_crash(&grid, 1);

    assert_eq!(grid.node(1).outcome_of(txn), Some(Decision::Commit));
    assert_eq!(
        grid.grid.resolve_from_participants(txn).unwrap(),
        Some(Decision::Commit)
    );
    assert_eq!(grid.stored(2, "k"), Some(Value::from("v")));
    assert!(grid.grid.list_in_doubt().is_empty());
}

#[test]
fn force_rollback_is_operator_choice_without_recorded_decision() {
    let grid = recovery_grid();
    let (txn, _) = commit_then_crash(&grid, 1);

    // Node 2's record carries no decision, so the rollback goes through
    grid.grid.force_rollback(txn).unwrap();
    assert_eq!(grid.stored(2, "k"), None);
    assert!(!grid.node(2).is_prepared(txn));
    assert!(grid.grid.list_in_doubt().is_empty());
}

#[test]
fn total_order_partial_commit_is_never_rolled_back() {
    let grid = recovery_grid_with(
        GridConfig::default().with_protocol(TransactionProtocol::TotalOrder),
    );
    let (txn, err) = commit_then_crash(&grid, 1);
    assert!(err.is_in_doubt(), "unexpected {}", err);

    assert_eq!(grid.stored(1, "k"), Some(Value::from("v")));
    assert!(grid.node(2).is_prepared(txn));
    assert!(!grid.grid.is_quiescent());

    let in_doubt = grid.grid.list_in_doubt();
    assert_eq!(in_doubt.len(), 1);
    assert_eq!(in_doubt[0].reported_by, vec![NodeId(2)]);

    grid.grid.force_commit(txn).unwrap();
    assert_eq!(grid.stored(2, "k"), Some(Value::from("v")));
    assert_eq!(grid.stored_version(1, "k"), grid.stored_version(2, "k"));
    assert!(grid.grid.is_quiescent());

    // Node 2's ordered queue for "k" moved on
    grid.put(1, "k", "after");
    assert_eq!(grid.stored(2, "k"), Some(Value::from("after")));
}

#[test]
fn partial_commit_is_in_doubt_without_coordinator_ledger() {
    let grid = recovery_grid_with(GridConfig::default().with_recovery(false));
    let (txn, err) = commit_then_crash(&grid, 1);
    assert!(err.is_in_doubt(), "unexpected {}", err);

    // Node 2 keeps its prepared writes instead of rolling back an applied commit
    assert_eq!(grid.stored(1, "k"), Some(Value::from("v")));
    assert!(grid.node(2).is_prepared(txn));
    let in_doubt = grid.grid.list_in_doubt();
    assert_eq!(in_doubt.len(), 1);
    assert_eq!(in_doubt[0].txn_id, txn);
    assert_eq!(in_doubt[0].reported_by, vec![NodeId(2)]);

    assert_eq!(
        grid.grid.resolve_from_participants(txn).unwrap(),
        Some(Decision::Commit)
    );
    assert_eq!(grid.stored(2, "k"), Some(Value::from("v")));
    assert!(grid.grid.is_quiescent());
}

#[test]
fn undelivered_decision_is_in_doubt_without_coordinator_ledger() {
    let grid = recovery_grid_with(GridConfig::default().with_recovery(false));
    let (txn, err) = commit_then_crash(&grid, 0);
    assert!(err.is_rollback(), "unexpected {}", err);

    assert_eq!(grid.grid.list_in_doubt()[0].reported_by, vec![NodeId(1), NodeId(2)]);
    grid.grid.force_rollback(txn).unwrap();
    assert_eq!(grid.stored(1, "k"), None);
    assert_eq!(grid.stored(2, "k"), None);
    assert!(grid.grid.is_quiescent());
}

// ============================================================================
// Decision never delivered
// ============================================================================

#[test]
fn undelivered_decision_leaves_every_participant_in_doubt() {
    let grid = recovery_grid();
    let (txn, err) = commit_then_crash(&grid, 0);
    assert!(err.is_rollback(), "unexpected {}", err);

    let in_doubt = grid.grid.list_in_doubt();
    assert_eq!(in_doubt.len(), 1);
    assert_eq!(in_doubt[0].reported_by, vec![NodeId(1), NodeId(2)]);

    // Nobody applied anything, so there is nothing to learn
    assert_eq!(grid.grid.resolve_from_participants(txn).unwrap(), None);
    assert_eq!(grid.grid.list_in_doubt().len(), 1);

    grid.grid.force_rollback(txn).unwrap();
    assert_eq!(grid.stored(1, "k"), None);
    assert_eq!(grid.stored(2, "k"), None);
    assert!(grid.grid.list_in_doubt().is_empty());
    assert!(grid.grid.is_quiescent());
}

#[test]
fn force_on_unknown_transaction_fails() {
    let grid = recovery_grid();
    let ghost = TxnId::new(NodeId(0), 42);
    assert!(matches!(
        grid.grid.force_commit(ghost),
        Err(gridstore::Error::UnknownTransaction(t)) if t == ghost
    ));
    assert!(matches!(
        grid.grid.resolve_from_participants(ghost),
        Err(gridstore::Error::UnknownTransaction(_))
    ));
}

#[test]
fn completed_commit_leaves_no_records() {
    let grid = recovery_grid();
    grid.put(0, "k", "v");

    for node in 0..3 {
        assert!(grid.node(node).recovery_log().is_empty());
    }
    assert!(grid.grid.list_in_doubt().is_empty());
}

#[test]
fn participant_journal_replays_to_same_records() {
    let grid = recovery_grid();
    let (_, _) = commit_then_crash(&grid, 0);

    let node2 = grid.node(2);
    let log = node2.recovery_log();
    let replayed = gridstore::durability::RecoveryLog::import(&log.export().unwrap()).unwrap();
    assert_eq!(replayed.records(), log.records());
    assert_eq!(replayed.in_doubt().len(), 1);
}
