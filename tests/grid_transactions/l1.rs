//! L1 Near-Cache Tests
//!
//! Non-owners keep copies of remote keys they read; owners invalidate those
//! copies when a commit changes the key.

use crate::common::*;

fn grid_with_l1(l1: bool) -> TestGrid {
    let config = GridConfig::default().with_l1(l1);
    TestGrid::with(
        Grid::builder()
            .nodes(3)
            .config(config)
            .ownership(pinned(3, &[("k", &[0, 1])])),
    )
}

#[test]
fn remote_read_fills_near_cache() {
    let grid = grid_with_l1(true);
    grid.put(0, "k", "v1");

    assert_eq!(grid.read(2, "k"), Some(Value::from("v1")));
    assert!(grid.node(2).near_cache().contains(&Key::from("k")));
    assert_eq!(
        grid.node(0).l1_directory().requestors(&Key::from("k")),
        vec![NodeId(2)]
    );

    // Owners never cache their own keys
    grid.read(1, "k");
    assert!(grid.node(1).near_cache().is_empty());
}

#[test]
fn commit_invalidates_requestor_copies() {
    let grid = grid_with_l1(true);
    grid.put(0, "k", "v1");
    grid.read(2, "k");
    assert!(grid.node(2).near_cache().contains(&Key::from("k")));

    grid.put(1, "k", "v2");
    assert!(!grid.node(2).near_cache().contains(&Key::from("k")));
    assert!(grid.node(0).l1_directory().requestors(&Key::from("k")).is_empty());
    assert_eq!(grid.read(2, "k"), Some(Value::from("v2")));
}

#[test]
fn crashed_owner_copies_are_dropped() {
    let grid = grid_with_l1(true);
    grid.put(1, "k", "v1");
    assert_eq!(grid.read(2, "k"), Some(Value::from("v1")));
    assert!(grid.node(2).near_cache().contains(&Key::from("k")));

    // Node 0 held the only registration for node 2's copy
    grid.grid.crash_node(0).unwrap();
    assert!(!grid.node(2).near_cache().contains(&Key::from("k")));

    grid.put(1, "k", "v2");
    assert_eq!(grid.read(2, "k"), Some(Value::from("v2")));
    assert_eq!(
        grid.node(1).l1_directory().requestors(&Key::from("k")),
        vec![NodeId(2)]
    );

    // The surviving owner now invalidates it
    grid.put(1, "k", "v3");
    assert_eq!(grid.read(2, "k"), Some(Value::from("v3")));
}

#[test]
fn removal_invalidates_requestor_copies() {
    let grid = grid_with_l1(true);
    grid.put(0, "k", "v1");
    grid.read(2, "k");

    let cache = grid.cache(0);
    cache.remove(&cache.session(), "k").unwrap();
    assert!(!grid.node(2).near_cache().contains(&Key::from("k")));
    assert_eq!(grid.read(2, "k"), None);
}

#[test]
fn writer_on_non_owner_sees_its_commit() {
    let grid = grid_with_l1(true);
    grid.put(2, "k", "v1");
    assert_eq!(grid.read(2, "k"), Some(Value::from("v1")));

    // Node 2 committed the change itself and holds a stale copy otherwise
    grid.put(2, "k", "v2");
    assert_eq!(grid.read(2, "k"), Some(Value::from("v2")));
}

#[test]
fn disabled_l1_never_caches() {
    let grid = grid_with_l1(false);
    grid.put(0, "k", "v1");

    assert_eq!(grid.read(2, "k"), Some(Value::from("v1")));
    assert!(grid.node(2).near_cache().is_empty());
    assert!(grid.node(0).l1_directory().is_empty());
}

#[test]
fn crashed_requestor_is_forgotten() {
    let grid = grid_with_l1(true);
    grid.put(0, "k", "v1");
    grid.read(2, "k");

    grid.grid.crash_node(2).unwrap();
    assert!(grid.node(0).l1_directory().is_empty());
    assert!(grid.node(1).l1_directory().is_empty());

    grid.put(0, "k", "v2");
    assert_eq!(grid.read(1, "k"), Some(Value::from("v2")));
}
