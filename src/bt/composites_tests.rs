// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evloop::Scope;

use crate::bt::{async_, fork, interval, memorize, not, selector, sequence, Node, Status, Tick};
use crate::Error;

fn counting_leaf(status: Status, count: &Arc<AtomicUsize>) -> Node {
    let count = count.clone();
    Node::new(
        Tick::new(move |_scope: Option<&mut Scope>, _children: &[Node]| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(status)
        }),
        vec![],
    )
}

fn erroring_leaf() -> Node {
    Node::new(
        Tick::new(|_scope: Option<&mut Scope>, _children: &[Node]| {
            Err(Error::script("boom"))
        }),
        vec![],
    )
}

#[test]
fn sequence_semantics() {
    let count = Arc::new(AtomicUsize::new(0));
    let all_success = Node::new(
        sequence(),
        vec![
            counting_leaf(Status::Success, &count),
            counting_leaf(Status::Success, &count),
        ],
    );
    assert_eq!(all_success.tick(None).unwrap(), Status::Success);
    assert_eq!(count.load(Ordering::SeqCst), 2);

    count.store(0, Ordering::SeqCst);
    let stops_on_running = Node::new(
        sequence(),
        vec![
            counting_leaf(Status::Running, &count),
            counting_leaf(Status::Success, &count),
        ],
    );
    assert_eq!(stops_on_running.tick(None).unwrap(), Status::Running);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    count.store(0, Ordering::SeqCst);
    let fails_fast = Node::new(
        sequence(),
        vec![
            counting_leaf(Status::Failure, &count),
            counting_leaf(Status::Success, &count),
        ],
    );
    assert_eq!(fails_fast.tick(None).unwrap(), Status::Failure);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let empty = Node::new(sequence(), vec![]);
    assert_eq!(empty.tick(None).unwrap(), Status::Success);
}

#[test]
fn selector_semantics() {
    let count = Arc::new(AtomicUsize::new(0));
    let first_success = Node::new(
        selector(),
        vec![
            counting_leaf(Status::Failure, &count),
            counting_leaf(Status::Success, &count),
            counting_leaf(Status::Success, &count),
        ],
    );
    assert_eq!(first_success.tick(None).unwrap(), Status::Success);
    assert_eq!(count.load(Ordering::SeqCst), 2);

    let all_fail = Node::new(
        selector(),
        vec![
            counting_leaf(Status::Failure, &count),
            counting_leaf(Status::Failure, &count),
        ],
    );
    assert_eq!(all_fail.tick(None).unwrap(), Status::Failure);

    let empty = Node::new(selector(), vec![]);
    assert_eq!(empty.tick(None).unwrap(), Status::Failure);
}

#[test]
fn errors_propagate() {
    let count = Arc::new(AtomicUsize::new(0));
    let node = Node::new(
        sequence(),
        vec![erroring_leaf(), counting_leaf(Status::Success, &count)],
    );
    assert!(node.tick(None).is_err());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn not_inverts_terminal_statuses() {
    let count = Arc::new(AtomicUsize::new(0));
    for (inner, expected) in [
        (Status::Success, Status::Failure),
        (Status::Failure, Status::Success),
        (Status::Running, Status::Running),
    ] {
        let node = Node::new(not(sequence()), vec![counting_leaf(inner, &count)]);
        assert_eq!(node.tick(None).unwrap(), expected);
    }
}

struct Flaky {
    results: parking_lot::Mutex<Vec<Status>>,
}

fn scripted_leaf(results: Vec<Status>) -> (Node, Arc<AtomicUsize>) {
    let ticks = Arc::new(AtomicUsize::new(0));
    let flaky = Arc::new(Flaky {
        results: parking_lot::Mutex::new(results),
    });
    let count = ticks.clone();
    let node = Node::new(
        Tick::new(move |_scope: Option<&mut Scope>, _children: &[Node]| {
            count.fetch_add(1, Ordering::SeqCst);
            let mut results = flaky.results.lock();
            if results.len() > 1 {
                Ok(results.remove(0))
            } else {
                Ok(results[0])
            }
        }),
        vec![],
    );
    (node, ticks)
}

#[test]
fn memorize_skips_completed_children() {
    // First child needs two ticks; the second must not be re-ticked while the first runs, and
    // the first must not be re-ticked once it has completed.
    let (slow, slow_ticks) = scripted_leaf(vec![Status::Running, Status::Success]);
    let (fast, fast_ticks) = scripted_leaf(vec![Status::Running, Status::Success]);
    let node = Node::new(memorize(sequence()), vec![slow, fast]);

    assert_eq!(node.tick(None).unwrap(), Status::Running);
    assert_eq!(slow_ticks.load(Ordering::SeqCst), 1);
    assert_eq!(fast_ticks.load(Ordering::SeqCst), 0);

    assert_eq!(node.tick(None).unwrap(), Status::Running);
    assert_eq!(slow_ticks.load(Ordering::SeqCst), 2);
    assert_eq!(fast_ticks.load(Ordering::SeqCst), 1);

    // The first child completed; only the second is ticked now.
    assert_eq!(node.tick(None).unwrap(), Status::Success);
    assert_eq!(slow_ticks.load(Ordering::SeqCst), 2);
    assert_eq!(fast_ticks.load(Ordering::SeqCst), 2);

    // Terminal status resets the memory: the next tick starts over.
    assert_eq!(node.tick(None).unwrap(), Status::Success);
    assert_eq!(slow_ticks.load(Ordering::SeqCst), 3);
}

#[test]
fn async_wraps_a_slow_tick() {
    let slow = Tick::new(|_scope: Option<&mut Scope>, _children: &[Node]| {
        std::thread::sleep(Duration::from_millis(100));
        Ok(Status::Success)
    });
    let node = Node::new(async_(slow), vec![]);

    assert_eq!(node.tick(None).unwrap(), Status::Running);
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        match node.tick(None).unwrap() {
            Status::Running => {
                assert!(std::time::Instant::now() < deadline);
                std::thread::sleep(Duration::from_millis(10));
            }
            status => {
                assert_eq!(status, Status::Success);
                break;
            }
        }
    }
}

#[test]
fn fork_joins_children() {
    let count = Arc::new(AtomicUsize::new(0));
    let node = Node::new(
        fork(),
        vec![
            counting_leaf(Status::Success, &count),
            counting_leaf(Status::Success, &count),
            counting_leaf(Status::Success, &count),
        ],
    );
    assert_eq!(node.tick(None).unwrap(), Status::Success);
    assert_eq!(count.load(Ordering::SeqCst), 3);

    let any_failure = Node::new(
        fork(),
        vec![
            counting_leaf(Status::Success, &count),
            counting_leaf(Status::Failure, &count),
        ],
    );
    assert_eq!(any_failure.tick(None).unwrap(), Status::Failure);
}

#[test]
fn fork_memorizes_terminal_children_until_the_group_resolves() {
    let (slow, slow_ticks) = scripted_leaf(vec![Status::Running, Status::Success]);
    let (fast, fast_ticks) = scripted_leaf(vec![Status::Success]);
    let node = Node::new(fork(), vec![slow, fast]);

    assert_eq!(node.tick(None).unwrap(), Status::Running);
    assert_eq!(fast_ticks.load(Ordering::SeqCst), 1);

    assert_eq!(node.tick(None).unwrap(), Status::Success);
    assert_eq!(slow_ticks.load(Ordering::SeqCst), 2);
    // The fast child terminated in round one and was not re-ticked.
    assert_eq!(fast_ticks.load(Ordering::SeqCst), 1);
}

#[test]
fn interval_rate_limits() {
    let count = Arc::new(AtomicUsize::new(0));
    let node = Node::new(
        interval(Duration::from_millis(80)),
        vec![counting_leaf(Status::Success, &count)],
    );

    assert_eq!(node.tick(None).unwrap(), Status::Success);
    assert_eq!(node.tick(None).unwrap(), Status::Running);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(node.tick(None).unwrap(), Status::Success);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}
