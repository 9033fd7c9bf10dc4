// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evloop::Scope;
use latch::Latch;

use crate::bt::{Manager, Node, Status, Tick, Ticker};
use crate::Error;

fn leaf(results: Vec<Result<Status, Error>>) -> (Node, Arc<AtomicUsize>) {
    let ticks = Arc::new(AtomicUsize::new(0));
    let state = Arc::new(parking_lot::Mutex::new(results));
    let count = ticks.clone();
    let node = Node::new(
        Tick::new(move |_scope: Option<&mut Scope>, _children: &[Node]| {
            count.fetch_add(1, Ordering::SeqCst);
            let mut results = state.lock();
            if results.len() > 1 {
                results.remove(0)
            } else {
                results[0].clone()
            }
        }),
        vec![],
    );
    (node, ticks)
}

#[test]
fn ticker_completes_on_success() {
    let (node, ticks) = leaf(vec![
        Ok(Status::Running),
        Ok(Status::Running),
        Ok(Status::Success),
    ]);
    let ticker = Ticker::new(None, Duration::from_millis(5), node, false);

    assert!(ticker.done().triggered_timeout(Duration::from_secs(2)));
    assert!(ticker.is_done());
    assert_eq!(ticker.err(), None);
    assert_eq!(ticker.last_status(), Some(Status::Success));
    assert!(ticks.load(Ordering::SeqCst) >= 3);
}

#[test]
fn ticker_reports_terminal_errors() {
    let (node, _ticks) = leaf(vec![Ok(Status::Running), Err(Error::script("exploded"))]);
    let ticker = Ticker::new(None, Duration::from_millis(5), node, false);

    assert!(ticker.done().triggered_timeout(Duration::from_secs(2)));
    assert_eq!(ticker.err(), Some(Error::Script("exploded".to_owned())));
}

#[test]
fn ticker_keeps_retrying_failure_by_default() {
    let (node, ticks) = leaf(vec![Ok(Status::Failure)]);
    let ticker = Ticker::new(None, Duration::from_millis(5), node, false);

    assert!(!ticker.done().triggered_timeout(Duration::from_millis(100)));
    assert!(ticks.load(Ordering::SeqCst) >= 2);
    ticker.stop();
    assert!(ticker.done().triggered_timeout(Duration::from_secs(2)));
    assert_eq!(ticker.err(), None);
}

#[test]
fn ticker_stops_on_failure_when_asked() {
    let (node, ticks) = leaf(vec![Ok(Status::Failure)]);
    let ticker = Ticker::new(None, Duration::from_millis(5), node, true);

    assert!(ticker.done().triggered_timeout(Duration::from_secs(2)));
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
    assert_eq!(ticker.last_status(), Some(Status::Failure));
}

#[test]
fn ticker_stop_is_idempotent_and_prompt() {
    let (node, _ticks) = leaf(vec![Ok(Status::Running)]);
    let ticker = Ticker::new(None, Duration::from_millis(5), node, false);

    ticker.stop();
    ticker.stop();
    assert!(ticker.done().triggered_timeout(Duration::from_secs(2)));
}

#[test]
fn parent_latch_stops_the_ticker() {
    let parent = Latch::new();
    let (node, _ticks) = leaf(vec![Ok(Status::Running)]);
    let ticker = Ticker::new(Some(parent.clone()), Duration::from_millis(5), node, false);

    assert!(!ticker.is_done());
    parent.trigger();
    assert!(ticker.done().triggered_timeout(Duration::from_secs(2)));
}

#[test]
fn manager_tracks_registered_tickers() {
    let manager = Manager::new();
    let (fast, _) = leaf(vec![Ok(Status::Success)]);
    let (slow, _) = leaf(vec![
        Ok(Status::Running),
        Ok(Status::Running),
        Ok(Status::Success),
    ]);
    manager.add(Ticker::new(None, Duration::from_millis(5), fast, false));
    manager.add(Ticker::new(None, Duration::from_millis(5), slow, false));

    assert!(manager.done().triggered_timeout(Duration::from_secs(2)));
    assert_eq!(manager.err(), None);
}

#[test]
fn manager_stop_fans_out() {
    let manager = Manager::new();
    let (endless, _) = leaf(vec![Ok(Status::Running)]);
    let ticker = Ticker::new(None, Duration::from_millis(5), endless, false);
    manager.add(ticker.clone());

    manager.stop();
    assert!(ticker.done().triggered_timeout(Duration::from_secs(2)));
    assert!(manager.done().triggered_timeout(Duration::from_secs(2)));

    // Tickers added after stop are stopped immediately.
    let (late, _) = leaf(vec![Ok(Status::Running)]);
    let late_ticker = Ticker::new(None, Duration::from_millis(5), late, false);
    manager.add(late_ticker.clone());
    assert!(late_ticker.done().triggered_timeout(Duration::from_secs(2)));
}

#[test]
fn manager_records_the_first_error() {
    let manager = Manager::new();
    let (bad, _) = leaf(vec![Err(Error::script("bad tick"))]);
    manager.add(Ticker::new(None, Duration::from_millis(5), bad, false));

    assert!(manager.done().triggered_timeout(Duration::from_secs(2)));
    assert_eq!(manager.err(), Some(Error::Script("bad tick".to_owned())));
}
