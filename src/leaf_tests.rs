// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::thread;
use std::time::{Duration, Instant};

use latch::Latch;

use crate::bt::{BlockingJsLeaf, JsLeaf, Status};
use crate::testutil::Fixture;
use crate::Error;

///
/// Poll an async adapter at 5ms intervals until it reports something other than `Running`.
///
fn poll_leaf(leaf: &JsLeaf, timeout: Duration) -> Result<Status, Error> {
    let deadline = Instant::now() + timeout;
    loop {
        match leaf.tick() {
            Ok(Status::Running) => {}
            other => return other,
        }
        assert!(Instant::now() < deadline, "leaf did not settle in {timeout:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn async_success() {
    let fixture = Fixture::new("async_success");
    fixture
        .bridge
        .load_script("leaf.js", "globalThis.succ = async function () { return bt.success; };")
        .unwrap();
    let callable = fixture.bridge.get_callable("succ").unwrap();
    let leaf = JsLeaf::new(&fixture.bridge, callable, Latch::new());

    assert_eq!(leaf.tick().unwrap(), Status::Running);
    assert_eq!(poll_leaf(&leaf, Duration::from_secs(1)).unwrap(), Status::Success);
}

#[test]
fn async_failure_with_error() {
    let fixture = Fixture::new("async_failure");
    fixture
        .bridge
        .load_script(
            "leaf.js",
            "globalThis.boom = async function () { throw new Error(\"test error\"); };",
        )
        .unwrap();
    let callable = fixture.bridge.get_callable("boom").unwrap();
    let leaf = JsLeaf::new(&fixture.bridge, callable, Latch::new());

    assert_eq!(leaf.tick().unwrap(), Status::Running);
    let error = poll_leaf(&leaf, Duration::from_secs(1)).unwrap_err();
    assert!(
        error.to_string().contains("test error"),
        "unexpected error: {error}"
    );
}

#[test]
fn cancellation_during_wait() {
    let fixture = Fixture::new("async_cancel");
    fixture
        .bridge
        .load_script(
            "leaf.js",
            "globalThis.slow = async function () { \
               await new Promise((resolve) => setTimeout(resolve, 1000)); \
               return bt.success; \
             };",
        )
        .unwrap();
    let callable = fixture.bridge.get_callable("slow").unwrap();
    let cancel = Latch::new();
    let leaf = JsLeaf::new(&fixture.bridge, callable, cancel.clone());

    assert_eq!(leaf.tick().unwrap(), Status::Running);
    cancel.trigger();
    assert_eq!(leaf.tick().unwrap_err(), Error::Cancelled);
    // The state machine is back in Idle, not stuck in a zombie Running.
    assert_eq!(leaf.tick().unwrap_err(), Error::Cancelled);
}

#[test]
fn pre_cancelled_parent() {
    let fixture = Fixture::new("async_pre_cancelled");
    fixture
        .bridge
        .load_script("leaf.js", "globalThis.succ = async function () { return bt.success; };")
        .unwrap();
    let callable = fixture.bridge.get_callable("succ").unwrap();
    let cancel = Latch::new();
    cancel.trigger();
    let leaf = JsLeaf::new(&fixture.bridge, callable, cancel);

    assert_eq!(leaf.tick().unwrap_err(), Error::Cancelled);
    assert_eq!(leaf.tick().unwrap_err(), Error::Cancelled);
}

#[test]
fn stale_results_are_dropped_after_cancellation() {
    let fixture = Fixture::new("async_stale");
    fixture
        .bridge
        .load_script(
            "leaf.js",
            "globalThis.slowish = async function () { \
               await new Promise((resolve) => setTimeout(resolve, 100)); \
               return bt.success; \
             };",
        )
        .unwrap();
    let callable = fixture.bridge.get_callable("slowish").unwrap();
    let cancel = Latch::new();
    let leaf = JsLeaf::new(&fixture.bridge, callable, cancel.clone());

    assert_eq!(leaf.tick().unwrap(), Status::Running);
    cancel.trigger();
    assert_eq!(leaf.tick().unwrap_err(), Error::Cancelled);

    // Let the in-flight dispatch settle; its result must not resurrect the adapter.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(leaf.tick().unwrap_err(), Error::Cancelled);
}

#[test]
fn blocking_leaf_synchronous_off_loop() {
    let fixture = Fixture::new("blocking_sync");
    fixture
        .bridge
        .load_script("leaf.js", "globalThis.fast = function () { return bt.success; };")
        .unwrap();
    let callable = fixture.bridge.get_callable("fast").unwrap();
    let leaf = BlockingJsLeaf::new(&fixture.bridge, callable, Latch::new());

    // Off-loop channel path: the result arrives within the same tick.
    assert_eq!(leaf.tick(None).unwrap(), Status::Success);
}

#[test]
fn blocking_leaf_asynchronous_off_loop() {
    let fixture = Fixture::new("blocking_async");
    fixture
        .bridge
        .load_script(
            "leaf.js",
            "globalThis.slowOk = async function () { \
               await new Promise((resolve) => setTimeout(resolve, 20)); \
               return bt.success; \
             };",
        )
        .unwrap();
    let callable = fixture.bridge.get_callable("slowOk").unwrap();
    let leaf = BlockingJsLeaf::new(&fixture.bridge, callable, Latch::new());

    assert_eq!(leaf.tick(None).unwrap(), Status::Success);
}

#[test]
fn blocking_leaf_vs_bridge_shutdown() {
    let fixture = Fixture::new("blocking_shutdown");
    fixture
        .bridge
        .load_script(
            "leaf.js",
            "globalThis.slow = async function () { \
               await new Promise((resolve) => setTimeout(resolve, 10000)); \
               return bt.success; \
             };",
        )
        .unwrap();
    let callable = fixture.bridge.get_callable("slow").unwrap();
    let leaf = BlockingJsLeaf::new(&fixture.bridge, callable, Latch::new());
    let leaf_after_stop = leaf.clone();

    let ticking = thread::spawn(move || leaf.tick(None));
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    fixture.bridge.stop();
    let result = ticking.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    match result.unwrap_err() {
        Error::BridgeStopped | Error::LoopTerminated => {}
        other => panic!("unexpected error: {other}"),
    }

    // A tick against the already-stopped bridge fails immediately.
    assert_eq!(leaf_after_stop.tick(None).unwrap_err(), Error::LoopTerminated);

    // The loop survived the bridge; the late callback must not have broken it.
    assert!(fixture.event_loop.run_on_loop(|_scope| {}));
}

#[test]
fn blocking_leaf_caller_cancellation() {
    let fixture = Fixture::new("blocking_cancel");
    fixture
        .bridge
        .load_script(
            "leaf.js",
            "globalThis.slow = async function () { \
               await new Promise((resolve) => setTimeout(resolve, 10000)); \
               return bt.success; \
             };",
        )
        .unwrap();
    let callable = fixture.bridge.get_callable("slow").unwrap();
    let cancel = Latch::new();
    let leaf = BlockingJsLeaf::new(&fixture.bridge, callable, cancel.clone());

    let ticking = thread::spawn(move || leaf.tick(None));
    thread::sleep(Duration::from_millis(50));
    cancel.trigger();
    assert_eq!(ticking.join().unwrap().unwrap_err(), Error::Cancelled);
}
