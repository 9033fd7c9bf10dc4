// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::Latch;

use std::thread;
use std::time::Duration;

#[test]
fn basic() {
    let latch = Latch::new();

    let join = thread::spawn({
        let latch = latch.clone();
        move || latch.triggered()
    });

    // Ensure that `triggered` doesn't return until `trigger` has been called.
    thread::sleep(Duration::from_millis(200));
    assert!(!join.is_finished());
    assert!(!latch.poll_triggered());

    latch.trigger();
    join.join().unwrap();
    assert!(latch.poll_triggered());

    // And that calling `trigger` again is harmless.
    latch.trigger();
    assert!(latch.poll_triggered());
}

#[test]
fn triggered_timeout() {
    let latch = Latch::new();
    assert!(!latch.triggered_timeout(Duration::from_millis(10)));

    latch.trigger();
    assert!(latch.triggered_timeout(Duration::from_millis(10)));
}

#[test]
fn observer_select() {
    let latch = Latch::new();
    let observer = latch.observer();

    let join = thread::spawn(move || {
        crossbeam_channel::select! {
          recv(observer) -> res => res.is_err(),
        }
    });

    latch.trigger();
    assert!(join.join().unwrap());
}

#[test]
fn already_triggered() {
    let latch = Latch::new();
    latch.trigger();

    // A latch observed after triggering releases waiters immediately.
    latch.triggered();
    assert!(latch.poll_triggered());
}
