// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;
use std::time::{Duration, Instant};

use latch::Latch;

use crate::{Bridge, EventLoop};

///
/// A spawned event loop with a bridge installed over it, torn down on drop.
///
pub(crate) struct Fixture {
    pub event_loop: EventLoop,
    pub bridge: Arc<Bridge>,
}

impl Fixture {
    pub(crate) fn new(name: &str) -> Fixture {
        Fixture::with_parent(name, None)
    }

    pub(crate) fn with_parent(name: &str, parent: Option<Latch>) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let event_loop = EventLoop::spawn(name).expect("failed to spawn event loop");
        let bridge =
            Bridge::new(parent, event_loop.clone(), None).expect("failed to construct bridge");
        Fixture { event_loop, bridge }
    }

    ///
    /// Evaluate an expression on the loop and report its boolean value.
    ///
    pub(crate) fn eval_bool(&self, source: &str) -> bool {
        let source = source.to_owned();
        self.bridge
            .run_on_loop_sync(move |scope| {
                scope
                    .eval("test", &source)
                    .map(|value| value.to_boolean())
                    .map_err(|e| e.to_string())
            })
            .expect("dispatch failed")
            .expect("eval failed")
    }

    ///
    /// Evaluate an expression on the loop and report its string conversion.
    ///
    pub(crate) fn eval_string(&self, source: &str) -> String {
        let source = source.to_owned();
        self.bridge
            .run_on_loop_sync(move |scope| {
                scope
                    .eval("test", &source)
                    .map_err(|e| e.to_string())
                    .and_then(|value| {
                        value
                            .to_string(scope.context)
                            .map(|s| s.to_std_string_escaped())
                            .map_err(|e| e.to_string())
                    })
            })
            .expect("dispatch failed")
            .expect("eval failed")
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.bridge.stop();
        self.event_loop.stop();
        self.event_loop.join();
    }
}

///
/// Poll `condition` every few milliseconds until it holds or the timeout elapses.
///
pub(crate) fn poll_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
