// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use latch::Latch;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::bt::{Node, Status};
use crate::Error;

///
/// Drives a node to completion by ticking it on a fixed period from a dedicated thread. The
/// ticker itself never executes script code: script work reaches the event loop only through the
/// leaf adapters invoked by the node's tick, which is what makes tickers the safe way to drive
/// trees without deadlocking the single event-loop worker.
///
/// Termination:
///   * a tick error terminates the ticker and is reported by `err`,
///   * `Success` terminates cleanly,
///   * `Failure` terminates (without an error) only when `stop_on_failure` is set; otherwise the
///     ticker keeps ticking, which is what lets a plan retry after a transient failure,
///   * `stop`, or the parent latch closing, terminates without ticking again.
///
#[derive(Clone)]
pub struct Ticker {
    inner: Arc<TickerInner>,
}

struct TickerInner {
    done: Latch,
    stop: Latch,
    err: Mutex<Option<Error>>,
    last_status: Mutex<Option<Status>>,
}

impl Ticker {
    pub fn new(
        parent: Option<Latch>,
        period: Duration,
        node: Node,
        stop_on_failure: bool,
    ) -> Ticker {
        let inner = Arc::new(TickerInner {
            done: Latch::new(),
            stop: Latch::new(),
            err: Mutex::new(None),
            last_status: Mutex::new(None),
        });

        let run = {
            let inner = inner.clone();
            move || {
                let stop_observer = inner.stop.observer();
                let parent_observer = parent
                    .as_ref()
                    .map(|p| p.observer())
                    .unwrap_or_else(crossbeam_channel::never);
                loop {
                    crossbeam_channel::select! {
                        recv(stop_observer) -> _ => break,
                        recv(parent_observer) -> _ => break,
                        default(period) => {}
                    }
                    match node.tick(None) {
                        Err(e) => {
                            debug!("ticker terminating on error: {e}");
                            *inner.err.lock() = Some(e);
                            break;
                        }
                        Ok(status) => {
                            *inner.last_status.lock() = Some(status);
                            match status {
                                Status::Running => {}
                                Status::Success => break,
                                Status::Failure if stop_on_failure => break,
                                Status::Failure => {}
                            }
                        }
                    }
                }
                inner.done.trigger();
            }
        };
        if let Err(e) = thread::Builder::new().name("bt-ticker".to_owned()).spawn(run) {
            warn!("failed to spawn ticker thread: {e}");
            *inner.err.lock() = Some(Error::script(format!("failed to spawn ticker: {e}")));
            inner.done.trigger();
        }

        Ticker { inner }
    }

    ///
    /// A latch that triggers when the ticker has terminated.
    ///
    pub fn done(&self) -> Latch {
        self.inner.done.clone()
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.poll_triggered()
    }

    ///
    /// Block until the ticker has terminated.
    ///
    pub fn wait(&self) {
        self.inner.done.triggered();
    }

    ///
    /// The terminal error, if the ticker stopped because a tick errored.
    ///
    pub fn err(&self) -> Option<Error> {
        self.inner.err.lock().clone()
    }

    ///
    /// The status of the most recent completed tick.
    ///
    pub fn last_status(&self) -> Option<Status> {
        *self.inner.last_status.lock()
    }

    ///
    /// Request termination. Idempotent; does not wait for the ticker thread.
    ///
    pub fn stop(&self) {
        self.inner.stop.trigger();
    }
}

///
/// Aggregates tickers: `done` triggers once every ticker registered so far has terminated, and
/// `stop` fans out to all of them. Tickers created via the script module surface are registered
/// with the bridge's manager so that bridge shutdown stops them.
///
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    state: Mutex<ManagerState>,
    done: Latch,
}

#[derive(Default)]
struct ManagerState {
    active: usize,
    stopped: bool,
    err: Option<Error>,
    tickers: Vec<Ticker>,
}

impl Manager {
    pub fn new() -> Manager {
        Manager {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ManagerState::default()),
                done: Latch::new(),
            }),
        }
    }

    pub fn add(&self, ticker: Ticker) {
        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                ticker.stop();
            }
            state.active += 1;
            state.tickers.push(ticker.clone());
        }

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("bt-manager-watch".to_owned())
            .spawn(move || {
                ticker.wait();
                let mut state = inner.state.lock();
                state.active -= 1;
                if state.err.is_none() {
                    state.err = ticker.err();
                }
                if state.active == 0 {
                    // The first full drain closes the latch; tickers added afterward are still
                    // stopped by `stop`, but no longer gate `done`.
                    inner.done.trigger();
                }
            });
        if let Err(e) = spawned {
            warn!("failed to spawn manager watcher: {e}");
        }
    }

    ///
    /// A latch that triggers when all registered tickers have terminated.
    ///
    pub fn done(&self) -> Latch {
        self.inner.done.clone()
    }

    ///
    /// The first terminal error reported by any registered ticker.
    ///
    pub fn err(&self) -> Option<Error> {
        self.inner.state.lock().err.clone()
    }

    ///
    /// Stop every registered ticker (and any registered later). Idempotent; does not wait.
    ///
    pub fn stop(&self) {
        let tickers = {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            state.tickers.clone()
        };
        for ticker in tickers {
            ticker.stop();
        }
    }
}
