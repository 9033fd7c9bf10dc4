// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Arc, Weak};

use evloop::{Scope, ScriptHandle};
use latch::Latch;
use parking_lot::Mutex;

use crate::bt::run_leaf::{self, CtxFetcher, Deliver};
use crate::bt::{Node, Status, Tick, TickResult};
use crate::{Bridge, Error};

#[derive(Debug)]
enum LeafState {
    Idle,
    Running,
    Completed(Status, Option<Error>),
}

struct Machine {
    state: LeafState,
    // Issued on every Idle -> Running transition; a result callback whose generation no longer
    // matches is dropped silently.
    generation: u64,
}

struct LeafInner {
    bridge: Weak<Bridge>,
    cancel: Latch,
    callable: ScriptHandle,
    ctx_fetcher: CtxFetcher,
    args: Vec<ScriptHandle>,
    machine: Mutex<Machine>,
}

///
/// Exposes a possibly-thenable script leaf as a synchronous-tick node. `tick` never blocks on
/// script work: from `Idle` it dispatches the leaf to the event loop and reports `Running`; the
/// only way to observe completion is a subsequent tick.
///
/// Cancellation flows from the single parent latch passed at construction; no per-invocation
/// child token is derived, so high-churn use cannot grow a parent's child registry.
///
#[derive(Clone)]
pub struct JsLeaf {
    inner: Arc<LeafInner>,
}

impl JsLeaf {
    pub fn new(bridge: &Arc<Bridge>, callable: ScriptHandle, cancel: Latch) -> JsLeaf {
        JsLeaf::with_args(bridge, callable, cancel, Vec::new())
    }

    pub fn with_args(
        bridge: &Arc<Bridge>,
        callable: ScriptHandle,
        cancel: Latch,
        args: Vec<ScriptHandle>,
    ) -> JsLeaf {
        JsLeaf {
            inner: Arc::new(LeafInner {
                bridge: Arc::downgrade(bridge),
                cancel,
                callable,
                ctx_fetcher: run_leaf::default_ctx_fetcher(bridge),
                args,
                machine: Mutex::new(Machine {
                    state: LeafState::Idle,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn into_node(self) -> Node {
        Node::new(
            Tick::new(move |_scope: Option<&mut Scope>, _children: &[Node]| self.tick()),
            vec![],
        )
    }

    pub fn tick(&self) -> TickResult {
        let inner = &self.inner;

        if inner.cancel.poll_triggered() {
            // Bump the generation before resetting, so the next cancelled callback is by
            // construction stale.
            let mut machine = inner.machine.lock();
            if matches!(machine.state, LeafState::Running) {
                machine.generation += 1;
            }
            machine.state = LeafState::Idle;
            return Err(Error::Cancelled);
        }

        let generation = {
            let mut machine = inner.machine.lock();
            match std::mem::replace(&mut machine.state, LeafState::Idle) {
                LeafState::Completed(status, err) => {
                    return match err {
                        Some(e) => Err(e),
                        None => Ok(status),
                    };
                }
                LeafState::Running => {
                    machine.state = LeafState::Running;
                    return Ok(Status::Running);
                }
                LeafState::Idle => {
                    machine.generation += 1;
                    machine.state = LeafState::Running;
                    machine.generation
                }
            }
        };

        // There is a race window between the unlock above and the dispatch below; a cancellation
        // that lands in it must not leave a live dispatch behind.
        if inner.cancel.poll_triggered() {
            let mut machine = inner.machine.lock();
            machine.generation += 1;
            machine.state = LeafState::Idle;
            return Err(Error::Cancelled);
        }

        let Some(bridge) = inner.bridge.upgrade() else {
            complete(inner, generation, Status::Failure, Some(Error::LoopTerminated));
            return Ok(Status::Running);
        };

        let accepted = bridge.run_on_loop({
            let inner = inner.clone();
            move |scope| {
                let deliver: Deliver = {
                    let inner = inner.clone();
                    Rc::new(move |status, err| complete(&inner, generation, status, err))
                };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_leaf::invoke(
                        scope,
                        &inner.callable,
                        &inner.ctx_fetcher,
                        &inner.args,
                        deliver,
                    );
                }));
                if outcome.is_err() {
                    complete(&inner, generation, Status::Failure, Some(Error::LeafPanic));
                }
            }
        });
        if !accepted {
            complete(inner, generation, Status::Failure, Some(Error::LoopTerminated));
        }
        Ok(Status::Running)
    }
}

///
/// Record a leaf result, unless the dispatch that produced it has been invalidated.
///
fn complete(inner: &Arc<LeafInner>, generation: u64, status: Status, err: Option<Error>) {
    let mut machine = inner.machine.lock();
    if machine.generation == generation && matches!(machine.state, LeafState::Running) {
        machine.state = LeafState::Completed(status, err);
    }
}
