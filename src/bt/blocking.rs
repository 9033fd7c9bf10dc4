// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use evloop::{Scope, ScriptHandle};
use latch::Latch;

use crate::bt::run_leaf::{self, CtxFetcher, Deliver};
use crate::bt::{Node, Status, Tick, TickResult};
use crate::{Bridge, Error};

struct BlockingInner {
    bridge: Weak<Bridge>,
    cancel: Latch,
    callable: ScriptHandle,
    ctx_fetcher: CtxFetcher,
    args: Vec<ScriptHandle>,
}

///
/// Executes a script leaf on the loop and returns its result within the same tick. This is the
/// leaf form composites feed on, because composites walk their children synchronously.
///
/// Two execution modes are selected at call time: when the caller is already on the event-loop
/// worker the leaf runs inline (synchronous leaves complete with no thread hop; truly
/// asynchronous ones cannot complete and fail), otherwise the tick dispatches to the loop and
/// blocks on a select over the result, the caller's cancellation, and the bridge lifecycle.
///
#[derive(Clone)]
pub struct BlockingJsLeaf {
    inner: Arc<BlockingInner>,
}

impl BlockingJsLeaf {
    pub fn new(bridge: &Arc<Bridge>, callable: ScriptHandle, cancel: Latch) -> BlockingJsLeaf {
        BlockingJsLeaf::with_args(bridge, callable, cancel, Vec::new())
    }

    pub fn with_args(
        bridge: &Arc<Bridge>,
        callable: ScriptHandle,
        cancel: Latch,
        args: Vec<ScriptHandle>,
    ) -> BlockingJsLeaf {
        BlockingJsLeaf {
            inner: Arc::new(BlockingInner {
                bridge: Arc::downgrade(bridge),
                cancel,
                callable,
                ctx_fetcher: run_leaf::default_ctx_fetcher(bridge),
                args,
            }),
        }
    }

    pub fn into_node(self) -> Node {
        Node::new(
            Tick::new(move |scope: Option<&mut Scope>, _children: &[Node]| self.tick(scope)),
            vec![],
        )
    }

    pub fn tick(&self, scope: Option<&mut Scope>) -> TickResult {
        if self.inner.cancel.poll_triggered() {
            return Err(Error::Cancelled);
        }
        let Some(bridge) = self.inner.bridge.upgrade() else {
            return Err(Error::LoopTerminated);
        };

        if let Some(scope) = scope {
            if bridge.on_loop_thread() {
                return self.tick_on_loop(scope);
            }
        }
        self.tick_off_loop(&bridge)
    }

    ///
    /// On-loop fast path: run the trampoline inline. If the callback has not fired by the time
    /// the trampoline returns, the leaf is truly asynchronous and inline execution cannot
    /// complete it.
    ///
    fn tick_on_loop(&self, scope: &mut Scope) -> TickResult {
        let slot: Rc<RefCell<Option<(Status, Option<Error>)>>> = Rc::new(RefCell::new(None));
        let deliver: Deliver = {
            let slot = slot.clone();
            Rc::new(move |status, err| {
                let mut slot = slot.borrow_mut();
                if slot.is_none() {
                    *slot = Some((status, err));
                }
            })
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_leaf::invoke(
                scope,
                &self.inner.callable,
                &self.inner.ctx_fetcher,
                &self.inner.args,
                deliver,
            );
        }));
        if outcome.is_err() {
            return Err(Error::LeafPanic);
        }

        let captured = slot.borrow_mut().take();
        match captured {
            Some((_, Some(e))) => Err(e),
            Some((status, None)) => Ok(status),
            None => Err(Error::AsyncLeafOnLoop),
        }
    }

    ///
    /// Off-loop channel path: a one-buffered channel with a single-fire guard, selected against
    /// the caller's cancellation and the bridge lifecycle. The receiver drops on every exit
    /// path, so a late callback observes a disconnected channel and is discarded without
    /// panicking or leaking the buffered slot.
    ///
    fn tick_off_loop(&self, bridge: &Arc<Bridge>) -> TickResult {
        let (sender, receiver) = crossbeam_channel::bounded::<(Status, Option<Error>)>(1);
        let fired = Arc::new(AtomicBool::new(false));

        let accepted = bridge.run_on_loop({
            let inner = self.inner.clone();
            move |scope| {
                let deliver: Deliver = Rc::new(move |status, err| {
                    if !fired.swap(true, Ordering::SeqCst) {
                        let _ = sender.send((status, err));
                    }
                });
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_leaf::invoke(
                        scope,
                        &inner.callable,
                        &inner.ctx_fetcher,
                        &inner.args,
                        deliver.clone(),
                    );
                }));
                if outcome.is_err() {
                    deliver(Status::Failure, Some(Error::LeafPanic));
                }
            }
        });
        if !accepted {
            return Err(Error::LoopTerminated);
        }

        let cancelled = self.inner.cancel.observer();
        let stopped = bridge.done().observer();
        crossbeam_channel::select! {
            recv(receiver) -> result => match result {
                Ok((_, Some(e))) => Err(e),
                Ok((status, None)) => Ok(status),
                Err(_) => Err(Error::LoopTerminated),
            },
            recv(cancelled) -> _ => Err(Error::Cancelled),
            recv(stopped) -> _ => Err(Error::BridgeStopped),
        }
    }
}
