// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use evloop::Scope;
use parking_lot::Mutex;

use crate::bt::{Node, Status, Tick, TickResult};
use crate::Error;

fn sequence_impl(mut scope: Option<&mut Scope<'_>>, children: &[Node]) -> TickResult {
    for child in children {
        match child.tick(scope.as_deref_mut())? {
            Status::Success => {}
            status => return Ok(status),
        }
    }
    Ok(Status::Success)
}

///
/// Ticks children in order, failing fast: the first non-`Success` child decides the result.
///
pub fn sequence() -> Tick {
    Tick::new(sequence_impl)
}

///
/// Ticks children in order until one does not fail (also known as a fallback).
///
pub fn selector() -> Tick {
    Tick::new(
        |mut scope: Option<&mut Scope>, children: &[Node]| -> TickResult {
            for child in children {
                match child.tick(scope.as_deref_mut())? {
                    Status::Failure => {}
                    status => return Ok(status),
                }
            }
            Ok(Status::Failure)
        },
    )
}

///
/// Inverts `Success` and `Failure`; `Running` and errors pass through.
///
pub fn not(inner: Tick) -> Tick {
    Tick::new(
        move |scope: Option<&mut Scope>, children: &[Node]| -> TickResult {
            Ok(match inner.run(scope, children)? {
                Status::Success => Status::Failure,
                Status::Failure => Status::Success,
                Status::Running => Status::Running,
            })
        },
    )
}

#[derive(Default)]
struct MemorizeState {
    results: HashMap<u64, Status>,
    instrumented: HashMap<u64, Node>,
    constants: HashMap<Status, Node>,
}

fn instrument(child: Node, state: Arc<Mutex<MemorizeState>>) -> Node {
    Node::new(
        Tick::new(
            move |scope: Option<&mut Scope>, _children: &[Node]| -> TickResult {
                let result = child.tick(scope);
                if let Ok(status @ (Status::Success | Status::Failure)) = result {
                    state.lock().results.insert(child.id(), status);
                }
                result
            },
        ),
        vec![],
    )
}

///
/// Wraps a tick so that children which have already reached a terminal status are not re-ticked
/// until the wrapped tick itself reaches a terminal status. This lets a `sequence` resume from
/// its previously `Running` child rather than restarting completed work on every tick.
///
/// Each call produces fresh state; the returned tick must not be shared across nodes.
///
pub fn memorize(inner: Tick) -> Tick {
    let state = Arc::new(Mutex::new(MemorizeState::default()));
    Tick::new(
        move |scope: Option<&mut Scope>, children: &[Node]| -> TickResult {
            let substitute: Vec<Node> = {
                let mut st = state.lock();
                // Split borrows: results is read while instrumented/constants are populated.
                let MemorizeState {
                    results,
                    instrumented,
                    constants,
                } = &mut *st;
                children
                    .iter()
                    .map(|child| {
                        if let Some(status) = results.get(&child.id()) {
                            constants
                                .entry(*status)
                                .or_insert_with(|| Node::constant(*status))
                                .clone()
                        } else {
                            instrumented
                                .entry(child.id())
                                .or_insert_with(|| instrument(child.clone(), state.clone()))
                                .clone()
                        }
                    })
                    .collect()
            };
            let result = inner.run(scope, &substitute);
            if !matches!(result, Ok(Status::Running)) {
                state.lock().results.clear();
            }
            result
        },
    )
}

///
/// Runs the wrapped tick on a background thread, returning `Running` until it completes. The
/// caller's thread is never blocked. Each call produces fresh state.
///
/// The background tick runs detached from any scope: script work reached through it dispatches
/// to the event loop as usual.
///
pub fn async_(inner: Tick) -> Tick {
    struct AsyncState {
        running: bool,
        result: Option<TickResult>,
    }
    let state = Arc::new(Mutex::new(AsyncState {
        running: false,
        result: None,
    }));
    Tick::new(
        move |_scope: Option<&mut Scope>, children: &[Node]| -> TickResult {
            let mut st = state.lock();
            if let Some(result) = st.result.take() {
                st.running = false;
                return result;
            }
            if st.running {
                return Ok(Status::Running);
            }
            st.running = true;
            drop(st);

            let task_tick = inner.clone();
            let task_children = children.to_vec();
            let task_state = state.clone();
            let spawned = thread::Builder::new().name("bt-async".to_owned()).spawn(move || {
                let result = task_tick.run(None, &task_children);
                task_state.lock().result = Some(result);
            });
            if let Err(e) = spawned {
                // Could not start the worker; surface as a tick error rather than wedging in
                // the running state.
                state.lock().running = false;
                return Err(Error::script(format!("failed to spawn async tick: {e}")));
            }
            Ok(Status::Running)
        },
    )
}

///
/// Ticks all children concurrently, one thread per still-running child, and joins them within
/// the tick. Terminal child statuses are memorized until every child has terminated, at which
/// point the group resolves to `Failure` if any child failed and `Success` otherwise. Each call
/// produces fresh state.
///
/// Children are ticked detached from any scope; a forked subtree containing blocking script
/// leaves must therefore be driven from a host ticker, never from within a loop-side tick.
///
pub fn fork() -> Tick {
    let state: Arc<Mutex<HashMap<u64, Status>>> = Arc::new(Mutex::new(HashMap::new()));
    Tick::new(
        move |_scope: Option<&mut Scope>, children: &[Node]| -> TickResult {
            let mut completed = state.lock().clone();
            let pending: Vec<Node> = children
                .iter()
                .filter(|child| !completed.contains_key(&child.id()))
                .cloned()
                .collect();

            let results: Vec<(u64, TickResult)> = thread::scope(|s| {
                let handles: Vec<_> = pending
                    .iter()
                    .map(|child| {
                        let child = child.clone();
                        s.spawn(move || (child.id(), child.tick(None)))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| (0, Err(Error::script("panic in forked child"))))
                    })
                    .collect()
            });

            for (id, result) in results {
                match result {
                    Err(e) => {
                        state.lock().clear();
                        return Err(e);
                    }
                    Ok(Status::Running) => {}
                    Ok(status) => {
                        completed.insert(id, status);
                    }
                }
            }

            if completed.len() == children.len() {
                state.lock().clear();
                if completed.values().any(|status| *status == Status::Failure) {
                    Ok(Status::Failure)
                } else {
                    Ok(Status::Success)
                }
            } else {
                *state.lock() = completed;
                Ok(Status::Running)
            }
        },
    )
}

///
/// Rate-limits a subtree: children are ticked (with sequence semantics) at most once per period;
/// in between, the tick reports `Running` without touching them. Each call produces fresh state.
///
pub fn interval(period: Duration) -> Tick {
    let last: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    Tick::new(
        move |scope: Option<&mut Scope>, children: &[Node]| -> TickResult {
            let now = Instant::now();
            {
                let mut last = last.lock();
                if let Some(previous) = *last {
                    if now.duration_since(previous) < period {
                        return Ok(Status::Running);
                    }
                }
                *last = Some(now);
            }
            sequence_impl(scope, children)
        },
    )
}
