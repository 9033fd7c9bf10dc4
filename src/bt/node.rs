// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use evloop::Scope;

use crate::bt::Status;
use crate::Error;

pub type TickResult = Result<Status, Error>;

///
/// The native tick signature.
///
/// The `Option<&mut Scope>` parameter threads the current runtime access down the tick path: a
/// caller that is already executing on the event-loop worker passes its scope so that script
/// re-entry can run inline, while host-side tickers pass `None` and script work is dispatched to
/// the loop instead. This is what makes composites safe to tick both from arbitrary host threads
/// and from within script-originated calls.
///
/// An `Err` result is a `Failure` whose cause is attached; composite and ticker consumers treat
/// it as terminal.
///
pub type TickFn = dyn Fn(Option<&mut Scope<'_>>, &[Node]) -> TickResult + Send + Sync;

///
/// A cheaply-cloneable tick. Clones share any state captured by the underlying closure, which is
/// why stateful decorators hand out freshly-constructed `Tick`s instead of reusing them.
///
#[derive(Clone)]
pub struct Tick(Arc<TickFn>);

impl Tick {
    pub fn new<F>(f: F) -> Tick
    where
        F: Fn(Option<&mut Scope<'_>>, &[Node]) -> TickResult + Send + Sync + 'static,
    {
        Tick(Arc::new(f))
    }

    pub fn run(&self, scope: Option<&mut Scope<'_>>, children: &[Node]) -> TickResult {
        (self.0)(scope, children)
    }
}

impl std::fmt::Debug for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Tick")
    }
}

static NODE_IDS: AtomicU64 = AtomicU64::new(0);

///
/// An opaque handle to a behavior tree node: a tick plus an ordered child list. `tick` is
/// strictly synchronous from the caller's perspective.
///
/// Nodes are cheap to clone (the inner state is shared), `Send + Sync`, and carry a process-wide
/// unique id used for host-object identity at the script boundary and by stateful decorators.
///
#[derive(Clone)]
pub struct Node(Arc<NodeInner>);

struct NodeInner {
    id: u64,
    tick: Tick,
    children: Vec<Node>,
}

impl Node {
    pub fn new(tick: Tick, children: Vec<Node>) -> Node {
        Node(Arc::new(NodeInner {
            id: NODE_IDS.fetch_add(1, Ordering::Relaxed) + 1,
            tick,
            children,
        }))
    }

    ///
    /// A leaf node backed by a constant status.
    ///
    pub fn constant(status: Status) -> Node {
        Node::new(
            Tick::new(move |_scope: Option<&mut Scope>, _children: &[Node]| Ok(status)),
            vec![],
        )
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn tick(&self, scope: Option<&mut Scope<'_>>) -> TickResult {
        self.0.tick.run(scope, &self.0.children)
    }

    pub fn children(&self) -> &[Node] {
        &self.0.children
    }

    pub fn tick_fn(&self) -> &Tick {
        &self.0.tick
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.0.id)
            .field("children", &self.0.children.len())
            .finish()
    }
}
