// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use blackboard::Blackboard;
use boa_engine::{JsString, JsValue};
use evloop::{EventLoop, Scope, ScriptHandle};
use latch::Latch;
use log::{error, warn};
use parking_lot::Mutex;

use crate::bt::Manager;
use crate::externs;
use crate::Error;

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

///
/// Script helpers installed by the bridge's initialization task, before the modules are
/// registered: the status constants, a deferred-promise factory, and the `runLeaf` trampoline.
///
/// `runLeaf(fn, ctx, args, callback)` funnels the three possible behaviors of a script leaf —
/// returning a status-like value synchronously, returning a thenable that settles to one, or
/// throwing/rejecting — into exactly one invocation of `callback(status, errorOrNull)`.
///
const HELPERS_SOURCE: &str = r#"
(function () {
  "use strict";
  globalThis.running = "running";
  globalThis.success = "success";
  globalThis.failure = "failure";

  globalThis.__osmDeferred = function () {
    var deferred = {};
    deferred.promise = new Promise(function (resolve, reject) {
      deferred.resolve = resolve;
      deferred.reject = reject;
    });
    return deferred;
  };

  function messageOf(e) {
    if (e !== null && typeof e === "object" && typeof e.message === "string") {
      return e.message;
    }
    return String(e);
  }

  globalThis.runLeaf = function (fn, ctx, args, callback) {
    var done = false;
    function finish(status, err) {
      if (done) {
        return;
      }
      done = true;
      callback(typeof status === "string" ? status : "failure", err === undefined ? null : err);
    }
    var result;
    try {
      result = fn.apply(undefined, [ctx].concat(args || []));
    } catch (e) {
      finish("failure", messageOf(e));
      return;
    }
    if (result !== null && typeof result === "object" && typeof result.then === "function") {
      result.then(
        function (value) { finish(value, null); },
        function (e) { finish("failure", messageOf(e)); }
      );
      return;
    }
    finish(result, null);
  };
})();
"#;

///
/// A registry of script-facing module names, the host-visible record of what the bridge has
/// installed into its runtime. Scripts resolve the same names through the `require` shim.
///
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    names: Arc<Mutex<BTreeSet<String>>>,
}

impl ModuleRegistry {
    pub fn new() -> ModuleRegistry {
        ModuleRegistry::default()
    }

    pub fn register(&self, name: impl Into<String>) {
        self.names.lock().insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.names.lock().iter().cloned().collect()
    }
}

#[derive(Default)]
struct LifecycleState {
    started: bool,
    stopped: bool,
}

///
/// The single point of entry from arbitrary host threads into the script runtime, and the single
/// point of lifecycle.
///
/// The bridge's lifecycle latch is deliberately independent of the parent latch passed at
/// construction: a cancellation cascade would otherwise close `done` before the stopped flag is
/// set, breaking the invariant that a closed `done` implies `is_running() == false`. External
/// cancellation is instead mapped to an orderly `stop` by a watcher thread.
///
pub struct Bridge {
    event_loop: EventLoop,
    lifecycle: Latch,
    state: Mutex<LifecycleState>,
    // The identity of the event-loop worker, captured once by the initialization task. `None`
    // degrades inline-dispatch detection into always dispatching, never into a correctness bug.
    worker_thread: Mutex<Option<ThreadId>>,
    timeout: Mutex<Duration>,
    manager: Manager,
    exposed_blackboard: Mutex<Option<ScriptHandle>>,
}

impl Bridge {
    ///
    /// Construct a bridge over the given event loop and install the script surface into it.
    ///
    /// The initialization task captures the worker's identity before the modules are registered,
    /// so that an immediate `require` from the loop cannot deadlock on identity-based re-entry.
    /// Returns an error if the loop refuses the initialization task.
    ///
    pub fn new(
        parent: Option<Latch>,
        event_loop: EventLoop,
        registry: Option<&ModuleRegistry>,
    ) -> Result<Arc<Bridge>, Error> {
        let bridge = Arc::new(Bridge {
            event_loop,
            lifecycle: Latch::new(),
            state: Mutex::new(LifecycleState::default()),
            worker_thread: Mutex::new(None),
            timeout: Mutex::new(DEFAULT_SYNC_TIMEOUT),
            manager: Manager::new(),
            exposed_blackboard: Mutex::new(None),
        });
        bridge.state.lock().started = true;

        let init = {
            let bridge = bridge.clone();
            move |scope: &mut Scope| {
                // Identity first: anything below may re-enter native code from script.
                *bridge.worker_thread.lock() = Some(thread::current().id());
                if let Err(e) = scope.eval("osm:helpers", HELPERS_SOURCE) {
                    error!("failed to install script helpers: {e}");
                    return;
                }
                if let Err(e) = externs::install(scope, &bridge) {
                    error!("failed to install script modules: {e}");
                }
            }
        };
        if !bridge.event_loop.run_on_loop(init) {
            return Err(Error::LoopNotRunning);
        }

        if let Some(registry) = registry {
            registry.register(externs::BT_MODULE);
            registry.register(externs::PABT_MODULE);
        }

        if let Some(parent) = parent {
            let weak = Arc::downgrade(&bridge);
            let lifecycle = bridge.lifecycle.observer();
            let parent_observer = parent.observer();
            let spawned = thread::Builder::new()
                .name("bridge-cancel-watch".to_owned())
                .spawn(move || {
                    crossbeam_channel::select! {
                        recv(parent_observer) -> _ => {
                            if let Some(bridge) = weak.upgrade() {
                                bridge.stop();
                            }
                        }
                        recv(lifecycle) -> _ => {}
                    }
                });
            if let Err(e) = spawned {
                warn!("failed to spawn cancellation watcher: {e}");
            }
        }

        Ok(bridge)
    }

    ///
    /// Schedule `f` on the event loop. Returns whether it was accepted; refuses after stop.
    ///
    pub fn run_on_loop<F: FnOnce(&mut Scope) + Send + 'static>(&self, f: F) -> bool {
        if !self.is_running() {
            return false;
        }
        self.event_loop.run_on_loop(f)
    }

    ///
    /// Schedule `f` on the event loop and block until it returns, the configured timeout
    /// expires, or the bridge stops. A zero timeout disables the timer.
    ///
    pub fn run_on_loop_sync<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut Scope) -> T + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let accepted = self.run_on_loop(move |scope| {
            let _ = sender.send(f(scope));
        });
        if !accepted {
            return Err(if self.lifecycle.poll_triggered() {
                Error::BridgeStopped
            } else {
                Error::LoopNotRunning
            });
        }

        let done = self.lifecycle.observer();
        let timeout = *self.timeout.lock();
        if timeout.is_zero() {
            crossbeam_channel::select! {
                recv(receiver) -> result => result.map_err(|_| Error::LoopTerminated),
                // A result that raced the stop still wins.
                recv(done) -> _ => receiver.try_recv().map_err(|_| Error::StoppedBeforeCompletion),
            }
        } else {
            crossbeam_channel::select! {
                recv(receiver) -> result => result.map_err(|_| Error::LoopTerminated),
                recv(done) -> _ => receiver.try_recv().map_err(|_| Error::StoppedBeforeCompletion),
                default(timeout) => {
                    let message = format!(
                        "synchronous dispatch to the script event loop timed out after {timeout:?}; \
                         the event-loop worker may be blocked"
                    );
                    error!("{message}");
                    eprintln!("[osm-engine] {message}");
                    Err(Error::DispatchTimeout(timeout))
                }
            }
        }
    }

    ///
    /// As `run_on_loop_sync`, but executes `f` inline when the caller is already on the
    /// event-loop worker (proved by the scope it passed, checked against the captured identity).
    ///
    /// This is the sole mechanism by which script-originated calls into native code that then
    /// re-enter the script are safe; every native reachable from script must use it.
    ///
    pub fn try_run_on_loop_sync<T, F>(&self, scope: Option<&mut Scope>, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut Scope) -> T + Send + 'static,
    {
        if let Some(scope) = scope {
            if self.on_loop_thread() {
                return Ok(f(scope));
            }
        }
        self.run_on_loop_sync(f)
    }

    ///
    /// True when the calling thread is the event-loop worker.
    ///
    pub fn on_loop_thread(&self) -> bool {
        self.worker_thread
            .lock()
            .is_some_and(|id| id == thread::current().id())
    }

    ///
    /// Compile and evaluate a script source on the loop.
    ///
    pub fn load_script(
        &self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), Error> {
        let name = name.into();
        let source = source.into();
        self.run_on_loop_sync(move |scope| {
            scope
                .eval(&name, &source)
                .map(|_| ())
                .map_err(Error::script)
        })?
    }

    pub fn set_global(
        &self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), Error> {
        let name = name.into();
        self.run_on_loop_sync(move |scope| {
            let converted = evloop::json_to_js(&value, scope.context).map_err(Error::Script)?;
            scope
                .context
                .global_object()
                .set(JsString::from(name.as_str()), converted, false, scope.context)
                .map(|_| ())
                .map_err(Error::script)
        })?
    }

    pub fn get_global(&self, name: impl Into<String>) -> Result<serde_json::Value, Error> {
        let name = name.into();
        self.run_on_loop_sync(move |scope| {
            let value = scope
                .context
                .global_object()
                .get(JsString::from(name.as_str()), scope.context)
                .map_err(Error::script)?;
            evloop::js_to_json(&value, scope.context).map_err(Error::Script)
        })?
    }

    ///
    /// Resolve a global function by name into a Send-able handle, for building leaves host-side.
    ///
    pub fn get_callable(&self, name: impl Into<String>) -> Result<ScriptHandle, Error> {
        let name = name.into();
        self.run_on_loop_sync(move |scope| {
            let value = scope
                .context
                .global_object()
                .get(JsString::from(name.as_str()), scope.context)
                .map_err(Error::script)?;
            if !value.as_object().is_some_and(|o| o.is_callable()) {
                return Err(Error::type_contract(format!("global {name} is not callable")));
            }
            Ok(scope.register(value))
        })?
    }

    ///
    /// Expose a native blackboard to scripts as the global `blackboard`, and as the default
    /// context argument for leaves.
    ///
    pub fn expose_blackboard(self: &Arc<Self>, blackboard: Blackboard) -> Result<(), Error> {
        let bridge = self.clone();
        self.run_on_loop_sync(move |scope| {
            let object = externs::blackboard::wrap(scope, blackboard.clone())
                .map_err(Error::script)?;
            scope
                .context
                .global_object()
                .set(
                    JsString::from("blackboard"),
                    JsValue::from(object.clone()),
                    false,
                    scope.context,
                )
                .map_err(Error::script)?;
            let handle = scope.register(JsValue::from(object));
            *bridge.exposed_blackboard.lock() = Some(handle);
            Ok(())
        })?
    }

    pub(crate) fn exposed_blackboard(&self) -> Option<ScriptHandle> {
        self.exposed_blackboard.lock().clone()
    }

    pub(crate) fn set_exposed_blackboard(&self, handle: ScriptHandle) {
        *self.exposed_blackboard.lock() = Some(handle);
    }

    ///
    /// Idempotent shutdown. The order is mandatory and holds a single mutex acquisition: close
    /// `done`, set the stopped flag, release, then stop the ticker aggregator. Waiters blocked
    /// in `run_on_loop_sync` are unblocked by the first step. Stop never executes on the loop
    /// and does not wait for in-flight dispatches; already-scheduled tasks may still run.
    ///
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            self.lifecycle.trigger();
            state.stopped = true;
        }
        self.manager.stop();
    }

    ///
    /// Guaranteed to be false once `done` has been observed closed.
    ///
    pub fn is_running(&self) -> bool {
        let state = self.state.lock();
        state.started && !state.stopped
    }

    ///
    /// The bridge's lifecycle latch; triggers when the bridge stops.
    ///
    pub fn done(&self) -> Latch {
        self.lifecycle.clone()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    pub fn get_timeout(&self) -> Duration {
        *self.timeout.lock()
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }
}
