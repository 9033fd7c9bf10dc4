// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blackboard::Blackboard;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, JsArgs, JsObject, JsResult, JsString, JsValue, NativeFunction};
use evloop::{HostCaptures, Scope, ScriptHandle};
use latch::Latch;
use log::debug;

use crate::bt::{composites, BlockingJsLeaf, JsLeaf, Manager, Status, Ticker};
use crate::externs::{
    self, blackboard as bb_externs, hidden_id, js_error, js_message, status_value, unwrap_node,
    unwrap_tick, wrap_node, ModuleCtx,
};
use crate::{Bridge, Error};

///
/// Build the `osm:bt` module object.
///
pub(crate) fn module(scope: &mut Scope, mctx: &ModuleCtx) -> JsResult<JsObject> {
    let sequence = externs::expose_tick(scope, mctx, composites::sequence(), "sequence")?;
    let selector = externs::expose_tick(scope, mctx, composites::selector(), "selector")?;

    let node = node_native(mctx);
    let tick = tick_native(mctx);
    let memorize = decorator_native(mctx, DecoratorKind::Memorize);
    let not = decorator_native(mctx, DecoratorKind::Not);
    let async_ = decorator_native(mctx, DecoratorKind::Async);
    let fork = fork_native(mctx);
    let interval = interval_native(mctx);
    let create_leaf = leaf_native(mctx, LeafKind::Adapter);
    let create_blocking_leaf = leaf_native(mctx, LeafKind::Blocking);
    let blackboard_ctor = blackboard_ctor_native(mctx);
    let expose_blackboard = expose_blackboard_native(mctx);
    let new_ticker = new_ticker_native(mctx);
    let new_manager = new_manager_native(mctx);

    Ok(ObjectInitializer::new(scope.context)
        .property(js_string!("running"), status_value(Status::Running), Attribute::all())
        .property(js_string!("success"), status_value(Status::Success), Attribute::all())
        .property(js_string!("failure"), status_value(Status::Failure), Attribute::all())
        .property(js_string!("sequence"), sequence.clone(), Attribute::all())
        .property(js_string!("selector"), selector.clone(), Attribute::all())
        // `fallback` is the planning literature's name for the same composite.
        .property(js_string!("fallback"), selector, Attribute::all())
        .function(node, js_string!("node"), 1)
        .function(tick, js_string!("tick"), 1)
        .function(memorize, js_string!("memorize"), 1)
        .function(not, js_string!("not"), 1)
        .function(async_, js_string!("async"), 1)
        .function(fork, js_string!("fork"), 0)
        .function(interval, js_string!("interval"), 1)
        .function(create_leaf, js_string!("createLeafNode"), 1)
        .function(create_blocking_leaf, js_string!("createBlockingLeafNode"), 1)
        .function(blackboard_ctor, js_string!("Blackboard"), 0)
        .function(expose_blackboard, js_string!("exposeBlackboard"), 1)
        .function(new_ticker, js_string!("newTicker"), 2)
        .function(new_manager, js_string!("newManager"), 0)
        .build())
}

fn node_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let mctx = &captures.0;
            let mut scope = Scope::new(context, &mctx.shared);
            let tick =
                unwrap_tick(&mut scope, mctx, args.get_or_undefined(0)).map_err(|e| js_error(&e))?;
            let mut children = Vec::new();
            for child in args.iter().skip(1) {
                children.push(unwrap_node(&mut scope, mctx, child).map_err(|e| js_error(&e))?);
            }
            let node = crate::bt::Node::new(tick, children);
            wrap_node(&mut scope, &node).map(JsValue::from)
        },
        HostCaptures(mctx.clone()),
    ) }
}

fn tick_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let mctx = &captures.0;
            let mut scope = Scope::new(context, &mctx.shared);
            let node =
                unwrap_node(&mut scope, mctx, args.get_or_undefined(0)).map_err(|e| js_error(&e))?;
            match node.tick(Some(&mut scope)) {
                Ok(status) => Ok(status_value(status)),
                Err(e) => {
                    debug!("tick reported an error: {e}");
                    Ok(status_value(Status::Failure))
                }
            }
        },
        HostCaptures(mctx.clone()),
    ) }
}

#[derive(Clone, Copy)]
enum DecoratorKind {
    Memorize,
    Not,
    Async,
}

fn decorator_native(mctx: &ModuleCtx, kind: DecoratorKind) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let (mctx, kind) = &captures.0;
            let mut scope = Scope::new(context, &mctx.shared);
            let inner =
                unwrap_tick(&mut scope, mctx, args.get_or_undefined(0)).map_err(|e| js_error(&e))?;
            let (wrapped, name) = match kind {
                DecoratorKind::Memorize => (composites::memorize(inner), "memorize"),
                DecoratorKind::Not => (composites::not(inner), "not"),
                DecoratorKind::Async => (composites::async_(inner), "async"),
            };
            externs::expose_tick(&mut scope, mctx, wrapped, name).map(JsValue::from)
        },
        HostCaptures((mctx.clone(), kind)),
    ) }
}

fn fork_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, _args, captures, context| {
            let mctx = &captures.0;
            let mut scope = Scope::new(context, &mctx.shared);
            externs::expose_tick(&mut scope, mctx, composites::fork(), "fork").map(JsValue::from)
        },
        HostCaptures(mctx.clone()),
    ) }
}

fn interval_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let mctx = &captures.0;
            let millis = args.get_or_undefined(0).to_number(context)?;
            let period = if millis.is_finite() && millis > 0.0 {
                Duration::from_millis(millis as u64)
            } else {
                Duration::ZERO
            };
            let mut scope = Scope::new(context, &mctx.shared);
            externs::expose_tick(&mut scope, mctx, composites::interval(period), "interval")
                .map(JsValue::from)
        },
        HostCaptures(mctx.clone()),
    ) }
}

#[derive(Clone, Copy)]
enum LeafKind {
    Adapter,
    Blocking,
}

fn leaf_native(mctx: &ModuleCtx, kind: LeafKind) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let (mctx, kind) = &captures.0;
            let mut scope = Scope::new(context, &mctx.shared);
            let bridge = mctx.bridge()?;
            let function = args.get_or_undefined(0);
            if !function.as_object().is_some_and(|o| o.is_callable()) {
                return Err(js_error(&Error::type_contract(
                    "createLeafNode requires a function",
                )));
            }
            let callable = scope.register(function.clone());
            let bound_args: Vec<ScriptHandle> = args
                .iter()
                .skip(1)
                .map(|value| scope.register(value.clone()))
                .collect();
            // Script-created leaves cancel with the bridge lifecycle.
            let cancel: Latch = bridge.done();
            let node = match kind {
                LeafKind::Adapter => {
                    JsLeaf::with_args(&bridge, callable, cancel, bound_args).into_node()
                }
                LeafKind::Blocking => {
                    BlockingJsLeaf::with_args(&bridge, callable, cancel, bound_args).into_node()
                }
            };
            wrap_node(&mut scope, &node).map(JsValue::from)
        },
        HostCaptures((mctx.clone(), kind)),
    ) }
}

fn blackboard_ctor_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, _args, captures, context| {
            let mut scope = Scope::new(context, &captures.0.shared);
            bb_externs::wrap(&mut scope, Blackboard::new()).map(JsValue::from)
        },
        HostCaptures(mctx.clone()),
    ) }
}

fn expose_blackboard_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let mctx = &captures.0;
            let mut scope = Scope::new(context, &mctx.shared);
            let bridge = mctx.bridge()?;
            let value = args.get_or_undefined(0);
            if bb_externs::unwrap(&mut scope, value).is_none() {
                return Err(js_error(&Error::type_contract(
                    "exposeBlackboard requires a blackboard",
                )));
            }
            scope
                .context
                .global_object()
                .set(js_string!("blackboard"), value.clone(), false, scope.context)?;
            bridge.set_exposed_blackboard(scope.register(value.clone()));
            Ok(value.clone())
        },
        HostCaptures(mctx.clone()),
    ) }
}

///
/// Schedule promise settlement for a finished ticker-like source. Used twice: once through the
/// bridge, and as a direct loop enqueue when the bridge has already stopped but the loop is
/// still alive (shared-loop topologies). If the loop itself is gone the promise stays pending.
///
fn make_settle(
    resolve: ScriptHandle,
    reject: ScriptHandle,
    error: Option<Error>,
) -> impl FnOnce(&mut Scope) + Send + 'static {
    move |scope: &mut Scope| {
        let (target, argument) = match &error {
            None => (resolve, JsValue::undefined()),
            Some(e) => (
                reject,
                JsValue::from(JsString::from(e.to_string().as_str())),
            ),
        };
        let Some(function) = scope.resolve(&target) else {
            return;
        };
        if let Some(object) = function.as_object().filter(|o| o.is_callable()) {
            if let Err(e) = object.call(&JsValue::undefined(), &[argument], scope.context) {
                debug!("promise settlement raised: {e}");
            }
        }
    }
}

struct Deferred {
    promise: JsValue,
    resolve: ScriptHandle,
    reject: ScriptHandle,
}

fn make_deferred(scope: &mut Scope) -> JsResult<Deferred> {
    let factory = scope
        .context
        .global_object()
        .get(js_string!("__osmDeferred"), scope.context)?;
    let factory = factory
        .as_object()
        .filter(|o| o.is_callable())
        .cloned()
        .ok_or_else(|| js_message("deferred helper is not installed"))?;
    let deferred = factory.call(&JsValue::undefined(), &[], scope.context)?;
    let object = deferred
        .as_object()
        .cloned()
        .ok_or_else(|| js_message("deferred helper returned a non-object"))?;
    let promise = object.get(js_string!("promise"), scope.context)?;
    let resolve_value = object.get(js_string!("resolve"), scope.context)?;
    let resolve = scope.register(resolve_value);
    let reject_value = object.get(js_string!("reject"), scope.context)?;
    let reject = scope.register(reject_value);
    Ok(Deferred {
        promise,
        resolve,
        reject,
    })
}

///
/// Spawn the watcher that settles a completion promise once `done` triggers.
///
fn watch_completion(
    mctx: &ModuleCtx,
    bridge: &Arc<Bridge>,
    done: Latch,
    err: impl Fn() -> Option<Error> + Send + 'static,
    deferred: &Deferred,
) {
    let weak = mctx.bridge.clone();
    let event_loop = bridge.event_loop().clone();
    let resolve = deferred.resolve.clone();
    let reject = deferred.reject.clone();
    let spawned = thread::Builder::new()
        .name("bt-promise-watch".to_owned())
        .spawn(move || {
            done.triggered();
            let error = err();
            let settle = make_settle(resolve.clone(), reject.clone(), error.clone());
            let dispatched = match weak.upgrade() {
                Some(bridge) => bridge.run_on_loop(settle),
                None => false,
            };
            if !dispatched {
                let _ = event_loop.run_on_loop(make_settle(resolve, reject, error));
            }
        });
    if let Err(e) = spawned {
        debug!("failed to spawn promise watcher: {e}");
    }
}

fn new_ticker_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let mctx = &captures.0;
            let millis = args.get_or_undefined(0).to_number(context)?;
            let period = if millis.is_finite() && millis > 0.0 {
                Duration::from_millis(millis as u64)
            } else {
                Duration::from_millis(10)
            };
            let mut scope = Scope::new(context, &mctx.shared);
            let bridge = mctx.bridge()?;
            let node =
                unwrap_node(&mut scope, mctx, args.get_or_undefined(1)).map_err(|e| js_error(&e))?;
            let stop_on_failure = match args.get(2).and_then(|v| v.as_object().cloned()) {
                Some(options) => options
                    .get(js_string!("stopOnFailure"), scope.context)?
                    .to_boolean(),
                None => false,
            };

            let ticker = Ticker::new(Some(bridge.done()), period, node, stop_on_failure);
            bridge.manager().add(ticker.clone());

            let deferred = make_deferred(&mut scope)?;
            watch_completion(
                mctx,
                &bridge,
                ticker.done(),
                {
                    let ticker = ticker.clone();
                    move || ticker.err()
                },
                &deferred,
            );

            let ticker_id = scope.natives().insert(ticker.clone());
            let done = NativeFunction::from_closure_with_captures(
                |_this, _args, captures, _context| Ok(captures.clone()),
                deferred.promise,
            );
            let err = NativeFunction::from_closure_with_captures(
                |_this, _args, captures, _context| Ok(error_value(captures.0.err())),
                HostCaptures(ticker.clone()),
            );
            let stop = NativeFunction::from_closure_with_captures(
                |_this, _args, captures, _context| {
                    captures.0.stop();
                    Ok(JsValue::undefined())
                },
                HostCaptures(ticker),
            );

            Ok(JsValue::from(
                ObjectInitializer::new(scope.context)
                    .function(done, js_string!("done"), 0)
                    .function(err, js_string!("err"), 0)
                    .function(stop, js_string!("stop"), 0)
                    .property(js_string!("__osmTicker"), ticker_id as f64, Attribute::empty())
                    .build(),
            ))
        },
        HostCaptures(mctx.clone()),
    ) }
}

fn error_value(error: Option<Error>) -> JsValue {
    match error {
        None => JsValue::null(),
        Some(e) => JsValue::from(JsString::from(e.to_string().as_str())),
    }
}

fn new_manager_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, _args, captures, context| {
            let mctx = &captures.0;
            let scope = Scope::new(context, &mctx.shared);
            let manager = Manager::new();

            let add = NativeFunction::from_closure_with_captures(
                |_this, args, captures, context| {
                    let (mctx, manager) = &captures.0;
                    let scope = Scope::new(context, &mctx.shared);
                    let Some(object) = args.get_or_undefined(0).as_object().cloned() else {
                        return Err(js_message("add requires a ticker"));
                    };
                    let ticker = hidden_id(&object, "__osmTicker", scope.context)
                        .and_then(|id| scope.natives().get::<Ticker>(id))
                        .ok_or_else(|| js_message("add requires a ticker"))?;
                    manager.add(ticker);
                    Ok(JsValue::undefined())
                },
                HostCaptures((mctx.clone(), manager.clone())),
            );
            let done = NativeFunction::from_closure_with_captures(
                |_this, _args, captures, context| {
                    let (mctx, manager) = &captures.0;
                    let mut scope = Scope::new(context, &mctx.shared);
                    let bridge = mctx.bridge()?;
                    let deferred = make_deferred(&mut scope)?;
                    watch_completion(
                        mctx,
                        &bridge,
                        manager.done(),
                        {
                            let manager = manager.clone();
                            move || manager.err()
                        },
                        &deferred,
                    );
                    Ok(deferred.promise)
                },
                HostCaptures((mctx.clone(), manager.clone())),
            );
            let err = NativeFunction::from_closure_with_captures(
                |_this, _args, captures, _context| Ok(error_value(captures.0.err())),
                HostCaptures(manager.clone()),
            );
            let stop = NativeFunction::from_closure_with_captures(
                |_this, _args, captures, _context| {
                    captures.0.stop();
                    Ok(JsValue::undefined())
                },
                HostCaptures(manager),
            );

            Ok(JsValue::from(
                ObjectInitializer::new(scope.context)
                    .function(add, js_string!("add"), 1)
                    .function(done, js_string!("done"), 0)
                    .function(err, js_string!("err"), 0)
                    .function(stop, js_string!("stop"), 0)
                    .build(),
            ))
        },
        HostCaptures(mctx.clone()),
    ) }
}
