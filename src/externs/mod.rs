// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The script-facing surface: module installation, the `require` shim, and the wrap/unwrap rules
//! that let native nodes/ticks and script functions interoperate.

pub(crate) mod blackboard;
pub(crate) mod bt;
pub(crate) mod pabt;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use boa_engine::object::builtins::JsArray;
use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use evloop::{HostCaptures, LoopShared, Scope, ScriptHandle};
use log::debug;

use crate::bt::{Node, Status, Tick, TickResult};
use crate::{Bridge, Error};

pub(crate) const BT_MODULE: &str = "osm:bt";
pub(crate) const PABT_MODULE: &str = "osm:pabt";

///
/// What every module native needs: the bridge (weakly, so the runtime does not keep a stopped
/// bridge alive) and the loop-owned tables for rebuilding a `Scope` from a bare context.
///
#[derive(Clone)]
pub(crate) struct ModuleCtx {
    pub bridge: Weak<Bridge>,
    pub shared: LoopShared,
}

impl ModuleCtx {
    pub(crate) fn bridge(&self) -> JsResult<Arc<Bridge>> {
        self.bridge
            .upgrade()
            .ok_or_else(|| js_message("bridge stopped"))
    }
}

///
/// Install the module surface: the `osm:bt` / `osm:pabt` module objects (also exposed as the
/// globals `bt` and `pabt`) and the `require` shim resolving them by name.
///
pub(crate) fn install(scope: &mut Scope, bridge: &Arc<Bridge>) -> Result<(), Error> {
    let mctx = ModuleCtx {
        bridge: Arc::downgrade(bridge),
        shared: scope.shared().clone(),
    };
    let bt_module = bt::module(scope, &mctx).map_err(Error::script)?;
    let pabt_module = pabt::module(scope, &mctx).map_err(Error::script)?;

    let modules: Rc<RefCell<HashMap<String, JsValue>>> = Rc::new(RefCell::new(HashMap::new()));
    modules
        .borrow_mut()
        .insert(BT_MODULE.to_owned(), JsValue::from(bt_module.clone()));
    modules
        .borrow_mut()
        .insert(PABT_MODULE.to_owned(), JsValue::from(pabt_module.clone()));

    let require = {
        let realm = scope.context.realm().clone();
        FunctionObjectBuilder::new(
            &realm,
            unsafe { NativeFunction::from_closure_with_captures(
                |_this, args, captures, context| {
                    let name = args
                        .get_or_undefined(0)
                        .to_string(context)?
                        .to_std_string_escaped();
                    captures.0.borrow().get(&name).cloned().ok_or_else(|| {
                        JsNativeError::typ()
                            .with_message(format!("unknown module: {name}"))
                            .into()
                    })
                },
                HostCaptures(modules),
            ) },
        )
        .name(js_string!("require"))
        .length(1)
        .build()
    };

    let global = scope.context.global_object();
    for (name, value) in [
        ("bt", JsValue::from(bt_module)),
        ("pabt", JsValue::from(pabt_module)),
        ("require", JsValue::from(require)),
    ] {
        global
            .set(JsString::from(name), value, false, scope.context)
            .map_err(Error::script)?;
    }
    Ok(())
}

pub(crate) fn js_message(message: impl Into<String>) -> JsError {
    JsNativeError::error().with_message(message.into()).into()
}

pub(crate) fn js_error(error: &Error) -> JsError {
    js_message(error.to_string())
}

pub(crate) fn status_value(status: Status) -> JsValue {
    JsValue::from(JsString::from(status.wire()))
}

///
/// Read a hidden numeric id property, if present.
///
pub(crate) fn hidden_id(object: &JsObject, key: &str, context: &mut Context) -> Option<u64> {
    object
        .get(JsString::from(key), context)
        .ok()
        .and_then(|value| value.as_number())
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as u64)
}

///
/// Read the elements of an array-like value; `None` when the value is not array-like. Callables
/// are excluded (a bare function has a `length` of its own).
///
pub(crate) fn array_elements(
    context: &mut Context,
    value: &JsValue,
) -> Result<Option<Vec<JsValue>>, Error> {
    let Some(object) = value.as_object().cloned() else {
        return Ok(None);
    };
    if object.is_callable() {
        return Ok(None);
    }
    let length = object
        .get(js_string!("length"), context)
        .map_err(Error::script)?;
    if length.is_undefined() {
        return Ok(None);
    }
    let length = length.to_length(context).map_err(Error::script)?;
    let mut elements = Vec::with_capacity(length as usize);
    for i in 0..length {
        elements.push(
            object
                .get(JsString::from(i.to_string().as_str()), context)
                .map_err(Error::script)?,
        );
    }
    Ok(Some(elements))
}

pub(crate) fn is_thenable(value: &JsValue, context: &mut Context) -> bool {
    value.as_object().is_some_and(|object| {
        object
            .get(js_string!("then"), context)
            .ok()
            .is_some_and(|then| then.as_object().is_some_and(|o| o.is_callable()))
    })
}

///
/// Wrap a native node as a script object, reusing one wrapper per node so that ticker loops do
/// not grow the runtime without bound.
///
pub(crate) fn wrap_node(scope: &mut Scope, node: &Node) -> JsResult<JsObject> {
    if let Some(object) = scope.objects().get(node.id()) {
        return Ok(object);
    }
    let id = scope.natives().insert(node.clone());
    let object = ObjectInitializer::new(scope.context)
        .property(js_string!("__osmNode"), id as f64, Attribute::empty())
        .build();
    scope.objects().put(node.id(), object.clone());
    Ok(object)
}

///
/// Unwrap a script value into a native node: a wrapper object passes through, and a script
/// function is treated as a node producer returning `[tick, children]`, unwrapped recursively.
///
pub(crate) fn unwrap_node(
    scope: &mut Scope,
    mctx: &ModuleCtx,
    value: &JsValue,
) -> Result<Node, Error> {
    let Some(object) = value.as_object().cloned() else {
        return Err(Error::type_contract(
            "node must be a native node or a node-producing function",
        ));
    };
    if let Some(id) = hidden_id(&object, "__osmNode", scope.context) {
        return scope
            .natives()
            .get::<Node>(id)
            .ok_or_else(|| Error::type_contract("stale node reference"));
    }
    if !object.is_callable() {
        return Err(Error::type_contract(
            "node must be a native node or a node-producing function",
        ));
    }

    let produced = object
        .call(&JsValue::undefined(), &[], scope.context)
        .map_err(Error::script)?;
    let Some(pair) = array_elements(scope.context, &produced)? else {
        return Err(Error::type_contract(
            "node function must return [tick, children]",
        ));
    };
    let Some(tick_value) = pair.first() else {
        return Err(Error::type_contract(
            "node function must return [tick, children]",
        ));
    };
    let tick = unwrap_tick(scope, mctx, tick_value)?;
    let mut children = Vec::new();
    if let Some(children_value) = pair.get(1) {
        if !children_value.is_null_or_undefined() {
            let Some(child_values) = array_elements(scope.context, children_value)? else {
                return Err(Error::type_contract("node children must be an array"));
            };
            for child in &child_values {
                children.push(unwrap_node(scope, mctx, child)?);
            }
        }
    }
    Ok(Node::new(tick, children))
}

///
/// Unwrap a script value into a native tick. Native tick functions (those installed by
/// `expose_tick`) pass through; any other callable is wrapped to match the native tick
/// signature. The wrapper rejects asynchronous functions: this runtime has only a macrotask
/// queue, and a thenable returned from a composite-child tick would defer forever in a busy
/// loop.
///
pub(crate) fn unwrap_tick(
    scope: &mut Scope,
    mctx: &ModuleCtx,
    value: &JsValue,
) -> Result<Tick, Error> {
    let Some(object) = value.as_object().cloned() else {
        return Err(Error::type_contract(
            "tick must be a native tick or a function",
        ));
    };
    if let Some(id) = hidden_id(&object, "__osmTick", scope.context) {
        return scope
            .natives()
            .get::<Tick>(id)
            .ok_or_else(|| Error::type_contract("stale tick reference"));
    }
    if !object.is_callable() {
        return Err(Error::type_contract(
            "tick must be a native tick or a function",
        ));
    }

    let handle = scope.register(value.clone());
    let bridge = mctx.bridge.clone();
    Ok(Tick::new(
        move |scope: Option<&mut Scope>, children: &[Node]| -> TickResult {
            let Some(bridge) = bridge.upgrade() else {
                return Err(Error::LoopTerminated);
            };
            let handle = handle.clone();
            let children = children.to_vec();
            bridge.try_run_on_loop_sync(scope, move |scope| {
                run_script_tick(scope, &handle, &children)
            })?
        },
    ))
}

fn run_script_tick(scope: &mut Scope, handle: &ScriptHandle, children: &[Node]) -> TickResult {
    let Some(function) = scope.resolve(handle) else {
        return Err(Error::script("tick function is no longer available"));
    };
    let object = function
        .as_object()
        .filter(|o| o.is_callable())
        .cloned()
        .ok_or_else(|| Error::type_contract("tick is not callable"))?;

    let mut wrapped = Vec::with_capacity(children.len());
    for child in children {
        wrapped.push(JsValue::from(
            wrap_node(scope, child).map_err(Error::script)?,
        ));
    }
    let array = JsArray::from_iter(wrapped, scope.context);
    let result = object
        .call(&JsValue::undefined(), &[JsValue::from(array)], scope.context)
        .map_err(Error::script)?;

    if is_thenable(&result, scope.context) {
        return Err(Error::AsyncTickRejected);
    }
    let Some(status) = result.as_string().map(|s| s.to_std_string_escaped()) else {
        return Err(Error::type_contract("tick must return a status string"));
    };
    Ok(Status::from_wire(&status))
}

///
/// Expose a native tick to scripts as a function that (a) executes the tick when called with
/// node arguments, returning the status string, and (b) round-trips through `unwrap_tick` via a
/// hidden id, so `bt.node(bt.sequence, ...)` uses the native semantics directly.
///
pub(crate) fn expose_tick(
    scope: &mut Scope,
    mctx: &ModuleCtx,
    tick: Tick,
    name: &str,
) -> JsResult<JsObject> {
    let id = scope.natives().insert(tick.clone());
    let realm = scope.context.realm().clone();
    let function = FunctionObjectBuilder::new(
        &realm,
        unsafe { NativeFunction::from_closure_with_captures(
            |_this, args, captures, context| {
                let (mctx, tick) = &captures.0;
                let mut scope = Scope::new(context, &mctx.shared);
                let mut children = Vec::with_capacity(args.len());
                for arg in args {
                    children.push(unwrap_node(&mut scope, mctx, arg).map_err(|e| js_error(&e))?);
                }
                match tick.run(Some(&mut scope), &children) {
                    Ok(status) => Ok(status_value(status)),
                    Err(e) => {
                        debug!("tick failed: {e}");
                        Ok(status_value(Status::Failure))
                    }
                }
            },
            HostCaptures((mctx.clone(), tick)),
        ) },
    )
    .name(JsString::from(name))
    .length(0)
    .build();

    let object = JsObject::from(function);
    object.set(js_string!("__osmTick"), id as f64, false, scope.context)?;
    Ok(object)
}
