// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::rc::Rc;
use std::sync::{Arc, Weak};

use boa_engine::object::builtins::JsArray;
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::{js_string, JsValue, NativeFunction};
use evloop::{HostCaptures, Scope, ScriptHandle};

use crate::bt::Status;
use crate::{Bridge, Error};

///
/// Produces the `ctx` argument for a leaf invocation, on the loop. The default fetcher resolves
/// the bridge's exposed blackboard object, falling back to `undefined`.
///
pub type CtxFetcher = Arc<dyn Fn(&mut Scope<'_>) -> JsValue + Send + Sync>;

pub fn default_ctx_fetcher(bridge: &Arc<Bridge>) -> CtxFetcher {
    let weak: Weak<Bridge> = Arc::downgrade(bridge);
    Arc::new(move |scope: &mut Scope| {
        weak.upgrade()
            .and_then(|bridge| bridge.exposed_blackboard())
            .and_then(|handle| scope.resolve(&handle))
            .unwrap_or_else(JsValue::undefined)
    })
}

///
/// Loop-side result sink for one leaf invocation. May be invoked more than once (a buggy script
/// could hold the callback); callers guard with a generation or a single-fire flag.
///
pub(crate) type Deliver = Rc<dyn Fn(Status, Option<Error>)>;

///
/// Invoke the `runLeaf` trampoline for a leaf callable on the loop. Every outcome — setup
/// failure, synchronous return, thenable settlement, throw — reaches `deliver` exactly once from
/// the trampoline's perspective.
///
pub(crate) fn invoke(
    scope: &mut Scope,
    callable: &ScriptHandle,
    ctx_fetcher: &CtxFetcher,
    args: &[ScriptHandle],
    deliver: Deliver,
) {
    let Some(function) = scope.resolve(callable) else {
        deliver(
            Status::Failure,
            Some(Error::script("leaf function is no longer available")),
        );
        return;
    };
    if !function.as_object().is_some_and(|o| o.is_callable()) {
        deliver(
            Status::Failure,
            Some(Error::type_contract("leaf is not callable")),
        );
        return;
    }

    let run_leaf = match scope
        .context
        .global_object()
        .get(js_string!("runLeaf"), scope.context)
    {
        Ok(value) => value,
        Err(e) => {
            deliver(Status::Failure, Some(Error::script(e)));
            return;
        }
    };
    let Some(run_leaf) = run_leaf
        .as_object()
        .filter(|o| o.is_callable())
        .cloned()
    else {
        deliver(
            Status::Failure,
            Some(Error::script("runLeaf helper is not installed")),
        );
        return;
    };

    let ctx_value = (ctx_fetcher)(scope);
    let resolved_args: Vec<JsValue> = args
        .iter()
        .map(|handle| scope.resolve(handle).unwrap_or_else(JsValue::undefined))
        .collect();
    let args_array = JsArray::from_iter(resolved_args, scope.context);

    let callback = {
        let realm = scope.context.realm().clone();
        FunctionObjectBuilder::new(
            &realm,
            unsafe { NativeFunction::from_closure_with_captures(
                |_this, cb_args, captures, _context| {
                    let status = cb_args
                        .first()
                        .and_then(|v| v.as_string())
                        .map(|s| Status::from_wire(&s.to_std_string_escaped()))
                        .unwrap_or(Status::Failure);
                    let err = match cb_args.get(1) {
                        None => None,
                        Some(value) if value.is_null_or_undefined() => None,
                        Some(value) => Some(Error::Script(
                            value
                                .as_string()
                                .map(|s| s.to_std_string_escaped())
                                .unwrap_or_else(|| value.display().to_string()),
                        )),
                    };
                    (captures.0)(status, err);
                    Ok(JsValue::undefined())
                },
                HostCaptures(deliver.clone()),
            ) },
        )
        .name(js_string!("osmLeafCallback"))
        .length(2)
        .build()
    };

    if let Err(e) = run_leaf.call(
        &JsValue::undefined(),
        &[
            function,
            ctx_value,
            JsValue::from(args_array),
            JsValue::from(callback),
        ],
        scope.context,
    ) {
        deliver(Status::Failure, Some(Error::script(e)));
    }
}
