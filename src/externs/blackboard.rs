// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use blackboard::Blackboard;
use boa_engine::object::builtins::JsArray;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsResult, JsString, JsValue, NativeFunction,
};
use evloop::{HostCaptures, Scope};

use crate::externs::hidden_id;

fn key_from(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    Ok(args.get_or_undefined(0).to_string(context)?.to_std_string_escaped())
}

fn to_js(value: &serde_json::Value, context: &mut Context) -> JsResult<JsValue> {
    evloop::json_to_js(value, context).map_err(|e| JsNativeError::error().with_message(e).into())
}

///
/// Wrap a native blackboard as the script object `{get, set, has, delete, keys, len, clear,
/// snapshot}` plus the hidden `_native` id that lets planner factories recover the native
/// handle.
///
pub(crate) fn wrap(scope: &mut Scope, blackboard: Blackboard) -> JsResult<boa_engine::JsObject> {
    let native_id = scope.natives().insert(blackboard.clone());

    let get = unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let key = key_from(args, context)?;
            match captures.0.get(&key) {
                Some(value) => to_js(&value, context),
                None => Ok(JsValue::undefined()),
            }
        },
        HostCaptures(blackboard.clone()),
    ) };
    let set = unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let key = key_from(args, context)?;
            let value = evloop::js_to_json(args.get_or_undefined(1), context)
                .map_err(|e| JsNativeError::typ().with_message(e))?;
            captures.0.set(key, value);
            Ok(JsValue::undefined())
        },
        HostCaptures(blackboard.clone()),
    ) };
    let has = unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let key = key_from(args, context)?;
            Ok(JsValue::from(captures.0.has(&key)))
        },
        HostCaptures(blackboard.clone()),
    ) };
    let delete = unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let key = key_from(args, context)?;
            Ok(JsValue::from(captures.0.delete(&key)))
        },
        HostCaptures(blackboard.clone()),
    ) };
    let keys = unsafe { NativeFunction::from_closure_with_captures(
        |_this, _args, captures, context| {
            let keys: Vec<JsValue> = captures
                .0
                .keys()
                .into_iter()
                .map(|k| JsValue::from(JsString::from(k.as_str())))
                .collect();
            Ok(JsValue::from(JsArray::from_iter(keys, context)))
        },
        HostCaptures(blackboard.clone()),
    ) };
    let len = unsafe { NativeFunction::from_closure_with_captures(
        |_this, _args, captures, _context| Ok(JsValue::from(captures.0.len() as f64)),
        HostCaptures(blackboard.clone()),
    ) };
    let clear = unsafe { NativeFunction::from_closure_with_captures(
        |_this, _args, captures, _context| {
            captures.0.clear();
            Ok(JsValue::undefined())
        },
        HostCaptures(blackboard.clone()),
    ) };
    let snapshot = unsafe { NativeFunction::from_closure_with_captures(
        |_this, _args, captures, context| {
            let map: serde_json::Map<String, serde_json::Value> =
                captures.0.snapshot().into_iter().collect();
            to_js(&serde_json::Value::Object(map), context)
        },
        HostCaptures(blackboard),
    ) };

    Ok(ObjectInitializer::new(scope.context)
        .function(get, js_string!("get"), 1)
        .function(set, js_string!("set"), 2)
        .function(has, js_string!("has"), 1)
        .function(delete, js_string!("delete"), 1)
        .function(keys, js_string!("keys"), 0)
        .function(len, js_string!("len"), 0)
        .function(clear, js_string!("clear"), 0)
        .function(snapshot, js_string!("snapshot"), 0)
        .property(js_string!("_native"), native_id as f64, Attribute::empty())
        .build())
}

///
/// Recover the native blackboard behind a wrapped script object.
///
pub(crate) fn unwrap(scope: &mut Scope, value: &JsValue) -> Option<Blackboard> {
    let object = value.as_object()?.clone();
    let id = hidden_id(&object, "_native", scope.context)?;
    scope.natives().get::<Blackboard>(id)
}
