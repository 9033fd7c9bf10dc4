// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use boa_engine::{Context, JsValue};

///
/// Convert a script value to the host-side value representation.
///
/// `undefined` maps to `Null` (scripts routinely omit values); anything without a JSON
/// representation (functions, symbols, cyclic graphs) is an error.
///
pub fn js_to_json(value: &JsValue, context: &mut Context) -> Result<serde_json::Value, String> {
    if value.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    value
        .to_json(context)
        .map_err(|e| format!("value is not representable on the blackboard: {e}"))
}

pub fn json_to_js(value: &serde_json::Value, context: &mut Context) -> Result<JsValue, String> {
    JsValue::from_json(value, context).map_err(|e| format!("failed to convert value: {e}"))
}
