// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::{Arc, Weak};

use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction,
};
use evloop::{HostCaptures, Scope, ScriptHandle};

use crate::bt::Status;
use crate::externs::{
    array_elements, blackboard as bb_externs, hidden_id, js_error, status_value, unwrap_node,
    wrap_node, ModuleCtx,
};
use crate::pabt::{Action, ActionGenerator, Condition, Effect, Plan, State};
use crate::{Bridge, Error};

///
/// Build the `osm:pabt` module object.
///
pub(crate) fn module(scope: &mut Scope, mctx: &ModuleCtx) -> JsResult<JsObject> {
    let new_state = new_state_native(mctx);
    let new_action = new_action_native(mctx);
    let new_expr_condition = new_expr_condition_native(mctx);
    let new_plan = new_plan_native(mctx);

    Ok(ObjectInitializer::new(scope.context)
        .property(js_string!("running"), status_value(Status::Running), Attribute::all())
        .property(js_string!("success"), status_value(Status::Success), Attribute::all())
        .property(js_string!("failure"), status_value(Status::Failure), Attribute::all())
        .property(js_string!("Running"), status_value(Status::Running), Attribute::all())
        .property(js_string!("Success"), status_value(Status::Success), Attribute::all())
        .property(js_string!("Failure"), status_value(Status::Failure), Attribute::all())
        .function(new_state, js_string!("newState"), 1)
        .function(new_action, js_string!("newAction"), 4)
        .function(new_expr_condition, js_string!("newExprCondition"), 2)
        .function(new_plan, js_string!("newPlan"), 2)
        .build())
}

fn string_from(value: &JsValue, context: &mut boa_engine::Context) -> Result<String, Error> {
    value
        .to_string(context)
        .map(|s| s.to_std_string_escaped())
        .map_err(Error::script)
}

///
/// Parse one condition item: either an object carrying a `_native` condition (identity
/// preserved), or a `{key, match|Match}` record wrapping a script predicate. The original
/// script object rides along as the passthrough, so action generators receive it with any
/// auxiliary properties intact.
///
fn parse_condition(
    scope: &mut Scope,
    mctx: &ModuleCtx,
    item: &JsValue,
) -> Result<Arc<Condition>, Error> {
    let Some(object) = item.as_object().cloned() else {
        return Err(Error::type_contract("condition must be an object"));
    };
    if let Some(id) = hidden_id(&object, "_native", scope.context) {
        if let Some(condition) = scope.natives().get::<Arc<Condition>>(id) {
            return Ok(condition);
        }
    }

    let bridge = mctx
        .bridge
        .upgrade()
        .ok_or(Error::LoopTerminated)?;
    let key_value = object.get(js_string!("key"), scope.context).map_err(Error::script)?;
    let key = string_from(&key_value, scope.context)?;

    let mut match_value = object
        .get(js_string!("match"), scope.context)
        .map_err(Error::script)?;
    if match_value.is_undefined() {
        match_value = object
            .get(js_string!("Match"), scope.context)
            .map_err(Error::script)?;
    }
    if !match_value.as_object().is_some_and(|o| o.is_callable()) {
        return Err(Error::type_contract(
            "condition requires a match(value) function",
        ));
    }

    let callable = scope.register(match_value);
    let condition = Arc::new(Condition::script(key, &bridge, callable));
    condition.set_passthrough(scope.register(item.clone()));
    Ok(condition)
}

///
/// Parse a conditions argument into groups: AND within a group, OR across groups. A flat array
/// of condition items is a single group; an array of arrays is taken group by group. Empty or
/// absent input produces an empty (not absent) list.
///
fn parse_condition_groups(
    scope: &mut Scope,
    mctx: &ModuleCtx,
    value: &JsValue,
) -> Result<Vec<Vec<Arc<Condition>>>, Error> {
    if value.is_null_or_undefined() {
        return Ok(Vec::new());
    }
    let Some(items) = array_elements(scope.context, value)? else {
        return Err(Error::type_contract("conditions must be an array"));
    };
    let Some(first) = items.first() else {
        return Ok(Vec::new());
    };

    let nested = array_elements(scope.context, first)?.is_some();
    if !nested {
        let mut group = Vec::with_capacity(items.len());
        for item in &items {
            group.push(parse_condition(scope, mctx, item)?);
        }
        return Ok(vec![group]);
    }

    let mut groups = Vec::with_capacity(items.len());
    for item in &items {
        let Some(members) = array_elements(scope.context, item)? else {
            return Err(Error::type_contract(
                "condition groups must all be arrays",
            ));
        };
        let mut group = Vec::with_capacity(members.len());
        for member in &members {
            group.push(parse_condition(scope, mctx, member)?);
        }
        groups.push(group);
    }
    Ok(groups)
}

///
/// Parse an effects argument: `{key, value}` records (`Value` is accepted as an alternate
/// spelling). Empty or absent input produces an empty list.
///
fn parse_effects(scope: &mut Scope, value: &JsValue) -> Result<Vec<Effect>, Error> {
    if value.is_null_or_undefined() {
        return Ok(Vec::new());
    }
    let Some(items) = array_elements(scope.context, value)? else {
        return Err(Error::type_contract("effects must be an array"));
    };
    let mut effects = Vec::with_capacity(items.len());
    for item in &items {
        let Some(object) = item.as_object().cloned() else {
            return Err(Error::type_contract("effect must be an object"));
        };
        let key_value = object.get(js_string!("key"), scope.context).map_err(Error::script)?;
        let key = string_from(&key_value, scope.context)?;
        let mut effect_value = object
            .get(js_string!("value"), scope.context)
            .map_err(Error::script)?;
        if effect_value.is_undefined() {
            effect_value = object
                .get(js_string!("Value"), scope.context)
                .map_err(Error::script)?;
        }
        let converted =
            evloop::js_to_json(&effect_value, scope.context).map_err(Error::Script)?;
        effects.push(Effect::new(key, converted));
    }
    Ok(effects)
}

fn make_script_generator(bridge: Weak<Bridge>, handle: ScriptHandle) -> ActionGenerator {
    Arc::new(move |scope: Option<&mut Scope>, failed: Option<&Condition>| {
        let Some(bridge) = bridge.upgrade() else {
            return Err(Error::LoopTerminated);
        };
        let handle = handle.clone();
        let passthrough = failed.and_then(|condition| condition.passthrough());
        bridge.try_run_on_loop_sync(scope, move |scope| -> Result<Vec<Arc<Action>>, Error> {
            let Some(function) = scope.resolve(&handle) else {
                return Err(Error::script("action generator is no longer available"));
            };
            let object = function
                .as_object()
                .filter(|o| o.is_callable())
                .cloned()
                .ok_or_else(|| Error::type_contract("action generator is not callable"))?;
            let argument = passthrough
                .and_then(|h| scope.resolve(&h))
                .unwrap_or_else(JsValue::undefined);
            let result = object
                .call(&JsValue::undefined(), &[argument], scope.context)
                .map_err(Error::script)?;
            if result.is_null_or_undefined() {
                return Ok(Vec::new());
            }
            let Some(items) = array_elements(scope.context, &result)? else {
                return Err(Error::type_contract(
                    "action generator must return an array of actions",
                ));
            };
            let mut actions = Vec::with_capacity(items.len());
            for item in &items {
                let action = item
                    .as_object()
                    .and_then(|o| hidden_id(&o.clone(), "_native", scope.context))
                    .and_then(|id| scope.natives().get::<Arc<Action>>(id))
                    .ok_or_else(|| {
                        Error::type_contract("action generator returned a non-action")
                    })?;
                actions.push(action);
            }
            Ok(actions)
        })?
    })
}

fn new_state_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let mctx = &captures.0;
            let mut scope = Scope::new(context, &mctx.shared);
            let Some(blackboard) = bb_externs::unwrap(&mut scope, args.get_or_undefined(0)) else {
                return Err(js_error(&Error::type_contract(
                    "newState requires a blackboard",
                )));
            };
            let state = Arc::new(State::new(blackboard));
            let state_id = scope.natives().insert(state.clone());

            let variable = NativeFunction::from_closure_with_captures(
                |_this, args, captures, context| {
                    let key = args.get_or_undefined(0).to_string(context)?.to_std_string_escaped();
                    let value = captures.0.variable(&key);
                    evloop::json_to_js(&value, context)
                        .map_err(|e| JsNativeError::error().with_message(e).into())
                },
                HostCaptures(state.clone()),
            );
            let get = NativeFunction::from_closure_with_captures(
                |_this, args, captures, context| {
                    let key = args.get_or_undefined(0).to_string(context)?.to_std_string_escaped();
                    let value = captures.0.variable(&key);
                    evloop::json_to_js(&value, context)
                        .map_err(|e| JsNativeError::error().with_message(e).into())
                },
                HostCaptures(state.clone()),
            );
            let set = NativeFunction::from_closure_with_captures(
                |_this, args, captures, context| {
                    let key = args.get_or_undefined(0).to_string(context)?.to_std_string_escaped();
                    let value = evloop::js_to_json(args.get_or_undefined(1), context)
                        .map_err(|e| JsNativeError::typ().with_message(e))?;
                    captures.0.blackboard().set(key, value);
                    Ok(JsValue::undefined())
                },
                HostCaptures(state.clone()),
            );
            let register_action = NativeFunction::from_closure_with_captures(
                |_this, args, captures, context| {
                    let (mctx, state) = &captures.0;
                    let scope = Scope::new(context, &mctx.shared);
                    let name = args
                        .get_or_undefined(0)
                        .to_string(scope.context)?
                        .to_std_string_escaped();
                    let action = args
                        .get_or_undefined(1)
                        .as_object()
                        .and_then(|o| hidden_id(&o.clone(), "_native", scope.context))
                        .and_then(|id| scope.natives().get::<Arc<Action>>(id))
                        .ok_or_else(|| {
                            js_error(&Error::type_contract("registerAction requires an action"))
                        })?;
                    state.register_action(name, action);
                    Ok(JsValue::undefined())
                },
                HostCaptures((mctx.clone(), state.clone())),
            );
            let set_action_generator = NativeFunction::from_closure_with_captures(
                |_this, args, captures, context| {
                    let (mctx, state) = &captures.0;
                    let scope = Scope::new(context, &mctx.shared);
                    let function = args.get_or_undefined(0);
                    if !function.as_object().is_some_and(|o| o.is_callable()) {
                        return Err(js_error(&Error::type_contract(
                            "setActionGenerator requires a function",
                        )));
                    }
                    let handle = scope.register(function.clone());
                    state.set_action_generator(make_script_generator(mctx.bridge.clone(), handle));
                    Ok(JsValue::undefined())
                },
                HostCaptures((mctx.clone(), state.clone())),
            );

            Ok(JsValue::from(
                ObjectInitializer::new(scope.context)
                    .function(variable, js_string!("variable"), 1)
                    .function(get, js_string!("get"), 1)
                    .function(set, js_string!("set"), 2)
                    .function(register_action, js_string!("registerAction"), 2)
                    .function(set_action_generator, js_string!("setActionGenerator"), 1)
                    .property(js_string!("_native"), state_id as f64, Attribute::empty())
                    .build(),
            ))
        },
        HostCaptures(mctx.clone()),
    ) }
}

fn new_action_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let mctx = &captures.0;
            let mut scope = Scope::new(context, &mctx.shared);
            let name_value = args.get_or_undefined(0).clone();
            let name = string_from(&name_value, scope.context).map_err(|e| js_error(&e))?;
            let conditions = parse_condition_groups(&mut scope, mctx, args.get_or_undefined(1))
                .map_err(|e| js_error(&e))?;
            let effects =
                parse_effects(&mut scope, args.get_or_undefined(2)).map_err(|e| js_error(&e))?;
            let node = unwrap_node(&mut scope, mctx, args.get_or_undefined(3))
                .map_err(|e| js_error(&e))?;

            let action = Arc::new(Action::new(name.clone(), conditions, effects, node));
            let action_id = scope.natives().insert(action);
            Ok(JsValue::from(
                ObjectInitializer::new(scope.context)
                    .property(
                        js_string!("name"),
                        JsString::from(name.as_str()),
                        Attribute::all(),
                    )
                    .property(js_string!("_native"), action_id as f64, Attribute::empty())
                    .build(),
            ))
        },
        HostCaptures(mctx.clone()),
    ) }
}

fn new_expr_condition_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let mctx = &captures.0;
            let scope = Scope::new(context, &mctx.shared);
            let key_value = args.get_or_undefined(0).clone();
            let key = string_from(&key_value, scope.context).map_err(|e| js_error(&e))?;
            let source_value = args.get_or_undefined(1).clone();
            let source = string_from(&source_value, scope.context).map_err(|e| js_error(&e))?;

            let condition = Arc::new(Condition::expr(key.clone(), source));
            let condition_id = scope.natives().insert(condition.clone());

            let match_fn = {
                let realm = scope.context.realm().clone();
                FunctionObjectBuilder::new(
                    &realm,
                    NativeFunction::from_closure_with_captures(
                        |_this, args, captures, context| {
                            let value = evloop::js_to_json(args.get_or_undefined(0), context)
                                .map_err(|e| JsNativeError::typ().with_message(e))?;
                            Ok(JsValue::from(captures.0.matches(None, &value)))
                        },
                        HostCaptures(condition.clone()),
                    ),
                )
                .name(js_string!("match"))
                .length(1)
                .build()
            };

            let mut initializer = ObjectInitializer::new(scope.context);
            initializer
                .property(js_string!("key"), JsString::from(key.as_str()), Attribute::all())
                .property(js_string!("match"), match_fn, Attribute::all())
                .property(js_string!("_native"), condition_id as f64, Attribute::empty());
            let passthrough_value = args.get_or_undefined(2);
            if !passthrough_value.is_undefined() {
                initializer.property(js_string!("value"), passthrough_value.clone(), Attribute::all());
            }
            let object = initializer.build();

            condition.set_passthrough(scope.register(JsValue::from(object.clone())));
            Ok(JsValue::from(object))
        },
        HostCaptures(mctx.clone()),
    ) }
}

fn new_plan_native(mctx: &ModuleCtx) -> NativeFunction {
    unsafe { NativeFunction::from_closure_with_captures(
        |_this, args, captures, context| {
            let mctx = &captures.0;
            let mut scope = Scope::new(context, &mctx.shared);
            let state = args
                .get_or_undefined(0)
                .as_object()
                .and_then(|o| hidden_id(&o.clone(), "_native", scope.context))
                .and_then(|id| scope.natives().get::<Arc<State>>(id))
                .ok_or_else(|| js_error(&Error::type_contract("newPlan requires a state")))?;

            let goals_value = args.get_or_undefined(1);
            let mut goals = Vec::new();
            if !goals_value.is_null_or_undefined() {
                let Some(items) = array_elements(scope.context, goals_value)
                    .map_err(|e| js_error(&e))?
                else {
                    return Err(js_error(&Error::type_contract("goals must be an array")));
                };
                for item in &items {
                    goals.push(parse_condition(&mut scope, mctx, item).map_err(|e| js_error(&e))?);
                }
            }

            let plan = Plan::new(state, goals);
            let node = plan.node();
            let node_value = JsValue::from(wrap_node(&mut scope, &node)?);

            let node_fn = NativeFunction::from_closure_with_captures(
                |_this, _args, captures, _context| Ok(captures.clone()),
                node_value.clone(),
            );
            let node_fn_alias = NativeFunction::from_closure_with_captures(
                |_this, _args, captures, _context| Ok(captures.clone()),
                node_value,
            );
            Ok(JsValue::from(
                ObjectInitializer::new(scope.context)
                    .function(node_fn, js_string!("node"), 0)
                    .function(node_fn_alias, js_string!("Node"), 0)
                    .build(),
            ))
        },
        HostCaptures(mctx.clone()),
    ) }
}
