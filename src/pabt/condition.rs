// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use evloop::{Scope, ScriptHandle};
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::{Bridge, Error};

static ENGINE: Lazy<rhai::Engine> = Lazy::new(rhai::Engine::new);

///
/// Process-wide cache of compiled expression programs, deduplicated by source text. Population
/// is double-checked: concurrent first evaluations may compile twice, but exactly one program is
/// retained per distinct source.
///
static PROGRAMS: Lazy<RwLock<HashMap<String, Arc<rhai::AST>>>> = Lazy::new(Default::default);

fn compile(source: &str) -> Result<Arc<rhai::AST>, String> {
    if let Some(ast) = PROGRAMS.read().get(source) {
        return Ok(ast.clone());
    }
    let compiled = ENGINE
        .compile_expression(source)
        .map_err(|e| format!("failed to compile expression {source:?}: {e}"))?;
    let mut programs = PROGRAMS.write();
    Ok(programs
        .entry(source.to_owned())
        .or_insert_with(|| Arc::new(compiled))
        .clone())
}

///
/// Drop all cached programs. Intended for tests that assert on compilation behavior.
///
pub fn clear_expression_cache() {
    PROGRAMS.write().clear();
}

enum ConditionKind {
    ///
    /// A script callable, evaluated on the event-loop worker via synchronous dispatch.
    ///
    Script {
        bridge: Weak<Bridge>,
        callable: ScriptHandle,
    },
    ///
    /// A boolean expression over the single free variable `Value`, evaluated natively without
    /// entering the script runtime.
    ///
    Expr { source: String },
    ///
    /// A direct host predicate.
    ///
    Native {
        predicate: Box<dyn Fn(&Value) -> bool + Send + Sync>,
    },
}

///
/// A predicate over a blackboard key, used by the planner for goals, preconditions, and action
/// relevance. Evaluation failures are never fatal: they report `false` so the planner can try an
/// alternative, and the most recent failure is retained for diagnostics.
///
pub struct Condition {
    key: String,
    kind: ConditionKind,
    // The originating script object, passed through untouched so that action generators can read
    // auxiliary properties from the condition they are handed.
    passthrough: Mutex<Option<ScriptHandle>>,
    last_error: Mutex<Option<String>>,
}

impl Condition {
    pub fn script(key: impl Into<String>, bridge: &Arc<Bridge>, callable: ScriptHandle) -> Condition {
        Condition {
            key: key.into(),
            kind: ConditionKind::Script {
                bridge: Arc::downgrade(bridge),
                callable,
            },
            passthrough: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn expr(key: impl Into<String>, source: impl Into<String>) -> Condition {
        let source = source.into();
        let condition = Condition {
            key: key.into(),
            kind: ConditionKind::Expr {
                source: source.clone(),
            },
            passthrough: Mutex::new(None),
            last_error: Mutex::new(None),
        };
        // Pre-compile into the shared cache; a failure is retained but deferred to match time.
        if let Err(e) = compile(&source) {
            *condition.last_error.lock() = Some(e);
        }
        condition
    }

    pub fn native(
        key: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Condition {
        Condition {
            key: key.into(),
            kind: ConditionKind::Native {
                predicate: Box::new(predicate),
            },
            passthrough: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    ///
    /// The most recent compilation or evaluation error. Legitimate `false` matches do not set
    /// it.
    ///
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn set_passthrough(&self, handle: ScriptHandle) {
        *self.passthrough.lock() = Some(handle);
    }

    pub fn passthrough(&self) -> Option<ScriptHandle> {
        self.passthrough.lock().clone()
    }

    pub fn matches(&self, scope: Option<&mut Scope>, value: &Value) -> bool {
        match &self.kind {
            ConditionKind::Native { predicate } => predicate(value),
            ConditionKind::Expr { source } => self.match_expr(source, value),
            ConditionKind::Script { bridge, callable } => {
                self.match_script(bridge, callable, scope, value)
            }
        }
    }

    fn record(&self, error: String) -> bool {
        debug!("condition {} evaluation failed: {error}", self.key);
        *self.last_error.lock() = Some(error);
        false
    }

    fn match_expr(&self, source: &str, value: &Value) -> bool {
        let ast = match compile(source) {
            Ok(ast) => ast,
            Err(e) => return self.record(e),
        };
        let dynamic = match rhai::serde::to_dynamic(value) {
            Ok(dynamic) => dynamic,
            Err(e) => return self.record(format!("failed to convert value: {e}")),
        };
        let mut scope = rhai::Scope::new();
        scope.push_dynamic("Value", dynamic);
        match ENGINE.eval_ast_with_scope::<bool>(&mut scope, &ast) {
            Ok(result) => result,
            Err(e) => self.record(format!("expression {source:?} failed: {e}")),
        }
    }

    fn match_script(
        &self,
        bridge: &Weak<Bridge>,
        callable: &ScriptHandle,
        scope: Option<&mut Scope>,
        value: &Value,
    ) -> bool {
        let Some(bridge) = bridge.upgrade() else {
            return false;
        };
        // Short-circuit while stopping: the dispatch below would only fail more slowly.
        if !bridge.is_running() {
            return false;
        }
        let callable = callable.clone();
        let value = value.clone();
        let dispatched = bridge.try_run_on_loop_sync(scope, move |scope| -> Result<bool, Error> {
            let function = scope
                .resolve(&callable)
                .ok_or_else(|| Error::script("condition function is no longer available"))?;
            let object = function
                .as_object()
                .filter(|o| o.is_callable())
                .cloned()
                .ok_or_else(|| Error::type_contract("condition is not callable"))?;
            let argument =
                evloop::json_to_js(&value, scope.context).map_err(Error::Script)?;
            let result = object
                .call(&boa_engine::JsValue::undefined(), &[argument], scope.context)
                .map_err(Error::script)?;
            Ok(result.to_boolean())
        });
        match dispatched {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => self.record(e.to_string()),
            Err(e) => self.record(e.to_string()),
        }
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            ConditionKind::Script { .. } => "script",
            ConditionKind::Expr { .. } => "expr",
            ConditionKind::Native { .. } => "native",
        };
        f.debug_struct("Condition")
            .field("key", &self.key)
            .field("kind", &kind)
            .finish()
    }
}
