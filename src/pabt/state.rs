// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::sync::Arc;

use blackboard::Blackboard;
use evloop::Scope;
use log::warn;
use parking_lot::Mutex;
use serde_json::Value;

use crate::pabt::{Action, Condition};
use crate::Error;

///
/// Produces additional candidate actions for a failed condition, ahead of the static registry.
/// Invoked from the ticker thread driving the plan; implementations that access the script
/// runtime must dispatch through the bridge (the scope parameter carries the current runtime
/// when the plan is being ticked on the loop).
///
pub type ActionGenerator = Arc<
    dyn Fn(Option<&mut Scope<'_>>, Option<&Condition>) -> Result<Vec<Arc<Action>>, Error>
        + Send
        + Sync,
>;

///
/// The planner's view of the world: a blackboard plus an action registry and an optional action
/// generator. Shared between host threads and script; internally synchronized.
///
pub struct State {
    blackboard: Blackboard,
    actions: Mutex<BTreeMap<String, Arc<Action>>>,
    generator: Mutex<Option<ActionGenerator>>,
}

impl State {
    pub fn new(blackboard: Blackboard) -> State {
        State {
            blackboard,
            actions: Mutex::new(BTreeMap::new()),
            generator: Mutex::new(None),
        }
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    ///
    /// The value of a blackboard key. Missing keys are not an error: planning treats absence as
    /// an unsatisfied condition, so this reports `Null`.
    ///
    pub fn variable(&self, key: &str) -> Value {
        self.blackboard.get(key).unwrap_or(Value::Null)
    }

    ///
    /// Add or replace an action by name.
    ///
    pub fn register_action(&self, name: impl Into<String>, action: Arc<Action>) {
        self.actions.lock().insert(name.into(), action);
    }

    pub fn set_action_generator(&self, generator: ActionGenerator) {
        *self.generator.lock() = Some(generator);
    }

    ///
    /// All registered actions, in deterministic (name-sorted) order. Deterministic enumeration
    /// is required for reproducible planning.
    ///
    pub fn all(&self) -> Vec<Arc<Action>> {
        self.actions.lock().values().cloned().collect()
    }

    ///
    /// The actions relevant to a failed condition: those with an effect whose key equals the
    /// condition's key and whose value satisfies the condition. Sourced from the generator first
    /// (its errors are logged and suppressed; the registry still contributes), then the
    /// registry. A `None` condition returns every candidate, for listing and tests only — the
    /// planner always passes a condition.
    ///
    pub fn actions(
        &self,
        mut scope: Option<&mut Scope<'_>>,
        failed: Option<&Condition>,
    ) -> Vec<Arc<Action>> {
        let mut candidates = Vec::new();
        let generator = self.generator.lock().clone();
        if let Some(generator) = generator {
            match generator(scope.as_deref_mut(), failed) {
                Ok(generated) => candidates.extend(generated),
                Err(e) => warn!("action generator failed: {e}"),
            }
        }
        candidates.extend(self.all());

        let Some(condition) = failed else {
            return candidates;
        };
        let mut relevant = Vec::new();
        for action in candidates {
            let mut satisfies = false;
            for effect in action.effects() {
                if effect.key == condition.key()
                    && condition.matches(scope.as_deref_mut(), &effect.value)
                {
                    satisfies = true;
                    break;
                }
            }
            if satisfies {
                relevant.push(action);
            }
        }
        relevant
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("actions", &self.actions.lock().len())
            .finish()
    }
}
