// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use serde_json::Value;

use crate::bt::Node;
use crate::pabt::Condition;

///
/// A desired assignment to a blackboard key. Effects are compared structurally during planning
/// (to decide action relevance); they are never evaluated or applied by the planner — the
/// action's node is what changes the world.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Effect {
    pub key: String,
    pub value: Value,
}

impl Effect {
    pub fn new(key: impl Into<String>, value: Value) -> Effect {
        Effect {
            key: key.into(),
            value,
        }
    }
}

///
/// An action template: preconditions (AND within a group, OR across groups), declared effects,
/// and the executable node that realizes them. Taking the node by value makes the "no action
/// without a node" contract structural.
///
pub struct Action {
    name: String,
    conditions: Vec<Vec<Arc<Condition>>>,
    effects: Vec<Effect>,
    node: Node,
}

impl Action {
    pub fn new(
        name: impl Into<String>,
        conditions: Vec<Vec<Arc<Condition>>>,
        effects: Vec<Effect>,
        node: Node,
    ) -> Action {
        Action {
            name: name.into(),
            conditions,
            effects,
            node,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn conditions(&self) -> &[Vec<Arc<Condition>>] {
        &self.conditions
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn node(&self) -> &Node {
        &self.node
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("condition_groups", &self.conditions.len())
            .field("effects", &self.effects)
            .finish()
    }
}
