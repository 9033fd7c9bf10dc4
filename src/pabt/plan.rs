// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use evloop::Scope;
use itertools::Itertools;
use log::warn;
use once_cell::sync::Lazy;

use crate::bt::{Node, Status, Tick, TickResult};
use crate::pabt::{Action, Condition, State};

// Bounds backward chaining through action preconditions; a chain deeper than this is treated as
// unplannable rather than recursing further.
const MAX_PLAN_DEPTH: usize = 16;

static DEBUG: Lazy<bool> =
    Lazy::new(|| std::env::var("OSM_DEBUG_PABT").is_ok_and(|v| v == "1"));

fn trace(message: impl FnOnce() -> String) {
    if *DEBUG {
        eprintln!("[pabt] {}", message());
    }
}

///
/// A planning problem: drive the state toward a conjunction of goal conditions by chaining
/// registered actions backward from unsatisfied conditions to executable ones.
///
/// The produced node replans from the blackboard on every tick, which is what makes the plan
/// reactive: external interference simply changes which condition fails next. Once every goal
/// condition holds, the node reports `Success` (and keeps doing so while they hold).
///
pub struct Plan {
    state: Arc<State>,
    goals: Vec<Arc<Condition>>,
}

impl Plan {
    pub fn new(state: Arc<State>, goals: Vec<Arc<Condition>>) -> Plan {
        Plan { state, goals }
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    ///
    /// A native node executing one planning step per tick, suitable for driving with a ticker
    /// whose `stop_on_failure` is unset (a transient `Failure` then retries on the next tick).
    ///
    pub fn node(&self) -> Node {
        let state = self.state.clone();
        let goals = self.goals.clone();
        Node::new(
            Tick::new(
                move |mut scope: Option<&mut Scope>, _children: &[Node]| -> TickResult {
                    let mut failed = None;
                    for goal in &goals {
                        if !condition_holds(&state, goal, scope.as_deref_mut()) {
                            failed = Some(goal.clone());
                            break;
                        }
                    }
                    let Some(goal) = failed else {
                        return Ok(Status::Success);
                    };
                    trace(|| format!("goal condition {:?} unsatisfied", goal.key()));
                    let mut chain = Vec::new();
                    advance(&state, &goal, scope, &mut chain, 0)
                },
            ),
            vec![],
        )
    }
}

fn condition_holds(state: &State, condition: &Condition, scope: Option<&mut Scope>) -> bool {
    let value = state.variable(condition.key());
    condition.matches(scope, &value)
}

enum Readiness {
    Ready,
    Blocked(Arc<Condition>),
}

///
/// Whether some AND-group of the action's preconditions is fully satisfied. When none is, the
/// first unsatisfied member of the closest group (fewest unsatisfied conditions) is the one to
/// plan toward.
///
fn readiness(state: &State, action: &Action, mut scope: Option<&mut Scope<'_>>) -> Readiness {
    if action.conditions().is_empty() {
        return Readiness::Ready;
    }
    let mut best: Option<(usize, Arc<Condition>)> = None;
    for group in action.conditions() {
        let mut unsatisfied = Vec::new();
        for condition in group {
            if !condition_holds(state, condition, scope.as_deref_mut()) {
                unsatisfied.push(condition.clone());
            }
        }
        let Some(first) = unsatisfied.first() else {
            return Readiness::Ready;
        };
        if best.as_ref().is_none_or(|(n, _)| unsatisfied.len() < *n) {
            best = Some((unsatisfied.len(), first.clone()));
        }
    }
    match best {
        Some((_, condition)) => Readiness::Blocked(condition),
        // Only empty groups existed; an empty conjunction holds.
        None => Readiness::Ready,
    }
}

///
/// One backward-chaining step: resolve the failed condition to a relevant action, either
/// executing it (when ready) or recursing into its closest unsatisfied precondition. The chain
/// records action names along the current expansion path as a cycle guard; candidates are
/// considered in the deterministic order the state returns them.
///
fn advance(
    state: &Arc<State>,
    condition: &Arc<Condition>,
    mut scope: Option<&mut Scope<'_>>,
    chain: &mut Vec<String>,
    depth: usize,
) -> TickResult {
    if depth >= MAX_PLAN_DEPTH {
        trace(|| format!("giving up on {:?}: max depth reached", condition.key()));
        return Ok(Status::Failure);
    }

    let candidates = state.actions(scope.as_deref_mut(), Some(condition));
    trace(|| {
        format!(
            "{} candidate(s) for condition {:?} (chain: {})",
            candidates.len(),
            condition.key(),
            chain.iter().join(" -> "),
        )
    });
    for action in candidates {
        if chain.iter().any(|name| name == action.name()) {
            continue;
        }
        match readiness(state, &action, scope.as_deref_mut()) {
            Readiness::Ready => {
                trace(|| format!("executing action {:?}", action.name()));
                match action.node().tick(scope.as_deref_mut()) {
                    // The action cannot run right now; try an alternative this tick.
                    Ok(Status::Failure) => {}
                    // Progress (running or just completed); reassess from the blackboard on
                    // the next tick.
                    Ok(_) => return Ok(Status::Running),
                    Err(e) => {
                        warn!("action {} failed: {e}", action.name());
                    }
                }
            }
            Readiness::Blocked(precondition) => {
                trace(|| {
                    format!(
                        "action {:?} blocked on condition {:?}",
                        action.name(),
                        precondition.key()
                    )
                });
                chain.push(action.name().to_owned());
                let result = advance(state, &precondition, scope.as_deref_mut(), chain, depth + 1);
                chain.pop();
                match result {
                    Ok(Status::Failure) => {}
                    other => return other,
                }
            }
        }
    }
    trace(|| format!("no viable action for condition {:?}", condition.key()));
    Ok(Status::Failure)
}
