// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;
use std::time::Duration;

use blackboard::Blackboard;
use evloop::Scope;
use parking_lot::Mutex;
use serde_json::json;

use crate::bt::{Node, Status, Tick, Ticker};
use crate::pabt::{Action, Condition, Effect, Plan, State};

fn equals(key: &str, expected: &str) -> Arc<Condition> {
    let expected = json!(expected);
    Arc::new(Condition::native(key, move |value| value == &expected))
}

fn transition(
    blackboard: &Blackboard,
    from: &str,
    to: &str,
    walk: &Arc<Mutex<Vec<(String, String)>>>,
) -> Arc<Action> {
    let node = {
        let blackboard = blackboard.clone();
        let walk = walk.clone();
        let (from, to) = (from.to_owned(), to.to_owned());
        Node::new(
            Tick::new(move |_scope: Option<&mut Scope>, _children: &[Node]| {
                walk.lock().push((from.clone(), to.clone()));
                blackboard.set("actor", json!(to.as_str()));
                Ok(Status::Success)
            }),
            vec![],
        )
    };
    Arc::new(Action::new(
        format!("{from}->{to}"),
        vec![vec![equals("actor", from)]],
        vec![Effect::new("actor", json!(to))],
        node,
    ))
}

const EDGES: &[(&str, &str)] = &[
    ("s0", "s1"),
    ("s1", "s0"),
    ("s1", "s2"),
    ("s1", "s3"),
    ("s1", "s4"),
    ("s2", "s1"),
    ("s2", "s5"),
    ("s3", "s1"),
    ("s3", "s4"),
    ("s3", "sg"),
    ("s4", "s1"),
    ("s4", "s3"),
    ("s4", "s5"),
    ("s5", "s2"),
    ("s5", "s4"),
    ("s5", "sg"),
    ("sg", "s3"),
    ("sg", "s5"),
];

#[test]
fn plan_walks_the_graph_to_the_goal() {
    let blackboard = Blackboard::new();
    blackboard.set("actor", json!("s0"));
    let state = Arc::new(State::new(blackboard.clone()));
    let walk = Arc::new(Mutex::new(Vec::new()));
    for (from, to) in EDGES {
        let action = transition(&blackboard, from, to, &walk);
        state.register_action(action.name().to_owned(), action.clone());
    }

    let plan = Plan::new(state, vec![equals("actor", "sg")]);
    let node = plan.node();

    let ticker = Ticker::new(None, Duration::from_millis(10), node.clone(), false);
    assert!(
        ticker.done().triggered_timeout(Duration::from_secs(2)),
        "plan did not reach the goal within 2s"
    );
    assert_eq!(ticker.err(), None);
    assert_eq!(blackboard.get("actor"), Some(json!("sg")));

    // The traversal is a valid walk of length <= 4 from s0 to sg.
    let walk = walk.lock().clone();
    assert!(!walk.is_empty() && walk.len() <= 4, "walk too long: {walk:?}");
    assert_eq!(walk.first().unwrap().0, "s0");
    assert_eq!(walk.last().unwrap().1, "sg");
    for pair in walk.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "discontinuous walk: {walk:?}");
    }
    for step in &walk {
        assert!(
            EDGES.iter().any(|(f, t)| *f == step.0 && *t == step.1),
            "walk uses a non-edge: {step:?}"
        );
    }

    // Re-ticking after success still reports success.
    assert_eq!(node.tick(None).unwrap(), Status::Success);
    assert_eq!(node.tick(None).unwrap(), Status::Success);
}

#[test]
fn plan_fails_without_a_route() {
    let blackboard = Blackboard::new();
    blackboard.set("actor", json!("s0"));
    let state = Arc::new(State::new(blackboard.clone()));
    let walk = Arc::new(Mutex::new(Vec::new()));
    // Only the goal's incoming edge exists; nothing reaches its precondition.
    let action = transition(&blackboard, "s5", "sg", &walk);
    state.register_action(action.name().to_owned(), action);

    let plan = Plan::new(state, vec![equals("actor", "sg")]);
    assert_eq!(plan.node().tick(None).unwrap(), Status::Failure);
    assert!(walk.lock().is_empty());
}

#[test]
fn relevance_filtering_and_listing() {
    let blackboard = Blackboard::new();
    blackboard.set("actor", json!("s0"));
    let state = Arc::new(State::new(blackboard.clone()));
    let walk = Arc::new(Mutex::new(Vec::new()));
    for (from, to) in EDGES {
        let action = transition(&blackboard, from, to, &walk);
        state.register_action(action.name().to_owned(), action);
    }

    // No condition: every action, in name-sorted order.
    let all = state.actions(None, None);
    assert_eq!(all.len(), EDGES.len());
    let names: Vec<&str> = all.iter().map(|a| a.name()).collect();
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);

    // Relevant to actor==sg: exactly the edges into sg.
    let goal = equals("actor", "sg");
    let relevant = state.actions(None, Some(&goal));
    let mut relevant_names: Vec<&str> = relevant.iter().map(|a| a.name()).collect();
    relevant_names.sort_unstable();
    assert_eq!(relevant_names, vec!["s3->sg", "s5->sg"]);
}

#[test]
fn generator_errors_do_not_mask_the_registry() {
    let blackboard = Blackboard::new();
    blackboard.set("actor", json!("s0"));
    let state = Arc::new(State::new(blackboard.clone()));
    let walk = Arc::new(Mutex::new(Vec::new()));
    let action = transition(&blackboard, "s0", "sg", &walk);
    state.register_action(action.name().to_owned(), action);
    state.set_action_generator(Arc::new(
        |_scope: Option<&mut Scope>, _failed: Option<&Condition>| {
            Err(crate::Error::script("generator exploded"))
        },
    ));

    let plan = Plan::new(state, vec![equals("actor", "sg")]);
    let node = plan.node();
    // First tick executes the registry action despite the failing generator.
    assert_eq!(node.tick(None).unwrap(), Status::Running);
    assert_eq!(blackboard.get("actor"), Some(json!("sg")));
    assert_eq!(node.tick(None).unwrap(), Status::Success);
}
