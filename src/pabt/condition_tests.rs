// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use serde_json::json;

use crate::pabt::{clear_expression_cache, Condition};

#[test]
fn expression_conditions_evaluate_natively() {
    clear_expression_cache();
    let condition = Condition::expr("actor", "Value == \"sg\"");
    assert_eq!(condition.key(), "actor");
    assert!(condition.matches(None, &json!("sg")));
    assert!(!condition.matches(None, &json!("s0")));
    assert!(condition.last_error().is_none());

    // Repeated evaluations are deterministic.
    for _ in 0..10 {
        assert!(condition.matches(None, &json!("sg")));
    }
}

#[test]
fn expressions_over_numbers_and_missing_values() {
    let condition = Condition::expr("hp", "Value > 10");
    assert!(condition.matches(None, &json!(11)));
    assert!(!condition.matches(None, &json!(3)));
    // A missing key evaluates against null: unsatisfied, not an error in the planner's eyes
    // (though the comparison itself records a diagnostic).
    assert!(!condition.matches(None, &json!(null)));
}

#[test]
fn compile_failure_yields_false_and_a_diagnostic() {
    let condition = Condition::expr("k", "Value ==");
    assert!(condition.last_error().is_some());
    assert!(!condition.matches(None, &json!(1)));
    assert!(condition.last_error().unwrap().contains("compile"));
}

#[test]
fn non_boolean_expressions_yield_false() {
    let condition = Condition::expr("k", "Value + 1");
    assert!(!condition.matches(None, &json!(1)));
    assert!(condition.last_error().is_some());
}

#[test]
fn programs_are_shared_across_conditions() {
    clear_expression_cache();
    let a = Condition::expr("x", "Value == 1");
    let b = Condition::expr("y", "Value == 1");
    assert!(a.matches(None, &json!(1)));
    assert!(b.matches(None, &json!(1)));
    assert!(!a.matches(None, &json!(2)));
}

#[test]
fn native_conditions_call_straight_through() {
    let condition = Condition::native("flag", |value| value == &json!(true));
    assert!(condition.matches(None, &json!(true)));
    assert!(!condition.matches(None, &json!(false)));
    assert!(condition.last_error().is_none());
}
