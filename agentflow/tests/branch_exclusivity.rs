//! Property tests for composed if/elseif/else guards

use agentflow::graph::condition::{compose_branch_guards, Branch};
use agentflow::runtime::ExpressionEvaluator;
use proptest::prelude::*;
use serde_json::{Map, Value};

fn evaluate_guards(guards: &[String], values: &[bool]) -> Vec<bool> {
    let evaluator = ExpressionEvaluator::new(64);
    let mut bindings = Map::new();
    for (n, value) in values.iter().enumerate() {
        bindings.insert(format!("c{n}"), Value::Bool(*value));
    }
    guards
        .iter()
        .map(|guard| {
            evaluator
                .evaluate_bool(guard, &bindings)
                .unwrap_or_else(|e| panic!("guard '{guard}' failed: {e}"))
        })
        .collect()
}

fn branches(names: &[String], with_else: bool) -> Vec<Branch<'_>> {
    let mut branches: Vec<Branch<'_>> = names
        .iter()
        .enumerate()
        .map(|(n, name)| {
            if n == 0 {
                Branch::If(name)
            } else {
                Branch::ElseIf(name)
            }
        })
        .collect();
    if with_else {
        branches.push(Branch::Else);
    }
    branches
}

proptest! {
    #[test]
    fn at_most_one_partition_holds(values in prop::collection::vec(any::<bool>(), 1..6)) {
        let names: Vec<String> = (0..values.len()).map(|n| format!("c{n}")).collect();
        let guards = compose_branch_guards(&branches(&names, false));
        let holds = evaluate_guards(&guards, &values);

        prop_assert!(holds.iter().filter(|h| **h).count() <= 1);
        prop_assert_eq!(
            holds.iter().position(|h| *h),
            values.iter().position(|v| *v)
        );
    }

    #[test]
    fn else_makes_exactly_one_partition_hold(values in prop::collection::vec(any::<bool>(), 1..6)) {
        let names: Vec<String> = (0..values.len()).map(|n| format!("c{n}")).collect();
        let guards = compose_branch_guards(&branches(&names, true));
        let holds = evaluate_guards(&guards, &values);

        prop_assert_eq!(holds.iter().filter(|h| **h).count(), 1);
        let expected = values.iter().position(|v| *v).unwrap_or(values.len());
        prop_assert!(holds[expected]);
    }
}
