//! Targeting rule evaluation over user attributes.
//!
//! Rules combine with AND only; OR and nested groups are deliberately not
//! supported. Property paths are dotted lookups into the (possibly nested)
//! attribute map. A path that resolves to nothing fails the positive
//! operators (`equals`, `in`, `contains`) and passes the negated ones
//! (`not_equals`, `not_in`).

use serde_json::Value;
use shopsplit_core::types::{TargetingOperator, TargetingRule, UserContext};
use std::collections::HashMap;

/// Evaluate all rules against the user. Passes only if every rule passes;
/// an empty rule list always passes.
pub fn evaluate(user: &UserContext, rules: &[TargetingRule]) -> bool {
    rules.iter().all(|rule| rule_passes(user, rule))
}

/// Evaluate a single rule.
pub fn rule_passes(user: &UserContext, rule: &TargetingRule) -> bool {
    let actual = lookup_path(&user.attributes, &rule.property);
    match rule.operator {
        TargetingOperator::Equals => actual.map_or(false, |a| a == &rule.value),
        TargetingOperator::NotEquals => actual.map_or(true, |a| a != &rule.value),
        TargetingOperator::In => rule
            .value
            .as_array()
            .map_or(false, |list| actual.map_or(false, |a| list.contains(a))),
        TargetingOperator::NotIn => rule
            .value
            .as_array()
            .map_or(true, |list| actual.map_or(true, |a| !list.contains(a))),
        TargetingOperator::Contains => actual
            .and_then(Value::as_str)
            .zip(rule.value.as_str())
            .map_or(false, |(a, e)| a.contains(e)),
    }
}

/// Resolve a dotted path against the attribute map, descending into nested
/// objects. Any missing or non-object intermediate yields `None`.
fn lookup_path<'a>(attributes: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = attributes.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
