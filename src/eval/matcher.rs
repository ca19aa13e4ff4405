use serde_json::{Map, Value};

use crate::{
    eval::{
        policy::MatchPolicy,
        report::{EvalResult, MatchVerdict},
    },
    types::{values_equal, ToolCall},
};

/// Compares expected tool calls against the calls an agent actually made.
///
/// Implement this for custom matching strategies; [`ExactEvaluator`] covers
/// name-and-argument matching under a [`MatchPolicy`].
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expected: &[ToolCall], actual: &[ToolCall]) -> EvalResult;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExactEvaluator {
    policy: MatchPolicy,
}

impl ExactEvaluator {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }
}

impl Evaluator for ExactEvaluator {
    fn evaluate(&self, expected: &[ToolCall], actual: &[ToolCall]) -> EvalResult {
        evaluate(expected, actual, &self.policy)
    }
}

impl<E: Evaluator + ?Sized> Evaluator for std::sync::Arc<E> {
    fn evaluate(&self, expected: &[ToolCall], actual: &[ToolCall]) -> EvalResult {
        (**self).evaluate(expected, actual)
    }
}

/// Matches `expected` against `actual` under `policy`.
///
/// When several unconsumed actual calls are compatible with an expected one,
/// the earliest in `actual` wins. In ordered mode a miss leaves the cursor
/// where it was, so the next expected call is tried against the same actual.
pub fn evaluate(expected: &[ToolCall], actual: &[ToolCall], policy: &MatchPolicy) -> EvalResult {
    if expected.is_empty() {
        return EvalResult::new(true, Vec::new(), actual.to_vec(), Vec::new());
    }

    let mut consumed = vec![false; actual.len()];
    let mut cursor = 0usize;
    let mut matches = Vec::with_capacity(expected.len());

    for exp in expected {
        let verdict = if policy.match_order {
            match actual.get(cursor) {
                Some(candidate) if is_compatible(exp, candidate, policy) => {
                    consumed[cursor] = true;
                    cursor += 1;
                    MatchVerdict::matched(exp.clone(), candidate.clone())
                }
                Some(candidate) => MatchVerdict::missed(
                    exp.clone(),
                    format!(
                        "position {cursor}: expected {exp}, got {candidate} ({})",
                        describe_mismatch(exp, candidate, policy)
                    ),
                ),
                None => MatchVerdict::missed(
                    exp.clone(),
                    format!("position {cursor}: no actual call left at this position"),
                ),
            }
        } else {
            let found = actual
                .iter()
                .enumerate()
                .position(|(i, candidate)| !consumed[i] && is_compatible(exp, candidate, policy));
            match found {
                Some(i) => {
                    consumed[i] = true;
                    MatchVerdict::matched(exp.clone(), actual[i].clone())
                }
                None => MatchVerdict::missed(exp.clone(), diagnose(exp, actual, &consumed, policy)),
            }
        };
        matches.push(verdict);
    }

    let all_matched = matches.iter().all(MatchVerdict::is_matched);
    let leftovers: Vec<ToolCall> = actual
        .iter()
        .zip(&consumed)
        .filter(|(_, used)| !**used)
        .map(|(call, _)| call.clone())
        .collect();
    let extra_calls_ok = policy.ignore_extra_calls || leftovers.is_empty();

    let mut result = EvalResult::new(
        all_matched && extra_calls_ok,
        expected.to_vec(),
        actual.to_vec(),
        matches,
    );
    if !policy.ignore_extra_calls {
        result.unexpected_calls = leftovers;
    }
    result
}

fn is_compatible(expected: &ToolCall, actual: &ToolCall, policy: &MatchPolicy) -> bool {
    expected.name() == actual.name()
        && arguments_compatible(expected.arguments(), actual.arguments(), policy)
}

fn arguments_compatible(
    expected: &Map<String, Value>,
    actual: &Map<String, Value>,
    policy: &MatchPolicy,
) -> bool {
    if !policy.ignore_extra_args && expected.len() != actual.len() {
        return false;
    }
    expected
        .iter()
        .all(|(key, value)| actual.get(key).is_some_and(|other| values_equal(value, other)))
}

fn diagnose(expected: &ToolCall, actual: &[ToolCall], consumed: &[bool], policy: &MatchPolicy) -> String {
    let remaining: Vec<&ToolCall> = actual
        .iter()
        .zip(consumed)
        .filter(|(_, used)| !**used)
        .map(|(call, _)| call)
        .collect();

    if remaining.is_empty() {
        return "no remaining actual calls to match against".to_string();
    }

    let same_name: Vec<&ToolCall> = remaining
        .iter()
        .copied()
        .filter(|call| call.name() == expected.name())
        .collect();

    if let Some(closest) = same_name
        .iter()
        .copied()
        .min_by_key(|call| argument_distance(expected, call, policy))
    {
        return format!(
            "{} remaining {} call(s) with different arguments; closest: {}",
            same_name.len(),
            expected.name(),
            argument_diff(expected, closest, policy)
        );
    }

    let closest = remaining
        .iter()
        .min_by_key(|call| strsim::levenshtein(expected.name(), call.name()))
        .map(|call| call.name())
        .unwrap_or_default();
    format!(
        "no remaining call named '{}' among {} candidate(s); closest name: '{closest}'",
        expected.name(),
        remaining.len()
    )
}

fn describe_mismatch(expected: &ToolCall, actual: &ToolCall, policy: &MatchPolicy) -> String {
    if expected.name() != actual.name() {
        return format!("name: expected '{}', got '{}'", expected.name(), actual.name());
    }
    argument_diff(expected, actual, policy)
}

fn argument_distance(expected: &ToolCall, actual: &ToolCall, policy: &MatchPolicy) -> usize {
    let mut distance = 0;
    for (key, value) in expected.arguments() {
        match actual.arguments().get(key) {
            None => distance += 2,
            Some(other) if !values_equal(value, other) => distance += 1,
            Some(_) => {}
        }
    }
    if !policy.ignore_extra_args {
        distance += actual
            .arguments()
            .keys()
            .filter(|key| !expected.arguments().contains_key(*key))
            .count();
    }
    distance
}

fn argument_diff(expected: &ToolCall, actual: &ToolCall, policy: &MatchPolicy) -> String {
    let mut diffs = Vec::new();
    for (key, value) in expected.arguments() {
        match actual.arguments().get(key) {
            None => diffs.push(format!("arg '{key}': missing (expected {value})")),
            Some(other) if !values_equal(value, other) => {
                diffs.push(format!("arg '{key}': expected {value}, got {other}"))
            }
            Some(_) => {}
        }
    }
    if !policy.ignore_extra_args {
        for (key, value) in actual.arguments() {
            if !expected.arguments().contains_key(key) {
                diffs.push(format!("arg '{key}': unexpected (got {value})"));
            }
        }
    }
    if diffs.is_empty() {
        "arguments differ".to_string()
    } else {
        diffs.join("; ")
    }
}
