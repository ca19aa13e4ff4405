use std::fmt::Write as _;

use serde::Serialize;

use crate::types::ToolCall;

/// Outcome of comparing one expected call against the actual calls.
///
/// An unmatched verdict never carries an actual call; diagnostics about the
/// closest candidate live in `details`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchVerdict {
    expected: ToolCall,
    #[serde(skip_serializing_if = "Option::is_none")]
    actual: Option<ToolCall>,
    matched: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    details: String,
}

impl MatchVerdict {
    pub fn matched(expected: ToolCall, actual: ToolCall) -> Self {
        Self {
            expected,
            actual: Some(actual),
            matched: true,
            details: String::new(),
        }
    }

    pub fn missed(expected: ToolCall, details: impl Into<String>) -> Self {
        Self {
            expected,
            actual: None,
            matched: false,
            details: details.into(),
        }
    }

    pub fn expected(&self) -> &ToolCall {
        &self.expected
    }

    pub fn actual(&self) -> Option<&ToolCall> {
        self.actual.as_ref()
    }

    pub fn is_matched(&self) -> bool {
        self.matched
    }

    pub fn details(&self) -> &str {
        &self.details
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalResult {
    pub passed: bool,
    pub expected: Vec<ToolCall>,
    pub actual: Vec<ToolCall>,
    /// One verdict per expected call, in expected order.
    pub matches: Vec<MatchVerdict>,
    /// Actual calls left unconsumed when the policy forbids extra calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unexpected_calls: Vec<ToolCall>,
    /// Set when the trial never reached the matcher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvalResult {
    pub fn new(
        passed: bool,
        expected: Vec<ToolCall>,
        actual: Vec<ToolCall>,
        matches: Vec<MatchVerdict>,
    ) -> Self {
        Self {
            passed,
            expected,
            actual,
            matches,
            unexpected_calls: Vec::new(),
            error: None,
        }
    }

    /// Placeholder for a trial whose producer failed before anything could be
    /// matched.
    pub fn failed(expected: Vec<ToolCall>, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            expected,
            actual: Vec::new(),
            matches: Vec::new(),
            unexpected_calls: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn matched_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_matched()).count()
    }

    /// Fraction of expected calls that matched; 1.0 when nothing was expected
    /// and 0.0 when the trial errored out.
    pub fn match_rate(&self) -> f64 {
        if self.error.is_some() {
            return 0.0;
        }
        if self.expected.is_empty() {
            return 1.0;
        }
        self.matched_count() as f64 / self.expected.len() as f64
    }

    pub fn summary(&self) -> String {
        let status = if self.passed { "PASSED" } else { "FAILED" };
        let mut out = format!("{status} ({:.0}% match rate)", self.match_rate() * 100.0);

        if let Some(error) = &self.error {
            let _ = write!(out, "\n  error: {error}");
        }

        for verdict in &self.matches {
            let icon = if verdict.is_matched() { '+' } else { '-' };
            let actual = verdict
                .actual()
                .map(|call| call.to_string())
                .unwrap_or_else(|| "(no match)".to_string());
            let _ = write!(out, "\n  [{icon}] {} -> {actual}", verdict.expected());
            if !verdict.details().is_empty() {
                let _ = write!(out, "\n      {}", verdict.details());
            }
        }

        for call in &self.unexpected_calls {
            let _ = write!(out, "\n  [!] unexpected extra call: {call}");
        }

        out
    }
}

/// One trial of a batch: which prompt, which repetition, and how it went.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleRunResult {
    pub prompt: String,
    pub run_index: usize,
    pub eval_result: EvalResult,
}

impl SingleRunResult {
    pub fn passed(&self) -> bool {
        self.eval_result.passed
    }
}

/// All trials of a batch in matrix order (prompt-major, then run index).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub runs: Vec<SingleRunResult>,
}

impl BatchResult {
    pub fn new(runs: Vec<SingleRunResult>) -> Self {
        Self { runs }
    }

    pub fn total(&self) -> usize {
        self.runs.len()
    }

    pub fn passed(&self) -> bool {
        self.runs.iter().all(SingleRunResult::passed)
    }

    pub fn passed_count(&self) -> usize {
        self.runs.iter().filter(|run| run.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.total() - self.passed_count()
    }

    pub fn pass_rate(&self) -> f64 {
        if self.runs.is_empty() {
            return 1.0;
        }
        self.passed_count() as f64 / self.total() as f64
    }

    pub fn match_rate(&self) -> f64 {
        if self.runs.is_empty() {
            return 1.0;
        }
        let sum: f64 = self.runs.iter().map(|run| run.eval_result.match_rate()).sum();
        sum / self.total() as f64
    }

    /// Runs grouped by prompt, prompts in order of first appearance.
    pub fn by_prompt(&self) -> Vec<(&str, Vec<&SingleRunResult>)> {
        let mut groups: Vec<(&str, Vec<&SingleRunResult>)> = Vec::new();
        for run in &self.runs {
            match groups.iter_mut().find(|(prompt, _)| *prompt == run.prompt) {
                Some((_, runs)) => runs.push(run),
                None => groups.push((run.prompt.as_str(), vec![run])),
            }
        }
        groups
    }

    pub fn summary(&self) -> String {
        let status = if self.passed() { "PASSED" } else { "FAILED" };
        let mut out = format!(
            "{status}: {}/{} runs passed ({:.0}% pass rate, {:.0}% match rate)",
            self.passed_count(),
            self.total(),
            self.pass_rate() * 100.0,
            self.match_rate() * 100.0
        );

        for (prompt, runs) in self.by_prompt() {
            let passed = runs.iter().filter(|run| run.passed()).count();
            let _ = write!(out, "\n  prompt {prompt:?}: {passed}/{} passed", runs.len());
            for run in runs {
                let icon = if run.passed() { '+' } else { '-' };
                let _ = write!(
                    out,
                    "\n    [{icon}] run {} ({:.0}% match)",
                    run.run_index,
                    run.eval_result.match_rate() * 100.0
                );
                if !run.passed() {
                    for line in run.eval_result.summary().lines().skip(1) {
                        let _ = write!(out, "\n    {line}");
                    }
                }
            }
        }

        out
    }
}

/// Test helper: panics with the rendered diff when `result` did not pass.
#[track_caller]
pub fn assert_tool_calls(result: &EvalResult) {
    if !result.passed {
        panic!("tool call assertion failed\n{}", result.summary());
    }
}
