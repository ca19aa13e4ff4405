use serde::{Deserialize, Serialize};

/// Rules governing how expected and actual tool calls are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    /// Actual calls must satisfy the expected ones in the same order.
    pub match_order: bool,
    /// Expected arguments only need to be a subset of the actual ones.
    pub ignore_extra_args: bool,
    /// Unconsumed actual calls do not fail the trial.
    pub ignore_extra_calls: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            match_order: false,
            ignore_extra_args: false,
            ignore_extra_calls: true,
        }
    }
}

impl MatchPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match_order(mut self, value: bool) -> Self {
        self.match_order = value;
        self
    }

    pub fn with_ignore_extra_args(mut self, value: bool) -> Self {
        self.ignore_extra_args = value;
        self
    }

    pub fn with_ignore_extra_calls(mut self, value: bool) -> Self {
        self.ignore_extra_calls = value;
        self
    }
}
