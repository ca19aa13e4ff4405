use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    eval::{
        matcher::ExactEvaluator,
        policy::MatchPolicy,
        report::BatchResult,
        runner::{run_concurrent, validate_batch, BatchOrchestrator, Prompts, TrialExecutor},
    },
    pipeline::Producer,
    types::ToolCall,
    RussoError,
};

fn default_runs() -> usize {
    1
}

/// A named test case: which prompts to speak, which tool calls to expect,
/// and how strictly to compare them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(alias = "prompt")]
    pub prompts: Prompts,
    #[serde(default)]
    pub expect: Vec<ToolCall>,
    #[serde(default)]
    pub policy: MatchPolicy,
    #[serde(default = "default_runs")]
    pub runs: usize,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, prompts: impl Into<Prompts>) -> Self {
        Self {
            name: name.into(),
            prompts: prompts.into(),
            expect: Vec::new(),
            policy: MatchPolicy::default(),
            runs: default_runs(),
            max_concurrency: None,
        }
    }

    pub fn expecting(mut self, call: ToolCall) -> Self {
        self.expect.push(call);
        self
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_runs(mut self, runs: usize) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Rejects settings the orchestrator would refuse, so a bad scenario is
    /// caught before any batch starts.
    pub fn validate(&self) -> Result<(), RussoError> {
        validate_batch(self.runs, self.max_concurrency).map_err(|err| match err {
            RussoError::InvalidBatch(reason) => {
                RussoError::InvalidBatch(format!("scenario {}: {reason}", self.name))
            }
            other => other,
        })
    }

    pub fn evaluator(&self) -> ExactEvaluator {
        ExactEvaluator::new(self.policy)
    }

    /// Orchestrator preconfigured with this scenario's runs and concurrency.
    pub fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::new()
            .with_runs(self.runs)
            .with_max_concurrency(self.max_concurrency)
    }

    pub fn executor<P: Producer>(&self, producer: P) -> TrialExecutor<P, ExactEvaluator> {
        TrialExecutor::new(producer, self.expect.clone()).with_evaluator(self.evaluator())
    }

    pub async fn run<P: Producer>(&self, producer: P) -> Result<BatchResult, RussoError> {
        tracing::info!(scenario = %self.name, prompts = self.prompts.len(), runs = self.runs, "running scenario");
        run_concurrent(
            self.prompts.clone(),
            producer,
            self.evaluator(),
            self.expect.clone(),
            self.runs,
            self.max_concurrency,
        )
        .await
    }
}

fn is_scenario_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

/// A file holds either one scenario or a list of them.
fn parse_scenario_file(path: &Path) -> Result<Vec<Scenario>, RussoError> {
    let bytes = fs::read(path)?;
    let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");

    if is_json {
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        if value.is_array() {
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(vec![serde_json::from_value(value)?])
        }
    } else {
        let value: serde_yaml::Value = serde_yaml::from_slice(&bytes)?;
        if value.is_sequence() {
            Ok(serde_yaml::from_value(value)?)
        } else {
            Ok(vec![serde_yaml::from_value(value)?])
        }
    }
}

/// Loads scenarios from a single file or every `.yaml`/`.yml`/`.json` file in
/// a directory, sorted by scenario name. One invalid scenario fails the load.
pub fn load_scenarios(path: impl AsRef<Path>) -> Result<Vec<Scenario>, RussoError> {
    let path = path.as_ref();
    let mut scenarios = Vec::new();

    if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<_, _>>()?;
        files.retain(|file| file.is_file() && is_scenario_file(file));
        files.sort();
        for file in files {
            scenarios.extend(parse_scenario_file(&file)?);
        }
    } else {
        scenarios = parse_scenario_file(path)?;
    }

    for scenario in &scenarios {
        scenario.validate()?;
    }
    scenarios.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(path = %path.display(), count = scenarios.len(), "loaded scenarios");
    Ok(scenarios)
}

/// Keeps scenarios whose name contains any of `filters`; no filters keeps all.
pub fn filter_scenarios(scenarios: Vec<Scenario>, filters: &[String]) -> Vec<Scenario> {
    if filters.is_empty() {
        return scenarios;
    }
    scenarios
        .into_iter()
        .filter(|scenario| filters.iter().any(|f| scenario.name.contains(f.as_str())))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::{filter_scenarios, load_scenarios, Scenario};
    use crate::{
        eval::runner::Prompts,
        pipeline::producer_fn,
        types::{AgentResponse, ToolCall},
        RussoError,
    };

    const BOOKING_YAML: &str = r#"
name: book_flight
prompts:
  - "Book a flight from NYC to LA"
  - "I need to fly from New York to Los Angeles"
expect:
  - name: book_flight
    arguments:
      from: NYC
      to: LA
policy:
  ignore_extra_args: true
runs: 3
max_concurrency: 2
"#;

    #[test]
    fn parses_yaml_scenario_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("booking.yaml");
        fs::write(&file, BOOKING_YAML).unwrap();

        let scenarios = load_scenarios(&file).unwrap();
        assert_eq!(scenarios.len(), 1);
        let scenario = &scenarios[0];
        assert_eq!(scenario.name, "book_flight");
        assert_eq!(scenario.prompts.len(), 2);
        assert_eq!(scenario.runs, 3);
        assert_eq!(scenario.max_concurrency, Some(2));
        assert!(scenario.policy.ignore_extra_args);
        assert!(scenario.policy.ignore_extra_calls);
        assert!(!scenario.policy.match_order);
        assert_eq!(
            scenario.expect,
            vec![ToolCall::new("book_flight").with_arg("from", "NYC").with_arg("to", "LA")]
        );
    }

    #[test]
    fn loads_directory_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), BOOKING_YAML).unwrap();
        fs::write(
            dir.path().join("a.json"),
            json!([
                {"name": "weather", "prompt": "What's the weather?", "expect": [{"name": "get_weather"}]},
                {"name": "alarm", "prompt": "Wake me at 7", "expect": []}
            ])
            .to_string(),
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scenarios = load_scenarios(dir.path()).unwrap();
        let names: Vec<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alarm", "book_flight", "weather"]);
        assert_eq!(scenarios[2].prompts, Prompts::from("What's the weather?"));
        assert_eq!(scenarios[2].runs, 1);
    }

    #[test]
    fn rejects_malformed_expected_calls() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.json");
        fs::write(
            &file,
            json!({"name": "bad", "prompt": "x", "expect": [{"name": "", "arguments": {}}]}).to_string(),
        )
        .unwrap();

        let err = load_scenarios(&file).unwrap_err();
        assert!(matches!(err, RussoError::Serialization(_)));
    }

    #[test]
    fn rejects_zero_runs_and_zero_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), BOOKING_YAML).unwrap();
        fs::write(dir.path().join("b.yaml"), "name: idle\nprompt: hi\nruns: 0\n").unwrap();

        let err = load_scenarios(dir.path()).unwrap_err();
        assert!(matches!(err, RussoError::InvalidBatch(_)), "{err}");
        assert!(err.to_string().contains("scenario idle"), "{err}");

        let file = dir.path().join("c.yaml");
        fs::write(&file, "name: stalled\nprompt: hi\nmax_concurrency: 0\n").unwrap();
        let err = load_scenarios(&file).unwrap_err();
        assert!(err.to_string().contains("max_concurrency"), "{err}");

        assert!(Scenario::new("ok", "hi").with_max_concurrency(Some(1)).validate().is_ok());
        assert!(Scenario::new("zero", "hi").with_runs(0).validate().is_err());
    }

    #[test]
    fn filters_by_substring() {
        let scenarios = vec![
            Scenario::new("book_flight", "a"),
            Scenario::new("book_hotel", "b"),
            Scenario::new("weather", "c"),
        ];
        let filtered = filter_scenarios(scenarios.clone(), &["book".to_string()]);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filter_scenarios(scenarios, &[]).len(), 3);
    }

    #[tokio::test]
    async fn runs_scenario_through_producer() {
        let scenario = Scenario::new("weather", ["Weather in Paris?", "Is it raining in Paris?"])
            .expecting(ToolCall::new("get_weather").with_arg("city", "Paris"))
            .with_runs(2);
        let producer = producer_fn(|_prompt: String| async move {
            Ok::<_, RussoError>(AgentResponse::new(vec![
                ToolCall::new("get_weather").with_arg("city", "Paris"),
            ]))
        });

        let batch = scenario.run(producer).await.unwrap();
        assert_eq!(batch.total(), 4);
        assert!(batch.passed(), "{}", batch.summary());
    }
}
