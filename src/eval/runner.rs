use std::{future::Future, time::Instant};

use futures_util::{stream::FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
    eval::{
        matcher::{Evaluator, ExactEvaluator},
        report::{BatchResult, EvalResult, SingleRunResult},
    },
    pipeline::Producer,
    types::ToolCall,
    RussoError,
};

/// One prompt or several prompt variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompts {
    One(String),
    Many(Vec<String>),
}

impl Prompts {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Prompts::One(prompt) => vec![prompt],
            Prompts::Many(prompts) => prompts,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Prompts::One(_) => 1,
            Prompts::Many(prompts) => prompts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Prompts {
    fn from(prompt: &str) -> Self {
        Prompts::One(prompt.to_string())
    }
}

impl From<String> for Prompts {
    fn from(prompt: String) -> Self {
        Prompts::One(prompt)
    }
}

impl From<Vec<String>> for Prompts {
    fn from(prompts: Vec<String>) -> Self {
        Prompts::Many(prompts)
    }
}

impl From<Vec<&str>> for Prompts {
    fn from(prompts: Vec<&str>) -> Self {
        Prompts::Many(prompts.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Prompts {
    fn from(prompts: &[&str]) -> Self {
        Prompts::Many(prompts.iter().map(|p| p.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Prompts {
    fn from(prompts: [&str; N]) -> Self {
        Prompts::Many(prompts.iter().map(|p| p.to_string()).collect())
    }
}

/// One cell of the batch matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    /// Position in prompt-major, run-index-minor order.
    pub index: usize,
    pub prompt: String,
    pub run_index: usize,
}

/// Builds the prompt × repetition matrix in prompt-major order.
pub fn build_trials(prompts: Prompts, runs_per_prompt: usize) -> Vec<Trial> {
    prompts
        .into_vec()
        .into_iter()
        .flat_map(|prompt| (0..runs_per_prompt).map(move |run_index| (prompt.clone(), run_index)))
        .enumerate()
        .map(|(index, (prompt, run_index))| Trial {
            index,
            prompt,
            run_index,
        })
        .collect()
}

/// Runs one trial: produce once, then match.
pub struct TrialExecutor<P, E = ExactEvaluator> {
    producer: P,
    evaluator: E,
    expected: Vec<ToolCall>,
}

impl<P: Producer> TrialExecutor<P> {
    pub fn new(producer: P, expected: Vec<ToolCall>) -> Self {
        Self {
            producer,
            evaluator: ExactEvaluator::default(),
            expected,
        }
    }
}

impl<P: Producer, E: Evaluator> TrialExecutor<P, E> {
    pub fn with_evaluator<E2: Evaluator>(self, evaluator: E2) -> TrialExecutor<P, E2> {
        TrialExecutor {
            producer: self.producer,
            evaluator,
            expected: self.expected,
        }
    }

    pub fn expected(&self) -> &[ToolCall] {
        &self.expected
    }

    /// Never fails: a producer error becomes a failed result carrying the
    /// reason so the trial still shows up in the batch.
    pub async fn execute(&self, trial: Trial) -> SingleRunResult {
        let started = Instant::now();
        let eval_result = match self.producer.produce(&trial.prompt).await {
            Ok(response) => self.evaluator.evaluate(&self.expected, &response.tool_calls),
            Err(err) => {
                tracing::warn!(
                    prompt = %trial.prompt,
                    run_index = trial.run_index,
                    error = %err,
                    "producer failed"
                );
                EvalResult::failed(self.expected.clone(), format!("producer failed: {err}"))
            }
        };

        tracing::debug!(
            prompt = %trial.prompt,
            run_index = trial.run_index,
            passed = eval_result.passed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "trial finished"
        );

        SingleRunResult {
            prompt: trial.prompt,
            run_index: trial.run_index,
            eval_result,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Completed(BatchResult),
    /// The caller cancelled the batch; no result is reported for it.
    Cancelled { completed: usize, total: usize },
}

impl BatchOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchOutcome::Cancelled { .. })
    }

    pub fn into_result(self) -> Option<BatchResult> {
        match self {
            BatchOutcome::Completed(batch) => Some(batch),
            BatchOutcome::Cancelled { .. } => None,
        }
    }
}

/// Expands prompts × repetitions into trials and runs them under a
/// concurrency bound, reporting results in matrix order.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    runs_per_prompt: usize,
    max_concurrency: Option<usize>,
    cancellation: Option<CancellationToken>,
}

impl Default for BatchOrchestrator {
    fn default() -> Self {
        Self {
            runs_per_prompt: 1,
            max_concurrency: None,
            cancellation: None,
        }
    }
}

impl BatchOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runs(mut self, runs_per_prompt: usize) -> Self {
        self.runs_per_prompt = runs_per_prompt;
        self
    }

    /// `None` dispatches every trial at once.
    pub fn with_max_concurrency(mut self, max_concurrency: impl Into<Option<usize>>) -> Self {
        self.max_concurrency = max_concurrency.into();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn validate(&self) -> Result<(), RussoError> {
        validate_batch(self.runs_per_prompt, self.max_concurrency)
    }

    pub async fn run<F, Fut>(
        &self,
        prompts: impl Into<Prompts>,
        trial_fn: F,
    ) -> Result<BatchOutcome, RussoError>
    where
        F: Fn(Trial) -> Fut,
        Fut: Future<Output = SingleRunResult>,
    {
        self.validate()?;

        let trials = build_trials(prompts.into(), self.runs_per_prompt);
        let total = trials.len();
        let cancellation = self.cancellation.clone().unwrap_or_default();
        let started = Instant::now();
        tracing::info!(
            total,
            runs_per_prompt = self.runs_per_prompt,
            max_concurrency = ?self.max_concurrency,
            "starting batch"
        );

        let semaphore = self.max_concurrency.map(Semaphore::new);
        let gate = semaphore.as_ref();
        let trial_fn = &trial_fn;

        let mut pending = FuturesUnordered::new();
        for trial in trials {
            pending.push(async move {
                // Permit is held until the trial completes.
                let _permit = match gate {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };
                let index = trial.index;
                (index, trial_fn(trial).await)
            });
        }

        let mut slots: Vec<Option<SingleRunResult>> = vec![None; total];
        let mut completed = 0usize;
        let cancelled = loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break true,
                next = pending.next() => match next {
                    Some((index, result)) => {
                        slots[index] = Some(result);
                        completed += 1;
                    }
                    None => break false,
                },
            }
        };

        if cancelled {
            drop(pending);
            tracing::warn!(completed, total, "batch cancelled");
            return Ok(BatchOutcome::Cancelled { completed, total });
        }

        let batch = BatchResult::new(slots.into_iter().flatten().collect());
        tracing::info!(
            total,
            passed = batch.passed_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        Ok(BatchOutcome::Completed(batch))
    }
}

/// Runs `trial_fn` for every (prompt, run index) pair with at most
/// `max_concurrency` trials in flight (`None` for unbounded).
pub async fn run_batch<F, Fut>(
    prompts: impl Into<Prompts>,
    runs_per_prompt: usize,
    max_concurrency: Option<usize>,
    trial_fn: F,
) -> Result<BatchResult, RussoError>
where
    F: Fn(Trial) -> Fut,
    Fut: Future<Output = SingleRunResult>,
{
    let outcome = BatchOrchestrator::new()
        .with_runs(runs_per_prompt)
        .with_max_concurrency(max_concurrency)
        .run(prompts, trial_fn)
        .await?;

    match outcome {
        BatchOutcome::Completed(batch) => Ok(batch),
        BatchOutcome::Cancelled { .. } => {
            unreachable!("a batch without a cancellation token cannot be cancelled")
        }
    }
}

/// Batch form of [`crate::run`]: every prompt × run goes through `producer`
/// and is judged by `evaluator` against `expected`.
pub async fn run_concurrent<P, E>(
    prompts: impl Into<Prompts>,
    producer: P,
    evaluator: E,
    expected: Vec<ToolCall>,
    runs_per_prompt: usize,
    max_concurrency: Option<usize>,
) -> Result<BatchResult, RussoError>
where
    P: Producer,
    E: Evaluator,
{
    let executor = TrialExecutor::new(producer, expected).with_evaluator(evaluator);
    let executor = &executor;
    run_batch(prompts, runs_per_prompt, max_concurrency, move |trial| {
        executor.execute(trial)
    })
    .await
}

pub(crate) fn validate_batch(
    runs_per_prompt: usize,
    max_concurrency: Option<usize>,
) -> Result<(), RussoError> {
    if runs_per_prompt == 0 {
        return Err(RussoError::InvalidBatch(
            "runs_per_prompt must be at least 1".to_string(),
        ));
    }
    if max_concurrency == Some(0) {
        return Err(RussoError::InvalidBatch(
            "max_concurrency must be at least 1 (or unbounded)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };

    use tokio::time::sleep;
    use tokio_util::sync::CancellationToken;

    use super::{
        build_trials, run_batch, run_concurrent, BatchOrchestrator, BatchOutcome, Prompts, Trial,
        TrialExecutor,
    };
    use crate::{
        eval::{matcher::ExactEvaluator, policy::MatchPolicy},
        pipeline::producer_fn,
        types::{AgentResponse, ToolCall},
        RussoError,
    };

    fn book_flight() -> ToolCall {
        ToolCall::new("book_flight")
    }

    fn always_books() -> impl crate::pipeline::Producer {
        producer_fn(|_prompt: String| async move {
            Ok::<_, RussoError>(AgentResponse::new(vec![book_flight().with_arg("from", "A")]))
        })
    }

    #[test]
    fn builds_prompt_major_matrix() {
        let trials = build_trials(Prompts::from(["a", "b"]), 2);
        let cells: Vec<(usize, &str, usize)> = trials
            .iter()
            .map(|t| (t.index, t.prompt.as_str(), t.run_index))
            .collect();
        assert_eq!(cells, vec![(0, "a", 0), (1, "a", 1), (2, "b", 0), (3, "b", 1)]);
    }

    #[test]
    fn single_prompt_is_a_one_element_matrix() {
        let trials = build_trials(Prompts::from("hello"), 3);
        assert_eq!(trials.len(), 3);
        assert!(trials.iter().all(|t| t.prompt == "hello"));
    }

    #[tokio::test]
    async fn keeps_matrix_order_when_trials_finish_out_of_order() {
        let prompts = vec!["p0", "p1", "p2"];
        for max_concurrency in [None, Some(2)] {
            let batch = run_batch(prompts.clone(), 3, max_concurrency, |trial: Trial| async move {
                // Later trials finish first.
                sleep(Duration::from_millis(5 * (9 - trial.index as u64))).await;
                crate::eval::report::SingleRunResult {
                    prompt: trial.prompt,
                    run_index: trial.run_index,
                    eval_result: crate::eval::report::EvalResult::new(true, vec![], vec![], vec![]),
                }
            })
            .await
            .unwrap();

            assert_eq!(batch.total(), 9);
            let order: Vec<(String, usize)> = batch
                .runs
                .iter()
                .map(|run| (run.prompt.clone(), run.run_index))
                .collect();
            let expected: Vec<(String, usize)> = prompts
                .iter()
                .flat_map(|p| (0..3).map(move |i| (p.to_string(), i)))
                .collect();
            assert_eq!(order, expected);
        }
    }

    #[tokio::test]
    async fn serial_and_parallel_batches_agree() {
        let flaky = || {
            producer_fn(|prompt: String| async move {
                sleep(Duration::from_millis(10)).await;
                let name = if prompt.contains("weather") { "get_weather" } else { "book_flight" };
                Ok::<_, RussoError>(AgentResponse::new(vec![ToolCall::new(name)]))
            })
        };
        let prompts = vec!["book a flight", "what's the weather"];

        let serial = run_concurrent(
            prompts.clone(),
            flaky(),
            ExactEvaluator::default(),
            vec![book_flight()],
            3,
            Some(1),
        )
        .await
        .unwrap();
        let parallel = run_concurrent(
            prompts,
            flaky(),
            ExactEvaluator::default(),
            vec![book_flight()],
            3,
            Some(3),
        )
        .await
        .unwrap();

        assert_eq!(serial, parallel);
        assert_eq!(serial.passed_count(), 3);
        assert!(!serial.passed());
    }

    #[tokio::test]
    async fn respects_max_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let producer = {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            producer_fn(move |_prompt: String| {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, RussoError>(AgentResponse::new(vec![book_flight()]))
                }
            })
        };

        let batch = run_concurrent(
            "test",
            producer,
            ExactEvaluator::default(),
            vec![book_flight()],
            10,
            Some(2),
        )
        .await
        .unwrap();

        assert_eq!(batch.total(), 10);
        assert!(batch.passed());
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
        assert!(max_seen.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn unbounded_batches_run_concurrently() {
        let producer = producer_fn(|_prompt: String| async move {
            sleep(Duration::from_millis(100)).await;
            Ok::<_, RussoError>(AgentResponse::new(vec![book_flight()]))
        });

        let started = Instant::now();
        let batch = run_concurrent("test", producer, ExactEvaluator::default(), vec![book_flight()], 5, None)
            .await
            .unwrap();

        assert_eq!(batch.total(), 5);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn rejects_invalid_configuration_before_running() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let trial_fn = |trial: Trial| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            crate::eval::report::SingleRunResult {
                prompt: trial.prompt,
                run_index: trial.run_index,
                eval_result: crate::eval::report::EvalResult::new(true, vec![], vec![], vec![]),
            }
        };

        let zero_runs = run_batch("p", 0, None, trial_fn).await.unwrap_err();
        assert!(matches!(zero_runs, RussoError::InvalidBatch(_)));

        let zero_concurrency = run_batch("p", 1, Some(0), trial_fn).await.unwrap_err();
        assert!(matches!(zero_concurrency, RussoError::InvalidBatch(_)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn producer_failures_become_failed_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let producer = {
            let counter = Arc::clone(&counter);
            producer_fn(move |_prompt: String| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 1 {
                        Err(RussoError::Provider("socket closed".to_string()))
                    } else {
                        Ok(AgentResponse::new(vec![book_flight()]))
                    }
                }
            })
        };

        let batch = run_concurrent("p", producer, ExactEvaluator::default(), vec![book_flight()], 4, Some(1))
            .await
            .unwrap();

        assert_eq!(batch.total(), 4);
        assert_eq!(batch.passed_count(), 2);
        assert!(!batch.passed());
        let failed = batch.runs.iter().find(|run| !run.passed()).unwrap();
        assert_eq!(failed.eval_result.match_rate(), 0.0);
        assert!(failed.eval_result.error.as_deref().unwrap().contains("socket closed"));
    }

    #[tokio::test]
    async fn executor_invokes_producer_once_per_trial() {
        let counter = Arc::new(AtomicUsize::new(0));
        let producer = {
            let counter = Arc::clone(&counter);
            producer_fn(move |_prompt: String| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok::<_, RussoError>(AgentResponse::new(vec![
                        book_flight().with_arg("from", "NYC").with_arg("to", "LA"),
                    ]))
                }
            })
        };
        let executor = TrialExecutor::new(producer, vec![book_flight().with_arg("from", "NYC")])
            .with_evaluator(ExactEvaluator::new(
                MatchPolicy::default().with_ignore_extra_args(true),
            ));

        let result = executor
            .execute(Trial {
                index: 0,
                prompt: "Book it".to_string(),
                run_index: 0,
            })
            .await;

        assert!(result.passed());
        assert_eq!(result.prompt, "Book it");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_batch_is_reported_distinctly() {
        let token = CancellationToken::new();
        let orchestrator = BatchOrchestrator::new()
            .with_runs(4)
            .with_max_concurrency(1)
            .with_cancellation(token.clone());

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(30)).await;
                token.cancel();
            })
        };

        let executor = TrialExecutor::new(
            producer_fn(|_prompt: String| async move {
                sleep(Duration::from_millis(20)).await;
                Ok::<_, RussoError>(AgentResponse::new(vec![book_flight()]))
            }),
            vec![book_flight()],
        );
        let executor = &executor;
        let outcome = orchestrator
            .run("p", move |trial| executor.execute(trial))
            .await
            .unwrap();
        canceller.await.unwrap();

        match outcome {
            BatchOutcome::Cancelled { completed, total } => {
                assert_eq!(total, 4);
                assert!(completed < total);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn empty_prompt_list_yields_empty_batch() {
        let batch = run_concurrent(
            Vec::<String>::new(),
            always_books(),
            ExactEvaluator::default(),
            vec![book_flight()],
            2,
            None,
        )
        .await
        .unwrap();
        assert_eq!(batch.total(), 0);
        assert!(batch.passed());
    }
}
