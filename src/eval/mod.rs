pub mod matcher;
pub mod policy;
pub mod report;
pub mod runner;
pub mod scenario;

pub use matcher::{evaluate, Evaluator, ExactEvaluator};
pub use policy::MatchPolicy;
pub use report::{assert_tool_calls, BatchResult, EvalResult, MatchVerdict, SingleRunResult};
pub use runner::{
    build_trials, run_batch, run_concurrent, BatchOrchestrator, BatchOutcome, Prompts, Trial,
    TrialExecutor,
};
pub use scenario::{filter_scenarios, load_scenarios, Scenario};
