pub mod cache;
pub mod error;
pub mod eval;
pub mod parsers;
pub mod pipeline;
pub mod providers;
pub mod types;

pub use error::RussoError;
pub use types::{AgentResponse, Audio, AudioFormat, IntoArgument, ToolCall};
pub use pipeline::{agent_fn, producer_fn, run, Agent, Pipeline, Producer, Synthesizer};
pub use eval::{
    assert_tool_calls, evaluate, run_batch, run_concurrent, BatchOrchestrator, BatchOutcome,
    BatchResult, EvalResult, Evaluator, ExactEvaluator, MatchPolicy, MatchVerdict, Prompts,
    SingleRunResult, Trial, TrialExecutor,
};
pub use cache::{derive_key, AudioCache, CacheEntry, CacheMetadata, CachedSynthesizer};
pub use parsers::{GeminiResponseParser, JsonResponseParser, OpenAiResponseParser, ResponseParser};
