use std::{future::Future, sync::Arc};

use async_trait::async_trait;

use crate::{
    eval::{matcher::Evaluator, report::EvalResult},
    types::{AgentResponse, Audio, ToolCall},
    RussoError,
};

/// Turns text into speech.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Audio, RussoError>;
}

/// The agent under test: takes audio, answers with tool calls.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, audio: &Audio) -> Result<AgentResponse, RussoError>;
}

/// Produces the actual tool calls for one prompt. This is the unit of work a
/// trial executes exactly once.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, prompt: &str) -> Result<AgentResponse, RussoError>;
}

#[async_trait]
impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    async fn synthesize(&self, text: &str) -> Result<Audio, RussoError> {
        (**self).synthesize(text).await
    }
}

#[async_trait]
impl<T: Agent + ?Sized> Agent for Arc<T> {
    async fn run(&self, audio: &Audio) -> Result<AgentResponse, RussoError> {
        (**self).run(audio).await
    }
}

#[async_trait]
impl<T: Producer + ?Sized> Producer for Arc<T> {
    async fn produce(&self, prompt: &str) -> Result<AgentResponse, RussoError> {
        (**self).produce(prompt).await
    }
}

/// Synthesis followed by agent invocation.
pub struct Pipeline<S, A> {
    synthesizer: S,
    agent: A,
}

impl<S, A> Pipeline<S, A>
where
    S: Synthesizer,
    A: Agent,
{
    pub fn new(synthesizer: S, agent: A) -> Self {
        Self { synthesizer, agent }
    }

    pub fn synthesizer(&self) -> &S {
        &self.synthesizer
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }
}

#[async_trait]
impl<S, A> Producer for Pipeline<S, A>
where
    S: Synthesizer,
    A: Agent,
{
    async fn produce(&self, prompt: &str) -> Result<AgentResponse, RussoError> {
        let audio = self.synthesizer.synthesize(prompt).await?;
        tracing::debug!(bytes = audio.len(), format = %audio.format, "synthesized prompt");
        self.agent.run(&audio).await
    }
}

pub struct FnAgent<F> {
    func: F,
}

/// Wraps an async closure as an [`Agent`].
pub fn agent_fn<F, Fut>(func: F) -> FnAgent<F>
where
    F: Fn(Audio) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentResponse, RussoError>> + Send,
{
    FnAgent { func }
}

#[async_trait]
impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(Audio) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentResponse, RussoError>> + Send,
{
    async fn run(&self, audio: &Audio) -> Result<AgentResponse, RussoError> {
        (self.func)(audio.clone()).await
    }
}

pub struct FnProducer<F> {
    func: F,
}

/// Wraps an async closure as a [`Producer`], for callers that do their own
/// synthesis and transport.
pub fn producer_fn<F, Fut>(func: F) -> FnProducer<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentResponse, RussoError>> + Send,
{
    FnProducer { func }
}

#[async_trait]
impl<F, Fut> Producer for FnProducer<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentResponse, RussoError>> + Send,
{
    async fn produce(&self, prompt: &str) -> Result<AgentResponse, RussoError> {
        (self.func)(prompt.to_string()).await
    }
}

/// One-shot run: synthesize `prompt`, hand the audio to `agent`, and evaluate
/// its tool calls against `expected`.
pub async fn run<S, A, E>(
    prompt: &str,
    synthesizer: &S,
    agent: &A,
    evaluator: &E,
    expected: &[ToolCall],
) -> Result<EvalResult, RussoError>
where
    S: Synthesizer + ?Sized,
    A: Agent + ?Sized,
    E: Evaluator + ?Sized,
{
    let audio = synthesizer.synthesize(prompt).await?;
    let response = agent.run(&audio).await?;
    let result = evaluator.evaluate(expected, &response.tool_calls);
    tracing::debug!(passed = result.passed, match_rate = result.match_rate(), "evaluated prompt");
    Ok(result)
}
