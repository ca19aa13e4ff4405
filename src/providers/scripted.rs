use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    pipeline::{Agent, Producer, Synthesizer},
    types::{AgentResponse, Audio, ToolCall},
    RussoError,
};

/// Deterministic agent for tests and demos.
///
/// Responses registered for a prompt win; otherwise the fallback sequence is
/// replayed round robin. As an [`Agent`] the prompt is recovered from audio
/// produced by [`TextSynthesizer`].
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    by_prompt: HashMap<String, Vec<ToolCall>>,
    sequence: Vec<Vec<ToolCall>>,
    cursor: AtomicUsize,
    latency: Option<Duration>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, prompt: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        self.by_prompt.insert(prompt.into(), tool_calls);
        self
    }

    pub fn with_fallback(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.sequence.push(tool_calls);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn respond(&self, prompt: Option<&str>) -> Result<AgentResponse, RussoError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(calls) = prompt.and_then(|p| self.by_prompt.get(p)) {
            return Ok(AgentResponse::new(calls.clone()));
        }

        if self.sequence.is_empty() {
            return Err(RussoError::Provider(format!(
                "no scripted response for prompt {:?}",
                prompt.unwrap_or("<binary audio>")
            )));
        }
        let turn = self.cursor.fetch_add(1, Ordering::SeqCst) % self.sequence.len();
        Ok(AgentResponse::new(self.sequence[turn].clone()))
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn run(&self, audio: &Audio) -> Result<AgentResponse, RussoError> {
        self.respond(std::str::from_utf8(&audio.data).ok()).await
    }
}

#[async_trait]
impl Producer for ScriptedAgent {
    async fn produce(&self, prompt: &str) -> Result<AgentResponse, RussoError> {
        self.respond(Some(prompt)).await
    }
}

/// "Synthesizes" by storing the UTF-8 text as the audio payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSynthesizer;

#[async_trait]
impl Synthesizer for TextSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Audio, RussoError> {
        Ok(Audio::new(text.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{ScriptedAgent, TextSynthesizer};
    use crate::{
        pipeline::{Pipeline, Producer},
        types::ToolCall,
        RussoError,
    };

    #[tokio::test]
    async fn prefers_prompt_specific_responses() {
        let agent = ScriptedAgent::new()
            .with_response("weather?", vec![ToolCall::new("get_weather")])
            .with_fallback(vec![ToolCall::new("noop")]);

        let specific = agent.produce("weather?").await.unwrap();
        assert_eq!(specific.tool_calls, vec![ToolCall::new("get_weather")]);
        let fallback = agent.produce("anything else").await.unwrap();
        assert_eq!(fallback.tool_calls, vec![ToolCall::new("noop")]);
    }

    #[tokio::test]
    async fn fallback_sequence_round_robins() {
        let agent = ScriptedAgent::new()
            .with_fallback(vec![ToolCall::new("a")])
            .with_fallback(vec![ToolCall::new("b")]);

        let mut names = Vec::new();
        for _ in 0..3 {
            let response = agent.produce("p").await.unwrap();
            names.push(response.tool_calls[0].name().to_string());
        }
        assert_eq!(names, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn unscripted_prompt_is_an_error() {
        let err = ScriptedAgent::new().produce("hello").await.unwrap_err();
        assert!(matches!(err, RussoError::Provider(_)));
    }

    #[tokio::test]
    async fn pipeline_recovers_prompt_from_text_audio() {
        let pipeline = Pipeline::new(
            TextSynthesizer,
            ScriptedAgent::new().with_response("book it", vec![ToolCall::new("book_flight")]),
        );
        let response = pipeline.produce("book it").await.unwrap();
        assert_eq!(response.tool_calls, vec![ToolCall::new("book_flight")]);
    }

    #[tokio::test]
    async fn latency_is_applied() {
        let agent = ScriptedAgent::new()
            .with_fallback(vec![])
            .with_latency(Duration::from_millis(30));
        let started = Instant::now();
        agent.produce("p").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
