use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::{
    parsers::{JsonResponseParser, ResponseParser},
    pipeline::Agent,
    providers::audio_payload,
    types::{AgentResponse, Audio},
    RussoError,
};

#[derive(Debug, Clone)]
pub struct HttpAgentConfig {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub audio_field: String,
    pub format_field: String,
    pub request_timeout: Duration,
}

impl HttpAgentConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
            headers: Vec::new(),
            audio_field: "audio".to_string(),
            format_field: "format".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_audio_field(mut self, field: impl Into<String>) -> Self {
        self.audio_field = field.into();
        self
    }

    pub fn with_format_field(mut self, field: impl Into<String>) -> Self {
        self.format_field = field.into();
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Sends audio to an HTTP endpoint as base64 JSON and parses the reply.
#[derive(Debug, Clone)]
pub struct HttpAgent<P = JsonResponseParser> {
    client: Client,
    config: HttpAgentConfig,
    parser: P,
}

impl HttpAgent<JsonResponseParser> {
    pub fn new(url: impl Into<String>) -> Result<Self, RussoError> {
        Self::from_config(HttpAgentConfig::new(url))
    }

    /// Reads `RUSSO_AGENT_URL` and optionally `RUSSO_AGENT_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, RussoError> {
        let url = env::var("RUSSO_AGENT_URL")
            .map_err(|_| RussoError::Provider("RUSSO_AGENT_URL is not set".to_string()))?;
        let mut config = HttpAgentConfig::new(url);
        if let Ok(timeout_ms) = env::var("RUSSO_AGENT_TIMEOUT_MS") {
            if let Ok(ms) = timeout_ms.parse::<u64>() {
                config.request_timeout = Duration::from_millis(ms);
            }
        }
        Self::from_config(config)
    }

    pub fn from_config(config: HttpAgentConfig) -> Result<Self, RussoError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            config,
            parser: JsonResponseParser::default(),
        })
    }
}

impl<P: ResponseParser> HttpAgent<P> {
    pub fn with_parser<P2: ResponseParser>(self, parser: P2) -> HttpAgent<P2> {
        HttpAgent {
            client: self.client,
            config: self.config,
            parser,
        }
    }

    pub fn config(&self) -> &HttpAgentConfig {
        &self.config
    }

    fn payload(&self, audio: &Audio) -> Value {
        audio_payload(audio, &self.config.audio_field, &self.config.format_field)
    }
}

#[async_trait]
impl<P: ResponseParser> Agent for HttpAgent<P> {
    async fn run(&self, audio: &Audio) -> Result<AgentResponse, RussoError> {
        let mut request = self
            .client
            .request(self.config.method.clone(), &self.config.url)
            .json(&self.payload(audio));
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(RussoError::Provider(format!("unexpected status {status}: {text}")));
        }

        let raw: Value = serde_json::from_str(&text).map_err(|err| {
            RussoError::InvalidResponse(format!("agent reply is not JSON ({err}): {text}"))
        })?;
        let parsed = self.parser.parse(raw);
        tracing::debug!(
            url = %self.config.url,
            tool_calls = parsed.tool_calls.len(),
            "agent replied"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{HttpAgent, HttpAgentConfig};
    use crate::{
        parsers::JsonResponseParser,
        types::{Audio, AudioFormat},
    };

    #[test]
    fn payload_uses_configured_fields() {
        let agent = HttpAgent::from_config(
            HttpAgentConfig::new("http://localhost:1/agent")
                .with_audio_field("speech")
                .with_format_field("encoding"),
        )
        .unwrap()
        .with_parser(JsonResponseParser::new().with_tool_calls_key("calls"));

        let payload = agent.payload(&Audio::new(b"hi".to_vec()).with_format(AudioFormat::Pcm));
        assert_eq!(payload, json!({"speech": "aGk=", "encoding": "pcm"}));
    }
}
