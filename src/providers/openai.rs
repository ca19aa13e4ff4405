use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    pipeline::Synthesizer,
    types::{Audio, AudioFormat},
    RussoError,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini-tts";
const DEFAULT_VOICE: &str = "alloy";
/// `pcm` responses are 16-bit little-endian mono at this rate.
const PCM_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone)]
pub struct OpenAiSynthesizerConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub speed: Option<f32>,
    pub organization: Option<String>,
    pub request_timeout: Duration,
}

impl OpenAiSynthesizerConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            speed: None,
            organization: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Text-to-speech through an OpenAI-compatible `/audio/speech` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiSynthesizer {
    client: Client,
    config: OpenAiSynthesizerConfig,
}

#[derive(Debug, Serialize)]
struct SpeechRequestBody<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiSynthesizer {
    pub fn new(api_key: impl Into<String>) -> Result<Self, RussoError> {
        Self::from_config(OpenAiSynthesizerConfig::new(api_key))
    }

    pub fn from_env() -> Result<Self, RussoError> {
        let api_key =
            env::var("OPENAI_API_KEY").map_err(|_| RussoError::MissingApiKey("OPENAI_API_KEY"))?;
        let mut config = OpenAiSynthesizerConfig::new(api_key);

        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = env::var("OPENAI_TTS_MODEL") {
            config.model = model;
        }
        if let Ok(voice) = env::var("OPENAI_TTS_VOICE") {
            config.voice = voice;
        }
        if let Ok(org) = env::var("OPENAI_ORGANIZATION") {
            config.organization = Some(org);
        }

        Self::from_config(config)
    }

    pub fn from_config(config: OpenAiSynthesizerConfig) -> Result<Self, RussoError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiSynthesizerConfig {
        &self.config
    }

    /// Settings that change the produced audio, for use as cache key context.
    pub fn cache_key_extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        extra.insert("provider".into(), json!("openai"));
        extra.insert("model".into(), json!(self.config.model));
        extra.insert("voice".into(), json!(self.config.voice));
        extra.insert("format".into(), json!(AudioFormat::Pcm.as_str()));
        if let Some(speed) = self.config.speed {
            extra.insert("speed".into(), json!(speed));
        }
        extra
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Audio, RussoError> {
        let body = SpeechRequestBody {
            model: &self.config.model,
            voice: &self.config.voice,
            input: text,
            response_format: AudioFormat::Pcm.as_str(),
            speed: self.config.speed,
        };

        let mut request = self
            .client
            .post(self.endpoint("audio/speech"))
            .bearer_auth(&self.config.api_key)
            .json(&body);
        if let Some(ref org) = self.config.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            if let Ok(error) = serde_json::from_str::<ErrorEnvelope>(&text) {
                return Err(RussoError::Provider(error.error.message));
            }
            return Err(RussoError::Provider(format!("unexpected status {status}: {text}")));
        }

        let data = response.bytes().await?.to_vec();
        if data.is_empty() {
            return Err(RussoError::InvalidResponse("empty audio body".to_string()));
        }
        tracing::debug!(bytes = data.len(), voice = %self.config.voice, "synthesized speech");

        Ok(Audio::new(data)
            .with_format(AudioFormat::Pcm)
            .with_sample_rate(PCM_SAMPLE_RATE))
    }
}
