use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};

use crate::types::Audio;

pub mod http;
pub mod openai;
pub mod scripted;
pub mod websocket;

pub use http::{HttpAgent, HttpAgentConfig};
pub use openai::{OpenAiSynthesizer, OpenAiSynthesizerConfig};
pub use scripted::{ScriptedAgent, TextSynthesizer};
pub use websocket::{SendMode, WebSocketAgent, WebSocketAgentConfig};

/// `{<audio_field>: <base64 bytes>, <format_field>: "wav"}`
pub(crate) fn audio_payload(audio: &Audio, audio_field: &str, format_field: &str) -> Value {
    let mut body = Map::new();
    body.insert(audio_field.to_string(), Value::String(STANDARD.encode(&audio.data)));
    body.insert(
        format_field.to_string(),
        Value::String(audio.format.as_str().to_string()),
    );
    Value::Object(body)
}
