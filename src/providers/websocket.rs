use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::{
    parsers::{JsonResponseParser, ResponseParser},
    pipeline::Agent,
    providers::audio_payload,
    types::{AgentResponse, Audio},
    RussoError,
};

pub use tokio_tungstenite::tungstenite::Message;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SendHook = Arc<dyn Fn(&Audio) -> Message + Send + Sync>;
type CompleteHook = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;
type AggregateHook = Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>;

/// How audio goes on the wire when no send hook is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// A text frame holding `{"audio": <base64>, "format": "wav"}`.
    #[default]
    Json,
    /// The raw audio bytes as one binary frame.
    Bytes,
}

#[derive(Debug, Clone)]
pub struct WebSocketAgentConfig {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub send_mode: SendMode,
    pub audio_field: String,
    pub format_field: String,
    pub open_timeout: Duration,
    /// Upper bound on the whole collection phase.
    pub response_timeout: Duration,
    pub max_messages: usize,
}

impl WebSocketAgentConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            send_mode: SendMode::Json,
            audio_field: "audio".to_string(),
            format_field: "format".to_string(),
            open_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(30),
            max_messages: 100,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_send_mode(mut self, send_mode: SendMode) -> Self {
        self.send_mode = send_mode;
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

    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }
}

/// Sends audio over a WebSocket and collects the replies.
///
/// One connection per call. After sending, incoming frames are decoded as
/// JSON (text that is not JSON stays a string, binary that is not JSON becomes
/// a base64 string) and collected until one of:
///
/// - the `is_complete` hook returns true, or the first message arrives when no
///   hook is set;
/// - `max_messages` is reached;
/// - the server closes the socket;
/// - `response_timeout` elapses, which keeps whatever arrived.
///
/// One collected message is parsed as is. Several are parsed as a JSON list,
/// which [`JsonResponseParser`] searches item by item. An `aggregate` hook
/// replaces that step.
#[derive(Clone)]
pub struct WebSocketAgent<P = JsonResponseParser> {
    config: WebSocketAgentConfig,
    parser: P,
    on_send: Option<SendHook>,
    is_complete: Option<CompleteHook>,
    aggregate: Option<AggregateHook>,
}

impl WebSocketAgent<JsonResponseParser> {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_config(WebSocketAgentConfig::new(url))
    }

    pub fn from_config(config: WebSocketAgentConfig) -> Self {
        Self {
            config,
            parser: JsonResponseParser::default(),
            on_send: None,
            is_complete: None,
            aggregate: None,
        }
    }
}

impl<P: ResponseParser> WebSocketAgent<P> {
    pub fn with_parser<P2: ResponseParser>(self, parser: P2) -> WebSocketAgent<P2> {
        WebSocketAgent {
            config: self.config,
            parser,
            on_send: self.on_send,
            is_complete: self.is_complete,
            aggregate: self.aggregate,
        }
    }

    /// Builds the outgoing frame from the audio, overriding the send mode.
    pub fn with_on_send<F>(mut self, on_send: F) -> Self
    where
        F: Fn(&Audio) -> Message + Send + Sync + 'static,
    {
        self.on_send = Some(Arc::new(on_send));
        self
    }

    /// Decides, after each message, whether the reply is complete.
    pub fn with_is_complete<F>(mut self, is_complete: F) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.is_complete = Some(Arc::new(is_complete));
        self
    }

    pub fn with_aggregate<F>(mut self, aggregate: F) -> Self
    where
        F: Fn(Vec<Value>) -> Value + Send + Sync + 'static,
    {
        self.aggregate = Some(Arc::new(aggregate));
        self
    }

    pub fn config(&self) -> &WebSocketAgentConfig {
        &self.config
    }

    fn outgoing(&self, audio: &Audio) -> Message {
        if let Some(on_send) = &self.on_send {
            return on_send(audio);
        }
        match self.config.send_mode {
            SendMode::Json => Message::text(
                audio_payload(audio, &self.config.audio_field, &self.config.format_field)
                    .to_string(),
            ),
            SendMode::Bytes => Message::binary(audio.data.clone()),
        }
    }

    async fn connect(&self) -> Result<Socket, RussoError> {
        let mut request = self.config.url.as_str().into_client_request()?;
        for (name, value) in &self.config.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| RussoError::Provider(format!("invalid header name {name}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| RussoError::Provider(format!("invalid value for header {name}: {err}")))?;
            request.headers_mut().insert(header, value);
        }

        match tokio::time::timeout(self.config.open_timeout, connect_async(request)).await {
            Ok(connected) => Ok(connected?.0),
            Err(_) => Err(RussoError::Provider(format!(
                "timed out after {:?} connecting to {}",
                self.config.open_timeout, self.config.url
            ))),
        }
    }

    async fn collect(&self, socket: &mut Socket) -> Result<Vec<Value>, RussoError> {
        let mut messages = Vec::new();
        let collecting = async {
            while let Some(frame) = socket.next().await {
                let value = match frame? {
                    Message::Text(text) => decode_text(text.as_str()),
                    Message::Binary(data) => decode_binary(&data[..]),
                    Message::Close(_) => break,
                    _ => continue,
                };
                messages.push(value);

                match &self.is_complete {
                    Some(is_complete) if is_complete(&messages) => break,
                    Some(_) => {}
                    None => break,
                }
                if messages.len() >= self.config.max_messages {
                    tracing::warn!(
                        url = %self.config.url,
                        max_messages = self.config.max_messages,
                        "message limit reached, stopping collection"
                    );
                    break;
                }
            }
            Ok::<_, RussoError>(())
        };
        let outcome = tokio::time::timeout(self.config.response_timeout, collecting).await;

        match outcome {
            Ok(result) => result?,
            Err(_) if messages.is_empty() => tracing::warn!(
                url = %self.config.url,
                timeout = ?self.config.response_timeout,
                "no reply before timeout"
            ),
            Err(_) => tracing::debug!(
                count = messages.len(),
                "collection timed out, keeping partial reply"
            ),
        }
        Ok(messages)
    }

    fn combine(&self, mut messages: Vec<Value>) -> Value {
        if let Some(aggregate) = &self.aggregate {
            return aggregate(messages);
        }
        if messages.len() == 1 {
            return messages.remove(0);
        }
        Value::Array(messages)
    }
}

fn decode_text(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn decode_binary(data: &[u8]) -> Value {
    serde_json::from_slice(data).unwrap_or_else(|_| Value::String(STANDARD.encode(data)))
}

impl<P> fmt::Debug for WebSocketAgent<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketAgent")
            .field("config", &self.config)
            .field("on_send", &self.on_send.is_some())
            .field("is_complete", &self.is_complete.is_some())
            .field("aggregate", &self.aggregate.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<P: ResponseParser> Agent for WebSocketAgent<P> {
    async fn run(&self, audio: &Audio) -> Result<AgentResponse, RussoError> {
        let mut socket = self.connect().await?;

        let message = self.outgoing(audio);
        let bytes = message.len();
        socket.send(message).await?;
        tracing::debug!(url = %self.config.url, bytes, "sent audio");

        let messages = self.collect(&mut socket).await?;
        if let Err(err) = socket.close(None).await {
            tracing::debug!(error = %err, "websocket close failed");
        }

        let count = messages.len();
        let parsed = self.parser.parse(self.combine(messages));
        tracing::debug!(
            url = %self.config.url,
            messages = count,
            tool_calls = parsed.tool_calls.len(),
            "agent replied"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_binary, decode_text, Message, SendMode, WebSocketAgent, WebSocketAgentConfig};
    use crate::types::{Audio, AudioFormat};

    #[test]
    fn outgoing_frame_follows_send_mode() {
        let audio = Audio::new(b"hi".to_vec()).with_format(AudioFormat::Pcm);

        let json_agent = WebSocketAgent::new("ws://localhost:1/ws");
        assert_eq!(
            json_agent.outgoing(&audio),
            Message::text(json!({"audio": "aGk=", "format": "pcm"}).to_string())
        );

        let bytes_agent = WebSocketAgent::from_config(
            WebSocketAgentConfig::new("ws://localhost:1/ws").with_send_mode(SendMode::Bytes),
        );
        assert_eq!(bytes_agent.outgoing(&audio), Message::binary(b"hi".to_vec()));

        let hooked = bytes_agent.with_on_send(|audio| Message::text(format!("{} bytes", audio.len())));
        assert_eq!(hooked.outgoing(&audio), Message::text("2 bytes"));
    }

    #[test]
    fn incoming_frames_fall_back_to_strings() {
        assert_eq!(decode_text(r#"{"done": true}"#), json!({"done": true}));
        assert_eq!(decode_text("partial transcript"), json!("partial transcript"));
        assert_eq!(decode_binary(br#"[1, 2]"#), json!([1, 2]));
        assert_eq!(decode_binary(&[0xff, 0x00]), json!("/wA="));
    }

    #[test]
    fn single_message_is_not_wrapped() {
        let agent = WebSocketAgent::new("ws://localhost:1/ws");
        assert_eq!(agent.combine(vec![json!({"a": 1})]), json!({"a": 1}));
        assert_eq!(agent.combine(vec![json!(1), json!(2)]), json!([1, 2]));
        assert_eq!(agent.combine(vec![]), json!([]));

        let agent = agent.with_aggregate(|messages| json!({"count": messages.len()}));
        assert_eq!(agent.combine(vec![json!(1), json!(2)]), json!({"count": 2}));
    }
}
