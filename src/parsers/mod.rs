use serde_json::{Map, Value};

use crate::types::{AgentResponse, ToolCall};

pub mod gemini;
pub mod openai;

pub use gemini::GeminiResponseParser;
pub use openai::OpenAiResponseParser;

/// Normalizes a provider's JSON reply into an [`AgentResponse`].
pub trait ResponseParser: Send + Sync {
    fn parse(&self, raw: Value) -> AgentResponse;
}

impl<T: ResponseParser + ?Sized> ResponseParser for Box<T> {
    fn parse(&self, raw: Value) -> AgentResponse {
        (**self).parse(raw)
    }
}

impl<T: ResponseParser + ?Sized> ResponseParser for std::sync::Arc<T> {
    fn parse(&self, raw: Value) -> AgentResponse {
        (**self).parse(raw)
    }
}

/// Parser for endpoints that return tool calls in an arbitrary JSON shape.
///
/// `tool_calls_key` is a dot path (`"result.calls"`). With `single` set the
/// path points at one call object instead of a list. When the reply is a
/// list (aggregated messages), items are searched in order and the first one
/// that yields calls wins.
#[derive(Debug, Clone)]
pub struct JsonResponseParser {
    tool_calls_key: String,
    name_key: String,
    arguments_key: String,
    single: bool,
}

impl Default for JsonResponseParser {
    fn default() -> Self {
        Self {
            tool_calls_key: "tool_calls".to_string(),
            name_key: "name".to_string(),
            arguments_key: "arguments".to_string(),
            single: false,
        }
    }
}

impl JsonResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool_calls_key(mut self, key: impl Into<String>) -> Self {
        self.tool_calls_key = key.into();
        self
    }

    pub fn with_name_key(mut self, key: impl Into<String>) -> Self {
        self.name_key = key.into();
        self
    }

    pub fn with_arguments_key(mut self, key: impl Into<String>) -> Self {
        self.arguments_key = key.into();
        self
    }

    pub fn with_single(mut self, single: bool) -> Self {
        self.single = single;
        self
    }

    fn try_parse(&self, item: &Value) -> Option<Vec<ToolCall>> {
        let found = extract_path(item, &self.tool_calls_key)?;
        let candidates: Vec<&Value> = if self.single {
            vec![found]
        } else {
            found.as_array()?.iter().collect()
        };

        let calls: Vec<ToolCall> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let object = candidate.as_object()?;
                let name = object.get(&self.name_key)?.as_str()?;
                if name.is_empty() {
                    return None;
                }
                let arguments = object
                    .get(&self.arguments_key)
                    .map(decode_arguments)
                    .unwrap_or_default();
                Some(ToolCall::new(name).with_arguments(arguments))
            })
            .collect();

        (!calls.is_empty()).then_some(calls)
    }
}

impl ResponseParser for JsonResponseParser {
    fn parse(&self, raw: Value) -> AgentResponse {
        let tool_calls = match &raw {
            Value::Array(items) => items.iter().find_map(|item| self.try_parse(item)),
            other => self.try_parse(other),
        };
        AgentResponse::new(tool_calls.unwrap_or_default()).with_raw(raw)
    }
}

/// Walks a dot-separated key path through nested objects.
pub fn extract_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

/// Arguments may arrive as an object or as a JSON-encoded string; anything
/// else decodes to no arguments.
pub(crate) fn decode_arguments(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}
