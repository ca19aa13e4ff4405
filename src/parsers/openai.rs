use serde_json::Value;

use crate::{
    parsers::{decode_arguments, ResponseParser},
    types::{AgentResponse, ToolCall},
};

/// Reads tool calls out of a chat completion body:
/// `choices[].message.tool_calls[].function.{name, arguments}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiResponseParser;

impl ResponseParser for OpenAiResponseParser {
    fn parse(&self, raw: Value) -> AgentResponse {
        let tool_calls = raw
            .get("choices")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|choice| choice.get("message")?.get("tool_calls")?.as_array())
            .flatten()
            .filter_map(|call| {
                let function = call.get("function")?;
                let name = function.get("name")?.as_str().filter(|name| !name.is_empty())?;
                let arguments = function
                    .get("arguments")
                    .map(decode_arguments)
                    .unwrap_or_default();
                Some(ToolCall::new(name).with_arguments(arguments))
            })
            .collect();

        AgentResponse::new(tool_calls).with_raw(raw)
    }
}
