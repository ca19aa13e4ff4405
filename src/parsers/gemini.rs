use serde_json::Value;

use crate::{
    parsers::{decode_arguments, ResponseParser},
    types::{AgentResponse, ToolCall},
};

/// Reads tool calls out of a Gemini `GenerateContentResponse`:
/// `candidates[].content.parts[].function_call.{name, args}`.
///
/// The REST API spells the part `functionCall`; both spellings are accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiResponseParser;

impl ResponseParser for GeminiResponseParser {
    fn parse(&self, raw: Value) -> AgentResponse {
        let tool_calls = raw
            .get("candidates")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|candidate| candidate.get("content")?.get("parts")?.as_array())
            .flatten()
            .filter_map(|part| part.get("function_call").or_else(|| part.get("functionCall")))
            .filter_map(|call| {
                let name = call.get("name")?.as_str().filter(|name| !name.is_empty())?;
                let arguments = call.get("args").map(decode_arguments).unwrap_or_default();
                Some(ToolCall::new(name).with_arguments(arguments))
            })
            .collect();

        AgentResponse::new(tool_calls).with_raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::GeminiResponseParser;
    use crate::{parsers::ResponseParser, types::ToolCall};

    #[test]
    fn parses_function_call_parts() {
        let response = GeminiResponseParser.parse(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Booking that now."},
                        {"function_call": {"name": "book_flight", "args": {"from_city": "Berlin", "to_city": "Rome"}}},
                        {"functionCall": {"name": "get_weather", "args": "{\"city\": \"Rome\"}"}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12}
        }));

        assert_eq!(
            response.tool_calls,
            vec![
                ToolCall::new("book_flight")
                    .with_arg("from_city", "Berlin")
                    .with_arg("to_city", "Rome"),
                ToolCall::new("get_weather").with_arg("city", "Rome"),
            ]
        );
        assert!(response.raw.is_some());
    }

    #[test]
    fn tolerates_missing_content_and_args() {
        let response = GeminiResponseParser.parse(json!({
            "candidates": [
                {"finishReason": "SAFETY"},
                {"content": {"parts": [{"function_call": {"name": "hang_up"}}]}},
                {"content": {"parts": [{"function_call": {"name": ""}}]}}
            ]
        }));
        assert_eq!(response.tool_calls, vec![ToolCall::new("hang_up")]);
        assert!(GeminiResponseParser.parse(json!({})).tool_calls.is_empty());
    }
}
