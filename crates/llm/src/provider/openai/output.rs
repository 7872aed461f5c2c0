//! OpenAI Chat Completions responses and stream chunks to unified types.

use serde::Deserialize;

use crate::{
    error::LlmError,
    messages::unified::{UnifiedContentPart, UnifiedFinishReason, UnifiedResponse, UnifiedUsage},
    provider::parse_tool_arguments,
};

/// The reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenAiFinishReason {
    Stop,
    Length,
    ToolCalls,
    /// Legacy single-function calling.
    FunctionCall,
    ContentFilter,
    /// Any other reason not yet known.
    #[serde(untagged)]
    Other(String),
}

impl From<OpenAiFinishReason> for UnifiedFinishReason {
    fn from(reason: OpenAiFinishReason) -> Self {
        match reason {
            OpenAiFinishReason::Stop => UnifiedFinishReason::Stop,
            OpenAiFinishReason::Length => UnifiedFinishReason::Length,
            OpenAiFinishReason::ToolCalls | OpenAiFinishReason::FunctionCall => UnifiedFinishReason::ToolCalls,
            OpenAiFinishReason::ContentFilter => UnifiedFinishReason::ContentFilter,
            OpenAiFinishReason::Other(reason) => {
                log::warn!("Unknown finish reason from OpenAI: {reason}");
                UnifiedFinishReason::Other
            }
        }
    }
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
pub struct OpenAiResponse {
    pub choices: Vec<OpenAiChoice>,

    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    pub message: OpenAiResponseMessage,

    #[serde(default)]
    pub finish_reason: Option<OpenAiFinishReason>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiResponseMessage {
    #[serde(default)]
    pub content: Option<String>,

    /// Set instead of `content` when the model declines to answer.
    #[serde(default)]
    pub refusal: Option<String>,

    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiResponseToolCall {
    pub id: String,
    pub function: OpenAiResponseFunction,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiResponseFunction {
    pub name: String,

    /// JSON-encoded arguments, possibly malformed.
    #[serde(default)]
    pub arguments: String,
}

/// Token usage. Streams only send it when `stream_options.include_usage` is set.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: u32,

    #[serde(default)]
    pub completion_tokens: u32,

    #[serde(default)]
    pub total_tokens: Option<u32>,
}

impl From<OpenAiUsage> for UnifiedUsage {
    fn from(usage: OpenAiUsage) -> Self {
        let mut unified = UnifiedUsage::new(usage.prompt_tokens, usage.completion_tokens);

        if let Some(total) = usage.total_tokens {
            unified.total_tokens = total;
        }

        unified
    }
}

/// One `data:` payload of a streamed completion.
#[derive(Debug, Deserialize)]
pub struct OpenAiStreamChunk {
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,

    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiStreamChoice {
    #[serde(default)]
    pub delta: OpenAiDelta,

    #[serde(default)]
    pub finish_reason: Option<OpenAiFinishReason>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

/// A fragment of a streamed tool call.
///
/// The first fragment for a slot carries `id` and `function.name`; later ones only
/// carry argument text.
#[derive(Debug, Deserialize)]
pub struct OpenAiToolCallDelta {
    pub index: u32,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenAiFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub arguments: Option<String>,
}

/// Decodes a non-streaming Chat Completions body.
///
/// Text comes first, then tool calls. Malformed tool arguments decode as `{}`.
pub fn decode_response(raw: &str) -> crate::Result<UnifiedResponse> {
    let response: OpenAiResponse = sonic_rs::from_str(raw).map_err(|e| {
        log::error!("Failed to parse OpenAI chat completion response: {e}");
        LlmError::InvalidResponse(e.to_string())
    })?;

    let usage = response.usage.map(UnifiedUsage::from);

    let Some(choice) = response.choices.into_iter().next() else {
        log::warn!("OpenAI response carried no choices");

        return Ok(UnifiedResponse {
            parts: Vec::new(),
            finish_reason: UnifiedFinishReason::Other,
            usage,
        });
    };

    let mut parts = Vec::new();

    match (choice.message.content, choice.message.refusal) {
        (Some(text), _) if !text.is_empty() => parts.push(UnifiedContentPart::Text { text }),
        (_, Some(refusal)) if !refusal.is_empty() => parts.push(UnifiedContentPart::Text { text: refusal }),
        _ => (),
    }

    for call in choice.message.tool_calls.unwrap_or_default() {
        let input = parse_tool_arguments(&call.function.arguments).unwrap_or_else(|| {
            log::warn!(
                "Malformed arguments for OpenAI tool call '{}' ({}), using an empty object",
                call.function.name,
                call.id
            );

            serde_json::json!({})
        });

        parts.push(UnifiedContentPart::ToolCall {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    let finish_reason = match choice.finish_reason {
        Some(reason) => UnifiedFinishReason::from(reason),
        None => {
            log::warn!("OpenAI response carried no finish reason");
            UnifiedFinishReason::Other
        }
    };

    Ok(UnifiedResponse {
        parts,
        finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use insta::assert_json_snapshot;

    #[test]
    fn text_and_tool_calls() {
        let raw = indoc! {r#"
            {
              "id": "chatcmpl-1",
              "object": "chat.completion",
              "choices": [{
                "index": 0,
                "message": {
                  "role": "assistant",
                  "content": "Checking.",
                  "tool_calls": [
                    {"id": "call_a", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":\"rust\"}"}},
                    {"id": "call_b", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":"}}
                  ]
                },
                "finish_reason": "tool_calls"
              }],
              "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
            }
        "#};

        assert_json_snapshot!(decode_response(raw).unwrap(), @r#"
        {
          "parts": [
            {
              "type": "text",
              "text": "Checking."
            },
            {
              "type": "tool_call",
              "id": "call_a",
              "name": "lookup",
              "input": {
                "q": "rust"
              }
            },
            {
              "type": "tool_call",
              "id": "call_b",
              "name": "lookup",
              "input": {}
            }
          ],
          "finish_reason": "tool_calls",
          "usage": {
            "input_tokens": 12,
            "output_tokens": 7,
            "total_tokens": 19
          }
        }
        "#);
    }

    #[test]
    fn finish_reason_mapping() {
        let cases = [
            ("stop", UnifiedFinishReason::Stop),
            ("length", UnifiedFinishReason::Length),
            ("tool_calls", UnifiedFinishReason::ToolCalls),
            ("function_call", UnifiedFinishReason::ToolCalls),
            ("content_filter", UnifiedFinishReason::ContentFilter),
            ("insufficient_system_resource", UnifiedFinishReason::Other),
        ];

        for (raw, expected) in cases {
            let reason: OpenAiFinishReason = serde_json::from_value(serde_json::json!(raw)).unwrap();
            assert_eq!(UnifiedFinishReason::from(reason), expected, "{raw}");
        }
    }

    #[test]
    fn missing_usage_is_tolerated() {
        let raw = r#"{"choices":[{"message":{"content":"hi"},"finish_reason":"stop"}]}"#;
        let response = decode_response(raw).unwrap();

        assert_eq!(response.usage, None);
        assert_eq!(response.text(), "hi");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let error = decode_response("<html>bad gateway</html>").unwrap_err();

        assert!(matches!(error, LlmError::InvalidResponse(_)));
    }
}
