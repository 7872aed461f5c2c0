//! Anthropic Messages API responses and stream events to unified types.

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::LlmError,
    messages::unified::{UnifiedContentPart, UnifiedFinishReason, UnifiedResponse, UnifiedUsage},
};

/// The reason the model stopped generating tokens.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model reached a natural stopping point.
    EndTurn,
    /// The generation exceeded `max_tokens`.
    MaxTokens,
    /// The model hit one of the request's stop sequences.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
    /// The model paused a long-running turn.
    PauseTurn,
    /// The model declined to answer for safety reasons.
    Refusal,
    /// Any other stop reason not yet known.
    #[serde(untagged)]
    Other(String),
}

impl From<StopReason> for UnifiedFinishReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::EndTurn | StopReason::StopSequence => UnifiedFinishReason::Stop,
            StopReason::MaxTokens => UnifiedFinishReason::Length,
            StopReason::ToolUse => UnifiedFinishReason::ToolCalls,
            StopReason::Refusal => UnifiedFinishReason::ContentFilter,
            StopReason::PauseTurn => UnifiedFinishReason::Other,
            StopReason::Other(reason) => {
                log::warn!("Unknown stop reason from Anthropic: {reason}");
                UnifiedFinishReason::Other
            }
        }
    }
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    pub content: Vec<AnthropicResponseBlock>,

    #[serde(default)]
    pub stop_reason: Option<StopReason>,

    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// A content block in a response.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Thinking, server tool use and other blocks with no unified counterpart.
    #[serde(other)]
    Unsupported,
}

/// Token usage. `message_delta` events may omit input tokens.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: Option<u32>,

    #[serde(default)]
    pub output_tokens: Option<u32>,
}

impl AnthropicUsage {
    /// Later events only carry the counters they update.
    pub fn merge(&mut self, update: AnthropicUsage) {
        if update.input_tokens.is_some() {
            self.input_tokens = update.input_tokens;
        }

        if update.output_tokens.is_some() {
            self.output_tokens = update.output_tokens;
        }
    }
}

impl From<AnthropicUsage> for UnifiedUsage {
    fn from(usage: AnthropicUsage) -> Self {
        UnifiedUsage::new(usage.input_tokens.unwrap_or(0), usage.output_tokens.unwrap_or(0))
    }
}

/// Server-sent events of a streamed Messages response.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicMessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: AnthropicStreamBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: AnthropicBlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: AnthropicMessageDeltaData,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicStreamError,
    },
}

#[derive(Debug, Deserialize)]
pub struct AnthropicMessageStart {
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// Initial state of a content block, sent in `content_block_start`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    /// The `input` sent here is always empty; arguments arrive as `input_json_delta`.
    ToolUse { id: String, name: String },
    #[serde(other)]
    Unsupported,
}

/// Incremental update of a content block.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicBlockDelta {
    TextDelta {
        text: String,
    },
    /// A fragment of tool arguments. Only the concatenation of all fragments is valid JSON.
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicMessageDeltaData {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicStreamError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Decodes a non-streaming Messages body.
pub fn decode_response(raw: &str) -> crate::Result<UnifiedResponse> {
    let response: AnthropicResponse = sonic_rs::from_str(raw).map_err(|e| {
        log::error!("Failed to parse Anthropic messages response: {e}");
        LlmError::InvalidResponse(e.to_string())
    })?;

    let parts = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            AnthropicResponseBlock::Text { text } => Some(UnifiedContentPart::Text { text }),
            AnthropicResponseBlock::ToolUse { id, name, input } => {
                let input = if input.is_object() {
                    input
                } else {
                    log::warn!("Anthropic tool call '{name}' ({id}) has non-object input, using an empty object");
                    serde_json::json!({})
                };

                Some(UnifiedContentPart::ToolCall { id, name, input })
            }
            AnthropicResponseBlock::Unsupported => None,
        })
        .collect();

    let finish_reason = response
        .stop_reason
        .map(UnifiedFinishReason::from)
        .unwrap_or(UnifiedFinishReason::Other);

    Ok(UnifiedResponse {
        parts,
        finish_reason,
        usage: response.usage.map(UnifiedUsage::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use insta::assert_json_snapshot;

    #[test]
    fn text_and_tool_use() {
        let raw = indoc! {r#"
            {
              "id": "msg_01",
              "type": "message",
              "role": "assistant",
              "model": "claude-sonnet-4",
              "content": [
                {"type": "thinking", "thinking": "...", "signature": "abc"},
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_01", "name": "search", "input": {"query": "tokio"}}
              ],
              "stop_reason": "tool_use",
              "stop_sequence": null,
              "usage": {"input_tokens": 30, "output_tokens": 12}
            }
        "#};

        assert_json_snapshot!(decode_response(raw).unwrap(), @r#"
        {
          "parts": [
            {
              "type": "text",
              "text": "Let me look."
            },
            {
              "type": "tool_call",
              "id": "toolu_01",
              "name": "search",
              "input": {
                "query": "tokio"
              }
            }
          ],
          "finish_reason": "tool_calls",
          "usage": {
            "input_tokens": 30,
            "output_tokens": 12,
            "total_tokens": 42
          }
        }
        "#);
    }

    #[test]
    fn stop_reason_mapping() {
        let cases = [
            ("end_turn", UnifiedFinishReason::Stop),
            ("stop_sequence", UnifiedFinishReason::Stop),
            ("max_tokens", UnifiedFinishReason::Length),
            ("tool_use", UnifiedFinishReason::ToolCalls),
            ("refusal", UnifiedFinishReason::ContentFilter),
            ("model_context_window_exceeded", UnifiedFinishReason::Other),
        ];

        for (raw, expected) in cases {
            let reason: StopReason = serde_json::from_value(serde_json::json!(raw)).unwrap();
            assert_eq!(UnifiedFinishReason::from(reason), expected, "{raw}");
        }
    }

    #[test]
    fn unknown_stream_events_fail_to_parse() {
        assert!(sonic_rs::from_str::<AnthropicStreamEvent>(r#"{"type":"ping"}"#).is_ok());
        assert!(sonic_rs::from_str::<AnthropicStreamEvent>(r#"{"type":"telemetry"}"#).is_err());
    }
}
