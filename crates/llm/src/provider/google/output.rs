//! Google GenerateContent responses to unified types, plus the content shapes shared
//! with the request side.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::LlmError,
    messages::unified::{UnifiedContentPart, UnifiedFinishReason, UnifiedImageSource, UnifiedResponse, UnifiedUsage},
};

/// Role of a Gemini content entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoogleRole {
    User,
    Model,
    /// Carries `functionResponse` parts.
    Function,
}

/// A turn of the conversation, in requests and in response candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleContent {
    /// Absent on `systemInstruction`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<GoogleRole>,

    #[serde(default)]
    pub parts: Vec<GooglePart>,
}

/// One part of a content entry. Exactly one of the data fields is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<GoogleBlob>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GoogleFunctionCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GoogleFunctionResponse>,

    /// Set on thought summaries, which are not part of the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl GooglePart {
    pub fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleBlob {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

/// A function call. Gemini never assigns call ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleFunctionCall {
    pub name: String,

    #[serde(default)]
    pub args: Value,
}

/// A function result, correlated with its call by `name` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleFunctionResponse {
    pub name: String,
    pub response: Value,
}

/// Response from the GenerateContent API, and each event of its streaming variant.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleGenerateResponse {
    #[serde(default)]
    pub candidates: Vec<GoogleCandidate>,

    #[serde(default)]
    pub usage_metadata: Option<GoogleUsageMetadata>,

    #[serde(default)]
    pub prompt_feedback: Option<GooglePromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCandidate {
    #[serde(default)]
    pub content: Option<GoogleContent>,

    #[serde(default)]
    pub finish_reason: Option<GoogleFinishReason>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleUsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,

    #[serde(default)]
    pub candidates_token_count: u32,

    #[serde(default)]
    pub total_token_count: Option<u32>,
}

impl From<GoogleUsageMetadata> for UnifiedUsage {
    fn from(usage: GoogleUsageMetadata) -> Self {
        let mut unified = UnifiedUsage::new(usage.prompt_token_count, usage.candidates_token_count);

        if let Some(total) = usage.total_token_count {
            unified.total_tokens = total;
        }

        unified
    }
}

/// Why a candidate stopped.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoogleFinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Blocklist,
    ProhibitedContent,
    Spii,
    MalformedFunctionCall,
    /// `OTHER`, `LANGUAGE`, `FINISH_REASON_UNSPECIFIED` and anything newer.
    #[serde(untagged)]
    Other(String),
}

impl GoogleFinishReason {
    /// Gemini reports `STOP` after function calls too, so the call flag decides.
    pub fn into_unified(self, has_tool_calls: bool) -> UnifiedFinishReason {
        match self {
            Self::Stop if has_tool_calls => UnifiedFinishReason::ToolCalls,
            Self::Stop => UnifiedFinishReason::Stop,
            Self::MaxTokens => UnifiedFinishReason::Length,
            Self::Safety | Self::Recitation | Self::Blocklist | Self::ProhibitedContent | Self::Spii => {
                UnifiedFinishReason::ContentFilter
            }
            Self::MalformedFunctionCall => UnifiedFinishReason::Error,
            Self::Other(reason) => {
                log::warn!("Unknown finish reason from Google: {reason}");
                UnifiedFinishReason::Other
            }
        }
    }
}

/// A fresh tool call id of the form `call_<unix millis>_<random>`.
pub(crate) fn synthesize_call_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();

    format!("call_{}_{}", Timestamp::now().as_millisecond(), &suffix[..12])
}

/// Converts candidate parts, synthesizing ids for function calls.
pub(crate) fn candidate_parts(content: Option<GoogleContent>) -> Vec<UnifiedContentPart> {
    let Some(content) = content else {
        return Vec::new();
    };

    content
        .parts
        .into_iter()
        .filter_map(|part| {
            if part.thought == Some(true) {
                return None;
            }

            if let Some(call) = part.function_call {
                let input = match call.args {
                    Value::Object(_) => call.args,
                    Value::Null => serde_json::json!({}),
                    other => {
                        log::warn!("Google function call '{}' has non-object args: {other}", call.name);
                        serde_json::json!({})
                    }
                };

                return Some(UnifiedContentPart::ToolCall {
                    id: synthesize_call_id(),
                    name: call.name,
                    input,
                });
            }

            if let Some(blob) = part.inline_data {
                return Some(UnifiedContentPart::Image {
                    source: UnifiedImageSource::Inline {
                        media_type: blob.mime_type,
                        data: blob.data,
                    },
                });
            }

            part.text
                .filter(|text| !text.is_empty())
                .map(|text| UnifiedContentPart::Text { text })
        })
        .collect()
}

/// Decodes a non-streaming GenerateContent body from its first candidate.
pub fn decode_response(raw: &str) -> crate::Result<UnifiedResponse> {
    let response: GoogleGenerateResponse = sonic_rs::from_str(raw).map_err(|e| {
        log::error!("Failed to parse Google generate content response: {e}");
        LlmError::InvalidResponse(e.to_string())
    })?;

    let usage = response.usage_metadata.map(UnifiedUsage::from);

    let Some(candidate) = response.candidates.into_iter().next() else {
        let blocked = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
            .inspect(|reason| log::warn!("Google blocked the prompt: {reason}"));

        let finish_reason = match blocked {
            Some(_) => UnifiedFinishReason::ContentFilter,
            None => UnifiedFinishReason::Other,
        };

        return Ok(UnifiedResponse {
            parts: Vec::new(),
            finish_reason,
            usage,
        });
    };

    let parts = candidate_parts(candidate.content);
    let has_tool_calls = parts
        .iter()
        .any(|part| matches!(part, UnifiedContentPart::ToolCall { .. }));

    let finish_reason = match candidate.finish_reason {
        Some(reason) => reason.into_unified(has_tool_calls),
        None if has_tool_calls => UnifiedFinishReason::ToolCalls,
        None => UnifiedFinishReason::Other,
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

    #[test]
    fn two_function_calls_get_distinct_ids() {
        let raw = indoc! {r#"
            {
              "candidates": [{
                "content": {
                  "role": "model",
                  "parts": [
                    {"functionCall": {"name": "a", "args": {"x": 1}}},
                    {"functionCall": {"name": "b", "args": {}}}
                  ]
                },
                "finishReason": "STOP"
              }],
              "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 4, "totalTokenCount": 12}
            }
        "#};

        let response = decode_response(raw).unwrap();

        let calls: Vec<_> = response
            .parts
            .iter()
            .filter_map(|part| match part {
                UnifiedContentPart::ToolCall { id, name, .. } => Some((id.clone(), name.clone())),
                _ => None,
            })
            .collect();

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, "a");
        assert_eq!(calls[1].1, "b");
        assert_ne!(calls[0].0, calls[1].0);
        assert!(calls.iter().all(|(id, _)| id.starts_with("call_")));
        assert_eq!(response.finish_reason, UnifiedFinishReason::ToolCalls);
        assert_eq!(response.usage, Some(UnifiedUsage::new(8, 4)));
    }

    #[test]
    fn finish_reason_mapping() {
        let cases = [
            ("STOP", false, UnifiedFinishReason::Stop),
            ("STOP", true, UnifiedFinishReason::ToolCalls),
            ("MAX_TOKENS", false, UnifiedFinishReason::Length),
            ("SAFETY", false, UnifiedFinishReason::ContentFilter),
            ("RECITATION", false, UnifiedFinishReason::ContentFilter),
            ("SPII", false, UnifiedFinishReason::ContentFilter),
            ("MALFORMED_FUNCTION_CALL", false, UnifiedFinishReason::Error),
            ("LANGUAGE", false, UnifiedFinishReason::Other),
        ];

        for (raw, has_calls, expected) in cases {
            let reason: GoogleFinishReason = serde_json::from_value(serde_json::json!(raw)).unwrap();
            assert_eq!(reason.into_unified(has_calls), expected, "{raw}");
        }
    }

    #[test]
    fn thoughts_are_skipped() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"hmm","thought":true},{"text":"42"}]},"finishReason":"STOP"}]}"#;

        let response = decode_response(raw).unwrap();

        assert_eq!(response.text(), "42");
        assert_eq!(response.usage, None);
    }

    #[test]
    fn blocked_prompt() {
        let raw = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;

        assert_eq!(
            decode_response(raw).unwrap().finish_reason,
            UnifiedFinishReason::ContentFilter
        );
    }

    #[test]
    fn synthesized_ids_have_the_expected_shape() {
        let id = synthesize_call_id();
        let mut segments = id.splitn(3, '_');

        assert_eq!(segments.next(), Some("call"));
        assert!(segments.next().unwrap().parse::<i64>().is_ok());
        assert_eq!(segments.next().unwrap().len(), 12);
    }
}
