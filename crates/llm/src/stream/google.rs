use super::StreamDecoder;
use crate::{
    messages::unified::{UnifiedContentPart, UnifiedFinishReason, UnifiedStreamChunk, UnifiedUsage},
    provider::google::output::{GoogleGenerateResponse, candidate_parts},
};

/// Decodes `streamGenerateContent?alt=sse` events.
///
/// Each event is a complete `GenerateContentResponse`. Function calls arrive whole and
/// get synthesized ids.
#[derive(Debug, Default)]
pub struct GoogleStreamDecoder {
    usage: Option<UnifiedUsage>,
    has_tool_calls: bool,
    active: bool,
}

impl GoogleStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn done(&mut self, finish_reason: UnifiedFinishReason) -> UnifiedStreamChunk {
        let chunk = UnifiedStreamChunk::Done {
            finish_reason,
            has_tool_calls: self.has_tool_calls,
            usage: self.usage.take(),
        };

        *self = Self::default();

        chunk
    }
}

impl StreamDecoder for GoogleStreamDecoder {
    fn decode(&mut self, raw: &str) -> Vec<UnifiedStreamChunk> {
        let raw = raw.trim();

        if raw.is_empty() {
            return Vec::new();
        }

        let response: GoogleGenerateResponse = match sonic_rs::from_str(raw) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Skipping malformed Google stream event: {e}");
                return Vec::new();
            }
        };

        self.active = true;

        if let Some(usage) = response.usage_metadata {
            self.usage = Some(usage.into());
        }

        let Some(candidate) = response.candidates.into_iter().next() else {
            if let Some(reason) = response.prompt_feedback.and_then(|feedback| feedback.block_reason) {
                log::warn!("Google blocked the prompt: {reason}");
                return vec![self.done(UnifiedFinishReason::ContentFilter)];
            }

            return Vec::new();
        };

        let mut chunks = Vec::new();

        for part in candidate_parts(candidate.content) {
            match part {
                UnifiedContentPart::Text { text } => chunks.push(UnifiedStreamChunk::Text { delta: text }),
                UnifiedContentPart::ToolCall { id, name, input } => {
                    self.has_tool_calls = true;

                    chunks.push(UnifiedStreamChunk::ToolCall {
                        id,
                        name,
                        arguments: input,
                    });
                }
                UnifiedContentPart::Image { .. } | UnifiedContentPart::ToolResult { .. } => {
                    log::debug!("Ignoring non-text part in Google stream");
                }
            }
        }

        if let Some(reason) = candidate.finish_reason {
            let finish_reason = reason.into_unified(self.has_tool_calls);
            chunks.push(self.done(finish_reason));
        }

        chunks
    }

    fn finish(&mut self) -> Vec<UnifiedStreamChunk> {
        if !self.active {
            return Vec::new();
        }

        let finish_reason = if self.has_tool_calls {
            UnifiedFinishReason::ToolCalls
        } else {
            log::warn!("Google stream ended without a finish reason");
            UnifiedFinishReason::Other
        };

        vec![self.done(finish_reason)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_then_function_calls() {
        let mut decoder = GoogleStreamDecoder::new();

        let first = json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Let me "}]}}]});
        let second = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "check."},
                    {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}},
                    {"functionCall": {"name": "get_weather", "args": {"city": "Rome"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 14, "totalTokenCount": 23}
        });

        let mut chunks = decoder.decode(&first.to_string());
        chunks.extend(decoder.decode(&second.to_string()));

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], UnifiedStreamChunk::Text { delta: "Let me ".into() });
        assert_eq!(chunks[1], UnifiedStreamChunk::Text { delta: "check.".into() });

        let (UnifiedStreamChunk::ToolCall { id: first_id, .. }, UnifiedStreamChunk::ToolCall { id: second_id, arguments, .. }) =
            (&chunks[2], &chunks[3])
        else {
            unreachable!("expected two tool calls, got {chunks:?}");
        };

        assert_ne!(first_id, second_id);
        assert_eq!(arguments, &json!({"city": "Rome"}));

        assert_eq!(
            chunks[4],
            UnifiedStreamChunk::Done {
                finish_reason: UnifiedFinishReason::ToolCalls,
                has_tool_calls: true,
                usage: Some(UnifiedUsage::new(9, 14)),
            }
        );

        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn finish_after_truncated_stream() {
        let mut decoder = GoogleStreamDecoder::new();

        decoder.decode(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi"}]}}]}"#);

        assert_eq!(
            decoder.finish(),
            vec![UnifiedStreamChunk::Done {
                finish_reason: UnifiedFinishReason::Other,
                has_tool_calls: false,
                usage: None,
            }]
        );
    }

    #[test]
    fn safety_stop() {
        let mut decoder = GoogleStreamDecoder::new();

        let chunks = decoder.decode(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);

        assert_eq!(
            chunks,
            vec![UnifiedStreamChunk::Done {
                finish_reason: UnifiedFinishReason::ContentFilter,
                has_tool_calls: false,
                usage: None,
            }]
        );
    }
}
