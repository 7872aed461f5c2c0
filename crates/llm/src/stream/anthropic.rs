use super::{SlotTracker, StreamDecoder, contains_tool_call};
use crate::{
    messages::unified::{UnifiedFinishReason, UnifiedStreamChunk},
    provider::anthropic::output::{
        AnthropicBlockDelta, AnthropicStreamBlock, AnthropicStreamEvent, AnthropicUsage,
    },
};

/// Correlates `input_json_delta` fragments with their `tool_use` block by block index.
#[derive(Debug, Default)]
pub struct AnthropicStreamTracker {
    slots: SlotTracker,
    pending_finish: Option<UnifiedFinishReason>,
    usage: Option<AnthropicUsage>,
    has_tool_calls: bool,
    active: bool,
}

impl AnthropicStreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn merge_usage(&mut self, usage: Option<AnthropicUsage>) {
        if let Some(usage) = usage {
            self.usage.get_or_insert_default().merge(usage);
        }
    }

    fn done(&mut self, finish_reason: UnifiedFinishReason) -> UnifiedStreamChunk {
        let chunk = UnifiedStreamChunk::Done {
            finish_reason,
            has_tool_calls: self.has_tool_calls,
            usage: self.usage.take().map(Into::into),
        };

        *self = Self::default();

        chunk
    }
}

impl StreamDecoder for AnthropicStreamTracker {
    fn decode(&mut self, raw: &str) -> Vec<UnifiedStreamChunk> {
        let raw = raw.trim();

        if raw.is_empty() {
            return Vec::new();
        }

        let event: AnthropicStreamEvent = match sonic_rs::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Skipping malformed Anthropic stream event: {e}");
                return Vec::new();
            }
        };

        self.active = true;

        let mut chunks = Vec::new();

        match event {
            AnthropicStreamEvent::MessageStart { message } => self.merge_usage(message.usage),
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                AnthropicStreamBlock::Text { text } if text.is_empty() => (),
                AnthropicStreamBlock::Text { text } => chunks.push(UnifiedStreamChunk::Text { delta: text }),
                AnthropicStreamBlock::ToolUse { id, name } => chunks.extend(self.slots.start(index, id, name)),
                AnthropicStreamBlock::Unsupported => (),
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicBlockDelta::TextDelta { text } if text.is_empty() => (),
                AnthropicBlockDelta::TextDelta { text } => chunks.push(UnifiedStreamChunk::Text { delta: text }),
                AnthropicBlockDelta::InputJsonDelta { partial_json } => {
                    chunks.extend(self.slots.append(index, &partial_json));
                }
                AnthropicBlockDelta::Unsupported => (),
            },
            AnthropicStreamEvent::ContentBlockStop { index } => chunks.extend(self.slots.complete(index)),
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.pending_finish = Some(reason.into());
                }

                self.merge_usage(usage);
            }
            AnthropicStreamEvent::MessageStop => {
                chunks.extend(self.slots.complete_all());
                self.has_tool_calls |= contains_tool_call(&chunks);

                let finish_reason = self.pending_finish.take().unwrap_or(UnifiedFinishReason::Other);
                chunks.push(self.done(finish_reason));

                return chunks;
            }
            AnthropicStreamEvent::Ping => (),
            AnthropicStreamEvent::Error { error } => {
                log::error!("Anthropic stream failed with {}: {}", error.error_type, error.message);

                self.slots.reset();
                chunks.push(self.done(UnifiedFinishReason::Error));

                return chunks;
            }
        }

        self.has_tool_calls |= contains_tool_call(&chunks);

        chunks
    }

    fn finish(&mut self) -> Vec<UnifiedStreamChunk> {
        if !self.active {
            return Vec::new();
        }

        log::warn!("Anthropic stream ended without message_stop");

        let mut chunks = self.slots.complete_all();
        self.has_tool_calls |= contains_tool_call(&chunks);

        let finish_reason = self.pending_finish.take().unwrap_or(UnifiedFinishReason::Other);
        chunks.push(self.done(finish_reason));

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::UnifiedUsage;
    use insta::assert_json_snapshot;
    use serde_json::json;

    fn decode_all(tracker: &mut AnthropicStreamTracker, events: &[String]) -> Vec<UnifiedStreamChunk> {
        events.iter().flat_map(|event| tracker.decode(event)).collect()
    }

    fn message_start(input_tokens: u32) -> String {
        json!({
            "type": "message_start",
            "message": {
                "id": "msg_01", "type": "message", "role": "assistant", "content": [],
                "model": "claude-sonnet-4", "stop_reason": null,
                "usage": {"input_tokens": input_tokens, "output_tokens": 1}
            }
        })
        .to_string()
    }

    fn tool_start(index: u32, id: &str, name: &str) -> String {
        json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}
        })
        .to_string()
    }

    fn json_delta(index: u32, partial_json: &str) -> String {
        json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "input_json_delta", "partial_json": partial_json}
        })
        .to_string()
    }

    fn block_stop(index: u32) -> String {
        json!({"type": "content_block_stop", "index": index}).to_string()
    }

    fn message_delta(stop_reason: &str, output_tokens: u32) -> String {
        json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": null},
            "usage": {"output_tokens": output_tokens}
        })
        .to_string()
    }

    fn message_stop() -> String {
        json!({"type": "message_stop"}).to_string()
    }

    #[test]
    fn text_and_tool_use() {
        let mut tracker = AnthropicStreamTracker::new();

        let events = vec![
            message_start(25),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}).to_string(),
            json!({"type": "ping"}).to_string(),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "On it."}}).to_string(),
            block_stop(0),
            tool_start(1, "toolu_01", "get_weather"),
            json_delta(1, ""),
            json_delta(1, r#"{"city": "Par"#),
            json_delta(1, r#"is"}"#),
            block_stop(1),
            message_delta("tool_use", 40),
            message_stop(),
        ];

        assert_json_snapshot!(decode_all(&mut tracker, &events), @r#"
        [
          {
            "type": "text",
            "delta": "On it."
          },
          {
            "type": "tool_call_delta",
            "id": "toolu_01",
            "delta": "{\"city\": \"Par"
          },
          {
            "type": "tool_call_delta",
            "id": "toolu_01",
            "delta": "is\"}"
          },
          {
            "type": "tool_call",
            "id": "toolu_01",
            "name": "get_weather",
            "arguments": {
              "city": "Paris"
            }
          },
          {
            "type": "done",
            "finish_reason": "tool_calls",
            "has_tool_calls": true,
            "usage": {
              "input_tokens": 25,
              "output_tokens": 40,
              "total_tokens": 65
            }
          }
        ]
        "#);

        assert!(tracker.finish().is_empty());
    }

    #[test]
    fn fragmentation_does_not_change_the_call() {
        let arguments = r#"{"path":"/tmp/a b.txt","lines":[1,2,3],"follow":true}"#;

        for split in 0..=arguments.len() {
            let (head, tail) = arguments.split_at(split);
            let mut tracker = AnthropicStreamTracker::new();

            let events = vec![
                tool_start(0, "toolu_1", "read_file"),
                json_delta(0, head),
                json_delta(0, tail),
                block_stop(0),
                message_delta("tool_use", 3),
                message_stop(),
            ];

            let calls: Vec<_> = decode_all(&mut tracker, &events)
                .into_iter()
                .filter(|chunk| matches!(chunk, UnifiedStreamChunk::ToolCall { .. }))
                .collect();

            assert_eq!(
                calls,
                vec![UnifiedStreamChunk::ToolCall {
                    id: "toolu_1".into(),
                    name: "read_file".into(),
                    arguments: serde_json::from_str(arguments).unwrap(),
                }],
                "split at {split}"
            );
        }
    }

    #[test]
    fn interleaved_blocks_keep_their_fragments() {
        let mut tracker = AnthropicStreamTracker::new();

        let events = vec![
            tool_start(1, "toolu_a", "lookup"),
            tool_start(2, "toolu_b", "lookup"),
            json_delta(2, r#"{"key":"b""#),
            json_delta(1, r#"{"key":"a""#),
            json_delta(2, "}"),
            block_stop(2),
            json_delta(1, "}"),
            block_stop(1),
        ];

        let calls: Vec<_> = decode_all(&mut tracker, &events)
            .into_iter()
            .filter_map(|chunk| match chunk {
                UnifiedStreamChunk::ToolCall { id, arguments, .. } => Some((id, arguments)),
                _ => None,
            })
            .collect();

        assert_eq!(
            calls,
            vec![
                ("toolu_b".to_string(), json!({"key": "b"})),
                ("toolu_a".to_string(), json!({"key": "a"})),
            ]
        );
    }

    #[test]
    fn error_event_ends_the_stream() {
        let mut tracker = AnthropicStreamTracker::new();

        let events = vec![
            message_start(10),
            tool_start(0, "toolu_1", "search"),
            json_delta(0, r#"{"q":"#),
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}).to_string(),
        ];

        let chunks = decode_all(&mut tracker, &events);

        assert_eq!(
            chunks.last(),
            Some(&UnifiedStreamChunk::Done {
                finish_reason: UnifiedFinishReason::Error,
                has_tool_calls: false,
                usage: Some(UnifiedUsage::new(10, 1)),
            })
        );

        assert!(!contains_tool_call(&chunks));
        assert!(tracker.finish().is_empty());
    }

    #[test]
    fn truncated_stream_is_finished_by_finish() {
        let mut tracker = AnthropicStreamTracker::new();

        let events = vec![
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": "Hel"}}).to_string(),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}}).to_string(),
            "{\"type\": ".to_string(),
        ];

        let chunks = decode_all(&mut tracker, &events);
        assert_eq!(chunks.len(), 2);

        assert_eq!(
            tracker.finish(),
            vec![UnifiedStreamChunk::Done {
                finish_reason: UnifiedFinishReason::Other,
                has_tool_calls: false,
                usage: None,
            }]
        );
    }

    #[test]
    fn thinking_deltas_are_ignored() {
        let mut tracker = AnthropicStreamTracker::new();

        let events = vec![
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}).to_string(),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "hmm"}}).to_string(),
            block_stop(0),
        ];

        assert!(decode_all(&mut tracker, &events).is_empty());
    }
}
