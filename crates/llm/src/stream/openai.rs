use super::{SlotTracker, StreamDecoder, contains_tool_call};
use crate::{
    messages::unified::{UnifiedFinishReason, UnifiedStreamChunk, UnifiedUsage},
    provider::openai::output::OpenAiStreamChunk,
};

const DONE_MARKER: &str = "[DONE]";

/// Correlates streamed Chat Completions tool-call fragments by `index`.
///
/// A `finish_reason` closes every open slot, but `Done` is held back: with
/// `stream_options.include_usage` the usage arrives in a trailing chunk without
/// choices. `Done` goes out on that chunk, on `[DONE]`, or on [`StreamDecoder::finish`].
#[derive(Debug, Default)]
pub struct OpenAiStreamTracker {
    slots: SlotTracker,
    pending_finish: Option<UnifiedFinishReason>,
    usage: Option<UnifiedUsage>,
    has_tool_calls: bool,
    active: bool,
}

impl OpenAiStreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn done(&mut self) -> Vec<UnifiedStreamChunk> {
        if !self.active {
            return Vec::new();
        }

        let mut chunks = self.slots.complete_all();
        self.has_tool_calls |= contains_tool_call(&chunks);

        let finish_reason = self.pending_finish.take().unwrap_or_else(|| {
            log::warn!("OpenAI stream ended without a finish reason");
            UnifiedFinishReason::Other
        });

        chunks.push(UnifiedStreamChunk::Done {
            finish_reason,
            has_tool_calls: self.has_tool_calls,
            usage: self.usage.take(),
        });

        *self = Self::default();

        chunks
    }
}

impl StreamDecoder for OpenAiStreamTracker {
    fn decode(&mut self, raw: &str) -> Vec<UnifiedStreamChunk> {
        let raw = raw.trim();

        if raw.is_empty() {
            return Vec::new();
        }

        if raw == DONE_MARKER {
            return self.done();
        }

        let chunk: OpenAiStreamChunk = match sonic_rs::from_str(raw) {
            Ok(chunk) => chunk,
            Err(e) => {
                log::warn!("Skipping malformed OpenAI stream chunk: {e}");
                return Vec::new();
            }
        };

        self.active = true;

        let mut chunks = Vec::new();

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                chunks.push(UnifiedStreamChunk::Text { delta: text });
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();

                if let Some(id) = call.id {
                    let name = function.name.unwrap_or_default();
                    chunks.extend(self.slots.start(call.index, id, name));
                }

                if let Some(arguments) = function.arguments {
                    chunks.extend(self.slots.append(call.index, &arguments));
                }
            }

            if let Some(reason) = choice.finish_reason {
                chunks.extend(self.slots.complete_all());
                self.pending_finish = Some(reason.into());
            }
        }

        self.has_tool_calls |= contains_tool_call(&chunks);

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());

            if self.pending_finish.is_some() {
                chunks.extend(self.done());
            }
        }

        chunks
    }

    fn finish(&mut self) -> Vec<UnifiedStreamChunk> {
        self.done()
    }
}
