//! Streaming decoders: provider stream events to [`UnifiedStreamChunk`]s.
//!
//! OpenAI and Anthropic split tool-call arguments into fragments that are only valid
//! JSON once concatenated. Their trackers keep one slot per call and emit a complete
//! [`UnifiedStreamChunk::ToolCall`] when the slot closes. Gemini sends whole calls, so
//! its decoder only keeps per-stream flags.
//!
//! A decoder belongs to exactly one stream. Create a new one per request through
//! [`ProviderFamily::stream_decoder`](crate::provider::ProviderFamily::stream_decoder).

mod anthropic;
mod google;
mod openai;

use std::collections::HashMap;

pub use self::anthropic::AnthropicStreamTracker;
pub use self::google::GoogleStreamDecoder;
pub use self::openai::OpenAiStreamTracker;

use crate::{messages::unified::UnifiedStreamChunk, provider::parse_tool_arguments};

/// Turns the raw `data` payloads of one stream into unified chunks.
pub trait StreamDecoder: Send {
    /// Decodes one event. An empty result means the event carried nothing for the caller.
    ///
    /// Malformed events are logged and skipped.
    fn decode(&mut self, raw: &str) -> Vec<UnifiedStreamChunk>;

    /// Flushes state at end of input, emitting `Done` if the stream never sent one.
    fn finish(&mut self) -> Vec<UnifiedStreamChunk>;
}

/// State of one tool-call slot.
#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Idle,
    Accumulating {
        id: String,
        name: String,
        raw: String,
    },
}

/// Tool-call slots keyed by the provider's index.
#[derive(Debug, Default)]
struct SlotTracker {
    slots: HashMap<u32, SlotState>,
}

impl SlotTracker {
    /// Opens a slot. A slot that is still accumulating another call is closed first.
    ///
    /// An empty id is not a new call; some OpenAI-compatible servers repeat `"id": ""`
    /// on continuation deltas.
    fn start(&mut self, slot: u32, id: String, name: String) -> Option<UnifiedStreamChunk> {
        if id.is_empty() {
            return None;
        }

        let previous = match self.slots.get(&slot) {
            Some(SlotState::Accumulating { id: current, .. }) if *current == id => return None,
            Some(SlotState::Accumulating { id: current, .. }) => {
                log::warn!("Tool call slot {slot} reused by '{id}' before '{current}' completed");
                self.complete(slot)
            }
            Some(SlotState::Idle) | None => None,
        };

        self.slots.insert(
            slot,
            SlotState::Accumulating {
                id,
                name,
                raw: String::new(),
            },
        );

        previous
    }

    /// Appends an argument fragment, echoing it as a delta.
    fn append(&mut self, slot: u32, fragment: &str) -> Option<UnifiedStreamChunk> {
        if fragment.is_empty() {
            return None;
        }

        match self.slots.get_mut(&slot) {
            Some(SlotState::Accumulating { id, raw, .. }) => {
                raw.push_str(fragment);

                Some(UnifiedStreamChunk::ToolCallDelta {
                    id: id.clone(),
                    delta: fragment.to_string(),
                })
            }
            Some(SlotState::Idle) | None => {
                log::warn!("Dropping argument fragment for idle tool call slot {slot}");
                None
            }
        }
    }

    /// Closes a slot, emitting the call if its arguments parse.
    fn complete(&mut self, slot: u32) -> Option<UnifiedStreamChunk> {
        let state = self.slots.get_mut(&slot).map(std::mem::take)?;

        let SlotState::Accumulating { id, name, raw } = state else {
            return None;
        };

        match parse_tool_arguments(&raw) {
            Some(arguments) => Some(UnifiedStreamChunk::ToolCall { id, name, arguments }),
            None => {
                log::warn!("Dropping tool call '{name}' ({id}): arguments are not a JSON object: {raw}");
                None
            }
        }
    }

    /// Closes every open slot in index order.
    fn complete_all(&mut self) -> Vec<UnifiedStreamChunk> {
        let mut open: Vec<u32> = self
            .slots
            .iter()
            .filter(|(_, state)| matches!(state, SlotState::Accumulating { .. }))
            .map(|(slot, _)| *slot)
            .collect();

        open.sort_unstable();

        open.into_iter().filter_map(|slot| self.complete(slot)).collect()
    }

    fn reset(&mut self) {
        self.slots.clear();
    }
}

fn contains_tool_call(chunks: &[UnifiedStreamChunk]) -> bool {
    chunks
        .iter()
        .any(|chunk| matches!(chunk, UnifiedStreamChunk::ToolCall { .. }))
}
