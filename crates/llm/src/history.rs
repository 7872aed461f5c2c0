//! Conversation history repair when a conversation moves to another provider family.
//!
//! Each family tolerates different history shapes. Anthropic carries tool results
//! inside user messages, OpenAI wants one `tool` message per call right after the
//! assistant turn, Gemini pairs results with calls by name. Switching families
//! mid-conversation re-derives the neutral form:
//!
//! - tool results are lifted into standalone `tool` messages, placed after the assistant
//!   turn that made the calls and ordered like the calls;
//! - results without a call are dropped, calls without a result get an error result;
//! - tool call ids are rewritten to be valid and unique for the new family.
//!
//! A turn with more than [`MAX_TOOL_ITEMS_PER_TURN`] calls or results is treated as
//! corrupted and truncated.

use std::collections::{HashMap, HashSet};

use crate::{
    messages::unified::{ToolResultOutput, UnifiedContentContainer, UnifiedContentPart, UnifiedMessage, UnifiedRole},
    provider::ProviderFamily,
};

/// Most tool calls, and most tool results, kept for a single assistant turn.
pub const MAX_TOOL_ITEMS_PER_TURN: usize = 50;

const INCOMPLETE_TOOL_CALL: &str = "Tool call was not completed";

const ANTHROPIC_MAX_ID_LEN: usize = 64;
const OPENAI_MAX_ID_LEN: usize = 40;

/// An assistant turn that exceeded [`MAX_TOOL_ITEMS_PER_TURN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionEvent {
    /// Index of the assistant message in the input history.
    pub turn_index: usize,
    /// Calls found in the turn, before truncation.
    pub tool_calls: usize,
    /// Results found for the turn, before truncation.
    pub tool_results: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedHistory {
    pub messages: Vec<UnifiedMessage>,
    pub corruption: Vec<CorruptionEvent>,
}

/// Adapts `history` to the family of `new_model_id`.
///
/// The history comes back unchanged when there is no previous model or when both
/// models belong to the same family.
pub fn normalize_history_for_model(
    history: &[UnifiedMessage],
    new_model_id: &str,
    previous_model_id: Option<&str>,
) -> crate::Result<Vec<UnifiedMessage>> {
    normalize_history_with_report(history, new_model_id, previous_model_id).map(|normalized| normalized.messages)
}

/// Like [`normalize_history_for_model`], also reporting truncated turns.
pub fn normalize_history_with_report(
    history: &[UnifiedMessage],
    new_model_id: &str,
    previous_model_id: Option<&str>,
) -> crate::Result<NormalizedHistory> {
    let target = ProviderFamily::from_model_id(new_model_id)?;

    let unchanged = || NormalizedHistory {
        messages: history.to_vec(),
        corruption: Vec::new(),
    };

    let Some(previous_model_id) = previous_model_id else {
        return Ok(unchanged());
    };

    let source = ProviderFamily::from_model_id(previous_model_id)?;

    if source == target {
        return Ok(unchanged());
    }

    log::debug!(
        "Normalizing {} history messages from {source} to {target} for model '{new_model_id}'",
        history.len()
    );

    Ok(Normalizer::new(target).run(history))
}

/// Tool calls of one assistant turn, waiting for their results.
struct PendingTurn {
    turn_index: usize,
    /// Kept calls in order: original id, rewritten id, name.
    calls: Vec<(String, String, String)>,
    /// Ids of calls dropped by truncation.
    truncated: HashSet<String>,
    results: HashMap<String, ToolResultOutput>,
    call_count: usize,
    result_count: usize,
}

impl PendingTurn {
    fn knows(&self, id: &str) -> bool {
        self.truncated.contains(id) || self.calls.iter().any(|(original, _, _)| original == id)
    }
}

struct Normalizer {
    ids: IdRewriter,
    messages: Vec<UnifiedMessage>,
    corruption: Vec<CorruptionEvent>,
    pending: Option<PendingTurn>,
}

impl Normalizer {
    fn new(target: ProviderFamily) -> Self {
        Self {
            ids: IdRewriter::new(target),
            messages: Vec::new(),
            corruption: Vec::new(),
            pending: None,
        }
    }

    fn run(mut self, history: &[UnifiedMessage]) -> NormalizedHistory {
        for (index, message) in history.iter().enumerate() {
            match message.role {
                UnifiedRole::System => {
                    self.flush();
                    self.messages.push(message.clone());
                }
                UnifiedRole::User => {
                    let (results, rest) = lift_results(message.parts(), None);
                    let lifted = !results.is_empty();

                    for (id, output) in results {
                        self.add_result(id, output);
                    }

                    self.flush();

                    if !lifted {
                        self.messages.push(message.clone());
                    } else if !rest.is_empty() {
                        self.messages.push(UnifiedMessage::user_with_parts(rest));
                    }
                }
                UnifiedRole::Tool => {
                    let results = match &message.content {
                        UnifiedContentContainer::Text(text) => message
                            .tool_call_id
                            .clone()
                            .map(|id| (id, ToolResultOutput::Text(text.clone())))
                            .into_iter()
                            .collect(),
                        UnifiedContentContainer::Parts(parts) => {
                            lift_results(parts.clone(), message.tool_call_id.as_deref()).0
                        }
                    };

                    for (id, output) in results {
                        self.add_result(id, output);
                    }
                }
                UnifiedRole::Assistant => self.assistant(index, message),
            }
        }

        self.flush();

        NormalizedHistory {
            messages: self.messages,
            corruption: self.corruption,
        }
    }

    fn assistant(&mut self, turn_index: usize, message: &UnifiedMessage) {
        let (results, rest) = lift_results(message.parts(), None);

        let has_calls = rest
            .iter()
            .any(|part| matches!(part, UnifiedContentPart::ToolCall { .. }));

        if results.is_empty() && !has_calls {
            self.flush();
            self.messages.push(message.clone());
            return;
        }

        let own_ids: HashSet<&str> = rest
            .iter()
            .filter_map(|part| match part {
                UnifiedContentPart::ToolCall { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();

        let (own_results, earlier_results): (Vec<_>, Vec<_>) =
            results.into_iter().partition(|(id, _)| own_ids.contains(id.as_str()));

        for (id, output) in earlier_results {
            self.add_result(id, output);
        }

        self.flush();

        let mut turn = PendingTurn {
            turn_index,
            calls: Vec::new(),
            truncated: HashSet::new(),
            results: HashMap::new(),
            call_count: 0,
            result_count: 0,
        };

        let mut parts = Vec::with_capacity(rest.len());

        for part in rest {
            let UnifiedContentPart::ToolCall { id, name, input } = part else {
                parts.push(part);
                continue;
            };

            if turn.knows(&id) {
                log::warn!("Dropping duplicate tool call '{id}' in assistant turn {turn_index}");
                continue;
            }

            turn.call_count += 1;

            if turn.calls.len() >= MAX_TOOL_ITEMS_PER_TURN {
                turn.truncated.insert(id);
                continue;
            }

            let new_id = self.ids.rewrite(&id);

            parts.push(UnifiedContentPart::ToolCall {
                id: new_id.clone(),
                name: name.clone(),
                input,
            });

            turn.calls.push((id, new_id, name));
        }

        if !parts.is_empty() {
            self.messages.push(UnifiedMessage::assistant_with_parts(parts));
        }

        if turn.call_count > 0 {
            self.pending = Some(turn);

            for (id, output) in own_results {
                self.add_result(id, output);
            }
        }
    }

    fn add_result(&mut self, id: String, output: ToolResultOutput) {
        let Some(turn) = self.pending.as_mut().filter(|turn| turn.knows(&id)) else {
            log::warn!("Dropping tool result '{id}' without a matching tool call");
            return;
        };

        turn.result_count += 1;

        if turn.truncated.contains(&id) {
            return;
        }

        if turn.results.contains_key(&id) {
            log::warn!("Dropping duplicate tool result for '{id}'");
            return;
        }

        turn.results.insert(id, output);
    }

    /// Emits the pending turn's results, one `tool` message per kept call.
    fn flush(&mut self) {
        let Some(mut turn) = self.pending.take() else {
            return;
        };

        for (original_id, new_id, name) in &turn.calls {
            let output = turn.results.remove(original_id).unwrap_or_else(|| {
                log::warn!("Tool call '{original_id}' ({name}) has no result, marking it as not completed");
                ToolResultOutput::Error(INCOMPLETE_TOOL_CALL.to_string())
            });

            self.messages
                .push(UnifiedMessage::tool_result(new_id.clone(), name.clone(), output));
        }

        if turn.call_count > MAX_TOOL_ITEMS_PER_TURN || turn.result_count > MAX_TOOL_ITEMS_PER_TURN {
            log::error!(
                "Assistant turn {} is corrupted: {} tool calls and {} tool results, keeping the first {}",
                turn.turn_index,
                turn.call_count,
                turn.result_count,
                MAX_TOOL_ITEMS_PER_TURN
            );

            self.corruption.push(CorruptionEvent {
                turn_index: turn.turn_index,
                tool_calls: turn.call_count,
                tool_results: turn.result_count,
            });
        }
    }
}

/// Splits tool results, with their ids, from the other parts of a message.
fn lift_results(
    parts: Vec<UnifiedContentPart>,
    message_id: Option<&str>,
) -> (Vec<(String, ToolResultOutput)>, Vec<UnifiedContentPart>) {
    let mut results = Vec::new();
    let mut rest = Vec::with_capacity(parts.len());

    for part in parts {
        match part {
            UnifiedContentPart::ToolResult { tool_call_id, output } => {
                match tool_call_id.or_else(|| message_id.map(str::to_string)) {
                    Some(id) => results.push((id, output)),
                    None => log::warn!("Dropping tool result without a tool call id"),
                }
            }
            other => rest.push(other),
        }
    }

    (results, rest)
}

/// Produces tool call ids the target family accepts, unique across the history.
struct IdRewriter {
    family: ProviderFamily,
    used: HashSet<String>,
}

impl IdRewriter {
    fn new(family: ProviderFamily) -> Self {
        Self {
            family,
            used: HashSet::new(),
        }
    }

    fn max_len(&self) -> usize {
        match self.family {
            ProviderFamily::Anthropic => ANTHROPIC_MAX_ID_LEN,
            ProviderFamily::OpenAi => OPENAI_MAX_ID_LEN,
            ProviderFamily::Google => usize::MAX,
        }
    }

    fn rewrite(&mut self, id: &str) -> String {
        let max_len = self.max_len();

        let base = match self.family {
            ProviderFamily::Anthropic => id
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect(),
            ProviderFamily::OpenAi | ProviderFamily::Google => id.to_string(),
        };

        let base = if base.is_empty() { "call".to_string() } else { base };
        let candidate = truncate(&base, max_len);

        if self.used.insert(candidate.clone()) {
            return candidate;
        }

        let mut counter = 1usize;

        loop {
            let suffix = format!("_{counter}");
            let candidate = format!("{}{suffix}", truncate(&base, max_len.saturating_sub(suffix.len())));

            if self.used.insert(candidate.clone()) {
                return candidate;
            }

            counter += 1;
        }
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
