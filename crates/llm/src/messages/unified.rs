//! Protocol-agnostic unified message types.
//!
//! Every provider encoder consumes these types and every decoder produces them,
//! so the rest of the application never sees a provider wire shape. The flow is:
//!
//! ```text
//! UnifiedMessage[] → Encoder → provider request
//! provider response / stream event → Decoder (+ tracker) → UnifiedResponse / UnifiedStreamChunk
//! ```
//!
//! Content parts and stream chunks are closed enums. Adding a variant forces every
//! encoder, decoder and the history normalizer to handle it.

use std::collections::HashSet;
use std::ops::AddAssign;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LlmError;

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnifiedRole {
    /// Instructions that steer the model.
    ///
    /// - **OpenAI**: kept inline as a `system` message
    /// - **Anthropic**: extracted into the top-level `system` field
    /// - **Google**: extracted into `systemInstruction`
    System,

    /// End-user input.
    User,

    /// Model output, possibly carrying tool calls.
    Assistant,

    /// The result of one tool call.
    ///
    /// - **OpenAI**: a standalone `tool` message
    /// - **Anthropic**: a `tool_result` block inside a `user` message
    /// - **Google**: a `functionResponse` part inside a `function` content
    Tool,
}

impl UnifiedRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Message content: either plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnifiedContentContainer {
    /// Plain text, the common case for user input.
    Text(String),

    /// Ordered content parts.
    Parts(Vec<UnifiedContentPart>),
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedContentPart {
    /// Plain text.
    Text { text: String },

    /// An image, either referenced by URL or carried inline.
    Image { source: UnifiedImageSource },

    /// A tool invocation requested by the assistant.
    ToolCall {
        /// Identifier correlating the call with its result.
        id: String,

        /// Name of the tool to run.
        name: String,

        /// Arguments, always a JSON object.
        input: Value,
    },

    /// The outcome of a tool invocation.
    ToolResult {
        /// The call this result answers.
        ///
        /// `None` means the id is inherited from the enclosing `tool` message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,

        /// What the tool produced.
        output: ToolResultOutput,
    },
}

impl UnifiedContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Get the text content if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Image data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedImageSource {
    /// A remote `http(s)` URL or a `data:` URL.
    Url { url: String },

    /// Base64-encoded bytes, without a data URL prefix.
    Inline { media_type: String, data: String },
}

/// Output of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolResultOutput {
    /// Free-form text.
    Text(String),

    /// Structured output.
    Json(Value),

    /// The tool failed; the message is shown to the model.
    Error(String),
}

impl ToolResultOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Text rendering used by providers that only accept string tool results.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(value) => value.to_string(),
            Self::Error(message) => message.clone(),
        }
    }
}

/// A conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedMessage {
    /// Who sent the message.
    pub role: UnifiedRole,

    /// Text or ordered parts.
    pub content: UnifiedContentContainer,

    /// The call a `tool` message answers. Required on `tool` messages, absent elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Name of the tool that produced a `tool` message.
    ///
    /// Google correlates results by name, so encoders fall back to it when the
    /// originating call is not part of the encoded history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl UnifiedMessage {
    fn new(role: UnifiedRole, content: UnifiedContentContainer) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(UnifiedRole::System, UnifiedContentContainer::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(UnifiedRole::User, UnifiedContentContainer::Text(text.into()))
    }

    pub fn user_with_parts(parts: Vec<UnifiedContentPart>) -> Self {
        Self::new(UnifiedRole::User, UnifiedContentContainer::Parts(parts))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(UnifiedRole::Assistant, UnifiedContentContainer::Text(text.into()))
    }

    pub fn assistant_with_parts(parts: Vec<UnifiedContentPart>) -> Self {
        Self::new(UnifiedRole::Assistant, UnifiedContentContainer::Parts(parts))
    }

    /// A `tool` message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, tool_name: impl Into<String>, output: ToolResultOutput) -> Self {
        Self {
            role: UnifiedRole::Tool,
            content: UnifiedContentContainer::Parts(vec![UnifiedContentPart::ToolResult {
                tool_call_id: None,
                output,
            }]),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }

    /// The content as a list of parts. Empty text yields no parts.
    pub fn parts(&self) -> Vec<UnifiedContentPart> {
        match &self.content {
            UnifiedContentContainer::Text(text) if text.is_empty() => Vec::new(),
            UnifiedContentContainer::Text(text) => vec![UnifiedContentPart::text(text.clone())],
            UnifiedContentContainer::Parts(parts) => parts.clone(),
        }
    }

    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        match &self.content {
            UnifiedContentContainer::Text(text) => text.clone(),
            UnifiedContentContainer::Parts(parts) => parts.iter().filter_map(UnifiedContentPart::as_text).collect(),
        }
    }

    /// Tool calls carried by this message, in order.
    pub fn tool_calls(&self) -> Vec<UnifiedToolCall> {
        let UnifiedContentContainer::Parts(parts) = &self.content else {
            return Vec::new();
        };

        parts
            .iter()
            .filter_map(|part| match part {
                UnifiedContentPart::ToolCall { id, name, input } => Some(UnifiedToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Checks the structural invariants encoders rely on.
    pub fn validate(&self) -> crate::Result<()> {
        let parts: &[UnifiedContentPart] = match &self.content {
            UnifiedContentContainer::Text(_) => &[],
            UnifiedContentContainer::Parts(parts) => parts,
        };

        if self.role == UnifiedRole::Tool {
            match self.tool_call_id.as_deref() {
                Some(id) if !id.is_empty() => (),
                _ => {
                    return Err(LlmError::InvalidMessage(
                        "tool message is missing its tool_call_id".to_string(),
                    ));
                }
            }
        }

        let mut call_ids = HashSet::new();

        for part in parts {
            match part {
                UnifiedContentPart::ToolCall { id, name, input } => {
                    if self.role != UnifiedRole::Assistant {
                        return Err(LlmError::InvalidMessage(format!(
                            "tool call '{name}' found in a {} message",
                            self.role.as_str()
                        )));
                    }

                    if id.is_empty() {
                        return Err(LlmError::InvalidMessage(format!("tool call '{name}' has an empty id")));
                    }

                    if !call_ids.insert(id.as_str()) {
                        return Err(LlmError::InvalidMessage(format!(
                            "tool call id '{id}' appears more than once in one assistant message"
                        )));
                    }

                    if !input.is_object() {
                        return Err(LlmError::InvalidMessage(format!(
                            "tool call '{id}' input must be a JSON object"
                        )));
                    }
                }
                UnifiedContentPart::ToolResult { tool_call_id, .. } => {
                    let inherited = self.role == UnifiedRole::Tool;
                    let named = tool_call_id.as_deref().is_some_and(|id| !id.is_empty());

                    if !inherited && !named {
                        return Err(LlmError::InvalidMessage(format!(
                            "tool result in a {} message must name its tool call",
                            self.role.as_str()
                        )));
                    }
                }
                UnifiedContentPart::Text { .. } | UnifiedContentPart::Image { .. } => (),
            }
        }

        Ok(())
    }
}

/// A fully materialized tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedToolDefinition {
    /// Unique name within a registry.
    pub name: String,

    /// What the tool does, shown to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema (draft 7 subset) of the tool input.
    ///
    /// `$schema` and keywords a provider rejects are stripped at encode time.
    pub input_schema: Value,
}

impl UnifiedToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// Tool definitions keyed by name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, UnifiedToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(definitions: impl IntoIterator<Item = UnifiedToolDefinition>) -> crate::Result<Self> {
        let mut registry = Self::new();

        for definition in definitions {
            registry.register(definition)?;
        }

        Ok(registry)
    }

    pub fn register(&mut self, definition: UnifiedToolDefinition) -> crate::Result<()> {
        if self.tools.contains_key(&definition.name) {
            return Err(LlmError::DuplicateTool(definition.name));
        }

        self.tools.insert(definition.name.clone(), definition);

        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<UnifiedToolDefinition> {
        self.tools.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl UnifiedUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

impl AddAssign for UnifiedUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Why the model stopped generating.
///
/// The common denominator of the three provider vocabularies; each decoder
/// documents its lossy mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedFinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

/// A complete, non-streaming model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResponse {
    /// Content parts in the order the provider produced them.
    pub parts: Vec<UnifiedContentPart>,

    pub finish_reason: UnifiedFinishReason,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UnifiedUsage>,
}

impl UnifiedResponse {
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(UnifiedContentPart::as_text).collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, UnifiedContentPart::ToolCall { .. }))
    }

    /// The response as an assistant message for the running history.
    pub fn into_message(self) -> UnifiedMessage {
        UnifiedMessage::assistant_with_parts(self.parts)
    }
}

/// One incremental unit of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamChunk {
    /// A piece of assistant text.
    Text { delta: String },

    /// A raw fragment of a tool call's JSON arguments.
    ToolCallDelta { id: String, delta: String },

    /// A tool call whose arguments are complete and parsed.
    ToolCall { id: String, name: String, arguments: Value },

    /// Terminal chunk of a provider turn.
    Done {
        finish_reason: UnifiedFinishReason,
        has_tool_calls: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<UnifiedUsage>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::{assert_json_snapshot, assert_snapshot};
    use serde_json::json;

    #[test]
    fn tool_message_requires_call_id() {
        let mut message = UnifiedMessage::tool_result("call_1", "search", ToolResultOutput::Text("ok".into()));
        assert!(message.validate().is_ok());

        message.tool_call_id = Some(String::new());
        let error = message.validate().unwrap_err();

        assert_snapshot!(error.to_string(), @"Invalid message: tool message is missing its tool_call_id");
    }

    #[test]
    fn duplicate_call_ids_in_one_message_are_rejected() {
        let message = UnifiedMessage::assistant_with_parts(vec![
            UnifiedContentPart::tool_call("call_1", "a", json!({})),
            UnifiedContentPart::tool_call("call_1", "b", json!({})),
        ]);

        let error = message.validate().unwrap_err();

        assert_snapshot!(error.to_string(), @"Invalid message: tool call id 'call_1' appears more than once in one assistant message");
    }

    #[test]
    fn inlined_results_must_name_their_call() {
        let message = UnifiedMessage::user_with_parts(vec![UnifiedContentPart::ToolResult {
            tool_call_id: None,
            output: ToolResultOutput::Text("42".into()),
        }]);

        assert!(message.validate().is_err());
    }

    #[test]
    fn tool_calls_outside_assistant_are_rejected() {
        let message = UnifiedMessage::user_with_parts(vec![UnifiedContentPart::tool_call("c", "a", json!({}))]);

        let error = message.validate().unwrap_err();

        assert_snapshot!(error.to_string(), @"Invalid message: tool call 'a' found in a user message");
    }

    #[test]
    fn registry_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry
            .register(UnifiedToolDefinition::new("search", "Search the web", json!({"type": "object"})))
            .unwrap();
        registry
            .register(UnifiedToolDefinition::new("fetch", "Fetch a page", json!({"type": "object"})))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("fetch"));

        let names: Vec<String> = registry.definitions().into_iter().map(|tool| tool.name).collect();
        assert_eq!(names, ["search", "fetch"]);
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let error = ToolRegistry::from_definitions([
            UnifiedToolDefinition::new("search", "Search the web", json!({"type": "object"})),
            UnifiedToolDefinition::new("search", "Search again", json!({"type": "object"})),
        ])
        .unwrap_err();

        assert_snapshot!(error.to_string(), @"Tool 'search' is defined more than once");
    }

    #[test]
    fn message_serialization() {
        let message = UnifiedMessage::assistant_with_parts(vec![
            UnifiedContentPart::text("Let me check."),
            UnifiedContentPart::tool_call("call_1", "get_weather", json!({"city": "Paris"})),
        ]);

        assert_json_snapshot!(message, @r#"
        {
          "role": "assistant",
          "content": [
            {
              "type": "text",
              "text": "Let me check."
            },
            {
              "type": "tool_call",
              "id": "call_1",
              "name": "get_weather",
              "input": {
                "city": "Paris"
              }
            }
          ]
        }
        "#);
    }

    #[test]
    fn usage_sums_saturate() {
        let mut usage = UnifiedUsage::new(10, 5);
        usage += UnifiedUsage::new(u32::MAX, 1);

        assert_eq!(usage.input_tokens, u32::MAX);
        assert_eq!(usage.output_tokens, 6);
    }
}
