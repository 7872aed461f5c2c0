//! Unified messages to OpenAI Chat Completions request shapes.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::{
    messages::unified::{
        ToolResultOutput, UnifiedContentContainer, UnifiedContentPart, UnifiedImageSource, UnifiedMessage,
        UnifiedRole, UnifiedToolDefinition,
    },
    provider::{EncodedMessages, Encoder, image, schema},
};

/// Role of an OpenAI chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in an OpenAI chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiMessage {
    pub role: OpenAiRole,

    /// `None` only on assistant messages that carry nothing but tool calls.
    pub content: Option<OpenAiContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: OpenAiRole, text: String) -> Self {
        Self {
            role,
            content: Some(OpenAiContent::Text(text)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool(tool_call_id: String, output: &ToolResultOutput) -> Self {
        let content = match output {
            ToolResultOutput::Error(message) => format!("Error: {message}"),
            other => other.to_text(),
        };

        Self {
            role: OpenAiRole::Tool,
            content: Some(OpenAiContent::Text(content)),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
        }
    }
}

/// Message content: a plain string or typed parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiImageUrl {
    /// An `https` URL or a `data:` URL.
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallType {
    Function,
}

/// A tool call on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiToolCall {
    pub id: String,
    pub r#type: ToolCallType,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiFunctionCall {
    pub name: String,

    /// JSON-encoded arguments.
    pub arguments: String,
}

/// A tool definition in an OpenAI request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiTool {
    pub r#type: ToolCallType,
    pub function: OpenAiFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiFunction {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub parameters: Value,
}

/// Encodes unified messages for OpenAI.
///
/// System messages stay inline, tool results become standalone `tool` messages and
/// images are passed by URL, inline data turning into a `data:` URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiEncoder;

#[async_trait]
impl Encoder for OpenAiEncoder {
    type Message = OpenAiMessage;
    type Tool = OpenAiTool;

    async fn encode_messages(&self, messages: &[UnifiedMessage]) -> crate::Result<EncodedMessages<OpenAiMessage>> {
        let mut encoded = Vec::with_capacity(messages.len());

        for message in messages {
            message.validate()?;

            match message.role {
                UnifiedRole::System => encoded.push(OpenAiMessage::text(OpenAiRole::System, message.text())),
                UnifiedRole::User => encode_user(message, &mut encoded),
                UnifiedRole::Assistant => encode_assistant(message, &mut encoded),
                UnifiedRole::Tool => encode_tool(message, &mut encoded),
            }
        }

        Ok(EncodedMessages {
            messages: encoded,
            system: None,
        })
    }

    fn encode_tools(&self, tools: &[UnifiedToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                r#type: ToolCallType::Function,
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: schema::strip_schema_keyword(&tool.input_schema),
                },
            })
            .collect()
    }
}

fn encode_user(message: &UnifiedMessage, encoded: &mut Vec<OpenAiMessage>) {
    let parts = match &message.content {
        UnifiedContentContainer::Text(text) => {
            encoded.push(OpenAiMessage::text(OpenAiRole::User, text.clone()));
            return;
        }
        UnifiedContentContainer::Parts(parts) => parts,
    };

    let mut content = Vec::new();

    for part in parts {
        match part {
            UnifiedContentPart::Text { text } => content.push(OpenAiContentPart::Text { text: text.clone() }),
            UnifiedContentPart::Image { source } => content.push(OpenAiContentPart::ImageUrl {
                image_url: OpenAiImageUrl { url: image_url(source) },
            }),
            UnifiedContentPart::ToolResult { tool_call_id, output } => {
                // Tool messages must directly follow the assistant turn, ahead of the user text.
                let id = tool_call_id.clone().unwrap_or_default();
                encoded.push(OpenAiMessage::tool(id, output));
            }
            UnifiedContentPart::ToolCall { .. } => (),
        }
    }

    if content.is_empty() {
        return;
    }

    encoded.push(OpenAiMessage {
        role: OpenAiRole::User,
        content: Some(OpenAiContent::Parts(content)),
        tool_calls: None,
        tool_call_id: None,
    });
}

fn encode_assistant(message: &UnifiedMessage, encoded: &mut Vec<OpenAiMessage>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut results = Vec::new();

    for part in message.parts() {
        match part {
            UnifiedContentPart::Text { text: fragment } => text.push_str(&fragment),
            UnifiedContentPart::ToolCall { id, name, input } => tool_calls.push(OpenAiToolCall {
                id,
                r#type: ToolCallType::Function,
                function: OpenAiFunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            UnifiedContentPart::ToolResult { tool_call_id, output } => {
                results.push(OpenAiMessage::tool(tool_call_id.unwrap_or_default(), &output));
            }
            UnifiedContentPart::Image { .. } => {
                log::debug!("Skipping image part in assistant message, OpenAI does not accept assistant images");
            }
        }
    }

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(OpenAiContent::Text(text))
    };

    encoded.push(OpenAiMessage {
        role: OpenAiRole::Assistant,
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });

    encoded.extend(results);
}

fn encode_tool(message: &UnifiedMessage, encoded: &mut Vec<OpenAiMessage>) {
    let message_id = message.tool_call_id.clone().unwrap_or_default();

    let parts = match &message.content {
        UnifiedContentContainer::Text(text) => {
            encoded.push(OpenAiMessage::tool(message_id, &ToolResultOutput::Text(text.clone())));
            return;
        }
        UnifiedContentContainer::Parts(parts) => parts,
    };

    let mut text = String::new();
    let mut has_result = false;

    for part in parts {
        match part {
            UnifiedContentPart::ToolResult { tool_call_id, output } => {
                let id = tool_call_id.clone().unwrap_or_else(|| message_id.clone());
                encoded.push(OpenAiMessage::tool(id, output));
                has_result = true;
            }
            UnifiedContentPart::Text { text: fragment } => text.push_str(fragment),
            UnifiedContentPart::Image { .. } | UnifiedContentPart::ToolCall { .. } => (),
        }
    }

    if !has_result {
        encoded.push(OpenAiMessage::tool(message_id, &ToolResultOutput::Text(text)));
    }
}

fn image_url(source: &UnifiedImageSource) -> String {
    match source {
        UnifiedImageSource::Url { url } => url.clone(),
        UnifiedImageSource::Inline { media_type, data } => image::data_url(media_type, data),
    }
}
