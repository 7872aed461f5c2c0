//! Unified messages to Gemini GenerateContent request shapes.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::output::{GoogleBlob, GoogleContent, GoogleFunctionCall, GoogleFunctionResponse, GooglePart, GoogleRole};
use crate::{
    messages::unified::{
        ToolResultOutput, UnifiedContentContainer, UnifiedContentPart, UnifiedMessage, UnifiedRole,
        UnifiedToolDefinition,
    },
    provider::{EncodedMessages, Encoder, ImageFetcher, image, join_system_prompts, schema},
};

/// Tool declarations. Gemini expects all functions inside a single entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleTool {
    pub function_declarations: Vec<GoogleFunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoogleFunctionDeclaration {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub parameters: Value,
}

/// A tool result waiting to be emitted as a `functionResponse` part.
struct PendingResponse {
    tool_call_id: String,
    part: GooglePart,
}

/// Encodes unified messages for Gemini.
///
/// Gemini correlates function results with calls by name only. The encoder remembers the
/// name of every call it emits, groups the results answering one model turn into a
/// single `function` content, and orders them like the calls so that repeated calls to
/// the same function pair up by position.
pub struct GoogleEncoder<'a> {
    images: &'a dyn ImageFetcher,
}

impl<'a> GoogleEncoder<'a> {
    pub fn new(images: &'a dyn ImageFetcher) -> Self {
        Self { images }
    }

    async fn encode_user_parts(&self, parts: Vec<UnifiedContentPart>) -> Vec<GooglePart> {
        let mut encoded = Vec::with_capacity(parts.len());

        for part in parts {
            match part {
                UnifiedContentPart::Text { text } if text.is_empty() => (),
                UnifiedContentPart::Text { text } => encoded.push(GooglePart::text(text)),
                UnifiedContentPart::Image { source } => {
                    if let Some((mime_type, data)) = image::inline_image(&source, self.images).await {
                        encoded.push(GooglePart {
                            inline_data: Some(GoogleBlob { mime_type, data }),
                            ..Default::default()
                        });
                    }
                }
                UnifiedContentPart::ToolCall { .. } | UnifiedContentPart::ToolResult { .. } => (),
            }
        }

        encoded
    }
}

#[async_trait]
impl Encoder for GoogleEncoder<'_> {
    type Message = GoogleContent;
    type Tool = GoogleTool;

    async fn encode_messages(&self, messages: &[UnifiedMessage]) -> crate::Result<EncodedMessages<GoogleContent>> {
        let mut system = Vec::new();
        let mut contents = Vec::with_capacity(messages.len());

        let mut call_names: HashMap<String, String> = HashMap::new();
        let mut turn_calls: Vec<String> = Vec::new();
        let mut pending: Vec<PendingResponse> = Vec::new();

        for message in messages {
            message.validate()?;

            match message.role {
                UnifiedRole::System => system.push(message.text()),
                UnifiedRole::Tool => {
                    let message_id = message.tool_call_id.clone().unwrap_or_default();
                    let fallback_name = message.tool_name.as_deref();

                    match &message.content {
                        UnifiedContentContainer::Text(text) => {
                            let output = ToolResultOutput::Text(text.clone());
                            pending.push(pending_response(&call_names, message_id, fallback_name, &output));
                        }
                        UnifiedContentContainer::Parts(parts) => {
                            for part in parts {
                                if let UnifiedContentPart::ToolResult { tool_call_id, output } = part {
                                    let id = tool_call_id.clone().unwrap_or_else(|| message_id.clone());
                                    pending.push(pending_response(&call_names, id, fallback_name, output));
                                }
                            }
                        }
                    }
                }
                UnifiedRole::User => {
                    let (results, rest) = split_results(message.parts());

                    for (id, output) in results {
                        pending.push(pending_response(&call_names, id, None, &output));
                    }

                    flush_responses(&mut contents, &mut pending, &turn_calls);

                    let parts = self.encode_user_parts(rest).await;

                    if !parts.is_empty() {
                        contents.push(GoogleContent {
                            role: Some(GoogleRole::User),
                            parts,
                        });
                    }
                }
                UnifiedRole::Assistant => {
                    flush_responses(&mut contents, &mut pending, &turn_calls);

                    let (results, rest) = split_results(message.parts());
                    let mut parts = Vec::with_capacity(rest.len());
                    let mut calls = Vec::new();

                    for part in rest {
                        match part {
                            UnifiedContentPart::Text { text } if text.is_empty() => (),
                            UnifiedContentPart::Text { text } => parts.push(GooglePart::text(text)),
                            UnifiedContentPart::ToolCall { id, name, input } => {
                                call_names.insert(id.clone(), name.clone());
                                calls.push(id);

                                parts.push(GooglePart {
                                    function_call: Some(GoogleFunctionCall { name, args: input }),
                                    ..Default::default()
                                });
                            }
                            UnifiedContentPart::Image { .. } => log::debug!("Dropping image from a model turn"),
                            UnifiedContentPart::ToolResult { .. } => (),
                        }
                    }

                    if !calls.is_empty() {
                        turn_calls = calls;
                    }

                    if parts.is_empty() {
                        log::debug!("Skipping empty model turn");
                    } else {
                        contents.push(GoogleContent {
                            role: Some(GoogleRole::Model),
                            parts,
                        });
                    }

                    for (id, output) in results {
                        pending.push(pending_response(&call_names, id, None, &output));
                    }
                }
            }
        }

        flush_responses(&mut contents, &mut pending, &turn_calls);

        Ok(EncodedMessages {
            messages: contents,
            system: join_system_prompts(system),
        })
    }

    fn encode_tools(&self, tools: &[UnifiedToolDefinition]) -> Vec<GoogleTool> {
        if tools.is_empty() {
            return Vec::new();
        }

        let function_declarations = tools
            .iter()
            .map(|tool| GoogleFunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: schema::to_google_schema(&tool.input_schema),
            })
            .collect();

        vec![GoogleTool { function_declarations }]
    }
}

/// Separates tool results, with their ids, from the rest of a message.
fn split_results(parts: Vec<UnifiedContentPart>) -> (Vec<(String, ToolResultOutput)>, Vec<UnifiedContentPart>) {
    let mut results = Vec::new();
    let mut rest = Vec::with_capacity(parts.len());

    for part in parts {
        match part {
            UnifiedContentPart::ToolResult {
                tool_call_id: Some(id),
                output,
            } => results.push((id, output)),
            UnifiedContentPart::ToolResult { tool_call_id: None, .. } => {
                log::warn!("Dropping tool result without a tool call id");
            }
            other => rest.push(other),
        }
    }

    (results, rest)
}

fn pending_response(
    call_names: &HashMap<String, String>,
    tool_call_id: String,
    fallback_name: Option<&str>,
    output: &ToolResultOutput,
) -> PendingResponse {
    let name = match call_names.get(&tool_call_id) {
        Some(name) => name.clone(),
        None => match fallback_name {
            Some(name) => name.to_string(),
            None => {
                log::warn!("No function call found for tool result '{tool_call_id}', using the id as its name");
                tool_call_id.clone()
            }
        },
    };

    PendingResponse {
        tool_call_id,
        part: GooglePart {
            function_response: Some(GoogleFunctionResponse {
                name,
                response: response_value(output),
            }),
            ..Default::default()
        },
    }
}

/// Gemini wants an object as the function response.
fn response_value(output: &ToolResultOutput) -> Value {
    match output {
        ToolResultOutput::Json(value @ Value::Object(_)) => value.clone(),
        ToolResultOutput::Json(value) => json!({ "result": value }),
        ToolResultOutput::Text(text) => match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => value,
            _ => json!({ "result": text }),
        },
        ToolResultOutput::Error(message) => json!({ "error": message }),
    }
}

/// Emits pending results as one `function` content, in the order of the calls they answer.
fn flush_responses(contents: &mut Vec<GoogleContent>, pending: &mut Vec<PendingResponse>, turn_calls: &[String]) {
    if pending.is_empty() {
        return;
    }

    pending.sort_by_key(|response| {
        turn_calls
            .iter()
            .position(|id| *id == response.tool_call_id)
            .unwrap_or(usize::MAX)
    });

    contents.push(GoogleContent {
        role: Some(GoogleRole::Function),
        parts: pending.drain(..).map(|response| response.part).collect(),
    });
}
