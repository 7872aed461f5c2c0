//! Unified messages to Anthropic Messages API request shapes.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::{
    messages::unified::{
        ToolResultOutput, UnifiedContentContainer, UnifiedContentPart, UnifiedMessage, UnifiedRole,
        UnifiedToolDefinition,
    },
    provider::{EncodedMessages, Encoder, ImageFetcher, image, join_system_prompts, schema},
};

/// Anthropic only knows two conversational roles; tool results ride in `user` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMessage {
    pub role: AnthropicRole,
    pub content: Vec<AnthropicContentBlock>,
}

/// A content block in a request message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    Text {
        text: String,
    },
    Image {
        source: AnthropicImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl AnthropicContentBlock {
    fn tool_result(tool_use_id: String, output: &ToolResultOutput) -> Self {
        Self::ToolResult {
            tool_use_id,
            content: output.to_text(),
            is_error: output.is_error(),
        }
    }

    fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }
}

/// Inline image data. Anthropic does not fetch URLs on our behalf.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicImageSource {
    pub r#type: AnthropicImageSourceType,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicImageSourceType {
    Base64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicTool {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub input_schema: Value,
}

/// Encodes unified messages for Anthropic.
///
/// System messages move to the top-level `system` field, joined by blank lines. Tool
/// results become `tool_result` blocks of a synthesized `user` message, and consecutive
/// results share one such message. Images are inlined through the [`ImageFetcher`].
pub struct AnthropicEncoder<'a> {
    images: &'a dyn ImageFetcher,
}

impl<'a> AnthropicEncoder<'a> {
    pub fn new(images: &'a dyn ImageFetcher) -> Self {
        Self { images }
    }

    async fn encode_parts(&self, parts: Vec<UnifiedContentPart>, message_id: Option<&str>) -> Vec<AnthropicContentBlock> {
        let mut blocks = Vec::with_capacity(parts.len());

        for part in parts {
            match part {
                UnifiedContentPart::Text { text } if text.is_empty() => (),
                UnifiedContentPart::Text { text } => blocks.push(AnthropicContentBlock::Text { text }),
                UnifiedContentPart::Image { source } => {
                    if let Some((media_type, data)) = image::inline_image(&source, self.images).await {
                        blocks.push(AnthropicContentBlock::Image {
                            source: AnthropicImageSource {
                                r#type: AnthropicImageSourceType::Base64,
                                media_type,
                                data,
                            },
                        });
                    }
                }
                UnifiedContentPart::ToolCall { id, name, input } => {
                    blocks.push(AnthropicContentBlock::ToolUse { id, name, input });
                }
                UnifiedContentPart::ToolResult { tool_call_id, output } => {
                    match tool_call_id.as_deref().or(message_id) {
                        Some(id) => blocks.push(AnthropicContentBlock::tool_result(id.to_string(), &output)),
                        None => log::warn!("Dropping tool result without a tool call id"),
                    }
                }
            }
        }

        blocks
    }
}

#[async_trait]
impl Encoder for AnthropicEncoder<'_> {
    type Message = AnthropicMessage;
    type Tool = AnthropicTool;

    async fn encode_messages(&self, messages: &[UnifiedMessage]) -> crate::Result<EncodedMessages<AnthropicMessage>> {
        let mut system = Vec::new();
        let mut encoded: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

        for message in messages {
            message.validate()?;

            match message.role {
                UnifiedRole::System => system.push(message.text()),
                UnifiedRole::User => {
                    let blocks = self.encode_parts(message.parts(), None).await;
                    let (results, rest): (Vec<_>, Vec<_>) = blocks.into_iter().partition(|block| block.is_tool_result());

                    // tool_result blocks must open the user message that follows a tool_use turn.
                    push_user(&mut encoded, results);
                    push_user(&mut encoded, rest);
                }
                UnifiedRole::Assistant => {
                    let blocks = self.encode_parts(message.parts(), None).await;
                    let (results, mut rest): (Vec<_>, Vec<_>) =
                        blocks.into_iter().partition(|block| block.is_tool_result());

                    rest.retain(|block| !matches!(block, AnthropicContentBlock::Image { .. }));

                    if rest.is_empty() {
                        log::debug!("Skipping empty assistant message");
                    } else {
                        encoded.push(AnthropicMessage {
                            role: AnthropicRole::Assistant,
                            content: rest,
                        });
                    }

                    push_user(&mut encoded, results);
                }
                UnifiedRole::Tool => {
                    let message_id = message.tool_call_id.as_deref();

                    let blocks = match &message.content {
                        UnifiedContentContainer::Text(text) => vec![AnthropicContentBlock::tool_result(
                            message_id.unwrap_or_default().to_string(),
                            &ToolResultOutput::Text(text.clone()),
                        )],
                        UnifiedContentContainer::Parts(parts) => {
                            let blocks = self.encode_parts(parts.clone(), message_id).await;
                            blocks.into_iter().filter(AnthropicContentBlock::is_tool_result).collect()
                        }
                    };

                    push_user(&mut encoded, blocks);
                }
            }
        }

        Ok(EncodedMessages {
            messages: encoded,
            system: join_system_prompts(system),
        })
    }

    fn encode_tools(&self, tools: &[UnifiedToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: schema::strip_schema_keyword(&tool.input_schema),
            })
            .collect()
    }
}

/// Appends user content, merging into the previous message when it holds tool results.
fn push_user(encoded: &mut Vec<AnthropicMessage>, blocks: Vec<AnthropicContentBlock>) {
    if blocks.is_empty() {
        return;
    }

    if let Some(last) = encoded.last_mut()
        && last.role == AnthropicRole::User
        && last.content.last().is_some_and(AnthropicContentBlock::is_tool_result)
    {
        last.content.extend(blocks);
        return;
    }

    encoded.push(AnthropicMessage {
        role: AnthropicRole::User,
        content: blocks,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{DisabledImageFetcher, FetchedImage};
    use insta::assert_json_snapshot;
    use serde_json::json;

    #[tokio::test]
    async fn single_user_message_has_no_system() {
        let encoded = AnthropicEncoder::new(&DisabledImageFetcher)
            .encode_messages(&[UnifiedMessage::user("hi")])
            .await
            .unwrap();

        assert_eq!(encoded.system, None);
        assert_json_snapshot!(encoded, @r#"
        {
          "messages": [
            {
              "role": "user",
              "content": [
                {
                  "type": "text",
                  "text": "hi"
                }
              ]
            }
          ]
        }
        "#);
    }

    #[tokio::test]
    async fn system_prompts_are_joined() {
        let messages = [
            UnifiedMessage::system("You are terse."),
            UnifiedMessage::system("Answer in French."),
            UnifiedMessage::user("Bonjour"),
        ];

        let encoded = AnthropicEncoder::new(&DisabledImageFetcher)
            .encode_messages(&messages)
            .await
            .unwrap();

        assert_eq!(encoded.system.as_deref(), Some("You are terse.\n\nAnswer in French."));
        assert_eq!(encoded.messages.len(), 1);
    }

    #[tokio::test]
    async fn consecutive_tool_results_share_one_user_message() {
        let messages = [
            UnifiedMessage::user("Compare Paris and Rome"),
            UnifiedMessage::assistant_with_parts(vec![
                UnifiedContentPart::text("Looking both up."),
                UnifiedContentPart::tool_call("toolu_1", "get_weather", json!({"city": "Paris"})),
                UnifiedContentPart::tool_call("toolu_2", "get_weather", json!({"city": "Rome"})),
            ]),
            UnifiedMessage::tool_result("toolu_1", "get_weather", ToolResultOutput::Text("21C".into())),
            UnifiedMessage::tool_result("toolu_2", "get_weather", ToolResultOutput::Error("unavailable".into())),
            UnifiedMessage::user("Thanks"),
        ];

        let encoded = AnthropicEncoder::new(&DisabledImageFetcher)
            .encode_messages(&messages)
            .await
            .unwrap();

        assert_json_snapshot!(encoded.messages, @r#"
        [
          {
            "role": "user",
            "content": [
              {
                "type": "text",
                "text": "Compare Paris and Rome"
              }
            ]
          },
          {
            "role": "assistant",
            "content": [
              {
                "type": "text",
                "text": "Looking both up."
              },
              {
                "type": "tool_use",
                "id": "toolu_1",
                "name": "get_weather",
                "input": {
                  "city": "Paris"
                }
              },
              {
                "type": "tool_use",
                "id": "toolu_2",
                "name": "get_weather",
                "input": {
                  "city": "Rome"
                }
              }
            ]
          },
          {
            "role": "user",
            "content": [
              {
                "type": "tool_result",
                "tool_use_id": "toolu_1",
                "content": "21C"
              },
              {
                "type": "tool_result",
                "tool_use_id": "toolu_2",
                "content": "unavailable",
                "is_error": true
              },
              {
                "type": "text",
                "text": "Thanks"
              }
            ]
          }
        ]
        "#);
    }

    struct PngFetcher;

    #[async_trait]
    impl ImageFetcher for PngFetcher {
        async fn fetch(&self, _url: &str) -> anyhow::Result<FetchedImage> {
            Ok(FetchedImage {
                media_type: "image/png".into(),
                data: b"png".to_vec(),
            })
        }
    }

    #[tokio::test]
    async fn remote_images_are_fetched_and_inlined() {
        let message = UnifiedMessage::user_with_parts(vec![UnifiedContentPart::Image {
            source: crate::messages::unified::UnifiedImageSource::Url {
                url: "https://example.com/chart.png".into(),
            },
        }]);

        let encoded = AnthropicEncoder::new(&PngFetcher)
            .encode_messages(&[message])
            .await
            .unwrap();

        assert_json_snapshot!(encoded.messages[0].content, @r#"
        [
          {
            "type": "image",
            "source": {
              "type": "base64",
              "media_type": "image/png",
              "data": "cG5n"
            }
          }
        ]
        "#);
    }

    #[tokio::test]
    async fn failed_image_fetch_keeps_the_rest_of_the_turn() {
        let message = UnifiedMessage::user_with_parts(vec![
            UnifiedContentPart::text("Describe this"),
            UnifiedContentPart::Image {
                source: crate::messages::unified::UnifiedImageSource::Url {
                    url: "https://example.com/missing.png".into(),
                },
            },
        ]);

        let encoded = AnthropicEncoder::new(&DisabledImageFetcher)
            .encode_messages(&[message])
            .await
            .unwrap();

        assert_eq!(
            encoded.messages[0].content,
            vec![AnthropicContentBlock::Text {
                text: "Describe this".into()
            }]
        );
    }
}
