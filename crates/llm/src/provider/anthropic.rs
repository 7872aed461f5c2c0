mod input;
pub(crate) mod output;

use serde::Serialize;

pub use self::input::{AnthropicContentBlock, AnthropicEncoder, AnthropicMessage, AnthropicRole, AnthropicTool};
pub use self::output::decode_response;

use crate::{
    messages::unified::{UnifiedMessage, UnifiedToolDefinition},
    provider::{Encoder, ImageFetcher, ProviderTarget, to_json},
};

pub(crate) const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
pub(crate) const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic rejects requests without an output budget.
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    stream: bool,
}

pub(crate) async fn build_request(
    target: &ProviderTarget,
    messages: &[UnifiedMessage],
    tools: &[UnifiedToolDefinition],
    images: &dyn ImageFetcher,
    stream: bool,
) -> crate::Result<serde_json::Value> {
    let encoder = AnthropicEncoder::new(images);
    let encoded = encoder.encode_messages(messages).await?;

    to_json(&AnthropicRequest {
        model: target.model.clone(),
        max_tokens: target.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: encoded.system,
        messages: encoded.messages,
        tools: encoder.encode_tools(tools),
        stream,
    })
}
