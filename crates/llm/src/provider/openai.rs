mod input;
pub(crate) mod output;

use serde::Serialize;

pub use self::input::{
    OpenAiContent, OpenAiContentPart, OpenAiEncoder, OpenAiFunction, OpenAiMessage, OpenAiRole, OpenAiTool,
    OpenAiToolCall,
};
pub use self::output::decode_response;

use crate::{
    messages::unified::{UnifiedMessage, UnifiedToolDefinition},
    provider::{Encoder, ProviderTarget, to_json},
};

pub(crate) const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

pub(crate) async fn build_request(
    target: &ProviderTarget,
    messages: &[UnifiedMessage],
    tools: &[UnifiedToolDefinition],
    stream: bool,
) -> crate::Result<serde_json::Value> {
    let encoder = OpenAiEncoder;
    let encoded = encoder.encode_messages(messages).await?;

    to_json(&OpenAiRequest {
        model: target.model.clone(),
        messages: encoded.messages,
        tools: encoder.encode_tools(tools),
        max_tokens: target.max_tokens,
        stream,
        stream_options: stream.then_some(StreamOptions { include_usage: true }),
    })
}
