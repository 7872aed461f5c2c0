mod input;
pub(crate) mod output;

use serde::Serialize;

pub use self::input::{GoogleEncoder, GoogleFunctionDeclaration, GoogleTool};
pub use self::output::{GoogleContent, GooglePart, GoogleRole, decode_response};

use crate::{
    messages::unified::{UnifiedMessage, UnifiedToolDefinition},
    provider::{Encoder, ImageFetcher, ProviderTarget, to_json},
};

pub(crate) const DEFAULT_GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleGenerateRequest {
    contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GoogleContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GoogleTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

/// Streaming is selected by the endpoint, not by the body.
pub(crate) async fn build_request(
    target: &ProviderTarget,
    messages: &[UnifiedMessage],
    tools: &[UnifiedToolDefinition],
    images: &dyn ImageFetcher,
) -> crate::Result<serde_json::Value> {
    let encoder = GoogleEncoder::new(images);
    let encoded = encoder.encode_messages(messages).await?;

    let system_instruction = encoded.system.map(|text| GoogleContent {
        role: None,
        parts: vec![GooglePart::text(text)],
    });

    to_json(&GoogleGenerateRequest {
        contents: encoded.messages,
        system_instruction,
        tools: encoder.encode_tools(tools),
        generation_config: target
            .max_tokens
            .map(|max_output_tokens| GenerationConfig { max_output_tokens }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{DisabledImageFetcher, ProviderFamily};
    use insta::assert_json_snapshot;

    #[tokio::test]
    async fn streaming_request() {
        let target = ProviderTarget::new(ProviderFamily::Google, "gemini-2.5-flash", "goog-key").with_max_tokens(256);

        let request = ProviderFamily::Google
            .encode_request(
                &target,
                &[UnifiedMessage::system("Be brief."), UnifiedMessage::user("hi")],
                &[],
                &DisabledImageFetcher,
                true,
            )
            .await
            .unwrap();

        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );

        assert_json_snapshot!(request.body, @r#"
        {
          "contents": [
            {
              "parts": [
                {
                  "text": "hi"
                }
              ],
              "role": "user"
            }
          ],
          "generationConfig": {
            "maxOutputTokens": 256
          },
          "systemInstruction": {
            "parts": [
              {
                "text": "Be brief."
              }
            ]
          }
        }
        "#);

        assert!(request.headers().contains(&("x-goog-api-key", "goog-key".to_string())));
    }
}
