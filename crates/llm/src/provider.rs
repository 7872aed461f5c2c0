//! Provider families and the seams between the unified model and their wire protocols.
//!
//! Each family lives in its own module with an `input` side (unified → wire) and an
//! `output` side (wire → unified).

pub mod anthropic;
pub mod google;
mod image;
pub mod openai;
mod schema;

use std::fmt;

use async_trait::async_trait;
use config::{LlmProviderConfig, ProviderType};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;

pub use self::image::{DisabledImageFetcher, FetchedImage, HttpImageFetcher, ImageFetcher};

use crate::{
    error::LlmError,
    messages::unified::{UnifiedMessage, UnifiedResponse, UnifiedToolDefinition},
    stream::StreamDecoder,
};

/// A provider wire-protocol dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }

    /// Infers the family from a model identifier.
    ///
    /// `openai/…`, `anthropic/…` and `google/…` prefixes win. Otherwise the model
    /// name (after any other `provider/` prefix) is matched against well-known
    /// naming schemes.
    pub fn from_model_id(model_id: &str) -> crate::Result<Self> {
        let unknown = || LlmError::UnknownProviderFamily(model_id.to_string());

        let model = match model_id.split_once('/') {
            Some((prefix, model)) => {
                if let Some(family) = Self::from_prefix(prefix) {
                    return Ok(family);
                }

                model
            }
            None => model_id,
        };

        let model = model.rsplit('/').next().ok_or_else(unknown)?.to_ascii_lowercase();

        let openai = ["gpt-", "gpt4", "o1", "o3", "o4", "chatgpt"];

        if openai.iter().any(|prefix| model.starts_with(prefix)) {
            Ok(Self::OpenAi)
        } else if model.starts_with("claude") {
            Ok(Self::Anthropic)
        } else if model.starts_with("gemini") || model.starts_with("gemma") {
            Ok(Self::Google)
        } else {
            Err(unknown())
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "google" | "gemini" => Some(Self::Google),
            _ => None,
        }
    }

    pub fn provider_type(self) -> ProviderType {
        match self {
            Self::OpenAi => ProviderType::Openai,
            Self::Anthropic => ProviderType::Anthropic,
            Self::Google => ProviderType::Google,
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => openai::DEFAULT_OPENAI_API_URL,
            Self::Anthropic => anthropic::DEFAULT_ANTHROPIC_API_URL,
            Self::Google => google::DEFAULT_GOOGLE_API_URL,
        }
    }

    /// Encodes a complete request for this family: model, messages, system prompt,
    /// tools and output token budget.
    pub async fn encode_request(
        self,
        target: &ProviderTarget,
        messages: &[UnifiedMessage],
        tools: &[UnifiedToolDefinition],
        images: &dyn ImageFetcher,
        stream: bool,
    ) -> crate::Result<ProviderRequest> {
        let body = match self {
            Self::OpenAi => openai::build_request(target, messages, tools, stream).await?,
            Self::Anthropic => anthropic::build_request(target, messages, tools, images, stream).await?,
            Self::Google => google::build_request(target, messages, tools, images).await?,
        };

        log::debug!(
            "Encoded {} request for model '{}' with {} messages and {} tools",
            self.as_str(),
            target.model,
            messages.len(),
            tools.len()
        );

        Ok(ProviderRequest {
            family: self,
            url: self.endpoint(target, stream),
            model: target.model.clone(),
            api_key: target.api_key.clone(),
            body,
            stream,
        })
    }

    fn endpoint(self, target: &ProviderTarget, stream: bool) -> String {
        let base_url = target.base_url.trim_end_matches('/');

        match self {
            Self::OpenAi => format!("{base_url}/chat/completions"),
            Self::Anthropic => format!("{base_url}/messages"),
            Self::Google if stream => format!("{base_url}/models/{}:streamGenerateContent?alt=sse", target.model),
            Self::Google => format!("{base_url}/models/{}:generateContent", target.model),
        }
    }

    /// Decodes a complete, non-streaming response body.
    pub fn decode_response(self, raw: &str) -> crate::Result<UnifiedResponse> {
        match self {
            Self::OpenAi => openai::decode_response(raw),
            Self::Anthropic => anthropic::decode_response(raw),
            Self::Google => google::decode_response(raw),
        }
    }

    /// A fresh decoder for one streamed response.
    pub fn stream_decoder(self) -> Box<dyn StreamDecoder> {
        match self {
            Self::OpenAi => Box::new(crate::stream::OpenAiStreamTracker::new()),
            Self::Anthropic => Box::new(crate::stream::AnthropicStreamTracker::new()),
            Self::Google => Box::new(crate::stream::GoogleStreamDecoder::new()),
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ProviderType> for ProviderFamily {
    fn from(provider_type: ProviderType) -> Self {
        match provider_type {
            ProviderType::Openai => Self::OpenAi,
            ProviderType::Anthropic => Self::Anthropic,
            ProviderType::Google => Self::Google,
        }
    }
}

/// A concrete model at a concrete provider endpoint.
#[derive(Debug, Clone)]
pub struct ProviderTarget {
    pub family: ProviderFamily,

    /// Name of the configured provider this target came from.
    pub provider_name: String,

    /// Model name as the provider API expects it, without a provider prefix.
    pub model: String,

    pub base_url: String,

    pub api_key: SecretString,

    /// Output token budget. Anthropic requires one and falls back to 4096.
    pub max_tokens: Option<u32>,
}

impl ProviderTarget {
    pub fn new(family: ProviderFamily, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            family,
            provider_name: family.as_str().to_string(),
            model: model.into(),
            base_url: family.default_base_url().to_string(),
            api_key: SecretString::from(api_key.into()),
            max_tokens: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Resolves `provider/model` or a bare model name against the configuration.
    ///
    /// A prefix naming a configured provider selects it. A prefix naming a family, or
    /// a bare model recognized by [`ProviderFamily::from_model_id`], selects the first
    /// configured provider of that family.
    pub fn resolve(config: &config::Config, model_id: &str) -> crate::Result<Self> {
        let (provider_name, provider, model) = match model_id.split_once('/') {
            Some((name, model)) => match config.llm.provider(name) {
                Some(provider) => (name, provider, model),
                None => {
                    let family = ProviderFamily::from_prefix(name)
                        .ok_or_else(|| LlmError::ProviderNotFound(name.to_string()))?;

                    let (name, provider) = config
                        .llm
                        .first_of_type(family.provider_type())
                        .ok_or_else(|| LlmError::ProviderNotFound(name.to_string()))?;

                    (name, provider, model)
                }
            },
            None => {
                let family = ProviderFamily::from_model_id(model_id)?;

                let (name, provider) = config
                    .llm
                    .first_of_type(family.provider_type())
                    .ok_or_else(|| LlmError::ProviderNotFound(family.as_str().to_string()))?;

                (name, provider, model_id)
            }
        };

        Self::from_config(provider_name, provider, model)
    }

    fn from_config(provider_name: &str, provider: &LlmProviderConfig, model: &str) -> crate::Result<Self> {
        let family = ProviderFamily::from(provider.provider_type());

        let api_key = provider
            .api_key()
            .filter(|key| !key.expose_secret().is_empty())
            .cloned()
            .ok_or_else(|| LlmError::MissingCredentials(provider_name.to_string()))?;

        Ok(Self {
            family,
            provider_name: provider_name.to_string(),
            model: model.to_string(),
            base_url: provider.base_url().unwrap_or(family.default_base_url()).to_string(),
            api_key,
            max_tokens: provider.max_tokens(),
        })
    }

    /// `family/model`, a form [`ProviderFamily::from_model_id`] always recognizes.
    pub fn qualified_model_id(&self) -> String {
        format!("{}/{}", self.family.as_str(), self.model)
    }
}

/// A fully shaped request, ready for the transport.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub family: ProviderFamily,
    pub url: String,
    pub model: String,
    pub api_key: SecretString,
    pub body: Value,
    pub stream: bool,
}

impl ProviderRequest {
    /// Authentication and protocol headers the provider expects.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let key = self.api_key.expose_secret();

        let mut headers = vec![("content-type", "application/json".to_string())];

        match self.family {
            ProviderFamily::OpenAi => headers.push(("authorization", format!("Bearer {key}"))),
            ProviderFamily::Anthropic => {
                headers.push(("x-api-key", key.to_string()));
                headers.push(("anthropic-version", anthropic::ANTHROPIC_VERSION.to_string()));
            }
            ProviderFamily::Google => headers.push(("x-goog-api-key", key.to_string())),
        }

        headers
    }
}

/// Messages in a provider's shape, with the system prompt when the provider keeps it apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedMessages<M> {
    pub messages: Vec<M>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// Unified messages and tools to one provider's wire shape.
#[async_trait]
pub trait Encoder: Send + Sync {
    type Message: Serialize + Send;
    type Tool: Serialize + Send;

    /// Encodes a conversation. Async because images may have to be fetched.
    async fn encode_messages(&self, messages: &[UnifiedMessage]) -> crate::Result<EncodedMessages<Self::Message>>;

    fn encode_tools(&self, tools: &[UnifiedToolDefinition]) -> Vec<Self::Tool>;
}

/// Joins system prompts the way Anthropic and Google expect a single one.
pub(crate) fn join_system_prompts(prompts: Vec<String>) -> Option<String> {
    let prompts: Vec<String> = prompts.into_iter().filter(|prompt| !prompt.is_empty()).collect();

    if prompts.is_empty() {
        None
    } else {
        Some(prompts.join("\n\n"))
    }
}

/// Parses tool call arguments, treating blank input as an empty object.
///
/// Returns `None` for invalid JSON or a non-object value.
pub(crate) fn parse_tool_arguments(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return Some(Value::Object(Default::default()));
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) | Err(_) => None,
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> crate::Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        log::error!("Failed to serialize provider request: {e}");
        LlmError::InvalidMessage(e.to_string())
    })
}
