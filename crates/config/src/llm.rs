//! LLM configuration structures for AI model providers.

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

/// LLM configuration: the providers a conversation may be routed to.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Map of LLM provider configurations, keyed by the provider name used
    /// in `provider/model` identifiers.
    pub providers: IndexMap<String, LlmProviderConfig>,
}

impl LlmConfig {
    /// Whether there are any LLM providers configured.
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Look up a provider by its configured name.
    pub fn provider(&self, name: &str) -> Option<&LlmProviderConfig> {
        self.providers.get(name)
    }

    /// The first configured provider of the given type, with its name.
    pub fn first_of_type(&self, provider_type: ProviderType) -> Option<(&str, &LlmProviderConfig)> {
        self.providers
            .iter()
            .find(|(_, provider)| provider.provider_type() == provider_type)
            .map(|(name, provider)| (name.as_str(), provider))
    }
}

/// Provider type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// OpenAI provider.
    Openai,
    /// Anthropic provider.
    Anthropic,
    /// Google provider.
    Google,
}

/// Configuration shared by every API-based provider.
#[derive(Debug, Clone)]
pub struct ApiProviderConfig {
    /// API key for authentication.
    pub api_key: Option<SecretString>,

    /// Custom base URL for the provider API.
    pub base_url: Option<String>,

    /// Output token budget sent when the caller does not set one.
    pub max_tokens: Option<u32>,
}

impl<'de> Deserialize<'de> for ApiProviderConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "snake_case", deny_unknown_fields)]
        struct ApiProviderConfigSerde {
            #[serde(default)]
            api_key: Option<SecretString>,
            #[serde(default)]
            base_url: Option<String>,
            #[serde(default)]
            max_tokens: Option<u32>,
        }

        let raw = ApiProviderConfigSerde::deserialize(deserializer)?;

        Ok(Self {
            api_key: raw.api_key,
            base_url: raw.base_url,
            max_tokens: raw.max_tokens,
        })
    }
}

/// Complete LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum LlmProviderConfig {
    /// OpenAI provider configuration.
    Openai(ApiProviderConfig),

    /// Anthropic provider configuration.
    Anthropic(ApiProviderConfig),

    /// Google provider configuration.
    Google(ApiProviderConfig),
}

impl LlmProviderConfig {
    /// Get the provider type for this configuration.
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::Openai(_) => ProviderType::Openai,
            Self::Anthropic(_) => ProviderType::Anthropic,
            Self::Google(_) => ProviderType::Google,
        }
    }

    fn api(&self) -> &ApiProviderConfig {
        match self {
            Self::Openai(config) | Self::Anthropic(config) | Self::Google(config) => config,
        }
    }

    /// Get the API key.
    pub fn api_key(&self) -> Option<&SecretString> {
        self.api().api_key.as_ref()
    }

    /// Get the base URL override, if any.
    pub fn base_url(&self) -> Option<&str> {
        self.api().base_url.as_deref()
    }

    /// Get the default output token budget, if any.
    pub fn max_tokens(&self) -> Option<u32> {
        self.api().max_tokens
    }
}
