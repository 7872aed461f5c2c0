//! Configuration for the LLM normalization layer and agent loop.

mod agent;
mod error;
mod llm;
mod loader;

use std::path::Path;

use serde::Deserialize;

pub use agent::{AgentConfig, ImageFetchConfig};
pub use error::Error;
pub use llm::{ApiProviderConfig, LlmConfig, LlmProviderConfig, ProviderType};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub image_fetch: ImageFetchConfig,
}

impl Config {
    /// Reads a TOML file, expands `{{ env.NAME }}` placeholders and validates the result.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
        loader::load(path)
    }

    /// Same as [`Config::load`], from an in-memory TOML document.
    pub fn parse(content: &str) -> crate::Result<Config> {
        loader::parse(content)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config = Config::parse("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            llm: LlmConfig {
                providers: {},
            },
            agent: AgentConfig {
                max_turns: 25,
            },
            image_fetch: ImageFetchConfig {
                timeout: 10s,
                max_bytes: 20971520,
            },
        }
        "#);
    }

    #[test]
    fn all_values() {
        let config = indoc! {r#"
            [llm.providers.openai]
            type = "openai"
            api_key = "sk-openai"
            base_url = "https://api.openai.com/v1"

            [agent]
            max_turns = 8

            [image_fetch]
            timeout = "5s"
            max_bytes = 1024
        "#};

        let config = Config::parse(config).unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            llm: LlmConfig {
                providers: {
                    "openai": Openai(
                        ApiProviderConfig {
                            api_key: Some(
                                SecretBox<str>([REDACTED]),
                            ),
                            base_url: Some(
                                "https://api.openai.com/v1",
                            ),
                            max_tokens: None,
                        },
                    ),
                },
            },
            agent: AgentConfig {
                max_turns: 8,
            },
            image_fetch: ImageFetchConfig {
                timeout: 5s,
                max_bytes: 1024,
            },
        }
        "#);
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let error = Config::parse("[server]\nlisten_address = \"127.0.0.1:8000\"").unwrap_err();

        assert!(error.to_string().contains("unknown field `server`"));
    }
}
