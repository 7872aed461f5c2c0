//! Agent loop and image fetching configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Agent loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Upper bound of provider turns in a single loop invocation.
    pub max_turns: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_turns: 25 }
    }
}

/// Configuration for fetching remote images that must be inlined for a provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageFetchConfig {
    /// Request timeout for a single image.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// Largest accepted image body in bytes.
    pub max_bytes: usize,
}

impl Default for ImageFetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_bytes: 20 * 1024 * 1024,
        }
    }
}
