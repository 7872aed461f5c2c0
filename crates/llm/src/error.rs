use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Errors surfaced to the caller of the normalization layer and the agent loop.
///
/// Recoverable decode problems (malformed tool arguments, unknown finish reasons,
/// missing usage) never show up here; they are logged and replaced with a safe default.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The model identifier maps to none of the supported provider families.
    #[error("Unknown provider family for model '{0}'")]
    UnknownProviderFamily(String),

    /// Provider not found in configuration.
    #[error("Provider '{0}' not found")]
    ProviderNotFound(String),

    /// The selected provider has no API key configured.
    #[error("Missing credentials for provider '{0}'")]
    MissingCredentials(String),

    /// Two tool definitions share the same name.
    #[error("Tool '{0}' is defined more than once")]
    DuplicateTool(String),

    /// A message breaks one of the unified message invariants.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The transport collaborator failed to deliver a request or a stream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider returned a payload that is not valid for its protocol.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}
