//! A provider-neutral layer over the OpenAI, Anthropic and Google chat APIs.
//!
//! Conversations are kept in the unified model of [`messages::unified`]. Provider
//! modules encode it for a wire protocol and decode responses back, [`stream`] turns
//! streamed events into unified chunks, [`history`] repairs a conversation that moves
//! between provider families and [`agent`] runs a tool-calling loop on top.

pub mod agent;
mod error;
pub mod history;
pub mod messages;
pub mod provider;
pub mod stream;

pub use agent::{AgentLoop, AgentRequest, AgentTurnResult, ToolExecutor, Transport, UnifiedToolResult};
pub use error::{LlmError, LlmResult as Result};
pub use history::{
    CorruptionEvent, MAX_TOOL_ITEMS_PER_TURN, NormalizedHistory, normalize_history_for_model,
    normalize_history_with_report,
};
pub use provider::{ProviderFamily, ProviderRequest, ProviderTarget};
pub use stream::StreamDecoder;
