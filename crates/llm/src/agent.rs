//! Multi-turn tool-calling loop on top of the normalization layer.
//!
//! Each turn encodes the running history for the target provider, streams the answer
//! through a fresh decoder and executes every tool call as soon as it is complete. The
//! loop goes on while the model asks for tools, up to the configured turn limit.

use async_trait::async_trait;
use config::AgentConfig;
use futures::{StreamExt, stream::BoxStream};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    history::normalize_history_for_model,
    messages::unified::{
        ToolRegistry, ToolResultOutput, UnifiedContentPart, UnifiedFinishReason, UnifiedMessage, UnifiedStreamChunk,
        UnifiedToolCall, UnifiedUsage,
    },
    provider::{ImageFetcher, ProviderRequest, ProviderTarget},
};

const DEFAULT_MAX_TURNS: u32 = 25;

/// Delivers a request to the provider and yields the raw SSE `data` payloads.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ProviderRequest) -> crate::Result<BoxStream<'static, crate::Result<String>>>;
}

/// Runs the tools the model calls.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Errors are reported back to the model as [`ToolResultOutput::Error`].
    async fn execute(&self, name: &str, arguments: &Value) -> anyhow::Result<ToolResultOutput>;
}

/// Input of one loop invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub target: ProviderTarget,
    pub messages: Vec<UnifiedMessage>,
    pub tools: ToolRegistry,
    /// Model that produced the history, if any. A different family triggers normalization.
    pub previous_model: Option<String>,
}

/// An executed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub output: ToolResultOutput,
}

/// Outcome of a whole loop invocation, accumulated over all provider turns.
#[derive(Debug, Clone)]
pub struct AgentTurnResult {
    pub text: String,
    pub tool_calls: Vec<UnifiedToolCall>,
    pub tool_results: Vec<UnifiedToolResult>,
    pub usage: UnifiedUsage,
    /// Finish reason of the last completed provider turn.
    pub finish_reason: UnifiedFinishReason,
    pub aborted: bool,
    /// Provider turns started, including an aborted one.
    pub turns: u32,
    /// The history with every completed turn appended.
    pub messages: Vec<UnifiedMessage>,
}

/// What one provider turn produced.
#[derive(Default)]
struct TurnOutput {
    text: String,
    calls: Vec<UnifiedToolCall>,
    results: Vec<UnifiedToolResult>,
    done: Option<(UnifiedFinishReason, bool, Option<UnifiedUsage>)>,
    aborted: bool,
}

pub struct AgentLoop<T, E, F> {
    transport: T,
    executor: E,
    images: F,
    max_turns: u32,
}

impl<T, E, F> AgentLoop<T, E, F>
where
    T: Transport,
    E: ToolExecutor,
    F: ImageFetcher,
{
    pub fn new(transport: T, executor: E, images: F) -> Self {
        Self {
            transport,
            executor,
            images,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_config(self, config: &AgentConfig) -> Self {
        self.with_max_turns(config.max_turns)
    }

    pub async fn run(&self, request: AgentRequest, cancel: &CancellationToken) -> crate::Result<AgentTurnResult> {
        self.run_with_observer(request, cancel, |_| ()).await
    }

    /// Runs the loop, handing every stream chunk to `observer` as it is decoded.
    pub async fn run_with_observer<O>(
        &self,
        request: AgentRequest,
        cancel: &CancellationToken,
        mut observer: O,
    ) -> crate::Result<AgentTurnResult>
    where
        O: FnMut(&UnifiedStreamChunk) + Send,
    {
        let AgentRequest {
            target,
            mut messages,
            tools,
            previous_model,
        } = request;

        if let Some(previous_model) = previous_model.as_deref() {
            messages = normalize_history_for_model(&messages, &target.qualified_model_id(), Some(previous_model))?;
        }

        let definitions = tools.definitions();

        let mut result = AgentTurnResult {
            text: String::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            usage: UnifiedUsage::default(),
            finish_reason: UnifiedFinishReason::Other,
            aborted: false,
            turns: 0,
            messages: Vec::new(),
        };

        loop {
            if result.turns >= self.max_turns {
                log::warn!(
                    "Agent loop reached the limit of {} turns for model '{}'",
                    self.max_turns,
                    target.model
                );
                break;
            }

            if cancel.is_cancelled() {
                result.aborted = true;
                break;
            }

            result.turns += 1;

            let request = target
                .family
                .encode_request(&target, &messages, &definitions, &self.images, true)
                .await?;

            log::debug!(
                "Agent turn {} with {} messages and {} tools",
                result.turns,
                messages.len(),
                tools.len()
            );

            let turn = self.stream_turn(request, &tools, cancel, &mut observer).await?;

            result.text.push_str(&turn.text);
            result.tool_calls.extend(turn.calls.iter().cloned());
            result.tool_results.extend(turn.results.iter().cloned());

            if turn.aborted {
                log::debug!("Agent turn {} aborted", result.turns);
                result.aborted = true;
                break;
            }

            let (finish_reason, has_tool_calls, usage) = turn
                .done
                .unwrap_or((UnifiedFinishReason::Other, !turn.calls.is_empty(), None));

            result.finish_reason = finish_reason;

            if let Some(usage) = usage {
                result.usage += usage;
            }

            append_turn(&mut messages, turn);

            if !has_tool_calls {
                break;
            }
        }

        result.messages = messages;

        Ok(result)
    }

    async fn stream_turn<O>(
        &self,
        request: ProviderRequest,
        tools: &ToolRegistry,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> crate::Result<TurnOutput>
    where
        O: FnMut(&UnifiedStreamChunk) + Send,
    {
        let mut turn = TurnOutput::default();
        let mut decoder = request.family.stream_decoder();

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                turn.aborted = true;
                return Ok(turn);
            }
            stream = self.transport.send(request) => stream?,
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    turn.aborted = true;
                    return Ok(turn);
                }
                event = stream.next() => event,
            };

            let (chunks, finished) = match event {
                Some(raw) => (decoder.decode(&raw?), false),
                None => (decoder.finish(), true),
            };

            for chunk in chunks {
                observer(&chunk);

                match chunk {
                    UnifiedStreamChunk::Text { delta } => turn.text.push_str(&delta),
                    UnifiedStreamChunk::ToolCallDelta { .. } => (),
                    UnifiedStreamChunk::ToolCall { id, name, arguments } => {
                        let call = UnifiedToolCall {
                            id,
                            name,
                            input: arguments,
                        };

                        let Some(output) = self.execute(&call, tools, cancel).await else {
                            turn.aborted = true;
                            return Ok(turn);
                        };

                        turn.results.push(UnifiedToolResult {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            output,
                        });

                        turn.calls.push(call);
                    }
                    UnifiedStreamChunk::Done {
                        finish_reason,
                        has_tool_calls,
                        usage,
                    } => turn.done = Some((finish_reason, has_tool_calls, usage)),
                }
            }

            if finished {
                return Ok(turn);
            }
        }
    }

    /// Executes one call. `None` means the loop was cancelled around the execution.
    async fn execute(
        &self,
        call: &UnifiedToolCall,
        tools: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> Option<ToolResultOutput> {
        if !tools.contains(&call.name) {
            log::warn!("Model called unknown tool '{}' ({})", call.name, call.id);
            return Some(ToolResultOutput::Error(format!("Unknown tool '{}'", call.name)));
        }

        if cancel.is_cancelled() {
            return None;
        }

        log::debug!("Executing tool '{}' ({})", call.name, call.id);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            output = self.executor.execute(&call.name, &call.input) => output,
        };

        if cancel.is_cancelled() {
            return None;
        }

        Some(output.unwrap_or_else(|e| {
            log::warn!("Tool '{}' ({}) failed: {e:#}", call.name, call.id);
            ToolResultOutput::Error(format!("{e:#}"))
        }))
    }
}

/// Appends the assistant message of a completed turn and one `tool` message per call.
fn append_turn(messages: &mut Vec<UnifiedMessage>, turn: TurnOutput) {
    let mut parts = Vec::with_capacity(turn.calls.len() + 1);

    if !turn.text.is_empty() {
        parts.push(UnifiedContentPart::Text { text: turn.text });
    }

    parts.extend(turn.calls.into_iter().map(|call| UnifiedContentPart::ToolCall {
        id: call.id,
        name: call.name,
        input: call.input,
    }));

    if !parts.is_empty() {
        messages.push(UnifiedMessage::assistant_with_parts(parts));
    }

    messages.extend(
        turn.results
            .into_iter()
            .map(|result| UnifiedMessage::tool_result(result.tool_call_id, result.tool_name, result.output)),
    );
}
