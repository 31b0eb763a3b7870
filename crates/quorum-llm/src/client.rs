use crate::backend::{ChatBackend, ChatRequest};
use crate::config::LlmConfig;
use crate::openai::OpenAiBackend;
use crate::stream::StreamFrame;
use quorum_core::{QuorumError, QuorumResult, ToolCall};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The aggregated result of one streamed chat completion.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantTurn {
    /// True only when content, tool calls, and reasoning are all empty.
    /// A reasoning-only turn is NOT empty.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
            && self.tool_calls.is_empty()
            && self.reasoning_content.trim().is_empty()
    }
}

/// Accumulates stream frames into an [`AssistantTurn`].
#[derive(Default)]
struct Aggregator {
    content: String,
    reasoning: String,
    /// (id, name, argument fragments) in arrival order.
    calls: Vec<(String, String, String)>,
}

impl Aggregator {
    fn apply(&mut self, frame: &StreamFrame) {
        match frame {
            StreamFrame::ContentDelta { text } => self.content.push_str(text),
            StreamFrame::ReasoningDelta { text } => self.reasoning.push_str(text),
            StreamFrame::ToolCallStart { id, name } => {
                self.calls.push((id.clone(), name.clone(), String::new()));
            }
            StreamFrame::ToolCallDelta {
                id,
                arguments_delta,
            } => {
                if let Some(call) = self.calls.iter_mut().find(|(cid, _, _)| cid == id) {
                    call.2.push_str(arguments_delta);
                }
            }
            StreamFrame::Done => {}
        }
    }

    fn finish(self) -> AssistantTurn {
        let tool_calls = self
            .calls
            .into_iter()
            .map(|(id, name, args)| {
                // Argument fragments that fail to parse degrade to null so a
                // garbled stream cannot crash the turn; the tool's schema
                // validation reports it to the agent instead.
                let arguments = serde_json::from_str(&args).unwrap_or(serde_json::Value::Null);
                ToolCall {
                    id,
                    name,
                    arguments,
                }
            })
            .collect();
        AssistantTurn {
            content: self.content,
            reasoning_content: self.reasoning,
            tool_calls,
        }
    }
}

/// Streaming chat-completion client.
///
/// Owns the retry/backoff/timeout policy around a [`ChatBackend`] and
/// aggregates frames into the final assistant turn, forwarding each frame
/// to the caller's sink as it arrives.
pub struct LlmClient {
    backend: Box<dyn ChatBackend>,
    config: LlmConfig,
}

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 30_000;

fn compute_backoff(attempt: u32) -> u64 {
    BACKOFF_BASE_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(BACKOFF_MAX_MS)
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            backend: Box::new(OpenAiBackend::new(config.clone())),
            config,
        }
    }

    /// Create from a pre-built backend (for tests and custom providers).
    pub fn from_backend(backend: Box<dyn ChatBackend>, config: LlmConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Streams one completion, retrying transport failures with exponential
    /// backoff. On cancellation the partial aggregate is returned as-is; the
    /// caller decides how to wind the flow down.
    pub async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        on_frame: &mut (dyn FnMut(&StreamFrame) + Send),
    ) -> QuorumResult<AssistantTurn> {
        let mut last_error: Option<QuorumError> = None;

        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(QuorumError::Cancelled);
            }

            match self.try_once(request, cancel, on_frame).await {
                Ok(Attempt::Complete(turn)) => {
                    if turn.is_empty() {
                        return Err(QuorumError::EmptyResponse);
                    }
                    return Ok(turn);
                }
                Ok(Attempt::CancelledPartial(turn)) => return Ok(turn),
                Err(e @ (QuorumError::LlmTransport(_) | QuorumError::LlmTimeout(_))) => {
                    if attempt < self.config.max_retries {
                        let delay = compute_backoff(attempt);
                        info!(
                            attempt,
                            delay_ms = delay,
                            error = %e,
                            "Retryable LLM error, backing off"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(QuorumError::Cancelled),
                            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        }
                    }
                    last_error = Some(e);
                }
                Err(other) => return Err(other),
            }
        }

        let error = last_error
            .unwrap_or_else(|| QuorumError::LlmTransport("retries exhausted".into()));
        warn!(max_retries = self.config.max_retries, error = %error, "LLM retries exhausted");
        Err(error)
    }

    async fn try_once(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        on_frame: &mut (dyn FnMut(&StreamFrame) + Send),
    ) -> QuorumResult<Attempt> {
        let call_timeout = Duration::from_millis(self.config.timeout_ms);
        let deadline = tokio::time::Instant::now() + call_timeout;

        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Ok(Attempt::CancelledPartial(AssistantTurn::default())),
            opened = tokio::time::timeout(call_timeout, self.backend.open_stream(request)) => {
                opened.map_err(|_| QuorumError::LlmTimeout(self.config.timeout_ms))??
            }
        };

        let mut aggregator = Aggregator::default();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Dropping the receiver aborts the transport task.
                    return Ok(Attempt::CancelledPartial(aggregator.finish()));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(QuorumError::LlmTimeout(self.config.timeout_ms));
                }
                frame = rx.recv() => match frame {
                    Some(Ok(frame)) => {
                        on_frame(&frame);
                        let done = matches!(frame, StreamFrame::Done);
                        aggregator.apply(&frame);
                        if done {
                            return Ok(Attempt::Complete(aggregator.finish()));
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(Attempt::Complete(aggregator.finish())),
                }
            }
        }
    }
}

enum Attempt {
    Complete(AssistantTurn),
    CancelledPartial(AssistantTurn),
}
