use crate::stream::StreamFrame;
use async_trait::async_trait;
use quorum_core::{Message, QuorumResult};
use serde_json::Value;
use tokio::sync::mpsc;

/// One chat-completion request: the assembled system prompt, the flow's
/// message history (synthetic inbox messages included), and the API-shaped
/// tool schemas visible to this agent.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<Value>,
}

/// Transport abstraction over a streaming chat-completion endpoint.
///
/// A backend opens the request and feeds frames into a bounded channel;
/// a transport failure mid-stream arrives as an `Err` frame. Aggregation,
/// timeout, retry, and cancellation are the client's job, which keeps
/// backends mockable in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn open_stream(
        &self,
        request: &ChatRequest,
    ) -> QuorumResult<mpsc::Receiver<QuorumResult<StreamFrame>>>;
}
