use thiserror::Error;

pub type QuorumResult<T> = Result<T, QuorumError>;

#[derive(Error, Debug)]
pub enum QuorumError {
    #[error("Evaluator error: {0}")]
    Evaluator(String),

    #[error("Profile inheritance cycle: {0}")]
    ProfileCycle(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Tool schema violation: {0}")]
    ToolSchema(String),

    #[error("Tool handler error: {0}")]
    ToolHandler(String),

    #[error("LLM call timed out after {0} ms")]
    LlmTimeout(u64),

    #[error("LLM transport error: {0}")]
    LlmTransport(String),

    #[error("LLM returned an empty response (no content, no tool calls, no reasoning)")]
    EmptyResponse,

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
