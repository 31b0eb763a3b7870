use serde::{Deserialize, Serialize};

/// Frames emitted while a chat-completion response streams in.
///
/// Consumers see partial output as it arrives; the client aggregates the
/// same frames into the final assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// A chunk of assistant text.
    ContentDelta { text: String },

    /// A chunk of chain-of-thought text from a reasoning model.
    ReasoningDelta { text: String },

    /// A new tool call opened.
    ToolCallStart { id: String, name: String },

    /// An incremental fragment of a tool call's JSON arguments.
    ToolCallDelta { id: String, arguments_delta: String },

    /// The stream finished normally.
    Done,
}
