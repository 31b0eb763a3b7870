use serde::{Deserialize, Serialize};

/// A request from the LLM to invoke a specific tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the LLM for this call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

/// The result returned after executing a [`ToolCall`].
///
/// Tool failures are data, not errors: schema violations and handler
/// failures come back as `is_error = true` so the agent can see them and
/// retry. Only the flow itself decides whether a turn ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result corresponds to.
    pub call_id: String,
    /// Structured output produced by the tool.
    pub payload: serde_json::Value,
    /// Whether the tool execution ended in an error.
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn ok(call_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            payload,
            is_error: false,
        }
    }

    /// Creates an error tool result with a message payload.
    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            payload: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }

    /// The error message, if this is an error result.
    pub fn error_message(&self) -> Option<&str> {
        self.is_error
            .then(|| self.payload.get("error").and_then(|v| v.as_str()))
            .flatten()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_ok() {
        let result = ToolResult::ok("call_1", serde_json::json!({"n": 3}));
        assert!(!result.is_error);
        assert_eq!(result.payload["n"], 3);
        assert!(result.error_message().is_none());
    }

    #[test]
    fn test_tool_result_error() {
        let result = ToolResult::error("call_1", "boom");
        assert!(result.is_error);
        assert_eq!(result.error_message(), Some("boom"));
    }
}
