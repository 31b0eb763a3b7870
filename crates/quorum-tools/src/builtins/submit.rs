use crate::tool::{Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use quorum_core::{FlowOutcome, QuorumResult, ToolCall, ToolResult};
use serde_json::json;

/// The Associate's submission tool: stores the findings in the flow's
/// outcome slot (later calls replace earlier ones) and ends the flow with
/// success.
pub struct GenerateMessageSummaryTool {
    descriptor: ToolDescriptor,
}

impl GenerateMessageSummaryTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "generate_message_summary".to_string(),
                description: "Submit your findings for the assigned work module and finish. \
                    The summary must be self-contained; it is what the Principal reviews."
                    .to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": {
                        "current_associate_findings": { "type": "string" }
                    },
                    "required": ["current_associate_findings"]
                }),
                toolset: "submission".to_string(),
                ends_turn: true,
            },
        }
    }
}

impl Default for GenerateMessageSummaryTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GenerateMessageSummaryTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> QuorumResult<ToolResult> {
        let findings = call.arguments["current_associate_findings"]
            .as_str()
            .unwrap_or_default();
        ctx.store_findings(findings);
        ctx.signal_flow_end(FlowOutcome::Success);
        Ok(ToolResult::ok(
            &call.id,
            json!({ "status": "submitted", "length": findings.len() }),
        ))
    }
}

/// Ends the Principal's flow with terminal success.
pub struct FinishFlowTool {
    descriptor: ToolDescriptor,
}

impl FinishFlowTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "finish_flow".to_string(),
                description: "Conclude this flow. Call only when the task is fully handled."
                    .to_string(),
                parameters_schema: json!({ "type": "object", "properties": {} }),
                toolset: "control".to_string(),
                ends_turn: true,
            },
        }
    }
}

impl Default for FinishFlowTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FinishFlowTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> QuorumResult<ToolResult> {
        ctx.signal_flow_end(FlowOutcome::Success);
        Ok(ToolResult::ok(&call.id, json!({ "status": "finished" })))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tool::{FindingsSlot, FlowSignalSlot};
    use quorum_core::{EventBus, TeamState};
    use std::sync::{Arc, Mutex};

    fn ctx() -> ToolContext {
        ToolContext {
            run_id: "run_1".into(),
            agent_id: "associate".into(),
            team: Arc::new(tokio::sync::Mutex::new(TeamState::default())),
            events: EventBus::new("run_1"),
            spawner: None,
            findings: FindingsSlot::default(),
            flow_signal: FlowSignalSlot::default(),
            contributed_context: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_submit_stores_findings_and_ends_flow() {
        let tool = GenerateMessageSummaryTool::new();
        let ctx = ctx();
        let result = tool
            .execute(
                call(
                    "generate_message_summary",
                    json!({"current_associate_findings": "topic T is well studied"}),
                ),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(
            ctx.findings.lock().unwrap().as_deref(),
            Some("topic T is well studied")
        );
        assert_eq!(*ctx.flow_signal.lock().unwrap(), Some(FlowOutcome::Success));
    }

    #[tokio::test]
    async fn test_second_submission_replaces_first() {
        let tool = GenerateMessageSummaryTool::new();
        let ctx = ctx();
        for text in ["first", "second"] {
            tool.execute(
                call(
                    "generate_message_summary",
                    json!({"current_associate_findings": text}),
                ),
                &ctx,
            )
            .await
            .unwrap();
        }
        assert_eq!(ctx.findings.lock().unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_finish_flow_signals_success() {
        let tool = FinishFlowTool::new();
        let ctx = ctx();
        let result = tool
            .execute(call("finish_flow", json!({})), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(*ctx.flow_signal.lock().unwrap(), Some(FlowOutcome::Success));
    }
}
