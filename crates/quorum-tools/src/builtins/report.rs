use crate::tool::{Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use quorum_core::{QuorumResult, ToolCall, ToolResult};
use serde_json::json;
use tracing::info;

/// Stores the Principal's final synthesis into
/// `team.shared_context.final_report`, where the run supervisor picks it up
/// as the run's result artifact.
pub struct GenerateMarkdownReportTool {
    descriptor: ToolDescriptor,
}

impl GenerateMarkdownReportTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "generate_markdown_report".to_string(),
                description: "Write the final markdown report synthesizing all completed \
                    work modules. Call once the plan is fully reviewed, before finish_flow."
                    .to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": {
                        "principal_final_synthesis": { "type": "string" }
                    },
                    "required": ["principal_final_synthesis"]
                }),
                toolset: "reporting".to_string(),
                ends_turn: false,
            },
        }
    }
}

impl Default for GenerateMarkdownReportTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GenerateMarkdownReportTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> QuorumResult<ToolResult> {
        let report = call.arguments["principal_final_synthesis"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let mut team = ctx.team.lock().await;
        team.shared_context
            .insert("final_report".to_string(), json!(report));
        drop(team);

        info!(agent_id = %ctx.agent_id, report_chars = report.len(), "Final report stored");
        Ok(ToolResult::ok(
            &call.id,
            json!({ "status": "report_stored", "length": report.len() }),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tool::{FindingsSlot, FlowSignalSlot};
    use quorum_core::{EventBus, TeamState};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_report_lands_in_shared_context() {
        let tool = GenerateMarkdownReportTool::new();
        let ctx = ToolContext {
            run_id: "run_1".into(),
            agent_id: "principal".into(),
            team: Arc::new(tokio::sync::Mutex::new(TeamState::default())),
            events: EventBus::new("run_1"),
            spawner: None,
            findings: FindingsSlot::default(),
            flow_signal: FlowSignalSlot::default(),
            contributed_context: Arc::new(Mutex::new(Vec::new())),
        };
        let result = tool
            .execute(
                ToolCall {
                    id: "c1".into(),
                    name: "generate_markdown_report".into(),
                    arguments: json!({"principal_final_synthesis": "# Findings\nAll good."}),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        let team = ctx.team.lock().await;
        assert_eq!(
            team.shared_context["final_report"],
            json!("# Findings\nAll good.")
        );
    }
}
