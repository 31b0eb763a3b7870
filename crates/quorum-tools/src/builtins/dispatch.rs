use crate::tool::{AssignmentSpec, Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use quorum_core::{QuorumResult, ToolCall, ToolResult};
use serde_json::json;

/// Thin adapter over the engine's dispatch subsystem: parses assignments,
/// hands them to the injected [`crate::tool::AssociateSpawner`], and maps
/// a rejected batch to an error result. Ends the Principal's turn so the
/// decider reopens a fresh turn to review the outcomes.
pub struct DispatchSubmodulesTool {
    descriptor: ToolDescriptor,
}

impl DispatchSubmodulesTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "dispatch_submodules".to_string(),
                description: "Assign pending work modules to Associate agents and run them in \
                    parallel. Blocks until every assigned Associate finishes and returns a \
                    per-module outcome report."
                    .to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": {
                        "assignments": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "module_id_to_assign": { "type": "string" },
                                    "agent_profile_logical_name": { "type": "string" },
                                    "assigned_role_name": { "type": "string" },
                                    "assignment_specific_instructions": { "type": "string" },
                                    "inherit_deliverables_from": {
                                        "type": "array",
                                        "items": { "type": "string" }
                                    },
                                    "inherit_messages_from": {
                                        "type": "array",
                                        "items": { "type": "string" }
                                    }
                                },
                                "required": [
                                    "module_id_to_assign",
                                    "agent_profile_logical_name",
                                    "assigned_role_name",
                                    "assignment_specific_instructions"
                                ]
                            }
                        },
                        "shared_context_for_all_assignments": { "type": "object" }
                    },
                    "required": ["assignments"]
                }),
                toolset: "dispatch".to_string(),
                ends_turn: true,
            },
        }
    }
}

impl Default for DispatchSubmodulesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for DispatchSubmodulesTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> QuorumResult<ToolResult> {
        let Some(spawner) = &ctx.spawner else {
            return Ok(ToolResult::error(
                &call.id,
                "dispatch_submodules is not available to this agent",
            ));
        };

        let assignments: Vec<AssignmentSpec> =
            match serde_json::from_value(call.arguments["assignments"].clone()) {
                Ok(assignments) => assignments,
                Err(e) => {
                    return Ok(ToolResult::error(
                        &call.id,
                        format!("Unparseable assignments: {e}"),
                    ))
                }
            };
        if assignments.is_empty() {
            return Ok(ToolResult::error(&call.id, "assignments must not be empty"));
        }

        let shared_context = call
            .arguments
            .get("shared_context_for_all_assignments")
            .filter(|v| !v.is_null())
            .cloned();

        let report = spawner.dispatch(assignments, shared_context).await?;
        let rejected = report["status"] == json!("rejected");

        Ok(ToolResult {
            call_id: call.id,
            payload: report,
            is_error: rejected,
        })
    }
}
