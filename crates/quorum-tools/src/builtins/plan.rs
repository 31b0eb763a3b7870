use crate::tool::{Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use quorum_core::{ModuleStatus, QuorumResult, RunEvent, ToolCall, ToolResult};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Atomic work-module plan management for the Principal. The whole call
/// holds the team-state lock once; per-action failures (unknown ids,
/// illegal transitions) are reported in the result payload while the rest
/// of the batch still applies.
pub struct ManageWorkModulesTool {
    descriptor: ToolDescriptor,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ModuleAction {
    Add {
        name: String,
        description: String,
    },
    Update {
        module_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        status: Option<ModuleStatus>,
    },
    Delete {
        module_id: String,
    },
}

impl ManageWorkModulesTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: "manage_work_modules".to_string(),
                description: "Create, update, or retire work modules in the shared plan. \
                    Deleting a module soft-deletes it (status becomes 'deprecated') so \
                    historical references stay valid."
                    .to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": {
                        "actions": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "action": {
                                        "type": "string",
                                        "enum": ["add", "update", "delete"]
                                    },
                                    "name": { "type": "string" },
                                    "description": { "type": "string" },
                                    "module_id": { "type": "string" },
                                    "status": {
                                        "type": "string",
                                        "enum": ["pending", "in_progress", "pending_review", "completed", "deprecated"]
                                    }
                                },
                                "required": ["action"]
                            }
                        }
                    },
                    "required": ["actions"]
                }),
                toolset: "planning".to_string(),
                ends_turn: false,
            },
        }
    }
}

impl Default for ManageWorkModulesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ManageWorkModulesTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> QuorumResult<ToolResult> {
        let actions: Vec<ModuleAction> =
            match serde_json::from_value(call.arguments["actions"].clone()) {
                Ok(actions) => actions,
                Err(e) => {
                    return Ok(ToolResult::error(
                        &call.id,
                        format!("Unparseable actions: {e}"),
                    ))
                }
            };

        let mut results = Vec::with_capacity(actions.len());
        let mut team = ctx.team.lock().await;

        for action in actions {
            let outcome = match action {
                ModuleAction::Add { name, description } => {
                    let id = team.add_module(name.as_str(), description.as_str());
                    info!(module_id = %id, name = %name, "Work module added");
                    json!({ "ok": true, "action": "add", "module_id": id, "name": name })
                }
                ModuleAction::Update {
                    module_id,
                    name,
                    description,
                    status,
                } => match team.module_mut(&module_id) {
                    None => json!({
                        "ok": false,
                        "action": "update",
                        "module_id": module_id,
                        "error": "module not found"
                    }),
                    Some(module) => {
                        // Completed modules are frozen except for retirement.
                        if module.status == ModuleStatus::Completed
                            && status != Some(ModuleStatus::Deprecated)
                        {
                            json!({
                                "ok": false,
                                "action": "update",
                                "module_id": module_id,
                                "error": "completed module can only be deprecated"
                            })
                        } else {
                            if let Some(name) = name {
                                module.name = name;
                            }
                            if let Some(description) = description {
                                module.description = description;
                            }
                            if let Some(status) = status {
                                module.status = status;
                            }
                            json!({ "ok": true, "action": "update", "module_id": module_id })
                        }
                    }
                },
                ModuleAction::Delete { module_id } => match team.module_mut(&module_id) {
                    None => json!({
                        "ok": false,
                        "action": "delete",
                        "module_id": module_id,
                        "error": "module not found"
                    }),
                    Some(module) => {
                        module.status = ModuleStatus::Deprecated;
                        json!({ "ok": true, "action": "delete", "module_id": module_id })
                    }
                },
            };
            results.push(outcome);
        }

        let modules_snapshot = serde_json::to_value(&team.work_modules).unwrap_or_default();
        drop(team);

        ctx.events.publish(RunEvent::WorkModulesUpdate {
            modules: modules_snapshot,
        });

        Ok(ToolResult::ok(&call.id, json!({ "results": results })))
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
            agent_id: "principal".into(),
            team: Arc::new(tokio::sync::Mutex::new(TeamState::default())),
            events: EventBus::new("run_1"),
            spawner: None,
            findings: FindingsSlot::default(),
            flow_signal: FlowSignalSlot::default(),
            contributed_context: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "manage_work_modules".into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_add_creates_pending_module() {
        let tool = ManageWorkModulesTool::new();
        let ctx = ctx();
        let result = tool
            .execute(
                call(json!({"actions": [{"action": "add", "name": "Research T", "description": "d"}]})),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        let id = result.payload["results"][0]["module_id"].as_str().unwrap().to_string();

        let team = ctx.team.lock().await;
        let module = team.module(&id).unwrap();
        assert_eq!(module.name, "Research T");
        assert_eq!(module.status, ModuleStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_per_action_error_others_apply() {
        let tool = ManageWorkModulesTool::new();
        let ctx = ctx();
        let result = tool
            .execute(
                call(json!({"actions": [
                    {"action": "update", "module_id": "wm_ghost", "name": "x"},
                    {"action": "add", "name": "real", "description": ""}
                ]})),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        let results = result.payload["results"].as_array().unwrap();
        assert_eq!(results[0]["ok"], false);
        assert_eq!(results[1]["ok"], true);
        assert_eq!(ctx.team.lock().await.work_modules.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let tool = ManageWorkModulesTool::new();
        let ctx = ctx();
        let id = ctx.team.lock().await.add_module("m", "");
        let result = tool
            .execute(
                call(json!({"actions": [{"action": "delete", "module_id": id}]})),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        let team = ctx.team.lock().await;
        assert_eq!(team.module(&id).unwrap().status, ModuleStatus::Deprecated);
    }

    #[tokio::test]
    async fn test_completed_module_is_frozen() {
        let tool = ManageWorkModulesTool::new();
        let ctx = ctx();
        let id = ctx.team.lock().await.add_module("m", "");
        ctx.team.lock().await.module_mut(&id).unwrap().status = ModuleStatus::Completed;

        let result = tool
            .execute(
                call(json!({"actions": [{"action": "update", "module_id": id, "status": "pending"}]})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result.payload["results"][0]["ok"], false);

        let result = tool
            .execute(
                call(json!({"actions": [{"action": "update", "module_id": id, "status": "deprecated"}]})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result.payload["results"][0]["ok"], true);
    }

    #[tokio::test]
    async fn test_publishes_work_modules_update() {
        let tool = ManageWorkModulesTool::new();
        let ctx = ctx();
        let mut rx = ctx.events.subscribe(8);
        tool.execute(
            call(json!({"actions": [{"action": "add", "name": "m", "description": ""}]})),
            &ctx,
        )
        .await
        .unwrap();
        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.event, RunEvent::WorkModulesUpdate { .. }));
    }
}
