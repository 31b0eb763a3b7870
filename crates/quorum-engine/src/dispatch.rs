//! The dispatch subsystem: spawns child Associate flows for pending work
//! modules, runs them in parallel under a bounded semaphore, and folds
//! their deliverables back into team state.

use crate::flow::{FlowResult, FlowRunner, RunHandles};
use async_trait::async_trait;
use quorum_core::{
    Deliverable, FlowOutcome, InboxItem, Message, ModuleStatus, QuorumResult, RunEvent,
};
use quorum_profile::ProfileType;
use quorum_tools::{AssignmentSpec, AssociateSpawner};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Dispatcher {
    handles: RunHandles,
}

/// Everything needed to build one child flow, captured while the team
/// lock is held so validation and transition are atomic.
struct PreparedAssignment {
    spec: AssignmentSpec,
    agent_id: String,
    inherited_deliverables: Vec<Deliverable>,
    inherited_messages: Vec<Message>,
    module_name: String,
}

impl Dispatcher {
    pub fn new(handles: RunHandles) -> Self {
        Self { handles }
    }

    fn validation_failure(&self, spec: &AssignmentSpec, reason: &str) -> Value {
        json!({ "module_id": spec.module_id_to_assign, "reason": reason })
    }
}

#[async_trait]
impl AssociateSpawner for Dispatcher {
    async fn dispatch(
        &self,
        assignments: Vec<AssignmentSpec>,
        shared_context: Option<Value>,
    ) -> QuorumResult<Value> {
        let dispatch_id = format!("disp_{}", &Uuid::new_v4().simple().to_string()[..8]);

        // Validate everything, then transition everything, under one lock:
        // a partially applied batch must be impossible.
        let prepared: Vec<PreparedAssignment> = {
            let mut team = self.handles.team.lock().await;

            let mut failures: Vec<Value> = Vec::new();
            let mut claimed: Vec<String> = Vec::new();
            for spec in &assignments {
                let module_id = spec.module_id_to_assign.as_str();
                if claimed.iter().any(|c| c == module_id) {
                    failures.push(self.validation_failure(spec, "module assigned twice in one batch"));
                    continue;
                }
                claimed.push(module_id.to_string());

                match team.module(module_id) {
                    None => {
                        failures.push(self.validation_failure(spec, "module not found"));
                        continue;
                    }
                    Some(module) if !module.is_dispatchable() => {
                        failures.push(self.validation_failure(spec, "module not dispatchable"));
                        continue;
                    }
                    Some(_) => {}
                }

                let profile_name = spec.agent_profile_logical_name.as_str();
                let known = team
                    .profiles_list_instance_ids
                    .iter()
                    .any(|name| name == profile_name);
                let resolved = self.handles.profiles.resolve(profile_name);
                match resolved {
                    Ok(profile) if known && profile.profile_type == ProfileType::Associate => {}
                    _ => {
                        failures.push(self.validation_failure(spec, "unknown profile"));
                        continue;
                    }
                }

                if spec.assignment_specific_instructions.trim().is_empty() {
                    failures.push(self.validation_failure(spec, "missing assignment instructions"));
                }
            }

            if !failures.is_empty() {
                warn!(dispatch_id = %dispatch_id, failures = failures.len(), "Dispatch rejected");
                return Ok(json!({
                    "status": "rejected",
                    "message": "one or more assignments are invalid; no module changed status",
                    "dispatch_id": dispatch_id,
                    "failed_preparation_details": failures,
                }));
            }

            let ledger = self.handles.ledger.clone();
            assignments
                .into_iter()
                .map(|spec| {
                    let inherited_deliverables: Vec<Deliverable> = spec
                        .inherit_deliverables_from
                        .iter()
                        .filter_map(|id| team.module(id))
                        .flat_map(|module| module.deliverables.clone())
                        .collect();
                    let inherited_messages: Vec<Message> = spec
                        .inherit_messages_from
                        .iter()
                        .filter_map(|id| team.module(id).and_then(|m| m.messages_ref.clone()))
                        .filter_map(|flow_id| {
                            ledger.lock().ok().and_then(|records| {
                                records
                                    .iter()
                                    .rev()
                                    .find(|record| record.flow_id == flow_id)
                                    .map(|record| record.messages.clone())
                            })
                        })
                        .flatten()
                        .collect();

                    let agent_id = format!(
                        "{}@{}_{}",
                        spec.agent_profile_logical_name,
                        spec.module_id_to_assign,
                        &Uuid::new_v4().simple().to_string()[..4]
                    );

                    let module = team
                        .module_mut(&spec.module_id_to_assign)
                        .expect("validated above");
                    module.status = ModuleStatus::InProgress;
                    module.assigned_profile_name = Some(spec.agent_profile_logical_name.clone());
                    module.assigned_role_name = Some(spec.assigned_role_name.clone());
                    module.messages_ref = Some(agent_id.clone());
                    let module_name = module.name.clone();

                    PreparedAssignment {
                        spec,
                        agent_id,
                        inherited_deliverables,
                        inherited_messages,
                        module_name,
                    }
                })
                .collect()
        };

        let module_ids: Vec<String> = prepared
            .iter()
            .map(|p| p.spec.module_id_to_assign.clone())
            .collect();
        info!(dispatch_id = %dispatch_id, modules = ?module_ids, "Dispatch starting");
        self.handles.events.publish(RunEvent::DispatchStart {
            dispatch_id: dispatch_id.clone(),
            module_ids: module_ids.clone(),
        });

        // Child flows run in parallel, bounded by the semaphore.
        let semaphore = Arc::new(Semaphore::new(
            self.handles.config.max_concurrent_child_flows.max(1),
        ));
        let mut join_handles = Vec::with_capacity(prepared.len());
        for prep in prepared {
            let runner = match self.build_child(&prep, shared_context.as_ref()) {
                Ok(runner) => runner,
                Err(e) => {
                    join_handles.push((prep.spec.module_id_to_assign.clone(), prep.agent_id.clone(), None));
                    warn!(agent_id = %prep.agent_id, error = %e, "Failed to build child flow");
                    continue;
                }
            };
            let permit_source = semaphore.clone();
            let module_id = prep.spec.module_id_to_assign.clone();
            let agent_id = prep.agent_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit_source.acquire_owned().await;
                runner.run().await
            });
            join_handles.push((module_id, agent_id, Some(handle)));
        }

        let mut outcomes = Map::new();
        let mut execution_results = Vec::new();
        for (module_id, agent_id, handle) in join_handles {
            let result: Option<FlowResult> = match handle {
                Some(handle) => match handle.await {
                    Ok(result) => Some(result),
                    Err(e) => {
                        warn!(agent_id = %agent_id, "Child flow panicked: {e}");
                        None
                    }
                },
                None => None,
            };

            let (execution_status, findings, error) = match &result {
                Some(r) => match (&r.findings, r.outcome) {
                    (Some(findings), _) => ("completed", Some(findings.clone()), None),
                    (None, FlowOutcome::Cancelled) => {
                        ("cancelled", None, Some("cancelled".to_string()))
                    }
                    (None, _) => (
                        "error",
                        None,
                        Some(
                            r.error
                                .clone()
                                .unwrap_or_else(|| "flow ended without submission".to_string()),
                        ),
                    ),
                },
                None => ("error", None, Some("child flow failed to run".to_string())),
            };

            {
                let mut team = self.handles.team.lock().await;
                if let Some(module) = team.module_mut(&module_id) {
                    let deliverable = match &findings {
                        Some(findings) => Deliverable::findings(&agent_id, findings),
                        None => Deliverable::error(
                            &agent_id,
                            error.clone().unwrap_or_else(|| "unknown error".to_string()),
                        ),
                    };
                    module.deliverables.push(deliverable);
                    module.status = ModuleStatus::PendingReview;
                }
            }

            outcomes.insert(
                module_id.clone(),
                json!({
                    "execution_status": execution_status,
                    "agent_id": agent_id,
                }),
            );
            let mut entry = json!({
                "module_id": module_id,
                "execution_status": execution_status,
            });
            if let Some(findings) = findings {
                entry["deliverables"] = json!({ "current_associate_findings": findings });
            }
            if let Some(error) = error {
                entry["error"] = json!(error);
            }
            execution_results.push(entry);
        }

        let modules_snapshot = {
            let team = self.handles.team.lock().await;
            serde_json::to_value(&team.work_modules).unwrap_or_default()
        };
        self.handles.events.publish(RunEvent::WorkModulesUpdate {
            modules: modules_snapshot,
        });
        self.handles.events.publish(RunEvent::DispatchComplete {
            dispatch_id: dispatch_id.clone(),
            outcomes: Value::Object(outcomes),
        });
        info!(dispatch_id = %dispatch_id, "Dispatch complete");

        Ok(json!({
            "status": "ok",
            "message": format!("{} assignment(s) executed", execution_results.len()),
            "dispatch_id": dispatch_id,
            "assignment_execution_results": execution_results,
        }))
    }
}

impl Dispatcher {
    fn build_child(
        &self,
        prep: &PreparedAssignment,
        shared_context: Option<&Value>,
    ) -> QuorumResult<FlowRunner> {
        let profile = self
            .handles
            .profiles
            .resolve(&prep.spec.agent_profile_logical_name)?;
        let mut runner = FlowRunner::new(&prep.agent_id, profile, self.handles.clone(), None)?;

        if let Some(context) = shared_context {
            runner.push_inbox(InboxItem::consume_on_read(
                "dispatcher",
                "markdown",
                json!({ "title": "### Shared Context", "context": context }),
            ));
        }
        runner.push_inbox(InboxItem::consume_on_read(
            "dispatcher",
            "markdown",
            json!({
                "title": "### Your Assignment",
                "module": prep.module_name,
                "module_id": prep.spec.module_id_to_assign,
                "role": prep.spec.assigned_role_name,
                "instructions": prep.spec.assignment_specific_instructions,
            }),
        ));
        if !prep.inherited_deliverables.is_empty() {
            let summaries: Vec<Value> = prep
                .inherited_deliverables
                .iter()
                .map(|d| json!({ "from": d.source_agent_id, "content": d.content }))
                .collect();
            runner.push_inbox(InboxItem::consume_on_read(
                "dispatcher",
                "markdown",
                json!({
                    "title": "### Deliverables From Prior Modules",
                    "deliverables": summaries,
                }),
            ));
        }
        if !prep.inherited_messages.is_empty() {
            runner.push_inbox(InboxItem::consume_on_read(
                "dispatcher",
                "json_history",
                serde_json::to_value(&prep.inherited_messages)?,
            ));
        }

        Ok(runner)
    }
}
