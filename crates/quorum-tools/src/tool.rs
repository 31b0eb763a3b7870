use async_trait::async_trait;
use quorum_core::{EventBus, FlowOutcome, QuorumResult, SharedTeamState, ToolCall, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Metadata describing a tool's interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema for the parameters object.
    pub parameters_schema: Value,
    /// Toolset tag used by profile access policies.
    pub toolset: String,
    /// When true, no further tool calls from the same response execute
    /// after this one.
    pub ends_turn: bool,
}

/// Slot an Associate's submission tool writes its findings into.
pub type FindingsSlot = Arc<Mutex<Option<String>>>;

/// Slot a tool sets to terminate the owning flow after this turn.
pub type FlowSignalSlot = Arc<Mutex<Option<FlowOutcome>>>;

/// One dispatch assignment as emitted by the Principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentSpec {
    pub module_id_to_assign: String,
    pub agent_profile_logical_name: String,
    pub assigned_role_name: String,
    pub assignment_specific_instructions: String,
    #[serde(default)]
    pub inherit_deliverables_from: Vec<String>,
    #[serde(default)]
    pub inherit_messages_from: Vec<String>,
}

/// Handle into the dispatch subsystem. Implemented by the engine; injected
/// into tool contexts of Principal flows only, which keeps this crate free
/// of a circular dependency on the engine.
#[async_trait]
pub trait AssociateSpawner: Send + Sync {
    /// Validates and runs a batch of assignments, returning the aggregated
    /// per-module report. A rejected batch reports
    /// `status = "rejected"` and changes no state.
    async fn dispatch(
        &self,
        assignments: Vec<AssignmentSpec>,
        shared_context: Option<Value>,
    ) -> QuorumResult<Value>;
}

/// Per-flow handles a tool invocation may touch.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: String,
    pub agent_id: String,
    pub team: SharedTeamState,
    pub events: EventBus,
    /// Present only for Principal flows.
    pub spawner: Option<Arc<dyn AssociateSpawner>>,
    pub findings: FindingsSlot,
    pub flow_signal: FlowSignalSlot,
    /// Context strings tools register for the next prompt's
    /// `tool_contributed_context` segment. Cleared each turn.
    pub contributed_context: Arc<Mutex<Vec<String>>>,
}

impl ToolContext {
    /// Signals the flow runner to terminate the flow after this turn.
    pub fn signal_flow_end(&self, outcome: FlowOutcome) {
        if let Ok(mut slot) = self.flow_signal.lock() {
            *slot = Some(outcome);
        }
    }

    /// Replaces the findings slot (later submissions win).
    pub fn store_findings(&self, findings: impl Into<String>) {
        if let Ok(mut slot) = self.findings.lock() {
            *slot = Some(findings.into());
        }
    }
}

/// Trait all tools implement, native or built-in.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> QuorumResult<ToolResult>;
}
