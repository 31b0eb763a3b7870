use crate::message::Message;
use crate::tool::ToolCall;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Team state shared by every flow of one run, guarded by a single lock.
/// Tools take the lock once per invocation; there is no nested locking.
pub type SharedTeamState = Arc<tokio::sync::Mutex<TeamState>>;

// --- Work modules ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Pending,
    InProgress,
    PendingReview,
    Completed,
    Deprecated,
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleStatus::Pending => "pending",
            ModuleStatus::InProgress => "in_progress",
            ModuleStatus::PendingReview => "pending_review",
            ModuleStatus::Completed => "completed",
            ModuleStatus::Deprecated => "deprecated",
        };
        write!(f, "{s}")
    }
}

/// Findings an Associate submitted against a work module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub source_agent_id: String,
    pub content: String,
    /// True when this records a child flow's terminal error instead of findings.
    pub is_error: bool,
    pub submitted_at: DateTime<Utc>,
}

impl Deliverable {
    pub fn findings(source_agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_agent_id: source_agent_id.into(),
            content: content.into(),
            is_error: false,
            submitted_at: Utc::now(),
        }
    }

    pub fn error(source_agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_agent_id: source_agent_id.into(),
            content: error.into(),
            is_error: true,
            submitted_at: Utc::now(),
        }
    }
}

/// A unit of delegated work tracked in team state and assigned to one
/// Associate at a time. All cross-references are ids resolved through the
/// run: `messages_ref` names the child flow whose history produced the
/// deliverables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkModule {
    pub module_id: String,
    pub name: String,
    pub description: String,
    pub status: ModuleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_profile_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_role_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deliverables: Vec<Deliverable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_ref: Option<String>,
}

impl WorkModule {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            module_id: fresh_module_id(),
            name: name.into(),
            description: description.into(),
            status: ModuleStatus::Pending,
            assigned_profile_name: None,
            assigned_role_name: None,
            deliverables: Vec::new(),
            messages_ref: None,
        }
    }

    /// Whether a dispatch may pick this module up.
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self.status,
            ModuleStatus::Pending | ModuleStatus::PendingReview
        )
    }
}

fn fresh_module_id() -> String {
    let hash = Uuid::new_v4().simple().to_string();
    format!("wm_{}", &hash[..8])
}

// --- Team state ---

/// Process-local, structured state shared by all flows in one run.
///
/// Canonical evaluator paths: `team.work_modules`,
/// `team.profiles_list_instance_ids`, `team.shared_context`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamState {
    /// Ordered mapping from module id to module, in creation order.
    #[serde(default)]
    pub work_modules: IndexMap<String, WorkModule>,
    /// Associate profile names available for dispatch.
    #[serde(default)]
    pub profiles_list_instance_ids: Vec<String>,
    /// Free-form mapping used for cross-flow data passing.
    #[serde(default)]
    pub shared_context: Map<String, Value>,
}

impl TeamState {
    pub fn new(profiles_list_instance_ids: Vec<String>) -> Self {
        Self {
            profiles_list_instance_ids,
            ..Self::default()
        }
    }

    /// Creates a pending module and returns its fresh id.
    pub fn add_module(&mut self, name: impl Into<String>, description: impl Into<String>) -> String {
        let module = WorkModule::new(name, description);
        let id = module.module_id.clone();
        self.work_modules.insert(id.clone(), module);
        id
    }

    pub fn module(&self, id: &str) -> Option<&WorkModule> {
        self.work_modules.get(id)
    }

    pub fn module_mut(&mut self, id: &str) -> Option<&mut WorkModule> {
        self.work_modules.get_mut(id)
    }

    /// Read-only projection used by the expression evaluator and ingestors.
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// --- Inbox ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionPolicy {
    /// Rendered into exactly one prompt, then removed.
    ConsumeOnRead,
    /// Rendered into every prompt until explicitly removed.
    Persistent,
}

/// A queued piece of synthetic context injected into the next turn's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxItem {
    /// Tag identifying who queued the item (observer id, tool name, dispatcher).
    pub source: String,
    pub payload: Value,
    /// Name of the ingestor that renders the payload to prompt text.
    pub ingestor_id: String,
    pub consumption_policy: ConsumptionPolicy,
}

impl InboxItem {
    pub fn consume_on_read(
        source: impl Into<String>,
        ingestor_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            source: source.into(),
            payload,
            ingestor_id: ingestor_id.into(),
            consumption_policy: ConsumptionPolicy::ConsumeOnRead,
        }
    }
}

// --- Flow state ---

/// Facts the engine records about the most recent turn so observer and
/// decider conditions can stay declarative. Exposed to the evaluator
/// under `state.last_turn.*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnFacts {
    pub had_tool_call: bool,
    pub content_empty: bool,
    pub reasoning_empty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_error: Option<String>,
}

/// Per-agent, per-run state hosted by one flow runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    pub flow_id: String,
    pub messages: Vec<Message>,
    /// The tool call the agent emitted on this turn, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<ToolCall>,
    #[serde(default)]
    pub inbox: VecDeque<InboxItem>,
    /// Counters and markers maintained by observers.
    #[serde(default)]
    pub flags: Map<String, Value>,
    #[serde(default)]
    pub last_turn: TurnFacts,
}

impl FlowState {
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            messages: Vec::new(),
            current_action: None,
            inbox: VecDeque::new(),
            flags: Map::new(),
            last_turn: TurnFacts::default(),
        }
    }

    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// --- Path resolution & updates ---

/// Resolves a dotted path against a value tree. Absent paths resolve to
/// `None`; numeric segments index into arrays. Never panics.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Combined evaluator view over one flow and the team, rooted at `state.*`
/// and `team.*`.
pub fn combined_snapshot(flow: &FlowState, team: &TeamState) -> Value {
    json!({ "state": flow.snapshot(), "team": team.snapshot() })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOp {
    Set,
    Increment,
    Append,
}

/// One mutation issued by an `update_state` observer action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdate {
    pub op: UpdateOp,
    /// `state.flags.*` or `team.shared_context.*`.
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

/// Applies an update to a map, creating intermediate objects as needed.
/// `segments` is the path below the map root. Type mismatches degrade:
/// incrementing a non-number restarts from the increment value, appending
/// to a non-array replaces it with a fresh list.
pub fn apply_update_to_map(map: &mut Map<String, Value>, segments: &[&str], op: UpdateOp, value: &Value) {
    let Some((leaf, parents)) = segments.split_last() else {
        return;
    };
    let mut current = map;
    for parent in parents {
        let entry = current
            .entry(parent.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry.as_object_mut() {
            Some(next) => current = next,
            None => return,
        }
    }
    match op {
        UpdateOp::Set => {
            current.insert(leaf.to_string(), value.clone());
        }
        UpdateOp::Increment => {
            let step = value.as_f64().unwrap_or(1.0);
            let base = current.get(*leaf).and_then(Value::as_f64).unwrap_or(0.0);
            let next = base + step;
            let next = if next.fract() == 0.0 {
                json!(next as i64)
            } else {
                json!(next)
            };
            current.insert(leaf.to_string(), next);
        }
        UpdateOp::Append => {
            let entry = current
                .entry(leaf.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Some(items) = entry.as_array_mut() {
                items.push(value.clone());
            }
        }
    }
}
