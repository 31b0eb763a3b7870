use quorum_core::state::StateUpdate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    /// The planning agent that owns the run.
    Principal,
    /// A worker agent spawned by dispatch.
    Associate,
}

/// Which toolsets and individual tools an agent may see and call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAccessPolicy {
    #[serde(default)]
    pub allowed_toolsets: Vec<String>,
    #[serde(default)]
    pub allowed_individual_tools: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    StaticText,
    StateValue,
    ToolDescription,
    ToolContributedContext,
}

/// One ordered piece of the system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSegment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub order: i64,
    /// Literal content for `static_text` segments (template-interpolated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// State path projected by `state_value` segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_state_path: Option<String>,
    /// Ingestor that renders the projected value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestor: Option<String>,
    /// The segment is skipped when this evaluates falsey.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Free-form ingestor parameters (title, wrapper tags, templates).
    /// Kept last so TOML serialization emits values before tables.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Payload template for an `add_to_inbox` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxSpec {
    pub ingestor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption_policy: Option<quorum_core::ConsumptionPolicy>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

/// Closed set of actions an observer may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverAction {
    AddToInbox {
        item: InboxSpec,
    },
    UpdateState {
        updates: Vec<StateUpdate>,
    },
    EndAgentTurn {
        outcome: RuleOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

/// Outcome named by `end_agent_turn` rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    Success,
    Error,
}

/// A declarative `{condition, action}` rule evaluated before or after a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverRule {
    pub id: String,
    pub condition: String,
    pub action: ObserverAction,
}

/// Closed set of actions the flow decider may choose.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeciderAction {
    /// Take another turn.
    ContinueWithTool,
    /// Queue a named text fragment into the inbox and loop.
    LoopWithInboxItem { content_key: String },
    /// Terminate the flow.
    EndAgentTurn {
        outcome: RuleOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeciderRule {
    pub id: String,
    pub condition: String,
    pub action: DeciderAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemPromptConstruction {
    #[serde(default)]
    pub system_prompt_segments: Vec<PromptSegment>,
}

/// A profile as authored on disk, before inheritance resolution.
/// Unknown keys are tolerated for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProfile {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub profile_type: Option<ProfileType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_for_human: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_access_policy: Option<ToolAccessPolicy>,
    #[serde(default)]
    pub system_prompt_construction: SystemPromptConstruction,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub text_definitions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_turn_observers: Vec<ObserverRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_turn_observers: Vec<ObserverRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flow_decider: Vec<DeciderRule>,
}

/// A fully resolved profile: the merge of its `base_profile` chain.
/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveProfile {
    pub name: String,
    pub profile_type: ProfileType,
    pub description_for_human: Option<String>,
    pub llm_config_ref: String,
    pub tool_access_policy: ToolAccessPolicy,
    /// Sorted by `order` ascending, ties broken on id.
    pub segments: Vec<PromptSegment>,
    pub text_definitions: BTreeMap<String, String>,
    pub pre_turn_observers: Vec<ObserverRule>,
    pub post_turn_observers: Vec<ObserverRule>,
    pub flow_decider: Vec<DeciderRule>,
}

impl EffectiveProfile {
    pub fn text_definition(&self, key: &str) -> Option<&str> {
        self.text_definitions.get(key).map(String::as_str)
    }
}
