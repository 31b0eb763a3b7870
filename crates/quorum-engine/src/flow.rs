//! The flow runner: one agent's sequential turn loop within a run.

use crate::ingest::IngestorRegistry;
use quorum_core::{
    EngineConfig, EventBus, FlowOutcome, FlowState, InboxItem, Message, QuorumError, QuorumResult,
    RunEvent, SharedTeamState,
};
use quorum_llm::{ChatBackend, LlmClient, LlmConfigMap};
use quorum_profile::{EffectiveProfile, ProfileStore, ProfileType};
use quorum_tools::{AssociateSpawner, FindingsSlot, FlowSignalSlot, ToolContext, ToolRegistry};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Factory for custom LLM backends, keyed by profile name. Used by tests
/// to substitute scripted backends per agent.
pub type BackendFactory = Arc<dyn Fn(&str) -> Box<dyn ChatBackend> + Send + Sync>;

/// Terminal record of one flow, kept for the state dump and for
/// full-history inheritance between modules.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    pub flow_id: String,
    pub profile_name: String,
    pub outcome: FlowOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages: Vec<Message>,
}

pub type FlowLedger = Arc<Mutex<Vec<FlowRecord>>>;

/// Shared handles every flow of one run carries. All cheap clones.
#[derive(Clone)]
pub struct RunHandles {
    pub run_id: String,
    pub team: SharedTeamState,
    pub events: EventBus,
    pub cancel: CancellationToken,
    pub config: Arc<EngineConfig>,
    pub profiles: Arc<ProfileStore>,
    pub registry: Arc<ToolRegistry>,
    pub ingestors: Arc<IngestorRegistry>,
    pub llm_configs: Arc<LlmConfigMap>,
    pub backend_factory: Option<BackendFactory>,
    pub ledger: FlowLedger,
}

/// What a finished flow hands back to whoever spawned it.
#[derive(Debug, Clone)]
pub struct FlowResult {
    pub flow_id: String,
    pub outcome: FlowOutcome,
    pub error: Option<String>,
    /// Findings submitted via `generate_message_summary`, if any.
    pub findings: Option<String>,
    pub messages: Vec<Message>,
}

/// Drives one agent through successive turns until a terminal outcome,
/// the run's cancel token, or the max-turns cap.
pub struct FlowRunner {
    pub(crate) agent_id: String,
    pub(crate) profile: Arc<EffectiveProfile>,
    pub(crate) state: FlowState,
    pub(crate) handles: RunHandles,
    pub(crate) llm: LlmClient,
    pub(crate) tool_ctx: ToolContext,
}

impl FlowRunner {
    pub fn new(
        agent_id: impl Into<String>,
        profile: Arc<EffectiveProfile>,
        handles: RunHandles,
        spawner: Option<Arc<dyn AssociateSpawner>>,
    ) -> QuorumResult<Self> {
        let agent_id = agent_id.into();

        let llm_config = handles
            .llm_configs
            .get(&profile.llm_config_ref)
            .cloned()
            .ok_or_else(|| {
                QuorumError::Config(format!(
                    "profile '{}' references unknown llm config '{}'",
                    profile.name, profile.llm_config_ref
                ))
            })?;
        let llm = match &handles.backend_factory {
            Some(factory) => LlmClient::from_backend(factory(&profile.name), llm_config),
            None => LlmClient::new(llm_config),
        };

        let tool_ctx = ToolContext {
            run_id: handles.run_id.clone(),
            agent_id: agent_id.clone(),
            team: handles.team.clone(),
            events: handles.events.clone(),
            spawner,
            findings: FindingsSlot::default(),
            flow_signal: FlowSignalSlot::default(),
            contributed_context: Arc::new(Mutex::new(Vec::new())),
        };

        let state = FlowState::new(agent_id.clone());
        Ok(Self {
            agent_id,
            profile,
            state,
            handles,
            llm,
            tool_ctx,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_principal(&self) -> bool {
        self.profile.profile_type == ProfileType::Principal
    }

    /// Seeds a user message (the run's prompt, for the Principal).
    pub fn push_user_message(&mut self, content: impl Into<String>) {
        self.state.messages.push(Message::user(content));
    }

    /// Seeds an inbox item (dispatch briefings, inherited context).
    pub fn push_inbox(&mut self, item: InboxItem) {
        self.state.inbox.push_back(item);
    }

    pub async fn run(mut self) -> FlowResult {
        info!(agent_id = %self.agent_id, profile = %self.profile.name, "Flow starting");
        let max_turns = self.handles.config.max_turns_per_flow;
        let mut turns: u32 = 0;

        let (outcome, error) = loop {
            if self.handles.cancel.is_cancelled() {
                break (FlowOutcome::Cancelled, None);
            }
            if turns >= max_turns {
                warn!(agent_id = %self.agent_id, max_turns, "Flow reached max turns");
                break (FlowOutcome::Error, Some("max_turns_exceeded".to_string()));
            }
            turns += 1;

            match self.run_turn().await {
                Ok(crate::turn::TurnVerdict::Continue) => {}
                Ok(crate::turn::TurnVerdict::LoopWithInbox(content_key)) => {
                    self.state.inbox.push_back(InboxItem::consume_on_read(
                        "flow_decider",
                        "templated_content",
                        json!({ "content_key": content_key }),
                    ));
                }
                Ok(crate::turn::TurnVerdict::End { outcome, error }) => break (outcome, error),
                Err(e) => {
                    warn!(agent_id = %self.agent_id, error = %e, "Turn failed, ending flow");
                    break (FlowOutcome::Error, Some(e.to_string()));
                }
            }
        };

        let findings = self
            .tool_ctx
            .findings
            .lock()
            .ok()
            .and_then(|slot| slot.clone());

        info!(
            agent_id = %self.agent_id,
            turns,
            outcome = ?outcome,
            has_findings = findings.is_some(),
            "Flow ended"
        );
        self.handles.events.publish(RunEvent::FlowEnd {
            agent_id: self.agent_id.clone(),
            outcome,
            error: error.clone(),
        });

        if let Ok(mut ledger) = self.handles.ledger.lock() {
            ledger.push(FlowRecord {
                flow_id: self.agent_id.clone(),
                profile_name: self.profile.name.clone(),
                outcome,
                error: error.clone(),
                messages: self.state.messages.clone(),
            });
        }

        FlowResult {
            flow_id: self.agent_id,
            outcome,
            error,
            findings,
            messages: self.state.messages,
        }
    }
}
