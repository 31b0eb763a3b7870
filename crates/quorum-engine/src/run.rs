//! The run supervisor: top-level object for one user request. Owns team
//! state, the event bus, the cancel token, and the Principal flow; applies
//! the wall-clock cap and the optional state dump.

use crate::dispatch::Dispatcher;
use crate::flow::{BackendFactory, FlowLedger, FlowRunner, RunHandles};
use crate::ingest::IngestorRegistry;
use quorum_core::{
    EngineConfig, EventBus, FlowOutcome, QuorumError, QuorumResult, RunEvent, RunOutcome,
    TeamState,
};
use quorum_llm::LlmConfigMap;
use quorum_profile::ProfileStore;
use quorum_tools::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of one finished run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub outcome: RunOutcome,
    /// The Principal's final report, when one was generated.
    pub final_report: Option<String>,
    pub error: Option<String>,
}

/// One end-to-end execution for a user request.
#[derive(Clone)]
pub struct Run {
    handles: RunHandles,
    principal_profile: String,
}

impl Run {
    pub fn new(
        config: EngineConfig,
        profiles: Arc<ProfileStore>,
        registry: Arc<ToolRegistry>,
        llm_configs: Arc<LlmConfigMap>,
    ) -> Self {
        let run_id = format!("run_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let team = TeamState::new(profiles.associate_names());
        let handles = RunHandles {
            events: EventBus::new(run_id.clone()),
            run_id,
            team: Arc::new(tokio::sync::Mutex::new(team)),
            cancel: CancellationToken::new(),
            config: Arc::new(config),
            profiles,
            registry,
            ingestors: Arc::new(IngestorRegistry::with_defaults()),
            llm_configs,
            backend_factory: None,
            ledger: FlowLedger::default(),
        };
        Self {
            handles,
            principal_profile: "Principal".to_string(),
        }
    }

    /// Substitute a custom LLM backend per profile (tests, local providers).
    pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
        self.handles.backend_factory = Some(factory);
        self
    }

    /// Use a Principal profile other than the default `Principal`.
    pub fn with_principal_profile(mut self, name: impl Into<String>) -> Self {
        self.principal_profile = name.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.handles.run_id
    }

    pub fn events(&self) -> &EventBus {
        &self.handles.events
    }

    /// Shared team state, for external observers (UIs, tests).
    pub fn team(&self) -> quorum_core::SharedTeamState {
        self.handles.team.clone()
    }

    /// Terminal records of every flow this run hosted.
    pub fn flow_ledger(&self) -> FlowLedger {
        self.handles.ledger.clone()
    }

    /// Token observed by every flow and LLM call of this run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.handles.cancel.clone()
    }

    /// Fires the run-wide cancel token. Flows stop at their next
    /// suspension point; no new turns start afterwards.
    pub fn cancel(&self) {
        info!(run_id = %self.handles.run_id, "Run cancelled");
        self.handles.cancel.cancel();
    }

    /// Starts the run on a worker task.
    pub fn start(&self, user_prompt: impl Into<String>) -> tokio::task::JoinHandle<RunResult> {
        let run = self.clone();
        let prompt = user_prompt.into();
        tokio::spawn(async move { run.execute(&prompt).await })
    }

    /// Runs the Principal flow to completion under the wall-clock cap,
    /// publishes `RunEnd`, and dumps state if configured.
    pub async fn execute(&self, user_prompt: &str) -> RunResult {
        info!(run_id = %self.handles.run_id, "Run starting");
        let result = match self.drive_principal(user_prompt).await {
            Ok(result) => result,
            Err(e) => {
                error!(run_id = %self.handles.run_id, error = %e, "Run failed to start");
                RunResult {
                    run_id: self.handles.run_id.clone(),
                    outcome: RunOutcome::Error,
                    final_report: None,
                    error: Some(e.to_string()),
                }
            }
        };

        self.handles.events.publish(RunEvent::RunEnd {
            outcome: result.outcome,
        });

        if self.handles.config.state_dump_enabled {
            if let Err(e) = self.dump_state().await {
                warn!(run_id = %self.handles.run_id, error = %e, "State dump failed");
            }
        }

        info!(run_id = %self.handles.run_id, outcome = ?result.outcome, "Run ended");
        result
    }

    async fn drive_principal(&self, user_prompt: &str) -> QuorumResult<RunResult> {
        let profile = self.handles.profiles.resolve(&self.principal_profile)?;
        let dispatcher = Arc::new(Dispatcher::new(self.handles.clone()));
        let mut principal = FlowRunner::new(
            "principal",
            profile,
            self.handles.clone(),
            Some(dispatcher),
        )?;
        principal.push_user_message(user_prompt);

        let wall_clock = Duration::from_millis(self.handles.config.run_wall_clock_timeout_ms);
        let mut flow_task = tokio::spawn(principal.run());
        let flow_result = tokio::select! {
            joined = &mut flow_task => joined,
            _ = tokio::time::sleep(wall_clock) => {
                warn!(run_id = %self.handles.run_id, "Run wall-clock cap hit, cancelling");
                self.handles.cancel.cancel();
                flow_task.await
            }
        }
        .map_err(|e| QuorumError::Engine(format!("principal flow panicked: {e}")))?;

        let outcome = match flow_result.outcome {
            FlowOutcome::Success => RunOutcome::Success,
            FlowOutcome::Error => RunOutcome::Error,
            FlowOutcome::Cancelled => RunOutcome::Cancelled,
        };
        let final_report = {
            let team = self.handles.team.lock().await;
            team.shared_context
                .get("final_report")
                .and_then(|v| v.as_str())
                .map(String::from)
        };

        Ok(RunResult {
            run_id: self.handles.run_id.clone(),
            outcome,
            final_report,
            error: flow_result.error,
        })
    }

    /// Serializes team state plus every flow history to the configured path.
    async fn dump_state(&self) -> QuorumResult<()> {
        let team_snapshot = {
            let team = self.handles.team.lock().await;
            team.snapshot()
        };
        let flows = self
            .handles
            .ledger
            .lock()
            .map(|records| serde_json::to_value(&*records).unwrap_or_default())
            .unwrap_or_default();
        let dump = serde_json::json!({
            "run_id": self.handles.run_id,
            "team": team_snapshot,
            "flows": flows,
        });

        let path = &self.handles.config.state_dump_path;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(&dump)?).await?;
        info!(run_id = %self.handles.run_id, path = %path.display(), "State dump written");
        Ok(())
    }
}
