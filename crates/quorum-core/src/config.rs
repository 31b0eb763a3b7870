use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine-level knobs, loadable from TOML with per-field defaults and
/// overridable from `QUORUM_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Safety cap on turns per flow; exceeding it ends the flow with
    /// `max_turns_exceeded`.
    #[serde(default = "default_max_turns_per_flow")]
    pub max_turns_per_flow: u32,
    /// Semaphore bound on concurrently running child flows per dispatch.
    #[serde(default = "default_max_concurrent_child_flows")]
    pub max_concurrent_child_flows: usize,
    #[serde(default = "default_llm_call_timeout_ms")]
    pub llm_call_timeout_ms: u64,
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "default_run_wall_clock_timeout_ms")]
    pub run_wall_clock_timeout_ms: u64,
    #[serde(default)]
    pub state_dump_enabled: bool,
    #[serde(default = "default_state_dump_path")]
    pub state_dump_path: PathBuf,
}

fn default_max_turns_per_flow() -> u32 {
    64
}

fn default_max_concurrent_child_flows() -> usize {
    4
}

fn default_llm_call_timeout_ms() -> u64 {
    120_000
}

fn default_llm_max_retries() -> u32 {
    2
}

fn default_run_wall_clock_timeout_ms() -> u64 {
    1_800_000
}

fn default_state_dump_path() -> PathBuf {
    PathBuf::from("./data/run_state.json")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns_per_flow: default_max_turns_per_flow(),
            max_concurrent_child_flows: default_max_concurrent_child_flows(),
            llm_call_timeout_ms: default_llm_call_timeout_ms(),
            llm_max_retries: default_llm_max_retries(),
            run_wall_clock_timeout_ms: default_run_wall_clock_timeout_ms(),
            state_dump_enabled: false,
            state_dump_path: default_state_dump_path(),
        }
    }
}

impl EngineConfig {
    /// Applies `QUORUM_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("QUORUM_MAX_TURNS_PER_FLOW") {
            self.max_turns_per_flow = v;
        }
        if let Some(v) = env_parse("QUORUM_MAX_CONCURRENT_CHILD_FLOWS") {
            self.max_concurrent_child_flows = v;
        }
        if let Some(v) = env_parse("QUORUM_LLM_CALL_TIMEOUT_MS") {
            self.llm_call_timeout_ms = v;
        }
        if let Some(v) = env_parse("QUORUM_LLM_MAX_RETRIES") {
            self.llm_max_retries = v;
        }
        if let Some(v) = env_parse("QUORUM_RUN_WALL_CLOCK_TIMEOUT_MS") {
            self.run_wall_clock_timeout_ms = v;
        }
        if let Some(v) = env_parse::<String>("QUORUM_STATE_DUMP_ENABLED") {
            self.state_dump_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = env_parse::<String>("QUORUM_STATE_DUMP_PATH") {
            self.state_dump_path = PathBuf::from(v);
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
