use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Connection settings for one named LLM endpoint. Profiles reference an
/// entry by name through `llm_config_ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/v1/...`).
    pub endpoint_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_max_retries() -> u32 {
    2
}

/// Named LLM configurations, as loaded from the `[llm_configs.*]` tables.
pub type LlmConfigMap = HashMap<String, LlmConfig>;
