//! Streaming chat-completion client for the quorum runtime.
//!
//! The transport is an OpenAI-compatible endpoint with SSE streaming; the
//! client owns aggregation, per-call timeout, retry with exponential
//! backoff, cancellation, and empty-response detection. Backends are
//! swappable through [`ChatBackend`] so tests run against scripted frame
//! sequences.

/// Backend trait and request shape.
pub mod backend;
/// Streaming chat-completion client with retry and aggregation.
pub mod client;
/// Named LLM endpoint configuration.
pub mod config;
/// OpenAI-compatible SSE backend.
pub mod openai;
/// Stream frame model.
pub mod stream;

pub use backend::{ChatBackend, ChatRequest};
pub use client::{AssistantTurn, LlmClient};
pub use config::{LlmConfig, LlmConfigMap};
pub use openai::OpenAiBackend;
pub use stream::StreamFrame;
