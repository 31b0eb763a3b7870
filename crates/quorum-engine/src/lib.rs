//! The quorum agent-execution engine.
//!
//! Drives a team of LLM-backed agents through a shared work plan: the
//! Principal flow decomposes a request into work modules and dispatches
//! them to parallel Associate flows; deliverables fold back into team
//! state until the Principal synthesizes the final report.
//!
//! # Main types
//!
//! - [`Run`] — top-level supervisor for one user request.
//! - [`FlowRunner`] — one agent's sequential turn loop.
//! - [`Dispatcher`] — spawns and aggregates child Associate flows.
//! - [`PromptAssembler`] — ordered segment rendering plus inbox injection.
//! - [`IngestorRegistry`] — named state-to-prompt formatters.

/// Child-flow dispatch.
pub mod dispatch;
/// Flow runner and shared run handles.
pub mod flow;
/// Ingestor registry.
pub mod ingest;
/// Observer and decider rule execution.
mod observer;
/// Prompt assembly.
pub mod prompt;
/// Run supervisor.
pub mod run;
/// The per-turn engine.
mod turn;

pub use dispatch::Dispatcher;
pub use flow::{BackendFactory, FlowLedger, FlowRecord, FlowResult, FlowRunner, RunHandles};
pub use ingest::{IngestorCtx, IngestorRegistry};
pub use prompt::PromptAssembler;
pub use run::{Run, RunResult};
