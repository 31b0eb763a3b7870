//! Shared foundation of the quorum multi-agent runtime.
//!
//! Everything the other crates agree on lives here: the error type, chat
//! messages and tool call/result records, the team/flow state tree with its
//! typed path resolver, the declarative expression evaluator, the run event
//! model with its broadcast bus, and the engine configuration.

/// Engine configuration with env overrides.
pub mod config;
/// Error types shared across the workspace.
pub mod error;
/// Run events, envelopes, and the per-run broadcast bus.
pub mod event;
/// Condition and template evaluation for profile rules.
pub mod expr;
/// Chat messages.
pub mod message;
/// Team state, work modules, flow state, inbox, and state updates.
pub mod state;
/// Tool call and tool result records.
pub mod tool;

pub use config::EngineConfig;
pub use error::{QuorumError, QuorumResult};
pub use event::{ChunkKind, EventBus, EventEnvelope, FlowOutcome, RunEvent, RunOutcome};
pub use message::{Message, Role};
pub use state::{
    combined_snapshot, resolve_path, ConsumptionPolicy, Deliverable, FlowState, InboxItem,
    ModuleStatus, SharedTeamState, StateUpdate, TeamState, TurnFacts, UpdateOp, WorkModule,
};
pub use tool::{ToolCall, ToolResult};
