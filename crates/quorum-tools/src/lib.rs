//! Tools for the quorum runtime.
//!
//! A tool declares its name, JSON parameter schema, toolset tag, and
//! whether invoking it ends the agent's turn. The registry filters the
//! visible subset per agent from its profile's access policy, renders tool
//! descriptions for the prompt and the API `tools` parameter, and converts
//! every failure mode into a structured error result the agent can read.

/// Built-in tool implementations.
pub mod builtins;
/// Registry with access-policy filtering and validated dispatch.
pub mod registry;
/// Minimal JSON-schema parameter validation.
pub mod schema;
/// Tool trait, descriptor, context, and the spawner handle.
pub mod tool;

pub use builtins::default_registry;
pub use registry::ToolRegistry;
pub use tool::{
    AssignmentSpec, AssociateSpawner, FindingsSlot, FlowSignalSlot, Tool, ToolContext,
    ToolDescriptor,
};
