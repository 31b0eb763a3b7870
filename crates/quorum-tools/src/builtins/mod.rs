//! The built-in tool surface: plan management, dispatch, submission,
//! reporting, and flow termination.

/// `dispatch_submodules`.
pub mod dispatch;
/// `manage_work_modules`.
pub mod plan;
/// `generate_markdown_report`.
pub mod report;
/// `generate_message_summary` and `finish_flow`.
pub mod submit;

pub use dispatch::DispatchSubmodulesTool;
pub use plan::ManageWorkModulesTool;
pub use report::GenerateMarkdownReportTool;
pub use submit::{FinishFlowTool, GenerateMessageSummaryTool};

use crate::registry::ToolRegistry;
use std::sync::Arc;

/// A registry with every built-in tool registered.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ManageWorkModulesTool::new()));
    registry.register(Arc::new(DispatchSubmodulesTool::new()));
    registry.register(Arc::new(GenerateMessageSummaryTool::new()));
    registry.register(Arc::new(GenerateMarkdownReportTool::new()));
    registry.register(Arc::new(FinishFlowTool::new()));
    registry
}
