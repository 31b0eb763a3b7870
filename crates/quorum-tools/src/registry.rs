use crate::schema::validate_params;
use crate::tool::{Tool, ToolContext, ToolDescriptor};
use quorum_core::{ToolCall, ToolResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Central registry for all available tools. Populated once at boot and
/// read-only afterwards.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        info!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// The prompt-visible subset for an agent: tools whose toolset is
    /// allowed, plus individually allowed tools, intersected with what is
    /// actually registered. Sorted by name for stable prompts.
    pub fn visible_for(
        &self,
        allowed_toolsets: &[String],
        allowed_individual_tools: &[String],
    ) -> Vec<&ToolDescriptor> {
        let mut visible: Vec<&ToolDescriptor> = self
            .tools
            .values()
            .map(|t| t.descriptor())
            .filter(|d| {
                allowed_toolsets.contains(&d.toolset)
                    || allowed_individual_tools.contains(&d.name)
            })
            .collect();
        visible.sort_by(|a, b| a.name.cmp(&b.name));
        visible
    }

    /// Renders tool descriptions for the system prompt.
    pub fn render_prompt(descriptors: &[&ToolDescriptor]) -> String {
        let mut lines = vec!["### Available Tools".to_string()];
        for d in descriptors {
            lines.push(format!("* **{}**: {}", d.name, d.description));
        }
        lines.join("\n")
    }

    /// Renders the OpenAI `tools` parameter for the same subset.
    pub fn api_schema(descriptors: &[&ToolDescriptor]) -> Vec<serde_json::Value> {
        descriptors
            .iter()
            .map(|d| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": d.name,
                        "description": d.description,
                        "parameters": d.parameters_schema,
                    }
                })
            })
            .collect()
    }

    /// Validates and dispatches one call. Unknown tools, schema violations,
    /// and handler failures all come back as error results the agent can
    /// read; nothing propagates as an exception.
    pub async fn invoke(&self, call: ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::error(&call.id, format!("Unknown tool: {}", call.name));
        };

        if let Err(violation) = validate_params(&tool.descriptor().parameters_schema, &call.arguments)
        {
            warn!(tool = %call.name, violation = %violation, "Tool schema violation");
            return ToolResult::error(&call.id, format!("Invalid parameters: {violation}"));
        }

        let call_id = call.id.clone();
        let name = call.name.clone();
        match tool.execute(call, ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool handler failed");
                ToolResult::error(&call_id, e.to_string())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
