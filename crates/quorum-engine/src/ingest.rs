//! Ingestors: named formatters that render a state value or inbox payload
//! as prompt text. Rendering never fails — malformed payloads degrade to a
//! bracketed error string the agent can see.

use quorum_core::expr::render_template;
use quorum_core::{ToolResult, WorkModule};
use quorum_profile::{EffectiveProfile, ProfileStore, ProfileType};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Read-only context handed to every ingestor.
pub struct IngestorCtx<'a> {
    /// Combined `state.*` / `team.*` snapshot for template interpolation.
    pub snapshot: &'a Value,
    pub profile: &'a EffectiveProfile,
    pub profiles: &'a ProfileStore,
}

pub type IngestorFn = fn(&Value, &Value, &IngestorCtx<'_>) -> String;

/// Registry from ingestor id to formatter. Initialized once at boot.
pub struct IngestorRegistry {
    ingestors: HashMap<&'static str, IngestorFn>,
}

impl IngestorRegistry {
    pub fn with_defaults() -> Self {
        let mut ingestors: HashMap<&'static str, IngestorFn> = HashMap::new();
        ingestors.insert("templated_content", templated_content);
        ingestors.insert("generic_message", generic_message);
        ingestors.insert("markdown", markdown);
        ingestors.insert("work_modules", work_modules);
        ingestors.insert("available_associates", available_associates);
        ingestors.insert("json_history", json_history);
        ingestors.insert("tagged_content", tagged_content);
        Self { ingestors }
    }

    pub fn render(
        &self,
        ingestor_id: &str,
        payload: &Value,
        params: &Value,
        ctx: &IngestorCtx<'_>,
    ) -> String {
        match self.ingestors.get(ingestor_id) {
            Some(ingestor) => ingestor(payload, params, ctx),
            None => {
                warn!(ingestor = ingestor_id, "Unknown ingestor");
                format!("[Error: unknown ingestor '{ingestor_id}']")
            }
        }
    }
}

impl Default for IngestorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Looks up `content_key` in the profile's text definitions and
/// interpolates it against the state snapshot.
fn templated_content(payload: &Value, params: &Value, ctx: &IngestorCtx<'_>) -> String {
    let Some(content_key) = payload.get("content_key").and_then(Value::as_str) else {
        return format!("[Error: ingestor received an invalid payload: {payload}]");
    };
    let Some(template) = ctx.profile.text_definition(content_key) else {
        return format!("[Error: template '{content_key}' not found]");
    };
    wrap(render_template(template, ctx.snapshot), params)
}

/// Substitutes `{{ payload.* }}` and `{{ payload }}` into a template from
/// `params.content_template`.
fn generic_message(payload: &Value, params: &Value, _ctx: &IngestorCtx<'_>) -> String {
    let mut text = params
        .get("content_template")
        .and_then(Value::as_str)
        .unwrap_or("{{ payload }}")
        .to_string();
    if let Some(map) = payload.as_object() {
        for (key, value) in map {
            text = text.replace(
                &format!("{{{{ payload.{key} }}}}"),
                &quorum_core::expr::value_to_text(value),
            );
        }
    }
    text.replace("{{ payload }}", &quorum_core::expr::value_to_text(payload))
}

/// Renders a payload as an indented markdown bullet tree; an optional
/// `title` key in the payload becomes the heading.
fn markdown(payload: &Value, params: &Value, _ctx: &IngestorCtx<'_>) -> String {
    let mut lines = Vec::new();
    let title = params
        .get("title")
        .or_else(|| payload.get("title"))
        .and_then(Value::as_str);
    if let Some(title) = title {
        lines.push(title.to_string());
    }
    match payload {
        Value::Object(map) => {
            for (key, value) in map {
                if key == "title" {
                    continue;
                }
                lines.push(format!("* **{}:**", title_case(key)));
                lines.extend(recursive_markdown(value, 1));
            }
        }
        other => lines.extend(recursive_markdown(other, 0)),
    }
    lines.join("\n")
}

/// Formats the work-module table as markdown for the Principal's prompt.
fn work_modules(payload: &Value, params: &Value, _ctx: &IngestorCtx<'_>) -> String {
    let mut lines = vec![params
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("### Current Work Modules Status")
        .to_string()];

    let modules: Vec<WorkModule> = payload
        .as_object()
        .map(|map| {
            map.values()
                .filter_map(|m| serde_json::from_value(m.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    if modules.is_empty() {
        lines.push("No work modules are currently defined.".to_string());
    } else {
        for module in modules {
            lines.push(format!(
                "* **{}** (`{}`, status: `{}`): {}",
                module.name, module.module_id, module.status, module.description
            ));
            for deliverable in &module.deliverables {
                let tag = if deliverable.is_error { "error" } else { "deliverable" };
                lines.push(format!(
                    "  * [{tag} from {}] {}",
                    deliverable.source_agent_id,
                    first_line(&deliverable.content)
                ));
            }
        }
    }
    lines.join("\n")
}

/// Lists dispatchable Associate profiles with their human descriptions.
fn available_associates(payload: &Value, params: &Value, ctx: &IngestorCtx<'_>) -> String {
    let mut lines = vec![params
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("### Available Associate Agent Profiles")
        .to_string()];

    let mut names: Vec<&str> = payload
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    names.sort_unstable();

    let mut listed = 0;
    for name in names {
        let Ok(profile) = ctx.profiles.resolve(name) else {
            continue;
        };
        if profile.profile_type != ProfileType::Associate {
            continue;
        }
        let description = profile
            .description_for_human
            .as_deref()
            .unwrap_or("No description.");
        let toolsets = profile.tool_access_policy.allowed_toolsets.join(", ");
        lines.push(format!("* **{name}**: {description} (toolsets: {toolsets})"));
        listed += 1;
    }
    if listed == 0 {
        lines.push("No 'associate' type profiles are currently available.".to_string());
    }
    lines.join("\n")
}

/// Serializes a message history and wraps it in tags, for full-history
/// inheritance between modules.
fn json_history(payload: &Value, _params: &Value, _ctx: &IngestorCtx<'_>) -> String {
    if !payload.is_array() {
        return "[Error: message history for JSON ingestion was not a list.]".to_string();
    }
    let body = serde_json::to_string_pretty(payload).unwrap_or_else(|_| "[]".to_string());
    format!("<message_history_json>\n{body}\n</message_history_json>")
}

/// Wraps a payload string in the tags given by `wrapper_tags`.
fn tagged_content(payload: &Value, params: &Value, _ctx: &IngestorCtx<'_>) -> String {
    let content = match payload.get("content") {
        Some(inner) => quorum_core::expr::value_to_text(inner),
        None => quorum_core::expr::value_to_text(payload),
    };
    wrap(content, params)
}

fn wrap(content: String, params: &Value) -> String {
    let tags: Option<(&str, &str)> = params
        .get("wrapper_tags")
        .and_then(Value::as_array)
        .and_then(|tags| match tags.as_slice() {
            [open, close] => Some((open.as_str()?, close.as_str()?)),
            _ => None,
        });
    match tags {
        Some((open, close)) => format!("{open}{content}{close}"),
        None => content,
    }
}

/// Renders a tool result for the agent's message history: markdown for
/// success payloads, a tagged JSON error report for failures.
pub fn format_tool_result(tool_name: &str, result: &ToolResult) -> String {
    if result.is_error {
        let report = serde_json::json!({
            "tool_execution_failed": true,
            "tool_name": tool_name,
            "error_details": result.payload,
        });
        let body = serde_json::to_string_pretty(&report).unwrap_or_default();
        return format!("<tool_error_report>\n{body}\n</tool_error_report>");
    }
    recursive_markdown(&result.payload, 0).join("\n")
}

fn recursive_markdown(data: &Value, level: usize) -> Vec<String> {
    let indent = "  ".repeat(level);
    let mut lines = Vec::new();
    match data {
        Value::Object(map) => {
            if map.is_empty() {
                lines.push(format!("{indent}  (empty)"));
                return lines;
            }
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                lines.push(format!("{indent}* **{}:**", title_case(key)));
                lines.extend(recursive_markdown(&map[key], level + 1));
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                lines.push(format!("{indent}  (empty)"));
                return lines;
            }
            for item in items {
                lines.extend(recursive_markdown(item, level));
            }
        }
        Value::String(text) => {
            for line in text.trim().split('\n') {
                lines.push(format!("{indent}  {line}"));
            }
        }
        other => lines.push(format!("{indent}  {other}")),
    }
    lines
}

fn title_case(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
