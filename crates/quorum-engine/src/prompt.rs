//! Prompt assembly: ordered system-prompt segments plus the flow's message
//! history with consumed inbox items injected as synthetic user turns.

use crate::ingest::{IngestorCtx, IngestorRegistry};
use quorum_core::expr::{eval_condition, render_template};
use quorum_core::{combined_snapshot, ConsumptionPolicy, FlowState, Message, QuorumResult, Role, TeamState};
use quorum_llm::ChatRequest;
use quorum_profile::{EffectiveProfile, ProfileStore, SegmentKind};
use quorum_tools::ToolRegistry;
use serde_json::Value;

pub struct PromptAssembler<'a> {
    pub profile: &'a EffectiveProfile,
    pub profiles: &'a ProfileStore,
    pub registry: &'a ToolRegistry,
    pub ingestors: &'a IngestorRegistry,
}

impl PromptAssembler<'_> {
    /// Builds the chat request for one turn. Inbox items with a
    /// consume-on-read policy leave the inbox here. Fails only on a
    /// malformed segment condition.
    pub fn assemble(
        &self,
        state: &mut FlowState,
        team: &TeamState,
        contributed_context: &[String],
    ) -> QuorumResult<ChatRequest> {
        let snapshot = combined_snapshot(state, team);
        let ctx = IngestorCtx {
            snapshot: &snapshot,
            profile: self.profile,
            profiles: self.profiles,
        };

        let policy = &self.profile.tool_access_policy;
        let visible = self
            .registry
            .visible_for(&policy.allowed_toolsets, &policy.allowed_individual_tools);

        let mut parts: Vec<String> = Vec::new();
        for segment in &self.profile.segments {
            if let Some(condition) = &segment.condition {
                if !eval_condition(condition, &snapshot)? {
                    continue;
                }
            }
            let rendered = match segment.kind {
                SegmentKind::StaticText => segment
                    .content
                    .as_deref()
                    .map(|content| render_template(content, &snapshot))
                    .unwrap_or_default(),
                SegmentKind::StateValue => {
                    let payload = segment
                        .source_state_path
                        .as_deref()
                        .and_then(|path| quorum_core::resolve_path(&snapshot, path))
                        .cloned()
                        .unwrap_or(Value::Null);
                    let ingestor_id = segment.ingestor.as_deref().unwrap_or("markdown");
                    self.ingestors
                        .render(ingestor_id, &payload, &segment.params, &ctx)
                }
                SegmentKind::ToolDescription => {
                    if visible.is_empty() {
                        String::new()
                    } else {
                        ToolRegistry::render_prompt(&visible)
                    }
                }
                SegmentKind::ToolContributedContext => contributed_context.join("\n\n"),
            };
            if !rendered.trim().is_empty() {
                parts.push(rendered);
            }
        }
        let system_prompt = (!parts.is_empty()).then(|| parts.join("\n\n"));

        // Render queued inbox items as synthetic user messages, placed
        // before the final user turn so the latest real input stays last.
        let mut synthetic: Vec<Message> = Vec::new();
        for item in &state.inbox {
            let text = self
                .ingestors
                .render(&item.ingestor_id, &item.payload, &Value::Null, &ctx);
            if !text.trim().is_empty() {
                synthetic.push(Message::user(text));
            }
        }
        state
            .inbox
            .retain(|item| item.consumption_policy == ConsumptionPolicy::Persistent);

        let mut messages = state.messages.clone();
        let insert_at = match messages.last() {
            Some(last) if last.role == Role::User => messages.len() - 1,
            _ => messages.len(),
        };
        messages.splice(insert_at..insert_at, synthetic);

        Ok(ChatRequest {
            system_prompt,
            messages,
            tools: ToolRegistry::api_schema(&visible),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use quorum_core::InboxItem;
    use quorum_profile::default_profiles;
    use quorum_tools::default_registry;
    use serde_json::json;

    fn assemble_with(
        state: &mut FlowState,
        team: &TeamState,
        profile_name: &str,
    ) -> ChatRequest {
        let store = ProfileStore::from_raw(default_profiles());
        let profile = store.resolve(profile_name).unwrap();
        let registry = default_registry();
        let ingestors = IngestorRegistry::with_defaults();
        let assembler = PromptAssembler {
            profile: profile.as_ref(),
            profiles: &store,
            registry: &registry,
            ingestors: &ingestors,
        };
        assembler.assemble(state, team, &[]).unwrap()
    }

    #[test]
    fn test_principal_system_prompt_contains_segments_in_order() {
        let mut state = FlowState::new("principal");
        let mut team = TeamState::new(vec!["Associate_Researcher".into()]);
        team.add_module("Research T", "dig");
        let request = assemble_with(&mut state, &team, "Principal");

        let system = request.system_prompt.unwrap();
        let identity = system.find("Principal agent").unwrap();
        let modules = system.find("Current Work Modules Status").unwrap();
        let associates = system.find("Available Associate Agent Profiles").unwrap();
        let tools = system.find("Available Tools").unwrap();
        assert!(identity < modules && modules < associates && associates < tools);
        assert!(system.contains("dispatch_submodules"));
    }

    #[test]
    fn test_associate_sees_only_its_toolset() {
        let mut state = FlowState::new("associate");
        let team = TeamState::default();
        let request = assemble_with(&mut state, &team, "Associate_Researcher");
        let system = request.system_prompt.unwrap();
        assert!(system.contains("generate_message_summary"));
        assert!(!system.contains("dispatch_submodules"));
        assert_eq!(request.tools.len(), 1);
    }

    #[test]
    fn test_inbox_items_become_user_messages_and_are_consumed() {
        let mut state = FlowState::new("principal");
        state.messages.push(Message::assistant("prior"));
        state.messages.push(Message::user("latest question"));
        state.inbox.push_back(InboxItem::consume_on_read(
            "test",
            "tagged_content",
            json!({"content": "briefing text"}),
        ));

        let team = TeamState::default();
        let request = assemble_with(&mut state, &team, "Principal");

        // Synthetic message lands before the trailing user turn.
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].content, "briefing text");
        assert_eq!(request.messages[2].content, "latest question");
        assert!(state.inbox.is_empty());
    }

    #[test]
    fn test_persistent_inbox_items_survive_assembly() {
        let mut state = FlowState::new("principal");
        let mut item = InboxItem::consume_on_read("t", "tagged_content", json!({"content": "pin"}));
        item.consumption_policy = ConsumptionPolicy::Persistent;
        state.inbox.push_back(item);

        let team = TeamState::default();
        let _ = assemble_with(&mut state, &team, "Principal");
        assert_eq!(state.inbox.len(), 1);
    }

    #[test]
    fn test_malformed_segment_condition_is_an_error() {
        let store = ProfileStore::from_raw(default_profiles());
        let mut profile = (*store.resolve("Principal").unwrap()).clone();
        profile.segments[0].condition = Some("v['broken".into());
        let registry = default_registry();
        let ingestors = IngestorRegistry::with_defaults();
        let assembler = PromptAssembler {
            profile: &profile,
            profiles: &store,
            registry: &registry,
            ingestors: &ingestors,
        };
        let mut state = FlowState::new("p");
        let team = TeamState::default();
        assert!(assembler.assemble(&mut state, &team, &[]).is_err());
    }
}
