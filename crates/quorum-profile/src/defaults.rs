//! Shipped profiles: a shared base with the stall/empty-response policy,
//! the Principal planner, and a general research Associate. Deployments
//! override or extend these with on-disk TOML profiles.

use crate::profile::{
    DeciderAction, DeciderRule, InboxSpec, ObserverAction, ObserverRule, ProfileType,
    PromptSegment, RawProfile, RuleOutcome, SegmentKind, SystemPromptConstruction,
    ToolAccessPolicy,
};
use quorum_core::state::{StateUpdate, UpdateOp};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Create the default profile set.
pub fn default_profiles() -> Vec<RawProfile> {
    vec![base_profile(), principal_profile(), researcher_profile()]
}

fn static_segment(id: &str, order: i64, content: &str) -> PromptSegment {
    PromptSegment {
        id: id.to_string(),
        kind: SegmentKind::StaticText,
        order,
        content: Some(content.to_string()),
        source_state_path: None,
        ingestor: None,
        params: Value::Null,
        condition: None,
    }
}

fn state_segment(
    id: &str,
    order: i64,
    path: &str,
    ingestor: &str,
    title: &str,
    condition: Option<&str>,
) -> PromptSegment {
    PromptSegment {
        id: id.to_string(),
        kind: SegmentKind::StateValue,
        order,
        content: None,
        source_state_path: Some(path.to_string()),
        ingestor: Some(ingestor.to_string()),
        params: json!({ "title": title }),
        condition: condition.map(String::from),
    }
}

fn base_profile() -> RawProfile {
    RawProfile {
        name: "Base_Agent".to_string(),
        profile_type: None,
        base_profile: None,
        description_for_human: None,
        llm_config_ref: Some("default".to_string()),
        tool_access_policy: None,
        system_prompt_construction: SystemPromptConstruction::default(),
        text_definitions: BTreeMap::from([
            (
                "self_reflection_directive".to_string(),
                "Your previous response contained no content and no tool call. Reflect on \
                 the task state above, then either call a tool or state your conclusion \
                 explicitly. Silence is not an option."
                    .to_string(),
            ),
            (
                "replan_guidance".to_string(),
                "Progress has stalled for several turns. Re-read the work module status, \
                 revise the plan with manage_work_modules if modules are mis-scoped, and \
                 dispatch the next pending module."
                    .to_string(),
            ),
        ]),
        pre_turn_observers: Vec::new(),
        post_turn_observers: vec![
            ObserverRule {
                id: "reset_stall_counters".to_string(),
                condition: "v['state.last_turn.had_tool_call']".to_string(),
                action: ObserverAction::UpdateState {
                    updates: vec![
                        StateUpdate {
                            op: UpdateOp::Set,
                            path: "state.flags.consecutive_no_tool_call_count".to_string(),
                            value: json!(0),
                        },
                        StateUpdate {
                            op: UpdateOp::Set,
                            path: "state.flags.consecutive_no_progress_turns".to_string(),
                            value: json!(0),
                        },
                    ],
                },
            },
            // A fully silent turn (no content, no tool call) feeds the
            // meltdown counter; any turn without a tool call feeds the
            // slower-burning stall counter.
            ObserverRule {
                id: "count_silent_turns".to_string(),
                condition: "not v['state.last_turn.had_tool_call'] and v['state.last_turn.content_empty']"
                    .to_string(),
                action: ObserverAction::UpdateState {
                    updates: vec![StateUpdate {
                        op: UpdateOp::Increment,
                        path: "state.flags.consecutive_no_tool_call_count".to_string(),
                        value: json!(1),
                    }],
                },
            },
            ObserverRule {
                id: "count_unproductive_turns".to_string(),
                condition: "not v['state.last_turn.had_tool_call']".to_string(),
                action: ObserverAction::UpdateState {
                    updates: vec![StateUpdate {
                        op: UpdateOp::Increment,
                        path: "state.flags.consecutive_no_progress_turns".to_string(),
                        value: json!(1),
                    }],
                },
            },
            ObserverRule {
                id: "fail_after_repeated_silence".to_string(),
                condition: "v['state.flags.consecutive_no_tool_call_count'] > 2".to_string(),
                action: ObserverAction::EndAgentTurn {
                    outcome: RuleOutcome::Error,
                    error_message: Some("failed to make progress".to_string()),
                },
            },
        ],
        flow_decider: vec![
            DeciderRule {
                id: "end_on_llm_error".to_string(),
                condition: "v['state.last_turn.llm_error']".to_string(),
                action: DeciderAction::EndAgentTurn {
                    outcome: RuleOutcome::Error,
                    error_message: Some("LLM call failed".to_string()),
                },
            },
            DeciderRule {
                id: "reflect_on_silent_turn".to_string(),
                condition: "v['state.last_turn.content_empty'] and not v['state.last_turn.had_tool_call']"
                    .to_string(),
                action: DeciderAction::LoopWithInboxItem {
                    content_key: "self_reflection_directive".to_string(),
                },
            },
            DeciderRule {
                id: "default_continue".to_string(),
                condition: "True".to_string(),
                action: DeciderAction::ContinueWithTool,
            },
        ],
    }
}

fn principal_profile() -> RawProfile {
    RawProfile {
        name: "Principal".to_string(),
        profile_type: Some(ProfileType::Principal),
        base_profile: Some("Base_Agent".to_string()),
        description_for_human: Some(
            "Plans the research, dispatches Associates, reviews deliverables, writes the report."
                .to_string(),
        ),
        llm_config_ref: None,
        tool_access_policy: Some(ToolAccessPolicy {
            allowed_toolsets: vec![
                "planning".to_string(),
                "dispatch".to_string(),
                "reporting".to_string(),
            ],
            allowed_individual_tools: vec!["finish_flow".to_string()],
        }),
        system_prompt_construction: SystemPromptConstruction {
            system_prompt_segments: vec![
                static_segment("identity", 100, PRINCIPAL_PROMPT),
                state_segment(
                    "work_modules",
                    300,
                    "team.work_modules",
                    "work_modules",
                    "### Current Work Modules Status",
                    None,
                ),
                state_segment(
                    "available_associates",
                    400,
                    "team.profiles_list_instance_ids",
                    "available_associates",
                    "### Available Associate Agent Profiles",
                    None,
                ),
                PromptSegment {
                    id: "tools".to_string(),
                    kind: SegmentKind::ToolDescription,
                    order: 500,
                    content: None,
                    source_state_path: None,
                    ingestor: None,
                    params: Value::Null,
                    condition: None,
                },
                PromptSegment {
                    id: "tool_context".to_string(),
                    kind: SegmentKind::ToolContributedContext,
                    order: 600,
                    content: None,
                    source_state_path: None,
                    ingestor: None,
                    params: Value::Null,
                    condition: None,
                },
            ],
        },
        text_definitions: BTreeMap::new(),
        pre_turn_observers: vec![
            ObserverRule {
                id: "stall_replan".to_string(),
                condition: "v['state.flags.consecutive_no_progress_turns'] >= 3".to_string(),
                action: ObserverAction::AddToInbox {
                    item: InboxSpec {
                        ingestor_id: "templated_content".to_string(),
                        payload: json!({ "content_key": "replan_guidance" }),
                        consumption_policy: None,
                    },
                },
            },
            ObserverRule {
                id: "stall_replan_reset".to_string(),
                condition: "v['state.flags.consecutive_no_progress_turns'] >= 3".to_string(),
                action: ObserverAction::UpdateState {
                    updates: vec![StateUpdate {
                        op: UpdateOp::Set,
                        path: "state.flags.consecutive_no_progress_turns".to_string(),
                        value: json!(0),
                    }],
                },
            },
        ],
        post_turn_observers: Vec::new(),
        flow_decider: Vec::new(),
    }
}

fn researcher_profile() -> RawProfile {
    RawProfile {
        name: "Associate_Researcher".to_string(),
        profile_type: Some(ProfileType::Associate),
        base_profile: Some("Base_Agent".to_string()),
        description_for_human: Some(
            "General-purpose researcher: works one module from its briefing and submits a \
             findings summary."
                .to_string(),
        ),
        llm_config_ref: None,
        tool_access_policy: Some(ToolAccessPolicy {
            allowed_toolsets: vec!["submission".to_string()],
            allowed_individual_tools: Vec::new(),
        }),
        system_prompt_construction: SystemPromptConstruction {
            system_prompt_segments: vec![
                static_segment("identity", 100, RESEARCHER_PROMPT),
                PromptSegment {
                    id: "tools".to_string(),
                    kind: SegmentKind::ToolDescription,
                    order: 500,
                    content: None,
                    source_state_path: None,
                    ingestor: None,
                    params: Value::Null,
                    condition: None,
                },
            ],
        },
        text_definitions: BTreeMap::new(),
        pre_turn_observers: Vec::new(),
        post_turn_observers: Vec::new(),
        flow_decider: Vec::new(),
    }
}

const PRINCIPAL_PROMPT: &str = "\
You are the Principal agent of a research team. Your job is to decompose \
the user's request into work modules, delegate them to Associate agents, \
review their deliverables, and synthesize the final report.

Rules:
1. Break the request into clear, independent work modules with \
   manage_work_modules before dispatching anything.
2. Assign each module to the most appropriate Associate profile via \
   dispatch_submodules; give each assignment concrete instructions.
3. Review deliverables when a dispatch returns; mark modules completed or \
   send them back with revised instructions.
4. Never research yourself — delegate to Associates.
5. When every module is completed, write the final synthesis with \
   generate_markdown_report, then call finish_flow.
";

const RESEARCHER_PROMPT: &str = "\
You are an Associate researcher. A briefing with your assignment and any \
shared context is injected below. Work the assignment, then submit your \
findings with generate_message_summary. Submitting ends your task; make \
the summary self-contained.
";

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resolver::ProfileStore;

    #[test]
    fn test_default_profiles_resolve() {
        let store = ProfileStore::from_raw(default_profiles());
        let principal = store.resolve("Principal").unwrap();
        assert_eq!(principal.profile_type, ProfileType::Principal);
        let researcher = store.resolve("Associate_Researcher").unwrap();
        assert_eq!(researcher.profile_type, ProfileType::Associate);
    }

    #[test]
    fn test_principal_inherits_base_policy() {
        let store = ProfileStore::from_raw(default_profiles());
        let principal = store.resolve("Principal").unwrap();
        // Decider comes from the base, catch-all last.
        assert_eq!(principal.flow_decider.last().unwrap().condition, "True");
        // Stall text definitions are inherited.
        assert!(principal.text_definition("replan_guidance").is_some());
        assert!(principal
            .tool_access_policy
            .allowed_toolsets
            .contains(&"dispatch".to_string()));
    }

    #[test]
    fn test_associate_names() {
        let store = ProfileStore::from_raw(default_profiles());
        assert_eq!(store.associate_names(), vec!["Associate_Researcher".to_string()]);
    }

    #[test]
    fn test_default_profiles_roundtrip_through_toml() {
        for profile in default_profiles() {
            let text = toml::to_string(&profile).unwrap();
            let back: RawProfile = toml::from_str(&text).unwrap();
            assert_eq!(back.name, profile.name);
        }
    }
}
