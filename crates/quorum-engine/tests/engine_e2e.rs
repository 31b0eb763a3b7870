//! End-to-end runs driven by scripted LLM backends: planning, parallel
//! dispatch, deliverable aggregation, stall recovery, and cancellation.

use async_trait::async_trait;
use quorum_core::{
    EngineConfig, EventEnvelope, FlowOutcome, ModuleStatus, QuorumResult, RunEvent, RunOutcome,
};
use quorum_engine::{BackendFactory, Run};
use quorum_llm::{ChatBackend, ChatRequest, LlmConfig, LlmConfigMap, StreamFrame};
use quorum_profile::{default_profiles, ProfileStore};
use quorum_tools::default_registry;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type Responder = Arc<dyn Fn(u32, &ChatRequest) -> Vec<StreamFrame> + Send + Sync>;

/// Backend whose nth call is answered by a responder closure. An empty
/// frame list means "hang until the caller goes away".
struct ScriptedBackend {
    responder: Responder,
    calls: AtomicU32,
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn open_stream(
        &self,
        request: &ChatRequest,
    ) -> QuorumResult<mpsc::Receiver<QuorumResult<StreamFrame>>> {
        let turn = self.calls.fetch_add(1, Ordering::SeqCst);
        let frames = (self.responder)(turn, request);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            if frames.is_empty() {
                tx.closed().await;
                return;
            }
            for frame in frames {
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

fn factory(principal: Responder, associate: Responder) -> BackendFactory {
    Arc::new(move |profile_name: &str| {
        let responder = if profile_name == "Principal" {
            principal.clone()
        } else {
            associate.clone()
        };
        Box::new(ScriptedBackend {
            responder,
            calls: AtomicU32::new(0),
        }) as Box<dyn ChatBackend>
    })
}

fn build_run(config: EngineConfig, principal: Responder, associate: Responder) -> Run {
    let profiles = Arc::new(ProfileStore::from_raw(default_profiles()));
    let registry = Arc::new(default_registry());
    let llm_configs: LlmConfigMap = HashMap::from([(
        "default".to_string(),
        LlmConfig {
            endpoint_url: "mock://".into(),
            model: "scripted".into(),
            api_key: String::new(),
            timeout_ms: 5_000,
            max_retries: 0,
            temperature: None,
            max_tokens: None,
        },
    )]);
    Run::new(config, profiles, registry, Arc::new(llm_configs))
        .with_backend_factory(factory(principal, associate))
}

// --- frame helpers ---

fn text_turn(text: &str) -> Vec<StreamFrame> {
    vec![
        StreamFrame::ContentDelta { text: text.into() },
        StreamFrame::Done,
    ]
}

fn reasoning_turn(text: &str) -> Vec<StreamFrame> {
    vec![
        StreamFrame::ReasoningDelta { text: text.into() },
        StreamFrame::Done,
    ]
}

fn tool_turn(calls: &[(&str, Value)]) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    for (i, (name, args)) in calls.iter().enumerate() {
        let id = format!("call_{i}");
        frames.push(StreamFrame::ToolCallStart {
            id: id.clone(),
            name: (*name).to_string(),
        });
        frames.push(StreamFrame::ToolCallDelta {
            id,
            arguments_delta: args.to_string(),
        });
    }
    frames.push(StreamFrame::Done);
    frames
}

fn submit_turn(findings: &str) -> Vec<StreamFrame> {
    tool_turn(&[(
        "generate_message_summary",
        json!({ "current_associate_findings": findings }),
    )])
}

/// Module ids (`wm_` + 8 hex chars) mentioned anywhere in the request's
/// message history, in first-seen order.
fn module_ids_in(request: &ChatRequest) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for message in &request.messages {
        let text = &message.content;
        let mut search_from = 0;
        while let Some(found) = text[search_from..].find("wm_") {
            let start = search_from + found;
            let tail: String = text[start + 3..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            search_from = start + 3;
            if tail.len() >= 8 {
                let id = format!("wm_{}", &tail[..8]);
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

fn assignment(module_id: &str) -> Value {
    json!({
        "module_id_to_assign": module_id,
        "agent_profile_logical_name": "Associate_Researcher",
        "assigned_role_name": "researcher",
        "assignment_specific_instructions": "research the module topic"
    })
}

/// Wraps a responder so every request's message history is recorded.
fn recording(inner: Responder) -> (Responder, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let wrapped: Responder = Arc::new(move |turn, request| {
        let joined: Vec<String> = request.messages.iter().map(|m| m.content.clone()).collect();
        sink.lock().unwrap().push(joined.join("\n---\n"));
        inner(turn, request)
    });
    (wrapped, log)
}

async fn collect_until_run_end(
    mut rx: mpsc::Receiver<EventEnvelope>,
) -> Vec<EventEnvelope> {
    let mut events = Vec::new();
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event stream stalled")
            .expect("event stream closed before RunEnd");
        let is_end = matches!(envelope.event, RunEvent::RunEnd { .. });
        events.push(envelope);
        if is_end {
            return events;
        }
    }
}

fn index_of(events: &[EventEnvelope], predicate: impl Fn(&RunEvent) -> bool) -> Option<usize> {
    events.iter().position(|e| predicate(&e.event))
}

// --- scenarios ---

#[tokio::test]
async fn single_module_happy_path() {
    let principal: Responder = Arc::new(|turn, request| match turn {
        0 => tool_turn(&[(
            "manage_work_modules",
            json!({"actions": [{"action": "add", "name": "Research T", "description": "summarize topic T"}]}),
        )]),
        1 => {
            let id = module_ids_in(request).pop().expect("module id in history");
            tool_turn(&[("dispatch_submodules", json!({ "assignments": [assignment(&id)] }))])
        }
        2 => {
            let id = module_ids_in(request)[0].clone();
            tool_turn(&[(
                "manage_work_modules",
                json!({"actions": [{"action": "update", "module_id": id, "status": "completed"}]}),
            )])
        }
        _ => tool_turn(&[
            (
                "generate_markdown_report",
                json!({"principal_final_synthesis": "# Report on T\nAll findings reviewed."}),
            ),
            ("finish_flow", json!({})),
        ]),
    });
    let associate: Responder = Arc::new(|_, _| submit_turn("T is well covered in the literature."));

    let run = build_run(EngineConfig::default(), principal, associate);
    let events_rx = run.events().subscribe(1024);
    let result = run.execute("Summarize topic T").await;

    assert_eq!(result.outcome, RunOutcome::Success);
    assert_eq!(
        result.final_report.as_deref(),
        Some("# Report on T\nAll findings reviewed.")
    );

    let events = collect_until_run_end(events_rx).await;
    let modules_update = index_of(&events, |e| matches!(e, RunEvent::WorkModulesUpdate { .. }))
        .expect("WorkModulesUpdate");
    let dispatch_start =
        index_of(&events, |e| matches!(e, RunEvent::DispatchStart { .. })).expect("DispatchStart");
    let child_end = index_of(&events, |e| {
        matches!(e, RunEvent::FlowEnd { agent_id, .. } if agent_id != "principal")
    })
    .expect("child FlowEnd");
    let dispatch_complete = index_of(&events, |e| matches!(e, RunEvent::DispatchComplete { .. }))
        .expect("DispatchComplete");
    let run_end = index_of(&events, |e| matches!(e, RunEvent::RunEnd { .. })).expect("RunEnd");

    assert!(modules_update < dispatch_start);
    assert!(dispatch_start < child_end);
    assert!(child_end < dispatch_complete);
    assert!(dispatch_complete < run_end);

    let team = run.team();
    let team = team.lock().await;
    let module = team.work_modules.values().next().expect("one module");
    assert_eq!(module.status, ModuleStatus::Completed);
    assert_eq!(module.deliverables.len(), 1);
    assert!(!module.deliverables[0].is_error);
}

#[tokio::test]
async fn parallel_dispatch_aggregates_all_children() {
    let principal: Responder = Arc::new(|turn, request| match turn {
        0 => tool_turn(&[(
            "manage_work_modules",
            json!({"actions": [
                {"action": "add", "name": "m1", "description": "a"},
                {"action": "add", "name": "m2", "description": "b"},
                {"action": "add", "name": "m3", "description": "c"}
            ]}),
        )]),
        1 => {
            let ids = module_ids_in(request);
            assert_eq!(ids.len(), 3, "expected 3 module ids, saw {ids:?}");
            let assignments: Vec<Value> = ids.iter().map(|id| assignment(id)).collect();
            tool_turn(&[("dispatch_submodules", json!({ "assignments": assignments }))])
        }
        _ => tool_turn(&[("finish_flow", json!({}))]),
    });
    let associate: Responder = Arc::new(|_, _| submit_turn("module findings"));

    let mut config = EngineConfig::default();
    config.max_concurrent_child_flows = 2; // three children must queue through two slots
    let run = build_run(config, principal, associate);
    let events_rx = run.events().subscribe(2048);
    let result = run.execute("Research three things").await;
    assert_eq!(result.outcome, RunOutcome::Success);

    let events = collect_until_run_end(events_rx).await;
    let child_ends = events
        .iter()
        .filter(|e| {
            matches!(&e.event, RunEvent::FlowEnd { agent_id, outcome, .. }
                if agent_id != "principal" && *outcome == FlowOutcome::Success)
        })
        .count();
    assert_eq!(child_ends, 3);

    let dispatch_completes: Vec<&EventEnvelope> = events
        .iter()
        .filter(|e| matches!(e.event, RunEvent::DispatchComplete { .. }))
        .collect();
    assert_eq!(dispatch_completes.len(), 1);
    if let RunEvent::DispatchComplete { outcomes, .. } = &dispatch_completes[0].event {
        assert_eq!(outcomes.as_object().unwrap().len(), 3);
    }

    let team = run.team();
    let team = team.lock().await;
    assert_eq!(team.work_modules.len(), 3);
    for module in team.work_modules.values() {
        assert_eq!(module.status, ModuleStatus::PendingReview);
        assert_eq!(module.deliverables.len(), 1);
    }
}

#[tokio::test]
async fn dispatching_completed_module_is_rejected_without_state_change() {
    let principal: Responder = Arc::new(|turn, request| match turn {
        0 => tool_turn(&[(
            "manage_work_modules",
            json!({"actions": [{"action": "add", "name": "done already", "description": ""}]}),
        )]),
        1 => {
            let id = module_ids_in(request)[0].clone();
            tool_turn(&[(
                "manage_work_modules",
                json!({"actions": [{"action": "update", "module_id": id, "status": "completed"}]}),
            )])
        }
        2 => {
            let id = module_ids_in(request)[0].clone();
            tool_turn(&[("dispatch_submodules", json!({ "assignments": [assignment(&id)] }))])
        }
        _ => tool_turn(&[("finish_flow", json!({}))]),
    });
    let associate: Responder = Arc::new(|_, _| submit_turn("should never run"));

    let run = build_run(EngineConfig::default(), principal, associate);
    let events_rx = run.events().subscribe(1024);
    let result = run.execute("try an illegal dispatch").await;
    assert_eq!(result.outcome, RunOutcome::Success);

    let events = collect_until_run_end(events_rx).await;
    assert!(
        index_of(&events, |e| matches!(e, RunEvent::DispatchStart { .. })).is_none(),
        "rejected dispatch must not start"
    );
    let rejected_result = events.iter().any(|e| {
        matches!(&e.event, RunEvent::ToolResult { tool_name, is_error, .. }
            if tool_name == "dispatch_submodules" && *is_error)
    });
    assert!(rejected_result);

    let team = run.team();
    let team = team.lock().await;
    let module = team.work_modules.values().next().unwrap();
    assert_eq!(module.status, ModuleStatus::Completed);
    assert!(module.deliverables.is_empty());

    // The rejection reason reached the Principal's history.
    let ledger = run.flow_ledger();
    let records = ledger.lock().unwrap();
    let principal_record = records.iter().find(|r| r.flow_id == "principal").unwrap();
    assert!(principal_record
        .messages
        .iter()
        .any(|m| m.content.contains("module not dispatchable")));
}

#[tokio::test]
async fn duplicate_module_in_one_batch_is_rejected() {
    let principal: Responder = Arc::new(|turn, request| match turn {
        0 => tool_turn(&[(
            "manage_work_modules",
            json!({"actions": [{"action": "add", "name": "m", "description": ""}]}),
        )]),
        1 => {
            let id = module_ids_in(request)[0].clone();
            tool_turn(&[(
                "dispatch_submodules",
                json!({ "assignments": [assignment(&id), assignment(&id)] }),
            )])
        }
        _ => tool_turn(&[("finish_flow", json!({}))]),
    });
    let associate: Responder = Arc::new(|_, _| submit_turn("unused"));

    let run = build_run(EngineConfig::default(), principal, associate);
    let result = run.execute("double dispatch").await;
    assert_eq!(result.outcome, RunOutcome::Success);

    let team = run.team();
    let team = team.lock().await;
    let module = team.work_modules.values().next().unwrap();
    assert_eq!(module.status, ModuleStatus::Pending, "no state change on rejection");
}

#[tokio::test]
async fn reasoning_only_turn_recovers_via_self_reflection() {
    let inner: Responder = Arc::new(|turn, _| match turn {
        0 => reasoning_turn("analyzing…"),
        _ => tool_turn(&[("finish_flow", json!({}))]),
    });
    let (principal, log) = recording(inner);
    let associate: Responder = Arc::new(|_, _| submit_turn("unused"));

    let run = build_run(EngineConfig::default(), principal, associate);
    let result = run.execute("think then act").await;

    // The reasoning-only turn did not kill the flow…
    assert_eq!(result.outcome, RunOutcome::Success);
    // …and the next prompt carried the self-reflection directive.
    let requests = log.lock().unwrap();
    assert!(requests.len() >= 2);
    assert!(requests[1].contains("Silence is not an option"));
}

#[tokio::test]
async fn repeated_empty_turns_end_the_flow_with_progress_error() {
    let principal: Responder = Arc::new(|_, _| reasoning_turn("…"));
    let associate: Responder = Arc::new(|_, _| submit_turn("unused"));

    let run = build_run(EngineConfig::default(), principal, associate);
    let result = run.execute("never act").await;
    assert_eq!(result.outcome, RunOutcome::Error);
    assert_eq!(result.error.as_deref(), Some("failed to make progress"));
}

#[tokio::test]
async fn stalled_principal_gets_replan_guidance() {
    let inner: Responder = Arc::new(|turn, _| match turn {
        0 | 1 | 2 => text_turn("still weighing the options"),
        _ => tool_turn(&[("finish_flow", json!({}))]),
    });
    let (principal, log) = recording(inner);
    let associate: Responder = Arc::new(|_, _| submit_turn("unused"));

    let run = build_run(EngineConfig::default(), principal, associate);
    let result = run.execute("make a plan").await;
    assert_eq!(result.outcome, RunOutcome::Success);

    let requests = log.lock().unwrap();
    assert!(requests.len() >= 4);
    assert!(
        requests[3].contains("Progress has stalled"),
        "turn 4 prompt should carry the re-plan directive"
    );
    assert!(
        !requests[2].contains("Progress has stalled"),
        "directive must not fire before three stalled turns"
    );
}

#[tokio::test]
async fn cancellation_stops_children_within_grace_period() {
    let principal: Responder = Arc::new(|turn, request| match turn {
        0 => tool_turn(&[(
            "manage_work_modules",
            json!({"actions": [{"action": "add", "name": "slow", "description": ""}]}),
        )]),
        1 => {
            let id = module_ids_in(request)[0].clone();
            tool_turn(&[("dispatch_submodules", json!({ "assignments": [assignment(&id)] }))])
        }
        _ => tool_turn(&[("finish_flow", json!({}))]),
    });
    // The associate's LLM call hangs forever; only cancellation frees it.
    let associate: Responder = Arc::new(|_, _| Vec::new());

    let run = build_run(EngineConfig::default(), principal, associate);
    let mut events_rx = run.events().subscribe(1024);
    let mut run_task = run.start("cancel me");

    // Fire the cancel as soon as the dispatch begins.
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(10), events_rx.recv())
            .await
            .expect("no DispatchStart seen")
            .expect("bus closed");
        if matches!(envelope.event, RunEvent::DispatchStart { .. }) {
            run.cancel();
            break;
        }
    }

    // Everything must wind down within the 2 s grace bound.
    let result = tokio::time::timeout(Duration::from_secs(2), &mut run_task)
        .await
        .expect("run did not stop within the grace period")
        .expect("run task panicked");
    assert_eq!(result.outcome, RunOutcome::Cancelled);

    let events = collect_until_run_end(events_rx).await;
    let child_cancelled = events.iter().any(|e| {
        matches!(&e.event, RunEvent::FlowEnd { agent_id, outcome, .. }
            if agent_id != "principal" && *outcome == FlowOutcome::Cancelled)
    });
    assert!(child_cancelled);
    let dispatch_complete = events
        .iter()
        .find(|e| matches!(e.event, RunEvent::DispatchComplete { .. }))
        .expect("partial outcomes still aggregate");
    if let RunEvent::DispatchComplete { outcomes, .. } = &dispatch_complete.event {
        for outcome in outcomes.as_object().unwrap().values() {
            assert_eq!(outcome["execution_status"], "cancelled");
        }
    }
}

#[tokio::test]
async fn max_turns_cap_terminates_runaway_flow() {
    let principal: Responder = Arc::new(|_, _| {
        tool_turn(&[(
            "manage_work_modules",
            json!({"actions": [{"action": "add", "name": "again", "description": ""}]}),
        )])
    });
    let associate: Responder = Arc::new(|_, _| submit_turn("unused"));

    let mut config = EngineConfig::default();
    config.max_turns_per_flow = 2;
    let run = build_run(config, principal, associate);
    let result = run.execute("loop forever").await;
    assert_eq!(result.outcome, RunOutcome::Error);
    assert_eq!(result.error.as_deref(), Some("max_turns_exceeded"));
}

#[tokio::test]
async fn second_dispatch_inherits_deliverables_messages_and_shared_context() {
    let principal: Responder = Arc::new(|turn, request| match turn {
        0 => tool_turn(&[(
            "manage_work_modules",
            json!({"actions": [{"action": "add", "name": "first leg", "description": ""}]}),
        )]),
        1 => {
            let id = module_ids_in(request)[0].clone();
            tool_turn(&[("dispatch_submodules", json!({ "assignments": [assignment(&id)] }))])
        }
        2 => tool_turn(&[(
            "manage_work_modules",
            json!({"actions": [{"action": "add", "name": "second leg", "description": ""}]}),
        )]),
        3 => {
            let ids = module_ids_in(request);
            let first = ids[0].clone();
            let second = ids[1].clone();
            let mut spec = assignment(&second);
            spec["inherit_deliverables_from"] = json!([first]);
            spec["inherit_messages_from"] = json!([first]);
            tool_turn(&[(
                "dispatch_submodules",
                json!({
                    "assignments": [spec],
                    "shared_context_for_all_assignments": { "focus_year": "2024" }
                }),
            )])
        }
        _ => tool_turn(&[("finish_flow", json!({}))]),
    });

    let inner: Responder = Arc::new(|_, _| submit_turn("first leg findings"));
    let (associate, associate_log) = recording(inner);

    let run = build_run(EngineConfig::default(), principal, associate);
    let result = run.execute("two-leg research").await;
    assert_eq!(result.outcome, RunOutcome::Success);

    let requests = associate_log.lock().unwrap();
    assert_eq!(requests.len(), 2, "two associate flows ran");
    let second_briefing = &requests[1];
    assert!(second_briefing.contains("Shared Context"));
    assert!(second_briefing.contains("2024"));
    assert!(second_briefing.contains("Deliverables From Prior Modules"));
    assert!(second_briefing.contains("first leg findings"));
    assert!(second_briefing.contains("<message_history_json>"));
}

#[tokio::test]
async fn state_dump_serializes_team_and_flows() {
    let dir = tempfile::tempdir().unwrap();
    let dump_path = dir.path().join("dump/run_state.json");

    let principal: Responder = Arc::new(|turn, _| match turn {
        0 => tool_turn(&[(
            "manage_work_modules",
            json!({"actions": [{"action": "add", "name": "m", "description": ""}]}),
        )]),
        _ => tool_turn(&[("finish_flow", json!({}))]),
    });
    let associate: Responder = Arc::new(|_, _| submit_turn("unused"));

    let mut config = EngineConfig::default();
    config.state_dump_enabled = true;
    config.state_dump_path = dump_path.clone();
    let run = build_run(config, principal, associate);
    let result = run.execute("dump me").await;
    assert_eq!(result.outcome, RunOutcome::Success);

    let raw = std::fs::read_to_string(&dump_path).unwrap();
    let dump: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(dump["run_id"], json!(run.run_id()));
    assert!(dump["team"]["work_modules"].as_object().unwrap().len() == 1);
    assert!(dump["flows"].as_array().unwrap().iter().any(|f| f["flow_id"] == "principal"));
}
