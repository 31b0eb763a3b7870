//! Execution of declarative observer and flow-decider rules. Rules are
//! data; this module is the closed-variant interpreter over their actions.

use quorum_core::expr::eval_condition;
use quorum_core::state::apply_update_to_map;
use quorum_core::{
    combined_snapshot, ConsumptionPolicy, FlowOutcome, FlowState, InboxItem, QuorumResult,
    SharedTeamState,
};
use quorum_profile::{DeciderAction, DeciderRule, ObserverAction, ObserverRule, RuleOutcome};
use quorum_core::QuorumError;
use serde_json::Value;
use tracing::{debug, warn};

/// What an observer pass concluded.
#[derive(Debug)]
pub(crate) enum ObserverVerdict {
    Proceed,
    EndTurn {
        outcome: FlowOutcome,
        error: Option<String>,
    },
}

/// What the flow decider chose.
#[derive(Debug)]
pub(crate) enum Decision {
    Continue,
    LoopWithInbox(String),
    End {
        outcome: FlowOutcome,
        error: Option<String>,
    },
}

pub(crate) fn rule_outcome(outcome: RuleOutcome) -> FlowOutcome {
    match outcome {
        RuleOutcome::Success => FlowOutcome::Success,
        RuleOutcome::Error => FlowOutcome::Error,
    }
}

/// Runs one observer list in order. Each rule sees the state as left by the
/// rules before it. The first `end_agent_turn` action wins.
pub(crate) async fn apply_observers(
    rules: &[ObserverRule],
    state: &mut FlowState,
    team: &SharedTeamState,
) -> QuorumResult<ObserverVerdict> {
    for rule in rules {
        let snapshot = {
            let team = team.lock().await;
            combined_snapshot(state, &team)
        };
        if !eval_condition(&rule.condition, &snapshot)? {
            continue;
        }
        debug!(observer = %rule.id, "Observer condition matched");

        match &rule.action {
            ObserverAction::AddToInbox { item } => {
                state.inbox.push_back(InboxItem {
                    source: rule.id.clone(),
                    payload: item.payload.clone(),
                    ingestor_id: item.ingestor_id.clone(),
                    consumption_policy: item
                        .consumption_policy
                        .unwrap_or(ConsumptionPolicy::ConsumeOnRead),
                });
            }
            ObserverAction::UpdateState { updates } => {
                for update in updates {
                    apply_state_update(state, team, update).await;
                }
            }
            ObserverAction::EndAgentTurn {
                outcome,
                error_message,
            } => {
                return Ok(ObserverVerdict::EndTurn {
                    outcome: rule_outcome(*outcome),
                    error: error_message.clone(),
                });
            }
        }
    }
    Ok(ObserverVerdict::Proceed)
}

/// Writable state roots: `state.flags.*` on the flow, and
/// `team.shared_context.*` on the team tree.
async fn apply_state_update(
    state: &mut FlowState,
    team: &SharedTeamState,
    update: &quorum_core::StateUpdate,
) {
    if let Some(rest) = update.path.strip_prefix("state.flags.") {
        let segments: Vec<&str> = rest.split('.').collect();
        apply_update_to_map(&mut state.flags, &segments, update.op, &update.value);
    } else if let Some(rest) = update.path.strip_prefix("team.shared_context.") {
        let segments: Vec<&str> = rest.split('.').collect();
        let mut team = team.lock().await;
        apply_update_to_map(&mut team.shared_context, &segments, update.op, &update.value);
    } else {
        warn!(path = %update.path, "update_state path outside writable roots, ignored");
    }
}

/// Walks the decider rules in order; the first matching condition decides.
/// Profiles carry a catch-all `True` rule, so falling through is a profile
/// authoring bug surfaced as an engine error.
pub(crate) fn decide(rules: &[DeciderRule], snapshot: &Value) -> QuorumResult<Decision> {
    for rule in rules {
        if !eval_condition(&rule.condition, snapshot)? {
            continue;
        }
        debug!(rule = %rule.id, "Flow decider rule matched");
        return Ok(match &rule.action {
            DeciderAction::ContinueWithTool => Decision::Continue,
            DeciderAction::LoopWithInboxItem { content_key } => {
                Decision::LoopWithInbox(content_key.clone())
            }
            DeciderAction::EndAgentTurn {
                outcome,
                error_message,
            } => Decision::End {
                outcome: rule_outcome(*outcome),
                error: error_message.clone(),
            },
        });
    }
    Err(QuorumError::Engine(
        "flow decider matched no rule (missing catch-all)".into(),
    ))
}
