//! The turn engine: pre-turn observers, prompt assembly, the streaming
//! LLM call, tool execution, post-turn observers, and the flow decision.

use crate::flow::FlowRunner;
use crate::ingest::format_tool_result;
use crate::observer::{apply_observers, decide, Decision, ObserverVerdict};
use crate::prompt::PromptAssembler;
use quorum_core::{
    combined_snapshot, ChunkKind, FlowOutcome, Message, QuorumError, QuorumResult, RunEvent,
    TurnFacts,
};
use quorum_llm::{AssistantTurn, StreamFrame};
use tracing::debug;

/// Outcome of one turn, as seen by the flow runner's loop.
#[derive(Debug)]
pub(crate) enum TurnVerdict {
    Continue,
    LoopWithInbox(String),
    End {
        outcome: FlowOutcome,
        error: Option<String>,
    },
}

impl FlowRunner {
    pub(crate) async fn run_turn(&mut self) -> QuorumResult<TurnVerdict> {
        // 1. Pre-turn observers.
        if let ObserverVerdict::EndTurn { outcome, error } = apply_observers(
            &self.profile.pre_turn_observers,
            &mut self.state,
            &self.handles.team,
        )
        .await?
        {
            return Ok(TurnVerdict::End { outcome, error });
        }

        // 2. Assemble the prompt; consumed inbox items leave the inbox.
        let contributed: Vec<String> = self
            .tool_ctx
            .contributed_context
            .lock()
            .map(|mut buffer| buffer.drain(..).collect())
            .unwrap_or_default();
        let request = {
            let team = self.handles.team.lock().await;
            let assembler = PromptAssembler {
                profile: self.profile.as_ref(),
                profiles: self.handles.profiles.as_ref(),
                registry: self.handles.registry.as_ref(),
                ingestors: self.handles.ingestors.as_ref(),
            };
            assembler.assemble(&mut self.state, &team, &contributed)?
        };

        // 3. Streaming LLM call; every frame goes out on the bus.
        let events = self.handles.events.clone();
        let agent_id = self.agent_id.clone();
        let mut on_frame = move |frame: &StreamFrame| {
            let (kind, content) = match frame {
                StreamFrame::ContentDelta { text } => (ChunkKind::Content, text.clone()),
                StreamFrame::ReasoningDelta { text } => (ChunkKind::Reasoning, text.clone()),
                StreamFrame::ToolCallStart { name, .. } => (ChunkKind::ToolName, name.clone()),
                StreamFrame::ToolCallDelta {
                    arguments_delta, ..
                } => (ChunkKind::ToolArgs, arguments_delta.clone()),
                StreamFrame::Done => return,
            };
            events.publish(RunEvent::LlmChunk {
                agent_id: agent_id.clone(),
                kind,
                content,
            });
        };
        let llm_result = self
            .llm
            .complete(&request, &self.handles.cancel, &mut on_frame)
            .await;

        let mut facts = TurnFacts::default();
        let assistant: Option<AssistantTurn> = match llm_result {
            Ok(turn) => {
                if self.handles.cancel.is_cancelled() {
                    return Ok(TurnVerdict::End {
                        outcome: FlowOutcome::Cancelled,
                        error: None,
                    });
                }
                facts.had_tool_call = !turn.tool_calls.is_empty();
                facts.content_empty = turn.content.trim().is_empty();
                facts.reasoning_empty = turn.reasoning_content.trim().is_empty();
                Some(turn)
            }
            Err(QuorumError::Cancelled) => {
                return Ok(TurnVerdict::End {
                    outcome: FlowOutcome::Cancelled,
                    error: None,
                })
            }
            // A fully empty response is recoverable: the decider's
            // self-reflection rule handles it, never success-on-empty.
            Err(QuorumError::EmptyResponse) => {
                debug!(agent_id = %self.agent_id, "Empty LLM response");
                facts.content_empty = true;
                facts.reasoning_empty = true;
                None
            }
            Err(e @ (QuorumError::LlmTimeout(_) | QuorumError::LlmTransport(_))) => {
                facts.content_empty = true;
                facts.reasoning_empty = true;
                facts.llm_error = Some(e.to_string());
                None
            }
            Err(other) => return Err(other),
        };

        // 4. Record the assistant message.
        self.state.current_action = assistant
            .as_ref()
            .and_then(|turn| turn.tool_calls.first().cloned());
        if let Some(turn) = &assistant {
            self.state.messages.push(
                Message::assistant(&turn.content)
                    .with_reasoning(&turn.reasoning_content)
                    .with_tool_calls(turn.tool_calls.clone()),
            );
            self.handles.events.publish(RunEvent::LlmResponse {
                agent_id: self.agent_id.clone(),
                content: turn.content.clone(),
                tool_call_count: turn.tool_calls.len(),
            });
        }

        // 5. Execute tool calls. A tool whose descriptor ends the turn
        // discards the rest of the batch.
        if let Some(turn) = assistant {
            for call in turn.tool_calls {
                if self.handles.cancel.is_cancelled() {
                    break;
                }
                let ends_turn = self
                    .handles
                    .registry
                    .get(&call.name)
                    .map(|tool| tool.descriptor().ends_turn)
                    .unwrap_or(false);

                self.handles.events.publish(RunEvent::ToolCall {
                    agent_id: self.agent_id.clone(),
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                });
                let result = self.handles.registry.invoke(call.clone(), &self.tool_ctx).await;
                self.handles.events.publish(RunEvent::ToolResult {
                    agent_id: self.agent_id.clone(),
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    is_error: result.is_error,
                });
                self.state.messages.push(Message::tool_result(
                    &call.id,
                    format_tool_result(&call.name, &result),
                ));

                if ends_turn {
                    break;
                }
            }
        }

        self.state.last_turn = facts;

        // 6. Post-turn observers: counters, stall detection, meltdowns.
        if let ObserverVerdict::EndTurn { outcome, error } = apply_observers(
            &self.profile.post_turn_observers,
            &mut self.state,
            &self.handles.team,
        )
        .await?
        {
            return Ok(TurnVerdict::End { outcome, error });
        }

        // A tool (submission, finish) may have signalled flow termination.
        if let Some(outcome) = self
            .tool_ctx
            .flow_signal
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
        {
            return Ok(TurnVerdict::End {
                outcome,
                error: None,
            });
        }

        // 7. Flow decider.
        let snapshot = {
            let team = self.handles.team.lock().await;
            combined_snapshot(&self.state, &team)
        };
        Ok(match decide(&self.profile.flow_decider, &snapshot)? {
            Decision::Continue => TurnVerdict::Continue,
            Decision::LoopWithInbox(content_key) => TurnVerdict::LoopWithInbox(content_key),
            Decision::End { outcome, error } => TurnVerdict::End { outcome, error },
        })
    }
}
