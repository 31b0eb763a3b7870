//! Per-run event stream: typed events, envelopes, and the broadcast bus.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Which stream a [`RunEvent::LlmChunk`] delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Content,
    Reasoning,
    ToolName,
    ToolArgs,
}

/// Terminal outcome of one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowOutcome {
    Success,
    Error,
    Cancelled,
}

/// Terminal outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Error,
    Cancelled,
}

/// Events published on a run's bus, in publish order per flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A streaming delta from an in-flight LLM call.
    LlmChunk {
        agent_id: String,
        kind: ChunkKind,
        content: String,
    },
    /// The aggregated assistant message for one turn.
    LlmResponse {
        agent_id: String,
        content: String,
        tool_call_count: usize,
    },
    ToolCall {
        agent_id: String,
        call_id: String,
        tool_name: String,
    },
    ToolResult {
        agent_id: String,
        call_id: String,
        tool_name: String,
        is_error: bool,
    },
    /// The work-module table changed; carries the full snapshot.
    WorkModulesUpdate { modules: Value },
    DispatchStart {
        dispatch_id: String,
        module_ids: Vec<String>,
    },
    DispatchComplete {
        dispatch_id: String,
        outcomes: Value,
    },
    FlowEnd {
        agent_id: String,
        outcome: FlowOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RunEnd { outcome: RunOutcome },
}

/// Transport wrapper: run-scoped, bus-assigned monotonic sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub run_id: String,
    pub seq: u64,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub event: RunEvent,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<EventEnvelope>,
}

struct BusInner {
    subscribers: Vec<Subscriber>,
}

/// Per-run publish/subscribe channel.
///
/// Publishing never blocks: each subscriber has a bounded buffer, and a
/// subscriber whose buffer overflows is dropped (its receiver closes) so a
/// slow consumer cannot stall the run.
#[derive(Clone)]
pub struct EventBus {
    run_id: String,
    seq: Arc<AtomicU64>,
    next_subscriber_id: Arc<AtomicU64>,
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            seq: Arc::new(AtomicU64::new(0)),
            next_subscriber_id: Arc::new(AtomicU64::new(0)),
            inner: Arc::new(Mutex::new(BusInner {
                subscribers: Vec::new(),
            })),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Registers a subscriber with the given buffer capacity.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<EventEnvelope> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.push(Subscriber { id, tx });
            debug!(run_id = %self.run_id, subscriber_id = id, "Event bus subscriber added");
        }
        rx
    }

    /// Publishes an event to every live subscriber in sequence order.
    pub fn publish(&self, event: RunEvent) {
        let envelope = EventEnvelope {
            run_id: self.run_id.clone(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            timestamp_ms: Utc::now().timestamp_millis().max(0) as u64,
            event,
        };
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.subscribers.retain(|sub| {
            match sub.tx.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        run_id = %self.run_id,
                        subscriber_id = sub.id,
                        "Dropping slow_consumer event bus subscriber"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.subscribers.len()).unwrap_or(0)
    }
}
