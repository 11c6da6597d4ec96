//! Agent event types and the child-agent event sink
//!
//! The runtime surfaces its execution as a typed event stream; when a tool
//! spawns a subordinate agent, the child's events are pushed into a bounded
//! sink owned by the request and drained by the orchestrator at safe points.

use rem_llm::FinishReason;
use serde_json::Value;
use tokio::sync::mpsc;

/// Default bound for a request's child-event sink.
pub const EVENT_SINK_CAPACITY: usize = 256;

/// One event from a subordinate agent, retagged with its name.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent {
    pub agent_name: String,
    pub kind: ChildEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChildEventKind {
    ToolStart {
        tool_name: String,
        arguments: Option<Value>,
    },
    Content(String),
    ToolResult {
        result: Value,
    },
}

/// Bounded, single-consumer sink for child-agent events.
///
/// Sends never block the child: on overflow the event is dropped with a
/// warning, which degrades relay fidelity but not correctness (the final
/// tool result still flows back through the tool call itself).
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ChildEvent>,
}

impl EventSink {
    /// Create a sink and its single consumer.
    pub fn channel() -> (EventSink, mpsc::Receiver<ChildEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_SINK_CAPACITY);
        (EventSink { tx }, rx)
    }

    pub fn push(&self, event: ChildEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!(error = %e, "child event sink full, dropping event");
        }
    }
}

/// One event in an agent run, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Text delta from the agent itself.
    ContentDelta(String),
    /// Internal rationale from reasoning models.
    Reasoning(String),
    ToolCallStarted {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolCallCompleted {
        id: String,
        name: String,
        /// Result truncated for display; full results go back to the model.
        result_excerpt: String,
    },
    /// Relayed child-agent event.
    Child(ChildEvent),
    Done {
        finish_reason: FinishReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.push(ChildEvent {
            agent_name: "intake".to_string(),
            kind: ChildEventKind::Content("a".to_string()),
        });
        sink.push(ChildEvent {
            agent_name: "intake".to_string(),
            kind: ChildEventKind::Content("b".to_string()),
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, ChildEventKind::Content("a".to_string()));
        assert_eq!(second.kind, ChildEventKind::Content("b".to_string()));
    }

    #[tokio::test]
    async fn test_sink_overflow_drops_not_blocks() {
        let (sink, mut rx) = EventSink::channel();
        for n in 0..(EVENT_SINK_CAPACITY + 50) {
            sink.push(ChildEvent {
                agent_name: "noisy".to_string(),
                kind: ChildEventKind::Content(n.to_string()),
            });
        }
        // The first CAPACITY events survive; the push side never blocked.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, EVENT_SINK_CAPACITY);
    }
}
