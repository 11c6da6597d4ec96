//! Streaming orchestrator
//!
//! Bridges an agent's event stream to the client-facing SSE channel.
//! Content deltas go out as OpenAI-compatible chunks; tool calls,
//! reasoning, metadata, and errors go out as named events; the stream
//! terminates with `data: [DONE]`.
//!
//! Child-agent merging: events a tool pushes into the request's sink are
//! drained at safe points and interleaved into the outer stream, retagged
//! with the child's name. Once any child content has been relayed for the
//! turn, the outer agent's own text deltas are suppressed so the client
//! never sees the same answer twice.

use std::convert::Infallible;

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use rem_agents::{AgentEvent, AgentRuntime, ChildEvent, ChildEventKind, EventSink};
use rem_context::{RequestScope, SessionMessageStore};
use rem_llm::{ChatMessage, FinishReason};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// One SSE frame before serialization: optional event name plus data.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    pub event: Option<String>,
    pub data: String,
}

impl StreamFrame {
    fn chunk(data: Value) -> Self {
        Self {
            event: None,
            data: data.to_string(),
        }
    }

    fn named(event: &str, data: Value) -> Self {
        Self {
            event: Some(event.to_string()),
            data: data.to_string(),
        }
    }

    fn done_marker() -> Self {
        Self {
            event: None,
            data: "[DONE]".to_string(),
        }
    }
}

/// Per-request streaming state.
#[derive(Default)]
struct StreamingState {
    /// Set once any child content delta has been relayed this turn; outer
    /// content is suppressed from then on.
    child_content_streamed: bool,
    responding_agent: Option<String>,
    /// Content actually relayed to the client (outer or child).
    relayed_content: String,
    /// Outer agent text, kept for output parsing even when suppressed.
    outer_content: String,
    first_chunk: bool,
}

/// Orchestrate one streamed chat request.
///
/// Runs the agent, relays events, merges child-agent events, and persists
/// the new turns to the session store on successful completion.
pub fn orchestrate(
    agent: AgentRuntime,
    messages: Vec<ChatMessage>,
    new_turns: Vec<ChatMessage>,
    store: Option<SessionMessageStore>,
    scope: RequestScope,
    request_id: String,
    model_label: String,
) -> impl Stream<Item = StreamFrame> {
    let (sink, child_rx) = EventSink::channel();
    let agent = agent.with_event_sink(sink);

    stream! {
        let created = Utc::now().timestamp();
        let mut state = StreamingState {
            first_chunk: true,
            ..Default::default()
        };
        let mut child_rx = child_rx;
        let agent_name = agent.name().to_string();

        let mut agent_stream = Box::pin(agent.iter(messages));
        let mut finish_reason = FinishReason::Stop;
        let mut failed = false;

        while let Some(event) = agent_stream.next().await {
            // Safe point: interleave anything children pushed since the
            // last agent event.
            for frame in drain_children(&mut child_rx, &mut state, &request_id, created, &model_label) {
                yield frame;
            }

            match event {
                Ok(AgentEvent::ContentDelta(delta)) => {
                    state.outer_content.push_str(&delta);
                    if state.child_content_streamed {
                        continue;
                    }
                    state.relayed_content.push_str(&delta);
                    yield content_chunk(&request_id, created, &model_label, &delta, &mut state);
                }
                Ok(AgentEvent::Reasoning(text)) => {
                    yield StreamFrame::named("reasoning", json!({"type": "reasoning", "content": text}));
                }
                Ok(AgentEvent::ToolCallStarted { id, name, arguments }) => {
                    if name == "action_request" {
                        yield StreamFrame::named(
                            "action_request",
                            json!({"type": "action_request", "card": arguments}),
                        );
                        continue;
                    }
                    yield StreamFrame::named(
                        "tool_call",
                        json!({
                            "type": "tool_call",
                            "tool_name": name,
                            "tool_id": id,
                            "status": "started",
                            "arguments": arguments,
                        }),
                    );
                }
                Ok(AgentEvent::ToolCallCompleted { id, name, result_excerpt }) => {
                    // Children emit during the tool body; flush before the
                    // completion marker so ordering reads naturally.
                    for frame in drain_children(&mut child_rx, &mut state, &request_id, created, &model_label) {
                        yield frame;
                    }
                    yield StreamFrame::named(
                        "tool_call",
                        json!({
                            "type": "tool_call",
                            "tool_name": name,
                            "tool_id": id,
                            "status": "completed",
                            "result": result_excerpt,
                        }),
                    );
                }
                Ok(AgentEvent::Child(event)) => {
                    for frame in relay_child(event, &mut state, &request_id, created, &model_label) {
                        yield frame;
                    }
                }
                Ok(AgentEvent::Done { finish_reason: reason }) => {
                    finish_reason = reason;
                }
                Err(e) => {
                    tracing::error!(error = %e, "agent stream failed");
                    yield StreamFrame::named(
                        "error",
                        json!({
                            "type": "error",
                            "code": e.code(),
                            "message": e.to_string(),
                            "recoverable": e.is_recoverable(),
                        }),
                    );
                    finish_reason = FinishReason::Error;
                    failed = true;
                    break;
                }
            }
        }

        // Trailing children (tool completed on the final turn).
        for frame in drain_children(&mut child_rx, &mut state, &request_id, created, &model_label) {
            yield frame;
        }

        if !failed {
            // Structured side-channel before the terminal chunk.
            let confidence = serde_json::from_str::<Value>(&state.outer_content)
                .ok()
                .and_then(|v| v.get("confidence").and_then(Value::as_f64));
            yield StreamFrame::named(
                "metadata",
                json!({
                    "type": "metadata",
                    "responding_agent": state.responding_agent.clone().unwrap_or(agent_name),
                    "confidence": confidence,
                    "session_id": scope.session_id.clone(),
                }),
            );

            // Persist the new user turn(s) and the final assistant output
            // with compression enabled.
            if let (Some(store), Some(session_id)) = (&store, &scope.session_id) {
                let final_content = if state.child_content_streamed {
                    state.relayed_content.clone()
                } else {
                    state.outer_content.clone()
                };
                let mut turns = new_turns.clone();
                if !final_content.is_empty() {
                    turns.push(ChatMessage::assistant(final_content));
                }
                if let Err(e) = store
                    .store_turns(session_id, scope.user_id.as_deref(), &turns)
                    .await
                {
                    tracing::error!(error = %e, "failed to persist session turns");
                }
            }
        }

        yield StreamFrame::chunk(json!({
            "id": request_id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model_label,
            "choices": [{"index": 0, "delta": {}, "finish_reason": finish_reason.as_str()}],
        }));
        yield StreamFrame::done_marker();
    }
}

/// Drain pending child events without blocking.
fn drain_children(
    child_rx: &mut mpsc::Receiver<ChildEvent>,
    state: &mut StreamingState,
    request_id: &str,
    created: i64,
    model_label: &str,
) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    while let Ok(event) = child_rx.try_recv() {
        frames.extend(relay_child(event, state, request_id, created, model_label));
    }
    frames
}

/// Relay one child event, retagged with the child agent's name.
fn relay_child(
    event: ChildEvent,
    state: &mut StreamingState,
    request_id: &str,
    created: i64,
    model_label: &str,
) -> Vec<StreamFrame> {
    match event.kind {
        ChildEventKind::ToolStart { tool_name, arguments } => vec![StreamFrame::named(
            "tool_call",
            json!({
                "type": "tool_call",
                "tool_name": format!("{}:{}", event.agent_name, tool_name),
                "tool_id": format!("child_{}", uuid::Uuid::now_v7().simple()),
                "status": "started",
                "arguments": arguments,
            }),
        )],
        ChildEventKind::Content(content) => {
            if content.is_empty() {
                return Vec::new();
            }
            // From here on the outer agent's text is a duplicate.
            state.child_content_streamed = true;
            state.responding_agent = Some(event.agent_name);
            state.relayed_content.push_str(&content);
            vec![content_chunk(request_id, created, model_label, &content, state)]
        }
        ChildEventKind::ToolResult { result } => vec![StreamFrame::named(
            "tool_call",
            json!({
                "type": "tool_call",
                "tool_name": format!("{}:tool", event.agent_name),
                "tool_id": format!("child_{}", uuid::Uuid::now_v7().simple()),
                "status": "completed",
                "result": rem_core::summarize(&result.to_string(), 200),
            }),
        )],
    }
}

/// OpenAI-compatible content chunk.
fn content_chunk(
    request_id: &str,
    created: i64,
    model_label: &str,
    delta: &str,
    state: &mut StreamingState,
) -> StreamFrame {
    let mut delta_obj = json!({"content": delta});
    if state.first_chunk {
        delta_obj["role"] = json!("assistant");
        state.first_chunk = false;
    }
    StreamFrame::chunk(json!({
        "id": request_id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model_label,
        "choices": [{"index": 0, "delta": delta_obj, "finish_reason": null}],
    }))
}

/// Adapt a frame stream into an axum SSE response.
pub fn sse_response(
    frames: impl Stream<Item = StreamFrame> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = frames.map(|frame| {
        let event = Event::default();
        let event = match frame.event {
            Some(name) => event.event(name),
            None => event,
        };
        Ok(event.data(frame.data))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rem_agents::{
        AgentContext, AgentFactory, ProcessDefaults, ProviderMap, SchemaLoader, Tool, ToolContext,
        ToolRegistry,
    };
    use rem_core::RemResult;
    use rem_llm::mock::ScriptedChatProvider;
    use rem_llm::{ChatEvent, ModelRef, ToolCallRequest};
    use std::sync::Arc;

    /// Tool standing in for ask_agent: runs a "child" that streams content
    /// into the event sink.
    struct ChildAgentTool {
        reply: String,
    }

    #[async_trait]
    impl Tool for ChildAgentTool {
        fn name(&self) -> &str {
            "ask_agent"
        }
        fn description(&self) -> &str {
            "Delegate to a child agent"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}, "additionalProperties": false})
        }
        async fn invoke(&self, _arguments: Value, context: &ToolContext) -> RemResult<Value> {
            let sink = context.event_sink.as_ref().expect("sink attached");
            // Stream the child's answer in small deltas.
            for piece in self.reply.as_bytes().chunks(20) {
                sink.push(ChildEvent {
                    agent_name: "intake".to_string(),
                    kind: ChildEventKind::Content(String::from_utf8_lossy(piece).to_string()),
                });
            }
            sink.push(ChildEvent {
                agent_name: "intake".to_string(),
                kind: ChildEventKind::ToolResult {
                    result: json!({"ok": true}),
                },
            });
            Ok(json!({"delegated": true}))
        }
    }

    fn schema_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("rem-api-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(dir.join("agents")).unwrap();
        std::fs::write(
            dir.join("agents").join("delegator.yaml"),
            "type: object\ndescription: Delegates to the intake child.\njson_schema_extra:\n  name: delegator\n  tools:\n    - ask_agent\n",
        )
        .unwrap();
        dir
    }

    async fn agent_with(provider: ScriptedChatProvider, reply: &str) -> AgentRuntime {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(ChildAgentTool {
            reply: reply.to_string(),
        }));
        let factory = AgentFactory::new(
            Arc::new(SchemaLoader::new(Some(schema_dir()))),
            registry,
            Arc::new(ProviderMap::new().with_fallback(Arc::new(provider))),
            ProcessDefaults {
                model: ModelRef::new("mock", "test"),
                temperature: 0.0,
                max_iterations: 4,
            },
        );
        factory
            .create("delegator", AgentContext::for_tenant("acme"))
            .await
            .unwrap()
    }

    fn collect_content(frames: &[StreamFrame]) -> String {
        frames
            .iter()
            .filter(|f| f.event.is_none() && f.data != "[DONE]")
            .filter_map(|f| serde_json::from_str::<Value>(&f.data).ok())
            .filter_map(|v| {
                v["choices"][0]["delta"]["content"]
                    .as_str()
                    .map(str::to_string)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_child_content_suppresses_outer_text() {
        let child_reply = "x".repeat(200);
        // Turn 1: call the child tool. Turn 2: the outer agent tries to
        // repeat the child's answer in its own words.
        let provider = ScriptedChatProvider::new(vec![
            vec![
                ChatEvent::ToolCall(ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "ask_agent".to_string(),
                    arguments: json!({}),
                }),
                ChatEvent::Done {
                    finish_reason: FinishReason::ToolCalls,
                },
            ],
            vec![
                ChatEvent::ContentDelta("duplicated outer answer".to_string()),
                ChatEvent::Done {
                    finish_reason: FinishReason::Stop,
                },
            ],
        ]);
        let agent = agent_with(provider, &child_reply).await;

        let frames: Vec<StreamFrame> = orchestrate(
            agent,
            vec![ChatMessage::user("delegate this")],
            vec![ChatMessage::user("delegate this")],
            None,
            RequestScope::default(),
            "chatcmpl-test".to_string(),
            "mock:test".to_string(),
        )
        .collect()
        .await;

        // Child content relayed in full, outer content suppressed.
        let content = collect_content(&frames);
        assert_eq!(content, child_reply);
        assert!(!content.contains("duplicated"));

        // Tool lifecycle events surround the child content.
        let tool_events: Vec<&StreamFrame> = frames
            .iter()
            .filter(|f| f.event.as_deref() == Some("tool_call"))
            .collect();
        assert!(tool_events.iter().any(|f| f.data.contains("started")));
        assert!(tool_events.iter().any(|f| f.data.contains("completed")));

        // Metadata names the child as the responding agent.
        let metadata = frames
            .iter()
            .find(|f| f.event.as_deref() == Some("metadata"))
            .unwrap();
        assert!(metadata.data.contains("intake"));

        // Terminates with a finish chunk and the DONE marker.
        assert_eq!(frames.last().unwrap().data, "[DONE]");
        let finish = &frames[frames.len() - 2];
        assert!(finish.data.contains("\"finish_reason\":\"stop\""));
    }

    #[tokio::test]
    async fn test_plain_stream_relays_outer_content() {
        let provider = ScriptedChatProvider::reply_with("hello from rem");
        let agent = agent_with(provider, "unused").await;

        let frames: Vec<StreamFrame> = orchestrate(
            agent,
            vec![ChatMessage::user("hi")],
            vec![ChatMessage::user("hi")],
            None,
            RequestScope::default(),
            "chatcmpl-test".to_string(),
            "mock:test".to_string(),
        )
        .collect()
        .await;

        assert_eq!(collect_content(&frames), "hello from rem");
        // First content chunk carries the assistant role.
        let first_content = frames
            .iter()
            .find(|f| f.event.is_none() && f.data.contains("content"))
            .unwrap();
        assert!(first_content.data.contains("\"role\":\"assistant\""));
    }

    #[tokio::test]
    async fn test_provider_error_renders_error_then_done() {
        // No scripts: the mock provider errors on first call.
        let provider = ScriptedChatProvider::new(vec![]);
        let agent = agent_with(provider, "unused").await;

        let frames: Vec<StreamFrame> = orchestrate(
            agent,
            vec![ChatMessage::user("hi")],
            vec![ChatMessage::user("hi")],
            None,
            RequestScope::default(),
            "chatcmpl-test".to_string(),
            "mock:test".to_string(),
        )
        .collect()
        .await;

        let error = frames
            .iter()
            .find(|f| f.event.as_deref() == Some("error"))
            .unwrap();
        assert!(error.data.contains("provider_error"));

        let finish = &frames[frames.len() - 2];
        assert!(finish.data.contains("\"finish_reason\":\"error\""));
        assert_eq!(frames.last().unwrap().data, "[DONE]");
    }
}
