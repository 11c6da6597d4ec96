//! Agent factory and runtime
//!
//! The factory assembles a typed, tool-bearing runtime from a schema name,
//! the caller context, and process defaults. The runtime is a thin loop
//! over the chat provider: stream a turn, execute any requested tools
//! serially, feed results back, repeat, bounded by the iteration cap.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use rem_core::{AgentError, RemError, RemResult};
use rem_llm::{
    ChatEvent, ChatMessage, ChatProvider, ChatRequest, FinishReason, ModelRef, ToolSpec,
};
use serde_json::{json, Value};

use crate::{
    parse_output, sanitize_contract, AgentContext, AgentDefinition, AgentEvent, EventSink,
    SchemaLoader, Tool, ToolContext, ToolRegistry,
};

/// Result excerpt length relayed in tool-completion events.
const RESULT_EXCERPT_CHARS: usize = 200;

/// Process-wide defaults applied when neither the schema nor the caller
/// overrides them.
#[derive(Debug, Clone)]
pub struct ProcessDefaults {
    pub model: ModelRef,
    pub temperature: f32,
    pub max_iterations: i32,
}

impl Default for ProcessDefaults {
    fn default() -> Self {
        Self {
            model: ModelRef::new("openai", "gpt-4.1-mini"),
            temperature: 0.2,
            max_iterations: 8,
        }
    }
}

impl ProcessDefaults {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: std::env::var("REM_DEFAULT_MODEL")
                .ok()
                .and_then(|m| m.parse().ok())
                .unwrap_or(defaults.model),
            temperature: std::env::var("REM_DEFAULT_TEMPERATURE")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.temperature),
            max_iterations: std::env::var("REM_MAX_ITERATIONS")
                .ok()
                .and_then(|i| i.parse().ok())
                .unwrap_or(defaults.max_iterations),
        }
    }
}

/// Chat providers keyed by the provider half of the model identifier, with
/// an optional fallback for OpenAI-compatible gateways.
#[derive(Default)]
pub struct ProviderMap {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    fallback: Option<Arc<dyn ChatProvider>>,
}

impl ProviderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, name: impl Into<String>, provider: Arc<dyn ChatProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    pub fn with_fallback(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn resolve(&self, model: &ModelRef) -> RemResult<Arc<dyn ChatProvider>> {
        self.providers
            .get(&model.provider)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| RemError::config(format!("no provider configured for '{model}'")))
    }
}

/// Assembles agent runtimes from schemas, tools, and models.
pub struct AgentFactory {
    loader: Arc<SchemaLoader>,
    registry: Arc<ToolRegistry>,
    providers: Arc<ProviderMap>,
    defaults: ProcessDefaults,
}

impl AgentFactory {
    pub fn new(
        loader: Arc<SchemaLoader>,
        registry: Arc<ToolRegistry>,
        providers: Arc<ProviderMap>,
        defaults: ProcessDefaults,
    ) -> Self {
        Self {
            loader,
            registry,
            providers,
            defaults,
        }
    }

    pub fn defaults(&self) -> &ProcessDefaults {
        &self.defaults
    }

    /// Build a runtime for the named schema under the caller context.
    ///
    /// Model resolution order: context override, schema binding, process
    /// default. Strict-schema providers get a sanitized output contract.
    pub async fn create(
        &self,
        schema_name: &str,
        context: AgentContext,
    ) -> RemResult<AgentRuntime> {
        let definition = self.loader.load(schema_name).await?;
        self.create_from_definition(definition, context)
    }

    /// Build a runtime from an already-parsed definition (e.g. a local
    /// schema file supplied on the command line).
    pub fn create_from_definition(
        &self,
        definition: Arc<AgentDefinition>,
        context: AgentContext,
    ) -> RemResult<AgentRuntime> {
        let model = context
            .model
            .clone()
            .or_else(|| definition.model.clone())
            .unwrap_or_else(|| self.defaults.model.clone());
        let provider = self.providers.resolve(&model)?;

        let output_contract = definition
            .output_contract
            .as_ref()
            .map(|contract| sanitize_contract(contract, model.requires_strict_schema()));

        let mut tools = Vec::with_capacity(definition.tools.len());
        for tool_name in &definition.tools {
            tools.push(self.registry.require(tool_name)?);
        }

        Ok(AgentRuntime {
            definition: Arc::clone(&definition),
            provider,
            tools,
            model,
            temperature: definition.temperature.unwrap_or(self.defaults.temperature),
            max_iterations: definition
                .max_iterations
                .unwrap_or(self.defaults.max_iterations),
            output_contract,
            context,
            event_sink: None,
        })
    }
}

/// Final result of an agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRunResult {
    /// Concatenated text of the final turn.
    pub text: String,
    /// Validated structured output, when the agent is typed.
    pub output: Option<Value>,
}

/// A constructed agent: provider, tools, resolved runtime parameters.
pub struct AgentRuntime {
    definition: Arc<AgentDefinition>,
    provider: Arc<dyn ChatProvider>,
    tools: Vec<Arc<dyn Tool>>,
    model: ModelRef,
    temperature: f32,
    max_iterations: i32,
    output_contract: Option<Value>,
    context: AgentContext,
    event_sink: Option<EventSink>,
}

impl AgentRuntime {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.definition.system_prompt
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn max_iterations(&self) -> i32 {
        self.max_iterations
    }

    /// Attach the sink child-agent events flow into during tool calls.
    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            tenant_id: self.context.tenant_id.clone(),
            user_id: self.context.user_id.clone(),
            session_id: self.context.session_id.clone(),
            event_sink: self.event_sink.clone(),
        }
    }

    /// Run over a single user prompt: system prompt plus one user turn.
    pub async fn run_prompt(&self, prompt: &str) -> RemResult<AgentRunResult> {
        self.run(vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(prompt),
        ])
        .await
    }

    /// Run to completion, returning final text and structured output.
    pub async fn run(&self, messages: Vec<ChatMessage>) -> RemResult<AgentRunResult> {
        let mut stream = Box::pin(self.iter(messages));
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                AgentEvent::ContentDelta(delta) => text.push_str(&delta),
                AgentEvent::Done { .. } => break,
                _ => {}
            }
        }

        let output = match &self.output_contract {
            Some(contract) => Some(parse_output(contract, &text)?),
            None => None,
        };
        Ok(AgentRunResult { text, output })
    }

    /// Drive the tool-using loop, yielding events as they happen.
    ///
    /// Tool invocations within a turn are serialized. Exceeding the
    /// iteration cap terminates with a typed error rather than looping.
    pub fn iter(
        &self,
        messages: Vec<ChatMessage>,
    ) -> impl Stream<Item = RemResult<AgentEvent>> + '_ {
        try_stream! {
            let mut messages = messages;
            let tool_specs = self.tool_specs();
            let mut iterations = 0;

            loop {
                iterations += 1;
                if iterations > self.max_iterations {
                    Err::<(), RemError>(
                        AgentError::IterationLimitExceeded {
                            limit: self.max_iterations,
                        }
                        .into(),
                    )?;
                }

                let request = ChatRequest {
                    model: self.model.clone(),
                    messages: messages.clone(),
                    tools: tool_specs.clone(),
                    output_schema: self.output_contract.clone(),
                    temperature: self.temperature,
                };

                let mut stream = self.provider.stream_chat(request).await?;
                let mut turn_text = String::new();
                let mut tool_calls = Vec::new();
                let mut finish_reason = FinishReason::Stop;

                while let Some(event) = stream.next().await {
                    match event? {
                        ChatEvent::ContentDelta(delta) => {
                            turn_text.push_str(&delta);
                            yield AgentEvent::ContentDelta(delta);
                        }
                        ChatEvent::Reasoning(reasoning) => {
                            yield AgentEvent::Reasoning(reasoning);
                        }
                        ChatEvent::ToolCall(call) => tool_calls.push(call),
                        ChatEvent::Done { finish_reason: reason } => finish_reason = reason,
                    }
                }

                if tool_calls.is_empty() {
                    yield AgentEvent::Done { finish_reason };
                    return;
                }

                if !turn_text.is_empty() {
                    messages.push(ChatMessage::assistant(turn_text));
                }

                let tool_context = self.tool_context();
                for call in tool_calls {
                    yield AgentEvent::ToolCallStarted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    };

                    let tool = self.tools.iter().find(|t| t.name() == call.name);
                    let result = match tool {
                        Some(tool) => tool.invoke(call.arguments.clone(), &tool_context).await,
                        None => Err(AgentError::ToolNotFound {
                            name: call.name.clone(),
                        }
                        .into()),
                    };

                    // Recoverable tool failures go back to the model as
                    // structured errors; the run itself continues.
                    let result_value = match result {
                        Ok(value) => value,
                        Err(e) => {
                            tracing::warn!(tool = %call.name, error = %e, "tool invocation failed");
                            json!({"error": e.to_string(), "code": e.code()})
                        }
                    };

                    let rendered = result_value.to_string();
                    yield AgentEvent::ToolCallCompleted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        result_excerpt: rem_core::summarize(&rendered, RESULT_EXCERPT_CHARS),
                    };
                    messages.push(ChatMessage::tool_result(call.id, call.name, rendered));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rem_core::{EntityKind, ModelRegistry};
    use rem_llm::mock::{MockEmbeddingProvider, ScriptedChatProvider};
    use rem_llm::ToolCallRequest;
    use rem_query::{MemoryBackend, StoredEntity};
    use crate::RemQueryTool;

    /// Schema dir containing a minimal tool-bearing agent.
    fn temp_schema_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("rem-agents-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(dir.join("agents")).unwrap();
        std::fs::write(
            dir.join("agents").join("tool-agent.yaml"),
            "type: object\ndescription: Answers using the query tool.\njson_schema_extra:\n  name: tool-agent\n  tools:\n    - rem_query\n",
        )
        .unwrap();
        dir
    }

    fn factory_with(provider: ScriptedChatProvider) -> AgentFactory {
        let backend = MemoryBackend::new();
        backend.insert(
            StoredEntity::new("acme", EntityKind::User, "sarah-chen")
                .summary("Sarah Chen, staff engineer"),
        );
        let engine = rem_query::RemEngine::new(
            Arc::new(backend),
            Arc::new(ModelRegistry::core()),
            Arc::new(MockEmbeddingProvider::new(16)),
        );

        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(RemQueryTool::new(engine)));

        AgentFactory::new(
            Arc::new(SchemaLoader::new(Some(temp_schema_dir()))),
            registry,
            Arc::new(ProviderMap::new().with_fallback(Arc::new(provider))),
            ProcessDefaults {
                model: ModelRef::new("mock", "test"),
                temperature: 0.0,
                max_iterations: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_typed_run_parses_contract() {
        let provider = ScriptedChatProvider::reply_with(
            r#"{"query": "LOOKUP sarah-chen", "confidence": 0.95, "reasoning": ""}"#,
        );
        let factory = factory_with(provider);
        let agent = factory
            .create("rem-query", AgentContext::for_tenant("acme"))
            .await
            .unwrap();

        let result = agent.run_prompt("Who is Sarah Chen?").await.unwrap();
        let output = result.output.unwrap();
        assert_eq!(output["query"], "LOOKUP sarah-chen");
        assert_eq!(output["confidence"], 0.95);
    }

    #[tokio::test]
    async fn test_tool_loop_feeds_results_back() {
        let provider = ScriptedChatProvider::new(vec![
            vec![
                ChatEvent::ToolCall(ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "rem_query".to_string(),
                    arguments: json!({"query": "LOOKUP sarah-chen"}),
                }),
                ChatEvent::Done {
                    finish_reason: FinishReason::ToolCalls,
                },
            ],
            vec![
                ChatEvent::ContentDelta(
                    r#"{"answer": "Sarah Chen is a staff engineer.", "confidence": 0.9, "references": ["sarah-chen"]}"#.to_string(),
                ),
                ChatEvent::Done {
                    finish_reason: FinishReason::Stop,
                },
            ],
        ]);
        let factory = factory_with(provider);
        let agent = factory
            .create("tool-agent", AgentContext::for_tenant("acme"))
            .await
            .unwrap();

        let mut events = Vec::new();
        let mut stream = Box::pin(agent.iter(vec![
            ChatMessage::system(agent.system_prompt()),
            ChatMessage::user("Who is Sarah?"),
        ]));
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert!(matches!(events[0], AgentEvent::ToolCallStarted { .. }));
        assert!(matches!(events[1], AgentEvent::ToolCallCompleted { .. }));
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
        match &events[1] {
            AgentEvent::ToolCallCompleted { result_excerpt, .. } => {
                assert!(result_excerpt.contains("LOOKUP"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_iteration_cap_terminates_with_typed_error() {
        // Every turn requests another tool call; the cap must fire.
        let endless_turn = vec![
            ChatEvent::ToolCall(ToolCallRequest {
                id: "call_x".to_string(),
                name: "rem_query".to_string(),
                arguments: json!({"query": "LOOKUP sarah-chen"}),
            }),
            ChatEvent::Done {
                finish_reason: FinishReason::ToolCalls,
            },
        ];
        let provider = ScriptedChatProvider::new(vec![
            endless_turn.clone(),
            endless_turn.clone(),
            endless_turn.clone(),
            endless_turn,
        ]);
        let factory = factory_with(provider);
        let agent = factory
            .create("tool-agent", AgentContext::for_tenant("acme"))
            .await
            .unwrap();

        let err = agent.run_prompt("loop forever").await.unwrap_err();
        assert!(matches!(
            err,
            RemError::Agent(AgentError::IterationLimitExceeded { limit: 3 })
        ));
    }

    #[tokio::test]
    async fn test_unknown_tool_in_schema_fails_fast() {
        let factory = factory_with(ScriptedChatProvider::new(vec![]));
        // The `rem` schema declares tools the registry doesn't have beyond
        // rem_query; creation must fail on the first missing one.
        let err = factory
            .create("rem", AgentContext::for_tenant("acme"))
            .await
            .err();
        // rem declares ask_rem etc.; with only rem_query registered the
        // factory reports the missing binding.
        assert!(matches!(
            err,
            Some(RemError::Agent(AgentError::ToolNotFound { .. }))
        ));
    }
}
