//! Query planner agent and the ask service
//!
//! The planner is a small typed agent that turns a natural-language
//! question into the REM query most likely to answer it, with a confidence
//! score. Execution policy is a service concern: the ask service runs the
//! query when confidence clears the configured threshold, otherwise it
//! hands the query back with a warning. Low confidence is a signal, not an
//! error.

use std::sync::Arc;

use async_trait::async_trait;
use rem_core::{AgentError, QueryOutput, RemQuery, RemResult};
use rem_query::RemEngine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{AgentContext, AgentFactory, Tool, ToolContext};

/// Confidence at or above which the ask service auto-executes.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// The planner's fixed output contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerOutput {
    /// REM dialect query string.
    pub query: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Explanation, populated when confidence is low.
    #[serde(default)]
    pub reasoning: String,
}

/// Natural language to REM query translation.
pub struct QueryPlanner {
    factory: Arc<AgentFactory>,
}

impl QueryPlanner {
    pub fn new(factory: Arc<AgentFactory>) -> Self {
        Self { factory }
    }

    /// Emit the query most likely to answer `natural_query`.
    pub async fn plan(
        &self,
        natural_query: &str,
        context: &AgentContext,
    ) -> RemResult<PlannerOutput> {
        let agent = self.factory.create("rem-query", context.clone()).await?;
        let result = agent.run_prompt(natural_query).await?;
        let output = result.output.ok_or_else(|| AgentError::OutputContract {
            reason: "planner returned no structured output".to_string(),
        })?;
        let mut planned: PlannerOutput =
            serde_json::from_value(output).map_err(|e| AgentError::OutputContract {
                reason: e.to_string(),
            })?;
        planned.confidence = planned.confidence.clamp(0.0, 1.0);
        Ok(planned)
    }
}

/// Outcome of an ask: the planned query, and results when policy allowed
/// execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskOutcome {
    pub query: String,
    pub confidence: f64,
    pub reasoning: String,
    /// Present when the query was executed.
    pub results: Option<QueryOutput>,
    /// Present when execution was skipped or failed.
    pub warning: Option<String>,
    pub plan_mode: bool,
}

/// Plan-then-execute service over the planner and the query engine.
pub struct AskService {
    planner: QueryPlanner,
    engine: RemEngine,
    confidence_threshold: f64,
}

impl AskService {
    pub fn new(planner: QueryPlanner, engine: RemEngine) -> Self {
        Self {
            planner,
            engine,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    /// Override the auto-execution policy threshold.
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Translate and (policy permitting) execute a natural-language
    /// question. `plan_mode` returns the query without running it.
    pub async fn ask(
        &self,
        natural_query: &str,
        context: &AgentContext,
        plan_mode: bool,
    ) -> RemResult<AskOutcome> {
        let planned = self.planner.plan(natural_query, context).await?;

        let mut outcome = AskOutcome {
            query: planned.query.clone(),
            confidence: planned.confidence,
            reasoning: planned.reasoning,
            results: None,
            warning: None,
            plan_mode,
        };

        if plan_mode {
            return Ok(outcome);
        }
        if planned.confidence < self.confidence_threshold {
            outcome.warning =
                Some("Low confidence score. Review the query before executing.".to_string());
            return Ok(outcome);
        }

        // A malformed or failing planned query is a warning on the outcome,
        // not a failure of the ask itself.
        match self.execute_planned(&planned.query, context).await {
            Ok(results) => outcome.results = Some(results),
            Err(e) => {
                tracing::warn!(query = %planned.query, error = %e, "planned query failed");
                outcome.warning = Some(format!("Failed to parse or execute query: {e}"));
            }
        }
        Ok(outcome)
    }

    async fn execute_planned(
        &self,
        query_text: &str,
        context: &AgentContext,
    ) -> RemResult<QueryOutput> {
        let mut params = rem_dsl::parse(query_text)?;
        // Caller scope wins over anything the planner emitted.
        crate::inject_user_scope(&mut params, context.user_id.as_deref());
        self.engine
            .execute(&RemQuery::new(context.tenant_id.clone(), params))
            .await
    }
}

/// Tool wrapper exposing the ask service to agents.
pub struct AskRemTool {
    ask: Arc<AskService>,
}

impl AskRemTool {
    pub fn new(ask: Arc<AskService>) -> Self {
        Self { ask }
    }
}

#[async_trait]
impl Tool for AskRemTool {
    fn name(&self) -> &str {
        "ask_rem"
    }

    fn description(&self) -> &str {
        "Answer a natural-language question against memory: plans the best \
         REM query and executes it when confident. Use plan_mode to preview \
         the query without running it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {"type": "string"},
                "plan_mode": {"type": "boolean", "description": "Return the query without executing"},
            },
            "required": ["question"],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, arguments: Value, context: &ToolContext) -> RemResult<Value> {
        let question = arguments
            .get("question")
            .and_then(Value::as_str)
            .ok_or_else(|| rem_core::ValidationError::MissingParameter {
                name: "question".to_string(),
            })?;
        let plan_mode = arguments
            .get("plan_mode")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let agent_context = AgentContext {
            user_id: context.user_id.clone(),
            tenant_id: context.tenant_id.clone(),
            session_id: context.session_id.clone(),
            model: None,
            agent_schema: None,
        };
        let outcome = self.ask.ask(question, &agent_context, plan_mode).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProcessDefaults, ProviderMap, SchemaLoader, ToolRegistry};
    use rem_core::{EntityKind, ModelRegistry};
    use rem_llm::mock::{MockEmbeddingProvider, ScriptedChatProvider};
    use rem_llm::ModelRef;
    use rem_query::{MemoryBackend, StoredEntity};

    fn ask_service(provider: ScriptedChatProvider) -> AskService {
        let backend = MemoryBackend::new();
        backend.insert(
            StoredEntity::new("acme", EntityKind::User, "sarah-chen")
                .summary("Sarah Chen, staff engineer"),
        );
        let engine = RemEngine::new(
            Arc::new(backend),
            Arc::new(ModelRegistry::core()),
            Arc::new(MockEmbeddingProvider::new(16)),
        );
        let factory = AgentFactory::new(
            Arc::new(SchemaLoader::new(None)),
            Arc::new(ToolRegistry::new()),
            Arc::new(ProviderMap::new().with_fallback(Arc::new(provider))),
            ProcessDefaults {
                model: ModelRef::new("mock", "test"),
                temperature: 0.0,
                max_iterations: 2,
            },
        );
        AskService::new(QueryPlanner::new(Arc::new(factory)), engine)
    }

    fn planner_reply(query: &str, confidence: f64) -> ScriptedChatProvider {
        ScriptedChatProvider::reply_with(&format!(
            r#"{{"query": "{query}", "confidence": {confidence}, "reasoning": ""}}"#
        ))
    }

    #[tokio::test]
    async fn test_high_confidence_auto_executes() {
        let service = ask_service(planner_reply("LOOKUP sarah-chen", 0.95));
        let outcome = service
            .ask("Who is Sarah Chen?", &AgentContext::for_tenant("acme"), false)
            .await
            .unwrap();

        assert_eq!(outcome.query, "LOOKUP sarah-chen");
        assert!(outcome.warning.is_none());
        let results = outcome.results.unwrap();
        assert_eq!(results.count(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_returns_warning_not_error() {
        let service = ask_service(planner_reply("FUZZY sara", 0.4));
        let outcome = service
            .ask("someone named sara?", &AgentContext::for_tenant("acme"), false)
            .await
            .unwrap();

        assert!(outcome.results.is_none());
        assert!(outcome.warning.unwrap().contains("Low confidence"));
    }

    #[tokio::test]
    async fn test_plan_mode_never_executes() {
        let service = ask_service(planner_reply("LOOKUP sarah-chen", 1.0));
        let outcome = service
            .ask("Who is Sarah Chen?", &AgentContext::for_tenant("acme"), true)
            .await
            .unwrap();

        assert!(outcome.plan_mode);
        assert!(outcome.results.is_none());
        assert!(outcome.warning.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_planned_query_is_warning() {
        let service = ask_service(planner_reply("EXPLAIN everything", 0.9));
        let outcome = service
            .ask("tell me things", &AgentContext::for_tenant("acme"), false)
            .await
            .unwrap();

        assert!(outcome.results.is_none());
        assert!(outcome.warning.unwrap().contains("Failed to parse"));
    }
}
