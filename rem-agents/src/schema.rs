//! Agent schema loading
//!
//! Schemas are JSON-Schema documents (stored as YAML files) with embedded
//! metadata:
//! - `description`: the agent's system prompt
//! - `properties` / `required`: the output contract
//! - `json_schema_extra`: `{name, tools, temperature?, max_iterations?, model?}`
//!
//! File-backed schemas are immutable and loaded once per name into a
//! process-wide cache. A handful of built-in schemas ship with the binary
//! and act as fallbacks when no schema directory is configured.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use rem_core::{AgentError, RemError, RemResult};
use rem_llm::ModelRef;
use serde_json::Value;

/// Built-in schemas compiled into the binary.
const BUILTIN_SCHEMAS: [(&str, &str); 3] = [
    ("rem", include_str!("../../schemas/agents/rem.yaml")),
    (
        "moment-builder",
        include_str!("../../schemas/agents/moment-builder.yaml"),
    ),
    (
        "rem-query",
        include_str!("../../schemas/agents/rem-query.yaml"),
    ),
];

/// A parsed agent definition.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub system_prompt: String,
    /// Output contract as a JSON Schema object, when the agent is typed.
    pub output_contract: Option<Value>,
    /// Tool names to resolve against the registry.
    pub tools: Vec<String>,
    pub temperature: Option<f32>,
    pub max_iterations: Option<i32>,
    pub model: Option<ModelRef>,
}

impl AgentDefinition {
    /// Parse a definition from its JSON-Schema spec.
    pub fn from_spec(name: &str, spec: &Value) -> RemResult<Self> {
        let system_prompt = spec
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let output_contract = spec.get("properties").map(|properties| {
            serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": spec.get("required").cloned().unwrap_or(Value::Array(Vec::new())),
                "additionalProperties": false,
            })
        });

        let extra = spec.get("json_schema_extra");
        let tools = extra
            .and_then(|e| e.get("tools"))
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| match t {
                        Value::String(name) => Some(name.clone()),
                        Value::Object(obj) => obj
                            .get("name")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let temperature = extra
            .and_then(|e| e.get("temperature"))
            .and_then(Value::as_f64)
            .map(|t| t as f32);
        let max_iterations = extra
            .and_then(|e| e.get("max_iterations"))
            .and_then(Value::as_i64)
            .map(|i| i as i32);
        let model = extra
            .and_then(|e| e.get("model"))
            .and_then(Value::as_str)
            .and_then(|m| m.parse().ok());

        Ok(Self {
            name: name.to_string(),
            system_prompt,
            output_contract,
            tools,
            temperature,
            max_iterations,
            model,
        })
    }
}

/// File-backed schema cache. Immutable once loaded: a name resolves to the
/// same definition for the process lifetime.
pub struct SchemaLoader {
    schema_dir: Option<PathBuf>,
    cache: DashMap<String, Arc<AgentDefinition>>,
}

impl SchemaLoader {
    pub fn new(schema_dir: Option<PathBuf>) -> Self {
        Self {
            schema_dir,
            cache: DashMap::new(),
        }
    }

    /// Loader from the `REM_SCHEMA_DIR` environment variable.
    pub fn from_env() -> Self {
        Self::new(std::env::var("REM_SCHEMA_DIR").ok().map(PathBuf::from))
    }

    /// Load a schema by name: cache, then schema directory, then built-ins.
    pub async fn load(&self, name: &str) -> RemResult<Arc<AgentDefinition>> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(Arc::clone(&cached));
        }

        let definition = match self.load_from_dir(name).await? {
            Some(definition) => definition,
            None => self.load_builtin(name)?,
        };

        let definition = Arc::new(definition);
        self.cache
            .insert(name.to_string(), Arc::clone(&definition));
        Ok(definition)
    }

    async fn load_from_dir(&self, name: &str) -> RemResult<Option<AgentDefinition>> {
        let Some(dir) = &self.schema_dir else {
            return Ok(None);
        };
        let path = dir.join("agents").join(format!("{name}.yaml"));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RemError::config(format!(
                    "failed to read schema {}: {e}",
                    path.display()
                )))
            }
        };
        let spec: Value = serde_yaml::from_str(&raw)
            .map_err(|e| RemError::config(format!("invalid schema {name}: {e}")))?;
        Ok(Some(AgentDefinition::from_spec(name, &spec)?))
    }

    fn load_builtin(&self, name: &str) -> RemResult<AgentDefinition> {
        let raw = BUILTIN_SCHEMAS
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .map(|(_, raw)| *raw)
            .ok_or(AgentError::SchemaNotFound {
                name: name.to_string(),
            })?;
        let spec: Value = serde_yaml::from_str(raw)
            .map_err(|e| RemError::config(format!("invalid builtin schema {name}: {e}")))?;
        AgentDefinition::from_spec(name, &spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_spec_extracts_parts() {
        let spec = json!({
            "type": "object",
            "description": "You answer questions about stored memory.",
            "properties": {
                "answer": {"type": "string"},
                "confidence": {"type": "number"},
            },
            "required": ["answer"],
            "json_schema_extra": {
                "name": "query-agent",
                "tools": [{"name": "rem_query"}, "ask_rem"],
                "temperature": 0.3,
                "max_iterations": 4,
                "model": "openai:gpt-4.1",
            }
        });

        let definition = AgentDefinition::from_spec("query-agent", &spec).unwrap();
        assert_eq!(definition.system_prompt, "You answer questions about stored memory.");
        assert_eq!(definition.tools, vec!["rem_query", "ask_rem"]);
        assert_eq!(definition.temperature, Some(0.3));
        assert_eq!(definition.max_iterations, Some(4));
        assert_eq!(definition.model.as_ref().unwrap().provider, "openai");

        let contract = definition.output_contract.unwrap();
        assert_eq!(contract["additionalProperties"], false);
        assert_eq!(contract["required"][0], "answer");
    }

    #[test]
    fn test_from_spec_untyped_agent() {
        let spec = json!({"description": "Free-form assistant."});
        let definition = AgentDefinition::from_spec("chat", &spec).unwrap();
        assert!(definition.output_contract.is_none());
        assert!(definition.tools.is_empty());
    }

    #[tokio::test]
    async fn test_builtin_schemas_parse() {
        let loader = SchemaLoader::new(None);
        for name in ["rem", "moment-builder", "rem-query"] {
            let definition = loader.load(name).await.unwrap();
            assert!(!definition.system_prompt.is_empty(), "{name} prompt empty");
        }
    }

    #[tokio::test]
    async fn test_unknown_schema_errors() {
        let loader = SchemaLoader::new(None);
        let err = loader.load("no-such-agent").await.unwrap_err();
        assert!(matches!(
            err,
            RemError::Agent(AgentError::SchemaNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_returns_same_instance() {
        let loader = SchemaLoader::new(None);
        let a = loader.load("rem").await.unwrap();
        let b = loader.load("rem").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
