//! Model identifier parsing
//!
//! Model identifiers are `<provider>:<model-id>` throughout the system,
//! e.g. `openai:gpt-4.1` or `anthropic:claude-sonnet-4-5`.

use std::fmt;
use std::str::FromStr;

use rem_core::ValidationError;
use serde::{Deserialize, Serialize};

/// A parsed `provider:model` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Providers with strict output-schema validation get a sanitized
    /// contract: `additionalProperties=false` forced, numeric range
    /// constraints stripped.
    pub fn requires_strict_schema(&self) -> bool {
        matches!(self.provider.as_str(), "cerebras")
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl FromStr for ModelRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(ModelRef::new(provider, model))
            }
            _ => Err(ValidationError::InvalidValue {
                field: "model".to_string(),
                reason: format!("expected <provider>:<model-id>, got '{s}'"),
            }),
        }
    }
}

impl TryFrom<String> for ModelRef {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelRef> for String {
    fn from(value: ModelRef) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_ref() {
        let model: ModelRef = "openai:gpt-4.1".parse().unwrap();
        assert_eq!(model.provider, "openai");
        assert_eq!(model.model, "gpt-4.1");
        assert_eq!(model.to_string(), "openai:gpt-4.1");
    }

    #[test]
    fn test_model_with_colon_in_id() {
        let model: ModelRef = "bedrock:anthropic.claude:v2".parse().unwrap();
        assert_eq!(model.provider, "bedrock");
        assert_eq!(model.model, "anthropic.claude:v2");
    }

    #[test]
    fn test_missing_provider_rejected() {
        assert!("gpt-4.1".parse::<ModelRef>().is_err());
        assert!(":gpt-4.1".parse::<ModelRef>().is_err());
        assert!("openai:".parse::<ModelRef>().is_err());
    }

    #[test]
    fn test_strict_schema_detection() {
        let strict: ModelRef = "cerebras:qwen-3-32b".parse().unwrap();
        assert!(strict.requires_strict_schema());
        let relaxed: ModelRef = "openai:gpt-4.1".parse().unwrap();
        assert!(!relaxed.requires_strict_schema());
    }

    #[test]
    fn test_serde_as_string() {
        let model: ModelRef = "anthropic:claude-sonnet-4-5".parse().unwrap();
        let json = serde_json::to_string(&model).unwrap();
        assert_eq!(json, "\"anthropic:claude-sonnet-4-5\"");
        let back: ModelRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
    }
}
