//! Output contract handling
//!
//! Converts an agent's schema-declared output contract into the shape a
//! provider will accept, then validates what comes back. Strict providers
//! require `additionalProperties=false` on every object and reject numeric
//! range constraints; the sanitizer applies both passes recursively.

use rem_core::{AgentError, RemResult};
use serde_json::Value;

/// Sanitize an output contract for a provider.
///
/// Always forces `additionalProperties=false` on object schemas (agents emit
/// closed contracts). When `strict` is set, numeric `minimum`/`maximum`
/// bounds are stripped as well.
pub fn sanitize_contract(contract: &Value, strict: bool) -> Value {
    let mut sanitized = contract.clone();
    sanitize_in_place(&mut sanitized, strict);
    sanitized
}

fn sanitize_in_place(schema: &mut Value, strict: bool) {
    let Value::Object(object) = schema else {
        return;
    };

    if object.get("type").and_then(Value::as_str) == Some("object") {
        object.insert("additionalProperties".to_string(), Value::Bool(false));
        if !object.contains_key("properties") {
            object.insert(
                "properties".to_string(),
                Value::Object(serde_json::Map::new()),
            );
        }
    }
    if strict {
        object.remove("minimum");
        object.remove("maximum");
        object.remove("exclusiveMinimum");
        object.remove("exclusiveMaximum");
    }

    for value in object.values_mut() {
        match value {
            Value::Object(_) => sanitize_in_place(value, strict),
            Value::Array(items) => {
                for item in items {
                    sanitize_in_place(item, strict);
                }
            }
            _ => {}
        }
    }
}

/// Validate structured output against its contract.
pub fn validate_output(contract: &Value, output: &Value) -> RemResult<()> {
    let validator = jsonschema::validator_for(contract).map_err(|e| AgentError::OutputContract {
        reason: format!("invalid contract: {e}"),
    })?;

    if let Some(error) = validator.iter_errors(output).next() {
        return Err(AgentError::OutputContract {
            reason: error.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Parse an agent's final text as structured output and validate it.
///
/// Providers asked for JSON sometimes wrap it in code fences; the parser
/// tolerates that before giving up.
pub fn parse_output(contract: &Value, text: &str) -> RemResult<Value> {
    let candidate = extract_json(text).ok_or_else(|| AgentError::OutputContract {
        reason: "final output is not valid JSON".to_string(),
    })?;
    validate_output(contract, &candidate)?;
    Ok(candidate)
}

/// Best-effort JSON extraction: plain JSON, fenced JSON, or the first
/// top-level object in the text.
fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    // ```json ... ``` fences
    if let Some(start) = trimmed.find("```") {
        let body = &trimmed[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str(body[..end].trim()) {
                return Some(value);
            }
        }
    }

    // First balanced top-level object.
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in trimmed[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&trimmed[start..=start + offset]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            },
            "required": ["query", "confidence"],
        })
    }

    #[test]
    fn test_sanitize_forces_closed_objects() {
        let sanitized = sanitize_contract(&contract(), false);
        assert_eq!(sanitized["additionalProperties"], false);
        // Non-strict keeps numeric bounds.
        assert_eq!(sanitized["properties"]["confidence"]["minimum"], 0.0);
    }

    #[test]
    fn test_strict_strips_numeric_bounds() {
        let sanitized = sanitize_contract(&contract(), true);
        assert!(sanitized["properties"]["confidence"].get("minimum").is_none());
        assert!(sanitized["properties"]["confidence"].get("maximum").is_none());
    }

    #[test]
    fn test_sanitize_recurses_into_arrays() {
        let nested = json!({
            "type": "object",
            "properties": {
                "moments": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"name": {"type": "string"}}},
                }
            }
        });
        let sanitized = sanitize_contract(&nested, false);
        assert_eq!(
            sanitized["properties"]["moments"]["items"]["additionalProperties"],
            false
        );
    }

    #[test]
    fn test_validate_output() {
        let contract = sanitize_contract(&contract(), false);
        assert!(validate_output(&contract, &json!({"query": "LOOKUP a", "confidence": 0.9})).is_ok());
        assert!(validate_output(&contract, &json!({"query": "LOOKUP a"})).is_err());
        assert!(validate_output(&contract, &json!({"query": 1, "confidence": 0.9})).is_err());
    }

    #[test]
    fn test_parse_output_tolerates_fences() {
        let contract = sanitize_contract(&contract(), false);
        let fenced = "```json\n{\"query\": \"LOOKUP a\", \"confidence\": 1.0}\n```";
        let parsed = parse_output(&contract, fenced).unwrap();
        assert_eq!(parsed["query"], "LOOKUP a");

        let chatty = "Here you go: {\"query\": \"FUZZY b\", \"confidence\": 0.8} hope that helps";
        let parsed = parse_output(&contract, chatty).unwrap();
        assert_eq!(parsed["query"], "FUZZY b");

        assert!(parse_output(&contract, "no json here").is_err());
    }
}
