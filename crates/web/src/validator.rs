//! The pluggable validation backend.
//!
//! Validator links hand each facet's schema and current value to whatever
//! backend is registered under [`VALIDATOR_KEY`] in the app memory. The
//! bundled [`SchemaBackend`] interprets schemas as JSON Schema; apps can
//! swap in anything that implements [`ValidatorBackend`].

use crate::facet::Facet;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

/// The memory key the dispatcher resolves the backend under.
pub const VALIDATOR_KEY: &str = "validator";

/// A backend verdict: on success `content` is the validated, possibly
/// coerced value; on failure it is one issue or a list of issues.
#[derive(Debug)]
pub struct Validated {
    pub success: bool,
    pub content: Value,
}

#[async_trait]
pub trait ValidatorBackend: Send + Sync {
    async fn validate(&self, schema: &Value, value: Value, facet: Facet) -> Validated;
}

pub type ValidatorHandle = Arc<dyn ValidatorBackend>;

/// The default backend: schemas are JSON Schema documents.
#[derive(Debug, Default)]
pub struct SchemaBackend;

#[async_trait]
impl ValidatorBackend for SchemaBackend {
    async fn validate(&self, schema: &Value, value: Value, _facet: Facet) -> Validated {
        let validator = match jsonschema::validator_for(schema) {
            Ok(validator) => validator,
            Err(error) => {
                return Validated {
                    success: false,
                    content: json!([{ "message": format!("invalid schema: {error}") }]),
                };
            }
        };

        let issues: Vec<Value> = validator
            .iter_errors(&value)
            .map(|error| json!({ "message": error.to_string(), "path": error.instance_path().to_string() }))
            .collect();

        if issues.is_empty() {
            Validated { success: true, content: value }
        } else {
            Validated { success: false, content: Value::Array(issues) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn valid_value_passes_through() {
        let schema = json!({"type": "object", "properties": {"age": {"type": "integer"}}});
        let value = json!({"age": 30});

        let validated = SchemaBackend.validate(&schema, value.clone(), Facet::Body).await;

        assert!(validated.success);
        assert_eq!(validated.content, value);
    }

    #[tokio::test]
    async fn invalid_value_yields_issues() {
        let schema = json!({"type": "object", "properties": {"age": {"type": "integer"}}, "required": ["age"]});

        let validated = SchemaBackend.validate(&schema, json!({"age": "x"}), Facet::Body).await;

        assert!(!validated.success);
        let Value::Array(issues) = &validated.content else { panic!("expected an issue list") };
        assert!(!issues.is_empty());
        assert!(issues[0]["message"].is_string());
    }

    #[tokio::test]
    async fn missing_facet_validates_as_null() {
        let schema = json!({"type": "object"});

        let validated = SchemaBackend.validate(&schema, Value::Null, Facet::Query).await;

        assert!(!validated.success);
    }
}
