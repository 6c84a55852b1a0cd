use std::sync::OnceLock;

use jsonschema::{validator_for, Validator};
use serde_json::Value;

/// Bundled MRP 0.1 envelope schema (draft 2020-12).
pub const ENVELOPE_SCHEMA: &str = include_str!("../schemas/envelope.schema.json");

#[derive(Debug, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("Schema parse error: {0}")]
    SchemaParse(#[from] serde_json::Error),
    #[error("Schema compile error: {0}")]
    SchemaCompile(String),
    #[error("{0}")]
    ValidationFailed(String),
}

/// Validate a JSON instance against a JSON Schema (draft 2020-12).
/// Returns Ok(()) if valid, Err otherwise.
pub fn validate_json(schema_str: &str, instance_str: &str) -> Result<(), SchemaValidationError> {
    let schema_json: Value = serde_json::from_str(schema_str)?;
    let instance_json: Value = serde_json::from_str(instance_str)?;
    validate_value(&schema_json, &instance_json)
}

/// Validate an envelope object against the bundled envelope schema.
///
/// On failure the error carries every violation, joined with `"; "`, for
/// surfacing to the sender.
pub fn validate_envelope(envelope: &Value) -> Result<(), SchemaValidationError> {
    collect_errors(envelope_validator()?, envelope)
}

/// The bundled schema, compiled on first use.
fn envelope_validator() -> Result<&'static Validator, SchemaValidationError> {
    static VALIDATOR: OnceLock<Validator> = OnceLock::new();
    if let Some(validator) = VALIDATOR.get() {
        return Ok(validator);
    }
    let schema: Value = serde_json::from_str(ENVELOPE_SCHEMA)?;
    let validator = compile(&schema)?;
    Ok(VALIDATOR.get_or_init(|| validator))
}

fn compile(schema: &Value) -> Result<Validator, SchemaValidationError> {
    validator_for(schema).map_err(|e| SchemaValidationError::SchemaCompile(e.to_string()))
}

fn validate_value(schema: &Value, instance: &Value) -> Result<(), SchemaValidationError> {
    collect_errors(&compile(schema)?, instance)
}

fn collect_errors(validator: &Validator, instance: &Value) -> Result<(), SchemaValidationError> {
    let messages: Vec<String> = validator.iter_errors(instance).map(|e| e.to_string()).collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(SchemaValidationError::ValidationFailed(messages.join("; ")))
    }
}
