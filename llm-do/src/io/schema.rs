//! JSON Schema validation for tool arguments and worker output.

use jsonschema::validator_for;
use serde_json::Value;

use crate::error::{Error, Result};

/// Validate `instance` against `schema`.
///
/// An invalid schema and an invalid instance are both `InvalidInput`; the
/// message lists every violation, prefixed by `what`.
pub fn validate_against(schema: &Value, instance: &Value, what: &str) -> Result<()> {
    let compiled = validator_for(schema)
        .map_err(|err| Error::InvalidInput(format!("invalid schema for {what}: {err}")))?;
    if compiled.is_valid(instance) {
        return Ok(());
    }
    let messages = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(Error::InvalidInput(format!(
        "{what} failed schema validation: {}",
        messages.join("; ")
    )))
}

/// Parse a model's final text against an output schema.
///
/// Text wrapped in a Markdown code fence is unwrapped first.
pub fn parse_structured_output(text: &str, schema: &Value) -> Result<Value> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body)
        .map_err(|err| Error::InvalidInput(format!("output is not valid JSON: {err}")))?;
    validate_against(schema, &value, "output")?;
    Ok(value)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match body.split_once('\n') {
        Some((_lang, inner)) => inner.trim(),
        None => body.trim(),
    }
}
