use serde_json::Value;

use cord_core::{ProviderRule, RuleProvider};

/// Error type for provider and rule documents.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unrecognized document: {0}")]
    UnknownShape(String),
}

/// Providers loaded from one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderDocument {
    pub version: Option<String>,
    pub providers: Vec<RuleProvider>,
}

/// Parse a provider document.
///
/// Accepted shapes: a single provider object, an array of providers, or a
/// `{"ruleProviders": [...], "version": "..."}` envelope.
pub fn parse_provider_document(text: &str) -> Result<ProviderDocument, LoadError> {
    let value: Value = serde_json::from_str(text)?;

    match value {
        Value::Array(_) => Ok(ProviderDocument {
            version: None,
            providers: serde_json::from_value(value)?,
        }),
        Value::Object(mut map) => {
            if let Some(providers) = map.remove("ruleProviders") {
                let version = match map.remove("version") {
                    Some(Value::String(v)) => Some(v),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                };
                return Ok(ProviderDocument {
                    version,
                    providers: serde_json::from_value(providers)?,
                });
            }
            if map.contains_key("rules") || map.contains_key("domains") {
                return Ok(ProviderDocument {
                    version: None,
                    providers: vec![serde_json::from_value(Value::Object(map))?],
                });
            }
            Err(LoadError::UnknownShape(
                "expected a provider, an array of providers or a ruleProviders envelope".to_string(),
            ))
        }
        other => Err(LoadError::UnknownShape(format!("unexpected top-level {}", json_kind(&other)))),
    }
}

/// Parse a single rule or an array of rules.
pub fn parse_rules(text: &str) -> Result<Vec<ProviderRule>, LoadError> {
    let value: Value = serde_json::from_str(text)?;
    match value {
        Value::Array(_) => Ok(serde_json::from_value(value)?),
        Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        other => Err(LoadError::UnknownShape(format!("unexpected top-level {}", json_kind(&other)))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
