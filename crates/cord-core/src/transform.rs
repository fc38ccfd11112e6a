//! Context transformations
//!
//! Turns the captures of a matching rule into the final context.

use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

use crate::template::{Scope, Template, TemplateValue};
use crate::types::{Captures, Context, ContextTransformation};
use crate::url::NormalizedUrl;

/// Error type for the `metabase` transformation payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Hash is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Decoded hash is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Decoded hash is not JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Apply `transformation` to the captures of a matching rule.
pub fn transform(
    transformation: &ContextTransformation,
    captures: &Captures,
    url: &NormalizedUrl,
) -> Result<Context, DecodeError> {
    CompiledTransformation::compile(transformation).apply(captures, url)
}

/// A transformation with its templates parsed once, for repeated use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledTransformation {
    Default,
    Replace(Vec<(String, Template)>),
    Extend(Vec<(String, Template)>),
    Metabase,
}

impl CompiledTransformation {
    pub fn compile(transformation: &ContextTransformation) -> Self {
        let parse_all = |data: &BTreeMap<String, String>| {
            data.iter()
                .map(|(key, source)| (key.clone(), Template::parse(source)))
                .collect()
        };
        match transformation {
            ContextTransformation::Default => Self::Default,
            ContextTransformation::Replace(data) => Self::Replace(parse_all(data)),
            ContextTransformation::Extend(data) => Self::Extend(parse_all(data)),
            ContextTransformation::Metabase => Self::Metabase,
        }
    }

    pub fn apply(&self, captures: &Captures, url: &NormalizedUrl) -> Result<Context, DecodeError> {
        match self {
            Self::Default => Ok(captures.clone()),
            Self::Replace(templates) => {
                let scope = template_scope(captures, url);
                Ok(render_all(templates, &scope))
            }
            Self::Extend(templates) => {
                let scope = template_scope(captures, url);
                let mut context = captures.clone();
                context.extend(render_all(templates, &scope));
                Ok(context)
            }
            Self::Metabase => metabase_context(url.hash()),
        }
    }
}

fn render_all(templates: &[(String, Template)], scope: &Scope) -> Context {
    templates
        .iter()
        .map(|(key, template)| (key.clone(), template.render(scope)))
        .collect()
}

// =============================================================================
// Template Scope
// =============================================================================

/// The `url` object templates see.
pub fn url_value(url: &NormalizedUrl) -> TemplateValue {
    let mut fields = BTreeMap::new();
    let mut text = |name: &str, value: String| {
        fields.insert(name.to_string(), TemplateValue::Text(value));
    };
    text("protocol", url.protocol().to_string());
    text("hostname", url.domain().to_string());
    text("host", url.host());
    text("port", url.port().map(|p| p.to_string()).unwrap_or_default());
    text("pathname", url.pathname());
    text("path", url.path());
    text("hash", url.hash().to_string());
    text("search", url.search());
    text("href", url.href());

    let query = url
        .query()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    fields.insert("query".to_string(), TemplateValue::Pairs(query));
    TemplateValue::Object(fields)
}

/// Captures as top-level variables plus `url`.
pub fn template_scope(captures: &Captures, url: &NormalizedUrl) -> Scope {
    let mut scope = Scope::new();
    for (name, value) in captures {
        scope.insert(name.clone(), value.as_str());
    }
    scope.insert("url", url_value(url));
    scope
}

// =============================================================================
// Metabase
// =============================================================================

/// Decode a base64 JSON fragment and flatten it into dotted keys.
pub fn metabase_context(hash: &str) -> Result<Context, DecodeError> {
    let trimmed = hash.trim().trim_end_matches('=');
    let bytes = general_purpose::STANDARD_NO_PAD.decode(trimmed)?;
    let text = String::from_utf8(bytes)?;
    let value: Value = serde_json::from_str(&text)?;

    let mut context = Context::new();
    flatten_json(&value, &mut Vec::new(), &mut context);
    Ok(context)
}

/// Depth-first flattening in document order (the workspace enables
/// `serde_json/preserve_order`), so a later key overwrites an earlier one
/// that flattens to the same dotted path. Array indices become path
/// segments; empty containers produce nothing.
pub fn flatten_json(value: &Value, path: &mut Vec<String>, out: &mut Context) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                flatten_json(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                flatten_json(child, path, out);
                path.pop();
            }
        }
        leaf => {
            out.insert(path.join("."), js_string(leaf));
        }
    }
}

/// String coercion of a JSON scalar, matching JavaScript's `String(v)`.
fn js_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return n.to_string();
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
                Some(f) => f.to_string(),
                None => n.to_string(),
            }
        }
        Value::Array(_) | Value::Object(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::cleanup_url;

    const METABASE_HASH: &str = "eyJkYXRhc2V0X3F1ZXJ5Ijp7InF1ZXJ5Ijp7InNvdXJjZS10YWJsZSI6MywiZmlsdGVyIjpbImFuZCIsWyI9IixbImZpZWxkLWlkIiwzMF0sIjEiXV19LCJ0eXBlIjoicXVlcnkiLCJkYXRhYmFzZSI6MX0sImRpc3BsYXkiOiJ0YWJsZSIsInZpc3VhbGl6YXRpb25fc2V0dGluZ3MiOnt9fQ==";

    fn context(pairs: &[(&str, &str)]) -> Context {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_default_passes_captures() {
        let url = cleanup_url("https://cord.com/").unwrap();
        let captures = context(&[("user", "andrei")]);
        let out = transform(&ContextTransformation::Default, &captures, &url).unwrap();
        assert_eq!(out, captures);
    }

    #[test]
    fn test_replace_renders_templates() {
        let url = cleanup_url("http://www.cord.com/users/andrei?foo=bar").unwrap();
        let captures = context(&[("user", "andrei")]);
        let data: BTreeMap<String, String> = [
            ("user", "{{user}}"),
            ("hostname", "{{url.hostname}}"),
            ("pathname", "{{url.pathname}}"),
            ("query", "{{contextData url.query}}"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let out = transform(&ContextTransformation::Replace(data), &captures, &url).unwrap();
        assert_eq!(
            out,
            context(&[
                ("user", "andrei"),
                ("hostname", "www.cord.com"),
                ("pathname", "/users/andrei"),
                ("query", "foo: bar"),
            ])
        );
    }

    #[test]
    fn test_compiled_templates_are_reused() {
        let data = [("page".to_string(), "{{#if user}}{{user}}{{else}}anonymous{{/if}}".to_string())]
            .into_iter()
            .collect();
        let compiled = CompiledTransformation::compile(&ContextTransformation::Replace(data));
        assert!(matches!(&compiled, CompiledTransformation::Replace(templates) if templates.len() == 1));

        let url = cleanup_url("https://cord.com/users/andrei").unwrap();
        let first = compiled.apply(&context(&[("user", "andrei")]), &url).unwrap();
        let second = compiled.apply(&context(&[]), &url).unwrap();
        assert_eq!(first, context(&[("page", "andrei")]));
        assert_eq!(second, context(&[("page", "anonymous")]));
        assert_eq!(
            CompiledTransformation::compile(&ContextTransformation::Metabase),
            CompiledTransformation::Metabase
        );
    }

    #[test]
    fn test_extend_overlays_captures() {
        let url = cleanup_url("https://cord.com/docs/42").unwrap();
        let captures = context(&[("doc", "42"), ("kind", "raw")]);
        let data = [("kind".to_string(), "doc-{{doc}}".to_string())].into_iter().collect();
        let out = transform(&ContextTransformation::Extend(data), &captures, &url).unwrap();
        assert_eq!(out, context(&[("doc", "42"), ("kind", "doc-42")]));
    }

    #[test]
    fn test_metabase_flattening() {
        let out = metabase_context(METABASE_HASH).unwrap();
        assert_eq!(
            out,
            context(&[
                ("dataset_query.query.source-table", "3"),
                ("dataset_query.query.filter.0", "and"),
                ("dataset_query.query.filter.1.0", "="),
                ("dataset_query.query.filter.1.1.0", "field-id"),
                ("dataset_query.query.filter.1.1.1", "30"),
                ("dataset_query.query.filter.1.2", "1"),
                ("dataset_query.type", "query"),
                ("dataset_query.database", "1"),
                ("display", "table"),
            ])
        );
    }

    #[test]
    fn test_metabase_scalars_and_dotted_keys() {
        let payload = general_purpose::STANDARD.encode(r#"{"a.b":{"c":true},"n":null,"f":2.0,"g":1.5}"#);
        let out = metabase_context(&payload).unwrap();
        assert_eq!(
            out,
            context(&[("a.b.c", "true"), ("n", "null"), ("f", "2"), ("g", "1.5")])
        );
    }

    #[test]
    fn test_metabase_colliding_keys_follow_document_order() {
        let payload = general_purpose::STANDARD.encode(r#"{"a.b":"1","a":{"b":"2"}}"#);
        let out = metabase_context(&payload).unwrap();
        assert_eq!(out, context(&[("a.b", "2")]));

        let payload = general_purpose::STANDARD.encode(r#"{"a":{"b":"2"},"a.b":"1"}"#);
        let out = metabase_context(&payload).unwrap();
        assert_eq!(out, context(&[("a.b", "1")]));
    }

    #[test]
    fn test_metabase_errors_propagate() {
        assert!(matches!(metabase_context("not base64!"), Err(DecodeError::Base64(_))));
        let not_json = general_purpose::STANDARD.encode("hello");
        assert!(matches!(metabase_context(&not_json), Err(DecodeError::Json(_))));
        let not_utf8 = general_purpose::STANDARD.encode([0xff, 0xfe]);
        assert!(matches!(metabase_context(&not_utf8), Err(DecodeError::Utf8(_))));
    }
}
