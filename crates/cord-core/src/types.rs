//! Core type definitions for Cord page context matching
//!
//! These types mirror the persisted provider rule format (camelCase JSON
//! columns) and are shared by the matcher, the compiler and the bindings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flat key/value context produced by a matching rule.
pub type Context = BTreeMap<String, String>;

/// Named values bound by `:name` pattern tokens.
pub type Captures = BTreeMap<String, String>;

// =============================================================================
// Rule Types
// =============================================================================

/// Whether a matching rule enables or disables Cord on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Allow,
    Deny,
}

/// Outcome of evaluating a provider against a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Allow,
    Deny,
    None,
}

impl From<RuleType> for MatchKind {
    fn from(value: RuleType) -> Self {
        match value {
            RuleType::Allow => Self::Allow,
            RuleType::Deny => Self::Deny,
        }
    }
}

// =============================================================================
// Match Patterns
// =============================================================================

/// Declarative match specification of a rule. Absent fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPatterns {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<BTreeMap<String, String>>,
    /// CSS selector that must be present in the document (DOM only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Text the document must contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
}

impl MatchPatterns {
    /// Which gates this pattern constrains.
    pub fn gates(&self) -> GateFlags {
        let mut gates = GateFlags::empty();
        gates.set(GateFlags::PROTOCOL, self.protocol.is_some());
        gates.set(GateFlags::DOMAIN, self.domain.is_some());
        gates.set(GateFlags::PATH, self.path.is_some());
        gates.set(GateFlags::HASH, self.hash.is_some());
        gates.set(GateFlags::QUERY, self.query_params.is_some());
        gates.set(GateFlags::SELECTOR, self.selector.is_some());
        gates.set(GateFlags::CONTAINS, self.contains.is_some());
        gates
    }
}

bitflags::bitflags! {
    /// Pattern dimensions ("gates") a rule constrains.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GateFlags: u8 {
        const PROTOCOL = 1 << 0;
        const DOMAIN = 1 << 1;
        const PATH = 1 << 2;
        const HASH = 1 << 3;
        const QUERY = 1 << 4;
        const SELECTOR = 1 << 5;
        const CONTAINS = 1 << 6;
        /// Gates that only look at the URL
        const URL = Self::PROTOCOL.bits()
            | Self::DOMAIN.bits()
            | Self::PATH.bits()
            | Self::HASH.bits()
            | Self::QUERY.bits();
    }
}

impl GateFlags {
    /// Lowercase gate names, for diagnostics.
    pub fn names(&self) -> Vec<&'static str> {
        const NAMES: [(GateFlags, &str); 7] = [
            (GateFlags::PROTOCOL, "protocol"),
            (GateFlags::DOMAIN, "domain"),
            (GateFlags::PATH, "path"),
            (GateFlags::HASH, "hash"),
            (GateFlags::QUERY, "queryParams"),
            (GateFlags::SELECTOR, "selector"),
            (GateFlags::CONTAINS, "contains"),
        ];
        NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

// =============================================================================
// Context Transformation
// =============================================================================

/// How a matching rule turns captures into a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTransformation", into = "RawTransformation")]
pub enum ContextTransformation {
    /// Captures pass through unchanged
    Default,
    /// Context is built only from rendered templates
    Replace(BTreeMap<String, String>),
    /// Captures plus rendered templates (templates win on conflict)
    Extend(BTreeMap<String, String>),
    /// Base64 JSON payload in the hash, flattened to dotted keys
    Metabase,
}

impl Default for ContextTransformation {
    fn default() -> Self {
        Self::Default
    }
}

impl ContextTransformation {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Replace(_) => "replace",
            Self::Extend(_) => "extend",
            Self::Metabase => "metabase",
        }
    }
}

/// Persisted `{type, data}` shape of a transformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTransformation {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Map<String, Value>>,
}

impl TryFrom<RawTransformation> for ContextTransformation {
    type Error = String;

    fn try_from(raw: RawTransformation) -> Result<Self, Self::Error> {
        let RawTransformation { kind, data } = raw;
        let templates = |data: Option<serde_json::Map<String, Value>>| -> Result<BTreeMap<String, String>, String> {
            let data = data.ok_or_else(|| format!("'{kind}' transformation requires data"))?;
            Ok(data
                .into_iter()
                .map(|(key, value)| match value {
                    Value::String(s) => (key, s),
                    other => (key, other.to_string()),
                })
                .collect())
        };

        match kind.as_str() {
            "default" => Ok(Self::Default),
            "replace" => Ok(Self::Replace(templates(data)?)),
            "extend" => Ok(Self::Extend(templates(data)?)),
            "metabase" => Ok(Self::Metabase),
            other => Err(format!("unknown context transformation type: {other}")),
        }
    }
}

impl From<ContextTransformation> for RawTransformation {
    fn from(value: ContextTransformation) -> Self {
        let kind = value.type_name().to_string();
        let data = match value {
            ContextTransformation::Replace(data) | ContextTransformation::Extend(data) => Some(
                data.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
            ),
            ContextTransformation::Default | ContextTransformation::Metabase => None,
        };
        Self { kind, data }
    }
}

// =============================================================================
// Provider Rule
// =============================================================================

/// A single allow/deny rule of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRule {
    pub id: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub match_patterns: MatchPatterns,
    #[serde(default)]
    pub name_template: Option<String>,
    #[serde(default)]
    pub context_transformation: ContextTransformation,
    #[serde(default, rename = "observeDOMMutations")]
    pub observe_dom_mutations: bool,
}

// =============================================================================
// Match Result
// =============================================================================

/// Context tagged with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    #[serde(rename = "providerID")]
    pub provider_id: Option<String>,
    pub data: Context,
}

/// Result of evaluating a provider's rules against a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    #[serde(rename = "match")]
    pub kind: MatchKind,
    /// Rule that produced the decision, if any
    #[serde(rename = "ruleID", skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub page_context: Option<PageContext>,
    pub page_name: Option<String>,
}

impl Default for MatchResult {
    fn default() -> Self {
        Self {
            kind: MatchKind::None,
            rule_id: None,
            page_context: None,
            page_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_persisted_rule() {
        let json = r#"{
            "id": "3f1c",
            "type": "allow",
            "observeDOMMutations": true,
            "contextTransformation": {"type": "replace", "data": {"foo": "{{user}}"}},
            "nameTemplate": null,
            "matchPatterns": {"domain": "*.cord.com", "queryParams": {"id[1 ]": ":user"}}
        }"#;
        let rule: ProviderRule = serde_json::from_str(json).expect("rule should parse");

        assert_eq!(rule.rule_type, RuleType::Allow);
        assert!(rule.observe_dom_mutations);
        assert_eq!(rule.match_patterns.domain.as_deref(), Some("*.cord.com"));
        assert_eq!(
            rule.match_patterns.query_params.as_ref().and_then(|q| q.get("id[1 ]")).map(String::as_str),
            Some(":user")
        );
        match rule.context_transformation {
            ContextTransformation::Replace(data) => assert_eq!(data["foo"], "{{user}}"),
            other => panic!("unexpected transformation {other:?}"),
        }
    }

    #[test]
    fn accepts_null_data_for_default_and_metabase() {
        let t: ContextTransformation = serde_json::from_str(r#"{"type": "default", "data": null}"#).unwrap();
        assert_eq!(t, ContextTransformation::Default);
        let t: ContextTransformation = serde_json::from_str(r#"{"type": "metabase"}"#).unwrap();
        assert_eq!(t, ContextTransformation::Metabase);
    }

    #[test]
    fn rejects_replace_without_data() {
        let err = serde_json::from_str::<ContextTransformation>(r#"{"type": "replace", "data": null}"#);
        assert!(err.is_err());
        let err = serde_json::from_str::<ContextTransformation>(r#"{"type": "upsert"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn gate_flags_follow_present_fields() {
        let patterns = MatchPatterns {
            domain: Some("*.cord.com".into()),
            hash: Some("users/:user".into()),
            ..Default::default()
        };
        let gates = patterns.gates();
        assert_eq!(gates, GateFlags::DOMAIN | GateFlags::HASH);
        assert_eq!(gates.names(), vec!["domain", "hash"]);
        assert!(GateFlags::URL.contains(gates));
    }
}
