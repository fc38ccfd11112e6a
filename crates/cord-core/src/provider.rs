//! Provider evaluation
//!
//! A provider owns an ordered rule list; the first rule that matches decides
//! whether Cord is allowed on the page and what its context is.

use serde::{Deserialize, Serialize};

use crate::matcher::CompiledRule;
use crate::template::Template;
use crate::transform::{template_scope, DecodeError};
use crate::types::{Context, MatchKind, MatchResult, PageContext, ProviderRule, RuleType};
use crate::url::{cleanup_url_with_options, NormalizedUrl, UrlError, UrlOptions};

/// Error type for provider evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("Rule {rule_id}: {source}")]
    Decode {
        rule_id: String,
        #[source]
        source: DecodeError,
    },
}

// =============================================================================
// Persisted Provider
// =============================================================================

fn default_true() -> bool {
    true
}

/// A content provider as persisted (camelCase JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleProvider {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "iconURL")]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub nux_text: Option<String>,
    #[serde(default)]
    pub disable_annotations: bool,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub rules: Vec<ProviderRule>,
    #[serde(default)]
    pub merge_hash_with_location: bool,
    #[serde(default = "default_true")]
    pub visible_in_discover_tools_section: bool,
    #[serde(default, rename = "platformApplicationID")]
    pub platform_application_id: Option<String>,
    /// Stored URL expectations for this provider's rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<ProviderRuleTest>,
}

/// A stored expectation: what the provider should produce for a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRuleTest {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    #[serde(default, rename = "documentHTML")]
    pub document_html: Option<String>,
    pub expected_match: MatchKind,
    #[serde(default)]
    pub expected_context_data: Option<Context>,
    #[serde(default)]
    pub expected_name: Option<String>,
}

// =============================================================================
// Compiled Provider
// =============================================================================

/// A provider with compiled rules.
#[derive(Debug, Clone)]
pub struct CompiledProvider {
    pub id: String,
    pub name: String,
    pub domains: Vec<String>,
    pub options: UrlOptions,
    pub rules: Vec<CompiledRule>,
}

impl CompiledProvider {
    pub fn new(provider: &RuleProvider) -> Self {
        Self {
            id: provider.id.clone(),
            name: provider.name.clone(),
            domains: provider.domains.iter().map(|d| d.trim().to_ascii_lowercase()).collect(),
            options: UrlOptions {
                merge_hash_with_location: provider.merge_hash_with_location,
            },
            rules: provider.rules.iter().map(CompiledRule::new).collect(),
        }
    }

    /// True when `domain` is one of the provider's domains or a subdomain of one.
    pub fn covers(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        self.domains.iter().any(|d| {
            domain == *d
                || domain
                    .strip_suffix(d.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Normalize `raw_url` with this provider's options and evaluate the rules.
    pub fn match_url(&self, raw_url: &str, document: Option<&str>) -> Result<MatchResult, ProviderError> {
        let url = cleanup_url_with_options(raw_url, self.options)?;
        self.match_normalized(&url, document)
    }

    /// Evaluate the rules in order; the first match decides.
    pub fn match_normalized(&self, url: &NormalizedUrl, document: Option<&str>) -> Result<MatchResult, ProviderError> {
        for rule in &self.rules {
            let Some(captures) = rule.captures(url, document) else {
                continue;
            };

            log::debug!("provider {} rule {} ({:?}) matched {}", self.id, rule.id, rule.rule_type, url);

            if rule.rule_type == RuleType::Deny {
                return Ok(MatchResult {
                    kind: MatchKind::Deny,
                    rule_id: Some(rule.id.clone()),
                    page_context: None,
                    page_name: None,
                });
            }

            let data = rule.transformation.apply(&captures, url).map_err(|source| ProviderError::Decode {
                rule_id: rule.id.clone(),
                source,
            })?;
            let page_name = rule
                .name_template
                .as_ref()
                .and_then(|template| render_page_name(template, &captures, &data, url));

            return Ok(MatchResult {
                kind: MatchKind::Allow,
                rule_id: Some(rule.id.clone()),
                page_context: Some(PageContext {
                    provider_id: Some(self.id.clone()),
                    data,
                }),
                page_name,
            });
        }

        Ok(MatchResult::default())
    }
}

/// Render a page name. Context entries shadow captures of the same name.
pub fn render_page_name(
    template: &Template,
    captures: &Context,
    context: &Context,
    url: &NormalizedUrl,
) -> Option<String> {
    let mut scope = template_scope(captures, url);
    for (key, value) in context {
        scope.insert(key.clone(), value.as_str());
    }
    let name = template.render(&scope);
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Pick the first provider covering the URL's domain and evaluate it.
pub fn match_providers(
    providers: &[CompiledProvider],
    raw_url: &str,
    document: Option<&str>,
) -> Result<MatchResult, ProviderError> {
    let url = crate::url::cleanup_url(raw_url)?;
    match providers.iter().find(|p| p.covers(url.domain())) {
        Some(provider) => provider.match_url(raw_url, document),
        None => Ok(MatchResult::default()),
    }
}

// =============================================================================
// Rule Tests
// =============================================================================

/// Result of one stored rule test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTestOutcome {
    pub url: String,
    pub actual: Option<MatchResult>,
    pub failures: Vec<String>,
}

impl RuleTestOutcome {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run stored expectations against a provider.
pub fn run_rule_tests(provider: &CompiledProvider, tests: &[ProviderRuleTest]) -> Vec<RuleTestOutcome> {
    tests
        .iter()
        .map(|test| {
            let actual = match provider.match_url(&test.url, test.document_html.as_deref()) {
                Ok(result) => result,
                Err(err) => {
                    return RuleTestOutcome {
                        url: test.url.clone(),
                        actual: None,
                        failures: vec![err.to_string()],
                    }
                }
            };

            let mut failures = Vec::new();
            if actual.kind != test.expected_match {
                failures.push(format!(
                    "expected match {:?}, got {:?}",
                    test.expected_match, actual.kind
                ));
            }
            if let Some(expected) = &test.expected_context_data {
                let data = actual.page_context.as_ref().map(|c| &c.data);
                if data != Some(expected) {
                    failures.push(format!("expected context {expected:?}, got {data:?}"));
                }
            }
            if let Some(expected) = &test.expected_name {
                if actual.page_name.as_ref() != Some(expected) {
                    failures.push(format!("expected name {expected:?}, got {:?}", actual.page_name));
                }
            }

            RuleTestOutcome {
                url: test.url.clone(),
                actual: Some(actual),
                failures,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROVIDER: &str = r#"{
        "id": "a7b0e5a4-0d0c-4d6e-9f53-2d1c6a0b9e11",
        "name": "Cord Docs",
        "domains": ["cord.com"],
        "rules": [
            {
                "id": "deny-settings",
                "type": "deny",
                "matchPatterns": {"path": "settings/*"},
                "contextTransformation": {"type": "default", "data": null}
            },
            {
                "id": "docs",
                "type": "allow",
                "matchPatterns": {"domain": "*.cord.com", "path": "docs/:page"},
                "nameTemplate": "Docs: {{page}}",
                "contextTransformation": {"type": "extend", "data": {"section": "docs"}}
            },
            {
                "id": "everything",
                "type": "allow",
                "matchPatterns": {},
                "nameTemplate": "{{#if missing}}{{missing}}{{/if}}",
                "contextTransformation": {"type": "replace", "data": {"page": "{{url.pathname}}"}}
            }
        ],
        "tests": [
            {"url": "https://docs.cord.com/docs/intro", "expectedMatch": "allow",
             "expectedContextData": {"page": "intro", "section": "docs"}, "expectedName": "Docs: intro"},
            {"url": "https://cord.com/settings/profile", "expectedMatch": "deny"},
            {"url": "https://cord.com/pricing", "expectedMatch": "none"}
        ]
    }"#;

    fn provider() -> (RuleProvider, CompiledProvider) {
        let provider: RuleProvider = serde_json::from_str(PROVIDER).expect("provider should parse");
        let compiled = CompiledProvider::new(&provider);
        (provider, compiled)
    }

    #[test]
    fn test_first_matching_rule_decides() {
        let (_, p) = provider();

        let result = p.match_url("https://docs.cord.com/docs/intro", None).unwrap();
        assert_eq!(result.kind, MatchKind::Allow);
        assert_eq!(result.rule_id.as_deref(), Some("docs"));
        assert_eq!(result.page_name.as_deref(), Some("Docs: intro"));
        let ctx = result.page_context.unwrap();
        assert_eq!(ctx.provider_id.as_deref(), Some("a7b0e5a4-0d0c-4d6e-9f53-2d1c6a0b9e11"));
        assert_eq!(ctx.data["page"], "intro");
        assert_eq!(ctx.data["section"], "docs");

        let result = p.match_url("https://cord.com/settings/profile", None).unwrap();
        assert_eq!(result.kind, MatchKind::Deny);
        assert!(result.page_context.is_none());

        let result = p.match_url("https://cord.com/pricing", None).unwrap();
        assert_eq!(result.kind, MatchKind::Allow);
        assert_eq!(result.rule_id.as_deref(), Some("everything"));
        assert_eq!(result.page_name, None);
        assert_eq!(result.page_context.unwrap().data["page"], "/pricing");
    }

    #[test]
    fn test_covers_domains() {
        let (_, p) = provider();
        assert!(p.covers("cord.com"));
        assert!(p.covers("docs.CORD.com"));
        assert!(!p.covers("notcord.com"));
        assert!(!p.covers("cord.com.evil.io"));
    }

    #[test]
    fn test_match_providers_picks_covering_provider() {
        let (_, p) = provider();
        let providers = vec![p];
        let result = match_providers(&providers, "https://docs.cord.com/docs/api", None).unwrap();
        assert_eq!(result.rule_id.as_deref(), Some("docs"));

        let result = match_providers(&providers, "https://example.org/docs/api", None).unwrap();
        assert_eq!(result, MatchResult::default());

        assert!(match_providers(&providers, "::", None).is_err());
    }

    #[test]
    fn test_rule_tests_report_mismatches() {
        let (raw, p) = provider();
        let outcomes = run_rule_tests(&p, &raw.tests);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].passed(), "{:?}", outcomes[0].failures);
        assert!(outcomes[1].passed(), "{:?}", outcomes[1].failures);
        // the catch-all rule allows /pricing
        assert!(!outcomes[2].passed());
        assert!(outcomes[2].failures[0].contains("expected match None"));
    }

    #[test]
    fn test_merge_hash_with_location() {
        let provider: RuleProvider = serde_json::from_str(
            r#"{
                "id": "snowflake",
                "name": "Snowflake",
                "domains": ["app.snowflake.com"],
                "mergeHashWithLocation": true,
                "rules": [{
                    "id": "worksheet",
                    "type": "allow",
                    "matchPatterns": {"path": "worksheets/:sheet", "queryParams": {"tab": ":tab"}},
                    "contextTransformation": {"type": "default"}
                }]
            }"#,
        )
        .unwrap();
        let p = CompiledProvider::new(&provider);
        let result = p
            .match_url("https://app.snowflake.com/#/worksheets/w1?tab=results", None)
            .unwrap();
        let data = result.page_context.unwrap().data;
        assert_eq!(data["sheet"], "w1");
        assert_eq!(data["tab"], "results");
    }
}
