//! Rule Matching Engine
//!
//! A rule matches when every gate it constrains passes, evaluated in order:
//! protocol, domain, path, hash, query parameters, then the document gates.
//! Captures of all gates are merged; a name bound twice keeps the value of
//! the later gate.

use crate::pattern::{DomainPattern, HashPattern, PathPattern, PatternError, QueryPattern, Segment};
use crate::template::Template;
use crate::transform::{CompiledTransformation, DecodeError};
use crate::types::{Captures, Context, GateFlags, MatchPatterns, ProviderRule, RuleType};
use crate::url::NormalizedUrl;

// =============================================================================
// Match Pattern
// =============================================================================

/// Compiled form of [`MatchPatterns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
    protocol: Option<String>,
    domain: Option<DomainPattern>,
    path: Option<PathPattern>,
    hash: Option<HashPattern>,
    query: Option<QueryPattern>,
    contains: Option<String>,
    has_selector: bool,
    /// Set when a pattern string did not compile; such a pattern never matches
    error: Option<PatternError>,
}

impl MatchPattern {
    /// Compile all dimensions, failing on the first malformed one.
    pub fn try_compile(patterns: &MatchPatterns) -> Result<Self, PatternError> {
        Ok(Self {
            protocol: patterns
                .protocol
                .as_deref()
                .map(|p| p.trim().trim_end_matches(':').to_ascii_lowercase()),
            domain: patterns.domain.as_deref().map(DomainPattern::compile).transpose()?,
            path: patterns.path.as_deref().map(PathPattern::compile).transpose()?,
            hash: patterns.hash.as_deref().map(HashPattern::compile).transpose()?,
            query: patterns
                .query_params
                .as_ref()
                .map(|params| QueryPattern::compile(params))
                .transpose()?,
            contains: patterns.contains.clone(),
            has_selector: patterns.selector.is_some(),
            error: None,
        })
    }

    /// Compile all dimensions. A malformed pattern yields a never-matching
    /// pattern instead of an error.
    pub fn compile(patterns: &MatchPatterns) -> Self {
        Self::try_compile(patterns).unwrap_or_else(|err| {
            log::warn!("rule pattern will never match: {err}");
            Self {
                protocol: None,
                domain: None,
                path: None,
                hash: None,
                query: None,
                contains: None,
                has_selector: false,
                error: Some(err),
            }
        })
    }

    /// Compile error that disabled this pattern, if any.
    pub fn error(&self) -> Option<&PatternError> {
        self.error.as_ref()
    }

    /// Capture names bound by each gate, in gate order.
    pub fn capture_names(&self) -> Vec<(GateFlags, &str)> {
        let mut gates: Vec<(GateFlags, Vec<&Segment>)> = Vec::new();
        if let Some(domain) = &self.domain {
            gates.push((GateFlags::DOMAIN, domain.segments().collect()));
        }
        if let Some(path) = &self.path {
            gates.push((GateFlags::PATH, path.segments().iter().collect()));
        }
        if let Some(hash) = &self.hash {
            gates.push((GateFlags::HASH, hash.segments()));
        }
        if let Some(query) = &self.query {
            gates.push((GateFlags::QUERY, query.segments().collect()));
        }

        gates
            .into_iter()
            .flat_map(|(gate, segments)| {
                segments
                    .into_iter()
                    .filter_map(Segment::capture_name)
                    .map(move |name| (gate, name))
            })
            .collect()
    }

    /// Match against a URL only. Patterns with document gates never match.
    pub fn match_url(&self, url: &NormalizedUrl) -> Option<Captures> {
        self.match_page(url, None)
    }

    /// Match against a URL and, for `contains`, the page's document text.
    pub fn match_page(&self, url: &NormalizedUrl, document: Option<&str>) -> Option<Captures> {
        if self.error.is_some() {
            return None;
        }

        let mut captures = Captures::new();

        if let Some(protocol) = &self.protocol {
            if !protocol.eq_ignore_ascii_case(url.protocol()) {
                return reject(GateFlags::PROTOCOL);
            }
        }

        if let Some(domain) = &self.domain {
            if !domain.matches(url.domain(), &mut captures) {
                return reject(GateFlags::DOMAIN);
            }
        }

        if let Some(path) = &self.path {
            if !path.matches(url.segments(), &mut captures) {
                return reject(GateFlags::PATH);
            }
        }

        if let Some(hash) = &self.hash {
            if !hash.matches(url.hash(), &mut captures) {
                return reject(GateFlags::HASH);
            }
        }

        if let Some(query) = &self.query {
            if !query.matches(url.query(), &mut captures) {
                return reject(GateFlags::QUERY);
            }
        }

        if self.has_selector {
            return reject(GateFlags::SELECTOR);
        }

        if let Some(needle) = &self.contains {
            if !document.is_some_and(|doc| doc.contains(needle.as_str())) {
                return reject(GateFlags::CONTAINS);
            }
        }

        Some(captures)
    }
}

#[inline]
fn reject(gate: GateFlags) -> Option<Captures> {
    log::trace!("gate {:?} rejected", gate.names());
    None
}

// =============================================================================
// Compiled Rule
// =============================================================================

/// A provider rule with its patterns compiled, ready for repeated matching.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub rule_type: RuleType,
    pub pattern: MatchPattern,
    pub transformation: CompiledTransformation,
    pub name_template: Option<Template>,
    pub observe_dom_mutations: bool,
    pub gates: GateFlags,
}

impl CompiledRule {
    pub fn new(rule: &ProviderRule) -> Self {
        Self {
            id: rule.id.clone(),
            rule_type: rule.rule_type,
            pattern: MatchPattern::compile(&rule.match_patterns),
            transformation: CompiledTransformation::compile(&rule.context_transformation),
            name_template: rule.name_template.as_deref().map(Template::parse),
            observe_dom_mutations: rule.observe_dom_mutations,
            gates: rule.match_patterns.gates(),
        }
    }

    /// Captures of a successful match, without transformation.
    pub fn captures(&self, url: &NormalizedUrl, document: Option<&str>) -> Option<Captures> {
        self.pattern.match_page(url, document)
    }

    /// Match and transform. `Ok(None)` when any gate rejects.
    pub fn match_url(&self, url: &NormalizedUrl) -> Result<Option<Context>, DecodeError> {
        self.match_page(url, None)
    }

    pub fn match_page(&self, url: &NormalizedUrl, document: Option<&str>) -> Result<Option<Context>, DecodeError> {
        let Some(captures) = self.captures(url, document) else {
            return Ok(None);
        };
        log::debug!("rule {} matched {}", self.id, url);
        self.transformation.apply(&captures, url).map(Some)
    }
}

/// Evaluate one rule against a normalized URL.
///
/// Returns `Ok(None)` when any gate rejects the URL, and the transformed
/// context otherwise. Only a malformed `metabase` payload is an error.
pub fn match_url_against_rule(rule: &ProviderRule, url: &NormalizedUrl) -> Result<Option<Context>, DecodeError> {
    CompiledRule::new(rule).match_url(url)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::ContextTransformation;
    use crate::url::cleanup_url;

    fn rule(match_patterns: MatchPatterns, context_transformation: ContextTransformation) -> ProviderRule {
        ProviderRule {
            id: "8d1f0c6e-2b7a-4c55-9a43-4f0f3c1e6a10".to_string(),
            rule_type: RuleType::Allow,
            match_patterns,
            name_template: None,
            context_transformation,
            observe_dom_mutations: false,
        }
    }

    fn patterns(domain: Option<&str>, path: Option<&str>) -> MatchPatterns {
        MatchPatterns {
            domain: domain.map(str::to_string),
            path: path.map(str::to_string),
            ..Default::default()
        }
    }

    fn run(rule: &ProviderRule, url: &str) -> Option<Context> {
        match_url_against_rule(rule, &cleanup_url(url).unwrap()).unwrap()
    }

    fn context(pairs: &[(&str, &str)]) -> Context {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn templates(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        context(pairs)
    }

    #[test]
    fn test_default_context() {
        let r = rule(patterns(Some("*.cord.com"), Some("users/:user")), ContextTransformation::Default);
        assert_eq!(run(&r, "http://www.cord.com/users/andrei"), Some(context(&[("user", "andrei")])));
    }

    #[test]
    fn test_leading_and_trailing_slashes() {
        let r = rule(patterns(Some("*.cord.com"), Some("/users/:user")), ContextTransformation::Default);
        assert_eq!(run(&r, "http://www.cord.com/users/andrei"), Some(context(&[("user", "andrei")])));

        let r = rule(patterns(Some("*.cord.com"), Some("users/:user")), ContextTransformation::Default);
        assert_eq!(run(&r, "http://www.cord.com/users/andrei/"), Some(context(&[("user", "andrei")])));
    }

    #[test]
    fn test_root_path() {
        let r = rule(patterns(Some("*.cord.com"), Some("/")), ContextTransformation::Default);
        assert_eq!(run(&r, "http://www.cord.com/"), Some(Context::new()));
    }

    #[test]
    fn test_replace_with_constant() {
        let r = rule(
            patterns(Some("*.cord.com"), Some("users/:user")),
            ContextTransformation::Replace(templates(&[("foo", "bar")])),
        );
        assert_eq!(run(&r, "http://www.cord.com/users/andrei"), Some(context(&[("foo", "bar")])));
    }

    #[test]
    fn test_hash_route() {
        let mut p = patterns(Some("*.cord.com"), Some("*"));
        p.hash = Some("users/:user".to_string());
        let r = rule(p, ContextTransformation::Default);
        assert_eq!(run(&r, "http://www.cord.com#users/andrei"), Some(context(&[("user", "andrei")])));
    }

    #[test]
    fn test_hash_params() {
        let mut p = patterns(Some("*.cord.com"), Some("*"));
        p.hash = Some("user=:user&order=:order".to_string());
        let r = rule(p, ContextTransformation::Default);
        assert_eq!(
            run(&r, "http://www.cord.com#user=andrei&order=123"),
            Some(context(&[("user", "andrei"), ("order", "123")]))
        );
    }

    #[test]
    fn test_metabase_transformation() {
        let r = rule(
            patterns(Some("bi.:env.netpurpose.com"), Some("/question")),
            ContextTransformation::Metabase,
        );
        let out = run(
            &r,
            "https://bi.prod.netpurpose.com/question#eyJkYXRhc2V0X3F1ZXJ5Ijp7InF1ZXJ5Ijp7InNvdXJjZS10YWJsZSI6MywiZmlsdGVyIjpbImFuZCIsWyI9IixbImZpZWxkLWlkIiwzMF0sIjEiXV19LCJ0eXBlIjoicXVlcnkiLCJkYXRhYmFzZSI6MX0sImRpc3BsYXkiOiJ0YWJsZSIsInZpc3VhbGl6YXRpb25fc2V0dGluZ3MiOnt9fQ==",
        );
        assert_eq!(
            out,
            Some(context(&[
                ("dataset_query.query.source-table", "3"),
                ("dataset_query.query.filter.0", "and"),
                ("dataset_query.query.filter.1.0", "="),
                ("dataset_query.query.filter.1.1.0", "field-id"),
                ("dataset_query.query.filter.1.1.1", "30"),
                ("dataset_query.query.filter.1.2", "1"),
                ("dataset_query.type", "query"),
                ("dataset_query.database", "1"),
                ("display", "table"),
            ]))
        );
    }

    #[test]
    fn test_metabase_bad_payload_is_an_error() {
        let r = rule(patterns(None, Some("question")), ContextTransformation::Metabase);
        let url = cleanup_url("https://bi.cord.com/question#%%%").unwrap();
        assert!(match_url_against_rule(&r, &url).is_err());

        // no match means no decoding at all
        let url = cleanup_url("https://bi.cord.com/other#%%%").unwrap();
        assert!(matches!(match_url_against_rule(&r, &url), Ok(None)));
    }

    #[test]
    fn test_replace_sees_captures_and_url() {
        let r = rule(
            patterns(Some("*.cord.com"), Some("users/:user")),
            ContextTransformation::Replace(templates(&[
                ("user", "{{user}}"),
                ("hostname", "{{url.hostname}}"),
                ("pathname", "{{url.pathname}}"),
                ("query", "{{contextData url.query}}"),
            ])),
        );
        assert_eq!(
            run(&r, "http://www.cord.com/users/andrei?foo=bar"),
            Some(context(&[
                ("user", "andrei"),
                ("hostname", "www.cord.com"),
                ("pathname", "/users/andrei"),
                ("query", "foo: bar"),
            ]))
        );
    }

    #[test]
    fn test_single_context_for_entire_site() {
        let r = rule(
            patterns(Some("*.cord.com"), Some("*")),
            ContextTransformation::Replace(templates(&[("foo", "bar")])),
        );
        let first = run(&r, "http://www.cord.com/foo");
        let second = run(&r, "http://www.cord.com/foo/bar");
        assert_eq!(first, second);
        assert_eq!(first, Some(context(&[("foo", "bar")])));
    }

    #[test]
    fn test_context_per_path() {
        let r = rule(
            patterns(Some("*.cord.com"), Some("*")),
            ContextTransformation::Replace(templates(&[(
                "path",
                "{{#if url.pathname}}{{url.pathname}}{{else}}{{url.href}}{{/if}}",
            )])),
        );
        assert_eq!(run(&r, "http://www.cord.com/foo"), Some(context(&[("path", "/foo")])));
        assert_eq!(run(&r, "http://www.cord.com/foo/bar"), Some(context(&[("path", "/foo/bar")])));
    }

    fn query_rule(params: &[(&str, &str)]) -> ProviderRule {
        let mut p = patterns(Some("*.cord.com"), None);
        p.query_params = Some(templates(params));
        rule(p, ContextTransformation::Default)
    }

    #[test]
    fn test_query_params_with_malformed_keys() {
        let r = query_rule(&[("section", "users"), ("id[1 ]", ":user")]);
        assert_eq!(
            run(&r, "http://www.cord.com/foo?section=users&id%5B1%20%5D=%7Bandrei%20%22%3A%5Bthebest%29"),
            Some(context(&[("user", "{andrei \":[thebest)")]))
        );
    }

    #[test]
    fn test_query_params_url_encoded() {
        let r = query_rule(&[("section", "users"), ("id", ":user")]);
        assert_eq!(
            run(&r, "http://www.cord.com/foo?section=users&id=%7B%22andrei%22%3A%22is%5Bthe%5D%28best%29%22%7D"),
            Some(context(&[("user", "{\"andrei\":\"is[the](best)\"}")]))
        );
        assert_eq!(
            run(&r, "http://www.cord.com/foo?section=users&id=andrei&extra=1"),
            Some(context(&[("user", "andrei")]))
        );
    }

    #[test]
    fn test_query_param_missing_or_different() {
        let r = query_rule(&[("user", ":user")]);
        assert_eq!(run(&r, "http://www.cord.com/foo?section=about"), None);

        let r = query_rule(&[("section", "users"), ("id", ":user")]);
        assert_eq!(run(&r, "http://www.cord.com/foo?section=about&id=andrei"), None);
    }

    #[test]
    fn test_http_and_https_by_default() {
        let r = rule(patterns(Some("*.cord.com"), Some("users/:user")), ContextTransformation::Default);
        let secure = run(&r, "https://www.cord.com/users/andrei");
        let plain = run(&r, "http://www.cord.com/users/andrei");
        assert!(secure.is_some());
        assert_eq!(secure, plain);
    }

    #[test]
    fn test_missing_domain_does_not_loosen_path() {
        let r = rule(patterns(None, Some("/users/:user")), ContextTransformation::Default);
        assert_eq!(run(&r, "https://www.cord.com/users/andrei"), Some(context(&[("user", "andrei")])));
        assert_eq!(run(&r, "https://www.cord.com/something/users/andrei"), None);
    }

    #[test]
    fn test_single_gate_failures() {
        let mut p = patterns(Some("*.cord.com"), Some("*"));
        p.protocol = Some("ftp".to_string());
        assert_eq!(run(&rule(p, ContextTransformation::Default), "http://www.cord.com/"), None);

        let r = rule(patterns(Some("cord.com"), Some("*")), ContextTransformation::Default);
        assert_eq!(run(&r, "http://www.cord.com/"), None);

        let r = rule(patterns(Some("*.cord.com"), Some("something")), ContextTransformation::Default);
        assert_eq!(run(&r, "http://www.cord.com/"), None);

        let mut p = patterns(Some("*.cord.com"), None);
        p.hash = Some("andrei".to_string());
        assert_eq!(run(&rule(p, ContextTransformation::Default), "http://www.cord.com/"), None);
    }

    #[test]
    fn test_explicit_protocol_matches_case_insensitively() {
        let mut p = patterns(None, None);
        p.protocol = Some("FTP:".to_string());
        let r = rule(p, ContextTransformation::Default);
        assert_eq!(run(&r, "ftp://files.cord.com/a"), Some(Context::new()));
        assert_eq!(run(&r, "https://files.cord.com/a"), None);
    }

    #[test]
    fn test_empty_patterns_match_everything() {
        let r = rule(MatchPatterns::default(), ContextTransformation::Default);
        assert_eq!(run(&r, "https://anything.example.org/a/b?c=d#e"), Some(Context::new()));

        let r = rule(
            MatchPatterns::default(),
            ContextTransformation::Replace(templates(&[("site", "{{url.hostname}}")])),
        );
        assert_eq!(run(&r, "https://cord.com/"), Some(context(&[("site", "cord.com")])));
    }

    #[test]
    fn test_later_gate_wins_on_duplicate_capture() {
        let mut p = patterns(None, Some("users/:user"));
        p.query_params = Some(templates(&[("as", ":user")]));
        let r = rule(p, ContextTransformation::Default);
        assert_eq!(
            run(&r, "https://cord.com/users/andrei?as=admin"),
            Some(context(&[("user", "admin")]))
        );
    }

    #[test]
    fn test_malformed_pattern_never_matches() {
        let r = rule(patterns(None, Some("users/:")), ContextTransformation::Default);
        let compiled = CompiledRule::new(&r);
        assert!(compiled.pattern.error().is_some());
        assert_eq!(compiled.match_url(&cleanup_url("https://cord.com/users/x").unwrap()).unwrap(), None);
    }

    #[test]
    fn test_document_gates() {
        let mut p = patterns(None, None);
        p.contains = Some("Dashboard".to_string());
        let compiled = CompiledRule::new(&rule(p, ContextTransformation::Default));
        let url = cleanup_url("https://cord.com/").unwrap();
        assert_eq!(compiled.match_page(&url, Some("<h1>Dashboard</h1>")).unwrap(), Some(Context::new()));
        assert_eq!(compiled.match_page(&url, Some("<h1>Home</h1>")).unwrap(), None);
        assert_eq!(compiled.match_url(&url).unwrap(), None);

        let mut p = patterns(None, None);
        p.selector = Some("#app".to_string());
        let compiled = CompiledRule::new(&rule(p, ContextTransformation::Default));
        assert_eq!(compiled.match_page(&url, Some("<div id=app>")).unwrap(), None);
    }

    #[test]
    fn test_capture_names_by_gate() {
        let mut p = patterns(Some(":tenant.cord.com"), Some("users/:user"));
        p.query_params = Some(templates(&[("as", ":user")]));
        let compiled = MatchPattern::compile(&p);
        assert_eq!(
            compiled.capture_names(),
            vec![
                (GateFlags::DOMAIN, "tenant"),
                (GateFlags::PATH, "user"),
                (GateFlags::QUERY, "user"),
            ]
        );
    }

    #[test]
    fn test_matching_is_deterministic() {
        let r = rule(patterns(Some("*.cord.com"), Some("users/:user")), ContextTransformation::Default);
        let compiled = CompiledRule::new(&r);
        let url = cleanup_url("https://www.cord.com/users/andrei").unwrap();
        let first = compiled.match_url(&url).unwrap();
        for _ in 0..3 {
            assert_eq!(compiled.match_url(&url).unwrap(), first);
        }
    }
}
