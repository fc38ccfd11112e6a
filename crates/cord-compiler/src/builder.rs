use std::collections::{HashMap, HashSet};
use std::fmt;

use cord_core::provider::RuleTestOutcome;
use cord_core::types::GateFlags;
use cord_core::{match_providers, run_rule_tests, CompiledProvider, MatchResult, ProviderError, ProviderRuleTest, RuleProvider};

use crate::parser::ProviderDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// A problem found while building a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub provider_id: String,
    pub rule_id: Option<String>,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule_id {
            Some(rule) => write!(f, "{}: provider {} rule {}: {}", self.severity, self.provider_id, rule, self.message),
            None => write!(f, "{}: provider {}: {}", self.severity, self.provider_id, self.message),
        }
    }
}

// =============================================================================
// Rule Set
// =============================================================================

/// Compiled providers plus the stored tests that came with them.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub version: Option<String>,
    pub providers: Vec<CompiledProvider>,
    tests: HashMap<String, Vec<ProviderRuleTest>>,
}

impl RuleSet {
    /// Evaluate a URL against the first provider covering its domain.
    pub fn match_url(&self, raw_url: &str, document: Option<&str>) -> Result<MatchResult, ProviderError> {
        match_providers(&self.providers, raw_url, document)
    }

    pub fn provider(&self, id: &str) -> Option<&CompiledProvider> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn rule_count(&self) -> usize {
        self.providers.iter().map(|p| p.rules.len()).sum()
    }

    pub fn test_count(&self) -> usize {
        self.tests.values().map(Vec::len).sum()
    }

    /// Run every provider's stored tests, in provider order.
    pub fn run_tests(&self) -> Vec<(String, RuleTestOutcome)> {
        self.providers
            .iter()
            .flat_map(|provider| {
                let tests = self.tests.get(&provider.id).map(Vec::as_slice).unwrap_or_default();
                run_rule_tests(provider, tests)
                    .into_iter()
                    .map(|outcome| (provider.id.clone(), outcome))
            })
            .collect()
    }
}

/// Compile a document into a rule set and collect diagnostics.
pub fn build_rule_set(document: ProviderDocument) -> (RuleSet, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let mut providers = Vec::with_capacity(document.providers.len());
    let mut tests = HashMap::new();

    for provider in document.providers {
        let compiled = CompiledProvider::new(&provider);
        check_provider(&provider, &compiled, &mut diagnostics);
        if !provider.tests.is_empty() {
            tests.insert(provider.id.clone(), provider.tests);
        }
        providers.push(compiled);
    }

    for diagnostic in &diagnostics {
        match diagnostic.severity {
            Severity::Error => log::warn!("{diagnostic}"),
            Severity::Warning => log::info!("{diagnostic}"),
        }
    }

    (
        RuleSet {
            version: document.version,
            providers,
            tests,
        },
        diagnostics,
    )
}

fn check_provider(provider: &RuleProvider, compiled: &CompiledProvider, out: &mut Vec<Diagnostic>) {
    let mut push = |rule_id: Option<&str>, severity, message: String| {
        out.push(Diagnostic {
            provider_id: provider.id.clone(),
            rule_id: rule_id.map(str::to_string),
            severity,
            message,
        })
    };

    if compiled.domains.is_empty() {
        push(None, Severity::Warning, "no domains; provider is never selected".to_string());
    }

    let mut rule_ids = HashSet::new();
    for rule in &compiled.rules {
        let id = Some(rule.id.as_str());

        if !rule_ids.insert(rule.id.as_str()) {
            push(id, Severity::Error, "duplicate rule id".to_string());
        }
        if let Some(err) = rule.pattern.error() {
            push(id, Severity::Error, format!("rule never matches: {err}"));
            continue;
        }
        if rule.gates.contains(GateFlags::SELECTOR) {
            push(id, Severity::Warning, "selector gate cannot be evaluated; rule never matches".to_string());
        }

        let mut bound: HashMap<&str, GateFlags> = HashMap::new();
        for (gate, name) in rule.pattern.capture_names() {
            if let Some(previous) = bound.insert(name, gate) {
                push(
                    id,
                    Severity::Warning,
                    format!(
                        "capture `{name}` is bound by {} and {}; the {} value wins",
                        previous.names().join(""),
                        gate.names().join(""),
                        gate.names().join(""),
                    ),
                );
            }
        }
    }
}
