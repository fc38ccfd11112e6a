use std::collections::HashSet;

use cord_core::{MatchPatterns, RuleProvider};

pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    /// Rules whose patterns repeat an earlier rule of the same provider
    pub deduped: usize,
    /// Rules that follow a catch-all rule
    pub unreachable: usize,
    /// Providers dropped because an earlier one has the same id
    pub duplicate_providers: usize,
}

/// Remove rules that can never be selected. Evaluation stops at the first
/// matching rule, so a later rule with the same patterns, or any rule after
/// one that constrains nothing, is dead.
pub fn optimize_providers(providers: &mut Vec<RuleProvider>) -> OptimizeStats {
    let mut seen_providers: HashSet<String> = HashSet::new();
    let providers_before = providers.len();
    providers.retain(|provider| seen_providers.insert(provider.id.clone()));
    let duplicate_providers = providers_before - providers.len();

    let before = providers.iter().map(|p| p.rules.len()).sum();
    let mut deduped = 0usize;
    let mut unreachable = 0usize;

    for provider in providers.iter_mut() {
        let mut seen: HashSet<MatchPatterns> = HashSet::new();
        let mut catch_all = false;

        provider.rules.retain(|rule| {
            if catch_all {
                unreachable += 1;
                return false;
            }
            if !seen.insert(rule.match_patterns.clone()) {
                deduped += 1;
                return false;
            }
            if rule.match_patterns.gates().is_empty() {
                catch_all = true;
            }
            true
        });
    }

    let after = providers.iter().map(|p| p.rules.len()).sum();
    log::debug!("optimized rules: {before} -> {after} (deduped {deduped}, unreachable {unreachable})");

    OptimizeStats {
        before,
        after,
        deduped,
        unreachable,
        duplicate_providers,
    }
}
