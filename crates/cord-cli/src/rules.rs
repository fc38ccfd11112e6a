use std::fs;
use std::path::Path;
use std::time::Instant;

use cord_compiler::{build_rule_set, optimize_providers, parse_provider_document, Diagnostic, ProviderDocument, RuleSet};

#[derive(Debug, Clone)]
pub struct LoadStats {
    pub providers: usize,
    pub rules_before: usize,
    pub rules_after: usize,
    pub rules_deduped: usize,
    pub rules_unreachable: usize,
    pub total_ms: f64,
}

/// Load provider documents from `inputs` and compile them into one rule set.
/// Later files may not redefine a provider id from an earlier one.
pub fn load_rule_set(inputs: &[String], verbose: bool) -> Result<(RuleSet, Vec<Diagnostic>, LoadStats), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut merged = ProviderDocument::default();

    for (index, path) in inputs.iter().enumerate() {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path, e))?;

        let document = parse_provider_document(&content)
            .map_err(|e| format!("Failed to parse '{}': {}", path, e))?;

        if verbose {
            println!(
                "  [{}] {} - {} providers, {} rules",
                index,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                document.providers.len(),
                document.providers.iter().map(|p| p.rules.len()).sum::<usize>()
            );
        }

        if merged.version.is_none() {
            merged.version = document.version;
        }
        merged.providers.extend(document.providers);
    }

    let optimize_stats = optimize_providers(&mut merged.providers);
    if optimize_stats.duplicate_providers > 0 {
        log::warn!("ignored {} providers with duplicate ids", optimize_stats.duplicate_providers);
    }

    let providers = merged.providers.len();
    let (rules, diagnostics) = build_rule_set(merged);

    let stats = LoadStats {
        providers,
        rules_before: optimize_stats.before,
        rules_after: optimize_stats.after,
        rules_deduped: optimize_stats.deduped,
        rules_unreachable: optimize_stats.unreachable,
        total_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    Ok((rules, diagnostics, stats))
}

pub fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}
