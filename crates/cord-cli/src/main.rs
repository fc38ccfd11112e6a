//! Cord CLI
//!
//! CLI tool for normalizing URLs and checking provider rule files.

mod rules;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};

use cord_compiler::{parse_rules, Severity};
use cord_core::{cleanup_url_with_options, match_url_against_rule, MatchResult, UrlOptions};

use rules::{load_rule_set, read_text};

#[derive(Parser)]
#[command(name = "cord-cli")]
#[command(about = "Cord page context rule tools")]
struct Cli {
    /// Log matching decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the normalized form of a URL
    Normalize {
        url: String,

        /// Treat a `#/route` fragment as part of the path
        #[arg(long)]
        merge_hash: bool,
    },

    /// Match a URL against provider files
    Match {
        /// Provider files
        #[arg(short, long, required = true)]
        rules: Vec<String>,

        /// URL to match
        #[arg(short, long)]
        url: String,

        /// Page text for `contains` gates
        #[arg(short, long)]
        document: Option<PathBuf>,
    },

    /// Match a URL against a single rule, or each rule of an array
    Eval {
        /// Rule file
        #[arg(short, long)]
        rule: PathBuf,

        /// URL to match
        #[arg(short, long)]
        url: String,
    },

    /// Compile provider files and report problems
    Check {
        /// Provider files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Fail on warnings too
        #[arg(long)]
        strict: bool,
    },

    /// Run the tests stored with providers
    Test {
        /// Provider files
        #[arg(short, long, required = true)]
        input: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    Builder::from_env(Env::default().default_filter_or(if cli.verbose { "debug" } else { "warn" })).init();

    let result = match cli.command {
        Commands::Normalize { url, merge_hash } => cmd_normalize(&url, merge_hash),
        Commands::Match { rules, url, document } => cmd_match(&rules, &url, document, cli.verbose),
        Commands::Eval { rule, url } => cmd_eval(&rule, &url),
        Commands::Check { input, strict } => cmd_check(&input, strict, cli.verbose),
        Commands::Test { input } => cmd_test(&input, cli.verbose),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_normalize(url: &str, merge_hash: bool) -> Result<(), String> {
    let options = UrlOptions {
        merge_hash_with_location: merge_hash,
    };
    let normalized = cleanup_url_with_options(url, options).map_err(|e| e.to_string())?;

    println!("{normalized}");
    println!("  Protocol:    {}", normalized.protocol());
    println!("  Domain:      {}", normalized.domain());
    println!("  Path:        {}", normalized.pathname());
    println!("  Hash:        {}", normalized.hash());
    for (key, value) in normalized.query().iter() {
        println!("  Query:       {key} = {value}");
    }

    Ok(())
}

fn cmd_match(inputs: &[String], url: &str, document: Option<PathBuf>, verbose: bool) -> Result<(), String> {
    let (rules, _, _) = load_rule_set(inputs, verbose)?;
    let document = document.as_deref().map(read_text).transpose()?;

    let result = rules
        .match_url(url, document.as_deref())
        .map_err(|e| e.to_string())?;

    print_json(&result)
}

fn cmd_eval(rule: &std::path::Path, url: &str) -> Result<(), String> {
    let rules = parse_rules(&read_text(rule)?).map_err(|e| format!("Failed to parse '{}': {}", rule.display(), e))?;
    let normalized = cleanup_url_with_options(url, UrlOptions::default()).map_err(|e| e.to_string())?;

    for rule in &rules {
        match match_url_against_rule(rule, &normalized).map_err(|e| format!("rule {}: {}", rule.id, e))? {
            Some(context) => {
                println!("{}: match", rule.id);
                for (key, value) in &context {
                    println!("  {key}: {value}");
                }
            }
            None => println!("{}: no match", rule.id),
        }
    }

    Ok(())
}

fn cmd_check(inputs: &[String], strict: bool, verbose: bool) -> Result<(), String> {
    let (rules, diagnostics, stats) = load_rule_set(inputs, verbose)?;

    for diagnostic in &diagnostics {
        println!("{diagnostic}");
    }

    println!("Checked {} files", inputs.len());
    println!("  Version:     {}", rules.version.as_deref().unwrap_or("-"));
    println!("  Providers:   {}", stats.providers);
    println!(
        "  Rules:       {} -> {} (deduped {}, unreachable {})",
        stats.rules_before, stats.rules_after, stats.rules_deduped, stats.rules_unreachable
    );
    println!("  Tests:       {}", rules.test_count());
    println!("  Time:        {:.1}ms", stats.total_ms);

    let errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
    let warnings = diagnostics.len() - errors;
    if errors > 0 || (strict && warnings > 0) {
        return Err(format!("{errors} errors, {warnings} warnings"));
    }

    Ok(())
}

fn cmd_test(inputs: &[String], verbose: bool) -> Result<(), String> {
    let (rules, _, _) = load_rule_set(inputs, verbose)?;
    let outcomes = rules.run_tests();

    let mut failed = 0usize;
    for (provider_id, outcome) in &outcomes {
        if outcome.passed() {
            if verbose {
                println!("ok      {provider_id} {}", outcome.url);
            }
            continue;
        }
        failed += 1;
        println!("FAILED  {provider_id} {}", outcome.url);
        for failure in &outcome.failures {
            println!("          {failure}");
        }
    }

    println!("{} tests, {} passed, {} failed", outcomes.len(), outcomes.len() - failed, failed);

    if failed > 0 {
        return Err(format!("{failed} rule tests failed"));
    }
    Ok(())
}

fn print_json(result: &MatchResult) -> Result<(), String> {
    let json = serde_json::to_string_pretty(result)
        .map_err(|e| format!("Failed to serialize result: {}", e))?;
    println!("{json}");
    Ok(())
}
