//! Cord Rule Compiler
//!
//! This crate loads provider documents, prunes dead rules and compiles the
//! result into a [`RuleSet`] with build diagnostics.

pub mod parser;
pub mod optimizer;
pub mod builder;

pub use builder::{build_rule_set, Diagnostic, RuleSet, Severity};
pub use optimizer::{optimize_providers, OptimizeStats};
pub use parser::{parse_provider_document, parse_rules, LoadError, ProviderDocument};
