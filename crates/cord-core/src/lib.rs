//! Cord Page Context Core Library
//!
//! This crate decides whether a provider rule matches a URL and, if it does,
//! computes the page context (a flat string map) that collaboration threads
//! are attached to.
//!
//! # Architecture
//!
//! Rules are compiled once into segment patterns and then evaluated against
//! normalized URLs. Everything is immutable after construction, so compiled
//! rules can be shared across threads without locking.
//!
//! # Modules
//!
//! - `url`: URL normalization (`cleanup_url`)
//! - `pattern`: compiled domain/path/hash/query patterns
//! - `matcher`: gate evaluation and `match_url_against_rule`
//! - `template`: restricted template language for `replace`/`extend`
//! - `transform`: context transformations, including `metabase`
//! - `provider`: ordered provider evaluation and stored rule tests
//! - `types`: persisted rule types

pub mod matcher;
pub mod pattern;
pub mod provider;
pub mod template;
pub mod transform;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use matcher::{match_url_against_rule, CompiledRule, MatchPattern};
pub use provider::{match_providers, run_rule_tests, CompiledProvider, ProviderError, RuleProvider, ProviderRuleTest};
pub use transform::DecodeError;
pub use types::{Captures, Context, ContextTransformation, MatchKind, MatchPatterns, MatchResult, ProviderRule, RuleType};
pub use url::{cleanup_url, cleanup_url_with_options, NormalizedUrl, UrlError, UrlOptions};
