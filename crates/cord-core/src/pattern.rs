//! Compiled match patterns
//!
//! Every pattern dimension of a rule is parsed once into tagged segments and
//! then evaluated against many URLs without re-parsing.
//!
//! Grammar shared by all dimensions:
//!
//! - `*` matches one segment (a leading `*` domain label matches one or more)
//! - `:name` binds the segment value to `name`
//! - anything else must match literally

use percent_encoding::percent_decode_str;
use url::form_urlencoded;

use crate::types::Captures;

/// Error type for malformed pattern strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Empty capture name in {dimension} pattern '{pattern}'")]
    EmptyCaptureName { dimension: &'static str, pattern: String },
    #[error("Invalid capture name ':{name}' in {dimension} pattern '{pattern}'")]
    InvalidCaptureName {
        dimension: &'static str,
        pattern: String,
        name: String,
    },
    #[error("Empty label in domain pattern '{0}'")]
    EmptyDomainLabel(String),
    #[error("Empty key in hash pattern '{0}'")]
    EmptyHashKey(String),
}

// =============================================================================
// Segments
// =============================================================================

/// One compiled pattern token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Capture(String),
    Wildcard,
}

impl Segment {
    fn parse(token: &str, dimension: &'static str, pattern: &str) -> Result<Self, PatternError> {
        if token == "*" {
            return Ok(Self::Wildcard);
        }

        let Some(name) = token.strip_prefix(':') else {
            return Ok(Self::Literal(token.to_string()));
        };

        if name.is_empty() {
            return Err(PatternError::EmptyCaptureName {
                dimension,
                pattern: pattern.to_string(),
            });
        }
        if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(PatternError::InvalidCaptureName {
                dimension,
                pattern: pattern.to_string(),
                name: name.to_string(),
            });
        }
        Ok(Self::Capture(name.to_string()))
    }

    /// Match a single value, binding captures. Captures and wildcards need a
    /// non-empty value.
    #[inline]
    fn matches(&self, value: &str, captures: &mut Captures) -> bool {
        match self {
            Self::Literal(lit) => lit == value,
            Self::Wildcard => !value.is_empty(),
            Self::Capture(name) => {
                if value.is_empty() {
                    return false;
                }
                captures.insert(name.clone(), value.to_string());
                true
            }
        }
    }

    /// Like `matches`, but literals and wildcards also accept an empty value.
    #[inline]
    fn matches_value(&self, value: &str, captures: &mut Captures) -> bool {
        match self {
            Self::Literal(lit) => lit == value,
            Self::Wildcard => true,
            Self::Capture(name) => {
                captures.insert(name.clone(), value.to_string());
                true
            }
        }
    }

    pub fn capture_name(&self) -> Option<&str> {
        match self {
            Self::Capture(name) => Some(name),
            _ => None,
        }
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// `application/x-www-form-urlencoded` decoding, where `+` is a space.
fn decode_form(s: &str) -> String {
    decode(&s.replace('+', " "))
}

/// Strip a single leading and a single trailing `/`.
fn trim_slashes(s: &str) -> &str {
    let s = s.strip_prefix('/').unwrap_or(s);
    s.strip_suffix('/').unwrap_or(s)
}

fn parse_segments(body: &str, dimension: &'static str, pattern: &str) -> Result<Vec<Segment>, PatternError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split('/')
        .map(|token| Segment::parse(&decode(token), dimension, pattern))
        .collect()
}

fn match_segments<S: AsRef<str>>(pattern: &[Segment], values: &[S], captures: &mut Captures) -> bool {
    pattern.len() == values.len()
        && pattern
            .iter()
            .zip(values)
            .all(|(seg, value)| seg.matches(value.as_ref(), captures))
}

// =============================================================================
// Domain
// =============================================================================

/// Dot-separated hostname pattern, aligned from the right.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainPattern {
    /// A leading `*` that absorbs one or more labels
    leading_wildcard: bool,
    labels: Vec<Segment>,
}

impl DomainPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let lowered = pattern.trim().to_ascii_lowercase();
        let mut tokens: Vec<&str> = lowered.split('.').collect();

        if tokens.iter().any(|t| t.is_empty()) {
            return Err(PatternError::EmptyDomainLabel(pattern.to_string()));
        }

        let leading_wildcard = tokens.first() == Some(&"*");
        if leading_wildcard {
            tokens.remove(0);
        }

        let labels = tokens
            .into_iter()
            .map(|t| Segment::parse(t, "domain", pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            leading_wildcard,
            labels,
        })
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.labels.iter()
    }

    pub fn matches(&self, domain: &str, captures: &mut Captures) -> bool {
        let host: Vec<&str> = domain.split('.').collect();

        if self.leading_wildcard {
            if host.len() <= self.labels.len() {
                return false;
            }
            let tail = &host[host.len() - self.labels.len()..];
            match_segments(&self.labels, tail, captures)
        } else {
            match_segments(&self.labels, &host, captures)
        }
    }
}

// =============================================================================
// Path
// =============================================================================

/// `/`-separated path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPattern {
    /// `*`: any path, root included
    Any,
    Segments(Vec<Segment>),
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let trimmed = pattern.trim();
        if trimmed == "*" {
            return Ok(Self::Any);
        }
        parse_segments(trim_slashes(trimmed), "path", pattern).map(Self::Segments)
    }

    pub fn segments(&self) -> &[Segment] {
        match self {
            Self::Any => &[],
            Self::Segments(segments) => segments,
        }
    }

    pub fn matches<S: AsRef<str>>(&self, segments: &[S], captures: &mut Captures) -> bool {
        match self {
            Self::Any => true,
            Self::Segments(pattern) => match_segments(pattern, segments, captures),
        }
    }
}

// =============================================================================
// Hash
// =============================================================================

/// Fragment pattern, either route-like or query-like.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashPattern {
    Any,
    /// `users/:user`
    Path(Vec<Segment>),
    /// `user=:user&order=:order`
    Params(Vec<(String, Segment)>),
}

impl HashPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let trimmed = pattern.trim();
        if trimmed == "*" {
            return Ok(Self::Any);
        }

        if !trimmed.contains('=') {
            return parse_segments(trim_slashes(trimmed), "hash", pattern).map(Self::Path);
        }

        let mut params = Vec::new();
        for token in trimmed.split('&').filter(|t| !t.is_empty()) {
            let (key, value) = token.split_once('=').unwrap_or((token, "*"));
            let key = decode_form(key);
            if key.is_empty() {
                return Err(PatternError::EmptyHashKey(pattern.to_string()));
            }
            params.push((key, Segment::parse(&decode_form(value), "hash", pattern)?));
        }
        Ok(Self::Params(params))
    }

    pub fn segments(&self) -> Vec<&Segment> {
        match self {
            Self::Any => Vec::new(),
            Self::Path(segments) => segments.iter().collect(),
            Self::Params(params) => params.iter().map(|(_, seg)| seg).collect(),
        }
    }

    pub fn matches(&self, hash: &str, captures: &mut Captures) -> bool {
        match self {
            Self::Any => true,
            Self::Path(pattern) => {
                let body = trim_slashes(hash);
                let values: Vec<String> = if body.is_empty() {
                    Vec::new()
                } else {
                    body.split('/').map(decode).collect()
                };
                match_segments(pattern, &values, captures)
            }
            Self::Params(pattern) => {
                let pairs: Vec<(String, String)> = form_urlencoded::parse(hash.as_bytes())
                    .into_owned()
                    .collect();
                pattern.iter().all(|(key, seg)| {
                    pairs
                        .iter()
                        .find(|(k, _)| k == key)
                        .is_some_and(|(_, v)| seg.matches_value(v, captures))
                })
            }
        }
    }
}

// =============================================================================
// Query Parameters
// =============================================================================

/// Required query parameters. Extra URL parameters are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryPattern(Vec<(String, Segment)>);

impl QueryPattern {
    pub fn compile<'a, I>(params: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        params
            .into_iter()
            .map(|(key, value)| {
                let pattern = format!("{key}={value}");
                Ok((key.clone(), Segment::parse(value, "queryParams", &pattern)?))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.0.iter().map(|(_, seg)| seg)
    }

    pub fn matches(&self, query: &crate::url::QueryParams, captures: &mut Captures) -> bool {
        self.0.iter().all(|(key, seg)| {
            query
                .get(key)
                .is_some_and(|value| seg.matches_value(value, captures))
        })
    }
}
