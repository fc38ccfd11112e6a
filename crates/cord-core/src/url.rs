//! URL normalization
//!
//! `cleanup_url` turns a raw absolute URL into the structured form every gate
//! of the matcher works on. The result round-trips: `cleanup_url(&u.href())`
//! yields `u` again.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::{form_urlencoded, Url};

/// Characters escaped when a decoded path segment is written back out.
const SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'\\')
    .add(b'{')
    .add(b'}');

/// Error type for URL normalization.
#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("Invalid URL '{input}': {source}")]
    Parse {
        input: String,
        #[source]
        source: url::ParseError,
    },
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Provider-level normalization switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrlOptions {
    /// Re-read the fragment as `path?query` (routes living after `#`)
    pub merge_hash_with_location: bool,
}

// =============================================================================
// Query Parameters
// =============================================================================

/// Percent-decoded query pairs in URL order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    /// First value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Form-encoded representation without the leading `?`.
    pub fn serialize(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }
}

impl FromIterator<(String, String)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// Normalized URL
// =============================================================================

/// Canonical structured form of an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUrl {
    protocol: String,
    domain: String,
    port: Option<u16>,
    segments: Vec<String>,
    hash: String,
    query: QueryParams,
}

impl NormalizedUrl {
    /// Lowercased scheme without the trailing colon.
    #[inline]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Lowercased hostname.
    #[inline]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Explicit, non-default port.
    #[inline]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Decoded path segments, without the empty leading/trailing ones.
    #[inline]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Decoded path with no leading or trailing slash; empty for root.
    pub fn path(&self) -> String {
        self.segments.join("/")
    }

    /// Path as a browser would report it (`/` for root).
    pub fn pathname(&self) -> String {
        format!("/{}", self.path())
    }

    /// Fragment without the leading `#`.
    #[inline]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    #[inline]
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Hostname plus explicit port.
    pub fn host(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.domain, port),
            None => self.domain.clone(),
        }
    }

    /// `?query`, or empty when there are no parameters.
    pub fn search(&self) -> String {
        if self.query.is_empty() {
            String::new()
        } else {
            format!("?{}", self.query.serialize())
        }
    }

    /// Canonical string form. Normalizing it again gives back `self`.
    pub fn href(&self) -> String {
        let mut out = format!("{}://{}/", self.protocol, self.host());
        let encoded: Vec<String> = self
            .segments
            .iter()
            .map(|s| utf8_percent_encode(s, SEGMENT_ENCODE_SET).to_string())
            .collect();
        out.push_str(&encoded.join("/"));
        // An empty last segment was a doubled trailing slash; keep one more so
        // the single stripped slash does not eat it on the next pass.
        if self.segments.last().is_some_and(|s| s.is_empty()) {
            out.push('/');
        }
        out.push_str(&self.search());
        if !self.hash.is_empty() {
            out.push('#');
            out.push_str(&self.hash);
        }
        out
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href())
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize a raw absolute URL.
pub fn cleanup_url(raw: &str) -> Result<NormalizedUrl, UrlError> {
    cleanup_url_with_options(raw, UrlOptions::default())
}

/// Normalize a raw absolute URL with provider-specific options.
pub fn cleanup_url_with_options(raw: &str, options: UrlOptions) -> Result<NormalizedUrl, UrlError> {
    let input = raw.trim();
    let mut parsed = Url::parse(input).map_err(|source| UrlError::Parse {
        input: input.to_string(),
        source,
    })?;

    if options.merge_hash_with_location {
        parsed = merge_hash_with_location(parsed, input)?;
    }

    from_parsed(&parsed, input)
}

fn merge_hash_with_location(parsed: Url, input: &str) -> Result<Url, UrlError> {
    let location = match parsed.fragment() {
        Some(fragment) if !fragment.is_empty() => {
            if fragment.starts_with('/') {
                fragment.to_string()
            } else {
                format!("/{fragment}")
            }
        }
        _ => return Ok(parsed),
    };

    parsed.join(&location).map_err(|source| UrlError::Parse {
        input: input.to_string(),
        source,
    })
}

fn from_parsed(parsed: &Url, input: &str) -> Result<NormalizedUrl, UrlError> {
    let domain = match parsed.host_str() {
        Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
        _ => return Err(UrlError::MissingHost(input.to_string())),
    };

    let mut segments: Vec<String> = parsed
        .path_segments()
        .map(|split| {
            split
                .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();

    // path_segments() already dropped the leading slash
    if segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }

    Ok(NormalizedUrl {
        protocol: parsed.scheme().to_ascii_lowercase(),
        domain,
        port: parsed.port(),
        segments,
        hash: parsed.fragment().unwrap_or_default().to_string(),
        query: parsed.query_pairs().into_owned().collect(),
    })
}
