//! Candidate identity: URL canonicalization and content-addressed ids.
//!
//! Two URLs that differ only by tracking parameters, fragment, trailing slash,
//! duplicate slashes, default port, or scheme/host case canonicalize to the
//! same string and therefore to the same [`CandidateId`].
//!
//! # Example
//!
//! ```rust
//! use gleaner_core::identity::{canonicalize, identify};
//!
//! let a = canonicalize("https://Example.com/a?utm_source=x").unwrap();
//! let b = canonicalize("https://example.com/a/").unwrap();
//! assert_eq!(a, b);
//! assert_eq!(identify(&a), identify(&b));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use url::Url;
use url::form_urlencoded;

use crate::{GleanerError, Result};

/// Exact query keys dropped during canonicalization (compared case-insensitively).
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "_ga", "_hsenc", "_hsmi", "ref_src",
];

/// Any query key with this prefix is dropped.
const TRACKING_PREFIX: &str = "utm_";

/// Stable identifier for a candidate: lower-case hex SHA-256 of its canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    /// Wraps an id read back from storage.
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalizes a raw URL.
///
/// Lower-cases scheme and host, strips default ports, drops tracking query
/// parameters and sorts the rest, removes the fragment, collapses duplicate
/// slashes and strips the trailing slash (a bare domain keeps its root `/`).
///
/// # Errors
///
/// Returns [`GleanerError::InvalidUrl`] when the URL cannot be parsed, has no
/// host, or is not http/https.
pub fn canonicalize(raw_url: &str) -> Result<String> {
    let mut url = parse_web_url(raw_url)?;

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish();
        url.set_query(Some(&query));
    }

    let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
    let path = format!("/{}", segments.join("/"));
    url.set_path(&path);

    Ok(url.to_string())
}

/// Derives the candidate id for an already-canonical URL.
///
/// The id is the lower-case hex SHA-256 of the UTF-8 bytes, so it is stable
/// across restarts and reproducible by any implementation.
pub fn identify(canonical_url: &str) -> CandidateId {
    let digest = Sha256::digest(canonical_url.as_bytes());
    CandidateId(hex_lower(&digest))
}

/// Returns the learning key for a URL: its host, lower-cased, without a leading `www.`.
pub fn domain_of(url: &str) -> Result<String> {
    let url = parse_web_url(url)?;
    let host = url
        .host_str()
        .ok_or_else(|| GleanerError::InvalidUrl(format!("{url} has no host")))?
        .to_lowercase();
    Ok(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

fn parse_web_url(raw_url: &str) -> Result<Url> {
    let url = Url::parse(raw_url.trim()).map_err(|e| GleanerError::InvalidUrl(format!("{raw_url}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(GleanerError::InvalidUrl(format!("{raw_url}: unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(GleanerError::InvalidUrl(format!("{raw_url}: missing host")));
    }

    Ok(url)
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with(TRACKING_PREFIX) || TRACKING_PARAMS.contains(&key.as_str())
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// A discovered URL, normalized and deduplicated, awaiting fetch and extraction.
///
/// Candidates are immutable once created; re-discovery of the same canonical
/// URL produces the same `candidate_id` and is an idempotent upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: CandidateId,
    pub source_id: String,
    pub url: String,
    pub canonical_url: String,
    pub title: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub published_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub discovered_at: OffsetDateTime,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Candidate {
    /// Creates a candidate from a discovered URL.
    ///
    /// # Errors
    ///
    /// Returns [`GleanerError::InvalidUrl`] for malformed URLs.
    pub fn new(source_id: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let canonical_url = canonicalize(&url)?;
        Ok(Self {
            candidate_id: identify(&canonical_url),
            source_id: source_id.into(),
            url,
            canonical_url,
            title: None,
            published_at: None,
            discovered_at: OffsetDateTime::now_utc(),
            metadata: serde_json::Value::Null,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_published_at(mut self, published_at: OffsetDateTime) -> Self {
        self.published_at = Some(published_at);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
