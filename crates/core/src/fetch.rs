//! Fetch layer: retrieves raw bytes for a URL with retry, backoff and a content cache.
//!
//! A [`Fetcher`] pairs a [`Transport`] (the network) with an optional
//! [`DocumentStore`] cache keyed by [`CacheKey`]. Cache hits bypass the network
//! and the retry policy entirely.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gleaner_core::fetch::{FetchOptions, Fetcher, ReqwestTransport};
//! use gleaner_core::store::MemoryStore;
//!
//! # async fn example() -> gleaner_core::Result<()> {
//! let transport = Arc::new(ReqwestTransport::new(10)?);
//! let fetcher = Fetcher::new("http", transport).with_cache(Arc::new(MemoryStore::new()));
//! let result = fetcher.fetch("https://example.com/article", &FetchOptions::default()).await?;
//! println!("{} bytes from {}", result.body.len(), result.final_url);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::identity::{canonicalize, hex_lower};
use crate::retry::{self, Backoff, Exhausted, RetryPolicy};
use crate::store::DocumentStore;
use crate::{GleanerError, Result};

/// Per-call fetch options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Consult and populate the cache.
    pub use_cache: bool,
    /// Skip the cache lookup (the fresh result is still written back).
    pub force_refresh: bool,
    /// Total tries for the network request, including the first.
    pub max_retries: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User-Agent header sent with the request.
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            force_refresh: false,
            max_retries: 3,
            timeout: Duration::from_secs(20),
            user_agent: default_user_agent(),
        }
    }
}

/// User-Agent used when no per-fetcher value is configured.
pub fn default_user_agent() -> String {
    format!("gleaner/{}", env!("CARGO_PKG_VERSION"))
}

/// Raw fetch output. Owned by the caller for the duration of one fetch; cached
/// copies are owned by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub fetcher_name: String,
    pub status_code: u16,
    /// Terminal URL after redirects; its domain keys method learning.
    pub final_url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip)]
    pub body: Vec<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    pub from_cache: bool,
}

impl FetchResult {
    /// Body decoded as UTF-8 (lossily) with NUL characters removed.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).replace('\0', "")
    }

    /// Whether the payload is a PDF rather than markup.
    pub fn looks_like_pdf(&self) -> bool {
        if self.body.starts_with(b"%PDF-") {
            return true;
        }
        let content_type = self.headers.get("content-type").map(|v| v.to_ascii_lowercase());
        if content_type.is_some_and(|v| v.contains("application/pdf")) {
            return true;
        }
        url::Url::parse(&self.final_url).is_ok_and(|u| u.path().to_ascii_lowercase().ends_with(".pdf"))
    }
}

/// Structured cache key: canonical URL plus fetcher name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub canonical_url: String,
    pub fetcher_name: String,
}

impl CacheKey {
    /// Builds the key for a raw URL, canonicalizing it first.
    pub fn new(url: &str, fetcher_name: &str) -> Result<Self> {
        Ok(Self { canonical_url: canonicalize(url)?, fetcher_name: fetcher_name.to_string() })
    }

    /// Stable hex digest of the key, used for file names and document ids.
    ///
    /// Both fields are hashed through their JSON encoding, so no pair of
    /// distinct keys can collide by concatenation.
    pub fn digest(&self) -> String {
        let encoded = serde_json::to_vec(&(&self.canonical_url, &self.fetcher_name)).unwrap_or_default();
        hex_lower(&Sha256::digest(&encoded))
    }
}

/// One network request as seen by a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportRequest<'a> {
    pub url: &'a str,
    pub timeout: Duration,
    pub user_agent: &'a str,
}

/// Terminal response after redirects.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub final_url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Transport-level failures, before any HTTP status exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Connect(String),
    /// Connection reset or body cut off mid-transfer.
    Reset(String),
    TooManyRedirects,
    Other(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Connect(_) | TransportError::Reset(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => f.write_str("timeout"),
            TransportError::Connect(e) => write!(f, "connect error: {e}"),
            TransportError::Reset(e) => write!(f, "connection reset: {e}"),
            TransportError::TooManyRedirects => f.write_str("too many redirects"),
            TransportError::Other(e) => f.write_str(e),
        }
    }
}

/// The network seam of the fetch layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &TransportRequest<'_>) -> std::result::Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport following redirects up to a bounded hop count.
#[cfg(feature = "fetch")]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "fetch")]
impl ReqwestTransport {
    pub fn new(max_redirects: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .build()
            .map_err(GleanerError::Http)?;
        Ok(Self { client })
    }
}

#[cfg(feature = "fetch")]
#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &TransportRequest<'_>) -> std::result::Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(request.url)
            .timeout(request.timeout)
            .header("User-Agent", request.user_agent)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(TransportResponse { status, final_url, headers, body })
    }
}

#[cfg(feature = "fetch")]
fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_redirect() {
        TransportError::TooManyRedirects
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_request() || e.is_body() {
        TransportError::Reset(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

/// Why a single try failed.
#[derive(Debug, Clone, PartialEq)]
enum TryError {
    Status(u16),
    Transport(TransportError),
}

impl TryError {
    fn is_retryable(&self) -> bool {
        match self {
            TryError::Status(status) => *status >= 500 || *status == 429,
            TryError::Transport(e) => e.is_transient(),
        }
    }
}

impl fmt::Display for TryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryError::Status(status) => write!(f, "HTTP {status}"),
            TryError::Transport(e) => write!(f, "{e}"),
        }
    }
}

/// Named fetcher: transport, optional cache and backoff.
pub struct Fetcher {
    name: String,
    transport: Arc<dyn Transport>,
    cache: Option<Arc<dyn DocumentStore>>,
    backoff: Backoff,
}

impl Fetcher {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self { name: name.into(), transport, cache: None, backoff: Backoff::default() }
    }

    pub fn with_cache(mut self, cache: Arc<dyn DocumentStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetches a URL, serving from cache when allowed.
    ///
    /// # Errors
    ///
    /// - [`GleanerError::InvalidUrl`] when the URL cannot be canonicalized.
    /// - [`GleanerError::FetchFailed`] when tries are exhausted or a permanent
    ///   client error is returned.
    ///
    /// Cache read and write failures are logged and never fail the fetch.
    #[instrument(level = "debug", skip_all, fields(%url, fetcher = %self.name))]
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResult> {
        let key = CacheKey::new(url, &self.name)?;
        let cache = self.cache.as_ref().filter(|_| options.use_cache);

        if let Some(cache) = cache
            && !options.force_refresh
        {
            match cache.get_fetch(&key).await {
                Ok(Some(mut hit)) => {
                    debug!(final_url = %hit.final_url, "Fetch served from cache");
                    hit.from_cache = true;
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Cache lookup failed; fetching from network"),
            }
        }

        let policy = RetryPolicy::new(options.max_retries, self.backoff);
        let request = TransportRequest { url, timeout: options.timeout, user_agent: &options.user_agent };
        let transport = &self.transport;

        let outcome = retry::attempt(
            &policy,
            |try_number| {
                let request = request.clone();
                async move {
                    debug!(try_number, "Fetching");
                    match transport.get(&request).await {
                        Ok(response) if (200..400).contains(&response.status) => Ok(response),
                        Ok(response) => Err(TryError::Status(response.status)),
                        Err(e) => Err(TryError::Transport(e)),
                    }
                }
            },
            TryError::is_retryable,
        )
        .await;

        let response = match outcome {
            Ok(response) => response,
            Err(Exhausted { error, tries }) => {
                warn!(tries, last = %error, "Fetch failed");
                return Err(GleanerError::FetchFailed { url: url.to_string(), last: error.to_string() });
            }
        };

        let result = FetchResult {
            url: url.to_string(),
            fetcher_name: self.name.clone(),
            status_code: response.status,
            final_url: response.final_url,
            headers: response.headers,
            body: response.body,
            fetched_at: OffsetDateTime::now_utc(),
            from_cache: false,
        };
        info!(status = result.status_code, bytes = result.body.len(), final_url = %result.final_url, "Fetched");

        if let Some(cache) = cache
            && let Err(e) = cache.put_fetch(&key, &result).await
        {
            warn!(error = %e, "Cache write failed; continuing with fresh result");
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed sequence of responses and counts calls.
    struct ScriptedTransport {
        script: Mutex<VecDeque<std::result::Result<u16, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<std::result::Result<u16, TransportError>>) -> Self {
            Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, request: &TransportRequest<'_>) -> std::result::Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(200));
            next.map(|status| TransportResponse {
                status,
                final_url: request.url.to_string(),
                headers: BTreeMap::new(),
                body: format!("<html><body>{status}</body></html>").into_bytes(),
            })
        }
    }

    fn fetcher(transport: Arc<ScriptedTransport>, cache: Arc<MemoryStore>) -> Fetcher {
        Fetcher::new("http", transport).with_cache(cache).with_backoff(Backoff::none())
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_caches() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(500), Ok(500), Ok(200)]));
        let cache = Arc::new(MemoryStore::new());
        let fetcher = fetcher(transport.clone(), cache);
        let options = FetchOptions { max_retries: 3, ..Default::default() };

        let first = fetcher.fetch("https://example.com/a", &options).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.status_code, 200);
        assert_eq!(transport.calls(), 3);

        let second = fetcher.fetch("https://example.com/a?utm_source=feed", &options).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.body, first.body);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(404), Ok(200)]));
        let fetcher = fetcher(transport.clone(), Arc::new(MemoryStore::new()));

        let err = fetcher.fetch("https://example.com/missing", &FetchOptions::default()).await.unwrap_err();
        assert!(matches!(err, GleanerError::FetchFailed { ref last, .. } if last == "HTTP 404"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(429), Ok(200)]));
        let fetcher = fetcher(transport.clone(), Arc::new(MemoryStore::new()));

        let result = fetcher.fetch("https://example.com/a", &FetchOptions::default()).await.unwrap();
        assert_eq!(result.status_code, 200);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Reset("peer reset".into())),
            Ok(503),
        ]));
        let fetcher = fetcher(transport.clone(), Arc::new(MemoryStore::new()));

        let err = fetcher.fetch("https://example.com/a", &FetchOptions::default()).await.unwrap_err();
        assert!(matches!(err, GleanerError::FetchFailed { ref last, .. } if last == "HTTP 503"));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache_and_rewrites_it() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(200), Ok(203)]));
        let cache = Arc::new(MemoryStore::new());
        let fetcher = fetcher(transport.clone(), cache);

        fetcher.fetch("https://example.com/a", &FetchOptions::default()).await.unwrap();
        let refreshed = fetcher
            .fetch("https://example.com/a", &FetchOptions { force_refresh: true, ..Default::default() })
            .await
            .unwrap();
        assert!(!refreshed.from_cache);
        assert_eq!(transport.calls(), 2);

        let cached = fetcher.fetch("https://example.com/a", &FetchOptions::default()).await.unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.status_code, 203);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_hits_network() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let fetcher = fetcher(transport.clone(), Arc::new(MemoryStore::new()));
        let options = FetchOptions { use_cache: false, ..Default::default() };

        fetcher.fetch("https://example.com/a", &options).await.unwrap();
        fetcher.fetch("https://example.com/a", &options).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let fetcher = fetcher(Arc::new(ScriptedTransport::new(vec![])), Arc::new(MemoryStore::new()));
        let result = fetcher.fetch("not-a-url", &FetchOptions::default()).await;
        assert!(matches!(result, Err(GleanerError::InvalidUrl(_))));
    }

    #[test]
    fn test_cache_key_is_structured() {
        let a = CacheKey { canonical_url: "https://a.example/x|y".into(), fetcher_name: "z".into() };
        let b = CacheKey { canonical_url: "https://a.example/x".into(), fetcher_name: "y|z".into() };
        assert_ne!(a.digest(), b.digest());
        assert_eq!(
            CacheKey::new("https://a.example/x/?utm_source=q", "http").unwrap(),
            CacheKey::new("https://A.example/x", "http").unwrap()
        );
    }

    #[test]
    fn test_looks_like_pdf() {
        let mut result = FetchResult {
            url: "https://example.com/report".into(),
            fetcher_name: "http".into(),
            status_code: 200,
            final_url: "https://example.com/report".into(),
            headers: BTreeMap::new(),
            body: b"<html></html>".to_vec(),
            fetched_at: OffsetDateTime::now_utc(),
            from_cache: false,
        };
        assert!(!result.looks_like_pdf());

        result.body = b"%PDF-1.7 ...".to_vec();
        assert!(result.looks_like_pdf());

        result.body = b"binary".to_vec();
        result.final_url = "https://example.com/files/Report.PDF".into();
        assert!(result.looks_like_pdf());
    }

    #[test]
    fn test_text_strips_nul() {
        let result = FetchResult {
            url: String::new(),
            fetcher_name: "http".into(),
            status_code: 200,
            final_url: String::new(),
            headers: BTreeMap::new(),
            body: b"a\0b".to_vec(),
            fetched_at: OffsetDateTime::now_utc(),
            from_cache: false,
        };
        assert_eq!(result.text(), "ab");
    }
}
