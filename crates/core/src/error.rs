//! Error types for gleaner operations.
//!
//! [`GleanerError`] covers every failure the extraction core can surface to a
//! caller. Only a few of them are run-fatal: a bad URL, a failed fetch or an
//! exhausted extraction belong to a single candidate and are reported, while
//! [`GleanerError::PersistenceUnavailable`] and [`GleanerError::Config`] stop
//! the run.
//!
//! # Example
//!
//! ```rust
//! use gleaner_core::{GleanerError, canonicalize};
//!
//! match canonicalize("not a url") {
//!     Ok(url) => println!("canonical: {url}"),
//!     Err(GleanerError::InvalidUrl(reason)) => println!("skipping candidate: {reason}"),
//!     Err(e) => println!("error: {e}"),
//! }
//! ```

use thiserror::Error;

/// Main error type for the extraction core.
#[derive(Error, Debug)]
pub enum GleanerError {
    /// HTTP request errors from reqwest.
    ///
    /// Only surfaces when building the client; request failures inside a
    /// fetch are folded into [`GleanerError::FetchFailed`].
    #[cfg(feature = "fetch")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout.
    #[error("Request timed out after {timeout} seconds")]
    Timeout { timeout: u64 },

    /// Invalid URL provided.
    ///
    /// Returned when a URL has no scheme or host, or uses a scheme other
    /// than http/https.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Every fetch attempt for a URL failed.
    ///
    /// `last` holds the final HTTP status or transport error.
    #[error("Fetch failed for {url}: {last}")]
    FetchFailed { url: String, last: String },

    /// HTML parsing errors, usually an invalid CSS selector.
    #[error("Failed to parse HTML: {0}")]
    HtmlParseError(String),

    /// No registered method produced acceptable text for a candidate.
    #[error("Extraction failed for candidate {candidate_id} after {attempts} attempts")]
    ExtractionFailed { candidate_id: String, attempts: usize },

    /// The relational or document store could not be reached or written.
    ///
    /// This is the only run-fatal error raised while processing candidates.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization errors for stored documents.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GleanerError {
    /// Whether this error should abort the whole run rather than one candidate.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, GleanerError::PersistenceUnavailable(_) | GleanerError::Config(_))
    }
}

/// Result type alias for GleanerError.
pub type Result<T> = std::result::Result<T, GleanerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GleanerError::InvalidUrl("not a url".to_string());
        assert!(err.to_string().contains("Invalid URL"));
    }

    #[test]
    fn test_fetch_failed_carries_last_status() {
        let err = GleanerError::FetchFailed { url: "https://example.com/a".into(), last: "HTTP 503".into() };
        assert!(err.to_string().contains("https://example.com/a"));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_timeout_error() {
        let err = GleanerError::Timeout { timeout: 30 };
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_run_fatal_classification() {
        assert!(GleanerError::PersistenceUnavailable("down".into()).is_run_fatal());
        assert!(GleanerError::Config("missing".into()).is_run_fatal());
        assert!(!GleanerError::InvalidUrl("x".into()).is_run_fatal());
        assert!(!GleanerError::ExtractionFailed { candidate_id: "c".into(), attempts: 4 }.is_run_fatal());
    }
}
