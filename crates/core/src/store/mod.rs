//! Persistence seams.
//!
//! [`Store`] is the relational side: candidates, the attempt audit log,
//! winners, statistics, preferences and run records. [`DocumentStore`] holds
//! large payloads that are never queried relationally: the fetch cache and
//! full raw method output.
//!
//! Every method returns [`GleanerError::PersistenceUnavailable`](crate::GleanerError::PersistenceUnavailable)
//! when the backend cannot be reached.

mod fs;
mod memory;

pub use fs::FsDocumentStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::Result;
use crate::fetch::{CacheKey, FetchResult};
use crate::identity::{Candidate, CandidateId};
use crate::model::{AttemptOutput, ExtractionAttempt, ExtractionResult};
use crate::pipeline::RunReport;
use crate::prefs::DomainMethodPrefs;
use crate::stats::{DomainMethodStats, MethodObservation, StatsWindows};

/// Relational store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Verifies the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Idempotent insert keyed by `candidate_id`.
    async fn upsert_candidate(&self, candidate: &Candidate) -> Result<()>;

    async fn get_candidate(&self, candidate_id: &CandidateId) -> Result<Option<Candidate>>;

    /// Appends to the audit log. Rows are never updated or deleted.
    async fn insert_attempt(&self, attempt: &ExtractionAttempt) -> Result<()>;

    /// Attempts for one candidate, oldest first.
    async fn attempts_for_candidate(&self, candidate_id: &CandidateId) -> Result<Vec<ExtractionAttempt>>;

    /// Attempts for one `(domain, method)` key, oldest first.
    async fn attempts_for_method(&self, domain: &str, method: &str) -> Result<Vec<ExtractionAttempt>>;

    /// Replaces any existing winner for the candidate.
    async fn upsert_winner(&self, winner: &ExtractionResult) -> Result<()>;

    async fn get_winner(&self, candidate_id: &CandidateId) -> Result<Option<ExtractionResult>>;

    /// Applies one observation to the `(domain, method)` row atomically and returns the new row.
    async fn record_method_attempt(
        &self, domain: &str, method: &str, observation: &MethodObservation, windows: StatsWindows,
    ) -> Result<DomainMethodStats>;

    async fn method_stats(&self, domain: &str) -> Result<Vec<DomainMethodStats>>;

    async fn all_method_stats(&self) -> Result<Vec<DomainMethodStats>>;

    async fn get_prefs(&self, domain: &str) -> Result<Option<DomainMethodPrefs>>;

    async fn upsert_prefs(&self, prefs: &DomainMethodPrefs) -> Result<()>;

    /// Removes a domain's preferences, returning it to registration order.
    async fn delete_prefs(&self, domain: &str) -> Result<()>;

    async fn all_prefs(&self) -> Result<Vec<DomainMethodPrefs>>;

    async fn record_run(&self, report: &RunReport) -> Result<()>;
}

/// Document store for fetch payloads and raw attempt output.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_fetch(&self, key: &CacheKey) -> Result<Option<FetchResult>>;

    /// Last write wins for concurrent writers of the same key.
    async fn put_fetch(&self, key: &CacheKey, result: &FetchResult) -> Result<()>;

    async fn put_attempt_output(&self, output: &AttemptOutput) -> Result<()>;
}
