//! Batch runner: fetch then extract each candidate over a bounded worker pool,
//! then recompute preferences for every domain the run touched.
//!
//! Per-candidate failures are tallied in the [`RunReport`]. Only
//! [`GleanerError::PersistenceUnavailable`] stops the run; attempts and
//! winners written before that point stay written.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fetch::{FetchOptions, Fetcher};
use crate::identity::{Candidate, domain_of};
use crate::methods::MethodRegistry;
use crate::orchestrator::{CandidateOutcome, MethodPlan, Orchestrator};
use crate::prefs::PreferenceSelector;
use crate::store::Store;
use crate::{GleanerError, Result};

/// Per-run switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Bypass the fetch cache and re-extract candidates that already have a winner.
    pub force_refresh: bool,
    /// Cap on candidates processed, applied after deduplication.
    pub max_candidates: Option<usize>,
}

/// Summary of one run, persisted through [`Store::record_run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    pub total_candidates: usize,
    pub fetched: usize,
    pub extracted: usize,
    pub skipped_existing: usize,
    pub skipped_pdf: usize,
    pub fetch_failed: usize,
    pub extraction_failed: usize,
    pub cancelled: usize,
    /// Failure reason to number of candidates.
    pub failures: BTreeMap<String, usize>,
    /// Share of the batch that ended with a winner this run.
    pub coverage: f64,
}

impl RunReport {
    fn new(started_at: OffsetDateTime, total_candidates: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            ended_at: started_at,
            total_candidates,
            fetched: 0,
            extracted: 0,
            skipped_existing: 0,
            skipped_pdf: 0,
            fetch_failed: 0,
            extraction_failed: 0,
            cancelled: 0,
            failures: BTreeMap::new(),
            coverage: 0.0,
        }
    }

    fn tally(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::SkippedExisting => self.skipped_existing += 1,
            Disposition::Cancelled => self.cancelled += 1,
            Disposition::FetchFailed(reason) => {
                self.fetch_failed += 1;
                *self.failures.entry(reason.clone()).or_default() += 1;
            }
            Disposition::SkippedPdf => {
                self.fetched += 1;
                self.skipped_pdf += 1;
            }
            Disposition::Extracted { .. } => {
                self.fetched += 1;
                self.extracted += 1;
            }
            Disposition::ExtractionFailed { .. } => {
                self.fetched += 1;
                self.extraction_failed += 1;
                *self.failures.entry("extraction_failed".to_string()).or_default() += 1;
            }
        }
    }

    fn finish(&mut self, ended_at: OffsetDateTime) {
        self.ended_at = ended_at;
        self.coverage = coverage(self.extracted, self.total_candidates);
    }
}

/// `extracted / total`, zero for an empty batch.
pub fn coverage(extracted: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { extracted as f64 / total as f64 }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Disposition {
    SkippedExisting,
    Cancelled,
    FetchFailed(String),
    SkippedPdf,
    Extracted { domain: String },
    ExtractionFailed { domain: String },
}

impl Disposition {
    /// Domain whose statistics changed.
    fn touched_domain(&self) -> Option<&str> {
        match self {
            Disposition::Extracted { domain } | Disposition::ExtractionFailed { domain } => Some(domain),
            _ => None,
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    fetcher: Fetcher,
    fetch_options: FetchOptions,
    registry: MethodRegistry,
    orchestrator: Orchestrator,
    selector: PreferenceSelector,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>, fetcher: Fetcher, registry: MethodRegistry, orchestrator: Orchestrator,
        selector: PreferenceSelector,
    ) -> Self {
        Self { store, fetcher, fetch_options: FetchOptions::default(), registry, orchestrator, selector, concurrency: 8 }
    }

    pub fn with_fetch_options(mut self, fetch_options: FetchOptions) -> Self {
        self.fetch_options = fetch_options;
        self
    }

    /// Number of candidates in flight at once; at least one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Processes a batch of candidates.
    ///
    /// Cancelling `cancel` aborts in-flight fetches and skips candidates not
    /// yet fetched; extractions already running complete and are persisted.
    ///
    /// # Errors
    ///
    /// Returns [`GleanerError::PersistenceUnavailable`] when the store cannot
    /// be reached at start or fails mid-run.
    pub async fn run(&self, candidates: Vec<Candidate>, options: RunOptions, cancel: CancellationToken) -> Result<RunReport> {
        self.store.ping().await?;

        let mut seen = HashSet::new();
        let mut batch: Vec<Candidate> = candidates.into_iter().filter(|c| seen.insert(c.candidate_id.clone())).collect();
        if let Some(max) = options.max_candidates {
            batch.truncate(max);
        }
        for candidate in &batch {
            self.store.upsert_candidate(candidate).await?;
        }

        let mut report = RunReport::new(OffsetDateTime::now_utc(), batch.len());
        info!(
            run_id = %report.run_id,
            candidates = batch.len(),
            concurrency = self.concurrency,
            force_refresh = options.force_refresh,
            "Run started"
        );

        let mut touched = BTreeSet::new();
        let mut in_flight = stream::iter(&batch)
            .map(|candidate| self.process_candidate(candidate, &options, &cancel))
            .buffer_unordered(self.concurrency);

        while let Some(disposition) = in_flight.next().await {
            let disposition = disposition?;
            if let Some(domain) = disposition.touched_domain() {
                touched.insert(domain.to_string());
            }
            report.tally(&disposition);
        }
        drop(in_flight);

        let updated = self.selector.refresh(touched).await?;
        debug!(domains = updated.len(), "Preferences refreshed");

        report.finish(OffsetDateTime::now_utc());
        self.store.record_run(&report).await?;

        info!(
            run_id = %report.run_id,
            total = report.total_candidates,
            extracted = report.extracted,
            skipped_existing = report.skipped_existing,
            skipped_pdf = report.skipped_pdf,
            fetch_failed = report.fetch_failed,
            extraction_failed = report.extraction_failed,
            cancelled = report.cancelled,
            coverage = report.coverage,
            "Run finished"
        );
        Ok(report)
    }

    async fn process_candidate(
        &self, candidate: &Candidate, options: &RunOptions, cancel: &CancellationToken,
    ) -> Result<Disposition> {
        if cancel.is_cancelled() {
            return Ok(Disposition::Cancelled);
        }

        if !options.force_refresh && self.store.get_winner(&candidate.candidate_id).await?.is_some() {
            debug!(candidate_id = %candidate.candidate_id, "Winner exists; skipping");
            return Ok(Disposition::SkippedExisting);
        }

        let mut fetch_options = self.fetch_options.clone();
        fetch_options.force_refresh = options.force_refresh;

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(candidate_id = %candidate.candidate_id, "Fetch cancelled");
                return Ok(Disposition::Cancelled);
            }
            result = self.fetcher.fetch(&candidate.url, &fetch_options) => result,
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) if e.is_run_fatal() => return Err(e),
            Err(e) => {
                warn!(candidate_id = %candidate.candidate_id, url = %candidate.url, error = %e, "Candidate not fetched");
                return Ok(Disposition::FetchFailed(failure_reason(&e)));
            }
        };

        if fetched.looks_like_pdf() {
            info!(candidate_id = %candidate.candidate_id, url = %fetched.final_url, "PDF payload; extraction skipped");
            return Ok(Disposition::SkippedPdf);
        }

        let domain = match domain_of(&fetched.final_url).or_else(|_| domain_of(&candidate.canonical_url)) {
            Ok(domain) => domain,
            Err(e) => {
                warn!(candidate_id = %candidate.candidate_id, error = %e, "No domain for candidate");
                return Ok(Disposition::FetchFailed(failure_reason(&e)));
            }
        };

        let prefs = self.store.get_prefs(&domain).await?;
        let plan = MethodPlan::for_domain(prefs.as_ref(), &self.registry);

        match self.orchestrator.run(candidate, &fetched.text(), &domain, &plan).await? {
            CandidateOutcome::Extracted(_) => Ok(Disposition::Extracted { domain }),
            CandidateOutcome::Failed(_) => Ok(Disposition::ExtractionFailed { domain }),
        }
    }
}

/// Short reason used as the failure tally key.
fn failure_reason(error: &GleanerError) -> String {
    match error {
        GleanerError::FetchFailed { last, .. } => last.clone(),
        GleanerError::InvalidUrl(_) => "invalid_url".to_string(),
        GleanerError::Timeout { .. } => "timeout".to_string(),
        other => other.to_string(),
    }
}
