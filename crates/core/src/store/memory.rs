use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{DocumentStore, Store};
use crate::fetch::{CacheKey, FetchResult};
use crate::identity::{Candidate, CandidateId};
use crate::model::{AttemptOutput, ExtractionAttempt, ExtractionResult};
use crate::pipeline::RunReport;
use crate::prefs::DomainMethodPrefs;
use crate::stats::{DomainMethodStats, MethodObservation, StatsWindows};
use crate::{GleanerError, Result};

/// In-process store implementing both [`Store`] and [`DocumentStore`].
///
/// Each table sits behind its own lock, held only for one synchronous map
/// update; the statistics update happens entirely under its lock, which
/// serializes writers of the same key.
#[derive(Default)]
pub struct MemoryStore {
    candidates: Mutex<HashMap<CandidateId, Candidate>>,
    attempts: Mutex<Vec<ExtractionAttempt>>,
    winners: Mutex<HashMap<CandidateId, ExtractionResult>>,
    stats: Mutex<HashMap<(String, String), DomainMethodStats>>,
    prefs: Mutex<HashMap<String, DomainMethodPrefs>>,
    runs: Mutex<Vec<RunReport>>,
    fetches: Mutex<HashMap<CacheKey, FetchResult>>,
    outputs: Mutex<Vec<AttemptOutput>>,
    unavailable: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `PersistenceUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(GleanerError::PersistenceUnavailable("memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }

    /// Raw attempt outputs written so far.
    pub fn attempt_outputs(&self) -> Vec<AttemptOutput> {
        lock(&self.outputs).clone()
    }

    /// Run records written so far.
    pub fn runs(&self) -> Vec<RunReport> {
        lock(&self.runs).clone()
    }

    pub fn candidate_count(&self) -> usize {
        lock(&self.candidates).len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn upsert_candidate(&self, candidate: &Candidate) -> Result<()> {
        self.check()?;
        lock(&self.candidates).entry(candidate.candidate_id.clone()).or_insert_with(|| candidate.clone());
        Ok(())
    }

    async fn get_candidate(&self, candidate_id: &CandidateId) -> Result<Option<Candidate>> {
        self.check()?;
        Ok(lock(&self.candidates).get(candidate_id).cloned())
    }

    async fn insert_attempt(&self, attempt: &ExtractionAttempt) -> Result<()> {
        self.check()?;
        lock(&self.attempts).push(attempt.clone());
        Ok(())
    }

    async fn attempts_for_candidate(&self, candidate_id: &CandidateId) -> Result<Vec<ExtractionAttempt>> {
        self.check()?;
        Ok(lock(&self.attempts).iter().filter(|a| a.candidate_id == *candidate_id).cloned().collect())
    }

    async fn attempts_for_method(&self, domain: &str, method: &str) -> Result<Vec<ExtractionAttempt>> {
        self.check()?;
        let mut attempts: Vec<_> =
            lock(&self.attempts).iter().filter(|a| a.domain == domain && a.method_name == method).cloned().collect();
        attempts.sort_by_key(|a| (a.started_at, a.ended_at));
        Ok(attempts)
    }

    async fn upsert_winner(&self, winner: &ExtractionResult) -> Result<()> {
        self.check()?;
        lock(&self.winners).insert(winner.candidate_id.clone(), winner.clone());
        Ok(())
    }

    async fn get_winner(&self, candidate_id: &CandidateId) -> Result<Option<ExtractionResult>> {
        self.check()?;
        Ok(lock(&self.winners).get(candidate_id).cloned())
    }

    async fn record_method_attempt(
        &self, domain: &str, method: &str, observation: &MethodObservation, windows: StatsWindows,
    ) -> Result<DomainMethodStats> {
        self.check()?;
        let mut stats = lock(&self.stats);
        let row = stats
            .entry((domain.to_string(), method.to_string()))
            .or_insert_with(|| DomainMethodStats::new(domain, method, observation.observed_at));
        row.apply(observation, windows);
        Ok(row.clone())
    }

    async fn method_stats(&self, domain: &str) -> Result<Vec<DomainMethodStats>> {
        self.check()?;
        let mut rows: Vec<_> = lock(&self.stats).values().filter(|s| s.domain == domain).cloned().collect();
        rows.sort_by(|a, b| a.method.cmp(&b.method));
        Ok(rows)
    }

    async fn all_method_stats(&self) -> Result<Vec<DomainMethodStats>> {
        self.check()?;
        let mut rows: Vec<_> = lock(&self.stats).values().cloned().collect();
        rows.sort_by(|a, b| (&a.domain, &a.method).cmp(&(&b.domain, &b.method)));
        Ok(rows)
    }

    async fn get_prefs(&self, domain: &str) -> Result<Option<DomainMethodPrefs>> {
        self.check()?;
        Ok(lock(&self.prefs).get(domain).cloned())
    }

    async fn upsert_prefs(&self, prefs: &DomainMethodPrefs) -> Result<()> {
        self.check()?;
        lock(&self.prefs).insert(prefs.domain.clone(), prefs.clone());
        Ok(())
    }

    async fn delete_prefs(&self, domain: &str) -> Result<()> {
        self.check()?;
        lock(&self.prefs).remove(domain);
        Ok(())
    }

    async fn all_prefs(&self) -> Result<Vec<DomainMethodPrefs>> {
        self.check()?;
        let mut rows: Vec<_> = lock(&self.prefs).values().cloned().collect();
        rows.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(rows)
    }

    async fn record_run(&self, report: &RunReport) -> Result<()> {
        self.check()?;
        lock(&self.runs).push(report.clone());
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_fetch(&self, key: &CacheKey) -> Result<Option<FetchResult>> {
        self.check()?;
        Ok(lock(&self.fetches).get(key).cloned())
    }

    async fn put_fetch(&self, key: &CacheKey, result: &FetchResult) -> Result<()> {
        self.check()?;
        lock(&self.fetches).insert(key.clone(), result.clone());
        Ok(())
    }

    async fn put_attempt_output(&self, output: &AttemptOutput) -> Result<()> {
        self.check()?;
        lock(&self.outputs).push(output.clone());
        Ok(())
    }
}
