//! Rolling per-(domain, method) statistics.
//!
//! [`DomainMethodStats::apply`] is the single mutation rule; stores call it
//! while holding whatever per-key serialization they provide, so increments are
//! never lost under concurrent writers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::Result;
use crate::model::AttemptStatus;
use crate::store::Store;

/// Caps for the bounded windows kept on each stats row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsWindows {
    /// Durations kept for the median.
    pub duration_window: usize,
    /// Accepted/not-accepted outcomes kept for the trailing success rate.
    pub outcome_window: usize,
}

impl Default for StatsWindows {
    fn default() -> Self {
        Self { duration_window: 25, outcome_window: 20 }
    }
}

/// One attempt as seen by the statistics store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodObservation {
    pub accepted: bool,
    pub duration_ms: u64,
    pub observed_at: OffsetDateTime,
}

impl MethodObservation {
    pub fn new(outcome: AttemptStatus, duration_ms: u64) -> Self {
        Self { accepted: outcome == AttemptStatus::Success, duration_ms, observed_at: OffsetDateTime::now_utc() }
    }
}

/// Durable rolling counters and timings for one `(domain, method)` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMethodStats {
    pub domain: String,
    pub method: String,
    pub attempts: u64,
    pub successes: u64,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_attempt_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_success_at: Option<OffsetDateTime>,
    /// Most recent durations, oldest first.
    pub duration_history: Vec<u64>,
    /// Most recent outcomes, oldest first.
    pub recent_outcomes: Vec<bool>,
    pub median_duration_ms: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DomainMethodStats {
    pub fn new(domain: impl Into<String>, method: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            domain: domain.into(),
            method: method.into(),
            attempts: 0,
            successes: 0,
            last_attempt_at: None,
            last_success_at: None,
            duration_history: Vec::new(),
            recent_outcomes: Vec::new(),
            median_duration_ms: None,
            updated_at: now,
        }
    }

    /// Folds one observation into the row.
    pub fn apply(&mut self, observation: &MethodObservation, windows: StatsWindows) {
        self.attempts += 1;
        self.last_attempt_at = Some(observation.observed_at);
        if observation.accepted {
            self.successes += 1;
            self.last_success_at = Some(observation.observed_at);
        }

        push_bounded(&mut self.duration_history, observation.duration_ms, windows.duration_window);
        push_bounded(&mut self.recent_outcomes, observation.accepted, windows.outcome_window);

        self.median_duration_ms = median(&self.duration_history);
        self.updated_at = observation.observed_at;
    }

    /// All-time success rate; zero before any attempt.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 { 0.0 } else { self.successes as f64 / self.attempts as f64 }
    }

    /// Success rate over the recent outcome window, if any outcomes exist.
    pub fn trailing_success_rate(&self) -> Option<f64> {
        if self.recent_outcomes.is_empty() {
            return None;
        }
        let accepted = self.recent_outcomes.iter().filter(|&&ok| ok).count();
        Some(accepted as f64 / self.recent_outcomes.len() as f64)
    }
}

fn push_bounded<T>(window: &mut Vec<T>, value: T, cap: usize) {
    window.push(value);
    let cap = cap.max(1);
    if window.len() > cap {
        let excess = window.len() - cap;
        window.drain(..excess);
    }
}

/// Median of a set of durations. Even-length input takes the floor of the two middle values' mean.
pub fn median(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 { Some(sorted[mid]) } else { Some((sorted[mid - 1] + sorted[mid]) / 2) }
}

/// The only writer of [`DomainMethodStats`].
pub struct StatsRecorder {
    store: Arc<dyn Store>,
    windows: StatsWindows,
}

impl StatsRecorder {
    pub fn new(store: Arc<dyn Store>, windows: StatsWindows) -> Self {
        Self { store, windows }
    }

    /// Records one attempt outcome. Only [`AttemptStatus::Success`] counts as a success.
    pub async fn record(
        &self, domain: &str, method: &str, outcome: AttemptStatus, duration_ms: u64,
    ) -> Result<DomainMethodStats> {
        let observation = MethodObservation::new(outcome, duration_ms);
        let stats = self.store.record_method_attempt(domain, method, &observation, self.windows).await?;
        debug!(
            domain,
            method,
            status = %outcome,
            attempts = stats.attempts,
            successes = stats.successes,
            "Recorded method statistics"
        );
        Ok(stats)
    }
}
