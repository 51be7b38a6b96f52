//! Row to model conversions.

use tokio_postgres::Row;

use gleaner_core::identity::{Candidate, CandidateId};
use gleaner_core::model::{AttemptStatus, ExtractionAttempt, ExtractionResult};
use gleaner_core::prefs::DomainMethodPrefs;
use gleaner_core::stats::DomainMethodStats;
use gleaner_core::{GleanerError, Result};

use crate::pg_error;

pub(crate) const CANDIDATE_COLUMNS: &str =
    "candidate_id, source_id, url, canonical_url, title, published_at, discovered_at, metadata";

pub(crate) const ATTEMPT_COLUMNS: &str = "attempt_id, candidate_id, domain, method_name, status, started_at, ended_at, \
     duration_ms, error, text_length, metadata";

pub(crate) const STATS_COLUMNS: &str = "domain, method, attempts, successes, last_attempt_at, last_success_at, \
     duration_history, recent_outcomes, median_duration_ms, updated_at";

pub(crate) const PREFS_COLUMNS: &str = "domain, primary_method, fallback_methods, confidence, last_changed_at, \
     locked_until, drift_flag, drift_notes, updated_at";

/// Counters are `u64` in memory and `BIGINT` in the database.
pub(crate) fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn candidate(row: &Row) -> Result<Candidate> {
    Ok(Candidate {
        candidate_id: CandidateId::from_raw(row.try_get::<_, String>("candidate_id").map_err(pg_error)?),
        source_id: row.try_get("source_id").map_err(pg_error)?,
        url: row.try_get("url").map_err(pg_error)?,
        canonical_url: row.try_get("canonical_url").map_err(pg_error)?,
        title: row.try_get("title").map_err(pg_error)?,
        published_at: row.try_get("published_at").map_err(pg_error)?,
        discovered_at: row.try_get("discovered_at").map_err(pg_error)?,
        metadata: row.try_get("metadata").map_err(pg_error)?,
    })
}

pub(crate) fn attempt(row: &Row) -> Result<ExtractionAttempt> {
    let status: String = row.try_get("status").map_err(pg_error)?;
    let status = status.parse::<AttemptStatus>().map_err(GleanerError::PersistenceUnavailable)?;

    Ok(ExtractionAttempt {
        attempt_id: row.try_get("attempt_id").map_err(pg_error)?,
        candidate_id: CandidateId::from_raw(row.try_get::<_, String>("candidate_id").map_err(pg_error)?),
        domain: row.try_get("domain").map_err(pg_error)?,
        method_name: row.try_get("method_name").map_err(pg_error)?,
        status,
        started_at: row.try_get("started_at").map_err(pg_error)?,
        ended_at: row.try_get("ended_at").map_err(pg_error)?,
        duration_ms: from_db(row.try_get("duration_ms").map_err(pg_error)?),
        error: row.try_get("error").map_err(pg_error)?,
        text_length: usize::try_from(row.try_get::<_, i64>("text_length").map_err(pg_error)?).unwrap_or(0),
        metadata: row.try_get("metadata").map_err(pg_error)?,
    })
}

pub(crate) fn winner(row: &Row) -> Result<ExtractionResult> {
    Ok(ExtractionResult {
        candidate_id: CandidateId::from_raw(row.try_get::<_, String>("candidate_id").map_err(pg_error)?),
        method_name: row.try_get("method_name").map_err(pg_error)?,
        body_text: row.try_get("body_text").map_err(pg_error)?,
        extracted_at: row.try_get("extracted_at").map_err(pg_error)?,
    })
}

pub(crate) fn stats(row: &Row) -> Result<DomainMethodStats> {
    let durations: Vec<i64> = row.try_get("duration_history").map_err(pg_error)?;
    let median: Option<i64> = row.try_get("median_duration_ms").map_err(pg_error)?;

    Ok(DomainMethodStats {
        domain: row.try_get("domain").map_err(pg_error)?,
        method: row.try_get("method").map_err(pg_error)?,
        attempts: from_db(row.try_get("attempts").map_err(pg_error)?),
        successes: from_db(row.try_get("successes").map_err(pg_error)?),
        last_attempt_at: row.try_get("last_attempt_at").map_err(pg_error)?,
        last_success_at: row.try_get("last_success_at").map_err(pg_error)?,
        duration_history: durations.into_iter().map(from_db).collect(),
        recent_outcomes: row.try_get("recent_outcomes").map_err(pg_error)?,
        median_duration_ms: median.map(from_db),
        updated_at: row.try_get("updated_at").map_err(pg_error)?,
    })
}

pub(crate) fn prefs(row: &Row) -> Result<DomainMethodPrefs> {
    Ok(DomainMethodPrefs {
        domain: row.try_get("domain").map_err(pg_error)?,
        primary_method: row.try_get("primary_method").map_err(pg_error)?,
        fallback_methods: row.try_get("fallback_methods").map_err(pg_error)?,
        confidence: row.try_get("confidence").map_err(pg_error)?,
        last_changed_at: row.try_get("last_changed_at").map_err(pg_error)?,
        locked_until: row.try_get("locked_until").map_err(pg_error)?,
        drift_flag: row.try_get("drift_flag").map_err(pg_error)?,
        drift_notes: row.try_get("drift_notes").map_err(pg_error)?,
        updated_at: row.try_get("updated_at").map_err(pg_error)?,
    })
}
