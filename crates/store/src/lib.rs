//! PostgreSQL implementation of the gleaner relational [`Store`].
//!
//! Statistics updates lock their `(domain, method)` row with
//! `SELECT ... FOR UPDATE` inside a transaction, so concurrent workers never
//! lose an increment.

mod migrations;
mod rows;

use std::error::Error as _;

use async_trait::async_trait;
use deadpool_postgres::{Client, Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use gleaner_core::identity::{Candidate, CandidateId};
use gleaner_core::model::{ExtractionAttempt, ExtractionResult};
use gleaner_core::pipeline::RunReport;
use gleaner_core::prefs::DomainMethodPrefs;
use gleaner_core::stats::{DomainMethodStats, MethodObservation, StatsWindows};
use gleaner_core::store::Store;
use gleaner_core::{GleanerError, Result};

use rows::{ATTEMPT_COLUMNS, CANDIDATE_COLUMNS, PREFS_COLUMNS, STATS_COLUMNS, to_db};

/// Maps a driver error to `PersistenceUnavailable`, keeping the server's message.
///
/// The driver's own `Display` only says "db error", so the database error
/// fields or the source chain are spelled out instead.
pub(crate) fn pg_error(e: tokio_postgres::Error) -> GleanerError {
    let message = match e.as_db_error() {
        Some(db) => format!(
            "{}: {}{}",
            db.severity(),
            db.message(),
            db.detail().map(|d| format!(" DETAIL: {d}")).unwrap_or_default()
        ),
        None => {
            let mut message = e.to_string();
            let mut source = e.source();
            while let Some(inner) = source {
                message = format!("{message}: {inner}");
                source = inner.source();
            }
            message
        }
    };
    GleanerError::PersistenceUnavailable(message)
}

fn pool_error(e: impl std::fmt::Display) -> GleanerError {
    GleanerError::PersistenceUnavailable(format!("connection pool: {e}"))
}

/// Pooled PostgreSQL store.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Creates a pool for `database_url` and applies pending migrations.
    ///
    /// # Errors
    ///
    /// [`GleanerError::PersistenceUnavailable`] when the database cannot be
    /// reached or a migration fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut config = Config::new();
        config.url = Some(database_url.to_string());
        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls).map_err(pool_error)?;

        let store = Self { pool };
        let mut client = store.client().await?;
        migrations::run(&mut client).await?;
        info!("Connected to PostgreSQL store");
        Ok(store)
    }

    async fn client(&self) -> Result<Client> {
        self.pool.get().await.map_err(pool_error)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        let client = self.client().await?;
        client.simple_query("SELECT 1").await.map_err(pg_error)?;
        Ok(())
    }

    async fn upsert_candidate(&self, candidate: &Candidate) -> Result<()> {
        let client = self.client().await?;
        client
            .execute("INSERT INTO sources (source_id) VALUES ($1) ON CONFLICT DO NOTHING", &[&candidate.source_id])
            .await
            .map_err(pg_error)?;
        client
            .execute(
                &format!(
                    "INSERT INTO candidates ({CANDIDATE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (candidate_id) DO NOTHING"
                ),
                &[
                    &candidate.candidate_id.as_str(),
                    &candidate.source_id,
                    &candidate.url,
                    &candidate.canonical_url,
                    &candidate.title,
                    &candidate.published_at,
                    &candidate.discovered_at,
                    &candidate.metadata,
                ],
            )
            .await
            .map_err(pg_error)?;
        Ok(())
    }

    async fn get_candidate(&self, candidate_id: &CandidateId) -> Result<Option<Candidate>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE candidate_id = $1"),
                &[&candidate_id.as_str()],
            )
            .await
            .map_err(pg_error)?;
        row.as_ref().map(rows::candidate).transpose()
    }

    async fn insert_attempt(&self, attempt: &ExtractionAttempt) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO attempts ({ATTEMPT_COLUMNS})
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
                ),
                &[
                    &attempt.attempt_id,
                    &attempt.candidate_id.as_str(),
                    &attempt.domain,
                    &attempt.method_name,
                    &attempt.status.as_str(),
                    &attempt.started_at,
                    &attempt.ended_at,
                    &to_db(attempt.duration_ms),
                    &attempt.error,
                    &to_db(attempt.text_length as u64),
                    &attempt.metadata,
                ],
            )
            .await
            .map_err(pg_error)?;
        Ok(())
    }

    async fn attempts_for_candidate(&self, candidate_id: &CandidateId) -> Result<Vec<ExtractionAttempt>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!("SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE candidate_id = $1 ORDER BY started_at, ended_at"),
                &[&candidate_id.as_str()],
            )
            .await
            .map_err(pg_error)?;
        rows.iter().map(rows::attempt).collect()
    }

    async fn attempts_for_method(&self, domain: &str, method: &str) -> Result<Vec<ExtractionAttempt>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE domain = $1 AND method_name = $2
                     ORDER BY started_at, ended_at"
                ),
                &[&domain, &method],
            )
            .await
            .map_err(pg_error)?;
        rows.iter().map(rows::attempt).collect()
    }

    async fn upsert_winner(&self, winner: &ExtractionResult) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO articles (candidate_id, method_name, body_text, extracted_at) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (candidate_id) DO UPDATE
                 SET method_name = EXCLUDED.method_name, body_text = EXCLUDED.body_text,
                     extracted_at = EXCLUDED.extracted_at",
                &[&winner.candidate_id.as_str(), &winner.method_name, &winner.body_text, &winner.extracted_at],
            )
            .await
            .map_err(pg_error)?;
        Ok(())
    }

    async fn get_winner(&self, candidate_id: &CandidateId) -> Result<Option<ExtractionResult>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT candidate_id, method_name, body_text, extracted_at FROM articles WHERE candidate_id = $1",
                &[&candidate_id.as_str()],
            )
            .await
            .map_err(pg_error)?;
        row.as_ref().map(rows::winner).transpose()
    }

    async fn record_method_attempt(
        &self, domain: &str, method: &str, observation: &MethodObservation, windows: StatsWindows,
    ) -> Result<DomainMethodStats> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(pg_error)?;

        tx.execute(
            "INSERT INTO domain_method_stats (domain, method, updated_at) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            &[&domain, &method, &observation.observed_at],
        )
        .await
        .map_err(pg_error)?;

        let row = tx
            .query_one(
                &format!("SELECT {STATS_COLUMNS} FROM domain_method_stats WHERE domain = $1 AND method = $2 FOR UPDATE"),
                &[&domain, &method],
            )
            .await
            .map_err(pg_error)?;
        let mut stats = rows::stats(&row)?;
        stats.apply(observation, windows);

        let durations: Vec<i64> = stats.duration_history.iter().copied().map(to_db).collect();
        tx.execute(
            "UPDATE domain_method_stats
             SET attempts = $3, successes = $4, last_attempt_at = $5, last_success_at = $6,
                 duration_history = $7, recent_outcomes = $8, median_duration_ms = $9, updated_at = $10
             WHERE domain = $1 AND method = $2",
            &[
                &domain,
                &method,
                &to_db(stats.attempts),
                &to_db(stats.successes),
                &stats.last_attempt_at,
                &stats.last_success_at,
                &durations,
                &stats.recent_outcomes,
                &stats.median_duration_ms.map(to_db),
                &stats.updated_at,
            ],
        )
        .await
        .map_err(pg_error)?;
        tx.commit().await.map_err(pg_error)?;

        debug!(domain, method, attempts = stats.attempts, successes = stats.successes, "Stats row updated");
        Ok(stats)
    }

    async fn method_stats(&self, domain: &str) -> Result<Vec<DomainMethodStats>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!("SELECT {STATS_COLUMNS} FROM domain_method_stats WHERE domain = $1 ORDER BY method"),
                &[&domain],
            )
            .await
            .map_err(pg_error)?;
        rows.iter().map(rows::stats).collect()
    }

    async fn all_method_stats(&self) -> Result<Vec<DomainMethodStats>> {
        let client = self.client().await?;
        let rows = client
            .query(&format!("SELECT {STATS_COLUMNS} FROM domain_method_stats ORDER BY domain, method"), &[])
            .await
            .map_err(pg_error)?;
        rows.iter().map(rows::stats).collect()
    }

    async fn get_prefs(&self, domain: &str) -> Result<Option<DomainMethodPrefs>> {
        let client = self.client().await?;
        let row = client
            .query_opt(&format!("SELECT {PREFS_COLUMNS} FROM domain_method_prefs WHERE domain = $1"), &[&domain])
            .await
            .map_err(pg_error)?;
        row.as_ref().map(rows::prefs).transpose()
    }

    async fn upsert_prefs(&self, prefs: &DomainMethodPrefs) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO domain_method_prefs ({PREFS_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                     ON CONFLICT (domain) DO UPDATE
                     SET primary_method = EXCLUDED.primary_method, fallback_methods = EXCLUDED.fallback_methods,
                         confidence = EXCLUDED.confidence, last_changed_at = EXCLUDED.last_changed_at,
                         locked_until = EXCLUDED.locked_until, drift_flag = EXCLUDED.drift_flag,
                         drift_notes = EXCLUDED.drift_notes, updated_at = EXCLUDED.updated_at"
                ),
                &[
                    &prefs.domain,
                    &prefs.primary_method,
                    &prefs.fallback_methods,
                    &prefs.confidence,
                    &prefs.last_changed_at,
                    &prefs.locked_until,
                    &prefs.drift_flag,
                    &prefs.drift_notes,
                    &prefs.updated_at,
                ],
            )
            .await
            .map_err(pg_error)?;
        Ok(())
    }

    async fn delete_prefs(&self, domain: &str) -> Result<()> {
        let client = self.client().await?;
        client.execute("DELETE FROM domain_method_prefs WHERE domain = $1", &[&domain]).await.map_err(pg_error)?;
        debug!(domain, "Deleted preferences");
        Ok(())
    }

    async fn all_prefs(&self) -> Result<Vec<DomainMethodPrefs>> {
        let client = self.client().await?;
        let rows = client
            .query(&format!("SELECT {PREFS_COLUMNS} FROM domain_method_prefs ORDER BY domain"), &[])
            .await
            .map_err(pg_error)?;
        rows.iter().map(rows::prefs).collect()
    }

    async fn record_run(&self, report: &RunReport) -> Result<()> {
        let client = self.client().await?;
        let body = serde_json::to_value(report)?;
        client
            .execute(
                "INSERT INTO runs (run_id, started_at, ended_at, report) VALUES ($1, $2, $3, $4)",
                &[&report.run_id, &report.started_at, &report.ended_at, &body],
            )
            .await
            .map_err(pg_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Only runs against a live database named by this variable.
    const TEST_DATABASE_ENV: &str = "GLEANER_TEST_DATABASE_URL";

    #[tokio::test]
    async fn test_unreachable_database_is_persistence_error() {
        let result = PgStore::connect("postgres://gleaner@127.0.0.1:1/gleaner").await;
        assert!(matches!(result, Err(GleanerError::PersistenceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_stats_round_trip_against_live_database() {
        let Ok(url) = std::env::var(TEST_DATABASE_ENV) else {
            return;
        };
        let store = PgStore::connect(&url).await.unwrap();
        let domain = format!("test-{}.example", uuid::Uuid::new_v4());

        for accepted in [true, false, true] {
            let observation = MethodObservation { accepted, duration_ms: 120, observed_at: time::OffsetDateTime::now_utc() };
            store.record_method_attempt(&domain, "structured", &observation, StatsWindows::default()).await.unwrap();
        }

        let stats = store.method_stats(&domain).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!((stats[0].attempts, stats[0].successes), (3, 2));
        assert_eq!(stats[0].recent_outcomes, vec![true, false, true]);
        assert_eq!(stats[0].median_duration_ms, Some(120));
    }
}
