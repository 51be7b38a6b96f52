use deadpool_postgres::Client;
use tracing::info;

use gleaner_core::Result;

use crate::pg_error;

/// Embedded schema migrations, applied in order and recorded by name.
pub(crate) const MIGRATIONS: &[(&str, &str)] = &[("001_init", include_str!("../migrations/001_init.sql"))];

/// Applies every migration not yet recorded in `gleaner_migrations`.
pub(crate) async fn run(client: &mut Client) -> Result<()> {
    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS gleaner_migrations (
                name TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .await
        .map_err(pg_error)?;

    for (name, sql) in MIGRATIONS {
        let applied = client
            .query_opt("SELECT name FROM gleaner_migrations WHERE name = $1", &[name])
            .await
            .map_err(pg_error)?;
        if applied.is_some() {
            continue;
        }

        let tx = client.transaction().await.map_err(pg_error)?;
        tx.batch_execute(sql).await.map_err(pg_error)?;
        tx.execute("INSERT INTO gleaner_migrations (name) VALUES ($1)", &[name]).await.map_err(pg_error)?;
        tx.commit().await.map_err(pg_error)?;
        info!(migration = name, "Applied migration");
    }

    Ok(())
}
