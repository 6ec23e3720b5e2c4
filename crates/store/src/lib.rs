//! SQLite adapters: the stored pattern source, the historical bar reader and
//! the signal journal.

pub mod bars;
pub mod journal;
pub mod patterns;

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use common::Result;

pub use bars::BarStore;
pub use journal::SignalJournal;
pub use patterns::SqlitePatternSource;

/// Open (creating if needed) the database at `url`.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    info!("Database migrations applied");
    Ok(())
}

/// Timestamps are stored as RFC 3339 UTC with a `Z` suffix so that text
/// comparison orders them chronologically.
pub(crate) fn db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}
