use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use common::{Error, Match, MatchObserver, Result};

use crate::db_time;

/// Observer that journals every match to the `trading_signals` table.
///
/// `notify` only enqueues; a writer task owns the pool and does the inserts,
/// so evaluation never waits on the database. A full backlog is reported as
/// an observer error and the match is not journalled.
pub struct SignalJournal {
    tx: mpsc::Sender<Match>,
}

impl SignalJournal {
    /// Start the writer task. It exits once the journal is dropped and the
    /// backlog is flushed, yielding the number of rows written.
    pub fn spawn(pool: SqlitePool, backlog: usize) -> (Self, JoinHandle<u64>) {
        let (tx, rx) = mpsc::channel(backlog.max(1));
        let writer = tokio::spawn(write_loop(pool, rx));
        (Self { tx }, writer)
    }
}

impl MatchObserver for SignalJournal {
    fn name(&self) -> &str {
        "signal-journal"
    }

    fn notify(&self, m: &Match) -> Result<()> {
        self.tx.try_send(m.clone()).map_err(|e| match e {
            TrySendError::Full(_) => Error::Observer("signal journal backlog is full".into()),
            TrySendError::Closed(_) => Error::Observer("signal journal writer has stopped".into()),
        })
    }
}

async fn write_loop(pool: SqlitePool, mut rx: mpsc::Receiver<Match>) -> u64 {
    let mut written = 0;
    while let Some(m) = rx.recv().await {
        match record(&pool, &m).await {
            Ok(_) => written += 1,
            Err(e) => error!(
                symbol = %m.symbol,
                timeframe = %m.timeframe,
                template_id = m.template_id,
                error = %e,
                "Failed to journal signal"
            ),
        }
    }
    info!(written, "Signal journal closed");
    written
}

/// Insert one match as a trading signal row and return its id.
pub async fn record(pool: &SqlitePool, m: &Match) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let metadata = json!({
        "template_grid_match": m,
        "pattern_id": m.template_id,
        "similarity": m.similarity,
        "prediction": m.decision,
        "trend_behavior": m.trend_pct,
        "grid_size": [m.grid.rows, m.grid.cols],
    });

    sqlx::query(
        r#"
        INSERT INTO trading_signals
            (id, symbol, timeframe, signal_time, signal_type, pattern_id, price, confidence, metadata, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(id.to_string())
    .bind(&m.symbol)
    .bind(&m.timeframe)
    .bind(db_time(m.timestamp))
    .bind(m.signal_type().to_string())
    .bind(m.template_id)
    .bind(m.current_price)
    .bind(m.signal_confidence())
    .bind(metadata.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(id)
}
