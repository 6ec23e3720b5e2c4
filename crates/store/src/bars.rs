use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{info, warn};

use common::{Bar, Result, StreamKey};

use crate::db_time;

/// Reads and writes historical bars in the `ohlcv_bars` table.
#[derive(Clone)]
pub struct BarStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct BarRow {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl BarStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bars for one stream within `[start, end]` (either bound optional),
    /// oldest first. Rows with an unparseable timestamp are skipped.
    pub async fn load_bars(
        &self,
        key: &StreamKey,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>> {
        let rows: Vec<BarRow> = sqlx::query_as(
            r#"
            SELECT time, open, high, low, close, volume
            FROM ohlcv_bars
            WHERE symbol = ?1 AND timeframe = ?2
              AND (?3 IS NULL OR time >= ?3)
              AND (?4 IS NULL OR time <= ?4)
            ORDER BY time ASC
            "#,
        )
        .bind(&key.symbol)
        .bind(&key.timeframe)
        .bind(start.map(db_time))
        .bind(end.map(db_time))
        .fetch_all(&self.pool)
        .await?;

        let bars: Vec<Bar> = rows
            .into_iter()
            .filter_map(|row| match DateTime::parse_from_rfc3339(&row.time) {
                Ok(ts) => Some(Bar {
                    timestamp: ts.with_timezone(&Utc),
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                }),
                Err(e) => {
                    warn!(stream = %key, time = %row.time, error = %e, "Skipping bar with bad timestamp");
                    None
                }
            })
            .collect();

        info!(stream = %key, bars = bars.len(), "Loaded historical bars");
        Ok(bars)
    }

    /// Store bars for one stream, ignoring timestamps already present.
    /// Returns how many rows were inserted.
    pub async fn save_bars(&self, key: &StreamKey, bars: &[Bar]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for bar in bars {
            inserted += sqlx::query(
                r#"
                INSERT OR IGNORE INTO ohlcv_bars (symbol, timeframe, time, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&key.symbol)
            .bind(&key.timeframe)
            .bind(db_time(bar.timestamp))
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}
