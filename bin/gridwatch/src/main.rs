use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, StreamKey};
use monitor::{HighConfidenceAlert, LiveMonitor, MonitorFileConfig, ReplayFeed, TradingSignalAlert};
use store::{BarStore, SignalJournal, SqlitePatternSource};

/// Matches that may wait for the journal writer before new ones are refused.
const JOURNAL_BACKLOG: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let file = MonitorFileConfig::load(&cfg.monitor_config_path)
        .with_context(|| format!("loading {}", cfg.monitor_config_path))?;
    info!(symbols = ?file.symbols, timeframes = ?file.timeframes, "Gridwatch starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let db = store::connect(&cfg.database_url)
        .await
        .context("connecting to database")?;
    store::migrate(&db).await.context("running migrations")?;
    info!("Database ready");

    // ── Monitor and observers ─────────────────────────────────────────────────
    let source = Arc::new(SqlitePatternSource::new(db.clone()));
    let monitor = Arc::new(LiveMonitor::new(
        file.detection.clone(),
        file.library.filter.clone(),
        source,
    )?);
    monitor.add_observer(Arc::new(HighConfidenceAlert {
        min_confidence: file.alerts.high_confidence,
    }));
    monitor.add_observer(Arc::new(TradingSignalAlert {
        min_confidence: file.alerts.trading_signal,
    }));
    let journal = cfg.journal_enabled.then(|| {
        let (journal, writer) = SignalJournal::spawn(db.clone(), JOURNAL_BACKLOG);
        (monitor.add_observer(Arc::new(journal)), writer)
    });

    if let Err(e) = monitor.start(&file.symbols, &file.timeframes).await {
        warn!(error = %e, "Monitoring without a fresh pattern library");
    }
    if let Some(secs) = file.library.reload_interval_secs {
        monitor.spawn_reloader(Duration::from_secs(secs));
    }

    // ── Replay ────────────────────────────────────────────────────────────────
    let bars = BarStore::new(db.clone());
    let pace = Duration::from_millis(file.replay.pace_ms);
    let mut feeds = Vec::new();
    for symbol in &file.symbols {
        for timeframe in &file.timeframes {
            let key = StreamKey::new(symbol, timeframe);
            let series = bars
                .load_bars(&key, file.replay.start, file.replay.end)
                .await
                .with_context(|| format!("loading bars for {key}"))?;
            feeds.push(ReplayFeed::new(key, series).with_pace(pace));
        }
    }

    let replay = join_all(feeds.into_iter().map(|feed| {
        let monitor = monitor.clone();
        async move {
            let key = feed.key().clone();
            (key, feed.run(&monitor).await)
        }
    }));

    tokio::select! {
        results = replay => {
            for (key, result) in results {
                match result {
                    Ok(delivered) => info!(stream = %key, bars = delivered, "Replay complete"),
                    Err(e) => warn!(stream = %key, error = %e, "Replay failed"),
                }
            }
            for stream in monitor.stats().await.streams {
                info!(
                    stream = %stream.key,
                    buffered = stream.buffered,
                    matches = stream.matches_found,
                    "Stream summary"
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }
    monitor.stop().await;

    let stats = monitor.stats().await;
    info!(
        bars = stats.bars_processed,
        matches = stats.matches_found,
        patterns = stats.patterns_loaded,
        "Gridwatch finished"
    );

    if let Some((id, writer)) = journal {
        monitor.remove_observer(id);
        let written = writer.await.context("signal journal writer")?;
        info!(written, "Signals journalled");
    }

    Ok(())
}
