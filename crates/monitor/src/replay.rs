use std::time::Duration;

use tracing::{debug, info, warn};

use common::{Bar, Error, Result, StreamKey};

use crate::monitor::LiveMonitor;

/// Feeds a historical bar series for one stream into a [`LiveMonitor`].
///
/// Bars are sorted by timestamp and deduplicated (first bar per timestamp
/// wins) on construction. Several feeds may run concurrently, one per stream.
pub struct ReplayFeed {
    key: StreamKey,
    bars: Vec<Bar>,
    pace: Option<Duration>,
}

impl ReplayFeed {
    pub fn new(key: StreamKey, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        let before = bars.len();
        bars.dedup_by_key(|b| b.timestamp);
        if bars.len() < before {
            debug!(stream = %key, dropped = before - bars.len(), "Dropped duplicate bars");
        }
        Self {
            key,
            bars,
            pace: None,
        }
    }

    /// Sleep `pace` between bars. A zero pace replays as fast as possible.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = (!pace.is_zero()).then_some(pace);
        self
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Deliver every bar in order. Stops early, without error, once the
    /// monitor stops or drops the stream. Returns the number of bars delivered.
    pub async fn run(self, monitor: &LiveMonitor) -> Result<usize> {
        let total = self.bars.len();
        info!(stream = %self.key, bars = total, "Replay starting");

        let mut delivered = 0;
        for bar in self.bars {
            match monitor
                .on_new_bar(&self.key.symbol, &self.key.timeframe, bar)
                .await
            {
                Ok(()) => delivered += 1,
                Err(Error::MonitorStopped | Error::NotMonitored(_)) => {
                    warn!(stream = %self.key, delivered, total, "Monitor no longer accepts bars, replay cut short");
                    return Ok(delivered);
                }
                Err(e) => return Err(e),
            }
            if let Some(pace) = self.pace {
                tokio::time::sleep(pace).await;
            }
        }

        info!(stream = %self.key, delivered, "Replay finished");
        Ok(delivered)
    }
}
