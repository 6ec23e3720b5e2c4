use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::{Decision, Error, Match, MatchObserver, Result};

pub type ObserverId = u64;

#[derive(Clone)]
struct Registered {
    id: ObserverId,
    observer: Arc<dyn MatchObserver>,
}

/// Observers shared by every stream, in registration order.
///
/// Copy-on-write: `dispatch` takes a snapshot of the list, so it never holds
/// the lock while observers run. An observer added during a dispatch may miss
/// that match, and one removed during a dispatch may still receive it.
#[derive(Default)]
pub struct ObserverList {
    next_id: AtomicU64,
    entries: RwLock<Arc<Vec<Registered>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn MatchObserver>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::clone(&entries);
        next.push(Registered { id, observer });
        *entries = Arc::new(next);
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.iter().any(|r| r.id == id) {
            return false;
        }
        let next: Vec<Registered> = entries.iter().filter(|r| r.id != id).cloned().collect();
        *entries = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Vec<Registered>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver `m` to every observer. A failing or panicking observer is
    /// logged and skipped. Returns how many observers accepted the match.
    pub fn dispatch(&self, m: &Match) -> usize {
        let mut delivered = 0;
        for entry in self.snapshot().iter() {
            let observer = entry.observer.as_ref();
            match catch_unwind(AssertUnwindSafe(|| observer.notify(m))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(
                    observer = observer.name(),
                    template_id = m.template_id,
                    error = %e,
                    "Observer failed"
                ),
                Err(_) => error!(
                    observer = observer.name(),
                    template_id = m.template_id,
                    "Observer panicked"
                ),
            }
        }
        delivered
    }
}

// ─── Built-in observers ──────────────────────────────────────────────────────

/// Forwards a clone of every match to an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Match>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Match>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MatchObserver for ChannelObserver {
    fn name(&self) -> &str {
        "channel"
    }

    fn notify(&self, m: &Match) -> Result<()> {
        self.tx
            .send(m.clone())
            .map_err(|_| Error::Observer("match channel closed".into()))
    }
}

/// Wraps a closure as an observer.
pub struct FnObserver<F> {
    name: String,
    f: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&Match) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> MatchObserver for FnObserver<F>
where
    F: Fn(&Match) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, m: &Match) -> Result<()> {
        (self.f)(m)
    }
}

/// Logs an alert for any match at or above a confidence floor.
pub struct HighConfidenceAlert {
    pub min_confidence: f64,
}

impl Default for HighConfidenceAlert {
    fn default() -> Self {
        Self {
            min_confidence: 80.0,
        }
    }
}

impl MatchObserver for HighConfidenceAlert {
    fn name(&self) -> &str {
        "high-confidence-alert"
    }

    fn notify(&self, m: &Match) -> Result<()> {
        if m.confidence < self.min_confidence {
            return Ok(());
        }
        warn!(
            symbol = %m.symbol,
            timeframe = %m.timeframe,
            action = %m.decision,
            price = m.current_price,
            confidence = m.confidence,
            similarity = m.similarity,
            template_id = m.template_id,
            timestamp = %m.timestamp.to_rfc3339(),
            "HIGH CONFIDENCE ALERT"
        );
        Ok(())
    }
}

/// Logs entry signals (`ENTER_LONG` / `ENTER_SHORT`) above a confidence floor.
pub struct TradingSignalAlert {
    pub min_confidence: f64,
}

impl Default for TradingSignalAlert {
    fn default() -> Self {
        Self {
            min_confidence: 75.0,
        }
    }
}

impl MatchObserver for TradingSignalAlert {
    fn name(&self) -> &str {
        "trading-signal-alert"
    }

    fn notify(&self, m: &Match) -> Result<()> {
        if m.confidence < self.min_confidence || !m.decision.is_entry() {
            return Ok(());
        }
        let side = match m.decision {
            Decision::EnterLong => "long",
            _ => "short",
        };
        info!(
            symbol = %m.symbol,
            side,
            price = m.current_price,
            confidence = m.confidence,
            "Trading signal: {} at {:.5}",
            m.decision,
            m.current_price
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use common::GridShape;

    fn sample_match() -> Match {
        Match {
            symbol: "EURUSD".into(),
            timeframe: "5".into(),
            timestamp: Utc::now(),
            template_id: 3,
            similarity: 91.0,
            decision: Decision::EnterLong,
            confidence: 82.0,
            current_price: 1.0843,
            grid: GridShape::new(10, 20),
            pic: vec![0; 20],
            trend_pct: 0.4,
        }
    }

    fn recorder(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn MatchObserver> {
        Arc::new(FnObserver::new(name, move |_m: &Match| {
            log.lock().unwrap().push(name);
            Ok(())
        }))
    }

    #[test]
    fn dispatch_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let list = ObserverList::new();
        list.add(recorder("first", log.clone()));
        list.add(recorder("second", log.clone()));
        list.add(recorder("third", log.clone()));

        assert_eq!(list.dispatch(&sample_match()), 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_and_panicking_observers_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let list = ObserverList::new();
        list.add(Arc::new(FnObserver::new("erroring", |_m: &Match| {
            Err(Error::Observer("boom".into()))
        })));
        list.add(Arc::new(FnObserver::new("panicking", |_m: &Match| -> Result<()> {
            panic!("observer bug")
        })));
        list.add(recorder("healthy", log.clone()));

        for _ in 0..3 {
            assert_eq!(list.dispatch(&sample_match()), 1);
        }
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn removed_observer_stops_receiving() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let list = ObserverList::new();
        let id = list.add(recorder("gone", log.clone()));
        list.add(recorder("kept", log.clone()));

        assert!(list.remove(id));
        assert!(!list.remove(id));
        list.dispatch(&sample_match());
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn channel_observer_forwards_clones() {
        let (observer, mut rx) = ChannelObserver::new();
        let m = sample_match();
        observer.notify(&m).unwrap();
        assert_eq!(rx.try_recv().unwrap(), m);
    }

    #[test]
    fn channel_observer_reports_closed_receiver() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        assert!(observer.notify(&sample_match()).is_err());
    }

    #[test]
    fn alerts_ignore_low_confidence() {
        let mut m = sample_match();
        m.confidence = 10.0;
        assert!(HighConfidenceAlert::default().notify(&m).is_ok());
        assert!(TradingSignalAlert::default().notify(&m).is_ok());
    }
}
