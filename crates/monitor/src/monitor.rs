use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use common::{Bar, Error, MatchObserver, PatternSource, Result, StreamKey, TemplateFilter};
use grid::{DetectionConfig, MatchEngine, PatternLibrary, Tick};

use crate::buffer::StreamBuffer;
use crate::observer::{ObserverId, ObserverList};

/// Bars queued per stream before `on_new_bar` starts waiting.
const INBOX_CAPACITY: usize = 256;

/// Point-in-time counters for the whole monitor.
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub bars_processed: u64,
    pub matches_found: u64,
    pub patterns_loaded: usize,
    /// Active streams, ordered by key.
    pub streams: Vec<StreamStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamStats {
    pub key: StreamKey,
    pub buffered: usize,
    pub bars_processed: u64,
    pub matches_found: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bars: AtomicU64,
    matches: AtomicU64,
}

#[derive(Debug, Default)]
struct StreamCounters {
    buffered: AtomicUsize,
    bars: AtomicU64,
    matches: AtomicU64,
}

struct StreamHandle {
    inbox: mpsc::Sender<Bar>,
    counters: Arc<StreamCounters>,
    task: JoinHandle<()>,
}

/// Watches any number of (symbol, timeframe) streams for template matches.
///
/// Every stream is owned by its own task with a bounded inbox, so bars of one
/// stream are evaluated strictly in order while streams run concurrently.
/// The pattern library is a shared immutable snapshot that `reload_library`
/// replaces wholesale; an evaluation keeps the snapshot it started with.
pub struct LiveMonitor {
    config: DetectionConfig,
    engine: MatchEngine,
    filter: TemplateFilter,
    source: Arc<dyn PatternSource>,
    library: Arc<RwLock<Arc<PatternLibrary>>>,
    observers: Arc<ObserverList>,
    streams: RwLock<HashMap<StreamKey, StreamHandle>>,
    totals: Arc<Counters>,
    running: AtomicBool,
    reloader: Mutex<Option<JoinHandle<()>>>,
}

impl LiveMonitor {
    pub fn new(
        config: DetectionConfig,
        filter: TemplateFilter,
        source: Arc<dyn PatternSource>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: MatchEngine::new(&config),
            config,
            filter,
            source,
            library: Arc::new(RwLock::new(Arc::new(PatternLibrary::empty()))),
            observers: Arc::new(ObserverList::new()),
            streams: RwLock::new(HashMap::new()),
            totals: Arc::new(Counters::default()),
            running: AtomicBool::new(false),
            reloader: Mutex::new(None),
        })
    }

    /// Load the library and begin monitoring every symbol × timeframe pair.
    ///
    /// Pairs already monitored are left alone. If the library cannot be
    /// loaded the streams still start on the previous (possibly empty)
    /// snapshot and the load error is returned.
    pub async fn start(&self, symbols: &[String], timeframes: &[String]) -> Result<()> {
        let loaded = self.reload_library().await;
        let library = self.library().await;
        self.running.store(true, Ordering::SeqCst);

        let mut streams = self.streams.write().await;
        for symbol in symbols {
            for timeframe in timeframes {
                let key = StreamKey::new(symbol, timeframe);
                if streams.contains_key(&key) {
                    debug!(stream = %key, "Stream already monitored");
                    continue;
                }
                if library.candidates(timeframe).is_none() {
                    warn!(stream = %key, "No templates for timeframe, stream will never match until a reload adds some");
                }
                let handle = self.spawn_stream(key.clone(), &library);
                streams.insert(key.clone(), handle);
                info!(stream = %key, "Monitoring started");
            }
        }
        info!(
            streams = streams.len(),
            patterns = library.len(),
            "Live monitor running"
        );
        drop(streams);

        loaded.map(|_| ())
    }

    fn spawn_stream(&self, key: StreamKey, library: &PatternLibrary) -> StreamHandle {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let counters = Arc::new(StreamCounters::default());

        let worker = StreamWorker {
            buffer: StreamBuffer::new(capacity_for(library, self.config.buffer_capacity)),
            key,
            since_scan: 0,
            interval: self.config.evaluation_interval,
            configured_capacity: self.config.buffer_capacity,
            engine: self.engine,
            library: self.library.clone(),
            observers: self.observers.clone(),
            counters: counters.clone(),
            totals: self.totals.clone(),
        };

        StreamHandle {
            inbox: inbox_tx,
            counters,
            task: tokio::spawn(worker.run(inbox_rx)),
        }
    }

    /// Queue a closed bar for its stream. Waits while the stream's inbox is
    /// full.
    pub async fn on_new_bar(&self, symbol: &str, timeframe: &str, bar: Bar) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::MonitorStopped);
        }
        if !bar.close.is_finite() {
            return Err(Error::NonFiniteValue { index: 0 });
        }

        let key = StreamKey::new(symbol, timeframe);
        let inbox = {
            let streams = self.streams.read().await;
            match streams.get(&key) {
                Some(handle) => handle.inbox.clone(),
                None => return Err(Error::NotMonitored(key)),
            }
        };
        inbox.send(bar).await.map_err(|_| Error::MonitorStopped)
    }

    pub fn add_observer(&self, observer: Arc<dyn MatchObserver>) -> ObserverId {
        let id = self.observers.add(observer);
        debug!(observer_id = id, "Observer registered");
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Stop every stream. New bars are refused at once; every bar already
    /// accepted is still evaluated and its matches dispatched before this
    /// returns.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let reloader = self.reloader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(reloader) = reloader {
            reloader.abort();
        }

        let handles: Vec<(StreamKey, StreamHandle)> = self.streams.write().await.drain().collect();
        let count = handles.len();
        for (key, handle) in handles {
            retire(key, handle).await;
        }
        info!(streams = count, "Live monitor stopped");
    }

    /// Stop one stream after its accepted bars are evaluated. Returns
    /// `false` if it was not monitored.
    pub async fn stop_stream(&self, symbol: &str, timeframe: &str) -> bool {
        let key = StreamKey::new(symbol, timeframe);
        let handle = self.streams.write().await.remove(&key);
        match handle {
            Some(handle) => {
                retire(key, handle).await;
                true
            }
            None => false,
        }
    }

    /// Fetch a fresh snapshot from the pattern source and swap it in.
    ///
    /// On failure the current snapshot stays active. Returns the number of
    /// templates in the new snapshot.
    pub async fn reload_library(&self) -> Result<usize> {
        match PatternLibrary::load(self.source.as_ref(), &self.filter).await {
            Ok(library) => {
                let count = library.len();
                *self.library.write().await = Arc::new(library);
                info!(patterns = count, "Pattern library swapped in");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "Pattern library load failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    /// Reload the library every `every` until the monitor stops or is
    /// dropped. Failed reloads are logged and retried on the next tick.
    pub fn spawn_reloader(self: &Arc<Self>, every: Duration) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else { break };
                if !monitor.is_running() {
                    break;
                }
                if let Err(e) = monitor.reload_library().await {
                    warn!(error = %e, "Scheduled library reload failed");
                }
            }
        });

        let previous = self
            .reloader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(every = ?every, "Library reloader scheduled");
    }

    /// The snapshot new evaluations will use.
    pub async fn library(&self) -> Arc<PatternLibrary> {
        self.library.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> MonitorStats {
        let patterns_loaded = self.library.read().await.len();
        let mut streams: Vec<StreamStats> = self
            .streams
            .read()
            .await
            .iter()
            .map(|(key, handle)| StreamStats {
                key: key.clone(),
                buffered: handle.counters.buffered.load(Ordering::Acquire),
                bars_processed: handle.counters.bars.load(Ordering::Acquire),
                matches_found: handle.counters.matches.load(Ordering::Acquire),
            })
            .collect();
        streams.sort_by(|a, b| a.key.cmp(&b.key));

        MonitorStats {
            bars_processed: self.totals.bars.load(Ordering::Acquire),
            matches_found: self.totals.matches.load(Ordering::Acquire),
            patterns_loaded,
            streams,
        }
    }
}

/// Close a stream's inbox and wait for its worker to finish the backlog.
async fn retire(key: StreamKey, handle: StreamHandle) {
    let StreamHandle { inbox, task, .. } = handle;
    drop(inbox);
    if let Err(e) = task.await {
        warn!(stream = %key, error = %e, "Stream task ended abnormally");
    }
    debug!(stream = %key, "Stream retired");
}

/// Buffer capacity for a library snapshot: the configured value, raised to
/// the widest template so every width can be evaluated.
fn capacity_for(library: &PatternLibrary, configured: Option<usize>) -> usize {
    configured
        .unwrap_or(0)
        .max(library.max_width().unwrap_or(0))
        .max(1)
}

// ─── Per-stream task ─────────────────────────────────────────────────────────

struct StreamWorker {
    key: StreamKey,
    buffer: StreamBuffer,
    since_scan: usize,
    interval: usize,
    configured_capacity: Option<usize>,
    engine: MatchEngine,
    library: Arc<RwLock<Arc<PatternLibrary>>>,
    observers: Arc<ObserverList>,
    counters: Arc<StreamCounters>,
    totals: Arc<Counters>,
}

impl StreamWorker {
    /// Runs until every sender is gone and the inbox is empty.
    async fn run(mut self, mut inbox: mpsc::Receiver<Bar>) {
        while let Some(bar) = inbox.recv().await {
            self.on_bar(bar).await;
        }
    }

    async fn on_bar(&mut self, bar: Bar) {
        let library = self.library.read().await.clone();
        self.buffer.grow_to(capacity_for(&library, self.configured_capacity));
        self.buffer.push(bar.close);
        self.counters.buffered.store(self.buffer.len(), Ordering::Release);

        self.since_scan += 1;
        if self.since_scan >= self.interval {
            self.since_scan = 0;
            self.evaluate(&library, &bar);
        }

        self.counters.bars.fetch_add(1, Ordering::AcqRel);
        self.totals.bars.fetch_add(1, Ordering::AcqRel);
    }

    /// One engine pass per distinct template width for this timeframe.
    fn evaluate(&mut self, library: &PatternLibrary, bar: &Bar) {
        let Some(candidates) = library.candidates(&self.key.timeframe) else {
            return;
        };
        let tick = Tick {
            key: &self.key,
            timestamp: bar.timestamp,
            price: bar.close,
        };

        for (width, templates) in candidates.groups() {
            let Some(window) = self.buffer.window(width) else {
                continue;
            };
            match self.engine.evaluate(window, templates, tick) {
                Ok(Some(m)) => {
                    self.counters.matches.fetch_add(1, Ordering::AcqRel);
                    self.totals.matches.fetch_add(1, Ordering::AcqRel);
                    info!(
                        stream = %self.key,
                        template_id = m.template_id,
                        score = m.similarity,
                        decision = %m.decision,
                        confidence = m.confidence,
                        price = m.current_price,
                        "Pattern matched"
                    );
                    self.observers.dispatch(&m);
                }
                Ok(None) => {}
                Err(e) => warn!(stream = %self.key, width, error = %e, "Evaluation failed"),
            }
        }
    }
}
