pub mod buffer;
pub mod config;
pub mod monitor;
pub mod observer;
pub mod replay;

pub use buffer::StreamBuffer;
pub use config::{AlertConfig, LibraryConfig, MonitorFileConfig, ReplayConfig};
pub use monitor::{LiveMonitor, MonitorStats, StreamStats};
pub use observer::{
    ChannelObserver, FnObserver, HighConfidenceAlert, ObserverId, ObserverList, TradingSignalAlert,
};
pub use replay::ReplayFeed;
