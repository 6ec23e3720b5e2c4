use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{Error, Result, TemplateFilter};
use grid::DetectionConfig;

/// Top-level monitor config file (TOML).
///
/// Example `config/monitor.toml`:
/// ```toml
/// symbols = ["EURUSD", "GBPUSD"]
/// timeframes = ["5", "15"]
///
/// [detection]
/// min_similarity = 70.0
///
/// [library]
/// min_accuracy = 70.0
/// limit = 50
/// reload_interval_secs = 300
///
/// [replay]
/// start = "2024-01-01T00:00:00Z"
/// pace_ms = 0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorFileConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

/// Which templates to load and how often to refresh them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LibraryConfig {
    #[serde(flatten)]
    pub filter: TemplateFilter,
    /// Reload cadence. `None` loads once at start.
    #[serde(default)]
    pub reload_interval_secs: Option<u64>,
}

/// Confidence floors for the logging alert observers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    pub high_confidence: f64,
    pub trading_signal: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            high_confidence: 80.0,
            trading_signal: 75.0,
        }
    }
}

/// Historical range fed through the monitor by the replay driver.
///
/// Timestamps are RFC 3339 strings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Delay between bars, 0 replays as fast as possible.
    pub pace_ms: u64,
}

impl MonitorFileConfig {
    /// Load and validate from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read monitor config at '{path}': {e}")))?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("invalid monitor config at '{path}': {e}")))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(Error::Config("at least one symbol is required".into()));
        }
        if self.timeframes.is_empty() {
            return Err(Error::Config("at least one timeframe is required".into()));
        }
        if self.library.reload_interval_secs == Some(0) {
            return Err(Error::Config("reload_interval_secs must be at least 1".into()));
        }
        if let (Some(start), Some(end)) = (self.replay.start, self.replay.end) {
            if start > end {
                return Err(Error::Config(format!("replay start {start} is after end {end}")));
            }
        }
        self.detection.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let cfg = MonitorFileConfig::from_toml_str(
            r#"
            symbols = ["EURUSD"]
            timeframes = ["5"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.detection, DetectionConfig::default());
        assert_eq!(cfg.library.filter, TemplateFilter::default());
        assert!(cfg.library.reload_interval_secs.is_none());
        assert_eq!(cfg.alerts.high_confidence, 80.0);
        assert_eq!(cfg.replay.pace_ms, 0);
    }

    #[test]
    fn full_file_parses() {
        let cfg = MonitorFileConfig::from_toml_str(
            r#"
            symbols = ["EURUSD", "XAUUSD"]
            timeframes = ["5", "15", "60"]

            [detection]
            strong_predicate_threshold = 70.0
            min_similarity = 80.0
            evaluation_interval = 3
            buffer_capacity = 120

            [library]
            timeframe = "5"
            min_accuracy = 70.0
            min_pnl = 1.0
            forecasting_power_required = false
            limit = 50
            reload_interval_secs = 300

            [alerts]
            high_confidence = 90.0

            [replay]
            start = "2024-01-01T00:00:00Z"
            end = "2024-01-08T00:00:00Z"
            pace_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(cfg.timeframes.len(), 3);
        assert_eq!(cfg.detection.evaluation_interval, 3);
        assert_eq!(cfg.detection.buffer_capacity, Some(120));
        assert_eq!(cfg.library.filter.timeframe.as_deref(), Some("5"));
        assert_eq!(cfg.library.filter.limit, Some(50));
        assert!(!cfg.library.filter.forecasting_power_required);
        assert_eq!(cfg.library.reload_interval_secs, Some(300));
        assert_eq!(cfg.alerts.high_confidence, 90.0);
        assert_eq!(cfg.alerts.trading_signal, 75.0);
        assert!(cfg.replay.start.unwrap() < cfg.replay.end.unwrap());
    }

    #[test]
    fn empty_symbol_list_is_rejected() {
        let err = MonitorFileConfig::from_toml_str("symbols = []\ntimeframes = [\"5\"]").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_detection_block_is_rejected() {
        let err = MonitorFileConfig::from_toml_str(
            r#"
            symbols = ["EURUSD"]
            timeframes = ["5"]
            [detection]
            evaluation_interval = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = MonitorFileConfig::load("does/not/exist/monitor.toml").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("does/not/exist/monitor.toml")));
    }
}
