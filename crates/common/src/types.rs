use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of predicate accuracies every template carries.
pub const PREDICATE_COUNT: usize = 10;

/// One OHLCV bar as delivered by the bar source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// A bar whose OHLC values all equal `price`. Handy for tick-style feeds.
    pub fn flat(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

/// Identifies one monitored stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub symbol: String,
    pub timeframe: String,
}

impl StreamKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.symbol, self.timeframe)
    }
}

/// Grid dimensions: `rows` price bands (M) by `cols` time columns (N).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Length of the flattened M×N matrix.
    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

impl std::fmt::Display for GridShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// How a template was produced. Informational only; never affects scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CreationMethod {
    #[default]
    Historical,
    Genetic,
    #[serde(other)]
    Unknown,
}

impl CreationMethod {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "historical" => CreationMethod::Historical,
            "genetic" => CreationMethod::Genetic,
            _ => CreationMethod::Unknown,
        }
    }
}

impl std::fmt::Display for CreationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreationMethod::Historical => write!(f, "historical"),
            CreationMethod::Genetic => write!(f, "genetic"),
            CreationMethod::Unknown => write!(f, "unknown"),
        }
    }
}

/// A stored, pre-trained price-shape template.
///
/// `weights` is the M×N weight matrix flattened row-major, so the weight for
/// grid cell `(row, col)` lives at `row * cols + col`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    /// Pattern Identification Code: one row index per grid column.
    pub pic: Vec<usize>,
    pub grid: GridShape,
    pub weights: Vec<f64>,
    pub timeframe: String,
    pub creation_method: CreationMethod,
    /// Historical prediction accuracy, 0–100.
    pub prediction_accuracy: f64,
    pub has_forecasting_power: bool,
    /// Exactly [`PREDICATE_COUNT`] accuracies, LONG group first.
    pub predicate_accuracies: Vec<f64>,
    pub trades_taken: u32,
    pub successful_trades: u32,
    pub total_pnl: f64,
}

impl Template {
    /// Check the structural invariants a template must satisfy before it can
    /// become a match candidate.
    pub fn validate(&self) -> Result<()> {
        let GridShape { rows, cols } = self.grid;
        if self.grid.is_empty() {
            return Err(Error::malformed(self.id, format!("empty grid {}", self.grid)));
        }
        if self.pic.len() != cols {
            return Err(Error::malformed(
                self.id,
                format!("PIC length {} doesn't match grid width {cols}", self.pic.len()),
            ));
        }
        if let Some((col, row)) = self.pic.iter().enumerate().find(|(_, &row)| row >= rows) {
            return Err(Error::malformed(
                self.id,
                format!("PIC row {row} at column {col} outside [0, {rows})"),
            ));
        }
        if self.weights.len() != self.grid.cells() {
            return Err(Error::malformed(
                self.id,
                format!(
                    "weight matrix has {} cells, grid {} needs {}",
                    self.weights.len(),
                    self.grid,
                    self.grid.cells()
                ),
            ));
        }
        if self.weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::malformed(self.id, "weight matrix contains a non-finite value"));
        }
        if self.predicate_accuracies.len() != PREDICATE_COUNT {
            return Err(Error::malformed(
                self.id,
                format!(
                    "expected {PREDICATE_COUNT} predicate accuracies, got {}",
                    self.predicate_accuracies.len()
                ),
            ));
        }
        if let Some((i, acc)) = self
            .predicate_accuracies
            .iter()
            .enumerate()
            .find(|(_, a)| !(0.0..=100.0).contains(*a))
        {
            return Err(Error::malformed(
                self.id,
                format!("predicate accuracy {acc} at index {i} outside [0, 100]"),
            ));
        }
        Ok(())
    }
}

/// Trading decision resolved from a template's predicate accuracies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    EnterLong,
    EnterShort,
    NotTrade,
    Conflict,
}

impl Decision {
    pub fn signal_type(&self) -> SignalType {
        match self {
            Decision::EnterLong => SignalType::Buy,
            Decision::EnterShort => SignalType::Sell,
            Decision::NotTrade | Decision::Conflict => SignalType::Neutral,
        }
    }

    /// Weight applied to a match's confidence when it is turned into a signal.
    pub fn signal_weight(&self) -> f64 {
        match self {
            Decision::EnterLong | Decision::EnterShort => 0.95,
            Decision::NotTrade => 0.3,
            Decision::Conflict => 0.4,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, Decision::EnterLong | Decision::EnterShort)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::EnterLong => write!(f, "ENTER_LONG"),
            Decision::EnterShort => write!(f, "ENTER_SHORT"),
            Decision::NotTrade => write!(f, "NOT_TRADE"),
            Decision::Conflict => write!(f, "CONFLICT"),
        }
    }
}

/// Direction of a journalled signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Neutral,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalType::Buy => write!(f, "BUY"),
            SignalType::Sell => write!(f, "SELL"),
            SignalType::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Result of one successful evaluation: a stream, the winning template, its
/// similarity and the resolved decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub symbol: String,
    pub timeframe: String,
    /// Timestamp of the bar that triggered the evaluation.
    pub timestamp: DateTime<Utc>,
    pub template_id: i64,
    /// Similarity score, 0–100.
    pub similarity: f64,
    pub decision: Decision,
    /// Decision confidence, 0–100.
    pub confidence: f64,
    pub current_price: f64,
    pub grid: GridShape,
    /// PIC of the evaluated window.
    pub pic: Vec<usize>,
    /// Percent change from the first to the last observation of the window.
    pub trend_pct: f64,
}

impl Match {
    pub fn key(&self) -> StreamKey {
        StreamKey::new(&self.symbol, &self.timeframe)
    }

    pub fn signal_type(&self) -> SignalType {
        self.decision.signal_type()
    }

    /// Confidence weighted by the decision's signal weight, capped at 100.
    pub fn signal_confidence(&self) -> f64 {
        (self.confidence * self.decision.signal_weight()).min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Template {
        Template {
            id: 7,
            pic: vec![0, 1, 2],
            grid: GridShape::new(3, 3),
            weights: vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            timeframe: "5".into(),
            creation_method: CreationMethod::Historical,
            prediction_accuracy: 75.0,
            has_forecasting_power: true,
            predicate_accuracies: vec![50.0; PREDICATE_COUNT],
            trades_taken: 4,
            successful_trades: 3,
            total_pnl: 12.5,
        }
    }

    #[test]
    fn well_formed_template_validates() {
        assert!(template().validate().is_ok());
    }

    #[test]
    fn pic_length_mismatch_is_rejected() {
        let mut t = template();
        t.pic.pop();
        assert!(matches!(t.validate(), Err(Error::MalformedTemplate { id: 7, .. })));
    }

    #[test]
    fn pic_row_outside_grid_is_rejected() {
        let mut t = template();
        t.pic[1] = 3;
        let err = t.validate().unwrap_err();
        assert!(err.to_string().contains("outside [0, 3)"), "{err}");
    }

    #[test]
    fn wrong_predicate_count_is_rejected() {
        let mut t = template();
        t.predicate_accuracies.push(10.0);
        assert!(t.validate().is_err());
    }

    #[test]
    fn weight_count_must_cover_grid() {
        let mut t = template();
        t.weights.truncate(8);
        assert!(t.validate().is_err());
    }

    #[test]
    fn predicate_accuracies_must_be_percentages() {
        for bad in [f64::NAN, f64::INFINITY, -0.5, 100.5] {
            let mut t = template();
            t.predicate_accuracies[6] = bad;
            assert!(
                matches!(t.validate(), Err(Error::MalformedTemplate { id: 7, .. })),
                "{bad} accepted"
            );
        }
        let mut t = template();
        t.predicate_accuracies[0] = 0.0;
        t.predicate_accuracies[9] = 100.0;
        assert!(t.validate().is_ok());
    }

    #[test]
    fn decisions_map_to_signal_types() {
        assert_eq!(Decision::EnterLong.signal_type(), SignalType::Buy);
        assert_eq!(Decision::EnterShort.signal_type(), SignalType::Sell);
        assert_eq!(Decision::Conflict.signal_type(), SignalType::Neutral);
        assert_eq!(Decision::NotTrade.to_string(), "NOT_TRADE");
    }

    #[test]
    fn creation_method_tags_parse_leniently() {
        assert_eq!(CreationMethod::from_tag("Genetic"), CreationMethod::Genetic);
        assert_eq!(CreationMethod::from_tag("historical "), CreationMethod::Historical);
        assert_eq!(CreationMethod::from_tag("imported"), CreationMethod::Unknown);
    }

    #[test]
    fn stream_key_renders_symbol_and_timeframe() {
        assert_eq!(StreamKey::new("EURUSD", "5").to_string(), "EURUSD_5");
    }
}
