use serde::{Deserialize, Serialize};
use tracing::warn;

use common::{Error, Result};

/// Tunable detection parameters.
///
/// Example `[detection]` table:
/// ```toml
/// [detection]
/// strong_predicate_threshold = 60.0
/// min_similarity = 65.0
/// evaluation_interval = 1
/// # buffer_capacity = 120
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// A predicate counts as strong when its accuracy exceeds this (0–100).
    pub strong_predicate_threshold: f64,
    /// Candidates scoring below this similarity are discarded (0–100).
    pub min_similarity: f64,
    /// Evaluate every N bars per stream.
    pub evaluation_interval: usize,
    /// Rolling buffer length per stream. `None` sizes it to the widest
    /// loaded template; a configured value never shrinks below that width.
    pub buffer_capacity: Option<usize>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            strong_predicate_threshold: 60.0,
            min_similarity: 65.0,
            evaluation_interval: 1,
            buffer_capacity: None,
        }
    }
}

impl DetectionConfig {
    /// Documented operating range for `min_similarity`.
    pub const SIMILARITY_RANGE: (f64, f64) = (50.0, 90.0);

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.strong_predicate_threshold) {
            return Err(Error::Config(format!(
                "strong_predicate_threshold must be within [0, 100], got {}",
                self.strong_predicate_threshold
            )));
        }
        if !(0.0..=100.0).contains(&self.min_similarity) {
            return Err(Error::Config(format!(
                "min_similarity must be within [0, 100], got {}",
                self.min_similarity
            )));
        }
        if self.evaluation_interval == 0 {
            return Err(Error::Config("evaluation_interval must be at least 1".into()));
        }
        if self.buffer_capacity == Some(0) {
            return Err(Error::Config("buffer_capacity must be at least 1".into()));
        }

        let (lo, hi) = Self::SIMILARITY_RANGE;
        if !(lo..=hi).contains(&self.min_similarity) {
            warn!(
                min_similarity = self.min_similarity,
                "min_similarity outside the documented {lo}–{hi} range"
            );
        }
        Ok(())
    }
}
