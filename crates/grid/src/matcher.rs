use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use common::{Match, Result, StreamKey, Template};

use crate::config::DetectionConfig;
use crate::decision::DecisionResolver;
use crate::encoder::{trend_pct, Encoding, GridEncoder};
use crate::similarity::score_template;

/// The stream and bar an evaluation runs for.
#[derive(Debug, Clone, Copy)]
pub struct Tick<'a> {
    pub key: &'a StreamKey,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Picks the single best template for a price window.
#[derive(Debug, Clone, Copy)]
pub struct MatchEngine {
    min_similarity: f64,
    resolver: DecisionResolver,
}

impl MatchEngine {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            min_similarity: config.min_similarity,
            resolver: DecisionResolver::new(config.strong_predicate_threshold),
        }
    }

    /// Score `window` (oldest first) against every candidate whose grid width
    /// equals the window length and return a match for the best one.
    ///
    /// The window is encoded once per distinct grid shape. Candidates below
    /// the similarity floor are dropped; the winner has the highest score,
    /// then the higher `total_pnl`, then the lower id. `Ok(None)` means
    /// nothing qualified, which is the usual outcome.
    pub fn evaluate(
        &self,
        window: &[f64],
        candidates: &[Arc<Template>],
        tick: Tick<'_>,
    ) -> Result<Option<Match>> {
        let mut encodings: Vec<Encoding> = Vec::new();
        let mut best: Option<(usize, &Template, f64)> = None;

        for template in candidates {
            if template.grid.cols != window.len() {
                continue;
            }

            let slot = match encodings.iter().position(|e| e.grid == template.grid) {
                Some(slot) => slot,
                None => {
                    encodings.push(GridEncoder::new(template.grid)?.encode(window)?);
                    encodings.len() - 1
                }
            };

            let score = score_template(&encodings[slot], template)?;
            if score < self.min_similarity {
                continue;
            }

            let replace = match best {
                None => true,
                Some((_, leader, leader_score)) => {
                    rank(score, template, leader_score, leader) == Ordering::Greater
                }
            };
            if replace {
                best = Some((slot, template.as_ref(), score));
            }
        }

        let Some((slot, winner, similarity)) = best else {
            debug!(stream = %tick.key, width = window.len(), "No template above similarity floor");
            return Ok(None);
        };

        let resolution = self.resolver.resolve(&winner.predicate_accuracies)?;
        let template_id = winner.id;
        let grid = winner.grid;
        let encoding = encodings.swap_remove(slot);

        Ok(Some(Match {
            symbol: tick.key.symbol.clone(),
            timeframe: tick.key.timeframe.clone(),
            timestamp: tick.timestamp,
            template_id,
            similarity,
            decision: resolution.decision,
            confidence: resolution.confidence,
            current_price: tick.price,
            grid,
            pic: encoding.pic,
            trend_pct: trend_pct(window),
        }))
    }
}

/// Order two scored candidates: score, then total P&L, then lower id wins.
fn rank(score: f64, template: &Template, other_score: f64, other: &Template) -> Ordering {
    score
        .total_cmp(&other_score)
        .then_with(|| template.total_pnl.total_cmp(&other.total_pnl))
        .then_with(|| other.id.cmp(&template.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::{CreationMethod, Decision, GridShape};

    use crate::encoder::indicator_matrix;

    const LONG_PREDICATES: [f64; 10] = [85.0, 82.0, 79.0, 70.0, 65.0, 20.0, 22.0, 25.0, 18.0, 21.0];

    fn template_from_pic(id: i64, rows: usize, pic: Vec<usize>, pnl: f64) -> Arc<Template> {
        let grid = GridShape::new(rows, pic.len());
        Arc::new(Template {
            id,
            weights: indicator_matrix(&pic, grid),
            pic,
            grid,
            timeframe: "5".into(),
            creation_method: CreationMethod::Historical,
            prediction_accuracy: 80.0,
            has_forecasting_power: true,
            predicate_accuracies: LONG_PREDICATES.to_vec(),
            trades_taken: 20,
            successful_trades: 14,
            total_pnl: pnl,
        })
    }

    fn engine(min_similarity: f64) -> MatchEngine {
        MatchEngine::new(&DetectionConfig {
            min_similarity,
            ..DetectionConfig::default()
        })
    }

    fn run(engine: &MatchEngine, window: &[f64], candidates: &[Arc<Template>]) -> Option<Match> {
        let key = StreamKey::new("EURUSD", "5");
        let tick = Tick {
            key: &key,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            price: *window.last().unwrap(),
        };
        engine.evaluate(window, candidates, tick).unwrap()
    }

    // Rising 4-bar window on a 4-row grid encodes to [3, 2, 1, 0].
    const RISING: [f64; 4] = [1.0, 2.0, 3.0, 4.0];

    #[test]
    fn exact_template_matches_with_full_score() {
        let t = template_from_pic(1, 4, vec![3, 2, 1, 0], 5.0);
        let m = run(&engine(65.0), &RISING, &[t]).unwrap();
        assert_eq!(m.template_id, 1);
        assert!((m.similarity - 100.0).abs() < 1e-9);
        assert_eq!(m.decision, Decision::EnterLong);
        assert_eq!(m.pic, vec![3, 2, 1, 0]);
        assert_eq!(m.current_price, 4.0);
        assert_eq!(m.symbol, "EURUSD");
        assert!((m.trend_pct - 300.0).abs() < 1e-9);
    }

    #[test]
    fn higher_score_wins() {
        // Shares three of four cells with the window: cosine 0.75 -> 87.5
        let close = template_from_pic(1, 4, vec![3, 2, 1, 1], 100.0);
        let exact = template_from_pic(2, 4, vec![3, 2, 1, 0], 1.0);
        let m = run(&engine(65.0), &RISING, &[close, exact]).unwrap();
        assert_eq!(m.template_id, 2);
    }

    #[test]
    fn score_tie_breaks_on_total_pnl() {
        let poorer = template_from_pic(1, 4, vec![3, 2, 1, 0], 10.0);
        let richer = template_from_pic(2, 4, vec![3, 2, 1, 0], 20.0);
        let m = run(&engine(65.0), &RISING, &[poorer, richer]).unwrap();
        assert_eq!(m.template_id, 2);
    }

    #[test]
    fn full_tie_breaks_on_lower_id() {
        let a = template_from_pic(9, 4, vec![3, 2, 1, 0], 10.0);
        let b = template_from_pic(4, 4, vec![3, 2, 1, 0], 10.0);
        let m = run(&engine(65.0), &RISING, &[a, b]).unwrap();
        assert_eq!(m.template_id, 4);
    }

    #[test]
    fn nothing_above_threshold_yields_no_match() {
        // Disjoint one-hot shape: cosine 0 -> score 50
        let t = template_from_pic(1, 4, vec![0, 1, 2, 3], 10.0);
        assert!(run(&engine(65.0), &RISING, &[t]).is_none());
    }

    #[test]
    fn threshold_is_inclusive() {
        let t = template_from_pic(1, 4, vec![0, 1, 2, 3], 10.0);
        assert!(run(&engine(50.0), &RISING, &[t]).is_some());
    }

    #[test]
    fn other_widths_are_never_scored() {
        let wide = template_from_pic(1, 4, vec![3, 2, 1, 0, 0], 10.0);
        assert!(run(&engine(0.0), &RISING, &[wide]).is_none());
    }

    #[test]
    fn window_is_encoded_per_row_count() {
        // Same window on a 2-row grid: [1, 0, 0, 0]
        let two_rows = template_from_pic(1, 2, vec![1, 0, 0, 0], 1.0);
        let four_rows = template_from_pic(2, 4, vec![0, 0, 0, 0], 50.0);
        let m = run(&engine(65.0), &RISING, &[four_rows, two_rows]).unwrap();
        assert_eq!(m.template_id, 1);
        assert_eq!(m.grid, GridShape::new(2, 4));
        assert_eq!(m.pic, vec![1, 0, 0, 0]);
    }

    #[test]
    fn self_similarity_beats_orthogonal_template() {
        let own = template_from_pic(1, 4, vec![3, 2, 1, 0], 0.0);
        let orthogonal = template_from_pic(2, 4, vec![0, 0, 0, 1], 1000.0);
        let m = run(&engine(0.0), &RISING, &[orthogonal, own]).unwrap();
        assert_eq!(m.template_id, 1);
    }

    #[test]
    fn empty_candidate_set_is_not_an_error() {
        assert!(run(&engine(65.0), &RISING, &[]).is_none());
    }
}
