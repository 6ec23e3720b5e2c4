use std::ops::Range;

use common::{Decision, Error, Result, PREDICATE_COUNT};

/// Predicates voting for a long entry.
pub const LONG_PREDICATES: Range<usize> = 0..5;
/// Predicates voting for a short entry.
pub const SHORT_PREDICATES: Range<usize> = 5..10;

/// Minimum strong predicates a side needs before it can win.
const MIN_STRONG: usize = 3;

/// Outcome of resolving a template's predicate accuracies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub decision: Decision,
    /// Mean accuracy of the winning side's strong predicates, or of all ten
    /// predicates for `NOT_TRADE` and `CONFLICT`.
    pub confidence: f64,
    pub strong_long: usize,
    pub strong_short: usize,
}

/// Turns ten predicate accuracies into a trading decision.
///
/// The first five predicates are LONG-oriented and the last five
/// SHORT-oriented for every template.
#[derive(Debug, Clone, Copy)]
pub struct DecisionResolver {
    pub strong_threshold: f64,
}

impl Default for DecisionResolver {
    fn default() -> Self {
        Self::new(60.0)
    }
}

impl DecisionResolver {
    pub fn new(strong_threshold: f64) -> Self {
        Self { strong_threshold }
    }

    pub fn resolve(&self, accuracies: &[f64]) -> Result<Resolution> {
        if accuracies.len() != PREDICATE_COUNT {
            return Err(Error::InvalidPredicates {
                expected: PREDICATE_COUNT,
                got: accuracies.len(),
            });
        }

        let long: Vec<f64> = self.strong(&accuracies[LONG_PREDICATES]);
        let short: Vec<f64> = self.strong(&accuracies[SHORT_PREDICATES]);
        let (strong_long, strong_short) = (long.len(), short.len());

        let (decision, confidence) = if strong_long >= MIN_STRONG && strong_long > strong_short {
            (Decision::EnterLong, mean(&long))
        } else if strong_short >= MIN_STRONG && strong_short > strong_long {
            (Decision::EnterShort, mean(&short))
        } else if strong_long >= MIN_STRONG && strong_short >= MIN_STRONG {
            (Decision::Conflict, mean(accuracies))
        } else {
            (Decision::NotTrade, mean(accuracies))
        };

        Ok(Resolution {
            decision,
            confidence,
            strong_long,
            strong_short,
        })
    }

    fn strong(&self, group: &[f64]) -> Vec<f64> {
        group
            .iter()
            .copied()
            .filter(|&acc| acc > self.strong_threshold)
            .collect()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
