use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, Template};

/// Selection criteria applied when loading templates.
///
/// Sources may push the filter down into their query; the pattern library
/// re-applies it on load so a source that ignores it is still correct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateFilter {
    /// Only templates for this timeframe. `None` loads every timeframe.
    pub timeframe: Option<String>,
    /// Templates must beat this accuracy, not merely reach it.
    pub min_accuracy: f64,
    /// Templates must beat this P&L; the default excludes untraded ones.
    pub min_pnl: f64,
    pub forecasting_power_required: bool,
    /// Upper bound on templates returned, best first.
    pub limit: Option<usize>,
}

impl Default for TemplateFilter {
    fn default() -> Self {
        Self {
            timeframe: None,
            min_accuracy: 60.0,
            min_pnl: 0.0,
            forecasting_power_required: true,
            limit: None,
        }
    }
}

impl TemplateFilter {
    pub fn accepts(&self, template: &Template) -> bool {
        if let Some(tf) = &self.timeframe {
            if &template.timeframe != tf {
                return false;
            }
        }
        if self.forecasting_power_required && !template.has_forecasting_power {
            return false;
        }
        template.prediction_accuracy > self.min_accuracy && template.total_pnl > self.min_pnl
    }
}

/// A template that was refused, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedTemplate {
    pub id: i64,
    pub reason: String,
}

/// What a source returns: decoded templates, best first, plus the records it
/// found but could not decode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateBatch {
    pub templates: Vec<Template>,
    pub rejected: Vec<RejectedTemplate>,
}

impl From<Vec<Template>> for TemplateBatch {
    fn from(templates: Vec<Template>) -> Self {
        Self {
            templates,
            rejected: Vec::new(),
        }
    }
}

/// Read interface to wherever templates are stored.
///
/// Implementations must return a consistent snapshot: the caller treats the
/// returned sequence as immutable for the lifetime of the library built from it.
#[async_trait]
pub trait PatternSource: Send + Sync {
    /// Load templates matching `filter`, ordered best first.
    async fn load_templates(&self, filter: &TemplateFilter) -> Result<TemplateBatch>;
}
