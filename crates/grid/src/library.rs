use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use common::{Error, PatternSource, RejectedTemplate, Result, Template, TemplateBatch, TemplateFilter};

/// Match candidates for one timeframe, grouped by grid width.
///
/// Each group is evaluated against its own trailing window, so a stream
/// produces at most one match per distinct width.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    by_width: BTreeMap<usize, Vec<Arc<Template>>>,
}

impl CandidateSet {
    fn push(&mut self, template: Arc<Template>) {
        self.by_width
            .entry(template.grid.cols)
            .or_default()
            .push(template);
    }

    /// `(width, templates)` pairs in ascending width order.
    pub fn groups(&self) -> impl Iterator<Item = (usize, &[Arc<Template>])> + '_ {
        self.by_width.iter().map(|(&w, ts)| (w, ts.as_slice()))
    }

    pub fn widths(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_width.keys().copied()
    }

    pub fn max_width(&self) -> Option<usize> {
        self.by_width.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.by_width.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_width.is_empty()
    }
}

/// Immutable snapshot of the active templates.
///
/// Built once per load or reload; filtering and grouping by timeframe happen
/// here so evaluation only walks the prepared candidate sets. Share it behind
/// an `Arc` and replace the whole snapshot to reload.
#[derive(Debug, Default)]
pub struct PatternLibrary {
    templates: Vec<Arc<Template>>,
    by_timeframe: HashMap<String, CandidateSet>,
    rejected: Vec<RejectedTemplate>,
}

impl PatternLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate and filter `templates` (kept in the given order) into a
    /// snapshot. Malformed templates are excluded and reported, never fatal.
    pub fn build(templates: Vec<Template>, filter: &TemplateFilter) -> Self {
        Self::from_batch(templates.into(), filter)
    }

    /// Like `build`, also recording the records the source could not decode.
    pub fn from_batch(batch: TemplateBatch, filter: &TemplateFilter) -> Self {
        let TemplateBatch { templates, rejected } = batch;
        let mut library = Self::default();
        let mut seen = HashSet::new();

        for r in rejected {
            library.reject(r.id, r.reason);
        }

        for template in templates {
            if let Err(e) = template.validate() {
                library.reject(template.id, e.to_string());
                continue;
            }
            if !seen.insert(template.id) {
                library.reject(template.id, format!("duplicate template id {}", template.id));
                continue;
            }
            if !filter.accepts(&template) {
                continue;
            }
            if filter.limit.is_some_and(|limit| library.templates.len() >= limit) {
                break;
            }

            let template = Arc::new(template);
            library
                .by_timeframe
                .entry(template.timeframe.clone())
                .or_default()
                .push(template.clone());
            library.templates.push(template);
        }

        info!(
            loaded = library.templates.len(),
            rejected = library.rejected.len(),
            timeframes = library.by_timeframe.len(),
            "Pattern library built"
        );
        library
    }

    /// Fetch templates from `source` and build a snapshot from them.
    pub async fn load(source: &dyn PatternSource, filter: &TemplateFilter) -> Result<Self> {
        let batch = source.load_templates(filter).await?;
        Ok(Self::from_batch(batch, filter))
    }

    fn reject(&mut self, id: i64, reason: String) {
        warn!(template_id = id, reason = %reason, "Template rejected");
        self.rejected.push(RejectedTemplate { id, reason });
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn templates(&self) -> &[Arc<Template>] {
        &self.templates
    }

    pub fn rejected(&self) -> &[RejectedTemplate] {
        &self.rejected
    }

    /// Candidates for `timeframe`, or `None` when no template targets it.
    pub fn candidates(&self, timeframe: &str) -> Option<&CandidateSet> {
        self.by_timeframe.get(timeframe)
    }

    /// Widest grid among all loaded templates.
    pub fn max_width(&self) -> Option<usize> {
        self.templates.iter().map(|t| t.grid.cols).max()
    }
}

/// Pattern source over a fixed in-memory template list.
///
/// Applies the filter and orders by total P&L then accuracy, both
/// descending, like the SQL-backed source.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    templates: Vec<Template>,
}

impl InMemorySource {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl PatternSource for InMemorySource {
    async fn load_templates(&self, filter: &TemplateFilter) -> Result<TemplateBatch> {
        let mut selected: Vec<Template> = self
            .templates
            .iter()
            .filter(|t| filter.accepts(t))
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            b.total_pnl
                .total_cmp(&a.total_pnl)
                .then_with(|| b.prediction_accuracy.total_cmp(&a.prediction_accuracy))
        });
        if let Some(limit) = filter.limit {
            selected.truncate(limit);
        }
        if selected.is_empty() && !self.templates.is_empty() {
            warn!("No in-memory template passes the filter");
        }
        Ok(selected.into())
    }
}

/// Source that always fails. Used to exercise reload error paths.
#[derive(Debug, Clone)]
pub struct UnavailableSource {
    pub reason: String,
}

#[async_trait]
impl PatternSource for UnavailableSource {
    async fn load_templates(&self, _filter: &TemplateFilter) -> Result<TemplateBatch> {
        Err(Error::PatternSource(self.reason.clone()))
    }
}
