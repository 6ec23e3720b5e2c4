use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use common::{
    CreationMethod, Error, GridShape, PatternSource, RejectedTemplate, Result, Template, TemplateBatch,
    TemplateFilter,
};

/// Pattern source backed by the `prototype_patterns` table.
#[derive(Clone)]
pub struct SqlitePatternSource {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct PatternRow {
    id: i64,
    pic: String,
    grid_size: String,
    weights: String,
    timeframe: String,
    creation_method: String,
    prediction_accuracy: f64,
    has_forecasting_power: bool,
    predicate_accuracies: String,
    trades_taken: i64,
    successful_trades: i64,
    total_pnl: f64,
}

/// Weights are written as an M×N nested array; older rows may hold the
/// flattened row-major form.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredWeights {
    Matrix(Vec<Vec<f64>>),
    Flat(Vec<f64>),
}

impl PatternRow {
    fn into_template(self) -> Result<Template> {
        let id = self.id;
        let field = |name: &str, e: serde_json::Error| Error::malformed(id, format!("{name}: {e}"));

        let pic: Vec<usize> = serde_json::from_str(&self.pic).map_err(|e| field("pic", e))?;
        let [rows, cols]: [usize; 2] =
            serde_json::from_str(&self.grid_size).map_err(|e| field("grid_size", e))?;
        let weights = match serde_json::from_str::<StoredWeights>(&self.weights).map_err(|e| field("weights", e))? {
            StoredWeights::Matrix(rows) => rows.into_iter().flatten().collect(),
            StoredWeights::Flat(flat) => flat,
        };
        let predicate_accuracies: Vec<f64> = serde_json::from_str(&self.predicate_accuracies)
            .map_err(|e| field("predicate_accuracies", e))?;
        let count = |name: &str, v: i64| {
            u32::try_from(v).map_err(|_| Error::malformed(id, format!("{name} out of range: {v}")))
        };

        Ok(Template {
            id,
            pic,
            grid: GridShape::new(rows, cols),
            weights,
            timeframe: self.timeframe,
            creation_method: CreationMethod::from_tag(&self.creation_method),
            prediction_accuracy: self.prediction_accuracy,
            has_forecasting_power: self.has_forecasting_power,
            predicate_accuracies,
            trades_taken: count("trades_taken", self.trades_taken)?,
            successful_trades: count("successful_trades", self.successful_trades)?,
            total_pnl: self.total_pnl,
        })
    }
}

impl SqlitePatternSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a template under its own id.
    pub async fn save(&self, template: &Template) -> Result<()> {
        template.validate()?;
        let cols = template.grid.cols;
        let weight_rows: Vec<&[f64]> = template.weights.chunks(cols).collect();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO prototype_patterns
                (id, pic, grid_size, weights, timeframe, creation_method, prediction_accuracy,
                 has_forecasting_power, predicate_accuracies, trades_taken, successful_trades, total_pnl)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(template.id)
        .bind(serde_json::to_string(&template.pic)?)
        .bind(serde_json::to_string(&[template.grid.rows, cols])?)
        .bind(serde_json::to_string(&weight_rows)?)
        .bind(&template.timeframe)
        .bind(template.creation_method.to_string())
        .bind(template.prediction_accuracy)
        .bind(template.has_forecasting_power)
        .bind(serde_json::to_string(&template.predicate_accuracies)?)
        .bind(i64::from(template.trades_taken))
        .bind(i64::from(template.successful_trades))
        .bind(template.total_pnl)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PatternSource for SqlitePatternSource {
    /// Rows that fail to decode are returned as rejects rather than failing
    /// the whole load.
    async fn load_templates(&self, filter: &TemplateFilter) -> Result<TemplateBatch> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let rows: Vec<PatternRow> = sqlx::query_as(
            r#"
            SELECT id, pic, grid_size, weights, timeframe, creation_method, prediction_accuracy,
                   has_forecasting_power, predicate_accuracies, trades_taken, successful_trades, total_pnl
            FROM prototype_patterns
            WHERE (?1 IS NULL OR timeframe = ?1)
              AND prediction_accuracy > ?2
              AND total_pnl > ?3
              AND (?4 = 0 OR has_forecasting_power = 1)
            ORDER BY total_pnl DESC, prediction_accuracy DESC, id ASC
            LIMIT ?5
            "#,
        )
        .bind(filter.timeframe.as_deref())
        .bind(filter.min_accuracy)
        .bind(filter.min_pnl)
        .bind(filter.forecasting_power_required)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let fetched = rows.len();
        let mut batch = TemplateBatch::default();
        for row in rows {
            let id = row.id;
            match row.into_template() {
                Ok(t) => batch.templates.push(t),
                Err(e) => batch.rejected.push(RejectedTemplate {
                    id,
                    reason: e.to_string(),
                }),
            }
        }
        debug!(fetched, decoded = batch.templates.len(), "Loaded pattern rows");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    fn template(id: i64, timeframe: &str, accuracy: f64, pnl: f64, forecasting: bool) -> Template {
        Template {
            id,
            pic: vec![1, 0, 1],
            grid: GridShape::new(2, 3),
            weights: vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
            timeframe: timeframe.into(),
            creation_method: CreationMethod::Genetic,
            prediction_accuracy: accuracy,
            has_forecasting_power: forecasting,
            predicate_accuracies: vec![70.0; 10],
            trades_taken: 12,
            successful_trades: 9,
            total_pnl: pnl,
        }
    }

    #[tokio::test]
    async fn saved_template_loads_back() {
        let source = SqlitePatternSource::new(test_pool().await);
        let t = template(1, "5", 80.0, 3.5, true);
        source.save(&t).await.unwrap();

        let loaded = source.load_templates(&TemplateFilter::default()).await.unwrap();
        assert_eq!(loaded.templates, vec![t]);
        assert!(loaded.rejected.is_empty());
    }

    #[tokio::test]
    async fn filter_and_ordering_apply() {
        let source = SqlitePatternSource::new(test_pool().await);
        for t in [
            template(1, "5", 80.0, 1.0, true),
            template(2, "5", 90.0, 5.0, true),
            template(3, "5", 70.0, 5.0, true),
            template(4, "15", 95.0, 9.0, true),
            template(5, "5", 50.0, 9.0, true),
            template(6, "5", 85.0, -1.0, true),
            template(7, "5", 85.0, 2.0, false),
            template(8, "5", 85.0, 0.0, true),
            template(9, "5", 60.0, 3.0, true),
        ] {
            source.save(&t).await.unwrap();
        }

        let filter = TemplateFilter {
            timeframe: Some("5".into()),
            ..TemplateFilter::default()
        };
        let ids: Vec<i64> = source
            .load_templates(&filter)
            .await
            .unwrap()
            .templates
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);

        let limited = TemplateFilter {
            limit: Some(2),
            forecasting_power_required: false,
            ..TemplateFilter::default()
        };
        let ids: Vec<i64> = source
            .load_templates(&limited)
            .await
            .unwrap()
            .templates
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![4, 2]);
    }

    #[tokio::test]
    async fn flat_weights_and_bad_rows() {
        let pool = test_pool().await;
        let insert = |id: i64, pic: &'static str, weights: &'static str| {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO prototype_patterns
                        (id, pic, grid_size, weights, timeframe, creation_method, prediction_accuracy,
                         has_forecasting_power, predicate_accuracies, total_pnl)
                    VALUES (?1, ?2, '[2, 2]', ?3, '5', 'historical', 75.0, 1,
                            '[70,70,70,70,70,10,10,10,10,10]', ?4)
                    "#,
                )
                .bind(id)
                .bind(pic)
                .bind(weights)
                .bind(id as f64)
                .execute(&pool)
                .await
                .unwrap();
            }
        };
        insert(1, "[0, 1]", "[1.0, 0.0, 0.0, 1.0]").await;
        insert(2, "not json", "[[1.0, 0.0], [0.0, 1.0]]").await;

        let source = SqlitePatternSource::new(pool.clone());
        let loaded = source.load_templates(&TemplateFilter::default()).await.unwrap();
        assert_eq!(loaded.templates.len(), 1);
        assert_eq!(loaded.templates[0].id, 1);
        assert_eq!(loaded.templates[0].weights, vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(loaded.templates[0].creation_method, CreationMethod::Historical);
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].id, 2);
        assert!(loaded.rejected[0].reason.contains("pic"));
    }

    #[tokio::test]
    async fn undecodable_rows_reach_the_library() {
        let pool = test_pool().await;
        sqlx::query(
            r#"
            INSERT INTO prototype_patterns
                (id, pic, grid_size, weights, timeframe, creation_method, prediction_accuracy,
                 has_forecasting_power, predicate_accuracies, total_pnl)
            VALUES (5, '[0, 1]', '[2, 2]', '{"bad": true}', '5', 'genetic', 75.0, 1,
                    '[70,70,70,70,70,10,10,10,10,10]', 2.0)
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let source = SqlitePatternSource::new(pool);
        let library = grid::PatternLibrary::load(&source, &TemplateFilter::default())
            .await
            .unwrap();
        assert!(library.is_empty());
        let ids: Vec<i64> = library.rejected().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5]);
    }
}
