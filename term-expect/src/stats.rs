//! Table statistics collection.
//!
//! [`TableStatsCollector`] computes a fixed set of metrics for a table and
//! every one of its columns with a single compiled query. The resulting
//! [`MetricStat`] records feed a [`MetricHistory`], which is what
//! [`crate::validators::MetricDriftValidator`] reads.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::engine::{Engine, MetricValue};
use crate::error::{ErrorContext, ExpectError, Result};
use crate::metrics::{BatchCompiler, MetricRequest};
use crate::validators::{MetricHistory, MetricKey};

/// One metric value computed for a table or column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStat {
    pub run_id: String,
    pub table: String,
    /// `None` for table-level metrics.
    pub column: Option<String>,
    pub metric: String,
    pub value: MetricValue,
    pub engine_name: Option<String>,
    pub db_schema: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl MetricStat {
    pub fn key(&self) -> MetricKey {
        MetricKey::new(&self.table, self.column.as_deref(), &self.metric)
    }
}

/// Schema part of a qualified table name (`sales.orders` gives `sales`).
pub(crate) fn schema_of(table: &str) -> Option<String> {
    table.rsplit_once('.').map(|(schema, _)| schema.to_string())
}

/// Collects default statistics for whole tables.
#[derive(Debug, Clone)]
pub struct TableStatsCollector {
    engines: HashMap<String, Arc<dyn Engine>>,
    compiler: BatchCompiler,
    table_metrics: Vec<String>,
    column_metrics: Vec<String>,
}

impl TableStatsCollector {
    pub const DEFAULT_TABLE_METRICS: [&'static str; 1] = ["row_cnt"];
    pub const DEFAULT_COLUMN_METRICS: [&'static str; 3] = ["null_pct", "min", "max"];

    pub fn new(engines: HashMap<String, Arc<dyn Engine>>) -> Self {
        Self {
            engines,
            compiler: BatchCompiler::default(),
            table_metrics: Self::DEFAULT_TABLE_METRICS.map(String::from).to_vec(),
            column_metrics: Self::DEFAULT_COLUMN_METRICS.map(String::from).to_vec(),
        }
    }

    pub fn with_compiler(mut self, compiler: BatchCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Replaces the metrics computed once per table.
    pub fn with_table_metrics(mut self, metrics: Vec<String>) -> Self {
        self.table_metrics = metrics;
        self
    }

    /// Replaces the metrics computed for every column.
    pub fn with_column_metrics(mut self, metrics: Vec<String>) -> Self {
        self.column_metrics = metrics;
        self
    }

    /// Computes all configured metrics for `table` in one query.
    #[instrument(skip_all, fields(engine = %engine_key, table = %table, run_id = %run_id))]
    pub async fn collect(
        &self,
        engine_key: &str,
        table: &str,
        run_id: &str,
    ) -> Result<Vec<MetricStat>> {
        let engine = self.engines.get(engine_key).ok_or_else(|| {
            ExpectError::ConfigResolution(format!("unknown engine '{engine_key}'"))
        })?;
        let columns = engine.list_columns(table).await?;

        let mut targets: Vec<(Option<String>, &str)> = self
            .table_metrics
            .iter()
            .map(|metric| (None, metric.as_str()))
            .collect();
        for column in &columns {
            for metric in &self.column_metrics {
                targets.push((Some(column.clone()), metric.as_str()));
            }
        }

        let requests: Vec<MetricRequest> = targets
            .iter()
            .enumerate()
            .map(|(i, (column, metric))| {
                MetricRequest::new(column.as_deref().unwrap_or("*"), *metric, format!("m{i}"))
            })
            .collect();
        let sql = self
            .compiler
            .compile_sql(table, &requests, engine.dialect())?;
        debug!(metrics = requests.len(), "running statistics query");
        let result = engine
            .run_sql(&sql)
            .await
            .with_context(|| format!("statistics query on '{table}'"))?;

        let collected_at = Utc::now();
        let db_schema = schema_of(table);
        let stats = targets
            .into_iter()
            .zip(&requests)
            .map(|((column, metric), request)| {
                Ok(MetricStat {
                    run_id: run_id.to_string(),
                    table: table.to_string(),
                    column,
                    metric: metric.to_string(),
                    value: result.value(0, request.alias())?,
                    engine_name: Some(engine_key.to_string()),
                    db_schema: db_schema.clone(),
                    collected_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!(stats = stats.len(), "collected table statistics");
        Ok(stats)
    }

    /// Collects statistics and appends them to `history`.
    pub async fn collect_into(
        &self,
        history: &dyn MetricHistory,
        engine_key: &str,
        table: &str,
        run_id: &str,
    ) -> Result<Vec<MetricStat>> {
        let stats = self.collect(engine_key, table, run_id).await?;
        history.record(&stats).await?;
        Ok(stats)
    }
}
