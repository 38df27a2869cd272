//! Metric drift detection over recorded history.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{observe_f64, Diagnostics, MetricValidator, ValidatorCommon};
use crate::engine::MetricValue;
use crate::error::{ExpectError, Result};
use crate::metrics::{MetricRegistry, MetricRequest};
use crate::stats::MetricStat;

/// Identifies one metric series: a metric on a table, optionally per column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    pub table: String,
    pub column: Option<String>,
    pub metric: String,
}

impl MetricKey {
    pub fn new(table: &str, column: Option<&str>, metric: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.filter(|c| *c != "*").map(str::to_string),
            metric: metric.to_string(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}.{}:{}", self.table, column, self.metric),
            None => write!(f, "{}:{}", self.table, self.metric),
        }
    }
}

/// Storage for previously observed metric values.
#[async_trait]
pub trait MetricHistory: Debug + Send + Sync {
    /// Appends observations.
    async fn record(&self, stats: &[MetricStat]) -> Result<()>;

    /// Up to `limit` most recent numeric values for `key`, oldest first.
    async fn recent(&self, key: &MetricKey, limit: usize) -> Result<Vec<f64>>;
}

/// Process-local [`MetricHistory`].
#[derive(Debug, Default)]
pub struct InMemoryMetricHistory {
    series: RwLock<HashMap<MetricKey, Vec<f64>>>,
}

impl InMemoryMetricHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single numeric observation.
    pub async fn push(&self, key: MetricKey, value: f64) {
        self.series.write().await.entry(key).or_default().push(value);
    }

    pub async fn len(&self, key: &MetricKey) -> usize {
        self.series.read().await.get(key).map_or(0, Vec::len)
    }
}

#[async_trait]
impl MetricHistory for InMemoryMetricHistory {
    async fn record(&self, stats: &[MetricStat]) -> Result<()> {
        let mut series = self.series.write().await;
        for stat in stats {
            // Non-numeric values (text minimums, timestamps) have no drift.
            if let Some(value) = stat.value.as_f64() {
                series.entry(stat.key()).or_default().push(value);
            }
        }
        Ok(())
    }

    async fn recent(&self, key: &MetricKey, limit: usize) -> Result<Vec<f64>> {
        let series = self.series.read().await;
        Ok(series
            .get(key)
            .map(|values| values[values.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default())
    }
}

/// Flags a metric whose current value is more than `z_thresh` standard
/// deviations away from the mean of its last `window` recorded values.
///
/// Passes with `skipped` set while fewer than [`MetricDriftValidator::MIN_HISTORY`]
/// points are recorded.
#[derive(Debug, Clone)]
pub struct MetricDriftValidator {
    column: String,
    metric: String,
    window: usize,
    z_thresh: f64,
    history: Arc<dyn MetricHistory>,
    common: ValidatorCommon,
}

impl MetricDriftValidator {
    pub const MIN_HISTORY: usize = 5;
    pub const DEFAULT_WINDOW: usize = 20;
    pub const DEFAULT_Z_THRESH: f64 = 3.0;

    /// `column` defaults to `*` for table-level metrics. The metric must be
    /// registered in the global registry.
    pub fn new(
        metric: impl Into<String>,
        column: Option<String>,
        history: Arc<dyn MetricHistory>,
    ) -> Result<Self> {
        Self::in_registry(&MetricRegistry::global(), metric, column, history)
    }

    pub fn in_registry(
        registry: &MetricRegistry,
        metric: impl Into<String>,
        column: Option<String>,
        history: Arc<dyn MetricHistory>,
    ) -> Result<Self> {
        let metric = metric.into();
        registry.get(&metric)?;
        Ok(Self {
            column: column.unwrap_or_else(|| "*".to_string()),
            metric,
            window: Self::DEFAULT_WINDOW,
            z_thresh: Self::DEFAULT_Z_THRESH,
            history,
            common: ValidatorCommon::default(),
        })
    }

    pub fn with_window(mut self, window: usize) -> Result<Self> {
        if window < Self::MIN_HISTORY {
            return Err(ExpectError::config(format!(
                "window must be at least {}",
                Self::MIN_HISTORY
            )));
        }
        self.window = window;
        Ok(self)
    }

    pub fn with_z_thresh(mut self, z_thresh: f64) -> Result<Self> {
        if !z_thresh.is_finite() || z_thresh <= 0.0 {
            return Err(ExpectError::config("z_thresh must be a positive number"));
        }
        self.z_thresh = z_thresh;
        Ok(self)
    }

    fn key(&self) -> Result<MetricKey> {
        let table = self.common.table.as_deref().ok_or_else(|| {
            ExpectError::Internal("drift validator has no target table".to_string())
        })?;
        Ok(MetricKey::new(table, Some(&self.column), &self.metric))
    }
}

validator_base!(MetricDriftValidator, "MetricDriftValidator", column);

/// Mean and sample standard deviation.
fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

#[async_trait]
impl MetricValidator for MetricDriftValidator {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self.common.request(&self.column, &self.metric))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        let Some(current) = observe_f64(value, diagnostics) else {
            return Ok(false);
        };
        let key = self.key()?;
        let history = self.history.recent(&key, self.window).await?;
        debug!(series = %key, points = history.len(), "loaded metric history");
        if history.len() < Self::MIN_HISTORY {
            diagnostics.set("skipped", "insufficient history");
            return Ok(true);
        }

        let (mean, std) = mean_std(&history);
        let z = if std == 0.0 {
            0.0
        } else {
            ((current - mean) / std).abs()
        };
        diagnostics.set("mean", mean);
        diagnostics.set("std", std);
        diagnostics.set("z", z);
        Ok(z <= self.z_thresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::ValidatorBase;

    async fn seeded(values: &[f64]) -> Arc<InMemoryMetricHistory> {
        let history = Arc::new(InMemoryMetricHistory::new());
        for v in values {
            history
                .push(MetricKey::new("orders", None, "row_cnt"), *v)
                .await;
        }
        history
    }

    async fn run(validator: &MetricDriftValidator, value: f64) -> (bool, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let passed = validator
            .interpret(&MetricValue::Float(value), &mut diagnostics)
            .await
            .unwrap();
        (passed, diagnostics)
    }

    fn drift(history: Arc<InMemoryMetricHistory>) -> MetricDriftValidator {
        let mut validator = MetricDriftValidator::new("row_cnt", None, history).unwrap();
        validator.bind_table("orders");
        validator
    }

    #[tokio::test]
    async fn test_skips_with_short_history() {
        let validator = drift(seeded(&[10.0, 11.0, 12.0, 13.0]).await);
        let (passed, diagnostics) = run(&validator, 1000.0).await;
        assert!(passed);
        assert_eq!(
            diagnostics.get("skipped"),
            Some(&serde_json::json!("insufficient history"))
        );
    }

    #[tokio::test]
    async fn test_flags_outlier() {
        let validator = drift(seeded(&[10.0, 11.0, 9.0, 10.0, 10.0, 11.0, 9.0]).await);
        assert!(run(&validator, 10.5).await.0);

        let (passed, diagnostics) = run(&validator, 30.0).await;
        assert!(!passed);
        assert!(diagnostics.get("z").unwrap().as_f64().unwrap() > 3.0);
    }

    #[tokio::test]
    async fn test_constant_history_has_zero_z() {
        let validator = drift(seeded(&[5.0; 6]).await);
        let (passed, diagnostics) = run(&validator, 50.0).await;
        assert!(passed);
        assert_eq!(diagnostics.get("z"), Some(&serde_json::json!(0.0)));
    }

    #[tokio::test]
    async fn test_window_limits_history() {
        let history = seeded(&[1000.0, 1000.0, 10.0, 11.0, 9.0, 10.0, 10.0]).await;
        let validator = drift(history).with_window(5).unwrap();
        assert!(run(&validator, 10.0).await.0);
        assert!(MetricDriftValidator::new("row_cnt", None, seeded(&[]).await)
            .unwrap()
            .with_window(2)
            .is_err());
    }

    #[tokio::test]
    async fn test_requires_known_metric_and_table() {
        let history = seeded(&[]).await;
        assert!(matches!(
            MetricDriftValidator::new("nope", None, history.clone()).unwrap_err(),
            ExpectError::UnknownMetric { .. }
        ));

        let unbound = MetricDriftValidator::new("row_cnt", None, history).unwrap();
        let mut diagnostics = Diagnostics::new();
        assert!(unbound
            .interpret(&MetricValue::Int(1), &mut diagnostics)
            .await
            .is_err());
    }

    #[test]
    fn test_metric_key_star_is_table_level() {
        assert_eq!(MetricKey::new("t", Some("*"), "row_cnt").column, None);
        assert_eq!(MetricKey::new("t", Some("a"), "min").to_string(), "t.a:min");
    }
}
