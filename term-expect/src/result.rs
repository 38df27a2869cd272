//! Validation result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::validators::Severity;

/// Outcome of one validator in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub run_id: String,
    /// Validator type name, e.g. `ColumnNotNull`.
    pub validator: String,
    pub table: String,
    #[serde(default)]
    pub engine_name: Option<String>,
    #[serde(default)]
    pub db_schema: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    /// Metric key for metric validators; `None` for custom ones.
    #[serde(default)]
    pub metric: Option<String>,
    pub success: bool,
    /// Observed metric value.
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub filter_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl ValidationResult {
    /// Returns true if the run could not evaluate this validator.
    pub fn is_error(&self) -> bool {
        self.details.contains_key("error")
    }

    /// Returns true for a failed check at `Severity::Fail`.
    pub fn is_blocking(&self) -> bool {
        !self.success && self.severity == Severity::Fail
    }
}

/// Identity and timing of one suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    #[serde(default)]
    pub suite_name: Option<String>,
    #[serde(default)]
    pub sla_name: Option<String>,
    #[serde(default)]
    pub engine_name: Option<String>,
    #[serde(default)]
    pub db_schema: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunMetadata {
    /// Starts a run with a fresh 128-bit id (32 hex digits).
    pub fn start() -> Self {
        Self {
            run_id: new_run_id(),
            suite_name: None,
            sla_name: None,
            engine_name: None,
            db_schema: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_suite(mut self, suite_name: impl Into<String>) -> Self {
        self.suite_name = Some(suite_name.into());
        self
    }

    pub fn with_sla(mut self, sla_name: impl Into<String>) -> Self {
        self.sla_name = Some(sla_name.into());
        self
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration, once finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// A fresh run identifier.
pub fn new_run_id() -> String {
    hex::encode(rand::random::<u128>().to_be_bytes())
}

/// Counts over a run's results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Results that failed because of an execution or compile error.
    pub errored: usize,
    pub blocking: usize,
}

impl RunSummary {
    pub fn from_results(results: &[ValidationResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            summary.total += 1;
            if result.success {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
            if result.is_error() {
                summary.errored += 1;
            }
            if result.is_blocking() {
                summary.blocking += 1;
            }
            summary
        })
    }

    /// Returns the success rate as a percentage (0.0 to 100.0).
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub summary: RunSummary,
    pub results: Vec<ValidationResult>,
}

impl RunReport {
    pub fn new(metadata: RunMetadata, results: Vec<ValidationResult>) -> Self {
        Self {
            summary: RunSummary::from_results(&results),
            metadata,
            results,
        }
    }

    /// Returns true if no result is blocking.
    pub fn is_success(&self) -> bool {
        self.summary.blocking == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
