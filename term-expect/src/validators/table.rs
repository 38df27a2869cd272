//! Table-level validators.

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{
    observe_count, CustomQuery, CustomValidator, Diagnostics, MetricValidator, ValidatorCommon,
};
use crate::engine::{MetricValue, QueryResult};
use crate::error::{ExpectError, Result};
use crate::metrics::MetricRequest;
use crate::security::SqlSecurity;

/// Passes when the (filtered) row count lies within `[min_rows, max_rows]`.
#[derive(Debug, Clone)]
pub struct RowCountValidator {
    min_rows: Option<i64>,
    max_rows: Option<i64>,
    common: ValidatorCommon,
}

impl RowCountValidator {
    pub fn new(min_rows: Option<i64>, max_rows: Option<i64>) -> Result<Self> {
        match (min_rows, max_rows) {
            (None, None) => Err(ExpectError::config(
                "at least one of min_rows / max_rows must be provided",
            )),
            (Some(min), Some(max)) if min > max => Err(ExpectError::config(format!(
                "min_rows ({min}) cannot be greater than max_rows ({max})"
            ))),
            _ => Ok(Self {
                min_rows,
                max_rows,
                common: ValidatorCommon::default(),
            }),
        }
    }
}

validator_base!(RowCountValidator, "RowCountValidator");

#[async_trait]
impl MetricValidator for RowCountValidator {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self.common.request("*", "row_cnt"))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("min_rows", self.min_rows);
        diagnostics.set("max_rows", self.max_rows);
        let Some(rows) = observe_count(value, diagnostics) else {
            return Ok(false);
        };
        Ok(self.min_rows.map_or(true, |min| rows >= min)
            && self.max_rows.map_or(true, |max| rows <= max))
    }
}

fn validate_key_columns(columns: Vec<String>) -> Result<Vec<String>> {
    if columns.is_empty() {
        return Err(ExpectError::config("key_columns must be a non-empty list"));
    }
    for column in &columns {
        SqlSecurity::validate_identifier(column)?;
        if column.contains(',') {
            return Err(ExpectError::config(format!(
                "key column '{column}' cannot contain a comma"
            )));
        }
    }
    Ok(columns)
}

/// Passes when no two rows share the same `key_columns` values. Batched.
#[derive(Debug, Clone)]
pub struct DuplicateRowValidator {
    key_columns: Vec<String>,
    common: ValidatorCommon,
}

impl DuplicateRowValidator {
    pub fn new(key_columns: Vec<String>) -> Result<Self> {
        Ok(Self {
            key_columns: validate_key_columns(key_columns)?,
            common: ValidatorCommon::default(),
        })
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }
}

validator_base!(DuplicateRowValidator, "DuplicateRowValidator");

#[async_trait]
impl MetricValidator for DuplicateRowValidator {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self
            .common
            .request(&self.key_columns.join(","), "duplicate_row_cnt"))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("key_columns", &self.key_columns);
        Ok(matches!(observe_count(value, diagnostics), Some(0)))
    }
}

/// Passes when `key_columns` identify every row uniquely. Runs as its own query.
#[derive(Debug, Clone)]
pub struct PrimaryKeyUniquenessValidator {
    key_columns: Vec<String>,
    common: ValidatorCommon,
}

impl PrimaryKeyUniquenessValidator {
    pub fn new(key_columns: Vec<String>) -> Result<Self> {
        Ok(Self {
            key_columns: validate_key_columns(key_columns)?,
            common: ValidatorCommon::default(),
        })
    }
}

validator_base!(PrimaryKeyUniquenessValidator, "PrimaryKeyUniquenessValidator");

#[async_trait]
impl CustomValidator for PrimaryKeyUniquenessValidator {
    fn custom_sql(&self, _table: &str) -> Result<CustomQuery> {
        Ok(CustomQuery::Metrics(vec![MetricRequest::new(
            self.key_columns.join(","),
            "duplicate_row_cnt",
            "dup_cnt",
        )
        .with_filter(self.common.where_condition.clone())]))
    }

    async fn interpret(&self, rows: &QueryResult, diagnostics: &mut Diagnostics) -> Result<bool> {
        let duplicates = rows.value(0, "dup_cnt")?;
        diagnostics.set("key_columns", &self.key_columns);
        diagnostics.set("dup_cnt", duplicates.to_json());
        Ok(duplicates.as_i64() == Some(0))
    }
}

/// Parses durations such as `"90s"`, `"15m"`, `"1h"`, `"2d"`, `"1w"` or
/// compounds like `"1h30m"`. A bare number is taken as seconds.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let invalid = || ExpectError::config(format!("invalid duration '{text}'"));
    if text.is_empty() {
        return Err(invalid());
    }
    if let Ok(seconds) = text.parse::<i64>() {
        return Duration::try_seconds(seconds).ok_or_else(invalid);
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let amount: i64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let part = match ch.to_ascii_lowercase() {
            's' => Duration::try_seconds(amount),
            'm' => Duration::try_minutes(amount),
            'h' => Duration::try_hours(amount),
            'd' => Duration::try_days(amount),
            'w' => Duration::try_weeks(amount),
            _ => None,
        }
        .ok_or_else(invalid)?;
        total = total.checked_add(&part).ok_or_else(invalid)?;
    }
    if !digits.is_empty() {
        return Err(invalid());
    }
    Ok(total)
}

/// Passes when the newest `timestamp_column` value is no older than `threshold`.
#[derive(Debug, Clone)]
pub struct TableFreshnessValidator {
    timestamp_column: String,
    threshold: Duration,
    common: ValidatorCommon,
}

impl TableFreshnessValidator {
    pub fn new(timestamp_column: impl Into<String>, threshold: Duration) -> Result<Self> {
        if threshold < Duration::zero() {
            return Err(ExpectError::config("freshness threshold cannot be negative"));
        }
        Ok(Self {
            timestamp_column: timestamp_column.into(),
            threshold,
            common: ValidatorCommon::default(),
        })
    }

    /// Like [`TableFreshnessValidator::new`] with a textual threshold such as `"1h"`.
    pub fn parse(timestamp_column: impl Into<String>, threshold: &str) -> Result<Self> {
        Self::new(timestamp_column, parse_duration(threshold)?)
    }
}

validator_base!(TableFreshnessValidator, "TableFreshnessValidator", timestamp_column);

#[async_trait]
impl MetricValidator for TableFreshnessValidator {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self.common.request(&self.timestamp_column, "max"))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("threshold_seconds", self.threshold.num_seconds());
        let Some(newest) = value.as_timestamp() else {
            diagnostics.set("max_timestamp", serde_json::Value::Null);
            diagnostics.set("reason", "no timestamp observation (NULL or non-temporal)");
            return Ok(false);
        };
        diagnostics.set("max_timestamp", newest.to_rfc3339());
        Ok(newest >= Utc::now() - self.threshold)
    }
}
