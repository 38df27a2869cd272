//! Column-level validators.
//!
//! Most of these are metric validators. The "every row satisfies X" checks
//! count the rows violating X with a filtered `row_cnt` and pass when that
//! count is zero, so they batch with everything else on the same table.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    observe_count, observe_f64, CustomQuery, CustomValidator, Diagnostics, MetricValidator,
    ValidatorCommon,
};
use crate::engine::{MetricValue, QueryResult};
use crate::error::{ExpectError, Result};
use crate::metrics::{MetricRegistry, MetricRequest};
use crate::security::{InputValidator, SqlSecurity};

/// Renders a bound or set member as a SQL literal.
pub(crate) fn sql_literal(value: &MetricValue) -> Result<String> {
    match value {
        MetricValue::Null => Err(ExpectError::config("NULL is not a valid comparison value")),
        MetricValue::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        MetricValue::Int(v) => Ok(v.to_string()),
        MetricValue::Float(v) if v.is_finite() => Ok(format!("{v:?}")),
        MetricValue::Float(v) => Err(ExpectError::config(format!(
            "{v} is not a valid comparison value"
        ))),
        MetricValue::Timestamp(ts) => SqlSecurity::escape_literal(&ts.to_rfc3339()),
        MetricValue::Date(d) => SqlSecurity::escape_literal(&d.to_string()),
        MetricValue::Text(s) => SqlSecurity::escape_literal(s),
    }
}

/// Interprets a violation count: zero passes.
fn no_violations(value: &MetricValue, diagnostics: &mut Diagnostics) -> bool {
    matches!(observe_count(value, diagnostics), Some(0))
}

/// Passes when the column has no NULLs.
#[derive(Debug, Clone)]
pub struct ColumnNotNull {
    column: String,
    common: ValidatorCommon,
}

impl ColumnNotNull {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            common: ValidatorCommon::default(),
        }
    }
}

validator_base!(ColumnNotNull, "ColumnNotNull", column);

#[async_trait]
impl MetricValidator for ColumnNotNull {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self.common.request(&self.column, "null_pct"))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        Ok(observe_f64(value, diagnostics).is_some_and(|pct| pct == 0.0))
    }
}

/// Passes when the NULL fraction is at most `max_null_pct` (0..=1).
#[derive(Debug, Clone)]
pub struct ColumnNullPct {
    column: String,
    max_null_pct: f64,
    common: ValidatorCommon,
}

impl ColumnNullPct {
    pub fn new(column: impl Into<String>, max_null_pct: f64) -> Result<Self> {
        InputValidator::validate_percentage(max_null_pct, "max_null_pct")?;
        Ok(Self {
            column: column.into(),
            max_null_pct,
            common: ValidatorCommon::default(),
        })
    }
}

validator_base!(ColumnNullPct, "ColumnNullPct", column);

#[async_trait]
impl MetricValidator for ColumnNullPct {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self.common.request(&self.column, "null_pct"))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("max_null_pct", self.max_null_pct);
        Ok(observe_f64(value, diagnostics).is_some_and(|pct| pct <= self.max_null_pct))
    }
}

/// Comparison applied between an observed and an expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Comparator {
    #[default]
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::GtEq => ">=",
            Comparator::LtEq => "<=",
            Comparator::Gt => ">",
            Comparator::Lt => "<",
        }
    }

    /// Applies `observed <op> expected`.
    pub fn holds(&self, observed: Ordering) -> bool {
        match self {
            Comparator::Eq => observed == Ordering::Equal,
            Comparator::GtEq => observed != Ordering::Less,
            Comparator::LtEq => observed != Ordering::Greater,
            Comparator::Gt => observed == Ordering::Greater,
            Comparator::Lt => observed == Ordering::Less,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparator {
    type Err = ExpectError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "==" | "=" => Ok(Comparator::Eq),
            ">=" => Ok(Comparator::GtEq),
            "<=" => Ok(Comparator::LtEq),
            ">" => Ok(Comparator::Gt),
            "<" => Ok(Comparator::Lt),
            other => Err(ExpectError::config(format!(
                "comparator must be one of ==, >=, <=, >, < (got '{other}')"
            ))),
        }
    }
}

/// Compares `COUNT(DISTINCT column)` with `expected`.
#[derive(Debug, Clone)]
pub struct ColumnDistinctCount {
    column: String,
    expected: i64,
    op: Comparator,
    common: ValidatorCommon,
}

impl ColumnDistinctCount {
    pub fn new(column: impl Into<String>, expected: i64) -> Self {
        Self {
            column: column.into(),
            expected,
            op: Comparator::Eq,
            common: ValidatorCommon::default(),
        }
    }

    pub fn with_comparator(mut self, op: Comparator) -> Self {
        self.op = op;
        self
    }
}

validator_base!(ColumnDistinctCount, "ColumnDistinctCount", column);

#[async_trait]
impl MetricValidator for ColumnDistinctCount {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self.common.request(&self.column, "distinct_cnt"))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("expected", self.expected);
        diagnostics.set("op", self.op.as_str());
        Ok(observe_count(value, diagnostics)
            .is_some_and(|observed| self.op.holds(observed.cmp(&self.expected))))
    }
}

fn compare_bound(
    value: &MetricValue,
    bound: &MetricValue,
    diagnostics: &mut Diagnostics,
) -> Option<Ordering> {
    diagnostics.set("observed", value.to_json());
    let ordering = value.compare(bound);
    if ordering.is_none() {
        diagnostics.set(
            "reason",
            if value.is_null() {
                "no observation (NULL)"
            } else {
                "observed value is not comparable to the bound"
            },
        );
    }
    ordering
}

/// Passes when `MIN(column)` is at least `min_value` (strictly greater when `strict`).
#[derive(Debug, Clone)]
pub struct ColumnMin {
    column: String,
    min_value: MetricValue,
    strict: bool,
    common: ValidatorCommon,
}

impl ColumnMin {
    pub fn new(column: impl Into<String>, min_value: impl Into<MetricValue>) -> Self {
        Self {
            column: column.into(),
            min_value: min_value.into(),
            strict: false,
            common: ValidatorCommon::default(),
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

validator_base!(ColumnMin, "ColumnMin", column);

#[async_trait]
impl MetricValidator for ColumnMin {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self.common.request(&self.column, "min"))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("min_value", self.min_value.to_json());
        let op = if self.strict { Comparator::Gt } else { Comparator::GtEq };
        Ok(compare_bound(value, &self.min_value, diagnostics).is_some_and(|o| op.holds(o)))
    }
}

/// Passes when `MAX(column)` is at most `max_value` (strictly less when `strict`).
#[derive(Debug, Clone)]
pub struct ColumnMax {
    column: String,
    max_value: MetricValue,
    strict: bool,
    common: ValidatorCommon,
}

impl ColumnMax {
    pub fn new(column: impl Into<String>, max_value: impl Into<MetricValue>) -> Self {
        Self {
            column: column.into(),
            max_value: max_value.into(),
            strict: false,
            common: ValidatorCommon::default(),
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

validator_base!(ColumnMax, "ColumnMax", column);

#[async_trait]
impl MetricValidator for ColumnMax {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self.common.request(&self.column, "max"))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("max_value", self.max_value.to_json());
        let op = if self.strict { Comparator::Lt } else { Comparator::LtEq };
        Ok(compare_bound(value, &self.max_value, diagnostics).is_some_and(|o| op.holds(o)))
    }
}

/// Passes when the `q` percentile lies within `tolerance` of `expected`.
#[derive(Debug, Clone)]
pub struct ColumnPercentile {
    column: String,
    q: f64,
    metric: String,
    expected: f64,
    tolerance: f64,
    common: ValidatorCommon,
}

impl ColumnPercentile {
    pub const DEFAULT_TOLERANCE: f64 = 1e-6;

    /// Creates the validator, registering the percentile metric globally if needed.
    pub fn new(column: impl Into<String>, q: f64, expected: f64) -> Result<Self> {
        Self::in_registry(&MetricRegistry::global(), column, q, expected)
    }

    /// Like [`ColumnPercentile::new`], registering the metric in `registry`.
    pub fn in_registry(
        registry: &MetricRegistry,
        column: impl Into<String>,
        q: f64,
        expected: f64,
    ) -> Result<Self> {
        let (metric, _) = registry.register_percentile(q)?;
        Ok(Self {
            column: column.into(),
            q,
            metric,
            expected,
            tolerance: Self::DEFAULT_TOLERANCE,
            common: ValidatorCommon::default(),
        })
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Result<Self> {
        InputValidator::validate_threshold(tolerance, "tolerance")?;
        self.tolerance = tolerance;
        Ok(self)
    }

    pub fn metric_key(&self) -> &str {
        &self.metric
    }
}

validator_base!(ColumnPercentile, "ColumnPercentile", column);

#[async_trait]
impl MetricValidator for ColumnPercentile {
    fn metric_request(&self) -> Result<MetricRequest> {
        Ok(self.common.request(&self.column, &self.metric))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("q", self.q);
        diagnostics.set("expected", self.expected);
        diagnostics.set("tolerance", self.tolerance);
        Ok(observe_f64(value, diagnostics)
            .is_some_and(|observed| (observed - self.expected).abs() <= self.tolerance))
    }
}

/// Passes when every value is one of `allowed_values`. NULLs violate unless `allow_null`.
#[derive(Debug, Clone)]
pub struct ColumnValueInSet {
    column: String,
    allowed_values: Vec<MetricValue>,
    allow_null: bool,
    common: ValidatorCommon,
}

impl ColumnValueInSet {
    pub fn new(column: impl Into<String>, allowed_values: Vec<MetricValue>) -> Result<Self> {
        if allowed_values.is_empty() {
            return Err(ExpectError::config("allowed_values must not be empty"));
        }
        // Fail on unrenderable members now rather than at run time.
        for value in &allowed_values {
            sql_literal(value)?;
        }
        Ok(Self {
            column: column.into(),
            allowed_values,
            allow_null: false,
            common: ValidatorCommon::default(),
        })
    }

    pub fn allow_null(mut self, allow_null: bool) -> Self {
        self.allow_null = allow_null;
        self
    }
}

validator_base!(ColumnValueInSet, "ColumnValueInSet", column);

#[async_trait]
impl MetricValidator for ColumnValueInSet {
    fn metric_request(&self) -> Result<MetricRequest> {
        let column = SqlSecurity::escape_identifier(&self.column)?;
        let values = self
            .allowed_values
            .iter()
            .map(sql_literal)
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let mut condition = format!("{column} NOT IN ({values})");
        if !self.allow_null {
            condition.push_str(&format!(" OR {column} IS NULL"));
        }
        Ok(self
            .common
            .conditional_request(&self.column, "row_cnt", &condition))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("allow_null", self.allow_null);
        Ok(no_violations(value, diagnostics))
    }
}

/// Passes when every non-NULL value matches `pattern`.
#[derive(Debug, Clone)]
pub struct ColumnMatchesRegex {
    column: String,
    pattern: String,
    common: ValidatorCommon,
}

impl ColumnMatchesRegex {
    pub fn new(column: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        SqlSecurity::validate_regex_pattern(&pattern)?;
        Ok(Self {
            column: column.into(),
            pattern,
            common: ValidatorCommon::default(),
        })
    }
}

validator_base!(ColumnMatchesRegex, "ColumnMatchesRegex", column);

#[async_trait]
impl MetricValidator for ColumnMatchesRegex {
    fn metric_request(&self) -> Result<MetricRequest> {
        let condition = format!(
            "NOT REGEXP_LIKE({}, {})",
            SqlSecurity::escape_identifier(&self.column)?,
            SqlSecurity::validate_regex_pattern(&self.pattern)?
        );
        Ok(self
            .common
            .conditional_request(&self.column, "row_cnt", &condition))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("pattern", &self.pattern);
        Ok(no_violations(value, diagnostics))
    }
}

/// Passes when every string length lies within the given bounds.
#[derive(Debug, Clone)]
pub struct ColumnLength {
    column: String,
    min_length: Option<u64>,
    max_length: Option<u64>,
    trim: bool,
    common: ValidatorCommon,
}

impl ColumnLength {
    pub fn new(
        column: impl Into<String>,
        min_length: Option<u64>,
        max_length: Option<u64>,
    ) -> Result<Self> {
        match (min_length, max_length) {
            (None, None) => {
                return Err(ExpectError::config(
                    "min_length or max_length must be provided",
                ))
            }
            (Some(min), Some(max)) if min > max => {
                return Err(ExpectError::config(format!(
                    "min_length ({min}) cannot be greater than max_length ({max})"
                )))
            }
            _ => {}
        }
        Ok(Self {
            column: column.into(),
            min_length,
            max_length,
            trim: false,
            common: ValidatorCommon::default(),
        })
    }

    /// Measures lengths after trimming surrounding whitespace.
    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }
}

validator_base!(ColumnLength, "ColumnLength", column);

#[async_trait]
impl MetricValidator for ColumnLength {
    fn metric_request(&self) -> Result<MetricRequest> {
        let column = SqlSecurity::escape_identifier(&self.column)?;
        let length = if self.trim {
            format!("LENGTH(TRIM({column}))")
        } else {
            format!("LENGTH({column})")
        };
        let mut conditions = Vec::with_capacity(2);
        if let Some(min) = self.min_length {
            conditions.push(format!("{length} < {min}"));
        }
        if let Some(max) = self.max_length {
            conditions.push(format!("{length} > {max}"));
        }
        Ok(self
            .common
            .conditional_request(&self.column, "row_cnt", &conditions.join(" OR ")))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("min_length", self.min_length);
        diagnostics.set("max_length", self.max_length);
        Ok(no_violations(value, diagnostics))
    }
}

/// Passes when every value lies between `min_value` and `max_value`.
///
/// Bounds are inclusive; with `strict` they are exclusive.
#[derive(Debug, Clone)]
pub struct ColumnRange {
    column: String,
    min_value: MetricValue,
    max_value: MetricValue,
    strict: bool,
    common: ValidatorCommon,
}

impl ColumnRange {
    pub fn new(
        column: impl Into<String>,
        min_value: impl Into<MetricValue>,
        max_value: impl Into<MetricValue>,
    ) -> Result<Self> {
        let (min_value, max_value) = (min_value.into(), max_value.into());
        sql_literal(&min_value)?;
        sql_literal(&max_value)?;
        if min_value.compare(&max_value) == Some(Ordering::Greater) {
            return Err(ExpectError::config(format!(
                "min_value ({min_value}) cannot be greater than max_value ({max_value})"
            )));
        }
        Ok(Self {
            column: column.into(),
            min_value,
            max_value,
            strict: false,
            common: ValidatorCommon::default(),
        })
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

validator_base!(ColumnRange, "ColumnRange", column);

#[async_trait]
impl MetricValidator for ColumnRange {
    fn metric_request(&self) -> Result<MetricRequest> {
        let column = SqlSecurity::escape_identifier(&self.column)?;
        let (low, high) = if self.strict { ("<=", ">=") } else { ("<", ">") };
        let condition = format!(
            "{column} {low} {} OR {column} {high} {}",
            sql_literal(&self.min_value)?,
            sql_literal(&self.max_value)?
        );
        Ok(self
            .common
            .conditional_request(&self.column, "row_cnt", &condition))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("min_value", self.min_value.to_json());
        diagnostics.set("max_value", self.max_value.to_json());
        diagnostics.set("strict", self.strict);
        Ok(no_violations(value, diagnostics))
    }
}

/// Passes when `column >= other_column` on every row where both are non-NULL.
#[derive(Debug, Clone)]
pub struct ColumnGreaterEqual {
    column: String,
    other_column: String,
    common: ValidatorCommon,
}

impl ColumnGreaterEqual {
    pub fn new(column: impl Into<String>, other_column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            other_column: other_column.into(),
            common: ValidatorCommon::default(),
        }
    }
}

validator_base!(ColumnGreaterEqual, "ColumnGreaterEqual", column);

#[async_trait]
impl MetricValidator for ColumnGreaterEqual {
    fn metric_request(&self) -> Result<MetricRequest> {
        let condition = format!(
            "{} < {}",
            SqlSecurity::escape_identifier(&self.column)?,
            SqlSecurity::escape_identifier(&self.other_column)?
        );
        Ok(self
            .common
            .conditional_request(&self.column, "row_cnt", &condition))
    }

    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool> {
        diagnostics.set("other_column", &self.other_column);
        Ok(no_violations(value, diagnostics))
    }
}

/// Passes when no value of `column` repeats. Runs as its own query.
#[derive(Debug, Clone)]
pub struct ColumnUniquenessValidator {
    column: String,
    common: ValidatorCommon,
}

impl ColumnUniquenessValidator {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            common: ValidatorCommon::default(),
        }
    }
}

validator_base!(ColumnUniquenessValidator, "ColumnUniquenessValidator", column);

#[async_trait]
impl CustomValidator for ColumnUniquenessValidator {
    fn custom_sql(&self, _table: &str) -> Result<CustomQuery> {
        Ok(CustomQuery::Metrics(vec![MetricRequest::new(
            &self.column,
            "duplicate_cnt",
            "dup_cnt",
        )
        .with_filter(self.common.where_condition.clone())]))
    }

    async fn interpret(&self, rows: &QueryResult, diagnostics: &mut Diagnostics) -> Result<bool> {
        let duplicates = rows.value(0, "dup_cnt")?;
        diagnostics.set("dup_cnt", duplicates.to_json());
        Ok(duplicates.as_i64() == Some(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::ValidatorBase;

    async fn check(validator: &dyn MetricValidator, value: MetricValue) -> (bool, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let passed = validator.interpret(&value, &mut diagnostics).await.unwrap();
        (passed, diagnostics)
    }

    #[tokio::test]
    async fn test_not_null() {
        let validator = ColumnNotNull::new("customer");
        assert!(check(&validator, MetricValue::Float(0.0)).await.0);
        assert!(!check(&validator, MetricValue::Float(0.2)).await.0);

        let (passed, diagnostics) = check(&validator, MetricValue::Null).await;
        assert!(!passed);
        assert_eq!(diagnostics.get("observed"), Some(&serde_json::Value::Null));
    }

    #[tokio::test]
    async fn test_null_pct_threshold() {
        let validator = ColumnNullPct::new("amount", 0.2).unwrap();
        assert!(check(&validator, MetricValue::Float(0.2)).await.0);
        assert!(!check(&validator, MetricValue::Float(0.21)).await.0);
        assert!(!check(&validator, MetricValue::Float(f64::NAN)).await.0);
        assert!(ColumnNullPct::new("amount", 1.5).is_err());
    }

    #[tokio::test]
    async fn test_distinct_count_comparators() {
        let eq = ColumnDistinctCount::new("status", 3);
        assert!(check(&eq, MetricValue::Int(3)).await.0);
        assert!(!check(&eq, MetricValue::Int(4)).await.0);

        let at_least = ColumnDistinctCount::new("status", 3).with_comparator(Comparator::GtEq);
        assert!(check(&at_least, MetricValue::Int(4)).await.0);

        let below = ColumnDistinctCount::new("status", 3).with_comparator(Comparator::Lt);
        assert!(!check(&below, MetricValue::Int(3)).await.0);

        assert_eq!("<=".parse::<Comparator>().unwrap(), Comparator::LtEq);
        assert!("!=".parse::<Comparator>().is_err());
    }

    #[tokio::test]
    async fn test_min_max_strictness() {
        let min = ColumnMin::new("amount", 5.0);
        assert!(check(&min, MetricValue::Float(5.0)).await.0);
        assert!(!check(&min.clone().strict(true), MetricValue::Float(5.0)).await.0);
        assert!(check(&min, MetricValue::Int(6)).await.0);

        let max = ColumnMax::new("status", "pending");
        assert!(check(&max, MetricValue::from("open")).await.0);
        assert!(!check(&max, MetricValue::from("zzz")).await.0);

        let (passed, diagnostics) = check(&max, MetricValue::Int(3)).await;
        assert!(!passed);
        assert!(diagnostics.get("reason").is_some());
    }

    #[tokio::test]
    async fn test_percentile_registers_metric() {
        let registry = MetricRegistry::with_builtins();
        let validator = ColumnPercentile::in_registry(&registry, "amount", 0.8, 20.0)
            .unwrap()
            .with_tolerance(0.5)
            .unwrap();
        assert_eq!(validator.metric_key(), "pct_80");
        assert!(registry.contains("pct_80"));
        assert!(check(&validator, MetricValue::Float(20.4)).await.0);
        assert!(!check(&validator, MetricValue::Float(20.6)).await.0);
        assert!(ColumnPercentile::in_registry(&registry, "amount", 1.5, 0.0).is_err());
    }

    #[test]
    fn test_value_in_set_condition() {
        let request = ColumnValueInSet::new(
            "status",
            vec![MetricValue::from("open"), MetricValue::from("it's")],
        )
        .unwrap()
        .with_where("id > 1")
        .metric_request()
        .unwrap();
        assert_eq!(request.metric(), "row_cnt");
        assert_eq!(
            request.filter_sql(),
            Some("(id > 1) AND (\"status\" NOT IN ('open', 'it''s') OR \"status\" IS NULL)")
        );

        let lenient = ColumnValueInSet::new("status", vec![MetricValue::Int(1)])
            .unwrap()
            .allow_null(true)
            .metric_request()
            .unwrap();
        assert_eq!(lenient.filter_sql(), Some("\"status\" NOT IN (1)"));

        assert!(ColumnValueInSet::new("status", vec![]).is_err());
        assert!(ColumnValueInSet::new("status", vec![MetricValue::Null]).is_err());
    }

    #[test]
    fn test_regex_and_length_conditions() {
        let regex = ColumnMatchesRegex::new("customer", "^[a-z]+$").unwrap();
        assert_eq!(
            regex.metric_request().unwrap().filter_sql(),
            Some("NOT REGEXP_LIKE(\"customer\", '^[a-z]+$')")
        );
        assert!(ColumnMatchesRegex::new("customer", "(unclosed").is_err());

        let length = ColumnLength::new("customer", Some(2), Some(10))
            .unwrap()
            .trim(true);
        assert_eq!(
            length.metric_request().unwrap().filter_sql(),
            Some("LENGTH(TRIM(\"customer\")) < 2 OR LENGTH(TRIM(\"customer\")) > 10")
        );
        assert!(ColumnLength::new("customer", None, None).is_err());
        assert!(ColumnLength::new("customer", Some(5), Some(1)).is_err());
    }

    #[test]
    fn test_range_and_greater_equal_conditions() {
        let range = ColumnRange::new("amount", 0, 100).unwrap();
        assert_eq!(
            range.metric_request().unwrap().filter_sql(),
            Some("\"amount\" < 0 OR \"amount\" > 100")
        );
        let strict = range.strict(true);
        assert_eq!(
            strict.metric_request().unwrap().filter_sql(),
            Some("\"amount\" <= 0 OR \"amount\" >= 100")
        );
        assert!(ColumnRange::new("amount", 10, 1).is_err());

        let ge = ColumnGreaterEqual::new("end_date", "start_date");
        assert_eq!(
            ge.metric_request().unwrap().filter_sql(),
            Some("\"end_date\" < \"start_date\"")
        );
    }

    #[tokio::test]
    async fn test_violation_counts() {
        let validator = ColumnGreaterEqual::new("a", "b");
        assert!(check(&validator, MetricValue::Int(0)).await.0);
        assert!(!check(&validator, MetricValue::Int(2)).await.0);
        assert!(!check(&validator, MetricValue::Null).await.0);
    }

    #[test]
    fn test_uniqueness_query() {
        let validator = ColumnUniquenessValidator::new("id").with_where("status = 'open'");
        match validator.custom_sql("orders").unwrap() {
            CustomQuery::Metrics(requests) => {
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].metric(), "duplicate_cnt");
                assert_eq!(requests[0].alias(), "dup_cnt");
                assert_eq!(requests[0].filter_sql(), Some("status = 'open'"));
            }
            other => panic!("expected metric requests, got {other:?}"),
        }
        assert_eq!(validator.column(), Some("id"));
    }
}
