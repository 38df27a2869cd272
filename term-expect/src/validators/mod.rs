//! Validators: single data-quality checks.
//!
//! A validator is either a [`MetricValidator`], which contributes one
//! [`MetricRequest`] to a batched query, or a [`CustomValidator`], which owns
//! its whole query. [`Validator`] is the closed sum of the two that the runner
//! partitions on.
//!
//! ```rust
//! use term_expect::validators::{ColumnNotNull, Severity, Validator, ValidatorBase, ValidatorKind};
//!
//! let check = ColumnNotNull::new("customer_id")
//!     .with_where("status = 'open'")
//!     .with_severity(Severity::Warn);
//! let validator = Validator::metric(check);
//! assert_eq!(validator.kind(), ValidatorKind::Metric);
//! ```

/// Implements [`ValidatorBase`] for a struct with a `common` field. A third
/// argument names the field reported as the validator's column.
macro_rules! validator_base {
    ($ty:ty, $name:literal) => {
        impl $crate::validators::ValidatorBase for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn common(&self) -> &$crate::validators::ValidatorCommon {
                &self.common
            }

            fn common_mut(&mut self) -> &mut $crate::validators::ValidatorCommon {
                &mut self.common
            }
        }
    };
    ($ty:ty, $name:literal, $column:ident) => {
        impl $crate::validators::ValidatorBase for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn common(&self) -> &$crate::validators::ValidatorCommon {
                &self.common
            }

            fn common_mut(&mut self) -> &mut $crate::validators::ValidatorCommon {
                &mut self.common
            }

            fn column(&self) -> Option<&str> {
                Some(&self.$column)
            }
        }
    };
}

pub mod column;
pub mod custom;
pub mod drift;
pub mod reconciliation;
pub mod table;

use std::fmt::{self, Debug};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::{MetricValue, QueryResult};
use crate::error::{ExpectError, Result};
use crate::metrics::MetricRequest;

pub use column::{
    ColumnDistinctCount, ColumnGreaterEqual, ColumnLength, ColumnMatchesRegex, ColumnMax,
    ColumnMin, ColumnNotNull, ColumnNullPct, ColumnPercentile, ColumnRange,
    ColumnUniquenessValidator, ColumnValueInSet, Comparator,
};
pub use custom::SqlErrorRowsValidator;
pub use drift::{InMemoryMetricHistory, MetricDriftValidator, MetricHistory, MetricKey};
pub use reconciliation::{
    CaseNormalization, ColumnMapping, ColumnReconciliationValidator,
    TableReconciliationValidator, ValueCast,
};
pub use table::{
    DuplicateRowValidator, PrimaryKeyUniquenessValidator, RowCountValidator,
    TableFreshnessValidator,
};

/// How a failed check should be treated downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational only.
    Info = 0,
    /// Worth attention but not blocking.
    Warn = 1,
    /// The data should be considered broken.
    #[default]
    Fail = 2,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Fail => "FAIL",
        }
    }

    /// Returns true if this severity is at least as severe as `other`.
    pub fn is_at_least(&self, other: Severity) -> bool {
        *self >= other
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ExpectError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "FAIL" | "ERROR" => Ok(Severity::Fail),
            other => Err(ExpectError::config(format!("unknown severity '{other}'"))),
        }
    }
}

/// Globally unique validator identifier, used as the batch output alias.
///
/// 128 random bits rendered as `v` plus 32 lowercase hex digits, so ids from
/// independent processes sharing one engine do not collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuntimeId(String);

impl RuntimeId {
    pub fn generate() -> Self {
        Self(format!("v{}", hex::encode(rand::random::<u128>().to_be_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RuntimeId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State every validator carries.
#[derive(Debug, Clone, Default)]
pub struct ValidatorCommon {
    pub runtime_id: RuntimeId,
    pub where_condition: Option<String>,
    pub severity: Severity,
    /// Target table, stamped by the runner before execution.
    pub table: Option<String>,
}

impl ValidatorCommon {
    /// A request for `metric` over `column`, filtered by the validator's `where`.
    pub fn request(&self, column: &str, metric: &str) -> MetricRequest {
        MetricRequest::new(column, metric, self.runtime_id.as_str())
            .with_filter(self.where_condition.clone())
    }

    /// Like [`ValidatorCommon::request`], additionally restricted to rows matching `condition`.
    pub fn conditional_request(
        &self,
        column: &str,
        metric: &str,
        condition: &str,
    ) -> MetricRequest {
        MetricRequest::new(column, metric, self.runtime_id.as_str())
            .with_filter(Some(combine_filters(self.where_condition.as_deref(), condition)))
    }
}

/// `(where) AND (condition)`, or just `condition` without a where clause.
pub fn combine_filters(where_condition: Option<&str>, condition: &str) -> String {
    match where_condition.map(str::trim).filter(|w| !w.is_empty()) {
        Some(w) => format!("({w}) AND ({condition})"),
        None => condition.to_string(),
    }
}

/// Diagnostic fields a validator records while interpreting a result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    fields: Map<String, Value>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` under `key`; values that cannot be serialized become `null`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) {
        self.fields.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }
}

/// Behavior shared by both validator kinds.
pub trait ValidatorBase: Debug + Send + Sync {
    /// Validator type name, as used in suite configuration.
    fn name(&self) -> &'static str;

    fn common(&self) -> &ValidatorCommon;

    fn common_mut(&mut self) -> &mut ValidatorCommon;

    /// The column this validator targets, if any.
    fn column(&self) -> Option<&str> {
        None
    }

    fn runtime_id(&self) -> &RuntimeId {
        &self.common().runtime_id
    }

    fn where_condition(&self) -> Option<&str> {
        self.common().where_condition.as_deref()
    }

    fn severity(&self) -> Severity {
        self.common().severity
    }

    fn table(&self) -> Option<&str> {
        self.common().table.as_deref()
    }

    /// Records the target table.
    fn bind_table(&mut self, table: &str) {
        self.common_mut().table = Some(table.to_string());
    }

    /// Restricts the check to rows matching `condition`; blank text clears it.
    fn with_where(mut self, condition: impl Into<String>) -> Self
    where
        Self: Sized,
    {
        let condition = condition.into();
        self.common_mut().where_condition =
            Some(condition).filter(|c| !c.trim().is_empty());
        self
    }

    fn with_severity(mut self, severity: Severity) -> Self
    where
        Self: Sized,
    {
        self.common_mut().severity = severity;
        self
    }
}

/// A validator that contributes one metric to a batched query.
#[async_trait]
pub trait MetricValidator: ValidatorBase {
    /// The single request, aliased by this validator's runtime id.
    fn metric_request(&self) -> Result<MetricRequest>;

    /// Decides pass/fail from the observed metric value.
    async fn interpret(&self, value: &MetricValue, diagnostics: &mut Diagnostics) -> Result<bool>;
}

/// A query owned by a custom validator.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomQuery {
    /// Literal SQL text, run as-is.
    Sql(String),
    /// Metric requests the runner compiles for the target engine's dialect.
    Metrics(Vec<MetricRequest>),
}

/// A validator that runs its own query.
#[async_trait]
pub trait CustomValidator: ValidatorBase {
    fn custom_sql(&self, table: &str) -> Result<CustomQuery>;

    /// Decides pass/fail from the full result set.
    async fn interpret(&self, rows: &QueryResult, diagnostics: &mut Diagnostics) -> Result<bool>;
}

/// Which variant a validator is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorKind {
    Metric,
    Custom,
}

/// A validator of either kind.
#[derive(Debug)]
pub enum Validator {
    Metric(Box<dyn MetricValidator>),
    Custom(Box<dyn CustomValidator>),
}

impl Validator {
    pub fn metric(validator: impl MetricValidator + 'static) -> Self {
        Validator::Metric(Box::new(validator))
    }

    pub fn custom(validator: impl CustomValidator + 'static) -> Self {
        Validator::Custom(Box::new(validator))
    }

    pub fn kind(&self) -> ValidatorKind {
        match self {
            Validator::Metric(_) => ValidatorKind::Metric,
            Validator::Custom(_) => ValidatorKind::Custom,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Validator::Metric(v) => v.name(),
            Validator::Custom(v) => v.name(),
        }
    }

    pub fn runtime_id(&self) -> &RuntimeId {
        match self {
            Validator::Metric(v) => v.runtime_id(),
            Validator::Custom(v) => v.runtime_id(),
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Validator::Metric(v) => v.column(),
            Validator::Custom(v) => v.column(),
        }
    }

    pub fn where_condition(&self) -> Option<&str> {
        match self {
            Validator::Metric(v) => v.where_condition(),
            Validator::Custom(v) => v.where_condition(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Validator::Metric(v) => v.severity(),
            Validator::Custom(v) => v.severity(),
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Validator::Metric(v) => v.table(),
            Validator::Custom(v) => v.table(),
        }
    }

    pub fn bind_table(&mut self, table: &str) {
        match self {
            Validator::Metric(v) => v.bind_table(table),
            Validator::Custom(v) => v.bind_table(table),
        }
    }

    /// Sets the severity on the wrapped validator.
    pub fn set_severity(&mut self, severity: Severity) {
        match self {
            Validator::Metric(v) => v.common_mut().severity = severity,
            Validator::Custom(v) => v.common_mut().severity = severity,
        }
    }

    /// Replaces the row filter; `None` or blank text clears it.
    pub fn set_where(&mut self, condition: Option<&str>) {
        let condition = condition
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string);
        match self {
            Validator::Metric(v) => v.common_mut().where_condition = condition,
            Validator::Custom(v) => v.common_mut().where_condition = condition,
        }
    }
}

/// Reads a numeric observation, recording it as `observed`.
///
/// NULL and NaN observations are recorded as `null` and yield `None`.
pub(crate) fn observe_f64(value: &MetricValue, diagnostics: &mut Diagnostics) -> Option<f64> {
    let observed = value.as_f64();
    diagnostics.set("observed", observed);
    if observed.is_none() {
        diagnostics.set("reason", "no numeric observation (NULL or NaN)");
    }
    observed
}

/// Reads a count observation, recording it as `observed`.
pub(crate) fn observe_count(value: &MetricValue, diagnostics: &mut Diagnostics) -> Option<i64> {
    let observed = value.as_i64();
    diagnostics.set("observed", observed);
    if observed.is_none() {
        diagnostics.set("reason", "no count observation (NULL or non-integral)");
    }
    observed
}
