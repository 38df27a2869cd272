//! Suite and SLA configuration.
//!
//! A suite names an engine, a table and a list of expectations:
//!
//! ```yaml
//! suite_name: orders_daily
//! engine: warehouse
//! table: sales.orders
//! expectations:
//!   - expectation_type: ColumnNotNull
//!     column: id
//!   - expectation_type: ColumnNullPct
//!     column: customer
//!     threshold: 0.05
//!     severity: WARN
//!   - expectation_type: RowCountValidator
//!     kwargs: { min_rows: 1 }
//! ```
//!
//! Expectation types resolve through the closed [`ValidatorType`] set, so an
//! unknown name fails when the document is loaded. Each validator's parameters
//! are the union of `kwargs` and the shortcut fields (`column`, `sql`,
//! `max_error_rows`, `threshold`).

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::engine::{Engine, MetricValue};
use crate::error::{ExpectError, Result};
use crate::metrics::MetricRegistry;
use crate::runner::ValidatorBinding;
use crate::validators::table::parse_duration;
use crate::validators::{
    CaseNormalization, ColumnDistinctCount, ColumnGreaterEqual, ColumnLength, ColumnMapping,
    ColumnMatchesRegex, ColumnMax, ColumnMin, ColumnNotNull, ColumnNullPct, ColumnPercentile,
    ColumnRange, ColumnReconciliationValidator, ColumnUniquenessValidator, ColumnValueInSet,
    Comparator, DuplicateRowValidator, InMemoryMetricHistory, MetricDriftValidator,
    MetricHistory, PrimaryKeyUniquenessValidator, RowCountValidator, Severity,
    SqlErrorRowsValidator, TableFreshnessValidator, TableReconciliationValidator, Validator,
    ValueCast,
};

/// One expectation record of a suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectationConfig {
    pub expectation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
    /// `INFO`, `WARN`/`WARNING` or `FAIL`/`ERROR`, case-insensitive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_error_rows: Option<usize>,
}

impl ExpectationConfig {
    pub fn new(expectation_type: impl Into<String>) -> Self {
        Self {
            expectation_type: expectation_type.into(),
            column: None,
            where_condition: None,
            kwargs: Map::new(),
            severity: None,
            threshold: None,
            sql: None,
            max_error_rows: None,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_where(mut self, condition: impl Into<String>) -> Self {
        self.where_condition = Some(condition.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn with_threshold(mut self, threshold: impl Into<Value>) -> Self {
        self.threshold = Some(threshold.into());
        self
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    pub fn validator_type(&self) -> Result<ValidatorType> {
        self.expectation_type.parse()
    }

    pub fn severity(&self) -> Result<Option<Severity>> {
        self.severity.as_deref().map(str::parse).transpose()
    }

    /// Merges `kwargs` with the shortcut fields.
    ///
    /// A shortcut that repeats a kwarg with a different value is an error.
    pub fn parameters(&self, validator_type: ValidatorType) -> Result<Map<String, Value>> {
        let mut params = self.kwargs.clone();
        let mut merge = |key: &str, value: Value| -> Result<()> {
            match params.get(key) {
                Some(existing) if *existing != value => Err(ExpectError::config(format!(
                    "'{key}' given both as a field and in kwargs of {validator_type}"
                ))),
                Some(_) => Ok(()),
                None => {
                    params.insert(key.to_string(), value);
                    Ok(())
                }
            }
        };

        if let Some(column) = &self.column {
            merge("column", Value::from(column.as_str()))?;
        }
        if let Some(sql) = &self.sql {
            merge("sql", Value::from(sql.as_str()))?;
        }
        if let Some(max_error_rows) = self.max_error_rows {
            merge("max_error_rows", Value::from(max_error_rows))?;
        }
        if let Some(threshold) = &self.threshold {
            let key = validator_type.threshold_key().ok_or_else(|| {
                ExpectError::config(format!("{validator_type} does not take a threshold"))
            })?;
            merge(key, threshold.clone())?;
        }
        Ok(params)
    }
}

/// A suite of expectations against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectationSuiteConfig {
    pub suite_name: String,
    /// Key of the engine the suite runs on.
    pub engine: String,
    pub table: String,
    /// Schema reported on results; defaults to the qualifier of `table`.
    #[serde(default, alias = "schema", skip_serializing_if = "Option::is_none")]
    pub db_schema: Option<String>,
    #[serde(default)]
    pub expectations: Vec<ExpectationConfig>,
}

impl ExpectationSuiteConfig {
    pub fn new(
        suite_name: impl Into<String>,
        engine: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            suite_name: suite_name.into(),
            engine: engine.into(),
            table: table.into(),
            db_schema: None,
            expectations: Vec::new(),
        }
    }

    pub fn with_expectation(mut self, expectation: ExpectationConfig) -> Self {
        self.expectations.push(expectation);
        self
    }
}

/// A named group of suites run together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlaConfig {
    pub sla_name: String,
    #[serde(default)]
    pub suites: Vec<ExpectationSuiteConfig>,
}

/// Loading for configuration documents.
///
/// Every loader checks expectation types and severities before returning.
pub trait ConfigDocument: DeserializeOwned + Sized {
    /// Rejects unknown expectation types and malformed severities.
    fn check(&self) -> Result<()>;

    fn from_yaml_str(text: &str) -> Result<Self> {
        let document: Self = serde_yaml::from_str(text)?;
        document.check()?;
        Ok(document)
    }

    fn from_json_str(text: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(text)?;
        document.check()?;
        Ok(document)
    }

    /// Loads a `.yaml`, `.yml` or `.json` file.
    fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let parse: fn(&str) -> Result<Self> = match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_str,
            Some("json") => Self::from_json_str,
            _ => {
                return Err(ExpectError::config(format!(
                    "unsupported configuration file '{}': expected .yaml, .yml or .json",
                    path.display()
                )))
            }
        };
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loading configuration");
        parse(&text)
    }
}

impl ConfigDocument for ExpectationSuiteConfig {
    fn check(&self) -> Result<()> {
        for expectation in &self.expectations {
            expectation.validator_type().map_err(|e| match e {
                ExpectError::ConfigResolution(msg) => {
                    ExpectError::ConfigResolution(format!("suite '{}': {msg}", self.suite_name))
                }
                other => other,
            })?;
            expectation.severity()?;
        }
        Ok(())
    }
}

impl ConfigDocument for SlaConfig {
    fn check(&self) -> Result<()> {
        self.suites.iter().try_for_each(ConfigDocument::check)
    }
}

/// Every validator type a configuration may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorType {
    ColumnNotNull,
    ColumnNullPct,
    ColumnDistinctCount,
    ColumnMin,
    ColumnMax,
    ColumnPercentile,
    ColumnValueInSet,
    ColumnMatchesRegex,
    ColumnLength,
    ColumnRange,
    ColumnGreaterEqual,
    ColumnUniqueness,
    RowCount,
    DuplicateRow,
    PrimaryKeyUniqueness,
    TableFreshness,
    SqlErrorRows,
    MetricDrift,
    ColumnReconciliation,
    TableReconciliation,
}

impl ValidatorType {
    pub const ALL: [ValidatorType; 20] = [
        ValidatorType::ColumnNotNull,
        ValidatorType::ColumnNullPct,
        ValidatorType::ColumnDistinctCount,
        ValidatorType::ColumnMin,
        ValidatorType::ColumnMax,
        ValidatorType::ColumnPercentile,
        ValidatorType::ColumnValueInSet,
        ValidatorType::ColumnMatchesRegex,
        ValidatorType::ColumnLength,
        ValidatorType::ColumnRange,
        ValidatorType::ColumnGreaterEqual,
        ValidatorType::ColumnUniqueness,
        ValidatorType::RowCount,
        ValidatorType::DuplicateRow,
        ValidatorType::PrimaryKeyUniqueness,
        ValidatorType::TableFreshness,
        ValidatorType::SqlErrorRows,
        ValidatorType::MetricDrift,
        ValidatorType::ColumnReconciliation,
        ValidatorType::TableReconciliation,
    ];

    /// The validator's reported name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorType::ColumnNotNull => "ColumnNotNull",
            ValidatorType::ColumnNullPct => "ColumnNullPct",
            ValidatorType::ColumnDistinctCount => "ColumnDistinctCount",
            ValidatorType::ColumnMin => "ColumnMin",
            ValidatorType::ColumnMax => "ColumnMax",
            ValidatorType::ColumnPercentile => "ColumnPercentile",
            ValidatorType::ColumnValueInSet => "ColumnValueInSet",
            ValidatorType::ColumnMatchesRegex => "ColumnMatchesRegex",
            ValidatorType::ColumnLength => "ColumnLength",
            ValidatorType::ColumnRange => "ColumnRange",
            ValidatorType::ColumnGreaterEqual => "ColumnGreaterEqual",
            ValidatorType::ColumnUniqueness => "ColumnUniquenessValidator",
            ValidatorType::RowCount => "RowCountValidator",
            ValidatorType::DuplicateRow => "DuplicateRowValidator",
            ValidatorType::PrimaryKeyUniqueness => "PrimaryKeyUniquenessValidator",
            ValidatorType::TableFreshness => "TableFreshnessValidator",
            ValidatorType::SqlErrorRows => "SqlErrorRowsValidator",
            ValidatorType::MetricDrift => "MetricDriftValidator",
            ValidatorType::ColumnReconciliation => "ColumnReconciliationValidator",
            ValidatorType::TableReconciliation => "TableReconciliationValidator",
        }
    }

    /// Parameter that the `threshold` shortcut fills in, if any.
    pub fn threshold_key(&self) -> Option<&'static str> {
        match self {
            ValidatorType::ColumnNullPct => Some("max_null_pct"),
            ValidatorType::MetricDrift => Some("z_thresh"),
            ValidatorType::TableFreshness => Some("threshold"),
            _ => None,
        }
    }
}

impl fmt::Display for ValidatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidatorType {
    type Err = ExpectError;

    /// Accepts the reported name with or without its `Validator` suffix.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        let bare = name.strip_suffix("Validator").unwrap_or(name);
        Self::ALL
            .into_iter()
            .find(|ty| {
                let reported = ty.as_str();
                reported == name || reported.strip_suffix("Validator").unwrap_or(reported) == bare
            })
            .ok_or_else(|| {
                ExpectError::ConfigResolution(format!("unknown expectation type '{name}'"))
            })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ColumnParams {
    column: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NullPctParams {
    column: String,
    max_null_pct: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DistinctCountParams {
    column: String,
    expected: i64,
    #[serde(default)]
    op: Comparator,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MinParams {
    column: String,
    min_value: MetricValue,
    #[serde(default)]
    strict: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MaxParams {
    column: String,
    max_value: MetricValue,
    #[serde(default)]
    strict: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PercentileParams {
    column: String,
    q: f64,
    expected: f64,
    #[serde(default)]
    tolerance: Option<f64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ValueInSetParams {
    column: String,
    allowed_values: Vec<MetricValue>,
    #[serde(default)]
    allow_null: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RegexParams {
    column: String,
    pattern: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LengthParams {
    column: String,
    #[serde(default)]
    min_length: Option<u64>,
    #[serde(default)]
    max_length: Option<u64>,
    #[serde(default)]
    trim: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeParams {
    column: String,
    min_value: MetricValue,
    max_value: MetricValue,
    #[serde(default)]
    strict: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GreaterEqualParams {
    column: String,
    other_column: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RowCountParams {
    #[serde(default)]
    min_rows: Option<i64>,
    #[serde(default)]
    max_rows: Option<i64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyColumnsParams {
    key_columns: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FreshnessParams {
    #[serde(alias = "timestamp_column")]
    column: String,
    /// Duration text (`"1h30m"`) or whole seconds.
    threshold: Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SqlErrorRowsParams {
    sql: String,
    #[serde(default)]
    max_error_rows: Option<usize>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DriftParams {
    metric: String,
    #[serde(default)]
    column: Option<String>,
    #[serde(default)]
    window: Option<usize>,
    #[serde(default)]
    z_thresh: Option<f64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ColumnReconciliationParams {
    column: String,
    comparer_engine: String,
    #[serde(default)]
    comparer_table: Option<String>,
    #[serde(default)]
    comparer_column: Option<String>,
    #[serde(default)]
    comparer_where: Option<String>,
    #[serde(default)]
    primary_type: Option<ValueCast>,
    #[serde(default)]
    comparer_type: Option<ValueCast>,
    #[serde(default)]
    primary_case: Option<CaseNormalization>,
    #[serde(default)]
    comparer_case: Option<CaseNormalization>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TableReconciliationParams {
    comparer_engine: String,
    #[serde(default)]
    comparer_table: Option<String>,
    #[serde(default)]
    comparer_where: Option<String>,
}

fn decode<P: DeserializeOwned>(
    validator_type: ValidatorType,
    params: Map<String, Value>,
) -> Result<P> {
    serde_json::from_value(Value::Object(params)).map_err(|e| {
        ExpectError::config(format!("invalid parameters for {validator_type}: {e}"))
    })
}

fn freshness_threshold(threshold: &Value) -> Result<chrono::Duration> {
    match threshold {
        Value::String(text) => parse_duration(text),
        Value::Number(n) => n
            .as_i64()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| ExpectError::config(format!("invalid freshness threshold {n}"))),
        other => Err(ExpectError::config(format!("invalid freshness threshold {other}"))),
    }
}

/// Builds validators from configuration.
#[derive(Debug, Clone)]
pub struct ValidatorFactory {
    registry: Arc<MetricRegistry>,
    engines: HashMap<String, Arc<dyn Engine>>,
    history: Arc<dyn MetricHistory>,
}

impl ValidatorFactory {
    /// A factory over `engines` using the global registry and an empty in-memory history.
    pub fn new(engines: HashMap<String, Arc<dyn Engine>>) -> Self {
        Self {
            registry: MetricRegistry::global(),
            engines,
            history: Arc::new(InMemoryMetricHistory::new()),
        }
    }

    pub fn with_engine(mut self, key: impl Into<String>, engine: Arc<dyn Engine>) -> Self {
        self.engines.insert(key.into(), engine);
        self
    }

    pub fn with_registry(mut self, registry: Arc<MetricRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn MetricHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn history(&self) -> &Arc<dyn MetricHistory> {
        &self.history
    }

    fn engine(&self, key: &str) -> Result<&Arc<dyn Engine>> {
        self.engines
            .get(key)
            .ok_or_else(|| ExpectError::ConfigResolution(format!("unknown engine '{key}'")))
    }

    /// Builds one validator for `table` on the engine named `engine_key`.
    pub async fn build(
        &self,
        expectation: &ExpectationConfig,
        engine_key: &str,
        table: &str,
    ) -> Result<Validator> {
        let validator_type = expectation.validator_type()?;
        let params = expectation.parameters(validator_type)?;

        let mut validator = match validator_type {
            ValidatorType::ColumnNotNull => {
                let p: ColumnParams = decode(validator_type, params)?;
                Validator::metric(ColumnNotNull::new(p.column))
            }
            ValidatorType::ColumnNullPct => {
                let p: NullPctParams = decode(validator_type, params)?;
                Validator::metric(ColumnNullPct::new(p.column, p.max_null_pct)?)
            }
            ValidatorType::ColumnDistinctCount => {
                let p: DistinctCountParams = decode(validator_type, params)?;
                Validator::metric(
                    ColumnDistinctCount::new(p.column, p.expected).with_comparator(p.op),
                )
            }
            ValidatorType::ColumnMin => {
                let p: MinParams = decode(validator_type, params)?;
                Validator::metric(ColumnMin::new(p.column, p.min_value).strict(p.strict))
            }
            ValidatorType::ColumnMax => {
                let p: MaxParams = decode(validator_type, params)?;
                Validator::metric(ColumnMax::new(p.column, p.max_value).strict(p.strict))
            }
            ValidatorType::ColumnPercentile => {
                let p: PercentileParams = decode(validator_type, params)?;
                let mut validator =
                    ColumnPercentile::in_registry(&self.registry, p.column, p.q, p.expected)?;
                if let Some(tolerance) = p.tolerance {
                    validator = validator.with_tolerance(tolerance)?;
                }
                Validator::metric(validator)
            }
            ValidatorType::ColumnValueInSet => {
                let p: ValueInSetParams = decode(validator_type, params)?;
                Validator::metric(
                    ColumnValueInSet::new(p.column, p.allowed_values)?.allow_null(p.allow_null),
                )
            }
            ValidatorType::ColumnMatchesRegex => {
                let p: RegexParams = decode(validator_type, params)?;
                Validator::metric(ColumnMatchesRegex::new(p.column, p.pattern)?)
            }
            ValidatorType::ColumnLength => {
                let p: LengthParams = decode(validator_type, params)?;
                Validator::metric(
                    ColumnLength::new(p.column, p.min_length, p.max_length)?.trim(p.trim),
                )
            }
            ValidatorType::ColumnRange => {
                let p: RangeParams = decode(validator_type, params)?;
                Validator::metric(
                    ColumnRange::new(p.column, p.min_value, p.max_value)?.strict(p.strict),
                )
            }
            ValidatorType::ColumnGreaterEqual => {
                let p: GreaterEqualParams = decode(validator_type, params)?;
                Validator::metric(ColumnGreaterEqual::new(p.column, p.other_column))
            }
            ValidatorType::ColumnUniqueness => {
                let p: ColumnParams = decode(validator_type, params)?;
                Validator::custom(ColumnUniquenessValidator::new(p.column))
            }
            ValidatorType::RowCount => {
                let p: RowCountParams = decode(validator_type, params)?;
                Validator::metric(RowCountValidator::new(p.min_rows, p.max_rows)?)
            }
            ValidatorType::DuplicateRow => {
                let p: KeyColumnsParams = decode(validator_type, params)?;
                Validator::metric(DuplicateRowValidator::new(p.key_columns)?)
            }
            ValidatorType::PrimaryKeyUniqueness => {
                let p: KeyColumnsParams = decode(validator_type, params)?;
                Validator::custom(PrimaryKeyUniquenessValidator::new(p.key_columns)?)
            }
            ValidatorType::TableFreshness => {
                let p: FreshnessParams = decode(validator_type, params)?;
                let threshold = freshness_threshold(&p.threshold)?;
                Validator::metric(TableFreshnessValidator::new(p.column, threshold)?)
            }
            ValidatorType::SqlErrorRows => {
                let p: SqlErrorRowsParams = decode(validator_type, params)?;
                let mut validator = SqlErrorRowsValidator::new(p.sql)?.with_tags(p.tags);
                if let Some(max_error_rows) = p.max_error_rows {
                    validator = validator.with_max_error_rows(max_error_rows);
                }
                Validator::custom(validator)
            }
            ValidatorType::MetricDrift => {
                let p: DriftParams = decode(validator_type, params)?;
                let mut validator = MetricDriftValidator::in_registry(
                    &self.registry,
                    p.metric,
                    p.column,
                    self.history.clone(),
                )?;
                if let Some(window) = p.window {
                    validator = validator.with_window(window)?;
                }
                if let Some(z_thresh) = p.z_thresh {
                    validator = validator.with_z_thresh(z_thresh)?;
                }
                Validator::metric(validator)
            }
            ValidatorType::ColumnReconciliation => {
                let p: ColumnReconciliationParams = decode(validator_type, params)?;
                let primary = self.engine(engine_key)?;
                let comparer = self.engine(&p.comparer_engine)?.clone();
                let mut mapping = ColumnMapping::new(p.column);
                mapping.comparer = p.comparer_column;
                mapping.primary_type = p.primary_type;
                mapping.comparer_type = p.comparer_type;
                mapping.primary_case = p.primary_case;
                mapping.comparer_case = p.comparer_case;
                let comparer_table = p.comparer_table.unwrap_or_else(|| table.to_string());
                let mut validator = ColumnReconciliationValidator::try_new(
                    mapping,
                    primary.as_ref(),
                    table,
                    comparer,
                    comparer_table,
                )
                .await?;
                if let Some(condition) = p.comparer_where {
                    validator = validator.with_comparer_where(condition)?;
                }
                Validator::custom(validator)
            }
            ValidatorType::TableReconciliation => {
                let p: TableReconciliationParams = decode(validator_type, params)?;
                let comparer = self.engine(&p.comparer_engine)?.clone();
                let comparer_table = p.comparer_table.unwrap_or_else(|| table.to_string());
                let mut validator = TableReconciliationValidator::new(comparer, comparer_table)?;
                if let Some(condition) = p.comparer_where {
                    validator = validator.with_comparer_where(condition)?;
                }
                Validator::custom(validator)
            }
        };

        validator.set_where(expectation.where_condition.as_deref());
        if let Some(severity) = expectation.severity()? {
            validator.set_severity(severity);
        }
        Ok(validator)
    }

    /// Builds bindings for every expectation of `suite`, in order.
    #[instrument(
        skip_all,
        fields(suite = %suite.suite_name, expectations = suite.expectations.len())
    )]
    pub async fn build_suite(
        &self,
        suite: &ExpectationSuiteConfig,
    ) -> Result<Vec<ValidatorBinding>> {
        self.engine(&suite.engine)?;
        let mut bindings = Vec::with_capacity(suite.expectations.len());
        for expectation in &suite.expectations {
            let validator = self.build(expectation, &suite.engine, &suite.table).await?;
            bindings.push(ValidatorBinding::new(&suite.engine, &suite.table, validator));
        }
        Ok(bindings)
    }

    /// Builds the bindings of every suite of `sla`, concatenated.
    pub async fn build_validators(&self, sla: &SlaConfig) -> Result<Vec<ValidatorBinding>> {
        let mut bindings = Vec::new();
        for suite in &sla.suites {
            bindings.extend(self.build_suite(suite).await?);
        }
        Ok(bindings)
    }
}
