//! Cross-engine reconciliation.
//!
//! Both validators run a query on the primary table through the runner and a
//! second, equivalent query on a comparer engine while interpreting. They pass
//! when the two sides agree.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::{CustomQuery, CustomValidator, Diagnostics, ValidatorCommon};
use crate::engine::{Engine, MetricValue, QueryResult};
use crate::error::{ErrorContext, ExpectError, Result};
use crate::metrics::{BatchCompiler, MetricRequest};
use crate::security::SqlSecurity;
use crate::sql::filter;

/// Conversion applied to a metric value before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueCast {
    /// Whole number, truncating fractions and parsing text.
    Int,
    Float,
    Text,
}

impl ValueCast {
    pub fn apply(&self, value: MetricValue) -> MetricValue {
        if value.is_null() {
            return MetricValue::Null;
        }
        match self {
            ValueCast::Int => match &value {
                MetricValue::Text(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(MetricValue::Int)
                    .or_else(|_| {
                        s.trim()
                            .parse::<f64>()
                            .map(|f| MetricValue::Int(f.trunc() as i64))
                    })
                    .unwrap_or(value),
                other => other
                    .as_f64()
                    .map(|f| MetricValue::Int(f.trunc() as i64))
                    .unwrap_or(value),
            },
            ValueCast::Float => match &value {
                MetricValue::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(MetricValue::Float)
                    .unwrap_or(value),
                other => other.as_f64().map(MetricValue::Float).unwrap_or(value),
            },
            ValueCast::Text => MetricValue::Text(value.to_string()),
        }
    }
}

/// Case normalization for text metric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseNormalization {
    Lower,
    Upper,
}

impl CaseNormalization {
    pub fn apply(&self, value: MetricValue) -> MetricValue {
        match value {
            MetricValue::Text(s) => MetricValue::Text(match self {
                CaseNormalization::Lower => s.to_lowercase(),
                CaseNormalization::Upper => s.to_uppercase(),
            }),
            other => other,
        }
    }
}

/// Maps a primary column onto its comparer counterpart.
///
/// ```rust
/// use term_expect::engine::MetricValue;
/// use term_expect::validators::{CaseNormalization, ColumnMapping, ValueCast};
///
/// let mapping = ColumnMapping::new("code")
///     .with_comparer("CODE")
///     .with_comparer_type(ValueCast::Text)
///     .with_comparer_case(CaseNormalization::Lower);
/// let (p, c) = mapping.convert(MetricValue::from("abc"), MetricValue::from("ABC"));
/// assert_eq!(p, c);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnMapping {
    pub primary: String,
    #[serde(default)]
    pub comparer: Option<String>,
    #[serde(default)]
    pub primary_type: Option<ValueCast>,
    #[serde(default)]
    pub comparer_type: Option<ValueCast>,
    #[serde(default)]
    pub primary_case: Option<CaseNormalization>,
    #[serde(default)]
    pub comparer_case: Option<CaseNormalization>,
}

impl ColumnMapping {
    /// Maps `primary` onto a comparer column of the same name.
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            comparer: None,
            primary_type: None,
            comparer_type: None,
            primary_case: None,
            comparer_case: None,
        }
    }

    pub fn with_comparer(mut self, comparer: impl Into<String>) -> Self {
        self.comparer = Some(comparer.into());
        self
    }

    pub fn with_primary_type(mut self, cast: ValueCast) -> Self {
        self.primary_type = Some(cast);
        self
    }

    pub fn with_comparer_type(mut self, cast: ValueCast) -> Self {
        self.comparer_type = Some(cast);
        self
    }

    pub fn with_primary_case(mut self, case: CaseNormalization) -> Self {
        self.primary_case = Some(case);
        self
    }

    pub fn with_comparer_case(mut self, case: CaseNormalization) -> Self {
        self.comparer_case = Some(case);
        self
    }

    /// Column name on the comparer side.
    pub fn comparer_name(&self) -> &str {
        self.comparer.as_deref().unwrap_or(&self.primary)
    }

    /// Applies type conversion, then case normalization, to each side.
    pub fn convert(
        &self,
        primary: MetricValue,
        comparer: MetricValue,
    ) -> (MetricValue, MetricValue) {
        fn side(
            value: MetricValue,
            cast: Option<ValueCast>,
            case: Option<CaseNormalization>,
        ) -> MetricValue {
            let value = match cast {
                Some(cast) => cast.apply(value),
                None => value,
            };
            match case {
                Some(case) => case.apply(value),
                None => value,
            }
        }
        (
            side(primary, self.primary_type, self.primary_case),
            side(comparer, self.comparer_type, self.comparer_case),
        )
    }

    /// Checks both mapped columns exist on their tables.
    pub async fn validate(
        &self,
        primary_engine: &dyn Engine,
        primary_table: &str,
        comparer_engine: &dyn Engine,
        comparer_table: &str,
    ) -> Result<()> {
        let check = |columns: Vec<String>, column: &str, table: &str| {
            if columns.iter().any(|c| c == column) {
                Ok(())
            } else {
                Err(ExpectError::config(format!(
                    "Column '{column}' not found on table '{table}'"
                )))
            }
        };
        check(
            primary_engine.list_columns(primary_table).await?,
            &self.primary,
            primary_table,
        )?;
        check(
            comparer_engine.list_columns(comparer_table).await?,
            self.comparer_name(),
            comparer_table,
        )
    }
}

/// Where the comparer side of a reconciliation lives.
#[derive(Debug, Clone)]
struct Comparer {
    engine: Arc<dyn Engine>,
    table: String,
    where_condition: Option<String>,
    compiler: BatchCompiler,
}

impl Comparer {
    fn new(engine: Arc<dyn Engine>, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        SqlSecurity::validate_table_name(&table)?;
        Ok(Self {
            engine,
            table,
            where_condition: None,
            compiler: BatchCompiler::default(),
        })
    }

    /// Sets the comparer-side filter, validated for the comparer's dialect.
    fn set_where(&mut self, condition: String) -> Result<()> {
        if condition.trim().is_empty() {
            self.where_condition = None;
            return Ok(());
        }
        filter::validate_for(&condition, self.engine.dialect())?;
        self.where_condition = Some(condition);
        Ok(())
    }

    fn request(&self, column: &str, metric: &str) -> MetricRequest {
        MetricRequest::new(column, metric, metric).with_filter(self.where_condition.clone())
    }

    #[instrument(skip_all, fields(engine = %self.engine.name(), table = %self.table))]
    async fn run(&self, requests: &[MetricRequest]) -> Result<QueryResult> {
        let sql = self
            .compiler
            .compile_sql(&self.table, requests, self.engine.dialect())?;
        debug!("running comparer query");
        self.engine
            .run_sql(&sql)
            .await
            .with_context(|| format!("comparer query on '{}'", self.table))
    }
}

fn to_json_map<'a>(
    values: impl IntoIterator<Item = (&'a str, &'a MetricValue)>,
) -> Map<String, Value> {
    values
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_json()))
        .collect()
}

/// Compares `row_cnt`, `min` and `max` of a column across two engines.
#[derive(Debug, Clone)]
pub struct ColumnReconciliationValidator {
    column: String,
    mapping: ColumnMapping,
    comparer: Comparer,
    common: ValidatorCommon,
}

impl ColumnReconciliationValidator {
    pub const METRICS: [&'static str; 3] = ["row_cnt", "min", "max"];

    /// Creates the validator after checking the mapped columns exist on both sides.
    pub async fn try_new(
        mapping: ColumnMapping,
        primary_engine: &dyn Engine,
        primary_table: &str,
        comparer_engine: Arc<dyn Engine>,
        comparer_table: impl Into<String>,
    ) -> Result<Self> {
        let comparer_table = comparer_table.into();
        mapping
            .validate(
                primary_engine,
                primary_table,
                comparer_engine.as_ref(),
                &comparer_table,
            )
            .await?;
        Ok(Self {
            column: mapping.primary.clone(),
            mapping,
            comparer: Comparer::new(comparer_engine, comparer_table)?,
            common: ValidatorCommon::default(),
        })
    }

    /// Filters rows on the comparer side.
    pub fn with_comparer_where(mut self, condition: impl Into<String>) -> Result<Self> {
        self.comparer.set_where(condition.into())?;
        Ok(self)
    }

    pub fn with_compiler(mut self, compiler: BatchCompiler) -> Self {
        self.comparer.compiler = compiler;
        self
    }

    fn requests(&self, column: &str, filter_sql: Option<&str>) -> Vec<MetricRequest> {
        Self::METRICS
            .iter()
            .map(|metric| {
                let column = if *metric == "row_cnt" { "*" } else { column };
                MetricRequest::new(column, *metric, *metric).with_filter(filter_sql)
            })
            .collect()
    }
}

validator_base!(ColumnReconciliationValidator, "ColumnReconciliationValidator", column);

#[async_trait]
impl CustomValidator for ColumnReconciliationValidator {
    fn custom_sql(&self, _table: &str) -> Result<CustomQuery> {
        Ok(CustomQuery::Metrics(
            self.requests(&self.column, self.common.where_condition.as_deref()),
        ))
    }

    async fn interpret(&self, rows: &QueryResult, diagnostics: &mut Diagnostics) -> Result<bool> {
        let comparer_rows = self
            .comparer
            .run(&self.requests(
                self.mapping.comparer_name(),
                self.comparer.where_condition.as_deref(),
            ))
            .await?;

        let mut primary = Vec::with_capacity(Self::METRICS.len());
        let mut comparer = Vec::with_capacity(Self::METRICS.len());
        for metric in Self::METRICS {
            let (p, c) = self
                .mapping
                .convert(rows.value(0, metric)?, comparer_rows.value(0, metric)?);
            primary.push(p);
            comparer.push(c);
        }

        diagnostics.set(
            "primary",
            to_json_map(Self::METRICS.iter().copied().zip(&primary)),
        );
        diagnostics.set(
            "comparer",
            to_json_map(Self::METRICS.iter().copied().zip(&comparer)),
        );
        let mismatched: Vec<&str> = Self::METRICS
            .iter()
            .zip(primary.iter().zip(&comparer))
            .filter(|(_, (p, c))| !p.same_as(c))
            .map(|(metric, _)| *metric)
            .collect();
        if !mismatched.is_empty() {
            diagnostics.set("mismatched", &mismatched);
        }
        Ok(mismatched.is_empty())
    }
}

/// Compares table row counts across two engines.
#[derive(Debug, Clone)]
pub struct TableReconciliationValidator {
    comparer: Comparer,
    common: ValidatorCommon,
}

impl TableReconciliationValidator {
    pub fn new(
        comparer_engine: Arc<dyn Engine>,
        comparer_table: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            comparer: Comparer::new(comparer_engine, comparer_table)?,
            common: ValidatorCommon::default(),
        })
    }

    pub fn with_comparer_where(mut self, condition: impl Into<String>) -> Result<Self> {
        self.comparer.set_where(condition.into())?;
        Ok(self)
    }
}

validator_base!(TableReconciliationValidator, "TableReconciliationValidator");

/// Row count from a `row_cnt` result; an empty result counts as zero rows.
fn row_count(rows: &QueryResult) -> Result<i64> {
    if rows.is_empty() {
        return Ok(0);
    }
    rows.value(0, "row_cnt")?
        .as_i64()
        .ok_or_else(|| ExpectError::engine_execution("row_cnt is not an integer"))
}

#[async_trait]
impl CustomValidator for TableReconciliationValidator {
    fn custom_sql(&self, _table: &str) -> Result<CustomQuery> {
        Ok(CustomQuery::Metrics(vec![MetricRequest::new(
            "*", "row_cnt", "row_cnt",
        )
        .with_filter(self.common.where_condition.clone())]))
    }

    async fn interpret(&self, rows: &QueryResult, diagnostics: &mut Diagnostics) -> Result<bool> {
        let primary = row_count(rows)?;
        let comparer_rows = self
            .comparer
            .run(&[self.comparer.request("*", "row_cnt")])
            .await?;
        let comparer = row_count(&comparer_rows)?;
        diagnostics.set("primary", primary);
        diagnostics.set("comparer", comparer);
        Ok(primary == comparer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DataFusionEngine;
    use crate::metrics::MetricRegistry;
    use crate::test_helpers::{orders_batch, orders_engine};
    use crate::validators::ValidatorBase;
    use datafusion::prelude::SessionContext;

    async fn run_primary(engine: &dyn Engine, validator: &dyn CustomValidator) -> QueryResult {
        let CustomQuery::Metrics(requests) = validator.custom_sql("orders").unwrap() else {
            panic!("expected metric requests");
        };
        let compiler = BatchCompiler::new(MetricRegistry::global());
        let sql = compiler
            .compile_sql("orders", &requests, engine.dialect())
            .unwrap();
        engine.run_sql(&sql).await.unwrap()
    }

    async fn comparer_with(table: &str) -> Arc<dyn Engine> {
        let engine = DataFusionEngine::with_pool_size(SessionContext::new(), 1)
            .unwrap()
            .with_name("comparer");
        engine
            .register_batches(table, vec![orders_batch()])
            .await
            .unwrap();
        Arc::new(engine)
    }

    #[test]
    fn test_value_casts() {
        assert_eq!(ValueCast::Int.apply(MetricValue::Float(3.9)), MetricValue::Int(3));
        assert_eq!(ValueCast::Int.apply(MetricValue::from(" 12 ")), MetricValue::Int(12));
        assert_eq!(ValueCast::Float.apply(MetricValue::from("2.5")), MetricValue::Float(2.5));
        assert_eq!(ValueCast::Text.apply(MetricValue::Int(7)), MetricValue::from("7"));
        assert_eq!(ValueCast::Text.apply(MetricValue::Null), MetricValue::Null);
        assert_eq!(
            CaseNormalization::Upper.apply(MetricValue::from("ab")),
            MetricValue::from("AB")
        );
    }

    #[tokio::test]
    async fn test_mapping_validated_on_both_engines() {
        let primary = orders_engine().await;
        let comparer = comparer_with("orders_copy").await;

        assert!(ColumnMapping::new("amount")
            .validate(&primary, "orders", comparer.as_ref(), "orders_copy")
            .await
            .is_ok());

        let err = ColumnMapping::new("amount")
            .with_comparer("total")
            .validate(&primary, "orders", comparer.as_ref(), "orders_copy")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'total' not found on table 'orders_copy'"));

        assert!(ColumnReconciliationValidator::try_new(
            ColumnMapping::new("missing"),
            &primary,
            "orders",
            comparer,
            "orders_copy",
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_column_reconciliation_matches() {
        let primary = orders_engine().await;
        let validator = ColumnReconciliationValidator::try_new(
            ColumnMapping::new("amount"),
            &primary,
            "orders",
            comparer_with("orders_copy").await,
            "orders_copy",
        )
        .await
        .unwrap();

        let rows = run_primary(&primary, &validator).await;
        let mut diagnostics = Diagnostics::new();
        assert!(validator.interpret(&rows, &mut diagnostics).await.unwrap());
        assert_eq!(diagnostics.get("primary"), diagnostics.get("comparer"));
        assert_eq!(diagnostics.get("primary").unwrap()["row_cnt"], serde_json::json!(5));
    }

    #[tokio::test]
    async fn test_column_reconciliation_detects_filtered_difference() {
        let primary = orders_engine().await;
        let validator = ColumnReconciliationValidator::try_new(
            ColumnMapping::new("amount"),
            &primary,
            "orders",
            comparer_with("orders_copy").await,
            "orders_copy",
        )
        .await
        .unwrap()
        .with_comparer_where("amount < 30")
        .unwrap();

        let rows = run_primary(&primary, &validator).await;
        let mut diagnostics = Diagnostics::new();
        assert!(!validator.interpret(&rows, &mut diagnostics).await.unwrap());
        assert_eq!(
            diagnostics.get("mismatched"),
            Some(&serde_json::json!(["row_cnt", "max"]))
        );
    }

    #[tokio::test]
    async fn test_table_reconciliation() {
        let primary = orders_engine().await;
        let comparer = comparer_with("orders_copy").await;

        let same = TableReconciliationValidator::new(Arc::clone(&comparer), "orders_copy").unwrap();
        let rows = run_primary(&primary, &same).await;
        let mut diagnostics = Diagnostics::new();
        assert!(same.interpret(&rows, &mut diagnostics).await.unwrap());

        let filtered = TableReconciliationValidator::new(comparer, "orders_copy")
            .unwrap()
            .with_where("status = 'open'");
        let rows = run_primary(&primary, &filtered).await;
        let mut diagnostics = Diagnostics::new();
        assert!(!filtered.interpret(&rows, &mut diagnostics).await.unwrap());
        assert_eq!(diagnostics.get("primary"), Some(&serde_json::json!(2)));
        assert_eq!(diagnostics.get("comparer"), Some(&serde_json::json!(5)));
    }

    #[tokio::test]
    async fn test_invalid_comparer_where_rejected() {
        let comparer = comparer_with("orders_copy").await;
        assert!(TableReconciliationValidator::new(comparer, "orders_copy")
            .unwrap()
            .with_comparer_where("1; DROP TABLE orders")
            .is_err());
    }
}
