//! Compiles many metric requests against one table into a single SELECT.
//!
//! Each request contributes one aliased projection. When a request carries a
//! row filter, its aggregates are rewritten so that only matching rows
//! contribute:
//!
//! - `COUNT(*)` becomes `COALESCE(SUM(CASE WHEN f THEN 1 END), 0)`
//! - `COUNT(x)` becomes `COUNT(CASE WHEN f THEN x END)`
//! - `COUNT(DISTINCT x)` becomes `COUNT(DISTINCT CASE WHEN f THEN x END)`
//! - `SUM`, `MIN`, `MAX`, `AVG`, `STDDEV_SAMP` and percentiles are applied to
//!   `CASE WHEN f THEN x END`
//! - composite expressions are rewritten aggregate by aggregate
//! - an expression without aggregates becomes `SUM(CASE WHEN f THEN expr END)`

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::registry::MetricRegistry;
use crate::error::{ExpectError, Result};
use crate::sql::expr::{aggregate, case_when, function, lit_int};
use crate::sql::{filter, AggregateFunction, Dialect, Expression, ScalarFunction, SelectQuery};

/// One metric to compute inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRequest {
    column: String,
    metric: String,
    alias: String,
    filter_sql: Option<String>,
}

impl MetricRequest {
    pub fn new(
        column: impl Into<String>,
        metric: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            metric: metric.into(),
            alias: alias.into(),
            filter_sql: None,
        }
    }

    /// Attaches a row filter; blank text means no filter.
    pub fn with_filter(mut self, filter_sql: Option<impl Into<String>>) -> Self {
        self.filter_sql = filter_sql
            .map(Into::into)
            .filter(|f: &String| !f.trim().is_empty());
        self
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn filter_sql(&self) -> Option<&str> {
        self.filter_sql.as_deref()
    }
}

/// Compiles metric requests into batched queries.
#[derive(Debug, Clone)]
pub struct BatchCompiler {
    registry: Arc<MetricRegistry>,
}

impl Default for BatchCompiler {
    fn default() -> Self {
        Self::new(MetricRegistry::global())
    }
}

impl BatchCompiler {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Compiles `requests` into one SELECT over `table`.
    ///
    /// Fails before building anything if any metric key is unknown (all
    /// unknown keys are reported together) or an alias repeats.
    #[instrument(skip_all, fields(table = %table, requests = requests.len(), dialect = %dialect))]
    pub fn compile(
        &self,
        table: &str,
        requests: &[MetricRequest],
        dialect: Dialect,
    ) -> Result<SelectQuery> {
        if requests.is_empty() {
            return Err(ExpectError::config(format!(
                "no metric requests to compile for table '{table}'"
            )));
        }

        let missing = self.registry.missing(requests.iter().map(|r| r.metric()));
        if !missing.is_empty() {
            return Err(ExpectError::UnknownMetric {
                names: missing,
                available: self.registry.available(),
            });
        }

        let compiled = requests
            .iter()
            .map(|request| {
                let expr = self.compile_request(request, dialect)?;
                Ok((request.alias().to_string(), expr))
            })
            .collect::<Result<Vec<_>>>()?;
        let query = Self::project(table, compiled)?;
        debug!(projections = query.projections.len(), "compiled metric batch");
        Ok(query)
    }

    /// Projects already compiled expressions over `table`, in the given order.
    ///
    /// Fails when an alias repeats.
    pub fn project(table: &str, compiled: Vec<(String, Expression)>) -> Result<SelectQuery> {
        let mut seen = HashSet::with_capacity(compiled.len());
        for (alias, _) in &compiled {
            if !seen.insert(alias.as_str()) {
                return Err(ExpectError::config(format!(
                    "duplicate alias '{alias}' in batch for table '{table}'"
                )));
            }
        }

        Ok(compiled
            .into_iter()
            .fold(SelectQuery::new(table), |query, (alias, expr)| {
                query.project(expr.alias(alias))
            }))
    }

    /// Builds the (filtered, unaliased) expression for a single request.
    pub fn compile_request(&self, request: &MetricRequest, dialect: Dialect) -> Result<Expression> {
        let builder = self.registry.get(request.metric())?;
        let raw = builder(request.column())?;
        match request.filter_sql() {
            Some(text) => {
                let condition = filter::validate_for(text, dialect)?;
                Ok(apply_filter(raw, &condition))
            }
            None => Ok(raw),
        }
    }

    /// Compiles and renders in one step.
    pub fn compile_sql(
        &self,
        table: &str,
        requests: &[MetricRequest],
        dialect: Dialect,
    ) -> Result<String> {
        Ok(self.compile(table, requests, dialect)?.render(dialect))
    }
}

/// Restricts `expr` to rows where `condition` holds.
pub fn apply_filter(expr: Expression, condition: &Expression) -> Expression {
    if expr.contains_aggregate() {
        rewrite(expr, condition)
    } else {
        aggregate(AggregateFunction::Sum, case_when(condition.clone(), expr))
    }
}

fn rewrite(expr: Expression, condition: &Expression) -> Expression {
    let gate = |inner: Expression| case_when(condition.clone(), inner);
    let recurse = |inner: Box<Expression>| Box::new(rewrite(*inner, condition));

    match expr {
        Expression::Aggregate {
            func: AggregateFunction::Count,
            arg,
        } if matches!(arg.as_ref(), Expression::Star) => function(
            ScalarFunction::Coalesce,
            vec![
                aggregate(AggregateFunction::Sum, gate(lit_int(1))),
                lit_int(0),
            ],
        ),
        Expression::Aggregate { func, arg } => aggregate(func, gate(*arg)),
        Expression::Percentile { quantile, expr } => Expression::Percentile {
            quantile,
            expr: Box::new(gate(*expr)),
        },
        Expression::Binary { left, op, right } => Expression::Binary {
            left: recurse(left),
            op,
            right: recurse(right),
        },
        Expression::Not(inner) => Expression::Not(recurse(inner)),
        Expression::IsNull { expr, negated } => Expression::IsNull {
            expr: recurse(expr),
            negated,
        },
        Expression::Cast { expr, to } => Expression::Cast {
            expr: recurse(expr),
            to,
        },
        Expression::Alias { expr, alias } => Expression::Alias {
            expr: recurse(expr),
            alias,
        },
        Expression::Case {
            branches,
            otherwise,
        } => Expression::Case {
            branches: branches
                .into_iter()
                .map(|(c, v)| (rewrite(c, condition), rewrite(v, condition)))
                .collect(),
            otherwise: otherwise.map(recurse),
        },
        Expression::Function { func, args } => Expression::Function {
            func,
            args: args.into_iter().map(|a| rewrite(a, condition)).collect(),
        },
        Expression::Tuple(items) => {
            Expression::Tuple(items.into_iter().map(|a| rewrite(a, condition)).collect())
        }
        leaf @ (Expression::Column(_)
        | Expression::Star
        | Expression::Literal(_)
        | Expression::Predicate(_)) => leaf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> BatchCompiler {
        BatchCompiler::new(Arc::new(MetricRegistry::with_builtins()))
    }

    #[test]
    fn test_compile_preserves_request_order() {
        let requests = vec![
            MetricRequest::new("a", "max", "v2"),
            MetricRequest::new("*", "row_cnt", "v1"),
            MetricRequest::new("a", "distinct_cnt", "v3"),
        ];
        let query = compiler().compile("t", &requests, Dialect::Ansi).unwrap();

        assert_eq!(query.aliases(), vec!["v2", "v1", "v3"]);
        assert_eq!(
            query.render(Dialect::Ansi),
            "SELECT MAX(\"a\") AS \"v2\", COUNT(*) AS \"v1\", COUNT(DISTINCT \"a\") AS \"v3\" FROM \"t\""
        );
    }

    #[test]
    fn test_unknown_metrics_reported_together() {
        let requests = vec![
            MetricRequest::new("a", "foo", "m0"),
            MetricRequest::new("a", "max", "m1"),
            MetricRequest::new("a", "bar", "m2"),
        ];
        match compiler().compile("t", &requests, Dialect::Ansi) {
            Err(ExpectError::UnknownMetric { names, available }) => {
                assert_eq!(names, vec!["foo".to_string(), "bar".to_string()]);
                assert!(available.contains(&"max".to_string()));
            }
            other => panic!("expected unknown metric error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let requests = vec![
            MetricRequest::new("a", "max", "m"),
            MetricRequest::new("a", "min", "m"),
        ];
        assert!(matches!(
            compiler().compile("t", &requests, Dialect::Ansi),
            Err(ExpectError::ValidationConfig(_))
        ));
    }

    #[test]
    fn test_project_keeps_compiled_expressions() {
        let c = compiler();
        let request = MetricRequest::new("a", "max", "m1").with_filter(Some("b < 5"));
        let compiled = vec![
            (
                "m1".to_string(),
                c.compile_request(&request, Dialect::Ansi).unwrap(),
            ),
            ("m0".to_string(), aggregate(AggregateFunction::Count, Expression::Star)),
        ];
        let query = BatchCompiler::project("t", compiled).unwrap();
        assert_eq!(
            query.render(Dialect::Ansi),
            "SELECT MAX(CASE WHEN (b < 5) THEN \"a\" END) AS \"m1\", COUNT(*) AS \"m0\" FROM \"t\""
        );

        let repeated = vec![
            ("m".to_string(), lit_int(1)),
            ("m".to_string(), lit_int(2)),
        ];
        assert!(matches!(
            BatchCompiler::project("t", repeated),
            Err(ExpectError::ValidationConfig(_))
        ));
    }

    #[test]
    fn test_filtered_count_star() {
        let request = MetricRequest::new("*", "row_cnt", "m").with_filter(Some("b = 1"));
        let expr = compiler().compile_request(&request, Dialect::Ansi).unwrap();
        assert_eq!(
            expr.render(Dialect::Ansi),
            "COALESCE(SUM(CASE WHEN (b = 1) THEN 1 END), 0)"
        );
    }

    #[test]
    fn test_filtered_distinct_and_max() {
        let c = compiler();
        let distinct = MetricRequest::new("a", "distinct_cnt", "m").with_filter(Some("b < 5"));
        assert_eq!(
            c.compile_request(&distinct, Dialect::Ansi)
                .unwrap()
                .render(Dialect::Ansi),
            "COUNT(DISTINCT CASE WHEN (b < 5) THEN \"a\" END)"
        );

        let max = MetricRequest::new("a", "max", "m").with_filter(Some("b < 5"));
        assert_eq!(
            c.compile_request(&max, Dialect::Ansi)
                .unwrap()
                .render(Dialect::Ansi),
            "MAX(CASE WHEN (b < 5) THEN \"a\" END)"
        );
    }

    #[test]
    fn test_filtered_composite_metric() {
        let request = MetricRequest::new("a", "null_pct", "m").with_filter(Some("b = 1"));
        assert_eq!(
            compiler()
                .compile_request(&request, Dialect::DuckDb)
                .unwrap()
                .render(Dialect::DuckDb),
            "CAST(SUM(CASE WHEN (b = 1) THEN CASE WHEN \"a\" IS NULL THEN 1 ELSE 0 END END) AS DOUBLE) \
             / NULLIF(COALESCE(SUM(CASE WHEN (b = 1) THEN 1 END), 0), 0)"
        );
    }

    #[test]
    fn test_non_aggregate_fallback() {
        let condition = filter::validate("b = 1").unwrap();
        let rewritten = apply_filter(lit_int(1), &condition);
        assert_eq!(
            rewritten.render(Dialect::Ansi),
            "SUM(CASE WHEN (b = 1) THEN 1 END)"
        );
    }

    #[test]
    fn test_blank_filter_is_ignored() {
        let request = MetricRequest::new("a", "max", "m").with_filter(Some("   "));
        assert_eq!(request.filter_sql(), None);
    }

    #[test]
    fn test_unsafe_filter_fails_compilation() {
        let request = MetricRequest::new("a", "max", "m").with_filter(Some("1; DROP TABLE x"));
        assert!(matches!(
            compiler().compile("t", &[request], Dialect::Ansi),
            Err(ExpectError::ValidationConfig(_))
        ));
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(compiler().compile("t", &[], Dialect::Ansi).is_err());
    }
}
