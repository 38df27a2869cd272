//! Built-in metric builders.
//!
//! | key | expression |
//! |-----|------------|
//! | `null_pct` | `CAST(SUM(CASE WHEN c IS NULL THEN 1 ELSE 0 END) AS DOUBLE) / NULLIF(COUNT(*), 0)` |
//! | `distinct_cnt` | `COUNT(DISTINCT c)` |
//! | `row_cnt` | `COUNT(*)` |
//! | `duplicate_cnt` | `COUNT(*) - COUNT(DISTINCT c)` |
//! | `duplicate_row_cnt` | `COUNT(*) - COUNT(DISTINCT (a, b, ...))` |
//! | `min` / `max` / `avg` | `MIN(c)` / `MAX(c)` / `AVG(c)` |
//! | `non_null_cnt` | `COUNT(c)` |
//! | `stddev` | `STDDEV_SAMP(c)` |
//! | `pct_<n>` | `PERCENTILE_CONT(n / 100) WITHIN GROUP (ORDER BY c)` |
//! | `set_overlap_pct` | non-null in both / non-null in either, over `"a,b"` |
//! | `missing_values_cnt` | rows where `a` is NULL and `b` is not |
//! | `extra_values_cnt` | rows where `a` is not NULL and `b` is |

use std::sync::Arc;

use super::registry::MetricBuilder;
use crate::error::{ExpectError, Result};
use crate::security::{InputValidator, SqlSecurity};
use crate::sql::expr::{
    aggregate, case_when, case_when_else, col, count_star, function, lit_int, null,
};
use crate::sql::{filter, AggregateFunction, Expression, ScalarFunction};

/// Percentiles registered at start-up.
pub const DEFAULT_PERCENTILES: [f64; 6] = [0.25, 0.5, 0.75, 0.9, 0.95, 0.99];

fn metric<F>(name: &str, builder: F) -> (String, MetricBuilder)
where
    F: Fn(&str) -> Result<Expression> + Send + Sync + 'static,
{
    (name.to_string(), Arc::new(builder))
}

pub(crate) fn builtin_metrics() -> Vec<(String, MetricBuilder)> {
    let mut metrics = vec![
        metric("null_pct", null_pct),
        metric("distinct_cnt", distinct_cnt),
        metric("row_cnt", |_| Ok(row_cnt())),
        metric("duplicate_cnt", duplicate_cnt),
        metric("duplicate_row_cnt", duplicate_row_cnt),
        metric("min", |c| simple(AggregateFunction::Min, c)),
        metric("max", |c| simple(AggregateFunction::Max, c)),
        metric("non_null_cnt", |c| simple(AggregateFunction::Count, c)),
        metric("avg", |c| simple(AggregateFunction::Avg, c)),
        metric("stddev", |c| simple(AggregateFunction::StddevSamp, c)),
        metric("set_overlap_pct", |c| set_overlap_pct(c, None)),
        metric("missing_values_cnt", |c| missing_values_cnt(c, None)),
        metric("extra_values_cnt", |c| extra_values_cnt(c, None)),
    ];
    for q in DEFAULT_PERCENTILES {
        if let Ok(name) = percentile_key(q) {
            metrics.push(metric(&name, move |c| percentile(c, q)));
        }
    }
    metrics
}

fn column(name: &str) -> Result<Expression> {
    let name = name.trim();
    SqlSecurity::validate_identifier(name)?;
    Ok(col(name))
}

fn simple(func: AggregateFunction, name: &str) -> Result<Expression> {
    Ok(aggregate(func, column(name)?))
}

/// `CAST(numerator AS DOUBLE) / NULLIF(denominator, 0)`.
fn ratio(numerator: Expression, denominator: Expression) -> Expression {
    numerator.cast_double().divide(function(
        ScalarFunction::NullIf,
        vec![denominator, lit_int(0)],
    ))
}

fn coalesce_zero(expr: Expression) -> Expression {
    function(ScalarFunction::Coalesce, vec![expr, lit_int(0)])
}

/// Fraction of NULL values in `name`; NULL for an empty table.
pub fn null_pct(name: &str) -> Result<Expression> {
    let nulls = aggregate(
        AggregateFunction::Sum,
        case_when_else(column(name)?.is_null(), lit_int(1), lit_int(0)),
    );
    Ok(ratio(nulls, count_star()))
}

pub fn distinct_cnt(name: &str) -> Result<Expression> {
    simple(AggregateFunction::CountDistinct, name)
}

pub fn row_cnt() -> Expression {
    count_star()
}

pub fn duplicate_cnt(name: &str) -> Result<Expression> {
    Ok(row_cnt().minus(distinct_cnt(name)?))
}

/// Rows beyond the first of every distinct key over comma-separated `columns`.
pub fn duplicate_row_cnt(columns: &str) -> Result<Expression> {
    let mut keys = columns
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(column)
        .collect::<Result<Vec<_>>>()?;
    let distinct_arg = if keys.len() > 1 {
        Expression::Tuple(keys)
    } else {
        keys.pop()
            .ok_or_else(|| ExpectError::config("duplicate_row_cnt requires at least one column"))?
    };
    Ok(row_cnt().minus(aggregate(AggregateFunction::CountDistinct, distinct_arg)))
}

/// Metric key for quantile `q`.
pub fn percentile_key(q: f64) -> Result<String> {
    InputValidator::validate_percentage(q, "percentile")?;
    let scaled = (q * 100.0 * 1e6).round() / 1e6;
    if scaled.fract() == 0.0 {
        Ok(format!("pct_{}", scaled as i64))
    } else {
        Ok(format!("pct_{}", scaled.to_string().replace('.', "_")))
    }
}

/// Continuous percentile of `name` at quantile `q`.
pub fn percentile(name: &str, q: f64) -> Result<Expression> {
    InputValidator::validate_percentage(q, "percentile")?;
    Ok(Expression::Percentile {
        quantile: q,
        expr: Box::new(column(name)?),
    })
}

/// Builder measuring the fraction of rows where `predicate` holds.
///
/// The predicate is validated once, here; the builder ignores its column.
pub fn pct_where(predicate: &str) -> Result<MetricBuilder> {
    let condition = filter::validate(predicate)?;
    Ok(Arc::new(move |_: &str| {
        let matches = aggregate(
            AggregateFunction::Sum,
            case_when_else(condition.clone(), lit_int(1), lit_int(0)),
        );
        Ok(ratio(matches, count_star()))
    }))
}

/// Normalizes either two names or one `"a,b"` string into exactly two column names.
pub fn resolve_pair(first: &str, second: Option<&str>) -> Result<(String, String)> {
    let (a, b) = match second {
        Some(second) => (first.trim().to_string(), second.trim().to_string()),
        None => {
            let parts: Vec<&str> = first.split(',').map(str::trim).collect();
            match parts.as_slice() {
                [a, b] => (a.to_string(), b.to_string()),
                _ => {
                    return Err(ExpectError::config(format!(
                        "expected two column names separated by a comma, got '{first}'"
                    )))
                }
            }
        }
    };
    SqlSecurity::validate_identifier(&a)?;
    SqlSecurity::validate_identifier(&b)?;
    Ok((a, b))
}

fn conditional_count(cond: Expression) -> Expression {
    aggregate(AggregateFunction::Sum, case_when(cond, lit_int(1)))
}

/// Rows with both columns non-NULL over rows with either non-NULL; NULL when neither ever is.
pub fn set_overlap_pct(first: &str, second: Option<&str>) -> Result<Expression> {
    let (a, b) = resolve_pair(first, second)?;
    let both = conditional_count(col(&a).is_not_null().and(col(&b).is_not_null()));
    let either = coalesce_zero(conditional_count(
        col(&a).is_not_null().or(col(&b).is_not_null()),
    ));
    Ok(case_when_else(
        either.clone().eq(lit_int(0)),
        null(),
        ratio(coalesce_zero(both), either),
    ))
}

/// Rows where the first column is NULL while the second is not.
pub fn missing_values_cnt(first: &str, second: Option<&str>) -> Result<Expression> {
    let (a, b) = resolve_pair(first, second)?;
    Ok(coalesce_zero(conditional_count(
        col(a).is_null().and(col(b).is_not_null()),
    )))
}

/// Rows where the first column is non-NULL while the second is NULL.
pub fn extra_values_cnt(first: &str, second: Option<&str>) -> Result<Expression> {
    let (a, b) = resolve_pair(first, second)?;
    Ok(coalesce_zero(conditional_count(
        col(a).is_not_null().and(col(b).is_null()),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Dialect;

    #[test]
    fn test_null_pct_expression() {
        assert_eq!(
            null_pct("a").unwrap().render(Dialect::DuckDb),
            "CAST(SUM(CASE WHEN \"a\" IS NULL THEN 1 ELSE 0 END) AS DOUBLE) / NULLIF(COUNT(*), 0)"
        );
    }

    #[test]
    fn test_duplicate_row_cnt() {
        assert_eq!(
            duplicate_row_cnt("a, b").unwrap().render(Dialect::Postgres),
            "COUNT(*) - COUNT(DISTINCT (\"a\", \"b\"))"
        );
        assert_eq!(
            duplicate_row_cnt("a").unwrap().render(Dialect::Ansi),
            "COUNT(*) - COUNT(DISTINCT \"a\")"
        );
        assert!(duplicate_row_cnt(" , ").is_err());
    }

    #[test]
    fn test_percentile_keys() {
        assert_eq!(percentile_key(0.25).unwrap(), "pct_25");
        assert_eq!(percentile_key(0.29).unwrap(), "pct_29");
        assert_eq!(percentile_key(0.255).unwrap(), "pct_25_5");
        assert!(percentile_key(-0.1).is_err());
        assert!(percentile_key(f64::NAN).is_err());
    }

    #[test]
    fn test_resolve_pair() {
        assert_eq!(
            resolve_pair("a, b", None).unwrap(),
            ("a".to_string(), "b".to_string())
        );
        assert_eq!(
            resolve_pair("a", Some("b")).unwrap(),
            ("a".to_string(), "b".to_string())
        );
        assert!(matches!(
            resolve_pair("a", None),
            Err(ExpectError::ValidationConfig(_))
        ));
        assert!(matches!(
            resolve_pair("a,b,c", None),
            Err(ExpectError::ValidationConfig(_))
        ));
    }

    #[test]
    fn test_set_metric_shapes() {
        assert_eq!(
            missing_values_cnt("expected,actual", None)
                .unwrap()
                .render(Dialect::Ansi),
            "COALESCE(SUM(CASE WHEN (\"expected\" IS NULL) AND (\"actual\" IS NOT NULL) THEN 1 END), 0)"
        );
        let overlap = set_overlap_pct("a", Some("b")).unwrap().render(Dialect::Ansi);
        assert!(overlap.starts_with("CASE WHEN COALESCE(SUM("));
        assert!(overlap.contains("ELSE CAST(COALESCE("));
    }

    #[test]
    fn test_column_names_are_validated() {
        assert!(null_pct("").is_err());
        assert!(null_pct("a\0b").is_err());
    }
}
