//! Process-wide registry mapping metric keys to expression builders.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::{debug, instrument};

use super::builtins;
use crate::error::{ExpectError, Result};
use crate::sql::Expression;

/// Builds a metric expression for a column (or comma-joined column pair, or `*`).
pub type MetricBuilder = Arc<dyn Fn(&str) -> Result<Expression> + Send + Sync>;

static GLOBAL_REGISTRY: Lazy<Arc<MetricRegistry>> =
    Lazy::new(|| Arc::new(MetricRegistry::with_builtins()));

/// Append-only, lock-guarded map of metric builders.
///
/// Registrations never overwrite: a second `register` under an existing key
/// fails with [`ExpectError::DuplicateMetric`]. Reads return owned snapshots.
pub struct MetricRegistry {
    metrics: RwLock<BTreeMap<String, MetricBuilder>>,
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("metrics", &self.available())
            .finish()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl MetricRegistry {
    /// Creates a registry with no metrics.
    pub fn empty() -> Self {
        Self {
            metrics: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a registry pre-populated with the built-in metrics.
    pub fn with_builtins() -> Self {
        let metrics = builtins::builtin_metrics()
            .into_iter()
            .map(|(name, builder)| (name.to_string(), builder))
            .collect();
        Self {
            metrics: RwLock::new(metrics),
        }
    }

    /// The shared process-wide registry, built on first access.
    pub fn global() -> Arc<MetricRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Registers `builder` under `name`.
    #[instrument(skip(self, builder))]
    pub fn register(&self, name: &str, builder: MetricBuilder) -> Result<()> {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        if metrics.contains_key(name) {
            return Err(ExpectError::DuplicateMetric(name.to_string()));
        }
        metrics.insert(name.to_string(), builder);
        debug!(metric = name, "registered metric");
        Ok(())
    }

    /// Registers `builder` unless `name` exists; returns whichever builder is stored.
    pub fn get_or_register(&self, name: &str, builder: MetricBuilder) -> MetricBuilder {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(metrics.entry(name.to_string()).or_insert(builder))
    }

    /// Looks up the builder for `name`.
    pub fn get(&self, name: &str) -> Result<MetricBuilder> {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        metrics
            .get(name)
            .cloned()
            .ok_or_else(|| ExpectError::UnknownMetric {
                names: vec![name.to_string()],
                available: metrics.keys().cloned().collect(),
            })
    }

    /// Returns every name in `names` that is not registered, deduplicated, in input order.
    pub fn missing<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        let mut missing: Vec<String> = Vec::new();
        for name in names {
            if !metrics.contains_key(name) && !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
        }
        missing
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Sorted snapshot of the registered keys.
    pub fn available(&self) -> Vec<String> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Registers a percentile metric for quantile `q` (0..=1), reusing an existing one.
    ///
    /// The key is `pct_<q*100>`, e.g. `pct_90`; fractional percents use an
    /// underscore, e.g. `pct_99_9`.
    pub fn register_percentile(&self, q: f64) -> Result<(String, MetricBuilder)> {
        let name = builtins::percentile_key(q)?;
        let builder: MetricBuilder = Arc::new(move |column: &str| builtins::percentile(column, q));
        let stored = self.get_or_register(&name, builder);
        Ok((name, stored))
    }

    /// Registers a metric under `name` measuring the fraction of rows where `predicate` holds.
    pub fn register_pct_where(&self, name: &str, predicate: &str) -> Result<MetricBuilder> {
        let builder = builtins::pct_where(predicate)?;
        self.register(name, Arc::clone(&builder))?;
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Dialect;

    #[test]
    fn test_builtins_are_available() {
        let registry = MetricRegistry::with_builtins();
        for key in [
            "null_pct",
            "distinct_cnt",
            "row_cnt",
            "duplicate_cnt",
            "duplicate_row_cnt",
            "min",
            "max",
            "non_null_cnt",
            "avg",
            "stddev",
            "pct_50",
            "pct_99",
            "set_overlap_pct",
            "missing_values_cnt",
            "extra_values_cnt",
        ] {
            assert!(registry.contains(key), "missing builtin {key}");
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = MetricRegistry::with_builtins();
        let before = registry.available();

        let builder: MetricBuilder = Arc::new(|_: &str| Ok(crate::sql::expr::count_star()));
        let err = registry.register("row_cnt", builder).unwrap_err();

        assert!(matches!(err, ExpectError::DuplicateMetric(ref name) if name == "row_cnt"));
        assert_eq!(registry.available(), before);
    }

    #[test]
    fn test_unknown_metric_lists_available() {
        let registry = MetricRegistry::empty();
        registry
            .register("row_cnt", Arc::new(|_: &str| Ok(crate::sql::expr::count_star())))
            .unwrap();

        match registry.get("nope") {
            Err(ExpectError::UnknownMetric { names, available }) => {
                assert_eq!(names, vec!["nope".to_string()]);
                assert_eq!(available, vec!["row_cnt".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn test_register_percentile_is_idempotent() {
        let registry = MetricRegistry::with_builtins();
        let (name, _) = registry.register_percentile(0.9).unwrap();
        assert_eq!(name, "pct_90");

        let (custom, _) = registry.register_percentile(0.999).unwrap();
        assert_eq!(custom, "pct_99_9");
        let count = registry.available().len();
        registry.register_percentile(0.999).unwrap();
        assert_eq!(registry.available().len(), count);

        assert!(registry.register_percentile(1.5).is_err());
    }

    #[test]
    fn test_register_pct_where() {
        let registry = MetricRegistry::empty();
        registry.register_pct_where("b_is_one_pct", "b = 1").unwrap();

        let expr = registry.get("b_is_one_pct").unwrap()("a").unwrap();
        assert_eq!(
            expr.render(Dialect::Ansi),
            "CAST(SUM(CASE WHEN (b = 1) THEN 1 ELSE 0 END) AS DOUBLE PRECISION) / NULLIF(COUNT(*), 0)"
        );

        assert!(registry.register_pct_where("bad", "1; DROP TABLE x").is_err());
        assert!(!registry.contains("bad"));
    }

    #[test]
    fn test_missing_is_deduplicated() {
        let registry = MetricRegistry::with_builtins();
        assert_eq!(
            registry.missing(["row_cnt", "foo", "bar", "foo"]),
            vec!["foo".to_string(), "bar".to_string()]
        );
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = MetricRegistry::global();
        let b = MetricRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.contains("null_pct"));
    }
}
