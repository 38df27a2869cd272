//! Execution runner.
//!
//! [`ValidationRunner::run`] partitions validators into metric groups keyed by
//! `(engine, table)` and individual custom validators. Each metric group is
//! compiled into one batched query. Groups and custom validators run one after
//! another; a failure in one never affects another.
//!
//! Compile-time mistakes (unknown metrics, unsafe filters) can be surfaced
//! before anything runs with [`ValidationRunner::plan`]. Inside `run` they are
//! recorded on the affected validator's result like execution errors.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::config::{ExpectationSuiteConfig, SlaConfig, ValidatorFactory};
use crate::engine::{Engine, QueryResult};
use crate::error::{ExpectError, Result};
use crate::logging::LogConfig;
use crate::metrics::{BatchCompiler, MetricRequest};
use crate::sql::Expression;
use crate::result::{RunMetadata, RunReport, ValidationResult};
use crate::stats::schema_of;
use crate::validators::{
    CustomQuery, CustomValidator, Diagnostics, MetricValidator, Validator, ValidatorBase,
};

/// A validator bound to the engine and table it checks.
#[derive(Debug)]
pub struct ValidatorBinding {
    pub engine_key: String,
    pub table: String,
    pub validator: Validator,
}

impl ValidatorBinding {
    pub fn new(
        engine_key: impl Into<String>,
        table: impl Into<String>,
        validator: Validator,
    ) -> Self {
        Self {
            engine_key: engine_key.into(),
            table: table.into(),
            validator,
        }
    }
}

/// One query `run` would issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub engine_key: String,
    pub table: String,
    pub sql: String,
    /// Runtime ids of the validators answered by this query.
    pub validators: Vec<String>,
}

/// Validators that share one batched query, by binding index.
struct MetricGroup<'a> {
    engine_key: &'a str,
    table: &'a str,
    members: Vec<(usize, &'a dyn MetricValidator)>,
}

/// A custom validator with its binding index.
type CustomEntry<'a> = (usize, &'a ValidatorBinding, &'a dyn CustomValidator);

/// Partitions bindings into metric groups (in first-seen order) and custom validators.
fn partition(bindings: &[ValidatorBinding]) -> (Vec<MetricGroup<'_>>, Vec<CustomEntry<'_>>) {
    let mut groups: Vec<MetricGroup<'_>> = Vec::new();
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();
    let mut customs = Vec::new();

    for (i, binding) in bindings.iter().enumerate() {
        match &binding.validator {
            Validator::Metric(validator) => {
                let key = (binding.engine_key.as_str(), binding.table.as_str());
                let slot = *index.entry(key).or_insert_with(|| {
                    groups.push(MetricGroup {
                        engine_key: key.0,
                        table: key.1,
                        members: Vec::new(),
                    });
                    groups.len() - 1
                });
                groups[slot].members.push((i, validator.as_ref()));
            }
            Validator::Custom(validator) => customs.push((i, binding, validator.as_ref())),
        }
    }
    (groups, customs)
}

/// Runs bound validators against their engines.
#[derive(Debug, Clone)]
pub struct ValidationRunner {
    engines: HashMap<String, Arc<dyn Engine>>,
    compiler: BatchCompiler,
    log_config: LogConfig,
}

impl ValidationRunner {
    pub fn new(engines: HashMap<String, Arc<dyn Engine>>) -> Self {
        Self {
            engines,
            compiler: BatchCompiler::default(),
            log_config: LogConfig::default(),
        }
    }

    pub fn with_engine(mut self, key: impl Into<String>, engine: Arc<dyn Engine>) -> Self {
        self.engines.insert(key.into(), engine);
        self
    }

    pub fn with_compiler(mut self, compiler: BatchCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn engine(&self, key: &str) -> Result<&Arc<dyn Engine>> {
        self.engines
            .get(key)
            .ok_or_else(|| ExpectError::ConfigResolution(format!("unknown engine '{key}'")))
    }

    /// Compiles every query `run` would issue without executing anything.
    ///
    /// Fails on the first compile-time error.
    pub fn plan(&self, bindings: &[ValidatorBinding]) -> Result<Vec<QueryPlan>> {
        let (groups, customs) = partition(bindings);
        let mut plans = Vec::with_capacity(groups.len() + customs.len());

        for group in &groups {
            let dialect = self.engine(group.engine_key)?.dialect();
            let requests = group
                .members
                .iter()
                .map(|(_, validator)| validator.metric_request())
                .collect::<Result<Vec<_>>>()?;
            plans.push(QueryPlan {
                engine_key: group.engine_key.to_string(),
                table: group.table.to_string(),
                sql: self.compiler.compile_sql(group.table, &requests, dialect)?,
                validators: requests.iter().map(|r| r.alias().to_string()).collect(),
            });
        }
        for (_, binding, validator) in customs {
            let engine = self.engine(&binding.engine_key)?;
            plans.push(QueryPlan {
                engine_key: binding.engine_key.clone(),
                table: binding.table.clone(),
                sql: self.custom_query_sql(validator, &binding.table, engine.as_ref())?,
                validators: vec![validator.runtime_id().to_string()],
            });
        }
        Ok(plans)
    }

    /// Runs every binding and returns one result per binding, in input order.
    ///
    /// Never fails: execution and compile errors become failed results whose
    /// details carry `error` and `traceback`.
    #[instrument(skip_all, fields(run_id = %run_id, bindings = bindings.len()))]
    pub async fn run(
        &self,
        mut bindings: Vec<ValidatorBinding>,
        run_id: &str,
    ) -> Vec<ValidationResult> {
        for binding in &mut bindings {
            let table = binding.table.clone();
            binding.validator.bind_table(&table);
        }

        let (groups, customs) = partition(&bindings);
        crate::perf_debug!(
            self.log_config,
            groups = groups.len(),
            custom = customs.len(),
            "partitioned bindings"
        );
        let mut results: Vec<Option<ValidationResult>> = vec![None; bindings.len()];

        for group in &groups {
            for (i, result) in self.run_metric_group(group, run_id).await {
                results[i] = Some(result);
            }
        }
        for (i, binding, validator) in customs {
            results[i] = Some(self.run_custom(binding, validator, run_id).await);
        }

        let results: Vec<ValidationResult> = results
            .into_iter()
            .zip(&bindings)
            .map(|(result, binding)| {
                let mut result = result.unwrap_or_else(|| {
                    failed(
                        run_id,
                        binding,
                        &ExpectError::Internal("validator produced no result".into()),
                    )
                });
                result.engine_name = self
                    .engines
                    .get(&binding.engine_key)
                    .map(|e| e.name().to_string());
                result.db_schema = schema_of(&binding.table);
                result
            })
            .collect();

        let passed = results.iter().filter(|r| r.success).count();
        info!(
            total = results.len(),
            passed,
            failed = results.len() - passed,
            groups = groups.len(),
            "validation run finished"
        );
        results
    }

    /// Runs `bindings` under `metadata`, stamping its engine and schema onto every result.
    pub async fn run_with_metadata(
        &self,
        bindings: Vec<ValidatorBinding>,
        mut metadata: RunMetadata,
    ) -> RunReport {
        let mut results = self.run(bindings, &metadata.run_id).await;
        for result in &mut results {
            if metadata.engine_name.is_some() {
                result.engine_name = metadata.engine_name.clone();
            }
            if metadata.db_schema.is_some() {
                result.db_schema = metadata.db_schema.clone();
            }
        }
        metadata.finish();
        RunReport::new(metadata, results)
    }

    /// Builds and runs a suite.
    ///
    /// Configuration errors (unknown validator types, bad parameters) are
    /// returned before anything runs.
    pub async fn run_suite(
        &self,
        suite: &ExpectationSuiteConfig,
        factory: &ValidatorFactory,
    ) -> Result<RunReport> {
        let bindings = factory.build_suite(suite).await?;
        let mut metadata = RunMetadata::start().with_suite(&suite.suite_name);
        metadata.engine_name = Some(suite.engine.clone());
        metadata.db_schema = suite.db_schema.clone().or_else(|| schema_of(&suite.table));
        Ok(self.run_with_metadata(bindings, metadata).await)
    }

    /// Builds and runs every suite of an SLA under one run id.
    pub async fn run_sla(&self, sla: &SlaConfig, factory: &ValidatorFactory) -> Result<RunReport> {
        let mut metadata = RunMetadata::start().with_sla(&sla.sla_name);
        let mut results = Vec::new();
        for suite in &sla.suites {
            let bindings = factory.build_suite(suite).await?;
            let db_schema = suite.db_schema.clone().or_else(|| schema_of(&suite.table));
            for mut result in self.run(bindings, &metadata.run_id).await {
                result.engine_name = Some(suite.engine.clone());
                result.db_schema = db_schema.clone();
                results.push(result);
            }
        }
        metadata.finish();
        Ok(RunReport::new(metadata, results))
    }

    #[instrument(
        skip_all,
        fields(engine = %group.engine_key, table = %group.table, validators = group.members.len())
    )]
    async fn run_metric_group(
        &self,
        group: &MetricGroup<'_>,
        run_id: &str,
    ) -> Vec<(usize, ValidationResult)> {
        let mut out = Vec::with_capacity(group.members.len());

        let engine = match self.engine(group.engine_key) {
            Ok(engine) => engine,
            Err(err) => {
                warn!(error = %err, "metric group has no engine");
                for (i, validator) in &group.members {
                    let ctx = metric_context(run_id, group.table, *validator);
                    out.push((*i, ctx.error(None, validator.where_condition(), &err)));
                }
                return out;
            }
        };
        let dialect = engine.dialect();

        // A validator whose own request cannot compile fails alone. The
        // compiled expressions are projected as they are, so each filter is
        // parsed once per run.
        let mut planned: Vec<(usize, &dyn MetricValidator, MetricRequest)> = Vec::new();
        let mut compiled: Vec<(String, Expression)> = Vec::new();
        for (i, validator) in &group.members {
            let outcome = validator.metric_request().and_then(|request| {
                let expr = self.compiler.compile_request(&request, dialect)?;
                Ok((request, expr))
            });
            match outcome {
                Ok((request, expr)) => {
                    compiled.push((request.alias().to_string(), expr));
                    planned.push((*i, *validator, request));
                }
                Err(err) => {
                    warn!(validator = validator.name(), error = %err, "metric request rejected");
                    let ctx = metric_context(run_id, group.table, *validator);
                    out.push((*i, ctx.error(None, validator.where_condition(), &err)));
                }
            }
        }
        if planned.is_empty() {
            return out;
        }

        let rows = match self.execute_batch(engine.as_ref(), group.table, compiled).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "batched query failed");
                for (i, validator, request) in &planned {
                    let ctx = metric_context(run_id, group.table, *validator);
                    out.push((*i, ctx.error(Some(request), request.filter_sql(), &err)));
                }
                return out;
            }
        };

        for (i, validator, request) in planned {
            let ctx = metric_context(run_id, group.table, validator);
            let mut diagnostics = Diagnostics::new();
            let outcome = match rows.value(0, request.alias()) {
                Ok(value) => validator
                    .interpret(&value, &mut diagnostics)
                    .await
                    .map(|success| (success, value.to_json())),
                Err(err) => Err(err),
            };
            let filter_sql = request.filter_sql();
            let result = match outcome {
                Ok((success, value)) => {
                    ctx.finish(Some(&request), filter_sql, success, value, diagnostics)
                }
                Err(err) => ctx.error(Some(&request), filter_sql, &err),
            };
            crate::log_validator!(
                self.log_config,
                validator = result.validator.as_str(),
                runtime_id = %validator.runtime_id(),
                success = result.success,
                "metric validator evaluated"
            );
            out.push((i, result));
        }
        out
    }

    async fn execute_batch(
        &self,
        engine: &dyn Engine,
        table: &str,
        compiled: Vec<(String, Expression)>,
    ) -> Result<QueryResult> {
        let sql = BatchCompiler::project(table, compiled)?.render(engine.dialect());
        crate::log_query!(self.log_config, &sql, table, "running batched metric query");
        let rows = engine.run_sql(&sql).await?;
        if rows.is_empty() {
            return Err(ExpectError::engine_execution(format!(
                "batched query on '{table}' returned no rows"
            )));
        }
        Ok(rows)
    }

    fn custom_query_sql(
        &self,
        validator: &dyn CustomValidator,
        table: &str,
        engine: &dyn Engine,
    ) -> Result<String> {
        match validator.custom_sql(table)? {
            CustomQuery::Sql(sql) => Ok(sql),
            CustomQuery::Metrics(requests) => {
                self.compiler.compile_sql(table, &requests, engine.dialect())
            }
        }
    }

    #[instrument(skip_all, fields(validator = validator.name(), table = %binding.table))]
    async fn run_custom(
        &self,
        binding: &ValidatorBinding,
        validator: &dyn CustomValidator,
        run_id: &str,
    ) -> ValidationResult {
        let mut diagnostics = Diagnostics::new();
        let outcome = async {
            let engine = self.engine(&binding.engine_key)?;
            let sql = self.custom_query_sql(validator, &binding.table, engine.as_ref())?;
            crate::log_query!(self.log_config, &sql, "running custom validator query");
            let rows = engine.run_sql(&sql).await?;
            validator.interpret(&rows, &mut diagnostics).await
        }
        .await;

        let ctx = ResultContext {
            run_id,
            validator: validator.name(),
            table: &binding.table,
            column: validator.column(),
            severity: validator.severity(),
        };
        let result = match outcome {
            Ok(success) => ctx.finish(
                None,
                validator.where_condition(),
                success,
                Value::Null,
                diagnostics,
            ),
            Err(err) => {
                warn!(error = %err, "custom validator failed");
                let mut result = ctx.error(None, validator.where_condition(), &err);
                // Keep whatever the validator recorded before failing.
                for (key, value) in diagnostics.into_map() {
                    result.details.entry(key).or_insert(value);
                }
                result
            }
        };
        crate::log_validator!(
            self.log_config,
            validator = result.validator.as_str(),
            success = result.success,
            "custom validator evaluated"
        );
        result
    }
}

/// Fields shared by every result of one validator.
struct ResultContext<'a> {
    run_id: &'a str,
    validator: &'static str,
    table: &'a str,
    column: Option<&'a str>,
    severity: crate::validators::Severity,
}

impl ResultContext<'_> {
    fn finish(
        &self,
        request: Option<&MetricRequest>,
        filter_sql: Option<&str>,
        success: bool,
        value: Value,
        diagnostics: Diagnostics,
    ) -> ValidationResult {
        ValidationResult {
            run_id: self.run_id.to_string(),
            validator: self.validator.to_string(),
            table: self.table.to_string(),
            engine_name: None,
            db_schema: None,
            column: self.column.map(str::to_string),
            metric: request.map(|r| r.metric().to_string()),
            success,
            value,
            severity: self.severity,
            filter_sql: filter_sql.map(str::to_string),
            details: diagnostics.into_map(),
        }
    }

    fn error(
        &self,
        request: Option<&MetricRequest>,
        filter_sql: Option<&str>,
        err: &ExpectError,
    ) -> ValidationResult {
        let mut diagnostics = Diagnostics::new();
        diagnostics.set("error", err.to_string());
        diagnostics.set("traceback", err.chain());
        self.finish(request, filter_sql, false, Value::Null, diagnostics)
    }
}

fn metric_context<'a>(
    run_id: &'a str,
    table: &'a str,
    validator: &'a dyn MetricValidator,
) -> ResultContext<'a> {
    ResultContext {
        run_id,
        validator: validator.name(),
        table,
        column: validator.column(),
        severity: validator.severity(),
    }
}

fn failed(run_id: &str, binding: &ValidatorBinding, err: &ExpectError) -> ValidationResult {
    ResultContext {
        run_id,
        validator: binding.validator.name(),
        table: &binding.table,
        column: binding.validator.column(),
        severity: binding.validator.severity(),
    }
    .error(None, binding.validator.where_condition(), err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::orders_engine;
    use crate::validators::{
        ColumnNotNull, ColumnNullPct, RowCountValidator, Severity, SqlErrorRowsValidator,
    };

    async fn runner() -> ValidationRunner {
        let engine: Arc<dyn Engine> = Arc::new(orders_engine().await);
        ValidationRunner::new(HashMap::from([("local".to_string(), engine)]))
    }

    fn bind(validator: Validator) -> ValidatorBinding {
        ValidatorBinding::new("local", "orders", validator)
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let runner = runner().await;
        let bindings = vec![
            bind(Validator::metric(ColumnNotNull::new("id"))),
            bind(Validator::custom(
                SqlErrorRowsValidator::new("SELECT id FROM orders WHERE amount < 0").unwrap(),
            )),
            bind(Validator::metric(ColumnNotNull::new("customer"))),
            bind(Validator::metric(
                RowCountValidator::new(Some(5), Some(5))
                    .unwrap()
                    .with_severity(Severity::Warn),
            )),
        ];
        let results = runner.run(bindings, "run-1").await;

        let summary: Vec<(&str, bool)> = results
            .iter()
            .map(|r| (r.validator.as_str(), r.success))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("ColumnNotNull", true),
                ("SqlErrorRowsValidator", true),
                ("ColumnNotNull", false),
                ("RowCountValidator", true),
            ]
        );
        assert_eq!(results[2].column.as_deref(), Some("customer"));
        assert_eq!(results[2].metric.as_deref(), Some("null_pct"));
        assert_eq!(results[2].value, serde_json::json!(0.2));
        assert_eq!(results[3].severity, Severity::Warn);
        assert!(results.iter().all(|r| r.run_id == "run-1"));
    }

    #[tokio::test]
    async fn test_bad_filter_fails_only_its_validator() {
        let runner = runner().await;
        let bindings = vec![
            bind(Validator::metric(
                ColumnNotNull::new("id").with_where("1; DROP TABLE orders"),
            )),
            bind(Validator::metric(ColumnNullPct::new("amount", 0.5).unwrap())),
        ];
        let results = runner.run(bindings, "r").await;
        assert!(!results[0].success);
        assert!(results[0].details.contains_key("error"));
        assert!(results[0].details.contains_key("traceback"));
        assert!(results[1].success);
        assert!(runner
            .plan(&[bind(Validator::metric(
                ColumnNotNull::new("id").with_where("1; DROP TABLE orders")
            ))])
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_engine_fails_group() {
        let runner = runner().await;
        let results = runner
            .run(
                vec![ValidatorBinding::new(
                    "remote",
                    "orders",
                    Validator::metric(ColumnNotNull::new("id")),
                )],
                "r",
            )
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].details["error"]
            .as_str()
            .unwrap()
            .contains("unknown engine 'remote'"));
    }

    #[tokio::test]
    async fn test_filtered_request_records_filter() {
        let runner = runner().await;
        let results = runner
            .run(
                vec![bind(Validator::metric(
                    ColumnNotNull::new("amount").with_where("status = 'closed'"),
                ))],
                "r",
            )
            .await;
        assert!(results[0].success);
        assert_eq!(results[0].filter_sql.as_deref(), Some("status = 'closed'"));
    }

    #[tokio::test]
    async fn test_plan_batches_metric_validators() {
        let runner = runner().await;
        let bindings = vec![
            bind(Validator::metric(ColumnNotNull::new("id"))),
            bind(Validator::metric(ColumnNotNull::new("amount"))),
        ];
        let plans = runner.plan(&bindings).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].validators.len(), 2);
        assert!(plans[0].sql.starts_with("SELECT "));
        assert!(plans[0].sql.ends_with("FROM \"orders\""));
    }

    #[tokio::test]
    async fn test_run_with_metadata_stamps_results() {
        let runner = runner().await;
        let mut metadata = RunMetadata::start();
        metadata.engine_name = Some("local".into());
        let run_id = metadata.run_id.clone();
        let report = runner
            .run_with_metadata(vec![bind(Validator::metric(ColumnNotNull::new("id")))], metadata)
            .await;
        assert_eq!(report.results[0].run_id, run_id);
        assert_eq!(report.results[0].engine_name.as_deref(), Some("local"));
        assert!(report.metadata.finished_at.is_some());
        assert!(report.is_success());
    }
}
