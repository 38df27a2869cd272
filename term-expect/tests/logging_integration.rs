//! Structured logging emitted by validation runs.

mod common;

use std::sync::{Arc, Mutex};

use term_expect::engine::Engine;
use term_expect::logging::setup::{init_logging, LoggingConfig};
use term_expect::logging::LogConfig;
use term_expect::runner::{ValidationRunner, ValidatorBinding};
use term_expect::validators::{ColumnMax, ColumnNotNull, ColumnNullPct, Validator, ValidatorBase};

use common::{engines, fixture_engine};

/// Collects everything a fmt subscriber writes.
struct LogCapture {
    logs: Arc<Mutex<Vec<String>>>,
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.logs
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(buf).to_string());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `bindings` under a JSON subscriber and returns the captured output.
async fn run_captured(runner: &ValidationRunner, bindings: Vec<ValidatorBinding>) -> String {
    let logs = Arc::new(Mutex::new(Vec::new()));
    let writer_logs = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_writer(move || LogCapture {
            logs: writer_logs.clone(),
        })
        .with_env_filter("info,term_expect=debug")
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let results = runner.run(bindings, "logged").await;
    assert!(results.iter().all(|r| !r.details.contains_key("error")));

    let combined = logs.lock().unwrap().join("");
    combined
}

async fn runner(log_config: LogConfig) -> ValidationRunner {
    let engine: Arc<dyn Engine> = Arc::new(fixture_engine().await);
    ValidationRunner::new(engines("local", engine)).with_log_config(log_config)
}

fn filtered_bindings() -> Vec<ValidatorBinding> {
    vec![
        ValidatorBinding::new(
            "local",
            "orders",
            Validator::metric(ColumnNotNull::new("amount").with_where("status = 'closed'")),
        ),
        ValidatorBinding::new(
            "local",
            "orders",
            Validator::metric(
                ColumnNullPct::new("customer", 0.5)
                    .unwrap()
                    .with_where("status <> 'pending'"),
            ),
        ),
        ValidatorBinding::new(
            "local",
            "orders",
            Validator::metric(ColumnMax::new("amount", 100)),
        ),
    ]
}

#[tokio::test]
async fn test_each_filter_is_parsed_once_per_run() {
    let runner = runner(LogConfig::verbose()).await;
    let logs = run_captured(&runner, filtered_bindings()).await;

    assert_eq!(logs.matches("validated filter predicate").count(), 2);
    assert_eq!(logs.matches("running batched metric query").count(), 1);
    assert!(logs.contains("status = 'closed'"));
    assert!(logs.contains("status <> 'pending'"));
}

#[tokio::test]
async fn test_verbose_config_logs_sql_and_outcomes() {
    let runner = runner(LogConfig::verbose()).await;
    let logs = run_captured(&runner, filtered_bindings()).await;

    assert!(logs.contains(r#""level":"DEBUG""#));
    assert!(logs.contains(r#""sql":"SELECT "#));
    assert_eq!(logs.matches("metric validator evaluated").count(), 3);
    assert!(!logs.contains("...(truncated)"));
}

#[tokio::test]
async fn test_production_config_omits_sql_and_outcomes() {
    let runner = runner(LogConfig::production()).await;
    let logs = run_captured(&runner, filtered_bindings()).await;

    assert!(!logs.contains("running batched metric query"));
    assert!(!logs.contains("metric validator evaluated"));
    assert!(!logs.contains("partitioned bindings"));
    assert!(logs.contains("validation run finished"));
}

#[tokio::test]
async fn test_long_sql_is_truncated() {
    let config = LogConfig {
        max_field_length: 16,
        ..LogConfig::balanced()
    };
    let runner = runner(config).await;
    let logs = run_captured(&runner, filtered_bindings()).await;

    assert!(logs.contains("...(truncated)"));
}

#[test]
fn test_init_logging_installs_once() {
    let config = LoggingConfig::production().with_env_filter("warn");
    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());
}
