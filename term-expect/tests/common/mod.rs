//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::prelude::SessionContext;
use term_expect::engine::{DataFusionEngine, Engine, QueryResult};
use term_expect::error::{ExpectError, Result};
use term_expect::sql::Dialect;

/// `a = [1, 2, 2]`, `b = [1, 1, 2]`.
pub fn small_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int64, true),
        Field::new("b", DataType::Int64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 2])),
            Arc::new(Int64Array::from(vec![1, 1, 2])),
        ],
    )
    .unwrap()
}

/// Five orders: one NULL customer, one NULL amount.
pub fn orders_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("customer", DataType::Utf8, true),
        Field::new("amount", DataType::Float64, true),
        Field::new("status", DataType::Utf8, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
            Arc::new(StringArray::from(vec![
                Some("alice"),
                Some("bob"),
                None,
                Some("alice"),
                Some("carol"),
            ])),
            Arc::new(Float64Array::from(vec![
                Some(10.0),
                Some(25.5),
                None,
                Some(40.0),
                Some(5.0),
            ])),
            Arc::new(StringArray::from(vec![
                "open", "closed", "open", "pending", "closed",
            ])),
        ],
    )
    .unwrap()
}

/// A DataFusion engine with `t` (the small fixture) and `orders` registered.
pub async fn fixture_engine() -> DataFusionEngine {
    let engine = DataFusionEngine::with_pool_size(SessionContext::new(), 2).unwrap();
    engine.register_batches("t", vec![small_batch()]).await.unwrap();
    engine
        .register_batches("orders", vec![orders_batch()])
        .await
        .unwrap();
    engine
}

/// Wraps an engine, counting and recording every query and failing queries
/// that read from selected tables.
#[derive(Debug)]
pub struct RecordingEngine {
    inner: DataFusionEngine,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
    failing_tables: Vec<String>,
}

impl RecordingEngine {
    pub fn new(inner: DataFusionEngine) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
            failing_tables: Vec::new(),
        }
    }

    /// Makes every query over `table` fail with an engine error.
    pub fn failing_on(mut self, table: &str) -> Self {
        self.failing_tables.push(table.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Engine for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    async fn run_sql(&self, sql: &str) -> Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(sql.to_string());
        if let Some(table) = self
            .failing_tables
            .iter()
            .find(|t| sql.contains(&format!("FROM \"{t}\"")))
        {
            return Err(ExpectError::engine_execution_with_source(
                format!("injected failure reading '{table}'"),
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )),
            ));
        }
        self.inner.run_sql(sql).await
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        self.inner.list_columns(table).await
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// Engines map with a single entry.
pub fn engines(key: &str, engine: Arc<dyn Engine>) -> HashMap<String, Arc<dyn Engine>> {
    HashMap::from([(key.to_string(), engine)])
}
