//! Execution back-ends.
//!
//! The core never runs SQL itself; it hands rendered queries to an [`Engine`]
//! and reads the returned Arrow batches through [`QueryResult`].

pub mod datafusion_engine;
pub mod pool;
pub mod value;

use std::fmt::Debug;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::scalar::ScalarValue;
use serde_json::Map;

use crate::error::{ExpectError, Result};
use crate::sql::Dialect;

pub use datafusion_engine::DataFusionEngine;
pub use pool::{ConnectionPool, PooledConnection};
pub use value::MetricValue;

/// Contract every execution back-end satisfies.
#[async_trait]
pub trait Engine: Debug + Send + Sync {
    /// Human-readable engine name recorded on results.
    fn name(&self) -> &str;

    /// Runs one read query and returns all rows.
    async fn run_sql(&self, sql: &str) -> Result<QueryResult>;

    /// Column names of `table` in declaration order.
    async fn list_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Dialect compiled queries must be rendered in.
    fn dialect(&self) -> Dialect;

    /// Releases engine resources. Further queries fail.
    async fn close(&self) -> Result<()>;

    /// Runs several queries; the default issues them one at a time.
    async fn run_many(&self, queries: &[String]) -> Result<Vec<QueryResult>> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            results.push(self.run_sql(query).await?);
        }
        Ok(results)
    }
}

/// Tabular result of a query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl QueryResult {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.fields().iter().map(|f| f.name().clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.schema.index_of(name).is_ok()
    }

    /// Reads the cell at `row` of column `name`.
    pub fn value(&self, row: usize, name: &str) -> Result<MetricValue> {
        let index = self.schema.index_of(name).map_err(|_| {
            ExpectError::engine_execution(format!("result has no column '{name}'"))
        })?;

        let mut offset = row;
        for batch in &self.batches {
            if offset < batch.num_rows() {
                let scalar = ScalarValue::try_from_array(batch.column(index), offset)?;
                return Ok(MetricValue::from_scalar(&scalar));
            }
            offset -= batch.num_rows();
        }
        Err(ExpectError::engine_execution(format!(
            "row {row} out of range ({} rows)",
            self.num_rows()
        )))
    }

    /// Converts up to `limit` rows to JSON objects keyed by column name.
    pub fn sample(&self, limit: usize) -> Result<Vec<Map<String, serde_json::Value>>> {
        let names = self.column_names();
        (0..self.num_rows().min(limit))
            .map(|row| {
                names
                    .iter()
                    .map(|name| Ok((name.clone(), self.value(row, name)?.to_json())))
                    .collect::<Result<Map<_, _>>>()
            })
            .collect()
    }
}
