//! In-process back-end on Apache DataFusion.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::datasource::MemTable;
use datafusion::execution::context::SQLOptions;
use datafusion::prelude::SessionContext;
use futures::future::try_join_all;
use tracing::{debug, instrument};

use super::pool::ConnectionPool;
use super::{Engine, QueryResult};
use crate::error::{ExpectError, Result};
use crate::sql::Dialect;

/// Runs queries on a DataFusion [`SessionContext`].
///
/// The pool holds handles onto one shared session state, so tables
/// registered through any handle are visible to every query. Only read
/// statements are accepted.
#[derive(Debug, Clone)]
pub struct DataFusionEngine {
    name: String,
    pool: ConnectionPool<SessionContext>,
}

impl DataFusionEngine {
    /// Creates an engine with one pooled handle per CPU.
    pub fn new(ctx: SessionContext) -> Result<Self> {
        Self::with_pool_size(ctx, num_cpus::get())
    }

    /// Creates an engine allowing at most `size` concurrent queries.
    pub fn with_pool_size(ctx: SessionContext, size: usize) -> Result<Self> {
        let handles = (0..size).map(|_| ctx.clone()).collect();
        Ok(Self {
            name: "datafusion".to_string(),
            pool: ConnectionPool::new(handles)?,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn pool(&self) -> &ConnectionPool<SessionContext> {
        &self.pool
    }

    /// Registers an in-memory table.
    pub async fn register_batches(&self, table: &str, batches: Vec<RecordBatch>) -> Result<()> {
        let schema = batches
            .first()
            .map(RecordBatch::schema)
            .ok_or_else(|| {
                ExpectError::config(format!("no batches given for table '{table}'"))
            })?;
        let provider = MemTable::try_new(schema, vec![batches])?;
        let ctx = self.pool.acquire().await?;
        ctx.register_table(table, Arc::new(provider))?;
        debug!(table, "registered in-memory table");
        Ok(())
    }

    fn read_only() -> SQLOptions {
        SQLOptions::new()
            .with_allow_ddl(false)
            .with_allow_dml(false)
            .with_allow_statements(false)
    }
}

#[async_trait]
impl Engine for DataFusionEngine {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, sql), fields(engine = %self.name))]
    async fn run_sql(&self, sql: &str) -> Result<QueryResult> {
        let ctx = self.pool.acquire().await?;
        let df = ctx
            .sql_with_options(sql, Self::read_only())
            .await
            .map_err(|e| {
                ExpectError::engine_execution_with_source("failed to plan query", Box::new(e))
            })?;
        let schema = Arc::clone(df.schema().inner());
        let batches = df.collect().await.map_err(|e| {
            ExpectError::engine_execution_with_source("failed to execute query", Box::new(e))
        })?;
        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        debug!(rows, "query finished");
        Ok(QueryResult::new(schema, batches))
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let ctx = self.pool.acquire().await?;
        let provider = ctx.table_provider(table).await.map_err(|e| {
            ExpectError::engine_execution_with_source(
                format!("unknown table '{table}'"),
                Box::new(e),
            )
        })?;
        Ok(provider
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect())
    }

    fn dialect(&self) -> Dialect {
        Dialect::DataFusion
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }

    /// Runs the queries concurrently, bounded by the pool size.
    async fn run_many(&self, queries: &[String]) -> Result<Vec<QueryResult>> {
        try_join_all(queries.iter().map(|q| self.run_sql(q))).await
    }
}
