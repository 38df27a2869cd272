//! # term-expect - Batched data-quality expectations
//!
//! term-expect evaluates declarative data-quality checks ("expectations")
//! against tables served by a SQL engine. Checks that only need a single
//! aggregate are compiled together, so a suite of fifty column checks on one
//! table costs one table scan instead of fifty.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use term_expect::prelude::*;
//! use datafusion::prelude::SessionContext;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let engine = DataFusionEngine::new(SessionContext::new())?;
//! // ... register your tables with `engine.register_batches` ...
//! let engine: Arc<dyn Engine> = Arc::new(engine);
//! let runner = ValidationRunner::new(HashMap::from([("local".to_string(), engine)]));
//!
//! let bindings = vec![
//!     ValidatorBinding::new("local", "orders", Validator::metric(ColumnNotNull::new("id"))),
//!     ValidatorBinding::new(
//!         "local",
//!         "orders",
//!         Validator::metric(ColumnNullPct::new("customer", 0.05)?.with_severity(Severity::Warn)),
//!     ),
//!     ValidatorBinding::new(
//!         "local",
//!         "orders",
//!         Validator::custom(SqlErrorRowsValidator::new("SELECT * FROM orders WHERE amount < 0")?),
//!     ),
//! ];
//!
//! // The two metric checks share one query; the custom check runs its own.
//! let results = runner.run(bindings, &new_run_id()).await;
//! for result in &results {
//!     println!("{} on {}: {}", result.validator, result.table, result.success);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`metrics`**: the metric registry and the batch compiler that turns
//!   metric requests into one aliased SELECT per table
//! - **`sql`**: a small expression tree rendered per dialect, and the filter
//!   validator guarding every user-supplied predicate
//! - **`validators`**: metric validators (one aggregate each) and custom
//!   validators (their own query)
//! - **`runner`**: groups validators by engine and table and runs them
//! - **`engine`**: the back-end contract and a DataFusion implementation
//! - **`config`**: YAML/JSON suite and SLA documents
//! - **`stats`**: table statistics collection feeding drift detection
//!
//! Suites can also be loaded from configuration; see [`config`].

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod prelude;
pub mod result;
pub mod runner;
pub mod security;
pub mod sql;
pub mod stats;
pub mod validators;

#[cfg(test)]
pub mod test_helpers;
