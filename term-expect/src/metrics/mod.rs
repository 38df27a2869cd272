//! Metric registry, built-in metric builders and the batch query compiler.

pub mod batch;
pub mod builtins;
pub mod registry;

pub use batch::{apply_filter, BatchCompiler, MetricRequest};
pub use registry::{MetricBuilder, MetricRegistry};
