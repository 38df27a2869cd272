//! Prelude for commonly used types and traits in term-expect.

pub use crate::config::{
    ConfigDocument, ExpectationConfig, ExpectationSuiteConfig, SlaConfig, ValidatorFactory,
};
pub use crate::engine::{DataFusionEngine, Engine, MetricValue, QueryResult};
pub use crate::error::{ErrorContext, ExpectError, Result};
pub use crate::logging::LogConfig;
pub use crate::metrics::{BatchCompiler, MetricRegistry, MetricRequest};
pub use crate::result::{new_run_id, RunMetadata, RunReport, ValidationResult};
pub use crate::runner::{ValidationRunner, ValidatorBinding};
pub use crate::sql::Dialect;
pub use crate::stats::TableStatsCollector;
pub use crate::validators::{
    ColumnDistinctCount, ColumnGreaterEqual, ColumnLength, ColumnMapping, ColumnMatchesRegex,
    ColumnMax, ColumnMin, ColumnNotNull, ColumnNullPct, ColumnPercentile, ColumnRange,
    ColumnReconciliationValidator, ColumnUniquenessValidator, ColumnValueInSet, Comparator,
    CustomValidator, DuplicateRowValidator, InMemoryMetricHistory, MetricDriftValidator,
    MetricHistory, MetricValidator, PrimaryKeyUniquenessValidator, RowCountValidator, Severity,
    SqlErrorRowsValidator, TableFreshnessValidator, TableReconciliationValidator, Validator,
    ValidatorBase,
};
