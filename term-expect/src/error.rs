//! Error types for the expectation engine.
//!
//! Compilation-time failures (unknown metrics, unsafe filters) surface to the
//! caller of the compiler. Execution-time failures are wrapped in
//! [`ExpectError::EngineExecution`] and recovered by the runner into failed
//! validation results.

use thiserror::Error;

/// Errors raised while compiling, executing or configuring expectations.
#[derive(Error, Debug)]
pub enum ExpectError {
    /// One or more metric keys are not registered.
    #[error("Unknown metric key(s) {}. Available: {}", .names.join(", "), .available.join(", "))]
    UnknownMetric {
        /// Every unknown key found in the request set
        names: Vec<String>,
        /// Snapshot of the registered keys
        available: Vec<String>,
    },

    /// A metric key was registered twice.
    #[error("Metric key '{0}' already registered")]
    DuplicateMetric(String),

    /// Unsafe or malformed filter text, or invalid validator parameters.
    #[error("Invalid validation configuration: {0}")]
    ValidationConfig(String),

    /// The execution back-end raised while running a query.
    #[error("Engine execution failed: {message}")]
    EngineExecution {
        message: String,
        /// Driver or I/O error, rendered into the `traceback` detail
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unknown expectation type or unresolvable suite binding.
    #[error("Configuration resolution failed: {0}")]
    ConfigResolution(String),

    /// Planning or execution failure inside DataFusion.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Failure converting Arrow result batches.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Reading a configuration file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML or JSON document could not be parsed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A broken internal invariant.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ExpectError>;

impl ExpectError {
    /// Creates an engine execution error without an underlying cause.
    pub fn engine_execution(message: impl Into<String>) -> Self {
        Self::EngineExecution {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an engine execution error wrapping `source`.
    pub fn engine_execution_with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::EngineExecution {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a validation configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ValidationConfig(message.into())
    }

    /// Returns true for errors raised before any query reached a back-end.
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            Self::UnknownMetric { .. } | Self::DuplicateMetric(_) | Self::ValidationConfig(_)
        )
    }

    /// Renders this error followed by its `source()` chain, one cause per line.
    ///
    /// The runner stores this as the `traceback` detail of failed results.
    pub fn chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            rendered.push_str("\ncaused by: ");
            rendered.push_str(&cause.to_string());
            current = cause.source();
        }
        rendered
    }
}

impl From<serde_json::Error> for ExpectError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ExpectError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Prefixes errors with what was being attempted.
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T>;

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<ExpectError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.with_context(|| msg.to_string())
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e.into() {
            ExpectError::EngineExecution { message, source } => ExpectError::EngineExecution {
                message: format!("{}: {message}", f()),
                source,
            },
            ExpectError::Internal(inner) => ExpectError::Internal(format!("{}: {inner}", f())),
            other => ExpectError::Internal(format!("{}: {other}", f())),
        })
    }
}
