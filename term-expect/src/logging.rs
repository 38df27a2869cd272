//! Logging configuration for term-expect.
//!
//! Components log through `tracing`. [`LogConfig`] controls the optional,
//! potentially large events: compiled SQL and per-validator outcomes.

use tracing::Level;

/// Runtime logging switches carried by the runner.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Most verbose level that [`perf_debug!`](crate::perf_debug) emits at.
    pub base_level: Level,
    /// Whether to log compiled SQL before it is sent to an engine
    pub log_queries: bool,
    /// Whether to log every validator outcome
    pub log_validator_details: bool,
    /// Maximum length for logged field values such as SQL text
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_queries: true,
            log_validator_details: false,
            max_field_length: 512,
        }
    }
}

impl LogConfig {
    /// Everything, with long fields.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_queries: true,
            log_validator_details: true,
            max_field_length: 4096,
        }
    }

    /// Warnings only; no SQL or per-validator events.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_queries: false,
            log_validator_details: false,
            max_field_length: 128,
        }
    }

    pub fn balanced() -> Self {
        Self::default()
    }

    /// Truncates `value` to this config's field length.
    pub fn field(&self, value: &str) -> String {
        truncate_field(value, self.max_field_length)
    }
}

/// Debug logging that skips argument evaluation below the configured level.
#[macro_export]
macro_rules! perf_debug {
    ($config:expr, $($arg:tt)*) => {
        if $config.base_level >= tracing::Level::DEBUG {
            tracing::debug!($($arg)*);
        }
    };
}

/// Logs compiled SQL when `log_queries` is enabled.
#[macro_export]
macro_rules! log_query {
    ($config:expr, $sql:expr, $($arg:tt)*) => {
        if $config.log_queries {
            tracing::debug!(sql = %$config.field($sql), $($arg)*);
        }
    };
}

/// Logs a validator outcome when `log_validator_details` is enabled.
#[macro_export]
macro_rules! log_validator {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_validator_details {
            tracing::info!($($arg)*);
        }
    };
}

/// Truncates a string to at most `max_length` bytes, on a character boundary.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Subscriber installation.
pub mod setup {
    use tracing::Level;

    use crate::error::{ExpectError, Result};

    /// Configuration for [`init_logging`].
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for everything else
        pub level: Level,
        /// Log level for `term_expect`
        pub crate_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                crate_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                crate_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                crate_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }

        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        pub fn with_crate_level(mut self, level: Level) -> Self {
            self.crate_level = level;
            self
        }

        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter directive string.
        pub fn env_filter(&self) -> String {
            match &self.env_filter {
                Some(filter) => filter.clone(),
                None => format!(
                    "{},term_expect={}",
                    self.level.as_str().to_lowercase(),
                    self.crate_level.as_str().to_lowercase()
                ),
            }
        }
    }

    /// Installs a global fmt subscriber. `RUST_LOG` overrides the configured filter.
    ///
    /// ```rust,no_run
    /// use term_expect::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::development().with_json_format(true)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| ExpectError::Internal(format!("failed to install subscriber: {e}")))
    }
}
