//! Validators driven by user-written SQL.

use async_trait::async_trait;

use super::{CustomQuery, CustomValidator, Diagnostics, ValidatorCommon};
use crate::engine::QueryResult;
use crate::error::Result;
use crate::security::InputValidator;
use crate::sql::{validate_read_query, Dialect};

/// Runs a query that selects offending rows; passes when it returns none.
///
/// The SQL must be a single read-only query. A sample of at most
/// `max_error_rows` offending rows is kept in the diagnostics.
///
/// ```rust
/// use term_expect::validators::SqlErrorRowsValidator;
///
/// let check = SqlErrorRowsValidator::new("SELECT * FROM orders WHERE amount < 0").unwrap();
/// assert!(SqlErrorRowsValidator::new("DELETE FROM orders").is_err());
/// # let _ = check;
/// ```
#[derive(Debug, Clone)]
pub struct SqlErrorRowsValidator {
    sql: String,
    max_error_rows: usize,
    tags: Vec<String>,
    common: ValidatorCommon,
}

impl SqlErrorRowsValidator {
    pub const DEFAULT_MAX_ERROR_ROWS: usize = 20;

    pub fn new(sql: impl Into<String>) -> Result<Self> {
        let sql = sql.into();
        InputValidator::validate_no_null_bytes(&sql, "custom SQL")?;
        validate_read_query(&sql, Dialect::Ansi)?;
        Ok(Self {
            sql,
            max_error_rows: Self::DEFAULT_MAX_ERROR_ROWS,
            tags: Vec::new(),
            common: ValidatorCommon::default(),
        })
    }

    pub fn with_max_error_rows(mut self, max_error_rows: usize) -> Self {
        self.max_error_rows = max_error_rows;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

validator_base!(SqlErrorRowsValidator, "SqlErrorRowsValidator");

#[async_trait]
impl CustomValidator for SqlErrorRowsValidator {
    fn custom_sql(&self, _table: &str) -> Result<CustomQuery> {
        Ok(CustomQuery::Sql(self.sql.clone()))
    }

    async fn interpret(&self, rows: &QueryResult, diagnostics: &mut Diagnostics) -> Result<bool> {
        let error_rows = rows.num_rows();
        diagnostics.set("error_row_count", error_rows);
        diagnostics.set("error_rows_sample", rows.sample(self.max_error_rows)?);
        if !self.tags.is_empty() {
            diagnostics.set("tags", &self.tags);
        }
        Ok(error_rows == 0)
    }
}
