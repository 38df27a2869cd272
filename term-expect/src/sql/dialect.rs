//! Target SQL dialects for rendering compiled queries.

use std::fmt;
use std::str::FromStr;

use datafusion::sql::sqlparser::dialect::{
    Dialect as ParserDialect, DuckDbDialect, GenericDialect, PostgreSqlDialect,
};
use serde::{Deserialize, Serialize};

use crate::error::{ExpectError, Result};

/// SQL syntax variant a compiled query is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Standard SQL.
    #[default]
    Ansi,
    /// Apache DataFusion.
    DataFusion,
    /// DuckDB.
    DuckDb,
    /// PostgreSQL.
    Postgres,
}

impl Dialect {
    /// All supported dialects.
    pub const ALL: [Dialect; 4] = [
        Dialect::Ansi,
        Dialect::DataFusion,
        Dialect::DuckDb,
        Dialect::Postgres,
    ];

    /// Returns the dialect identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Ansi => "ansi",
            Dialect::DataFusion => "datafusion",
            Dialect::DuckDb => "duckdb",
            Dialect::Postgres => "postgres",
        }
    }

    /// Returns the parser dialect used to validate and re-parse SQL text.
    pub fn parser_dialect(&self) -> Box<dyn ParserDialect> {
        match self {
            Dialect::Ansi | Dialect::DataFusion => Box::new(GenericDialect {}),
            Dialect::DuckDb => Box::new(DuckDbDialect {}),
            Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        }
    }

    /// Name of the double-precision float type.
    pub(crate) fn double_type(&self) -> &'static str {
        match self {
            Dialect::Ansi | Dialect::Postgres => "DOUBLE PRECISION",
            Dialect::DataFusion | Dialect::DuckDb => "DOUBLE",
        }
    }

    /// Quotes a single identifier part.
    pub fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Quotes a possibly schema-qualified table name.
    pub fn quote_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = ExpectError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ansi" | "generic" => Ok(Dialect::Ansi),
            "datafusion" => Ok(Dialect::DataFusion),
            "duckdb" => Ok(Dialect::DuckDb),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(ExpectError::config(format!("unsupported SQL dialect '{other}'"))),
        }
    }
}
