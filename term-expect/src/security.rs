//! Input hardening for identifiers, literals and patterns spliced into generated SQL.
//!
//! Identifiers are always emitted double-quoted, so validation here is about
//! rejecting names no engine could resolve, not about keyword blocklists.
//! Free-text predicates go through [`crate::sql::filter`] instead.

use crate::error::{ExpectError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_IDENTIFIER_LENGTH: usize = 128;
const MAX_PATTERN_LENGTH: usize = 1000;

/// Quoting and validation for names and literals in generated SQL.
pub struct SqlSecurity;

impl SqlSecurity {
    /// Validates and double-quotes a single identifier.
    ///
    /// ```rust
    /// use term_expect::security::SqlSecurity;
    ///
    /// assert_eq!(SqlSecurity::escape_identifier("order id").unwrap(), "\"order id\"");
    /// assert_eq!(SqlSecurity::escape_identifier("a\"b").unwrap(), "\"a\"\"b\"");
    /// assert!(SqlSecurity::escape_identifier("").is_err());
    /// ```
    pub fn escape_identifier(identifier: &str) -> Result<String> {
        Self::validate_identifier(identifier)?;
        Ok(format!("\"{}\"", identifier.replace('"', "\"\"")))
    }

    /// Validates an identifier without escaping it.
    pub fn validate_identifier(identifier: &str) -> Result<()> {
        if identifier.trim().is_empty() {
            return Err(ExpectError::config(
                "SQL identifier cannot be empty or whitespace-only",
            ));
        }

        if identifier.chars().count() > MAX_IDENTIFIER_LENGTH {
            return Err(ExpectError::config(format!(
                "SQL identifier too long (max {MAX_IDENTIFIER_LENGTH} characters)"
            )));
        }

        if identifier.chars().any(char::is_control) {
            return Err(ExpectError::config(
                "SQL identifier cannot contain control characters",
            ));
        }

        if identifier == "*" {
            return Err(ExpectError::config(
                "'*' is only valid for table-level metrics",
            ));
        }

        Ok(())
    }

    /// Validates a possibly schema-qualified table name such as `sales.orders`.
    pub fn validate_table_name(table: &str) -> Result<()> {
        static TABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
            #[allow(clippy::expect_used)]
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*){0,2}$")
                .expect("table name pattern compiles")
        });

        Self::validate_identifier(table)?;
        if !TABLE_REGEX.is_match(table) {
            return Err(ExpectError::config(format!(
                "Invalid table name '{table}'. Expected [catalog.][schema.]table made of letters, digits and underscores"
            )));
        }
        Ok(())
    }

    /// Quotes a string as a SQL literal.
    pub fn escape_literal(value: &str) -> Result<String> {
        InputValidator::validate_no_null_bytes(value, "SQL literal")?;
        Ok(format!("'{}'", value.replace('\'', "''")))
    }

    /// Validates a regex pattern and returns it quoted as a SQL literal.
    pub fn validate_regex_pattern(pattern: &str) -> Result<String> {
        InputValidator::validate_string_length(pattern, MAX_PATTERN_LENGTH, "Regex pattern")?;
        Regex::new(pattern)
            .map_err(|e| ExpectError::config(format!("Invalid regex pattern: {e}")))?;
        Self::escape_literal(pattern)
    }
}

/// Checks for validator parameters.
pub struct InputValidator;

impl InputValidator {
    /// Rejects NaN and infinite thresholds.
    pub fn validate_threshold(value: f64, name: &str) -> Result<()> {
        if !value.is_finite() {
            return Err(ExpectError::config(format!(
                "{name} must be a finite number, got {value}"
            )));
        }
        Ok(())
    }

    /// Validates a fraction between 0.0 and 1.0 inclusive.
    pub fn validate_percentage(value: f64, name: &str) -> Result<()> {
        Self::validate_threshold(value, name)?;

        if !(0.0..=1.0).contains(&value) {
            return Err(ExpectError::config(format!(
                "{name} must be a fraction in [0, 1], got {value}"
            )));
        }
        Ok(())
    }

    /// Validates that `min <= max` when both bounds are present.
    pub fn validate_bounds(min: Option<f64>, max: Option<f64>, name: &str) -> Result<()> {
        for bound in [min, max].into_iter().flatten() {
            Self::validate_threshold(bound, name)?;
        }
        match (min, max) {
            (Some(lo), Some(hi)) if lo > hi => Err(ExpectError::config(format!(
                "Invalid {name}: lower bound {lo} exceeds upper bound {hi}"
            ))),
            _ => Ok(()),
        }
    }

    pub fn validate_string_length(value: &str, max_length: usize, name: &str) -> Result<()> {
        if value.len() > max_length {
            return Err(ExpectError::config(format!(
                "{name} is {} bytes long; the limit is {max_length}",
                value.len()
            )));
        }
        Ok(())
    }

    pub fn validate_no_null_bytes(value: &str, name: &str) -> Result<()> {
        if value.contains('\0') {
            return Err(ExpectError::config(format!(
                "{name} contains a NUL byte"
            )));
        }
        Ok(())
    }
}
