//! Safety validation for user-supplied row predicates and read-only queries.
//!
//! Every free-text filter passes through [`validate`] before it is embedded
//! into a generated query. Separators, comments and DDL/DML verbs are caught
//! on the token stream, so a verb is rejected even where it would parse as a
//! bare identifier (quote such columns). Subqueries and the boolean root are
//! checked on the parsed AST.

use std::ops::ControlFlow;

use datafusion::sql::sqlparser::ast::{
    BinaryOperator, Expr as SqlExpr, Query, Statement, UnaryOperator, Visit, Visitor,
};
use datafusion::sql::sqlparser::parser::Parser;
use datafusion::sql::sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use tracing::debug;

use super::dialect::Dialect;
use super::expr::Expression;
use crate::error::{ExpectError, Result};

/// Data-definition and data-modification verbs that may never appear in a filter.
const DISALLOWED_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "INSERT", "UPDATE", "DELETE", "MERGE", "GRANT", "REVOKE",
    "TRUNCATE",
];

/// Scalar functions known to return a boolean.
const BOOLEAN_FUNCTIONS: &[&str] = &[
    "REGEXP_LIKE",
    "REGEXP_MATCHES",
    "REGEXP_FULL_MATCH",
    "STARTS_WITH",
    "ENDS_WITH",
    "ISNAN",
];

/// Validates `predicate` as a boolean row filter using the generic dialect.
pub fn validate(predicate: &str) -> Result<Expression> {
    validate_for(predicate, Dialect::Ansi)
}

/// Validates `predicate` as a boolean row filter for `dialect`.
///
/// Fails with [`ExpectError::ValidationConfig`] when the text
/// - is empty,
/// - contains a statement separator or a comment,
/// - mentions a DDL/DML verb or a subquery,
/// - does not parse as exactly one expression,
/// - or parses to a non-boolean root.
pub fn validate_for(predicate: &str, dialect: Dialect) -> Result<Expression> {
    let text = predicate.trim();
    if text.is_empty() {
        return Err(ExpectError::config("filter predicate is empty"));
    }
    if text.contains('\0') {
        return Err(ExpectError::config("filter predicate contains a null byte"));
    }

    let parser_dialect = dialect.parser_dialect();
    let tokens = Tokenizer::new(parser_dialect.as_ref(), text)
        .tokenize()
        .map_err(|e| ExpectError::config(format!("cannot tokenize filter '{text}': {e}")))?;
    check_tokens(&tokens, text)?;

    let mut parser = Parser::new(parser_dialect.as_ref())
        .try_with_sql(text)
        .map_err(|e| ExpectError::config(format!("cannot parse filter '{text}': {e}")))?;
    let expr = parser
        .parse_expr()
        .map_err(|e| ExpectError::config(format!("cannot parse filter '{text}': {e}")))?;
    if parser.peek_token().token != Token::EOF {
        return Err(ExpectError::config(format!(
            "filter '{text}' must be a single expression"
        )));
    }

    if contains_subquery(&expr) {
        return Err(ExpectError::config(format!(
            "filter '{text}' contains a subquery"
        )));
    }
    if !is_boolean_root(&expr) {
        return Err(ExpectError::config(format!(
            "filter '{text}' is not a boolean expression"
        )));
    }

    debug!(filter = %text, dialect = %dialect, "validated filter predicate");
    Ok(Expression::Predicate(Box::new(expr)))
}

/// Validates that `sql` is exactly one read-only query statement.
pub fn validate_read_query(sql: &str, dialect: Dialect) -> Result<()> {
    let parser_dialect = dialect.parser_dialect();
    let statements = Parser::parse_sql(parser_dialect.as_ref(), sql)
        .map_err(|e| ExpectError::config(format!("cannot parse query: {e}")))?;
    match statements.as_slice() {
        [Statement::Query(_)] => Ok(()),
        [] => Err(ExpectError::config("query is empty")),
        [_] => Err(ExpectError::config("only SELECT queries are allowed")),
        _ => Err(ExpectError::config(
            "query must contain exactly one statement",
        )),
    }
}

fn check_tokens(tokens: &[Token], text: &str) -> Result<()> {
    for token in tokens {
        match token {
            Token::SemiColon => {
                return Err(ExpectError::config(format!(
                    "filter '{text}' contains a statement separator"
                )))
            }
            Token::Whitespace(Whitespace::SingleLineComment { .. })
            | Token::Whitespace(Whitespace::MultiLineComment(_)) => {
                return Err(ExpectError::config(format!(
                    "filter '{text}' contains a comment"
                )))
            }
            Token::Word(word) if word.quote_style.is_none() => {
                let upper = word.value.to_ascii_uppercase();
                if DISALLOWED_KEYWORDS.contains(&upper.as_str()) {
                    return Err(ExpectError::config(format!(
                        "filter '{text}' contains disallowed construct {upper}"
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Stops at the first query node anywhere in the tree.
struct SubqueryFinder;

impl Visitor for SubqueryFinder {
    type Break = ();

    fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<()> {
        ControlFlow::Break(())
    }
}

/// Covers `(SELECT ..)`, `EXISTS`, `IN (SELECT ..)` and subqueries nested in
/// function arguments.
fn contains_subquery(expr: &SqlExpr) -> bool {
    expr.visit(&mut SubqueryFinder).is_break()
}

fn is_boolean_root(expr: &SqlExpr) -> bool {
    match expr {
        SqlExpr::Nested(inner) => is_boolean_root(inner),
        SqlExpr::BinaryOp { op, .. } => matches!(
            op,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
                | BinaryOperator::And
                | BinaryOperator::Or
                | BinaryOperator::Xor
                | BinaryOperator::PGRegexMatch
                | BinaryOperator::PGRegexIMatch
                | BinaryOperator::PGRegexNotMatch
                | BinaryOperator::PGRegexNotIMatch
        ),
        SqlExpr::UnaryOp { op, .. } => matches!(op, UnaryOperator::Not),
        SqlExpr::IsNull(_)
        | SqlExpr::IsNotNull(_)
        | SqlExpr::IsTrue(_)
        | SqlExpr::IsNotTrue(_)
        | SqlExpr::IsFalse(_)
        | SqlExpr::IsNotFalse(_)
        | SqlExpr::IsUnknown(_)
        | SqlExpr::IsNotUnknown(_)
        | SqlExpr::IsDistinctFrom(_, _)
        | SqlExpr::IsNotDistinctFrom(_, _)
        | SqlExpr::InList { .. }
        | SqlExpr::Between { .. }
        | SqlExpr::Like { .. }
        | SqlExpr::ILike { .. }
        | SqlExpr::SimilarTo { .. }
        | SqlExpr::RLike { .. } => true,
        SqlExpr::Value(_) => {
            let rendered = expr.to_string().to_ascii_uppercase();
            rendered == "TRUE" || rendered == "FALSE"
        }
        SqlExpr::Function(func) => {
            let name = func.name.to_string().to_ascii_uppercase();
            BOOLEAN_FUNCTIONS.contains(&name.as_str())
        }
        _ => false,
    }
}
