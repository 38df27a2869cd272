//! SQL building blocks: the expression tree, target dialects and the filter validator.

pub mod dialect;
pub mod expr;
pub mod filter;

pub use dialect::Dialect;
pub use expr::{
    AggregateFunction, BinaryOp, Expression, Literal, ScalarFunction, SelectQuery, SqlType,
};
pub use filter::{validate, validate_for, validate_read_query};
