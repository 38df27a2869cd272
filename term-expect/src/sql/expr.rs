//! Immutable SQL expression tree used by metric builders and the batch compiler.
//!
//! Trees are plain owned values: rewrites clone sub-trees instead of mutating
//! shared nodes, so a builder's output can be reused across requests safely.

use datafusion::sql::sqlparser::ast::Expr as SqlExpr;

use super::dialect::Dialect;

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }

    /// Whether the operator yields a boolean.
    pub fn is_boolean(&self) -> bool {
        !matches!(
            self,
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide
        )
    }
}

/// Aggregate functions a metric may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    CountDistinct,
    Sum,
    Min,
    Max,
    Avg,
    StddevSamp,
}

/// Scalar functions a metric may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    Coalesce,
    NullIf,
    Length,
    Trim,
}

impl ScalarFunction {
    fn name(&self) -> &'static str {
        match self {
            ScalarFunction::Coalesce => "COALESCE",
            ScalarFunction::NullIf => "NULLIF",
            ScalarFunction::Length => "LENGTH",
            ScalarFunction::Trim => "TRIM",
        }
    }
}

/// Cast targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Double,
}

/// A node of a SQL scalar or aggregate computation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference.
    Column(String),
    /// `*`, only meaningful as the argument of `COUNT`.
    Star,
    Literal(Literal),
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
    Not(Box<Expression>),
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    /// `CASE WHEN c1 THEN v1 ... [ELSE e] END`.
    Case {
        branches: Vec<(Expression, Expression)>,
        otherwise: Option<Box<Expression>>,
    },
    Aggregate {
        func: AggregateFunction,
        arg: Box<Expression>,
    },
    /// Continuous percentile at `quantile` of `expr`.
    Percentile {
        quantile: f64,
        expr: Box<Expression>,
    },
    /// Row value of several expressions, used for multi-column distinct counts.
    Tuple(Vec<Expression>),
    Cast {
        expr: Box<Expression>,
        to: SqlType,
    },
    Function {
        func: ScalarFunction,
        args: Vec<Expression>,
    },
    /// A validated user predicate. Always boolean.
    ///
    /// Renders as written: the text keeps the syntax of the dialect it was
    /// validated for, whatever dialect the surrounding query renders in.
    /// [`BatchCompiler`](crate::metrics::BatchCompiler) validates filters for
    /// the engine that runs the query, so the two agree.
    Predicate(Box<SqlExpr>),
    Alias {
        expr: Box<Expression>,
        alias: String,
    },
}

pub fn col(name: impl Into<String>) -> Expression {
    Expression::Column(name.into())
}

pub fn lit_int(value: i64) -> Expression {
    Expression::Literal(Literal::Int(value))
}

pub fn lit_float(value: f64) -> Expression {
    Expression::Literal(Literal::Float(value))
}

pub fn lit_str(value: impl Into<String>) -> Expression {
    Expression::Literal(Literal::Str(value.into()))
}

pub fn null() -> Expression {
    Expression::Literal(Literal::Null)
}

pub fn aggregate(func: AggregateFunction, arg: Expression) -> Expression {
    Expression::Aggregate {
        func,
        arg: Box::new(arg),
    }
}

pub fn count_star() -> Expression {
    aggregate(AggregateFunction::Count, Expression::Star)
}

pub fn function(func: ScalarFunction, args: Vec<Expression>) -> Expression {
    Expression::Function { func, args }
}

/// `CASE WHEN cond THEN then END`.
pub fn case_when(cond: Expression, then: Expression) -> Expression {
    Expression::Case {
        branches: vec![(cond, then)],
        otherwise: None,
    }
}

/// `CASE WHEN cond THEN then ELSE otherwise END`.
pub fn case_when_else(cond: Expression, then: Expression, otherwise: Expression) -> Expression {
    Expression::Case {
        branches: vec![(cond, then)],
        otherwise: Some(Box::new(otherwise)),
    }
}

impl Expression {
    fn binary(self, op: BinaryOp, right: Expression) -> Expression {
        Expression::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn and(self, other: Expression) -> Expression {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expression) -> Expression {
        self.binary(BinaryOp::Or, other)
    }

    pub fn eq(self, other: Expression) -> Expression {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn gt(self, other: Expression) -> Expression {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn minus(self, other: Expression) -> Expression {
        self.binary(BinaryOp::Minus, other)
    }

    pub fn divide(self, other: Expression) -> Expression {
        self.binary(BinaryOp::Divide, other)
    }

    pub fn is_null(self) -> Expression {
        Expression::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Expression {
        Expression::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn cast_double(self) -> Expression {
        Expression::Cast {
            expr: Box::new(self),
            to: SqlType::Double,
        }
    }

    pub fn alias(self, alias: impl Into<String>) -> Expression {
        Expression::Alias {
            expr: Box::new(self),
            alias: alias.into(),
        }
    }

    /// Whether this node types as boolean.
    pub fn is_boolean(&self) -> bool {
        match self {
            Expression::Binary { op, .. } => op.is_boolean(),
            Expression::Not(_) | Expression::IsNull { .. } | Expression::Predicate(_) => true,
            Expression::Literal(Literal::Bool(_)) => true,
            Expression::Alias { expr, .. } => expr.is_boolean(),
            _ => false,
        }
    }

    /// Whether any node of the tree is an aggregate.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expression::Aggregate { .. } | Expression::Percentile { .. } => true,
            Expression::Column(_)
            | Expression::Star
            | Expression::Literal(_)
            | Expression::Predicate(_) => false,
            Expression::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expression::Not(expr)
            | Expression::IsNull { expr, .. }
            | Expression::Cast { expr, .. }
            | Expression::Alias { expr, .. } => expr.contains_aggregate(),
            Expression::Case {
                branches,
                otherwise,
            } => {
                branches
                    .iter()
                    .any(|(c, v)| c.contains_aggregate() || v.contains_aggregate())
                    || otherwise.as_ref().is_some_and(|e| e.contains_aggregate())
            }
            Expression::Tuple(items) | Expression::Function { args: items, .. } => {
                items.iter().any(Expression::contains_aggregate)
            }
        }
    }

    /// Renders the tree as SQL text for `dialect`.
    pub fn render(&self, dialect: Dialect) -> String {
        match self {
            Expression::Column(name) => dialect.quote_ident(name),
            Expression::Star => "*".to_string(),
            Expression::Literal(lit) => render_literal(lit),
            Expression::Binary { left, op, right } => format!(
                "{} {} {}",
                render_operand(left, dialect),
                op.symbol(),
                render_operand(right, dialect)
            ),
            Expression::Not(expr) => format!("NOT ({})", expr.render(dialect)),
            Expression::IsNull { expr, negated } => format!(
                "{} IS {}NULL",
                render_operand(expr, dialect),
                if *negated { "NOT " } else { "" }
            ),
            Expression::Case {
                branches,
                otherwise,
            } => {
                let mut sql = String::from("CASE");
                for (cond, value) in branches {
                    sql.push_str(&format!(
                        " WHEN {} THEN {}",
                        cond.render(dialect),
                        value.render(dialect)
                    ));
                }
                if let Some(otherwise) = otherwise {
                    sql.push_str(&format!(" ELSE {}", otherwise.render(dialect)));
                }
                sql.push_str(" END");
                sql
            }
            Expression::Aggregate { func, arg } => render_aggregate(*func, arg, dialect),
            Expression::Percentile { quantile, expr } => {
                let func = match dialect {
                    Dialect::DataFusion => "approx_percentile_cont",
                    _ => "PERCENTILE_CONT",
                };
                format!(
                    "{func}({quantile:?}) WITHIN GROUP (ORDER BY {})",
                    expr.render(dialect)
                )
            }
            Expression::Tuple(items) => {
                let inner = items
                    .iter()
                    .map(|e| e.render(dialect))
                    .collect::<Vec<_>>()
                    .join(", ");
                match dialect {
                    Dialect::DataFusion => format!("struct({inner})"),
                    _ => format!("({inner})"),
                }
            }
            Expression::Cast { expr, to } => match to {
                SqlType::Double => format!(
                    "CAST({} AS {})",
                    expr.render(dialect),
                    dialect.double_type()
                ),
            },
            Expression::Function { func, args } => format!(
                "{}({})",
                func.name(),
                args.iter()
                    .map(|e| e.render(dialect))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Expression::Predicate(expr) => format!("({expr})"),
            Expression::Alias { expr, alias } => {
                format!("{} AS {}", expr.render(dialect), dialect.quote_ident(alias))
            }
        }
    }
}

fn render_operand(expr: &Expression, dialect: Dialect) -> String {
    match expr {
        Expression::Binary { .. } | Expression::IsNull { .. } => {
            format!("({})", expr.render(dialect))
        }
        _ => expr.render(dialect),
    }
}

fn render_aggregate(func: AggregateFunction, arg: &Expression, dialect: Dialect) -> String {
    let arg_sql = arg.render(dialect);
    match func {
        AggregateFunction::Count => format!("COUNT({arg_sql})"),
        AggregateFunction::CountDistinct => format!("COUNT(DISTINCT {arg_sql})"),
        AggregateFunction::Sum => format!("SUM({arg_sql})"),
        AggregateFunction::Min => format!("MIN({arg_sql})"),
        AggregateFunction::Max => format!("MAX({arg_sql})"),
        AggregateFunction::Avg => format!("AVG({arg_sql})"),
        AggregateFunction::StddevSamp => format!("STDDEV_SAMP({arg_sql})"),
    }
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(true) => "TRUE".to_string(),
        Literal::Bool(false) => "FALSE".to_string(),
        Literal::Int(v) => v.to_string(),
        Literal::Float(v) => format!("{v:?}"),
        Literal::Str(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

/// A single `SELECT <projections> FROM <table>` query.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub projections: Vec<Expression>,
    pub from: String,
}

impl SelectQuery {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            projections: Vec::new(),
            from: from.into(),
        }
    }

    pub fn project(mut self, expr: Expression) -> Self {
        self.projections.push(expr);
        self
    }

    /// Output column names in projection order.
    pub fn aliases(&self) -> Vec<&str> {
        self.projections
            .iter()
            .filter_map(|p| match p {
                Expression::Alias { alias, .. } => Some(alias.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn render(&self, dialect: Dialect) -> String {
        let projections = self
            .projections
            .iter()
            .map(|p| p.render(dialect))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {projections} FROM {}", dialect.quote_table(&self.from))
    }
}
