//! SQL expressions for query building.
//!
//! This module provides the predicate DSL used for WHERE, HAVING and JOIN ... ON
//! clauses. Expressions render to SQL text while collecting bound parameters.

use relmap_core::{Dialect, Value};

/// A SQL expression that can be used in WHERE, HAVING, ON, etc.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name or alias
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Literal value, bound as a parameter
    Literal(Value),

    /// Binary operation (e.g., a = b, a AND b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// NOT expr
    Not(Box<Expr>),

    /// Function call such as `LOWER(name)`
    Function { name: String, args: Vec<Expr> },

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// LIKE / NOT LIKE pattern
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
    },

    /// Raw SQL fragment, rendered verbatim
    Raw(String),
}

/// Comparison and logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// SQL spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    /// Higher binds tighter.
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
        }
    }
}

impl Expr {
    /// Column reference. A dotted name (`"users.id"`) becomes a qualified reference.
    pub fn col(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.split_once('.') {
            Some((table, column)) => Expr::qualified(table, column),
            None => Expr::Column { table: None, name },
        }
    }

    /// `table.column`
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Value bound as a parameter.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// `LIKE`; the pattern is bound as a parameter.
    pub fn like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
        }
    }

    pub fn not_like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: true,
        }
    }

    pub fn in_list<V: Into<Expr>>(self, values: impl IntoIterator<Item = V>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in_list<V: Into<Expr>>(self, values: impl IntoIterator<Item = V>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// Build SQL for this expression, appending bound values to `params`.
    ///
    /// Placeholders are numbered by their position in `params`, so the same
    /// vector must be threaded through every clause of one statement.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        match self {
            Expr::Column { table, name } => match table {
                Some(t) => format!(
                    "{}.{}",
                    dialect.quote_identifier(t),
                    dialect.quote_identifier(name)
                ),
                None => dialect.quote_identifier(name),
            },

            Expr::Literal(value) => {
                params.push(value.clone());
                dialect.placeholder(params.len())
            }

            Expr::Binary { left, op, right } => {
                let left_sql = Self::build_operand(left, *op, dialect, params);
                let right_sql = Self::build_operand(right, *op, dialect, params);
                format!("{left_sql} {} {right_sql}", op.as_str())
            }

            Expr::Not(expr) => format!("NOT ({})", expr.build(dialect, params)),

            Expr::Function { name, args } => {
                let arg_sqls: Vec<_> = args.iter().map(|a| a.build(dialect, params)).collect();
                format!("{name}({})", arg_sqls.join(", "))
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                let expr_sql = expr.build(dialect, params);
                let value_sqls: Vec<_> = values.iter().map(|v| v.build(dialect, params)).collect();
                let not_str = if *negated { "NOT " } else { "" };
                format!("{expr_sql} {not_str}IN ({})", value_sqls.join(", "))
            }

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build(dialect, params);
                let not_str = if *negated { " NOT" } else { "" };
                format!("{expr_sql} IS{not_str} NULL")
            }

            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let expr_sql = expr.build(dialect, params);
                params.push(Value::Text(pattern.clone()));
                let not_str = if *negated { "NOT " } else { "" };
                format!("{expr_sql} {not_str}LIKE {}", dialect.placeholder(params.len()))
            }

            Expr::Raw(sql) => sql.clone(),
        }
    }

    fn build_operand(
        operand: &Expr,
        parent: BinaryOp,
        dialect: Dialect,
        params: &mut Vec<Value>,
    ) -> String {
        let sql = operand.build(dialect, params);
        match operand {
            Expr::Binary { op, .. } if op.precedence() < parent.precedence() => {
                format!("({sql})")
            }
            _ => sql,
        }
    }
}

macro_rules! literal_exprs {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::Literal(value.into())
                }
            }
        )*
    };
}

literal_exprs!(Value, &str, String, i32, i64, f64, bool);

impl From<&Value> for Expr {
    fn from(value: &Value) -> Self {
        Expr::Literal(value.clone())
    }
}
