//! Expression trees.
//!
//! Source text is parsed with `sqlparser`'s expression parser and converted
//! into [`Expr`]. Conversion resolves every name against the operation and
//! field registry, so a tree that converts cleanly only refers to things that
//! exist and calls operations with an acceptable number of arguments.

use std::fmt;

use sqlparser::ast::{
    self as sql_ast, FunctionArg, FunctionArgExpr, Ident, ObjectName, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use super::builtins::{self, Field, Operation};
use super::value::ScriptValue;
use crate::error::{ShellError, ShellResult};

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Plus,
    /// `NOT x`
    Not,
    /// `x IS NULL`
    IsNull,
    /// `x IS NOT NULL`
    IsNotNull,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    fn from_sql_ast(op: &sql_ast::BinaryOperator) -> ShellResult<Self> {
        Ok(match op {
            sql_ast::BinaryOperator::Plus => BinaryOp::Add,
            sql_ast::BinaryOperator::Minus => BinaryOp::Sub,
            sql_ast::BinaryOperator::Multiply => BinaryOp::Mul,
            sql_ast::BinaryOperator::Divide => BinaryOp::Div,
            sql_ast::BinaryOperator::Modulo => BinaryOp::Mod,
            sql_ast::BinaryOperator::StringConcat => BinaryOp::Concat,
            sql_ast::BinaryOperator::Eq => BinaryOp::Eq,
            sql_ast::BinaryOperator::NotEq => BinaryOp::NotEq,
            sql_ast::BinaryOperator::Lt => BinaryOp::Lt,
            sql_ast::BinaryOperator::LtEq => BinaryOp::LtEq,
            sql_ast::BinaryOperator::Gt => BinaryOp::Gt,
            sql_ast::BinaryOperator::GtEq => BinaryOp::GtEq,
            sql_ast::BinaryOperator::And => BinaryOp::And,
            sql_ast::BinaryOperator::Or => BinaryOp::Or,
            other => {
                return Err(ShellError::compile(format!(
                    "operator `{}` is not supported",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "||",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        };
        f.write_str(symbol)
    }
}

/// A resolved expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(ScriptValue),
    /// Session field.
    Field(Field),
    /// Member of a map value, e.g. `config.limit`.
    Member {
        /// Map-valued expression.
        base: Box<Expr>,
        /// Member name.
        name: String,
    },
    /// Operation call.
    Call {
        /// The operation.
        operation: Operation,
        /// Arguments, left to right.
        args: Vec<Expr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<Expr>,
    },
}

/// Parses and resolves expression source.
pub fn compile(source: &str) -> ShellResult<Expr> {
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(source)
        .map_err(|e| ShellError::compile(e.to_string()))?;
    let ast = parser
        .parse_expr()
        .map_err(|e| ShellError::compile(e.to_string()))?;

    let next = parser.peek_token();
    if next.token != Token::EOF {
        return Err(ShellError::compile(format!(
            "unexpected `{}` after the expression",
            next.token
        )));
    }
    Expr::from_sql_ast(ast)
}

impl Expr {
    /// Converts and resolves a parsed expression.
    pub fn from_sql_ast(expr: sql_ast::Expr) -> ShellResult<Self> {
        match expr {
            sql_ast::Expr::Identifier(ident) => resolve_identifier(ident),
            sql_ast::Expr::CompoundIdentifier(idents) => {
                let mut parts = idents.into_iter();
                let Some(first) = parts.next() else {
                    return Err(ShellError::compile("empty identifier"));
                };
                let mut expr = resolve_field(&first)?;
                for member in parts {
                    expr = Expr::Member {
                        base: Box::new(expr),
                        name: member.value,
                    };
                }
                Ok(expr)
            }
            sql_ast::Expr::Value(value) => Ok(Expr::Literal(literal(value)?)),
            sql_ast::Expr::Nested(inner) => Expr::from_sql_ast(*inner),
            sql_ast::Expr::UnaryOp { op, expr } => {
                let op = match op {
                    sql_ast::UnaryOperator::Minus => UnaryOp::Neg,
                    sql_ast::UnaryOperator::Plus => UnaryOp::Plus,
                    sql_ast::UnaryOperator::Not => UnaryOp::Not,
                    other => {
                        return Err(ShellError::compile(format!(
                            "operator `{}` is not supported",
                            other
                        )))
                    }
                };
                Ok(Expr::Unary {
                    op,
                    expr: Box::new(Expr::from_sql_ast(*expr)?),
                })
            }
            sql_ast::Expr::IsNull(expr) => Ok(Expr::Unary {
                op: UnaryOp::IsNull,
                expr: Box::new(Expr::from_sql_ast(*expr)?),
            }),
            sql_ast::Expr::IsNotNull(expr) => Ok(Expr::Unary {
                op: UnaryOp::IsNotNull,
                expr: Box::new(Expr::from_sql_ast(*expr)?),
            }),
            sql_ast::Expr::BinaryOp { left, op, right } => Ok(Expr::Binary {
                left: Box::new(Expr::from_sql_ast(*left)?),
                op: BinaryOp::from_sql_ast(&op)?,
                right: Box::new(Expr::from_sql_ast(*right)?),
            }),
            sql_ast::Expr::Function(func) => {
                let spec = resolve_operation(&func.name)?;
                let args = func
                    .args
                    .into_iter()
                    .map(|arg| match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Expr::from_sql_ast(e),
                        other => Err(ShellError::compile(format!(
                            "argument `{}` is not supported",
                            other
                        ))),
                    })
                    .collect::<ShellResult<Vec<_>>>()?;

                if !spec.accepts(args.len()) {
                    return Err(ShellError::compile(format!(
                        "`{}` expects {}, got {} argument{}",
                        spec.signature(),
                        arity(spec.required, spec.params.len()),
                        args.len(),
                        if args.len() == 1 { "" } else { "s" }
                    )));
                }
                Ok(Expr::Call {
                    operation: spec.operation,
                    args,
                })
            }
            other => Err(ShellError::compile(format!(
                "`{}` is not a supported expression",
                other
            ))),
        }
    }
}

fn arity(required: usize, max: usize) -> String {
    match (required, max) {
        (0, 0) => "no arguments".to_string(),
        (r, m) if r == m => format!("{} argument{}", r, if r == 1 { "" } else { "s" }),
        (r, m) => format!("{} to {} arguments", r, m),
    }
}

fn literal(value: SqlValue) -> ShellResult<ScriptValue> {
    match value {
        SqlValue::Number(n, _) => n
            .parse::<i64>()
            .map(ScriptValue::Int)
            .or_else(|_| n.parse::<f64>().map(ScriptValue::Float))
            .map_err(|_| ShellError::compile(format!("invalid number `{}`", n))),
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => Ok(ScriptValue::Text(s)),
        SqlValue::Boolean(b) => Ok(ScriptValue::Bool(b)),
        SqlValue::Null => Ok(ScriptValue::Null),
        other => Err(ShellError::compile(format!(
            "literal `{}` is not supported",
            other
        ))),
    }
}

fn resolve_identifier(ident: Ident) -> ShellResult<Expr> {
    // The generic dialect reads "text" as a quoted identifier.
    if ident.quote_style == Some('"') {
        return Ok(Expr::Literal(ScriptValue::Text(ident.value)));
    }
    if builtins::field(&ident.value).is_none() && builtins::operation(&ident.value).is_some() {
        return Err(ShellError::compile(format!(
            "`{}` is an operation; call it as {}(...)",
            ident.value, ident.value
        )));
    }
    resolve_field(&ident)
}

fn resolve_field(ident: &Ident) -> ShellResult<Expr> {
    builtins::field(&ident.value)
        .map(|spec| Expr::Field(spec.field))
        .ok_or_else(|| ShellError::compile(format!("unknown identifier `{}`", ident.value)))
}

fn resolve_operation(name: &ObjectName) -> ShellResult<&'static builtins::OperationSpec> {
    let [ident] = name.0.as_slice() else {
        return Err(ShellError::compile(format!("unknown operation `{}`", name)));
    };
    builtins::operation(&ident.value)
        .ok_or_else(|| ShellError::compile(format!("unknown operation `{}`", ident.value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_err(source: &str) -> String {
        match compile(source) {
            Err(ShellError::Compile(msg)) => msg,
            other => panic!("expected compile error for {:?}, got {:?}", source, other),
        }
    }

    #[test]
    fn test_literals() {
        assert_eq!(compile("42").unwrap(), Expr::Literal(ScriptValue::Int(42)));
        assert_eq!(compile("1.5").unwrap(), Expr::Literal(ScriptValue::Float(1.5)));
        assert_eq!(compile("'a b'").unwrap(), Expr::Literal("a b".into()));
        assert_eq!(compile("\"quoted\"").unwrap(), Expr::Literal("quoted".into()));
        assert_eq!(compile("true").unwrap(), Expr::Literal(ScriptValue::Bool(true)));
        assert_eq!(compile("null").unwrap(), Expr::Literal(ScriptValue::Null));
    }

    #[test]
    fn test_calls_and_fields() {
        assert_eq!(
            compile("help()").unwrap(),
            Expr::Call {
                operation: Operation::Help,
                args: vec![]
            }
        );
        assert_eq!(
            compile("executeSql('SELECT 1')").unwrap(),
            Expr::Call {
                operation: Operation::ExecuteSql,
                args: vec![Expr::Literal("SELECT 1".into())]
            }
        );
        assert_eq!(compile("meta").unwrap(), Expr::Field(Field::Meta));
        assert_eq!(
            compile("config.limit").unwrap(),
            Expr::Member {
                base: Box::new(Expr::Field(Field::Config)),
                name: "limit".to_string()
            }
        );
    }

    #[test]
    fn test_operators() {
        let expr = compile("1 + 2 * 3").unwrap();
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));

        assert!(matches!(
            compile("NOT (1 = 2)").unwrap(),
            Expr::Unary { op: UnaryOp::Not, .. }
        ));
        assert!(matches!(
            compile("rs IS NULL").unwrap(),
            Expr::Unary { op: UnaryOp::IsNull, .. }
        ));
        assert!(matches!(
            compile("'a' || 'b'").unwrap(),
            Expr::Binary { op: BinaryOp::Concat, .. }
        ));
    }

    #[test]
    fn test_unknown_names_fail_to_compile() {
        assert!(compile_err("frobnicate()").contains("unknown operation `frobnicate`"));
        assert!(compile_err("nothing").contains("unknown identifier `nothing`"));
        assert!(compile_err("nothing.at.all").contains("unknown identifier"));
        assert!(compile_err("close").contains("is an operation"));
    }

    #[test]
    fn test_arity_is_checked() {
        assert!(compile_err("help('a', 'b')").contains("0 to 1 arguments"));
        assert!(compile_err("connect('u')").contains("3 arguments"));
        assert!(compile_err("close(1)").contains("no arguments"));
    }

    #[test]
    fn test_syntax_errors() {
        compile_err("1 +");
        compile_err("help() help()");
        compile_err("");
    }
}
