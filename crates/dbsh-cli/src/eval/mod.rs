//! Expression mode.
//!
//! Input prefixed with `!` is an expression evaluated against the live
//! [`Session`]. Evaluation has two phases. Compilation parses the text and
//! resolves every name, producing a [`CompiledUnit`] with a fresh
//! `eval_<id>` name. Execution interprets the unit. Failures in either phase
//! are reported and never end the shell.
//!
//! ```text
//! dbsh> !help('query');
//! dbsh> !executeSql('SELECT 1');
//! dbsh> !config.limit + 1;
//! ```

pub(crate) mod builtins;
mod expr;
mod value;

pub use value::ScriptValue;

use self::expr::{BinaryOp, Expr, UnaryOp};

use std::cmp::Ordering;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{ShellError, ShellResult};
use crate::session::Session;

/// A compiled expression, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUnit {
    name: String,
    source: String,
    expr: Expr,
}

impl CompiledUnit {
    /// Unique unit name, `eval_<id>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolved expression tree.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

/// Compiles and runs expressions.
#[derive(Debug)]
pub struct Evaluator {
    next_id: u64,
}

impl Evaluator {
    /// Creates an evaluator whose unit ids start at the current time in
    /// milliseconds.
    pub fn new() -> Self {
        Self {
            next_id: u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default(),
        }
    }

    /// Compiles `source`.
    pub fn compile(&mut self, source: &str) -> ShellResult<CompiledUnit> {
        let name = format!("eval_{}", self.next_id);
        self.next_id += 1;

        let expr = expr::compile(source).map_err(|e| {
            warn!(unit = %name, error = %e, "expression failed to compile");
            e
        })?;
        debug!(unit = %name, source, "expression compiled");
        Ok(CompiledUnit {
            name,
            source: source.to_string(),
            expr,
        })
    }

    /// Runs a compiled unit against the session.
    pub fn execute(&self, unit: &CompiledUnit, session: &mut Session) -> ShellResult<ScriptValue> {
        debug!(unit = %unit.name(), source = unit.source(), "executing expression");
        eval(unit.expr(), session).map_err(|e| {
            warn!(unit = %unit.name(), error = %e, "expression failed");
            match e {
                ShellError::Evaluation(_) => e,
                other => ShellError::Evaluation(other.to_string()),
            }
        })
    }

    /// Compiles and runs `source`.
    pub fn evaluate(&mut self, source: &str, session: &mut Session) -> ShellResult<ScriptValue> {
        let unit = self.compile(source)?;
        self.execute(&unit, session)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn eval(expr: &Expr, session: &mut Session) -> ShellResult<ScriptValue> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Field(field) => builtins::read_field(*field, session),
        Expr::Member { base, name } => match eval(base, session)? {
            ScriptValue::Map(mut map) => map
                .remove(name.as_str())
                .ok_or_else(|| ShellError::evaluation(format!("no member `{}`", name))),
            other => Err(ShellError::evaluation(format!(
                "cannot read `{}` of a {} value",
                name,
                other.type_name()
            ))),
        },
        Expr::Call { operation, args } => {
            let args = args
                .iter()
                .map(|a| eval(a, session))
                .collect::<ShellResult<Vec<_>>>()?;
            builtins::call(*operation, &args, session)
        }
        Expr::Unary { op, expr } => unary(*op, eval(expr, session)?),
        Expr::Binary { left, op: BinaryOp::And, right } => {
            if !eval(left, session)?.as_bool()? {
                return Ok(ScriptValue::Bool(false));
            }
            Ok(ScriptValue::Bool(eval(right, session)?.as_bool()?))
        }
        Expr::Binary { left, op: BinaryOp::Or, right } => {
            if eval(left, session)?.as_bool()? {
                return Ok(ScriptValue::Bool(true));
            }
            Ok(ScriptValue::Bool(eval(right, session)?.as_bool()?))
        }
        Expr::Binary { left, op, right } => {
            let left = eval(left, session)?;
            let right = eval(right, session)?;
            binary(*op, left, right)
        }
    }
}

fn unary(op: UnaryOp, value: ScriptValue) -> ShellResult<ScriptValue> {
    match (op, value) {
        (UnaryOp::IsNull, v) => Ok(ScriptValue::Bool(v.is_null())),
        (UnaryOp::IsNotNull, v) => Ok(ScriptValue::Bool(!v.is_null())),
        (UnaryOp::Not, v) => Ok(ScriptValue::Bool(!v.as_bool()?)),
        (UnaryOp::Neg, ScriptValue::Int(i)) => i
            .checked_neg()
            .map(ScriptValue::Int)
            .ok_or_else(|| ShellError::evaluation("integer overflow")),
        (UnaryOp::Neg, ScriptValue::Float(f)) => Ok(ScriptValue::Float(-f)),
        (UnaryOp::Plus, v @ (ScriptValue::Int(_) | ScriptValue::Float(_))) => Ok(v),
        (_, v) => Err(ShellError::evaluation(format!(
            "cannot apply sign to a {} value",
            v.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: ScriptValue, right: ScriptValue) -> ShellResult<ScriptValue> {
    use self::value::ScriptValue::{Float, Int, Text};

    let ordering = |l: &ScriptValue, r: &ScriptValue, accept: &[Ordering]| -> ShellResult<ScriptValue> {
        Ok(ScriptValue::Bool(accept.contains(&l.compare(r)?)))
    };
    let overflow = || ShellError::evaluation("integer overflow");

    match (op, &left, &right) {
        (BinaryOp::Concat, l, r) | (BinaryOp::Add, l @ Text(_), r) | (BinaryOp::Add, l, r @ Text(_)) => {
            Ok(Text(format!("{}{}", l, r)))
        }
        (BinaryOp::Eq, l, r) => Ok(ScriptValue::Bool(l.loose_eq(r))),
        (BinaryOp::NotEq, l, r) => Ok(ScriptValue::Bool(!l.loose_eq(r))),
        (BinaryOp::Lt, l, r) => ordering(l, r, &[Ordering::Less]),
        (BinaryOp::LtEq, l, r) => ordering(l, r, &[Ordering::Less, Ordering::Equal]),
        (BinaryOp::Gt, l, r) => ordering(l, r, &[Ordering::Greater]),
        (BinaryOp::GtEq, l, r) => ordering(l, r, &[Ordering::Greater, Ordering::Equal]),
        (BinaryOp::Div | BinaryOp::Mod, _, Int(0)) => Err(ShellError::evaluation("division by zero")),
        (BinaryOp::Div | BinaryOp::Mod, _, Float(f)) if *f == 0.0 => {
            Err(ShellError::evaluation("division by zero"))
        }
        (op, Int(a), Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                BinaryOp::Div => a.checked_div(*b),
                BinaryOp::Mod => a.checked_rem(*b),
                _ => return Err(unsupported(op, &left, &right)),
            };
            result.map(Int).ok_or_else(overflow)
        }
        (op, l @ (Int(_) | Float(_)), r @ (Int(_) | Float(_))) => {
            let (a, b) = (as_float(l), as_float(r));
            Ok(Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => return Err(unsupported(op, &left, &right)),
            }))
        }
        (op, l, r) => Err(unsupported(op, l, r)),
    }
}

fn as_float(value: &ScriptValue) -> f64 {
    match value {
        ScriptValue::Int(i) => *i as f64,
        ScriptValue::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn unsupported(op: BinaryOp, left: &ScriptValue, right: &ScriptValue) -> ShellError {
    ShellError::evaluation(format!(
        "cannot apply `{}` to {} and {}",
        op,
        left.type_name(),
        right.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::memory_session;

    fn run(source: &str) -> ShellResult<ScriptValue> {
        let mut session = memory_session();
        Evaluator::new().evaluate(source, &mut session)
    }

    #[test]
    fn test_unit_names_are_unique_and_increasing() {
        let mut evaluator = Evaluator::new();
        let first = evaluator.compile("1").unwrap();
        let second = evaluator.compile("2").unwrap();
        assert!(first.name().starts_with("eval_"));
        assert_ne!(first.name(), second.name());
        let id = |u: &CompiledUnit| u.name()["eval_".len()..].parse::<u64>().unwrap();
        assert_eq!(id(&second), id(&first) + 1);
        assert_eq!(second.source(), "2");
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("1 + 2 * 3").unwrap(), ScriptValue::Int(7));
        assert_eq!(run("(1 + 2) * 3").unwrap(), ScriptValue::Int(9));
        assert_eq!(run("7 % 4").unwrap(), ScriptValue::Int(3));
        assert_eq!(run("1 / 2.0").unwrap(), ScriptValue::Float(0.5));
        assert_eq!(run("-(3)").unwrap(), ScriptValue::Int(-3));
        assert_eq!(run("'n=' + 1").unwrap(), ScriptValue::from("n=1"));
        assert_eq!(run("'a' || 'b'").unwrap(), ScriptValue::from("ab"));
    }

    #[test]
    fn test_logic_and_comparison() {
        assert_eq!(run("1 < 2 AND 'b' > 'a'").unwrap(), ScriptValue::Bool(true));
        assert_eq!(run("1 = 1.0").unwrap(), ScriptValue::Bool(true));
        assert_eq!(run("NOT (2 <> 2)").unwrap(), ScriptValue::Bool(true));
        assert_eq!(run("true OR 1 / 0 = 1").unwrap(), ScriptValue::Bool(true));
        assert_eq!(run("null IS NULL").unwrap(), ScriptValue::Bool(true));
    }

    #[test]
    fn test_division_by_zero_is_an_evaluation_error() {
        let err = run("1 / 0").unwrap_err();
        assert!(matches!(err, ShellError::Evaluation(ref m) if m == "division by zero"));
        assert!(!err.is_fatal());
        assert!(matches!(run("1 % 0"), Err(ShellError::Evaluation(_))));
    }

    #[test]
    fn test_type_errors() {
        assert!(matches!(run("1 AND true"), Err(ShellError::Evaluation(_))));
        assert!(matches!(run("-'a'"), Err(ShellError::Evaluation(_))));
        assert!(matches!(run("1 < 'a'"), Err(ShellError::Evaluation(_))));
        assert!(matches!(
            run("9223372036854775807 + 1"),
            Err(ShellError::Evaluation(ref m)) if m == "integer overflow"
        ));
    }

    #[test]
    fn test_compile_errors_do_not_run() {
        let mut session = memory_session();
        let mut evaluator = Evaluator::new();
        let err = evaluator
            .evaluate("executeSql('CREATE TABLE t (a INT)') + nothing", &mut session)
            .unwrap_err();
        assert!(matches!(err, ShellError::Compile(_)));
        assert!(session.execute_sql("SELECT * FROM t").is_err());
    }

    #[test]
    fn test_member_access() {
        assert_eq!(run("config.limit").unwrap(), ScriptValue::Int(-1));
        assert_eq!(run("config.password").unwrap(), ScriptValue::from("****"));
        assert_eq!(run("meta.product").unwrap(), ScriptValue::from("SQLite"));
        assert_eq!(run("conn.connected").unwrap(), ScriptValue::Bool(true));
        assert!(matches!(run("config.nope"), Err(ShellError::Evaluation(_))));
        assert!(matches!(run("rs.x"), Err(ShellError::Evaluation(_))));
    }

    #[test]
    fn test_session_operations() {
        let mut session = memory_session();
        let mut evaluator = Evaluator::new();
        let mut eval = |s: &str| evaluator.evaluate(s, &mut session);

        assert_eq!(
            eval("executeSql('CREATE TABLE t (a INT)')").unwrap(),
            ScriptValue::Bool(false)
        );
        assert_eq!(
            eval("query('INSERT INTO t VALUES (1)')").unwrap(),
            ScriptValue::Int(1)
        );
        assert_eq!(eval("query('SELECT a FROM t')").unwrap(), ScriptValue::ResultSet);
        assert_eq!(eval("stmt.executions").unwrap(), ScriptValue::Int(3));
        assert_eq!(eval("set('limit', 10)").unwrap(), ScriptValue::Int(10));
        assert_eq!(eval("get('limit') * 2").unwrap(), ScriptValue::Int(20));
        assert!(matches!(eval("executeSql('SELEC')"), Err(ShellError::Evaluation(_))));
    }

    #[test]
    fn test_help_expression() {
        let ScriptValue::Text(text) = run("help()").unwrap() else {
            panic!("expected text");
        };
        assert!(text.contains("executeSql(sql)"));
        let ScriptValue::Text(text) = run("help('nope')").unwrap() else {
            panic!("expected text");
        };
        assert_eq!(text, "help for `nope` is not available");
    }

    #[test]
    fn test_connect_failure_is_not_fatal() {
        let err = run("connect('sqlite:/no/such/dir/x.db', 'u', 'p')").unwrap_err();
        assert!(matches!(err, ShellError::Evaluation(_)));
    }
}
