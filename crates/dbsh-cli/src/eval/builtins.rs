//! Operations and fields visible to expressions.

use std::collections::BTreeMap;

use tracing::info;

use super::value::ScriptValue;
use crate::error::{ShellError, ShellResult};
use crate::options::{self, OPTION_REGISTRY};
use crate::session::{CloseStatus, Session};

/// A callable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `help([name])`
    Help,
    /// `connect(url, user, password)`
    Connect,
    /// `close()`
    Close,
    /// `executeSql(sql)`
    ExecuteSql,
    /// `query(sql)`
    Query,
    /// `updateCount()`
    UpdateCount,
    /// `tables()`
    Tables,
    /// `transform(key, name)`
    Transform,
    /// `transformers()`
    Transformers,
    /// `set(option, value)`
    Set,
    /// `get(option)`
    Get,
}

/// A session field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Connection facts.
    Conn,
    /// Resolved configuration.
    Config,
    /// Current result set.
    Rs,
    /// Active statement state.
    Stmt,
    /// Connection metadata.
    Meta,
    /// Transformer bindings.
    Transformers,
}

/// One parameter of an operation.
#[derive(Debug)]
pub struct Param {
    /// Parameter name.
    pub name: &'static str,
    /// What the parameter means.
    pub description: &'static str,
}

/// Declaration of an operation.
#[derive(Debug)]
pub struct OperationSpec {
    /// The operation.
    pub operation: Operation,
    /// Name used in expressions.
    pub name: &'static str,
    /// What the operation does.
    pub description: &'static str,
    /// Parameters, required ones first.
    pub params: &'static [Param],
    /// How many leading parameters are required.
    pub required: usize,
}

impl OperationSpec {
    /// Call signature, with optional parameters in brackets.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i < self.required {
                    p.name.to_string()
                } else {
                    format!("[{}]", p.name)
                }
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }

    /// Returns true if `count` arguments are acceptable.
    pub fn accepts(&self, count: usize) -> bool {
        (self.required..=self.params.len()).contains(&count)
    }
}

/// Declaration of a field.
#[derive(Debug)]
pub struct FieldSpec {
    /// The field.
    pub field: Field,
    /// Name used in expressions.
    pub name: &'static str,
    /// What the field holds.
    pub description: &'static str,
}

/// Every operation.
pub static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        operation: Operation::Help,
        name: "help",
        description: "List operations and fields, or describe one of them",
        params: &[Param {
            name: "name",
            description: "Operation or field to describe",
        }],
        required: 0,
    },
    OperationSpec {
        operation: Operation::Connect,
        name: "connect",
        description: "Open a new connection, closing the current one",
        params: &[
            Param {
                name: "url",
                description: "Connection URL",
            },
            Param {
                name: "user",
                description: "Database user",
            },
            Param {
                name: "password",
                description: "Database password",
            },
        ],
        required: 3,
    },
    OperationSpec {
        operation: Operation::Close,
        name: "close",
        description: "Close the current connection",
        params: &[],
        required: 0,
    },
    OperationSpec {
        operation: Operation::ExecuteSql,
        name: "executeSql",
        description: "Execute SQL; true when it produced a result set",
        params: &[Param {
            name: "sql",
            description: "Statement text",
        }],
        required: 1,
    },
    OperationSpec {
        operation: Operation::Query,
        name: "query",
        description: "Execute SQL; yields the result set or the update count",
        params: &[Param {
            name: "sql",
            description: "Statement text",
        }],
        required: 1,
    },
    OperationSpec {
        operation: Operation::UpdateCount,
        name: "updateCount",
        description: "Rows changed by the last statement",
        params: &[],
        required: 0,
    },
    OperationSpec {
        operation: Operation::Tables,
        name: "tables",
        description: "List tables and views as the current result set",
        params: &[],
        required: 0,
    },
    OperationSpec {
        operation: Operation::Transform,
        name: "transform",
        description: "Bind a transformer to a column name or type name",
        params: &[
            Param {
                name: "key",
                description: "Column name or database type name",
            },
            Param {
                name: "name",
                description: "Transformer: text, hex, upper or length",
            },
        ],
        required: 2,
    },
    OperationSpec {
        operation: Operation::Transformers,
        name: "transformers",
        description: "Current transformer bindings",
        params: &[],
        required: 0,
    },
    OperationSpec {
        operation: Operation::Set,
        name: "set",
        description: "Change debug, limit, line_numbers or record",
        params: &[
            Param {
                name: "option",
                description: "Option key",
            },
            Param {
                name: "value",
                description: "New value",
            },
        ],
        required: 2,
    },
    OperationSpec {
        operation: Operation::Get,
        name: "get",
        description: "Read an option value",
        params: &[Param {
            name: "option",
            description: "Option key",
        }],
        required: 1,
    },
];

/// Every field.
pub static FIELDS: &[FieldSpec] = &[
    FieldSpec {
        field: Field::Conn,
        name: "conn",
        description: "Connection facts: connected, url, user, driver, connect_ms",
    },
    FieldSpec {
        field: Field::Config,
        name: "config",
        description: "Resolved options; sensitive values are masked",
    },
    FieldSpec {
        field: Field::Rs,
        name: "rs",
        description: "The current result set, or null",
    },
    FieldSpec {
        field: Field::Stmt,
        name: "stmt",
        description: "Statement state: executions, update_count, has_result_set",
    },
    FieldSpec {
        field: Field::Meta,
        name: "meta",
        description: "Connection metadata: product, version, driver, url, user",
    },
    FieldSpec {
        field: Field::Transformers,
        name: "transformers",
        description: "Transformer bindings by key",
    },
];

/// Finds an operation by name.
pub fn operation(name: &str) -> Option<&'static OperationSpec> {
    OPERATIONS
        .iter()
        .find(|o| o.name == name)
        .or_else(|| OPERATIONS.iter().find(|o| o.name.eq_ignore_ascii_case(name)))
}

/// Finds a field by name.
pub fn field(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

fn spec_of(op: Operation) -> Option<&'static OperationSpec> {
    OPERATIONS.iter().find(|o| o.operation == op)
}

/// Help for everything, or for one operation or field.
pub fn help_text(topic: Option<&str>) -> String {
    let Some(topic) = topic else {
        let width = OPERATIONS
            .iter()
            .map(|o| o.signature().len())
            .max()
            .unwrap_or(0);
        let mut out = String::from("Operations:\n");
        for op in OPERATIONS {
            out.push_str(&format!("  {:<width$}  {}\n", op.signature(), op.description, width = width));
        }
        out.push_str("Fields:\n");
        for f in FIELDS {
            out.push_str(&format!("  {:<width$}  {}\n", f.name, f.description, width = width));
        }
        return out.trim_end().to_string();
    };

    if let Some(op) = operation(topic) {
        let mut out = format!("{}\n  {}", op.signature(), op.description);
        for p in op.params {
            out.push_str(&format!("\n  {}: {}", p.name, p.description));
        }
        return out;
    }
    if let Some(f) = field(topic) {
        return format!("{}\n  {}", f.name, f.description);
    }
    format!("help for `{}` is not available", topic)
}

fn text_arg<'a>(args: &'a [ScriptValue], index: usize, op: Operation) -> ShellResult<&'a str> {
    match args.get(index) {
        Some(ScriptValue::Text(s)) => Ok(s),
        other => {
            let param = spec_of(op)
                .and_then(|s| s.params.get(index))
                .map(|p| p.name)
                .unwrap_or("argument");
            Err(ShellError::evaluation(format!(
                "{} expects text, got {}",
                param,
                other.map(ScriptValue::type_name).unwrap_or("nothing")
            )))
        }
    }
}

/// Runs an operation. Arity was checked when the expression was compiled.
pub fn call(op: Operation, args: &[ScriptValue], session: &mut Session) -> ShellResult<ScriptValue> {
    match op {
        Operation::Help => match args.first() {
            None => Ok(help_text(None).into()),
            Some(_) => Ok(help_text(Some(text_arg(args, 0, op)?)).into()),
        },
        Operation::Connect => {
            let (url, user, password) = (
                text_arg(args, 0, op)?,
                text_arg(args, 1, op)?,
                text_arg(args, 2, op)?,
            );
            session.connect(url, user, password)?;
            read_field(Field::Conn, session)
        }
        Operation::Close => Ok(match session.disconnect() {
            CloseStatus::Closed => "closed".into(),
            CloseStatus::AlreadyClosed => "already closed".into(),
        }),
        Operation::ExecuteSql => Ok(session.execute_sql(text_arg(args, 0, op)?)?.into()),
        Operation::Query => {
            if session.execute_sql(text_arg(args, 0, op)?)? {
                Ok(ScriptValue::ResultSet)
            } else {
                Ok(session.update_count().into())
            }
        }
        Operation::UpdateCount => Ok(session.update_count().into()),
        Operation::Tables => {
            session.list_tables()?;
            Ok(ScriptValue::ResultSet)
        }
        Operation::Transform => {
            let (key, name) = (text_arg(args, 0, op)?, text_arg(args, 1, op)?);
            session
                .transformers_mut()
                .register_named(key, name)
                .map_err(|e| ShellError::evaluation(e.to_string()))?;
            info!(key, transformer = name, "transformer registered");
            Ok(format!("{} -> {}", key.trim().to_uppercase(), name.trim().to_ascii_lowercase()).into())
        }
        Operation::Transformers => read_field(Field::Transformers, session),
        Operation::Set => {
            let key = text_arg(args, 0, op)?;
            let raw = args.get(1).map(ScriptValue::to_string).unwrap_or_default();
            let value = session.set_option(key, &raw)?;
            Ok(ScriptValue::from(&value))
        }
        Operation::Get => {
            let key = text_arg(args, 0, op)?;
            let descriptor = options::by_key(key)
                .filter(|d| !d.is_administrative())
                .ok_or_else(|| {
                    ShellError::evaluation(format!(
                        "unknown option '{}' (known: {})",
                        key,
                        readable_options().join(", ")
                    ))
                })?;
            Ok(match session.config().get(descriptor.id) {
                None => ScriptValue::Null,
                Some(_) if descriptor.sensitive => "****".into(),
                Some(value) => value.into(),
            })
        }
    }
}

/// Reads a field.
pub fn read_field(field: Field, session: &mut Session) -> ShellResult<ScriptValue> {
    let mut map: BTreeMap<String, ScriptValue> = BTreeMap::new();
    match field {
        Field::Conn => {
            map.insert("connected".to_string(), session.is_connected().into());
            if let Some(info) = session.connection_info() {
                map.insert("url".to_string(), info.url.as_str().into());
                map.insert("user".to_string(), info.user.as_str().into());
                map.insert("driver".to_string(), info.driver.as_str().into());
                map.insert(
                    "connect_ms".to_string(),
                    ScriptValue::Int(info.elapsed.as_millis() as i64),
                );
            }
        }
        Field::Config => {
            for (descriptor, value) in session.config().entries() {
                let shown = if descriptor.sensitive {
                    "****".into()
                } else {
                    value.into()
                };
                map.insert(descriptor.key.to_string(), shown);
            }
        }
        Field::Rs => {
            return Ok(if session.has_result_set() {
                ScriptValue::ResultSet
            } else {
                ScriptValue::Null
            })
        }
        Field::Stmt => {
            let Some(statement) = session.statement() else {
                return Ok(ScriptValue::Null);
            };
            map.insert(
                "executions".to_string(),
                ScriptValue::Int(statement.executions() as i64),
            );
            map.insert("update_count".to_string(), statement.update_count().into());
            map.insert(
                "has_result_set".to_string(),
                statement.result_set().is_some().into(),
            );
        }
        Field::Meta => {
            let meta = session.metadata()?;
            map.insert("product".to_string(), meta.product_name.as_str().into());
            map.insert("version".to_string(), meta.product_version.as_str().into());
            map.insert("driver".to_string(), meta.driver_name.as_str().into());
            map.insert("url".to_string(), meta.url.as_str().into());
            map.insert("user".to_string(), meta.user.as_str().into());
        }
        Field::Transformers => {
            for (key, name) in session.transformers().bindings() {
                map.insert(key, name.into());
            }
        }
    }
    Ok(ScriptValue::Map(map))
}

/// Names of all options readable through `get`.
pub fn readable_options() -> Vec<&'static str> {
    OPTION_REGISTRY
        .iter()
        .filter(|d| !d.is_administrative())
        .map(|d| d.key)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::memory_session;

    #[test]
    fn test_signatures_and_arity() {
        let help = operation("help").unwrap();
        assert_eq!(help.signature(), "help([name])");
        assert!(help.accepts(0) && help.accepts(1) && !help.accepts(2));
        let connect = operation("connect").unwrap();
        assert_eq!(connect.signature(), "connect(url, user, password)");
        assert!(!connect.accepts(2));
        assert!(operation("EXECUTESQL").is_some());
    }

    #[test]
    fn test_help_lists_everything() {
        let text = help_text(None);
        for op in OPERATIONS {
            assert!(text.contains(&op.signature()));
            assert!(text.contains(op.description));
        }
        for f in FIELDS {
            assert!(text.contains(f.description));
        }
    }

    #[test]
    fn test_help_for_one_topic() {
        let text = help_text(Some("connect"));
        assert!(text.starts_with("connect(url, user, password)"));
        assert!(text.contains("url: Connection URL"));
        assert!(text.contains("password: Database password"));
        assert!(help_text(Some("meta")).contains("product"));
        assert_eq!(help_text(Some("frobnicate")), "help for `frobnicate` is not available");
    }

    #[test]
    fn test_config_field_masks_password() {
        let mut session = memory_session();
        let ScriptValue::Map(config) = read_field(Field::Config, &mut session).unwrap() else {
            panic!("expected map");
        };
        assert_eq!(config.get("password"), Some(&ScriptValue::from("****")));
        assert_eq!(config.get("url"), Some(&ScriptValue::from("sqlite::memory:")));

        let value = call(Operation::Get, &["password".into()], &mut session).unwrap();
        assert_eq!(value, ScriptValue::from("****"));
        let value = call(Operation::Get, &["limit".into()], &mut session).unwrap();
        assert_eq!(value, ScriptValue::Int(-1));
        assert!(call(Operation::Get, &["help".into()], &mut session).is_err());
    }

    #[test]
    fn test_query_and_update_count() {
        let mut session = memory_session();
        call(Operation::ExecuteSql, &["CREATE TABLE t (a INT)".into()], &mut session).unwrap();
        let n = call(Operation::Query, &["INSERT INTO t VALUES (1), (2)".into()], &mut session)
            .unwrap();
        assert_eq!(n, ScriptValue::Int(2));
        assert_eq!(call(Operation::UpdateCount, &[], &mut session).unwrap(), ScriptValue::Int(2));
        let rs = call(Operation::Query, &["SELECT a FROM t".into()], &mut session).unwrap();
        assert_eq!(rs, ScriptValue::ResultSet);
        assert_eq!(read_field(Field::Rs, &mut session).unwrap(), ScriptValue::ResultSet);
    }

    #[test]
    fn test_transform_registers_binding() {
        let mut session = memory_session();
        let out = call(Operation::Transform, &["payload".into(), "hex".into()], &mut session).unwrap();
        assert_eq!(out, ScriptValue::from("PAYLOAD -> hex"));
        let ScriptValue::Map(bindings) = call(Operation::Transformers, &[], &mut session).unwrap() else {
            panic!("expected map");
        };
        assert_eq!(bindings.get("PAYLOAD"), Some(&ScriptValue::from("hex")));
        assert!(matches!(
            call(Operation::Transform, &["x".into(), "rot13".into()], &mut session),
            Err(ShellError::Evaluation(_))
        ));
    }

    #[test]
    fn test_close_and_conn_field() {
        let mut session = memory_session();
        assert_eq!(call(Operation::Close, &[], &mut session).unwrap(), ScriptValue::from("closed"));
        assert_eq!(
            call(Operation::Close, &[], &mut session).unwrap(),
            ScriptValue::from("already closed")
        );
        let ScriptValue::Map(conn) = read_field(Field::Conn, &mut session).unwrap() else {
            panic!("expected map");
        };
        assert_eq!(conn.get("connected"), Some(&ScriptValue::Bool(false)));
        assert_eq!(read_field(Field::Stmt, &mut session).unwrap(), ScriptValue::Null);
    }

    #[test]
    fn test_readable_options() {
        let keys = readable_options();
        assert!(keys.contains(&"limit"));
        assert!(!keys.contains(&"properties"));
    }
}
