//! Value transformers.
//!
//! A transformer turns a raw cell value into display text. Transformers are
//! bound to a lookup key, either a column name or a database type name, in
//! the [`TransformerRegistry`]. Column-name bindings win over type-name
//! bindings.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use dbsh_client::Value;
use thiserror::Error;

use crate::error::ShellError;

/// Error raised by a transformer for a single cell.
#[derive(Debug, Error)]
#[error("{transformer}: {message}")]
pub struct TransformError {
    /// Name of the failing transformer.
    pub transformer: String,
    /// What went wrong.
    pub message: String,
}

impl TransformError {
    fn new(transformer: &str, message: impl Into<String>) -> Self {
        Self {
            transformer: transformer.to_string(),
            message: message.into(),
        }
    }
}

impl From<TransformError> for ShellError {
    fn from(err: TransformError) -> Self {
        ShellError::Transform(err.to_string())
    }
}

/// Converts a raw value into display text.
pub trait Transformer: Send + Sync {
    /// Name the transformer is instantiated by.
    fn name(&self) -> &str;

    /// Transforms one value.
    fn transform(&self, value: &Value) -> Result<String, TransformError>;
}

/// Decodes binary and large-object values as UTF-8 text.
#[derive(Debug, Default)]
pub struct TextTransformer;

impl Transformer for TextTransformer {
    fn name(&self) -> &str {
        "text"
    }

    fn transform(&self, value: &Value) -> Result<String, TransformError> {
        Ok(match value {
            Value::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            other => other.to_string(),
        })
    }
}

/// Renders bytes as lower-case hex.
#[derive(Debug, Default)]
pub struct HexTransformer;

impl Transformer for HexTransformer {
    fn name(&self) -> &str {
        "hex"
    }

    fn transform(&self, value: &Value) -> Result<String, TransformError> {
        let bytes = match value {
            Value::Blob(bytes) => bytes.as_slice(),
            Value::Text(text) => text.as_bytes(),
            Value::Null => return Ok(value.to_string()),
            other => {
                return Err(TransformError::new(
                    self.name(),
                    format!("cannot hex-encode {} value", other.type_name()),
                ))
            }
        };
        let mut out = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            let _ = write!(out, "{:02x}", byte);
        }
        Ok(out)
    }
}

/// Upper-cases the display text.
#[derive(Debug, Default)]
pub struct UpperTransformer;

impl Transformer for UpperTransformer {
    fn name(&self) -> &str {
        "upper"
    }

    fn transform(&self, value: &Value) -> Result<String, TransformError> {
        Ok(TextTransformer.transform(value)?.to_uppercase())
    }
}

/// Replaces the value with its length: bytes for blobs, characters for text.
#[derive(Debug, Default)]
pub struct LengthTransformer;

impl Transformer for LengthTransformer {
    fn name(&self) -> &str {
        "length"
    }

    fn transform(&self, value: &Value) -> Result<String, TransformError> {
        match value {
            Value::Blob(bytes) => Ok(bytes.len().to_string()),
            Value::Text(text) => Ok(text.chars().count().to_string()),
            Value::Null => Ok(value.to_string()),
            other => Err(TransformError::new(
                self.name(),
                format!("{} values have no length", other.type_name()),
            )),
        }
    }
}

/// Names accepted by [`instantiate`].
pub const BUILTIN_TRANSFORMERS: &[&str] = &["text", "hex", "upper", "length"];

/// Creates a built-in transformer by name.
pub fn instantiate(name: &str) -> Option<Arc<dyn Transformer>> {
    let transformer: Arc<dyn Transformer> = match name.trim().to_ascii_lowercase().as_str() {
        "text" => Arc::new(TextTransformer),
        "hex" => Arc::new(HexTransformer),
        "upper" => Arc::new(UpperTransformer),
        "length" => Arc::new(LengthTransformer),
        _ => return None,
    };
    Some(transformer)
}

/// Transformers keyed by column name or type name.
#[derive(Clone)]
pub struct TransformerRegistry {
    entries: BTreeMap<String, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Creates a registry seeded with large-object-to-text bindings.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("BLOB", Arc::new(TextTransformer));
        registry.register("CLOB", Arc::new(TextTransformer));
        registry
    }

    fn normalize(key: &str) -> String {
        key.trim().to_uppercase()
    }

    /// Binds a transformer to a key. The last registration for a key wins.
    pub fn register(&mut self, key: &str, transformer: Arc<dyn Transformer>) {
        self.entries.insert(Self::normalize(key), transformer);
    }

    /// Binds a built-in transformer by name.
    pub fn register_named(&mut self, key: &str, name: &str) -> Result<(), ShellError> {
        let transformer = instantiate(name).ok_or_else(|| {
            ShellError::argument(format!(
                "unknown transformer '{}' (available: {})",
                name,
                BUILTIN_TRANSFORMERS.join(", ")
            ))
        })?;
        self.register(key, transformer);
        Ok(())
    }

    /// Finds the transformer for a column: by column name first, then by
    /// type name.
    pub fn lookup(&self, column: &str, type_name: &str) -> Option<Arc<dyn Transformer>> {
        self.entries
            .get(&Self::normalize(column))
            .or_else(|| self.entries.get(&Self::normalize(type_name)))
            .cloned()
    }

    /// Returns `key → transformer name` for every binding.
    pub fn bindings(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, t)| (k.clone(), t.name().to_string()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.bindings()).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts its invocations and tags its output with a label.
    pub(crate) struct Tagged {
        pub label: &'static str,
        pub calls: AtomicUsize,
    }

    impl Tagged {
        pub(crate) fn new(label: &'static str) -> Arc<Self> {
            Arc::new(Self {
                label,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Transformer for Tagged {
        fn name(&self) -> &str {
            self.label
        }

        fn transform(&self, value: &Value) -> Result<String, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}:{}", self.label, value))
        }
    }

    #[test]
    fn test_seeded_registry() {
        let registry = TransformerRegistry::new();
        let t = registry.lookup("data", "blob").unwrap();
        assert_eq!(t.name(), "text");
        assert_eq!(
            t.transform(&Value::Blob(b"hello".to_vec())).unwrap(),
            "hello"
        );
        assert!(registry.lookup("data", "INTEGER").is_none());
    }

    #[test]
    fn test_column_name_wins_over_type() {
        let mut registry = TransformerRegistry::new();
        let payload = Tagged::new("payload");
        let blob = Tagged::new("blob");
        registry.register("PAYLOAD", payload.clone());
        registry.register("BLOB", blob.clone());

        let t = registry.lookup("PAYLOAD", "BLOB").unwrap();
        assert_eq!(t.transform(&Value::Integer(1)).unwrap(), "payload:1");
        assert_eq!(payload.calls.load(Ordering::SeqCst), 1);
        assert_eq!(blob.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = TransformerRegistry::empty();
        registry.register_named("name", "upper").unwrap();
        registry.register_named("NAME", "length").unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.bindings().get("NAME").unwrap(), "length");
    }

    #[test]
    fn test_unknown_transformer_name() {
        let mut registry = TransformerRegistry::empty();
        let err = registry.register_named("x", "rot13").unwrap_err();
        assert!(matches!(err, ShellError::Argument(ref m) if m.contains("rot13")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_builtins() {
        let hex = instantiate("HEX").unwrap();
        assert_eq!(hex.transform(&Value::Blob(vec![0, 255, 16])).unwrap(), "00ff10");
        assert_eq!(hex.transform(&Value::Text("A".into())).unwrap(), "41");
        assert!(hex.transform(&Value::Real(1.0)).is_err());

        let upper = instantiate("upper").unwrap();
        assert_eq!(upper.transform(&Value::Text("abc".into())).unwrap(), "ABC");

        let length = instantiate("length").unwrap();
        assert_eq!(length.transform(&Value::Text("héllo".into())).unwrap(), "5");
        assert_eq!(length.transform(&Value::Blob(vec![1, 2, 3])).unwrap(), "3");
        assert!(length.transform(&Value::Integer(3)).is_err());

        assert!(instantiate("nope").is_none());
    }

    #[test]
    fn test_text_transformer_is_lossy() {
        let text = TextTransformer;
        assert_eq!(
            text.transform(&Value::Blob(vec![b'o', b'k', 0xff])).unwrap(),
            "ok\u{fffd}"
        );
        assert_eq!(text.transform(&Value::Integer(5)).unwrap(), "5");
    }
}
