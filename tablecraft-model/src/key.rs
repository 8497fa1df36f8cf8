//! Composite key construction.
//!
//! A composite key is an ordered list of `label<sep>value` segments joined by
//! the same separator, e.g. `user#123#profile#123`. Segments whose value is
//! empty are dropped whole so partially-known keys stay valid prefixes for
//! range queries.

use crate::error::{ModelError, ModelResult};
use tablecraft_types::Number;

/// Separator used when none is configured.
pub const DEFAULT_SEPARATOR: &str = "#";

/// A value contributed to one key segment.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// Absent; the segment is skipped.
    None,
    Str(String),
    Int(i64),
    UInt(u64),
    /// Rendered in normalized plain notation, so `1.50` and `1.5` agree.
    Decimal(Number),
    /// Never valid in a key; kept so callers get a classified error instead
    /// of a silently rounded key.
    Float(f64),
}

impl KeyValue {
    /// Renders the value, `Ok(None)` meaning "skip this segment".
    fn render(&self, label: &str) -> ModelResult<Option<String>> {
        let text = match self {
            Self::None => return Ok(None),
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::UInt(u) => u.to_string(),
            Self::Decimal(n) => n.to_plain_string(),
            Self::Float(f) => {
                return Err(ModelError::invalid_key(
                    Some(label),
                    format!("floating-point value {f} is not a deterministic key segment"),
                ));
            }
        };
        Ok((!text.is_empty()).then_some(text))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Str(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for KeyValue {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for KeyValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<u32> for KeyValue {
    fn from(value: u32) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl From<Number> for KeyValue {
    fn from(value: Number) -> Self {
        Self::Decimal(value)
    }
}

impl From<f64> for KeyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

/// Builds composite keys with a fixed separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    separator: String,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl KeyBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder with a custom, non-empty separator.
    pub fn with_separator(separator: impl Into<String>) -> ModelResult<Self> {
        let separator = separator.into();
        if separator.is_empty() {
            return Err(ModelError::invalid("separator", "must not be empty"));
        }
        Ok(Self { separator })
    }

    #[must_use]
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Joins `pairs` into a key, failing with `InvalidKey` if nothing remains.
    pub fn build_key(&self, pairs: &[(&str, KeyValue)]) -> ModelResult<String> {
        let key = self.join(pairs)?;
        if key.is_empty() {
            return Err(ModelError::invalid_key(None, "every segment was empty"));
        }
        Ok(key)
    }

    /// Like [`KeyBuilder::build_key`] but ends with the separator, for use as
    /// a `begins_with` argument that must not match longer labels.
    pub fn prefix(&self, pairs: &[(&str, KeyValue)]) -> ModelResult<String> {
        let mut key = self.build_key(pairs)?;
        key.push_str(&self.separator);
        Ok(key)
    }

    /// Joins the non-empty segments; an all-empty input yields `""`.
    pub(crate) fn join(&self, pairs: &[(&str, KeyValue)]) -> ModelResult<String> {
        let mut segments: Vec<String> = Vec::with_capacity(pairs.len() * 2);
        for (label, value) in pairs {
            if label.contains(self.separator.as_str()) {
                return Err(ModelError::invalid_key(
                    Some(label),
                    format!("label contains the separator {:?}", self.separator),
                ));
            }
            let Some(rendered) = value.render(label)? else {
                continue;
            };
            if !label.is_empty() {
                segments.push((*label).to_string());
            }
            segments.push(rendered);
        }
        Ok(segments.join(&self.separator))
    }
}

/// [`KeyBuilder::build_key`] with the default separator.
pub fn build_key(pairs: &[(&str, KeyValue)]) -> ModelResult<String> {
    KeyBuilder::default().build_key(pairs)
}
