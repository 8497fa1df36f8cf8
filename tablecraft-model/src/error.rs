//! Error types for the modeling layer.

use tablecraft_types::ErrorKind;
use thiserror::Error;

/// Result type for modeling operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building keys, resolving indexes or converting items.
///
/// None of these are transient; retrying the same input fails the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A composite key would be empty or not reproducible.
    #[error("invalid key: {reason}")]
    InvalidKey { label: Option<String>, reason: String },

    /// A required attribute, template or index input is missing.
    #[error("missing parameter `{parameter}`{}", index_suffix(.index))]
    MissingParameter {
        parameter: String,
        index: Option<String>,
    },

    /// An input is present but malformed or out of bounds.
    #[error("invalid parameter `{parameter}`: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    /// An entity and an item disagree on structure.
    #[error("cannot map attribute `{attribute}`: {reason}")]
    ModelMapping { attribute: String, reason: String },

    /// A number cannot be represented in the declared type without loss.
    #[error("attribute `{attribute}`: {value} does not fit {target} without loss")]
    DecimalConversion {
        attribute: String,
        value: String,
        target: String,
    },
}

fn index_suffix(index: &Option<String>) -> String {
    index
        .as_ref()
        .map(|name| format!(" for index `{name}`"))
        .unwrap_or_default()
}

impl ModelError {
    pub fn invalid_key(label: Option<&str>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            label: label.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn missing(parameter: impl Into<String>, index: Option<&str>) -> Self {
        Self::MissingParameter {
            parameter: parameter.into(),
            index: index.map(str::to_string),
        }
    }

    pub fn invalid(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub fn mapping(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelMapping {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    pub fn decimal(attribute: &str, value: impl ToString, target: impl Into<String>) -> Self {
        Self::DecimalConversion {
            attribute: attribute.to_string(),
            value: value.to_string(),
            target: target.into(),
        }
    }

    /// Machine-readable classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
            Self::MissingParameter { .. } => ErrorKind::MissingParameter,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::ModelMapping { .. } => ErrorKind::ModelMapping,
            Self::DecimalConversion { .. } => ErrorKind::DecimalConversion,
        }
    }

    /// Stable error code, e.g. `MISSING_PARAMETER`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}
