//! Machine-readable error classification shared by every tablecraft error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of failure, independent of which layer raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidKey,
    MissingParameter,
    InvalidParameter,
    ModelMapping,
    DecimalConversion,
    ConditionalCheckFailed,
    TransactionCanceled,
    Throttling,
    Connection,
    NotFound,
    Validation,
    Configuration,
}

impl ErrorKind {
    /// Stable error code, e.g. `INVALID_KEY`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidKey => "INVALID_KEY",
            Self::MissingParameter => "MISSING_PARAMETER",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::ModelMapping => "MODEL_MAPPING_ERROR",
            Self::DecimalConversion => "DECIMAL_CONVERSION_ERROR",
            Self::ConditionalCheckFailed => "CONDITIONAL_CHECK_FAILED",
            Self::TransactionCanceled => "TRANSACTION_CANCELED",
            Self::Throttling => "THROTTLING",
            Self::Connection => "CONNECTION_ERROR",
            Self::NotFound => "ITEM_NOT_FOUND",
            Self::Validation => "VALIDATION_ERROR",
            Self::Configuration => "INVALID_CONFIGURATION",
        }
    }

    /// Whether a failure of this kind may succeed if the same request is
    /// sent again unchanged.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Throttling | Self::Connection)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
