//! Error types for the store layer.

use std::fmt;
use tablecraft_model::ModelError;
use tablecraft_types::ErrorKind;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for a single transport call.
pub type TransportResult<T> = Result<T, TransportError>;

/// Why the store canceled one operation of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationCode {
    /// This operation was fine; another one caused the cancellation.
    None,
    ConditionalCheckFailed,
    Throttling,
    TransactionConflict,
    Validation,
    Other(String),
}

impl CancellationCode {
    /// Parses the store's reason code, e.g. `ConditionalCheckFailed`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "None" | "" => Self::None,
            "ConditionalCheckFailed" => Self::ConditionalCheckFailed,
            "ThrottlingError" | "ProvisionedThroughputExceeded" | "RequestLimitExceeded" => {
                Self::Throttling
            }
            "TransactionConflict" => Self::TransactionConflict,
            "ValidationError" => Self::Validation,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether resending the whole transaction may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttling | Self::TransactionConflict)
    }
}

/// One entry of a canceled transaction, positionally aligned with the
/// submitted operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationReason {
    pub code: CancellationCode,
    pub message: Option<String>,
}

impl CancellationReason {
    #[must_use]
    pub fn new(code: CancellationCode) -> Self {
        Self { code, message: None }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.message) {
            (CancellationCode::Other(code), _) => write!(f, "{code}"),
            (code, Some(message)) => write!(f, "{code:?}: {message}"),
            (code, None) => write!(f, "{code:?}"),
        }
    }
}

/// A classified failure of one call to the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("resource not found: {message}")]
    NotFound { message: String },

    #[error("conditional check failed: {message}")]
    ConditionalCheckFailed { message: String },

    #[error("throttled: {message}")]
    Throttling { message: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Timeout, reset or other failure where the request may or may not
    /// have reached the store.
    #[error("connection failure: {message}")]
    Connection { message: String },

    #[error("transaction canceled: [{}]", join_reasons(.reasons))]
    TransactionCanceled { reasons: Vec<CancellationReason> },
}

impl TransportError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn conditional(message: impl Into<String>) -> Self {
        Self::ConditionalCheckFailed { message: message.into() }
    }

    pub fn throttling(message: impl Into<String>) -> Self {
        Self::Throttling { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ConditionalCheckFailed { .. } => ErrorKind::ConditionalCheckFailed,
            Self::Throttling { .. } => ErrorKind::Throttling,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::TransactionCanceled { .. } => ErrorKind::TransactionCanceled,
        }
    }

    #[must_use]
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::Throttling { .. })
    }

    /// Throttling or connection failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

fn join_reasons(reasons: &[CancellationReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key, index or serialization failure raised before any call.
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("conditional check failed{}: {message}", operation_suffix(.operation_index))]
    ConditionalCheckFailed {
        operation_index: Option<usize>,
        message: String,
    },

    #[error("transaction canceled: [{}]", join_reasons(.reasons))]
    TransactionCanceled { reasons: Vec<CancellationReason> },

    #[error("throttled after {attempts} attempts: {message}")]
    Throttled { attempts: u32, message: String },

    #[error("connection failure: {message}")]
    Connection { message: String },

    /// A write transaction lost its connection after every retry; it may or
    /// may not have been applied. Resend with the same token to find out.
    #[error("transaction outcome unknown (client request token {client_request_token}): {message}")]
    OutcomeUnknown {
        client_request_token: String,
        message: String,
    },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("rejected by the store: {message}")]
    Validation { message: String },

    /// A batch request failed outright. Chunks before it were applied.
    #[error("batch aborted at round {round}, chunk {chunk_index} after {succeeded} operations succeeded: {source}")]
    BatchAborted {
        round: u32,
        chunk_index: usize,
        succeeded: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

fn operation_suffix(index: &Option<usize>) -> String {
    index
        .map(|i| format!(" on operation {i}"))
        .unwrap_or_default()
}

impl StoreError {
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Model(ModelError::invalid(parameter, reason))
    }

    pub fn missing_parameter(parameter: impl Into<String>) -> Self {
        Self::Model(ModelError::missing(parameter, None))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Converts a transport failure that has been tried `attempts` times.
    #[must_use]
    pub fn from_transport(error: TransportError, attempts: u32) -> Self {
        match error {
            TransportError::Throttling { message } => Self::Throttled { attempts, message },
            other => other.into(),
        }
    }

    /// Machine-readable classification. `BatchAborted` reports the kind of
    /// the failure that aborted it.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Model(e) => e.kind(),
            Self::ConditionalCheckFailed { .. } => ErrorKind::ConditionalCheckFailed,
            Self::TransactionCanceled { .. } => ErrorKind::TransactionCanceled,
            Self::Throttled { .. } => ErrorKind::Throttling,
            Self::Connection { .. } | Self::OutcomeUnknown { .. } => ErrorKind::Connection,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::BatchAborted { source, .. } => source.kind(),
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Stable error code, e.g. `CONDITIONAL_CHECK_FAILED`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

impl From<TransportError> for StoreError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NotFound { message } => Self::NotFound { message },
            TransportError::ConditionalCheckFailed { message } => Self::ConditionalCheckFailed {
                operation_index: None,
                message,
            },
            TransportError::Throttling { message } => Self::Throttled { attempts: 1, message },
            TransportError::Validation { message } => Self::Validation { message },
            TransportError::Connection { message } => Self::Connection { message },
            TransportError::TransactionCanceled { reasons } => Self::TransactionCanceled { reasons },
        }
    }
}
