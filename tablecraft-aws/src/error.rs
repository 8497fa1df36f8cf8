//! Classification of SDK failures into [`TransportError`]s.

use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::CancellationReason as SdkCancellationReason;
use aws_smithy_types::error::display::DisplayErrorContext;
use std::error::Error as StdError;
use tablecraft_store::{CancellationCode, CancellationReason, TransportError};

/// Maps a service error code to a transport error.
///
/// Unknown codes are treated as permanent.
#[must_use]
pub fn from_service_code(code: Option<&str>, message: Option<&str>) -> TransportError {
    let message = message.unwrap_or_default().to_string();
    match code.unwrap_or_default() {
        "ConditionalCheckFailedException" => TransportError::ConditionalCheckFailed { message },
        "ProvisionedThroughputExceededException"
        | "ThrottlingException"
        | "RequestLimitExceeded"
        | "TransactionConflictException"
        | "TransactionInProgressException" => TransportError::Throttling { message },
        "ResourceNotFoundException" => TransportError::NotFound { message },
        "InternalServerError" | "ServiceUnavailable" => TransportError::Connection { message },
        "ValidationException" | "IdempotentParameterMismatchException" => {
            TransportError::Validation { message }
        }
        other => TransportError::Validation {
            message: format!("{other}: {message}"),
        },
    }
}

/// Classifies any operation's SDK error.
///
/// Failures where the request may have reached the store (timeouts,
/// dispatch and response errors) are connection errors.
pub fn classify<E, R>(operation: &'static str, err: SdkError<E, R>) -> TransportError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let error = match &err {
        SdkError::ServiceError(service) => {
            from_service_code(service.err().code(), service.err().message())
        }
        SdkError::ConstructionFailure(_) => {
            TransportError::validation(DisplayErrorContext(&err).to_string())
        }
        _ => TransportError::connection(DisplayErrorContext(&err).to_string()),
    };
    tracing::debug!(operation, kind = %error.kind(), "store call failed");
    error
}

/// Converts the per-operation reasons of a canceled transaction.
#[must_use]
pub fn cancellation(reasons: &[SdkCancellationReason]) -> TransportError {
    let reasons = reasons
        .iter()
        .map(|reason| {
            let code = CancellationCode::from_code(reason.code().unwrap_or("None"));
            match reason.message() {
                Some(message) => CancellationReason::new(code).with_message(message),
                None => CancellationReason::new(code),
            }
        })
        .collect();
    TransportError::TransactionCanceled { reasons }
}
