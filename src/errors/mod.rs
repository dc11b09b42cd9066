//! Classified errors
//!
//! Every failure that crosses the core boundary is an [`AppError`]: a closed
//! [`ErrorKind`] plus the machine message, a user-facing message, severity,
//! recoverability, the original cause and free-form context.

pub mod classify;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::model::FieldViolation;
use crate::workflow::TransitionError;

pub use classify::{
    classify, classify_anyhow, classify_panic, classify_store_error, classify_value, StoreOp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    AuthInvalidCredentials,
    AuthSessionExpired,
    AuthUnauthorized,
    AuthEmailAlreadyExists,
    AuthWeakPassword,
    NetworkOffline,
    NetworkTimeout,
    NetworkConnectionFailed,
    DbInsertFailed,
    DbUpdateFailed,
    DbDeleteFailed,
    DbFetchFailed,
    DbNotFound,
    DbConstraintViolation,
    DbPermissionDenied,
    ValidationFailed,
    UnexpectedError,
    UnknownError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::AuthInvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            ErrorKind::AuthSessionExpired => "AUTH_SESSION_EXPIRED",
            ErrorKind::AuthUnauthorized => "AUTH_UNAUTHORIZED",
            ErrorKind::AuthEmailAlreadyExists => "AUTH_EMAIL_ALREADY_EXISTS",
            ErrorKind::AuthWeakPassword => "AUTH_WEAK_PASSWORD",
            ErrorKind::NetworkOffline => "NETWORK_OFFLINE",
            ErrorKind::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorKind::NetworkConnectionFailed => "NETWORK_CONNECTION_FAILED",
            ErrorKind::DbInsertFailed => "DB_INSERT_FAILED",
            ErrorKind::DbUpdateFailed => "DB_UPDATE_FAILED",
            ErrorKind::DbDeleteFailed => "DB_DELETE_FAILED",
            ErrorKind::DbFetchFailed => "DB_FETCH_FAILED",
            ErrorKind::DbNotFound => "DB_NOT_FOUND",
            ErrorKind::DbConstraintViolation => "DB_CONSTRAINT_VIOLATION",
            ErrorKind::DbPermissionDenied => "DB_PERMISSION_DENIED",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::UnexpectedError => "UNEXPECTED_ERROR",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Severity follows the kind's family: auth/db high, network medium, validation low
    pub fn severity(self) -> Severity {
        let code = self.code();
        if code.starts_with("AUTH_") || code.starts_with("DB_") {
            Severity::High
        } else if code.starts_with("NETWORK_") {
            Severity::Medium
        } else if code.starts_with("VALIDATION_") {
            Severity::Low
        } else {
            Severity::Critical
        }
    }

    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::AuthUnauthorized | ErrorKind::DbPermissionDenied)
    }

    /// Reads are retried with backoff unless the failure cannot change on its own
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorKind::AuthSessionExpired
                | ErrorKind::DbPermissionDenied
                | ErrorKind::AuthUnauthorized
                | ErrorKind::DbNotFound
        )
    }

    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::AuthInvalidCredentials => "Invalid email or password.",
            ErrorKind::AuthSessionExpired => "Your session has expired. Please sign in again.",
            ErrorKind::AuthUnauthorized => "You are not authorized to perform this action.",
            ErrorKind::AuthEmailAlreadyExists => "An account with this email already exists.",
            ErrorKind::AuthWeakPassword => "Password is too weak. Choose a longer password.",
            ErrorKind::NetworkOffline => {
                "You appear to be offline. Check your connection and try again."
            }
            ErrorKind::NetworkTimeout => "The server took too long to respond. Please try again.",
            ErrorKind::NetworkConnectionFailed => "Could not reach the server. Please try again.",
            ErrorKind::DbInsertFailed => "The request could not be saved.",
            ErrorKind::DbUpdateFailed => "The request could not be updated.",
            ErrorKind::DbDeleteFailed => "The request could not be deleted.",
            ErrorKind::DbFetchFailed => "Requests could not be loaded.",
            ErrorKind::DbNotFound => "The requested record was not found.",
            ErrorKind::DbConstraintViolation => "This change conflicts with existing data.",
            ErrorKind::DbPermissionDenied => "You do not have permission to access this record.",
            ErrorKind::ValidationFailed => "Some fields are invalid. Please check your input.",
            ErrorKind::UnexpectedError => "Something went wrong. Please try again.",
            ErrorKind::UnknownError => "An unknown error occurred.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A failure mapped into the closed taxonomy
#[derive(Clone, thiserror::Error)]
#[error("[{}] {message}", .kind.code())]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    user_message: String,
    #[source]
    cause: Option<Cause>,
    context: BTreeMap<String, String>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            user_message: kind.user_message().to_string(),
            cause: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub(crate) fn with_shared_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    pub fn offline(operation: &str) -> Self {
        Self::new(
            ErrorKind::NetworkOffline,
            format!("{operation} skipped: device is offline"),
        )
        .with_context("operation", operation)
    }

    pub fn validation(violations: &[FieldViolation]) -> Self {
        let summary = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        let mut error = Self::new(ErrorKind::ValidationFailed, summary);
        for violation in violations {
            error = error.with_context(violation.field, &violation.message);
        }
        error
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        let TransitionError::InvalidTransition { from, to } = err.clone();
        AppError::new(ErrorKind::ValidationFailed, err.to_string())
            .with_user_message(format!("A {from} request cannot be marked as {to}."))
            .with_context("from", from)
            .with_context("to", to)
            .with_cause(err)
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("severity", &self.severity())
            .field("recoverable", &self.is_recoverable())
            .field("context", &self.context)
            .field("cause", &self.cause.as_ref().map(ToString::to_string))
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestStatus;

    #[test]
    fn test_severity_by_family() {
        assert_eq!(ErrorKind::AuthSessionExpired.severity(), Severity::High);
        assert_eq!(ErrorKind::DbNotFound.severity(), Severity::High);
        assert_eq!(ErrorKind::NetworkOffline.severity(), Severity::Medium);
        assert_eq!(ErrorKind::ValidationFailed.severity(), Severity::Low);
        assert_eq!(ErrorKind::UnexpectedError.severity(), Severity::Critical);
        assert_eq!(ErrorKind::UnknownError.severity(), Severity::Critical);
    }

    #[test]
    fn test_only_unauthorized_and_permission_denied_are_unrecoverable() {
        let unrecoverable: Vec<_> = [
            ErrorKind::AuthInvalidCredentials,
            ErrorKind::AuthSessionExpired,
            ErrorKind::AuthUnauthorized,
            ErrorKind::AuthEmailAlreadyExists,
            ErrorKind::AuthWeakPassword,
            ErrorKind::NetworkOffline,
            ErrorKind::NetworkTimeout,
            ErrorKind::NetworkConnectionFailed,
            ErrorKind::DbInsertFailed,
            ErrorKind::DbUpdateFailed,
            ErrorKind::DbDeleteFailed,
            ErrorKind::DbFetchFailed,
            ErrorKind::DbNotFound,
            ErrorKind::DbConstraintViolation,
            ErrorKind::DbPermissionDenied,
            ErrorKind::ValidationFailed,
            ErrorKind::UnexpectedError,
            ErrorKind::UnknownError,
        ]
        .into_iter()
        .filter(|kind| !kind.is_recoverable())
        .collect();

        assert_eq!(
            unrecoverable,
            vec![ErrorKind::AuthUnauthorized, ErrorKind::DbPermissionDenied]
        );
    }

    #[test]
    fn test_retry_suppressed_kinds() {
        assert!(!ErrorKind::AuthSessionExpired.is_retryable());
        assert!(!ErrorKind::DbPermissionDenied.is_retryable());
        assert!(!ErrorKind::AuthUnauthorized.is_retryable());
        assert!(!ErrorKind::DbNotFound.is_retryable());
        assert!(ErrorKind::NetworkTimeout.is_retryable());
        assert!(ErrorKind::DbFetchFailed.is_retryable());
    }

    #[test]
    fn test_transition_error_becomes_validation_failure() {
        let err: AppError = TransitionError::InvalidTransition {
            from: RequestStatus::Pending,
            to: RequestStatus::Fulfilled,
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(err.context().get("from").map(String::as_str), Some("pending"));
        assert_eq!(err.context().get("to").map(String::as_str), Some("fulfilled"));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), err.cause().unwrap().to_string());
        assert!(err.cause().unwrap().downcast_ref::<TransitionError>().is_some());
    }

    #[test]
    fn test_display_uses_code_and_message() {
        let err = AppError::offline("list");
        assert_eq!(err.to_string(), "[NETWORK_OFFLINE] list skipped: device is offline");
        assert_eq!(err.user_message(), ErrorKind::NetworkOffline.user_message());
    }
}
