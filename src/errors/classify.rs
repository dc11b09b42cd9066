// Error normalization: foreign error shapes -> classified AppError.
// Guards run in order, most specific first; the first match wins.

use regex::Regex;
use std::any::Any;
use std::error::Error as StdError;
use std::sync::{Arc, LazyLock};

use super::{AppError, ErrorKind};
use crate::store::StoreError;

/// The operation that failed, used to pick the `Db*Failed` fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Fetch,
    Insert,
    Update,
    Delete,
    Auth,
    Other,
}

impl StoreOp {
    fn failure_kind(self) -> ErrorKind {
        match self {
            StoreOp::Fetch => ErrorKind::DbFetchFailed,
            StoreOp::Insert => ErrorKind::DbInsertFailed,
            StoreOp::Update => ErrorKind::DbUpdateFailed,
            StoreOp::Delete => ErrorKind::DbDeleteFailed,
            StoreOp::Auth => ErrorKind::AuthUnauthorized,
            StoreOp::Other => ErrorKind::UnexpectedError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreOp::Fetch => "fetch",
            StoreOp::Insert => "insert",
            StoreOp::Update => "update",
            StoreOp::Delete => "delete",
            StoreOp::Auth => "auth",
            StoreOp::Other => "other",
        }
    }
}

const NOT_FOUND_CODES: &[&str] = &["PGRST116"];
const CONSTRAINT_CODES: &[&str] = &["23505", "23503"];
const PERMISSION_CODES: &[&str] = &["42501"];
const EXPIRED_CODES: &[&str] = &["PGRST301", "PGRST303"];
const INVALID_INPUT_CODES: &[&str] = &["23502", "23514", "22P02", "22001", "22003"];

fn pattern(re: &str) -> Regex {
    Regex::new(re).unwrap_or_else(|e| panic!("invalid built-in pattern {re}: {e}"))
}

static NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)not found|no rows|contains 0 rows|multiple \(or no\) rows"));
static CONSTRAINT: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)duplicate key|unique constraint|violates foreign key|foreign key constraint")
});
static PERMISSION: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)permission denied|row[- ]level security|insufficient privilege")
});
static EXPIRED: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)jwt expired|token (has )?expired|session (has )?expired|invalid refresh token")
});
static INVALID_CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)invalid login credentials|invalid (email or )?password"));
static EMAIL_EXISTS: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)already registered|email (address )?(already )?(exists|taken)"));
static WEAK_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)password should be|weak password|password is too short"));
static TIMEOUT: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)timed? ?out|deadline exceeded"));
static CONNECTION: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)failed to fetch|network|connection (refused|reset|closed)|dns|unreachable")
});

type Guard = fn(&(dyn StdError + 'static), StoreOp) -> Option<AppError>;

/// Ordered type guards. Already-classified errors pass through untouched.
const GUARDS: &[Guard] = &[
    already_classified,
    store_error,
    transport_error,
    elapsed_error,
    io_error,
    decode_error,
];

/// Classifies any error object. Never fails: unmatched errors become `UnexpectedError`.
pub fn classify<E>(err: E, op: StoreOp) -> AppError
where
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
{
    let cause: Arc<dyn StdError + Send + Sync + 'static> = Arc::from(err.into());

    if let Some(existing) = cause.downcast_ref::<AppError>() {
        return existing.clone();
    }

    let root: &(dyn StdError + 'static) = &*cause;
    let classified = classify_chain(root, op).unwrap_or_else(|| fallback(root, op));
    classified
        .with_context("operation", op.as_str())
        .with_shared_cause(cause)
}

pub fn classify_store_error(err: StoreError, op: StoreOp) -> AppError {
    classify(err, op)
}

/// Classifies an `anyhow` error by walking its context chain
pub fn classify_anyhow(err: anyhow::Error, op: StoreOp) -> AppError {
    let classified = err
        .chain()
        .find_map(|link| run_guards(link, op))
        .unwrap_or_else(|| fallback(err.root_cause(), op))
        .with_context("operation", op.as_str());

    let boxed: Box<dyn StdError + Send + Sync + 'static> = err.into();
    classified.with_shared_cause(Arc::from(boxed))
}

/// Classifies a value that is not an error object at all
pub fn classify_value(value: &serde_json::Value) -> AppError {
    AppError::new(ErrorKind::UnknownError, format!("non-error value raised: {value}"))
        .with_context("value", value)
}

/// Classifies a panic payload from a background task
pub fn classify_panic(payload: &(dyn Any + Send)) -> AppError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_string());
    AppError::new(ErrorKind::UnknownError, format!("task panicked: {message}"))
}

fn classify_chain(root: &(dyn StdError + 'static), op: StoreOp) -> Option<AppError> {
    let mut current = Some(root);
    while let Some(err) = current {
        if let Some(classified) = run_guards(err, op) {
            return Some(classified);
        }
        current = err.source();
    }
    None
}

fn run_guards(err: &(dyn StdError + 'static), op: StoreOp) -> Option<AppError> {
    GUARDS.iter().find_map(|guard| guard(err, op))
}

fn fallback(err: &(dyn StdError + 'static), op: StoreOp) -> AppError {
    let message = err.to_string();
    let kind = if TIMEOUT.is_match(&message) {
        ErrorKind::NetworkTimeout
    } else if CONNECTION.is_match(&message) {
        ErrorKind::NetworkConnectionFailed
    } else {
        ErrorKind::UnexpectedError
    };
    AppError::new(kind, message)
}

fn already_classified(err: &(dyn StdError + 'static), _op: StoreOp) -> Option<AppError> {
    err.downcast_ref::<AppError>().cloned()
}

fn store_error(err: &(dyn StdError + 'static), op: StoreOp) -> Option<AppError> {
    let store_err = err.downcast_ref::<StoreError>()?;
    let kind = match store_err {
        StoreError::Api {
            status,
            code,
            message,
            details,
            ..
        } => api_kind(*status, code.as_deref(), message, details.as_deref(), op),
        StoreError::Auth { status, message } => auth_kind(*status, message),
        StoreError::Connection(_) => ErrorKind::NetworkConnectionFailed,
        StoreError::Timeout(_) => ErrorKind::NetworkTimeout,
        // Transport and decode failures are classified by their own guards
        StoreError::Http(inner) => return transport_error(inner, op),
        StoreError::Decode(_) => op.failure_kind(),
    };

    let mut classified = AppError::new(kind, store_err.to_string());
    if let StoreError::Api {
        status, code, hint, ..
    } = store_err
    {
        classified = classified.with_context("status", status);
        if let Some(code) = code {
            classified = classified.with_context("code", code);
        }
        if let Some(hint) = hint {
            classified = classified.with_context("hint", hint);
        }
    }
    Some(classified)
}

fn api_kind(
    status: u16,
    code: Option<&str>,
    message: &str,
    details: Option<&str>,
    op: StoreOp,
) -> ErrorKind {
    let has_code = |codes: &[&str]| code.is_some_and(|c| codes.contains(&c));
    let text = match details {
        Some(details) => format!("{message} {details}"),
        None => message.to_string(),
    };

    if has_code(NOT_FOUND_CODES) || status == 404 || NOT_FOUND.is_match(&text) {
        ErrorKind::DbNotFound
    } else if has_code(CONSTRAINT_CODES) || status == 409 || CONSTRAINT.is_match(&text) {
        ErrorKind::DbConstraintViolation
    } else if has_code(PERMISSION_CODES) || status == 403 || PERMISSION.is_match(&text) {
        ErrorKind::DbPermissionDenied
    } else if has_code(EXPIRED_CODES) || EXPIRED.is_match(&text) {
        ErrorKind::AuthSessionExpired
    } else if has_code(INVALID_INPUT_CODES) {
        ErrorKind::ValidationFailed
    } else if status == 401 {
        ErrorKind::AuthUnauthorized
    } else if status == 408 || status == 504 {
        ErrorKind::NetworkTimeout
    } else {
        op.failure_kind()
    }
}

fn auth_kind(status: u16, message: &str) -> ErrorKind {
    if EXPIRED.is_match(message) {
        ErrorKind::AuthSessionExpired
    } else if INVALID_CREDENTIALS.is_match(message) {
        ErrorKind::AuthInvalidCredentials
    } else if EMAIL_EXISTS.is_match(message) {
        ErrorKind::AuthEmailAlreadyExists
    } else if WEAK_PASSWORD.is_match(message) {
        ErrorKind::AuthWeakPassword
    } else if status == 403 {
        ErrorKind::DbPermissionDenied
    } else {
        ErrorKind::AuthUnauthorized
    }
}

fn transport_error(err: &(dyn StdError + 'static), op: StoreOp) -> Option<AppError> {
    let http = err.downcast_ref::<reqwest::Error>()?;
    let kind = if http.is_timeout() {
        ErrorKind::NetworkTimeout
    } else if http.is_connect() || http.is_request() {
        ErrorKind::NetworkConnectionFailed
    } else if http.is_decode() || http.is_body() {
        op.failure_kind()
    } else {
        match http.status().map(|s| s.as_u16()) {
            Some(401) => ErrorKind::AuthUnauthorized,
            Some(403) => ErrorKind::DbPermissionDenied,
            Some(404) => ErrorKind::DbNotFound,
            Some(408) | Some(504) => ErrorKind::NetworkTimeout,
            _ => ErrorKind::NetworkConnectionFailed,
        }
    };
    Some(AppError::new(kind, http.to_string()))
}

fn elapsed_error(err: &(dyn StdError + 'static), _op: StoreOp) -> Option<AppError> {
    let elapsed = err.downcast_ref::<tokio::time::error::Elapsed>()?;
    Some(AppError::new(ErrorKind::NetworkTimeout, elapsed.to_string()))
}

fn io_error(err: &(dyn StdError + 'static), _op: StoreOp) -> Option<AppError> {
    use std::io::ErrorKind as Io;

    let io = err.downcast_ref::<std::io::Error>()?;
    let kind = match io.kind() {
        Io::TimedOut | Io::WouldBlock => ErrorKind::NetworkTimeout,
        Io::ConnectionRefused
        | Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::AddrNotAvailable
        | Io::BrokenPipe
        | Io::UnexpectedEof => ErrorKind::NetworkConnectionFailed,
        Io::PermissionDenied => ErrorKind::DbPermissionDenied,
        Io::NotFound => ErrorKind::DbNotFound,
        _ => return None,
    };
    Some(AppError::new(kind, io.to_string()))
}

fn decode_error(err: &(dyn StdError + 'static), op: StoreOp) -> Option<AppError> {
    let json = err.downcast_ref::<serde_json::Error>()?;
    Some(AppError::new(
        op.failure_kind(),
        format!("malformed response: {json}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn api(status: u16, code: Option<&str>, message: &str) -> StoreError {
        StoreError::Api {
            status,
            code: code.map(str::to_string),
            message: message.to_string(),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn test_not_found_semantics() {
        let err = classify_store_error(
            api(406, Some("PGRST116"), "JSON object requested, multiple (or no) rows returned"),
            StoreOp::Fetch,
        );
        assert_eq!(err.kind(), ErrorKind::DbNotFound);
        assert_eq!(err.context().get("code").map(String::as_str), Some("PGRST116"));
        assert_eq!(err.context().get("operation").map(String::as_str), Some("fetch"));
    }

    #[test]
    fn test_constraint_violations() {
        let unique = classify_store_error(
            api(409, Some("23505"), "duplicate key value violates unique constraint"),
            StoreOp::Insert,
        );
        assert_eq!(unique.kind(), ErrorKind::DbConstraintViolation);

        let fk = classify_store_error(
            api(400, None, "insert or update on table violates foreign key constraint"),
            StoreOp::Update,
        );
        assert_eq!(fk.kind(), ErrorKind::DbConstraintViolation);
    }

    #[test]
    fn test_permission_denied_is_unrecoverable() {
        let err = classify_store_error(
            api(401, Some("42501"), "new row violates row-level security policy"),
            StoreOp::Insert,
        );
        assert_eq!(err.kind(), ErrorKind::DbPermissionDenied);
        assert!(!err.is_recoverable());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_expired_credentials() {
        let err = classify_store_error(api(401, Some("PGRST301"), "JWT expired"), StoreOp::Fetch);
        assert_eq!(err.kind(), ErrorKind::AuthSessionExpired);

        let auth = classify_store_error(
            StoreError::Auth {
                status: 400,
                message: "Invalid Refresh Token: Refresh Token Not Found".to_string(),
            },
            StoreOp::Auth,
        );
        assert_eq!(auth.kind(), ErrorKind::AuthSessionExpired);
    }

    #[test]
    fn test_auth_messages() {
        let cases = [
            ("Invalid login credentials", ErrorKind::AuthInvalidCredentials),
            ("User already registered", ErrorKind::AuthEmailAlreadyExists),
            ("Password should be at least 6 characters", ErrorKind::AuthWeakPassword),
            ("missing bearer token", ErrorKind::AuthUnauthorized),
        ];
        for (message, expected) in cases {
            let err = classify_store_error(
                StoreError::Auth {
                    status: 400,
                    message: message.to_string(),
                },
                StoreOp::Auth,
            );
            assert_eq!(err.kind(), expected, "{message}");
        }
    }

    #[test]
    fn test_unrecognized_store_error_uses_operation_fallback() {
        let err = classify_store_error(api(500, Some("XX000"), "internal error"), StoreOp::Delete);
        assert_eq!(err.kind(), ErrorKind::DbDeleteFailed);

        let err = classify_store_error(api(500, None, "internal error"), StoreOp::Fetch);
        assert_eq!(err.kind(), ErrorKind::DbFetchFailed);
    }

    #[test]
    fn test_transport_shapes() {
        let timeout = classify_store_error(StoreError::Timeout(Duration::from_secs(10)), StoreOp::Fetch);
        assert_eq!(timeout.kind(), ErrorKind::NetworkTimeout);

        let refused = classify(
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            StoreOp::Fetch,
        );
        assert_eq!(refused.kind(), ErrorKind::NetworkConnectionFailed);

        let connection = classify_store_error(StoreError::Connection("dns".into()), StoreOp::Update);
        assert_eq!(connection.kind(), ErrorKind::NetworkConnectionFailed);
    }

    #[test]
    fn test_decode_failure_maps_to_operation() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = classify(json_err, StoreOp::Fetch);
        assert_eq!(err.kind(), ErrorKind::DbFetchFailed);
    }

    #[test]
    fn test_already_classified_passes_through() {
        let original = AppError::new(ErrorKind::DbNotFound, "gone").with_context("id", "42");
        let err = classify(original.clone(), StoreOp::Update);
        assert_eq!(err.kind(), ErrorKind::DbNotFound);
        assert_eq!(err.context(), original.context());
    }

    #[test]
    fn test_unrecognized_objects_and_values() {
        let err = classify_anyhow(anyhow::anyhow!("kaboom"), StoreOp::Other);
        assert_eq!(err.kind(), ErrorKind::UnexpectedError);
        assert!(err.cause().is_some());

        let err = classify_value(&serde_json::json!({"weird": true}));
        assert_eq!(err.kind(), ErrorKind::UnknownError);
    }

    #[test]
    fn test_anyhow_chain_finds_wrapped_store_error() {
        let err = anyhow::Error::new(api(403, None, "permission denied for table material_requests"))
            .context("loading requests");
        let classified = classify_anyhow(err, StoreOp::Fetch);
        assert_eq!(classified.kind(), ErrorKind::DbPermissionDenied);
    }

    #[test]
    fn test_panic_payload_is_unknown() {
        let payload: Box<dyn Any + Send> = Box::new("worker exploded");
        let err = classify_panic(payload.as_ref());
        assert_eq!(err.kind(), ErrorKind::UnknownError);
        assert!(err.message().contains("worker exploded"));
    }
}
