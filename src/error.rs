use aide::OperationOutput;
use axum::{http::StatusCode, response::IntoResponse, Json};
use log::error;
use schemars::JsonSchema;
use serde_json::json;

/// SQLSTATE codes after which a unit of work can simply be run again.
const RETRYABLE_SQLSTATES: [&str; 2] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
];

/// Represent errors in the application
///
/// `NotFound`, `Conflict`, `InvalidInput` and `Unauthorized` are business outcomes the caller
/// is expected to branch on. `StoreFailure` is an infrastructure fault.
///
/// All `ServiceError`s can be transformed to http errors.
#[derive(Debug, Clone, PartialEq, JsonSchema)]
pub enum ServiceError {
    NotFound(String),
    Conflict(String),
    InvalidInput(String),
    Unauthorized(String),
    StoreFailure { cause: String, retryable: bool },
}

impl ServiceError {
    pub fn store(cause: impl Into<String>) -> Self {
        ServiceError::StoreFailure {
            cause: cause.into(),
            retryable: false,
        }
    }

    pub fn retryable(cause: impl Into<String>) -> Self {
        ServiceError::StoreFailure {
            cause: cause.into(),
            retryable: true,
        }
    }

    /// Whether the whole unit of work may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::StoreFailure {
                retryable: true,
                ..
            }
        )
    }

    /// Human readable reason of the rejection.
    pub fn reason(&self) -> &str {
        match self {
            ServiceError::NotFound(reason)
            | ServiceError::Conflict(reason)
            | ServiceError::InvalidInput(reason)
            | ServiceError::Unauthorized(reason) => reason,
            ServiceError::StoreFailure { cause, .. } => cause,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::NotFound(reason) => write!(f, "Not found: {reason}"),
            ServiceError::Conflict(reason) => write!(f, "Conflict: {reason}"),
            ServiceError::InvalidInput(reason) => write!(f, "Invalid input: {reason}"),
            ServiceError::Unauthorized(reason) => write!(f, "Unauthorized: {reason}"),
            ServiceError::StoreFailure { cause, .. } => write!(f, "Store failure: {cause}"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Helper for `ServiceError` result
pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<sqlx::Error> for ServiceError {
    fn from(error: sqlx::Error) -> Self {
        if let Some(database_error) = error.as_database_error() {
            if let Some(code) = database_error.code() {
                if RETRYABLE_SQLSTATES.iter().any(|retryable| code == *retryable) {
                    return ServiceError::retryable(database_error.message().to_owned());
                }
            }
        }
        ServiceError::store(error.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for ServiceError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        ServiceError::store(format!("migration failed: {error}"))
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(error: std::io::Error) -> Self {
        ServiceError::store(format!("io error: {error}"))
    }
}

impl OperationOutput for ServiceError {
    type Inner = String;
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::StoreFailure { ref cause, .. } => {
                error!("Request failed: {}", cause);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.reason() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_flagged_store_failures_are_retryable() {
        assert!(ServiceError::retryable("could not serialize access").is_retryable());
        assert!(!ServiceError::store("connection refused").is_retryable());
        assert!(!ServiceError::Conflict("Card exists".to_owned()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServiceError::NotFound("x".to_owned()), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("x".to_owned()), StatusCode::CONFLICT),
            (ServiceError::InvalidInput("x".to_owned()), StatusCode::BAD_REQUEST),
            (ServiceError::Unauthorized("x".to_owned()), StatusCode::UNAUTHORIZED),
            (ServiceError::store("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
