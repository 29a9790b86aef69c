//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the mapping
//! from core failures to HTTP responses.

use crate::config::ConfigError;
use axum::http::StatusCode;
use exam_pilot_core::{PortError, SessionError};

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error while applying the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The HTTP status a core failure is reported with.
pub fn session_error_status(error: &SessionError) -> StatusCode {
    match error {
        SessionError::QuotaExceeded => StatusCode::FORBIDDEN,
        SessionError::UserNotFound(_) => StatusCode::NOT_FOUND,
        SessionError::EmailTaken => StatusCode::CONFLICT,
        SessionError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Converts a core failure into the `(status, message)` pair handlers return.
pub fn reject(error: SessionError) -> (StatusCode, String) {
    let status = session_error_status(&error);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
        // Store details stay in the logs.
        return (status, "Service temporarily unavailable".to_string());
    }
    (status, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn maps_core_failures_to_statuses() {
        assert_eq!(
            session_error_status(&SessionError::QuotaExceeded),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            session_error_status(&SessionError::UserNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            session_error_status(&SessionError::EmailTaken),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn store_details_are_not_leaked() {
        let (status, message) = reject(SessionError::StoreUnavailable(
            "password authentication failed for user postgres".to_string(),
        ));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!message.contains("postgres"));
    }
}
