//! crates/exam_pilot_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Language, QuestionRecord, Subject, UserCredentials, UserProgress};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A write lost against a concurrent writer, or a uniqueness constraint failed.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Persistent store for progression, question history and auth sessions.
///
/// Writes to a user are guarded by `expected_revision`: the write succeeds only if
/// the stored record still has that revision, and the stored record then carries
/// `user.revision`. A mismatch is reported as `PortError::Conflict`.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Progression ---
    async fn get_user(&self, user_id: Uuid) -> PortResult<Option<UserProgress>>;

    async fn put_user(&self, user: &UserProgress, expected_revision: u64) -> PortResult<()>;

    /// Commits the updated user and the new question record together, or neither.
    async fn save_answer(
        &self,
        user: &UserProgress,
        question: &QuestionRecord,
        expected_revision: u64,
    ) -> PortResult<()>;

    /// Newest first.
    async fn list_questions_by_user(&self, user_id: Uuid) -> PortResult<Vec<QuestionRecord>>;

    /// Highest XP first.
    async fn list_top_users_by_xp(&self, limit: usize) -> PortResult<Vec<UserProgress>>;

    // --- Auth Methods ---
    /// Fails with `PortError::Conflict` when the email is already registered.
    async fn create_account(
        &self,
        user: &UserProgress,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<()>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}

#[async_trait]
pub trait ExplanationService: Send + Sync {
    /// Produces a raw, line-oriented explanation for a question.
    async fn explain(
        &self,
        subject: Subject,
        question: &str,
        language: Language,
    ) -> PortResult<String>;
}

#[async_trait]
pub trait TextExtractionService: Send + Sync {
    /// Extracts the text found in an image. Empty when the image holds no text.
    async fn extract_text(&self, image_data: &[u8]) -> PortResult<String>;
}
