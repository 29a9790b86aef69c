//! crates/exam_pilot_core/src/memory.rs
//!
//! An in-memory implementation of `DatabaseService` for single-process
//! deployments and tests. All tables live behind one mutex, so every
//! operation, including `save_answer`, is atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::{AuthSession, QuestionRecord, UserCredentials, UserProgress};
use crate::ports::{DatabaseService, PortError, PortResult};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserProgress>,
    /// Insertion order.
    questions: Vec<QuestionRecord>,
    credentials: HashMap<String, UserCredentials>,
    auth_sessions: HashMap<String, AuthSession>,
}

impl Tables {
    fn check_revision(&self, user_id: Uuid, expected: u64) -> PortResult<()> {
        let stored = self
            .users
            .get(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        if stored.revision != expected {
            return Err(PortError::Conflict(format!(
                "User {} is at revision {}, expected {}",
                user_id, stored.revision, expected
            )));
        }
        Ok(())
    }
}

/// Shared, cloneable in-memory store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> PortResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[async_trait]
impl DatabaseService for InMemoryStore {
    async fn get_user(&self, user_id: Uuid) -> PortResult<Option<UserProgress>> {
        Ok(self.tables()?.users.get(&user_id).cloned())
    }

    async fn put_user(&self, user: &UserProgress, expected_revision: u64) -> PortResult<()> {
        let mut tables = self.tables()?;
        tables.check_revision(user.id, expected_revision)?;
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn save_answer(
        &self,
        user: &UserProgress,
        question: &QuestionRecord,
        expected_revision: u64,
    ) -> PortResult<()> {
        let mut tables = self.tables()?;
        tables.check_revision(user.id, expected_revision)?;
        tables.users.insert(user.id, user.clone());
        tables.questions.push(question.clone());
        Ok(())
    }

    async fn list_questions_by_user(&self, user_id: Uuid) -> PortResult<Vec<QuestionRecord>> {
        let tables = self.tables()?;
        let mut history: Vec<QuestionRecord> = tables
            .questions
            .iter()
            .rev()
            .filter(|q| q.user_id == user_id)
            .cloned()
            .collect();
        // Stable, so equal timestamps keep newest-inserted first.
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(history)
    }

    async fn list_top_users_by_xp(&self, limit: usize) -> PortResult<Vec<UserProgress>> {
        let tables = self.tables()?;
        let mut users: Vec<UserProgress> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| b.xp.cmp(&a.xp).then(a.created_at.cmp(&b.created_at)));
        users.truncate(limit);
        Ok(users)
    }

    async fn create_account(
        &self,
        user: &UserProgress,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<()> {
        let mut tables = self.tables()?;
        let email = normalize_email(email);
        if tables.credentials.contains_key(&email) {
            return Err(PortError::Conflict(format!("Email {} already exists", email)));
        }
        tables.credentials.insert(
            email.clone(),
            UserCredentials {
                user_id: user.id,
                email,
                hashed_password: hashed_password.to_string(),
            },
        );
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.tables()?
            .credentials
            .get(&normalize_email(email))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User with email {} not found", email)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.tables()?.auth_sessions.insert(
            session_id.to_string(),
            AuthSession {
                id: session_id.to_string(),
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let mut tables = self.tables()?;
        let session = tables
            .auth_sessions
            .get(session_id)
            .cloned()
            .ok_or(PortError::Unauthorized)?;
        if session.expires_at <= Utc::now() {
            tables.auth_sessions.remove(session_id);
            return Err(PortError::Unauthorized);
        }
        Ok(session.user_id)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.tables()?.auth_sessions.remove(session_id);
        Ok(())
    }
}
