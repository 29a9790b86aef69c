//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_pilot_core::domain::{BadgeId, QuestionRecord, UserCredentials, UserProgress};
use exam_pilot_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgConnection, PgPool};
use std::fmt::Display;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, display_name, tier, daily_question_count, total_question_count, \
     streak_days, last_active_at, xp, badges, preferred_language, created_at, revision";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: impl Display) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn to_i64(value: u64) -> PortResult<i64> {
    i64::try_from(value).map_err(unexpected)
}

fn to_u32(column: &str, value: i64) -> PortResult<u32> {
    u32::try_from(value).map_err(|_| unexpected(format!("{} out of range: {}", column, value)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    display_name: String,
    tier: String,
    daily_question_count: i64,
    total_question_count: i64,
    streak_days: i64,
    last_active_at: Option<DateTime<Utc>>,
    xp: i64,
    badges: Vec<String>,
    preferred_language: String,
    created_at: DateTime<Utc>,
    revision: i64,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<UserProgress> {
        let badges = self
            .badges
            .iter()
            .map(|badge| badge.parse::<BadgeId>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(unexpected)?;

        Ok(UserProgress {
            id: self.id,
            display_name: self.display_name,
            tier: self.tier.parse().map_err(unexpected)?,
            daily_question_count: to_u32("daily_question_count", self.daily_question_count)?,
            total_question_count: to_u32("total_question_count", self.total_question_count)?,
            streak_days: to_u32("streak_days", self.streak_days)?,
            last_active_at: self.last_active_at,
            xp: to_u32("xp", self.xp)?,
            badges,
            preferred_language: self.preferred_language.parse().map_err(unexpected)?,
            created_at: self.created_at,
            revision: u64::try_from(self.revision).map_err(unexpected)?,
        })
    }
}

#[derive(FromRow)]
struct QuestionRow {
    id: Uuid,
    user_id: Uuid,
    question_text: String,
    subject: String,
    language: String,
    steps: Vec<String>,
    final_answer: String,
    used_fallback: bool,
    created_at: DateTime<Utc>,
}
impl QuestionRow {
    fn to_domain(self) -> PortResult<QuestionRecord> {
        Ok(QuestionRecord {
            id: self.id,
            user_id: self.user_id,
            question_text: self.question_text,
            subject: self.subject.parse().map_err(unexpected)?,
            language: self.language.parse().map_err(unexpected)?,
            steps: self.steps,
            final_answer: self.final_answer,
            used_fallback: self.used_fallback,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

fn badge_names(user: &UserProgress) -> Vec<String> {
    user.badges.iter().map(|b| b.as_str().to_string()).collect()
}

//=========================================================================================
// Statements shared by several port methods
//=========================================================================================

/// Overwrites the user row if it is still at `expected_revision`.
async fn update_user_row(
    conn: &mut PgConnection,
    user: &UserProgress,
    expected_revision: u64,
) -> PortResult<()> {
    let result = sqlx::query(
        "UPDATE users SET display_name = $2, tier = $3, daily_question_count = $4, \
         total_question_count = $5, streak_days = $6, last_active_at = $7, xp = $8, \
         badges = $9, preferred_language = $10, revision = $11 \
         WHERE id = $1 AND revision = $12",
    )
    .bind(user.id)
    .bind(&user.display_name)
    .bind(user.tier.as_str())
    .bind(i64::from(user.daily_question_count))
    .bind(i64::from(user.total_question_count))
    .bind(i64::from(user.streak_days))
    .bind(user.last_active_at)
    .bind(i64::from(user.xp))
    .bind(badge_names(user))
    .bind(user.preferred_language.as_str())
    .bind(to_i64(user.revision)?)
    .bind(to_i64(expected_revision)?)
    .execute(&mut *conn)
    .await
    .map_err(unexpected)?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(user.id)
        .fetch_one(&mut *conn)
        .await
        .map_err(unexpected)?;
    if exists {
        Err(PortError::Conflict(format!(
            "User {} is no longer at revision {}",
            user.id, expected_revision
        )))
    } else {
        Err(PortError::NotFound(format!("User {} not found", user.id)))
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_user(&self, user_id: Uuid) -> PortResult<Option<UserProgress>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(UserRecord::to_domain).transpose()
    }

    async fn put_user(&self, user: &UserProgress, expected_revision: u64) -> PortResult<()> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        update_user_row(&mut *conn, user, expected_revision).await
    }

    async fn save_answer(
        &self,
        user: &UserProgress,
        question: &QuestionRecord,
        expected_revision: u64,
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        update_user_row(&mut *tx, user, expected_revision).await?;

        sqlx::query(
            "INSERT INTO questions (id, user_id, question_text, subject, language, steps, \
             final_answer, used_fallback, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(question.id)
        .bind(question.user_id)
        .bind(&question.question_text)
        .bind(question.subject.as_str())
        .bind(question.language.as_str())
        .bind(question.steps.clone())
        .bind(&question.final_answer)
        .bind(question.used_fallback)
        .bind(question.created_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        // Dropping the transaction without commit rolls both writes back.
        tx.commit().await.map_err(unexpected)
    }

    async fn list_questions_by_user(&self, user_id: Uuid) -> PortResult<Vec<QuestionRecord>> {
        let records = sqlx::query_as::<_, QuestionRow>(
            "SELECT id, user_id, question_text, subject, language, steps, final_answer, \
             used_fallback, created_at FROM questions WHERE user_id = $1 \
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(QuestionRow::to_domain).collect()
    }

    async fn list_top_users_by_xp(&self, limit: usize) -> PortResult<Vec<UserProgress>> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users ORDER BY xp DESC, created_at ASC LIMIT $1",
            USER_COLUMNS
        ))
        .bind(to_i64(limit as u64)?)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(UserRecord::to_domain).collect()
    }

    async fn create_account(
        &self,
        user: &UserProgress,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO users (id, display_name, tier, daily_question_count, \
             total_question_count, streak_days, last_active_at, xp, badges, \
             preferred_language, created_at, revision) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(user.id)
        .bind(&user.display_name)
        .bind(user.tier.as_str())
        .bind(i64::from(user.daily_question_count))
        .bind(i64::from(user.total_question_count))
        .bind(i64::from(user.streak_days))
        .bind(user.last_active_at)
        .bind(i64::from(user.xp))
        .bind(badge_names(user))
        .bind(user.preferred_language.as_str())
        .bind(user.created_at)
        .bind(to_i64(user.revision)?)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        sqlx::query("INSERT INTO credentials (user_id, email, hashed_password) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(email.trim().to_lowercase())
            .bind(hashed_password)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    PortError::Conflict(format!("Email {} already exists", email))
                }
                _ => unexpected(e),
            })?;

        tx.commit().await.map_err(unexpected)
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM credentials WHERE email = $1",
        )
        .bind(email.trim().to_lowercase())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("User with email {} not found", email))
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
