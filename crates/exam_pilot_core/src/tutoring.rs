//! crates/exam_pilot_core/src/tutoring.rs
//!
//! The tutoring orchestrator. It composes the quota gate, the explanation
//! provider, the parser and the progression engine, and commits the result
//! through the `DatabaseService` port.
//!
//! A question moves through these states:
//! `Received -> QuotaChecked -> GenerationRequested -> {Succeeded | Failed}
//!  -> Parsed -> ProgressionUpdated -> Persisted -> Responded`.
//!
//! Every mutation of a user runs while holding that user's lock from
//! `UserLocks`, and is committed with the revision it was computed from.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{
    BadgeDefinition, BadgeId, Language, LeaderboardEntry, QuestionRecord, Subject, UserProgress,
    BADGE_CATALOG,
};
use crate::locks::UserLocks;
use crate::parser::parse_explanation;
use crate::ports::{DatabaseService, ExplanationService, PortError, TextExtractionService};
use crate::progression::{award_xp, evaluate_badges, record_activity, upgrade_to_premium};
use crate::quota;

/// Substituted whenever the explanation provider fails, so the student
/// always receives a usable answer.
pub const FALLBACK_EXPLANATION: &str = "STEP 1: Read the question carefully and understand what is being asked
STEP 2: Identify the key concepts and formulas needed
STEP 3: Apply the appropriate method step by step
STEP 4: Verify your answer makes sense

FINAL ANSWER: Solution completed! Check the steps above.";

/// Upper bound for a single generation or OCR call.
pub const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts to commit against a concurrently modified user before giving up.
const MAX_COMMIT_ATTEMPTS: usize = 3;

//=========================================================================================
// Errors and Results
//=========================================================================================

/// The failures a caller can observe. Provider failures never appear here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Daily limit reached. Upgrade to premium for unlimited questions!")]
    QuotaExceeded,
    #[error("User {0} not found")]
    UserNotFound(Uuid),
    #[error("Email already exists")]
    EmailTaken,
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<PortError> for SessionError {
    fn from(e: PortError) -> Self {
        SessionError::StoreUnavailable(e.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// A typed question submitted by a user.
#[derive(Debug, Clone)]
pub struct QuestionRequest {
    pub user_id: Uuid,
    pub text: String,
    pub subject: Subject,
    /// Falls back to the user's preferred language.
    pub language: Option<Language>,
}

/// The response to an answered question.
#[derive(Debug, Clone)]
pub struct AnsweredQuestion {
    pub question: QuestionRecord,
    /// Only the badges earned by this request.
    pub new_badges: Vec<BadgeId>,
    pub user: UserProgress,
}

/// Result of an image submission.
#[derive(Debug, Clone)]
pub enum ImageOutcome {
    Answered(AnsweredQuestion),
    /// Nothing readable was found; the quota and progression are untouched.
    NoTextFound,
}

//=========================================================================================
// The Service
//=========================================================================================

pub struct TutoringService {
    db: Arc<dyn DatabaseService>,
    explainer: Arc<dyn ExplanationService>,
    extractor: Arc<dyn TextExtractionService>,
    clock: Clock,
    external_timeout: Duration,
    locks: UserLocks,
}

impl TutoringService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        explainer: Arc<dyn ExplanationService>,
        extractor: Arc<dyn TextExtractionService>,
    ) -> Self {
        Self {
            db,
            explainer,
            extractor,
            clock: Clock::System,
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
            locks: UserLocks::new(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_external_timeout(mut self, external_timeout: Duration) -> Self {
        self.external_timeout = external_timeout;
        self
    }

    pub fn badge_catalog() -> &'static [BadgeDefinition] {
        &BADGE_CATALOG
    }

    // --- Accounts ---

    /// Creates a free account with no recorded activity.
    pub async fn register(
        &self,
        email: &str,
        hashed_password: &str,
        display_name: &str,
    ) -> SessionResult<UserProgress> {
        let user = UserProgress::new(display_name.trim(), self.clock.now());
        match self.db.create_account(&user, email, hashed_password).await {
            Ok(()) => {
                info!(user_id = %user.id, "Account registered.");
                Ok(user)
            }
            Err(PortError::Conflict(_)) => Err(SessionError::EmailTaken),
            Err(e) => Err(e.into()),
        }
    }

    /// Records a login as an activity event, keeping the streak current.
    pub async fn check_in(&self, user_id: Uuid) -> SessionResult<UserProgress> {
        let now = self.clock.now();
        let (user, ()) = self
            .update_user(user_id, move |user| (record_activity(user, now), ()))
            .await?;
        Ok(user)
    }

    pub async fn profile(&self, user_id: Uuid) -> SessionResult<UserProgress> {
        self.load_user(user_id).await
    }

    /// Moves the account to premium and awards any badge that unlocks.
    pub async fn upgrade(&self, user_id: Uuid) -> SessionResult<(UserProgress, Vec<BadgeId>)> {
        let (user, new_badges) = self
            .update_user(user_id, |user| evaluate_badges(upgrade_to_premium(user)))
            .await?;
        info!(user_id = %user_id, ?new_badges, "Account upgraded to premium.");
        Ok((user, new_badges))
    }

    /// Starts a new quota period for one user. Meant to be driven by a scheduler.
    pub async fn reset_daily(&self, user_id: Uuid) -> SessionResult<UserProgress> {
        let (user, ()) = self
            .update_user(user_id, |user| (quota::reset_daily(user), ()))
            .await?;
        Ok(user)
    }

    // --- Questions ---

    pub async fn ask(&self, request: QuestionRequest) -> SessionResult<AnsweredQuestion> {
        let _guard = self.locks.acquire(request.user_id).await;
        let user = self.admit(request.user_id).await?;
        let language = request.language.unwrap_or(user.preferred_language);
        self.answer(user, request.text, request.subject, language).await
    }

    /// Answers a photographed question. The quota is checked before OCR runs,
    /// but an image without text does not count against it.
    pub async fn ask_from_image(
        &self,
        user_id: Uuid,
        image_data: &[u8],
        subject: Subject,
        language: Option<Language>,
    ) -> SessionResult<ImageOutcome> {
        let _guard = self.locks.acquire(user_id).await;
        let user = self.admit(user_id).await?;

        let extraction = timeout(self.external_timeout, self.extractor.extract_text(image_data));
        let extracted = match extraction.await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(user_id = %user_id, "Text extraction failed: {}", e);
                String::new()
            }
            Err(_) => {
                warn!(
                    user_id = %user_id,
                    "Text extraction timed out after {:?}",
                    self.external_timeout
                );
                String::new()
            }
        };

        let text = extracted.trim();
        if text.is_empty() {
            info!(user_id = %user_id, "No text found in submitted image.");
            return Ok(ImageOutcome::NoTextFound);
        }

        let language = language.unwrap_or(user.preferred_language);
        self.answer(user, text.to_string(), subject, language)
            .await
            .map(ImageOutcome::Answered)
    }

    pub async fn history(&self, user_id: Uuid) -> SessionResult<Vec<QuestionRecord>> {
        self.load_user(user_id).await?;
        Ok(self.db.list_questions_by_user(user_id).await?)
    }

    pub async fn leaderboard(&self, limit: usize) -> SessionResult<Vec<LeaderboardEntry>> {
        let users = self.db.list_top_users_by_xp(limit).await?;
        Ok(users
            .into_iter()
            .zip(1u32..)
            .map(|(user, rank)| LeaderboardEntry {
                rank,
                user_id: user.id,
                level: user.level(),
                display_name: user.display_name,
                xp: user.xp,
                streak_days: user.streak_days,
            })
            .collect())
    }

    //=====================================================================================
    // Internals
    //=====================================================================================

    async fn load_user(&self, user_id: Uuid) -> SessionResult<UserProgress> {
        self.db
            .get_user(user_id)
            .await?
            .ok_or(SessionError::UserNotFound(user_id))
    }

    /// Loads the user and applies the quota gate. Caller holds the user lock.
    async fn admit(&self, user_id: Uuid) -> SessionResult<UserProgress> {
        let user = self.load_user(user_id).await?;
        if !quota::may_ask(&user) {
            info!(user_id = %user_id, daily = user.daily_question_count, "Quota exceeded.");
            return Err(SessionError::QuotaExceeded);
        }
        Ok(user)
    }

    /// Returns the raw explanation and whether the fallback had to be used.
    async fn generate(&self, subject: Subject, question: &str, language: Language) -> (String, bool) {
        let outcome = timeout(
            self.external_timeout,
            self.explainer.explain(subject, question, language),
        )
        .await;

        match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => (text, false),
            Ok(Ok(_)) => {
                warn!(%subject, "Explanation provider returned an empty answer; using fallback.");
                (FALLBACK_EXPLANATION.to_string(), true)
            }
            Ok(Err(e)) => {
                warn!(%subject, "Explanation provider failed: {}; using fallback.", e);
                (FALLBACK_EXPLANATION.to_string(), true)
            }
            Err(_) => {
                warn!(
                    %subject,
                    "Explanation provider timed out after {:?}; using fallback.",
                    self.external_timeout
                );
                (FALLBACK_EXPLANATION.to_string(), true)
            }
        }
    }

    /// Generates, parses and commits one answer. Caller holds the user lock.
    async fn answer(
        &self,
        user: UserProgress,
        question_text: String,
        subject: Subject,
        language: Language,
    ) -> SessionResult<AnsweredQuestion> {
        let user_id = user.id;
        let (raw, used_fallback) = self.generate(subject, &question_text, language).await;
        let parsed = parse_explanation(&raw);
        let now = self.clock.now();

        let question = QuestionRecord {
            id: Uuid::new_v4(),
            user_id,
            question_text,
            subject,
            language,
            steps: parsed.steps,
            final_answer: parsed.final_answer,
            used_fallback,
            created_at: now,
        };

        let mut current = user;
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let expected_revision = current.revision;
            let (updated, new_badges) = apply_answer(current, now);

            match self.db.save_answer(&updated, &question, expected_revision).await {
                Ok(()) => {
                    info!(
                        user_id = %user_id,
                        question_id = %question.id,
                        used_fallback,
                        xp = updated.xp,
                        ?new_badges,
                        "Question answered."
                    );
                    return Ok(AnsweredQuestion {
                        question,
                        new_badges,
                        user: updated,
                    });
                }
                Err(PortError::Conflict(reason)) => {
                    warn!(user_id = %user_id, attempt, "Commit conflict: {}", reason);
                    current = self.load_user(user_id).await?;
                    // Another process may have used up the quota meanwhile.
                    if !quota::may_ask(&current) {
                        return Err(SessionError::QuotaExceeded);
                    }
                }
                Err(e) => {
                    error!(user_id = %user_id, "Failed to persist answer: {}", e);
                    return Err(e.into());
                }
            }
        }

        Err(SessionError::StoreUnavailable(format!(
            "user {} kept changing after {} attempts",
            user_id, MAX_COMMIT_ATTEMPTS
        )))
    }

    /// Applies `change` to the freshly loaded user and commits it under the user lock.
    async fn update_user<T, F>(&self, user_id: Uuid, change: F) -> SessionResult<(UserProgress, T)>
    where
        F: Fn(UserProgress) -> (UserProgress, T) + Send,
        T: Send,
    {
        let _guard = self.locks.acquire(user_id).await;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let current = self.load_user(user_id).await?;
            let expected_revision = current.revision;
            let (mut updated, extra) = change(current);
            updated.revision = expected_revision + 1;

            match self.db.put_user(&updated, expected_revision).await {
                Ok(()) => return Ok((updated, extra)),
                Err(PortError::Conflict(reason)) => {
                    warn!(user_id = %user_id, attempt, "Update conflict: {}", reason);
                }
                Err(e) => {
                    error!(user_id = %user_id, "Failed to persist user: {}", e);
                    return Err(e.into());
                }
            }
        }

        Err(SessionError::StoreUnavailable(format!(
            "user {} kept changing after {} attempts",
            user_id, MAX_COMMIT_ATTEMPTS
        )))
    }
}

/// The progression step of an answered question, in its required order.
fn apply_answer(mut user: UserProgress, now: DateTime<Utc>) -> (UserProgress, Vec<BadgeId>) {
    let expected_revision = user.revision;
    user.daily_question_count = user.daily_question_count.saturating_add(1);
    user.total_question_count = user.total_question_count.saturating_add(1);
    let user = record_activity(user, now);
    let user = award_xp(user);
    let (mut user, new_badges) = evaluate_badges(user);
    user.revision = expected_revision + 1;
    (user, new_badges)
}
