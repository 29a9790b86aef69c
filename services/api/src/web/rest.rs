//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::reject;
use crate::web::auth::{AuthResponse, LoginRequest, SignupRequest};
use crate::web::state::AppState;
use axum::{
    extract::{Extension, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use exam_pilot_core::domain::UnknownTag;
use exam_pilot_core::quota::DAILY_FREE_LIMIT;
use exam_pilot_core::{
    AnsweredQuestion, BadgeDefinition, ImageOutcome, Language, LeaderboardEntry, QuestionRecord,
    QuestionRequest, SessionResult, Subject, Tier, TutoringService, UserProgress,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// Size of the public leaderboard.
pub const LEADERBOARD_SIZE: usize = 10;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
const NO_TEXT_MESSAGE: &str =
    "No text found in image. Please try a clearer image or type your question.";

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        root_handler,
        health_handler,
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        me_handler,
        upgrade_handler,
        ask_handler,
        upload_image_handler,
        history_handler,
        leaderboard_handler,
        badges_handler,
        reset_daily_handler,
    ),
    components(
        schemas(
            ServiceInfo,
            HealthResponse,
            SignupRequest,
            LoginRequest,
            AuthResponse,
            UserResponse,
            UpgradeResponse,
            AskRequest,
            AskResponse,
            QuestionResponse,
            ImageErrorResponse,
            LeaderboardEntryResponse,
            BadgeResponse,
            ResetDailyResponse,
        )
    ),
    tags(
        (name = "ExamPilot API", description = "Step-by-step IGCSE explanations with streaks, XP and badges.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct ServiceInfo {
    message: String,
    version: String,
    status: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
}

/// A user's public progress profile.
#[derive(Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub tier: String,
    pub daily_questions: u32,
    /// `null` for premium accounts.
    pub daily_questions_remaining: Option<u32>,
    pub total_questions: u32,
    pub streak: u32,
    pub last_active: Option<DateTime<Utc>>,
    pub xp: u32,
    pub level: u32,
    pub badges: Vec<String>,
    pub preferred_language: String,
    pub created_at: DateTime<Utc>,
}

impl From<&UserProgress> for UserResponse {
    fn from(user: &UserProgress) -> Self {
        let daily_questions_remaining = match user.tier {
            Tier::Free => Some(DAILY_FREE_LIMIT.saturating_sub(user.daily_question_count)),
            Tier::Premium => None,
        };
        Self {
            id: user.id,
            name: user.display_name.clone(),
            tier: user.tier.as_str().to_string(),
            daily_questions: user.daily_question_count,
            daily_questions_remaining,
            total_questions: user.total_question_count,
            streak: user.streak_days,
            last_active: user.last_active_at,
            xp: user.xp,
            level: user.level(),
            badges: user.badges.iter().map(|b| b.as_str().to_string()).collect(),
            preferred_language: user.preferred_language.as_str().to_string(),
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct UpgradeResponse {
    message: String,
    new_badges: Vec<String>,
    user: UserResponse,
}

/// A typed question. `subject` defaults to `math`; `language` defaults to the
/// user's preferred language.
#[derive(Deserialize, ToSchema)]
pub struct AskRequest {
    pub text: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct QuestionResponse {
    id: Uuid,
    question: String,
    subject: String,
    language: String,
    steps: Vec<String>,
    final_answer: String,
    used_fallback: bool,
    created_at: DateTime<Utc>,
}

impl From<QuestionRecord> for QuestionResponse {
    fn from(record: QuestionRecord) -> Self {
        Self {
            id: record.id,
            question: record.question_text,
            subject: record.subject.as_str().to_string(),
            language: record.language.as_str().to_string(),
            steps: record.steps,
            final_answer: record.final_answer,
            used_fallback: record.used_fallback,
            created_at: record.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AskResponse {
    question: QuestionResponse,
    /// Badges earned by this question only.
    new_badges: Vec<String>,
    user: UserResponse,
}

impl From<AnsweredQuestion> for AskResponse {
    fn from(answered: AnsweredQuestion) -> Self {
        Self {
            user: UserResponse::from(&answered.user),
            new_badges: answered
                .new_badges
                .iter()
                .map(|b| b.as_str().to_string())
                .collect(),
            question: answered.question.into(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ImageErrorResponse {
    error: String,
}

#[derive(Serialize, ToSchema)]
pub struct LeaderboardEntryResponse {
    rank: u32,
    user_id: Uuid,
    name: String,
    xp: u32,
    level: u32,
    streak: u32,
}

impl From<LeaderboardEntry> for LeaderboardEntryResponse {
    fn from(entry: LeaderboardEntry) -> Self {
        Self {
            rank: entry.rank,
            user_id: entry.user_id,
            name: entry.display_name,
            xp: entry.xp,
            level: entry.level,
            streak: entry.streak_days,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct BadgeResponse {
    id: String,
    name: String,
    icon: String,
    description: String,
}

impl From<&BadgeDefinition> for BadgeResponse {
    fn from(badge: &BadgeDefinition) -> Self {
        Self {
            id: badge.id.as_str().to_string(),
            name: badge.display_name.to_string(),
            icon: badge.icon.to_string(),
            description: badge.description.to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ResetDailyResponse {
    message: String,
    user: UserResponse,
}

//=========================================================================================
// Input Parsing
//=========================================================================================

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

fn parse_subject(raw: Option<&str>) -> Result<Subject, (StatusCode, String)> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Subject::Math),
        Some(value) => value.parse().map_err(|e: UnknownTag| bad_request(e.to_string())),
    }
}

fn parse_language(raw: Option<&str>) -> Result<Option<Language>, (StatusCode, String)> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|value| value.parse().map_err(|e: UnknownTag| bad_request(e.to_string())))
        .transpose()
}

/// Runs a question on its own task so that a dropped connection does not
/// abandon a generation or commit halfway.
async fn run_detached<T, F, Fut>(
    tutoring: Arc<TutoringService>,
    work: F,
) -> Result<T, (StatusCode, String)>
where
    T: Send + 'static,
    F: FnOnce(Arc<TutoringService>) -> Fut,
    Fut: Future<Output = SessionResult<T>> + Send + 'static,
{
    tokio::spawn(work(tutoring))
        .await
        .map_err(|e| {
            error!("Question task failed: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process question".to_string(),
            )
        })?
        .map_err(reject)
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Service name, version and status.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service information", body = ServiceInfo))
)]
pub async fn root_handler() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "ExamPilot API - AI Exam Coach".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// The signed-in user's progress profile.
#[utoipa::path(
    get,
    path = "/user/me",
    responses(
        (status = 200, description = "Progress profile", body = UserResponse),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "User not found")
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    let user = state.tutoring.profile(user_id).await.map_err(reject)?;
    Ok(Json(UserResponse::from(&user)))
}

/// Upgrade the signed-in user to premium.
#[utoipa::path(
    post,
    path = "/user/upgrade",
    responses(
        (status = 200, description = "Upgraded", body = UpgradeResponse),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "User not found")
    )
)]
pub async fn upgrade_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<UpgradeResponse>, (StatusCode, String)> {
    let (user, new_badges) = state.tutoring.upgrade(user_id).await.map_err(reject)?;
    Ok(Json(UpgradeResponse {
        message: "Upgraded to premium!".to_string(),
        new_badges: new_badges.iter().map(|b| b.as_str().to_string()).collect(),
        user: UserResponse::from(&user),
    }))
}

/// Ask a typed question.
#[utoipa::path(
    post,
    path = "/questions/ask",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Explained question and updated progress", body = AskResponse),
        (status = 400, description = "Empty text or unknown subject/language"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Daily limit reached"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, String)> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(bad_request("Question text must not be empty"));
    }
    let request = QuestionRequest {
        user_id,
        text: text.to_string(),
        subject: parse_subject(req.subject.as_deref())?,
        language: parse_language(req.language.as_deref())?,
    };

    let answered = run_detached(state.tutoring.clone(), |tutoring| async move {
        tutoring.ask(request).await
    })
    .await?;
    Ok(Json(answered.into()))
}

/// Ask a question by uploading a photo of it.
///
/// Multipart fields: `file` (required), `subject`, `language`.
/// When no text can be read, the answer is 200 with an `error` body and the
/// daily quota is left untouched.
#[utoipa::path(
    post,
    path = "/questions/upload-image",
    request_body(content_type = "multipart/form-data", description = "The image and optional subject/language."),
    responses(
        (status = 200, description = "Explained question, or an `error` body when no text was found", body = AskResponse),
        (status = 400, description = "Missing file or unknown subject/language"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Daily limit reached"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn upload_image_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    mut multipart: Multipart,
) -> Result<Response, (StatusCode, String)> {
    let mut image = None;
    let mut subject = None;
    let mut language = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Failed to read multipart data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read file bytes: {}", e)))?;
                image = Some(data.to_vec());
            }
            "subject" | "language" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read field {}: {}", name, e)))?;
                if name == "subject" {
                    subject = Some(value);
                } else {
                    language = Some(value);
                }
            }
            _ => {}
        }
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| bad_request("Multipart form must include a file"))?;
    let subject = parse_subject(subject.as_deref())?;
    let language = parse_language(language.as_deref())?;

    let outcome = run_detached(state.tutoring.clone(), move |tutoring| async move {
        tutoring
            .ask_from_image(user_id, &image, subject, language)
            .await
    })
    .await?;

    Ok(match outcome {
        ImageOutcome::Answered(answered) => Json(AskResponse::from(answered)).into_response(),
        ImageOutcome::NoTextFound => Json(ImageErrorResponse {
            error: NO_TEXT_MESSAGE.to_string(),
        })
        .into_response(),
    })
}

/// The signed-in user's questions, newest first.
#[utoipa::path(
    get,
    path = "/questions/history",
    responses(
        (status = 200, description = "Question history", body = [QuestionResponse]),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<Vec<QuestionResponse>>, (StatusCode, String)> {
    let history = state.tutoring.history(user_id).await.map_err(reject)?;
    Ok(Json(history.into_iter().map(Into::into).collect()))
}

/// Top users by XP.
#[utoipa::path(
    get,
    path = "/leaderboard",
    responses((status = 200, description = "Leaderboard", body = [LeaderboardEntryResponse]))
)]
pub async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LeaderboardEntryResponse>>, (StatusCode, String)> {
    let entries = state
        .tutoring
        .leaderboard(LEADERBOARD_SIZE)
        .await
        .map_err(reject)?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

/// Every badge that can be earned.
#[utoipa::path(
    get,
    path = "/badges",
    responses((status = 200, description = "Badge catalog", body = [BadgeResponse]))
)]
pub async fn badges_handler() -> Json<Vec<BadgeResponse>> {
    Json(
        TutoringService::badge_catalog()
            .iter()
            .map(BadgeResponse::from)
            .collect(),
    )
}

/// Reset one user's daily question count. Called by the daily scheduler.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/reset-daily",
    responses(
        (status = 200, description = "Daily count reset", body = ResetDailyResponse),
        (status = 403, description = "Missing or wrong admin token"),
        (status = 404, description = "User not found")
    ),
    params(
        ("id" = Uuid, Path, description = "The user to reset."),
        ("x-admin-token" = String, Header, description = "The configured admin token.")
    )
)]
pub async fn reset_daily_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ResetDailyResponse>, (StatusCode, String)> {
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    let authorized = matches!(
        (state.config.admin_token.as_deref(), presented),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        return Err((StatusCode::FORBIDDEN, "Admin token required".to_string()));
    }

    let user = state.tutoring.reset_daily(user_id).await.map_err(reject)?;
    Ok(Json(ResetDailyResponse {
        message: "Daily count reset".to_string(),
        user: UserResponse::from(&user),
    }))
}
