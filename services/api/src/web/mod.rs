pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::require_auth;
pub use rest::ApiDoc;
pub use state::AppState;

/// Largest accepted request body, sized for phone photos.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Builds the API router with its state applied.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/", get(rest::root_handler))
        .route("/health", get(rest::health_handler))
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/leaderboard", get(rest::leaderboard_handler))
        .route("/badges", get(rest::badges_handler))
        .route(
            "/admin/users/{id}/reset-daily",
            post(rest::reset_daily_handler),
        );

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/user/me", get(rest::me_handler))
        .route("/user/upgrade", post(rest::upgrade_handler))
        .route("/questions/ask", post(rest::ask_handler))
        .route("/questions/upload-image", post(rest::upload_image_handler))
        .route("/questions/history", get(rest::history_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(app_state)
}
