//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use exam_pilot_core::ports::DatabaseService;
use exam_pilot_core::TutoringService;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub tutoring: Arc<TutoringService>,
    /// Used directly only for credentials and auth sessions.
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
}
