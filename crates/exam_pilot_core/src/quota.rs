//! crates/exam_pilot_core/src/quota.rs
//!
//! The quota gate: whether a user may submit another question this period.

use crate::domain::{Tier, UserProgress};

/// Questions a free account may ask per day.
pub const DAILY_FREE_LIMIT: u32 = 5;

/// Pure check, to be made before any external work is started for a request.
pub fn may_ask(progress: &UserProgress) -> bool {
    match progress.tier {
        Tier::Premium => true,
        Tier::Free => progress.daily_question_count < DAILY_FREE_LIMIT,
    }
}

/// Starts a new quota period. Every other field is left untouched.
pub fn reset_daily(mut progress: UserProgress) -> UserProgress {
    progress.daily_question_count = 0;
    progress
}
