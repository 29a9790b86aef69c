//! crates/exam_pilot_core/src/progression.rs
//!
//! Pure functions over a `UserProgress` value: streaks, XP and badges.
//! Each function takes the record by value and returns the updated record.

use chrono::{DateTime, Utc};

use crate::domain::{BadgeId, Tier, UserProgress, XP_PER_QUESTION};

//=========================================================================================
// Streaks
//=========================================================================================

/// Records one activity event at `now`, comparing UTC calendar dates.
pub fn record_activity(mut progress: UserProgress, now: DateTime<Utc>) -> UserProgress {
    let today = now.date_naive();

    progress.streak_days = match progress.last_active_at.map(|at| at.date_naive()) {
        None => 1,
        // A date ahead of today only happens with clock skew; treat it as today.
        Some(last) if last >= today => progress.streak_days.max(1),
        Some(last) if today.pred_opt() == Some(last) => progress.streak_days + 1,
        Some(_) => 1,
    };
    progress.last_active_at = Some(now);
    progress
}

//=========================================================================================
// Experience
//=========================================================================================

/// Adds the per-question reward. The level follows from `xp`.
pub fn award_xp(mut progress: UserProgress) -> UserProgress {
    progress.xp = progress.xp.saturating_add(XP_PER_QUESTION);
    progress
}

/// Upgrades the account; premium accounts are never downgraded here.
pub fn upgrade_to_premium(mut progress: UserProgress) -> UserProgress {
    progress.tier = Tier::Premium;
    progress
}

//=========================================================================================
// Badges
//=========================================================================================

struct BadgeRule {
    badge: BadgeId,
    earned: fn(&UserProgress) -> bool,
}

/// Evaluated top to bottom, in catalog order.
const BADGE_RULES: [BadgeRule; 8] = [
    BadgeRule {
        badge: BadgeId::FirstQuestion,
        earned: |p| p.total_question_count >= 1,
    },
    BadgeRule {
        badge: BadgeId::Questions10,
        earned: |p| p.total_question_count >= 10,
    },
    BadgeRule {
        badge: BadgeId::Questions50,
        earned: |p| p.total_question_count >= 50,
    },
    BadgeRule {
        badge: BadgeId::Questions100,
        earned: |p| p.total_question_count >= 100,
    },
    BadgeRule {
        badge: BadgeId::Streak3,
        earned: |p| p.streak_days >= 3,
    },
    BadgeRule {
        badge: BadgeId::Streak7,
        earned: |p| p.streak_days >= 7,
    },
    BadgeRule {
        badge: BadgeId::Streak30,
        earned: |p| p.streak_days >= 30,
    },
    BadgeRule {
        badge: BadgeId::Premium,
        earned: |p| p.tier == Tier::Premium,
    },
];

/// Appends every badge whose rule now holds and which is not yet held.
///
/// Returns the updated record and the newly earned badges, in catalog order.
/// Badges are never removed, even when a streak later resets.
pub fn evaluate_badges(mut progress: UserProgress) -> (UserProgress, Vec<BadgeId>) {
    let newly_earned: Vec<BadgeId> = BADGE_RULES
        .iter()
        .filter(|rule| !progress.has_badge(rule.badge) && (rule.earned)(&progress))
        .map(|rule| rule.badge)
        .collect();

    progress.badges.extend_from_slice(&newly_earned);
    (progress, newly_earned)
}
