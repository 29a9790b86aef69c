//! crates/exam_pilot_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// XP awarded for every answered question.
pub const XP_PER_QUESTION: u32 = 10;

/// XP needed to climb one level.
pub const XP_PER_LEVEL: u32 = 100;

//=========================================================================================
// Enumerations
//=========================================================================================

/// Error returned when a textual tag does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownTag {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownTag {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Account class controlling the daily quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

impl FromStr for Tier {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            _ => Err(UnknownTag::new("tier", s)),
        }
    }
}

/// Language an explanation is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    En,
    Ar,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ar => "ar",
        }
    }
}

impl FromStr for Language {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "ar" => Ok(Language::Ar),
            _ => Err(UnknownTag::new("language", s)),
        }
    }
}

/// IGCSE subject a question belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subject {
    #[default]
    Math,
    Physics,
    Chemistry,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Math => "math",
            Subject::Physics => "physics",
            Subject::Chemistry => "chemistry",
        }
    }
}

impl FromStr for Subject {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "math" => Ok(Subject::Math),
            "physics" => Ok(Subject::Physics),
            "chemistry" => Ok(Subject::Chemistry),
            _ => Err(UnknownTag::new("subject", s)),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//=========================================================================================
// Badges
//=========================================================================================

/// Identifier of a one-time achievement. Variant order is catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BadgeId {
    FirstQuestion,
    Questions10,
    Questions50,
    Questions100,
    Streak3,
    Streak7,
    Streak30,
    Premium,
}

impl BadgeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BadgeId::FirstQuestion => "first_question",
            BadgeId::Questions10 => "questions_10",
            BadgeId::Questions50 => "questions_50",
            BadgeId::Questions100 => "questions_100",
            BadgeId::Streak3 => "streak_3",
            BadgeId::Streak7 => "streak_7",
            BadgeId::Streak30 => "streak_30",
            BadgeId::Premium => "premium",
        }
    }
}

impl FromStr for BadgeId {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BADGE_CATALOG
            .iter()
            .find(|badge| badge.id.as_str() == s)
            .map(|badge| badge.id)
            .ok_or_else(|| UnknownTag::new("badge", s))
    }
}

impl fmt::Display for BadgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display metadata for a badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadgeDefinition {
    pub id: BadgeId,
    pub display_name: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
}

/// The static badge catalog, in its natural display order.
pub const BADGE_CATALOG: [BadgeDefinition; 8] = [
    BadgeDefinition {
        id: BadgeId::FirstQuestion,
        display_name: "First Steps",
        icon: "🎯",
        description: "Asked your first question",
    },
    BadgeDefinition {
        id: BadgeId::Questions10,
        display_name: "Curious Mind",
        icon: "🧠",
        description: "Solved 10 questions",
    },
    BadgeDefinition {
        id: BadgeId::Questions50,
        display_name: "Scholar",
        icon: "📚",
        description: "Solved 50 questions",
    },
    BadgeDefinition {
        id: BadgeId::Questions100,
        display_name: "Master",
        icon: "🏆",
        description: "Solved 100 questions",
    },
    BadgeDefinition {
        id: BadgeId::Streak3,
        display_name: "On Fire",
        icon: "🔥",
        description: "3-day streak",
    },
    BadgeDefinition {
        id: BadgeId::Streak7,
        display_name: "Unstoppable",
        icon: "⚡",
        description: "7-day streak",
    },
    BadgeDefinition {
        id: BadgeId::Streak30,
        display_name: "Legend",
        icon: "👑",
        description: "30-day streak",
    },
    BadgeDefinition {
        id: BadgeId::Premium,
        display_name: "VIP",
        icon: "💎",
        description: "Upgraded to Premium",
    },
];

//=========================================================================================
// Records
//=========================================================================================

/// Per-account progression and quota state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProgress {
    pub id: Uuid,
    pub display_name: String,
    pub tier: Tier,
    pub daily_question_count: u32,
    pub total_question_count: u32,
    pub streak_days: u32,
    pub last_active_at: Option<DateTime<Utc>>,
    pub xp: u32,
    pub badges: Vec<BadgeId>,
    pub preferred_language: Language,
    pub created_at: DateTime<Utc>,
    /// Write counter managed by the store.
    pub revision: u64,
}

impl UserProgress {
    /// A brand-new free account with no recorded activity.
    pub fn new(display_name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            tier: Tier::Free,
            daily_question_count: 0,
            total_question_count: 0,
            streak_days: 0,
            last_active_at: None,
            xp: 0,
            badges: Vec::new(),
            preferred_language: Language::En,
            created_at,
            revision: 0,
        }
    }

    /// Always derived from `xp`.
    pub fn level(&self) -> u32 {
        self.xp / XP_PER_LEVEL + 1
    }

    pub fn has_badge(&self, badge: BadgeId) -> bool {
        self.badges.contains(&badge)
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question_text: String,
    pub subject: Subject,
    pub language: Language,
    pub steps: Vec<String>,
    pub final_answer: String,
    /// Set when the generation provider failed and the fallback was used.
    pub used_fallback: bool,
    pub created_at: DateTime<Utc>,
}

/// A ranked row of the XP leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: Uuid,
    pub display_name: String,
    pub xp: u32,
    pub level: u32,
    pub streak_days: u32,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
