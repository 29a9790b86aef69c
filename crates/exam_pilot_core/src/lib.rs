pub mod clock;
pub mod domain;
pub mod locks;
pub mod memory;
pub mod parser;
pub mod ports;
pub mod progression;
pub mod quota;
pub mod tutoring;

pub use clock::Clock;
pub use domain::{
    AuthSession, BadgeDefinition, BadgeId, Language, LeaderboardEntry, QuestionRecord, Subject,
    Tier, UserCredentials, UserProgress, BADGE_CATALOG,
};
pub use memory::InMemoryStore;
pub use parser::{parse_explanation, ParsedExplanation};
pub use ports::{
    DatabaseService, ExplanationService, PortError, PortResult, TextExtractionService,
};
pub use tutoring::{
    AnsweredQuestion, ImageOutcome, QuestionRequest, SessionError, SessionResult,
    TutoringService, FALLBACK_EXPLANATION,
};
