use async_trait::async_trait;
use chrono::{DateTime, Duration as Days, TimeZone, Utc};
use exam_pilot_core::{
    BadgeId, Clock, DatabaseService, ExplanationService, ImageOutcome, InMemoryStore, Language,
    PortError, PortResult, QuestionRecord, QuestionRequest, SessionError, Subject,
    TextExtractionService, TutoringService, UserCredentials, UserProgress,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

//=========================================================================================
// Test doubles
//=========================================================================================

const GOOD_ANSWER: &str = "CONCEPT: Linear equations\nSTEP 1: Subtract 3 from both sides\nSTEP 2: Divide by 2\nFINAL ANSWER: x = 4";

enum Script {
    Answer(&'static str),
    Fail,
    Hang,
}

struct ScriptedExplainer {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedExplainer {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExplanationService for ScriptedExplainer {
    async fn explain(&self, _: Subject, _: &str, _: Language) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        match self.script {
            Script::Answer(text) => Ok(text.to_string()),
            Script::Fail => Err(PortError::Unexpected("provider returned 500".to_string())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(GOOD_ANSWER.to_string())
            }
        }
    }
}

/// Holds back any question containing "wait" until released.
struct GatedExplainer {
    gate: Notify,
}

#[async_trait]
impl ExplanationService for GatedExplainer {
    async fn explain(&self, _: Subject, question: &str, _: Language) -> PortResult<String> {
        if question.contains("wait") {
            self.gate.notified().await;
        }
        Ok(GOOD_ANSWER.to_string())
    }
}

struct FixedExtractor {
    text: &'static str,
    calls: AtomicUsize,
}

impl FixedExtractor {
    fn new(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            text,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TextExtractionService for FixedExtractor {
    async fn extract_text(&self, _: &[u8]) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.to_string())
    }
}

/// Delegates to an in-memory store, with failure injection on `save_answer`.
struct FlakyStore {
    inner: InMemoryStore,
    fail_saves: bool,
    /// Simulates another process writing the user right before the first save.
    interfere_once: AtomicBool,
}

impl FlakyStore {
    fn new(fail_saves: bool, interfere_once: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            fail_saves,
            interfere_once: AtomicBool::new(interfere_once),
        })
    }
}

#[async_trait]
impl DatabaseService for FlakyStore {
    async fn get_user(&self, user_id: Uuid) -> PortResult<Option<UserProgress>> {
        self.inner.get_user(user_id).await
    }

    async fn put_user(&self, user: &UserProgress, expected_revision: u64) -> PortResult<()> {
        self.inner.put_user(user, expected_revision).await
    }

    async fn save_answer(
        &self,
        user: &UserProgress,
        question: &QuestionRecord,
        expected_revision: u64,
    ) -> PortResult<()> {
        if self.fail_saves {
            return Err(PortError::Unexpected("connection reset".to_string()));
        }
        if self.interfere_once.swap(false, Ordering::SeqCst) {
            let mut stored = self.inner.get_user(user.id).await?.expect("user exists");
            let revision = stored.revision;
            stored.xp += 500;
            stored.revision = revision + 1;
            self.inner.put_user(&stored, revision).await?;
        }
        self.inner.save_answer(user, question, expected_revision).await
    }

    async fn list_questions_by_user(&self, user_id: Uuid) -> PortResult<Vec<QuestionRecord>> {
        self.inner.list_questions_by_user(user_id).await
    }

    async fn list_top_users_by_xp(&self, limit: usize) -> PortResult<Vec<UserProgress>> {
        self.inner.list_top_users_by_xp(limit).await
    }

    async fn create_account(
        &self,
        user: &UserProgress,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<()> {
        self.inner.create_account(user, email, hashed_password).await
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.inner.get_user_by_email(email).await
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.inner
            .create_auth_session(session_id, user_id, expires_at)
            .await
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        self.inner.validate_auth_session(session_id).await
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.inner.delete_auth_session(session_id).await
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn on_day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, day, 15, 30, 0).unwrap()
}

fn service_with(
    store: Arc<dyn DatabaseService>,
    explainer: Arc<dyn ExplanationService>,
    extractor: Arc<dyn TextExtractionService>,
) -> TutoringService {
    TutoringService::new(store, explainer, extractor).with_clock(Clock::fixed(on_day(2)))
}

fn question(user_id: Uuid, text: &str) -> QuestionRequest {
    QuestionRequest {
        user_id,
        text: text.to_string(),
        subject: Subject::Math,
        language: None,
    }
}

async fn signed_up(service: &TutoringService, email: &str) -> UserProgress {
    service
        .register(email, "$argon2id$stub", "Student")
        .await
        .unwrap()
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn answered_question_is_parsed_scored_and_persisted() {
    let store = Arc::new(InMemoryStore::new());
    let explainer = ScriptedExplainer::new(Script::Answer(GOOD_ANSWER));
    let service = service_with(store.clone(), explainer.clone(), FixedExtractor::new(""));
    let user = signed_up(&service, "a@example.com").await;

    let answered = service.ask(question(user.id, "2x + 3 = 11")).await.unwrap();

    assert_eq!(
        answered.question.steps,
        vec!["Subtract 3 from both sides", "Divide by 2"]
    );
    assert_eq!(answered.question.final_answer, "x = 4");
    assert!(!answered.question.used_fallback);
    assert_eq!(answered.new_badges, vec![BadgeId::FirstQuestion]);
    assert_eq!(answered.user.daily_question_count, 1);
    assert_eq!(answered.user.total_question_count, 1);
    assert_eq!(answered.user.xp, 10);
    assert_eq!(answered.user.level(), 1);
    assert_eq!(answered.user.streak_days, 1);

    let stored = store.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(stored, answered.user);
    let history = service.history(user.id).await.unwrap();
    assert_eq!(history, vec![answered.question]);
    assert_eq!(explainer.calls(), 1);
}

#[tokio::test]
async fn free_user_over_quota_is_rejected_before_generation() {
    let store = Arc::new(InMemoryStore::new());
    let explainer = ScriptedExplainer::new(Script::Answer(GOOD_ANSWER));
    let service = service_with(store.clone(), explainer.clone(), FixedExtractor::new(""));
    let user = signed_up(&service, "b@example.com").await;

    for n in 0..5 {
        service
            .ask(question(user.id, &format!("question {n}")))
            .await
            .unwrap();
    }
    let err = service.ask(question(user.id, "one too many")).await.unwrap_err();

    assert!(matches!(err, SessionError::QuotaExceeded));
    assert_eq!(explainer.calls(), 5);
    let stored = store.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(stored.daily_question_count, 5);
    assert_eq!(stored.total_question_count, 5);
}

#[tokio::test]
async fn reset_and_upgrade_lift_the_quota() {
    let store = Arc::new(InMemoryStore::new());
    let service = service_with(
        store.clone(),
        ScriptedExplainer::new(Script::Answer(GOOD_ANSWER)),
        FixedExtractor::new(""),
    );
    let user = signed_up(&service, "c@example.com").await;
    for _ in 0..5 {
        service.ask(question(user.id, "q")).await.unwrap();
    }

    let reset = service.reset_daily(user.id).await.unwrap();
    assert_eq!(reset.daily_question_count, 0);
    assert_eq!(reset.total_question_count, 5);
    let again = service.reset_daily(user.id).await.unwrap();
    assert_eq!(again.daily_question_count, 0);

    for _ in 0..5 {
        service.ask(question(user.id, "q")).await.unwrap();
    }
    assert!(service.ask(question(user.id, "q")).await.is_err());

    let (upgraded, badges) = service.upgrade(user.id).await.unwrap();
    assert_eq!(badges, vec![BadgeId::Premium]);
    assert_eq!(upgraded.daily_question_count, 5);
    assert!(upgraded.has_badge(BadgeId::Questions10));
    let (_, badges) = service.upgrade(user.id).await.unwrap();
    assert!(badges.is_empty());

    let answered = service.ask(question(user.id, "q")).await.unwrap();
    assert_eq!(answered.user.daily_question_count, 6);
    assert_eq!(answered.user.total_question_count, 11);
    assert!(answered.new_badges.is_empty());
}

#[tokio::test]
async fn provider_failure_falls_back_and_still_counts() {
    let store = Arc::new(InMemoryStore::new());
    let service = service_with(
        store.clone(),
        ScriptedExplainer::new(Script::Fail),
        FixedExtractor::new(""),
    );
    let user = signed_up(&service, "d@example.com").await;

    let answered = service.ask(question(user.id, "What is 7 x 8?")).await.unwrap();

    assert!(answered.question.used_fallback);
    assert_eq!(answered.question.steps.len(), 4);
    assert!(!answered.question.final_answer.is_empty());
    assert_eq!(answered.user.daily_question_count, 1);
    assert_eq!(answered.user.total_question_count, 1);
    assert_eq!(answered.user.xp, 10);
}

#[tokio::test]
async fn slow_provider_is_cut_off_by_the_timeout() {
    let store = Arc::new(InMemoryStore::new());
    let service = service_with(
        store,
        ScriptedExplainer::new(Script::Hang),
        FixedExtractor::new(""),
    )
    .with_external_timeout(Duration::from_millis(20));
    let user = signed_up(&service, "e@example.com").await;

    let answered = tokio::time::timeout(
        Duration::from_secs(5),
        service.ask(question(user.id, "slow")),
    )
    .await
    .expect("timeout bounds the provider call")
    .unwrap();
    assert!(answered.question.used_fallback);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_asks_for_one_user_lose_no_updates() {
    let store = Arc::new(InMemoryStore::new());
    let service = Arc::new(service_with(
        store.clone(),
        ScriptedExplainer::new(Script::Answer(GOOD_ANSWER)),
        FixedExtractor::new(""),
    ));
    let user_id = signed_up(&service, "f@example.com").await.id;
    service.upgrade(user_id).await.unwrap();

    const N: u32 = 25;
    let tasks = (0..N).map(|n| {
        let service = service.clone();
        tokio::spawn(async move { service.ask(question(user_id, &format!("q{n}"))).await })
    });
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let stored = store.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(stored.total_question_count, N);
    assert_eq!(stored.daily_question_count, N);
    assert_eq!(stored.xp, 10 * N);
    assert_eq!(service.history(user_id).await.unwrap().len(), N as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_free_asks_respect_the_quota_exactly() {
    let store = Arc::new(InMemoryStore::new());
    let service = Arc::new(service_with(
        store.clone(),
        ScriptedExplainer::new(Script::Answer(GOOD_ANSWER)),
        FixedExtractor::new(""),
    ));
    let user_id = signed_up(&service, "g@example.com").await.id;

    let tasks = (0..12).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.ask(question(user_id, "q")).await })
    });
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 5);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, SessionError::QuotaExceeded)));
}

#[tokio::test]
async fn other_users_are_not_blocked_by_a_slow_request() {
    let store = Arc::new(InMemoryStore::new());
    let explainer = Arc::new(GatedExplainer {
        gate: Notify::new(),
    });
    let service = Arc::new(service_with(
        store,
        explainer.clone(),
        FixedExtractor::new(""),
    ));
    let slow_user = signed_up(&service, "slow@example.com").await.id;
    let fast_user = signed_up(&service, "fast@example.com").await;

    let slow = {
        let service = service.clone();
        tokio::spawn(async move { service.ask(question(slow_user, "please wait")).await })
    };
    tokio::task::yield_now().await;

    let fast = tokio::time::timeout(
        Duration::from_secs(2),
        service.ask(question(fast_user.id, "quick one")),
    )
    .await;
    assert!(fast.expect("not blocked by the other user").is_ok());

    explainer.gate.notify_one();
    assert!(slow.await.unwrap().is_ok());
}

#[tokio::test]
async fn image_without_text_changes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let explainer = ScriptedExplainer::new(Script::Answer(GOOD_ANSWER));
    let service = service_with(store.clone(), explainer.clone(), FixedExtractor::new(" \n\t "));
    let user = signed_up(&service, "h@example.com").await;

    let outcome = service
        .ask_from_image(user.id, b"\x89PNG", Subject::Physics, None)
        .await
        .unwrap();

    assert!(matches!(outcome, ImageOutcome::NoTextFound));
    assert_eq!(explainer.calls(), 0);
    assert_eq!(store.get_user(user.id).await.unwrap().unwrap(), user);
    assert!(service.history(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn image_with_text_is_answered_like_a_typed_question() {
    let store = Arc::new(InMemoryStore::new());
    let service = service_with(
        store,
        ScriptedExplainer::new(Script::Answer(GOOD_ANSWER)),
        FixedExtractor::new("  Solve 2x + 3 = 11\n"),
    );
    let user = signed_up(&service, "i@example.com").await;

    let outcome = service
        .ask_from_image(user.id, b"\x89PNG", Subject::Math, Some(Language::Ar))
        .await
        .unwrap();

    let ImageOutcome::Answered(answered) = outcome else {
        panic!("expected an answer");
    };
    assert_eq!(answered.question.question_text, "Solve 2x + 3 = 11");
    assert_eq!(answered.question.language, Language::Ar);
    assert_eq!(answered.user.total_question_count, 1);
}

#[tokio::test]
async fn image_over_quota_is_rejected_before_ocr() {
    let store = Arc::new(InMemoryStore::new());
    let extractor = FixedExtractor::new("2 + 2");
    let service = service_with(
        store,
        ScriptedExplainer::new(Script::Answer(GOOD_ANSWER)),
        extractor.clone(),
    );
    let user = signed_up(&service, "j@example.com").await;
    for _ in 0..5 {
        service.ask(question(user.id, "q")).await.unwrap();
    }

    let err = service
        .ask_from_image(user.id, b"img", Subject::Math, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::QuotaExceeded));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn store_failure_fails_the_request_and_writes_nothing() {
    let store = FlakyStore::new(true, false);
    let service = service_with(
        store.clone(),
        ScriptedExplainer::new(Script::Answer(GOOD_ANSWER)),
        FixedExtractor::new(""),
    );
    let user = signed_up(&service, "k@example.com").await;

    let err = service.ask(question(user.id, "q")).await.unwrap_err();

    assert!(matches!(err, SessionError::StoreUnavailable(_)));
    assert_eq!(store.get_user(user.id).await.unwrap().unwrap(), user);
    assert!(store.list_questions_by_user(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_writer_conflict_is_reapplied_on_fresh_state() {
    let store = FlakyStore::new(false, true);
    let explainer = ScriptedExplainer::new(Script::Answer(GOOD_ANSWER));
    let service = service_with(store.clone(), explainer.clone(), FixedExtractor::new(""));
    let user = signed_up(&service, "l@example.com").await;

    let answered = service.ask(question(user.id, "q")).await.unwrap();

    assert_eq!(answered.user.xp, 510);
    assert_eq!(answered.user.total_question_count, 1);
    assert_eq!(explainer.calls(), 1);
    assert_eq!(store.get_user(user.id).await.unwrap().unwrap(), answered.user);
    assert_eq!(store.list_questions_by_user(user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn streak_follows_calendar_days() {
    let store = Arc::new(InMemoryStore::new());
    let explainer = ScriptedExplainer::new(Script::Answer(GOOD_ANSWER));
    let on = |day: u32| {
        TutoringService::new(store.clone(), explainer.clone(), FixedExtractor::new(""))
            .with_clock(Clock::fixed(on_day(day)))
    };
    let user = signed_up(&on(1), "m@example.com").await;
    assert_eq!(user.streak_days, 0);

    let day1 = on(1).ask(question(user.id, "q")).await.unwrap();
    assert_eq!(day1.user.streak_days, 1);
    let day2 = on(2).ask(question(user.id, "q")).await.unwrap();
    assert_eq!(day2.user.streak_days, 2);
    let day2_again = on(2).ask(question(user.id, "q")).await.unwrap();
    assert_eq!(day2_again.user.streak_days, 2);
    let day3 = on(3).check_in(user.id).await.unwrap();
    assert_eq!(day3.streak_days, 3);
    let day4 = on(4).ask(question(user.id, "q")).await.unwrap();
    assert_eq!(day4.user.streak_days, 4);
    assert_eq!(day4.new_badges, vec![BadgeId::Streak3]);

    let day7 = on(7).ask(question(user.id, "q")).await.unwrap();
    assert_eq!(day7.user.streak_days, 1);
    assert!(day7.user.has_badge(BadgeId::Streak3));
    assert_eq!(day7.user.last_active_at, Some(on_day(7)));
    assert!(day7.user.last_active_at.unwrap() - on_day(1) > Days::days(5));
}

#[tokio::test]
async fn leaderboard_ranks_by_xp() {
    let store = Arc::new(InMemoryStore::new());
    let service = service_with(
        store,
        ScriptedExplainer::new(Script::Answer(GOOD_ANSWER)),
        FixedExtractor::new(""),
    );
    let low = signed_up(&service, "low@example.com").await;
    let high = signed_up(&service, "high@example.com").await;
    service.ask(question(low.id, "q")).await.unwrap();
    for _ in 0..3 {
        service.ask(question(high.id, "q")).await.unwrap();
    }

    let board = service.leaderboard(10).await.unwrap();
    let ranked: Vec<(u32, Uuid, u32)> = board.iter().map(|e| (e.rank, e.user_id, e.xp)).collect();
    assert_eq!(ranked, vec![(1, high.id, 30), (2, low.id, 10)]);

    assert_eq!(service.leaderboard(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn registration_and_lookup_errors() {
    let service = service_with(
        Arc::new(InMemoryStore::new()),
        ScriptedExplainer::new(Script::Answer(GOOD_ANSWER)),
        FixedExtractor::new(""),
    );
    signed_up(&service, "dup@example.com").await;

    let err = service
        .register("dup@example.com", "hash", "Other")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::EmailTaken));

    let missing = Uuid::new_v4();
    assert!(matches!(
        service.ask(question(missing, "q")).await,
        Err(SessionError::UserNotFound(id)) if id == missing
    ));
    assert!(matches!(
        service.upgrade(missing).await,
        Err(SessionError::UserNotFound(_))
    ));
}
