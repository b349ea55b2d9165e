pub mod config;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod postgres;
pub mod seed;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::config::{DbConfig, DbConfigError, StoreBackend};
use crate::db::memory::MemoryPracticeStore;
use crate::db::models::{
    AbilityProfile, Attempt, Delivery, PracticeSession, Question, QuestionFilter, ReviewItem,
    ReviewStatus, TopicMastery,
};
use crate::db::postgres::PgPracticeStore;

/// Range query over the spaced-repetition queue.
///
/// Returns pending items with `after < scheduled_for <= until`, ordered by
/// `scheduled_for` ascending then `priority_score` descending.
#[derive(Debug, Clone)]
pub struct ReviewQuery {
    pub learner_id: String,
    pub subject_id: String,
    pub after: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
    pub limit: i64,
}

/// Typed gateway to the relational store.
///
/// Each call is individually atomic. The only cross-row guarantees the engine
/// relies on are the conditional updates (`complete_session`,
/// `mark_bonus_started`, `save_topic_mastery`, `set_review_status`,
/// `release_shown_reviews`), the in-place increment of `apply_ability_step`
/// and the uniqueness of `(session_id, question_id)` on attempts, which must
/// surface as [`StoreError::Conflict`].
#[async_trait]
pub trait PracticeStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn insert_session(&self, session: &PracticeSession) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<PracticeSession>, StoreError>;

    /// Flips `in_progress` to `completed` only when id, owner and status all match.
    async fn complete_session(
        &self,
        session_id: &str,
        learner_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Sets `bonus_started_at` only if it is still unset.
    async fn mark_bonus_started(
        &self,
        session_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn insert_delivery(&self, delivery: &Delivery) -> Result<(), StoreError>;

    async fn get_delivery(&self, delivery_id: &str) -> Result<Option<Delivery>, StoreError>;

    /// All deliveries of a session, oldest first.
    async fn session_deliveries(&self, session_id: &str) -> Result<Vec<Delivery>, StoreError>;

    async fn get_question(&self, question_id: &str) -> Result<Option<Question>, StoreError>;

    async fn questions_by_ids(&self, question_ids: &[String]) -> Result<Vec<Question>, StoreError>;

    async fn find_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>, StoreError>;

    async fn get_attempt(
        &self,
        session_id: &str,
        question_id: &str,
    ) -> Result<Option<Attempt>, StoreError>;

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<(), StoreError>;

    async fn session_attempts(&self, session_id: &str) -> Result<Vec<Attempt>, StoreError>;

    async fn get_ability(&self, learner_id: &str) -> Result<Option<AbilityProfile>, StoreError>;

    /// Adds `delta` to the stored theta and counts one more attempt, creating
    /// the profile at theta 0 first if needed.
    async fn apply_ability_step(
        &self,
        learner_id: &str,
        delta: f64,
        at: DateTime<Utc>,
    ) -> Result<AbilityProfile, StoreError>;

    async fn get_topic_mastery(
        &self,
        learner_id: &str,
        topic_id: &str,
    ) -> Result<Option<TopicMastery>, StoreError>;

    async fn learner_masteries(
        &self,
        learner_id: &str,
        subject_id: &str,
    ) -> Result<Vec<TopicMastery>, StoreError>;

    /// Writes the row only if its `last_practiced` still equals `expected`
    /// (`None` also matches a missing row). Returns whether it was written.
    async fn save_topic_mastery(
        &self,
        mastery: &TopicMastery,
        expected: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    async fn due_reviews(&self, query: &ReviewQuery) -> Result<Vec<ReviewItem>, StoreError>;

    async fn upsert_review(&self, item: &ReviewItem) -> Result<(), StoreError>;

    /// Moves a queue item from `from` to `to`; returns whether a row changed.
    async fn set_review_status(
        &self,
        learner_id: &str,
        question_id: &str,
        from: ReviewStatus,
        to: ReviewStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Moves every `shown` item of a learner's subject back to `pending`.
    async fn release_shown_reviews(
        &self,
        learner_id: &str,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

pub type SharedStore = Arc<dyn PracticeStore>;

/// Builds the configured gateway. PostgreSQL when `DATABASE_URL` is set,
/// otherwise the in-process store.
pub async fn connect_from_env() -> Result<SharedStore, DbInitError> {
    let config = DbConfig::from_env()?;

    match config.backend {
        StoreBackend::Postgres => {
            let store = PgPracticeStore::connect(&config).await?;
            if config.run_migrations {
                migrate::run_migrations(store.pool()).await?;
            }
            tracing::info!(backend = "postgres", "practice store ready");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory practice store, data is lost on restart");
            let store = MemoryPracticeStore::new();
            if let Some(path) = config.seed_path.as_deref() {
                store.insert_questions(seed::load_questions(path)?);
                tracing::info!(
                    count = store.question_count(),
                    path = %path.display(),
                    "seeded questions"
                );
            }
            Ok(Arc::new(store))
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Config(#[from] DbConfigError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] migrate::MigrationError),
    #[error(transparent)]
    Seed(#[from] seed::SeedError),
}
