//! In-process gateway used by tests and local runs without PostgreSQL.
//!
//! Every operation takes the single table lock once, so check-then-write
//! sequences (attempt uniqueness, conditional status updates) are atomic the
//! same way the SQL constraints make them atomic on the real store.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::db::models::{
    AbilityProfile, Attempt, Delivery, PracticeSession, Question, QuestionFilter, ReviewItem,
    ReviewStatus, SessionStatus, TopicMastery,
};
use crate::db::{PracticeStore, ReviewQuery, StoreError};

#[derive(Default)]
struct Tables {
    questions: BTreeMap<String, Question>,
    sessions: HashMap<String, PracticeSession>,
    deliveries: HashMap<String, Delivery>,
    delivery_order: Vec<String>,
    attempts: Vec<Attempt>,
    abilities: HashMap<String, AbilityProfile>,
    masteries: HashMap<(String, String), TopicMastery>,
    reviews: HashMap<(String, String), ReviewItem>,
}

#[derive(Default)]
pub struct MemoryPracticeStore {
    tables: Mutex<Tables>,
}

impl MemoryPracticeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_question(&self, question: Question) {
        self.tables.lock().questions.insert(question.id.clone(), question);
    }

    pub fn insert_questions(&self, questions: impl IntoIterator<Item = Question>) {
        let mut tables = self.tables.lock();
        for question in questions {
            tables.questions.insert(question.id.clone(), question);
        }
    }

    pub fn question_count(&self) -> usize {
        self.tables.lock().questions.len()
    }

    /// Current queue row for a question, for inspection in tests.
    pub fn review(&self, learner_id: &str, question_id: &str) -> Option<ReviewItem> {
        self.tables
            .lock()
            .reviews
            .get(&(learner_id.to_string(), question_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl PracticeStore for MemoryPracticeStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_session(&self, session: &PracticeSession) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if tables.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict("practice_sessions.id".to_string()));
        }
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<PracticeSession>, StoreError> {
        Ok(self.tables.lock().sessions.get(session_id).cloned())
    }

    async fn complete_session(
        &self,
        session_id: &str,
        learner_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables.sessions.get_mut(session_id) {
            Some(session)
                if session.learner_id == learner_id
                    && session.status == SessionStatus::InProgress =>
            {
                session.status = SessionStatus::Completed;
                session.end_time = Some(ended_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_bonus_started(
        &self,
        session_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables.sessions.get_mut(session_id) {
            Some(session) if session.bonus_started_at.is_none() => {
                session.bonus_started_at = Some(started_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_delivery(&self, delivery: &Delivery) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if tables.deliveries.contains_key(&delivery.delivery_id) {
            return Err(StoreError::Conflict("deliveries.delivery_id".to_string()));
        }
        tables.delivery_order.push(delivery.delivery_id.clone());
        tables
            .deliveries
            .insert(delivery.delivery_id.clone(), delivery.clone());
        Ok(())
    }

    async fn get_delivery(&self, delivery_id: &str) -> Result<Option<Delivery>, StoreError> {
        Ok(self.tables.lock().deliveries.get(delivery_id).cloned())
    }

    async fn session_deliveries(&self, session_id: &str) -> Result<Vec<Delivery>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .delivery_order
            .iter()
            .filter_map(|id| tables.deliveries.get(id))
            .filter(|delivery| delivery.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn get_question(&self, question_id: &str) -> Result<Option<Question>, StoreError> {
        Ok(self.tables.lock().questions.get(question_id).cloned())
    }

    async fn questions_by_ids(&self, question_ids: &[String]) -> Result<Vec<Question>, StoreError> {
        let tables = self.tables.lock();
        Ok(question_ids
            .iter()
            .filter_map(|id| tables.questions.get(id))
            .cloned()
            .collect())
    }

    async fn find_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>, StoreError> {
        if filter.limit <= 0 {
            return Ok(Vec::new());
        }

        let tables = self.tables.lock();
        let seen: HashSet<&str> = match &filter.unseen_by {
            Some(learner_id) => tables
                .attempts
                .iter()
                .filter(|attempt| &attempt.learner_id == learner_id)
                .map(|attempt| attempt.question_id.as_str())
                .collect(),
            None => HashSet::new(),
        };
        let excluded: HashSet<&str> = filter.exclude_ids.iter().map(String::as_str).collect();

        Ok(tables
            .questions
            .values()
            .filter(|q| q.subject_id == filter.subject_id)
            .filter(|q| {
                filter
                    .topic_ids
                    .as_ref()
                    .map_or(true, |topics| topics.contains(&q.topic_id))
            })
            .filter(|q| {
                filter
                    .difficulties
                    .as_ref()
                    .map_or(true, |levels| levels.contains(&q.difficulty))
            })
            .filter(|q| !seen.contains(q.id.as_str()))
            .filter(|q| !excluded.contains(q.id.as_str()))
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_attempt(
        &self,
        session_id: &str,
        question_id: &str,
    ) -> Result<Option<Attempt>, StoreError> {
        Ok(self
            .tables
            .lock()
            .attempts
            .iter()
            .find(|a| a.session_id == session_id && a.question_id == question_id)
            .cloned())
    }

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let duplicate = tables.attempts.iter().any(|existing| {
            existing.session_id == attempt.session_id && existing.question_id == attempt.question_id
        });
        if duplicate {
            return Err(StoreError::Conflict(
                "attempts(session_id, question_id)".to_string(),
            ));
        }
        tables.attempts.push(attempt.clone());
        Ok(())
    }

    async fn session_attempts(&self, session_id: &str) -> Result<Vec<Attempt>, StoreError> {
        Ok(self
            .tables
            .lock()
            .attempts
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn get_ability(&self, learner_id: &str) -> Result<Option<AbilityProfile>, StoreError> {
        Ok(self.tables.lock().abilities.get(learner_id).cloned())
    }

    async fn apply_ability_step(
        &self,
        learner_id: &str,
        delta: f64,
        at: DateTime<Utc>,
    ) -> Result<AbilityProfile, StoreError> {
        let mut tables = self.tables.lock();
        let profile = tables
            .abilities
            .entry(learner_id.to_string())
            .or_insert_with(|| AbilityProfile {
                learner_id: learner_id.to_string(),
                theta: 0.0,
                attempts_count: 0,
                updated_at: at,
            });
        profile.theta += delta;
        profile.attempts_count += 1;
        profile.updated_at = at;
        Ok(profile.clone())
    }

    async fn get_topic_mastery(
        &self,
        learner_id: &str,
        topic_id: &str,
    ) -> Result<Option<TopicMastery>, StoreError> {
        Ok(self
            .tables
            .lock()
            .masteries
            .get(&(learner_id.to_string(), topic_id.to_string()))
            .cloned())
    }

    async fn learner_masteries(
        &self,
        learner_id: &str,
        subject_id: &str,
    ) -> Result<Vec<TopicMastery>, StoreError> {
        let tables = self.tables.lock();
        let mut rows: Vec<TopicMastery> = tables
            .masteries
            .values()
            .filter(|m| m.learner_id == learner_id && m.subject_id == subject_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.mastery_level.total_cmp(&b.mastery_level));
        Ok(rows)
    }

    async fn save_topic_mastery(
        &self,
        mastery: &TopicMastery,
        expected: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let key = (mastery.learner_id.clone(), mastery.topic_id.clone());
        let current = tables.masteries.get(&key).and_then(|row| row.last_practiced);
        if current != expected {
            return Ok(false);
        }
        tables.masteries.insert(key, mastery.clone());
        Ok(true)
    }

    async fn due_reviews(&self, query: &ReviewQuery) -> Result<Vec<ReviewItem>, StoreError> {
        if query.limit <= 0 {
            return Ok(Vec::new());
        }

        let tables = self.tables.lock();
        let mut rows: Vec<ReviewItem> = tables
            .reviews
            .values()
            .filter(|item| {
                item.learner_id == query.learner_id
                    && item.subject_id == query.subject_id
                    && item.status == ReviewStatus::Pending
                    && item.scheduled_for <= query.until
                    && query.after.map_or(true, |after| item.scheduled_for > after)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.scheduled_for
                .cmp(&b.scheduled_for)
                .then_with(|| b.priority_score.total_cmp(&a.priority_score))
        });
        rows.truncate(query.limit as usize);
        Ok(rows)
    }

    async fn upsert_review(&self, item: &ReviewItem) -> Result<(), StoreError> {
        self.tables.lock().reviews.insert(
            (item.learner_id.clone(), item.question_id.clone()),
            item.clone(),
        );
        Ok(())
    }

    async fn set_review_status(
        &self,
        learner_id: &str,
        question_id: &str,
        from: ReviewStatus,
        to: ReviewStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables
            .reviews
            .get_mut(&(learner_id.to_string(), question_id.to_string()))
        {
            Some(item) if item.status == from => {
                item.status = to;
                item.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_shown_reviews(
        &self,
        learner_id: &str,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut released = 0;
        for item in self.tables.lock().reviews.values_mut() {
            if item.learner_id == learner_id
                && item.subject_id == subject_id
                && item.status == ReviewStatus::Shown
            {
                item.status = ReviewStatus::Pending;
                item.updated_at = at;
                released += 1;
            }
        }
        Ok(released)
    }
}
