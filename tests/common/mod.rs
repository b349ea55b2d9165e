#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use serde_json::json;

use practice_engine::config::EngineConfig;
use practice_engine::db::memory::MemoryPracticeStore;
use practice_engine::db::models::{Difficulty, Question};
use practice_engine::db::SharedStore;
use practice_engine::services::{self, StartSession};
use practice_engine::state::AppState;

pub const CORRECT: &str = "A";
pub const WRONG: &str = "D";

pub fn question(subject_id: &str, topic_id: &str, index: usize, difficulty: Difficulty) -> Question {
    Question {
        id: format!("{subject_id}-{topic_id}-{index:02}"),
        subject_id: subject_id.to_string(),
        chapter_id: format!("{subject_id}-ch1"),
        topic_id: topic_id.to_string(),
        subtopic_id: None,
        difficulty,
        correct_answer: json!(CORRECT),
        option_set: json!(["A", "B", "C", "D"]),
    }
}

/// A store with `per_topic` medium questions in each topic of `subject_id`.
pub fn seeded_store(subject_id: &str, topics: &[&str], per_topic: usize) -> Arc<MemoryPracticeStore> {
    let store = MemoryPracticeStore::new();
    for topic in topics {
        store.insert_questions(
            (0..per_topic).map(|i| question(subject_id, topic, i, Difficulty::Medium)),
        );
    }
    Arc::new(store)
}

pub fn test_app(store: Arc<MemoryPracticeStore>) -> Router {
    let shared: SharedStore = store;
    practice_engine::create_app(AppState::new(shared, EngineConfig::default()))
}

pub async fn start(
    store: &MemoryPracticeStore,
    learner_id: &str,
    subject_id: &str,
    mode: &str,
    xp_goal: i64,
) -> String {
    services::start_session(
        store,
        StartSession {
            learner_id: learner_id.to_string(),
            exam_id: "exam-1".to_string(),
            subject_id: subject_id.to_string(),
            mode: mode.to_string(),
            xp_goal,
        },
    )
    .await
    .expect("session starts")
}
