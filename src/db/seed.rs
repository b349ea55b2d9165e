use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::db::models::{Difficulty, Question};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedQuestion {
    id: String,
    subject_id: String,
    chapter_id: String,
    topic_id: String,
    #[serde(default)]
    subtopic_id: Option<String>,
    difficulty: String,
    correct_answer: serde_json::Value,
    #[serde(default)]
    option_set: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse seed file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("question {id} has unknown difficulty {value:?}")]
    Difficulty { id: String, value: String },
}

/// Reads a JSON array of questions for the in-memory store.
pub fn load_questions(path: &Path) -> Result<Vec<Question>, SeedError> {
    let raw = std::fs::read_to_string(path)?;
    parse_questions(&raw)
}

pub fn parse_questions(raw: &str) -> Result<Vec<Question>, SeedError> {
    let rows: Vec<SeedQuestion> = serde_json::from_str(raw)?;
    rows.into_iter()
        .map(|row| {
            let difficulty =
                Difficulty::parse(&row.difficulty).ok_or_else(|| SeedError::Difficulty {
                    id: row.id.clone(),
                    value: row.difficulty.clone(),
                })?;
            Ok(Question {
                id: row.id,
                subject_id: row.subject_id,
                chapter_id: row.chapter_id,
                topic_id: row.topic_id,
                subtopic_id: row.subtopic_id,
                difficulty,
                correct_answer: row.correct_answer,
                option_set: row
                    .option_set
                    .unwrap_or_else(|| serde_json::Value::Array(Vec::new())),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_questions_with_defaults() {
        let raw = r#"[
            {"id": "q1", "subjectId": "physics", "chapterId": "c1", "topicId": "kinematics",
             "difficulty": "Hard", "correctAnswer": "B", "optionSet": ["A", "B"]},
            {"id": "q2", "subjectId": "physics", "chapterId": "c1", "topicId": "kinematics",
             "difficulty": "conceptual", "correctAnswer": 42}
        ]"#;

        let questions = parse_questions(raw).unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].difficulty, Difficulty::Hard);
        assert!(questions[0].is_multiple_choice());
        assert!(!questions[1].is_multiple_choice());
    }

    #[test]
    fn rejects_unknown_difficulty() {
        let raw = r#"[{"id": "q1", "subjectId": "s", "chapterId": "c", "topicId": "t",
                       "difficulty": "brutal", "correctAnswer": "A"}]"#;
        assert!(matches!(
            parse_questions(raw),
            Err(SeedError::Difficulty { .. })
        ));
    }

    #[test]
    fn loads_bundled_sample() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/questions.sample.json");
        let questions = load_questions(&path).unwrap();
        assert_eq!(questions.len(), 6);
        assert!(questions.iter().all(|q| q.subject_id == "physics"));
    }
}
