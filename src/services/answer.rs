use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{EngineConfig, ScoringParams};
use crate::db::models::Attempt;
use crate::db::PracticeStore;
use crate::services::error::{require_id, EngineError, EngineResult};
use crate::services::session::{ensure_in_progress, load_owned_session};
use crate::services::{ability, mastery};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswer {
    pub learner_id: String,
    pub session_id: String,
    pub delivery_id: String,
    pub answer: Option<Value>,
    pub time_taken_seconds: Option<f64>,
    pub confidence_level: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub xp_awarded: i64,
    pub theta: f64,
    pub mastery_level: f64,
    pub next_review_date: DateTime<Utc>,
}

pub fn is_correct(answer: &Value, correct_answer: &Value) -> bool {
    answer == correct_answer
}

pub fn award_xp(is_correct: bool, scoring: &ScoringParams) -> i64 {
    if is_correct {
        scoring.xp_correct
    } else {
        scoring.xp_incorrect
    }
}

struct ValidAnswer {
    answer: Value,
    time_taken_seconds: f64,
}

fn validate(input: &SubmitAnswer) -> EngineResult<ValidAnswer> {
    require_id("learnerId", &input.learner_id)?;
    require_id("sessionId", &input.session_id)?;
    require_id("deliveryId", &input.delivery_id)?;

    let answer = match &input.answer {
        Some(value) if !value.is_null() => value.clone(),
        _ => {
            return Err(EngineError::InvalidArgument(
                "answer is required".to_string(),
            ))
        }
    };

    let time_taken_seconds = match input.time_taken_seconds {
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 => seconds,
        _ => {
            return Err(EngineError::InvalidArgument(
                "timeTakenSeconds must be a non-negative number".to_string(),
            ))
        }
    };

    if let Some(level) = input.confidence_level {
        if !(1..=5).contains(&level) {
            return Err(EngineError::InvalidArgument(
                "confidenceLevel must be between 1 and 5".to_string(),
            ));
        }
    }

    Ok(ValidAnswer {
        answer,
        time_taken_seconds,
    })
}

/// Grades an answer to a delivered question and folds it into the learner's
/// ability and topic mastery.
///
/// The attempt insert is the commit point: once it succeeds the answer is
/// final, and a second submission for the same question in the session is a
/// `Conflict`.
pub async fn submit_answer(
    store: &dyn PracticeStore,
    config: &EngineConfig,
    input: SubmitAnswer,
) -> EngineResult<AnswerOutcome> {
    let valid = validate(&input)?;
    let learner_id = input.learner_id.as_str();

    let delivery = store
        .get_delivery(&input.delivery_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("delivery {}", input.delivery_id)))?;

    if delivery.session_id != input.session_id {
        return Err(EngineError::Forbidden(format!(
            "delivery {} does not belong to session {}",
            delivery.delivery_id, input.session_id
        )));
    }

    let session = load_owned_session(store, learner_id, &input.session_id).await?;
    ensure_in_progress(&session)?;

    if store
        .get_attempt(&session.id, &delivery.question_id)
        .await?
        .is_some()
    {
        return Err(EngineError::Conflict(format!(
            "question {} was already answered in session {}",
            delivery.question_id, session.id
        )));
    }

    let question = store
        .get_question(&delivery.question_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("question {}", delivery.question_id)))?;

    let correct = is_correct(&valid.answer, &question.correct_answer);
    let xp_awarded = award_xp(correct, &config.scoring);
    let estimate =
        ability::estimate(store, &config.ability, learner_id, &question, correct).await?;

    let now = Utc::now();
    let attempt = Attempt {
        id: uuid::Uuid::new_v4().to_string(),
        learner_id: learner_id.to_string(),
        question_id: question.id.clone(),
        session_id: session.id.clone(),
        answer: valid.answer,
        is_correct: correct,
        time_taken_seconds: valid.time_taken_seconds,
        confidence_level: input.confidence_level,
        theta_before: estimate.theta_before,
        theta_after: estimate.theta_after,
        xp_awarded,
        completed_at: now,
    };
    store.insert_attempt(&attempt).await?;

    let profile = ability::persist(store, learner_id, &estimate, now).await?;
    let outcome = mastery::record_attempt(
        store,
        &config.mastery,
        learner_id,
        &question,
        correct,
        input.confidence_level,
        now,
    )
    .await?;

    tracing::info!(
        session_id = %session.id,
        learner_id,
        question_id = %question.id,
        is_correct = correct,
        xp_awarded,
        theta_before = estimate.theta_before,
        theta_after = estimate.theta_after,
        theta = profile.theta,
        mastery_level = outcome.mastery.mastery_level,
        "answer recorded"
    );

    Ok(AnswerOutcome {
        is_correct: correct,
        xp_awarded,
        theta: profile.theta,
        mastery_level: outcome.mastery.mastery_level,
        next_review_date: outcome.review.scheduled_for,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input() -> SubmitAnswer {
        SubmitAnswer {
            learner_id: "learner".to_string(),
            session_id: "session".to_string(),
            delivery_id: "delivery".to_string(),
            answer: Some(json!("B")),
            time_taken_seconds: Some(12.5),
            confidence_level: Some(3),
        }
    }

    #[test]
    fn test_equality_is_structural() {
        assert!(is_correct(&json!("B"), &json!("B")));
        assert!(!is_correct(&json!("b"), &json!("B")));
        assert!(is_correct(&json!(["A", "C"]), &json!(["A", "C"])));
        assert!(!is_correct(&json!(["C", "A"]), &json!(["A", "C"])));
        assert!(is_correct(&json!({"x": 1, "y": 2}), &json!({"y": 2, "x": 1})));
    }

    #[test]
    fn test_xp_by_correctness() {
        let scoring = ScoringParams::default();
        assert_eq!(award_xp(true, &scoring), 10);
        assert_eq!(award_xp(false, &scoring), 0);
    }

    #[test]
    fn test_validation() {
        assert!(validate(&input()).is_ok());

        let mut missing_answer = input();
        missing_answer.answer = Some(Value::Null);
        assert!(matches!(
            validate(&missing_answer),
            Err(EngineError::InvalidArgument(_))
        ));

        let mut negative_time = input();
        negative_time.time_taken_seconds = Some(-1.0);
        assert!(validate(&negative_time).is_err());

        let mut nan_time = input();
        nan_time.time_taken_seconds = Some(f64::NAN);
        assert!(validate(&nan_time).is_err());

        let mut bad_confidence = input();
        bad_confidence.confidence_level = Some(6);
        assert!(validate(&bad_confidence).is_err());

        let mut blank_delivery = input();
        blank_delivery.delivery_id = "  ".to_string();
        assert!(validate(&blank_delivery).is_err());
    }
}
