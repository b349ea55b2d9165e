use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AbilityParams;
use crate::db::models::{AbilityProfile, Difficulty, Question};
use crate::db::{PracticeStore, StoreError};

const DEFAULT_THETA: f64 = 0.0;
/// Logistic scaling that makes the 3PL curve track the normal ogive.
const SCALING: f64 = 1.7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ItemParams {
    pub discrimination: f64,
    pub difficulty: f64,
    pub guessing: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AbilityUpdate {
    pub theta_before: f64,
    pub theta_after: f64,
    pub probability: f64,
}

impl AbilityUpdate {
    pub fn delta(&self) -> f64 {
        self.theta_after - self.theta_before
    }
}

pub fn difficulty_to_b(difficulty: Difficulty, params: &AbilityParams) -> f64 {
    match difficulty {
        Difficulty::Easy => params.b_easy,
        Difficulty::Medium => params.b_medium,
        Difficulty::Hard => params.b_hard,
        Difficulty::Conceptual => params.b_conceptual,
    }
}

pub fn item_params(question: &Question, params: &AbilityParams) -> ItemParams {
    let guessing = if question.is_multiple_choice() && question.difficulty != Difficulty::Conceptual
    {
        params.multiple_choice_guessing
    } else {
        0.0
    };

    ItemParams {
        discrimination: params.discrimination,
        difficulty: difficulty_to_b(question.difficulty, params),
        guessing,
    }
}

pub fn probability_correct(theta: f64, item: &ItemParams) -> f64 {
    let c = item.guessing.clamp(0.0, 1.0);
    let exponent = -SCALING * item.discrimination * (theta - item.difficulty);
    c + (1.0 - c) / (1.0 + exponent.exp())
}

pub fn next_theta(theta: f64, item: &ItemParams, is_correct: bool, learning_rate: f64) -> f64 {
    let observed = if is_correct { 1.0 } else { 0.0 };
    theta + learning_rate * (observed - probability_correct(theta, item))
}

/// Computes the post-answer theta without writing anything.
pub async fn estimate(
    store: &dyn PracticeStore,
    params: &AbilityParams,
    learner_id: &str,
    question: &Question,
    is_correct: bool,
) -> Result<AbilityUpdate, StoreError> {
    let theta_before = store
        .get_ability(learner_id)
        .await?
        .map_or(DEFAULT_THETA, |profile| profile.theta);

    let item = item_params(question, params);
    let probability = probability_correct(theta_before, &item);
    let theta_after = next_theta(theta_before, &item, is_correct, params.learning_rate);

    Ok(AbilityUpdate {
        theta_before,
        theta_after,
        probability,
    })
}

/// Applies the estimated step on top of whatever theta is stored now, so
/// concurrent answers each keep their step.
pub async fn persist(
    store: &dyn PracticeStore,
    learner_id: &str,
    update: &AbilityUpdate,
    now: DateTime<Utc>,
) -> Result<AbilityProfile, StoreError> {
    store.apply_ability_step(learner_id, update.delta(), now).await
}
