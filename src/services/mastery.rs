//! Per-topic mastery and spaced-repetition scheduling.
//!
//! This module is the only writer of `topic_mastery` and
//! `spaced_repetition_queue` rows. Mastery is an exponential moving average
//! bounded to `[0, 1]`; review timing follows SM-2 with the answer's
//! correctness (and optional confidence) mapped onto SM-2 quality grades.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::MasteryParams;
use crate::db::models::{Question, ReviewItem, ReviewStatus, TopicMastery};
use crate::db::{PracticeStore, StoreError};
use crate::services::error::{EngineError, EngineResult};

const DAY_SECONDS: f64 = 86_400.0;
/// Rereads of the topic row before a concurrent writer wins for good.
const SAVE_RETRIES: usize = 5;

pub const REASON_INCORRECT: &str = "incorrect_answer";
pub const REASON_SCHEDULED: &str = "scheduled_review";
pub const REASON_MASTERED: &str = "mastered";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryOutcome {
    pub mastery: TopicMastery,
    pub review: ReviewItem,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    pub repetition_count: i32,
    pub interval_days: f64,
    pub ease_factor: f64,
    pub next_review_date: DateTime<Utc>,
}

/// SM-2 quality grade (0..=5) for an answer.
pub fn sm2_quality(is_correct: bool, confidence_level: Option<i32>) -> u8 {
    if !is_correct {
        return 1;
    }
    match confidence_level {
        Some(level) if level >= 4 => 5,
        Some(level) if level <= 2 => 3,
        _ => 4,
    }
}

pub fn next_ease(ease: f64, quality: u8, min_ease: f64) -> f64 {
    let q = f64::from(quality.min(5));
    let updated = ease + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02));
    updated.max(min_ease)
}

pub fn schedule(
    previous: &TopicMastery,
    quality: u8,
    now: DateTime<Utc>,
    params: &MasteryParams,
) -> EngineResult<Schedule> {
    let ease_factor = next_ease(previous.ease_factor, quality, params.min_ease);

    if quality < 3 {
        return Ok(Schedule {
            repetition_count: 0,
            interval_days: 0.0,
            ease_factor,
            next_review_date: after_seconds(now, params.relearn_delay_minutes.saturating_mul(60))?,
        });
    }

    let repetition_count = previous.repetition_count.saturating_add(1);
    let interval_days = match repetition_count {
        1 => 1.0,
        2 => 6.0,
        _ => (previous.interval_days.max(1.0) * ease_factor).round(),
    }
    .min(params.max_interval_days.max(1.0));

    Ok(Schedule {
        repetition_count,
        interval_days,
        ease_factor,
        next_review_date: after_seconds(now, (interval_days * DAY_SECONDS) as i64)?,
    })
}

fn after_seconds(now: DateTime<Utc>, seconds: i64) -> EngineResult<DateTime<Utc>> {
    Duration::try_seconds(seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            EngineError::Internal(format!("review date {seconds}s after {now} is out of range"))
        })
}

pub fn next_mastery(current: f64, is_correct: bool, alpha: f64) -> f64 {
    let target = if is_correct { 1.0 } else { 0.0 };
    let current = if current.is_finite() { current.clamp(0.0, 1.0) } else { 0.0 };
    (current + alpha.clamp(0.0, 1.0) * (target - current)).clamp(0.0, 1.0)
}

pub fn priority_score(mastery_level: f64, priority_boost: f64) -> f64 {
    (1.0 - mastery_level.clamp(0.0, 1.0)) + priority_boost
}

/// Stored priority plus a bonus for how long the item has been overdue.
pub fn effective_priority(item: &ReviewItem, now: DateTime<Utc>, params: &MasteryParams) -> f64 {
    let overdue_days = (now - item.scheduled_for).num_seconds().max(0) as f64 / DAY_SECONDS;
    item.priority_score + overdue_days * params.overdue_weight
}

fn fresh_mastery(learner_id: &str, question: &Question, params: &MasteryParams) -> TopicMastery {
    TopicMastery {
        learner_id: learner_id.to_string(),
        topic_id: question.topic_id.clone(),
        subject_id: question.subject_id.clone(),
        mastery_level: 0.0,
        ease_factor: params.initial_ease,
        repetition_count: 0,
        interval_days: 0.0,
        last_practiced: None,
        next_review_date: None,
    }
}

/// Folds one answer into the topic's mastery and reschedules the question.
///
/// The topic row is written only if nobody saved it since it was read;
/// otherwise the row is reread and the answer folded in again.
pub async fn record_attempt(
    store: &dyn PracticeStore,
    params: &MasteryParams,
    learner_id: &str,
    question: &Question,
    is_correct: bool,
    confidence_level: Option<i32>,
    now: DateTime<Utc>,
) -> EngineResult<MasteryOutcome> {
    let quality = sm2_quality(is_correct, confidence_level);

    let mut saved = None;
    for _ in 0..SAVE_RETRIES {
        let stored = store.get_topic_mastery(learner_id, &question.topic_id).await?;
        let expected = stored.as_ref().and_then(|m| m.last_practiced);
        let previous = stored.unwrap_or_else(|| fresh_mastery(learner_id, question, params));

        let plan = schedule(&previous, quality, now, params)?;
        let mastery = TopicMastery {
            learner_id: learner_id.to_string(),
            topic_id: question.topic_id.clone(),
            subject_id: question.subject_id.clone(),
            mastery_level: next_mastery(previous.mastery_level, is_correct, params.alpha),
            ease_factor: plan.ease_factor,
            repetition_count: plan.repetition_count,
            interval_days: plan.interval_days,
            last_practiced: Some(now),
            next_review_date: Some(plan.next_review_date),
        };

        if store.save_topic_mastery(&mastery, expected).await? {
            saved = Some((mastery, plan));
            break;
        }
        tracing::debug!(
            learner_id,
            topic_id = %question.topic_id,
            "topic mastery changed concurrently, retrying"
        );
    }
    let (mastery, plan) = saved.ok_or_else(|| {
        EngineError::Internal(format!(
            "topic mastery {} kept changing during update",
            question.topic_id
        ))
    })?;
    let mastery_level = mastery.mastery_level;

    let (status, priority_boost, reason) = if !is_correct {
        (ReviewStatus::Pending, params.incorrect_priority_boost, REASON_INCORRECT)
    } else if mastery_level >= params.retire_threshold {
        (ReviewStatus::Retired, 0.0, REASON_MASTERED)
    } else {
        (ReviewStatus::Pending, 0.0, REASON_SCHEDULED)
    };

    let review = ReviewItem {
        learner_id: learner_id.to_string(),
        question_id: question.id.clone(),
        subject_id: question.subject_id.clone(),
        topic_id: question.topic_id.clone(),
        status,
        scheduled_for: plan.next_review_date,
        priority_score: priority_score(mastery_level, priority_boost),
        priority_boost,
        recommendation_reason: reason.to_string(),
        updated_at: now,
    };
    store.upsert_review(&review).await?;

    tracing::debug!(
        learner_id,
        topic_id = %question.topic_id,
        question_id = %question.id,
        mastery_level,
        repetition_count = plan.repetition_count,
        interval_days = plan.interval_days,
        next_review = %plan.next_review_date,
        status = review.status.as_str(),
        "topic mastery updated"
    );

    Ok(MasteryOutcome { mastery, review })
}

pub async fn mark_review_shown(
    store: &dyn PracticeStore,
    learner_id: &str,
    question_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    store
        .set_review_status(learner_id, question_id, ReviewStatus::Pending, ReviewStatus::Shown, now)
        .await
}

/// Puts reviews that were shown but never answered back in the queue.
pub async fn release_unanswered_reviews(
    store: &dyn PracticeStore,
    learner_id: &str,
    question_ids: &[String],
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let mut released = 0;
    for question_id in question_ids {
        if store
            .set_review_status(learner_id, question_id, ReviewStatus::Shown, ReviewStatus::Pending, now)
            .await?
        {
            released += 1;
        }
    }
    Ok(released)
}

/// Returns every review still marked shown in a subject to the queue. Run
/// when a new session starts, so reviews from sessions that were never ended
/// come back.
pub async fn release_stale_reviews(
    store: &dyn PracticeStore,
    learner_id: &str,
    subject_id: &str,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    store.release_shown_reviews(learner_id, subject_id, now).await
}
