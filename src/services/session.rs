use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::db::models::{
    Delivery, Difficulty, PracticeMode, PracticeSession, Question, SessionStatus, Strategy,
};
use crate::db::PracticeStore;
use crate::services::candidates::{build_pool, PoolRequest};
use crate::services::error::{require_id, EngineError, EngineResult};
use crate::services::mastery;
use crate::services::selector::{cycle_usage, select};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
    pub learner_id: String,
    pub exam_id: String,
    pub subject_id: String,
    pub mode: String,
    pub xp_goal: i64,
}

/// A question as shown to the learner; the answer key stays server-side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: String,
    pub subject_id: String,
    pub chapter_id: String,
    pub topic_id: String,
    pub subtopic_id: Option<String>,
    pub difficulty: Difficulty,
    pub option_set: serde_json::Value,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            subject_id: question.subject_id.clone(),
            chapter_id: question.chapter_id.clone(),
            topic_id: question.topic_id.clone(),
            subtopic_id: question.subtopic_id.clone(),
            difficulty: question.difficulty,
            option_set: question.option_set.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextQuestion {
    pub delivery_id: String,
    pub question: QuestionView,
    pub xp_so_far: i64,
    pub xp_goal: i64,
    pub bonus_active: bool,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub session_id: String,
    pub mode: PracticeMode,
    pub status: SessionStatus,
    pub xp_so_far: i64,
    pub xp_goal: i64,
    pub bonus_active: bool,
    pub questions_answered: usize,
    pub correct_answers: usize,
    pub deliveries: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

pub async fn start_session(
    store: &dyn PracticeStore,
    input: StartSession,
) -> EngineResult<String> {
    require_id("learnerId", &input.learner_id)?;
    require_id("examId", &input.exam_id)?;
    require_id("subjectId", &input.subject_id)?;

    let mode = PracticeMode::parse(&input.mode).ok_or_else(|| {
        EngineError::InvalidArgument(format!(
            "mode must be one of recall, refine, conquer (got {:?})",
            input.mode
        ))
    })?;

    if input.xp_goal <= 0 {
        return Err(EngineError::InvalidArgument(
            "xpGoal must be a positive integer".to_string(),
        ));
    }

    let session = PracticeSession {
        id: uuid::Uuid::new_v4().to_string(),
        learner_id: input.learner_id,
        subject_id: input.subject_id,
        exam_id: input.exam_id,
        mode,
        xp_goal: input.xp_goal,
        status: SessionStatus::InProgress,
        start_time: Utc::now(),
        end_time: None,
        bonus_started_at: None,
    };
    store.insert_session(&session).await?;

    tracing::info!(
        session_id = %session.id,
        learner_id = %session.learner_id,
        subject_id = %session.subject_id,
        mode = %session.mode,
        xp_goal = session.xp_goal,
        "practice session started"
    );

    match mastery::release_stale_reviews(
        store,
        &session.learner_id,
        &session.subject_id,
        session.start_time,
    )
    .await
    {
        Ok(0) => {}
        Ok(released) => tracing::debug!(
            session_id = %session.id,
            released,
            "released reviews left shown by earlier sessions"
        ),
        Err(err) => tracing::warn!(
            session_id = %session.id,
            error = %err,
            "failed to release reviews left shown by earlier sessions"
        ),
    }

    Ok(session.id)
}

pub async fn end_session(
    store: &dyn PracticeStore,
    learner_id: &str,
    session_id: &str,
) -> EngineResult<()> {
    require_id("learnerId", learner_id)?;
    require_id("sessionId", session_id)?;

    let now = Utc::now();
    if !store.complete_session(session_id, learner_id, now).await? {
        return match store.get_session(session_id).await? {
            None => Err(EngineError::NotFound(format!("session {session_id}"))),
            Some(_) => Err(EngineError::Conflict(format!(
                "session {session_id} is not an active session of this learner"
            ))),
        };
    }

    tracing::info!(session_id, learner_id, "practice session completed");

    match unanswered_questions(store, session_id).await {
        Ok(pending) if !pending.is_empty() => {
            match mastery::release_unanswered_reviews(store, learner_id, &pending, now).await {
                Ok(released) => {
                    tracing::debug!(session_id, released, "released unanswered reviews")
                }
                Err(err) => tracing::warn!(
                    session_id,
                    error = %err,
                    "failed to release unanswered reviews"
                ),
            }
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(session_id, error = %err, "failed to list unanswered deliveries"),
    }

    Ok(())
}

pub async fn next_question(
    store: &dyn PracticeStore,
    config: &EngineConfig,
    learner_id: &str,
    session_id: &str,
) -> EngineResult<NextQuestion> {
    require_id("learnerId", learner_id)?;
    require_id("sessionId", session_id)?;

    let session = load_owned_session(store, learner_id, session_id).await?;
    ensure_in_progress(&session)?;

    let now = Utc::now();
    let xp_so_far: i64 = store
        .session_attempts(session_id)
        .await?
        .iter()
        .map(|attempt| attempt.xp_awarded)
        .sum();
    let deliveries = store.session_deliveries(session_id).await?;
    let excluded: HashSet<String> = deliveries.iter().map(|d| d.question_id.clone()).collect();

    let request = PoolRequest {
        learner_id,
        subject_id: &session.subject_id,
        mode: session.mode,
        excluded: &excluded,
    };
    let pool = build_pool(store, config, &request, now).await?;

    let mix = &config.selection.mix;
    let used = cycle_usage(&deliveries, mix, session.mode);
    let chosen = {
        let mut rng = rand::rng();
        select(&pool, mix, session.mode, &used, &mut rng).cloned()
    }
    .ok_or_else(|| EngineError::NoQuestionsAvailable {
        subject_id: session.subject_id.clone(),
    })?;

    let delivery = Delivery {
        delivery_id: uuid::Uuid::new_v4().to_string(),
        session_id: session.id.clone(),
        question_id: chosen.question.id.clone(),
        strategy: chosen.strategy,
        delivered_at: now,
    };
    store.insert_delivery(&delivery).await?;

    if matches!(chosen.strategy, Strategy::SrqDueNow | Strategy::SrqDueSoon) {
        if let Err(err) =
            mastery::mark_review_shown(store, learner_id, &chosen.question.id, now).await
        {
            tracing::warn!(
                session_id,
                question_id = %chosen.question.id,
                error = %err,
                "failed to mark review as shown"
            );
        }
    }

    let mut bonus_active = session.bonus_started_at.is_some();
    if !bonus_active && xp_so_far >= session.xp_goal {
        match store.mark_bonus_started(session_id, now).await {
            Ok(started) => {
                if started {
                    tracing::info!(session_id, xp_so_far, "xp goal reached, bonus round started");
                }
                bonus_active = true;
            }
            Err(err) => tracing::warn!(session_id, error = %err, "failed to start bonus round"),
        }
    }

    tracing::info!(
        session_id,
        learner_id,
        delivery_id = %delivery.delivery_id,
        question_id = %delivery.question_id,
        strategy = %delivery.strategy,
        pool_size = pool.len(),
        "question delivered"
    );

    Ok(NextQuestion {
        delivery_id: delivery.delivery_id,
        question: QuestionView::from(&chosen.question),
        xp_so_far,
        xp_goal: session.xp_goal,
        bonus_active,
        strategy: chosen.strategy,
    })
}

pub async fn session_progress(
    store: &dyn PracticeStore,
    learner_id: &str,
    session_id: &str,
) -> EngineResult<SessionProgress> {
    require_id("learnerId", learner_id)?;
    require_id("sessionId", session_id)?;

    let session = load_owned_session(store, learner_id, session_id).await?;
    let attempts = store.session_attempts(session_id).await?;
    let deliveries = store.session_deliveries(session_id).await?;

    Ok(SessionProgress {
        session_id: session.id,
        mode: session.mode,
        status: session.status,
        xp_so_far: attempts.iter().map(|a| a.xp_awarded).sum(),
        xp_goal: session.xp_goal,
        bonus_active: session.bonus_started_at.is_some(),
        questions_answered: attempts.len(),
        correct_answers: attempts.iter().filter(|a| a.is_correct).count(),
        deliveries: deliveries.len(),
        start_time: session.start_time,
        end_time: session.end_time,
    })
}

pub(crate) async fn load_owned_session(
    store: &dyn PracticeStore,
    learner_id: &str,
    session_id: &str,
) -> EngineResult<PracticeSession> {
    let session = store
        .get_session(session_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;

    if session.learner_id != learner_id {
        return Err(EngineError::Forbidden(format!(
            "session {session_id} belongs to another learner"
        )));
    }
    Ok(session)
}

pub(crate) fn ensure_in_progress(session: &PracticeSession) -> EngineResult<()> {
    if session.status != SessionStatus::InProgress {
        return Err(EngineError::InvalidState(format!(
            "session {} is {}",
            session.id,
            session.status.as_str()
        )));
    }
    Ok(())
}

async fn unanswered_questions(
    store: &dyn PracticeStore,
    session_id: &str,
) -> Result<Vec<String>, crate::db::StoreError> {
    let answered: HashSet<String> = store
        .session_attempts(session_id)
        .await?
        .into_iter()
        .map(|attempt| attempt.question_id)
        .collect();
    Ok(store
        .session_deliveries(session_id)
        .await?
        .into_iter()
        .map(|delivery| delivery.question_id)
        .filter(|question_id| !answered.contains(question_id))
        .collect())
}
