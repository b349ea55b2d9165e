use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::db::models::{Difficulty, PracticeMode, Question, QuestionFilter, Strategy};
use crate::db::{PracticeStore, ReviewQuery};
use crate::services::ability::difficulty_to_b;
use crate::services::error::{EngineError, EngineResult};
use crate::services::mastery::effective_priority;

/// Order in which strategies are consulted, both when filling the pool and
/// when the selector walks its buckets.
pub const STRATEGY_PRIORITY: [Strategy; 6] = [
    Strategy::SrqDueNow,
    Strategy::WeakNew,
    Strategy::HardMastered,
    Strategy::Evaluation,
    Strategy::SrqDueSoon,
    Strategy::Fallback,
];

/// Per-mode strategy weights, read as "out of 10 questions".
///
/// Weights size how many candidates each strategy contributes and give the
/// selector its per-cycle targets. A new mode is a new row, not new code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixTable {
    weights: HashMap<PracticeMode, HashMap<Strategy, u32>>,
}

impl MixTable {
    pub fn empty() -> Self {
        Self {
            weights: HashMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: PracticeMode, entries: &[(Strategy, u32)]) -> Self {
        self.weights
            .insert(mode, entries.iter().copied().collect());
        self
    }

    pub fn weight(&self, mode: PracticeMode, strategy: Strategy) -> u32 {
        self.weights
            .get(&mode)
            .and_then(|row| row.get(&strategy))
            .copied()
            .unwrap_or(0)
    }

    /// Number of turns after which the per-strategy targets reset.
    pub fn cycle_len(&self, mode: PracticeMode) -> u32 {
        self.weights
            .get(&mode)
            .map(|row| row.values().sum())
            .unwrap_or(0)
    }
}

impl Default for MixTable {
    fn default() -> Self {
        Self::empty()
            .with_mode(
                PracticeMode::Recall,
                &[
                    (Strategy::SrqDueNow, 4),
                    (Strategy::SrqDueSoon, 2),
                    (Strategy::Evaluation, 3),
                ],
            )
            .with_mode(
                PracticeMode::Refine,
                &[
                    (Strategy::SrqDueNow, 3),
                    (Strategy::WeakNew, 4),
                    (Strategy::Evaluation, 3),
                ],
            )
            .with_mode(
                PracticeMode::Conquer,
                &[
                    (Strategy::SrqDueNow, 2),
                    (Strategy::Evaluation, 2),
                    (Strategy::HardMastered, 6),
                ],
            )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub question: Question,
    pub strategy: Strategy,
    pub priority: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    candidates: Vec<Candidate>,
    ids: HashSet<String>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate unless the question is already pooled. Returns
    /// whether it was added.
    pub fn push(&mut self, question: Question, strategy: Strategy, priority: f64) -> bool {
        if !self.ids.insert(question.id.clone()) {
            return false;
        }
        self.candidates.push(Candidate {
            question,
            strategy,
            priority,
        });
        true
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn contains(&self, question_id: &str) -> bool {
        self.ids.contains(question_id)
    }

    pub fn bucket(&self, strategy: Strategy) -> Vec<&Candidate> {
        self.candidates
            .iter()
            .filter(|candidate| candidate.strategy == strategy)
            .collect()
    }

    pub fn count(&self, strategy: Strategy) -> usize {
        self.candidates
            .iter()
            .filter(|candidate| candidate.strategy == strategy)
            .count()
    }

    fn exclusion_with(&self, excluded: &HashSet<String>) -> Vec<String> {
        excluded.iter().chain(self.ids.iter()).cloned().collect()
    }
}

#[derive(Debug, Clone)]
pub struct PoolRequest<'a> {
    pub learner_id: &'a str,
    pub subject_id: &'a str,
    pub mode: PracticeMode,
    /// Questions that must not be offered again (already delivered in this session).
    pub excluded: &'a HashSet<String>,
}

pub async fn build_pool(
    store: &dyn PracticeStore,
    config: &EngineConfig,
    request: &PoolRequest<'_>,
    now: DateTime<Utc>,
) -> EngineResult<CandidatePool> {
    let selection = &config.selection;
    let limit_for = |strategy: Strategy| -> i64 {
        i64::from(selection.mix.weight(request.mode, strategy)) * selection.pool_scale
    };

    let mut pool = CandidatePool::new();

    let due_now = limit_for(Strategy::SrqDueNow);
    if due_now > 0 {
        add_reviews(store, config, request, &mut pool, Strategy::SrqDueNow, None, now, due_now, now)
            .await?;
    }

    let weak = limit_for(Strategy::WeakNew);
    if weak > 0 {
        let topics = topics_where(store, request, |level| level < selection.weak_threshold).await?;
        if !topics.is_empty() {
            let filter = QuestionFilter {
                subject_id: request.subject_id.to_string(),
                topic_ids: Some(topics),
                difficulties: None,
                unseen_by: Some(request.learner_id.to_string()),
                exclude_ids: pool.exclusion_with(request.excluded),
                limit: weak,
            };
            add_questions(store, &mut pool, &filter, Strategy::WeakNew).await?;
        }
    }

    let hard = limit_for(Strategy::HardMastered);
    if hard > 0 {
        let topics =
            topics_where(store, request, |level| level >= selection.mastered_threshold).await?;
        let difficulties: Vec<Difficulty> = Difficulty::ALL
            .into_iter()
            .filter(|d| difficulty_to_b(*d, &config.ability) >= selection.hard_threshold)
            .collect();
        if !topics.is_empty() && !difficulties.is_empty() {
            let filter = QuestionFilter {
                subject_id: request.subject_id.to_string(),
                topic_ids: Some(topics),
                difficulties: Some(difficulties),
                unseen_by: None,
                exclude_ids: pool.exclusion_with(request.excluded),
                limit: hard,
            };
            add_questions(store, &mut pool, &filter, Strategy::HardMastered).await?;
        }
    }

    let evaluation = limit_for(Strategy::Evaluation);
    if evaluation > 0 {
        let filter = QuestionFilter {
            subject_id: request.subject_id.to_string(),
            topic_ids: None,
            difficulties: None,
            unseen_by: Some(request.learner_id.to_string()),
            exclude_ids: pool.exclusion_with(request.excluded),
            limit: evaluation,
        };
        add_questions(store, &mut pool, &filter, Strategy::Evaluation).await?;
    }

    let due_soon = limit_for(Strategy::SrqDueSoon);
    if due_soon > 0 {
        let horizon = now + Duration::hours(selection.due_soon_hours);
        add_reviews(
            store,
            config,
            request,
            &mut pool,
            Strategy::SrqDueSoon,
            Some(now),
            horizon,
            due_soon,
            now,
        )
        .await?;
    }

    if pool.is_empty() {
        let filter = QuestionFilter {
            subject_id: request.subject_id.to_string(),
            topic_ids: None,
            difficulties: None,
            unseen_by: None,
            exclude_ids: request.excluded.iter().cloned().collect(),
            limit: selection.fallback_pool_size,
        };
        add_questions(store, &mut pool, &filter, Strategy::Fallback).await?;
    }

    if pool.is_empty() {
        return Err(EngineError::NoQuestionsAvailable {
            subject_id: request.subject_id.to_string(),
        });
    }

    tracing::debug!(
        learner_id = request.learner_id,
        subject_id = request.subject_id,
        mode = %request.mode,
        pool_size = pool.len(),
        due_now = pool.count(Strategy::SrqDueNow),
        weak_new = pool.count(Strategy::WeakNew),
        hard_mastered = pool.count(Strategy::HardMastered),
        evaluation = pool.count(Strategy::Evaluation),
        due_soon = pool.count(Strategy::SrqDueSoon),
        fallback = pool.count(Strategy::Fallback),
        "candidate pool built"
    );

    Ok(pool)
}

async fn topics_where(
    store: &dyn PracticeStore,
    request: &PoolRequest<'_>,
    keep: impl Fn(f64) -> bool,
) -> EngineResult<Vec<String>> {
    let masteries = store
        .learner_masteries(request.learner_id, request.subject_id)
        .await?;
    Ok(masteries
        .into_iter()
        .filter(|m| keep(m.mastery_level))
        .map(|m| m.topic_id)
        .collect())
}

async fn add_questions(
    store: &dyn PracticeStore,
    pool: &mut CandidatePool,
    filter: &QuestionFilter,
    strategy: Strategy,
) -> EngineResult<()> {
    for question in store.find_questions(filter).await? {
        pool.push(question, strategy, 0.0);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn add_reviews(
    store: &dyn PracticeStore,
    config: &EngineConfig,
    request: &PoolRequest<'_>,
    pool: &mut CandidatePool,
    strategy: Strategy,
    after: Option<DateTime<Utc>>,
    until: DateTime<Utc>,
    limit: i64,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let query = ReviewQuery {
        learner_id: request.learner_id.to_string(),
        subject_id: request.subject_id.to_string(),
        after,
        until,
        limit: limit + request.excluded.len() as i64,
    };
    let items: Vec<_> = store
        .due_reviews(&query)
        .await?
        .into_iter()
        .filter(|item| !request.excluded.contains(&item.question_id))
        .filter(|item| !pool.contains(&item.question_id))
        .take(limit as usize)
        .collect();
    if items.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = items.iter().map(|item| item.question_id.clone()).collect();
    let mut questions: HashMap<String, Question> = store
        .questions_by_ids(&ids)
        .await?
        .into_iter()
        .map(|question| (question.id.clone(), question))
        .collect();

    for item in &items {
        if let Some(question) = questions.remove(&item.question_id) {
            pool.push(question, strategy, effective_priority(item, now, &config.mastery));
        }
    }
    Ok(())
}
