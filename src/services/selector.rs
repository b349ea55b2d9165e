use std::collections::HashMap;

use rand::seq::IndexedRandom;
use rand::Rng;

use crate::db::models::{Delivery, PracticeMode, Strategy};
use crate::services::candidates::{Candidate, CandidatePool, MixTable, STRATEGY_PRIORITY};

/// How many times each strategy has been delivered in the current mix cycle.
pub fn cycle_usage(
    deliveries: &[Delivery],
    mix: &MixTable,
    mode: PracticeMode,
) -> HashMap<Strategy, u32> {
    let cycle = mix.cycle_len(mode) as usize;
    let mut used = HashMap::new();
    if cycle == 0 {
        return used;
    }

    let in_cycle = deliveries.len() % cycle;
    for delivery in &deliveries[deliveries.len() - in_cycle..] {
        *used.entry(delivery.strategy).or_insert(0) += 1;
    }
    used
}

/// Picks one candidate.
///
/// Buckets are walked in [`STRATEGY_PRIORITY`] order and the first non-empty
/// bucket whose target for this cycle is still unmet wins. If every non-empty
/// bucket has met its target, the first non-empty bucket wins regardless.
/// The draw inside a bucket is uniform.
pub fn select<'a, R: Rng + ?Sized>(
    pool: &'a CandidatePool,
    mix: &MixTable,
    mode: PracticeMode,
    used: &HashMap<Strategy, u32>,
    rng: &mut R,
) -> Option<&'a Candidate> {
    let unmet = STRATEGY_PRIORITY.iter().copied().find(|strategy| {
        let target = mix.weight(mode, *strategy);
        let spent = used.get(strategy).copied().unwrap_or(0);
        spent < target && pool.count(*strategy) > 0
    });

    let strategy = unmet.or_else(|| {
        STRATEGY_PRIORITY
            .iter()
            .copied()
            .find(|strategy| pool.count(*strategy) > 0)
    })?;

    pool.bucket(strategy).choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::db::models::{Difficulty, Question};

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            subject_id: "physics".to_string(),
            chapter_id: "c".to_string(),
            topic_id: "t".to_string(),
            subtopic_id: None,
            difficulty: Difficulty::Medium,
            correct_answer: serde_json::json!("A"),
            option_set: serde_json::json!(["A", "B"]),
        }
    }

    fn delivery(strategy: Strategy) -> Delivery {
        Delivery {
            delivery_id: uuid::Uuid::new_v4().to_string(),
            session_id: "s".to_string(),
            question_id: "q".to_string(),
            strategy,
            delivered_at: Utc::now(),
        }
    }

    fn pool(entries: &[(&str, Strategy)]) -> CandidatePool {
        let mut pool = CandidatePool::new();
        for (id, strategy) in entries {
            pool.push(question(id), *strategy, 0.0);
        }
        pool
    }

    #[test]
    fn test_due_now_beats_evaluation() {
        let pool = pool(&[
            ("e1", Strategy::Evaluation),
            ("e2", Strategy::Evaluation),
            ("d1", Strategy::SrqDueNow),
        ]);
        let mix = MixTable::default();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let picked = select(&pool, &mix, PracticeMode::Recall, &HashMap::new(), &mut rng)
                .expect("pool is not empty");
            assert_eq!(picked.strategy, Strategy::SrqDueNow);
        }
    }

    #[test]
    fn test_met_target_moves_to_next_bucket() {
        let pool = pool(&[("d1", Strategy::SrqDueNow), ("w1", Strategy::WeakNew)]);
        let mix = MixTable::default();
        let used = HashMap::from([(Strategy::SrqDueNow, 3)]);
        let mut rng = StdRng::seed_from_u64(1);

        let picked = select(&pool, &mix, PracticeMode::Refine, &used, &mut rng).unwrap();
        assert_eq!(picked.strategy, Strategy::WeakNew);
    }

    #[test]
    fn test_falls_back_to_first_non_empty_when_all_met() {
        let pool = pool(&[("e1", Strategy::Evaluation), ("d1", Strategy::SrqDueNow)]);
        let mix = MixTable::default();
        let used = HashMap::from([(Strategy::SrqDueNow, 4), (Strategy::Evaluation, 3)]);
        let mut rng = StdRng::seed_from_u64(3);

        let picked = select(&pool, &mix, PracticeMode::Recall, &used, &mut rng).unwrap();
        assert_eq!(picked.strategy, Strategy::SrqDueNow);
    }

    #[test]
    fn test_zero_weight_bucket_only_used_when_alone() {
        let mix = MixTable::default();
        let mut rng = StdRng::seed_from_u64(11);

        let mixed = pool(&[("w1", Strategy::WeakNew), ("e1", Strategy::Evaluation)]);
        let picked = select(&mixed, &mix, PracticeMode::Recall, &HashMap::new(), &mut rng).unwrap();
        assert_eq!(picked.strategy, Strategy::Evaluation);

        let fallback_only = pool(&[("f1", Strategy::Fallback)]);
        let picked =
            select(&fallback_only, &mix, PracticeMode::Recall, &HashMap::new(), &mut rng).unwrap();
        assert_eq!(picked.question.id, "f1");
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        let mix = MixTable::default();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select(&CandidatePool::new(), &mix, PracticeMode::Conquer, &HashMap::new(), &mut rng)
            .is_none());
    }

    #[test]
    fn test_cycle_usage_resets_every_cycle() {
        let mix = MixTable::default();
        let mut deliveries: Vec<Delivery> = (0..10).map(|_| delivery(Strategy::Evaluation)).collect();
        assert!(cycle_usage(&deliveries, &mix, PracticeMode::Refine).is_empty());

        deliveries.push(delivery(Strategy::SrqDueNow));
        deliveries.push(delivery(Strategy::WeakNew));
        let used = cycle_usage(&deliveries, &mix, PracticeMode::Refine);
        assert_eq!(used.get(&Strategy::SrqDueNow), Some(&1));
        assert_eq!(used.get(&Strategy::WeakNew), Some(&1));
        assert_eq!(used.get(&Strategy::Evaluation), None);
    }
}
