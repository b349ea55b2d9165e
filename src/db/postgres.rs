use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::db::config::DbConfig;
use crate::db::models::{
    AbilityProfile, Attempt, Delivery, Difficulty, PracticeMode, PracticeSession, Question,
    QuestionFilter, ReviewItem, ReviewStatus, SessionStatus, Strategy, TopicMastery,
};
use crate::db::{DbInitError, PracticeStore, ReviewQuery, StoreError};

#[derive(Clone)]
pub struct PgPracticeStore {
    pool: PgPool,
}

impl PgPracticeStore {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbInitError> {
        let url = config
            .primary_url
            .as_deref()
            .ok_or(crate::db::config::DbConfigError::Missing { key: "DATABASE_URL" })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PracticeStore for PgPracticeStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_session(&self, session: &PracticeSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "practice_sessions"
                ("id", "learner_id", "subject_id", "exam_id", "mode", "xp_goal", "status",
                 "start_time", "end_time", "bonus_started_at")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&session.id)
        .bind(&session.learner_id)
        .bind(&session.subject_id)
        .bind(&session.exam_id)
        .bind(session.mode.as_str())
        .bind(session.xp_goal)
        .bind(session.status.as_str())
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(session.bonus_started_at)
        .execute(&self.pool)
        .await
        .map_err(|err| map_write_error(err, "practice_sessions.id"))?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<PracticeSession>, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM "practice_sessions" WHERE "id" = $1 LIMIT 1"#)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_session).transpose()
    }

    async fn complete_session(
        &self,
        session_id: &str,
        learner_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE "practice_sessions"
            SET "status" = 'completed', "end_time" = $3
            WHERE "id" = $1 AND "learner_id" = $2 AND "status" = 'in_progress'
            "#,
        )
        .bind(session_id)
        .bind(learner_id)
        .bind(ended_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_bonus_started(
        &self,
        session_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE "practice_sessions"
            SET "bonus_started_at" = $2
            WHERE "id" = $1 AND "bonus_started_at" IS NULL
            "#,
        )
        .bind(session_id)
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_delivery(&self, delivery: &Delivery) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "deliveries" ("delivery_id", "session_id", "question_id", "strategy", "delivered_at")
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&delivery.delivery_id)
        .bind(&delivery.session_id)
        .bind(&delivery.question_id)
        .bind(delivery.strategy.as_str())
        .bind(delivery.delivered_at)
        .execute(&self.pool)
        .await
        .map_err(|err| map_write_error(err, "deliveries.delivery_id"))?;
        Ok(())
    }

    async fn get_delivery(&self, delivery_id: &str) -> Result<Option<Delivery>, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM "deliveries" WHERE "delivery_id" = $1 LIMIT 1"#)
            .bind(delivery_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_delivery).transpose()
    }

    async fn session_deliveries(&self, session_id: &str) -> Result<Vec<Delivery>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM "deliveries"
            WHERE "session_id" = $1
            ORDER BY "delivered_at" ASC, "delivery_id" ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_delivery).collect()
    }

    async fn get_question(&self, question_id: &str) -> Result<Option<Question>, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM "questions" WHERE "id" = $1 LIMIT 1"#)
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_question).transpose()
    }

    async fn questions_by_ids(&self, question_ids: &[String]) -> Result<Vec<Question>, StoreError> {
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(r#"SELECT * FROM "questions" WHERE "id" = ANY($1)"#)
            .bind(question_ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_question).collect()
    }

    async fn find_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>, StoreError> {
        if filter.limit <= 0 {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(r#"SELECT q.* FROM "questions" q WHERE q."subject_id" = "#);
        qb.push_bind(filter.subject_id.clone());

        if let Some(topic_ids) = &filter.topic_ids {
            qb.push(r#" AND q."topic_id" = ANY("#);
            qb.push_bind(topic_ids.clone());
            qb.push(")");
        }

        if let Some(difficulties) = &filter.difficulties {
            let labels: Vec<String> = difficulties.iter().map(|d| d.as_str().to_string()).collect();
            qb.push(r#" AND q."difficulty" = ANY("#);
            qb.push_bind(labels);
            qb.push(")");
        }

        if let Some(learner_id) = &filter.unseen_by {
            qb.push(
                r#" AND NOT EXISTS (SELECT 1 FROM "attempts" a WHERE a."question_id" = q."id" AND a."learner_id" = "#,
            );
            qb.push_bind(learner_id.clone());
            qb.push(")");
        }

        if !filter.exclude_ids.is_empty() {
            qb.push(r#" AND NOT (q."id" = ANY("#);
            qb.push_bind(filter.exclude_ids.clone());
            qb.push("))");
        }

        qb.push(" ORDER BY random() LIMIT ");
        qb.push_bind(filter.limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(map_question).collect()
    }

    async fn get_attempt(
        &self,
        session_id: &str,
        question_id: &str,
    ) -> Result<Option<Attempt>, StoreError> {
        let row = sqlx::query(
            r#"SELECT * FROM "attempts" WHERE "session_id" = $1 AND "question_id" = $2 LIMIT 1"#,
        )
        .bind(session_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_attempt).transpose()
    }

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "attempts"
                ("id", "learner_id", "question_id", "session_id", "answer", "is_correct",
                 "time_taken_seconds", "confidence_level", "theta_before", "theta_after",
                 "xp_awarded", "completed_at")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&attempt.id)
        .bind(&attempt.learner_id)
        .bind(&attempt.question_id)
        .bind(&attempt.session_id)
        .bind(attempt.answer.clone())
        .bind(attempt.is_correct)
        .bind(attempt.time_taken_seconds)
        .bind(attempt.confidence_level)
        .bind(attempt.theta_before)
        .bind(attempt.theta_after)
        .bind(attempt.xp_awarded)
        .bind(attempt.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|err| map_write_error(err, "attempts(session_id, question_id)"))?;
        Ok(())
    }

    async fn session_attempts(&self, session_id: &str) -> Result<Vec<Attempt>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT * FROM "attempts" WHERE "session_id" = $1 ORDER BY "completed_at" ASC"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_attempt).collect()
    }

    async fn get_ability(&self, learner_id: &str) -> Result<Option<AbilityProfile>, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM "ability_profiles" WHERE "learner_id" = $1"#)
            .bind(learner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_ability).transpose()
    }

    async fn apply_ability_step(
        &self,
        learner_id: &str,
        delta: f64,
        at: DateTime<Utc>,
    ) -> Result<AbilityProfile, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO "ability_profiles" ("learner_id", "theta", "attempts_count", "updated_at")
            VALUES ($1, $2, 1, $3)
            ON CONFLICT ("learner_id") DO UPDATE SET
                "theta" = "ability_profiles"."theta" + EXCLUDED."theta",
                "attempts_count" = "ability_profiles"."attempts_count" + 1,
                "updated_at" = EXCLUDED."updated_at"
            RETURNING *
            "#,
        )
        .bind(learner_id)
        .bind(delta)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        map_ability(&row)
    }

    async fn get_topic_mastery(
        &self,
        learner_id: &str,
        topic_id: &str,
    ) -> Result<Option<TopicMastery>, StoreError> {
        let row = sqlx::query(
            r#"SELECT * FROM "topic_mastery" WHERE "learner_id" = $1 AND "topic_id" = $2"#,
        )
        .bind(learner_id)
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_mastery).transpose()
    }

    async fn learner_masteries(
        &self,
        learner_id: &str,
        subject_id: &str,
    ) -> Result<Vec<TopicMastery>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM "topic_mastery"
            WHERE "learner_id" = $1 AND "subject_id" = $2
            ORDER BY "mastery_level" ASC
            "#,
        )
        .bind(learner_id)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_mastery).collect()
    }

    async fn save_topic_mastery(
        &self,
        mastery: &TopicMastery,
        expected: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO "topic_mastery"
                ("learner_id", "topic_id", "subject_id", "mastery_level", "ease_factor",
                 "repetition_count", "interval_days", "last_practiced", "next_review_date")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT ("learner_id", "topic_id") DO UPDATE SET
                "subject_id" = EXCLUDED."subject_id",
                "mastery_level" = EXCLUDED."mastery_level",
                "ease_factor" = EXCLUDED."ease_factor",
                "repetition_count" = EXCLUDED."repetition_count",
                "interval_days" = EXCLUDED."interval_days",
                "last_practiced" = EXCLUDED."last_practiced",
                "next_review_date" = EXCLUDED."next_review_date"
            WHERE "topic_mastery"."last_practiced" IS NOT DISTINCT FROM $10
            "#,
        )
        .bind(&mastery.learner_id)
        .bind(&mastery.topic_id)
        .bind(&mastery.subject_id)
        .bind(mastery.mastery_level)
        .bind(mastery.ease_factor)
        .bind(mastery.repetition_count)
        .bind(mastery.interval_days)
        .bind(mastery.last_practiced)
        .bind(mastery.next_review_date)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn due_reviews(&self, query: &ReviewQuery) -> Result<Vec<ReviewItem>, StoreError> {
        if query.limit <= 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT * FROM "spaced_repetition_queue"
            WHERE "learner_id" = $1
              AND "subject_id" = $2
              AND "status" = 'pending'
              AND "scheduled_for" <= $3
              AND ($4::timestamptz IS NULL OR "scheduled_for" > $4)
            ORDER BY "scheduled_for" ASC, "priority_score" DESC
            LIMIT $5
            "#,
        )
        .bind(&query.learner_id)
        .bind(&query.subject_id)
        .bind(query.until)
        .bind(query.after)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_review).collect()
    }

    async fn upsert_review(&self, item: &ReviewItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "spaced_repetition_queue"
                ("learner_id", "question_id", "subject_id", "topic_id", "status", "scheduled_for",
                 "priority_score", "priority_boost", "recommendation_reason", "updated_at")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT ("learner_id", "question_id") DO UPDATE SET
                "subject_id" = EXCLUDED."subject_id",
                "topic_id" = EXCLUDED."topic_id",
                "status" = EXCLUDED."status",
                "scheduled_for" = EXCLUDED."scheduled_for",
                "priority_score" = EXCLUDED."priority_score",
                "priority_boost" = EXCLUDED."priority_boost",
                "recommendation_reason" = EXCLUDED."recommendation_reason",
                "updated_at" = EXCLUDED."updated_at"
            "#,
        )
        .bind(&item.learner_id)
        .bind(&item.question_id)
        .bind(&item.subject_id)
        .bind(&item.topic_id)
        .bind(item.status.as_str())
        .bind(item.scheduled_for)
        .bind(item.priority_score)
        .bind(item.priority_boost)
        .bind(&item.recommendation_reason)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
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
        let result = sqlx::query(
            r#"
            UPDATE "spaced_repetition_queue"
            SET "status" = $4, "updated_at" = $5
            WHERE "learner_id" = $1 AND "question_id" = $2 AND "status" = $3
            "#,
        )
        .bind(learner_id)
        .bind(question_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_shown_reviews(
        &self,
        learner_id: &str,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE "spaced_repetition_queue"
            SET "status" = 'pending', "updated_at" = $3
            WHERE "learner_id" = $1 AND "subject_id" = $2 AND "status" = 'shown'
            "#,
        )
        .bind(learner_id)
        .bind(subject_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn map_write_error(err: sqlx::Error, constraint: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(constraint.to_string());
        }
    }
    StoreError::Sqlx(err)
}

fn corrupt(column: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("unexpected {column} value {value:?}"))
}

fn map_session(row: &PgRow) -> Result<PracticeSession, StoreError> {
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("status")?;

    Ok(PracticeSession {
        id: row.try_get("id")?,
        learner_id: row.try_get("learner_id")?,
        subject_id: row.try_get("subject_id")?,
        exam_id: row.try_get("exam_id")?,
        mode: PracticeMode::parse(&mode).ok_or_else(|| corrupt("mode", &mode))?,
        xp_goal: row.try_get("xp_goal")?,
        status: SessionStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        bonus_started_at: row.try_get("bonus_started_at")?,
    })
}

fn map_delivery(row: &PgRow) -> Result<Delivery, StoreError> {
    let strategy: String = row.try_get("strategy")?;
    Ok(Delivery {
        delivery_id: row.try_get("delivery_id")?,
        session_id: row.try_get("session_id")?,
        question_id: row.try_get("question_id")?,
        strategy: Strategy::parse(&strategy).ok_or_else(|| corrupt("strategy", &strategy))?,
        delivered_at: row.try_get("delivered_at")?,
    })
}

fn map_question(row: &PgRow) -> Result<Question, StoreError> {
    let difficulty: String = row.try_get("difficulty")?;
    Ok(Question {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        chapter_id: row.try_get("chapter_id")?,
        topic_id: row.try_get("topic_id")?,
        subtopic_id: row.try_get("subtopic_id")?,
        difficulty: Difficulty::parse(&difficulty)
            .ok_or_else(|| corrupt("difficulty", &difficulty))?,
        correct_answer: row.try_get("correct_answer")?,
        option_set: row.try_get("option_set")?,
    })
}

fn map_attempt(row: &PgRow) -> Result<Attempt, StoreError> {
    Ok(Attempt {
        id: row.try_get("id")?,
        learner_id: row.try_get("learner_id")?,
        question_id: row.try_get("question_id")?,
        session_id: row.try_get("session_id")?,
        answer: row.try_get("answer")?,
        is_correct: row.try_get("is_correct")?,
        time_taken_seconds: row.try_get("time_taken_seconds")?,
        confidence_level: row.try_get("confidence_level")?,
        theta_before: row.try_get("theta_before")?,
        theta_after: row.try_get("theta_after")?,
        xp_awarded: row.try_get("xp_awarded")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn map_ability(row: &PgRow) -> Result<AbilityProfile, StoreError> {
    Ok(AbilityProfile {
        learner_id: row.try_get("learner_id")?,
        theta: row.try_get("theta")?,
        attempts_count: row.try_get("attempts_count")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_mastery(row: &PgRow) -> Result<TopicMastery, StoreError> {
    Ok(TopicMastery {
        learner_id: row.try_get("learner_id")?,
        topic_id: row.try_get("topic_id")?,
        subject_id: row.try_get("subject_id")?,
        mastery_level: row.try_get("mastery_level")?,
        ease_factor: row.try_get("ease_factor")?,
        repetition_count: row.try_get("repetition_count")?,
        interval_days: row.try_get("interval_days")?,
        last_practiced: row.try_get("last_practiced")?,
        next_review_date: row.try_get("next_review_date")?,
    })
}

fn map_review(row: &PgRow) -> Result<ReviewItem, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(ReviewItem {
        learner_id: row.try_get("learner_id")?,
        question_id: row.try_get("question_id")?,
        subject_id: row.try_get("subject_id")?,
        topic_id: row.try_get("topic_id")?,
        status: ReviewStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        scheduled_for: row.try_get("scheduled_for")?,
        priority_score: row.try_get("priority_score")?,
        priority_boost: row.try_get("priority_boost")?,
        recommendation_reason: row.try_get("recommendation_reason")?,
        updated_at: row.try_get("updated_at")?,
    })
}
