use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeMode {
    Recall,
    Refine,
    Conquer,
}

impl PracticeMode {
    pub const ALL: [PracticeMode; 3] = [Self::Recall, Self::Refine, Self::Conquer];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recall => "recall",
            Self::Refine => "refine",
            Self::Conquer => "conquer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recall" => Some(Self::Recall),
            "refine" => Some(Self::Refine),
            "conquer" => Some(Self::Conquer),
            _ => None,
        }
    }
}

impl fmt::Display for PracticeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Shown,
    Retired,
}

impl ReviewStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Shown => "shown",
            Self::Retired => "retired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "shown" => Some(Self::Shown),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Conceptual,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [Self::Easy, Self::Medium, Self::Hard, Self::Conceptual];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Conceptual => "conceptual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            "conceptual" => Some(Self::Conceptual),
            _ => None,
        }
    }
}

/// Which candidate strategy put a question in front of the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    SrqDueNow,
    SrqDueSoon,
    WeakNew,
    HardMastered,
    Evaluation,
    Fallback,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SrqDueNow => "srq_due_now",
            Self::SrqDueSoon => "srq_due_soon",
            Self::WeakNew => "weak_new",
            Self::HardMastered => "hard_mastered",
            Self::Evaluation => "evaluation",
            Self::Fallback => "fallback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "srq_due_now" => Some(Self::SrqDueNow),
            "srq_due_soon" => Some(Self::SrqDueSoon),
            "weak_new" => Some(Self::WeakNew),
            "hard_mastered" => Some(Self::HardMastered),
            "evaluation" => Some(Self::Evaluation),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    pub id: String,
    pub learner_id: String,
    pub subject_id: String,
    pub exam_id: String,
    pub mode: PracticeMode,
    pub xp_goal: i64,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub bonus_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub delivery_id: String,
    pub session_id: String,
    pub question_id: String,
    pub strategy: Strategy,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub subject_id: String,
    pub chapter_id: String,
    pub topic_id: String,
    pub subtopic_id: Option<String>,
    pub difficulty: Difficulty,
    pub correct_answer: serde_json::Value,
    pub option_set: serde_json::Value,
}

impl Question {
    pub fn is_multiple_choice(&self) -> bool {
        self.option_set.as_array().is_some_and(|options| !options.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: String,
    pub learner_id: String,
    pub question_id: String,
    pub session_id: String,
    pub answer: serde_json::Value,
    pub is_correct: bool,
    pub time_taken_seconds: f64,
    pub confidence_level: Option<i32>,
    pub theta_before: f64,
    pub theta_after: f64,
    pub xp_awarded: i64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMastery {
    pub learner_id: String,
    pub topic_id: String,
    pub subject_id: String,
    pub mastery_level: f64,
    pub ease_factor: f64,
    pub repetition_count: i32,
    pub interval_days: f64,
    pub last_practiced: Option<DateTime<Utc>>,
    pub next_review_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub learner_id: String,
    pub question_id: String,
    pub subject_id: String,
    pub topic_id: String,
    pub status: ReviewStatus,
    pub scheduled_for: DateTime<Utc>,
    pub priority_score: f64,
    pub priority_boost: f64,
    pub recommendation_reason: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityProfile {
    pub learner_id: String,
    pub theta: f64,
    pub attempts_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Filter for question lookups; every populated field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct QuestionFilter {
    pub subject_id: String,
    pub topic_ids: Option<Vec<String>>,
    pub difficulties: Option<Vec<Difficulty>>,
    pub unseen_by: Option<String>,
    pub exclude_ids: Vec<String>,
    pub limit: i64,
}
