use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::services::candidates::MixTable;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    /// Directory for the daily rolling log file; `None` keeps logs on stdout only.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_logs = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let log_dir = file_logs.then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs"))
        });

        Self {
            host,
            port,
            log_level,
            log_dir,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// IRT item parameters and the ability update step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityParams {
    pub discrimination: f64,
    pub learning_rate: f64,
    pub multiple_choice_guessing: f64,
    pub b_easy: f64,
    pub b_medium: f64,
    pub b_hard: f64,
    pub b_conceptual: f64,
}

impl Default for AbilityParams {
    fn default() -> Self {
        Self {
            discrimination: 1.0,
            learning_rate: 0.1,
            multiple_choice_guessing: 0.25,
            b_easy: -1.0,
            b_medium: 0.0,
            b_hard: 1.0,
            b_conceptual: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryParams {
    pub alpha: f64,
    pub initial_ease: f64,
    pub min_ease: f64,
    pub relearn_delay_minutes: i64,
    pub max_interval_days: f64,
    pub retire_threshold: f64,
    pub incorrect_priority_boost: f64,
    pub overdue_weight: f64,
}

impl Default for MasteryParams {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            initial_ease: 2.5,
            min_ease: 1.3,
            relearn_delay_minutes: 10,
            max_interval_days: 365.0,
            retire_threshold: 0.95,
            incorrect_priority_boost: 0.5,
            overdue_weight: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionParams {
    pub weak_threshold: f64,
    pub mastered_threshold: f64,
    pub hard_threshold: f64,
    pub due_soon_hours: i64,
    pub pool_scale: i64,
    pub fallback_pool_size: i64,
    pub mix: MixTable,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            weak_threshold: 0.4,
            mastered_threshold: 0.75,
            hard_threshold: 1.0,
            due_soon_hours: 24,
            pool_scale: 2,
            fallback_pool_size: 50,
            mix: MixTable::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringParams {
    pub xp_correct: i64,
    pub xp_incorrect: i64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            xp_correct: 10,
            xp_incorrect: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ability: AbilityParams,
    pub mastery: MasteryParams,
    pub selection: SelectionParams,
    pub scoring: ScoringParams,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let ability = &mut config.ability;
        ability.learning_rate = env_f64("ENGINE_LEARNING_RATE", ability.learning_rate);
        ability.discrimination = env_f64("ENGINE_DISCRIMINATION", ability.discrimination);

        let mastery = &mut config.mastery;
        mastery.alpha = env_f64("ENGINE_MASTERY_ALPHA", mastery.alpha).clamp(0.0, 1.0);
        mastery.retire_threshold = env_f64("ENGINE_RETIRE_THRESHOLD", mastery.retire_threshold);
        mastery.relearn_delay_minutes =
            env_i64("ENGINE_RELEARN_DELAY_MINUTES", mastery.relearn_delay_minutes).max(0);
        mastery.max_interval_days =
            env_f64("ENGINE_MAX_INTERVAL_DAYS", mastery.max_interval_days).clamp(1.0, 36_500.0);
        mastery.overdue_weight = env_f64("ENGINE_OVERDUE_WEIGHT", mastery.overdue_weight);
        mastery.incorrect_priority_boost =
            env_f64("ENGINE_INCORRECT_PRIORITY_BOOST", mastery.incorrect_priority_boost);

        let selection = &mut config.selection;
        selection.weak_threshold = env_f64("ENGINE_WEAK_THRESHOLD", selection.weak_threshold);
        selection.mastered_threshold =
            env_f64("ENGINE_MASTERED_THRESHOLD", selection.mastered_threshold);
        selection.hard_threshold = env_f64("ENGINE_HARD_THRESHOLD", selection.hard_threshold);
        selection.due_soon_hours = env_i64("ENGINE_DUE_SOON_HOURS", selection.due_soon_hours).max(1);
        selection.pool_scale = env_i64("ENGINE_POOL_SCALE", selection.pool_scale).max(1);
        selection.fallback_pool_size =
            env_i64("ENGINE_FALLBACK_POOL_SIZE", selection.fallback_pool_size).max(1);

        let scoring = &mut config.scoring;
        scoring.xp_correct = env_i64("ENGINE_XP_CORRECT", scoring.xp_correct);
        scoring.xp_incorrect = env_i64("ENGINE_XP_INCORRECT", scoring.xp_incorrect);

        config
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(default)
}
