use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::config::EngineConfig;
use crate::db::{PracticeStore, SharedStore};

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    store: SharedStore,
    engine_config: Arc<EngineConfig>,
}

impl AppState {
    pub fn new(store: SharedStore, engine_config: EngineConfig) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            store,
            engine_config: Arc::new(engine_config),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn store(&self) -> &dyn PracticeStore {
        self.store.as_ref()
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine_config
    }
}
