//! Shared application state passed to handlers via axum's state.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{AppConfig, StoreBackend};
use crate::db::DbPool;
use crate::engine::{PipelineRunner, RunDispatcher, TimelineRecorder};
use crate::entity::EntityStateStore;
use crate::services::{EntityService, RunService};
use crate::store::InMemoryStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// Present only on the Postgres backend
    pub db: Option<DbPool>,

    pub runs: RunService,

    pub entities: EntityService,

    /// Server start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Option<DbPool>,
        runs: RunService,
        entities: EntityService,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            runs,
            entities,
            start_time: Instant::now(),
        }
    }

    /// State backed by a single in-memory store.
    pub fn in_memory(config: AppConfig, store: Arc<InMemoryStore>, runner: PipelineRunner) -> Self {
        let dispatcher = RunDispatcher::new(Arc::new(runner), config.max_concurrent_runs);
        let entities = EntityService::new(
            EntityStateStore::new(store.clone()),
            TimelineRecorder::new(store),
        );
        Self::new(config, None, RunService::new(dispatcher), entities)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn store_label(&self) -> &'static str {
        match self.config.store_backend {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}
