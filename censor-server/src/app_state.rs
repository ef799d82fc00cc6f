//! Shared process state handed to every axum handler. Mirrors the
//! teacher's `AppState` pattern: a small `Clone` struct of `Arc`s, with a
//! `Debug` impl that doesn't try to print the contents.

use censor_core::{EngineConfig, EngineRegistry};
use std::sync::Arc;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub registry: EngineRegistry,
    pub worker_pool: Arc<censor_core::worker_pool::InferenceWorkerPool>,
    pub engine_config: Arc<EngineConfig>,
    pub server_config: Arc<ServerConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("stream_count", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(
        registry: EngineRegistry,
        worker_pool: Arc<censor_core::worker_pool::InferenceWorkerPool>,
        engine_config: Arc<EngineConfig>,
        server_config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            registry,
            worker_pool,
            engine_config,
            server_config,
        }
    }
}
