//! Introspection host process for the video censorship engine. Owns the
//! process-wide [`censor_core::EngineRegistry`] and
//! [`censor_core::worker_pool::InferenceWorkerPool`] and exposes a
//! read-only HTTP API over them. Frame ingestion itself happens wherever
//! `censor_core::engine::start` is called from — this crate does not
//! prescribe a transport for that; see `main.rs` for the demo wiring used
//! when running this binary standalone.

pub mod app_state;
pub mod config;
pub mod errors;
pub mod routes;

pub use app_state::AppState;
pub use config::{Cli, ConfigLoader, ResolvedConfig, ServerConfig};
pub use errors::AppError;
pub use routes::create_api_router;
