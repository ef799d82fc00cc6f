//! Core engine for a real-time, per-stream video censorship pipeline:
//! continuous-batched detection, Kalman-predicted tracking, confidence
//! decay, and an ordered predict/blur/emit publish lane.

pub mod batch;
pub mod config;
pub mod decay;
pub mod detector;
pub mod engine;
pub mod error;
pub mod kalman;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod sink;
pub mod source;
pub mod types;
pub mod worker_pool;

pub use config::EngineConfig;
pub use engine::{EngineSnapshot, EngineState, StreamEngineHandle};
pub use error::{EngineError, Result};
pub use registry::EngineRegistry;
pub use types::StreamId;
