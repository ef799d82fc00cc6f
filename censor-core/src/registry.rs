//! Process-wide directory of running stream engines, keyed by
//! [`StreamId`]. Grounded in the same "concurrent map of handles" shape
//! used elsewhere in this codebase for tracking live sessions.

use crate::engine::{EngineState, StreamEngineHandle};
use crate::types::StreamId;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: Arc<DashMap<StreamId, Arc<StreamEngineHandle>>>,
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("stream_count", &self.engines.len())
            .finish()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<StreamEngineHandle>) {
        self.engines.insert(handle.stream_id(), handle);
    }

    pub fn get(&self, stream_id: StreamId) -> Option<Arc<StreamEngineHandle>> {
        self.engines.get(&stream_id).map(|e| e.value().clone())
    }

    /// Stops and drops a stream's handle. Dropping aborts its tasks once
    /// every clone is gone; callers that want a graceful drain should
    /// call `stop()` via `get()` first and remove once `Stopped`.
    pub fn remove(&self, stream_id: StreamId) {
        self.engines.remove(&stream_id);
    }

    pub fn list(&self) -> Vec<StreamId> {
        self.reap();
        self.engines.iter().map(|e| *e.key()).collect()
    }

    pub fn snapshots(&self) -> Vec<crate::engine::EngineSnapshot> {
        self.reap();
        self.engines.iter().map(|e| e.value().snapshot()).collect()
    }

    /// Drops handles for streams that have fully stopped. Nothing calls
    /// `remove` on a stream's behalf when it reaches `Stopped`, so the
    /// registry prunes them lazily here instead of accumulating dead
    /// entries forever.
    fn reap(&self) {
        self.engines
            .retain(|_, handle| handle.state() != EngineState::Stopped);
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::detector::MockDetectorTransport;
    use crate::sink::RecordingFrameSink;
    use crate::source::ChannelFrameSource;
    use crate::worker_pool::InferenceWorkerPool;

    #[tokio::test]
    async fn registered_stream_is_listed_and_removable() {
        let registry = EngineRegistry::new();
        let (_handle, source) = ChannelFrameSource::new(4);
        let pool = Arc::new(InferenceWorkerPool::new(1, 4));

        let engine = crate::engine::start(
            EngineConfig::default(),
            Box::new(source),
            Arc::new(RecordingFrameSink::new()),
            Arc::new(MockDetectorTransport::fixed(vec![])),
            pool,
        );
        let stream_id = engine.stream_id();
        registry.insert(engine);

        assert_eq!(registry.len(), 1);
        assert!(registry.list().contains(&stream_id));

        registry.remove(stream_id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn stopped_stream_is_reaped_without_an_explicit_remove() {
        let registry = EngineRegistry::new();
        let (handle, source) = ChannelFrameSource::new(4);
        let pool = Arc::new(InferenceWorkerPool::new(1, 4));

        let engine = crate::engine::start(
            EngineConfig::default(),
            Box::new(source),
            Arc::new(RecordingFrameSink::new()),
            Arc::new(MockDetectorTransport::fixed(vec![])),
            pool,
        );
        let stream_id = engine.stream_id();
        registry.insert(engine);

        handle.end_of_stream();

        let reached_stopped = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                if matches!(registry.get(stream_id), Some(e) if e.state() == EngineState::Stopped) {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reached_stopped.is_ok(), "stream did not reach Stopped in time");

        assert!(!registry.list().contains(&stream_id));
        assert!(registry.snapshots().is_empty());
        assert!(registry.is_empty());
    }
}
