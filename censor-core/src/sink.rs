//! The Frame Sink seam: `emit` is expected to return in under ~3 ms since
//! it runs inline in the publish lane's hot loop. Implementations must
//! not block.

use crate::error::{EngineError, Result};
use crate::types::Frame;
use async_trait::async_trait;

#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn emit(&self, frame: Frame) -> Result<()>;
}

/// Test/local-run sink that records every emitted frame.
#[derive(Default)]
pub struct RecordingFrameSink {
    frames: std::sync::Mutex<Vec<Frame>>,
}

impl RecordingFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn emitted_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

#[async_trait]
impl FrameSink for RecordingFrameSink {
    async fn emit(&self, frame: Frame) -> Result<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

/// Sink that always fails, for exercising `EngineError::SinkError` handling.
pub struct FailingFrameSink;

#[async_trait]
impl FrameSink for FailingFrameSink {
    async fn emit(&self, _frame: Frame) -> Result<()> {
        Err(EngineError::SinkError("sink unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FrameId, Timestamp};

    #[tokio::test]
    async fn recording_sink_retains_emitted_frames_in_order() {
        let sink = RecordingFrameSink::new();
        sink.emit(Frame::new(FrameId(0), Timestamp::now(), 2, 2, vec![0u8; 12]))
            .await
            .unwrap();
        sink.emit(Frame::new(FrameId(1), Timestamp::now(), 2, 2, vec![0u8; 12]))
            .await
            .unwrap();
        assert_eq!(sink.emitted_count(), 2);
        assert_eq!(sink.emitted()[1].frame_id, FrameId(1));
    }
}
