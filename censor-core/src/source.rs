//! The Frame Source seam: the external media runtime delivers decoded
//! frames by calling [`FrameSourceHandle::on_frame`] up to 60 FPS. The
//! publish lane consumes them through [`FrameSource::recv`], which never
//! blocks the caller of `on_frame` — back-pressure is exerted downstream
//! (verification submission drops), never here.

use crate::error::{EngineError, Result};
use crate::types::Frame;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Consumption side of the Frame Source, owned by a stream's publish task.
#[async_trait]
pub trait FrameSource: Send {
    /// Returns the next frame, `None` once the source has reached EOS, or
    /// an [`EngineError::SourceError`] if a frame could not be obtained.
    /// A transient error is retried by the caller after skipping one
    /// tick; a terminal one moves the stream straight to `Draining`.
    async fn recv(&mut self) -> Result<Option<Frame>>;
}

/// Push side of the Frame Source: the external runtime holds this and
/// calls `on_frame`/`end_of_stream` as frames decode.
#[derive(Clone)]
pub struct FrameSourceHandle {
    tx: mpsc::Sender<Frame>,
}

impl FrameSourceHandle {
    /// Delivers a frame. Non-blocking: a full channel (publisher lagging
    /// badly) drops the frame rather than applying back-pressure to the
    /// decoder.
    pub fn on_frame(&self, frame: Frame) {
        if let Err(err) = self.tx.try_send(frame) {
            tracing::warn!(?err, "frame source channel full, dropping ingress frame");
        }
    }

    /// Signals end of stream. Closing the channel makes the paired
    /// [`ChannelFrameSource`] return `None` once drained.
    pub fn end_of_stream(self) {
        drop(self.tx);
    }
}

/// Default [`FrameSource`] implementation: a bounded channel fed by a
/// [`FrameSourceHandle`].
pub struct ChannelFrameSource {
    rx: mpsc::Receiver<Frame>,
}

impl ChannelFrameSource {
    /// `capacity` bounds how many ingress frames may queue ahead of the
    /// publish task before `on_frame` starts dropping.
    pub fn new(capacity: usize) -> (FrameSourceHandle, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (FrameSourceHandle { tx }, Self { rx })
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn recv(&mut self) -> Result<Option<Frame>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FrameId, Timestamp};

    #[tokio::test]
    async fn delivered_frames_are_received_in_order() {
        let (handle, mut source) = ChannelFrameSource::new(4);
        handle.on_frame(Frame::new(FrameId(0), Timestamp::now(), 4, 4, vec![0u8; 48]));
        handle.on_frame(Frame::new(FrameId(1), Timestamp::now(), 4, 4, vec![0u8; 48]));

        assert_eq!(source.recv().await.unwrap().unwrap().frame_id, FrameId(0));
        assert_eq!(source.recv().await.unwrap().unwrap().frame_id, FrameId(1));
    }

    #[tokio::test]
    async fn end_of_stream_closes_the_source() {
        let (handle, mut source) = ChannelFrameSource::new(4);
        handle.on_frame(Frame::new(FrameId(0), Timestamp::now(), 4, 4, vec![0u8; 48]));
        handle.end_of_stream();

        assert!(source.recv().await.unwrap().is_some());
        assert!(source.recv().await.unwrap().is_none());
    }
}
