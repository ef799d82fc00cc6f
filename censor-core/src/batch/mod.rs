//! Continuous-batching queue that groups recently submitted frames into
//! small batches bounded by size and wait time, with backpressure.
//!
//! The collector never blocks its submitter: `submit` is synchronous and
//! either enqueues or counts a drop. A background task enforces the wait
//! bound; the size bound is enforced inline on submit.

use crate::error::{EngineError, Result};
use crate::types::{BatchId, FrameId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::BatchConfig;
use crate::detector::DownscaledFrame;

/// A single frame queued for verification, already downscaled by the
/// caller (the Live Publisher's verification-submit step).
#[derive(Debug, Clone)]
pub struct FrameDescriptor {
    pub frame_id: FrameId,
    pub enqueued_at: tokio::time::Instant,
    pub downscaled: DownscaledFrame,
}

/// A group of frames dispatched to the detector in one request.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub batch_id: BatchId,
    pub frame_ids: Vec<FrameId>,
    pub frames: Vec<DownscaledFrame>,
    pub enqueued_at: tokio::time::Instant,
}

/// Point-in-time statistics exposed via the introspection endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CollectorStats {
    pub avg_batch_size: f64,
    pub avg_wait_ms: f64,
    pub dropped_frames: u64,
    pub in_flight: u64,
}

struct Inner {
    queue: Mutex<VecDeque<FrameDescriptor>>,
    sequence: AtomicU64,
    in_flight: AtomicUsize,
    dropped_frames: AtomicU64,
    dispatched_batches: AtomicU64,
    dispatched_frames: AtomicU64,
    wait_ms_accum: AtomicI64,
    config: BatchConfig,
    out_tx: mpsc::Sender<BatchJob>,
}

impl Inner {
    fn try_dispatch_locked(&self, queue: &mut VecDeque<FrameDescriptor>) -> Option<BatchJob> {
        if queue.is_empty() {
            return None;
        }
        let batch_id = BatchId(self.sequence.fetch_add(1, Ordering::Relaxed));
        let mut frame_ids = Vec::with_capacity(queue.len());
        let mut frames = Vec::with_capacity(queue.len());
        let now = tokio::time::Instant::now();
        let mut wait_total_ms = 0i64;
        let count = queue.len();

        for desc in queue.drain(..) {
            wait_total_ms += now.duration_since(desc.enqueued_at).as_millis() as i64;
            frame_ids.push(desc.frame_id);
            frames.push(desc.downscaled);
        }

        self.dispatched_batches.fetch_add(1, Ordering::Relaxed);
        self.dispatched_frames.fetch_add(count as u64, Ordering::Relaxed);
        self.wait_ms_accum.fetch_add(wait_total_ms, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);

        Some(BatchJob {
            batch_id,
            frame_ids,
            frames,
            enqueued_at: now,
        })
    }
}

/// Per-stream batch collector. Cheap to clone; all state lives behind
/// `Arc`-free atomics and a short-held mutex since this is itself held
/// inside an `Arc` by callers.
pub struct BatchCollector {
    inner: std::sync::Arc<Inner>,
    waiter: JoinHandle<()>,
}

impl std::fmt::Debug for BatchCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCollector")
            .field("in_flight", &self.inner.in_flight.load(Ordering::Relaxed))
            .field("dropped_frames", &self.inner.dropped_frames.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for BatchCollector {
    fn drop(&mut self) {
        self.waiter.abort();
    }
}

impl BatchCollector {
    pub fn new(config: BatchConfig) -> (Self, mpsc::Receiver<BatchJob>) {
        let (out_tx, out_rx) = mpsc::channel(config.max_in_flight.max(1) * 2);

        let inner = std::sync::Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            dropped_frames: AtomicU64::new(0),
            dispatched_batches: AtomicU64::new(0),
            dispatched_frames: AtomicU64::new(0),
            wait_ms_accum: AtomicI64::new(0),
            config: config.clone(),
            out_tx,
        });

        let waiter_inner = inner.clone();
        let max_wait = Duration::from_millis(config.max_wait_ms);
        let waiter = tokio::spawn(async move {
            // Wake at a fraction of the wait bound so we never overshoot it
            // by more than this tick granularity.
            let tick = (max_wait / 3).max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let batch = {
                    let mut queue = waiter_inner.queue.lock().unwrap();
                    let oldest_due = queue
                        .front()
                        .map(|d| d.enqueued_at.elapsed() >= max_wait)
                        .unwrap_or(false);
                    if oldest_due {
                        waiter_inner.try_dispatch_locked(&mut queue)
                    } else {
                        None
                    }
                };
                if let Some(batch) = batch {
                    if waiter_inner.out_tx.send(batch).await.is_err() {
                        break;
                    }
                }
            }
        });

        (Self { inner, waiter }, out_rx)
    }

    /// Enqueue a downscaled frame for verification. Never blocks; rejects
    /// with [`EngineError::BackpressureDrop`] under sustained overload.
    pub fn submit(&self, frame_id: FrameId, downscaled: DownscaledFrame) -> Result<()> {
        if self.inner.in_flight.load(Ordering::Relaxed) >= self.inner.config.max_in_flight {
            self.inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
            trace!(?frame_id, "batch collector backpressure drop");
            return Err(EngineError::BackpressureDrop);
        }

        let desc = FrameDescriptor {
            frame_id,
            enqueued_at: tokio::time::Instant::now(),
            downscaled,
        };

        let batch = {
            let mut queue = self.inner.queue.lock().unwrap();
            queue.push_back(desc);
            if queue.len() >= self.inner.config.max_size {
                self.inner.try_dispatch_locked(&mut queue)
            } else {
                None
            }
        };

        if let Some(batch) = batch
            && self.inner.out_tx.try_send(batch).is_err()
        {
            warn!("inference worker pool channel full; batch dropped");
            self.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        }

        Ok(())
    }

    /// Releases the in-flight slot held by `batch_id`. Called by the
    /// detector client once a batch's result (or failure) has been
    /// processed, regardless of outcome.
    pub fn release_in_flight(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CollectorStats {
        let dispatched_batches = self.inner.dispatched_batches.load(Ordering::Relaxed).max(1) as f64;
        let dispatched_frames = self.inner.dispatched_frames.load(Ordering::Relaxed) as f64;
        let wait_ms = self.inner.wait_ms_accum.load(Ordering::Relaxed) as f64;

        CollectorStats {
            avg_batch_size: dispatched_frames / dispatched_batches,
            avg_wait_ms: wait_ms / dispatched_frames.max(1.0),
            dropped_frames: self.inner.dropped_frames.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed) as u64,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DownscaledFrame;

    fn frame(w: u32, h: u32) -> DownscaledFrame {
        DownscaledFrame {
            width: w,
            height: h,
            planar_rgb: vec![0.0; (w * h * 3) as usize],
            source_width: w,
            source_height: h,
        }
    }

    #[tokio::test]
    async fn dispatches_on_max_size() {
        let cfg = BatchConfig {
            max_size: 3,
            max_wait_ms: 1_000,
            max_in_flight: 10,
            min_size: 1,
        };
        let (collector, mut rx) = BatchCollector::new(cfg);
        for i in 0..3 {
            collector.submit(FrameId(i), frame(4, 4)).unwrap();
        }
        let batch = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.frame_ids.len(), 3);
    }

    #[tokio::test]
    async fn drops_newest_when_in_flight_saturated() {
        let cfg = BatchConfig {
            max_size: 100,
            max_wait_ms: 5,
            max_in_flight: 1,
            min_size: 1,
        };
        let (collector, mut rx) = BatchCollector::new(cfg);
        collector.submit(FrameId(0), frame(4, 4)).unwrap();
        // Force a dispatch to occupy the single in-flight slot.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _batch = rx.recv().await.unwrap();
        assert_eq!(collector.in_flight(), 1);

        let result = collector.submit(FrameId(1), frame(4, 4));
        assert!(matches!(result, Err(EngineError::BackpressureDrop)));
        assert_eq!(collector.stats().dropped_frames, 1);
    }

    #[tokio::test]
    async fn never_dispatches_empty_batch() {
        let cfg = BatchConfig {
            max_size: 8,
            max_wait_ms: 10,
            max_in_flight: 10,
            min_size: 1,
        };
        let (_collector, mut rx) = BatchCollector::new(cfg);
        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "no batch should ever be dispatched when queue is empty");
    }
}
