//! Asynchronous client to the remote batched inference service.
//!
//! [`DetectorTransport`] is the wire-level seam: production code talks to
//! a real HTTP(S) detector via [`HttpDetectorTransport`], tests and local
//! runs use [`MockDetectorTransport`]. [`DetectorClient`] wraps either
//! behind timeout handling, health caching, and batch re-keying.

mod http;
mod mock;
mod preprocess;

pub use http::HttpDetectorTransport;
pub use mock::MockDetectorTransport;
pub use preprocess::{downscale_and_normalize, DownscaledFrame};

use crate::batch::BatchJob;
use crate::config::DetectorConfig;
use crate::types::{BatchId, Detection, FrameId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw response from the wire contract: detections keyed by *batch-local*
/// frame index, not yet re-keyed to the stream's [`FrameId`]s.
#[derive(Debug, Clone, Default)]
pub struct RawDetection {
    pub frame_index: usize,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub class_id: u16,
    pub score: f32,
}

/// The wire-level seam to the remote detector. Implementations need not
/// preserve request order in their response — [`DetectorClient`] re-keys
/// by `frame_index` against the batch's own `frame_ids`.
#[async_trait]
pub trait DetectorTransport: Send + Sync {
    async fn infer(&self, batch: &BatchJob) -> anyhow::Result<Vec<RawDetection>>;

    /// Lightweight liveness probe used to refresh the cached health flag.
    async fn health(&self) -> anyhow::Result<()>;
}

/// Per-frame detection results, keyed by the frame's own [`FrameId`] and
/// already rescaled to source-frame coordinates.
pub type BatchResult = Vec<(FrameId, Vec<Detection>)>;

/// Client-side wrapper: timeout, health caching, and coordinate rescaling
/// around a [`DetectorTransport`].
pub struct DetectorClient {
    transport: Arc<dyn DetectorTransport>,
    config: DetectorConfig,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    latency_ewma_ms: std::sync::Mutex<f64>,
}

impl std::fmt::Debug for DetectorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorClient")
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

impl DetectorClient {
    pub fn new(transport: Arc<dyn DetectorTransport>, config: DetectorConfig) -> Self {
        Self {
            transport,
            config,
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            latency_ewma_ms: std::sync::Mutex::new(0.0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// EWMA of recent `infer` round-trip latency, for the introspection
    /// endpoint's `avg_inference_ms`.
    pub fn avg_inference_ms(&self) -> f64 {
        *self.latency_ewma_ms.lock().unwrap()
    }

    fn record_latency(&self, latency_ms: f64) {
        let mut ewma = self.latency_ewma_ms.lock().unwrap();
        *ewma = if *ewma == 0.0 { latency_ms } else { 0.2 * latency_ms + 0.8 * *ewma };
    }

    /// Refreshes the cached health flag. Intended to be called on a fixed
    /// interval by a background task, never inline with batch dispatch.
    pub async fn probe_health(&self) {
        match self.transport.health().await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.healthy.store(true, Ordering::Relaxed);
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.health_probe_failures_before_unhealthy {
                    if self.healthy.swap(false, Ordering::Relaxed) {
                        warn!(%err, failures, "detector health probe: marking unhealthy");
                    }
                }
            }
        }
    }

    /// Runs inference for a dispatched batch. Never propagates a
    /// transport error to the caller — timeouts, transport failures, and
    /// an unhealthy cached flag all degrade to an empty result per frame,
    /// per the "no new detections" degradation contract.
    pub async fn infer(&self, batch: &BatchJob) -> BatchResult {
        if !self.is_healthy() {
            debug!(batch_id = ?batch.batch_id, "detector unhealthy, skipping dispatch");
            return empty_result(batch);
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(timeout, self.transport.infer(batch)).await;
        self.record_latency(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(Ok(raw)) => self.rekey_and_rescale(batch, raw),
            Ok(Err(err)) => {
                warn!(batch_id = ?batch.batch_id, %err, "detector transport error");
                empty_result(batch)
            }
            Err(_) => {
                warn!(batch_id = ?batch.batch_id, ?timeout, "detector request timed out");
                empty_result(batch)
            }
        }
    }

    fn rekey_and_rescale(&self, batch: &BatchJob, raw: Vec<RawDetection>) -> BatchResult {
        let mut by_frame: Vec<Vec<Detection>> = vec![Vec::new(); batch.frame_ids.len()];

        for det in raw {
            if det.score < self.config.score_threshold {
                continue;
            }
            let Some(frame_id) = batch.frame_ids.get(det.frame_index) else {
                continue;
            };
            let Some(downscaled) = batch.frames.get(det.frame_index) else {
                continue;
            };
            let scale_x = downscaled.source_width as f64 / downscaled.width as f64;
            let scale_y = downscaled.source_height as f64 / downscaled.height as f64;

            let x = det.x1.min(det.x2) * scale_x;
            let y = det.y1.min(det.y2) * scale_y;
            let w = (det.x2 - det.x1).abs() * scale_x;
            let h = (det.y2 - det.y1).abs() * scale_y;

            let Some(bbox) = crate::types::BBox::new(x, y, w, h) else {
                continue;
            };

            by_frame[det.frame_index].push(Detection {
                frame_id: *frame_id,
                bbox,
                class: crate::types::ClassId(det.class_id),
                score: det.score,
            });
        }

        batch
            .frame_ids
            .iter()
            .zip(by_frame)
            .map(|(frame_id, dets)| (*frame_id, dets))
            .collect()
    }
}

fn empty_result(batch: &BatchJob) -> BatchResult {
    batch.frame_ids.iter().map(|id| (*id, Vec::new())).collect()
}
