//! The publish lane: the only code path permitted to call
//! [`TrackerBank::predict`] and [`ConfidenceDecayStore::tick`]. Enforces
//! per-frame ordering: predict → tick → blur_set → blur → emit → submit.

mod blur;

use crate::batch::BatchCollector;
use crate::config::{BlurConfig, BlurMethod, DegradationConfig, DetectorConfig};
use crate::decay::ConfidenceDecayStore;
use crate::detector::downscale_and_normalize;
use crate::error::Result;
use crate::kalman::TrackerBank;
use crate::sink::FrameSink;
use crate::types::Frame;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// Point-in-time publish-lane statistics for the introspection endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PublisherStats {
    pub frames_emitted: u64,
    pub avg_publish_ms: f64,
    pub degraded: bool,
    pub dropped_sink_frames: u64,
}

/// Degradation ladder applied when publish latency runs hot. Both knobs
/// move together rather than the source's either/or framing — see
/// DESIGN.md for why a combined ladder was chosen.
struct DegradeState {
    active: bool,
    pixel_size: u32,
    gaussian_passes: u32,
    skip_submission: bool,
    recovering_since: Option<Instant>,
    frame_parity: u64,
}

pub struct LivePublisher {
    trackers: Arc<Mutex<TrackerBank>>,
    decay: Arc<Mutex<ConfidenceDecayStore>>,
    blur_config: BlurConfig,
    degradation: DegradationConfig,
    detector: DetectorConfig,
    degrade: DegradeState,
    ewma_publish_ms: f64,
    frames_emitted: u64,
    dropped_sink_frames: u64,
}

impl LivePublisher {
    pub fn new(
        trackers: Arc<Mutex<TrackerBank>>,
        decay: Arc<Mutex<ConfidenceDecayStore>>,
        blur_config: BlurConfig,
        degradation: DegradationConfig,
        detector: DetectorConfig,
    ) -> Self {
        let degrade = DegradeState {
            active: false,
            pixel_size: blur_config.pixel_size,
            gaussian_passes: blur_config.gaussian_passes,
            skip_submission: false,
            recovering_since: None,
            frame_parity: 0,
        };
        Self {
            trackers,
            decay,
            blur_config,
            degradation,
            detector,
            degrade,
            ewma_publish_ms: 0.0,
            frames_emitted: 0,
            dropped_sink_frames: 0,
        }
    }

    /// Runs the full per-frame procedure for one ingress frame: predict,
    /// tick, blur, emit, and (unless degraded skip applies) submit for
    /// verification.
    /// `batch_collector` of `None` skips verification submission entirely
    /// (used once a stream has entered Draining: new submissions are
    /// stopped but publication continues until source EOS).
    pub async fn publish_frame(
        &mut self,
        mut frame: Frame,
        sink: &dyn FrameSink,
        batch_collector: Option<&BatchCollector>,
    ) -> Result<()> {
        let start = Instant::now();
        let frame_w = frame.width as f64;
        let frame_h = frame.height as f64;

        {
            let mut trackers = self.trackers.lock().unwrap();
            trackers.predict(frame.frame_id, frame_w, frame_h)?;
        }

        let blur_set = {
            let mut decay = self.decay.lock().unwrap();
            decay.tick();
            decay.get_blur_set(frame_w, frame_h)
        };

        // Downscale for verification before blur is applied in place —
        // the detector must see the unobscured frame to find new regions.
        let downscaled = batch_collector.map(|_| {
            downscale_and_normalize(&frame, self.detector.downscale_width, self.detector.downscale_height)
        });

        if !blur_set.is_empty() {
            let pixels = Arc::make_mut(&mut frame.pixels);
            for bbox in &blur_set {
                match self.blur_config.method {
                    BlurMethod::Pixelation => {
                        blur::pixelate(pixels, frame.width, frame.height, bbox, self.degrade.pixel_size)
                    }
                    BlurMethod::Gaussian => blur::box_blur(
                        pixels,
                        frame.width,
                        frame.height,
                        bbox,
                        self.blur_config.gaussian_radius,
                        self.degrade.gaussian_passes,
                    ),
                }
            }
        }

        let frame_id = frame.frame_id;
        if let Err(err) = sink.emit(frame).await {
            self.dropped_sink_frames += 1;
            debug!(?frame_id, %err, "sink emit failed, frame dropped");
        }
        self.frames_emitted += 1;

        self.degrade.frame_parity = self.degrade.frame_parity.wrapping_add(1);
        let skip_this_frame = self.degrade.active
            && self.degrade.skip_submission
            && self.degrade.frame_parity % 2 == 0;
        if let (Some(collector), Some(downscaled), false) = (batch_collector, downscaled, skip_this_frame) {
            let _ = collector.submit(frame_id, downscaled);
        }

        self.record_latency(start.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    fn record_latency(&mut self, latency_ms: f64) {
        let alpha = 2.0 / (self.degradation.ewma_window as f64 + 1.0);
        self.ewma_publish_ms = if self.frames_emitted <= 1 {
            latency_ms
        } else {
            alpha * latency_ms + (1.0 - alpha) * self.ewma_publish_ms
        };

        if !self.degrade.active && self.ewma_publish_ms > self.degradation.degrade_threshold_ms {
            self.enter_degraded();
        } else if self.degrade.active {
            if self.ewma_publish_ms < self.degradation.recover_threshold_ms {
                let since = self.degrade.recovering_since.get_or_insert_with(Instant::now);
                if since.elapsed().as_millis() as i64 >= self.degradation.recover_sustain_ms {
                    self.exit_degraded();
                }
            } else {
                self.degrade.recovering_since = None;
            }
        }
    }

    fn enter_degraded(&mut self) {
        self.degrade.active = true;
        self.degrade.pixel_size = ((self.blur_config.pixel_size as f64) * 1.25) as u32;
        self.degrade.gaussian_passes = self.blur_config.gaussian_passes.saturating_sub(1).max(1);
        self.degrade.skip_submission = true;
        self.degrade.recovering_since = None;
        info!(ewma_ms = self.ewma_publish_ms, "publish latency over budget, entering degraded mode");
    }

    fn exit_degraded(&mut self) {
        self.degrade.active = false;
        self.degrade.pixel_size = self.blur_config.pixel_size;
        self.degrade.gaussian_passes = self.blur_config.gaussian_passes;
        self.degrade.skip_submission = false;
        self.degrade.recovering_since = None;
        info!(ewma_ms = self.ewma_publish_ms, "publish latency recovered, exiting degraded mode");
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            frames_emitted: self.frames_emitted,
            avg_publish_ms: self.ewma_publish_ms,
            degraded: self.degrade.active,
            dropped_sink_frames: self.dropped_sink_frames,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degrade.active
    }
}
