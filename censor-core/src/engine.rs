//! Lifecycle and task wiring for a single stream: `Idle → Starting →
//! Running → Draining → Stopped`. One [`StreamEngine`] owns the publish
//! task, the verification-submit forwarder, the reconciliation task, and
//! the detector health probe.

use crate::batch::BatchCollector;
use crate::config::EngineConfig;
use crate::decay::ConfidenceDecayStore;
use crate::detector::{DetectorClient, DetectorTransport};
use crate::error::EngineError;
use crate::kalman::TrackerBank;
use crate::publisher::LivePublisher;
use crate::reconciler;
use crate::sink::FrameSink;
use crate::source::FrameSource;
use crate::types::StreamId;
use crate::worker_pool::{InferenceJob, InferenceWorkerPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Backoff between retries of a transient Frame Source error — one
/// skipped tick at the publish lane's nominal 60 FPS rate.
const SOURCE_ERROR_RETRY_TICK: Duration = Duration::from_millis(16);

/// A transient Frame Source error persisting this long is escalated to
/// terminal rather than retried forever.
const SOURCE_ERROR_ESCALATION_WINDOW: Duration = Duration::from_secs(2);

/// Whether a run of transient Frame Source errors, first observed at
/// `streak_started`, has persisted long enough to be treated as
/// terminal.
fn transient_source_error_has_escalated(streak_started: tokio::time::Instant) -> bool {
    streak_started.elapsed() >= SOURCE_ERROR_ESCALATION_WINDOW
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Snapshot of a stream's state for the introspection endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineSnapshot {
    pub stream_id: StreamId,
    pub state: EngineState,
    pub frames_emitted: u64,
    pub avg_publish_ms: f64,
    pub avg_inference_ms: f64,
    pub active_trackers: usize,
    pub active_regions: usize,
    pub dropped_frames: u64,
    pub degraded: bool,
}

/// Handle to a running stream's tasks and shared state. Cheap to clone;
/// held by the [`crate::registry::EngineRegistry`].
pub struct StreamEngineHandle {
    stream_id: StreamId,
    state_rx: watch::Receiver<EngineState>,
    state_tx: watch::Sender<EngineState>,
    trackers: Arc<Mutex<TrackerBank>>,
    decay: Arc<Mutex<ConfidenceDecayStore>>,
    collector: Arc<BatchCollector>,
    publisher_stats: Arc<Mutex<crate::publisher::PublisherStats>>,
    detector: Arc<DetectorClient>,
    accepting_submissions: Arc<AtomicBool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamEngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngineHandle")
            .field("stream_id", &self.stream_id)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

impl StreamEngineHandle {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Requests a graceful shutdown: `Running → Draining`. The publish
    /// lane keeps emitting until the Frame Source reaches EOS; only new
    /// verification submissions stop immediately.
    pub fn stop(&self) {
        if *self.state_rx.borrow() == EngineState::Running {
            self.accepting_submissions.store(false, Ordering::Relaxed);
            let _ = self.state_tx.send(EngineState::Draining);
            info!(stream_id = ?self.stream_id, "stream engine draining");
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let publisher_stats = self.publisher_stats.lock().unwrap().clone();
        let collector_stats = self.collector.stats();
        EngineSnapshot {
            stream_id: self.stream_id,
            state: self.state(),
            frames_emitted: publisher_stats.frames_emitted,
            avg_publish_ms: publisher_stats.avg_publish_ms,
            avg_inference_ms: self.detector.avg_inference_ms(),
            active_trackers: self.trackers.lock().unwrap().len(),
            active_regions: self.decay.lock().unwrap().active_count(),
            dropped_frames: collector_stats.dropped_frames,
            degraded: publisher_stats.degraded || !self.detector.is_healthy(),
        }
    }
}

impl Drop for StreamEngineHandle {
    fn drop(&mut self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

/// Starts all of a stream's tasks and returns a handle to it. `source`
/// yields decoded ingress frames; `sink` receives blurred frames;
/// `transport` is the detector wire binding; `worker_pool` is the
/// process-wide inference pool this stream's batches dispatch into.
pub fn start(
    config: EngineConfig,
    mut source: Box<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    transport: Arc<dyn DetectorTransport>,
    worker_pool: Arc<InferenceWorkerPool>,
) -> Arc<StreamEngineHandle> {
    let stream_id = StreamId::new();
    let (state_tx, state_rx) = watch::channel(EngineState::Idle);
    let _ = state_tx.send(EngineState::Starting);

    let trackers = Arc::new(Mutex::new(TrackerBank::new(config.kalman.clone())));
    let decay = Arc::new(Mutex::new(ConfidenceDecayStore::new(config.decay.clone())));
    let detector = Arc::new(DetectorClient::new(transport, config.detector.clone()));
    let (collector, mut batch_rx) = BatchCollector::new(config.batch.clone());
    let collector = Arc::new(collector);

    let publisher = LivePublisher::new(
        trackers.clone(),
        decay.clone(),
        config.blur.clone(),
        config.degradation.clone(),
        config.detector.clone(),
    );
    let publisher_stats = Arc::new(Mutex::new(publisher.stats()));

    let accepting_submissions = Arc::new(AtomicBool::new(true));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    // Updated by the publish task on every frame; read by reconciliation
    // to clamp predicted bboxes. A frame or two of staleness is harmless.
    let frame_dims = Arc::new(Mutex::new((1280.0_f64, 720.0_f64)));

    let mut tasks = Vec::new();

    // Dispatch forwarder: drains dispatched batches and hands them to the
    // process-wide worker pool.
    {
        let collector = collector.clone();
        let detector = detector.clone();
        let worker_pool = worker_pool.clone();
        let result_tx = result_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(batch) = batch_rx.recv().await {
                let job = InferenceJob {
                    stream_id,
                    batch,
                    detector: detector.clone(),
                    collector: collector.clone(),
                    result_tx: result_tx.clone(),
                };
                if worker_pool.submit(job).await.is_err() {
                    break;
                }
            }
        }));
    }

    // Reconciliation task: applies detection results, dropping any that
    // arrive after the stream has fully stopped.
    {
        let trackers = trackers.clone();
        let decay = decay.clone();
        let state_rx = state_rx.clone();
        let frame_dims = frame_dims.clone();
        tasks.push(tokio::spawn(async move {
            while let Some((_, batch_result)) = result_rx.recv().await {
                if *state_rx.borrow() == EngineState::Stopped {
                    continue;
                }
                let (w, h) = *frame_dims.lock().unwrap();
                for (_, detections) in batch_result {
                    // Even a zero-detection frame must run reconciliation:
                    // every currently active tracker counts as unmatched
                    // for that frame and accrues a miss (§4.5 step 5 /
                    // the zero-detection-batch boundary case).
                    let mut trackers = trackers.lock().unwrap();
                    let mut decay = decay.lock().unwrap();
                    reconciler::reconcile(&mut trackers, &mut decay, &detections, w, h);
                }
            }
        }));
    }

    // Detector health probe, on the interval configured for this stream.
    {
        let detector = detector.clone();
        let state_rx = state_rx.clone();
        let interval = Duration::from_millis(config.detector.health_probe_interval_ms.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if *state_rx.borrow() == EngineState::Stopped {
                    break;
                }
                detector.probe_health().await;
            }
        }));
    }

    // Drain supervisor: Draining -> Stopped once the collector empties or
    // the drain deadline elapses, whichever comes first.
    {
        let collector = collector.clone();
        let mut state_rx = state_rx.clone();
        let state_tx = state_tx.clone();
        let drain_deadline = Duration::from_millis(config.drain_deadline_ms);
        tasks.push(tokio::spawn(async move {
            loop {
                if *state_rx.borrow() == EngineState::Draining {
                    break;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
            let deadline = tokio::time::Instant::now() + drain_deadline;
            loop {
                if collector.in_flight() == 0 {
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!("drain deadline elapsed with batches still in flight");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = state_tx.send(EngineState::Stopped);
        }));
    }

    // Publish task: the only caller of predict()/tick().
    {
        let sink = sink.clone();
        let collector = collector.clone();
        let detector = detector.clone();
        let state_tx = state_tx.clone();
        let accepting_submissions = accepting_submissions.clone();
        let publisher_stats = publisher_stats.clone();
        let frame_dims = frame_dims.clone();
        let mut publisher = publisher;
        let mut first_frame = true;
        let mut source_error_streak_started: Option<tokio::time::Instant> = None;
        tasks.push(tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(Some(frame)) => {
                        source_error_streak_started = None;
                        if first_frame {
                            first_frame = false;
                            detector.probe_health().await;
                            let _ = state_tx.send(EngineState::Running);
                        }
                        *frame_dims.lock().unwrap() = (frame.width as f64, frame.height as f64);
                        let submit_target = if accepting_submissions.load(Ordering::Relaxed) {
                            Some(collector.as_ref())
                        } else {
                            None
                        };
                        if let Err(err) = publisher.publish_frame(frame, sink.as_ref(), submit_target).await {
                            if err.is_fatal() {
                                error!(%err, "fatal engine error, stopping stream");
                                let _ = state_tx.send(EngineState::Stopped);
                                break;
                            }
                        }
                        *publisher_stats.lock().unwrap() = publisher.stats();
                    }
                    Ok(None) => {
                        accepting_submissions.store(false, Ordering::Relaxed);
                        let _ = state_tx.send(EngineState::Draining);
                        break;
                    }
                    Err(EngineError::SourceError { message, transient: false }) => {
                        warn!(%message, "terminal frame source error, draining stream");
                        accepting_submissions.store(false, Ordering::Relaxed);
                        let _ = state_tx.send(EngineState::Draining);
                        break;
                    }
                    Err(EngineError::SourceError { message, transient: true }) => {
                        let streak_started =
                            *source_error_streak_started.get_or_insert_with(tokio::time::Instant::now);
                        if transient_source_error_has_escalated(streak_started) {
                            warn!(
                                %message,
                                "transient frame source error persisted past escalation window, draining stream"
                            );
                            accepting_submissions.store(false, Ordering::Relaxed);
                            let _ = state_tx.send(EngineState::Draining);
                            break;
                        }
                        warn!(%message, "transient frame source error, skipping this tick");
                        tokio::time::sleep(SOURCE_ERROR_RETRY_TICK).await;
                    }
                    Err(err) => {
                        error!(%err, "unexpected frame source error, draining stream");
                        accepting_submissions.store(false, Ordering::Relaxed);
                        let _ = state_tx.send(EngineState::Draining);
                        break;
                    }
                }
            }
        }));
    }

    Arc::new(StreamEngineHandle {
        stream_id,
        state_rx,
        state_tx,
        trackers,
        decay,
        collector,
        publisher_stats,
        detector,
        accepting_submissions,
        tasks: Mutex::new(tasks),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::MockDetectorTransport;
    use crate::sink::RecordingFrameSink;
    use crate::types::{FrameId, Timestamp};

    #[test]
    fn a_fresh_error_streak_has_not_escalated() {
        assert!(!transient_source_error_has_escalated(tokio::time::Instant::now()));
    }

    /// A [`FrameSource`] that fails a fixed number of times (transient or
    /// terminal, per construction) before yielding one frame and EOS.
    struct FlakySource {
        remaining_errors: usize,
        transient: bool,
        frame_sent: bool,
    }

    #[async_trait::async_trait]
    impl FrameSource for FlakySource {
        async fn recv(&mut self) -> crate::error::Result<Option<crate::types::Frame>> {
            if self.remaining_errors > 0 {
                self.remaining_errors -= 1;
                return Err(EngineError::SourceError {
                    message: "synthetic source failure".into(),
                    transient: self.transient,
                });
            }
            if self.frame_sent {
                return Ok(None);
            }
            self.frame_sent = true;
            Ok(Some(crate::types::Frame::new(
                FrameId(0),
                Timestamp::now(),
                4,
                4,
                vec![0u8; 48],
            )))
        }
    }

    async fn wait_for_state(
        handle: &StreamEngineHandle,
        target: EngineState,
    ) -> bool {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if handle.state() == target {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn transient_source_errors_are_retried_until_the_stream_recovers() {
        let source = FlakySource { remaining_errors: 3, transient: true, frame_sent: false };
        let pool = Arc::new(InferenceWorkerPool::new(1, 4));
        let handle = start(
            EngineConfig::default(),
            Box::new(source),
            Arc::new(RecordingFrameSink::new()),
            Arc::new(MockDetectorTransport::fixed(vec![])),
            pool,
        );

        assert!(
            wait_for_state(&handle, EngineState::Running).await,
            "stream should recover and reach Running despite transient source errors"
        );
    }

    #[tokio::test]
    async fn terminal_source_error_drains_the_stream_immediately() {
        let source = FlakySource { remaining_errors: 1, transient: false, frame_sent: false };
        let pool = Arc::new(InferenceWorkerPool::new(1, 4));
        let handle = start(
            EngineConfig::default(),
            Box::new(source),
            Arc::new(RecordingFrameSink::new()),
            Arc::new(MockDetectorTransport::fixed(vec![])),
            pool,
        );

        assert!(
            wait_for_state(&handle, EngineState::Stopped).await,
            "a terminal source error should drive the stream to Draining and then Stopped"
        );
    }
}
