//! Per-stream collection of 8-state constant-velocity Kalman filters, one
//! per tracked region: `[cx, cy, aspect, h, vcx, vcy, vaspect, vh]`.
//!
//! `predict` must be called exactly once per published frame by the Live
//! Publisher, before publication; this module only enforces that a given
//! `FrameId` is not predicted twice — the caller is the sole source of
//! frame-ordered calls.

use crate::config::KalmanConfig;
use crate::error::{EngineError, Result};
use crate::types::{BBox, ClassId, Detection, FrameId, TrackerId};
use nalgebra::{SMatrix, SVector};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// How many past frames of predicted bboxes each tracker remembers, so the
/// Reconciler can score a late-arriving detection against the tracker's
/// belief *at the detection's own frame* rather than its current belief.
/// Generous relative to the verification lane's expected lag
/// (batch wait + in-flight queueing + detector latency).
const PREDICTION_HISTORY_LEN: usize = 90;

type State = SVector<f64, 8>;
type Covariance = SMatrix<f64, 8, 8>;
/// Observation vector: `(cx, cy, aspect, h)`.
type Measurement = SVector<f64, 4>;
type MeasurementCov = SMatrix<f64, 4, 4>;
type ObservationMatrix = SMatrix<f64, 4, 8>;

/// One tracked region's motion model.
#[derive(Debug, Clone)]
pub struct Tracker {
    pub tracker_id: TrackerId,
    state: State,
    covariance: Covariance,
    pub hits: u32,
    pub misses: u32,
    pub last_update_frame: FrameId,
    pub class_hint: ClassId,
    created_at: Instant,
    last_update_at: Instant,
}

impl Tracker {
    /// The filter's belief about the bounding box right now (after the
    /// most recent `predict`), clamped to the given frame bounds.
    pub fn predicted_bbox(&self, frame_w: f64, frame_h: f64) -> Option<BBox> {
        let h = self.state[3].max(0.0);
        let aspect = self.state[2];
        BBox::from_center_aspect_height(self.state[0], self.state[1], aspect, h)
            .and_then(|b| b.clamp(frame_w, frame_h))
    }

    pub fn is_confirmed(&self) -> bool {
        self.hits >= 1
    }

    /// `0.7 * hit_ratio + 0.3 * recency`, exposed for logging only — it is
    /// not used to gate tracker removal (that is governed purely by
    /// `misses` and wallclock age; see DESIGN.md for why this stays
    /// separate from cleanup).
    pub fn confidence(&self) -> f64 {
        let hit_ratio = if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        };
        let age_s = self.created_at.elapsed().as_secs_f64();
        let recency = (1.0 - age_s).max(0.0);
        0.7 * hit_ratio + 0.3 * recency
    }

    fn age_ms(&self) -> i64 {
        self.created_at.elapsed().as_millis() as i64
    }
}

fn process_noise(q: f64) -> SMatrix<f64, 8, 8> {
    SMatrix::from_diagonal(&SVector::<f64, 8>::from_element(q))
}

fn measurement_noise(r: f64) -> MeasurementCov {
    SMatrix::from_diagonal(&Measurement::from_element(r))
}

fn transition_matrix() -> SMatrix<f64, 8, 8> {
    // Constant velocity, step dt = 1 frame: x_{t+1} = x_t + v_t.
    let mut f = SMatrix::<f64, 8, 8>::identity();
    for i in 0..4 {
        f[(i, i + 4)] = 1.0;
    }
    f
}

fn observation_matrix() -> ObservationMatrix {
    let mut h = ObservationMatrix::zeros();
    for i in 0..4 {
        h[(i, i)] = 1.0;
    }
    h
}

/// Maintains motion models for all currently tracked regions of a stream.
pub struct TrackerBank {
    trackers: HashMap<TrackerId, Tracker>,
    next_id: u32,
    config: KalmanConfig,
    f: SMatrix<f64, 8, 8>,
    h: ObservationMatrix,
    q: SMatrix<f64, 8, 8>,
    r: MeasurementCov,
    last_predict_frame: Option<FrameId>,
    history: HashMap<TrackerId, VecDeque<(FrameId, BBox)>>,
}

impl std::fmt::Debug for TrackerBank {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("TrackerBank")
            .field("trackers", &self.trackers.len())
            .finish()
    }
}

impl TrackerBank {
    pub fn new(config: KalmanConfig) -> Self {
        Self {
            trackers: HashMap::new(),
            next_id: 0,
            f: transition_matrix(),
            h: observation_matrix(),
            q: process_noise(config.process_noise),
            r: measurement_noise(config.measurement_noise),
            config,
            last_predict_frame: None,
            history: HashMap::new(),
        }
    }

    /// Initializes a new tracker from a detection: center/aspect/height
    /// from the bbox, zero velocity, identity covariance. A zero-height
    /// measurement is rejected (treated the same as a miss would be).
    pub fn init(&mut self, detection: &Detection) -> Option<TrackerId> {
        if detection.bbox.h <= 0.0 {
            return None;
        }
        let (cx, cy) = detection.bbox.center();
        let state = State::from_column_slice(&[
            cx,
            cy,
            detection.bbox.aspect(),
            detection.bbox.h,
            0.0,
            0.0,
            0.0,
            0.0,
        ]);

        let id = TrackerId(self.next_id);
        self.next_id += 1;

        let now = Instant::now();
        self.trackers.insert(
            id,
            Tracker {
                tracker_id: id,
                state,
                covariance: Covariance::identity(),
                hits: 1,
                misses: 0,
                last_update_frame: detection.frame_id,
                class_hint: detection.class,
                created_at: now,
                last_update_at: now,
            },
        );
        self.history.insert(id, VecDeque::new());
        Some(id)
    }

    /// Advances every tracker by one step and records its clamped
    /// predicted bbox under `frame_id`, so a detection for this frame that
    /// arrives later (after further predicts have moved the tracker on)
    /// can still be scored against the tracker's belief *at this frame*.
    /// Must be called exactly once per published frame, before
    /// publication.
    pub fn predict(
        &mut self,
        frame_id: FrameId,
        frame_w: f64,
        frame_h: f64,
    ) -> Result<Vec<(TrackerId, BBox)>> {
        if self.last_predict_frame == Some(frame_id) {
            return Err(EngineError::InvariantViolation(format!(
                "predict called twice for frame_id {:?}",
                frame_id
            )));
        }
        self.last_predict_frame = Some(frame_id);

        let mut out = Vec::with_capacity(self.trackers.len());
        for tracker in self.trackers.values_mut() {
            // kalman.enabled = false: skip the motion model entirely so
            // trackers hold position rather than projecting velocity.
            if self.config.enabled {
                tracker.state = self.f * tracker.state;
                tracker.covariance = self.f * tracker.covariance * self.f.transpose() + self.q;
            }
            if let Some(bbox) = tracker.predicted_bbox(frame_w, frame_h) {
                let history = self
                    .history
                    .entry(tracker.tracker_id)
                    .or_insert_with(VecDeque::new);
                history.push_back((frame_id, bbox));
                while history.len() > PREDICTION_HISTORY_LEN {
                    history.pop_front();
                }
                out.push((tracker.tracker_id, bbox));
            }
        }
        Ok(out)
    }

    /// The tracker's predicted bbox as of `frame_id`, looked up from
    /// history. Falls back to the tracker's current predicted bbox if
    /// `frame_id` fell off the history window or predates the tracker.
    pub fn predicted_bbox_at(
        &self,
        tracker_id: TrackerId,
        frame_id: FrameId,
        frame_w: f64,
        frame_h: f64,
    ) -> Option<BBox> {
        if let Some(bbox) = self
            .history
            .get(&tracker_id)
            .and_then(|h| h.iter().find(|(f, _)| *f == frame_id))
            .map(|(_, b)| *b)
        {
            return Some(bbox);
        }
        self.trackers
            .get(&tracker_id)
            .and_then(|t| t.predicted_bbox(frame_w, frame_h))
    }

    /// Standard Kalman correction with measurement `(cx, cy, aspect, h)`.
    /// A zero-height measurement is treated as a miss rather than applied.
    pub fn update(&mut self, tracker_id: TrackerId, detection: &Detection) {
        if detection.bbox.h <= 0.0 {
            self.miss(tracker_id);
            return;
        }
        let Some(tracker) = self.trackers.get_mut(&tracker_id) else {
            return;
        };

        if !self.config.enabled {
            // kalman.enabled = false: snap directly to the measurement
            // instead of blending it through the motion model.
            let (cx, cy) = detection.bbox.center();
            tracker.state[0] = cx;
            tracker.state[1] = cy;
            tracker.state[2] = detection.bbox.aspect();
            tracker.state[3] = detection.bbox.h;
            tracker.hits += 1;
            tracker.last_update_frame = detection.frame_id;
            tracker.last_update_at = Instant::now();
            return;
        }

        let z = Measurement::from_column_slice(&[
            detection.bbox.center().0,
            detection.bbox.center().1,
            detection.bbox.aspect(),
            detection.bbox.h,
        ]);

        let y = z - self.h * tracker.state;
        let s = self.h * tracker.covariance * self.h.transpose() + self.r;
        let Some(s_inv) = s.try_inverse() else {
            return;
        };
        let k = tracker.covariance * self.h.transpose() * s_inv;

        tracker.state += k * y;
        tracker.covariance = (Covariance::identity() - k * self.h) * tracker.covariance;
        tracker.hits += 1;
        tracker.last_update_frame = detection.frame_id;
        tracker.last_update_at = Instant::now();
    }

    /// Increments misses without updating state.
    pub fn miss(&mut self, tracker_id: TrackerId) {
        if let Some(tracker) = self.trackers.get_mut(&tracker_id) {
            tracker.misses += 1;
        }
    }

    /// Removes trackers exceeding the miss budget or max wallclock age.
    pub fn cleanup(&mut self) {
        let miss_budget = self.config.miss_budget;
        let max_age_ms = self.config.max_age_ms;
        self.trackers
            .retain(|_, t| t.misses < miss_budget && t.age_ms() <= max_age_ms);
        let live: std::collections::HashSet<_> = self.trackers.keys().copied().collect();
        self.history.retain(|id, _| live.contains(id));
    }

    pub fn get(&self, tracker_id: TrackerId) -> Option<&Tracker> {
        self.trackers.get(&tracker_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tracker> {
        self.trackers.values()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}
