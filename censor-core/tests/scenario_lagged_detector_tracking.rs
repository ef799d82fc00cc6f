//! A region moving at constant velocity, with the detector always a few
//! frames behind, should still be tracked by one continuous tracker whose
//! predicted position keeps pace once warmed up — the whole point of
//! scoring late detections against the tracker's *historical* belief
//! rather than its current one.

use censor_core::config::KalmanConfig;
use censor_core::decay::ConfidenceDecayStore;
use censor_core::kalman::TrackerBank;
use censor_core::reconciler::reconcile;
use censor_core::types::{BBox, ClassId, Detection, FrameId};

const FRAME_W: f64 = 1280.0;
const FRAME_H: f64 = 720.0;
const VELOCITY_PX_PER_FRAME: f64 = 2.0;
const START_X: f64 = 100.0;
const REPORT_STRIDE: u64 = 5;
const LAG_FRAMES: u64 = 2;
const BOX_SIZE: f64 = 60.0;

fn detection_for_frame(frame: u64) -> Detection {
    let x = START_X + VELOCITY_PX_PER_FRAME * frame as f64;
    Detection {
        frame_id: FrameId(frame),
        bbox: BBox::new(x, 200.0, BOX_SIZE, BOX_SIZE).unwrap(),
        class: ClassId(0),
        score: 0.9,
    }
}

#[test]
fn single_tracker_follows_a_constant_velocity_region_despite_reporting_lag() {
    let mut trackers = TrackerBank::new(KalmanConfig::default());
    let mut decay = ConfidenceDecayStore::new(Default::default());

    // Detections are generated every REPORT_STRIDE frames but arrive at
    // the reconciler LAG_FRAMES frames after the frame they describe —
    // the overlap between consecutive reported positions stays large
    // relative to the box size, so greedy IoU association never loses
    // the tracker even though the reports themselves are stale.
    let report_frames: Vec<u64> = (0..=50).step_by(REPORT_STRIDE as usize).collect();
    let mut pending: Vec<(u64, Detection)> = report_frames
        .iter()
        .map(|f| (*f + LAG_FRAMES, detection_for_frame(*f)))
        .collect();

    for frame in 0..60u64 {
        if frame > 0 {
            trackers.predict(FrameId(frame), FRAME_W, FRAME_H).unwrap();
        }

        pending.retain(|(deliver_at, detection)| {
            if *deliver_at == frame {
                reconcile(&mut trackers, &mut decay, std::slice::from_ref(detection), FRAME_W, FRAME_H);
                false
            } else {
                true
            }
        });

        if frame >= LAG_FRAMES {
            assert_eq!(trackers.len(), 1, "exactly one tracker should exist at frame {frame} once started");
        }
    }

    let tracker = trackers.iter().next().unwrap();
    let predicted = tracker.predicted_bbox(FRAME_W, FRAME_H).unwrap();
    let (cx, _) = predicted.center();

    let last_reported = *report_frames.last().unwrap();
    let expected = START_X + VELOCITY_PX_PER_FRAME * last_reported as f64 + BOX_SIZE / 2.0;
    assert!(
        (cx - expected).abs() < BOX_SIZE,
        "predicted center {cx} too far from last reinforced position {expected}"
    );
}
