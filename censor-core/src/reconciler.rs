//! Associates a batch of detections with the tracker bank, reinforces the
//! decay store, and returns an updated blur set.
//!
//! Association scores each detection against each tracker's predicted
//! bbox *at the detection's own frame_id* (not the tracker's current,
//! possibly much-advanced belief), since detector responses can lag the
//! live lane by several frames. Greedy highest-IoU-first assignment,
//! ties broken by score then frame_id, matching the spec's tolerance for
//! either a Hungarian or greedy strategy at this stream count.

use crate::decay::ConfidenceDecayStore;
use crate::kalman::TrackerBank;
use crate::types::{BBox, Detection, FrameId, TrackerId};

/// Minimum IoU for a detection-tracker pair to be assignment-eligible at
/// all (spec §4.5 step 2). Below this, a detection is treated as
/// unmatched and spawns a new tracker rather than being forced onto the
/// nearest existing one.
const ASSOCIATION_IOU_THRESHOLD: f64 = 0.3;

/// One scored (detection, tracker) candidate pair.
struct Candidate {
    detection_index: usize,
    tracker_id: TrackerId,
    iou: f64,
}

/// Associates a frame's detections against the tracker bank and reinforces
/// the decay store with the result. `frame_w`/`frame_h` bound the predicted
/// bboxes used for scoring.
pub fn reconcile(
    trackers: &mut TrackerBank,
    decay: &mut ConfidenceDecayStore,
    detections: &[Detection],
    frame_w: f64,
    frame_h: f64,
) {
    let mut candidates = Vec::new();
    for (detection_index, detection) in detections.iter().enumerate() {
        for tracker in trackers.iter() {
            let Some(predicted) = trackers.predicted_bbox_at(
                tracker.tracker_id,
                detection.frame_id,
                frame_w,
                frame_h,
            ) else {
                continue;
            };
            let iou = predicted.iou(&detection.bbox);
            if iou >= ASSOCIATION_IOU_THRESHOLD {
                candidates.push(Candidate {
                    detection_index,
                    tracker_id: tracker.tracker_id,
                    iou,
                });
            }
        }
    }

    // Greedy: highest IoU first, ties broken by detection score then
    // frame_id so the match order is deterministic for a given batch.
    candidates.sort_by(|a, b| {
        b.iou
            .total_cmp(&a.iou)
            .then_with(|| {
                detections[b.detection_index]
                    .score
                    .total_cmp(&detections[a.detection_index].score)
            })
            .then_with(|| {
                detections[a.detection_index]
                    .frame_id
                    .0
                    .cmp(&detections[b.detection_index].frame_id.0)
            })
    });

    let mut matched_detections = vec![false; detections.len()];
    let mut matched_trackers = std::collections::HashSet::new();
    let mut assignment: Vec<Option<TrackerId>> = vec![None; detections.len()];

    for candidate in &candidates {
        if matched_detections[candidate.detection_index] || matched_trackers.contains(&candidate.tracker_id) {
            continue;
        }
        matched_detections[candidate.detection_index] = true;
        matched_trackers.insert(candidate.tracker_id);
        assignment[candidate.detection_index] = Some(candidate.tracker_id);
    }

    for (index, detection) in detections.iter().enumerate() {
        match assignment[index] {
            Some(tracker_id) => {
                trackers.update(tracker_id, detection);
                decay.refresh(detection, Some(tracker_id));
            }
            None => {
                let tracker_id = trackers.init(detection);
                decay.refresh(detection, tracker_id);
            }
        }
    }

    let unmatched: Vec<TrackerId> = trackers
        .iter()
        .filter(|t| !matched_trackers.contains(&t.tracker_id))
        .map(|t| t.tracker_id)
        .collect();
    for tracker_id in unmatched {
        trackers.miss(tracker_id);
    }

    trackers.cleanup();
}

/// Builds the blur set for this frame from the decay store alone — the
/// predict/decay/reconcile ordering means `get_blur_set` already reflects
/// any reconciliation done this frame.
pub fn blur_set(decay: &ConfidenceDecayStore, frame_w: f64, frame_h: f64) -> Vec<BBox> {
    decay.get_blur_set(frame_w, frame_h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecayConfig, KalmanConfig};
    use crate::types::{ClassId, FrameId as FId};

    fn det(frame: u64, x: f64, y: f64, w: f64, h: f64) -> Detection {
        Detection {
            frame_id: FId(frame),
            bbox: BBox::new(x, y, w, h).unwrap(),
            class: ClassId(0),
            score: 0.9,
        }
    }

    #[test]
    fn unmatched_detection_spawns_a_new_tracker() {
        let mut trackers = TrackerBank::new(KalmanConfig::default());
        let mut decay = ConfidenceDecayStore::new(DecayConfig::default());

        reconcile(&mut trackers, &mut decay, &[det(0, 10.0, 10.0, 20.0, 20.0)], 1000.0, 1000.0);

        assert_eq!(trackers.len(), 1);
        assert_eq!(decay.active_count(), 1);
    }

    #[test]
    fn reappearing_detection_reuses_the_same_tracker_via_predicted_history() {
        let mut trackers = TrackerBank::new(KalmanConfig::default());
        let mut decay = ConfidenceDecayStore::new(DecayConfig::default());

        reconcile(&mut trackers, &mut decay, &[det(0, 100.0, 100.0, 50.0, 50.0)], 10_000.0, 10_000.0);
        let tracker_id = trackers.iter().next().unwrap().tracker_id;

        trackers.predict(FrameId(1), 10_000.0, 10_000.0).unwrap();

        reconcile(&mut trackers, &mut decay, &[det(1, 101.0, 101.0, 50.0, 50.0)], 10_000.0, 10_000.0);

        assert_eq!(trackers.len(), 1, "should have reused the existing tracker");
        assert_eq!(trackers.iter().next().unwrap().tracker_id, tracker_id);
    }

    #[test]
    fn unmatched_tracker_accrues_a_miss() {
        let mut trackers = TrackerBank::new(KalmanConfig::default());
        let mut decay = ConfidenceDecayStore::new(DecayConfig::default());

        reconcile(&mut trackers, &mut decay, &[det(0, 10.0, 10.0, 20.0, 20.0)], 1000.0, 1000.0);
        let tracker_id = trackers.iter().next().unwrap().tracker_id;
        trackers.predict(FrameId(1), 1000.0, 1000.0).unwrap();

        reconcile(&mut trackers, &mut decay, &[], 1000.0, 1000.0);

        assert_eq!(trackers.get(tracker_id).unwrap().misses, 1);
    }

    #[test]
    fn detection_below_iou_threshold_spawns_a_new_tracker_instead_of_matching() {
        let mut trackers = TrackerBank::new(KalmanConfig::default());
        let mut decay = ConfidenceDecayStore::new(DecayConfig::default());

        reconcile(&mut trackers, &mut decay, &[det(0, 10.0, 10.0, 20.0, 20.0)], 1000.0, 1000.0);
        trackers.predict(FrameId(1), 1000.0, 1000.0).unwrap();

        // Barely overlaps the existing tracker's predicted box (IoU well
        // under the 0.3 eligibility floor) — should not be forced onto it.
        reconcile(&mut trackers, &mut decay, &[det(1, 28.0, 28.0, 20.0, 20.0)], 1000.0, 1000.0);

        assert_eq!(trackers.len(), 2, "a sub-threshold detection should spawn its own tracker");
    }
}
