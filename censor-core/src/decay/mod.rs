//! Holds the "what to blur right now" set, independent of whether a fresh
//! detection arrived this frame. Exponential decay prevents both flicker
//! (a region vanishing for one frame between detector responses) and
//! leakage (a region disappearing before the next detection confirms it
//! is still unsafe).

use crate::config::DecayConfig;
use crate::types::{BBox, ClassId, Detection, RegionId, TrackerId};
use std::collections::HashMap;

/// An active blur region. The stored `bbox` is undilated; dilation is
/// applied only at [`ConfidenceDecayStore::get_blur_set`] time.
#[derive(Debug, Clone)]
pub struct Region {
    pub region_id: RegionId,
    pub bbox: BBox,
    pub confidence: f64,
    pub frames_since_update: u32,
    pub tracker_id: Option<TrackerId>,
    pub class: ClassId,
    /// Opaque detector-reported category label. The wire contract only
    /// defines a numeric `class_id`; this is a display-friendly tag
    /// derived from it (see DESIGN.md for why there's no separate wire
    /// field for it).
    pub kind: String,
}

pub struct ConfidenceDecayStore {
    regions: HashMap<RegionId, Region>,
    next_id: u32,
    config: DecayConfig,
}

impl std::fmt::Debug for ConfidenceDecayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidenceDecayStore")
            .field("active_regions", &self.regions.len())
            .finish()
    }
}

impl ConfidenceDecayStore {
    pub fn new(config: DecayConfig) -> Self {
        Self {
            regions: HashMap::new(),
            next_id: 0,
            config,
        }
    }

    /// Locates an existing region by `tracker_id`, else by IoU against
    /// existing regions' undilated bboxes; creates a new region if
    /// neither matches. Idempotent: refreshing the same detection
    /// back-to-back returns the same region at confidence 1.0.
    pub fn refresh(&mut self, detection: &Detection, tracker_id: Option<TrackerId>) -> RegionId {
        let existing = tracker_id
            .and_then(|tid| {
                self.regions
                    .values()
                    .find(|r| r.tracker_id == Some(tid))
                    .map(|r| r.region_id)
            })
            .or_else(|| self.best_iou_match(&detection.bbox));

        let region_id = existing.unwrap_or_else(|| {
            let id = RegionId(self.next_id);
            self.next_id += 1;
            id
        });

        let region = self.regions.entry(region_id).or_insert_with(|| Region {
            region_id,
            bbox: detection.bbox,
            confidence: 1.0,
            frames_since_update: 0,
            tracker_id,
            class: detection.class,
            kind: format!("class_{}", detection.class.0),
        });

        region.bbox = detection.bbox;
        region.confidence = 1.0;
        region.frames_since_update = 0;
        region.tracker_id = tracker_id.or(region.tracker_id);
        region.class = detection.class;

        region_id
    }

    fn best_iou_match(&self, bbox: &BBox) -> Option<RegionId> {
        self.regions
            .values()
            .map(|r| (r.region_id, r.bbox.iou(bbox)))
            .filter(|(_, iou)| *iou >= self.config.association_iou_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Called once per published frame: decays every region's confidence
    /// and drops any that fall below `min_confidence`.
    pub fn tick(&mut self) {
        let rate = self.config.rate;
        let floor = self.config.min_confidence;
        for region in self.regions.values_mut() {
            region.confidence *= rate;
            region.frames_since_update += 1;
        }
        self.regions.retain(|_, r| r.confidence >= floor);
    }

    /// Dilated, clamped bboxes of every active region, in a stable
    /// (region_id-sorted) order to aid debugging.
    pub fn get_blur_set(&self, frame_w: f64, frame_h: f64) -> Vec<BBox> {
        let mut ids: Vec<_> = self.regions.keys().copied().collect();
        ids.sort_by_key(|id| id.0);
        ids.into_iter()
            .filter_map(|id| {
                let region = &self.regions[&id];
                region.bbox.dilate(self.config.dilation_px).clamp(frame_w, frame_h)
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.regions.len()
    }

    pub fn get(&self, region_id: RegionId) -> Option<&Region> {
        self.regions.get(&region_id)
    }
}
