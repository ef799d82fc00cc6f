//! Core data model: frames, bounding boxes, detections, and the small
//! newtypes that keep stream/tracker/region/batch identifiers from being
//! confused with one another.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Monotonically increasing per-stream frame identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

/// Identifies a single running stream engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies a Kalman tracker within a stream's Tracker Bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackerId(pub u32);

/// Identifies a region within a stream's Confidence Decay Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(pub u32);

/// Identifies a batch dispatched to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(pub u64);

/// Wallclock timestamp in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(dur.as_nanos() as i64)
    }

    pub fn millis_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0) / 1_000_000
    }
}

/// An axis-aligned bounding box in source-frame pixel coordinates.
///
/// Invariant: `w > 0 && h > 0`. Construct via [`BBox::new`], which returns
/// `None` for degenerate boxes rather than silently clamping them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Option<Self> {
        if w > 0.0 && h > 0.0 {
            Some(Self { x, y, w, h })
        } else {
            None
        }
    }

    /// Clamps this box to `[0, width] x [0, height]`, returning `None` if
    /// the clamp would degenerate the box (fully outside the frame).
    pub fn clamp(&self, width: f64, height: f64) -> Option<Self> {
        let x0 = self.x.max(0.0).min(width);
        let y0 = self.y.max(0.0).min(height);
        let x1 = (self.x + self.w).max(0.0).min(width);
        let y1 = (self.y + self.h).max(0.0).min(height);
        BBox::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Pads this box by `px` on every side. Does not clamp.
    pub fn dilate(&self, px: f64) -> Self {
        Self {
            x: self.x - px,
            y: self.y - px,
            w: self.w + 2.0 * px,
            h: self.h + 2.0 * px,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn aspect(&self) -> f64 {
        self.w / self.h
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    /// Intersection-over-union against another box.
    pub fn iou(&self, other: &BBox) -> f64 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.w).min(other.x + other.w);
        let y1 = (self.y + self.h).min(other.y + other.h);

        let inter_w = (x1 - x0).max(0.0);
        let inter_h = (y1 - y0).max(0.0);
        let inter = inter_w * inter_h;
        if inter <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Builds a box from a center point, aspect ratio (w/h), and height.
    pub fn from_center_aspect_height(cx: f64, cy: f64, aspect: f64, h: f64) -> Option<Self> {
        let w = aspect * h;
        Self::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }
}

/// A class label returned by the detector. Opaque beyond equality —
/// the core does not interpret class semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u16);

/// A detection returned by the detector service for a specific frame,
/// already rescaled into source-frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub frame_id: FrameId,
    pub bbox: BBox,
    pub class: ClassId,
    pub score: f32,
}

/// An immutable decoded video frame delivered by the Frame Source.
#[derive(Clone)]
pub struct Frame {
    pub frame_id: FrameId,
    pub timestamp: Timestamp,
    pub width: u32,
    pub height: u32,
    /// Packed RGB8 pixel buffer, row-major, `width * height * 3` bytes.
    pub pixels: Arc<Vec<u8>>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("timestamp", &self.timestamp)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl Frame {
    pub fn new(frame_id: FrameId, timestamp: Timestamp, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            frame_id,
            timestamp,
            width,
            height,
            pixels: Arc::new(pixels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BBox::new(10.0, 10.0, 50.0, 50.0).unwrap();
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let b = BBox::new(100.0, 100.0, 10.0, 10.0).unwrap();
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn clamp_drops_fully_out_of_bounds_box() {
        let a = BBox::new(-50.0, -50.0, 10.0, 10.0).unwrap();
        assert!(a.clamp(1280.0, 720.0).is_none());
    }

    #[test]
    fn clamp_keeps_partially_visible_box_non_negative() {
        let a = BBox::new(-5.0, -5.0, 20.0, 20.0).unwrap();
        let clamped = a.clamp(1280.0, 720.0).unwrap();
        assert!(clamped.x >= 0.0 && clamped.y >= 0.0);
    }

    #[test]
    fn degenerate_box_is_rejected() {
        assert!(BBox::new(0.0, 0.0, 0.0, 10.0).is_none());
        assert!(BBox::new(0.0, 0.0, 10.0, -1.0).is_none());
    }
}
