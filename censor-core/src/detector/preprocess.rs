//! Frame downscaling and normalization applied before a frame enters the
//! Batch Collector. Fixed at 320x180 planar RGB, `[0, 1]` floats, per the
//! wire contract in §6 of the spec this crate implements.

use crate::types::Frame;
use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};

/// A downscaled, normalized copy of one source frame, ready for the
/// detector's request payload. Keeps the source dimensions alongside so
/// the detector client can rescale returned boxes back to source space.
#[derive(Debug, Clone)]
pub struct DownscaledFrame {
    pub width: u32,
    pub height: u32,
    /// Planar RGB, i.e. all R values, then all G, then all B, each in `[0, 1]`.
    pub planar_rgb: Vec<f32>,
    pub source_width: u32,
    pub source_height: u32,
}

/// Downscales a source frame to `(dst_w, dst_h)` and converts to
/// normalized planar RGB. Mandatory before dispatch; the detector's
/// model input resolution is fixed.
pub fn downscale_and_normalize(frame: &Frame, dst_w: u32, dst_h: u32) -> DownscaledFrame {
    let buffer: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.pixels.as_slice())
            .expect("frame pixel buffer must be width*height*3 RGB8 bytes");

    let resized = image::imageops::resize(&buffer, dst_w, dst_h, FilterType::Triangle);

    let plane_len = (dst_w * dst_h) as usize;
    let mut planar_rgb = vec![0.0f32; plane_len * 3];
    for (i, pixel) in resized.pixels().enumerate() {
        planar_rgb[i] = pixel.0[0] as f32 / 255.0;
        planar_rgb[plane_len + i] = pixel.0[1] as f32 / 255.0;
        planar_rgb[2 * plane_len + i] = pixel.0[2] as f32 / 255.0;
    }

    DownscaledFrame {
        width: dst_w,
        height: dst_h,
        planar_rgb,
        source_width: frame.width,
        source_height: frame.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FrameId, Timestamp};

    #[test]
    fn downscales_to_requested_dimensions() {
        let pixels = vec![128u8; 64 * 36 * 3];
        let frame = Frame::new(FrameId(0), Timestamp::now(), 64, 36, pixels);
        let out = downscale_and_normalize(&frame, 320, 180);
        assert_eq!(out.width, 320);
        assert_eq!(out.height, 180);
        assert_eq!(out.planar_rgb.len(), 320 * 180 * 3);
        assert!(out.planar_rgb.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn retains_source_dimensions_for_rescaling() {
        let pixels = vec![0u8; 1280 * 720 * 3];
        let frame = Frame::new(FrameId(0), Timestamp::now(), 1280, 720, pixels);
        let out = downscale_and_normalize(&frame, 320, 180);
        assert_eq!(out.source_width, 1280);
        assert_eq!(out.source_height, 720);
    }
}
