//! Frame container.
//!
//! - `Frame`: RGB8 pixels plus dimensions and a process-wide unique `FrameId`.
//! - `FrameId`: monotonically increasing identifier used to scope detection caches.
//!
//! Frames are built from raw pixels (tests, replay) or decoded from an encoded
//! image (live sources). The detection layer re-encodes them as JPEG for the
//! external classifier; handlers may read pixel regions for orientation checks.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::sync::atomic::{AtomicU64, Ordering};

const JPEG_QUALITY: u8 = 95;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Unique, monotonically increasing frame identifier.
///
/// Ids are allocated from a process-wide counter so two sessions sharing one
/// classifier selector never collide in its per-frame cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> Self {
        FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One video frame in RGB8, row-major.
pub struct Frame {
    id: FrameId,
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap raw RGB8 pixels. The buffer length must be `width * height * 3`.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }
        Ok(Self {
            id: FrameId::next(),
            pixels,
            width,
            height,
        })
    }

    /// Uniform frame filled with one RGB colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let count = (width as usize) * (height as usize);
        let mut pixels = Vec::with_capacity(count * 3);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(pixels, width, height)
    }

    /// Decode an encoded image (JPEG/PNG) into a frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).context("decode frame image")?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height)
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Encode the frame as JPEG for the detection backend.
    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
            .write_image(&self.pixels, self.width, self.height, ExtendedColorType::Rgb8)
            .context("encode frame as jpeg")?;
        Ok(out)
    }

    /// RGB value at a pixel. Returns `None` outside the frame.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    /// Set the RGB value of every pixel inside `[x1, y1, x2, y2)`, clamped to the frame.
    pub fn paint_rect(&mut self, rect: [u32; 4], rgb: [u8; 3]) {
        let x2 = rect[2].min(self.width);
        let y2 = rect[3].min(self.height);
        for y in rect[1]..y2 {
            for x in rect[0]..x2 {
                let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
                self.pixels[idx..idx + 3].copy_from_slice(&rgb);
            }
        }
    }

    /// Grayscale crop of a pixel-space bounding box, clamped to the frame.
    ///
    /// Returns `None` when the clamped box is empty.
    pub fn gray_crop(&self, bbox: [f32; 4]) -> Option<GrayImage> {
        let clamp_x = |v: f32| v.max(0.0).min(self.width as f32) as u32;
        let clamp_y = |v: f32| v.max(0.0).min(self.height as f32) as u32;
        let (x1, x2) = (clamp_x(bbox[0]), clamp_x(bbox[2]));
        let (y1, y2) = (clamp_y(bbox[1]), clamp_y(bbox[3]));
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        let width = (x2 - x1) as usize;
        let height = (y2 - y1) as usize;
        let mut luma = Vec::with_capacity(width * height);
        for y in y1..y2 {
            for x in x1..x2 {
                let [r, g, b] = self.rgb_at(x, y)?;
                let value = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                luma.push(value.round().min(255.0) as u8);
            }
        }
        Some(GrayImage {
            luma,
            width,
            height,
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Row-major 8-bit luma image.
#[derive(Clone, Debug)]
pub struct GrayImage {
    luma: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl GrayImage {
    pub fn row(&self, y: usize) -> &[u8] {
        &self.luma[y * self.width..(y + 1) * self.width]
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_buffer_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
        assert!(Frame::new(Vec::new(), 0, 0).is_err());
    }

    #[test]
    fn frame_ids_increase() {
        let a = Frame::filled(4, 4, [0, 0, 0]).unwrap();
        let b = Frame::filled(4, 4, [0, 0, 0]).unwrap();
        assert!(b.id() > a.id());
    }

    #[test]
    fn gray_crop_clamps_to_frame() {
        let mut frame = Frame::filled(10, 10, [255, 255, 255]).unwrap();
        frame.paint_rect([0, 0, 10, 5], [0, 0, 0]);

        let crop = frame.gray_crop([-5.0, 3.0, 20.0, 7.0]).expect("crop");
        assert_eq!(crop.width, 10);
        assert_eq!(crop.height, 4);
        assert!(crop.row(0).iter().all(|&v| v == 0));
        assert!(crop.row(3).iter().all(|&v| v == 255));

        assert!(frame.gray_crop([12.0, 0.0, 15.0, 5.0]).is_none());
    }

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let frame = Frame::filled(32, 16, [120, 40, 200]).unwrap();
        let jpeg = frame.encode_jpeg().unwrap();
        let decoded = Frame::decode(&jpeg).unwrap();
        assert_eq!((decoded.width, decoded.height), (32, 16));
        assert_ne!(decoded.id(), frame.id());
    }
}
