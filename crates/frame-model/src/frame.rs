//! Frames and frame sequences.

use std::sync::Arc;

use cinemagraph_common::clock::TimestampNs;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// A single captured raster.
///
/// The pixel buffer sits behind an `Arc` so a frame selected more than
/// once (resampling can repeat a source frame) is not copied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "FrameRepr", try_from = "FrameRepr")]
pub struct Frame {
    pixels: Arc<RgbaImage>,
    timestamp_ns: TimestampNs,
}

impl Frame {
    pub fn new(pixels: RgbaImage, timestamp_ns: TimestampNs) -> Self {
        Self {
            pixels: Arc::new(pixels),
            timestamp_ns,
        }
    }

    /// A frame filled with one RGBA color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4], timestamp_ns: TimestampNs) -> Self {
        Self::new(
            RgbaImage::from_pixel(width, height, image::Rgba(rgba)),
            timestamp_ns,
        )
    }

    /// Build a frame from a raw RGBA8 buffer.
    pub fn from_raw(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_ns: TimestampNs,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        if actual != expected {
            return Err(FrameError::InvalidBuffer { expected, actual });
        }
        let pixels = RgbaImage::from_raw(width, height, data)
            .ok_or(FrameError::InvalidBuffer { expected, actual })?;
        Ok(Self::new(pixels, timestamp_ns))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn timestamp_ns(&self) -> TimestampNs {
        self.timestamp_ns
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Interleaved RGBA8 samples, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    /// Replace the pixels, keeping the timestamp. This is the only way a
    /// frame's content changes, and it yields a new frame.
    pub fn with_pixels(&self, pixels: RgbaImage) -> Result<Frame, FrameError> {
        if pixels.dimensions() != self.dimensions() {
            return Err(FrameError::DimensionMismatch {
                index: 0,
                expected: self.dimensions(),
                found: pixels.dimensions(),
            });
        }
        Ok(Frame::new(pixels, self.timestamp_ns))
    }

    /// Take the pixel buffer, copying only if it is still shared.
    pub fn into_image(self) -> RgbaImage {
        Arc::try_unwrap(self.pixels).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Whether both frames point at the same pixel buffer.
    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

#[derive(Serialize, Deserialize)]
struct FrameRepr {
    width: u32,
    height: u32,
    #[serde(default)]
    timestamp_ns: TimestampNs,
    data: Vec<u8>,
}

impl From<Frame> for FrameRepr {
    fn from(frame: Frame) -> Self {
        let (width, height) = frame.dimensions();
        let timestamp_ns = frame.timestamp_ns;
        Self {
            width,
            height,
            timestamp_ns,
            data: frame.into_image().into_raw(),
        }
    }
}

impl TryFrom<FrameRepr> for Frame {
    type Error = FrameError;

    fn try_from(repr: FrameRepr) -> Result<Self, Self::Error> {
        Frame::from_raw(repr.width, repr.height, repr.data, repr.timestamp_ns)
    }
}

/// Ordered frames sharing one width and height.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSequence {
    frames: Vec<Frame>,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sequence, rejecting any frame whose size differs from the first.
    pub fn from_frames(frames: Vec<Frame>) -> Result<Self, FrameError> {
        if let Some(first) = frames.first() {
            let expected = first.dimensions();
            if let Some((index, bad)) = frames
                .iter()
                .enumerate()
                .find(|(_, f)| f.dimensions() != expected)
            {
                return Err(FrameError::DimensionMismatch {
                    index,
                    expected,
                    found: bad.dimensions(),
                });
            }
        }
        Ok(Self { frames })
    }

    pub fn push(&mut self, frame: Frame) -> Result<(), FrameError> {
        if let Some(expected) = self.dimensions() {
            if frame.dimensions() != expected {
                return Err(FrameError::DimensionMismatch {
                    index: self.frames.len(),
                    expected,
                    found: frame.dimensions(),
                });
            }
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Shared width and height, or `None` for an empty sequence.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames.first().map(Frame::dimensions)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// The canonical frozen reference.
    pub fn first(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

impl<'a> IntoIterator for &'a FrameSequence {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Errors raised by frame and mask construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame {index} is {found:?}, expected {expected:?}")]
    DimensionMismatch {
        index: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("Pixel buffer holds {actual} bytes, expected {expected}")]
    InvalidBuffer { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];

    #[test]
    fn solid_frame_reports_dimensions_and_pixels() {
        let frame = Frame::solid(4, 3, RED, 42);
        assert_eq!(frame.dimensions(), (4, 3));
        assert_eq!(frame.timestamp_ns(), 42);
        assert_eq!(frame.pixel(3, 2), RED);
        assert_eq!(frame.as_raw().len(), 4 * 3 * 4);
    }

    #[test]
    fn timestamps_use_capture_clock_units() {
        use cinemagraph_common::clock::CaptureClock;

        let frame = Frame::solid(1, 1, RED, CaptureClock::secs_to_ns(0.5));
        assert_eq!(frame.timestamp_ns(), 500_000_000);
        assert_eq!(CaptureClock::ns_to_secs(frame.timestamp_ns()), 0.5);
    }

    #[test]
    fn from_raw_rejects_oversized_buffer() {
        let err = Frame::from_raw(1, 1, (1..=8).collect(), 0).unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidBuffer {
                expected: 4,
                actual: 8
            }
        );

        let wire = serde_json::json!({"width": 1, "height": 1, "data": [1, 2, 3, 4, 5, 6, 7, 8]});
        assert!(serde_json::from_value::<Frame>(wire).is_err());
    }

    #[test]
    fn from_raw_rejects_short_buffer() {
        let err = Frame::from_raw(2, 2, vec![0; 15], 0).unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidBuffer {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn clones_share_pixels_until_replaced() {
        let frame = Frame::solid(2, 2, RED, 0);
        let copy = frame.clone();
        assert!(copy.shares_pixels_with(&frame));

        let replaced = frame
            .with_pixels(RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 255, 255])))
            .unwrap();
        assert!(!replaced.shares_pixels_with(&frame));
        assert_eq!(frame.pixel(0, 0), RED);
        assert_eq!(replaced.pixel(0, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn with_pixels_rejects_resize() {
        let frame = Frame::solid(2, 2, RED, 0);
        assert!(frame.with_pixels(RgbaImage::new(3, 2)).is_err());
    }

    #[test]
    fn sequence_rejects_mismatched_dimensions() {
        let mut seq = FrameSequence::new();
        assert_eq!(seq.dimensions(), None);
        seq.push(Frame::solid(4, 4, RED, 0)).unwrap();
        let err = seq.push(Frame::solid(4, 5, RED, 1)).unwrap_err();
        assert_eq!(
            err,
            FrameError::DimensionMismatch {
                index: 1,
                expected: (4, 4),
                found: (4, 5)
            }
        );
        assert_eq!(seq.len(), 1);

        let err = FrameSequence::from_frames(vec![
            Frame::solid(2, 2, RED, 0),
            Frame::solid(2, 2, RED, 1),
            Frame::solid(1, 2, RED, 2),
        ])
        .unwrap_err();
        assert!(matches!(err, FrameError::DimensionMismatch { index: 2, .. }));
    }

    #[test]
    fn frame_serializes_as_raw_buffer() {
        let frame = Frame::solid(1, 1, [1, 2, 3, 4], 7);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["width"], 1);
        assert_eq!(json["data"], serde_json::json!([1, 2, 3, 4]));

        let parsed: Frame = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, frame);

        let bad = serde_json::json!({"width": 2, "height": 2, "data": [0, 0, 0, 0]});
        assert!(serde_json::from_value::<Frame>(bad).is_err());
    }
}
