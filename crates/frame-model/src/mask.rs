//! Freeze-zone masks drawn by the operator.
//!
//! A mask is a single-channel opacity grid the size of the frames it
//! applies to. 0 leaves a pixel fully dynamic; 255 freezes it to the
//! reference frame.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_circle_mut;
use serde::{Deserialize, Serialize};

use crate::frame::FrameError;

/// Per-pixel freeze strength.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMask {
    alpha: GrayImage,
}

impl ZoneMask {
    /// An all-zero (fully dynamic) mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            alpha: GrayImage::new(width, height),
        }
    }

    /// A mask with every pixel set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            alpha: GrayImage::from_pixel(width, height, Luma([value])),
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        let actual = data.len();
        if actual != expected {
            return Err(FrameError::InvalidBuffer { expected, actual });
        }
        let alpha = GrayImage::from_raw(width, height, data)
            .ok_or(FrameError::InvalidBuffer { expected, actual })?;
        Ok(Self { alpha })
    }

    pub fn width(&self) -> u32 {
        self.alpha.width()
    }

    pub fn height(&self) -> u32 {
        self.alpha.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.alpha.dimensions()
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.alpha.get_pixel(x, y).0[0]
    }

    /// Row-major alpha values.
    pub fn as_raw(&self) -> &[u8] {
        self.alpha.as_raw()
    }

    /// True when no pixel is frozen at all.
    pub fn is_clear(&self) -> bool {
        self.alpha.as_raw().iter().all(|&a| a == 0)
    }

    /// Fraction of pixels with non-zero freeze strength.
    pub fn coverage(&self) -> f64 {
        let total = self.alpha.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        let frozen = self.alpha.as_raw().iter().filter(|&&a| a > 0).count();
        frozen as f64 / total as f64
    }

    /// Set every pixel of a rectangle to `value`, clipped to the mask.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, value: u8) {
        let x_end = x.saturating_add(width).min(self.width());
        let y_end = y.saturating_add(height).min(self.height());
        for py in y.min(y_end)..y_end {
            for px in x.min(x_end)..x_end {
                self.alpha.put_pixel(px, py, Luma([value]));
            }
        }
    }

    /// Paint a brush stroke. Covered pixels keep the stronger of their
    /// current value and the stroke opacity.
    pub fn paint(&mut self, stroke: &Stroke) {
        let footprint = self.footprint(stroke);
        for (dst, covered) in self.alpha.iter_mut().zip(footprint.iter()) {
            if *covered > 0 {
                *dst = (*dst).max(stroke.opacity);
            }
        }
    }

    /// Clear every pixel a stroke covers back to fully dynamic.
    pub fn erase(&mut self, stroke: &Stroke) {
        let footprint = self.footprint(stroke);
        for (dst, covered) in self.alpha.iter_mut().zip(footprint.iter()) {
            if *covered > 0 {
                *dst = 0;
            }
        }
    }

    /// Pixels touched by the stroke's discs, as 255 on a zero layer.
    fn footprint(&self, stroke: &Stroke) -> GrayImage {
        let (width, height) = self.dimensions();
        let mut layer = GrayImage::new(width, height);
        let radius = stroke.clamped_radius(width, height).round() as i32;
        for (cx, cy) in stroke.stamps(width, height) {
            draw_filled_circle_mut(
                &mut layer,
                (cx.round() as i32, cy.round() as i32),
                radius,
                Luma([255]),
            );
        }
        layer
    }
}

/// A brush path in mask pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<(f32, f32)>,
    pub radius: f32,
    pub opacity: u8,
}

impl Stroke {
    pub fn new(points: Vec<(f32, f32)>, radius: f32, opacity: u8) -> Self {
        Self {
            points,
            radius,
            opacity,
        }
    }

    /// Brush radius usable on a `width` x `height` mask, between 0 and
    /// `width + height`.
    fn clamped_radius(&self, width: u32, height: u32) -> f32 {
        let limit = (width as f32 + height as f32).max(1.0);
        if self.radius.is_nan() {
            return 0.0;
        }
        self.radius.clamp(0.0, limit)
    }

    /// Disc centers covering the path on a `width` x `height` mask, at
    /// most half a radius apart.
    ///
    /// Segments are clipped to the mask grown by the brush radius, so the
    /// stamp count depends on the mask size and not on how far the path
    /// wanders off it. Non-finite points are skipped.
    pub fn stamps(&self, width: u32, height: u32) -> Vec<(f32, f32)> {
        let radius = self.clamped_radius(width, height);
        let spacing = (radius / 2.0).max(0.5);
        let margin = radius + 1.0;
        let bounds = Bounds {
            min: (-margin, -margin),
            max: (width as f32 + margin, height as f32 + margin),
        };

        let points: Vec<(f32, f32)> = self
            .points
            .iter()
            .copied()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();

        let mut stamps = Vec::new();
        if let [only] = points.as_slice() {
            if bounds.contains(*only) {
                stamps.push(*only);
            }
            return stamps;
        }

        for pair in points.windows(2) {
            let Some(((x0, y0), (x1, y1))) = bounds.clip(pair[0], pair[1]) else {
                continue;
            };
            if stamps.last() != Some(&(x0, y0)) {
                stamps.push((x0, y0));
            }
            let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
            let steps = (length / spacing).ceil().max(1.0) as usize;
            for step in 1..=steps {
                let t = step as f32 / steps as f32;
                stamps.push((x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
            }
        }
        stamps
    }
}

/// Axis-aligned region strokes are clipped to.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: (f32, f32),
    max: (f32, f32),
}

impl Bounds {
    fn contains(&self, (x, y): (f32, f32)) -> bool {
        (self.min.0..=self.max.0).contains(&x) && (self.min.1..=self.max.1).contains(&y)
    }

    /// Liang-Barsky clip of the segment `a`-`b`. `None` when it misses.
    fn clip(&self, a: (f32, f32), b: (f32, f32)) -> Option<((f32, f32), (f32, f32))> {
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let edges = [
            (-dx, a.0 - self.min.0),
            (dx, self.max.0 - a.0),
            (-dy, a.1 - self.min.1),
            (dy, self.max.1 - a.1),
        ];
        let (mut enter, mut exit) = (0.0f32, 1.0f32);
        for (p, q) in edges {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                enter = enter.max(r);
            } else {
                exit = exit.min(r);
            }
            if enter > exit {
                return None;
            }
        }
        let at = |t: f32| (a.0 + dx * t, a.1 + dy * t);
        Some((at(enter), at(exit)))
    }
}

/// A freeze zone: a mask plus its playback speed.
///
/// Only speed 0 (freeze) has defined compositing behavior. Other speeds
/// are carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub mask: ZoneMask,
    pub speed: f32,
}

impl Zone {
    pub fn freeze(mask: ZoneMask) -> Self {
        Self { mask, speed: 0.0 }
    }

    pub fn with_speed(mask: ZoneMask, speed: f32) -> Self {
        Self { mask, speed }
    }

    pub fn is_freeze(&self) -> bool {
        self.speed == 0.0
    }
}
