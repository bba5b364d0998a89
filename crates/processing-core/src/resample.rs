//! Temporal resampling from an irregular capture rate to a fixed playback rate.
//!
//! Selection is floor-index sampling with a fractional stride, not time
//! interpolation. Keep it that way: the same capture must always yield the
//! same output frames.

use cinemagraph_common::error::{CinemagraphError, CinemagraphResult};
use cinemagraph_frame_model::{Frame, FrameSequence};

/// Number of output frames for a capture of `duration_secs` at `fps`.
///
/// `floor(duration * fps)`; non-positive or non-finite inputs give 0.
pub fn target_frame_count(duration_secs: f64, fps: f64) -> usize {
    if !duration_secs.is_finite() || !fps.is_finite() || duration_secs <= 0.0 || fps <= 0.0 {
        return 0;
    }
    (duration_secs * fps).floor() as usize
}

/// Source indices selected from `raw_count` captured frames.
///
/// The output has `min(target, raw_count)` entries, non-decreasing, each
/// below `raw_count`. Either count being zero gives an empty selection.
pub fn resample_indices(raw_count: usize, duration_secs: f64, fps: f64) -> Vec<usize> {
    let target = target_frame_count(duration_secs, fps);
    if raw_count == 0 || target == 0 {
        return Vec::new();
    }

    let increment = raw_count as f64 / target as f64;
    let mut cursor = 0.0_f64;
    let mut indices = Vec::with_capacity(target.min(raw_count));

    while indices.len() < target && indices.len() < raw_count {
        let mut index = cursor.floor() as usize;
        if index >= raw_count {
            tracing::debug!(index, raw_count, "Resample cursor overran, clamping");
            index = raw_count - 1;
        }
        indices.push(index);
        cursor += increment;
    }

    indices
}

/// Resamples captures to a fixed frame rate.
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    fps: f64,
}

impl Resampler {
    pub fn new(fps: f64) -> Self {
        Self { fps }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Select the output frames from a raw capture, consuming it.
    ///
    /// Selected frames keep their capture timestamps. A repeated index
    /// shares the pixel buffer rather than copying it.
    pub fn resample(&self, raw: Vec<Frame>, duration_secs: f64) -> CinemagraphResult<FrameSequence> {
        let indices = resample_indices(raw.len(), duration_secs, self.fps);
        let selected: Vec<Frame> = indices.iter().map(|&i| raw[i].clone()).collect();

        tracing::info!(
            raw = raw.len(),
            selected = selected.len(),
            duration_secs,
            fps = self.fps,
            "Resampled capture"
        );

        FrameSequence::from_frames(selected)
            .map_err(|e| CinemagraphError::processing(format!("Resampled frames disagree: {e}")))
    }
}
