//! Freeze-zone compositing.
//!
//! Every frame of a sequence is blended toward the sequence's first frame,
//! weighted per pixel by each zone's mask. Output frames are new buffers;
//! the input sequence is never written.

use cinemagraph_common::config::BlendMode;
use cinemagraph_common::error::{CinemagraphError, CinemagraphResult};
use cinemagraph_frame_model::{Frame, FrameSequence, Zone, ZoneMask};
use rayon::prelude::*;

/// Blend one channel toward the reference.
///
/// Multiply in floating point, then round. Alpha 1.0 returns `reference`
/// exactly.
#[inline]
pub fn blend_channel(reference: u8, original: u8, alpha: f32) -> u8 {
    let value = alpha * reference as f32 + (1.0 - alpha) * original as f32;
    value.round().clamp(0.0, 255.0) as u8
}

/// Applies freeze zones to resampled sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct Compositor {
    blend: BlendMode,
}

impl Compositor {
    pub fn new(blend: BlendMode) -> Self {
        Self { blend }
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend
    }

    /// Composite `zones` into every frame of `sequence`.
    ///
    /// Zones apply in order; where they overlap, the later zone blends on
    /// top of the earlier result. The reference is the first frame as it
    /// was before any zone was applied.
    pub fn composite(
        &self,
        sequence: FrameSequence,
        zones: &[Zone],
    ) -> CinemagraphResult<FrameSequence> {
        let Some(dims) = sequence.dimensions() else {
            return Ok(sequence);
        };

        for (index, zone) in zones.iter().enumerate() {
            if zone.mask.dimensions() != dims {
                return Err(CinemagraphError::processing(format!(
                    "Zone {index} mask is {:?} but frames are {:?}",
                    zone.mask.dimensions(),
                    dims
                )));
            }
            if !zone.is_freeze() {
                tracing::debug!(
                    index,
                    speed = zone.speed,
                    "Zone speed has no compositing effect yet; treating as freeze"
                );
            }
        }

        let active: Vec<&ZoneMask> = zones
            .iter()
            .map(|z| &z.mask)
            .filter(|m| !m.is_clear())
            .collect();
        if active.is_empty() {
            tracing::info!(frames = sequence.len(), "No frozen pixels, passing sequence through");
            return Ok(sequence);
        }

        let frames = sequence.into_frames();
        let reference = frames[0].clone();

        tracing::info!(
            frames = frames.len(),
            zones = active.len(),
            width = dims.0,
            height = dims.1,
            blend = ?self.blend,
            "Compositing freeze zones"
        );

        let mut composited = Vec::with_capacity(frames.len());
        for frame in &frames {
            composited.push(self.composite_frame(frame, &reference, &active)?);
        }

        FrameSequence::from_frames(composited)
            .map_err(|e| CinemagraphError::processing(format!("Composited frames disagree: {e}")))
    }

    fn composite_frame(
        &self,
        frame: &Frame,
        reference: &Frame,
        masks: &[&ZoneMask],
    ) -> CinemagraphResult<Frame> {
        let width = frame.width() as usize;
        let row_len = width * 4;
        let mut pixels = frame.image().clone();

        if row_len > 0 {
            for mask in masks {
                let blend = self.blend;
                pixels
                    .par_chunks_mut(row_len)
                    .zip(reference.as_raw().par_chunks(row_len))
                    .zip(mask.as_raw().par_chunks(width))
                    .for_each(|((dst, ref_row), mask_row)| {
                        blend_row(dst, ref_row, mask_row, blend);
                    });
            }
        }

        frame
            .with_pixels(pixels)
            .map_err(|e| CinemagraphError::processing(e.to_string()))
    }
}

fn blend_row(dst: &mut [u8], reference: &[u8], mask: &[u8], blend: BlendMode) {
    for ((px, rf), &m) in dst
        .chunks_exact_mut(4)
        .zip(reference.chunks_exact(4))
        .zip(mask.iter())
    {
        if m == 0 {
            continue;
        }
        match blend {
            BlendMode::Overwrite => px[..3].copy_from_slice(&rf[..3]),
            BlendMode::Weighted => {
                let alpha = m as f32 / 255.0;
                for c in 0..3 {
                    px[c] = blend_channel(rf[c], px[c], alpha);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use proptest::prelude::*;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn gradient_frame(seed: u8, width: u32, height: u32, ts: u64) -> Frame {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([
                seed.wrapping_add(x as u8 * 7),
                seed.wrapping_mul(3).wrapping_add(y as u8 * 11),
                (x as u8 ^ y as u8).wrapping_add(seed),
                200,
            ])
        });
        Frame::new(img, ts)
    }

    fn sequence(count: u8) -> FrameSequence {
        FrameSequence::from_frames(
            (0..count)
                .map(|i| gradient_frame(i.wrapping_mul(37), 6, 5, i as u64))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn clear_mask_is_pass_through() {
        let seq = sequence(4);
        let out = Compositor::default()
            .composite(seq.clone(), &[Zone::freeze(ZoneMask::new(6, 5))])
            .unwrap();
        assert_eq!(out, seq);
    }

    #[test]
    fn full_mask_freezes_to_first_frame() {
        let seq = sequence(4);
        let reference = seq.get(0).unwrap().clone();
        let out = Compositor::default()
            .composite(seq, &[Zone::freeze(ZoneMask::filled(6, 5, 255))])
            .unwrap();
        for frame in &out {
            for (px, rf) in frame.as_raw().chunks(4).zip(reference.as_raw().chunks(4)) {
                assert_eq!(&px[..3], &rf[..3]);
                assert_eq!(px[3], 200);
            }
        }
    }

    #[test]
    fn left_half_zone_freezes_only_left_half() {
        let frame0 = Frame::solid(4, 2, RED, 0);
        let frame1 = Frame::solid(4, 2, BLUE, 1);
        let seq = FrameSequence::from_frames(vec![frame0, frame1.clone()]).unwrap();
        let mut mask = ZoneMask::new(4, 2);
        mask.fill_rect(0, 0, 2, 2, 255);

        let out = Compositor::default()
            .composite(seq, &[Zone::freeze(mask)])
            .unwrap();
        let composited = out.get(1).unwrap();
        for y in 0..2 {
            assert_eq!(composited.pixel(0, y), RED);
            assert_eq!(composited.pixel(1, y), RED);
            assert_eq!(composited.pixel(2, y), BLUE);
            assert_eq!(composited.pixel(3, y), BLUE);
        }
        // The input frame was not written.
        assert_eq!(frame1.pixel(0, 0), BLUE);
        assert!(!composited.shares_pixels_with(&frame1));
        assert_eq!(composited.timestamp_ns(), 1);
    }

    #[test]
    fn half_alpha_averages() {
        let seq = FrameSequence::from_frames(vec![
            Frame::solid(1, 1, [200, 0, 100, 255], 0),
            Frame::solid(1, 1, [0, 201, 50, 255], 1),
        ])
        .unwrap();
        let out = Compositor::default()
            .composite(seq, &[Zone::freeze(ZoneMask::filled(1, 1, 128))])
            .unwrap();
        let px = out.get(1).unwrap().pixel(0, 0);
        for (got, want) in px[..3].iter().zip([100.0f32, 100.5, 75.0]) {
            assert!((*got as f32 - want).abs() <= 1.0, "{got} vs {want}");
        }
    }

    #[test]
    fn overwrite_mode_copies_reference_for_any_alpha() {
        let seq = FrameSequence::from_frames(vec![
            Frame::solid(2, 1, RED, 0),
            Frame::solid(2, 1, BLUE, 1),
        ])
        .unwrap();
        let mut mask = ZoneMask::new(2, 1);
        mask.fill_rect(0, 0, 1, 1, 1);
        let out = Compositor::new(BlendMode::Overwrite)
            .composite(seq, &[Zone::freeze(mask)])
            .unwrap();
        assert_eq!(out.get(1).unwrap().pixel(0, 0), RED);
        assert_eq!(out.get(1).unwrap().pixel(1, 0), BLUE);
    }

    #[test]
    fn later_zone_blends_over_earlier_result() {
        let seq = FrameSequence::from_frames(vec![
            Frame::solid(1, 1, [200, 200, 200, 255], 0),
            Frame::solid(1, 1, [0, 0, 0, 255], 1),
        ])
        .unwrap();
        let zones = [
            Zone::freeze(ZoneMask::filled(1, 1, 255)),
            Zone::freeze(ZoneMask::filled(1, 1, 128)),
        ];
        let out = Compositor::default().composite(seq, &zones).unwrap();
        // First zone freezes to 200; blending 200 with reference 200 stays 200.
        assert_eq!(out.get(1).unwrap().pixel(0, 0), [200, 200, 200, 255]);
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let err = Compositor::default()
            .composite(sequence(2), &[Zone::freeze(ZoneMask::filled(3, 3, 255))])
            .unwrap_err();
        assert!(matches!(err, CinemagraphError::Processing { .. }));
    }

    #[test]
    fn empty_sequence_and_no_zones_pass_through() {
        let out = Compositor::default()
            .composite(FrameSequence::new(), &[Zone::freeze(ZoneMask::filled(2, 2, 255))])
            .unwrap();
        assert!(out.is_empty());

        let seq = sequence(3);
        assert_eq!(Compositor::default().composite(seq.clone(), &[]).unwrap(), seq);
    }

    #[test]
    fn nonzero_speed_still_freezes() {
        let seq = FrameSequence::from_frames(vec![
            Frame::solid(1, 1, RED, 0),
            Frame::solid(1, 1, BLUE, 1),
        ])
        .unwrap();
        let out = Compositor::default()
            .composite(seq, &[Zone::with_speed(ZoneMask::filled(1, 1, 255), 0.5)])
            .unwrap();
        assert_eq!(out.get(1).unwrap().pixel(0, 0), RED);
    }

    proptest! {
        #[test]
        fn blend_boundaries_are_exact(reference in any::<u8>(), original in any::<u8>()) {
            prop_assert_eq!(blend_channel(reference, original, 0.0), original);
            prop_assert_eq!(blend_channel(reference, original, 1.0), reference);
        }

        #[test]
        fn half_alpha_within_rounding_tolerance(reference in any::<u8>(), original in any::<u8>()) {
            let got = blend_channel(reference, original, 128.0 / 255.0) as f32;
            let want = (0.5 * reference as f32 + 0.5 * original as f32).round();
            prop_assert!((got - want).abs() <= 1.0);
        }

        #[test]
        fn blend_stays_between_inputs(
            reference in any::<u8>(),
            original in any::<u8>(),
            mask in 1u8..=255,
        ) {
            let got = blend_channel(reference, original, mask as f32 / 255.0);
            prop_assert!(got >= reference.min(original) && got <= reference.max(original));
        }
    }
}
