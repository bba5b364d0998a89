//! Animated GIF encoding.

use crate::protocol::{EncodeProgress, EncodeRequest};
use cinemagraph_common::error::{CinemagraphError, CinemagraphResult};
use cinemagraph_frame_model::Rgb;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, RgbaImage};

/// Resolve a pixel's alpha against the palette hints.
///
/// Fully transparent pixels become the transparent key with alpha 0.
/// Partially transparent pixels are composited over the matte and made
/// opaque. Opaque pixels pass through.
#[inline]
pub fn key_pixel(px: [u8; 4], matte: Rgb, transparent: Rgb) -> [u8; 4] {
    match px[3] {
        0 => [transparent[0], transparent[1], transparent[2], 0],
        255 => px,
        a => {
            let alpha = a as f32 / 255.0;
            let over = |src: u8, bg: u8| -> u8 {
                (alpha * src as f32 + (1.0 - alpha) * bg as f32)
                    .round()
                    .clamp(0.0, 255.0) as u8
            };
            [
                over(px[0], matte[0]),
                over(px[1], matte[1]),
                over(px[2], matte[2]),
                255,
            ]
        }
    }
}

fn keyed(image: &RgbaImage, matte: Rgb, transparent: Rgb) -> RgbaImage {
    let mut out = image.clone();
    for px in out.pixels_mut() {
        px.0 = key_pixel(px.0, matte, transparent);
    }
    out
}

/// Encode a request as a looping GIF, reporting after each frame.
///
/// Runs to completion on the calling thread. `on_progress` returning
/// `false` abandons the encode and yields `Ok(None)`.
pub fn encode_gif(
    request: &EncodeRequest,
    mut on_progress: impl FnMut(EncodeProgress) -> bool,
) -> CinemagraphResult<Option<Vec<u8>>> {
    let Some(first) = request.frames.first() else {
        return Err(CinemagraphError::encode_fault("No frames to encode"));
    };
    let (width, height) = first.dimensions();
    if width == 0 || height == 0 {
        return Err(CinemagraphError::encode_fault(format!(
            "Cannot encode {width}x{height} frames"
        )));
    }
    if let Some((index, frame)) = request
        .frames
        .iter()
        .enumerate()
        .find(|(_, f)| f.dimensions() != (width, height))
    {
        return Err(CinemagraphError::encode_fault(format!(
            "Frame {index} is {:?}, expected {:?}",
            frame.dimensions(),
            (width, height)
        )));
    }
    if u16::try_from(width).is_err() || u16::try_from(height).is_err() {
        return Err(CinemagraphError::encode_fault(format!(
            "{width}x{height} exceeds GIF limits"
        )));
    }

    let total = request.frames.len();
    let delay = Delay::from_numer_denom_ms(request.delay_ms(), 1);
    let mut bytes = Vec::new();

    tracing::debug!(
        frames = total,
        width,
        height,
        delay_ms = request.delay_ms(),
        "Encoding GIF"
    );

    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| CinemagraphError::encode_fault(format!("Failed to set loop: {e}")))?;

        for (index, frame) in request.frames.iter().enumerate() {
            let pixels = keyed(frame.image(), request.matte, request.transparent);
            encoder
                .encode_frame(image::Frame::from_parts(pixels, 0, 0, delay))
                .map_err(|e| {
                    CinemagraphError::encode_fault(format!("Frame {index} failed to encode: {e}"))
                })?;

            let keep_going = on_progress(EncodeProgress {
                frames_encoded: index + 1,
                total_frames: total,
            });
            if !keep_going {
                tracing::debug!(frames_encoded = index + 1, "GIF encode abandoned");
                return Ok(None);
            }
        }
    }

    Ok(Some(bytes))
}
