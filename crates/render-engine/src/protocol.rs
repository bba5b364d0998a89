//! Encoder request/response messages.
//!
//! This is the one wire contract in the pipeline. A request carries the
//! frames and palette hints; the encoder answers with zero or more
//! `progress` messages and then exactly one terminal `gif` or `error`.
//!
//! ```json
//! {"frames": [...], "delay": 0.0625, "matte": [255,255,255], "transparent": [0,255,0]}
//! {"type": "progress", "data": {"frames_encoded": 3, "total_frames": 32}}
//! {"type": "gif", "data": [71, 73, 70, ...]}
//! ```

use cinemagraph_common::config::PipelineConfig;
use cinemagraph_common::error::{CinemagraphError, CinemagraphResult};
use cinemagraph_frame_model::{Frame, FrameSequence, Rgb};
use serde::{Deserialize, Serialize};

/// Everything the encoder needs for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeRequest {
    pub frames: Vec<Frame>,
    /// Seconds each frame is shown (1 / fps).
    pub delay: f64,
    /// Fallback for partially transparent pixels.
    pub matte: Rgb,
    /// Color key rendered see-through.
    pub transparent: Rgb,
}

impl EncodeRequest {
    pub fn new(sequence: FrameSequence, config: &PipelineConfig) -> Self {
        Self {
            frames: sequence.into_frames(),
            delay: config.frame_delay_secs(),
            matte: config.matte,
            transparent: config.transparent,
        }
    }

    /// Per-frame delay rounded to whole milliseconds.
    pub fn delay_ms(&self) -> u32 {
        if !self.delay.is_finite() || self.delay <= 0.0 {
            return 0;
        }
        (self.delay * 1000.0).round() as u32
    }
}

/// Opaque progress report. Values only ever grow within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeProgress {
    pub frames_encoded: usize,
    pub total_frames: usize,
}

impl EncodeProgress {
    /// Completed fraction in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.total_frames == 0 {
            return 1.0;
        }
        self.frames_encoded as f64 / self.total_frames as f64
    }
}

/// Terminal outcome of an encode: GIF bytes, or `EncodeFault`.
pub type EncodeResult = CinemagraphResult<Vec<u8>>;

/// A message from the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EncoderResponse {
    Progress(EncodeProgress),
    Gif(Vec<u8>),
    Error(String),
}

impl EncoderResponse {
    /// Whether this message ends the job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }

    /// Translate a terminal message into the pipeline error taxonomy.
    pub fn into_result(self) -> EncodeResult {
        match self {
            Self::Gif(bytes) => Ok(bytes),
            Self::Error(message) => Err(CinemagraphError::encode_fault(message)),
            Self::Progress(_) => Err(CinemagraphError::encode_fault(
                "progress message is not a result",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_pipeline_defaults() {
        let seq = FrameSequence::from_frames(vec![Frame::solid(1, 1, [0, 0, 0, 255], 0)]).unwrap();
        let request = EncodeRequest::new(seq, &PipelineConfig::default());
        assert_eq!(request.frames.len(), 1);
        assert_eq!(request.delay_ms(), 63);
        assert_eq!(request.matte, [255, 255, 255]);
        assert_eq!(request.transparent, [0, 255, 0]);
    }

    #[test]
    fn responses_use_tagged_wire_form() {
        let progress = EncoderResponse::Progress(EncodeProgress {
            frames_encoded: 1,
            total_frames: 4,
        });
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["data"]["frames_encoded"], 1);

        let gif: EncoderResponse =
            serde_json::from_str(r#"{"type":"gif","data":[71,73,70]}"#).unwrap();
        assert!(gif.is_terminal());
        assert_eq!(gif.into_result().unwrap(), b"GIF".to_vec());

        let error: EncoderResponse =
            serde_json::from_str(r#"{"type":"error","data":"out of memory"}"#).unwrap();
        let err = error.into_result().unwrap_err();
        assert_eq!(err.kind(), cinemagraph_common::ErrorKind::Encode);
    }

    #[test]
    fn request_round_trips_wire_field_names() {
        let json = serde_json::json!({
            "frames": [{"width": 1, "height": 1, "data": [1, 2, 3, 255]}],
            "delay": 0.1,
            "matte": [255, 255, 255],
            "transparent": [0, 255, 0]
        });
        let request: EncodeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.delay_ms(), 100);
        assert_eq!(request.frames[0].pixel(0, 0), [1, 2, 3, 255]);
    }

    #[test]
    fn progress_fraction() {
        let p = EncodeProgress {
            frames_encoded: 8,
            total_frames: 32,
        };
        assert!((p.fraction() - 0.25).abs() < 1e-12);
    }
}
