//! Cinemagraph Render Engine
//!
//! Turns a composited frame sequence into a looping GIF and ships it.
//! Encoding runs on an isolated worker so the control task never blocks;
//! delivery is pluggable behind [`ArtifactSink`].
//!
//! # Pipeline Architecture
//!
//! ```text
//! FrameSequence ──► EncodeRequest ──► EncoderBridge::submit
//!                                            │
//!                          ┌─────────────────┘
//!                          ▼   (blocking worker)
//!                   key alpha ─► GifEncoder ─► progress…
//!                          │
//!                          ▼
//!                 EncodeJob ◄── gif | error (exactly one)
//!                          │
//!                          ▼
//!                   ArtifactSink::deliver ──► url
//! ```

pub mod bridge;
pub mod delivery;
pub mod gif;
pub mod protocol;

pub use bridge::{EncodeJob, EncoderBridge};
pub use delivery::{parse_delivery_reply, ArtifactSink, FileArtifactSink, HttpArtifactSink};
pub use gif::{encode_gif, key_pixel};
pub use protocol::{EncodeProgress, EncodeRequest, EncodeResult, EncoderResponse};
