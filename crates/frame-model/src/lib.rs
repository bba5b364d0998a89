//! Cinemagraph Frame Model
//!
//! Defines the core data contracts shared by every pipeline stage:
//! - **Frame:** an immutable RGBA8 raster plus its capture timestamp
//! - **FrameSequence:** ordered frames with constant dimensions
//! - **ZoneMask / Zone:** operator-drawn freeze-strength maps
//!
//! Frames are cheap to clone (the pixel buffer is shared) and are never
//! mutated in place; compositing produces new frames.

pub mod frame;
pub mod mask;

pub use frame::*;
pub use mask::*;

/// An RGB color triple, as used for matte and transparent-key colors.
pub type Rgb = [u8; 3];
