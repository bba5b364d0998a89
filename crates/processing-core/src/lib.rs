//! Cinemagraph Processing Core
//!
//! The two synchronous stages between capture and encoding:
//! - **Resample:** pick a fixed-rate frame sequence out of a raw capture
//! - **Composite:** freeze operator-selected zones to the first frame
//!
//! This crate is pure computation: no I/O, no platform dependencies.
//! All inputs are data; all outputs are data.

pub mod composite;
pub mod resample;

pub use composite::Compositor;
pub use resample::{resample_indices, target_frame_count, Resampler};
