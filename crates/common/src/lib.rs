//! Cinemagraph Common Utilities
//!
//! Shared infrastructure for all Cinemagraph crates:
//! - Error taxonomy and result aliases
//! - Capture clock and rate control for display-driven capture
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
