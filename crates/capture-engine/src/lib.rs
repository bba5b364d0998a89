//! Cinemagraph Capture Engine
//!
//! Accumulates raw frames from a live or file-backed source while a
//! recording session is active. The embedder drives capture from its
//! display-refresh callback; start and stop come from the same control
//! thread, so the buffer needs no locking.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              CaptureSession              │
//! │                                          │
//! │  refresh ──► RateController ──► grab()   │
//! │                                  │       │
//! │                     ┌────────────┘       │
//! │                     ▼                    │
//! │        ┌─────────────────────────┐       │
//! │        │  raw frames (owned)     │       │
//! │        └────────────┬────────────┘       │
//! └─────────────────────┼────────────────────┘
//!                       ▼ stop()
//!                 CapturedFrames ──► resampler
//! ```

pub mod session;
pub mod source;

pub use session::*;
pub use source::*;
