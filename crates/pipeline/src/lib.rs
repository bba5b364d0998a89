//! Cinemagraph Pipeline
//!
//! Ties the stages together behind one state machine. The embedder feeds it
//! refresh ticks, stop and zone events; the orchestrator resamples,
//! composites, submits the encode and hands the GIF to a sink.
//!
//! # States
//!
//! ```text
//! IDLE ─► RECORDING ─► RESAMPLING ─► EDITING ─► COMPOSITING ─► ENCODING ─► COMPLETE
//!            ▲ │            │           ▲             │            │
//!            │ │            │           └── ERROR ◄───┴────────────┘
//!            │ │            │                  encode fault
//!            └─┼─ too short ┘
//!              └─► ERROR   capture fault
//!
//! RESTART: EDITING | ENCODING | COMPLETE | ERROR ─► RECORDING
//! RESET:   any ─► IDLE
//! ```
//!
//! Other failures (bad input, a busy encoder, a refused upload) are
//! returned without leaving the state the operation started from.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, PipelineEvent, PipelineState, ProgressObserver, Transition};
