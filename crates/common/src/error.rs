//! Error types shared across Cinemagraph crates.

use std::path::PathBuf;

/// Top-level error type for Cinemagraph operations.
#[derive(Debug, thiserror::Error)]
pub enum CinemagraphError {
    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Capture buffer is empty: {message}")]
    EmptyBuffer { message: String },

    #[error("Encode fault: {message}")]
    EncodeFault { message: String },

    #[error("Upload fault: {message}")]
    UploadFault { message: String },

    #[error("Processing error: {message}")]
    Processing { message: String },

    #[error("An encode job is already in flight")]
    EncoderBusy,

    #[error("Invalid transition: cannot {event} while {state}")]
    InvalidTransition { state: String, event: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CinemagraphError.
pub type CinemagraphResult<T> = Result<T, CinemagraphError>;

/// Coarse classification used to pick a recovery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Permission denied or unsupported device. Fatal to recording, no retry.
    Capture,
    /// Stop with zero captured frames. User-correctable.
    EmptyBuffer,
    /// Encoder-reported or transport failure. Retry from editing.
    Encode,
    /// Delivery endpoint failure. No automatic retry.
    Upload,
    /// A synchronous stage rejected the operation.
    Rejected,
}

impl CinemagraphError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn empty_buffer(msg: impl Into<String>) -> Self {
        Self::EmptyBuffer {
            message: msg.into(),
        }
    }

    pub fn encode_fault(msg: impl Into<String>) -> Self {
        Self::EncodeFault {
            message: msg.into(),
        }
    }

    pub fn upload_fault(msg: impl Into<String>) -> Self {
        Self::UploadFault {
            message: msg.into(),
        }
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    pub fn invalid_transition(state: impl ToString, event: impl ToString) -> Self {
        Self::InvalidTransition {
            state: state.to_string(),
            event: event.to_string(),
        }
    }

    /// Map this error onto the pipeline's recovery taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Capture { .. } | Self::PermissionDenied { .. } | Self::Unsupported { .. } => {
                ErrorKind::Capture
            }
            Self::EmptyBuffer { .. } => ErrorKind::EmptyBuffer,
            Self::EncodeFault { .. } => ErrorKind::Encode,
            Self::UploadFault { .. } => ErrorKind::Upload,
            _ => ErrorKind::Rejected,
        }
    }
}
