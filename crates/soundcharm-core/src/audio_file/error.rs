//! Audio buffer error types

use thiserror::Error;

/// Errors raised while decoding, trimming or encoding audio
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioBufferError {
    /// Blob MIME type does not match the expected type
    #[error("Unsupported format: expected {expected}, found {found}")]
    UnsupportedFormat { expected: String, found: String },

    /// The decoder rejected the byte stream
    #[error("Failed to decode audio: {0}")]
    DecodeFailure(String),

    /// Region bounds outside [0, 1] or start > end
    #[error("Invalid range: start={start}, end={end}")]
    InvalidRange { start: f64, end: f64 },

    /// Copying samples into the trimmed buffer failed
    #[error("Failed to trim audio: {0}")]
    TrimFailure(String),

    /// Writing WAV bytes failed
    #[error("Failed to encode audio: {0}")]
    EncodeFailure(String),
}

/// Result type for audio buffer operations
pub type AudioBufferResult<T> = Result<T, AudioBufferError>;
