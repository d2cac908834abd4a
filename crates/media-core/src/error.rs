//! Error handling for media operations

use thiserror::Error;

/// Result type alias for media operations
pub type MediaResult<T> = std::result::Result<T, MediaError>;

/// Error type for audio backend and processing operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// The backend failed at the platform layer
    #[error("Audio backend error: {message}")]
    Backend {
        /// Platform-level description
        message: String,
    },

    /// A device index passed to selection does not exist
    #[error("No such audio device: {index}")]
    NoSuchDevice {
        /// The offending device index
        index: usize,
    },

    /// A sound id passed to stop_sound is not playing
    #[error("No such sound: {id}")]
    NoSuchSound {
        /// The offending sound id
        id: u32,
    },

    /// A level outside [0, 1] was requested
    #[error("Invalid level {level} (must be within 0.0..=1.0)")]
    InvalidLevel {
        /// The offending level
        level: f32,
    },
}

impl MediaError {
    /// Create a new backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
