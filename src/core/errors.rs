// src/core/errors.rs

//! Defines the primary error type for the entire application.

use thiserror::Error;

/// The main error enum, representing all possible failures within the hub.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Could not upgrade connection: {0}")]
    Upgrade(String),

    #[error("Failed to decode command: {0}")]
    Decode(String),

    #[error("Frame of {got} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { got: usize, limit: usize },

    #[error("Write timed out")]
    WriteTimeout,

    #[error("Hub is already running")]
    AlreadyRunning,

    #[error("Hub event channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Decode(err.to_string())
    }
}
