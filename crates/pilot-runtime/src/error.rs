//! Error types for the device runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising device sessions.
#[derive(Debug, Error)]
pub enum Error {
    /// The automation program could not be spawned.
    #[error("failed to spawn '{program}' for device {device}: {source}")]
    Spawn {
        device: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A script is already running on this device.
    #[error("a script is already running on device {device}")]
    AlreadyRunning { device: String },

    /// The device bridge tool failed or could not be invoked.
    #[error("bridge command failed: {0}")]
    Bridge(String),

    /// I/O error talking to a child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
