//! Transport-level error types.
//!
//! These describe failures of the host serial layer itself (device missing, driver
//! rejected a setting, read/write failed). Session-level conditions such as "no port
//! selected" live in [`crate::error::SessionError`], which wraps this type.

use thiserror::Error;

/// Errors raised by a [`PortBackend`](super::PortBackend), [`PortProvider`](super::PortProvider)
/// or [`ControlLines`](super::ControlLines) implementation.
#[derive(Debug, Error)]
pub enum PortError {
    /// The serial device does not exist (or vanished before it could be opened).
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred on the byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The driver refused the requested line parameters.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The device is already held open by someone else.
    #[error("Serial port is already open: {0}")]
    AlreadyOpen(String),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port path.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap an arbitrary error as an I/O failure.
    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Io(std::io::Error::other(error))
    }
}
