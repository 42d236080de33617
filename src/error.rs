//! Session-level error handling.
//!
//! Every public operation of the session manager returns [`SessionResult`]. Errors are
//! surfaced to the caller of the triggering operation; the manager never retries or
//! swallows them, so retry and logging policy stays with the consumer.

use crate::port::PortError;
use thiserror::Error;

/// A specialized `Result` type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Unified error type for registry, settings, lifecycle, I/O and signal operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No port handle is available for the operation.
    #[error("No port selected")]
    NoPortSelected,

    /// The manager already has a session, or the device is held open elsewhere.
    #[error("Port is already open. Close it before trying to open it again.")]
    AlreadyOpen,

    /// The operation requires an open session.
    #[error("Operation requires an open serial port, but the port is closed.")]
    PortNotOpen,

    /// The user or platform declined to authorize a device.
    #[error("No port was chosen")]
    NoSelection,

    /// The active device was detached.
    #[error("The device was disconnected")]
    DeviceGone,

    /// Another read is in flight (or a chunk stream owns the reader).
    #[error("Port already has an active reader")]
    ReaderBusy,

    /// Another write is in flight.
    #[error("Port already has an active writer")]
    WriterBusy,

    /// A line setting was rejected.
    #[error("Invalid value for '{field}': {message}")]
    InvalidSetting {
        field: &'static str,
        message: String,
    },

    /// Line settings are frozen while a session is active.
    #[error("Line settings cannot change while the port is open")]
    SettingsLocked,

    /// The underlying transport failed.
    #[error(transparent)]
    Io(#[from] PortError),
}

impl SessionError {
    /// Create an InvalidSetting error.
    pub fn invalid_setting(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field,
            message: message.into(),
        }
    }

    /// Whether this error ends the session for good, as opposed to a transient
    /// condition a read loop may log and continue past.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoPortSelected | Self::PortNotOpen | Self::DeviceGone
        )
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(PortError::Io(err))
    }
}
