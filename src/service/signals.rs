//! Modem control and status lines, and the DTR/RTS reset pulse.

use super::SessionManager;
use crate::error::SessionResult;
use crate::port::{OutputSignals, SignalSet, StatusSignals};
use std::time::Duration;
use tracing::{debug, info};

/// How long RTS is held asserted during [`SessionManager::reset_device`].
pub const RESET_SETTLE_INTERVAL: Duration = Duration::from_millis(200);

impl SessionManager {
    /// Sample DCD, DSR, CTS and RI.
    ///
    /// # Errors
    ///
    /// - `SessionError::PortNotOpen` if the session is not open
    /// - `SessionError::Io` if the driver fails
    pub fn status_signals(&self) -> SessionResult<StatusSignals> {
        self.open_session()?.status_signals()
    }

    /// Drive the given output lines, in DTR, RTS, BREAK order. Fields left `None`
    /// are not touched.
    ///
    /// # Errors
    ///
    /// - `SessionError::PortNotOpen` if the session is not open
    /// - `SessionError::Io` if the driver fails; lines set before the failure keep
    ///   their new level
    pub fn set_output_signals(&self, signals: OutputSignals) -> SessionResult<()> {
        let session = self.open_session()?;
        if signals.is_empty() {
            return Ok(());
        }
        session.set_output_signals(signals)
    }

    /// All seven lines: last driven output levels plus freshly sampled status lines.
    pub fn signals(&self) -> SessionResult<SignalSet> {
        self.open_session()?.signals()
    }

    /// Pulse the device into reset through the auto-reset circuit most USB serial
    /// boards wire to DTR/RTS: DTR low, RTS high, wait, RTS low.
    ///
    /// Returns `Ok(false)` without touching anything when no session is open.
    pub async fn reset_device(&self) -> SessionResult<bool> {
        self.reset_device_with(self.reset_settle).await
    }

    /// [`reset_device`](Self::reset_device) with a custom settle interval.
    ///
    /// # Errors
    ///
    /// - `SessionError::DeviceGone` if the device is detached mid-pulse
    /// - `SessionError::PortNotOpen` if the session is closed mid-pulse
    /// - `SessionError::Io` if the driver fails
    pub async fn reset_device_with(&self, settle: Duration) -> SessionResult<bool> {
        let Ok(session) = self.open_session() else {
            debug!("Reset requested without an open port; ignoring");
            return Ok(false);
        };

        // The pulse stays bound to this session, so a detach reports why it stopped.
        session.set_output_signals(OutputSignals::dtr(false))?;
        session.set_output_signals(OutputSignals::rts(true))?;
        tokio::time::sleep(settle).await;
        session.set_output_signals(OutputSignals::rts(false))?;

        info!(
            session = %session.id,
            settle_ms = settle.as_millis() as u64,
            "Device reset pulse sent"
        );
        Ok(true)
    }
}
