//! Service layer: the serial session manager.
//!
//! [`SessionManager`] owns at most one open session at a time and is the only way
//! consumers touch a port. It ties together the pieces below it:
//!
//! ```text
//!                 ┌──────────────┐   attach/detach   ┌──────────────┐
//! consumer ──────>│SessionManager│<──────────────────│ PortRegistry │<── PortProvider
//!   open/close    │  LineSettings│                   └──────────────┘
//!   read/write    │  ActiveSession──> PortBackend ──> reader / writer / lines
//!   signals       └──────────────┘
//! ```
//!
//! Every operation suspends the caller while host I/O runs; the manager spawns no
//! tasks of its own. Continuous reading is driven by the consumer through
//! [`SessionManager::read`] in a loop or the [`SessionManager::chunks`] stream.

mod session;
pub mod signals;
pub mod stream;

pub use signals::RESET_SETTLE_INTERVAL;
pub use stream::ByteChunks;

use crate::error::{SessionError, SessionResult};
use crate::port::{LineConfig, PortBackend, PortError, PortFilter, SystemPorts};
use crate::registry::{PortEvent, PortHandle, PortRegistry, Subscription};
use crate::state::{LineSettings, SessionState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use session::{ActiveSession, CloseReason, ReadLease};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long [`SessionManager::close`] waits for in-flight operations to release the port.
pub const RELEASE_TIMEOUT: Duration = Duration::from_millis(500);

// ========== Status ==========

/// Snapshot of the manager for display or logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Port of the open session, else the selected port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
    /// Configuration of the open session, else the live settings.
    pub line: LineConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

// ========== Shared Core ==========

#[derive(Default)]
struct Slot {
    state: SessionState,
    /// Last port that reached Open; distinguishes "never opened" from "closed".
    context_port: Option<PortHandle>,
    active: Option<Arc<ActiveSession>>,
}

/// State the detach listener shares with the manager.
struct SessionCore {
    slot: Mutex<Slot>,
    selected: Mutex<Option<PortHandle>>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionCore {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Closed);
        Self {
            slot: Mutex::new(Slot::default()),
            selected: Mutex::new(None),
            state_tx,
        }
    }

    fn set_state(&self, slot: &mut Slot, state: SessionState) {
        if slot.state != state {
            debug!(from = %slot.state, to = %state, "Session state changed");
        }
        slot.state = state;
        self.state_tx.send_replace(state);
    }

    fn active(&self) -> SessionResult<Arc<ActiveSession>> {
        let slot = self.slot.lock();
        match (&slot.active, &slot.context_port) {
            (Some(session), _) => Ok(Arc::clone(session)),
            (None, None) => Err(SessionError::NoPortSelected),
            (None, Some(_)) => Err(SessionError::PortNotOpen),
        }
    }

    fn on_detach(&self, handle: &PortHandle) {
        {
            let mut selected = self.selected.lock();
            if selected.as_ref() == Some(handle) {
                debug!(port = %handle, "Selected port detached; clearing selection");
                *selected = None;
            }
        }

        let session = {
            let mut slot = self.slot.lock();
            if !slot.active.as_ref().is_some_and(|s| s.handle == *handle) {
                return;
            }
            let session = slot.active.take();
            self.set_state(&mut slot, SessionState::Closed);
            session
        };

        if let Some(session) = session {
            warn!(session = %session.id, port = %handle, "Device detached; session closed");
            session.signal(CloseReason::DeviceGone);
            drop(session.take_writer());
            session.release();
        }
    }
}

/// Resets an interrupted open back to Closed.
struct OpeningGuard<'a> {
    core: &'a SessionCore,
    armed: bool,
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = self.core.slot.lock();
            if slot.state == SessionState::Opening {
                self.core.set_state(&mut slot, SessionState::Closed);
            }
        }
    }
}

/// Finishes a close even if the close future is dropped.
struct ClosingGuard<'a> {
    core: &'a SessionCore,
    session: &'a ActiveSession,
}

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        self.session.release();
        let mut slot = self.core.slot.lock();
        if slot.state == SessionState::Closing {
            self.core.set_state(&mut slot, SessionState::Closed);
        }
    }
}

// ========== Manager ==========

/// Owner of the single serial session of an application.
///
/// # Example
/// ```
/// use serial_session::port::{MockPorts, PortInfo};
/// use serial_session::SessionManager;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let ports = MockPorts::new().with_port("/dev/mock0", PortInfo::usb(0x10c4, 0xea60));
/// let manager = SessionManager::with_ports(Arc::new(ports.clone()));
///
/// manager.initialize().await.unwrap();
/// manager.open().await.unwrap();
/// assert_eq!(manager.write(b"AT\r\n").await.unwrap(), 4);
/// manager.close().await.unwrap();
/// # });
/// ```
pub struct SessionManager {
    registry: Arc<PortRegistry>,
    backend: Arc<dyn PortBackend>,
    settings: Mutex<LineSettings>,
    reset_settle: Duration,
    core: Arc<SessionCore>,
    _detach: Subscription,
}

impl SessionManager {
    /// Manager over an existing registry and backend.
    pub fn new(registry: Arc<PortRegistry>, backend: Arc<dyn PortBackend>) -> Self {
        let core = Arc::new(SessionCore::new());
        let weak: Weak<SessionCore> = Arc::downgrade(&core);
        let detach = registry.subscribe(move |event| {
            if let PortEvent::Detached(handle) = event {
                if let Some(core) = weak.upgrade() {
                    core.on_detach(handle);
                }
            }
        });

        Self {
            registry,
            backend,
            settings: Mutex::new(LineSettings::new()),
            reset_settle: RESET_SETTLE_INTERVAL,
            core,
            _detach: detach,
        }
    }

    /// Manager whose registry and backend are the same object.
    pub fn with_ports<P>(ports: Arc<P>) -> Self
    where
        P: crate::port::PortProvider + PortBackend + 'static,
    {
        let registry = Arc::new(PortRegistry::new(ports.clone()));
        Self::new(registry, ports)
    }

    /// Manager over the host's serial ports.
    pub fn system() -> Self {
        Self::with_ports(Arc::new(SystemPorts::new()))
    }

    /// Start from `settings` instead of the defaults.
    pub fn with_settings(self, settings: LineSettings) -> Self {
        *self.settings.lock() = settings;
        self
    }

    /// Settle time used by [`reset_device`](Self::reset_device).
    pub fn with_reset_settle(mut self, settle: Duration) -> Self {
        self.reset_settle = settle;
        self
    }

    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    // ========== Selection ==========

    /// Select the first authorized port unless one is already selected.
    ///
    /// Returns the selection, which is `None` when no device is authorized.
    pub async fn initialize(&self) -> SessionResult<Option<PortHandle>> {
        let ports = self.registry.list_authorized_ports().await?;
        let mut selected = self.core.selected.lock();
        if selected.is_none() {
            *selected = ports.into_iter().next();
            if let Some(port) = selected.as_ref() {
                debug!(port = %port, "Selected first authorized port");
            }
        }
        Ok(selected.clone())
    }

    /// Ask for a new device (see [`PortRegistry::request_new_port`]) and select it.
    pub async fn request_port(&self, filters: &[PortFilter]) -> SessionResult<PortHandle> {
        let handle = self.registry.request_new_port(filters).await?;
        self.select_port(Some(handle.clone()));
        Ok(handle)
    }

    pub fn select_port(&self, handle: Option<PortHandle>) {
        *self.core.selected.lock() = handle;
    }

    pub fn selected_port(&self) -> Option<PortHandle> {
        self.core.selected.lock().clone()
    }

    // ========== Line Settings ==========

    /// Snapshot of the live settings.
    pub fn line_config(&self) -> LineConfig {
        self.settings.lock().snapshot()
    }

    pub fn settings(&self) -> LineSettings {
        self.settings.lock().clone()
    }

    /// Edit the live settings. The edit is applied to a copy and committed only if
    /// `edit` succeeds.
    ///
    /// # Errors
    ///
    /// - `SessionError::SettingsLocked` unless the session is Closed
    /// - whatever `edit` returns, typically `SessionError::InvalidSetting`
    pub fn configure<F>(&self, edit: F) -> SessionResult<()>
    where
        F: FnOnce(&mut LineSettings) -> SessionResult<()>,
    {
        let mut settings = self.settings.lock();
        if self.state() != SessionState::Closed {
            return Err(SessionError::SettingsLocked);
        }
        let mut draft = settings.clone();
        edit(&mut draft)?;
        *settings = draft;
        Ok(())
    }

    // ========== Lifecycle ==========

    pub fn state(&self) -> SessionState {
        self.core.slot.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.core.state_tx.subscribe()
    }

    /// Open the selected port with a snapshot of the live settings.
    pub async fn open(&self) -> SessionResult<()> {
        let config = self.line_config();
        self.open_port(self.selected_port(), config).await
    }

    /// Open `handle` with `config`.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoPortSelected` if `handle` is `None`
    /// - `SessionError::InvalidSetting` if `config` is invalid
    /// - `SessionError::AlreadyOpen` if this manager has a session or the device is
    ///   held open elsewhere
    /// - `SessionError::DeviceGone` if the device is detached before the open completes
    /// - `SessionError::Io` if the backend fails
    pub async fn open_port(
        &self,
        handle: Option<PortHandle>,
        config: LineConfig,
    ) -> SessionResult<()> {
        let handle = handle.ok_or(SessionError::NoPortSelected)?;
        config.validate()?;

        {
            let mut slot = self.core.slot.lock();
            if slot.state != SessionState::Closed || self.backend.is_open(handle.path()) {
                return Err(SessionError::AlreadyOpen);
            }
            if !handle.is_attached() {
                return Err(SessionError::DeviceGone);
            }
            self.core.set_state(&mut slot, SessionState::Opening);
        }
        let mut opening = OpeningGuard {
            core: &self.core,
            armed: true,
        };

        let channel = self
            .backend
            .open(handle.descriptor(), &config)
            .await
            .map_err(|e| match e {
                PortError::AlreadyOpen(_) => SessionError::AlreadyOpen,
                other => SessionError::from(other),
            })?;

        let session = Arc::new(ActiveSession::new(handle.clone(), config, channel));
        {
            let mut slot = self.core.slot.lock();
            // Checked under the slot lock so a concurrent detach either sees the
            // installed session or is seen here.
            if !handle.is_attached() {
                warn!(port = %handle, "Device detached while opening");
                return Err(SessionError::DeviceGone);
            }
            slot.active = Some(Arc::clone(&session));
            slot.context_port = Some(handle.clone());
            self.core.set_state(&mut slot, SessionState::Open);
        }
        opening.armed = false;

        info!(session = %session.id, port = %handle, line = %config, "Serial session opened");
        Ok(())
    }

    /// Close the session and release the device.
    ///
    /// Pending reads and writes fail with `PortNotOpen`; close waits up to
    /// [`RELEASE_TIMEOUT`] for them to let go of the port. A [`ByteChunks`] stream that
    /// is kept without being polled holds the device until it is polled or dropped.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoPortSelected` if no session is open
    pub async fn close(&self) -> SessionResult<()> {
        let session = {
            let mut slot = self.core.slot.lock();
            let session = slot.active.take().ok_or(SessionError::NoPortSelected)?;
            self.core.set_state(&mut slot, SessionState::Closing);
            session
        };
        let guard = ClosingGuard {
            core: &self.core,
            session: &session,
        };

        session.signal(CloseReason::Closed);
        if let Some(mut writer) = session.reclaim_writer(RELEASE_TIMEOUT).await {
            if let Err(e) = writer.shutdown().await {
                debug!(session = %session.id, error = %e, "Writer shutdown failed during close");
            }
        }
        drop(session.reclaim_reader(RELEASE_TIMEOUT).await);
        drop(guard);

        info!(
            session = %session.id,
            bytes_read = session.bytes_read(),
            bytes_written = session.bytes_written(),
            "Serial session closed"
        );
        Ok(())
    }

    // ========== Byte Stream ==========

    /// Next chunk of at most `buffer_size` bytes, waiting until data arrives.
    ///
    /// An empty chunk means the device signalled end of stream.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoPortSelected` if no port was ever opened
    /// - `SessionError::PortNotOpen` if the session is not open or closes meanwhile
    /// - `SessionError::ReaderBusy` if another read or a chunk stream holds the reader
    /// - `SessionError::DeviceGone` if the device is detached meanwhile
    /// - `SessionError::Io` on transport failure
    pub async fn read(&self) -> SessionResult<Vec<u8>> {
        let session = self.core.active()?;
        session.read().await
    }

    /// Write all of `data`, returning once the channel accepted every byte.
    ///
    /// # Errors
    ///
    /// As for [`read`](Self::read), with `SessionError::WriterBusy` for a concurrent
    /// write.
    pub async fn write(&self, data: &[u8]) -> SessionResult<usize> {
        let session = self.core.active()?;
        session.write(data).await
    }

    /// Continuous reading as a stream; see [`ByteChunks`].
    pub fn chunks(&self) -> SessionResult<ByteChunks> {
        let session = self.core.active()?;
        Ok(ByteChunks::new(ReadLease::acquire(&session)?))
    }

    // ========== Status ==========

    pub fn status(&self) -> SessionStatus {
        let (state, active) = {
            let slot = self.core.slot.lock();
            (slot.state, slot.active.clone())
        };
        match active {
            Some(session) => SessionStatus {
                state,
                session_id: Some(session.id),
                port: Some(session.handle.path().to_string()),
                display_id: Some(session.handle.display_id()),
                line: session.config,
                opened_at: Some(session.opened_at),
                bytes_read: session.bytes_read(),
                bytes_written: session.bytes_written(),
            },
            None => {
                let selected = self.selected_port();
                SessionStatus {
                    state,
                    session_id: None,
                    port: selected.as_ref().map(|p| p.path().to_string()),
                    display_id: selected.as_ref().map(PortHandle::display_id),
                    line: self.line_config(),
                    opened_at: None,
                    bytes_read: 0,
                    bytes_written: 0,
                }
            }
        }
    }

    fn open_session(&self) -> SessionResult<Arc<ActiveSession>> {
        self.core.slot.lock().active.clone().ok_or(SessionError::PortNotOpen)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("selected", &self.selected_port())
            .field("settings", &*self.settings.lock())
            .finish_non_exhaustive()
    }
}
