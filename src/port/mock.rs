//! In-memory ports for testing.
//!
//! [`MockPorts`] implements both [`PortProvider`] and [`PortBackend`]. Opening a port
//! creates a `tokio::io::duplex` pipe: the session gets one end, the test takes the
//! other with [`MockPorts::take_peer`] and plays the device. Modem line writes are
//! recorded with timestamps so tests can check ordering and timing.

use super::claims::{PortClaim, PortClaims};
use super::error::PortError;
use super::traits::{
    ControlLines, LineConfig, OutputSignal, PortBackend, PortChannel, PortDescriptor,
    PortFilter, PortInfo, PortProvider, StatusSignals,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::time::Instant;

/// Default in-flight capacity of the simulated link, per direction.
pub const DEFAULT_DUPLEX_CAPACITY: usize = 64 * 1024;

/// One recorded output line change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEvent {
    pub signal: OutputSignal,
    pub level: bool,
    pub at: Instant,
}

#[derive(Debug)]
struct MockState {
    ports: Vec<PortDescriptor>,
    removed: HashSet<String>,
    request_response: Option<PortDescriptor>,
    duplex_capacity: usize,
    peers: HashMap<String, DuplexStream>,
    signal_log: HashMap<String, Vec<SignalEvent>>,
    status: HashMap<String, StatusSignals>,
    fail_next_open: Option<String>,
    fail_next_enumerate: Option<String>,
    fail_lines: bool,
    enumerate_calls: usize,
    last_config: Option<LineConfig>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            removed: HashSet::new(),
            request_response: None,
            duplex_capacity: DEFAULT_DUPLEX_CAPACITY,
            peers: HashMap::new(),
            signal_log: HashMap::new(),
            status: HashMap::new(),
            fail_next_open: None,
            fail_next_enumerate: None,
            fail_lines: false,
            enumerate_calls: 0,
            last_config: None,
        }
    }
}

/// Scriptable provider and backend. Clones share state.
///
/// # Example
/// ```
/// use serial_session::port::{MockPorts, PortBackend, PortDescriptor, PortInfo, LineConfig};
/// use tokio::io::{AsyncReadExt, AsyncWriteExt};
///
/// # tokio_test::block_on(async {
/// let mock = MockPorts::new().with_port("/dev/mock0", PortInfo::usb(0x2341, 0x0043));
/// let port = PortDescriptor::new("/dev/mock0", PortInfo::usb(0x2341, 0x0043));
///
/// let mut channel = mock.open(&port, &LineConfig::default()).await.unwrap();
/// let mut device = mock.take_peer("/dev/mock0").unwrap();
///
/// channel.writer.write_all(b"ping").await.unwrap();
/// let mut buf = [0u8; 4];
/// device.read_exact(&mut buf).await.unwrap();
/// assert_eq!(&buf, b"ping");
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockPorts {
    state: Arc<Mutex<MockState>>,
    claims: PortClaims,
}

impl MockPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_port`](Self::add_port).
    pub fn with_port(self, path: impl Into<String>, info: PortInfo) -> Self {
        self.add_port(path, info);
        self
    }

    /// Make a device visible to enumeration (already authorized).
    pub fn add_port(&self, path: impl Into<String>, info: PortInfo) -> PortDescriptor {
        let descriptor = PortDescriptor::new(path, info);
        let mut state = self.state.lock();
        state.removed.remove(&descriptor.path);
        state.ports.retain(|p| p.path != descriptor.path);
        state.ports.push(descriptor.clone());
        descriptor
    }

    /// Unplug a device: it disappears from enumeration, can no longer be opened, and
    /// an untaken device end is dropped.
    pub fn remove_port(&self, path: &str) {
        let mut state = self.state.lock();
        state.ports.retain(|p| p.path != path);
        state.removed.insert(path.to_string());
        state.peers.remove(path);
    }

    /// What the next [`PortProvider::request`] returns, if it matches the filters.
    /// `None` (the default) simulates the user dismissing the chooser.
    pub fn respond_to_request(&self, response: Option<PortDescriptor>) {
        self.state.lock().request_response = response;
    }

    /// Buffer capacity of pipes created by later opens.
    pub fn set_duplex_capacity(&self, capacity: usize) {
        self.state.lock().duplex_capacity = capacity.max(1);
    }

    /// Take the device end of the pipe of an open port.
    pub fn take_peer(&self, path: &str) -> Option<DuplexStream> {
        self.state.lock().peers.remove(path)
    }

    /// Simulate another program holding `path` open.
    pub fn hold_externally(&self, path: &str) -> Result<PortClaim, PortError> {
        self.claims.claim(path)
    }

    /// Make the next open fail with an I/O error carrying `message`.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.state.lock().fail_next_open = Some(message.into());
    }

    /// Make the next enumeration fail with an I/O error carrying `message`.
    pub fn fail_next_enumerate(&self, message: impl Into<String>) {
        self.state.lock().fail_next_enumerate = Some(message.into());
    }

    /// While set, every modem line operation fails.
    pub fn fail_lines(&self, fail: bool) {
        self.state.lock().fail_lines = fail;
    }

    /// Status lines reported for `path`.
    pub fn set_status_signals(&self, path: &str, status: StatusSignals) {
        self.state.lock().status.insert(path.to_string(), status);
    }

    /// Output line changes driven on `path`, oldest first.
    pub fn signal_log(&self, path: &str) -> Vec<SignalEvent> {
        self.state
            .lock()
            .signal_log
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    pub fn enumerate_calls(&self) -> usize {
        self.state.lock().enumerate_calls
    }

    /// Line configuration passed to the most recent successful open.
    pub fn last_config(&self) -> Option<LineConfig> {
        self.state.lock().last_config
    }

    /// Whether `path` is currently claimed.
    pub fn is_open(&self, path: &str) -> bool {
        self.claims.is_held(path)
    }
}

impl std::fmt::Debug for MockPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockPorts")
            .field("ports", &state.ports.len())
            .field("claims", &self.claims)
            .finish()
    }
}

#[async_trait]
impl PortProvider for MockPorts {
    async fn enumerate(&self) -> Result<Vec<PortDescriptor>, PortError> {
        let mut state = self.state.lock();
        state.enumerate_calls += 1;
        if let Some(message) = state.fail_next_enumerate.take() {
            return Err(PortError::other(message));
        }
        Ok(state.ports.clone())
    }

    async fn request(&self, filters: &[PortFilter]) -> Result<Option<PortDescriptor>, PortError> {
        let state = self.state.lock();
        Ok(state
            .request_response
            .clone()
            .filter(|port| PortFilter::matches_any(filters, &port.info)))
    }
}

#[async_trait]
impl PortBackend for MockPorts {
    fn is_open(&self, path: &str) -> bool {
        self.claims.is_held(path)
    }

    async fn open(
        &self,
        port: &PortDescriptor,
        config: &LineConfig,
    ) -> Result<PortChannel, PortError> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next_open.take() {
            return Err(PortError::other(message));
        }
        if state.removed.contains(&port.path) {
            return Err(PortError::not_found(port.path.as_str()));
        }
        let claim = self.claims.claim(&port.path)?;

        let (host, device) = tokio::io::duplex(state.duplex_capacity);
        state.peers.insert(port.path.clone(), device);
        state.last_config = Some(*config);

        // Like a host descriptor, the path stays claimed until every half is gone.
        let claim = Arc::new(claim);
        let (reader, writer) = tokio::io::split(host);
        let lines = MockLines {
            state: Arc::clone(&self.state),
            claim: Arc::clone(&claim),
        };
        Ok(PortChannel::new(
            Claimed::new(reader, Arc::clone(&claim)),
            Claimed::new(writer, claim),
            lines,
        ))
    }
}

/// One half of the simulated link, keeping the path claimed while it lives.
struct Claimed<T> {
    inner: T,
    _claim: Arc<PortClaim>,
}

impl<T> Claimed<T> {
    fn new(inner: T, claim: Arc<PortClaim>) -> Self {
        Self {
            inner,
            _claim: claim,
        }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Claimed<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Claimed<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

struct MockLines {
    state: Arc<Mutex<MockState>>,
    claim: Arc<PortClaim>,
}

impl MockLines {
    fn record(&mut self, signal: OutputSignal, level: bool) -> Result<(), PortError> {
        let mut state = self.state.lock();
        if state.fail_lines {
            return Err(PortError::other(format!("failed to drive {signal}")));
        }
        state
            .signal_log
            .entry(self.claim.path().to_string())
            .or_default()
            .push(SignalEvent {
                signal,
                level,
                at: Instant::now(),
            });
        Ok(())
    }
}

impl ControlLines for MockLines {
    fn write_data_terminal_ready(&mut self, level: bool) -> Result<(), PortError> {
        self.record(OutputSignal::DataTerminalReady, level)
    }

    fn write_request_to_send(&mut self, level: bool) -> Result<(), PortError> {
        self.record(OutputSignal::RequestToSend, level)
    }

    fn write_break(&mut self, active: bool) -> Result<(), PortError> {
        self.record(OutputSignal::Break, active)
    }

    fn read_status(&mut self) -> Result<StatusSignals, PortError> {
        let state = self.state.lock();
        if state.fail_lines {
            return Err(PortError::other("failed to read status lines"));
        }
        Ok(state
            .status
            .get(self.claim.path())
            .copied()
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for MockLines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLines")
            .field("path", &self.claim.path())
            .finish()
    }
}
