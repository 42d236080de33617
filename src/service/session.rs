//! The state of one open port: its halves, modem lines, counters and close signal.
//!
//! Each half sits behind its own async mutex. An operation takes the lock with
//! `try_lock` (so a second reader or writer fails fast instead of queueing) and races
//! its I/O against the close signal, so close and detach unblock it promptly.

use crate::error::{SessionError, SessionResult};
use crate::port::{
    BoxedReader, BoxedWriter, ControlLines, LineConfig, OutputSignals, PortChannel,
    SignalSet, StatusSignals,
};
use crate::registry::PortHandle;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Closed,
    DeviceGone,
}

impl From<CloseReason> for SessionError {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Closed => SessionError::PortNotOpen,
            CloseReason::DeviceGone => SessionError::DeviceGone,
        }
    }
}

/// Output levels this session last drove. Hardware offers no way to read them back.
#[derive(Debug, Clone, Copy, Default)]
struct OutputLevels {
    data_terminal_ready: bool,
    request_to_send: bool,
    break_active: bool,
}

pub(crate) struct ActiveSession {
    pub(crate) id: Uuid,
    pub(crate) handle: PortHandle,
    pub(crate) config: LineConfig,
    pub(crate) opened_at: DateTime<Utc>,
    reader: Arc<AsyncMutex<Option<BoxedReader>>>,
    writer: Arc<AsyncMutex<Option<BoxedWriter>>>,
    lines: Mutex<Option<Box<dyn ControlLines>>>,
    outputs: Mutex<OutputLevels>,
    shutdown: watch::Sender<Option<CloseReason>>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl ActiveSession {
    pub(crate) fn new(handle: PortHandle, config: LineConfig, channel: PortChannel) -> Self {
        let (shutdown, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            handle,
            config,
            opened_at: Utc::now(),
            reader: Arc::new(AsyncMutex::new(Some(channel.reader))),
            writer: Arc::new(AsyncMutex::new(Some(channel.writer))),
            lines: Mutex::new(Some(channel.lines)),
            outputs: Mutex::new(OutputLevels::default()),
            shutdown,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    fn check_running(&self) -> SessionResult<()> {
        match *self.shutdown.borrow() {
            Some(reason) => Err(reason.into()),
            None => Ok(()),
        }
    }

    // ========== Byte Stream ==========

    pub(crate) async fn read(self: &Arc<Self>) -> SessionResult<Vec<u8>> {
        let mut lease = ReadLease::acquire(self)?;
        lease.next_chunk().await
    }

    /// Write all of `data` in pieces of at most `buffer_size`, then flush.
    pub(crate) async fn write(&self, data: &[u8]) -> SessionResult<usize> {
        self.check_running()?;
        let mut lease = Lease::acquire(&self.writer, &self.shutdown, SessionError::WriterBusy)?;
        let writer = lease.guard.as_mut().ok_or(SessionError::PortNotOpen)?;
        let closed = &mut lease.closed;

        let chunk_size = self.config.buffer_size;
        let io = async {
            for piece in data.chunks(chunk_size) {
                writer.write_all(piece).await?;
            }
            writer.flush().await
        };

        tokio::select! {
            biased;
            reason = wait_closed(closed) => return Err(reason.into()),
            result = io => result?,
        }

        self.bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        trace!(session = %self.id, bytes = data.len(), "Wrote to serial port");
        Ok(data.len())
    }

    // ========== Signals ==========

    pub(crate) fn status_signals(&self) -> SessionResult<StatusSignals> {
        self.check_running()?;
        let mut lines = self.lines.lock();
        let lines = lines.as_mut().ok_or(SessionError::PortNotOpen)?;
        Ok(lines.read_status()?)
    }

    /// Drive the given lines in DTR, RTS, BREAK order. Lines set before a failure
    /// keep their new level.
    pub(crate) fn set_output_signals(&self, signals: OutputSignals) -> SessionResult<()> {
        self.check_running()?;
        let mut lines = self.lines.lock();
        let lines = lines.as_mut().ok_or(SessionError::PortNotOpen)?;
        let mut levels = self.outputs.lock();

        if let Some(level) = signals.data_terminal_ready {
            lines.write_data_terminal_ready(level)?;
            levels.data_terminal_ready = level;
            debug!(session = %self.id, level, "DTR");
        }
        if let Some(level) = signals.request_to_send {
            lines.write_request_to_send(level)?;
            levels.request_to_send = level;
            debug!(session = %self.id, level, "RTS");
        }
        if let Some(active) = signals.break_active {
            lines.write_break(active)?;
            levels.break_active = active;
            debug!(session = %self.id, active, "BREAK");
        }
        Ok(())
    }

    pub(crate) fn signals(&self) -> SessionResult<SignalSet> {
        let status = self.status_signals()?;
        let levels = *self.outputs.lock();
        Ok(SignalSet {
            data_terminal_ready: levels.data_terminal_ready,
            request_to_send: levels.request_to_send,
            break_active: levels.break_active,
            data_carrier_detect: status.data_carrier_detect,
            data_set_ready: status.data_set_ready,
            clear_to_send: status.clear_to_send,
            ring_indicator: status.ring_indicator,
        })
    }

    // ========== Teardown ==========

    /// Wake every in-flight operation with `reason`. Later operations fail the same way.
    pub(crate) fn signal(&self, reason: CloseReason) {
        self.shutdown.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// The write half, unless a write still holds it (that write drops it on exit).
    pub(crate) fn take_writer(&self) -> Option<BoxedWriter> {
        self.writer.try_lock().ok().and_then(|mut writer| writer.take())
    }

    /// Wait up to `limit` for a signalled write to hand the write half back, then take it.
    pub(crate) async fn reclaim_writer(&self, limit: Duration) -> Option<BoxedWriter> {
        reclaim(&self.writer, limit, self.id, "writer").await
    }

    /// As [`reclaim_writer`](Self::reclaim_writer), for the read half. A chunk stream
    /// that is kept but never polled again holds the reader until it is dropped.
    pub(crate) async fn reclaim_reader(&self, limit: Duration) -> Option<BoxedReader> {
        reclaim(&self.reader, limit, self.id, "reader").await
    }

    /// Drop the read half (if idle) and the modem lines.
    pub(crate) fn release(&self) {
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        self.lines.lock().take();
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("id", &self.id)
            .field("port", &self.handle.path())
            .field("config", &self.config)
            .field("closing", &self.shutdown.borrow().is_some())
            .finish()
    }
}

async fn reclaim<T>(
    half: &AsyncMutex<Option<T>>,
    limit: Duration,
    session: Uuid,
    name: &str,
) -> Option<T> {
    match tokio::time::timeout(limit, half.lock()).await {
        Ok(mut guard) => guard.take(),
        Err(_) => {
            warn!(
                %session,
                half = name,
                "Half still in use after close; its holder will release it"
            );
            None
        }
    }
}

async fn wait_closed(closed: &mut watch::Receiver<Option<CloseReason>>) -> CloseReason {
    match closed.wait_for(Option::is_some).await {
        Ok(reason) => (*reason).unwrap_or(CloseReason::Closed),
        Err(_) => CloseReason::Closed,
    }
}

/// Exclusive use of one half. If the session shut down meanwhile, dropping the lease
/// drops the half with it.
struct Lease<T> {
    guard: OwnedMutexGuard<Option<T>>,
    closed: watch::Receiver<Option<CloseReason>>,
}

impl<T> Lease<T> {
    fn acquire(
        half: &Arc<AsyncMutex<Option<T>>>,
        shutdown: &watch::Sender<Option<CloseReason>>,
        busy: SessionError,
    ) -> SessionResult<Self> {
        let guard = Arc::clone(half).try_lock_owned().map_err(|_| busy)?;
        if guard.is_none() {
            return Err(SessionError::PortNotOpen);
        }
        Ok(Self {
            guard,
            closed: shutdown.subscribe(),
        })
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        if self.closed.borrow().is_some() {
            self.guard.take();
        }
    }
}

/// The read half plus its buffer, held for one `read()` or for the life of a
/// chunk stream.
pub(crate) struct ReadLease {
    session: Arc<ActiveSession>,
    lease: Lease<BoxedReader>,
    buf: Vec<u8>,
}

impl ReadLease {
    pub(crate) fn acquire(session: &Arc<ActiveSession>) -> SessionResult<Self> {
        session.check_running()?;
        let lease = Lease::acquire(&session.reader, &session.shutdown, SessionError::ReaderBusy)?;
        Ok(Self {
            session: Arc::clone(session),
            lease,
            buf: vec![0u8; session.config.buffer_size],
        })
    }

    /// Next chunk of up to `buffer_size` bytes. Empty means end of stream.
    pub(crate) async fn next_chunk(&mut self) -> SessionResult<Vec<u8>> {
        let reader = self.lease.guard.as_mut().ok_or(SessionError::PortNotOpen)?;
        let closed = &mut self.lease.closed;
        let buf = &mut self.buf;

        let n = tokio::select! {
            biased;
            reason = wait_closed(closed) => return Err(reason.into()),
            read = reader.read(&mut buf[..]) => read?,
        };

        self.session
            .bytes_read
            .fetch_add(n as u64, Ordering::Relaxed);
        trace!(session = %self.session.id, bytes = n, "Read from serial port");
        Ok(buf[..n].to_vec())
    }
}
