//! Host serial ports: enumeration through `serialport`, async I/O through `tokio-serial`.
//!
//! An opened [`tokio_serial::SerialStream`] is shared by three handles (reader, writer
//! and modem lines). Each handle locks the stream only for the duration of a single
//! poll or ioctl, the same way `tokio::io::split` shares its inner value, so a pending
//! read never blocks a write or a DTR toggle. The path claim lives next to the stream,
//! so it is released exactly when the last handle closes the descriptor.
//!
//! Claims are process-wide: every [`SystemPorts`] sees the devices opened by the others.

use super::claims::{PortClaim, PortClaims};
use super::error::PortError;
use super::traits::{
    ControlLines, LineConfig, PortBackend, PortChannel, PortDescriptor, PortFilter, PortInfo,
    PortProvider, StatusSignals,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serialport::{SerialPort, SerialPortType};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

/// Paths opened through any [`SystemPorts`] in this process.
static HOST_CLAIMS: Lazy<PortClaims> = Lazy::new(PortClaims::new);

/// Picks one of the offered devices, or declines with `None`.
pub type PortChooser = Box<dyn Fn(&[PortDescriptor]) -> Option<usize> + Send + Sync>;

/// Provider and backend for the serial ports of this machine.
///
/// Every enumerated port counts as authorized. [`PortProvider::request`] offers the
/// ports matching the filters to the configured chooser; without one, the first match
/// is taken.
pub struct SystemPorts {
    claims: PortClaims,
    chooser: Option<PortChooser>,
}

impl SystemPorts {
    pub fn new() -> Self {
        Self {
            claims: HOST_CLAIMS.clone(),
            chooser: None,
        }
    }

    /// Let `chooser` decide which device a request returns (e.g. an interactive prompt).
    pub fn with_chooser<F>(mut self, chooser: F) -> Self
    where
        F: Fn(&[PortDescriptor]) -> Option<usize> + Send + Sync + 'static,
    {
        self.chooser = Some(Box::new(chooser));
        self
    }
}

impl Default for SystemPorts {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemPorts")
            .field("claims", &self.claims)
            .field("chooser", &self.chooser.is_some())
            .finish()
    }
}

#[async_trait]
impl PortProvider for SystemPorts {
    async fn enumerate(&self) -> Result<Vec<PortDescriptor>, PortError> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(PortError::other)??;
        debug!("Enumerated {} serial port(s)", ports.len());
        Ok(ports.into_iter().map(describe).collect())
    }

    async fn request(&self, filters: &[PortFilter]) -> Result<Option<PortDescriptor>, PortError> {
        let ports = self.enumerate().await?;
        Ok(pick(ports, filters, self.chooser.as_ref()))
    }
}

#[async_trait]
impl PortBackend for SystemPorts {
    fn is_open(&self, path: &str) -> bool {
        self.claims.is_held(path)
    }

    async fn open(
        &self,
        port: &PortDescriptor,
        config: &LineConfig,
    ) -> Result<PortChannel, PortError> {
        let claim = self.claims.claim(&port.path)?;

        let builder = tokio_serial::new(port.path.as_str(), config.baud_rate)
            .data_bits(config.data_bits.into())
            .flow_control(config.flow_control.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into());

        let stream = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| open_error(&port.path, e))?;

        info!(port = %port.path, line = %config, "Opened serial device");

        let shared = SharedStream(Arc::new(SharedInner {
            stream: Mutex::new(stream),
            claim,
        }));
        let lines = SystemLines {
            stream: shared.clone(),
        };
        Ok(PortChannel::new(shared.clone(), shared, lines))
    }
}

/// Another process holding the device shows up as a failed exclusive lock.
fn open_error(path: &str, e: tokio_serial::Error) -> PortError {
    match e.kind {
        tokio_serial::ErrorKind::NoDevice if e.description.contains("exclusive") => {
            PortError::AlreadyOpen(path.to_string())
        }
        tokio_serial::ErrorKind::NoDevice => PortError::not_found(path),
        tokio_serial::ErrorKind::InvalidInput => PortError::config(e.to_string()),
        _ => PortError::Serial(e),
    }
}

/// Apply the filters and let the chooser (or first-match) decide.
fn pick(
    ports: Vec<PortDescriptor>,
    filters: &[PortFilter],
    chooser: Option<&PortChooser>,
) -> Option<PortDescriptor> {
    let candidates: Vec<PortDescriptor> = ports
        .into_iter()
        .filter(|p| PortFilter::matches_any(filters, &p.info))
        .collect();
    if candidates.is_empty() {
        return None;
    }
    let index = match chooser {
        Some(choose) => choose(&candidates)?,
        None => 0,
    };
    candidates.into_iter().nth(index)
}

fn describe(info: serialport::SerialPortInfo) -> PortDescriptor {
    let port_info = match info.port_type {
        SerialPortType::UsbPort(usb) => PortInfo {
            usb_vendor_id: Some(usb.vid),
            usb_product_id: Some(usb.pid),
            manufacturer: usb.manufacturer,
            product: usb.product,
            serial_number: usb.serial_number,
        },
        _ => PortInfo::default(),
    };
    PortDescriptor::new(info.port_name, port_info)
}

/// One stream, shared by the reader, writer and lines handles.
#[derive(Clone)]
struct SharedStream(Arc<SharedInner>);

struct SharedInner {
    // Dropped before the claim, so the path is free only once the descriptor is closed.
    stream: Mutex<tokio_serial::SerialStream>,
    claim: PortClaim,
}

impl SharedStream {
    fn lock(&self) -> parking_lot::MutexGuard<'_, tokio_serial::SerialStream> {
        self.0.stream.lock()
    }
}

impl AsyncRead for SharedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut stream = self.lock();
        Pin::new(&mut *stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SharedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut stream = self.lock();
        Pin::new(&mut *stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut stream = self.lock();
        Pin::new(&mut *stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut stream = self.lock();
        Pin::new(&mut *stream).poll_shutdown(cx)
    }
}

/// Modem lines of an open host port.
struct SystemLines {
    stream: SharedStream,
}

impl ControlLines for SystemLines {
    fn write_data_terminal_ready(&mut self, level: bool) -> Result<(), PortError> {
        self.stream.lock().write_data_terminal_ready(level)?;
        Ok(())
    }

    fn write_request_to_send(&mut self, level: bool) -> Result<(), PortError> {
        self.stream.lock().write_request_to_send(level)?;
        Ok(())
    }

    fn write_break(&mut self, active: bool) -> Result<(), PortError> {
        let mut stream = self.stream.lock();
        if active {
            stream.set_break()?;
        } else {
            stream.clear_break()?;
        }
        Ok(())
    }

    fn read_status(&mut self) -> Result<StatusSignals, PortError> {
        let mut stream = self.stream.lock();
        Ok(StatusSignals {
            data_carrier_detect: stream.read_carrier_detect()?,
            data_set_ready: stream.read_data_set_ready()?,
            clear_to_send: stream.read_clear_to_send()?,
            ring_indicator: stream.read_ring_indicator()?,
        })
    }
}

impl std::fmt::Debug for SystemLines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemLines")
            .field("path", &self.stream.0.claim.path())
            .finish()
    }
}
