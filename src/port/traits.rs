//! Core traits and value types for the serial transport.
//!
//! The session manager never talks to the operating system directly. It goes through
//! three seams defined here:
//!
//! - [`PortProvider`] enumerates devices and asks the user to authorize new ones
//! - [`PortBackend`] opens a device into a [`PortChannel`]
//! - [`ControlLines`] drives and samples the modem lines of an open device
//!
//! Real hardware is served by [`SystemPorts`](super::SystemPorts), tests by
//! [`MockPorts`](super::MockPorts).

use super::error::PortError;
use crate::error::{SessionError, SessionResult};
use crate::state::{DEFAULT_BAUD_RATE, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Negotiated line parameters, captured when a session opens.
///
/// This is an immutable snapshot: the live, editable copy is
/// [`LineSettings`](crate::state::LineSettings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits per character.
    pub data_bits: DataBits,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Parity checking mode.
    pub parity: Parity,

    /// Flow control mode.
    pub flow_control: FlowControl,

    /// Largest chunk moved per read, and per write sub-chunk.
    pub buffer_size: usize,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl LineConfig {
    /// Check the numeric fields. The enum fields are valid by construction.
    pub fn validate(&self) -> SessionResult<()> {
        if self.baud_rate == 0 {
            return Err(SessionError::invalid_setting(
                "baud_rate",
                "must be a positive number",
            ));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(SessionError::invalid_setting(
                "buffer_size",
                format!("must be between 1 and {MAX_BUFFER_SIZE} bytes"),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            u8::from(self.data_bits),
            parity,
            u8::from(self.stop_bits)
        )?;
        if self.flow_control == FlowControl::Hardware {
            write!(f, " rts/cts")?;
        }
        Ok(())
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(format!("data bits must be 7 or 8, got {other}")),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(format!("stop bits must be 1 or 2, got {other}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    /// RTS/CTS handshaking.
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Identification data reported by the platform for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub usb_vendor_id: Option<u16>,
    pub usb_product_id: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Info for a USB device with the given vendor and product id.
    pub fn usb(vendor_id: u16, product_id: u16) -> Self {
        Self {
            usb_vendor_id: Some(vendor_id),
            usb_product_id: Some(product_id),
            ..Default::default()
        }
    }

    /// `vvvv:pppp` in lowercase hex, or `None` for non-USB devices.
    pub fn usb_id(&self) -> Option<String> {
        match (self.usb_vendor_id, self.usb_product_id) {
            (Some(vid), Some(pid)) => Some(format!("{vid:04x}:{pid:04x}")),
            _ => None,
        }
    }
}

/// A device as reported by a [`PortProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// System path or name (`/dev/ttyUSB0`, `COM3`).
    pub path: String,
    pub info: PortInfo,
}

impl PortDescriptor {
    pub fn new(path: impl Into<String>, info: PortInfo) -> Self {
        Self {
            path: path.into(),
            info,
        }
    }

    /// Short identifier for display: the USB id when known, otherwise the path.
    pub fn display_id(&self) -> String {
        self.info.usb_id().unwrap_or_else(|| self.path.clone())
    }
}

/// Restricts which devices [`PortProvider::request`] may offer.
///
/// Unset fields match anything. A filter list matches a device when any filter does;
/// an empty list matches every device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFilter {
    #[serde(default)]
    pub usb_vendor_id: Option<u16>,
    #[serde(default)]
    pub usb_product_id: Option<u16>,
}

impl PortFilter {
    /// Match every product of one vendor.
    pub fn vendor(vendor_id: u16) -> Self {
        Self {
            usb_vendor_id: Some(vendor_id),
            usb_product_id: None,
        }
    }

    /// Match one exact USB device model.
    pub fn usb(vendor_id: u16, product_id: u16) -> Self {
        Self {
            usb_vendor_id: Some(vendor_id),
            usb_product_id: Some(product_id),
        }
    }

    pub fn matches(&self, info: &PortInfo) -> bool {
        let field_matches =
            |want: Option<u16>, have: Option<u16>| want.map_or(true, |w| have == Some(w));
        field_matches(self.usb_vendor_id, info.usb_vendor_id)
            && field_matches(self.usb_product_id, info.usb_product_id)
    }

    pub fn matches_any(filters: &[PortFilter], info: &PortInfo) -> bool {
        filters.is_empty() || filters.iter().any(|f| f.matches(info))
    }
}

/// Input lines reported by the attached device. Sampled on demand, never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSignals {
    pub data_carrier_detect: bool,
    pub data_set_ready: bool,
    pub clear_to_send: bool,
    pub ring_indicator: bool,
}

/// A partial update of the output lines. `None` leaves a line untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_terminal_ready: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_to_send: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_active: Option<bool>,
}

impl OutputSignals {
    pub fn dtr(level: bool) -> Self {
        Self {
            data_terminal_ready: Some(level),
            ..Default::default()
        }
    }

    pub fn rts(level: bool) -> Self {
        Self {
            request_to_send: Some(level),
            ..Default::default()
        }
    }

    pub fn brk(active: bool) -> Self {
        Self {
            break_active: Some(active),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data_terminal_ready.is_none()
            && self.request_to_send.is_none()
            && self.break_active.is_none()
    }
}

/// All seven modem lines of an open session.
///
/// The output fields hold the level this session last drove; the status fields are
/// sampled from hardware when the set is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSet {
    pub data_terminal_ready: bool,
    pub request_to_send: bool,
    pub break_active: bool,
    pub data_carrier_detect: bool,
    pub data_set_ready: bool,
    pub clear_to_send: bool,
    pub ring_indicator: bool,
}

/// The three output lines a host can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSignal {
    DataTerminalReady,
    RequestToSend,
    Break,
}

impl fmt::Display for OutputSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DataTerminalReady => "DTR",
            Self::RequestToSend => "RTS",
            Self::Break => "BREAK",
        })
    }
}

/// Modem control access for an open device.
///
/// Calls take effect on the hardware immediately. Implementations are driven from
/// one task at a time (the session serializes access).
pub trait ControlLines: Send + fmt::Debug {
    fn write_data_terminal_ready(&mut self, level: bool) -> Result<(), PortError>;

    fn write_request_to_send(&mut self, level: bool) -> Result<(), PortError>;

    /// Start (`true`) or stop (`false`) transmitting a break condition.
    fn write_break(&mut self, active: bool) -> Result<(), PortError>;

    /// Sample DCD, DSR, CTS and RI.
    fn read_status(&mut self) -> Result<StatusSignals, PortError>;
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The pieces of an opened device: independent read and write halves plus modem lines.
///
/// Dropping every piece releases the device.
pub struct PortChannel {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub lines: Box<dyn ControlLines>,
}

impl PortChannel {
    pub fn new<R, W, L>(reader: R, writer: W, lines: L) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
        L: ControlLines + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            lines: Box::new(lines),
        }
    }
}

impl fmt::Debug for PortChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortChannel")
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

/// Device discovery and authorization.
#[async_trait]
pub trait PortProvider: Send + Sync {
    /// Every device the platform already allows us to use, in discovery order.
    /// Never prompts the user.
    async fn enumerate(&self) -> Result<Vec<PortDescriptor>, PortError>;

    /// Ask the platform (or the user) to pick a device matching `filters`.
    ///
    /// `Ok(None)` means the request was declined.
    async fn request(&self, filters: &[PortFilter]) -> Result<Option<PortDescriptor>, PortError>;
}

/// Opens devices into byte channels.
#[async_trait]
pub trait PortBackend: Send + Sync {
    /// Whether `path` is currently held open through this backend or elsewhere.
    fn is_open(&self, path: &str) -> bool;

    /// Open `port` with the given line parameters.
    async fn open(&self, port: &PortDescriptor, config: &LineConfig)
        -> Result<PortChannel, PortError>;
}
