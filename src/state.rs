use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SessionError, SessionResult};
use crate::port::{DataBits, FlowControl, LineConfig, Parity, StopBits};

// Default line configuration constants
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_BUFFER_SIZE: usize = 255;
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Conventional baud rates offered by settings front ends. Other positive rates are
/// accepted too.
pub const STANDARD_BAUD_RATES: [u32; 11] = [
    1200, 2400, 4800, 9600, 14400, 31250, 38400, 56000, 57600, 76800, 115_200,
];

/// Lifecycle of the single session a manager owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

impl SessionState {
    /// Whether a session currently holds (or is acquiring) a port.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
        })
    }
}

/// Live, editable line settings.
///
/// Setters only touch memory and reject nonsense values. A session opens with a
/// [`snapshot`](Self::snapshot), so later edits never reach an open port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineSettings {
    config: LineConfig,
}

impl LineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration after validating it.
    pub fn from_config(config: LineConfig) -> SessionResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Immutable copy handed to the session at open time.
    pub fn snapshot(&self) -> LineConfig {
        self.config
    }

    pub fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) -> SessionResult<()> {
        if baud_rate == 0 {
            return Err(SessionError::invalid_setting(
                "baud_rate",
                "must be a positive number",
            ));
        }
        self.config.baud_rate = baud_rate;
        Ok(())
    }

    pub fn data_bits(&self) -> DataBits {
        self.config.data_bits
    }

    /// Accepts 7 or 8.
    pub fn set_data_bits(&mut self, bits: u8) -> SessionResult<()> {
        self.config.data_bits = DataBits::try_from(bits)
            .map_err(|message| SessionError::invalid_setting("data_bits", message))?;
        Ok(())
    }

    pub fn stop_bits(&self) -> StopBits {
        self.config.stop_bits
    }

    /// Accepts 1 or 2.
    pub fn set_stop_bits(&mut self, bits: u8) -> SessionResult<()> {
        self.config.stop_bits = StopBits::try_from(bits)
            .map_err(|message| SessionError::invalid_setting("stop_bits", message))?;
        Ok(())
    }

    pub fn parity(&self) -> Parity {
        self.config.parity
    }

    pub fn set_parity(&mut self, parity: Parity) {
        self.config.parity = parity;
    }

    pub fn flow_control(&self) -> FlowControl {
        self.config.flow_control
    }

    pub fn set_flow_control(&mut self, flow_control: FlowControl) {
        self.config.flow_control = flow_control;
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    pub fn set_buffer_size(&mut self, size: usize) -> SessionResult<()> {
        if size == 0 || size > MAX_BUFFER_SIZE {
            return Err(SessionError::invalid_setting(
                "buffer_size",
                format!("must be between 1 and {MAX_BUFFER_SIZE} bytes"),
            ));
        }
        self.config.buffer_size = size;
        Ok(())
    }
}
