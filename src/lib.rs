//! Serial Session Library
//!
//! Discover, open, configure and exchange bytes with serial-attached devices
//! (typically microcontrollers), toggle the modem control lines used for reset and
//! boot-mode selection, and observe attach/detach events.
//!
//! # Modules
//!
//! - `registry`: Authorized ports, port handles and attach/detach notifications
//! - `state`: Line settings and the session state machine
//! - `service`: The session manager (lifecycle, byte stream, signals)
//! - `port`: Transport traits plus host (`SystemPorts`) and in-memory (`MockPorts`) backends
//! - `error`: Unified error handling
//! - `config`: Configuration management with TOML support
//! - `logging`: Tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use serial_session::{SessionManager, SessionResult};
//!
//! # async fn run() -> SessionResult<()> {
//! let manager = SessionManager::system();
//! manager.initialize().await?;
//! manager.configure(|settings| settings.set_baud_rate(9600))?;
//! manager.open().await?;
//!
//! manager.reset_device().await?;
//! manager.write(b"help\r\n").await?;
//! let reply = manager.read().await?;
//! println!("{}", String::from_utf8_lossy(&reply));
//!
//! manager.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod port;
pub mod registry;
pub mod service;
pub mod state;

// Re-export commonly used types for convenience
pub use error::{SessionError, SessionResult};
pub use port::{
    DataBits, FlowControl, LineConfig, OutputSignals, Parity, PortError, PortFilter, PortInfo,
    SignalSet, StatusSignals, StopBits,
};
pub use registry::{PortEvent, PortHandle, PortRegistry, Subscription};
pub use service::{
    ByteChunks, SessionManager, SessionStatus, RELEASE_TIMEOUT, RESET_SETTLE_INTERVAL,
};
pub use state::{LineSettings, SessionState};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
