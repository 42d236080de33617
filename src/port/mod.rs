//! Port abstraction layer for serial communication.
//!
//! Provides the transport traits plus two implementations: [`SystemPorts`] for the
//! host's devices and [`MockPorts`] for tests.

pub mod claims;
pub mod error;
pub mod mock;
pub mod system;
pub mod traits;

pub use claims::{PortClaim, PortClaims};
pub use error::PortError;
pub use mock::{MockPorts, SignalEvent};
pub use system::{PortChooser, SystemPorts};
pub use traits::*;
