//! Shared test utilities for serial-session tests.
//!
//! This module provides common test infrastructure including:
//! - Mock-backed managers with one or more simulated devices
//! - Helpers to open a session and grab the device end of the link
//! - Timeouts so a hung future fails the test instead of stalling it

#![allow(dead_code)]

use serial_session::port::{MockPorts, PortInfo};
use serial_session::{LineConfig, SessionManager};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;

/// Path of the default simulated device.
pub const MOCK_PORT: &str = "/dev/mock0";

/// Upper bound for anything that should complete "promptly".
pub const PROMPT: Duration = Duration::from_secs(2);

/// A CP2102-style USB bridge.
pub fn cp2102() -> PortInfo {
    PortInfo {
        manufacturer: Some("Silicon Labs".to_string()),
        product: Some("CP2102 USB to UART Bridge Controller".to_string()),
        serial_number: Some("0001".to_string()),
        ..PortInfo::usb(0x10c4, 0xea60)
    }
}

/// A manager over a mock backend exposing [`MOCK_PORT`].
pub fn mock_manager() -> (MockPorts, SessionManager) {
    let mock = MockPorts::new().with_port(MOCK_PORT, cp2102());
    let manager = SessionManager::with_ports(Arc::new(mock.clone()));
    (mock, manager)
}

/// Select [`MOCK_PORT`], open it with `config` and return the device end of the link.
pub async fn open_with(
    mock: &MockPorts,
    manager: &SessionManager,
    config: LineConfig,
) -> DuplexStream {
    let handle = manager
        .initialize()
        .await
        .expect("Failed to list ports")
        .expect("No mock port available");
    manager
        .open_port(Some(handle), config)
        .await
        .expect("Failed to open mock port");
    mock.take_peer(MOCK_PORT).expect("Mock peer already taken")
}

/// [`open_with`] using default line settings.
pub async fn open_default(mock: &MockPorts, manager: &SessionManager) -> DuplexStream {
    open_with(mock, manager, LineConfig::default()).await
}

/// Await `future`, failing the test if it takes longer than [`PROMPT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(PROMPT, future)
        .await
        .expect("Operation did not complete in time")
}

/// Deterministic test pattern of `len` bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}
