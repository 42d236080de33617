//! Polling hot-plug watcher.
//!
//! Hosts report attach/detach through different mechanisms (udev, IOKit, WM_DEVICECHANGE).
//! Polling the enumeration covers all of them at the cost of latency.

use super::PortRegistry;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Poll period used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Spawn a task that calls [`PortRegistry::refresh`] every `period`.
///
/// The task stops on its own once the registry is dropped; abort the returned handle
/// to stop it earlier.
pub fn spawn_watcher(registry: &Arc<PortRegistry>, period: Duration) -> JoinHandle<()> {
    let registry: Weak<PortRegistry> = Arc::downgrade(registry);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(registry) = registry.upgrade() else {
                debug!("Port registry dropped, stopping hot-plug watcher");
                break;
            };
            if let Err(e) = registry.refresh().await {
                warn!(error = %e, "Port enumeration failed");
            }
        }
    })
}
