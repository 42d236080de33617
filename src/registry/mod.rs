//! Port registry: the authorized-device cache and attach/detach notifications.
//!
//! The cache is filled from the [`PortProvider`] on first use and kept current by
//! [`PortRegistry::notify_attach`] / [`PortRegistry::notify_detach`] (called by the
//! platform glue or by [`hotplug::spawn_watcher`]).
//!
//! Notifications reach two kinds of observers:
//!
//! - callbacks registered with [`PortRegistry::subscribe`], invoked synchronously and
//!   unregistered when the returned [`Subscription`] is dropped
//! - async consumers of [`PortRegistry::events`] / [`PortRegistry::event_stream`]

pub mod hotplug;

use crate::error::{SessionError, SessionResult};
use crate::port::{PortDescriptor, PortFilter, PortInfo, PortProvider};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, OnceCell};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

// ========== Port Handle ==========

/// Cheap-clone identifier of one device.
///
/// Handles compare equal by path. A handle is invalidated (not attached) once its
/// device is reported detached; re-plugging the device produces a fresh handle.
#[derive(Clone)]
pub struct PortHandle(Arc<HandleInner>);

struct HandleInner {
    descriptor: PortDescriptor,
    attached: AtomicBool,
}

impl PortHandle {
    pub(crate) fn new(descriptor: PortDescriptor) -> Self {
        Self(Arc::new(HandleInner {
            descriptor,
            attached: AtomicBool::new(true),
        }))
    }

    pub fn path(&self) -> &str {
        &self.0.descriptor.path
    }

    pub fn info(&self) -> &PortInfo {
        &self.0.descriptor.info
    }

    pub fn descriptor(&self) -> &PortDescriptor {
        &self.0.descriptor
    }

    /// USB id (`vvvv:pppp`) when known, otherwise the path.
    pub fn display_id(&self) -> String {
        self.0.descriptor.display_id()
    }

    pub fn is_attached(&self) -> bool {
        self.0.attached.load(Ordering::Acquire)
    }

    fn mark_detached(&self) {
        self.0.attached.store(false, Ordering::Release);
    }
}

impl PartialEq for PortHandle {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl Eq for PortHandle {}

impl fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortHandle")
            .field("path", &self.path())
            .field("usb_id", &self.info().usb_id())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl fmt::Display for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.info().usb_id() {
            Some(id) => write!(f, "{} ({id})", self.path()),
            None => f.write_str(self.path()),
        }
    }
}

// ========== Events ==========

/// A device came or went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    Attached(PortHandle),
    Detached(PortHandle),
}

impl PortEvent {
    pub fn handle(&self) -> &PortHandle {
        match self {
            Self::Attached(handle) | Self::Detached(handle) => handle,
        }
    }
}

type Listener = Arc<dyn Fn(&PortEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Keeps a listener registered. Dropping it unregisters the listener.
#[must_use = "the listener is removed as soon as the Subscription is dropped"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Unregister now. Equivalent to dropping.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ========== Registry ==========

/// Process-wide list of devices the application may use.
pub struct PortRegistry {
    provider: Arc<dyn PortProvider>,
    init: OnceCell<()>,
    ports: RwLock<Vec<PortHandle>>,
    listeners: Arc<Mutex<Listeners>>,
    events: broadcast::Sender<PortEvent>,
}

impl PortRegistry {
    pub fn new(provider: Arc<dyn PortProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            init: OnceCell::new(),
            ports: RwLock::new(Vec::new()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            events,
        }
    }

    /// All authorized devices in discovery order. Never prompts.
    ///
    /// The first call enumerates through the provider; later calls answer from the
    /// cache. If that first enumeration fails the error is returned and the next call
    /// tries again.
    pub async fn list_authorized_ports(&self) -> SessionResult<Vec<PortHandle>> {
        self.ensure_initialized().await?;
        Ok(self.ports.read().clone())
    }

    /// Ask the platform (or the user) to authorize one more device.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoSelection` if the request was declined
    /// - `SessionError::Io` if the provider failed
    pub async fn request_new_port(&self, filters: &[PortFilter]) -> SessionResult<PortHandle> {
        self.ensure_initialized().await?;
        let descriptor = self
            .provider
            .request(filters)
            .await?
            .ok_or(SessionError::NoSelection)?;

        let (handle, added) = self.insert(descriptor);
        if added {
            info!(port = %handle, "Authorized serial device");
        }
        Ok(handle)
    }

    /// Cached handle for `path`, if the device is known and attached.
    pub fn find(&self, path: &str) -> Option<PortHandle> {
        self.ports.read().iter().find(|p| p.path() == path).cloned()
    }

    /// Register a callback for attach/detach events.
    ///
    /// The callback runs on the thread that reports the event, after the registry has
    /// updated its cache and without any registry lock held.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PortEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Broadcast receiver of every later event.
    pub fn events(&self) -> broadcast::Receiver<PortEvent> {
        self.events.subscribe()
    }

    /// [`events`](Self::events) as a `Stream`. A consumer that falls behind skips the
    /// events it missed.
    pub fn event_stream(&self) -> impl Stream<Item = PortEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(error = %err, "Port event consumer lagged");
                None
            }
        })
    }

    /// Record a newly attached device and notify observers.
    ///
    /// A path that is already known is not reported twice.
    pub fn notify_attach(&self, descriptor: PortDescriptor) -> PortHandle {
        let (handle, added) = self.insert(descriptor);
        if added {
            info!(port = %handle, "Serial device attached");
            self.emit(PortEvent::Attached(handle.clone()));
        }
        handle
    }

    /// Invalidate the handle for `path`, drop it from the cache and notify observers.
    ///
    /// Returns the detached handle, or `None` if the path was unknown.
    pub fn notify_detach(&self, path: &str) -> Option<PortHandle> {
        let handle = {
            let mut ports = self.ports.write();
            let index = ports.iter().position(|p| p.path() == path)?;
            ports.remove(index)
        };
        handle.mark_detached();
        warn!(port = %handle, "Serial device detached");
        self.emit(PortEvent::Detached(handle.clone()));
        Some(handle)
    }

    /// Enumerate again and report the difference as attach/detach events.
    ///
    /// On an uninitialised registry this only fills the cache.
    pub async fn refresh(&self) -> SessionResult<()> {
        if !self.init.initialized() {
            return self.ensure_initialized().await;
        }

        let found = self.provider.enumerate().await?;
        let known: Vec<String> = self
            .ports
            .read()
            .iter()
            .map(|p| p.path().to_string())
            .collect();

        for path in &known {
            if !found.iter().any(|d| &d.path == path) {
                self.notify_detach(path);
            }
        }
        for descriptor in found {
            if !known.contains(&descriptor.path) {
                self.notify_attach(descriptor);
            }
        }
        Ok(())
    }

    async fn ensure_initialized(&self) -> SessionResult<()> {
        self.init
            .get_or_try_init(|| async {
                let found = self.provider.enumerate().await?;
                let count = found.len();
                for descriptor in found {
                    self.insert(descriptor);
                }
                debug!("Port registry initialised with {count} device(s)");
                Ok::<(), SessionError>(())
            })
            .await?;
        Ok(())
    }

    /// Add `descriptor` unless its path is cached. Returns the cached handle and
    /// whether it was new.
    fn insert(&self, descriptor: PortDescriptor) -> (PortHandle, bool) {
        let mut ports = self.ports.write();
        if let Some(existing) = ports.iter().find(|p| p.path() == descriptor.path) {
            return (existing.clone(), false);
        }
        let handle = PortHandle::new(descriptor);
        ports.push(handle.clone());
        (handle, true)
    }

    fn emit(&self, event: PortEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

impl fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortRegistry")
            .field("initialized", &self.init.initialized())
            .field("ports", &*self.ports.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockPorts;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> (MockPorts, PortRegistry) {
        let mock = MockPorts::new()
            .with_port("/dev/ttyUSB0", PortInfo::usb(0x10c4, 0xea60))
            .with_port("/dev/ttyS0", PortInfo::default());
        let registry = PortRegistry::new(Arc::new(mock.clone()));
        (mock, registry)
    }

    #[tokio::test]
    async fn test_list_is_cached_after_first_enumeration() {
        let (mock, registry) = registry();
        let first = registry.list_authorized_ports().await.unwrap();
        mock.add_port("/dev/ttyACM0", PortInfo::default());
        let second = registry.list_authorized_ports().await.unwrap();

        assert_eq!(mock.enumerate_calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first[0].path(), "/dev/ttyUSB0");
        assert_eq!(first[0].display_id(), "10c4:ea60");
        assert_eq!(first[1].display_id(), "/dev/ttyS0");
    }

    #[tokio::test]
    async fn test_failed_first_enumeration_retries() {
        let (mock, registry) = registry();
        mock.fail_next_enumerate("udev unavailable");

        assert!(registry.list_authorized_ports().await.is_err());
        assert_eq!(registry.list_authorized_ports().await.unwrap().len(), 2);
        assert_eq!(mock.enumerate_calls(), 2);
    }

    #[tokio::test]
    async fn test_detach_invalidates_handle() {
        let (_mock, registry) = registry();
        let ports = registry.list_authorized_ports().await.unwrap();
        let handle = ports[0].clone();

        let detached = registry.notify_detach("/dev/ttyUSB0").unwrap();
        assert_eq!(detached, handle);
        assert!(!handle.is_attached());
        assert!(registry.find("/dev/ttyUSB0").is_none());
        assert!(registry.notify_detach("/dev/ttyUSB0").is_none());

        let again = registry.notify_attach(handle.descriptor().clone());
        assert!(again.is_attached());
        assert!(!handle.is_attached());
    }

    #[tokio::test]
    async fn test_subscription_drop_unregisters() {
        let (_mock, registry) = registry();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let subscription = registry.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify_attach(PortDescriptor::new("/dev/ttyACM0", PortInfo::default()));
        registry.notify_attach(PortDescriptor::new("/dev/ttyACM0", PortInfo::default()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        drop(subscription);
        registry.notify_detach("/dev/ttyACM0");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_declined_and_accepted() {
        let (mock, registry) = registry();
        assert!(matches!(
            registry.request_new_port(&[]).await,
            Err(SessionError::NoSelection)
        ));

        mock.respond_to_request(Some(PortDescriptor::new(
            "/dev/ttyUSB0",
            PortInfo::usb(0x10c4, 0xea60),
        )));
        registry.request_new_port(&[]).await.unwrap();
        assert_eq!(registry.list_authorized_ports().await.unwrap().len(), 2);
    }
}
