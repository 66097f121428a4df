//! The link driver: single point of contact with the radio stack.
//!
//! Vendor BLE stacks deliver completion through callbacks on their own
//! threads. This module reframes all of that as one inbound event channel:
//! every operation on [`LinkDriver`] returns immediately and reports its
//! outcome as a [`LinkEvent`] tagged with the generation of the link handle
//! it belongs to. The supervisor drops events from stale generations, which
//! is what makes `stop()` safe against in-flight radio callbacks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConnectFailureReason, Error};

/// Events emitted by a link driver.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug)]
#[non_exhaustive]
pub enum LinkEvent {
    /// The connect attempt succeeded; the link is up.
    Connected,
    /// The connect attempt failed. The supervisor classifies the error:
    /// recoverable failures feed the reconnect policy, a dead radio is
    /// terminal.
    ConnectFailed {
        /// Why the attempt failed.
        error: Error,
    },
    /// An established link went down.
    Disconnected,
    /// Service discovery finished.
    ServicesDiscovered,
    /// Service discovery failed. The link may still be up.
    DiscoveryFailed {
        /// Why discovery failed.
        error: Error,
    },
    /// Notifications are enabled on the target characteristic.
    Subscribed,
    /// Enabling notifications failed. The link is still up.
    SubscribeFailed {
        /// Why the subscribe failed.
        error: Error,
    },
    /// A value change pushed by the peripheral.
    Notification {
        /// The notified payload.
        value: Vec<u8>,
    },
}

/// A link event tagged with the generation of the handle that produced it.
#[derive(Debug)]
pub struct LinkSignal {
    /// Generation assigned by the supervisor when the handle was opened.
    pub generation: u64,
    /// The event itself.
    pub event: LinkEvent,
}

/// Sender half of the link event channel.
pub type LinkEventSender = mpsc::UnboundedSender<LinkSignal>;

/// Receiver half of the link event channel.
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkSignal>;

/// Create the channel a driver reports through.
pub fn link_channel() -> (LinkEventSender, LinkEventReceiver) {
    mpsc::unbounded_channel()
}

/// Abstraction over the radio stack.
///
/// Implementations must never block the caller on radio completion: each
/// operation schedules work and reports through the event channel. This is
/// the seam that lets the supervisor be tested against a scripted driver.
#[async_trait]
pub trait LinkDriver: Send {
    /// Begin a connection attempt to `address`.
    ///
    /// Completion arrives as [`LinkEvent::Connected`] or
    /// [`LinkEvent::ConnectFailed`], never as a return value. Any
    /// previously open handle is released first.
    async fn connect(&mut self, address: &str, generation: u64);

    /// Begin service discovery. Valid only once connected.
    async fn discover_services(&mut self, generation: u64);

    /// Enable notifications on the target characteristic.
    async fn subscribe(&mut self, service: Uuid, characteristic: Uuid, generation: u64);

    /// Release the link handle. Idempotent; always safe to call.
    async fn release(&mut self);
}

/// Timeouts for the btleplug-backed driver.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How long to scan while resolving the address to a peripheral.
    pub resolve_timeout: Duration,
    /// Timeout for establishing the connection once resolved.
    pub connect_timeout: Duration,
    /// Timeout for service discovery.
    pub discovery_timeout: Duration,
    /// Timeout for the subscribe (CCCD write).
    pub subscribe_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(10),
        }
    }
}

impl LinkConfig {
    /// Set the address resolution timeout.
    #[must_use]
    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the subscribe timeout.
    #[must_use]
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }
}

/// State shared between the driver facade and its spawned tasks.
struct LinkInner {
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    /// Cancelled on release; every per-link task selects on it.
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl LinkInner {
    fn new() -> Self {
        Self {
            adapter: None,
            peripheral: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }
}

/// btleplug-backed [`LinkDriver`].
///
/// Holds at most one live peripheral handle. All radio completion is
/// reported through the event channel given at construction.
pub struct BtleLink {
    events: LinkEventSender,
    config: LinkConfig,
    inner: Arc<Mutex<LinkInner>>,
}

impl BtleLink {
    /// Create a driver reporting into `events`.
    pub fn new(events: LinkEventSender, config: LinkConfig) -> Self {
        Self {
            events,
            config,
            inner: Arc::new(Mutex::new(LinkInner::new())),
        }
    }

    fn emit(events: &LinkEventSender, generation: u64, event: LinkEvent) {
        // The supervisor may already be gone during shutdown.
        let _ = events.send(LinkSignal { generation, event });
    }

    /// Resolve `address` to a peripheral by scanning briefly.
    ///
    /// Matches either the BLE address string or the platform peripheral id
    /// (macOS does not expose MAC addresses).
    async fn resolve(
        adapter: &Adapter,
        address: &str,
        resolve_timeout: Duration,
    ) -> Option<Peripheral> {
        if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
            warn!("Failed to start scan: {e}");
            return None;
        }

        let deadline = tokio::time::Instant::now() + resolve_timeout;
        let found = loop {
            let peripherals = adapter.peripherals().await.unwrap_or_default();
            let mut hit = None;
            for peripheral in peripherals {
                if peripheral.id().to_string().eq_ignore_ascii_case(address) {
                    hit = Some(peripheral);
                    break;
                }
                if let Ok(Some(props)) = peripheral.properties().await
                    && props.address.to_string().eq_ignore_ascii_case(address)
                {
                    hit = Some(peripheral);
                    break;
                }
            }
            if hit.is_some() {
                break hit;
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            sleep(Duration::from_millis(200)).await;
        };

        let _ = adapter.stop_scan().await;
        found
    }
}

#[async_trait]
impl LinkDriver for BtleLink {
    #[tracing::instrument(level = "info", skip(self), fields(address = %address, generation))]
    async fn connect(&mut self, address: &str, generation: u64) {
        // Never two simultaneously open handles.
        self.release().await;

        let cancel = {
            let inner = self.inner.lock().await;
            inner.cancel.clone()
        };

        let events = self.events.clone();
        let config = self.config.clone();
        let inner = Arc::clone(&self.inner);
        let address = address.to_string();

        let handle = tokio::spawn(async move {
            let attempt = async {
                let manager = match Manager::new().await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Radio stack unavailable: {e}");
                        Self::emit(
                            &events,
                            generation,
                            LinkEvent::ConnectFailed {
                                error: Error::AdapterUnavailable,
                            },
                        );
                        return;
                    }
                };
                let adapter = match manager.adapters().await {
                    Ok(adapters) => match adapters.into_iter().next() {
                        Some(a) => a,
                        None => {
                            warn!("No Bluetooth adapter present");
                            Self::emit(
                                &events,
                                generation,
                                LinkEvent::ConnectFailed {
                                    error: Error::AdapterUnavailable,
                                },
                            );
                            return;
                        }
                    },
                    Err(e) => {
                        warn!("Failed to enumerate adapters: {e}");
                        Self::emit(
                            &events,
                            generation,
                            LinkEvent::ConnectFailed {
                                error: Error::AdapterUnavailable,
                            },
                        );
                        return;
                    }
                };

                info!("Resolving {address}...");
                let Some(peripheral) =
                    Self::resolve(&adapter, &address, config.resolve_timeout).await
                else {
                    Self::emit(
                        &events,
                        generation,
                        LinkEvent::ConnectFailed {
                            error: Error::connect_failed(&address, ConnectFailureReason::NotFound),
                        },
                    );
                    return;
                };

                info!("Connecting to {address}...");
                match timeout(config.connect_timeout, peripheral.connect()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        Self::emit(
                            &events,
                            generation,
                            LinkEvent::ConnectFailed {
                                error: Error::connect_failed(
                                    &address,
                                    ConnectFailureReason::BleError(e.to_string()),
                                ),
                            },
                        );
                        return;
                    }
                    Err(_) => {
                        Self::emit(
                            &events,
                            generation,
                            LinkEvent::ConnectFailed {
                                error: Error::connect_failed(
                                    &address,
                                    ConnectFailureReason::Timeout,
                                ),
                            },
                        );
                        return;
                    }
                }

                // Watch for the peripheral dropping off the adapter.
                let watcher = {
                    let events = events.clone();
                    let peripheral_id = peripheral.id();
                    let adapter_events = adapter.events().await;
                    let cancel = {
                        let inner = inner.lock().await;
                        inner.cancel.clone()
                    };
                    adapter_events.ok().map(|mut stream| {
                        tokio::spawn(async move {
                            loop {
                                tokio::select! {
                                    _ = cancel.cancelled() => break,
                                    event = stream.next() => match event {
                                        Some(CentralEvent::DeviceDisconnected(id))
                                            if id == peripheral_id =>
                                        {
                                            Self::emit(&events, generation, LinkEvent::Disconnected);
                                            break;
                                        }
                                        Some(_) => {}
                                        None => break,
                                    }
                                }
                            }
                        })
                    })
                };

                {
                    let mut inner = inner.lock().await;
                    inner.adapter = Some(adapter);
                    inner.peripheral = Some(peripheral);
                    if let Some(watcher) = watcher {
                        inner.tasks.push(watcher);
                    }
                }

                Self::emit(&events, generation, LinkEvent::Connected);
            };

            tokio::select! {
                _ = cancel.cancelled() => debug!("Connect attempt cancelled"),
                _ = attempt => {}
            }
        });

        self.inner.lock().await.tasks.push(handle);
    }

    #[tracing::instrument(level = "debug", skip(self), fields(generation))]
    async fn discover_services(&mut self, generation: u64) {
        let peripheral = self.inner.lock().await.peripheral.clone();
        let Some(peripheral) = peripheral else {
            Self::emit(
                &self.events,
                generation,
                LinkEvent::DiscoveryFailed {
                    error: Error::DiscoveryFailed("no open link".to_string()),
                },
            );
            return;
        };

        let events = self.events.clone();
        let discovery_timeout = self.config.discovery_timeout;
        let handle = tokio::spawn(async move {
            let event = match timeout(discovery_timeout, peripheral.discover_services()).await {
                Ok(Ok(())) => {
                    debug!("Found {} services", peripheral.services().len());
                    LinkEvent::ServicesDiscovered
                }
                Ok(Err(e)) => LinkEvent::DiscoveryFailed {
                    error: Error::Bluetooth(e),
                },
                Err(_) => LinkEvent::DiscoveryFailed {
                    error: Error::timeout("service discovery", discovery_timeout),
                },
            };
            Self::emit(&events, generation, event);
        });

        self.inner.lock().await.tasks.push(handle);
    }

    #[tracing::instrument(level = "debug", skip(self), fields(%service, %characteristic, generation))]
    async fn subscribe(&mut self, service: Uuid, characteristic: Uuid, generation: u64) {
        let (peripheral, cancel) = {
            let inner = self.inner.lock().await;
            (inner.peripheral.clone(), inner.cancel.clone())
        };
        let Some(peripheral) = peripheral else {
            Self::emit(
                &self.events,
                generation,
                LinkEvent::SubscribeFailed {
                    error: Error::SubscribeFailed("no open link".to_string()),
                },
            );
            return;
        };

        let events = self.events.clone();
        let subscribe_timeout = self.config.subscribe_timeout;
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let services = peripheral.services();
            let target = services
                .iter()
                .filter(|s| s.uuid == service)
                .flat_map(|s| s.characteristics.iter())
                .find(|c| c.uuid == characteristic)
                .cloned();

            let Some(target) = target else {
                Self::emit(
                    &events,
                    generation,
                    LinkEvent::SubscribeFailed {
                        error: Error::CharacteristicNotFound {
                            uuid: characteristic.to_string(),
                            service_count: services.len(),
                        },
                    },
                );
                return;
            };

            // btleplug writes the CCCD as part of subscribe().
            match timeout(subscribe_timeout, peripheral.subscribe(&target)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    Self::emit(
                        &events,
                        generation,
                        LinkEvent::SubscribeFailed {
                            error: Error::Bluetooth(e),
                        },
                    );
                    return;
                }
                Err(_) => {
                    Self::emit(
                        &events,
                        generation,
                        LinkEvent::SubscribeFailed {
                            error: Error::timeout("subscribe", subscribe_timeout),
                        },
                    );
                    return;
                }
            }

            let mut stream = match peripheral.notifications().await {
                Ok(s) => s,
                Err(e) => {
                    Self::emit(
                        &events,
                        generation,
                        LinkEvent::SubscribeFailed {
                            error: Error::Bluetooth(e),
                        },
                    );
                    return;
                }
            };

            // Subscribed goes on the channel before the forwarder starts,
            // so no notification can ever precede it.
            info!("Notifications enabled on {characteristic}");
            Self::emit(&events, generation, LinkEvent::Subscribed);

            let forwarder = {
                let events = events.clone();
                tokio::spawn(async move {
                    while let Some(notification) = stream.next().await {
                        if notification.uuid == characteristic {
                            Self::emit(
                                &events,
                                generation,
                                LinkEvent::Notification {
                                    value: notification.value,
                                },
                            );
                        }
                    }
                })
            };
            {
                let mut inner = inner.lock().await;
                // Release raced us; tear the stream back down.
                if inner.cancel.is_cancelled() || cancel.is_cancelled() {
                    forwarder.abort();
                    return;
                }
                inner.tasks.push(forwarder);
            }
        });

        self.inner.lock().await.tasks.push(handle);
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn release(&mut self) {
        let (peripheral, tasks) = {
            let mut inner = self.inner.lock().await;
            inner.cancel.cancel();
            inner.cancel = CancellationToken::new();
            inner.adapter = None;
            (inner.peripheral.take(), std::mem::take(&mut inner.tasks))
        };

        for task in tasks {
            task.abort();
        }

        if let Some(peripheral) = peripheral {
            // Best-effort; the peripheral may already be gone.
            if let Err(e) = peripheral.disconnect().await {
                debug!("Best-effort disconnect failed: {e}");
            }
        }
    }
}
