//! A scripted link driver for testing without Bluetooth hardware.
//!
//! [`MockLink`] implements [`LinkDriver`] by popping pre-queued outcomes;
//! the paired [`MockHandle`] scripts those outcomes, injects asynchronous
//! events like disconnects and notifications, and exposes call counters.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{ConnectFailureReason, Error};
use crate::link::{LinkDriver, LinkEvent, LinkEventSender, LinkSignal};

/// Scripted outcome of a connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// The attempt succeeds.
    Connected,
    /// The attempt fails with this reason.
    Fail(String),
    /// The radio is unavailable. Reported as a non-recoverable error.
    RadioUnavailable,
}

/// Scripted outcome of a discovery or subscribe call.
#[derive(Debug, Clone)]
pub enum OpOutcome {
    /// The operation succeeds.
    Ok,
    /// The operation fails with this reason.
    Fail(String),
    /// The operation never completes. The machine must cope with silence.
    Hang,
}

#[derive(Default)]
struct Script {
    connect: Mutex<VecDeque<ConnectOutcome>>,
    discover: Mutex<VecDeque<OpOutcome>>,
    subscribe: Mutex<VecDeque<OpOutcome>>,
    connect_count: AtomicU32,
    discover_count: AtomicU32,
    subscribe_count: AtomicU32,
    release_count: AtomicU32,
    last_generation: AtomicU64,
}

/// Controls a [`MockLink`] from the test body.
#[derive(Clone)]
pub struct MockHandle {
    script: Arc<Script>,
    events: LinkEventSender,
}

impl MockHandle {
    /// Queue the outcome of the next connect attempt.
    ///
    /// With an empty queue, attempts succeed.
    pub fn queue_connect(&self, outcome: ConnectOutcome) {
        self.script.connect.lock().unwrap().push_back(outcome);
    }

    /// Queue `n` failing connect attempts.
    pub fn queue_connect_failures(&self, n: u32) {
        for _ in 0..n {
            self.queue_connect(ConnectOutcome::Fail("connection refused".to_string()));
        }
    }

    /// Queue the outcome of the next discovery call.
    pub fn queue_discovery(&self, outcome: OpOutcome) {
        self.script.discover.lock().unwrap().push_back(outcome);
    }

    /// Queue the outcome of the next subscribe call.
    pub fn queue_subscribe(&self, outcome: OpOutcome) {
        self.script.subscribe.lock().unwrap().push_back(outcome);
    }

    /// Inject a link event tagged with `generation`, as a real radio
    /// callback would.
    pub fn emit(&self, generation: u64, event: LinkEvent) {
        let _ = self.events.send(LinkSignal { generation, event });
    }

    /// Inject an event tagged with the generation of the latest connect.
    pub fn emit_current(&self, event: LinkEvent) {
        self.emit(self.last_generation(), event);
    }

    /// Generation passed to the most recent connect call.
    pub fn last_generation(&self) -> u64 {
        self.script.last_generation.load(Ordering::SeqCst)
    }

    /// Number of connect calls made so far.
    pub fn connect_count(&self) -> u32 {
        self.script.connect_count.load(Ordering::SeqCst)
    }

    /// Number of discovery calls made so far.
    pub fn discover_count(&self) -> u32 {
        self.script.discover_count.load(Ordering::SeqCst)
    }

    /// Number of subscribe calls made so far.
    pub fn subscribe_count(&self) -> u32 {
        self.script.subscribe_count.load(Ordering::SeqCst)
    }

    /// Number of release calls made so far.
    pub fn release_count(&self) -> u32 {
        self.script.release_count.load(Ordering::SeqCst)
    }
}

/// Scripted [`LinkDriver`].
pub struct MockLink {
    script: Arc<Script>,
    events: LinkEventSender,
}

impl MockLink {
    /// Create a mock reporting into `events`, plus its control handle.
    pub fn new(events: LinkEventSender) -> (Self, MockHandle) {
        let script = Arc::new(Script::default());
        let handle = MockHandle {
            script: Arc::clone(&script),
            events: events.clone(),
        };
        (Self { script, events }, handle)
    }

    fn send(&self, generation: u64, event: LinkEvent) {
        let _ = self.events.send(LinkSignal { generation, event });
    }
}

#[async_trait]
impl LinkDriver for MockLink {
    async fn connect(&mut self, address: &str, generation: u64) {
        self.script.connect_count.fetch_add(1, Ordering::SeqCst);
        self.script.last_generation.store(generation, Ordering::SeqCst);
        let outcome = self
            .script
            .connect
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectOutcome::Connected);
        match outcome {
            ConnectOutcome::Connected => self.send(generation, LinkEvent::Connected),
            ConnectOutcome::Fail(reason) => {
                self.send(
                    generation,
                    LinkEvent::ConnectFailed {
                        error: Error::connect_failed(address, ConnectFailureReason::Other(reason)),
                    },
                );
            }
            ConnectOutcome::RadioUnavailable => {
                self.send(
                    generation,
                    LinkEvent::ConnectFailed {
                        error: Error::AdapterUnavailable,
                    },
                );
            }
        }
    }

    async fn discover_services(&mut self, generation: u64) {
        self.script.discover_count.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .discover
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpOutcome::Ok);
        match outcome {
            OpOutcome::Ok => self.send(generation, LinkEvent::ServicesDiscovered),
            OpOutcome::Fail(reason) => {
                self.send(
                    generation,
                    LinkEvent::DiscoveryFailed {
                        error: Error::DiscoveryFailed(reason),
                    },
                );
            }
            OpOutcome::Hang => {}
        }
    }

    async fn subscribe(&mut self, _service: Uuid, _characteristic: Uuid, generation: u64) {
        self.script.subscribe_count.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .subscribe
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpOutcome::Ok);
        match outcome {
            OpOutcome::Ok => self.send(generation, LinkEvent::Subscribed),
            OpOutcome::Fail(reason) => {
                self.send(
                    generation,
                    LinkEvent::SubscribeFailed {
                        error: Error::SubscribeFailed(reason),
                    },
                );
            }
            OpOutcome::Hang => {}
        }
    }

    async fn release(&mut self) {
        self.script.release_count.fetch_add(1, Ordering::SeqCst);
    }
}
