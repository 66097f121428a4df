//! Connection maintenance for a single known BLE peripheral.
//!
//! `tether-core` keeps one long-lived Bluetooth Low Energy link alive from
//! a background process: connect, discover services, subscribe to a
//! notification characteristic, and reconnect on a fixed-delay policy when
//! the link drops. All state lives in a single supervisor task; callers
//! interact through a [`SupervisorHandle`] and observe progress on a
//! status event stream.
//!
//! # Quick start
//!
//! ```no_run
//! use tether_core::{BtleLink, LinkConfig, ReconnectPolicy, link_channel, spawn};
//! use tether_types::ConnectionTarget;
//!
//! # async fn run() -> tether_core::Result<()> {
//! let (tx, rx) = link_channel();
//! let driver = Box::new(BtleLink::new(tx, LinkConfig::default()));
//! let handle = spawn(driver, rx, ReconnectPolicy::default())?;
//!
//! let mut status = handle.subscribe_status();
//! handle.start(ConnectionTarget::new("AA:BB:CC:DD:EE:FF")?).await?;
//!
//! while let Ok(event) = status.recv().await {
//!     println!("[{}] {}", event.state, event.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod link;
pub mod mock;
pub mod policy;
pub mod supervisor;

pub use error::{ConnectFailureReason, Error, Result};
pub use events::{StatusDispatcher, StatusReceiver};
pub use link::{
    BtleLink, LinkConfig, LinkDriver, LinkEvent, LinkEventReceiver, LinkEventSender, LinkSignal,
    link_channel,
};
pub use policy::{DiscoveryFailurePolicy, ReconnectPolicy, RetryDecision};
pub use supervisor::{SupervisorHandle, spawn};
