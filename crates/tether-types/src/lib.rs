//! Platform-agnostic types for the tether BLE connection keeper.
//!
//! This crate provides the shared vocabulary used by the core state
//! machine and the background service:
//!
//! - [`ConnectionTarget`]: which peripheral to hold a link to, and which
//!   characteristic (if any) to subscribe to
//! - [`ConnectionState`] and [`StatusEvent`]: the observable status stream
//! - UUID constants for the standard descriptors and the default target
//!   service
//!
//! # Example
//!
//! ```
//! use tether_types::{ConnectionTarget, uuid as uuids};
//!
//! let target = ConnectionTarget::new("AA:BB:CC:DD:EE:FF")
//!     .unwrap()
//!     .with_subscription(uuids::NORDIC_UART_SERVICE, uuids::NORDIC_UART_TX);
//! assert!(target.subscription.is_some());
//! ```

pub mod error;
pub mod status;
pub mod target;
pub mod uuid;

pub use error::TargetError;
pub use status::{ConnectionState, StatusEvent, hex_string};
pub use target::{ConnectionTarget, Subscription};
pub use crate::uuid as uuids;
