//! Error types for target validation in tether-types.

use thiserror::Error;

/// Errors that can occur when building a [`crate::ConnectionTarget`].
///
/// This error type is platform-agnostic and does not include BLE-specific
/// errors (those belong in tether-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TargetError {
    /// The device address is empty.
    #[error("device address cannot be empty")]
    EmptyAddress,

    /// A subscription was given a service id without a characteristic id,
    /// or the other way around.
    #[error("subscription requires both a service and a characteristic id")]
    PartialSubscription,
}
