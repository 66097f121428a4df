//! Error types for tether-core.
//!
//! # Recovery strategy
//!
//! The supervisor absorbs every recoverable error into the reconnect
//! policy; callers of `start()`/`stop()` never see them. Only fatal
//! conditions surface, and then only through the status stream:
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`Error::AdapterUnavailable`] | Fatal, terminal `Failed`, no retries |
//! | [`Error::ConnectFailed`] | Backoff and retry |
//! | [`Error::Timeout`] | Backoff and retry |
//! | [`Error::DiscoveryFailed`] | Logged; link kept unless configured otherwise |
//! | [`Error::SubscribeFailed`] | Degrade to unsubscribed `Active` |
//! | [`Error::MaxAttemptsExceeded`] | Fatal, terminal `Failed` |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while maintaining the connection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error
/// variants in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the underlying stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is available or the radio is powered off.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// A connect attempt failed.
    #[error("connection to '{address}' failed: {reason}")]
    ConnectFailed {
        /// The device address that failed to connect.
        address: String,
        /// The structured reason for the failure.
        reason: ConnectFailureReason,
    },

    /// Service discovery failed after connecting.
    #[error("service discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Enabling notifications on the target characteristic failed.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The target characteristic was not found on the peripheral.
    #[error("characteristic {uuid} not found (searched {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Operation timed out.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled by an explicit stop.
    #[error("operation cancelled")]
    Cancelled,

    /// The reconnect policy gave up.
    #[error("no more retries after {attempts} failed attempts")]
    MaxAttemptsExceeded {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The connection target was malformed.
    #[error(transparent)]
    InvalidTarget(#[from] tether_types::TargetError),
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectFailureReason {
    /// The peripheral was not seen during address resolution.
    NotFound,
    /// The attempt timed out.
    Timeout,
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "device not found"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::BleError(msg) => write!(f, "BLE error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connect failure with structured reason.
    pub fn connect_failed(address: impl Into<String>, reason: ConnectFailureReason) -> Self {
        Self::ConnectFailed {
            address: address.into(),
            reason,
        }
    }

    /// Whether this error should feed the reconnect policy.
    ///
    /// Fatal errors bypass backoff entirely: an unavailable radio cannot
    /// be fixed by retrying, and an exhausted policy already decided to
    /// stop.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Bluetooth(_) => true,
            Error::ConnectFailed { .. } => true,
            Error::DiscoveryFailed(_) => true,
            Error::SubscribeFailed(_) => true,
            Error::Timeout { .. } => true,
            Error::AdapterUnavailable => false,
            Error::MaxAttemptsExceeded { .. } => false,
            Error::Cancelled => false,
            Error::InvalidConfig(_) => false,
            Error::InvalidTarget(_) => false,
            Error::CharacteristicNotFound { .. } => false,
            _ => false,
        }
    }
}

/// Result type alias using tether-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connect_failed("AA:BB", ConnectFailureReason::Timeout);
        assert!(err.to_string().contains("AA:BB"));
        assert!(err.to_string().contains("timed out"));

        let err = Error::MaxAttemptsExceeded { attempts: 5 };
        assert!(err.to_string().contains('5'));

        let err = Error::timeout("connect", Duration::from_secs(15));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("15s"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(
            Error::connect_failed("AA:BB", ConnectFailureReason::Other("transient".to_string()))
                .is_recoverable()
        );
        assert!(Error::timeout("connect", Duration::from_secs(15)).is_recoverable());
        assert!(Error::DiscoveryFailed("gatt 129".into()).is_recoverable());
        assert!(Error::SubscribeFailed("cccd write".into()).is_recoverable());

        assert!(!Error::AdapterUnavailable.is_recoverable());
        assert!(!Error::MaxAttemptsExceeded { attempts: 5 }.is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
        assert!(!Error::InvalidConfig("bad".into()).is_recoverable());
    }
}
