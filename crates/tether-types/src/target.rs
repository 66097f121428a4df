//! The connection target descriptor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TargetError;

/// A notification subscription on a specific service/characteristic pair.
///
/// Service and characteristic ids are either both present or both absent;
/// a target either carries a full `Subscription` or none at all, so a lone
/// id cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Service owning the characteristic.
    pub service: Uuid,
    /// Characteristic to enable notifications on.
    pub characteristic: Uuid,
}

/// Describes the peripheral a connection cycle is tethered to.
///
/// Immutable once a cycle starts; the state machine never mutates the
/// target, it only replaces it on the next external start command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// Device address or platform identifier (MAC address on Linux/Windows,
    /// a CoreBluetooth UUID on macOS).
    pub address: String,
    /// Optional notification subscription. When absent, the machine goes
    /// straight to `Active` after service discovery.
    pub subscription: Option<Subscription>,
}

impl ConnectionTarget {
    /// Create a target with no subscription.
    pub fn new(address: impl Into<String>) -> Result<Self, TargetError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(TargetError::EmptyAddress);
        }
        Ok(Self {
            address,
            subscription: None,
        })
    }

    /// Attach a notification subscription.
    #[must_use]
    pub fn with_subscription(mut self, service: Uuid, characteristic: Uuid) -> Self {
        self.subscription = Some(Subscription {
            service,
            characteristic,
        });
        self
    }

    /// Build a target from the optional id pair used on the wire.
    ///
    /// Rejects a lone service or characteristic id.
    pub fn from_parts(
        address: impl Into<String>,
        service: Option<Uuid>,
        characteristic: Option<Uuid>,
    ) -> Result<Self, TargetError> {
        let target = Self::new(address)?;
        match (service, characteristic) {
            (Some(service), Some(characteristic)) => {
                Ok(target.with_subscription(service, characteristic))
            }
            (None, None) => Ok(target),
            _ => Err(TargetError::PartialSubscription),
        }
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subscription {
            Some(sub) => write!(f, "{} ({}/{})", self.address, sub.service, sub.characteristic),
            None => write!(f, "{}", self.address),
        }
    }
}
