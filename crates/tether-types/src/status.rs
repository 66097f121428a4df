//! Connection states and the observable status stream.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The state of the connection maintenance cycle.
///
/// Owned exclusively by the connection supervisor; other components only
/// ever observe it through [`StatusEvent`]s or a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No target, nothing to do.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected, waiting for service discovery to finish.
    Discovering,
    /// Waiting for the notification subscription to be confirmed.
    Subscribing,
    /// Link is up (and subscribed, unless the target has no subscription
    /// or the subscription degraded).
    Active,
    /// Link went down; a retry is about to be scheduled.
    Disconnected,
    /// Waiting out the delay before retry number `attempt + 1`.
    Backoff {
        /// How many attempts have failed in this cycle.
        attempt: u32,
    },
    /// Gave up; terminal until an explicit restart.
    Failed,
}

impl ConnectionState {
    /// Whether the machine will act on link events in this state.
    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Idle | Self::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Discovering => write!(f, "discovering"),
            Self::Subscribing => write!(f, "subscribing"),
            Self::Active => write!(f, "active"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Backoff { attempt } => write!(f, "backoff (attempt {attempt})"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One observation on the status stream.
///
/// Append-only: events are created once and never mutated. Consumers that
/// cannot keep up are expected to coalesce; the producer never blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// When the observation was made.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// State at the time of the observation.
    pub state: ConnectionState,
    /// Human-readable status line for display.
    pub message: String,
}

impl StatusEvent {
    /// Create an event stamped with the current time.
    pub fn now(state: ConnectionState, message: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            state,
            message: message.into(),
        }
    }
}

/// Format bytes as a lowercase hex string for display.
///
/// ```
/// assert_eq!(tether_types::hex_string(&[0x01, 0x02, 0xff]), "0102ff");
/// ```
pub fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
        assert_eq!(
            ConnectionState::Backoff { attempt: 3 }.to_string(),
            "backoff (attempt 3)"
        );
    }

    #[test]
    fn test_is_running() {
        assert!(!ConnectionState::Idle.is_running());
        assert!(!ConnectionState::Failed.is_running());
        assert!(ConnectionState::Connecting.is_running());
        assert!(ConnectionState::Backoff { attempt: 1 }.is_running());
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[]), "");
        assert_eq!(hex_string(&[0x00]), "00");
        assert_eq!(hex_string(&[0x01, 0x02]), "0102");
        assert_eq!(hex_string(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
    }

    #[test]
    fn test_status_event_serialization() {
        let event = StatusEvent::now(ConnectionState::Active, "Receiving data from AA:BB");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"active\""));
        assert!(json.contains("Receiving data from AA:BB"));

        let back: StatusEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, ConnectionState::Active);
    }

    #[test]
    fn test_backoff_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Backoff { attempt: 2 }).unwrap();
        let back: ConnectionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ConnectionState::Backoff { attempt: 2 });
    }
}
