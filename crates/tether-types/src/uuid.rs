//! Bluetooth UUIDs used by the tether link driver.
//!
//! The defaults match the Nordic UART service, the most common vendor
//! service for byte-stream notifications from hobbyist peripherals.

use uuid::{Uuid, uuid};

// --- Nordic UART Service (NUS) UUIDs ---

/// Nordic UART service UUID.
pub const NORDIC_UART_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// Nordic UART RX characteristic (central writes to the peripheral).
pub const NORDIC_UART_RX: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Nordic UART TX characteristic (peripheral notifies the central).
pub const NORDIC_UART_TX: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

// --- Standard BLE UUIDs ---

/// Client characteristic configuration descriptor (CCCD).
///
/// Writing `0x0001` to this descriptor enables notifications on the
/// characteristic that owns it.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");
