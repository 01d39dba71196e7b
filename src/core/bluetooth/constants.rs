//! Constants used throughout the bridge
//! This module contains the GATT identifiers of the relay peer together with
//! the timing and sizing defaults.

use uuid::Uuid;

/// The UUID of the relay peer's primary service
pub const UUID_RELAY_SERVICE: Uuid = Uuid::from_u128(0x00002220_0000_1000_8000_00805f9b34fb);

/// The UUID of the Client Characteristic Configuration descriptor on the receive characteristic
pub const UUID_NOTIFY_CONFIG_DESCRIPTOR: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// The UUID of the characteristic the bridge writes outbound payloads to
pub const UUID_SEND_CHAR: Uuid = Uuid::from_u128(0x00002222_0000_1000_8000_00805f9b34fb);

/// The UUID of the characteristic the peer notifies inbound payloads on
pub const UUID_RECV_CHAR: Uuid = Uuid::from_u128(0x00002221_0000_1000_8000_00805f9b34fb);

/// Value written into the configuration descriptor to enable notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Scan duration in milliseconds
pub const DEFAULT_SCAN_DURATION_MS: u64 = 10_000;

/// Maximum number of lines kept by the display log
pub const LOG_CAPACITY: usize = 500;

/// Largest payload a relay-originated send may carry
pub const MAX_PAYLOAD_LEN: usize = 20;

/// Names used in diagnostics for the two negotiated characteristics
pub const SEND_CHAR_NAME: &str = "SEND";
pub const RECV_CHAR_NAME: &str = "RECV";
