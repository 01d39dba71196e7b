//! Bluetooth functionality for the BLE relay bridge
//! This module handles scanning for the relay peer, negotiating the GATT
//! session and moving payloads over the negotiated characteristic pair.

mod bluest_stack;
mod channel;
mod constants;
mod error;
mod scanner;
mod session;
mod stack;
mod types;

// Re-export types that should be publicly accessible
pub use bluest_stack::BluestStack;
pub use channel::{InboundPayload, TransportChannel};
pub use constants::*; // Re-export all constants
pub use error::BridgeError;
pub use scanner::{DeviceScanner, ScanFilter};
pub use session::GattSession;
pub use stack::GattStack;
pub use types::{
    Advertisement, CharacteristicHandle, CharacteristicProperties, DescriptorHandle, DeviceAddress,
    DiscoveredCharacteristic, DiscoveredService, GattStatus, ScanPhase, SessionState, WriteMode,
};
