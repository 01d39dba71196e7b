//! Core functionality for the BLE relay bridge
//! This module contains the Bluetooth transport, the display log and the
//! serialized relay access.

pub mod bluetooth;
pub mod bridge;
pub mod events;
pub mod log_sink;
pub mod relay;

// Re-export commonly used types
pub use bluetooth::BluestStack;
pub use bridge::{BridgeHandle, RelayBridge};
pub use events::{event_channel, BridgeEvent, EventReceiver, EventSender, StackEvent};
pub use log_sink::LogSink;
pub use relay::{OutboundSender, Relay, RelayContext, RelayHandle};
