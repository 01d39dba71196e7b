//! Events funneled into the bridge's single-consumer queue.
//! Stack callbacks, scan timers, relay sends and shell requests all arrive
//! here so that session state is only ever touched by one task.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::{
    Advertisement, DeviceAddress, DiscoveredService, GattStatus,
};

/// Asynchronous callbacks delivered by the Bluetooth stack.
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    Advertisement(Advertisement),
    ConnectionStateChanged {
        address: DeviceAddress,
        connected: bool,
        status: GattStatus,
    },
    ServicesDiscovered {
        address: DeviceAddress,
        status: GattStatus,
        services: Vec<DiscoveredService>,
    },
    DescriptorWritten {
        address: DeviceAddress,
        descriptor: Uuid,
        status: GattStatus,
    },
    CharacteristicChanged {
        address: DeviceAddress,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    CharacteristicRead {
        address: DeviceAddress,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    },
    CharacteristicWritten {
        address: DeviceAddress,
        characteristic: Uuid,
        status: GattStatus,
    },
}

impl StackEvent {
    /// The connection this event belongs to; advertisements have none.
    pub fn address(&self) -> Option<DeviceAddress> {
        match self {
            StackEvent::Advertisement(_) => None,
            StackEvent::ConnectionStateChanged { address, .. }
            | StackEvent::ServicesDiscovered { address, .. }
            | StackEvent::DescriptorWritten { address, .. }
            | StackEvent::CharacteristicChanged { address, .. }
            | StackEvent::CharacteristicRead { address, .. }
            | StackEvent::CharacteristicWritten { address, .. } => Some(*address),
        }
    }
}

/// Everything the bridge event loop consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Stack(StackEvent),
    /// The scan timer of the given scan generation fired.
    ScanTimeout { generation: u64 },
    /// Outbound payload issued by the relay.
    RelaySend(Vec<u8>),
    StartScan,
    Disconnect,
    Shutdown,
}

pub type EventSender = mpsc::UnboundedSender<BridgeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<BridgeEvent>;

/// Creates the bridge queue. The sender is shared by the stack, the scan
/// timer, the relay and the shell.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
