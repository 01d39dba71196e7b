//! The Bluetooth capability surface the bridge drives.
//!
//! Every operation is fire-and-continue: the call only reports whether the
//! request was accepted, and its completion arrives later as a
//! [`StackEvent`](crate::core::events::StackEvent) on the bridge queue.

use crate::core::bluetooth::error::BridgeError;
use crate::core::bluetooth::types::{CharacteristicHandle, DescriptorHandle, DeviceAddress, WriteMode};

pub trait GattStack: Send + Sync {
    /// Begin delivering advertisements.
    fn start_scan(&self) -> Result<(), BridgeError>;

    /// Stop delivering advertisements. Safe to call when not scanning.
    fn stop_scan(&self);

    /// Request a GATT connection; completes with `ConnectionStateChanged`.
    fn connect(&self, address: DeviceAddress) -> Result<(), BridgeError>;

    /// Tear down the connection; completes with `ConnectionStateChanged`.
    fn disconnect(&self, address: DeviceAddress);

    /// Completes with `ServicesDiscovered`.
    fn discover_services(&self, address: DeviceAddress) -> Result<(), BridgeError>;

    /// Register local interest in value changes of `characteristic`.
    fn enable_notifications(
        &self,
        address: DeviceAddress,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), BridgeError>;

    /// Completes with `DescriptorWritten`.
    fn write_descriptor(
        &self,
        address: DeviceAddress,
        descriptor: &DescriptorHandle,
        value: &[u8],
    ) -> Result<(), BridgeError>;

    /// Completes with `CharacteristicRead`.
    fn read_characteristic(
        &self,
        address: DeviceAddress,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), BridgeError>;

    /// Completes with `CharacteristicWritten`.
    fn write_characteristic(
        &self,
        address: DeviceAddress,
        characteristic: &CharacteristicHandle,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), BridgeError>;
}
