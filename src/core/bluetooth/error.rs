//! Error types for the BLE relay bridge.

use thiserror::Error;

/// Errors raised by the scanner, the GATT session, the transport channel and
/// the relay dispatcher.
///
/// Session-level failures are stored in [`SessionState::Error`], so the enum
/// is cheap to clone and compare.
///
/// [`SessionState::Error`]: crate::core::bluetooth::SessionState::Error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transport not ready")]
    NotReady,

    #[error("Service discovery failed: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("no service!")]
    ServiceNotFound,

    #[error("no {0} characteristic!")]
    CharacteristicNotFound(String),

    #[error("no RECV descriptor!")]
    DescriptorNotFound,

    #[error("Failed to enable notifications: {0}")]
    NotificationSetupFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write submission failed: {0}")]
    WriteSubmissionFailed(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("Invalid device address: {0:?}")]
    InvalidAddress(String),

    #[error("BLE adapter not available")]
    AdapterUnavailable,

    #[error("Bluetooth stack error: {0}")]
    Stack(String),

    #[error("Relay is not running")]
    RelayUnavailable,
}

impl From<bluest::Error> for BridgeError {
    fn from(err: bluest::Error) -> Self {
        BridgeError::Stack(err.to_string())
    }
}
