//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::core::bluetooth::error::BridgeError;

/// A 6-byte Bluetooth hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub const LEN: usize = 6;

    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Parses the colon-separated textual form, e.g. `AA:BB:CC:DD:EE:01`.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        let invalid = || BridgeError::InvalidAddress(text.to_string());
        let mut bytes = [0u8; Self::LEN];
        let mut parts = text.trim().split(':');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl FromStr for DeviceAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Capability bits a characteristic advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// A characteristic as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    /// UUIDs of the descriptors attached to this characteristic
    pub descriptors: Vec<Uuid>,
}

/// A primary service and its characteristics as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// A resolved characteristic the session can address on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

impl CharacteristicHandle {
    pub fn new(service: Uuid, characteristic: &DiscoveredCharacteristic) -> Self {
        Self {
            service,
            uuid: characteristic.uuid,
            properties: characteristic.properties,
        }
    }
}

/// A resolved descriptor the session can address on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorHandle {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub uuid: Uuid,
}

/// How a characteristic write is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Outcome reported by an asynchronous stack callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure(String),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, GattStatus::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattStatus::Success => f.write_str("success"),
            GattStatus::Failure(reason) => write!(f, "failure ({reason})"),
        }
    }
}

/// An advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Textual hardware address as reported by the platform
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// States of one GATT session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    DiscoveringServices,
    Negotiating,
    Ready,
    /// Negotiation halted; the session stays here until the peer disconnects.
    Error(BridgeError),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("Disconnected"),
            SessionState::Connecting => f.write_str("Connecting"),
            SessionState::Connected => f.write_str("Connected"),
            SessionState::DiscoveringServices => f.write_str("DiscoveringServices"),
            SessionState::Negotiating => f.write_str("Negotiating"),
            SessionState::Ready => f.write_str("Ready"),
            SessionState::Error(reason) => write!(f, "Error({reason})"),
        }
    }
}

/// Phases of the device scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Scanning,
    Found(DeviceAddress),
    TimedOut,
}
