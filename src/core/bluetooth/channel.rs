//! Transport channel over the negotiated characteristic pair
//! Outbound payloads are written to the SEND characteristic; a change on the
//! RECV characteristic triggers an explicit read whose result is handed to
//! the relay.

use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::error::BridgeError;
use crate::core::bluetooth::session::GattSession;
use crate::core::bluetooth::stack::GattStack;
use crate::core::bluetooth::types::{DeviceAddress, GattStatus, WriteMode};
use crate::core::log_sink::LogSink;

/// A payload read from the peer, ready for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPayload {
    pub address: DeviceAddress,
    pub payload: Vec<u8>,
}

pub struct TransportChannel {
    stack: Arc<dyn GattStack>,
    log: LogSink,
}

impl TransportChannel {
    pub fn new(stack: Arc<dyn GattStack>, log: LogSink) -> Self {
        Self { stack, log }
    }

    /// Submits `payload` as a write without response, or as a plain write when
    /// the SEND characteristic only supports that.
    ///
    /// `Ok` only means the stack accepted the write, not that the peer got it.
    pub fn send(&self, session: Option<&GattSession>, payload: &[u8]) -> Result<(), BridgeError> {
        let Some((session, characteristic)) = session
            .filter(|s| s.is_ready())
            .and_then(|s| s.send_characteristic().map(|c| (s, c)))
        else {
            self.log.append("bleSend: BLE not initialized");
            return Err(BridgeError::NotReady);
        };

        let mode = if characteristic.properties.write && !characteristic.properties.write_without_response {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        };
        self.stack
            .write_characteristic(session.address(), characteristic, payload, mode)
            .map_err(|e| {
                self.log.append(format!("bleSend: write characteristics failed: {}", e));
                BridgeError::WriteSubmissionFailed(e.to_string())
            })
    }

    /// A change notification is only a signal; the value is pulled with a read.
    pub fn on_characteristic_changed(&self, session: &GattSession, characteristic: Uuid) {
        let Some(recv) = session.recv_characteristic().filter(|c| c.uuid == characteristic) else {
            debug!("Ignoring change on characteristic {}", characteristic);
            return;
        };
        if !session.is_ready() {
            self.log.append("onChChange - transport not ready, dropping update");
            return;
        }

        if let Err(e) = self.stack.read_characteristic(session.address(), recv) {
            self.log.append(format!("onChChange - readChar returns false: {}", e));
        }
    }

    pub fn on_characteristic_read(
        &self,
        session: &GattSession,
        characteristic: Uuid,
        status: &GattStatus,
        value: Vec<u8>,
    ) -> Option<InboundPayload> {
        if session.recv_characteristic().map(|c| c.uuid) != Some(characteristic) {
            debug!("Ignoring read result for characteristic {}", characteristic);
            return None;
        }
        if let GattStatus::Failure(reason) = status {
            self.log.append(format!(
                "onChRead - {}, dropping update",
                BridgeError::ReadFailed(reason.clone())
            ));
            return None;
        }

        debug!("Read {} bytes from {}", value.len(), session.address());
        Some(InboundPayload {
            address: session.address(),
            payload: value,
        })
    }

    pub fn on_characteristic_written(&self, characteristic: Uuid, status: &GattStatus) {
        if let GattStatus::Failure(reason) = status {
            self.log.append(format!(
                "bleSend: write to {} failed: {}",
                characteristic, reason
            ));
        }
    }
}
