//! GATT session handling for the relay peer
//! This module drives one connection attempt from connect through service
//! discovery and characteristic negotiation to a ready transport.

use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    ENABLE_NOTIFICATION_VALUE, RECV_CHAR_NAME, SEND_CHAR_NAME, UUID_NOTIFY_CONFIG_DESCRIPTOR,
    UUID_RECV_CHAR, UUID_RELAY_SERVICE, UUID_SEND_CHAR,
};
use crate::core::bluetooth::error::BridgeError;
use crate::core::bluetooth::stack::GattStack;
use crate::core::bluetooth::types::{
    CharacteristicHandle, DescriptorHandle, DeviceAddress, DiscoveredService, GattStatus, SessionState,
};
use crate::core::log_sink::LogSink;

/// One connection attempt to one device.
///
/// A session is never reused: once it reaches `Disconnected` after a
/// connect it is inert, and the bridge creates a fresh one for the next
/// attempt. A halted negotiation leaves the session in `Error` until the
/// peer disconnects.
#[derive(Debug)]
pub struct GattSession {
    address: DeviceAddress,
    state: SessionState,
    service: Option<DiscoveredService>,
    recv_characteristic: Option<CharacteristicHandle>,
    send_characteristic: Option<CharacteristicHandle>,
    config_descriptor: Option<DescriptorHandle>,
    await_descriptor_write: bool,
    awaiting_descriptor_write: bool,
}

impl GattSession {
    pub fn new(address: DeviceAddress, await_descriptor_write: bool) -> Self {
        Self {
            address,
            state: SessionState::Disconnected,
            service: None,
            recv_characteristic: None,
            send_characteristic: None,
            config_descriptor: None,
            await_descriptor_write,
            awaiting_descriptor_write: false,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Anything but `Disconnected` holds the radio.
    pub fn is_active(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    pub fn service_uuid(&self) -> Option<Uuid> {
        self.service.as_ref().map(|s| s.uuid)
    }

    pub fn recv_characteristic(&self) -> Option<&CharacteristicHandle> {
        self.recv_characteristic.as_ref()
    }

    pub fn send_characteristic(&self) -> Option<&CharacteristicHandle> {
        self.send_characteristic.as_ref()
    }

    /// Requests the connection; the outcome arrives as a connection-state event.
    pub fn connect(&mut self, stack: &dyn GattStack, log: &LogSink) -> Result<(), BridgeError> {
        if self.state != SessionState::Disconnected {
            return Err(BridgeError::InvalidState(format!(
                "connect requested while {}",
                self.state
            )));
        }

        self.transition(SessionState::Connecting, log);
        if let Err(e) = stack.connect(self.address) {
            log.append(format!("session {}: connect request failed: {}", self.address, e));
            self.transition(SessionState::Disconnected, log);
            return Err(e);
        }
        Ok(())
    }

    pub fn on_connection_state(
        &mut self,
        connected: bool,
        status: &GattStatus,
        stack: &dyn GattStack,
        log: &LogSink,
    ) {
        log.append(format!(
            "  onConnectionStateChange {} connected={}",
            status, connected
        ));

        if !connected {
            if self.state == SessionState::Disconnected {
                debug!("Session {} already disconnected", self.address);
                return;
            }
            if self.state == SessionState::Connecting {
                log.append(format!("BLE connection to {} failed", self.address));
            } else {
                log.append("BLE disconnected");
            }
            self.clear_handles();
            self.transition(SessionState::Disconnected, log);
            return;
        }

        if self.state != SessionState::Connecting {
            debug!("Ignoring connected event for {} while {}", self.address, self.state);
            return;
        }

        log.append("BLE connected!");
        self.transition(SessionState::Connected, log);

        match stack.discover_services(self.address) {
            Ok(()) => self.transition(SessionState::DiscoveringServices, log),
            Err(e) => self.halt(BridgeError::ServiceDiscoveryFailed(e.to_string()), log),
        }
    }

    pub fn on_services_discovered(
        &mut self,
        status: &GattStatus,
        services: &[DiscoveredService],
        stack: &dyn GattStack,
        log: &LogSink,
    ) {
        if self.state != SessionState::DiscoveringServices {
            debug!("Ignoring service discovery result for {} while {}", self.address, self.state);
            return;
        }

        log.append(format!("services discovered! {}", status));
        match status {
            GattStatus::Success => self.negotiate(services, stack, log),
            GattStatus::Failure(reason) => {
                self.halt(BridgeError::ServiceDiscoveryFailed(reason.clone()), log)
            }
        }
    }

    pub fn on_descriptor_written(&mut self, descriptor: Uuid, status: &GattStatus, log: &LogSink) {
        if !self.awaiting_descriptor_write {
            // Fire-and-forget mode, or a late confirmation.
            if !status.is_success() {
                log.append(format!(
                    "session {}: descriptor {} write {} (not awaited)",
                    self.address, descriptor, status
                ));
            }
            return;
        }

        if self.config_descriptor.as_ref().map(|d| d.uuid) != Some(descriptor) {
            debug!("Ignoring write completion for descriptor {} on {}", descriptor, self.address);
            return;
        }

        self.awaiting_descriptor_write = false;
        match status {
            GattStatus::Success => {
                log.append("  writeDescr confirmed");
                self.finish_negotiation(log);
            }
            GattStatus::Failure(reason) => {
                self.halt(BridgeError::NotificationSetupFailed(reason.clone()), log)
            }
        }
    }

    /// Steps a through e; f through i run once the descriptor write is settled.
    fn negotiate(&mut self, services: &[DiscoveredService], stack: &dyn GattStack, log: &LogSink) {
        self.transition(SessionState::Negotiating, log);
        log.append(format!("SERV {}", UUID_RELAY_SERVICE));
        log.append(format!("CONF {}", UUID_NOTIFY_CONFIG_DESCRIPTOR));
        log.append(format!("SEND {}", UUID_SEND_CHAR));
        log.append(format!("RECV {}", UUID_RECV_CHAR));

        let Some(service) = services.iter().find(|s| s.uuid == UUID_RELAY_SERVICE) else {
            for service in services {
                log.append(format!("  service {}", service.uuid));
            }
            return self.halt(BridgeError::ServiceNotFound, log);
        };

        let Some(recv) = service.characteristic(UUID_RECV_CHAR) else {
            return self.halt(BridgeError::CharacteristicNotFound(RECV_CHAR_NAME.to_string()), log);
        };
        let recv_handle = CharacteristicHandle::new(service.uuid, recv);

        if !recv.descriptors.contains(&UUID_NOTIFY_CONFIG_DESCRIPTOR) {
            return self.halt(BridgeError::DescriptorNotFound, log);
        }
        let descriptor = DescriptorHandle {
            service: service.uuid,
            characteristic: recv.uuid,
            uuid: UUID_NOTIFY_CONFIG_DESCRIPTOR,
        };

        self.service = Some(service.clone());
        self.recv_characteristic = Some(recv_handle.clone());
        self.config_descriptor = Some(descriptor.clone());

        if let Err(e) = stack.enable_notifications(self.address, &recv_handle) {
            return self.halt(BridgeError::NotificationSetupFailed(e.to_string()), log);
        }
        log.append("  setChar ok");

        if let Err(e) = stack.write_descriptor(self.address, &descriptor, &ENABLE_NOTIFICATION_VALUE) {
            return self.halt(BridgeError::WriteSubmissionFailed(e.to_string()), log);
        }

        if self.await_descriptor_write {
            self.awaiting_descriptor_write = true;
            log.append("  writeDescr submitted, awaiting confirmation");
        } else {
            log.append("  writeDescr submitted, not awaiting confirmation");
            self.finish_negotiation(log);
        }
    }

    fn finish_negotiation(&mut self, log: &LogSink) {
        if self.state != SessionState::Negotiating {
            return;
        }

        if let Some(recv) = &self.recv_characteristic {
            if !recv.properties.read {
                log.append(" no read property");
            }
        }

        let send = self
            .service
            .as_ref()
            .and_then(|service| {
                service
                    .characteristic(UUID_SEND_CHAR)
                    .map(|c| CharacteristicHandle::new(service.uuid, c))
            });
        let Some(send) = send else {
            return self.halt(BridgeError::CharacteristicNotFound(SEND_CHAR_NAME.to_string()), log);
        };

        if !send.properties.can_write() {
            log.append(" no send property");
        }
        self.send_characteristic = Some(send);

        self.transition(SessionState::Ready, log);
        log.append("  success, done");
    }

    fn halt(&mut self, reason: BridgeError, log: &LogSink) {
        self.awaiting_descriptor_write = false;
        log.append(format!(
            "session {}: negotiation halted in {}: {}",
            self.address, self.state, reason
        ));
        self.state = SessionState::Error(reason);
    }

    fn transition(&mut self, next: SessionState, log: &LogSink) {
        log.append(format!("session {}: {} -> {}", self.address, self.state, next));
        self.state = next;
    }

    fn clear_handles(&mut self) {
        self.awaiting_descriptor_write = false;
        self.service = None;
        self.recv_characteristic = None;
        self.send_characteristic = None;
        self.config_descriptor = None;
    }
}
