//! Relay bridge for the BLE transport
//! This module owns the scanner, the current GATT session and the transport
//! channel, and runs the single event loop every stack callback goes through.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;

use crate::config::BridgeConfig;
use crate::core::bluetooth::{
    BridgeError, DeviceAddress, DeviceScanner, GattSession, GattStack, InboundPayload, ScanFilter,
    TransportChannel,
};
use crate::core::events::{BridgeEvent, EventReceiver, EventSender, StackEvent};
use crate::core::log_sink::LogSink;
use crate::core::relay::RelayHandle;

/// Clonable handle the shell and the relay use to reach the bridge loop.
#[derive(Clone)]
pub struct BridgeHandle {
    events: EventSender,
    transport: watch::Receiver<Option<String>>,
}

impl BridgeHandle {
    pub fn start_scan(&self) -> Result<(), BridgeError> {
        self.post(BridgeEvent::StartScan)
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.post(BridgeEvent::RelaySend(payload))
    }

    /// Asks the stack to drop the current peer; the session ends when the
    /// disconnect is reported.
    pub fn disconnect(&self) -> Result<(), BridgeError> {
        self.post(BridgeEvent::Disconnect)
    }

    pub fn shutdown(&self) -> Result<(), BridgeError> {
        self.post(BridgeEvent::Shutdown)
    }

    /// The relay's transport description, once a session has been ready.
    pub fn transport(&self) -> Option<String> {
        self.transport.borrow().clone()
    }

    fn post(&self, event: BridgeEvent) -> Result<(), BridgeError> {
        self.events
            .send(event)
            .map_err(|_| BridgeError::InvalidState("bridge stopped".to_string()))
    }
}

/// Owns the session and feeds the relay.
pub struct RelayBridge {
    config: BridgeConfig,
    stack: Arc<dyn GattStack>,
    log: LogSink,
    relay: RelayHandle,
    scanner: DeviceScanner,
    channel: TransportChannel,
    /// Replaced wholesale on every connect attempt.
    session: Option<GattSession>,
    events: EventSender,
    receiver: EventReceiver,
    transport: watch::Sender<Option<String>>,
}

impl RelayBridge {
    pub fn new(
        config: BridgeConfig,
        stack: Arc<dyn GattStack>,
        log: LogSink,
        relay: RelayHandle,
        events: EventSender,
        receiver: EventReceiver,
    ) -> Self {
        let filter = ScanFilter {
            min_rssi: config.min_rssi,
            name_contains: config.device_name_filter.clone(),
        };
        let scanner = DeviceScanner::new(stack.clone(), log.clone(), events.clone(), filter);
        let channel = TransportChannel::new(stack.clone(), log.clone());
        let (transport, _) = watch::channel(None);

        Self {
            config,
            stack,
            log,
            relay,
            scanner,
            channel,
            session: None,
            events,
            receiver,
            transport,
        }
    }

    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            events: self.events.clone(),
            transport: self.transport.subscribe(),
        }
    }

    pub fn scanner(&self) -> &DeviceScanner {
        &self.scanner
    }

    pub fn session(&self) -> Option<&GattSession> {
        self.session.as_ref()
    }

    pub fn transport(&self) -> Option<String> {
        self.transport.borrow().clone()
    }

    fn session_active(&self) -> bool {
        self.session.as_ref().is_some_and(GattSession::is_active)
    }

    /// Starts one scan cycle with the configured duration.
    pub fn start_scan(&mut self) -> Result<(), BridgeError> {
        let duration = Duration::from_millis(self.config.scan_duration_ms);
        self.scanner.start_scan(duration)
    }

    pub fn send(&self, payload: &[u8]) -> Result<(), BridgeError> {
        self.channel.send(self.session.as_ref(), payload)
    }

    /// Processes queued events until shutdown or until every sender is gone.
    pub async fn run(mut self) {
        info!("Relay bridge event loop started.");
        while let Some(event) = self.receiver.recv().await {
            if self.handle_event(event).await.is_break() {
                break;
            }
        }
        self.shutdown().await;
        info!("Relay bridge event loop stopped.");
    }

    pub async fn handle_event(&mut self, event: BridgeEvent) -> ControlFlow<()> {
        match event {
            BridgeEvent::Stack(event) => self.on_stack_event(event).await,
            BridgeEvent::ScanTimeout { generation } => {
                self.scanner.on_timeout(generation);
            }
            BridgeEvent::RelaySend(payload) => {
                // Failures are already in the log.
                let _ = self.send(&payload);
            }
            BridgeEvent::StartScan => {
                if self.session_active() {
                    self.log.append("scan: session active, not scanning");
                } else {
                    let _ = self.start_scan();
                }
            }
            BridgeEvent::Disconnect => self.disconnect(),
            BridgeEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn on_stack_event(&mut self, event: StackEvent) {
        if let StackEvent::Advertisement(advertisement) = &event {
            if self.session_active() {
                debug!("Ignoring advertisement from {} while a session is active", advertisement.address);
                return;
            }
            if let Some(address) = self.scanner.on_advertisement(advertisement) {
                self.connect(address);
            }
            return;
        }

        let Some(session) = self.session.as_mut() else {
            debug!("No session, dropping {:?}", event);
            return;
        };
        if event.address() != Some(session.address()) {
            debug!("Dropping event for another connection: {:?}", event);
            return;
        }

        let was_ready = session.is_ready();
        let mut inbound: Option<InboundPayload> = None;
        match event {
            StackEvent::ConnectionStateChanged { connected, status, .. } => {
                session.on_connection_state(connected, &status, &*self.stack, &self.log)
            }
            StackEvent::ServicesDiscovered { status, services, .. } => {
                session.on_services_discovered(&status, &services, &*self.stack, &self.log)
            }
            StackEvent::DescriptorWritten { descriptor, status, .. } => {
                session.on_descriptor_written(descriptor, &status, &self.log)
            }
            StackEvent::CharacteristicChanged { characteristic, .. } => {
                self.channel.on_characteristic_changed(session, characteristic)
            }
            StackEvent::CharacteristicRead {
                characteristic,
                status,
                value,
                ..
            } => {
                inbound = self
                    .channel
                    .on_characteristic_read(session, characteristic, &status, value);
            }
            StackEvent::CharacteristicWritten {
                characteristic,
                status,
                ..
            } => self.channel.on_characteristic_written(characteristic, &status),
            StackEvent::Advertisement(_) => {}
        }
        let became_ready = !was_ready && session.is_ready();
        if !session.is_active() {
            self.scanner.settle();
        }

        if became_ready {
            self.on_ready().await;
        }
        if let Some(InboundPayload { address, payload }) = inbound {
            if let Err(e) = self.relay.rx(address, payload) {
                self.log.append(format!("relayRX: {}", e));
            }
        }
    }

    fn connect(&mut self, address: DeviceAddress) {
        let mut session = GattSession::new(address, self.config.await_descriptor_write);
        if session.connect(&*self.stack, &self.log).is_ok() {
            self.log.append("after connect");
        } else {
            self.scanner.settle();
        }
        self.session = Some(session);
    }

    async fn on_ready(&mut self) {
        match self.relay.transport().await {
            Ok(transport) => {
                self.log.append(format!("Transport: {}", transport));
                self.transport.send_replace(Some(transport));
            }
            Err(e) => self.log.append(format!("relayGetTransport: {}", e)),
        }
    }

    fn disconnect(&mut self) {
        match self.session.as_ref().filter(|s| s.is_active()) {
            Some(session) => {
                self.log.append(format!("disconnecting from {}", session.address()));
                self.stack.disconnect(session.address());
            }
            None => self.log.append("disconnect: no active session"),
        }
    }

    async fn shutdown(&mut self) {
        self.scanner.stop_scan();
        if let Some(session) = self.session.as_ref().filter(|s| s.is_active()) {
            self.stack.disconnect(session.address());
        }
        if let Err(e) = self.relay.flush().await {
            debug!("Relay already stopped: {}", e);
        }
    }
}
