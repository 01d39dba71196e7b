use std::sync::{Arc, Mutex};

use ble_relay_bridge::config::BridgeConfig;
use ble_relay_bridge::core::bluetooth::{
    BridgeError, CharacteristicHandle, CharacteristicProperties, DescriptorHandle, DeviceAddress,
    DiscoveredCharacteristic, DiscoveredService, GattStack, WriteMode, UUID_NOTIFY_CONFIG_DESCRIPTOR,
    UUID_RECV_CHAR, UUID_RELAY_SERVICE, UUID_SEND_CHAR,
};
use ble_relay_bridge::core::{
    event_channel, EventSender, LogSink, Relay, RelayBridge, RelayContext, RelayHandle,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
    DiscoverServices(DeviceAddress),
    EnableNotifications(Uuid),
    WriteDescriptor(Uuid, Vec<u8>),
    Read(Uuid),
    Write(Uuid, Vec<u8>, WriteMode),
}

/// Accepts and records every request.
#[derive(Default)]
pub struct RecordingStack {
    calls: Mutex<Vec<Call>>,
}

impl RecordingStack {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: Call) -> Result<(), BridgeError> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl GattStack for RecordingStack {
    fn start_scan(&self) -> Result<(), BridgeError> {
        self.record(Call::StartScan)
    }

    fn stop_scan(&self) {
        let _ = self.record(Call::StopScan);
    }

    fn connect(&self, address: DeviceAddress) -> Result<(), BridgeError> {
        self.record(Call::Connect(address))
    }

    fn disconnect(&self, address: DeviceAddress) {
        let _ = self.record(Call::Disconnect(address));
    }

    fn discover_services(&self, address: DeviceAddress) -> Result<(), BridgeError> {
        self.record(Call::DiscoverServices(address))
    }

    fn enable_notifications(
        &self,
        _address: DeviceAddress,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), BridgeError> {
        self.record(Call::EnableNotifications(characteristic.uuid))
    }

    fn write_descriptor(
        &self,
        _address: DeviceAddress,
        descriptor: &DescriptorHandle,
        value: &[u8],
    ) -> Result<(), BridgeError> {
        self.record(Call::WriteDescriptor(descriptor.uuid, value.to_vec()))
    }

    fn read_characteristic(
        &self,
        _address: DeviceAddress,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), BridgeError> {
        self.record(Call::Read(characteristic.uuid))
    }

    fn write_characteristic(
        &self,
        _address: DeviceAddress,
        characteristic: &CharacteristicHandle,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), BridgeError> {
        self.record(Call::Write(characteristic.uuid, value.to_vec(), mode))
    }
}

/// Records relay calls in order.
#[derive(Default, Clone)]
pub struct RecordingRelay {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub context: Arc<Mutex<Option<RelayContext>>>,
}

impl RecordingRelay {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Relay for RecordingRelay {
    fn init(&mut self, context: RelayContext) -> String {
        *self.context.lock().unwrap() = Some(context);
        self.push("init".to_string());
        "relay ready".to_string()
    }

    fn transport(&mut self) -> String {
        self.push("transport".to_string());
        "ble".to_string()
    }

    fn rx(&mut self, address: DeviceAddress, payload: &[u8]) {
        self.push(format!("rx {} {:?}", address, payload));
    }

    fn plus(&mut self) -> String {
        "loglevel ≤ debug".to_string()
    }

    fn minus(&mut self) -> String {
        "loglevel ≤ warn".to_string()
    }

    fn dump(&mut self) {
        self.push("dump".to_string());
    }

    fn timer(&mut self) {
        self.push("timer".to_string());
    }
}

pub fn peer_address() -> DeviceAddress {
    DeviceAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01])
}

pub fn relay_service() -> DiscoveredService {
    DiscoveredService {
        uuid: UUID_RELAY_SERVICE,
        characteristics: vec![
            DiscoveredCharacteristic {
                uuid: UUID_RECV_CHAR,
                properties: CharacteristicProperties {
                    read: true,
                    notify: true,
                    ..Default::default()
                },
                descriptors: vec![UUID_NOTIFY_CONFIG_DESCRIPTOR],
            },
            DiscoveredCharacteristic {
                uuid: UUID_SEND_CHAR,
                properties: CharacteristicProperties {
                    write_without_response: true,
                    ..Default::default()
                },
                descriptors: vec![],
            },
        ],
    }
}

pub struct Harness {
    pub bridge: RelayBridge,
    pub stack: Arc<RecordingStack>,
    pub relay: RelayHandle,
    pub recorder: RecordingRelay,
    pub log: LogSink,
    pub events: EventSender,
}

/// A bridge on a recording stack, with the relay running on its thread.
pub fn harness(config: BridgeConfig) -> Harness {
    let stack = Arc::new(RecordingStack::default());
    let log = LogSink::new(config.log_capacity);
    let (events, receiver) = event_channel();
    let recorder = RecordingRelay::default();
    let (relay, _thread) = RelayHandle::spawn(recorder.clone()).unwrap();
    let bridge = RelayBridge::new(
        config,
        stack.clone(),
        log.clone(),
        relay.clone(),
        events.clone(),
        receiver,
    );

    Harness {
        bridge,
        stack,
        relay,
        recorder,
        log,
        events,
    }
}
