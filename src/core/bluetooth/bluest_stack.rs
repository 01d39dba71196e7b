//! `GattStack` backed by the bluest library
//! Each request is accepted immediately and carried out on a spawned task;
//! the outcome is posted to the bridge queue as a `StackEvent`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use bluest::{Adapter, AdvertisingDevice, Characteristic, ConnectionEvent, Descriptor, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::UUID_NOTIFY_CONFIG_DESCRIPTOR;
use crate::core::bluetooth::error::BridgeError;
use crate::core::bluetooth::stack::GattStack;
use crate::core::bluetooth::types::{
    Advertisement, CharacteristicHandle, CharacteristicProperties, DescriptorHandle, DeviceAddress,
    DiscoveredCharacteristic, DiscoveredService, GattStatus, WriteMode,
};
use crate::core::events::{BridgeEvent, EventSender, StackEvent};
use crate::core::log_sink::LogSink;

type CharacteristicKey = (Uuid, Uuid);
type DescriptorKey = (Uuid, Uuid, Uuid);

/// Handles for the connected peer.
struct PeerHandles {
    address: DeviceAddress,
    device: Device,
    cancel_token: CancellationToken,
    characteristics: HashMap<CharacteristicKey, Characteristic>,
    descriptors: HashMap<DescriptorKey, Descriptor>,
    /// Subscription outcome per characteristic, `None` while pending.
    subscriptions: HashMap<CharacteristicKey, watch::Receiver<Option<GattStatus>>>,
}

#[derive(Default)]
struct StackInner {
    scan_cancel_token: Option<CancellationToken>,
    /// Devices seen during the current scan, for `connect`.
    devices: HashMap<DeviceAddress, Device>,
    peer: Option<PeerHandles>,
}

impl StackInner {
    /// Forgets the previous scan's devices and stops its stream.
    fn begin_scan(&mut self, cancel_token: CancellationToken) {
        self.devices.clear();
        if let Some(previous) = self.scan_cancel_token.replace(cancel_token) {
            previous.cancel();
        }
    }
}

pub struct BluestStack {
    adapter: Adapter,
    events: EventSender,
    runtime: Handle,
    mac_pattern: Regex,
    inner: Arc<Mutex<StackInner>>,
}

impl BluestStack {
    /// Opens the default adapter, waiting for it to be powered on.
    pub async fn new(events: EventSender, log: &LogSink) -> Result<Self> {
        let Some(adapter) = Adapter::default().await else {
            log.append("sys: BLE not supported");
            return Err(anyhow!("No Bluetooth adapter found"));
        };
        log.append("sys: BLE is supported");

        wait_until_available(adapter.wait_available(), log).await?;
        info!("Bluetooth adapter is available.");

        Ok(Self {
            adapter,
            events,
            runtime: Handle::current(),
            mac_pattern: Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}([0-9A-Fa-f]{2})")?,
            inner: Arc::new(Mutex::new(StackInner::default())),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StackInner> {
        lock(&self.inner)
    }

    fn peer_device(&self, address: DeviceAddress) -> Result<Device, BridgeError> {
        self.lock()
            .peer
            .as_ref()
            .filter(|peer| peer.address == address)
            .map(|peer| peer.device.clone())
            .ok_or(BridgeError::Disconnected)
    }

    fn peer_characteristic(
        &self,
        address: DeviceAddress,
        handle: &CharacteristicHandle,
    ) -> Result<(Characteristic, CancellationToken), BridgeError> {
        let inner = self.lock();
        let peer = inner
            .peer
            .as_ref()
            .filter(|peer| peer.address == address)
            .ok_or(BridgeError::Disconnected)?;
        let characteristic = peer
            .characteristics
            .get(&(handle.service, handle.uuid))
            .cloned()
            .ok_or_else(|| BridgeError::Stack(format!("unknown characteristic {}", handle.uuid)))?;
        Ok((characteristic, peer.cancel_token.clone()))
    }

    async fn scan_task(
        adapter: Adapter,
        inner: Arc<Mutex<StackInner>>,
        events: EventSender,
        mac_pattern: Regex,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&[]).await?;

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered_device) => {
                            Self::report_advertisement(&inner, &events, &mac_pattern, discovered_device);
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        Ok(())
    }

    fn report_advertisement(
        inner: &Mutex<StackInner>,
        events: &EventSender,
        mac_pattern: &Regex,
        discovered_device: AdvertisingDevice,
    ) {
        let device = discovered_device.device;
        let id = device.id().to_string();
        debug!("Found device - Device: {:?}, RSSI: {:?}", device, discovered_device.rssi);

        let Some(address) = Self::extract_mac_address(mac_pattern, &id) else {
            debug!("No hardware address in device id {}", id);
            return;
        };
        if let Ok(parsed) = DeviceAddress::parse(&address) {
            lock(inner).devices.insert(parsed, device.clone());
        }

        let name = discovered_device
            .adv_data
            .local_name
            .clone()
            .or_else(|| device.name().ok());
        post(
            events,
            StackEvent::Advertisement(Advertisement {
                address,
                name,
                rssi: discovered_device.rssi,
            }),
        );
    }

    fn extract_mac_address(mac_pattern: &Regex, device_id_str: &str) -> Option<String> {
        mac_pattern
            .find_iter(device_id_str)
            .last()
            .map(|m| m.as_str().replace(['-', '_'], ":").to_uppercase())
    }

    async fn watch_connection(
        adapter: Adapter,
        device: Device,
        address: DeviceAddress,
        events: EventSender,
        cancel_token: CancellationToken,
    ) {
        let mut connection_events = match adapter.device_connection_events(&device).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot watch connection state of {}: {}", address, e);
                return;
            }
        };

        loop {
            tokio::select! {
                event = connection_events.next() => {
                    match event {
                        Some(ConnectionEvent::Disconnected) => {
                            info!("Device {} disconnected", address);
                            post(&events, StackEvent::ConnectionStateChanged {
                                address,
                                connected: false,
                                status: GattStatus::Success,
                            });
                            break;
                        }
                        Some(ConnectionEvent::Connected) => {}
                        None => break,
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    async fn discover_tree(
        device: &Device,
    ) -> bluest::Result<(
        Vec<DiscoveredService>,
        HashMap<CharacteristicKey, Characteristic>,
        HashMap<DescriptorKey, Descriptor>,
    )> {
        let mut services = Vec::new();
        let mut characteristic_handles = HashMap::new();
        let mut descriptor_handles = HashMap::new();

        for service in device.discover_services().await? {
            let service_uuid = service.uuid();
            let mut characteristics = Vec::new();

            for characteristic in service.discover_characteristics().await? {
                let uuid = characteristic.uuid();
                let props = characteristic.properties().await?;
                let mut descriptors = Vec::new();
                for descriptor in characteristic.discover_descriptors().await? {
                    descriptors.push(descriptor.uuid());
                    descriptor_handles.insert((service_uuid, uuid, descriptor.uuid()), descriptor);
                }

                characteristics.push(DiscoveredCharacteristic {
                    uuid,
                    properties: CharacteristicProperties {
                        read: props.read,
                        write: props.write,
                        write_without_response: props.write_without_response,
                        notify: props.notify,
                        indicate: props.indicate,
                    },
                    descriptors,
                });
                characteristic_handles.insert((service_uuid, uuid), characteristic);
            }

            services.push(DiscoveredService {
                uuid: service_uuid,
                characteristics,
            });
        }

        Ok((services, characteristic_handles, descriptor_handles))
    }

    async fn process_notifications(
        characteristic: Characteristic,
        address: DeviceAddress,
        events: EventSender,
        subscribed: watch::Sender<Option<GattStatus>>,
        cancel_token: CancellationToken,
    ) {
        let uuid = characteristic.uuid();
        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                subscribed.send_replace(Some(GattStatus::Failure(e.to_string())));
                return;
            }
        };
        subscribed.send_replace(Some(GattStatus::Success));
        info!("Listening for notifications on {}", uuid);

        loop {
            tokio::select! {
                result = notification_stream.next() => {
                    match result {
                        Some(Ok(value)) => {
                            debug!("Received {} bytes on {}", value.len(), uuid);
                            post(&events, StackEvent::CharacteristicChanged {
                                address,
                                characteristic: uuid,
                                value,
                            });
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
        info!("Notification stream ended");
    }
}

impl GattStack for BluestStack {
    fn start_scan(&self) -> Result<(), BridgeError> {
        let cancel_token = CancellationToken::new();
        self.lock().begin_scan(cancel_token.clone());

        let adapter = self.adapter.clone();
        let inner = self.inner.clone();
        let events = self.events.clone();
        let mac_pattern = self.mac_pattern.clone();
        self.runtime.spawn(async move {
            if let Err(e) = Self::scan_task(adapter, inner, events, mac_pattern, cancel_token).await {
                error!("Bluetooth scan failed: {}", e);
            }
        });
        Ok(())
    }

    fn stop_scan(&self) {
        if let Some(cancel_token) = self.lock().scan_cancel_token.take() {
            info!("Stopping Bluetooth scan.");
            cancel_token.cancel();
        }
    }

    fn connect(&self, address: DeviceAddress) -> Result<(), BridgeError> {
        let cancel_token = CancellationToken::new();
        let device = {
            let mut inner = self.lock();
            let device = inner
                .devices
                .get(&address)
                .cloned()
                .ok_or_else(|| BridgeError::Stack(format!("Device not found with address: {}", address)))?;
            if let Some(previous) = inner.peer.replace(PeerHandles {
                address,
                device: device.clone(),
                cancel_token: cancel_token.clone(),
                characteristics: HashMap::new(),
                descriptors: HashMap::new(),
                subscriptions: HashMap::new(),
            }) {
                previous.cancel_token.cancel();
            }
            device
        };

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            info!("Initiating connection to {}...", address);
            let result = if device.is_connected().await {
                Ok(())
            } else {
                adapter.connect_device(&device).await
            };

            match result {
                Ok(()) => {
                    post(&events, StackEvent::ConnectionStateChanged {
                        address,
                        connected: true,
                        status: GattStatus::Success,
                    });
                    Self::watch_connection(adapter, device, address, events, cancel_token).await;
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", address, e);
                    post(&events, StackEvent::ConnectionStateChanged {
                        address,
                        connected: false,
                        status: GattStatus::Failure(e.to_string()),
                    });
                }
            }
        });
        Ok(())
    }

    fn disconnect(&self, address: DeviceAddress) {
        let peer = {
            let mut inner = self.lock();
            match inner.peer.take() {
                Some(peer) if peer.address == address => peer,
                other => {
                    inner.peer = other;
                    info!("Device {} not connected", address);
                    return;
                }
            }
        };
        peer.cancel_token.cancel();

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            info!("Disconnecting from device {}", address);
            let status = match adapter.disconnect_device(&peer.device).await {
                Ok(()) => GattStatus::Success,
                Err(e) => {
                    warn!("Disconnect from {} failed: {}", address, e);
                    GattStatus::Failure(e.to_string())
                }
            };
            post(&events, StackEvent::ConnectionStateChanged {
                address,
                connected: false,
                status,
            });
        });
    }

    fn discover_services(&self, address: DeviceAddress) -> Result<(), BridgeError> {
        let device = self.peer_device(address)?;
        let inner = self.inner.clone();
        let events = self.events.clone();

        self.runtime.spawn(async move {
            info!("Connection successful, discovering services...");
            let (status, services) = match Self::discover_tree(&device).await {
                Ok((services, characteristics, descriptors)) => {
                    let mut inner = lock(&inner);
                    if let Some(peer) = inner.peer.as_mut().filter(|peer| peer.address == address) {
                        peer.characteristics = characteristics;
                        peer.descriptors = descriptors;
                    }
                    (GattStatus::Success, services)
                }
                Err(e) => {
                    warn!("Service discovery on {} failed: {}", address, e);
                    (GattStatus::Failure(e.to_string()), Vec::new())
                }
            };
            post(&events, StackEvent::ServicesDiscovered {
                address,
                status,
                services,
            });
        });
        Ok(())
    }

    fn enable_notifications(
        &self,
        address: DeviceAddress,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), BridgeError> {
        let (handle, cancel_token) = self.peer_characteristic(address, characteristic)?;
        let (subscribed, subscription) = watch::channel(None);
        if let Some(peer) = self.lock().peer.as_mut() {
            peer.subscriptions
                .insert((characteristic.service, characteristic.uuid), subscription);
        }

        let events = self.events.clone();
        self.runtime.spawn(Self::process_notifications(
            handle,
            address,
            events,
            subscribed,
            cancel_token,
        ));
        Ok(())
    }

    /// bluest arms the configuration descriptor itself when it subscribes, so
    /// an enable write on it is confirmed by the subscription outcome.
    fn write_descriptor(
        &self,
        address: DeviceAddress,
        descriptor: &DescriptorHandle,
        value: &[u8],
    ) -> Result<(), BridgeError> {
        let events = self.events.clone();
        let uuid = descriptor.uuid;
        let (subscription, handle) = {
            let inner = self.lock();
            let peer = inner
                .peer
                .as_ref()
                .filter(|peer| peer.address == address)
                .ok_or(BridgeError::Disconnected)?;
            let subscription = peer
                .subscriptions
                .get(&(descriptor.service, descriptor.characteristic))
                .cloned();
            let handle = peer
                .descriptors
                .get(&(descriptor.service, descriptor.characteristic, descriptor.uuid))
                .cloned();
            (subscription, handle)
        };

        match (uuid == UUID_NOTIFY_CONFIG_DESCRIPTOR, subscription, handle) {
            (true, Some(mut subscription), _) => {
                self.runtime.spawn(async move {
                    let status = match subscription.wait_for(Option::is_some).await {
                        Ok(status) => status.clone().unwrap_or(GattStatus::Success),
                        Err(_) => GattStatus::Failure("subscription dropped".to_string()),
                    };
                    post(&events, StackEvent::DescriptorWritten {
                        address,
                        descriptor: uuid,
                        status,
                    });
                });
            }
            (_, _, Some(handle)) => {
                let value = value.to_vec();
                self.runtime.spawn(async move {
                    let status = match handle.write(&value).await {
                        Ok(()) => GattStatus::Success,
                        Err(e) => GattStatus::Failure(e.to_string()),
                    };
                    post(&events, StackEvent::DescriptorWritten {
                        address,
                        descriptor: uuid,
                        status,
                    });
                });
            }
            (_, _, None) => {
                return Err(BridgeError::Stack(format!("unknown descriptor {}", uuid)));
            }
        }
        Ok(())
    }

    fn read_characteristic(
        &self,
        address: DeviceAddress,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), BridgeError> {
        let (handle, _) = self.peer_characteristic(address, characteristic)?;
        let events = self.events.clone();

        self.runtime.spawn(async move {
            let (status, value) = match handle.read().await {
                Ok(value) => (GattStatus::Success, value),
                Err(e) => (GattStatus::Failure(e.to_string()), Vec::new()),
            };
            post(&events, StackEvent::CharacteristicRead {
                address,
                characteristic: handle.uuid(),
                status,
                value,
            });
        });
        Ok(())
    }

    fn write_characteristic(
        &self,
        address: DeviceAddress,
        characteristic: &CharacteristicHandle,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), BridgeError> {
        let (handle, _) = self.peer_characteristic(address, characteristic)?;
        let events = self.events.clone();
        let value = value.to_vec();

        self.runtime.spawn(async move {
            let result = match mode {
                WriteMode::WithoutResponse => handle.write_without_response(&value).await,
                WriteMode::WithResponse => handle.write(&value).await,
            };
            let status = match result {
                Ok(()) => GattStatus::Success,
                Err(e) => GattStatus::Failure(e.to_string()),
            };
            post(&events, StackEvent::CharacteristicWritten {
                address,
                characteristic: handle.uuid(),
                status,
            });
        });
        Ok(())
    }
}

/// How long the adapter may take to come up before the user is told.
const AVAILABILITY_GRACE: Duration = Duration::from_millis(500);

/// Awaits `wait_available`, logging once if the adapter is not ready within
/// the grace period.
async fn wait_until_available<F, E>(wait_available: F, log: &LogSink) -> Result<(), E>
where
    F: Future<Output = Result<(), E>>,
{
    tokio::pin!(wait_available);
    match tokio::time::timeout(AVAILABILITY_GRACE, &mut wait_available).await {
        Ok(result) => result,
        Err(_) => {
            log.append("sys: BLE not yet enabled");
            wait_available.await
        }
    }
}

fn lock(inner: &Mutex<StackInner>) -> MutexGuard<'_, StackInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn post(events: &EventSender, event: StackEvent) {
    if events.send(BridgeEvent::Stack(event)).is_err() {
        debug!("Bridge queue closed, dropping stack event");
    }
}
