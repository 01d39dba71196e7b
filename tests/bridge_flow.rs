mod common;

use std::time::Duration;

use ble_relay_bridge::commands;
use ble_relay_bridge::config::BridgeConfig;
use ble_relay_bridge::core::bluetooth::{
    Advertisement, BridgeError, GattStatus, ScanPhase, SessionState, WriteMode, ENABLE_NOTIFICATION_VALUE,
    UUID_NOTIFY_CONFIG_DESCRIPTOR, UUID_RECV_CHAR, UUID_SEND_CHAR,
};
use ble_relay_bridge::core::{event_channel, BridgeEvent, LogSink, RelayBridge, StackEvent};
use ble_relay_bridge::state::AppState;
use common::{harness, peer_address, relay_service, Call, Harness, RecordingRelay, RecordingStack};
use std::sync::Arc;

fn advertisement(address: &str) -> BridgeEvent {
    BridgeEvent::Stack(StackEvent::Advertisement(Advertisement {
        address: address.to_string(),
        name: Some("relay".to_string()),
        rssi: Some(-48),
    }))
}

fn negotiation_events() -> Vec<BridgeEvent> {
    let address = peer_address();
    vec![
        BridgeEvent::Stack(StackEvent::ConnectionStateChanged {
            address,
            connected: true,
            status: GattStatus::Success,
        }),
        BridgeEvent::Stack(StackEvent::ServicesDiscovered {
            address,
            status: GattStatus::Success,
            services: vec![relay_service()],
        }),
        BridgeEvent::Stack(StackEvent::DescriptorWritten {
            address,
            descriptor: UUID_NOTIFY_CONFIG_DESCRIPTOR,
            status: GattStatus::Success,
        }),
    ]
}

async fn feed(bridge: &mut RelayBridge, events: Vec<BridgeEvent>) {
    for event in events {
        assert!(bridge.handle_event(event).await.is_continue());
    }
}

async fn ready(h: &mut Harness) {
    h.bridge.start_scan().unwrap();
    feed(&mut h.bridge, vec![advertisement("AA:BB:CC:DD:EE:01")]).await;
    feed(&mut h.bridge, negotiation_events()).await;
    assert_eq!(h.bridge.session().map(|s| s.state()), Some(&SessionState::Ready));
}

#[tokio::test]
async fn test_payload_reaches_relay_after_negotiation() {
    let mut h = harness(BridgeConfig::default());
    ready(&mut h).await;

    let address = peer_address();
    assert_eq!(
        h.stack.calls(),
        vec![
            Call::StartScan,
            Call::StopScan,
            Call::Connect(address),
            Call::DiscoverServices(address),
            Call::EnableNotifications(UUID_RECV_CHAR),
            Call::WriteDescriptor(UUID_NOTIFY_CONFIG_DESCRIPTOR, ENABLE_NOTIFICATION_VALUE.to_vec()),
        ]
    );
    assert_eq!(h.bridge.transport().as_deref(), Some("ble"));

    feed(
        &mut h.bridge,
        vec![
            BridgeEvent::Stack(StackEvent::CharacteristicChanged {
                address,
                characteristic: UUID_RECV_CHAR,
                value: vec![0xFF],
            }),
            BridgeEvent::Stack(StackEvent::CharacteristicRead {
                address,
                characteristic: UUID_RECV_CHAR,
                status: GattStatus::Success,
                value: vec![0x01, 0x02],
            }),
        ],
    )
    .await;
    h.relay.flush().await.unwrap();

    assert_eq!(h.stack.count(|c| *c == Call::Read(UUID_RECV_CHAR)), 1);
    assert_eq!(
        h.recorder.calls(),
        vec!["transport".to_string(), "rx AA:BB:CC:DD:EE:01 [1, 2]".to_string()]
    );

    let lines = h.log.snapshot();
    for expected in ["addr=AA:BB:CC:DD:EE:01", "after connect", "BLE connected!", "  success, done", "Transport: ble"] {
        assert!(lines.iter().any(|l| l == expected), "missing {expected:?} in {lines:#?}");
    }
}

#[tokio::test]
async fn test_send_during_discovery_is_not_ready() {
    let mut h = harness(BridgeConfig::default());
    h.bridge.start_scan().unwrap();
    feed(&mut h.bridge, vec![advertisement("AA:BB:CC:DD:EE:01")]).await;
    feed(&mut h.bridge, negotiation_events().into_iter().take(1).collect()).await;
    assert_eq!(
        h.bridge.session().map(|s| s.state()),
        Some(&SessionState::DiscoveringServices)
    );

    assert_eq!(h.bridge.send(&[0x10, 0x20]), Err(BridgeError::NotReady));
    feed(&mut h.bridge, vec![BridgeEvent::RelaySend(vec![0x10, 0x20])]).await;

    assert_eq!(h.stack.count(|c| matches!(c, Call::Write(..))), 0);
    assert!(h.log.snapshot().iter().any(|l| l == "bleSend: BLE not initialized"));
}

#[tokio::test]
async fn test_send_after_missing_recv_halt_is_not_ready() {
    let mut h = harness(BridgeConfig::default());
    h.bridge.start_scan().unwrap();
    feed(&mut h.bridge, vec![advertisement("AA:BB:CC:DD:EE:01")]).await;

    let mut service = relay_service();
    service.characteristics.retain(|c| c.uuid != UUID_RECV_CHAR);
    feed(
        &mut h.bridge,
        vec![
            BridgeEvent::Stack(StackEvent::ConnectionStateChanged {
                address: peer_address(),
                connected: true,
                status: GattStatus::Success,
            }),
            BridgeEvent::Stack(StackEvent::ServicesDiscovered {
                address: peer_address(),
                status: GattStatus::Success,
                services: vec![service],
            }),
        ],
    )
    .await;
    assert_eq!(
        h.bridge.session().map(|s| s.state()),
        Some(&SessionState::Error(BridgeError::CharacteristicNotFound("RECV".to_string())))
    );

    assert_eq!(h.bridge.send(&[0x10, 0x20]), Err(BridgeError::NotReady));
    feed(&mut h.bridge, vec![BridgeEvent::RelaySend(vec![0x10, 0x20])]).await;
    assert_eq!(h.stack.count(|c| matches!(c, Call::Write(..))), 0);
    assert_eq!(h.bridge.transport(), None);
}

#[tokio::test]
async fn test_advertisement_during_session_is_ignored() {
    let mut h = harness(BridgeConfig::default());
    h.bridge.start_scan().unwrap();
    feed(
        &mut h.bridge,
        vec![
            advertisement("AA:BB:CC:DD:EE:01"),
            advertisement("11:22:33:44:55:66"),
            BridgeEvent::StartScan,
        ],
    )
    .await;

    assert_eq!(h.stack.count(|c| matches!(c, Call::Connect(_))), 1);
    assert_eq!(h.stack.count(|c| *c == Call::StartScan), 1);
    assert_eq!(h.bridge.session().map(|s| s.address()), Some(peer_address()));
    assert!(h.log.snapshot().iter().any(|l| l == "scan: session active, not scanning"));
}

#[tokio::test]
async fn test_events_for_other_devices_are_dropped() {
    let mut h = harness(BridgeConfig::default());
    h.bridge.start_scan().unwrap();
    feed(&mut h.bridge, vec![advertisement("AA:BB:CC:DD:EE:01")]).await;
    feed(
        &mut h.bridge,
        vec![BridgeEvent::Stack(StackEvent::ConnectionStateChanged {
            address: "11:22:33:44:55:66".parse().unwrap(),
            connected: true,
            status: GattStatus::Success,
        })],
    )
    .await;

    assert_eq!(h.bridge.session().map(|s| s.state()), Some(&SessionState::Connecting));
    assert_eq!(h.stack.count(|c| matches!(c, Call::DiscoverServices(_))), 0);
}

#[tokio::test]
async fn test_disconnect_then_rescan() {
    let mut h = harness(BridgeConfig::default());
    ready(&mut h).await;

    feed(&mut h.bridge, vec![BridgeEvent::Disconnect]).await;
    assert_eq!(h.stack.count(|c| *c == Call::Disconnect(peer_address())), 1);
    assert_eq!(h.bridge.scanner().phase(), ScanPhase::Found(peer_address()));

    feed(
        &mut h.bridge,
        vec![BridgeEvent::Stack(StackEvent::ConnectionStateChanged {
            address: peer_address(),
            connected: false,
            status: GattStatus::Success,
        })],
    )
    .await;
    assert_eq!(h.bridge.scanner().phase(), ScanPhase::Idle);

    feed(
        &mut h.bridge,
        vec![
            BridgeEvent::RelaySend(vec![0x01]),
            BridgeEvent::StartScan,
        ],
    )
    .await;

    assert_eq!(h.bridge.session().map(|s| s.state()), Some(&SessionState::Disconnected));
    assert_eq!(h.stack.count(|c| matches!(c, Call::Write(..))), 0);
    assert_eq!(h.stack.count(|c| *c == Call::StartScan), 2);
    assert!(h.log.snapshot().iter().any(|l| l == "BLE disconnected"));
}

#[tokio::test]
async fn test_relay_output_is_trimmed_and_written() {
    let Harness {
        mut bridge,
        stack,
        relay,
        recorder,
        log,
        events,
    } = harness(BridgeConfig::default());

    let outbound = ble_relay_bridge::core::OutboundSender::new(events.clone(), log.clone(), 20);
    relay
        .init(ble_relay_bridge::core::RelayContext {
            outbound,
            log: log.clone(),
        })
        .await
        .unwrap();

    bridge.start_scan().unwrap();
    let handle = bridge.handle();
    let task = tokio::spawn(bridge.run());

    events.send(advertisement("AA:BB:CC:DD:EE:01")).unwrap();
    for event in negotiation_events() {
        events.send(event).unwrap();
    }
    let context = recorder.context.lock().unwrap().clone().unwrap();
    assert_eq!(context.outbound.send(&[0xAB; 32]), 20);

    handle.shutdown().unwrap();
    task.await.unwrap();

    assert_eq!(
        stack.count(|c| *c == Call::Write(UUID_SEND_CHAR, vec![0xAB; 20], WriteMode::WithoutResponse)),
        1
    );
    assert_eq!(stack.count(|c| *c == Call::Disconnect(peer_address())), 1);
    assert!(log.snapshot().iter().any(|l| l == "  bleSend: trimming from 32 to 20 bytes!"));
    assert_eq!(handle.transport().as_deref(), Some("ble"));
}

#[tokio::test]
async fn test_app_state_lifecycle() {
    let stack = Arc::new(RecordingStack::default());
    let log = LogSink::default();
    let (events, receiver) = event_channel();
    let recorder = RecordingRelay::default();
    let config = BridgeConfig {
        relay_timer_interval_secs: Some(1),
        ..BridgeConfig::default()
    };

    let app_state = AppState::with_stack(config, log, stack.clone(), events, receiver, recorder.clone())
        .await
        .unwrap();
    assert_eq!(commands::status(&app_state), "relay ready");
    assert_eq!(stack.calls(), vec![Call::StartScan]);
    assert_eq!(commands::transport(&app_state), None);

    assert_eq!(commands::relay_plus(&app_state).await.unwrap(), "loglevel ≤ debug");
    assert_eq!(commands::relay_minus(&app_state).await.unwrap(), "loglevel ≤ warn");
    commands::relay_dump(&app_state).unwrap();
    commands::append_to_log(&app_state, "hello");
    assert!(commands::log_snapshot(&app_state).contains(&"hello".to_string()));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    app_state.shutdown().await.unwrap();

    let calls = recorder.calls();
    assert_eq!(calls[0], "init");
    assert!(calls.contains(&"dump".to_string()));
    assert!(calls.contains(&"timer".to_string()));
    assert!(stack.calls().contains(&Call::StopScan));
}
