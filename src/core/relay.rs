//! Serialized access to the external relay.
//! The relay lives on its own thread and is only ever called from there, one
//! command at a time, so it never observes concurrent calls from the bridge.

use std::io;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::core::bluetooth::{BridgeError, DeviceAddress};
use crate::core::events::{BridgeEvent, EventSender};
use crate::core::log_sink::LogSink;

/// The packet relay the bridge feeds.
pub trait Relay: Send + 'static {
    /// Called once at startup; the returned status is shown to the user.
    fn init(&mut self, context: RelayContext) -> String;

    /// Describes the relay's transport, queried once the channel is ready.
    fn transport(&mut self) -> String;

    /// Delivers one inbound payload received from `address`.
    fn rx(&mut self, address: DeviceAddress, payload: &[u8]);

    fn plus(&mut self) -> String;

    fn minus(&mut self) -> String;

    fn dump(&mut self);

    fn timer(&mut self);
}

/// What the relay receives at init to reach back into the host.
#[derive(Clone)]
pub struct RelayContext {
    pub outbound: OutboundSender,
    pub log: LogSink,
}

/// Relay-side handle for sending payloads to the peer.
#[derive(Clone)]
pub struct OutboundSender {
    events: EventSender,
    log: LogSink,
    max_payload_len: usize,
}

impl OutboundSender {
    pub fn new(events: EventSender, log: LogSink, max_payload_len: usize) -> Self {
        Self {
            events,
            log,
            max_payload_len,
        }
    }

    /// Queues `payload` for the transport channel, trimmed to the maximum
    /// payload length. Returns the number of bytes queued.
    pub fn send(&self, payload: &[u8]) -> usize {
        let mut len = payload.len();
        if len > self.max_payload_len {
            self.log.append(format!(
                "  bleSend: trimming from {} to {} bytes!",
                len, self.max_payload_len
            ));
            len = self.max_payload_len;
        }

        if self.events.send(BridgeEvent::RelaySend(payload[..len].to_vec())).is_err() {
            warn!("Bridge stopped, dropping {} outbound bytes", len);
            return 0;
        }
        len
    }
}

enum RelayCommand {
    Init(RelayContext, oneshot::Sender<String>),
    Transport(oneshot::Sender<String>),
    Rx {
        address: DeviceAddress,
        payload: Vec<u8>,
    },
    Plus(oneshot::Sender<String>),
    Minus(oneshot::Sender<String>),
    Dump,
    Timer,
    Flush(oneshot::Sender<()>),
}

/// A clonable handle that sends commands to the dedicated relay thread.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    /// Moves `relay` onto its own thread. The thread exits once every handle
    /// has been dropped.
    pub fn spawn<R: Relay>(mut relay: R) -> io::Result<(Self, JoinHandle<()>)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<RelayCommand>();

        let thread = thread::Builder::new()
            .name("relay".to_string())
            .spawn(move || {
                info!("Relay thread started.");
                while let Some(command) = rx.blocking_recv() {
                    match command {
                        RelayCommand::Init(context, reply) => {
                            let _ = reply.send(relay.init(context));
                        }
                        RelayCommand::Transport(reply) => {
                            let _ = reply.send(relay.transport());
                        }
                        RelayCommand::Rx { address, payload } => {
                            debug!("relayRX: {} bytes from {}", payload.len(), address);
                            relay.rx(address, &payload);
                        }
                        RelayCommand::Plus(reply) => {
                            let _ = reply.send(relay.plus());
                        }
                        RelayCommand::Minus(reply) => {
                            let _ = reply.send(relay.minus());
                        }
                        RelayCommand::Dump => relay.dump(),
                        RelayCommand::Timer => relay.timer(),
                        RelayCommand::Flush(reply) => {
                            let _ = reply.send(());
                        }
                    }
                }
                info!("Relay thread stopped.");
            })?;

        Ok((Self { tx }, thread))
    }

    pub async fn init(&self, context: RelayContext) -> Result<String, BridgeError> {
        self.request(|reply| RelayCommand::Init(context, reply)).await
    }

    pub async fn transport(&self) -> Result<String, BridgeError> {
        self.request(RelayCommand::Transport).await
    }

    pub fn rx(&self, address: DeviceAddress, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.post(RelayCommand::Rx { address, payload })
    }

    pub async fn plus(&self) -> Result<String, BridgeError> {
        self.request(RelayCommand::Plus).await
    }

    pub async fn minus(&self) -> Result<String, BridgeError> {
        self.request(RelayCommand::Minus).await
    }

    pub fn dump(&self) -> Result<(), BridgeError> {
        self.post(RelayCommand::Dump)
    }

    pub fn timer(&self) -> Result<(), BridgeError> {
        self.post(RelayCommand::Timer)
    }

    /// Resolves once every command queued before it has been handled.
    pub async fn flush(&self) -> Result<(), BridgeError> {
        self.request(RelayCommand::Flush).await
    }

    fn post(&self, command: RelayCommand) -> Result<(), BridgeError> {
        self.tx.send(command).map_err(|_| BridgeError::RelayUnavailable)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RelayCommand,
    ) -> Result<T, BridgeError> {
        let (reply, response) = oneshot::channel();
        self.post(command(reply))?;
        response.await.map_err(|_| BridgeError::RelayUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::event_channel;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingRelay {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Relay for RecordingRelay {
        fn init(&mut self, _context: RelayContext) -> String {
            self.calls.lock().unwrap().push("init".into());
            "relay v1".into()
        }
        fn transport(&mut self) -> String {
            self.calls.lock().unwrap().push("transport".into());
            "ble".into()
        }
        fn rx(&mut self, address: DeviceAddress, payload: &[u8]) {
            self.calls.lock().unwrap().push(format!("rx {} {:?}", address, payload));
        }
        fn plus(&mut self) -> String {
            "loglevel ≤ verbose".into()
        }
        fn minus(&mut self) -> String {
            "loglevel ≤ info".into()
        }
        fn dump(&mut self) {
            self.calls.lock().unwrap().push("dump".into());
        }
        fn timer(&mut self) {
            self.calls.lock().unwrap().push("timer".into());
        }
    }

    #[tokio::test]
    async fn test_commands_are_handled_in_order() {
        let relay = RecordingRelay::default();
        let calls = relay.calls.clone();
        let (handle, thread) = RelayHandle::spawn(relay).unwrap();
        let (events, _receiver) = event_channel();
        let log = LogSink::default();

        let status = handle
            .init(RelayContext {
                outbound: OutboundSender::new(events, log.clone(), 20),
                log,
            })
            .await
            .unwrap();
        assert_eq!(status, "relay v1");

        let address = DeviceAddress::new([1, 2, 3, 4, 5, 6]);
        handle.rx(address, vec![0x01, 0x02]).unwrap();
        handle.dump().unwrap();
        handle.timer().unwrap();
        assert_eq!(handle.transport().await.unwrap(), "ble");
        assert_eq!(handle.plus().await.unwrap(), "loglevel ≤ verbose");
        assert_eq!(handle.minus().await.unwrap(), "loglevel ≤ info");
        handle.flush().await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "init".to_string(),
                "rx 01:02:03:04:05:06 [1, 2]".to_string(),
                "dump".to_string(),
                "timer".to_string(),
                "transport".to_string(),
            ]
        );

        drop(handle);
        thread.join().unwrap();
    }

    #[test]
    fn test_outbound_payload_is_trimmed() {
        let (events, mut receiver) = event_channel();
        let log = LogSink::default();
        let sender = OutboundSender::new(events, log.clone(), 20);

        assert_eq!(sender.send(&[0xAB; 32]), 20);
        assert_eq!(receiver.try_recv().unwrap(), BridgeEvent::RelaySend(vec![0xAB; 20]));
        assert!(log.snapshot().contains(&"  bleSend: trimming from 32 to 20 bytes!".to_string()));

        assert_eq!(sender.send(&[0x10, 0x20]), 2);
        assert_eq!(receiver.try_recv().unwrap(), BridgeEvent::RelaySend(vec![0x10, 0x20]));
    }

    #[test]
    fn test_stopped_bridge_drops_outbound() {
        let (events, receiver) = event_channel();
        drop(receiver);
        let sender = OutboundSender::new(events, LogSink::default(), 20);
        assert_eq!(sender.send(&[1, 2, 3]), 0);
    }
}
