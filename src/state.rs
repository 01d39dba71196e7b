//! Application state management
//! Wires the stack, the bridge loop and the relay thread together and owns
//! their lifetimes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::core::bluetooth::GattStack;
use crate::core::{
    event_channel, BluestStack, BridgeHandle, EventReceiver, EventSender, LogSink, OutboundSender,
    Relay, RelayBridge, RelayContext, RelayHandle,
};

struct Tasks {
    bridge: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    relay_thread: Option<thread::JoinHandle<()>>,
}

/// Global application state
pub struct AppState {
    pub log: LogSink,
    pub relay: RelayHandle,
    pub bridge: BridgeHandle,
    /// Status line returned by the relay at init
    relay_status: String,
    timer_cancel_token: CancellationToken,
    tasks: Tasks,
}

impl AppState {
    /// Opens the platform adapter and starts the bridge on it.
    pub async fn new<R: Relay>(config: BridgeConfig, relay: R) -> Result<Self> {
        let log = LogSink::new(config.log_capacity);
        let (events, receiver) = event_channel();
        info!("Initializing Bluetooth stack...");
        let stack = BluestStack::new(events.clone(), &log).await?;
        Self::with_stack(config, log, Arc::new(stack), events, receiver, relay).await
    }

    /// Starts the relay, the bridge loop and the first scan on `stack`.
    pub async fn with_stack<R: Relay>(
        config: BridgeConfig,
        log: LogSink,
        stack: Arc<dyn GattStack>,
        events: EventSender,
        receiver: EventReceiver,
        relay: R,
    ) -> Result<Self> {
        let (relay_handle, relay_thread) = RelayHandle::spawn(relay)?;
        let outbound = OutboundSender::new(events.clone(), log.clone(), config.max_payload_len);
        let relay_status = relay_handle
            .init(RelayContext {
                outbound,
                log: log.clone(),
            })
            .await?;
        info!("Relay initialized: {}", relay_status);

        let timer_interval = config.relay_timer_interval_secs;
        let mut bridge = RelayBridge::new(config, stack, log.clone(), relay_handle.clone(), events, receiver);
        let bridge_handle = bridge.handle();
        // Scan failures are already in the log.
        let _ = bridge.start_scan();
        let bridge_task = tokio::spawn(bridge.run());

        let timer_cancel_token = CancellationToken::new();
        let timer_task = timer_interval
            .filter(|secs| *secs > 0)
            .map(|secs| spawn_relay_timer(relay_handle.clone(), Duration::from_secs(secs), timer_cancel_token.clone()));

        Ok(Self {
            log,
            relay: relay_handle,
            bridge: bridge_handle,
            relay_status,
            timer_cancel_token,
            tasks: Tasks {
                bridge: Some(bridge_task),
                timer: timer_task,
                relay_thread: Some(relay_thread),
            },
        })
    }

    pub fn relay_status(&self) -> &str {
        &self.relay_status
    }

    /// Stops the timer and the bridge loop, then waits for the relay thread.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down...");
        let Self {
            relay,
            bridge,
            timer_cancel_token,
            tasks,
            ..
        } = self;

        timer_cancel_token.cancel();
        if let Some(timer) = tasks.timer {
            let _ = timer.await;
        }
        if bridge.shutdown().is_err() {
            warn!("Bridge loop already stopped");
        }
        if let Some(bridge_task) = tasks.bridge {
            bridge_task.await?;
        }

        // The relay thread exits once the last handle is gone.
        drop(relay);
        if let Some(relay_thread) = tasks.relay_thread {
            tokio::task::spawn_blocking(move || relay_thread.join())
                .await?
                .map_err(|_| anyhow!("Relay thread panicked"))?;
        }
        info!("Shutdown complete.");
        Ok(())
    }
}

fn spawn_relay_timer(relay: RelayHandle, period: Duration, cancel_token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if relay.timer().is_err() {
                        break;
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    })
}
