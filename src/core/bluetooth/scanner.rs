use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::error::BridgeError;
use crate::core::bluetooth::stack::GattStack;
use crate::core::bluetooth::types::{Advertisement, DeviceAddress, ScanPhase};
use crate::core::events::{BridgeEvent, EventSender};
use crate::core::log_sink::LogSink;

/// Decides which advertisements end a scan cycle.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub min_rssi: Option<i16>,
    pub name_contains: Option<String>,
}

impl ScanFilter {
    /// With no constraints configured the first device seen is accepted.
    pub fn accepts(&self, advertisement: &Advertisement) -> bool {
        if let Some(min_rssi) = self.min_rssi {
            match advertisement.rssi {
                Some(rssi) if rssi >= min_rssi => {}
                _ => return false,
            }
        }
        if let Some(pattern) = &self.name_contains {
            let matches = advertisement
                .name
                .as_deref()
                .map(|name| name.contains(pattern.as_str()))
                .unwrap_or(false);
            if !matches {
                return false;
            }
        }
        true
    }
}

/// Time-bounded scan yielding at most one device per cycle.
///
/// Each cycle gets a new generation number. The timer task carries the
/// generation it was armed for, and [`DeviceScanner::on_timeout`] drops any
/// expiry that does not match the current one, so a timer left over from an
/// earlier cycle can never stop a later scan.
pub struct DeviceScanner {
    stack: Arc<dyn GattStack>,
    log: LogSink,
    events: EventSender,
    filter: ScanFilter,
    phase: ScanPhase,
    scanning: bool,
    generation: u64,
    cancel_token: Option<CancellationToken>,
}

impl DeviceScanner {
    pub fn new(stack: Arc<dyn GattStack>, log: LogSink, events: EventSender, filter: ScanFilter) -> Self {
        Self {
            stack,
            log,
            events,
            filter,
            phase: ScanPhase::Idle,
            scanning: false,
            generation: 0,
            cancel_token: None,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn start_scan(&mut self, duration: Duration) -> Result<(), BridgeError> {
        if self.phase == ScanPhase::Scanning {
            self.log.append("scan: already scanning");
            return Err(BridgeError::InvalidState("scan already active".to_string()));
        }

        self.settle();
        self.cancel_timer();
        self.generation += 1;

        if let Err(e) = self.stack.start_scan() {
            self.log.append(format!("scan: failed to start: {}", e));
            self.phase = ScanPhase::Idle;
            return Err(e);
        }

        self.scanning = true;
        self.phase = ScanPhase::Scanning;

        let cancel_token = CancellationToken::new();
        let cancel_token_for_task = cancel_token.clone();
        let events = self.events.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    if events.send(BridgeEvent::ScanTimeout { generation }).is_err() {
                        debug!("Bridge queue closed before scan {} expired", generation);
                    }
                }
                _ = cancel_token_for_task.cancelled() => {
                    debug!("Scan timer {} cancelled", generation);
                }
            }
        });
        self.cancel_token = Some(cancel_token);

        self.log.append(format!("scan: started for {} ms", duration.as_millis()));
        Ok(())
    }

    /// Handles one advertisement; returns the address when it ends the cycle.
    pub fn on_advertisement(&mut self, advertisement: &Advertisement) -> Option<DeviceAddress> {
        if self.phase != ScanPhase::Scanning {
            debug!("Ignoring advertisement from {} outside a scan", advertisement.address);
            return None;
        }
        if !self.filter.accepts(advertisement) {
            debug!("Advertisement from {} rejected by filter", advertisement.address);
            return None;
        }

        let address = match DeviceAddress::parse(&advertisement.address) {
            Ok(address) => address,
            Err(e) => {
                self.log.append(format!("scan: ignoring advertisement: {}", e));
                return None;
            }
        };

        // Invalidate the timer before anything else observes the new phase.
        self.cancel_timer();
        self.generation += 1;
        self.phase = ScanPhase::Found(address);
        self.log.append(format!("addr={}", address));
        self.stop_scan();
        Some(address)
    }

    /// Handles a timer expiry; returns whether it ended the current cycle.
    pub fn on_timeout(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.phase != ScanPhase::Scanning {
            debug!(
                "Ignoring stale scan timer {} (current generation {})",
                generation, self.generation
            );
            return false;
        }

        self.cancel_token = None;
        self.phase = ScanPhase::TimedOut;
        self.log.append("scan: timed out, no device found");
        self.stop_scan();
        true
    }

    /// Idempotent; only an actual change is logged.
    pub fn stop_scan(&mut self) {
        self.cancel_timer();
        if self.phase == ScanPhase::Scanning {
            self.generation += 1;
            self.phase = ScanPhase::Idle;
        }
        if !self.scanning {
            return;
        }

        self.scanning = false;
        self.stack.stop_scan();
        self.log.append("scan: stopped");
    }

    /// Moves a finished cycle (`Found` or `TimedOut`) back to `Idle`.
    /// Both phases rest until the found device's session ends or the next
    /// scan starts.
    pub fn settle(&mut self) {
        if matches!(self.phase, ScanPhase::Found(_) | ScanPhase::TimedOut) {
            debug!("Scan cycle {} settled from {:?}", self.generation, self.phase);
            self.phase = ScanPhase::Idle;
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(cancel_token) = self.cancel_token.take() {
            cancel_token.cancel();
        }
    }
}
