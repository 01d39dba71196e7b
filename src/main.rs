use anyhow::Result;
use ble_relay_bridge::config::{default_config_path, BridgeConfig};
use ble_relay_bridge::core::bluetooth::DeviceAddress;
use ble_relay_bridge::core::{Relay, RelayContext};
use ble_relay_bridge::state::AppState;
use ble_relay_bridge::utils::{hex_dump, spawn_line_reader};
use ble_relay_bridge::{commands, logging};
use log::{debug, error, info, LevelFilter};
use std::io::BufReader;

/// Stand-in relay that logs what it receives and can echo it back.
#[derive(Default)]
struct ConsoleRelay {
    context: Option<RelayContext>,
    echo: bool,
    received: usize,
    ticks: u64,
}

impl Relay for ConsoleRelay {
    fn init(&mut self, context: RelayContext) -> String {
        self.context = Some(context);
        format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }

    fn transport(&mut self) -> String {
        "BLE (console relay)".to_string()
    }

    fn rx(&mut self, address: DeviceAddress, payload: &[u8]) {
        self.received += 1;
        let Some(context) = &self.context else {
            return;
        };
        context
            .log
            .append(format!("relayRX: {} bytes from {}: {}", payload.len(), address, hex_dump(payload)));
        if self.echo {
            context.outbound.send(payload);
        }
    }

    fn plus(&mut self) -> String {
        let level = logging::more_verbose(log::max_level());
        log::set_max_level(level);
        format!("loglevel ≤ {}", level)
    }

    fn minus(&mut self) -> String {
        let level = logging::less_verbose(log::max_level());
        log::set_max_level(level);
        format!("loglevel ≤ {}", level)
    }

    fn dump(&mut self) {
        if let Some(context) = &self.context {
            context.log.append(format!(
                "relay: {} payloads received, {} timer ticks",
                self.received, self.ticks
            ));
        }
    }

    fn timer(&mut self) {
        self.ticks += 1;
        debug!("relay timer tick {}", self.ticks);
    }
}

/// Returns false once the user asked to quit.
async fn handle_line(app_state: &AppState, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let result = match words.next() {
        Some("+") => commands::relay_plus(app_state).await.map(|level| println!("{}", level)),
        Some("-") => commands::relay_minus(app_state).await.map(|level| println!("{}", level)),
        Some("dump") => commands::relay_dump(app_state),
        Some("scan") => commands::start_scan(app_state),
        Some("disconnect") => commands::disconnect(app_state),
        Some("send") => match parse_hex(words) {
            Some(payload) => commands::send(app_state, payload),
            None => Err("usage: send <hex bytes>".to_string()),
        },
        Some("log") => {
            for line in commands::log_snapshot(app_state) {
                println!("{}", line);
            }
            Ok(())
        }
        Some("status") => {
            println!("{}", commands::status(app_state));
            println!(
                "Transport: {}",
                commands::transport(app_state).unwrap_or_else(|| "-".to_string())
            );
            Ok(())
        }
        Some("quit") | Some("exit") => return false,
        Some(other) => Err(format!("unknown command {:?}", other)),
        None => Ok(()),
    };
    if let Err(e) = result {
        error!("{}", e);
    }
    true
}

fn parse_hex<'a>(words: impl Iterator<Item = &'a str>) -> Option<Vec<u8>> {
    let payload = words
        .map(|word| u8::from_str_radix(word, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    (!payload.is_empty()).then_some(payload)
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init(LevelFilter::Info) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let config_path = default_config_path()?;
    let config = BridgeConfig::load_config(&config_path).await?;
    let relay = ConsoleRelay {
        echo: std::env::args().any(|arg| arg == "--echo"),
        ..ConsoleRelay::default()
    };

    info!("Starting AppState initialization.");
    let app_state = AppState::new(config, relay).await?;
    app_state.log.set_observer(|line: &str| println!("{}", line));
    println!("{}", commands::status(&app_state));

    let mut lines = spawn_line_reader(BufReader::new(std::io::stdin()))?;
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.recv(), if stdin_open => {
                match line {
                    Some(line) => {
                        if !handle_line(&app_state, &line).await {
                            break;
                        }
                    }
                    // stdin closed, keep relaying until interrupted
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    app_state.shutdown().await
}
