//! Shell commands
//! Everything the user interface can invoke on the running bridge. Errors
//! are returned as display strings.

use crate::state::AppState;

/// Appends a line to the display log.
pub fn append_to_log(app_state: &AppState, message: &str) {
    app_state.log.append(message);
}

/// Returns the display log, oldest line first.
pub fn log_snapshot(app_state: &AppState) -> Vec<String> {
    app_state.log.snapshot()
}

/// Status line the relay reported at startup.
pub fn status(app_state: &AppState) -> String {
    app_state.relay_status().to_string()
}

/// The relay's transport description, once the channel has been ready.
pub fn transport(app_state: &AppState) -> Option<String> {
    app_state.bridge.transport()
}

/// Raises the relay's verbosity and returns its new debug level text.
pub async fn relay_plus(app_state: &AppState) -> Result<String, String> {
    app_state.relay.plus().await.map_err(|e| e.to_string())
}

/// Lowers the relay's verbosity and returns its new debug level text.
pub async fn relay_minus(app_state: &AppState) -> Result<String, String> {
    app_state.relay.minus().await.map_err(|e| e.to_string())
}

pub fn relay_dump(app_state: &AppState) -> Result<(), String> {
    app_state.relay.dump().map_err(|e| e.to_string())
}

/// Starts a new scan cycle. Ignored while a session is active.
pub fn start_scan(app_state: &AppState) -> Result<(), String> {
    app_state.bridge.start_scan().map_err(|e| e.to_string())
}

/// Drops the current peer, if any.
pub fn disconnect(app_state: &AppState) -> Result<(), String> {
    app_state.bridge.disconnect().map_err(|e| e.to_string())
}

/// Queues `payload` for the peer, as if the relay had sent it.
pub fn send(app_state: &AppState, payload: Vec<u8>) -> Result<(), String> {
    app_state.bridge.send(payload).map_err(|e| e.to_string())
}
