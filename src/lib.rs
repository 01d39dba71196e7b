//! BLE relay bridge library
//! Connects a packet relay to a single BLE peripheral exposing the relay
//! service, and carries payloads both ways over a SEND/RECV characteristic
//! pair.

pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
