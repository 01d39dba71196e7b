pub mod bridge_config;

pub use bridge_config::{default_config_path, BridgeConfig, CONFIG_PATH_ENV};
