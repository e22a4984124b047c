//! TOML configuration surface for the SDK session, following the same
//! raw-struct-with-defaults pattern used for service configs elsewhere in
//! this codebase: every field is optional on the wire and filled in with a
//! sane default during [`Config::from_raw`].

use std::time::Duration;

use serde::Deserialize;

use reconnect::BackoffConfig;
use transport::TransportConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: String,
    pub use_websocket: bool,
    pub db_path: String,
    pub transport: TransportConfig,
    pub backoff: BackoffConfig,
    pub sync_batch_size: u32,
    pub revoke_window: Duration,
    pub ack_timeout: Duration,
    pub ack_max_attempts: u32,
    pub auto_reconnect: bool,
    pub max_sequence_gap: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_addr: "127.0.0.1:7890".to_string(),
            use_websocket: false,
            db_path: "chat.sqlite3".to_string(),
            transport: TransportConfig::default(),
            backoff: BackoffConfig::default(),
            sync_batch_size: resync::DEFAULT_BATCH_SIZE,
            revoke_window: Duration::from_secs(120),
            ack_timeout: Duration::from_secs(5),
            ack_max_attempts: 3,
            auto_reconnect: true,
            max_sequence_gap: seqtrack::GapThresholds::default().max_sequence_gap,
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, crate::error::Error> {
        let raw: RawConfig =
            toml::from_str(raw).map_err(|e| crate::error::Error::Config(e.to_string()))?;
        Ok(raw.into_config())
    }

    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, crate::error::Error> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::Config(e.to_string()))?;
        Self::from_toml_str(&contents)
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    server_addr: Option<String>,
    use_websocket: Option<bool>,
    db_path: Option<String>,
    connect_timeout_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
    backoff_base_secs: Option<u64>,
    backoff_max_secs: Option<u64>,
    backoff_jitter_ratio: Option<f64>,
    backoff_max_attempts: Option<u32>,
    sync_batch_size: Option<u32>,
    revoke_window_secs: Option<u64>,
    ack_timeout_secs: Option<u64>,
    ack_max_attempts: Option<u32>,
    auto_reconnect: Option<bool>,
    max_sequence_gap: Option<u32>,
}

impl RawConfig {
    fn into_config(self) -> Config {
        let defaults = Config::default();
        Config {
            server_addr: self.server_addr.unwrap_or(defaults.server_addr),
            use_websocket: self.use_websocket.unwrap_or(defaults.use_websocket),
            db_path: self.db_path.unwrap_or(defaults.db_path),
            transport: TransportConfig {
                connect_timeout: self
                    .connect_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.transport.connect_timeout),
                heartbeat_interval: self
                    .heartbeat_interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.transport.heartbeat_interval),
                heartbeat_timeout: self
                    .heartbeat_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.transport.heartbeat_timeout),
                max_packet_size: defaults.transport.max_packet_size,
            },
            backoff: BackoffConfig {
                base: self
                    .backoff_base_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.backoff.base),
                max_delay: self
                    .backoff_max_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.backoff.max_delay),
                jitter_ratio: self.backoff_jitter_ratio.unwrap_or(defaults.backoff.jitter_ratio),
                max_attempts: self
                    .backoff_max_attempts
                    .map(Some)
                    .unwrap_or(defaults.backoff.max_attempts),
            },
            sync_batch_size: self.sync_batch_size.unwrap_or(defaults.sync_batch_size),
            revoke_window: self
                .revoke_window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.revoke_window),
            ack_timeout: self
                .ack_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.ack_timeout),
            ack_max_attempts: self.ack_max_attempts.unwrap_or(defaults.ack_max_attempts),
            auto_reconnect: self.auto_reconnect.unwrap_or(defaults.auto_reconnect),
            max_sequence_gap: self.max_sequence_gap.unwrap_or(defaults.max_sequence_gap),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server_addr, Config::default().server_addr);
    }

    #[test]
    fn partial_toml_overrides_only_given_fields() {
        let config = Config::from_toml_str(
            r#"
            server_addr = "example.com:443"
            use_websocket = true
            "#,
        )
        .unwrap();
        assert_eq!(config.server_addr, "example.com:443");
        assert!(config.use_websocket);
        assert_eq!(config.sync_batch_size, Config::default().sync_batch_size);
    }
}
