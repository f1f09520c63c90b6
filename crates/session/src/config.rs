//! The session configuration contract: field shapes and the invariants
//! `validate` enforces. Loading this from a TOML/JSON file or argv is the
//! excluded CLI collaborator's job — this struct only defines what a valid
//! configuration looks like, mirroring the reference's
//! `core.config.validate_config`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported wire version {0}, this build only understands version 1")]
    BadWireVersion(u8),
    #[error("replay_window {0} out of range [64, 8192]")]
    ReplayWindowOutOfRange(usize),
    #[error("non-loopback plaintext socket {0} requires allow_non_loopback_plaintext")]
    NonLoopbackPlaintext(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub wire_version: u8,
    pub replay_window: usize,
    pub rekey_seconds: u64,
    pub tcp_handshake_port: u16,
    pub udp_drone_rx: u16,
    pub udp_gcs_rx: u16,
    pub drone_plaintext_tx: u16,
    pub drone_plaintext_rx: u16,
    pub gcs_plaintext_tx: u16,
    pub gcs_plaintext_rx: u16,
    pub drone_host: String,
    pub gcs_host: String,
    pub strict_peer_match: bool,
    pub enable_packet_type: bool,
    pub control_port: u16,
    pub allow_non_loopback_plaintext: bool,
    pub status_path: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wire_version != wire::WIRE_VERSION {
            return Err(ConfigError::BadWireVersion(self.wire_version));
        }
        if self.replay_window < aead::MIN_REPLAY_WINDOW || self.replay_window > aead::MAX_REPLAY_WINDOW {
            return Err(ConfigError::ReplayWindowOutOfRange(self.replay_window));
        }
        if !self.allow_non_loopback_plaintext {
            for host in [&self.drone_host, &self.gcs_host] {
                if !is_loopback(host) {
                    return Err(ConfigError::NonLoopbackPlaintext(host.clone()));
                }
            }
        }
        Ok(())
    }
}

fn is_loopback(host: &str) -> bool {
    host == "127.0.0.1" || host == "::1" || host == "localhost"
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wire_version: wire::WIRE_VERSION,
            replay_window: aead::DEFAULT_REPLAY_WINDOW,
            rekey_seconds: 600,
            tcp_handshake_port: 5800,
            udp_drone_rx: 5810,
            udp_gcs_rx: 5811,
            drone_plaintext_tx: 14550,
            drone_plaintext_rx: 14551,
            gcs_plaintext_tx: 14551,
            gcs_plaintext_rx: 14550,
            drone_host: "127.0.0.1".to_string(),
            gcs_host: "127.0.0.1".to_string(),
            strict_peer_match: true,
            enable_packet_type: false,
            control_port: 5820,
            allow_non_loopback_plaintext: false,
            status_path: "/tmp/pqc-proxy-status.json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn bad_wire_version_is_rejected() {
        let mut cfg = Config::default();
        cfg.wire_version = 9;
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::BadWireVersion(9));
    }

    #[test]
    fn replay_window_out_of_range_is_rejected() {
        let mut cfg = Config::default();
        cfg.replay_window = 16;
        assert!(matches!(cfg.validate(), Err(ConfigError::ReplayWindowOutOfRange(16))));
        cfg.replay_window = 100_000;
        assert!(matches!(cfg.validate(), Err(ConfigError::ReplayWindowOutOfRange(100_000))));
    }

    #[test]
    fn non_loopback_host_rejected_unless_allowed() {
        let mut cfg = Config::default();
        cfg.gcs_host = "192.168.1.5".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::NonLoopbackPlaintext(_))));
        cfg.allow_non_loopback_plaintext = true;
        cfg.validate().unwrap();
    }
}
