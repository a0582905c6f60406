//! JSON configuration, loaded once at startup. Follows the teacher's
//! `persistence::load_state` pattern: a missing or corrupt file logs a
//! warning and falls back to defaults rather than failing startup.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    pub enabled: bool,
    pub host: String,
    pub command_port: u16,
    /// Max bytes of resync search before a header mismatch becomes a `ProtocolError`.
    pub resync_budget_bytes: usize,
    pub io_timeout_ms: u64,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "192.168.1.25".to_string(),
            command_port: 29982,
            resync_budget_bytes: 65536,
            io_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RfConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub cert_path: String,
    pub key_path: String,
    pub ca_path: String,
    pub io_timeout_ms: u64,
}

impl Default for RfConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8443,
            cert_path: "certs/client.cert.pem".to_string(),
            key_path: "certs/client.key.pem".to_string(),
            ca_path: "certs/ca-chain.cert.pem".to_string(),
            io_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub enabled: bool,
    pub port: String,
    pub port_linux: String,
    pub baudrate: u32,
    pub fix_timeout_secs: f64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: "COM3".to_string(),
            port_linux: "/dev/ttyACM0".to_string(),
            baudrate: 115_200,
            fix_timeout_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GunnerConfig {
    pub track_port: u16,
    pub status_port: u16,
    pub broadcast_addr: String,
    pub stale_secs: f64,
}

impl Default for GunnerConfig {
    fn default() -> Self {
        Self {
            track_port: 5100,
            status_port: 5101,
            broadcast_addr: "255.255.255.255".to_string(),
            stale_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub assoc_delta_az_deg: f64,
    pub assoc_delta_range_m: f64,
    pub tail_seconds: f64,
    pub tail_capacity: usize,
    pub track_stale_secs: f64,
    pub fusion_tick_hz: f64,
    pub broadcast_tick_hz: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            assoc_delta_az_deg: 10.0,
            assoc_delta_range_m: 200.0,
            tail_seconds: 20.0,
            tail_capacity: 100,
            track_stale_secs: 5.0,
            fusion_tick_hz: 30.0,
            broadcast_tick_hz: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NetworkConfig {
    pub radar: RadarConfig,
    pub rf: RfConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub gps: GpsConfig,
    pub gunner: GunnerConfig,
    pub thresholds: ThresholdsConfig,
    pub api_bind_addr: Option<String>,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            warn!("no config file at {}, using defaults", path.display());
            return Config::default();
        }
        match tokio::fs::read_to_string(path).await {
            Ok(data) => match serde_json::from_str::<Config>(&data) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("failed to parse {}: {e}, using defaults", path.display());
                    Config::default()
                }
            },
            Err(e) => {
                warn!("failed to read {}: {e}, using defaults", path.display());
                Config::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensors_disabled() {
        let cfg = Config::default();
        assert!(!cfg.network.radar.enabled);
        assert!(!cfg.network.rf.enabled);
        assert!(!cfg.gps.enabled);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load("/nonexistent/path/config.json").await;
        assert_eq!(cfg.gunner.track_port, 5100);
    }
}
