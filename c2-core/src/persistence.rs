//! Persisted radar configuration (`radar_config.json`) — IPv4, search/track
//! FOV bounds, range bounds, and platform orientation. Written atomically on
//! every successful `configure_radar`, loaded at startup, defaulted if
//! missing. Mirrors the teacher's `persistence::load_state` / `save_state`
//! split (load tolerates a missing/corrupt file, save is fallible).

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FovBounds {
    pub az_min_deg: f64,
    pub az_max_deg: f64,
    pub el_min_deg: f64,
    pub el_max_deg: f64,
}

impl Default for FovBounds {
    fn default() -> Self {
        Self {
            az_min_deg: -60.0,
            az_max_deg: 60.0,
            el_min_deg: -20.0,
            el_max_deg: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RadarPersistedConfig {
    pub host: String,
    pub search_fov: FovBounds,
    pub track_fov: FovBounds,
    pub range_min_m: f64,
    pub range_max_m: f64,
    pub platform_yaw_offset_deg: f64,
    pub platform_pitch_offset_deg: f64,
    pub platform_roll_offset_deg: f64,
}

impl Default for RadarPersistedConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.25".to_string(),
            search_fov: FovBounds::default(),
            track_fov: FovBounds::default(),
            range_min_m: 10.0,
            range_max_m: 3000.0,
            platform_yaw_offset_deg: 0.0,
            platform_pitch_offset_deg: 0.0,
            platform_roll_offset_deg: 0.0,
        }
    }
}

const RADAR_CONFIG_FILE: &str = "radar_config.json";

pub async fn load_radar_config(path: impl AsRef<Path>) -> RadarPersistedConfig {
    let path = path.as_ref();
    if !path.exists() {
        info!("no {} found, using default radar config", path.display());
        return RadarPersistedConfig::default();
    }
    match tokio::fs::read_to_string(path).await {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("failed to parse {}: {e}, using defaults", path.display());
                RadarPersistedConfig::default()
            }
        },
        Err(e) => {
            warn!("failed to read {}: {e}, using defaults", path.display());
            RadarPersistedConfig::default()
        }
    }
}

/// Write atomically: serialize to a sibling `.tmp` file then rename over the
/// target, so a crash mid-write never leaves a truncated config on disk.
pub async fn save_radar_config(path: impl AsRef<Path>, cfg: &RadarPersistedConfig) -> Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(cfg)?;
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub fn default_radar_config_path() -> &'static str {
    RADAR_CONFIG_FILE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radar_config.json");

        let mut cfg = RadarPersistedConfig::default();
        cfg.host = "10.0.0.5".to_string();
        cfg.range_max_m = 5000.0;

        save_radar_config(&path, &cfg).await.unwrap();
        let reloaded = load_radar_config(&path).await;
        assert_eq!(reloaded, cfg);
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let cfg = load_radar_config("/nonexistent/radar_config.json").await;
        assert_eq!(cfg, RadarPersistedConfig::default());
    }
}
