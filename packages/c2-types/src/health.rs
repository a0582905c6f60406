use serde::{Deserialize, Serialize};

/// Tri-state (really four-state) sensor health, surfaced to the UI layer.
///
/// `Offline` = disabled in config or never configured; `Standby` = enabled
/// but not yet connected (or connection dropped, awaiting reconnect);
/// `Idle` = connected but not streaming (radar-specific — the device accepts
/// commands but no track packets are flowing); `Online` = actively streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorHealth {
    Offline,
    Standby,
    Idle,
    Online,
}

impl Default for SensorHealth {
    fn default() -> Self {
        SensorHealth::Offline
    }
}
