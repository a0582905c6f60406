use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Status feedback received from a gunner station, keyed by `station_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GunnerStatus {
    pub station_id: String,
    /// -1 if none.
    pub cued_track_id: i64,
    pub visual_lock: bool,
    pub ready_to_fire: bool,
    pub rws_azimuth_deg: f64,
    pub rws_elevation_deg: f64,
    pub selected_weapon: String,
    pub rounds_remaining: u32,
    pub weapon_armed: bool,
    pub operator_id: String,
    pub timestamp_ns: u64,
    /// Set by the receiver, not the wire payload.
    #[serde(skip, default)]
    pub last_seen: Option<Instant>,
}

/// Effector recommendation, a pure function of range (see §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effector {
    TooClose,
    #[serde(rename = "CRx-40")]
    Crx40,
    #[serde(rename = "CRx-30")]
    Crx30,
    OutOfRange,
}

impl Effector {
    pub fn recommend(range_m: f64) -> (Effector, &'static str) {
        if range_m < 50.0 {
            (Effector::TooClose, "RANGE_TOO_CLOSE")
        } else if range_m < 100.0 {
            (Effector::Crx40, "RANGE_ACCEPTABLE_CRX40")
        } else if range_m < 250.0 {
            (Effector::Crx40, "RANGE_OPTIMAL_CRX40")
        } else if range_m < 400.0 {
            (Effector::Crx30, "RANGE_TRANSITION_CRX30")
        } else if range_m < 1000.0 {
            (Effector::Crx30, "RANGE_OPTIMAL_CRX30")
        } else {
            (Effector::OutOfRange, "RANGE_OUT_OF_RANGE")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Priority::Critical
        } else if score >= 0.5 {
            Priority::High
        } else if score >= 0.25 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// Single-track wire record transmitted to a gunner station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackUpdate {
    pub track_id: u64,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub range_m: f64,
    pub velocity_x_mps: f64,
    pub velocity_y_mps: f64,
    pub velocity_z_mps: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    #[serde(rename = "type")]
    pub track_type: String,
    pub confidence: f64,
    pub source: String,
    pub track_age_sec: f64,
    pub num_updates: u32,
    pub priority: Priority,
    pub recommended_effector: Effector,
    pub recommendation_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pilot_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pilot_longitude: Option<f64>,
    pub timestamp_ns: u64,
}

/// Snapshot wrapper broadcast at 10 Hz — always exactly one track (the
/// engaged one) per the spec's single-track engagement contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracksSnapshot {
    pub tracks: Vec<TrackUpdate>,
    pub radar_online: bool,
    pub rf_online: bool,
    pub total_tracks: usize,
    pub ownship_lat: f64,
    pub ownship_lon: f64,
    pub ownship_heading: f64,
    pub timestamp_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effector_breakpoints() {
        assert_eq!(Effector::recommend(10.0).0, Effector::TooClose);
        assert_eq!(Effector::recommend(75.0).0, Effector::Crx40);
        assert_eq!(Effector::recommend(200.0).0, Effector::Crx40);
        assert_eq!(Effector::recommend(300.0).0, Effector::Crx30);
        assert_eq!(Effector::recommend(900.0).0, Effector::Crx30);
        assert_eq!(Effector::recommend(1500.0).0, Effector::OutOfRange);
    }

    #[test]
    fn priority_breakpoints() {
        assert_eq!(Priority::from_score(0.9), Priority::Critical);
        assert_eq!(Priority::from_score(0.6), Priority::High);
        assert_eq!(Priority::from_score(0.3), Priority::Medium);
        assert_eq!(Priority::from_score(0.1), Priority::Low);
    }
}
