use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Derived from the set of sensors that have contributed to a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackSource {
    Radar,
    Rf,
    Fused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackType {
    Uav,
    Bird,
    Unknown,
    Clutter,
}

/// RF-intel fields copied in when a radar track fuses with an RF precision
/// detection, or carried alone on an RF-only track.
#[derive(Debug, Clone, Default)]
pub struct RfIntel {
    pub aircraft_model: Option<String>,
    pub serial: Option<String>,
    pub pilot_lat: Option<f64>,
    pub pilot_lon: Option<f64>,
    pub frequency_hz: Option<f64>,
    pub power_dbm: Option<f64>,
}

/// One sample in a track's bounded position history.
#[derive(Debug, Clone, Copy)]
pub struct TailSample {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub range_m: Option<f64>,
    pub timestamp: Instant,
}

/// A fused track in the tactical picture. Owned exclusively by the fusion
/// engine — every other component reads an immutable snapshot.
#[derive(Debug, Clone)]
pub struct Track {
    /// Stable across updates, unique within a run.
    pub id: u64,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub range_m: Option<f64>,
    pub velocity_mps: Option<[f64; 3]>,
    /// Smoothed range-rate, m/s, negative = approaching.
    pub range_rate_mps: f64,
    /// Previous range/timestamp pair used to derive range-rate on the next update.
    pub prev_range_m: Option<f64>,
    pub prev_timestamp: Option<Instant>,
    pub first_seen: Instant,
    pub last_update: Instant,
    pub source: TrackSource,
    pub track_type: TrackType,
    pub classification: Option<String>,
    pub confidence: f64,
    pub rf_intel: Option<RfIntel>,
    /// Bounded time-windowed history, monotonically non-decreasing in timestamp.
    pub tail: VecDeque<TailSample>,
    pub threat_score: f64,
    pub prev_threat_score: f64,
    /// Count of measurements that have updated this track, for the wire's `num_updates`.
    pub num_updates: u32,
}

impl Track {
    /// Create a brand-new track from its first measurement.
    pub fn new(
        id: u64,
        now: Instant,
        azimuth_deg: f64,
        elevation_deg: f64,
        range_m: Option<f64>,
        velocity_mps: Option<[f64; 3]>,
        source: TrackSource,
        track_type: TrackType,
        confidence: f64,
    ) -> Self {
        Self {
            id,
            azimuth_deg: azimuth_deg.rem_euclid(360.0),
            elevation_deg,
            range_m,
            velocity_mps,
            range_rate_mps: 0.0,
            prev_range_m: None,
            prev_timestamp: None,
            first_seen: now,
            last_update: now,
            source,
            track_type,
            classification: None,
            confidence: confidence.clamp(0.0, 1.0),
            rf_intel: None,
            tail: VecDeque::new(),
            threat_score: 0.0,
            prev_threat_score: 0.0,
            num_updates: 1,
        }
    }

    /// Age since first measurement, seconds.
    pub fn age_secs(&self, now: Instant) -> f64 {
        now.duration_since(self.first_seen).as_secs_f64()
    }

    /// Whether the track has received a measurement within `stale_after`.
    pub fn is_stale(&self, now: Instant, stale_after_secs: f64) -> bool {
        now.duration_since(self.last_update).as_secs_f64() > stale_after_secs
    }

    /// `first_seen <= last_update` is a class invariant; assert it in tests
    /// and debug builds rather than checking it on every hot-path update.
    pub fn check_invariants(&self) {
        debug_assert!(self.first_seen <= self.last_update);
        debug_assert!((0.0..360.0).contains(&self.azimuth_deg));
        let mut prev_ts: Option<Instant> = None;
        for sample in &self.tail {
            if let Some(p) = prev_ts {
                debug_assert!(sample.timestamp >= p);
            }
            prev_ts = Some(sample.timestamp);
        }
    }
}
