use std::time::Instant;

use crate::track::TrackType;

/// Which physical sensor (or sensor mode) produced a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorSource {
    Radar,
    RfPrecision,
    RfSector,
}

impl SensorSource {
    pub fn is_rf(&self) -> bool {
        matches!(self, SensorSource::RfPrecision | SensorSource::RfSector)
    }
}

/// Sensor-specific payload carried alongside the common kinematic fields.
/// Modeled as a sum type so sector-mode RF can never carry a range and
/// precision-mode RF always carries aircraft/pilot position fields —
/// enforced at compile time rather than via optional fields on a flat struct.
#[derive(Debug, Clone)]
pub enum MeasurementPayload {
    Radar {
        rcs: f64,
        probability_uav: f64,
        probability_other: f64,
        /// Classification the driver derived from the probability fields —
        /// fusion uses this to seed a new track's `track_type`.
        type_hint: TrackType,
    },
    RfPrecision {
        detection_id: String,
        aircraft_model: Option<String>,
        serial: Option<String>,
        pilot_lat: Option<f64>,
        pilot_lon: Option<f64>,
        frequency_hz: f64,
        power_dbm: f64,
    },
    RfSector {
        detection_id: String,
        sector_index: u32,
        frequency_hz: f64,
        power_dbm: f64,
    },
}

/// A single normalized measurement emitted by a driver and consumed by
/// fusion. Azimuth and elevation are always in the vehicle body frame —
/// drivers are responsible for applying heading rotation when upstream data
/// arrives in a true-north frame.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub sensor_source: SensorSource,
    pub timestamp: Instant,
    /// 0–360°, 0 = forward, increasing clockwise viewed from above.
    pub azimuth_deg: f64,
    /// -90..+90.
    pub elevation_deg: f64,
    /// Slant range in meters. Always `None` for RF_SECTOR (bearing only).
    pub range_m: Option<f64>,
    /// 3D velocity vector, m/s, when the sensor can estimate it.
    pub velocity_mps: Option<[f64; 3]>,
    /// 0..1.
    pub confidence: f64,
    pub payload: MeasurementPayload,
}

impl Measurement {
    /// Construct a measurement, normalizing azimuth into [0, 360) and
    /// clamping confidence into [0, 1]. Range, when present, must be >= 0 —
    /// callers are expected to validate that themselves since a negative
    /// range indicates a driver bug, not noisy input worth silently fixing.
    pub fn new(
        sensor_source: SensorSource,
        timestamp: Instant,
        azimuth_deg: f64,
        elevation_deg: f64,
        range_m: Option<f64>,
        velocity_mps: Option<[f64; 3]>,
        confidence: f64,
        payload: MeasurementPayload,
    ) -> Self {
        Self {
            sensor_source,
            timestamp,
            azimuth_deg: azimuth_deg.rem_euclid(360.0),
            elevation_deg,
            range_m,
            velocity_mps,
            confidence: confidence.clamp(0.0, 1.0),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azimuth_is_normalized_into_0_360() {
        let m = Measurement::new(
            SensorSource::Radar,
            Instant::now(),
            -10.0,
            0.0,
            Some(100.0),
            None,
            0.5,
            MeasurementPayload::Radar {
                rcs: 0.1,
                probability_uav: 0.9,
                probability_other: 0.05,
                type_hint: TrackType::Uav,
            },
        );
        assert!((0.0..360.0).contains(&m.azimuth_deg));
        assert!((m.azimuth_deg - 350.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped() {
        let m = Measurement::new(
            SensorSource::Radar,
            Instant::now(),
            0.0,
            0.0,
            None,
            None,
            1.5,
            MeasurementPayload::Radar {
                rcs: 0.0,
                probability_uav: 0.0,
                probability_other: 0.0,
                type_hint: TrackType::Unknown,
            },
        );
        assert_eq!(m.confidence, 1.0);
    }
}
