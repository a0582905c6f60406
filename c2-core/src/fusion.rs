//! Fusion engine (§4.5): association, tail maintenance, range-rate
//! smoothing, aging, and threat scoring — one tick at a time. Owns the
//! track table exclusively; every reader gets an immutable snapshot.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use c2_types::{FusionEvent, Measurement, MeasurementPayload, RfIntel, SensorSource, TailSample, Track, TrackSource, TrackType};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::ThresholdsConfig;
use crate::threat;

/// Keeps RF-derived track ids (hashed from the sensor's `detectionId`) out
/// of the radar sequential counter's range.
const RF_ID_BASE: u64 = 1_000_000_000;

pub struct FusionEngine {
    tracks: HashMap<u64, Track>,
    next_radar_id: u64,
    thresholds: ThresholdsConfig,
    events_tx: broadcast::Sender<FusionEvent>,
}

impl FusionEngine {
    pub fn new(thresholds: ThresholdsConfig, events_tx: broadcast::Sender<FusionEvent>) -> Self {
        Self {
            tracks: HashMap::new(),
            next_radar_id: 1,
            thresholds,
            events_tx,
        }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn track(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Run one fusion tick against a batch of measurements drained from the
    /// drivers' queues this period.
    pub fn tick(&mut self, measurements: Vec<Measurement>, now: Instant) {
        for m in measurements {
            self.associate_or_create(m, now);
        }
        self.age_out(now);
        self.score_all(now);
    }

    fn associate_or_create(&mut self, m: Measurement, now: Instant) {
        match self.find_association(&m) {
            Some(id) => self.update_track(id, m, now),
            None => self.create_track(m, now),
        }
    }

    fn find_association(&self, m: &Measurement) -> Option<u64> {
        let mut best: Option<(u64, f64)> = None;
        for (id, track) in &self.tracks {
            if !sensor_compatible_with_track(m.sensor_source, track.source) {
                continue;
            }
            let daz = angular_delta(m.azimuth_deg, track.azimuth_deg);
            if daz > self.thresholds.assoc_delta_az_deg {
                continue;
            }
            if let (Some(mr), Some(tr)) = (m.range_m, track.range_m) {
                if (mr - tr).abs() > self.thresholds.assoc_delta_range_m {
                    continue;
                }
            }
            if best.map(|(_, best_daz)| daz < best_daz).unwrap_or(true) {
                best = Some((*id, daz));
            }
        }
        best.map(|(id, _)| id)
    }

    fn create_track(&mut self, m: Measurement, now: Instant) {
        let id = self.allocate_id(&m);
        let track_type = payload_type_hint(&m.payload);
        let mut track = Track::new(
            id,
            now,
            m.azimuth_deg,
            m.elevation_deg,
            m.range_m,
            m.velocity_mps,
            track_source_for(m.sensor_source),
            track_type,
            m.confidence,
        );
        apply_payload(&mut track, &m.payload);
        push_tail_sample(&mut track, now);
        self.tracks.insert(id, track);
        let _ = self.events_tx.send(FusionEvent::TrackCreated { track_id: id });
        debug!(target: "c2_core::fusion", track_id = id, "new track");
    }

    fn update_track(&mut self, id: u64, m: Measurement, now: Instant) {
        let Some(track) = self.tracks.get_mut(&id) else { return };

        let fusing = track.source != TrackSource::Fused
            && matches!(m.sensor_source, SensorSource::Radar | SensorSource::RfPrecision)
            && matches!(track.source, TrackSource::Radar | TrackSource::Rf)
            && track.source != track_source_for(m.sensor_source);

        if fusing {
            track.confidence = (0.5 * (track.confidence + m.confidence) + 0.1).max(0.95);
            track.source = TrackSource::Fused;
        } else {
            track.confidence = m.confidence;
        }

        track.azimuth_deg = m.azimuth_deg.rem_euclid(360.0);
        track.elevation_deg = m.elevation_deg;
        if m.range_m.is_some() {
            track.range_m = m.range_m;
        }
        if m.velocity_mps.is_some() {
            track.velocity_mps = m.velocity_mps;
        }
        apply_payload(track, &m.payload);
        update_range_rate(track, now, self.thresholds.track_stale_secs);
        push_tail_sample(track, now);
        prune_tail(track, self.thresholds.tail_seconds, self.thresholds.tail_capacity);

        track.last_update = now;
        track.num_updates += 1;
        track.check_invariants();
    }

    fn age_out(&mut self, now: Instant) {
        let stale: Vec<u64> = self
            .tracks
            .iter()
            .filter(|(_, t)| t.is_stale(now, self.thresholds.track_stale_secs))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.tracks.remove(&id);
            let _ = self.events_tx.send(FusionEvent::TrackLost { track_id: id });
            debug!(target: "c2_core::fusion", track_id = id, "track aged out");
        }
    }

    fn score_all(&mut self, now: Instant) {
        for id in self.tracks.keys().copied().collect::<Vec<_>>() {
            let track = &self.tracks[&id];
            track.check_invariants();
            let new_score = threat::score(track, now);
            let track = self.tracks.get_mut(&id).unwrap();
            track.prev_threat_score = track.threat_score;
            track.threat_score = new_score;
        }
    }

    #[cfg(test)]
    pub(crate) fn track_mut_for_test(&mut self, id: u64) -> &mut Track {
        self.tracks.get_mut(&id).expect("track must exist")
    }

    fn allocate_id(&mut self, m: &Measurement) -> u64 {
        match &m.payload {
            MeasurementPayload::RfPrecision { detection_id, .. } | MeasurementPayload::RfSector { detection_id, .. } => {
                rf_track_id(detection_id)
            }
            MeasurementPayload::Radar { .. } => {
                let id = self.next_radar_id;
                self.next_radar_id += 1;
                id
            }
        }
    }
}

fn sensor_compatible_with_track(sensor: SensorSource, track_source: TrackSource) -> bool {
    match sensor {
        SensorSource::Radar => matches!(track_source, TrackSource::Radar | TrackSource::Fused),
        SensorSource::RfPrecision => matches!(track_source, TrackSource::Rf | TrackSource::Fused | TrackSource::Radar),
        SensorSource::RfSector => matches!(track_source, TrackSource::Rf),
    }
}

fn track_source_for(sensor: SensorSource) -> TrackSource {
    match sensor {
        SensorSource::Radar => TrackSource::Radar,
        SensorSource::RfPrecision | SensorSource::RfSector => TrackSource::Rf,
    }
}

fn payload_type_hint(payload: &MeasurementPayload) -> TrackType {
    match payload {
        MeasurementPayload::Radar { type_hint, .. } => *type_hint,
        MeasurementPayload::RfPrecision { .. } | MeasurementPayload::RfSector { .. } => TrackType::Unknown,
    }
}

fn apply_payload(track: &mut Track, payload: &MeasurementPayload) {
    match payload {
        MeasurementPayload::Radar { .. } => {}
        MeasurementPayload::RfPrecision {
            aircraft_model,
            serial,
            pilot_lat,
            pilot_lon,
            frequency_hz,
            power_dbm,
            ..
        } => {
            track.rf_intel = Some(RfIntel {
                aircraft_model: aircraft_model.clone(),
                serial: serial.clone(),
                pilot_lat: *pilot_lat,
                pilot_lon: *pilot_lon,
                frequency_hz: Some(*frequency_hz),
                power_dbm: Some(*power_dbm),
            });
        }
        MeasurementPayload::RfSector { frequency_hz, power_dbm, .. } => {
            if track.rf_intel.is_none() {
                track.rf_intel = Some(RfIntel {
                    frequency_hz: Some(*frequency_hz),
                    power_dbm: Some(*power_dbm),
                    ..RfIntel::default()
                });
            }
        }
    }
}

fn update_range_rate(track: &mut Track, now: Instant, _track_stale_secs: f64) {
    const ALPHA: f64 = 0.5;
    const MIN_DT: Duration = Duration::from_millis(50);

    let (Some(range), Some(prev_range), Some(prev_ts)) = (track.range_m, track.prev_range_m, track.prev_timestamp) else {
        track.prev_range_m = track.range_m;
        track.prev_timestamp = Some(now);
        return;
    };

    let dt = now.saturating_duration_since(prev_ts);
    if dt >= MIN_DT {
        let raw_rate = (range - prev_range) / dt.as_secs_f64();
        track.range_rate_mps = ALPHA * raw_rate + (1.0 - ALPHA) * track.range_rate_mps;
        track.prev_range_m = Some(range);
        track.prev_timestamp = Some(now);
    }
}

fn push_tail_sample(track: &mut Track, now: Instant) {
    track.tail.push_back(TailSample {
        azimuth_deg: track.azimuth_deg,
        elevation_deg: track.elevation_deg,
        range_m: track.range_m,
        timestamp: now,
    });
}

fn prune_tail(track: &mut Track, tail_seconds: f64, tail_capacity: usize) {
    while let Some(front) = track.tail.front() {
        if now_age(front.timestamp) > tail_seconds {
            track.tail.pop_front();
        } else {
            break;
        }
    }
    while track.tail.len() > tail_capacity {
        track.tail.pop_front();
    }
}

fn now_age(ts: Instant) -> f64 {
    ts.elapsed().as_secs_f64()
}

fn angular_delta(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

fn rf_track_id(detection_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    detection_id.hash(&mut hasher);
    RF_ID_BASE + (hasher.finish() % RF_ID_BASE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radar_measurement(az: f64, range: f64, confidence: f64) -> Measurement {
        Measurement::new(
            SensorSource::Radar,
            Instant::now(),
            az,
            0.0,
            Some(range),
            Some([0.0, 0.0, 0.0]),
            confidence,
            MeasurementPayload::Radar {
                rcs: 0.1,
                probability_uav: 0.9,
                probability_other: 0.05,
                type_hint: TrackType::Uav,
            },
        )
    }

    fn rf_precision_measurement(az: f64, detection_id: &str, confidence: f64) -> Measurement {
        Measurement::new(
            SensorSource::RfPrecision,
            Instant::now(),
            az,
            0.0,
            Some(100.0),
            None,
            confidence,
            MeasurementPayload::RfPrecision {
                detection_id: detection_id.to_string(),
                aircraft_model: Some("DJI Mavic".to_string()),
                serial: None,
                pilot_lat: Some(1.0),
                pilot_lon: Some(2.0),
                frequency_hz: 2.4e9,
                power_dbm: -40.0,
            },
        )
    }

    fn engine() -> (FusionEngine, broadcast::Receiver<FusionEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (FusionEngine::new(ThresholdsConfig::default(), tx), rx)
    }

    #[test]
    fn first_measurement_creates_a_track() {
        let (mut e, mut rx) = engine();
        e.tick(vec![radar_measurement(10.0, 500.0, 0.8)], Instant::now());
        assert_eq!(e.len(), 1);
        assert!(matches!(rx.try_recv(), Ok(FusionEvent::TrackCreated { .. })));
    }

    #[test]
    fn second_nearby_measurement_updates_instead_of_duplicating() {
        let (mut e, _rx) = engine();
        let now = Instant::now();
        e.tick(vec![radar_measurement(10.0, 500.0, 0.8)], now);
        e.tick(vec![radar_measurement(11.0, 505.0, 0.85)], now);
        assert_eq!(e.len(), 1);
        let track = e.tracks().next().unwrap();
        assert_eq!(track.num_updates, 2);
    }

    #[test]
    fn distant_measurement_creates_a_second_track() {
        let (mut e, _rx) = engine();
        let now = Instant::now();
        e.tick(vec![radar_measurement(10.0, 500.0, 0.8)], now);
        e.tick(vec![radar_measurement(200.0, 2000.0, 0.8)], now);
        assert_eq!(e.len(), 2);
    }

    #[test]
    fn radar_and_rf_precision_fuse_into_a_single_track() {
        let (mut e, _rx) = engine();
        let now = Instant::now();
        e.tick(vec![radar_measurement(10.0, 100.0, 0.8)], now);
        e.tick(vec![rf_precision_measurement(12.0, "det-1", 0.7)], now);
        assert_eq!(e.len(), 1);
        let track = e.tracks().next().unwrap();
        assert_eq!(track.source, TrackSource::Fused);
        assert!(track.confidence >= 0.95);
        assert!(track.rf_intel.is_some());
    }

    #[test]
    fn stale_tracks_are_dropped_and_lost_event_fires() {
        let (mut e, mut rx) = engine();
        let t0 = Instant::now();
        e.tick(vec![radar_measurement(10.0, 500.0, 0.8)], t0);
        let _ = rx.try_recv();
        let future = t0 + Duration::from_secs(10);
        e.tick(vec![], future);
        assert_eq!(e.len(), 0);
        assert!(matches!(rx.try_recv(), Ok(FusionEvent::TrackLost { .. })));
    }

    #[test]
    fn rf_detection_id_maps_to_a_stable_track_id() {
        assert_eq!(rf_track_id("abc"), rf_track_id("abc"));
        assert!(rf_track_id("abc") >= RF_ID_BASE);
    }
}
