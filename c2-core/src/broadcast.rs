//! Gunner broadcast service (§4.7). Two cooperating UDP tasks sharing a
//! station registry: a 10 Hz transmitter that stays silent while idle, and a
//! receiver that decodes `GunnerStatus` reports and ages them out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use c2_types::{Effector, EngagementState, FusionEvent, GunnerStatus, Priority, Track, TrackUpdate, TracksSnapshot};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::config::GunnerConfig;

/// Everything the broadcast tasks need to read each tick, supplied by the
/// orchestration loop rather than owned here — the service only owns sockets
/// and the station registry.
pub struct SnapshotSource {
    pub engaged: watch::Receiver<EngagementState>,
    pub tracks: watch::Receiver<Vec<Track>>,
    pub radar_online: watch::Receiver<bool>,
    pub rf_online: watch::Receiver<bool>,
    pub ownship: watch::Receiver<Option<c2_types::OwnShip>>,
}

#[derive(Clone)]
pub struct StationRegistry {
    inner: Arc<Mutex<HashMap<String, GunnerStatus>>>,
}

impl StationRegistry {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn snapshot(&self) -> Vec<GunnerStatus> {
        self.inner.lock().await.values().cloned().collect()
    }
}

pub struct BroadcastHandle {
    pub registry: StationRegistry,
    pub disengage_rx: mpsc::UnboundedReceiver<()>,
}

pub fn spawn(
    config: GunnerConfig,
    broadcast_tick_hz: f64,
    source: SnapshotSource,
    events_tx: broadcast::Sender<FusionEvent>,
) -> BroadcastHandle {
    let registry = StationRegistry::new();
    let (disengage_tx, disengage_rx) = mpsc::unbounded_channel();

    tokio::spawn(transmit_task(config.clone(), broadcast_tick_hz, source, disengage_tx));
    tokio::spawn(receive_task(config, registry.clone(), events_tx));

    BroadcastHandle { registry, disengage_rx }
}

async fn transmit_task(config: GunnerConfig, tick_hz: f64, mut source: SnapshotSource, disengage_tx: mpsc::UnboundedSender<()>) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            warn!(target: "c2_core::broadcast", "failed to bind tx socket: {e}");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!(target: "c2_core::broadcast", "failed to enable broadcast: {e}");
        return;
    }
    let dest = format!("{}:{}", config.broadcast_addr, config.track_port);

    let period = Duration::from_secs_f64(1.0 / tick_hz);
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;

        let EngagementState::Engaged { track_id, .. } = *source.engaged.borrow() else {
            continue;
        };

        let Some(track) = source.tracks.borrow().iter().find(|t| t.id == track_id).cloned() else {
            let _ = disengage_tx.send(());
            continue;
        };

        let snapshot = build_snapshot(&track, &source);
        match serde_json::to_vec(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, &dest).await {
                    warn!(target: "c2_core::broadcast", "send failed: {e}");
                }
            }
            Err(e) => warn!(target: "c2_core::broadcast", "serialize failed: {e}"),
        }
    }
}

fn build_snapshot(track: &Track, source: &SnapshotSource) -> TracksSnapshot {
    let now = Instant::now();
    let timestamp_ns = system_time_ns();
    let speed_mps = track.velocity_mps.map(|v| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()).unwrap_or(0.0);
    let heading_deg = track
        .velocity_mps
        .map(|v| v[1].atan2(v[0]).to_degrees().rem_euclid(360.0))
        .unwrap_or(0.0);
    let range_m = track.range_m.unwrap_or(0.0);
    let (effector, reason) = Effector::recommend(range_m);

    let update = TrackUpdate {
        track_id: track.id,
        azimuth_deg: track.azimuth_deg,
        elevation_deg: track.elevation_deg,
        range_m,
        velocity_x_mps: track.velocity_mps.map(|v| v[0]).unwrap_or(0.0),
        velocity_y_mps: track.velocity_mps.map(|v| v[1]).unwrap_or(0.0),
        velocity_z_mps: track.velocity_mps.map(|v| v[2]).unwrap_or(0.0),
        speed_mps,
        heading_deg,
        track_type: format!("{:?}", track.track_type).to_uppercase(),
        confidence: track.confidence,
        source: format!("{:?}", track.source).to_uppercase(),
        track_age_sec: track.age_secs(now),
        num_updates: track.num_updates,
        priority: Priority::from_score(track.threat_score),
        recommended_effector: effector,
        recommendation_reason: reason.to_string(),
        aircraft_model: track.rf_intel.as_ref().and_then(|i| i.aircraft_model.clone()),
        pilot_latitude: track.rf_intel.as_ref().and_then(|i| i.pilot_lat),
        pilot_longitude: track.rf_intel.as_ref().and_then(|i| i.pilot_lon),
        timestamp_ns,
    };

    let ownship = *source.ownship.borrow();
    TracksSnapshot {
        tracks: vec![update],
        radar_online: *source.radar_online.borrow(),
        rf_online: *source.rf_online.borrow(),
        total_tracks: 1,
        ownship_lat: ownship.map(|o| o.latitude).unwrap_or(0.0),
        ownship_lon: ownship.map(|o| o.longitude).unwrap_or(0.0),
        ownship_heading: ownship.map(|o| o.true_heading_deg).unwrap_or(0.0),
        timestamp_ns,
    }
}

async fn receive_task(config: GunnerConfig, registry: StationRegistry, events_tx: broadcast::Sender<FusionEvent>) {
    let addr = format!("0.0.0.0:{}", config.status_port);
    let socket = match UdpSocket::bind(&addr).await {
        Ok(s) => s,
        Err(e) => {
            warn!(target: "c2_core::broadcast", "failed to bind rx socket {addr}: {e}");
            return;
        }
    };
    info!(target: "c2_core::broadcast", "gunner status receiver listening on {addr}");

    let mut buf = vec![0u8; 4096];
    let mut sweep = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            biased;

            _ = sweep.tick() => {
                sweep_stale(&registry, config.stale_secs, &events_tx).await;
            }

            recv = timeout(Duration::from_secs(1), socket.recv_from(&mut buf)) => {
                match recv {
                    Ok(Ok((len, src))) => {
                        process_status(&buf[..len], src, &registry, &events_tx).await;
                    }
                    Ok(Err(e)) => warn!(target: "c2_core::broadcast", "rx error: {e}"),
                    Err(_) => {} // 1 s idle timeout, loop back to the sweep check
                }
            }
        }
    }
}

async fn process_status(
    data: &[u8],
    src: std::net::SocketAddr,
    registry: &StationRegistry,
    events_tx: &broadcast::Sender<FusionEvent>,
) {
    let mut status: GunnerStatus = match serde_json::from_slice(data) {
        Ok(s) => s,
        Err(e) => {
            debug!(target: "c2_core::broadcast", "malformed status from {src}: {e}");
            return;
        }
    };
    status.last_seen = Some(Instant::now());

    let mut registry = registry.inner.lock().await;
    let is_new = !registry.contains_key(&status.station_id);
    let station_id = status.station_id.clone();
    registry.insert(station_id.clone(), status);
    drop(registry);

    if is_new {
        info!(target: "c2_core::broadcast", station_id, "gunner station registered");
        let _ = events_tx.send(FusionEvent::StationRegistered { station_id });
    }
}

async fn sweep_stale(registry: &StationRegistry, stale_secs: f64, events_tx: &broadcast::Sender<FusionEvent>) {
    let mut registry = registry.inner.lock().await;
    let stale: Vec<String> = registry
        .iter()
        .filter(|(_, s)| s.last_seen.map(|t| t.elapsed().as_secs_f64() > stale_secs).unwrap_or(false))
        .map(|(id, _)| id.clone())
        .collect();
    for id in &stale {
        registry.remove(id);
    }
    drop(registry);

    for station_id in stale {
        info!(target: "c2_core::broadcast", station_id, "gunner station pruned (stale)");
        let _ = events_tx.send(FusionEvent::StationPruned { station_id });
    }
}

fn system_time_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status(station_id: &str) -> GunnerStatus {
        GunnerStatus {
            station_id: station_id.to_string(),
            cued_track_id: -1,
            visual_lock: false,
            ready_to_fire: false,
            rws_azimuth_deg: 0.0,
            rws_elevation_deg: 0.0,
            selected_weapon: "CRx-40".to_string(),
            rounds_remaining: 100,
            weapon_armed: false,
            operator_id: "op-1".to_string(),
            timestamp_ns: 0,
            last_seen: None,
        }
    }

    #[tokio::test]
    async fn first_report_registers_station_and_emits_event() {
        let registry = StationRegistry::new();
        let (events_tx, mut events_rx) = broadcast::channel(16);
        let bytes = serde_json::to_vec(&sample_status("gun-1")).unwrap();
        let src: std::net::SocketAddr = "127.0.0.1:9000".parse().unwrap();

        process_status(&bytes, src, &registry, &events_tx).await;

        let stations = registry.snapshot().await;
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].station_id, "gun-1");
        assert!(matches!(events_rx.try_recv(), Ok(FusionEvent::StationRegistered { station_id }) if station_id == "gun-1"));
    }

    #[tokio::test]
    async fn stale_station_is_pruned_and_emits_event() {
        let registry = StationRegistry::new();
        let (events_tx, mut events_rx) = broadcast::channel(16);
        let bytes = serde_json::to_vec(&sample_status("gun-2")).unwrap();
        let src: std::net::SocketAddr = "127.0.0.1:9000".parse().unwrap();
        process_status(&bytes, src, &registry, &events_tx).await;
        let _ = events_rx.try_recv();

        // Backdate last_seen so the sweep treats it as stale without sleeping.
        {
            let mut inner = registry.inner.lock().await;
            let s = inner.get_mut("gun-2").unwrap();
            s.last_seen = Some(Instant::now() - Duration::from_secs(30));
        }

        sweep_stale(&registry, 10.0, &events_tx).await;

        assert!(registry.snapshot().await.is_empty());
        assert!(matches!(events_rx.try_recv(), Ok(FusionEvent::StationPruned { station_id }) if station_id == "gun-2"));
    }

    #[tokio::test]
    async fn malformed_payload_is_ignored() {
        let registry = StationRegistry::new();
        let (events_tx, _events_rx) = broadcast::channel(16);
        let src: std::net::SocketAddr = "127.0.0.1:9000".parse().unwrap();

        process_status(b"not json", src, &registry, &events_tx).await;

        assert!(registry.snapshot().await.is_empty());
    }
}
