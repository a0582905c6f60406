//! RF driver — TLS 1.2 client with mutual-certificate authentication to the
//! RF sensor. Sends a single enable command on connect, then reads
//! newline-delimited JSON detection objects. Precision detections carry an
//! absolute aircraft position and are rotated into the vehicle body frame
//! using the latest ownship fix; sector detections carry only a coarse
//! bearing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use c2_types::{C2Error, C2Result, Measurement, MeasurementPayload, OwnShip, SensorHealth, SensorSource};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{info, warn};

use crate::config::RfConfig;

#[derive(Clone)]
pub struct RfHandle {
    health_rx: watch::Receiver<SensorHealth>,
}

impl RfHandle {
    pub fn health(&self) -> SensorHealth {
        *self.health_rx.borrow()
    }

    pub fn health_watch(&self) -> watch::Receiver<SensorHealth> {
        self.health_rx.clone()
    }
}

pub fn spawn(
    config: RfConfig,
    ownship_rx: watch::Receiver<Option<OwnShip>>,
    measurement_tx: mpsc::Sender<Measurement>,
) -> RfHandle {
    let initial = if config.enabled { SensorHealth::Standby } else { SensorHealth::Offline };
    let (health_tx, health_rx) = watch::channel(initial);

    if config.enabled {
        tokio::spawn(run(config, ownship_rx, measurement_tx, health_tx));
    }

    RfHandle { health_rx }
}

async fn run(
    config: RfConfig,
    ownship_rx: watch::Receiver<Option<OwnShip>>,
    measurement_tx: mpsc::Sender<Measurement>,
    health_tx: watch::Sender<SensorHealth>,
) {
    let tls_config = match load_client_config(&config).await {
        Ok(c) => c,
        Err(e) => {
            warn!(target: "rf_driver", "fatal config error: {e}");
            let _ = health_tx.send(SensorHealth::Offline);
            return;
        }
    };

    let mut backoff = Duration::from_secs(1);

    loop {
        match connect_and_stream(&config, &tls_config, &ownship_rx, &measurement_tx, &health_tx).await {
            Ok(()) => unreachable!("connect_and_stream only returns on error"),
            Err(e) => {
                warn!(target: "rf_driver", "{e}");
                let _ = health_tx.send(SensorHealth::Standby);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(30));
    }
}

async fn load_client_config(config: &RfConfig) -> C2Result<Arc<ClientConfig>> {
    let ca_bytes = tokio::fs::read(&config.ca_path)
        .await
        .map_err(|e| C2Error::ConfigError(format!("reading CA chain {}: {e}", config.ca_path)))?;
    let mut root_store = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut ca_bytes.as_slice()) {
        let cert = cert.map_err(|e| C2Error::ConfigError(format!("parsing CA chain: {e}")))?;
        root_store
            .add(cert)
            .map_err(|e| C2Error::ConfigError(format!("adding CA cert: {e}")))?;
    }

    let cert_bytes = tokio::fs::read(&config.cert_path)
        .await
        .map_err(|e| C2Error::ConfigError(format!("reading client cert {}: {e}", config.cert_path)))?;
    let client_certs = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| C2Error::ConfigError(format!("parsing client cert: {e}")))?;

    let key_bytes = tokio::fs::read(&config.key_path)
        .await
        .map_err(|e| C2Error::ConfigError(format!("reading client key {}: {e}", config.key_path)))?;
    let key = rustls_pemfile::private_key(&mut key_bytes.as_slice())
        .map_err(|e| C2Error::ConfigError(format!("parsing client key: {e}")))?
        .ok_or_else(|| C2Error::ConfigError(format!("no private key found in {}", config.key_path)))?;

    let builder = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        .with_root_certificates(root_store);
    let tls_config = builder
        .with_client_auth_cert(client_certs, key)
        .map_err(|e| C2Error::TlsError(e.to_string()))?;

    Ok(Arc::new(tls_config))
}

/// Connects, enables detections, and streams until the connection fails.
/// Only returns `Err` — a clean return would mean the peer closed the
/// socket, which is still a failure from the caller's reconnect-loop view.
async fn connect_and_stream(
    config: &RfConfig,
    tls_config: &Arc<ClientConfig>,
    ownship_rx: &watch::Receiver<Option<OwnShip>>,
    measurement_tx: &mpsc::Sender<Measurement>,
    health_tx: &watch::Sender<SensorHealth>,
) -> C2Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!(target: "rf_driver", "connecting to {addr}");
    let tcp = timeout(Duration::from_millis(config.io_timeout_ms), TcpStream::connect(&addr))
        .await
        .map_err(|_| C2Error::ConnectError(format!("timed out connecting to {addr}")))?
        .map_err(|e| C2Error::ConnectError(e.to_string()))?;

    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| C2Error::TlsError(format!("invalid server name {}: {e}", config.host)))?;
    let connector = TlsConnector::from(tls_config.clone());
    let mut tls_stream: TlsStream<TcpStream> = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| C2Error::TlsError(e.to_string()))?;
    info!(target: "rf_driver", "TLS connection established to {addr}");

    tls_stream
        .write_all(b"{\"detectionStatusEnabled\": true}\n")
        .await
        .map_err(|e| C2Error::ConnectionLost(e.to_string()))?;

    let mut reader = BufReader::new(tls_stream);
    loop {
        let mut line = String::new();
        let n = timeout(Duration::from_millis(config.io_timeout_ms.max(1000)), reader.read_line(&mut line))
            .await
            .map_err(|_| C2Error::Timeout)?
            .map_err(|e| C2Error::ConnectionLost(e.to_string()))?;
        if n == 0 {
            return Err(C2Error::ConnectionLost("RF sensor closed connection".into()));
        }
        let _ = health_tx.send(SensorHealth::Online);

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(trimmed) {
            Ok(e) => e,
            Err(e) => {
                warn!(target: "rf_driver", "malformed detection JSON: {e}");
                continue;
            }
        };
        let Some(publication) = envelope.detection_publication else { continue };
        let ownship = *ownship_rx.borrow();

        for det in &publication.omni_detections {
            if let Some(m) = process_detection(det, false, ownship) {
                let _ = measurement_tx.try_send(m);
            }
        }
        for det in &publication.sector_detections {
            if let Some(m) = process_detection(det, true, ownship) {
                let _ = measurement_tx.try_send(m);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "DetectionPublication")]
    detection_publication: Option<DetectionPublication>,
}

#[derive(Debug, Default, Deserialize)]
struct DetectionPublication {
    #[serde(rename = "omniDetections", default)]
    omni_detections: Vec<Detection>,
    #[serde(rename = "sectorDetections", default)]
    sector_detections: Vec<Detection>,
}

#[derive(Debug, Deserialize)]
struct Detection {
    #[serde(rename = "detectionId", default)]
    detection_id: String,
    #[serde(default = "default_sector")]
    sector: u32,
    #[serde(default)]
    power: f64,
    #[serde(default)]
    frequency: f64,
    #[serde(rename = "aircraftLatitude", default)]
    aircraft_latitude: Option<f64>,
    #[serde(rename = "aircraftLongitude", default)]
    aircraft_longitude: Option<f64>,
    #[serde(rename = "aircraftAltitude", default)]
    aircraft_altitude: Option<f64>,
    #[serde(rename = "pilotLatitude", default)]
    pilot_latitude: Option<f64>,
    #[serde(rename = "pilotLongitude", default)]
    pilot_longitude: Option<f64>,
    #[serde(rename = "aircraftModel", default)]
    aircraft_model: Option<String>,
    #[serde(default)]
    serial: Option<String>,
}

fn default_sector() -> u32 {
    1
}

/// True-north bearing and horizontal (great-circle) range from ownship to
/// a target lat/lon, via the haversine formula.
fn bearing_and_range(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64) {
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let dlon = lon2 - lon1;

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let bearing = (y.atan2(x).to_degrees() + 360.0) % 360.0;

    let dlat = lat2 - lat1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let horizontal_range = EARTH_RADIUS_M * c;

    (bearing, horizontal_range)
}

/// The DIVR MkII's 45°-wide sectors are offset 22.5° from true north, so
/// sector 1 (1-based) centers on bearing 22.5°.
fn sector_center_bearing(sector: u32) -> f64 {
    (sector as f64 - 1.0) * 45.0 + 22.5
}

fn power_confidence(power: f64) -> f64 {
    if power > 0.0 {
        (power / 100.0).min(1.0)
    } else {
        0.5
    }
}

fn process_detection(det: &Detection, is_sector: bool, ownship: Option<OwnShip>) -> Option<Measurement> {
    let has_precision = matches!(det.aircraft_latitude, Some(v) if v != 0.0)
        || matches!(det.aircraft_longitude, Some(v) if v != 0.0);

    if has_precision {
        let ownship = ownship?;
        let target_lat = det.aircraft_latitude.unwrap_or(0.0);
        let target_lon = det.aircraft_longitude.unwrap_or(0.0);
        let target_alt = det.aircraft_altitude.unwrap_or(0.0);

        let (bearing_true, horizontal_range) =
            bearing_and_range(ownship.latitude, ownship.longitude, target_lat, target_lon);
        let azimuth = (bearing_true - ownship.true_heading_deg).rem_euclid(360.0);
        let elevation = target_alt.atan2(horizontal_range).to_degrees();
        let range_m = (horizontal_range.powi(2) + target_alt.powi(2)).sqrt();
        let confidence = (0.9 + power_confidence(det.power)) / 2.0;

        Some(Measurement::new(
            SensorSource::RfPrecision,
            Instant::now(),
            azimuth,
            elevation,
            Some(range_m),
            None,
            confidence,
            MeasurementPayload::RfPrecision {
                detection_id: det.detection_id.clone(),
                aircraft_model: det.aircraft_model.clone(),
                serial: det.serial.clone(),
                pilot_lat: det.pilot_latitude,
                pilot_lon: det.pilot_longitude,
                frequency_hz: det.frequency,
                power_dbm: det.power,
            },
        ))
    } else if is_sector {
        let heading = ownship.map(|o| o.true_heading_deg).unwrap_or(0.0);
        let azimuth = (sector_center_bearing(det.sector) - heading).rem_euclid(360.0);
        let confidence = (0.7 + power_confidence(det.power)) / 2.0;

        Some(Measurement::new(
            SensorSource::RfSector,
            Instant::now(),
            azimuth,
            0.0,
            None,
            None,
            confidence,
            MeasurementPayload::RfSector {
                detection_id: det.detection_id.clone(),
                sector_index: det.sector,
                frequency_hz: det.frequency,
                power_dbm: det.power,
            },
        ))
    } else {
        // Omni fact-of-only detection with no location information at all.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ownship() -> OwnShip {
        OwnShip {
            latitude: -25.841105,
            longitude: 28.180340,
            altitude_m: 1339.0,
            true_heading_deg: 0.0,
            ground_speed_mps: 0.0,
            fix_quality: c2_types::FixQuality::RtkFixed,
            heading_valid: true,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn sector_one_centers_on_22_5_degrees() {
        assert!((sector_center_bearing(1) - 22.5).abs() < 1e-9);
        assert!((sector_center_bearing(2) - 67.5).abs() < 1e-9);
    }

    #[test]
    fn precision_detection_requires_ownship() {
        let det = Detection {
            detection_id: "abc".into(),
            sector: 1,
            power: 50.0,
            frequency: 915_000_000.0,
            aircraft_latitude: Some(-25.85),
            aircraft_longitude: Some(28.19),
            aircraft_altitude: Some(100.0),
            pilot_latitude: None,
            pilot_longitude: None,
            aircraft_model: None,
            serial: None,
        };
        assert!(process_detection(&det, false, None).is_none());
        assert!(process_detection(&det, false, Some(sample_ownship())).is_some());
    }

    #[test]
    fn sector_detection_has_no_range() {
        let det = Detection {
            detection_id: "sec-1".into(),
            sector: 3,
            power: 10.0,
            frequency: 2_400_000_000.0,
            aircraft_latitude: None,
            aircraft_longitude: None,
            aircraft_altitude: None,
            pilot_latitude: None,
            pilot_longitude: None,
            aircraft_model: None,
            serial: None,
        };
        let m = process_detection(&det, true, Some(sample_ownship())).unwrap();
        assert_eq!(m.range_m, None);
    }

    #[test]
    fn omni_only_detection_without_precision_is_dropped() {
        let det = Detection {
            detection_id: "omni-1".into(),
            sector: 1,
            power: 10.0,
            frequency: 2_400_000_000.0,
            aircraft_latitude: None,
            aircraft_longitude: None,
            aircraft_altitude: None,
            pilot_latitude: None,
            pilot_longitude: None,
            aircraft_model: None,
            serial: None,
        };
        assert!(process_detection(&det, false, Some(sample_ownship())).is_none());
    }

    #[test]
    fn power_confidence_clamps_at_one() {
        assert_eq!(power_confidence(500.0), 1.0);
        assert_eq!(power_confidence(0.0), 0.5);
        assert_eq!(power_confidence(-10.0), 0.5);
    }
}
