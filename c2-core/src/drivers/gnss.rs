//! GNSS driver — serial NMEA 0183, with the proprietary `$PSAT,HPR`
//! dual-antenna heading/pitch/roll sentence layered on top. Publishes an
//! [`OwnShip`] snapshot on every position fix; the RF driver reads it to
//! rotate true-north-framed detections into the vehicle body frame.

use std::time::{Duration, Instant};

use c2_types::{FixQuality, OwnShip, SensorHealth};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};

use crate::config::GpsConfig;

#[derive(Clone)]
pub struct GnssHandle {
    ownship_rx: watch::Receiver<Option<OwnShip>>,
    health_rx: watch::Receiver<SensorHealth>,
}

impl GnssHandle {
    pub fn ownship(&self) -> Option<OwnShip> {
        *self.ownship_rx.borrow()
    }

    pub fn health(&self) -> SensorHealth {
        *self.health_rx.borrow()
    }

    /// A live view of the ownship snapshot, for components (the RF driver,
    /// orchestration) that need to react to every update rather than poll.
    pub fn subscribe(&self) -> watch::Receiver<Option<OwnShip>> {
        self.ownship_rx.clone()
    }
}

pub fn spawn(config: GpsConfig) -> GnssHandle {
    let (ownship_tx, ownship_rx) = watch::channel(None);
    let initial_health = if config.enabled {
        SensorHealth::Standby
    } else {
        SensorHealth::Offline
    };
    let (health_tx, health_rx) = watch::channel(initial_health);

    if config.enabled {
        tokio::spawn(run(config, ownship_tx, health_tx));
    }

    GnssHandle { ownship_rx, health_rx }
}

/// Accumulates fields across sentences until a position fix (GGA/RMC) is
/// available to publish. Heading precedence (§4.4): HPR > HDT > VTG course.
#[derive(Default)]
struct Accumulator {
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude_m: Option<f64>,
    fix_quality: FixQuality,
    speed_mps: Option<f64>,
    heading_hpr: Option<f64>,
    heading_hdt: Option<f64>,
    track_vtg: Option<f64>,
    heading_valid: bool,
}

impl Accumulator {
    fn heading_deg(&self) -> f64 {
        self.heading_hpr.or(self.heading_hdt).or(self.track_vtg).unwrap_or(0.0)
    }

    fn to_ownship(&self, now: Instant) -> Option<OwnShip> {
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        Some(OwnShip {
            latitude,
            longitude,
            altitude_m: self.altitude_m.unwrap_or(0.0),
            true_heading_deg: self.heading_deg(),
            ground_speed_mps: self.speed_mps.unwrap_or(0.0),
            fix_quality: self.fix_quality,
            heading_valid: self.heading_valid,
            timestamp: now,
        })
    }
}

async fn run(config: GpsConfig, ownship_tx: watch::Sender<Option<OwnShip>>, health_tx: watch::Sender<SensorHealth>) {
    let port_name = if cfg!(windows) { &config.port } else { &config.port_linux };

    let port = match tokio_serial::new(port_name, config.baudrate).open_native_async() {
        Ok(p) => p,
        Err(e) => {
            warn!(target: "gnss_driver", "failed to open {port_name}: {e}");
            let _ = health_tx.send(SensorHealth::Standby);
            return;
        }
    };
    info!(target: "gnss_driver", "opened {port_name} @ {} baud", config.baudrate);

    let mut reader = BufReader::new(port);
    let mut acc = Accumulator::default();
    let mut last_fix: Option<Instant> = None;
    let fix_timeout = Duration::from_secs_f64(config.fix_timeout_secs);

    loop {
        let mut line = String::new();
        match timeout(Duration::from_secs(1), reader.read_line(&mut line)).await {
            Ok(Ok(0)) => {
                warn!(target: "gnss_driver", "serial port closed");
                let _ = health_tx.send(SensorHealth::Standby);
                return;
            }
            Ok(Ok(_)) => {
                let sentence = line.trim();
                if sentence.starts_with('$') {
                    let got_fix = parse_sentence(sentence, &mut acc);
                    if got_fix {
                        let now = Instant::now();
                        if let Some(ownship) = acc.to_ownship(now) {
                            let _ = ownship_tx.send(Some(ownship));
                            let _ = health_tx.send(SensorHealth::Online);
                            last_fix = Some(now);
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(target: "gnss_driver", "serial read error: {e}");
                let _ = health_tx.send(SensorHealth::Standby);
                return;
            }
            Err(_) => {
                // 1 s read timeout with no sentence — fall through to the
                // fix-timeout check below.
            }
        }

        if let Some(t) = last_fix {
            if t.elapsed().as_secs_f64() > fix_timeout.as_secs_f64() {
                warn!(target: "gnss_driver", "GPS fix lost (timeout)");
                let _ = health_tx.send(SensorHealth::Standby);
                last_fix = None;
            }
        }
    }
}

/// Parses one NMEA (or `$PSAT`) sentence into `acc`. Returns true when the
/// sentence carries a position (GGA/RMC), signaling the caller to publish.
fn parse_sentence(sentence: &str, acc: &mut Accumulator) -> bool {
    if sentence.starts_with("$PSAT") {
        parse_psat_hpr(sentence, acc);
        return false;
    }

    let parts: Vec<&str> = sentence.split(',').collect();
    let Some(kind) = parts.first() else { return false };

    if kind.ends_with("GGA") {
        parse_gga(&parts, acc)
    } else if kind.ends_with("RMC") {
        parse_rmc(&parts, acc)
    } else if kind.ends_with("HDT") {
        parse_hdt(&parts, acc);
        false
    } else if kind.ends_with("VTG") {
        parse_vtg(&parts, acc);
        false
    } else {
        false
    }
}

/// DDMM.MMMM degrees-minutes field to signed decimal degrees.
fn parse_dm_coord(value: &str, whole_digits: usize, hemisphere: &str, negative_hemisphere: &str) -> Option<f64> {
    if value.is_empty() || value.len() <= whole_digits {
        return None;
    }
    let deg: f64 = value[..whole_digits].parse().ok()?;
    let min: f64 = value[whole_digits..].parse().ok()?;
    let mut decimal = deg + min / 60.0;
    if hemisphere == negative_hemisphere {
        decimal = -decimal;
    }
    Some(decimal)
}

fn parse_gga(parts: &[&str], acc: &mut Accumulator) -> bool {
    if parts.len() < 10 {
        return false;
    }
    if let Some(lat) = parse_dm_coord(parts[2], 2, parts.get(3).copied().unwrap_or(""), "S") {
        acc.latitude = Some(lat);
    }
    if let Some(lon) = parse_dm_coord(parts[4], 3, parts.get(5).copied().unwrap_or(""), "W") {
        acc.longitude = Some(lon);
    }
    if let Some(q) = parts.get(6).and_then(|s| s.parse::<u8>().ok()) {
        acc.fix_quality = FixQuality::from_gga_code(q);
    }
    if let Some(alt) = parts.get(9).and_then(|s| s.parse::<f64>().ok()) {
        acc.altitude_m = Some(alt);
    }
    acc.latitude.is_some() && acc.longitude.is_some()
}

fn parse_rmc(parts: &[&str], acc: &mut Accumulator) -> bool {
    if parts.len() < 9 {
        return false;
    }
    if acc.latitude.is_none() {
        if let Some(lat) = parse_dm_coord(parts[3], 2, parts.get(4).copied().unwrap_or(""), "S") {
            acc.latitude = Some(lat);
        }
    }
    if acc.longitude.is_none() {
        if let Some(lon) = parse_dm_coord(parts[5], 3, parts.get(6).copied().unwrap_or(""), "W") {
            acc.longitude = Some(lon);
        }
    }
    if let Some(knots) = parts.get(7).and_then(|s| s.parse::<f64>().ok()) {
        acc.speed_mps = Some(knots * 0.514444);
    }
    acc.latitude.is_some() && acc.longitude.is_some()
}

fn parse_hdt(parts: &[&str], acc: &mut Accumulator) {
    if let Some(h) = parts.get(1).and_then(|s| s.parse::<f64>().ok()) {
        acc.heading_hdt = Some(h);
        acc.heading_valid = true;
    }
}

fn parse_vtg(parts: &[&str], acc: &mut Accumulator) {
    if parts.len() < 8 {
        return;
    }
    if let Some(track) = parts.get(1).and_then(|s| s.parse::<f64>().ok()) {
        acc.track_vtg = Some(track);
    }
    if let Some(kmh) = parts.get(7).and_then(|s| s.parse::<f64>().ok()) {
        acc.speed_mps = Some(kmh / 3.6);
    }
}

/// `$PSAT,HPR,<t>,<heading>,<pitch>,<roll>,<baseline>,<mode>*<cksum>` — the
/// checksum (if present) rides on the last field; we don't verify it.
fn parse_psat_hpr(sentence: &str, acc: &mut Accumulator) {
    let parts: Vec<&str> = sentence.split(',').collect();
    if parts.len() < 6 || parts.get(1) != Some(&"HPR") {
        return;
    }
    if let Some(heading) = parts.get(3).and_then(|s| s.parse::<f64>().ok()) {
        acc.heading_hpr = Some(heading);
        acc.heading_valid = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gga_position_and_fix_quality() {
        let mut acc = Accumulator::default();
        let got_fix = parse_sentence(
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47",
            &mut acc,
        );
        assert!(got_fix);
        assert!((acc.latitude.unwrap() - 48.1173).abs() < 1e-3);
        assert!((acc.longitude.unwrap() - 11.5167).abs() < 1e-3);
        assert_eq!(acc.fix_quality, FixQuality::Standalone);
    }

    #[test]
    fn southern_and_western_hemispheres_negate() {
        let mut acc = Accumulator::default();
        parse_sentence("$GPGGA,123519,2550.466,S,02810.820,E,1,08,0.9,1339.0,M,0,M,,*00", &mut acc);
        assert!(acc.latitude.unwrap() < 0.0);
    }

    #[test]
    fn heading_precedence_is_hpr_then_hdt_then_vtg() {
        let mut acc = Accumulator::default();
        parse_sentence("$GPVTG,045.0,T,,M,005.5,N,010.2,K,A*3F", &mut acc);
        assert_eq!(acc.heading_deg(), 45.0);

        parse_sentence("$GPHDT,090.0,T*1C", &mut acc);
        assert_eq!(acc.heading_deg(), 90.0);

        parse_sentence("$PSAT,HPR,123456.00,135.0,1.2,-0.5,1.20,2*1A", &mut acc);
        assert_eq!(acc.heading_deg(), 135.0);
    }

    #[test]
    fn hdt_sets_heading_valid() {
        let mut acc = Accumulator::default();
        assert!(!acc.heading_valid);
        parse_sentence("$GPHDT,090.0,T*1C", &mut acc);
        assert!(acc.heading_valid);
    }

    #[test]
    fn rmc_speed_converts_knots_to_mps() {
        let mut acc = Accumulator::default();
        parse_sentence(
            "$GPRMC,123519,A,4807.038,N,01131.000,E,10.0,084.4,230394,003.1,W*6A",
            &mut acc,
        );
        assert!((acc.speed_mps.unwrap() - 10.0 * 0.514444).abs() < 1e-9);
    }
}
