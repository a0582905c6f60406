//! Radar driver — single TCP connection to the radar at a configured host
//! and command port. A line-oriented ASCII command protocol configures and
//! starts/stops streaming; while streaming, the same connection carries a
//! framed binary track wire. Owns the socket exclusively inside its task
//! (§5: "each driver runs its own long-lived I/O task") — every other
//! component talks to it through [`RadarHandle`].

use std::time::Duration;

use bytemuck::from_bytes;
use c2_types::radar_wire::{RadarHeader, RadarTrackRecord, RADAR_HEADER_SIZE};
use c2_types::{C2Error, C2Result, Measurement, MeasurementPayload, SensorHealth, SensorSource, TrackType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::RadarConfig;
use crate::persistence::RadarPersistedConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Disconnected,
    Idle,
    Streaming,
}

enum RadarCommand {
    Connect,
    Configure(RadarPersistedConfig),
    Start,
    Stop,
    Disconnect,
}

/// Handle held by orchestration; the driver task is the only thing that
/// ever touches the socket.
#[derive(Clone)]
pub struct RadarHandle {
    cmd_tx: mpsc::Sender<(RadarCommand, oneshot::Sender<C2Result<()>>)>,
    health_rx: watch::Receiver<SensorHealth>,
}

impl RadarHandle {
    pub fn health(&self) -> SensorHealth {
        *self.health_rx.borrow()
    }

    async fn call(&self, cmd: RadarCommand) -> C2Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send((cmd, tx))
            .await
            .map_err(|_| C2Error::StateError("radar driver task has stopped".into()))?;
        rx.await
            .map_err(|_| C2Error::StateError("radar driver task dropped the reply".into()))?
    }

    pub async fn connect(&self) -> C2Result<()> {
        self.call(RadarCommand::Connect).await
    }

    pub async fn configure(&self, cfg: RadarPersistedConfig) -> C2Result<()> {
        self.call(RadarCommand::Configure(cfg)).await
    }

    pub async fn start(&self) -> C2Result<()> {
        self.call(RadarCommand::Start).await
    }

    pub async fn stop(&self) -> C2Result<()> {
        self.call(RadarCommand::Stop).await
    }

    pub async fn disconnect(&self) -> C2Result<()> {
        self.call(RadarCommand::Disconnect).await
    }
}

/// Spawn the radar driver task and return a handle to it. Measurements are
/// pushed into `measurement_tx`; the driver never blocks on a full queue —
/// it drops the oldest-equivalent by using `try_send` semantics upstream
/// (the channel itself is the bounded queue described in §5).
pub fn spawn(config: RadarConfig, measurement_tx: mpsc::Sender<Measurement>) -> RadarHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (health_tx, health_rx) = watch::channel(SensorHealth::Offline);

    tokio::spawn(run(config, cmd_rx, health_tx, measurement_tx));

    RadarHandle { cmd_tx, health_rx }
}

struct TaskState {
    config: RadarConfig,
    stream: Option<TcpStream>,
    conn_state: ConnState,
    auto_reconnect: bool,
    resync_used: usize,
    read_buf: Vec<u8>,
}

async fn run(
    config: RadarConfig,
    mut cmd_rx: mpsc::Receiver<(RadarCommand, oneshot::Sender<C2Result<()>>)>,
    health_tx: watch::Sender<SensorHealth>,
    measurement_tx: mpsc::Sender<Measurement>,
) {
    let mut state = TaskState {
        config,
        stream: None,
        conn_state: ConnState::Disconnected,
        auto_reconnect: false,
        resync_used: 0,
        read_buf: Vec::with_capacity(4096),
    };

    let mut read_buf = [0u8; 4096];
    let mut reconnect_backoff = Duration::from_secs(1);

    loop {
        let streaming = state.conn_state == ConnState::Streaming && state.stream.is_some();

        tokio::select! {
            biased;

            maybe_cmd = cmd_rx.recv() => {
                match maybe_cmd {
                    None => break,
                    Some((cmd, reply)) => {
                        let result = handle_command(&mut state, cmd, &health_tx).await;
                        let _ = reply.send(result);
                    }
                }
            }

            read_result = read_chunk(&mut state, &mut read_buf), if streaming => {
                match read_result {
                    Ok(n) if n == 0 => {
                        warn!(target: "radar_driver", "connection closed by radar");
                        handle_connection_loss(&mut state, &health_tx, &mut reconnect_backoff).await;
                    }
                    Ok(n) => {
                        reconnect_backoff = Duration::from_secs(1);
                        state.read_buf.extend_from_slice(&read_buf[..n]);
                        match drain_packets(&mut state) {
                            Ok(measurements) => {
                                for m in measurements {
                                    if measurement_tx.try_send(m).is_err() {
                                        debug!(target: "radar_driver", "measurement queue full, dropping oldest-equivalent sample");
                                    }
                                }
                            }
                            Err(e) => warn!(target: "radar_driver", "{e}"),
                        }
                    }
                    Err(C2Error::Timeout) => {
                        // No data within the read timeout — not an error, just idle radar.
                    }
                    Err(C2Error::ConnectionLost(msg)) => {
                        warn!(target: "radar_driver", "connection lost: {msg}");
                        handle_connection_loss(&mut state, &health_tx, &mut reconnect_backoff).await;
                    }
                    Err(e) => warn!(target: "radar_driver", "unexpected read error: {e}"),
                }
            }
        }
    }

    teardown(&mut state, &health_tx);
}

async fn read_chunk(state: &mut TaskState, buf: &mut [u8]) -> C2Result<usize> {
    let stream = state.stream.as_mut().expect("read_chunk only polled while streaming");
    match timeout(Duration::from_millis(state.config.io_timeout_ms), stream.read(buf)).await {
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(C2Error::ConnectionLost(e.to_string())),
        Err(_) => Err(C2Error::Timeout),
    }
}

async fn schedule_reconnect(backoff: &mut Duration) {
    tokio::time::sleep(*backoff).await;
    *backoff = (*backoff * 2).min(Duration::from_secs(30));
}

/// A socket drop while streaming: tear down the connection and, if this
/// session was established via an operator `connect` (not yet followed by
/// an explicit `disconnect`), retry with exponential backoff. `Standby`
/// reflects "enabled but not currently connected", distinct from the
/// `Offline` an explicit disconnect leaves behind.
async fn handle_connection_loss(
    state: &mut TaskState,
    health_tx: &watch::Sender<SensorHealth>,
    backoff: &mut Duration,
) {
    let auto_reconnect = state.auto_reconnect;
    state.stream = None;
    state.conn_state = ConnState::Disconnected;
    state.read_buf.clear();
    let _ = health_tx.send(if auto_reconnect {
        SensorHealth::Standby
    } else {
        SensorHealth::Offline
    });

    if !auto_reconnect {
        return;
    }
    schedule_reconnect(backoff).await;
    match do_connect(state).await {
        Ok(()) => {
            state.auto_reconnect = true;
            let _ = health_tx.send(SensorHealth::Idle);
        }
        Err(e) => warn!(target: "radar_driver", "reconnect failed: {e}"),
    }
}

async fn handle_command(
    state: &mut TaskState,
    cmd: RadarCommand,
    health_tx: &watch::Sender<SensorHealth>,
) -> C2Result<()> {
    match cmd {
        RadarCommand::Connect => {
            let r = do_connect(state).await;
            if r.is_ok() {
                state.auto_reconnect = true;
                let _ = health_tx.send(SensorHealth::Idle);
            }
            r
        }
        RadarCommand::Configure(cfg) => {
            if state.conn_state != ConnState::Idle {
                return Err(C2Error::DeviceBusy(
                    "radar configuration rejected while streaming".into(),
                ));
            }
            apply_configuration(state, &cfg).await
        }
        RadarCommand::Start => {
            if state.conn_state != ConnState::Idle {
                return Err(C2Error::StateError("radar must be connected and idle to start".into()));
            }
            send_command(state, "MODE:SWT:START").await?;
            state.conn_state = ConnState::Streaming;
            let _ = health_tx.send(SensorHealth::Online);
            Ok(())
        }
        RadarCommand::Stop => {
            if state.conn_state != ConnState::Streaming {
                return Err(C2Error::StateError("radar is not streaming".into()));
            }
            let _ = send_command(state, "MODE:SWT:STOP").await?;
            state.conn_state = ConnState::Idle;
            let _ = health_tx.send(SensorHealth::Idle);
            Ok(())
        }
        RadarCommand::Disconnect => {
            state.auto_reconnect = false;
            teardown(state, health_tx);
            Ok(())
        }
    }
}

async fn do_connect(state: &mut TaskState) -> C2Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.command_port);
    info!(target: "radar_driver", "connecting to {addr}");
    let stream = timeout(Duration::from_millis(state.config.io_timeout_ms), TcpStream::connect(&addr))
        .await
        .map_err(|_| C2Error::ConnectError(format!("timed out connecting to {addr}")))?
        .map_err(|e| C2Error::ConnectError(e.to_string()))?;
    state.stream = Some(stream);
    state.conn_state = ConnState::Idle;
    state.resync_used = 0;
    state.read_buf.clear();
    info!(target: "radar_driver", "connected to {addr}");
    Ok(())
}

fn teardown(state: &mut TaskState, health_tx: &watch::Sender<SensorHealth>) {
    state.stream = None;
    state.conn_state = ConnState::Disconnected;
    state.read_buf.clear();
    let _ = health_tx.send(SensorHealth::Offline);
}

/// Search and track FOV plus orientation are applied before streaming starts,
/// since the device rejects configuration commands while in `Connected(Streaming)`.
async fn apply_configuration(state: &mut TaskState, cfg: &RadarPersistedConfig) -> C2Result<()> {
    send_command(state, "RESET:PARAMETERS").await?;
    send_command(state, &format!("MODE:SWT:SEARCH:AZFOVMIN {}", cfg.search_fov.az_min_deg)).await?;
    send_command(state, &format!("MODE:SWT:SEARCH:AZFOVMAX {}", cfg.search_fov.az_max_deg)).await?;
    send_command(state, &format!("MODE:SWT:SEARCH:ELFOVMIN {}", cfg.search_fov.el_min_deg)).await?;
    send_command(state, &format!("MODE:SWT:SEARCH:ELFOVMAX {}", cfg.search_fov.el_max_deg)).await?;
    send_command(state, &format!("MODE:SWT:TRACK:AZFOVMIN {}", cfg.track_fov.az_min_deg)).await?;
    send_command(state, &format!("MODE:SWT:TRACK:AZFOVMAX {}", cfg.track_fov.az_max_deg)).await?;
    send_command(state, &format!("MODE:SWT:TRACK:ELFOVMIN {}", cfg.track_fov.el_min_deg)).await?;
    send_command(state, &format!("MODE:SWT:TRACK:ELFOVMAX {}", cfg.track_fov.el_max_deg)).await?;
    send_command(state, "SYS:TIME 0,0").await?;
    Ok(())
}

/// Send a CRLF-terminated ASCII command and read a single line response.
async fn send_command(state: &mut TaskState, command: &str) -> C2Result<String> {
    let stream = state
        .stream
        .as_mut()
        .ok_or_else(|| C2Error::StateError("radar command sent while disconnected".into()))?;

    let line = format!("{command}\r\n");
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| C2Error::ConnectionLost(e.to_string()))?;

    let io_timeout = Duration::from_millis(state.config.io_timeout_ms);
    let mut resp = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = timeout(io_timeout, stream.read(&mut byte))
            .await
            .map_err(|_| C2Error::Timeout)?
            .map_err(|e| C2Error::ConnectionLost(e.to_string()))?;
        if n == 0 {
            return Err(C2Error::ConnectionLost("radar closed connection mid-response".into()));
        }
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            resp.push(byte[0]);
        }
    }
    let line = String::from_utf8_lossy(&resp).trim().to_string();
    debug!(target: "radar_driver", "{command} -> {line}");
    if line == "Command Not Available" {
        return Err(C2Error::DeviceBusy(command.to_string()));
    }
    Ok(line)
}

/// Drain as many complete frames as are present in `state.read_buf`,
/// resyncing one byte at a time on a tag mismatch (§4.2 framing rule).
fn drain_packets(state: &mut TaskState) -> C2Result<Vec<Measurement>> {
    let mut out = Vec::new();
    let now = std::time::Instant::now();

    loop {
        if state.read_buf.len() < RADAR_HEADER_SIZE {
            break;
        }
        let header: RadarHeader = *from_bytes(&state.read_buf[..RADAR_HEADER_SIZE]);
        if !header.tag_matches() {
            state.read_buf.remove(0);
            state.resync_used += 1;
            if state.resync_used > state.config.resync_budget_bytes {
                state.resync_used = 0;
                return Err(C2Error::ProtocolError(
                    "radar tag mismatch exceeded resync budget".into(),
                ));
            }
            continue;
        }
        state.resync_used = 0;

        let packet_size = header.packet_size as usize;
        if packet_size < RADAR_HEADER_SIZE {
            return Err(C2Error::ProtocolError(format!(
                "radar header declared packet_size {packet_size} smaller than header"
            )));
        }
        if state.read_buf.len() < packet_size {
            break; // wait for the rest of the packet
        }

        let n_tracks = header.n_tracks as usize;
        let mut offset = RADAR_HEADER_SIZE;
        for _ in 0..n_tracks {
            if offset + std::mem::size_of::<RadarTrackRecord>() > packet_size {
                break;
            }
            let rec: RadarTrackRecord =
                *from_bytes(&state.read_buf[offset..offset + std::mem::size_of::<RadarTrackRecord>()]);
            out.push(track_record_to_measurement(&rec, now));
            offset += std::mem::size_of::<RadarTrackRecord>();
        }

        state.read_buf.drain(..packet_size);
    }
    Ok(out)
}

fn track_record_to_measurement(rec: &RadarTrackRecord, now: std::time::Instant) -> Measurement {
    let type_hint = if rec.prob_uav > 0.7 {
        TrackType::Uav
    } else if rec.prob_uav < 0.3 && rec.prob_other > 0.7 {
        TrackType::Bird
    } else {
        TrackType::Unknown
    };

    let velocity = [rec.vx as f64, rec.vy as f64, rec.vz as f64];
    // Raw confidence is on a 0-100 scale; normalize.
    let confidence = (rec.est_confidence as f64 / 100.0).min(1.0);

    Measurement::new(
        SensorSource::Radar,
        now,
        rec.az as f64,
        rec.el as f64,
        Some(rec.range as f64),
        Some(velocity),
        confidence,
        MeasurementPayload::Radar {
            rcs: rec.est_rcs as f64,
            probability_uav: rec.prob_uav as f64,
            probability_other: rec.prob_other as f64,
            type_hint,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use c2_types::radar_wire::{RADAR_TAG_MAGIC, RADAR_TRACK_RECORD_SIZE};
    use bytemuck::Zeroable;

    fn sample_header(packet_size: u32, n_tracks: u32) -> RadarHeader {
        let mut tag = [0u8; 12];
        tag[..RADAR_TAG_MAGIC.len()].copy_from_slice(RADAR_TAG_MAGIC);
        RadarHeader {
            tag,
            packet_size,
            n_tracks,
            sys_time_days: 0,
            sys_time_ms: 0,
            profile_atracker: 0,
            profile_atracker_main: 0,
            packet_type: 0,
        }
    }

    fn sample_track(az: f32, prob_uav: f32, prob_other: f32) -> RadarTrackRecord {
        let mut rec = RadarTrackRecord::zeroed();
        rec.az = az;
        rec.range = 500.0;
        rec.est_confidence = 80.0;
        rec.prob_uav = prob_uav;
        rec.prob_other = prob_other;
        rec
    }

    fn fresh_state() -> TaskState {
        TaskState {
            config: RadarConfig::default(),
            stream: None,
            conn_state: ConnState::Streaming,
            auto_reconnect: false,
            resync_used: 0,
            read_buf: Vec::new(),
        }
    }

    #[test]
    fn resyncs_past_a_bad_byte_prefix() {
        let packet_size = (RADAR_HEADER_SIZE + RADAR_TRACK_RECORD_SIZE) as u32;
        let header = sample_header(packet_size, 1);
        let track = sample_track(10.0, 0.9, 0.05);

        let mut state = fresh_state();
        state.read_buf.push(0xFF); // garbage byte before the real frame
        state.read_buf.extend_from_slice(bytemuck::bytes_of(&header));
        state.read_buf.extend_from_slice(bytemuck::bytes_of(&track));

        let measurements = drain_packets(&mut state).unwrap();
        assert_eq!(measurements.len(), 1);
        assert!((measurements[0].azimuth_deg - 10.0).abs() < 1e-6);
    }

    #[test]
    fn classifies_uav_bird_and_unknown_from_probabilities() {
        let uav = track_record_to_measurement(&sample_track(0.0, 0.9, 0.0), std::time::Instant::now());
        let bird = track_record_to_measurement(&sample_track(0.0, 0.1, 0.9), std::time::Instant::now());
        let unknown = track_record_to_measurement(&sample_track(0.0, 0.5, 0.5), std::time::Instant::now());

        assert!(matches!(
            uav.payload,
            MeasurementPayload::Radar { type_hint: TrackType::Uav, .. }
        ));
        assert!(matches!(
            bird.payload,
            MeasurementPayload::Radar { type_hint: TrackType::Bird, .. }
        ));
        assert!(matches!(
            unknown.payload,
            MeasurementPayload::Radar { type_hint: TrackType::Unknown, .. }
        ));
    }

    #[test]
    fn waits_for_a_full_packet_before_parsing() {
        let packet_size = (RADAR_HEADER_SIZE + RADAR_TRACK_RECORD_SIZE) as u32;
        let header = sample_header(packet_size, 1);

        let mut state = fresh_state();
        state.read_buf.extend_from_slice(bytemuck::bytes_of(&header));
        // Only the header has arrived so far; no track bytes yet.

        let measurements = drain_packets(&mut state).unwrap();
        assert!(measurements.is_empty());
        assert_eq!(state.read_buf.len(), RADAR_HEADER_SIZE);
    }
}
