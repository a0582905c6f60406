//! Orchestration bridge (§4.8). A single task owns the fusion engine and
//! engagement controller exclusively and ticks them at 30 Hz; every other
//! component — the HTTP API, the gunner broadcast service — reaches in
//! through [`OrchestrationHandle`], a cheap `Clone` of watch receivers and a
//! command channel for the two operations (`engage`/`disengage`) that need
//! exclusive access to track state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use c2_types::{C2Result, EngagementState, FusionEvent, OwnShip, SensorHealth, Track};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::interval;
use tracing::info;

use crate::broadcast::{self, SnapshotSource};
use crate::config::Config;
use crate::drivers::{gnss, radar, rf};
use crate::engagement::EngagementController;
use crate::fusion::FusionEngine;
use crate::persistence::{self, RadarPersistedConfig};

#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub radar: SensorHealth,
    pub rf: SensorHealth,
    pub gnss: SensorHealth,
}

enum ControlCommand {
    Engage(u64, u64, oneshot::Sender<C2Result<()>>),
    Disengage(oneshot::Sender<C2Result<()>>),
}

#[derive(Clone)]
pub struct OrchestrationHandle {
    radar: radar::RadarHandle,
    rf_health_rx: watch::Receiver<SensorHealth>,
    gnss: gnss::GnssHandle,
    tracks_rx: watch::Receiver<Vec<Track>>,
    engaged_rx: watch::Receiver<EngagementState>,
    highest_priority_rx: watch::Receiver<Option<u64>>,
    control_tx: mpsc::Sender<ControlCommand>,
    radar_config_path: Arc<PathBuf>,
    events_tx: broadcast::Sender<FusionEvent>,
}

impl OrchestrationHandle {
    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks_rx.borrow().clone()
    }

    pub fn ownship(&self) -> Option<OwnShip> {
        self.gnss.ownship()
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            radar: self.radar.health(),
            rf: *self.rf_health_rx.borrow(),
            gnss: self.gnss.health(),
        }
    }

    pub fn engaged(&self) -> Option<u64> {
        self.engaged_rx.borrow().engaged_track_id()
    }

    /// The track the hysteresis rule currently rates highest priority,
    /// independent of whatever the operator has engaged (if anything).
    pub fn highest_priority_id(&self) -> Option<u64> {
        *self.highest_priority_rx.borrow()
    }

    /// A live feed of track-created/lost and gunner station registration
    /// events, for a future mission-recording sink.
    pub fn subscribe(&self) -> broadcast::Receiver<FusionEvent> {
        self.events_tx.subscribe()
    }

    pub async fn connect_radar(&self) -> C2Result<()> {
        self.radar.connect().await?;
        let cfg = persistence::load_radar_config(&*self.radar_config_path).await;
        self.radar.configure(cfg).await
    }

    pub async fn start_radar(&self) -> C2Result<()> {
        self.radar.start().await
    }

    pub async fn stop_radar(&self) -> C2Result<()> {
        self.radar.stop().await
    }

    pub async fn disconnect_radar(&self) -> C2Result<()> {
        self.radar.disconnect().await
    }

    pub async fn configure_radar(&self, cfg: RadarPersistedConfig) -> C2Result<()> {
        self.radar.configure(cfg.clone()).await?;
        persistence::save_radar_config(&*self.radar_config_path, &cfg)
            .await
            .map_err(|e| c2_types::C2Error::ConfigError(e.to_string()))?;
        Ok(())
    }

    pub async fn engage_track(&self, track_id: u64, operator_id: u64) -> C2Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_control(ControlCommand::Engage(track_id, operator_id, tx)).await?;
        rx.await.map_err(|_| c2_types::C2Error::StateError("orchestration task dropped the reply".into()))?
    }

    pub async fn disengage_track(&self) -> C2Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_control(ControlCommand::Disengage(tx)).await?;
        rx.await.map_err(|_| c2_types::C2Error::StateError("orchestration task dropped the reply".into()))?
    }

    async fn send_control(&self, cmd: ControlCommand) -> C2Result<()> {
        self.control_tx
            .send(cmd)
            .await
            .map_err(|_| c2_types::C2Error::StateError("orchestration task has stopped".into()))
    }
}

/// Wire up every driver, the fusion engine, the engagement controller, and
/// the gunner broadcast service, then spawn the 30 Hz tick loop. Returns a
/// handle the HTTP API layer can clone freely.
pub fn spawn(config: Config, radar_config_path: PathBuf) -> OrchestrationHandle {
    let (measurement_tx, measurement_rx) = mpsc::channel(1024);
    let (fusion_events_tx, mut fusion_events_rx) = broadcast::channel(256);

    let gnss_handle = gnss::spawn(config.gps.clone());
    let radar_handle = radar::spawn(config.network.radar.clone(), measurement_tx.clone());
    let rf_handle = rf::spawn(config.network.rf.clone(), gnss_handle.subscribe(), measurement_tx);

    let (tracks_tx, tracks_rx) = watch::channel(Vec::new());
    let (engaged_tx, engaged_rx) = watch::channel(EngagementState::Idle);
    let (radar_online_tx, radar_online_rx) = watch::channel(false);
    let (rf_online_tx, rf_online_rx) = watch::channel(false);
    let (ownship_tx, ownship_rx) = watch::channel(None);
    let (highest_priority_tx, highest_priority_rx) = watch::channel(None);
    let (control_tx, mut control_rx) = mpsc::channel(8);

    let broadcast_handle = broadcast::spawn(
        config.gunner.clone(),
        config.thresholds.broadcast_tick_hz,
        SnapshotSource {
            engaged: engaged_rx.clone(),
            tracks: tracks_rx.clone(),
            radar_online: radar_online_rx,
            rf_online: rf_online_rx,
            ownship: ownship_rx,
        },
        fusion_events_tx.clone(),
    );
    let mut broadcast_disengage_rx = broadcast_handle.disengage_rx;

    let thresholds = config.thresholds.clone();
    let radar_config_path = Arc::new(radar_config_path);

    let handle = OrchestrationHandle {
        radar: radar_handle.clone(),
        rf_health_rx: rf_handle.health_watch(),
        gnss: gnss_handle.clone(),
        tracks_rx,
        engaged_rx,
        highest_priority_rx,
        control_tx,
        radar_config_path,
        events_tx: fusion_events_tx.clone(),
    };

    tokio::spawn(async move {
        let mut fusion = FusionEngine::new(thresholds.clone(), fusion_events_tx.clone());
        let mut engagement = EngagementController::new(fusion_events_tx.clone());
        let mut measurement_rx = measurement_rx;
        let mut ticker = interval(Duration::from_secs_f64(1.0 / thresholds.fusion_tick_hz));

        loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => {
                    let now = Instant::now();
                    let mut batch = Vec::new();
                    while let Ok(m) = measurement_rx.try_recv() {
                        batch.push(m);
                    }
                    fusion.tick(batch, now);
                    engagement.sweep(&fusion);
                    let highest_priority = engagement.recompute_priority(&fusion);

                    let _ = tracks_tx.send(fusion.tracks().cloned().collect());
                    let _ = engaged_tx.send(engagement.state());
                    let _ = highest_priority_tx.send(highest_priority);
                    let _ = radar_online_tx.send(radar_handle.health() == SensorHealth::Online);
                    let _ = rf_online_tx.send(rf_handle.health() == SensorHealth::Online);
                    let _ = ownship_tx.send(gnss_handle.ownship());
                }

                Some(cmd) = control_rx.recv() => {
                    match cmd {
                        ControlCommand::Engage(track_id, operator_id, reply) => {
                            let _ = reply.send(engagement.engage(track_id, operator_id, &fusion));
                        }
                        ControlCommand::Disengage(reply) => {
                            engagement.disengage();
                            let _ = reply.send(Ok(()));
                        }
                    }
                }

                Some(()) = broadcast_disengage_rx.recv() => {
                    engagement.disengage();
                }

                Ok(event) = fusion_events_rx.recv() => {
                    info!(target: "c2_core::orchestration", event = ?event, "fusion event");
                }
            }
        }
    });

    handle
}
