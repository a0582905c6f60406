//! Engagement controller (§4.6). Holds the single engaged-track selection
//! and the hysteresis bias that keeps it from flapping between two
//! near-equal-score tracks every tick.

use c2_types::{C2Error, C2Result, EngagementState, FusionEvent};
use tokio::sync::broadcast;
use tracing::info;

use crate::fusion::FusionEngine;

/// Resolved Open Question: the hysteresis bonus is fixed at 3%.
const HYSTERESIS_BONUS: f64 = 0.03;

pub struct EngagementController {
    state: EngagementState,
    /// The track selected by the last hysteresis pass, independent of
    /// operator engagement — biased in its own favor on the next pass.
    highest_priority_id: Option<u64>,
    events_tx: broadcast::Sender<FusionEvent>,
}

impl EngagementController {
    pub fn new(events_tx: broadcast::Sender<FusionEvent>) -> Self {
        Self {
            state: EngagementState::Idle,
            highest_priority_id: None,
            events_tx,
        }
    }

    pub fn engaged(&self) -> Option<u64> {
        self.state.engaged_track_id()
    }

    pub fn state(&self) -> EngagementState {
        self.state
    }

    /// The track selected by the most recent [`Self::recompute_priority`]
    /// call.
    pub fn highest_priority_id(&self) -> Option<u64> {
        self.highest_priority_id
    }

    /// Re-derive the highest-priority track from the current fused set: the
    /// track with the largest threat score > 0, with a hysteresis bonus
    /// applied to whichever track is *currently remembered* as highest
    /// priority (not necessarily the engaged one). Call once per fusion
    /// tick; the result is cached and read back via [`Self::highest_priority_id`].
    pub fn recompute_priority(&mut self, engine: &FusionEngine) -> Option<u64> {
        let current = self.highest_priority_id;
        let picked = engine
            .tracks()
            .filter(|t| t.threat_score > 0.0)
            .map(|t| {
                let mut score = t.threat_score;
                if Some(t.id) == current {
                    score *= 1.0 + HYSTERESIS_BONUS;
                }
                (t.id, score)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id);
        self.highest_priority_id = picked;
        picked
    }

    pub fn engage(&mut self, track_id: u64, operator_id: u64, engine: &FusionEngine) -> C2Result<()> {
        if engine.track(track_id).is_none() {
            return Err(C2Error::TrackNotFound(track_id));
        }
        self.state = EngagementState::Engaged {
            track_id,
            operator_id,
            engaged_at: std::time::Instant::now(),
        };
        info!(target: "c2_core::engagement", track_id, operator_id, "engaged");
        Ok(())
    }

    pub fn disengage(&mut self) {
        if !self.state.is_idle() {
            info!(target: "c2_core::engagement", "disengaged");
        }
        self.state = EngagementState::Idle;
    }

    /// Call once per fusion tick, after scoring/aging: if the engaged track
    /// was dropped from the fused set, auto-disengage and emit `TrackLost`.
    pub fn sweep(&mut self, engine: &FusionEngine) {
        if let Some(id) = self.engaged() {
            if engine.track(id).is_none() {
                self.disengage();
                let _ = self.events_tx.send(FusionEvent::TrackLost { track_id: id });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use c2_types::{MeasurementPayload, SensorSource, TrackType};

    use super::*;
    use crate::config::ThresholdsConfig;

    fn synthetic_measurement(az: f64, range: f64) -> c2_types::Measurement {
        c2_types::Measurement::new(
            SensorSource::Radar,
            Instant::now(),
            az,
            0.0,
            Some(range),
            None,
            0.9,
            MeasurementPayload::Radar {
                rcs: 0.1,
                probability_uav: 0.9,
                probability_other: 0.05,
                type_hint: TrackType::Uav,
            },
        )
    }

    #[test]
    fn engaging_unknown_track_fails() {
        let (tx, _rx) = broadcast::channel(16);
        let mut controller = EngagementController::new(tx);
        let engine = FusionEngine::new(ThresholdsConfig::default(), broadcast::channel(16).0);
        assert!(controller.engage(999, 1, &engine).is_err());
    }

    #[test]
    fn disengage_returns_to_idle() {
        let (tx, _rx) = broadcast::channel(16);
        let (etx, _erx) = broadcast::channel(16);
        let mut engine = FusionEngine::new(ThresholdsConfig::default(), etx);
        engine.tick(vec![synthetic_measurement(10.0, 100.0)], Instant::now());
        let id = engine.tracks().next().unwrap().id;

        let mut controller = EngagementController::new(tx);
        controller.engage(id, 7, &engine).unwrap();
        assert_eq!(controller.engaged(), Some(id));
        controller.disengage();
        assert_eq!(controller.engaged(), None);
    }

    #[test]
    fn sweep_auto_disengages_when_track_is_gone() {
        let (tx, mut rx) = broadcast::channel(16);
        let (etx, _erx) = broadcast::channel(16);
        let mut engine = FusionEngine::new(ThresholdsConfig::default(), etx);
        engine.tick(vec![synthetic_measurement(10.0, 100.0)], Instant::now());
        let id = engine.tracks().next().unwrap().id;

        let mut controller = EngagementController::new(tx);
        controller.engage(id, 7, &engine).unwrap();

        let future = Instant::now() + std::time::Duration::from_secs(10);
        engine.tick(vec![], future);
        controller.sweep(&engine);

        assert_eq!(controller.engaged(), None);
        assert!(matches!(rx.try_recv(), Ok(FusionEvent::TrackLost { .. })));
    }

    #[test]
    fn highest_priority_picks_largest_score() {
        let (etx, _erx) = broadcast::channel(16);
        let mut engine = FusionEngine::new(ThresholdsConfig::default(), etx);
        engine.tick(vec![synthetic_measurement(10.0, 100.0), synthetic_measurement(200.0, 2000.0)], Instant::now());

        let ids: Vec<u64> = engine.tracks().map(|t| t.id).collect();
        assert_eq!(ids.len(), 2);

        let (tx, _rx) = broadcast::channel(16);
        let mut controller = EngagementController::new(tx);
        let picked = controller.recompute_priority(&engine);
        assert!(picked.is_some());
        assert_eq!(controller.highest_priority_id(), picked);
    }

    #[test]
    fn hysteresis_keeps_the_remembered_track_ahead_of_a_close_challenger() {
        // Mirrors S6: track A remembered as highest at 0.79, track B at 0.80.
        // The 3% bonus (0.79 * 1.03 = 0.8137) must keep A selected.
        let (etx, _erx) = broadcast::channel(16);
        let mut engine = FusionEngine::new(ThresholdsConfig::default(), etx);
        engine.tick(vec![synthetic_measurement(10.0, 100.0), synthetic_measurement(200.0, 2000.0)], Instant::now());

        let mut ids = engine.tracks().map(|t| t.id);
        let a = ids.next().unwrap();
        let b = ids.next().unwrap();

        {
            let ta = engine.track_mut_for_test(a);
            ta.threat_score = 0.79;
        }
        {
            let tb = engine.track_mut_for_test(b);
            tb.threat_score = 0.80;
        }

        let (tx, _rx) = broadcast::channel(16);
        let mut controller = EngagementController::new(tx);
        controller.highest_priority_id = Some(a);

        let picked = controller.recompute_priority(&engine);
        assert_eq!(picked, Some(a));
    }
}
