use std::time::Instant;

/// Current engagement selection. `highest_priority_id` (tracked alongside,
/// not part of this enum) is the separate hysteresis memory the controller
/// uses to damp flapping between near-equal-score tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngagementState {
    Idle,
    Engaged {
        track_id: u64,
        operator_id: u64,
        engaged_at: Instant,
    },
}

impl EngagementState {
    pub fn engaged_track_id(&self) -> Option<u64> {
        match self {
            EngagementState::Idle => None,
            EngagementState::Engaged { track_id, .. } => Some(*track_id),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, EngagementState::Idle)
    }
}

impl Default for EngagementState {
    fn default() -> Self {
        EngagementState::Idle
    }
}

/// Events the fusion/engagement layer pushes to subscribers (one-way —
/// no driver or downstream consumer holds a reference back into fusion).
#[derive(Debug, Clone)]
pub enum FusionEvent {
    TrackCreated { track_id: u64 },
    TrackLost { track_id: u64 },
    StationRegistered { station_id: String },
    StationPruned { station_id: String },
}
