//! Canonical data model shared by every driver, the fusion engine, the
//! engagement controller, and the gunner broadcast service. No other
//! component in this workspace depends on another component's crate —
//! everything that crosses a boundary is a type defined here.

pub mod engagement;
pub mod error;
pub mod gunner;
pub mod health;
pub mod measurement;
pub mod ownship;
pub mod radar_wire;
pub mod track;

pub use engagement::{EngagementState, FusionEvent};
pub use error::{C2Error, C2Result};
pub use gunner::{Effector, GunnerStatus, Priority, TrackUpdate, TracksSnapshot};
pub use health::SensorHealth;
pub use measurement::{Measurement, MeasurementPayload, SensorSource};
pub use ownship::{FixQuality, OwnShip};
pub use track::{RfIntel, TailSample, Track, TrackSource, TrackType};
