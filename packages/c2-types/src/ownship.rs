use std::time::Instant;

use serde::{Deserialize, Serialize};

/// GNSS fix quality, from GGA's fix-quality field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixQuality {
    None,
    Standalone,
    Dgps,
    RtkFixed,
    RtkFloat,
}

impl Default for FixQuality {
    fn default() -> Self {
        FixQuality::None
    }
}

impl FixQuality {
    pub fn from_gga_code(code: u8) -> Self {
        match code {
            1 => FixQuality::Standalone,
            2 => FixQuality::Dgps,
            4 => FixQuality::RtkFixed,
            5 => FixQuality::RtkFloat,
            _ => FixQuality::None,
        }
    }

    pub fn has_fix(&self) -> bool {
        !matches!(self, FixQuality::None)
    }
}

/// Own-vehicle position and attitude, published by the GNSS driver and used
/// by the RF driver to rotate true-north-framed detections into body frame.
#[derive(Debug, Clone, Copy)]
pub struct OwnShip {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub true_heading_deg: f64,
    pub ground_speed_mps: f64,
    pub fix_quality: FixQuality,
    pub heading_valid: bool,
    pub timestamp: Instant,
}

impl OwnShip {
    pub fn has_valid_fix(&self) -> bool {
        self.fix_quality.has_fix()
    }
}
