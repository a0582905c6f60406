//! Little-endian binary layout of the radar track wire (see spec §6).
//! `RadarHeader`/`RadarTrackRecord` are `#[repr(C)]` + `bytemuck::Pod` so a
//! byte slice can be reinterpreted directly, matching the vendor's C struct
//! layout the same way the wire structs in comparable driver crates do.

use bytemuck::{Pod, Zeroable};

pub const RADAR_HEADER_SIZE: usize = 40;
pub const RADAR_TRACK_RECORD_SIZE: usize = 248;
pub const RADAR_TAG_MAGIC: &[u8] = b"<track";

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RadarHeader {
    pub tag: [u8; 12],
    pub packet_size: u32,
    pub n_tracks: u32,
    pub sys_time_days: u32,
    pub sys_time_ms: u32,
    pub profile_atracker: u32,
    pub profile_atracker_main: u32,
    pub packet_type: u32,
}

impl RadarHeader {
    pub fn tag_matches(&self) -> bool {
        self.tag.starts_with(RADAR_TAG_MAGIC)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RadarTrackRecord {
    pub id: u32,
    pub state: u32,
    pub az: f32,
    pub el: f32,
    pub range: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub assoc_id: [u32; 3],
    pub assoc_chi2: [f32; 3],
    pub toca_days: i32,
    pub toca_ms: i32,
    pub doca: f32,
    pub lifetime: f32,
    pub last_update_days: u32,
    pub last_update_ms: u32,
    pub last_assoc_days: u32,
    pub last_assoc_ms: u32,
    pub acquired_days: u32,
    pub acquired_ms: u32,
    pub est_confidence: f32,
    pub num_assoc_meas: u32,
    pub est_rcs: f32,
    pub prob_other: f32,
    pub prob_uav: f32,
}

const _: () = assert!(std::mem::size_of::<RadarHeader>() == RADAR_HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<RadarTrackRecord>() == RADAR_TRACK_RECORD_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes_match_wire_spec() {
        assert_eq!(std::mem::size_of::<RadarHeader>(), RADAR_HEADER_SIZE);
        assert_eq!(
            std::mem::size_of::<RadarTrackRecord>(),
            RADAR_TRACK_RECORD_SIZE
        );
    }
}
