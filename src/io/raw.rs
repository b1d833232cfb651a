//! On-disk record types.
//!
//! Records are flat, index-based and `bincode`-encoded. Entity references
//! are dense `u16` indices assigned at save time in pool iteration order;
//! [`NONE_IDX`] encodes an absent reference. Handles and generations never
//! touch the disk.

use bincode::{Decode, Encode};

/// Sentinel for an absent `u16` reference.
pub const NONE_IDX: u16 = u16::MAX;

#[derive(Encode, Decode, Debug, Clone, Copy)]
pub struct RawVertex {
    pub x: f32,
    pub y: f32,
}

#[derive(Encode, Decode, Debug, Clone, Copy)]
pub struct RawWall {
    pub v: [u16; 2],
    /// Side array indices per face, [`NONE_IDX`] when the face is absent.
    /// Redundant with `RawSide::{wall, index}`; checked on load.
    pub sides: [u16; 2],
}

/// Wall-face material, stored in an array parallel to the sides.
#[derive(Encode, Decode, Debug, Clone, Copy)]
pub struct RawSideMaterial {
    pub tex: u16,
    pub offset: [f32; 2],
}

#[derive(Encode, Decode, Debug, Clone, Copy)]
pub struct RawSide {
    pub wall: u16,
    pub index: u8,
    pub sector: u16,
    pub portal: u16,
    pub flags: u16,
}

#[derive(Encode, Decode, Debug, Clone, Copy)]
pub struct RawDecal {
    pub side: u16,
    pub along: f32,
    pub height: f32,
    pub size: [f32; 2],
    pub tex: u16,
}

#[derive(Encode, Decode, Debug, Clone)]
pub struct RawSector {
    pub floor_height: f32,
    pub ceil_height: f32,
    /// Boundary sides in trace order.
    pub sides: Vec<u16>,
}

/// Floor/ceiling material pair, stored in an array parallel to the sectors.
#[derive(Encode, Decode, Debug, Clone, Copy)]
pub struct RawSectorMaterial {
    pub floor_tex: u16,
    pub floor_offset: [f32; 2],
    pub ceil_tex: u16,
    pub ceil_offset: [f32; 2],
}

#[derive(Encode, Decode, Debug, Clone, Copy)]
pub struct RawObject {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub angle: f32,
    pub type_id: u16,
    pub radius: f32,
}

/// Version 1 object record, before facing angles existed.
#[derive(Encode, Decode, Debug, Clone, Copy)]
pub struct RawObjectV1 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub type_id: u16,
    pub radius: f32,
}

impl From<RawObjectV1> for RawObject {
    fn from(o: RawObjectV1) -> Self {
        Self {
            x: o.x,
            y: o.y,
            z: o.z,
            angle: 0.0,
            type_id: o.type_id,
            radius: o.radius,
        }
    }
}
