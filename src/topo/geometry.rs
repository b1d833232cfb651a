//! Topology entity types.
//!
//! A level is a graph of vertices, walls, sides and sectors:
//! * **Wall**: undirected segment between two vertices, carrying up to two
//!   sides (index 0 = left/front, runs `v0 → v1`; index 1 = right/back, runs
//!   `v1 → v0`).
//! * **Side**: one directed face of a wall, optionally owned by a sector and
//!   optionally portal-linked to another side.
//! * **Sector**: closed area bounded by sides, with floor/ceiling planes, a
//!   triangulated surface and a convex subsector decomposition.
//!
//! All cross-references are generation-checked [`Handle`]s, never indices
//! into somebody else's `Vec`.

use bitflags::bitflags;
use glam::Vec2;
use smallvec::SmallVec;

use super::pool::Handle;

pub type VertexId = Handle<Vertex>;
pub type WallId = Handle<Wall>;
pub type SideId = Handle<Side>;
pub type SectorId = Handle<Sector>;
pub type ObjectId = Handle<Object>;

/// Slot index into the level-global subsector store.
pub type SubsectorId = u32;

/*--------------------------- vertices -------------------------------*/

#[derive(Clone, Debug)]
pub struct Vertex {
    pub pos: Vec2,
    /// Walls incident to this vertex (back-reference, not ownership).
    pub walls: SmallVec<[WallId; 4]>,
    pub version: u32,
}

impl Vertex {
    pub fn new(pos: Vec2) -> Self {
        Self {
            pos,
            walls: SmallVec::new(),
            version: 0,
        }
    }
}

/*----------------------------- walls --------------------------------*/

#[derive(Clone, Debug)]
pub struct Wall {
    pub v: [VertexId; 2],
    /// index 0 = left/front side, index 1 = right/back side.
    pub sides: [Option<SideId>; 2],
    pub version: u32,
}

impl Wall {
    pub fn new(v0: VertexId, v1: VertexId) -> Self {
        Self {
            v: [v0, v1],
            sides: [None, None],
            version: 0,
        }
    }
}

/*----------------------------- sides --------------------------------*/

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SideFlags: u16 {
        /// Tracing through this side is an immediate failure. Set by callers
        /// probing "would this configuration still close?" questions.
        const FAIL_TRACE    = 0x0001;
        /// Portal link is one-directional: the linked side does not link back.
        const DISCONNECTED  = 0x0002;
        /// A double-side repair was attempted on this side and gave up.
        const UNREPAIRABLE  = 0x0004;
    }
}

/// Texture binding of one side (atlas id + scroll offset). The atlas itself
/// is an external collaborator; ids are opaque here.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SideMaterial {
    pub tex: u16,
    pub offset: Vec2,
}

impl Default for SideMaterial {
    fn default() -> Self {
        Self {
            tex: 0,
            offset: Vec2::ZERO,
        }
    }
}

/// Surface-attached decoration, parametrised along the owning wall.
/// `along` is a distance from the side's start vertex in map units; geometry
/// recalculation re-clamps it when the wall changes length.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decal {
    pub along: f32,
    pub height: f32,
    pub size: Vec2,
    pub tex: u16,
}

#[derive(Clone, Debug)]
pub struct Side {
    pub wall: WallId,
    /// Which face of the wall this is: 0 or 1.
    pub index: u8,
    pub sector: Option<SectorId>,
    /// Portal link to another side. Bidirectional when mutual; a
    /// one-directional link carries [`SideFlags::DISCONNECTED`].
    pub portal: Option<SideId>,
    pub flags: SideFlags,
    pub material: SideMaterial,
    pub decals: Vec<Decal>,
    pub version: u32,
}

impl Side {
    pub fn new(wall: WallId, index: u8) -> Self {
        debug_assert!(index < 2);
        Self {
            wall,
            index,
            sector: None,
            portal: None,
            flags: SideFlags::empty(),
            material: SideMaterial::default(),
            decals: Vec::new(),
            version: 0,
        }
    }
}

/*---------------------------- sectors -------------------------------*/

/// Floor or ceiling plane: height plus texture binding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub height: f32,
    pub tex: u16,
    pub offset: Vec2,
}

impl Plane {
    pub fn at(height: f32) -> Self {
        Self {
            height,
            tex: 0,
            offset: Vec2::ZERO,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Sector {
    /// Boundary sides in trace order. Every listed side has
    /// `side.sector == Some(this)`.
    pub sides: Vec<SideId>,
    pub floor: Plane,
    pub ceil: Plane,
    pub bbox: Aabb,
    /// Triangulated surface (floor plan). Kept across failed re-tessellation.
    pub tris: Vec<[Vec2; 3]>,
    /// Convex subsector slots owned by this sector.
    pub subs: Vec<SubsectorId>,
    /// Sectors reachable through exactly one non-disconnected portal.
    pub neighbors: SmallVec<[SectorId; 4]>,
    pub version: u32,
}

impl Sector {
    pub fn new(floor_h: f32, ceil_h: f32) -> Self {
        Self {
            sides: Vec::new(),
            floor: Plane::at(floor_h),
            ceil: Plane::at(ceil_h),
            bbox: Aabb::EMPTY,
            tris: Vec::new(),
            subs: Vec::new(),
            neighbors: SmallVec::new(),
            version: 0,
        }
    }
}

/*---------------------------- objects -------------------------------*/

/// Movable entity (player, prop, pickup). Tracked by the block grid and
/// rendered as instanced sprites; simulation is an external collaborator.
#[derive(Clone, Debug)]
pub struct Object {
    pub pos: Vec2,
    pub z: f32,
    pub angle: f32,
    pub type_id: u16,
    pub radius: f32,
    pub sector: Option<SectorId>,
    pub version: u32,
}

impl Object {
    pub fn new(pos: Vec2, type_id: u16) -> Self {
        Self {
            pos,
            z: 0.0,
            angle: 0.0,
            type_id,
            radius: 16.0,
            sector: None,
            version: 0,
        }
    }
}

/*------------------------------ aabb --------------------------------*/

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    /// Inverted box that unions as the identity.
    pub const EMPTY: Aabb = Aabb {
        min: Vec2::splat(f32::INFINITY),
        max: Vec2::splat(f32::NEG_INFINITY),
    };

    pub fn of_points(points: impl IntoIterator<Item = Vec2>) -> Self {
        let mut bb = Self::EMPTY;
        for p in points {
            bb.add_point(p);
        }
        bb
    }

    #[inline]
    pub fn add_point(&mut self, p: Vec2) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn union(self, other: Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn expand(self, r: f32) -> Aabb {
        Aabb {
            min: self.min - Vec2::splat(r),
            max: self.max + Vec2::splat(r),
        }
    }

    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec2;

    #[test]
    fn aabb_union_and_contains() {
        let bb = Aabb::of_points([vec2(0.0, 0.0), vec2(4.0, 2.0), vec2(-1.0, 3.0)]);
        assert!(bb.contains(vec2(0.0, 1.0)));
        assert!(!bb.contains(vec2(5.0, 1.0)));
        assert_eq!(bb.min, vec2(-1.0, 0.0));
        assert_eq!(bb.max, vec2(4.0, 3.0));
    }

    #[test]
    fn empty_aabb_unions_as_identity() {
        let bb = Aabb::of_points([vec2(1.0, 1.0)]);
        assert_eq!(Aabb::EMPTY.union(bb), bb);
        assert!(Aabb::EMPTY.is_empty());
    }
}
