//! Block grid: a sparse, cache-friendly spatial hash over the level.
//!
//! * One cell covers 128×128 map units.
//! * Cells keep `SmallVec` lists per entity kind; levels rarely have more
//!   than a handful of walls or objects per block, so lookups stay
//!   allocation-free in the common case.
//!
//! The grid is **write-through**: every insert records the covered cells in
//! a reverse map, so removal needs no geometry and works even after the
//! entity itself moved or died.

use std::collections::HashMap;

use glam::Vec2;
use smallvec::SmallVec;

use crate::topo::{Aabb, ObjectId, SectorId, SubsectorId, WallId};

/// log2 of the cell size in map units.
pub const BLOCK_SHIFT: i32 = 7;
pub const BLOCK_SIZE: f32 = (1 << BLOCK_SHIFT) as f32;

/// Step ceiling for [`BlockGrid::walk_segment`]; degenerate geometry
/// terminates instead of scanning forever.
const MAX_WALK_STEPS: u32 = 1024;

pub type BlockCoord = (i32, i32);

#[derive(Default, Clone)]
pub struct Cell {
    pub walls: SmallVec<[WallId; 8]>,
    pub sectors: SmallVec<[SectorId; 4]>,
    pub subsectors: SmallVec<[SubsectorId; 8]>,
    pub objects: SmallVec<[ObjectId; 4]>,
}

type CellList = SmallVec<[BlockCoord; 8]>;

pub struct BlockGrid {
    cells: HashMap<BlockCoord, Cell>,
    wall_cells: HashMap<WallId, CellList>,
    sector_cells: HashMap<SectorId, CellList>,
    subsector_cells: HashMap<SubsectorId, CellList>,
    object_cells: HashMap<ObjectId, CellList>,
}

/// World coordinate → block coordinate.
#[inline]
pub fn block_at(p: Vec2) -> BlockCoord {
    (
        (p.x / BLOCK_SIZE).floor() as i32,
        (p.y / BLOCK_SIZE).floor() as i32,
    )
}

impl Default for BlockGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockGrid {
    pub fn new() -> Self {
        Self {
            cells: HashMap::new(),
            wall_cells: HashMap::new(),
            sector_cells: HashMap::new(),
            subsector_cells: HashMap::new(),
            object_cells: HashMap::new(),
        }
    }

    #[inline]
    pub fn cell(&self, at: BlockCoord) -> Option<&Cell> {
        self.cells.get(&at)
    }

    /*───────────────────────── inserts / removes ─────────────────────────*/

    pub fn insert_wall(&mut self, id: WallId, a: Vec2, b: Vec2) {
        let mut covered = CellList::new();
        self.walk_segment(a, b, |at| {
            covered.push(at);
            true
        });
        for &at in &covered {
            self.cells.entry(at).or_default().walls.push(id);
        }
        self.wall_cells.insert(id, covered);
    }

    pub fn remove_wall(&mut self, id: WallId) {
        if let Some(covered) = self.wall_cells.remove(&id) {
            self.retire(&covered, |c| {
                if let Some(i) = c.walls.iter().position(|x| *x == id) {
                    c.walls.swap_remove(i);
                }
            });
        }
    }

    pub fn insert_sector(&mut self, id: SectorId, bbox: Aabb) {
        let covered = self.cover_bbox(bbox);
        for &at in &covered {
            self.cells.entry(at).or_default().sectors.push(id);
        }
        self.sector_cells.insert(id, covered);
    }

    pub fn remove_sector(&mut self, id: SectorId) {
        if let Some(covered) = self.sector_cells.remove(&id) {
            self.retire(&covered, |c| {
                if let Some(i) = c.sectors.iter().position(|x| *x == id) {
                    c.sectors.swap_remove(i);
                }
            });
        }
    }

    pub fn insert_subsector(&mut self, id: SubsectorId, bbox: Aabb) {
        let covered = self.cover_bbox(bbox);
        for &at in &covered {
            self.cells.entry(at).or_default().subsectors.push(id);
        }
        self.subsector_cells.insert(id, covered);
    }

    pub fn remove_subsector(&mut self, id: SubsectorId) {
        if let Some(covered) = self.subsector_cells.remove(&id) {
            self.retire(&covered, |c| {
                if let Some(i) = c.subsectors.iter().position(|x| *x == id) {
                    c.subsectors.swap_remove(i);
                }
            });
        }
    }

    pub fn insert_object(&mut self, id: ObjectId, pos: Vec2, radius: f32) {
        let bbox = Aabb {
            min: pos - Vec2::splat(radius),
            max: pos + Vec2::splat(radius),
        };
        let covered = self.cover_bbox(bbox);
        for &at in &covered {
            self.cells.entry(at).or_default().objects.push(id);
        }
        self.object_cells.insert(id, covered);
    }

    pub fn remove_object(&mut self, id: ObjectId) {
        if let Some(covered) = self.object_cells.remove(&id) {
            self.retire(&covered, |c| {
                if let Some(i) = c.objects.iter().position(|x| *x == id) {
                    c.objects.swap_remove(i);
                }
            });
        }
    }

    fn retire(&mut self, covered: &[BlockCoord], mut strip: impl FnMut(&mut Cell)) {
        for at in covered {
            if let Some(cell) = self.cells.get_mut(at) {
                strip(cell);
                let empty = cell.walls.is_empty()
                    && cell.sectors.is_empty()
                    && cell.subsectors.is_empty()
                    && cell.objects.is_empty();
                if empty {
                    self.cells.remove(at);
                }
            }
        }
    }

    fn cover_bbox(&self, bbox: Aabb) -> CellList {
        let mut covered = CellList::new();
        if bbox.is_empty() {
            return covered;
        }
        let (x0, y0) = block_at(bbox.min);
        let (x1, y1) = block_at(bbox.max);
        for by in y0..=y1 {
            for bx in x0..=x1 {
                covered.push((bx, by));
            }
        }
        covered
    }

    /*─────────────────────────── traversal ───────────────────────────────*/

    /// Visit every cell whose block the box overlaps.
    /// Iteration stops early when `f` returns `false`.
    pub fn for_each_cell_in_bbox<F>(&self, bbox: Aabb, mut f: F) -> bool
    where
        F: FnMut(BlockCoord, &Cell) -> bool,
    {
        if bbox.is_empty() {
            return true;
        }
        let (x0, y0) = block_at(bbox.min);
        let (x1, y1) = block_at(bbox.max);
        for by in y0..=y1 {
            for bx in x0..=x1 {
                if let Some(cell) = self.cells.get(&(bx, by)) {
                    if !f((bx, by), cell) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Visit each *unique* wall whose cells the box touches.
    pub fn for_each_wall_in_bbox<F>(&self, bbox: Aabb, mut f: F) -> bool
    where
        F: FnMut(WallId) -> bool,
    {
        let mut seen: SmallVec<[WallId; 16]> = SmallVec::new();
        self.for_each_cell_in_bbox(bbox, |_, cell| {
            for &w in &cell.walls {
                if seen.contains(&w) {
                    continue;
                }
                seen.push(w);
                if !f(w) {
                    return false;
                }
            }
            true
        })
    }

    /// DDA walk over the block coordinates a segment crosses, in order from
    /// `a` to `b`. The visitor gets each block coordinate whether or not a
    /// cell is allocated there; return `false` to stop.
    pub fn walk_segment<F>(&self, a: Vec2, b: Vec2, mut f: F) -> bool
    where
        F: FnMut(BlockCoord) -> bool,
    {
        let (mut bx, mut by) = block_at(a);
        let (tx, ty) = block_at(b);
        let d = b - a;
        let step_x: i32 = if d.x > 0.0 { 1 } else { -1 };
        let step_y: i32 = if d.y > 0.0 { 1 } else { -1 };

        // parametric distance to the next vertical / horizontal block line
        let next_boundary = |coord: i32, step: i32| -> f32 {
            let edge = if step > 0 { coord + 1 } else { coord };
            edge as f32 * BLOCK_SIZE
        };
        // axis-aligned segments never cross the other axis; an explicit
        // infinity avoids the NaN from `0.0 * INFINITY` when the start sits
        // exactly on a block line
        let (mut t_max_x, t_delta_x) = if d.x != 0.0 {
            let inv = 1.0 / d.x;
            ((next_boundary(bx, step_x) - a.x) * inv, (BLOCK_SIZE * inv).abs())
        } else {
            (f32::INFINITY, f32::INFINITY)
        };
        let (mut t_max_y, t_delta_y) = if d.y != 0.0 {
            let inv = 1.0 / d.y;
            ((next_boundary(by, step_y) - a.y) * inv, (BLOCK_SIZE * inv).abs())
        } else {
            (f32::INFINITY, f32::INFINITY)
        };

        for _ in 0..MAX_WALK_STEPS {
            if !f((bx, by)) {
                return false;
            }
            if bx == tx && by == ty {
                return true;
            }
            if t_max_x < t_max_y {
                t_max_x += t_delta_x;
                bx += step_x;
            } else {
                t_max_y += t_delta_y;
                by += step_y;
            }
        }
        // ran into the step ceiling: give up rather than loop forever
        true
    }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
