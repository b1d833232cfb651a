//! Topology store and mutation API.
//!
//! [`Level`] owns the vertex/wall/side/sector pools, the movable objects,
//! the block grid, the subsector store and the visibility matrix.
//!
//! Mutations never recalculate anything inline. Every edit enqueues the
//! touched entities on a typed worklist; [`Level::commit`] then runs one
//! ordered pass (vertices → walls → sides → sectors → visibility) over it.
//! Outside a [`Level::begin_batch`]/[`Level::end_batch`] pair each public
//! mutation commits immediately, so callers always observe a fully
//! consistent model between independent edits.

use glam::Vec2;
use log::{debug, warn};

use crate::grid::BlockGrid;
use crate::tess::{self, TessError};
use crate::tess::convex::{SegLine, Subsector, Subsectors};
use crate::topo::coherence;
use crate::topo::geometry::*;
use crate::topo::pool::Pool;
use crate::vis::{self, VisMatrix};

/// Ceiling on cascading commit passes. A level that still produces dirty
/// entities after this many passes has oscillating topology; the commit
/// stops with a warning instead of spinning.
const MAX_COMMIT_PASSES: u32 = 32;

#[derive(Default)]
struct Worklist {
    verts: Vec<VertexId>,
    walls: Vec<WallId>,
    sides: Vec<SideId>,
    sectors: Vec<SectorId>,
}

impl Worklist {
    fn any(&self) -> bool {
        !self.verts.is_empty()
            || !self.walls.is_empty()
            || !self.sides.is_empty()
            || !self.sectors.is_empty()
    }
}

fn push_unique<T: PartialEq + Copy>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

pub struct Level {
    pub verts: Pool<Vertex>,
    pub walls: Pool<Wall>,
    pub sides: Pool<Side>,
    pub sectors: Pool<Sector>,
    pub objects: Pool<Object>,
    pub subsectors: Subsectors,
    pub grid: BlockGrid,
    pub vis: VisMatrix,
    /// Bumped once per committed edit chain.
    pub version: u64,
    /// Process-unique identity; renderers key cached residency on it.
    uid: u64,

    dirty: Worklist,
    vis_dirty: Vec<SectorId>,
    batch_depth: u32,
    committing: bool,
}

impl Default for Level {
    fn default() -> Self {
        Self::new()
    }
}

impl Level {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_UID: AtomicU64 = AtomicU64::new(1);
        Self {
            verts: Pool::new(),
            walls: Pool::new(),
            sides: Pool::new(),
            sectors: Pool::new(),
            objects: Pool::new(),
            subsectors: Subsectors::new(),
            grid: BlockGrid::new(),
            vis: VisMatrix::new(),
            version: 0,
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            dirty: Worklist::default(),
            vis_dirty: Vec::new(),
            batch_depth: 0,
            committing: false,
        }
    }

    /// Process-unique level identity; changes on every construction
    /// (loads included), never on edits.
    #[inline]
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /*────────────────────── derived geometry helpers ─────────────────────*/

    #[inline]
    pub fn point(&self, v: VertexId) -> Vec2 {
        self.verts.get(v).expect("stale vertex handle").pos
    }

    /// Start vertex of a side: face 0 runs `v0 → v1`, face 1 the reverse.
    #[inline]
    pub fn side_from(&self, s: SideId) -> VertexId {
        let side = self.sides.get(s).expect("stale side handle");
        let wall = self.walls.get(side.wall).expect("side wall must be live");
        wall.v[side.index as usize]
    }

    #[inline]
    pub fn side_to(&self, s: SideId) -> VertexId {
        let side = self.sides.get(s).expect("stale side handle");
        let wall = self.walls.get(side.wall).expect("side wall must be live");
        wall.v[1 - side.index as usize]
    }

    /// Directed segment of a side, start → end.
    #[inline]
    pub fn side_seg(&self, s: SideId) -> (Vec2, Vec2) {
        (self.point(self.side_from(s)), self.point(self.side_to(s)))
    }

    #[inline]
    pub fn side_dir(&self, s: SideId) -> Vec2 {
        let (a, b) = self.side_seg(s);
        (b - a).normalize_or_zero()
    }

    /// Normal pointing into the area the side faces (left of its direction).
    #[inline]
    pub fn side_normal(&self, s: SideId) -> Vec2 {
        let d = self.side_dir(s);
        Vec2::new(-d.y, d.x)
    }

    #[inline]
    pub fn side_midpoint(&self, s: SideId) -> Vec2 {
        let (a, b) = self.side_seg(s);
        (a + b) * 0.5
    }

    /// Facing angle of the side's normal, radians.
    #[inline]
    pub fn side_angle(&self, s: SideId) -> f32 {
        let n = self.side_normal(s);
        n.y.atan2(n.x)
    }

    /// The opposite face of the same wall, if it exists.
    pub fn side_other(&self, s: SideId) -> Option<SideId> {
        let side = self.sides.get(s)?;
        let wall = self.walls.get(side.wall)?;
        wall.sides[1 - side.index as usize]
    }

    /// Portal destination, ignoring one-directional (disconnected) links.
    pub fn portal_target(&self, s: SideId) -> Option<SideId> {
        let side = self.sides.get(s)?;
        if side.flags.contains(SideFlags::DISCONNECTED) {
            return None;
        }
        side.portal.filter(|p| self.sides.contains(*p))
    }

    #[inline]
    pub fn wall_vec(&self, w: WallId) -> Vec2 {
        let wall = self.walls.get(w).expect("stale wall handle");
        self.point(wall.v[1]) - self.point(wall.v[0])
    }

    #[inline]
    pub fn wall_length(&self, w: WallId) -> f32 {
        self.wall_vec(w).length()
    }

    #[inline]
    pub fn wall_tangent(&self, w: WallId) -> Vec2 {
        self.wall_vec(w).normalize_or_zero()
    }

    /// Left-hand normal of `v0 → v1` (the front side's facing).
    #[inline]
    pub fn wall_normal(&self, w: WallId) -> Vec2 {
        let t = self.wall_tangent(w);
        Vec2::new(-t.y, t.x)
    }

    /*───────────────────────── batching / commit ─────────────────────────*/

    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    pub fn end_batch(&mut self) {
        assert!(self.batch_depth > 0, "end_batch without begin_batch");
        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            self.commit();
        }
    }

    fn maybe_commit(&mut self) {
        if self.batch_depth == 0 && !self.committing {
            self.commit();
        }
    }

    /// Drain the worklist in dependency order. Runs to a fixpoint because
    /// coherence maintenance may structurally edit sectors mid-pass.
    /// Structural edits made *by* the pass land back on the worklist rather
    /// than recursing, so the pass never re-enters itself.
    pub fn commit(&mut self) {
        if self.committing {
            return;
        }
        self.committing = true;
        let mut passes = 0;
        while self.dirty.any() {
            passes += 1;
            if passes > MAX_COMMIT_PASSES {
                warn!("commit did not settle after {MAX_COMMIT_PASSES} passes; giving up");
                self.dirty = Worklist::default();
                break;
            }

            /* 1 ─ vertices: invalidate incident walls */
            for v in std::mem::take(&mut self.dirty.verts) {
                let Some(vert) = self.verts.get_mut(v) else {
                    continue;
                };
                vert.version += 1;
                let incident: Vec<WallId> = vert.walls.iter().copied().collect();
                for w in incident {
                    push_unique(&mut self.dirty.walls, w);
                }
            }

            /* 2 ─ walls: refresh grid entry, re-clamp decals, touch sides */
            for w in std::mem::take(&mut self.dirty.walls) {
                if !self.walls.contains(w) {
                    continue;
                }
                let (a, b) = {
                    let wall = self.walls.get(w).unwrap();
                    (self.point(wall.v[0]), self.point(wall.v[1]))
                };
                self.grid.remove_wall(w);
                self.grid.insert_wall(w, a, b);
                let len = (b - a).length();

                let wall = self.walls.get_mut(w).unwrap();
                wall.version += 1;
                let sides: Vec<SideId> = wall.sides.iter().flatten().copied().collect();
                for s in sides {
                    if let Some(side) = self.sides.get_mut(s) {
                        for decal in &mut side.decals {
                            decal.along = decal.along.clamp(0.0, len);
                        }
                    }
                    push_unique(&mut self.dirty.sides, s);
                }
            }

            /* 3 ─ sides: coherence maintenance (may edit sectors) */
            for s in std::mem::take(&mut self.dirty.sides) {
                if !self.sides.contains(s) {
                    continue;
                }
                self.sides.get_mut(s).unwrap().version += 1;
                coherence::update_side_sector(self, s);
            }

            /* 4 ─ sectors: retrace, retessellate, relink */
            for sec in std::mem::take(&mut self.dirty.sectors) {
                self.recalc_sector(sec);
            }
        }

        /* 5 ─ visibility rows, once per affected sector */
        for sec in std::mem::take(&mut self.vis_dirty) {
            let Some(slot) = self.sectors.get(sec).map(|_| sec.index()) else {
                continue;
            };
            let row = vis::visible_row(self, sec);
            self.vis.set_row(slot, &row);
        }

        self.version += 1;
        self.committing = false;
    }

    /*──────────────────────────── vertices ───────────────────────────────*/

    pub fn add_vertex(&mut self, pos: Vec2) -> VertexId {
        let id = self.verts.insert(Vertex::new(pos));
        self.dirty.verts.push(id);
        self.maybe_commit();
        id
    }

    pub fn move_vertex(&mut self, v: VertexId, pos: Vec2) {
        let Some(vert) = self.verts.get_mut(v) else {
            return;
        };
        vert.pos = pos;
        push_unique(&mut self.dirty.verts, v);
        self.maybe_commit();
    }

    /// Deleting a vertex deletes every incident wall (and their sides).
    pub fn remove_vertex(&mut self, v: VertexId) {
        let Some(vert) = self.verts.get(v) else {
            return;
        };
        let incident: Vec<WallId> = vert.walls.iter().copied().collect();
        self.begin_batch();
        for w in incident {
            self.remove_wall(w);
        }
        self.verts.remove(v);
        self.end_batch();
    }

    /*────────────────────────────── walls ────────────────────────────────*/

    pub fn add_wall(&mut self, v0: VertexId, v1: VertexId) -> WallId {
        assert!(self.verts.contains(v0) && self.verts.contains(v1));
        let id = self.walls.insert(Wall::new(v0, v1));
        self.verts.get_mut(v0).unwrap().walls.push(id);
        self.verts.get_mut(v1).unwrap().walls.push(id);
        self.dirty.walls.push(id);
        self.maybe_commit();
        id
    }

    /// Re-anchor one wall endpoint on a different vertex.
    pub fn set_wall_vertex(&mut self, w: WallId, end: usize, v: VertexId) {
        assert!(end < 2);
        let Some(wall) = self.walls.get(w) else {
            return;
        };
        let old = wall.v[end];
        if old == v {
            return;
        }
        assert!(self.verts.contains(v));
        if let Some(vert) = self.verts.get_mut(old) {
            vert.walls.retain(|x| *x != w);
        }
        self.verts.get_mut(v).unwrap().walls.push(w);
        self.walls.get_mut(w).unwrap().v[end] = v;
        push_unique(&mut self.dirty.walls, w);
        self.maybe_commit();
    }

    /// Deleting a wall deletes its sides.
    pub fn remove_wall(&mut self, w: WallId) {
        let Some(wall) = self.walls.get(w) else {
            return;
        };
        let sides: Vec<SideId> = wall.sides.iter().flatten().copied().collect();
        let ends = wall.v;
        self.begin_batch();
        for s in sides {
            self.remove_side(s);
        }
        for end in ends {
            if let Some(vert) = self.verts.get_mut(end) {
                vert.walls.retain(|x| *x != w);
            }
        }
        self.grid.remove_wall(w);
        self.walls.remove(w);
        self.dirty.walls.retain(|x| *x != w);
        self.end_batch();
    }

    /*────────────────────────────── sides ────────────────────────────────*/

    /// Create face `index` of `wall`. `None` if that face already exists.
    pub fn add_side(&mut self, wall: WallId, index: u8) -> Option<SideId> {
        assert!(index < 2);
        let w = self.walls.get(wall)?;
        if w.sides[index as usize].is_some() {
            return None;
        }
        let id = self.sides.insert(Side::new(wall, index));
        self.walls.get_mut(wall).unwrap().sides[index as usize] = Some(id);
        self.dirty.sides.push(id);
        self.maybe_commit();
        Some(id)
    }

    pub fn remove_side(&mut self, s: SideId) {
        let Some(side) = self.sides.get(s) else {
            return;
        };
        let wall = side.wall;
        let index = side.index as usize;
        let sector = side.sector;

        self.begin_batch();

        // clear inbound portal links (one-directional ones included)
        let inbound: Vec<SideId> = self
            .sides
            .iter()
            .filter(|(h, sd)| *h != s && sd.portal == Some(s))
            .map(|(h, _)| h)
            .collect();
        for other in inbound {
            let sd = self.sides.get_mut(other).unwrap();
            sd.portal = None;
            sd.flags.remove(SideFlags::DISCONNECTED);
            if let Some(sec) = sd.sector {
                push_unique(&mut self.dirty.sectors, sec);
            }
        }

        if let Some(wall) = self.walls.get_mut(wall) {
            wall.sides[index] = None;
        }
        self.sides.remove(s);
        self.dirty.sides.retain(|x| *x != s);

        if let Some(sec) = sector {
            let now_empty = match self.sectors.get_mut(sec) {
                Some(sector) => {
                    sector.sides.retain(|x| *x != s);
                    sector.sides.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.remove_sector(sec);
            } else if self.sectors.contains(sec) {
                // a survivor has to re-run coherence: the boundary may no
                // longer close, or may now close around a larger loop
                let survivor = self.sectors.get(sec).unwrap().sides[0];
                push_unique(&mut self.dirty.sides, survivor);
                push_unique(&mut self.dirty.sectors, sec);
            }
        }

        self.end_batch();
    }

    /// Link (or unlink) a side's portal. The link becomes bidirectional when
    /// the target links back; otherwise it is flagged disconnected.
    pub fn set_side_portal(&mut self, s: SideId, target: Option<SideId>) {
        if !self.sides.contains(s) {
            return;
        }
        if let Some(t) = target {
            assert!(self.sides.contains(t), "portal target must be live");
            assert_ne!(s, t, "side cannot portal to itself");
        }

        self.begin_batch();
        let previous = self.sides.get(s).unwrap().portal;
        self.sides.get_mut(s).unwrap().portal = target;
        self.refresh_portal_flags(s);
        if let Some(t) = target {
            self.refresh_portal_flags(t);
        }
        // the old partner is no longer mutual
        if let Some(p) = previous.filter(|p| Some(*p) != target) {
            self.refresh_portal_flags(p);
        }
        push_unique(&mut self.dirty.sides, s);
        self.end_batch();
    }

    fn refresh_portal_flags(&mut self, s: SideId) {
        let Some(side) = self.sides.get(s) else {
            return;
        };
        let mutual = side
            .portal
            .and_then(|p| self.sides.get(p))
            .is_some_and(|p| p.portal == Some(s));
        let sector = side.sector;
        let side = self.sides.get_mut(s).unwrap();
        if side.portal.is_some() && !mutual {
            side.flags.insert(SideFlags::DISCONNECTED);
        } else {
            side.flags.remove(SideFlags::DISCONNECTED);
        }
        if let Some(sec) = sector {
            push_unique(&mut self.dirty.sectors, sec);
        }
    }

    /// Re-derive which sector the side belongs to, now.
    pub fn update_side_sector(&mut self, s: SideId) {
        push_unique(&mut self.dirty.sides, s);
        self.maybe_commit();
    }

    /*───────────────────────────── sectors ───────────────────────────────*/

    /// Build a sector over `sides` (trace order). Used by coherence repair
    /// and the loader; the editor normally goes through `update_side_sector`.
    pub fn new_sector_from_sides(
        &mut self,
        sides: &[SideId],
        floor_h: f32,
        ceil_h: f32,
    ) -> SectorId {
        let id = self.sectors.insert(Sector::new(floor_h, ceil_h));
        for &s in sides {
            self.attach_side(id, s);
        }
        self.vis.ensure_slots(self.sectors.slot_count());
        push_unique(&mut self.dirty.sectors, id);
        self.maybe_commit();
        id
    }

    /// Assign or clear a side's owning sector directly. Coherence is not
    /// re-run; editors that want the boundary re-derived use
    /// [`update_side_sector`](Self::update_side_sector) instead.
    pub fn set_side_sector(&mut self, s: SideId, sec: Option<SectorId>) {
        if !self.sides.contains(s) {
            return;
        }
        match sec {
            Some(sec) => {
                assert!(self.sectors.contains(sec), "sector must be live");
                self.attach_side(sec, s);
            }
            None => {
                let Some(prev) = self.sides.get(s).unwrap().sector else {
                    return;
                };
                self.sides.get_mut(s).unwrap().sector = None;
                let now_empty = match self.sectors.get_mut(prev) {
                    Some(old) => {
                        old.sides.retain(|x| *x != s);
                        old.sides.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.remove_sector(prev);
                } else if self.sectors.contains(prev) {
                    push_unique(&mut self.dirty.sectors, prev);
                }
            }
        }
        self.maybe_commit();
    }

    /// Attach `s` to sector `sec`, detaching it from its previous owner.
    pub(crate) fn attach_side(&mut self, sec: SectorId, s: SideId) {
        let prev = self.sides.get(s).and_then(|sd| sd.sector);
        if prev == Some(sec) {
            return;
        }
        if let Some(p) = prev {
            let now_empty = match self.sectors.get_mut(p) {
                Some(old) => {
                    old.sides.retain(|x| *x != s);
                    old.sides.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.remove_sector(p);
            } else if self.sectors.contains(p) {
                push_unique(&mut self.dirty.sectors, p);
            }
        }
        self.sides.get_mut(s).unwrap().sector = Some(sec);
        self.sectors.get_mut(sec).unwrap().sides.push(s);
        push_unique(&mut self.dirty.sectors, sec);
    }

    /// Delete a sector, leaving its sides sector-less. The sides are *not*
    /// re-run through coherence here; callers that want the area rebuilt
    /// enqueue them explicitly.
    pub fn remove_sector(&mut self, sec: SectorId) {
        let Some(sector) = self.sectors.get(sec) else {
            return;
        };
        let sides = sector.sides.clone();
        let subs = sector.subs.clone();
        for s in sides {
            if let Some(side) = self.sides.get_mut(s) {
                side.sector = None;
            }
        }
        for id in subs {
            self.free_subsector(id);
        }
        self.grid.remove_sector(sec);
        self.vis.clear_row(sec.index());
        self.vis.clear_column(sec.index());
        self.sectors.remove(sec);
        self.dirty.sectors.retain(|x| *x != sec);
        self.vis_dirty.retain(|x| *x != sec);
    }

    /// Request a full recalculation (retrace, retessellate, revisibility).
    pub fn sector_recalculate(&mut self, sec: SectorId) {
        push_unique(&mut self.dirty.sectors, sec);
        self.maybe_commit();
    }

    pub(crate) fn mark_sector_dirty(&mut self, sec: SectorId) {
        push_unique(&mut self.dirty.sectors, sec);
    }

    pub(crate) fn mark_side_dirty(&mut self, s: SideId) {
        push_unique(&mut self.dirty.sides, s);
    }

    fn free_subsector(&mut self, id: SubsectorId) {
        // drop backlinks from neighbors before releasing the slot
        let neighbors: Vec<SubsectorId> = self
            .subsectors
            .get(id)
            .map(|s| s.neighbors.iter().map(|n| n.sub).collect())
            .unwrap_or_default();
        for n in neighbors {
            if let Some(nb) = self.subsectors.get_mut(n) {
                nb.neighbors.retain(|x| x.sub != id);
            }
        }
        self.grid.remove_subsector(id);
        self.subsectors.free(id);
    }

    /// Retrace + retessellate one sector. On tessellation failure the
    /// previous mesh stays in place and a warning is logged.
    fn recalc_sector(&mut self, sec: SectorId) {
        if !self.sectors.contains(sec) {
            return;
        }
        debug!("recalc sector {sec:?}");

        /* canonical side order + boundary bbox */
        match tess::sort_into_traces(self, sec) {
            Ok(traces) => {
                let ordered: Vec<SideId> = traces.into_iter().flatten().collect();
                self.sectors.get_mut(sec).unwrap().sides = ordered;
            }
            Err(e) => {
                warn!("sector {sec:?}: sides no longer trace ({e}); keeping previous order");
            }
        }

        let bbox = {
            let sector = self.sectors.get(sec).unwrap();
            let mut bb = Aabb::EMPTY;
            for &s in &sector.sides {
                let (a, b) = self.side_seg(s);
                bb.add_point(a);
                bb.add_point(b);
            }
            bb
        };

        /* surface */
        match tess::tessellate_sector(self, sec) {
            Ok(t) => {
                let old_subs = self.sectors.get(sec).unwrap().subs.clone();
                for id in old_subs {
                    self.free_subsector(id);
                }
                let mut subs = Vec::with_capacity(t.polys.len());
                for poly in &t.polys {
                    let lines: Vec<SegLine> = poly
                        .iter()
                        .zip(poly.iter().cycle().skip(1))
                        .map(|(a, b)| SegLine { a: *a, b: *b })
                        .collect();
                    let sub_bbox = Aabb::of_points(poly.iter().copied());
                    let id = self.subsectors.alloc(Subsector {
                        sector: sec,
                        bbox: sub_bbox,
                        lines,
                        neighbors: Vec::new(),
                        version: 0,
                    });
                    self.grid.insert_subsector(id, sub_bbox);
                    subs.push(id);
                }
                let sector = self.sectors.get_mut(sec).unwrap();
                sector.tris = t.tris;
                sector.subs = subs;
            }
            Err(TessError::NoSides) => {
                let sector = self.sectors.get_mut(sec).unwrap();
                sector.tris.clear();
                let old = std::mem::take(&mut sector.subs);
                for id in old {
                    self.free_subsector(id);
                }
            }
            Err(e) => {
                warn!("sector {sec:?}: tessellation failed ({e}); keeping previous mesh");
            }
        }

        /* grid + portal neighbors */
        self.grid.remove_sector(sec);
        if !bbox.is_empty() {
            self.grid.insert_sector(sec, bbox);
        }

        let neighbors = {
            let sector = self.sectors.get(sec).unwrap();
            let mut out: smallvec::SmallVec<[SectorId; 4]> = smallvec::SmallVec::new();
            for &s in &sector.sides {
                if let Some(other) = self.portal_target(s) {
                    if let Some(other_sec) = self.sides.get(other).and_then(|sd| sd.sector) {
                        if other_sec != sec && !out.contains(&other_sec) {
                            out.push(other_sec);
                        }
                    }
                }
            }
            out
        };

        {
            let sector = self.sectors.get_mut(sec).unwrap();
            sector.bbox = bbox;
            sector.neighbors = neighbors;
            sector.version += 1;
        }

        vis::link_sector_subs(self, sec);
        self.vis.ensure_slots(self.sectors.slot_count());
        push_unique(&mut self.vis_dirty, sec);
        // a retessellated sector changes what its portal neighbors can see
        let neighbor_ids: Vec<SectorId> = self.sectors.get(sec).unwrap().neighbors.to_vec();
        for n in neighbor_ids {
            push_unique(&mut self.vis_dirty, n);
        }
        // and what every sector that could reach it can see: a portal edit
        // here extends or cuts sightlines arbitrarily far upstream, so any
        // stored row holding this sector's bit is suspect
        let slot = sec.index();
        let watchers: Vec<SectorId> = self
            .sectors
            .iter()
            .filter(|&(h, _)| h != sec && self.vis.get(h.index(), slot))
            .map(|(h, _)| h)
            .collect();
        for n in watchers {
            push_unique(&mut self.vis_dirty, n);
        }
    }

    /*───────────────────────────── objects ───────────────────────────────*/

    pub fn add_object(&mut self, pos: Vec2, type_id: u16) -> ObjectId {
        let mut obj = Object::new(pos, type_id);
        obj.sector = crate::query::sector_at_point(self, pos);
        let radius = obj.radius;
        let id = self.objects.insert(obj);
        self.grid.insert_object(id, pos, radius);
        id
    }

    pub fn move_object(&mut self, id: ObjectId, pos: Vec2) {
        let Some(obj) = self.objects.get(id) else {
            return;
        };
        let radius = obj.radius;
        self.grid.remove_object(id);
        self.grid.insert_object(id, pos, radius);
        let sector = crate::query::sector_at_point(self, pos);
        let obj = self.objects.get_mut(id).unwrap();
        obj.pos = pos;
        obj.sector = sector;
        obj.version += 1;
    }

    pub fn remove_object(&mut self, id: ObjectId) {
        if self.objects.remove(id).is_some() {
            self.grid.remove_object(id);
        }
    }

    /*──────────────────────── consistency checking ───────────────────────*/

    /// Fatal-assertion sweep over all back-references. Programming errors
    /// only; recoverable topology states (sector-less sides etc.) pass.
    pub fn assert_consistent(&self) {
        for (h, side) in self.sides.iter() {
            let wall = self.walls.get(side.wall).expect("side references dead wall");
            assert_eq!(
                wall.sides[side.index as usize],
                Some(h),
                "wall does not reference its side back"
            );
            if let Some(sec) = side.sector {
                let sector = self.sectors.get(sec).expect("side references dead sector");
                assert!(
                    sector.sides.contains(&h),
                    "sector does not list its side back"
                );
            }
        }
        for (h, wall) in self.walls.iter() {
            for v in wall.v {
                let vert = self.verts.get(v).expect("wall references dead vertex");
                assert!(vert.walls.contains(&h), "vertex does not list its wall");
            }
        }
        for (h, sector) in self.sectors.iter() {
            for &s in &sector.sides {
                let side = self.sides.get(s).expect("sector lists dead side");
                assert_eq!(side.sector, Some(h), "listed side disowns its sector");
            }
        }
    }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
pub mod tests {
    use super::*;
    use glam::vec2;

    /// 64×64 axis-aligned quad with four front sides and no sector.
    /// Walls run CCW, so the front faces point into the square.
    pub fn quad_sides() -> (Level, Vec<SideId>) {
        quad_sides_at(vec2(0.0, 0.0), 64.0)
    }

    pub fn quad_sides_at(origin: Vec2, size: f32) -> (Level, Vec<SideId>) {
        let mut level = Level::new();
        level.begin_batch();
        let vs = [
            level.add_vertex(origin),
            level.add_vertex(origin + vec2(size, 0.0)),
            level.add_vertex(origin + vec2(size, size)),
            level.add_vertex(origin + vec2(0.0, size)),
        ];
        let mut sides = Vec::new();
        for i in 0..4 {
            let w = level.add_wall(vs[i], vs[(i + 1) % 4]);
            sides.push(level.add_side(w, 0).unwrap());
        }
        level.end_batch();
        (level, sides)
    }

    /// Quad with a sector built over it.
    pub fn quad_sector() -> (Level, SectorId) {
        let (mut level, sides) = quad_sides();
        level.update_side_sector(sides[0]);
        let sec = level.sides.get(sides[0]).unwrap().sector.expect("sector");
        (level, sec)
    }

    /// Two 64×64 rooms sharing the `x = 64` boundary, joined by a mutual
    /// portal. Returns the sectors and the two portal sides (left room's
    /// east side, right room's west side).
    pub fn two_rooms() -> (Level, [SectorId; 2], [SideId; 2]) {
        let mut level = Level::new();
        level.begin_batch();
        let mut quad = |origin: Vec2| -> Vec<SideId> {
            let vs = [
                level.add_vertex(origin),
                level.add_vertex(origin + vec2(64.0, 0.0)),
                level.add_vertex(origin + vec2(64.0, 64.0)),
                level.add_vertex(origin + vec2(0.0, 64.0)),
            ];
            (0..4)
                .map(|i| {
                    let w = level.add_wall(vs[i], vs[(i + 1) % 4]);
                    level.add_side(w, 0).unwrap()
                })
                .collect()
        };
        let a = quad(vec2(0.0, 0.0));
        let b = quad(vec2(64.0, 0.0));
        level.end_batch();

        level.update_side_sector(a[0]);
        level.update_side_sector(b[0]);
        let sa = level.sides.get(a[0]).unwrap().sector.expect("left sector");
        let sb = level.sides.get(b[0]).unwrap().sector.expect("right sector");

        // a[1] runs along x = 64 northbound, b[3] southbound
        level.set_side_portal(a[1], Some(b[3]));
        level.set_side_portal(b[3], Some(a[1]));
        (level, [sa, sb], [a[1], b[3]])
    }

    #[test]
    fn back_references_consistent_after_build() {
        let (level, _sec) = quad_sector();
        level.assert_consistent();
    }

    #[test]
    fn side_other_is_an_involution() {
        let (mut level, sides) = quad_sides();
        let wall = level.sides.get(sides[0]).unwrap().wall;
        let back = level.add_side(wall, 1).unwrap();
        assert_eq!(level.side_other(sides[0]), Some(back));
        assert_eq!(level.side_other(back), Some(sides[0]));
        for s in &sides[1..] {
            assert_eq!(level.side_other(*s), None);
        }
    }

    #[test]
    fn recalculate_is_idempotent() {
        let (mut level, sec) = quad_sector();
        level.sector_recalculate(sec);
        let tris1 = level.sectors.get(sec).unwrap().tris.clone();
        let subs1 = level.sectors.get(sec).unwrap().subs.clone();
        let lines1: Vec<_> = subs1
            .iter()
            .map(|id| level.subsectors.get(*id).unwrap().lines.clone())
            .collect();

        level.sector_recalculate(sec);
        let tris2 = level.sectors.get(sec).unwrap().tris.clone();
        let subs2 = level.sectors.get(sec).unwrap().subs.clone();
        let lines2: Vec<_> = subs2
            .iter()
            .map(|id| level.subsectors.get(*id).unwrap().lines.clone())
            .collect();

        assert_eq!(tris1, tris2);
        assert_eq!(subs1, subs2);
        assert_eq!(lines1, lines2);
    }

    #[test]
    fn vertex_delete_cascades_to_walls_and_sides() {
        let (mut level, sec) = quad_sector();
        let v0 = {
            let sector = level.sectors.get(sec).unwrap();
            level.side_from(sector.sides[0])
        };
        level.remove_vertex(v0);
        // two walls shared the vertex; their sides are gone with them
        assert_eq!(level.walls.len(), 2);
        assert_eq!(level.sides.len(), 2);
        level.assert_consistent();
    }

    #[test]
    fn trace_matches_sector_side_count() {
        let (level, sec) = quad_sector();
        let sector = level.sectors.get(sec).unwrap();
        let loop_ = crate::topo::trace::trace(&level, sector.sides[0]).unwrap();
        assert_eq!(loop_.len(), sector.sides.len());
        for s in &loop_ {
            assert_eq!(level.sides.get(*s).unwrap().sector, Some(sec));
        }
    }

    #[test]
    fn set_side_sector_moves_ownership() {
        let (mut level, sec) = quad_sector();
        let s0 = level.sectors.get(sec).unwrap().sides[0];
        level.set_side_sector(s0, None);
        assert_eq!(level.sides.get(s0).unwrap().sector, None);
        assert!(!level.sectors.get(sec).unwrap().sides.contains(&s0));

        level.set_side_sector(s0, Some(sec));
        assert_eq!(level.sides.get(s0).unwrap().sector, Some(sec));
        assert!(level.sectors.get(sec).unwrap().sides.contains(&s0));
        level.assert_consistent();
    }

    #[test]
    fn decals_reclamped_on_wall_resize() {
        let (mut level, sec) = quad_sector();
        let s0 = level.sectors.get(sec).unwrap().sides[0];
        level.sides.get_mut(s0).unwrap().decals.push(Decal {
            along: 60.0,
            height: 32.0,
            size: vec2(8.0, 8.0),
            tex: 0,
        });
        // shrink the quad's first wall by moving its far vertex inward
        let to = level.side_to(s0);
        let from_pos = level.point(level.side_from(s0));
        level.move_vertex(to, from_pos + vec2(32.0, 0.0));
        let along = level.sides.get(s0).unwrap().decals[0].along;
        assert!(along <= 32.0, "decal param not re-clamped: {along}");
    }
}
