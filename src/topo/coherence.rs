//! Sector-coherence maintenance.
//!
//! [`update_side_sector`] runs whenever a side's wall moved, its endpoints
//! moved or its portal link changed, and decides what sector (if any) the
//! side belongs to afterwards. In priority order:
//!
//! 1. retrace from the side; on failure the side's sector (if any) is
//!    deleted and the side left sector-less;
//! 2. a wall whose two faces now resolve to the same sector through
//!    *different* loops ("double side") triggers the one split repair the
//!    engine knows: two disjoint traces of the original sector become two
//!    sectors, anything else is flagged unrepairable;
//! 3. a clockwise loop enclosed by another sector migrates into it as an
//!    interior hole;
//! 4. a counter-clockwise loop of unowned sides becomes a brand new sector;
//! 5. otherwise the loop's sides are merged into the anchor sector (no-op
//!    when already coherent).

use glam::Vec2;
use log::{debug, warn};

use super::geometry::*;
use super::level::Level;
use super::trace;

/// How far off a side's midpoint the hole-containment probe sits.
const PROBE_OFFSET: f32 = 0.25;

/// Default plane heights for sectors synthesized out of thin air. Repaired
/// and migrated sectors inherit their heights instead.
const DEFAULT_FLOOR: f32 = 0.0;
const DEFAULT_CEIL: f32 = 128.0;

pub fn update_side_sector(level: &mut Level, s: SideId) {
    if !level.sides.contains(s) {
        return;
    }
    let current = level.sides.get(s).unwrap().sector;

    /* 1 ─ retrace */
    let loop_ = match trace::trace(level, s) {
        Ok(l) => l,
        Err(e) => {
            debug!("side {s:?}: trace failed ({e})");
            if let Some(sec) = current {
                warn!("sector {sec:?} no longer closes; deleting");
                let orphans: Vec<SideId> = level
                    .sectors
                    .get(sec)
                    .map(|x| x.sides.clone())
                    .unwrap_or_default();
                level.remove_sector(sec);
                // orphaned sides get their own coherence pass; most will
                // fail the same trace and simply stay sector-less
                for o in orphans {
                    if o != s {
                        level.mark_side_dirty(o);
                    }
                }
            }
            return;
        }
    };

    let anchor = loop_anchor(level, &loop_, current);

    /* 2 ─ double side */
    if let Some(sec) = anchor {
        if let Some((inside, outside)) = find_double_side(level, &loop_, sec) {
            if !try_split_double_side(level, sec, &loop_, outside) {
                warn!("double side on wall of {inside:?} is unrepairable");
                for x in [inside, outside] {
                    level.sides.get_mut(x).unwrap().flags |= SideFlags::UNREPAIRABLE;
                }
            }
            return;
        }
    }

    let area = loop_area(level, &loop_);

    /* 3 ─ interior hole of an existing sector */
    if area < 0.0 {
        if let Some(host) = find_hole_host(level, &loop_) {
            debug!("loop at {s:?} migrates into {host:?} as a hole");
            for &x in &loop_ {
                level.attach_side(host, x);
            }
            return;
        }
        // a clockwise loop with no host encloses nothing a sector could own
        if let Some(sec) = current {
            let owns_whole = level
                .sectors
                .get(sec)
                .is_some_and(|x| x.sides.len() == loop_.len());
            if owns_whole {
                warn!("sector {sec:?} has no outer boundary left; deleting");
                level.remove_sector(sec);
            }
        }
        return;
    }

    /* 4 ─ synthesize a new sector */
    if anchor.is_none() {
        let (floor_h, ceil_h) = inherited_heights(level, &loop_);
        let sec = level.new_sector_from_sides(&loop_, floor_h, ceil_h);
        debug!("synthesized sector {sec:?} over {} sides", loop_.len());
        return;
    }

    /* 5 ─ merge into the anchor (no-op when already coherent) */
    let anchor = anchor.unwrap();
    let coherent = loop_
        .iter()
        .all(|&x| level.sides.get(x).unwrap().sector == Some(anchor));
    if coherent {
        return;
    }
    debug!("merging {} sides into {anchor:?}", loop_.len());
    for &x in &loop_ {
        level.attach_side(anchor, x);
    }
}

/// The sector the traced loop "belongs to": the start side's own sector if
/// set, otherwise the first owned side on the loop.
fn loop_anchor(level: &Level, loop_: &[SideId], current: Option<SectorId>) -> Option<SectorId> {
    current.or_else(|| {
        loop_
            .iter()
            .find_map(|&x| level.sides.get(x).and_then(|sd| sd.sector))
    })
}

/// Signed area of the loop polygon: positive = CCW outer boundary,
/// negative = CW hole walk.
pub(crate) fn loop_area(level: &Level, loop_: &[SideId]) -> f32 {
    let mut sum = 0.0;
    for &s in loop_ {
        let (a, b) = level.side_seg(s);
        sum += a.x * b.y - b.x * a.y;
    }
    sum * 0.5
}

/// Even-odd containment against every side segment of `sec`. Works before
/// the sector has a valid tessellation, and holes cancel naturally.
pub(crate) fn point_in_sector_sides(level: &Level, sec: SectorId, p: Vec2) -> bool {
    let Some(sector) = level.sectors.get(sec) else {
        return false;
    };
    let mut inside = false;
    for &s in &sector.sides {
        let (a, b) = level.side_seg(s);
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if x > p.x {
                inside = !inside;
            }
        }
    }
    inside
}

/*──────────────────────────── double side ────────────────────────────*/

/// A wall with one face on the loop whose *other* face, not on the loop,
/// resolves to the same sector: the signature of a wall drawn across a
/// sector's interior.
fn find_double_side(
    level: &Level,
    loop_: &[SideId],
    sec: SectorId,
) -> Option<(SideId, SideId)> {
    for &x in loop_ {
        let Some(other) = level.side_other(x) else {
            continue;
        };
        if loop_.contains(&other) {
            continue; // an interior "antenna" wall, legal
        }
        let other_sec = level.sides.get(other).and_then(|sd| sd.sector);
        if other_sec == Some(sec) {
            return Some((x, other));
        }
    }
    None
}

/// The one repair strategy: trace both faces of the dividing wall; when the
/// traces are disjoint and stay within the original sector's sides, split
/// the sector along them. Anything else is deliberately left unrepaired.
fn try_split_double_side(
    level: &mut Level,
    sec: SectorId,
    loop_a: &[SideId],
    outside: SideId,
) -> bool {
    let loop_b = match trace::trace(level, outside) {
        Ok(l) => l,
        Err(_) => return false,
    };
    if loop_a.iter().any(|x| loop_b.contains(x)) {
        return false;
    }
    let within = |l: &[SideId]| {
        l.iter().all(|&x| {
            let owner = level.sides.get(x).and_then(|sd| sd.sector);
            owner == Some(sec) || owner.is_none()
        })
    };
    if !within(loop_a) || !within(&loop_b) {
        return false;
    }
    if loop_area(level, loop_a) <= 0.0 || loop_area(level, &loop_b) <= 0.0 {
        return false;
    }

    let (floor_h, ceil_h) = level
        .sectors
        .get(sec)
        .map(|x| (x.floor.height, x.ceil.height))
        .unwrap_or((DEFAULT_FLOOR, DEFAULT_CEIL));

    debug!("splitting {sec:?}: {} + {} sides", loop_a.len(), loop_b.len());
    for &x in loop_a {
        level.attach_side(sec, x);
    }
    // planes copy over; side materials stay where they are
    let planes = level.sectors.get(sec).map(|x| (x.floor, x.ceil));
    let new_sec = level.new_sector_from_sides(&loop_b, floor_h, ceil_h);
    if let (Some((floor, ceil)), Some(sector)) = (planes, level.sectors.get_mut(new_sec)) {
        sector.floor = floor;
        sector.ceil = ceil;
    }
    true
}

/*──────────────────────────── hole hosting ───────────────────────────*/

/// Find a sector that geometrically encloses the CW loop. The probe point
/// sits just off a loop side, on the side's facing (the enclosing area).
/// The host also has to keep a valid boundary trace that never runs through
/// the loop's sides, so migrating them in cannot corrupt it.
fn find_hole_host(level: &Level, loop_: &[SideId]) -> Option<SectorId> {
    let probe = {
        let s = loop_[0];
        level.side_midpoint(s) + level.side_normal(s) * PROBE_OFFSET
    };

    let mut best: Option<(f32, SectorId)> = None;
    for (sec, _) in level.sectors.iter() {
        if loop_
            .iter()
            .any(|&x| level.sides.get(x).unwrap().sector == Some(sec))
        {
            continue;
        }
        if !point_in_sector_sides(level, sec, probe) {
            continue;
        }
        let Some(first) = level.sectors.get(sec).and_then(|x| x.sides.first().copied()) else {
            continue;
        };
        match trace::trace(level, first) {
            Ok(host_loop) if host_loop.iter().all(|x| !loop_.contains(x)) => {}
            _ => continue,
        }
        let area = sector_area(level, sec).abs();
        match best {
            Some((a, _)) if a <= area => {}
            _ => best = Some((area, sec)),
        }
    }
    best.map(|(_, sec)| sec)
}

fn sector_area(level: &Level, sec: SectorId) -> f32 {
    let Some(sector) = level.sectors.get(sec) else {
        return 0.0;
    };
    let mut sum = 0.0;
    for &s in &sector.sides {
        let (a, b) = level.side_seg(s);
        sum += a.x * b.y - b.x * a.y;
    }
    sum * 0.5
}

/// Floor/ceiling heights for a synthesized sector: copied from any sector
/// visible across the loop's walls, defaults otherwise.
fn inherited_heights(level: &Level, loop_: &[SideId]) -> (f32, f32) {
    for &s in loop_ {
        if let Some(other) = level.side_other(s) {
            if let Some(sec) = level.sides.get(other).and_then(|sd| sd.sector) {
                if let Some(sector) = level.sectors.get(sec) {
                    return (sector.floor.height, sector.ceil.height);
                }
            }
        }
    }
    (DEFAULT_FLOOR, DEFAULT_CEIL)
}

/*──────────────────────────── wall split ─────────────────────────────*/

impl Level {
    /// Split `w` at `point`, producing a second wall that inherits the far
    /// half of every side (materials, sector membership, decal tail).
    /// Portal links stay on the original sides: a portal spans a whole side
    /// and cannot be half-linked.
    pub fn wall_split(&mut self, w: WallId, point: Vec2) -> Option<(WallId, WallId)> {
        let wall = self.walls.get(w)?;
        let [v0, v1] = wall.v;
        let split_at = (point - self.point(v0)).length();

        self.begin_batch();
        let mid = self.add_vertex(point);
        let new_wall = self.add_wall(mid, v1);
        self.set_wall_vertex(w, 1, mid);

        let faces: Vec<(u8, SideId)> = self
            .walls
            .get(w)
            .unwrap()
            .sides
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|s| (i as u8, s)))
            .collect();

        for (index, old_side) in faces {
            let new_side = self
                .add_side(new_wall, index)
                .expect("fresh wall face cannot be occupied");
            let (material, sector, tail): (SideMaterial, Option<SectorId>, Vec<Decal>) = {
                let side = self.sides.get_mut(old_side).unwrap();
                let material = side.material;
                let sector = side.sector;
                // decals past the split point move to the new side
                let tail: Vec<Decal> = side
                    .decals
                    .iter()
                    .filter(|d| d.along > split_at)
                    .map(|d| Decal {
                        along: d.along - split_at,
                        ..*d
                    })
                    .collect();
                side.decals.retain(|d| d.along <= split_at);
                (material, sector, tail)
            };
            {
                let side = self.sides.get_mut(new_side).unwrap();
                side.material = material;
                side.decals = tail;
            }
            if let Some(sec) = sector {
                // keep trace order: the new half follows the original on
                // face 0, precedes it on face 1
                self.sides.get_mut(new_side).unwrap().sector = Some(sec);
                let sector = self.sectors.get_mut(sec).unwrap();
                let at = sector
                    .sides
                    .iter()
                    .position(|x| *x == old_side)
                    .expect("sector must list its side");
                if index == 0 {
                    sector.sides.insert(at + 1, new_side);
                } else {
                    sector.sides.insert(at, new_side);
                }
                self.mark_sector_dirty(sec);
            }
            self.mark_side_dirty(new_side);
        }
        self.end_batch();
        Some((w, new_wall))
    }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::level::tests::{quad_sector, quad_sides, quad_sides_at};
    use glam::vec2;

    #[test]
    fn closed_quad_synthesizes_one_sector() {
        let (mut level, sides) = quad_sides();
        level.update_side_sector(sides[1]);
        let sec = level.sides.get(sides[1]).unwrap().sector.expect("sector");
        let sector = level.sectors.get(sec).unwrap();
        assert_eq!(sector.sides.len(), 4);
        assert_eq!(level.sectors.len(), 1);
        for s in &sides {
            assert_eq!(level.sides.get(*s).unwrap().sector, Some(sec));
        }
        level.assert_consistent();
    }

    #[test]
    fn update_is_idempotent_on_coherent_sector() {
        let (mut level, sec) = quad_sector();
        let s0 = level.sectors.get(sec).unwrap().sides[0];
        level.update_side_sector(s0);
        assert_eq!(level.sectors.len(), 1);
        assert_eq!(level.sides.get(s0).unwrap().sector, Some(sec));
    }

    #[test]
    fn wall_split_preserves_sector_shape() {
        let (mut level, sec) = quad_sector();
        let area_before = sector_area(&level, sec);
        let s0 = level.sectors.get(sec).unwrap().sides[0];
        let w = level.sides.get(s0).unwrap().wall;
        let (a, b) = level.side_seg(s0);
        let mid = (a + b) * 0.5;

        let (w1, w2) = level.wall_split(w, mid).expect("split");
        assert_ne!(w1, w2);
        assert!(level.sectors.contains(sec), "sector survived the split");
        let sector = level.sectors.get(sec).unwrap();
        assert_eq!(sector.sides.len(), 5);
        let loop_ = trace::trace(&level, sector.sides[0]).unwrap();
        assert_eq!(loop_.len(), 5);
        let area_after = sector_area(&level, sec);
        assert!((area_before - area_after).abs() < 1e-3);
        level.assert_consistent();
    }

    #[test]
    fn broken_loop_deletes_sector() {
        let (mut level, sec) = quad_sector();
        let s0 = level.sectors.get(sec).unwrap().sides[0];
        let w = level.sides.get(s0).unwrap().wall;
        level.remove_wall(w);
        assert!(!level.sectors.contains(sec));
        // survivors are sector-less, not dangling
        for (_, side) in level.sides.iter() {
            assert_eq!(side.sector, None);
        }
        level.assert_consistent();
    }

    #[test]
    fn island_migrates_as_hole() {
        // outer 256-quad sector, then a 64-quad island inside whose back
        // faces (outward, CW walk) should migrate into the outer sector
        let (mut level, outer_sides) = quad_sides_at(vec2(0.0, 0.0), 256.0);
        level.update_side_sector(outer_sides[0]);
        let outer = level.sides.get(outer_sides[0]).unwrap().sector.unwrap();

        level.begin_batch();
        let vs = [
            level.add_vertex(vec2(96.0, 96.0)),
            level.add_vertex(vec2(160.0, 96.0)),
            level.add_vertex(vec2(160.0, 160.0)),
            level.add_vertex(vec2(96.0, 160.0)),
        ];
        // back faces (index 1) walk the island clockwise seen from outside
        let mut hole_sides = Vec::new();
        for i in 0..4 {
            let w = level.add_wall(vs[i], vs[(i + 1) % 4]);
            hole_sides.push(level.add_side(w, 1).unwrap());
        }
        level.end_batch();

        for s in &hole_sides {
            assert_eq!(
                level.sides.get(*s).unwrap().sector,
                Some(outer),
                "hole side not migrated into enclosing sector"
            );
        }
        let sector = level.sectors.get(outer).unwrap();
        assert_eq!(sector.sides.len(), 8);
        assert_eq!(level.sectors.len(), 1);
        level.assert_consistent();
    }

    #[test]
    fn dividing_wall_splits_sector_in_two() {
        // square sector, then a wall straight across the middle with both
        // faces: the classic double-side configuration
        let (mut level, sides) = quad_sides();
        level.update_side_sector(sides[0]);
        let sec = level.sides.get(sides[0]).unwrap().sector.unwrap();
        let (floor_h, ceil_h) = {
            let s = level.sectors.get(sec).unwrap();
            (s.floor.height, s.ceil.height)
        };

        // quad spans x=0..64: split the bottom and top walls at x=32, then
        // connect the two split vertices with a divider wall
        let w_bottom = level.sides.get(sides[0]).unwrap().wall;
        let w_top = level.sides.get(sides[2]).unwrap().wall;
        let (_, wb2) = level.wall_split(w_bottom, vec2(32.0, 0.0)).unwrap();
        let bottom = level.walls.get(wb2).unwrap().v[0];
        let (_, wt2) = level.wall_split(w_top, vec2(32.0, 64.0)).unwrap();
        let top = level.walls.get(wt2).unwrap().v[0];

        level.begin_batch();
        let divider = level.add_wall(bottom, top);
        level.add_side(divider, 0).unwrap();
        level.add_side(divider, 1).unwrap();
        level.end_batch();

        assert_eq!(level.sectors.len(), 2, "sector was split in two");
        for (_, sector) in level.sectors.iter() {
            assert_eq!((sector.floor.height, sector.ceil.height), (floor_h, ceil_h));
            assert!(!sector.sides.is_empty());
        }
        level.assert_consistent();
    }
}
