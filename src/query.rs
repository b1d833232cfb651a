//! Read-only spatial queries over a level.
//!
//! Everything here goes through the block grid where it can; only the
//! vertex scan is linear, since vertices are not gridded on their own
//! (their walls are).

use glam::Vec2;

use crate::grid::block_at;
use crate::topo::{Aabb, Level, SectorId, SideId, VertexId, WallId};

/// The sector whose area contains `p`, via the convex subsector partition.
/// Boundary points resolve to whichever touching subsector the grid lists
/// first.
pub fn sector_at_point(level: &Level, p: Vec2) -> Option<SectorId> {
    let cell = level.grid.cell(block_at(p))?;
    for &id in &cell.subsectors {
        let Some(sub) = level.subsectors.get(id) else {
            continue;
        };
        if sub.bbox.contains(p) && sub.contains(p) {
            return Some(sub.sector);
        }
    }
    None
}

fn point_segment_distance(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 <= f32::EPSILON {
        return (p - a).length();
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).length()
}

/// Unique walls with any coverage inside the radius.
pub fn walls_in_radius(level: &Level, p: Vec2, radius: f32) -> Vec<WallId> {
    let bbox = Aabb {
        min: p - Vec2::splat(radius),
        max: p + Vec2::splat(radius),
    };
    let mut out = Vec::new();
    level.grid.for_each_wall_in_bbox(bbox, |w| {
        let Some(wall) = level.walls.get(w) else {
            return true;
        };
        let (a, b) = (level.point(wall.v[0]), level.point(wall.v[1]));
        if point_segment_distance(p, a, b) <= radius {
            out.push(w);
        }
        true
    });
    out
}

/// Sectors whose bounding box intersects the radius box. Coarse by design;
/// callers needing exact area tests go through the subsectors.
pub fn sectors_in_radius(level: &Level, p: Vec2, radius: f32) -> Vec<SectorId> {
    let bbox = Aabb {
        min: p - Vec2::splat(radius),
        max: p + Vec2::splat(radius),
    };
    let mut out = Vec::new();
    level.grid.for_each_cell_in_bbox(bbox, |_, cell| {
        for &sec in &cell.sectors {
            if !out.contains(&sec)
                && level.sectors.get(sec).is_some_and(|s| s.bbox.overlaps(&bbox))
            {
                out.push(sec);
            }
        }
        true
    });
    out
}

/// Closest side within `max_dist` of `p`, preferring the face whose normal
/// points at the query point when both faces of a wall exist.
pub fn nearest_side(level: &Level, p: Vec2, max_dist: f32) -> Option<(SideId, f32)> {
    let mut best: Option<(SideId, f32)> = None;
    for w in walls_in_radius(level, p, max_dist) {
        let wall = level.walls.get(w)?;
        let (a, b) = (level.point(wall.v[0]), level.point(wall.v[1]));
        let d = point_segment_distance(p, a, b);
        if d > max_dist {
            continue;
        }
        let front = crate::tess::cross2(b - a, p - a) >= 0.0;
        let face = if front { 0 } else { 1 };
        // fall back to the far face when only one side exists
        let side = wall.sides[face].or(wall.sides[1 - face]);
        if let Some(s) = side {
            match best {
                Some((_, bd)) if bd <= d => {}
                _ => best = Some((s, d)),
            }
        }
    }
    best
}

/// Closest vertex within `max_dist` of `p`. Linear scan.
pub fn nearest_vertex(level: &Level, p: Vec2, max_dist: f32) -> Option<(VertexId, f32)> {
    let mut best: Option<(VertexId, f32)> = None;
    for (h, vert) in level.verts.iter() {
        let d = (vert.pos - p).length();
        if d > max_dist {
            continue;
        }
        match best {
            Some((_, bd)) if bd <= d => {}
            _ => best = Some((h, d)),
        }
    }
    best
}

/// Live sectors whose bit is set in `from`'s visibility row.
pub fn visible_sectors_from(level: &Level, from: SectorId) -> Vec<SectorId> {
    let mut out = Vec::new();
    if !level.sectors.contains(from) {
        return out;
    }
    for slot in 0..level.sectors.slot_count() {
        if level.vis.get(from.index(), slot) {
            if let Some(h) = level.sectors.handle_at(slot) {
                out.push(h);
            }
        }
    }
    out
}

/// All sectors overlapping a query box, exact against subsector areas.
pub fn sectors_in_bbox(level: &Level, bbox: Aabb) -> Vec<SectorId> {
    let mut out = Vec::new();
    level.grid.for_each_cell_in_bbox(bbox, |_, cell| {
        for &id in &cell.subsectors {
            let Some(sub) = level.subsectors.get(id) else {
                continue;
            };
            if sub.bbox.overlaps(&bbox) && !out.contains(&sub.sector) {
                out.push(sub.sector);
            }
        }
        true
    });
    out
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::fixtures::{quad_sector, two_rooms};
    use glam::vec2;

    #[test]
    fn point_location_inside_and_out() {
        let (level, sec) = quad_sector();
        assert_eq!(sector_at_point(&level, vec2(32.0, 32.0)), Some(sec));
        assert_eq!(sector_at_point(&level, vec2(100.0, 32.0)), None);
    }

    #[test]
    fn point_location_across_portal_rooms() {
        let (level, [sa, sb], _) = two_rooms();
        assert_eq!(sector_at_point(&level, vec2(10.0, 10.0)), Some(sa));
        assert_eq!(sector_at_point(&level, vec2(100.0, 10.0)), Some(sb));
    }

    #[test]
    fn nearest_side_picks_facing_side() {
        let (level, sec) = quad_sector();
        // just inside the south wall; its front side faces up into the quad
        let (s, d) = nearest_side(&level, vec2(32.0, 2.0), 8.0).unwrap();
        assert!(d <= 2.0 + 1e-4);
        assert_eq!(level.sides.get(s).unwrap().sector, Some(sec));
        assert!(level.side_normal(s).y > 0.0);
    }

    #[test]
    fn nearest_vertex_respects_max_dist() {
        let (level, _sec) = quad_sector();
        let hit = nearest_vertex(&level, vec2(2.0, 2.0), 8.0).unwrap();
        assert!((level.verts.get(hit.0).unwrap().pos - vec2(0.0, 0.0)).length() < 1e-4);
        assert!(nearest_vertex(&level, vec2(500.0, 500.0), 8.0).is_none());
    }

    #[test]
    fn walls_in_radius_filters_by_true_distance() {
        let (level, _sec) = quad_sector();
        // near the south-west corner: south and west walls, not the far two
        let hits = walls_in_radius(&level, vec2(4.0, 4.0), 10.0);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn area_queries_find_both_rooms() {
        let (level, [sa, sb], _) = two_rooms();
        let near_boundary = sectors_in_radius(&level, vec2(64.0, 32.0), 8.0);
        assert!(near_boundary.contains(&sa) && near_boundary.contains(&sb));

        let left_only = sectors_in_bbox(
            &level,
            Aabb {
                min: vec2(4.0, 4.0),
                max: vec2(30.0, 30.0),
            },
        );
        assert_eq!(left_only, vec![sa]);
    }

    #[test]
    fn visible_sectors_match_matrix() {
        let (level, [sa, sb], _) = two_rooms();
        let vis = visible_sectors_from(&level, sa);
        assert!(vis.contains(&sa) && vis.contains(&sb));
    }
}
