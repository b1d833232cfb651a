//! Ear-clipping triangulation with hole bridging.
//!
//! Holes (clockwise rings inside the counter-clockwise outer ring) are
//! spliced into the outer ring through zero-width bridges, rightmost hole
//! first, then the resulting weakly-simple polygon is ear-clipped.

use glam::Vec2;

use super::{TessError, cross2};

const AREA_EPS: f32 = 1e-6;

pub(super) fn triangulate_with_holes(
    outer: &[Vec2],
    holes: &[Vec<Vec2>],
) -> Result<Vec<[Vec2; 3]>, TessError> {
    if outer.len() < 3 {
        return Err(TessError::Degenerate);
    }

    let mut poly = outer.to_vec();
    // bridging rightmost-first keeps later bridges from crossing earlier ones
    let mut order: Vec<&Vec<Vec2>> = holes.iter().collect();
    order.sort_by(|a, b| {
        let ax = a.iter().map(|p| p.x).fold(f32::MIN, f32::max);
        let bx = b.iter().map(|p| p.x).fold(f32::MIN, f32::max);
        bx.partial_cmp(&ax).unwrap_or(std::cmp::Ordering::Equal)
    });
    for hole in order {
        if hole.len() < 3 {
            return Err(TessError::Degenerate);
        }
        poly = bridge_hole(&poly, hole)?;
    }

    ear_clip(&poly)
}

/// Splice `hole` into `poly` via a double edge between the hole's rightmost
/// vertex and a visible polygon vertex.
fn bridge_hole(poly: &[Vec2], hole: &[Vec2]) -> Result<Vec<Vec2>, TessError> {
    let m = hole
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .ok_or(TessError::Degenerate)?;
    let mp = hole[m];

    // nearest polygon vertex with an unobstructed bridge segment
    let mut best: Option<(f32, usize)> = None;
    'cand: for (i, &p) in poly.iter().enumerate() {
        if p == mp {
            continue;
        }
        for ring in std::iter::once(poly).chain(std::iter::once(hole)) {
            for k in 0..ring.len() {
                let a = ring[k];
                let b = ring[(k + 1) % ring.len()];
                if segments_cross(mp, p, a, b) {
                    continue 'cand;
                }
            }
        }
        let d = (p - mp).length_squared();
        match best {
            Some((bd, _)) if bd <= d => {}
            _ => best = Some((d, i)),
        }
    }
    let (_, i) = best.ok_or(TessError::Degenerate)?;

    let mut out = Vec::with_capacity(poly.len() + hole.len() + 2);
    out.extend_from_slice(&poly[..=i]);
    for k in 0..=hole.len() {
        out.push(hole[(m + k) % hole.len()]);
    }
    out.extend_from_slice(&poly[i..]);
    Ok(out)
}

/// Proper crossing of segment interiors; shared endpoints do not count.
fn segments_cross(p0: Vec2, p1: Vec2, q0: Vec2, q1: Vec2) -> bool {
    if p0 == q0 || p0 == q1 || p1 == q0 || p1 == q1 {
        return false;
    }
    let d1 = cross2(p1 - p0, q0 - p0);
    let d2 = cross2(p1 - p0, q1 - p0);
    let d3 = cross2(q1 - q0, p0 - q0);
    let d4 = cross2(q1 - q0, p1 - q0);
    (d1 > 0.0) != (d2 > 0.0) && (d3 > 0.0) != (d4 > 0.0)
}

fn point_strictly_inside(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    cross2(b - a, p - a) > AREA_EPS
        && cross2(c - b, p - b) > AREA_EPS
        && cross2(a - c, p - c) > AREA_EPS
}

/// `p` on the open segment `a`–`b` (endpoints excluded).
fn point_on_segment(p: Vec2, a: Vec2, b: Vec2) -> bool {
    cross2(b - a, p - a).abs() <= AREA_EPS
        && (p - a).dot(b - a) > 0.0
        && (p - b).dot(a - b) > 0.0
}

fn ear_clip(pts: &[Vec2]) -> Result<Vec<[Vec2; 3]>, TessError> {
    let mut idx: Vec<usize> = (0..pts.len()).collect();
    let mut tris = Vec::with_capacity(pts.len().saturating_sub(2));

    while idx.len() > 3 {
        let n = idx.len();
        let mut clipped = false;

        for k in 0..n {
            let ia = idx[(k + n - 1) % n];
            let ib = idx[k];
            let ic = idx[(k + 1) % n];
            let (a, b, c) = (pts[ia], pts[ib], pts[ic]);
            let cross = cross2(b - a, c - b);

            // collinear spur (bridge residue): drop without a triangle
            if cross.abs() <= AREA_EPS {
                idx.remove(k);
                clipped = true;
                break;
            }
            if cross < 0.0 {
                continue; // reflex
            }

            // a vertex inside the ear, or sitting exactly on its diagonal,
            // blocks it: clipping across such a vertex overlaps the notch
            // behind it
            let blocked = idx.iter().any(|&j| {
                let p = pts[j];
                j != ia && j != ib && j != ic
                    && p != a && p != b && p != c
                    && (point_strictly_inside(p, a, b, c) || point_on_segment(p, c, a))
            });
            if blocked {
                continue;
            }

            tris.push([a, b, c]);
            idx.remove(k);
            clipped = true;
            break;
        }

        if !clipped {
            return Err(TessError::Degenerate);
        }
    }

    let (a, b, c) = (pts[idx[0]], pts[idx[1]], pts[idx[2]]);
    if cross2(b - a, c - b) > AREA_EPS {
        tris.push([a, b, c]);
    }
    Ok(tris)
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec2;

    fn ring(pts: &[(f32, f32)]) -> Vec<Vec2> {
        pts.iter().map(|&(x, y)| vec2(x, y)).collect()
    }

    fn total_area(tris: &[[Vec2; 3]]) -> f32 {
        tris.iter()
            .map(|t| cross2(t[1] - t[0], t[2] - t[0]) * 0.5)
            .sum()
    }

    #[test]
    fn convex_quad_two_triangles() {
        let outer = ring(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]);
        let tris = triangulate_with_holes(&outer, &[]).unwrap();
        assert_eq!(tris.len(), 2);
        assert!((total_area(&tris) - 16.0).abs() < 1e-4);
    }

    #[test]
    fn concave_polygon_triangulates() {
        // L shape
        let outer = ring(&[
            (0.0, 0.0),
            (4.0, 0.0),
            (4.0, 2.0),
            (2.0, 2.0),
            (2.0, 4.0),
            (0.0, 4.0),
        ]);
        let tris = triangulate_with_holes(&outer, &[]).unwrap();
        assert!((total_area(&tris) - 12.0).abs() < 1e-4);
        for t in &tris {
            assert!(cross2(t[1] - t[0], t[2] - t[0]) > 0.0);
        }
    }

    #[test]
    fn hole_area_is_subtracted() {
        let outer = ring(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        // clockwise hole
        let hole = ring(&[(4.0, 4.0), (4.0, 6.0), (6.0, 6.0), (6.0, 4.0)]);
        let tris = triangulate_with_holes(&outer, &[hole]).unwrap();
        assert!((total_area(&tris) - 96.0).abs() < 1e-3);
    }

    #[test]
    fn two_holes() {
        let outer = ring(&[(0.0, 0.0), (12.0, 0.0), (12.0, 6.0), (0.0, 6.0)]);
        let h1 = ring(&[(2.0, 2.0), (2.0, 4.0), (4.0, 4.0), (4.0, 2.0)]);
        let h2 = ring(&[(8.0, 2.0), (8.0, 4.0), (10.0, 4.0), (10.0, 2.0)]);
        let tris = triangulate_with_holes(&outer, &[h1, h2]).unwrap();
        assert!((total_area(&tris) - 64.0).abs() < 1e-3);
    }

    #[test]
    fn degenerate_ring_is_rejected() {
        let outer = ring(&[(0.0, 0.0), (4.0, 0.0)]);
        assert!(matches!(
            triangulate_with_holes(&outer, &[]),
            Err(TessError::Degenerate)
        ));
    }
}
