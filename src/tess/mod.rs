//! Sector surface construction.
//!
//! A sector's sides are an unordered set; this module turns them into
//! geometry in three steps:
//!
//! 1. [`sort_into_traces`] groups the sides into closed boundary loops
//!    (one counter-clockwise outer loop, any number of clockwise holes).
//! 2. [`triangulate`] bridges the holes into the outer loop and ear-clips
//!    the result.
//! 3. [`convex`] greedily merges the triangle fan into convex polygons,
//!    which become the sector's subsectors.
//!
//! Every step is deterministic for the same input topology, so a
//! recalculation of an unchanged sector reproduces the same mesh.

pub mod convex;
mod triangulate;

use glam::Vec2;
use thiserror::Error;

use crate::topo::{Level, SectorId, SideId, TraceError, trace};

#[derive(Error, Debug)]
pub enum TessError {
    #[error("sector has no sides")]
    NoSides,

    #[error("boundary does not close: {0}")]
    Trace(#[from] TraceError),

    /// A traced loop picked up a side the sector does not own.
    #[error("traced loop leaves the sector's side set")]
    Foreign,

    #[error("more than one counter-clockwise outer loop")]
    MultipleOuters,

    #[error("no counter-clockwise outer loop")]
    NoOuter,

    #[error("degenerate boundary")]
    Degenerate,
}

pub struct Tessellation {
    /// Raw triangle fan, counter-clockwise winding.
    pub tris: Vec<[Vec2; 3]>,
    /// Convex partition of the same area, one ring per subsector.
    pub polys: Vec<Vec<Vec2>>,
}

#[inline]
pub(crate) fn cross2(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Twice the signed area of a ring; positive for counter-clockwise.
pub(crate) fn signed_area2(pts: &[Vec2]) -> f32 {
    let mut acc = 0.0;
    for i in 0..pts.len() {
        let a = pts[i];
        let b = pts[(i + 1) % pts.len()];
        acc += cross2(a, b);
    }
    acc
}

/// Group a sector's sides into closed loops, outer loop first.
///
/// Fails if any side's trace does not close, or closes over a side owned by
/// a different sector. The flattened result is the canonical side order the
/// sector stores.
pub fn sort_into_traces(level: &Level, sec: SectorId) -> Result<Vec<Vec<SideId>>, TessError> {
    let sector = level.sectors.get(sec).ok_or(TessError::NoSides)?;
    if sector.sides.is_empty() {
        return Err(TessError::NoSides);
    }

    let mut remaining: Vec<SideId> = sector.sides.clone();
    let mut traces: Vec<Vec<SideId>> = Vec::new();

    while let Some(&start) = remaining.first() {
        let loop_ = trace(level, start)?;
        for s in &loop_ {
            let Some(i) = remaining.iter().position(|x| x == s) else {
                return Err(TessError::Foreign);
            };
            remaining.swap_remove(i);
        }
        traces.push(loop_);
    }

    // outer loop first, then holes by descending magnitude; ties cannot
    // occur for loops over distinct sides of one sector
    traces.sort_by(|a, b| {
        let aa = signed_area2(&loop_points(level, a));
        let ab = signed_area2(&loop_points(level, b));
        ab.partial_cmp(&aa).unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(traces)
}

fn loop_points(level: &Level, loop_: &[SideId]) -> Vec<Vec2> {
    loop_
        .iter()
        .map(|&s| level.point(level.side_from(s)))
        .collect()
}

/// Build the sector's triangle mesh and convex partition.
pub fn tessellate_sector(level: &Level, sec: SectorId) -> Result<Tessellation, TessError> {
    let traces = sort_into_traces(level, sec)?;

    let mut outer: Option<Vec<Vec2>> = None;
    let mut holes: Vec<Vec<Vec2>> = Vec::new();
    for tr in &traces {
        let pts = loop_points(level, tr);
        let area2 = signed_area2(&pts);
        if area2 > f32::EPSILON {
            if outer.is_some() {
                return Err(TessError::MultipleOuters);
            }
            outer = Some(pts);
        } else if area2 < -f32::EPSILON {
            holes.push(pts);
        } else {
            return Err(TessError::Degenerate);
        }
    }
    let outer = outer.ok_or(TessError::NoOuter)?;

    let tris = triangulate::triangulate_with_holes(&outer, &holes)?;
    let polys = convex::convexify(&tris);
    Ok(Tessellation { tris, polys })
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
