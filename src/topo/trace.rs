//! Side tracer.
//!
//! Starting at a side, repeatedly hop to a side that begins where the current
//! one ends, always taking the smallest left turn. A successful trace returns
//! to the start side after visiting every side of the loop exactly once; the
//! result is the closed boundary in walk order.
//!
//! The tracer is the single source of truth for "do these sides still form a
//! sector boundary?"; coherence maintenance, tessellation and the editor all
//! go through it.

use std::f32::consts::TAU;

use thiserror::Error;

use super::geometry::{SideFlags, SideId, VertexId};
use super::level::Level;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    /// A side marked fail-trace was reached; the probed configuration is
    /// invalid by construction.
    #[error("trace hit fail-trace side {0:?}")]
    FailTrace(SideId),

    /// The walk re-entered a side other than closing back on the start:
    /// the chain is non-closed or self-intersecting.
    #[error("trace revisited side {0:?} before closing")]
    Revisited(SideId),

    /// No side begins at the current end vertex.
    #[error("trace dead-ended at vertex {0:?}")]
    DeadEnd(VertexId),
}

/// Angle epsilon below which a turn is considered a straight continuation.
const TURN_EPS: f32 = 1e-4;

/// Follow the minimal-left-turn chain from `start` until it closes.
pub fn trace(level: &Level, start: SideId) -> Result<Vec<SideId>, TraceError> {
    let mut out = Vec::new();
    let mut current = start;

    // Hard cap: every live side may appear at most once, so a longer walk is
    // already a cycle that failed to close on the start.
    let cap = level.sides.len() + 1;

    loop {
        out.push(current);
        let next = next_side(level, current)?;

        if next == start {
            return Ok(out);
        }
        if out.contains(&next) || out.len() >= cap {
            return Err(TraceError::Revisited(next));
        }
        current = next;
    }
}

/// Pick the side leaving `side`'s end vertex with the smallest left turn.
fn next_side(level: &Level, side: SideId) -> Result<SideId, TraceError> {
    let end = level.side_to(side);
    let d_in = level.side_dir(side);

    let mut best: Option<(f32, SideId)> = None;

    let vert = level.verts.get(end).expect("side end vertex must be live");
    for &wall_id in &vert.walls {
        let Some(wall) = level.walls.get(wall_id) else {
            continue;
        };
        for cand in wall.sides.iter().flatten() {
            if level.side_from(*cand) != end {
                continue;
            }
            let cand_side = level.sides.get(*cand).expect("wall side must be live");
            if cand_side.flags.contains(SideFlags::FAIL_TRACE) {
                return Err(TraceError::FailTrace(*cand));
            }
            let turn = left_turn(d_in, level.side_dir(*cand));
            match best {
                Some((t, _)) if t <= turn => {}
                _ => best = Some((turn, *cand)),
            }
        }
    }

    best.map(|(_, s)| s).ok_or(TraceError::DeadEnd(end))
}

/// CCW angle from the continuation of `d_in` to `d_out`, in `(0, 2π]`.
///
/// A hairpin back along the opposite side of the same wall measures a full
/// turn and is therefore only taken when nothing else leaves the vertex,
/// which is exactly what an interior "antenna" wall needs.
fn left_turn(d_in: glam::Vec2, d_out: glam::Vec2) -> f32 {
    let a = d_out.y.atan2(d_out.x) - d_in.y.atan2(d_in.x);
    let a = a.rem_euclid(TAU);
    // straight continuation and the hairpin both count as a full turn
    if a < TURN_EPS || (a - std::f32::consts::PI).abs() < TURN_EPS {
        TAU
    } else {
        a
    }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
