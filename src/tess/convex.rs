//! Convex partition and the subsector store.
//!
//! Subsectors are the convex fragments a sector's floor is cut into; they
//! are the unit of the visibility flood and of point location. Slots are
//! reused first-fit so an unchanged sector gets the same slot numbers back
//! when it is recalculated.

use glam::Vec2;

use super::cross2;
use crate::topo::{Aabb, SectorId, SubsectorId};

const CONVEX_EPS: f32 = 1e-5;

/// Undirected segment in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegLine {
    pub a: Vec2,
    pub b: Vec2,
}

impl SegLine {
    #[inline]
    pub fn midpoint(&self) -> Vec2 {
        (self.a + self.b) * 0.5
    }

    #[inline]
    pub fn dir(&self) -> Vec2 {
        (self.b - self.a).normalize_or_zero()
    }

    #[inline]
    pub fn length(&self) -> f32 {
        (self.b - self.a).length()
    }
}

/// Link to an adjacent subsector, either through a shared edge within a
/// sector or through a portal side into another sector.
#[derive(Clone, Copy, Debug)]
pub struct SubNeighbor {
    pub sub: SubsectorId,
    /// The shared edge (or the portal side's segment) in world space.
    pub line: SegLine,
    /// True when the crossing goes through a portal side.
    pub portal: bool,
}

pub struct Subsector {
    pub sector: SectorId,
    pub bbox: Aabb,
    /// Boundary ring, counter-clockwise.
    pub lines: Vec<SegLine>,
    pub neighbors: Vec<SubNeighbor>,
    pub version: u32,
}

impl Subsector {
    /// Convex containment test; boundary counts as inside.
    pub fn contains(&self, p: Vec2) -> bool {
        self.lines
            .iter()
            .all(|l| cross2(l.b - l.a, p - l.a) >= -CONVEX_EPS)
    }
}

/*──────────────────────────── slot store ─────────────────────────────*/

/// Free-bit slot store for subsectors. Allocation takes the lowest free
/// slot, so identical alloc/free sequences map to identical ids.
pub struct Subsectors {
    slots: Vec<Option<Subsector>>,
    free_bits: Vec<u64>,
}

impl Default for Subsectors {
    fn default() -> Self {
        Self::new()
    }
}

impl Subsectors {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_bits: Vec::new(),
        }
    }

    pub fn alloc(&mut self, sub: Subsector) -> SubsectorId {
        for (wi, word) in self.free_bits.iter_mut().enumerate() {
            if *word != 0 {
                let bit = word.trailing_zeros();
                *word &= !(1u64 << bit);
                let idx = wi * 64 + bit as usize;
                self.slots[idx] = Some(sub);
                return idx as SubsectorId;
            }
        }
        let idx = self.slots.len();
        self.slots.push(Some(sub));
        if idx / 64 >= self.free_bits.len() {
            self.free_bits.push(0);
        }
        idx as SubsectorId
    }

    pub fn free(&mut self, id: SubsectorId) {
        let idx = id as usize;
        if idx < self.slots.len() && self.slots[idx].take().is_some() {
            self.free_bits[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    #[inline]
    pub fn get(&self, id: SubsectorId) -> Option<&Subsector> {
        self.slots.get(id as usize)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: SubsectorId) -> Option<&mut Subsector> {
        self.slots.get_mut(id as usize)?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Number of slots ever allocated, live or free.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubsectorId, &Subsector)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|sub| (i as SubsectorId, sub)))
    }
}

/*─────────────────────────── convexify ───────────────────────────────*/

pub(crate) fn is_convex(ring: &[Vec2]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        let c = ring[(i + 2) % n];
        if cross2(b - a, c - b) < -CONVEX_EPS {
            return false;
        }
    }
    true
}

/// Greedy merge of a triangle fan into maximal convex rings. Deterministic:
/// each triangle joins the first earlier ring it shares an edge with when
/// the merge stays convex, then grown rings keep absorbing each other until
/// no convex pair is left.
pub fn convexify(tris: &[[Vec2; 3]]) -> Vec<Vec<Vec2>> {
    let mut polys: Vec<Vec<Vec2>> = Vec::new();
    'next: for tri in tris {
        for poly in polys.iter_mut() {
            if let Some(merged) = try_merge(poly, tri) {
                *poly = merged;
                continue 'next;
            }
        }
        polys.push(tri.to_vec());
    }

    // a triangle can commit a new ring that only later grows an edge shared
    // with an older one; keep merging rings until a full sweep stands still
    let mut changed = true;
    while changed {
        changed = false;
        let mut i = 0;
        while i < polys.len() {
            let mut j = i + 1;
            while j < polys.len() {
                if let Some(merged) = try_merge(&polys[i], &polys[j]) {
                    polys[i] = merged;
                    polys.swap_remove(j);
                    changed = true;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }
    polys
}

/// Merge two CCW rings across their shared edge, keeping the result convex.
/// Rings sharing more (or less) than exactly one edge stay separate.
fn try_merge(poly: &[Vec2], other: &[Vec2]) -> Option<Vec<Vec2>> {
    let n = poly.len();
    let m = other.len();
    let mut shared: Option<(usize, usize)> = None;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        for j in 0..m {
            // the shared edge runs opposite ways in the two CCW rings
            if other[j] == b && other[(j + 1) % m] == a {
                if shared.is_some() {
                    return None;
                }
                shared = Some((i, j));
            }
        }
    }
    let (i, j) = shared?;
    let mut merged = Vec::with_capacity(n + m - 2);
    merged.extend_from_slice(&poly[..=i]);
    for k in 0..m - 2 {
        merged.push(other[(j + 2 + k) % m]);
    }
    merged.extend_from_slice(&poly[i + 1..]);
    if is_convex(&merged) { Some(merged) } else { None }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
