//! Sector-to-sector potential visibility.
//!
//! [`VisMatrix`] is a square bitset over sector slots; bit `(a, b)` means
//! "somewhere in sector `a` can potentially see into sector `b`". Rows are
//! recomputed per dirty sector by [`visible_row`], a conservative flood
//! over subsector adjacency: it may leave a bit set that a perfect solver
//! would clear, but never the other way around.
//!
//! [`link_sector_subs`] maintains the adjacency the flood walks: shared
//! edges between a sector's own subsectors, plus portal crossings into the
//! neighbors' subsectors.

use std::collections::VecDeque;

use glam::Vec2;
use smallvec::SmallVec;

use crate::tess::convex::{SegLine, SubNeighbor};
use crate::topo::{Level, SectorId, SubsectorId};

/// Slack for the anti-penumbra side tests; grazing portals stay visible.
const SPLITTER_EPS: f32 = 1e-3;

#[inline]
fn cross2(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/*───────────────────────────── matrix ────────────────────────────────*/

/// Square bitset keyed by sector slot index. Capacity only grows, in
/// whole 64-bit blocks, so row layout stays word-aligned.
pub struct VisMatrix {
    words_per_row: usize,
    bits: Vec<u64>,
}

impl Default for VisMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl VisMatrix {
    pub fn new() -> Self {
        Self {
            words_per_row: 0,
            bits: Vec::new(),
        }
    }

    /// Slots the matrix can address.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.words_per_row * 64
    }

    #[inline]
    pub fn words_per_row(&self) -> usize {
        self.words_per_row
    }

    /// Grow to hold at least `slots` rows and columns. Existing bits keep
    /// their positions.
    pub fn ensure_slots(&mut self, slots: usize) {
        let words = slots.div_ceil(64);
        if words <= self.words_per_row {
            return;
        }
        let rows = words * 64;
        let mut bits = vec![0u64; rows * words];
        for r in 0..self.capacity() {
            let src = r * self.words_per_row;
            let dst = r * words;
            bits[dst..dst + self.words_per_row]
                .copy_from_slice(&self.bits[src..src + self.words_per_row]);
        }
        self.words_per_row = words;
        self.bits = bits;
    }

    #[inline]
    pub fn get(&self, a: usize, b: usize) -> bool {
        if a >= self.capacity() || b >= self.capacity() {
            return false;
        }
        let word = self.bits[a * self.words_per_row + b / 64];
        word & (1u64 << (b % 64)) != 0
    }

    pub fn set(&mut self, a: usize, b: usize, value: bool) {
        assert!(a < self.capacity() && b < self.capacity());
        let word = &mut self.bits[a * self.words_per_row + b / 64];
        if value {
            *word |= 1u64 << (b % 64);
        } else {
            *word &= !(1u64 << (b % 64));
        }
    }

    /// Replace row `a`. A short source row zero-fills the remainder.
    pub fn set_row(&mut self, a: usize, row: &[u64]) {
        assert!(a < self.capacity());
        let dst = &mut self.bits[a * self.words_per_row..(a + 1) * self.words_per_row];
        let n = row.len().min(dst.len());
        dst[..n].copy_from_slice(&row[..n]);
        dst[n..].fill(0);
    }

    pub fn row(&self, a: usize) -> &[u64] {
        &self.bits[a * self.words_per_row..(a + 1) * self.words_per_row]
    }

    pub fn clear_row(&mut self, a: usize) {
        if a < self.capacity() {
            self.bits[a * self.words_per_row..(a + 1) * self.words_per_row].fill(0);
        }
    }

    pub fn clear_column(&mut self, b: usize) {
        if b >= self.capacity() {
            return;
        }
        let (word, mask) = (b / 64, !(1u64 << (b % 64)));
        for r in 0..self.capacity() {
            self.bits[r * self.words_per_row + word] &= mask;
        }
    }
}

/*──────────────────────────── the flood ──────────────────────────────*/

struct FloodEntry {
    sub: SubsectorId,
    /// First portal crossed on this path; the anti-penumbra apex.
    source: Option<SegLine>,
    /// Most recent portal crossed.
    entry: Option<SegLine>,
    depth: u32,
    /// Subsectors already on this path. Revisits are pruned per path, not
    /// globally: a subsector reachable through two different portals gets
    /// one wedge per path, and either path can set bits the other cannot.
    chain: SmallVec<[SubsectorId; 8]>,
}

/// Compute the visibility row of `sec` as matrix words.
///
/// Flood over subsector links starting from every subsector of `sec`.
/// After the second portal on a path, a candidate portal must intersect the
/// anti-penumbra wedge spanned by the source and entry portals. The flood
/// revisits subsectors across paths (only the ancestor chain of a path is
/// off-limits), so the wedge narrowing stays conservative toward
/// visibility.
pub fn visible_row(level: &Level, sec: SectorId) -> Vec<u64> {
    let words = level.vis.words_per_row();
    let mut row = vec![0u64; words.max(sec.index() / 64 + 1)];
    row[sec.index() / 64] |= 1u64 << (sec.index() % 64); // reflexive

    let Some(sector) = level.sectors.get(sec) else {
        return row;
    };

    let seeds: SmallVec<[SubsectorId; 8]> = sector.subs.iter().copied().collect();
    let mut queue: VecDeque<FloodEntry> = VecDeque::new();
    for &sub in &seeds {
        // every path starts with the whole home sector on its chain;
        // looping back to the start can never add a bit
        queue.push_back(FloodEntry {
            sub,
            source: None,
            entry: None,
            depth: 0,
            chain: seeds.clone(),
        });
    }

    while let Some(e) = queue.pop_front() {
        let Some(sub) = level.subsectors.get(e.sub) else {
            continue;
        };
        let owner = sub.sector.index();
        if owner / 64 < row.len() {
            row[owner / 64] |= 1u64 << (owner % 64);
        }

        for link in &sub.neighbors {
            if e.chain.contains(&link.sub) {
                continue;
            }
            if link.portal && e.depth >= 2 {
                if let (Some(src), Some(ent)) = (e.source, e.entry) {
                    if !in_wedge(src, ent, link.line) {
                        continue;
                    }
                }
            }
            let mut chain = e.chain.clone();
            chain.push(link.sub);
            queue.push_back(if link.portal {
                FloodEntry {
                    sub: link.sub,
                    source: e.source.or(Some(link.line)),
                    entry: Some(link.line),
                    depth: e.depth + 1,
                    chain,
                }
            } else {
                // same-room spread keeps the path's portal constraints
                FloodEntry {
                    sub: link.sub,
                    source: e.source,
                    entry: e.entry,
                    depth: e.depth,
                    chain,
                }
            });
        }
    }

    row
}

/// Does `target` reach into the wedge spanned by `source` and `entry`?
///
/// Separating lines run from a source endpoint to an entry endpoint with
/// the remaining endpoints on opposite sides; the wedge beyond `entry` is
/// where every separator reports the entry side. Portals that share
/// endpoints simply produce fewer separators, which errs toward visible.
fn in_wedge(source: SegLine, entry: SegLine, target: SegLine) -> bool {
    let s = [source.a, source.b];
    let t = [entry.a, entry.b];
    let mut seps: SmallVec<[(Vec2, Vec2); 4]> = SmallVec::new();

    for &sp in &s {
        for &tp in &t {
            if sp == tp {
                continue;
            }
            let d = tp - sp;
            let other_s = if sp == s[0] { s[1] } else { s[0] };
            let other_t = if tp == t[0] { t[1] } else { t[0] };
            let side_s = cross2(d, other_s - sp);
            let side_t = cross2(d, other_t - sp);
            if side_s.abs() <= SPLITTER_EPS || side_t.abs() <= SPLITTER_EPS {
                continue; // collinear configuration, no verdict
            }
            if (side_s > 0.0) != (side_t > 0.0) {
                // orient so the entry side is positive
                if side_t > 0.0 {
                    seps.push((sp, tp));
                } else {
                    seps.push((tp, sp));
                }
            }
        }
    }
    if seps.is_empty() {
        return true;
    }

    let probes = [target.a, target.b, target.midpoint()];
    probes.iter().any(|&p| {
        seps.iter()
            .all(|&(a, b)| cross2(b - a, p - a) >= -SPLITTER_EPS)
    })
}

/*────────────────────────── adjacency links ──────────────────────────*/

/// Rebuild the neighbor links of `sec`'s subsectors: shared edges between
/// them, and portal crossings to and from the portal neighbors' subsectors.
pub fn link_sector_subs(level: &mut Level, sec: SectorId) {
    let Some(sector) = level.sectors.get(sec) else {
        return;
    };
    let subs = sector.subs.clone();
    let sides = sector.sides.clone();

    let mut additions: Vec<(SubsectorId, SubNeighbor)> = Vec::new();

    /* shared edges within the sector */
    for (i, &a) in subs.iter().enumerate() {
        for &b in &subs[i + 1..] {
            let (Some(sa), Some(sb)) = (level.subsectors.get(a), level.subsectors.get(b)) else {
                continue;
            };
            for la in &sa.lines {
                if sb.lines.iter().any(|lb| la.a == lb.b && la.b == lb.a) {
                    additions.push((a, SubNeighbor { sub: b, line: *la, portal: false }));
                    additions.push((b, SubNeighbor { sub: a, line: *la, portal: false }));
                }
            }
        }
    }

    /* portal crossings, both directions of each mutual link */
    for &s in &sides {
        let Some(target) = level.portal_target(s) else {
            continue;
        };
        let Some(other_sec) = level.sides.get(target).and_then(|sd| sd.sector) else {
            continue;
        };
        let here_seg = {
            let (a, b) = level.side_seg(s);
            SegLine { a, b }
        };
        let there_seg = {
            let (a, b) = level.side_seg(target);
            SegLine { a, b }
        };
        let Some(here_sub) = sub_along(level, sec, here_seg) else {
            continue;
        };
        let Some(there_sub) = sub_along(level, other_sec, there_seg) else {
            continue;
        };
        additions.push((
            here_sub,
            SubNeighbor { sub: there_sub, line: here_seg, portal: true },
        ));
        additions.push((
            there_sub,
            SubNeighbor { sub: here_sub, line: there_seg, portal: true },
        ));
    }

    for &sub in &subs {
        if let Some(s) = level.subsectors.get_mut(sub) {
            s.neighbors.clear();
            s.version += 1;
        }
    }
    for (sub, link) in additions {
        if let Some(s) = level.subsectors.get_mut(sub) {
            if !s
                .neighbors
                .iter()
                .any(|n| n.sub == link.sub && n.portal == link.portal && n.line == link.line)
            {
                s.neighbors.push(link);
            }
        }
    }
}

/// The subsector of `sec` whose boundary carries the segment's midpoint.
/// Boundary edges of the convex partition are whole side segments, so the
/// midpoint test is exact enough.
fn sub_along(level: &Level, sec: SectorId, seg: SegLine) -> Option<SubsectorId> {
    let sector = level.sectors.get(sec)?;
    let mid = seg.midpoint();
    sector
        .subs
        .iter()
        .copied()
        .find(|&id| level.subsectors.get(id).is_some_and(|s| s.contains(mid)))
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::SideId;
    use crate::topo::fixtures::{quad_sector, two_rooms};
    use glam::vec2;

    #[test]
    fn visibility_is_reflexive() {
        let (level, sec) = quad_sector();
        assert!(level.vis.get(sec.index(), sec.index()));
    }

    #[test]
    fn portal_rooms_see_each_other() {
        let (level, [sa, sb], _) = two_rooms();
        assert!(level.vis.get(sa.index(), sb.index()));
        assert!(level.vis.get(sb.index(), sa.index()));
    }

    #[test]
    fn unlinking_portal_removes_visibility() {
        let (mut level, [sa, sb], [pa, _pb]) = two_rooms();
        let before: Vec<Vec<u64>> = level
            .sectors
            .iter()
            .map(|(h, _)| level.vis.row(h.index()).to_vec())
            .collect();

        level.set_side_portal(pa, None);
        assert!(!level.vis.get(sa.index(), sb.index()));
        assert!(!level.vis.get(sb.index(), sa.index()));
        // reflexive bits survive
        assert!(level.vis.get(sa.index(), sa.index()));

        // removing a portal never adds a bit to any row
        for ((h, _), old) in level.sectors.iter().zip(&before) {
            let now = level.vis.row(h.index());
            for (w_now, w_old) in now.iter().zip(old) {
                assert_eq!(w_now & !w_old, 0, "row {} grew", h.index());
            }
        }
    }

    #[test]
    fn straight_corridor_sees_through_two_portals() {
        // three rooms in a row, portals on both shared boundaries
        let (mut level, [sa, _sb], _) = two_rooms();
        level.begin_batch();
        let vs = [
            level.add_vertex(vec2(128.0, 0.0)),
            level.add_vertex(vec2(192.0, 0.0)),
            level.add_vertex(vec2(192.0, 64.0)),
            level.add_vertex(vec2(128.0, 64.0)),
        ];
        let mut sides = Vec::new();
        for i in 0..4 {
            let w = level.add_wall(vs[i], vs[(i + 1) % 4]);
            sides.push(level.add_side(w, 0).unwrap());
        }
        level.end_batch();
        level.update_side_sector(sides[0]);
        let sc = level.sides.get(sides[0]).unwrap().sector.unwrap();

        // middle room's east side is the one along x = 128 facing west;
        // find it by geometry rather than construction order
        let sb_east = {
            let mid = vec2(128.0, 32.0);
            level
                .sides
                .iter()
                .find(|(h, _)| {
                    (level.side_midpoint(*h) - mid).length() < 1e-3
                        && level.side_normal(*h).x < 0.0
                })
                .map(|(h, _)| h)
                .unwrap()
        };
        level.set_side_portal(sb_east, Some(sides[3]));
        level.set_side_portal(sides[3], Some(sb_east));

        assert!(level.vis.get(sa.index(), sc.index()), "A sees C down the corridor");
        assert!(level.vis.get(sc.index(), sa.index()));
    }

    fn room(level: &mut Level, x0: f32) -> Vec<SideId> {
        let x1 = x0 + 64.0;
        let ring = [
            vec2(x0, 0.0),
            vec2(x1, 0.0),
            vec2(x1, 16.0),
            vec2(x1, 48.0),
            vec2(x1, 64.0),
            vec2(x0, 64.0),
            vec2(x0, 48.0),
            vec2(x0, 16.0),
        ];
        let vs: Vec<_> = ring.iter().map(|p| level.add_vertex(*p)).collect();
        (0..8)
            .map(|i| {
                let w = level.add_wall(vs[i], vs[(i + 1) % 8]);
                level.add_side(w, 0).unwrap()
            })
            .collect()
    }

    /// Four rooms in a row, low gates (y 0..16) linking every boundary plus
    /// one extra high gate between the first pair. Returns the end sectors
    /// and the C-D gate's side pair.
    fn four_room_row(level: &mut Level) -> (SectorId, SectorId, (SideId, SideId)) {
        level.begin_batch();
        let a = room(level, 0.0);
        let b = room(level, 64.0);
        let c = room(level, 128.0);
        let d = room(level, 192.0);
        level.end_batch();
        for sides in [&a, &b, &c, &d] {
            level.update_side_sector(sides[0]);
        }
        let sa = level.sides.get(a[0]).unwrap().sector.unwrap();
        let sd = level.sides.get(d[0]).unwrap().sector.unwrap();

        // sides[1]/[3] are the east low/high segments, sides[7]/[5] the
        // matching west segments of the next room over
        let gates = [
            (a[1], b[7]), // low gate A-B
            (a[3], b[5]), // high gate A-B
            (b[1], c[7]), // low gate B-C
            (c[1], d[7]), // low gate C-D
        ];
        for (x, y) in gates {
            level.set_side_portal(x, Some(y));
            level.set_side_portal(y, Some(x));
        }
        (sa, sd, gates[3])
    }

    #[test]
    fn second_gate_keeps_the_straight_sightline() {
        // the low gates line up, so A has a straight sightline all the way
        // into D; the high A-B gate opens a path whose wedge cannot reach D.
        // Neither path may shadow the other.
        let mut level = crate::topo::Level::new();
        let (sa, sd, _) = four_room_row(&mut level);

        assert!(
            level.vis.get(sa.index(), sd.index()),
            "straight sightline through the low gates lost"
        );
        assert!(level.vis.get(sd.index(), sa.index()));
    }

    #[test]
    fn unlinking_a_far_gate_clears_stored_rows() {
        // closing the C-D gate must reach back into A's *stored* row, three
        // portals upstream of the edit
        let mut level = crate::topo::Level::new();
        let (sa, sd, (cd, dc)) = four_room_row(&mut level);
        assert!(level.vis.get(sa.index(), sd.index()));

        level.set_side_portal(cd, None);
        level.set_side_portal(dc, None);

        assert!(
            !level.vis.get(sa.index(), sd.index()),
            "A kept a stale bit for the sealed-off room"
        );
        assert!(!level.vis.get(sd.index(), sa.index()));
    }

    #[test]
    fn wedge_accepts_aligned_and_rejects_behind() {
        let src = SegLine { a: vec2(0.0, 0.0), b: vec2(0.0, 64.0) };
        let ent = SegLine { a: vec2(64.0, 0.0), b: vec2(64.0, 64.0) };
        let ahead = SegLine { a: vec2(128.0, 0.0), b: vec2(128.0, 64.0) };
        let behind = SegLine { a: vec2(-64.0, 0.0), b: vec2(-64.0, 64.0) };
        assert!(in_wedge(src, ent, ahead));
        assert!(!in_wedge(src, ent, behind));
    }

    #[test]
    fn matrix_growth_preserves_bits() {
        let mut m = VisMatrix::new();
        m.ensure_slots(3);
        m.set(1, 2, true);
        m.ensure_slots(130);
        assert_eq!(m.capacity(), 192);
        assert!(m.get(1, 2));
        assert!(!m.get(2, 1));
        m.clear_column(2);
        assert!(!m.get(1, 2));
    }
}
