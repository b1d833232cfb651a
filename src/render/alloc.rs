//! GPU-side buffer bookkeeping, API-neutral.
//!
//! [`SpanAlloc`] hands out first-fit spans of an abstract buffer and
//! coalesces on free. [`RenderCache`] sits on top and maps entity keys to
//! versioned spans: a mesh whose entity version did not change keeps its
//! span, anything stale is freed and re-placed. A renderer-version bump
//! invalidates every record at once without touching the entities.

use std::collections::HashMap;

use log::warn;

/// First-fit span allocator over `capacity` abstract units.
pub struct SpanAlloc {
    capacity: u32,
    /// Free spans as `(start, len)`, kept sorted by start and coalesced.
    free: Vec<(u32, u32)>,
}

impl SpanAlloc {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            free: vec![(0, capacity)],
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn free_total(&self) -> u32 {
        self.free.iter().map(|&(_, len)| len).sum()
    }

    /// First free span large enough, split on allocation.
    pub fn alloc(&mut self, len: u32) -> Option<u32> {
        if len == 0 {
            return None;
        }
        let i = self.free.iter().position(|&(_, l)| l >= len)?;
        let (start, avail) = self.free[i];
        if avail == len {
            self.free.remove(i);
        } else {
            self.free[i] = (start + len, avail - len);
        }
        Some(start)
    }

    /// Return a span, merging with adjacent free spans.
    pub fn free(&mut self, start: u32, len: u32) {
        if len == 0 {
            return;
        }
        let i = self.free.partition_point(|&(s, _)| s < start);
        debug_assert!(
            i == 0 || self.free[i - 1].0 + self.free[i - 1].1 <= start,
            "double free"
        );
        self.free.insert(i, (start, len));
        // coalesce with the right neighbor, then the left
        if i + 1 < self.free.len() && self.free[i].0 + self.free[i].1 == self.free[i + 1].0 {
            self.free[i].1 += self.free[i + 1].1;
            self.free.remove(i + 1);
        }
        if i > 0 && self.free[i - 1].0 + self.free[i - 1].1 == self.free[i].0 {
            self.free[i - 1].1 += self.free[i].1;
            self.free.remove(i);
        }
    }

    pub fn reset(&mut self) {
        self.free = vec![(0, self.capacity)];
    }
}

/*──────────────────────────── cache ──────────────────────────────────*/

#[derive(Clone, Copy, Debug)]
pub struct MeshRecord {
    pub version: u64,
    pub start: u32,
    pub len: u32,
}

/// Outcome of [`RenderCache::ensure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheSlot {
    /// Record is current; the span holds valid data.
    Hit { start: u32 },
    /// New or stale; the caller must (re)upload into the span.
    Upload { start: u32, len: u32 },
}

/// Versioned span records keyed by entity key (`Handle::key`).
pub struct RenderCache {
    spans: SpanAlloc,
    records: HashMap<u64, MeshRecord>,
    /// Bumped by [`RenderCache::invalidate_all`]; folded into record
    /// versions so old records miss without being visited.
    renderer_version: u64,
}

impl RenderCache {
    pub fn new(capacity: u32) -> Self {
        Self {
            spans: SpanAlloc::new(capacity),
            records: HashMap::new(),
            renderer_version: 0,
        }
    }

    fn stamp(&self, version: u64) -> u64 {
        // renderer version in the high bits; entity versions stay small
        self.renderer_version << 48 | (version & 0xffff_ffff_ffff)
    }

    /// Place (or keep) the record for `key` at `version` with `len` units.
    /// `None` when the buffer cannot fit the mesh; the caller skips the
    /// draw rather than corrupting a neighbor.
    pub fn ensure(&mut self, key: u64, version: u64, len: u32) -> Option<CacheSlot> {
        let want = self.stamp(version);
        if let Some(rec) = self.records.get(&key) {
            if rec.version == want && rec.len == len {
                return Some(CacheSlot::Hit { start: rec.start });
            }
            let rec = self.records.remove(&key).unwrap();
            self.spans.free(rec.start, rec.len);
        }
        let Some(start) = self.spans.alloc(len) else {
            warn!("render cache full: {len} units for key {key:#x} do not fit");
            return None;
        };
        self.records.insert(
            key,
            MeshRecord {
                version: want,
                start,
                len,
            },
        );
        Some(CacheSlot::Upload { start, len })
    }

    /// Drop the record for a deleted entity.
    pub fn evict(&mut self, key: u64) {
        if let Some(rec) = self.records.remove(&key) {
            self.spans.free(rec.start, rec.len);
        }
    }

    /// Forget everything, e.g. after a level swap or a lost device.
    pub fn invalidate_all(&mut self) {
        self.renderer_version += 1;
        self.records.clear();
        self.spans.reset();
    }

    pub fn record(&self, key: u64) -> Option<&MeshRecord> {
        self.records.get(&key)
    }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_and_coalesce() {
        let mut a = SpanAlloc::new(100);
        let s0 = a.alloc(30).unwrap();
        let s1 = a.alloc(30).unwrap();
        let s2 = a.alloc(30).unwrap();
        assert_eq!((s0, s1, s2), (0, 30, 60));
        a.free(s1, 30);
        // hole reused first-fit
        assert_eq!(a.alloc(20), Some(30));
        a.free(30, 20);
        a.free(s0, 30);
        a.free(s2, 30);
        // everything coalesced back into one span
        assert_eq!(a.free_total(), 100);
        assert_eq!(a.alloc(100), Some(0));
    }

    #[test]
    fn alloc_fails_when_fragmented() {
        let mut a = SpanAlloc::new(90);
        let s0 = a.alloc(30).unwrap();
        let _s1 = a.alloc(30).unwrap();
        let _s2 = a.alloc(30).unwrap();
        a.free(s0, 30);
        // 30 free but no contiguous 40
        assert_eq!(a.alloc(40), None);
        assert_eq!(a.alloc(30), Some(0));
    }

    #[test]
    fn cache_hit_until_version_changes() {
        let mut c = RenderCache::new(100);
        let up = c.ensure(7, 1, 40).unwrap();
        assert!(matches!(up, CacheSlot::Upload { start: 0, len: 40 }));
        assert_eq!(c.ensure(7, 1, 40), Some(CacheSlot::Hit { start: 0 }));
        // version bump forces a re-upload, same span is fine
        assert!(matches!(
            c.ensure(7, 2, 40),
            Some(CacheSlot::Upload { .. })
        ));
    }

    #[test]
    fn invalidate_all_misses_every_record() {
        let mut c = RenderCache::new(100);
        c.ensure(1, 5, 10).unwrap();
        c.ensure(2, 5, 10).unwrap();
        c.invalidate_all();
        assert!(matches!(
            c.ensure(1, 5, 10),
            Some(CacheSlot::Upload { .. })
        ));
    }

    #[test]
    fn oversized_mesh_is_skipped_not_fatal() {
        let mut c = RenderCache::new(50);
        assert!(c.ensure(1, 0, 60).is_none());
        // the failed attempt leaked nothing
        assert!(matches!(
            c.ensure(2, 0, 50),
            Some(CacheSlot::Upload { start: 0, len: 50 })
        ));
    }
}
