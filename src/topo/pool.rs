//! Generational slot arena.
//!
//! Every topology entity is reached through a `Handle<T>`: a slot index plus
//! the generation the slot carried when the handle was issued. Freeing a slot
//! bumps its generation, so a stale handle resolves to `None` instead of
//! silently aliasing whatever entity reused the slot.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed `(slot index, generation)` reference into a [`Pool`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index. Only meaningful together with the owning pool.
    #[inline(always)]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline(always)]
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Stable 64-bit identity, used as an allocator/cache key.
    #[inline]
    pub fn key(self) -> u64 {
        (self.index as u64) << 32 | self.generation as u64
    }
}

/* manual impls: derives would needlessly bound on `T` */

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    data: Option<T>,
}

/// Slot arena with generation-checked access.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever allocated (live + free). Matrix rows and dense
    /// save indices are sized by this, not by `len`.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.data.is_none());
            slot.data = Some(value);
            return Handle::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            data: Some(value),
        });
        Handle::new(index, 0)
    }

    /// Remove the entity behind `handle`, bumping the slot generation.
    /// Stale or already-freed handles return `None`.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() || slot.data.is_none() {
            return None;
        }
        // The slot is never popped, even at the tail: a popped-and-regrown
        // slot would restart at generation 0 and alias old handles.
        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        let value = slot.data.take();
        self.free.push(handle.index() as u32);
        value
    }

    #[inline]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.data.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.data.as_mut()
    }

    #[inline]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Handle for a raw slot index, if the slot is live. Used by the loader's
    /// patch pass and by matrix-row reverse lookups.
    pub fn handle_at(&self, index: usize) -> Option<Handle<T>> {
        let slot = self.slots.get(index)?;
        slot.data.as_ref()?;
        Some(Handle::new(index as u32, slot.generation))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.data
                .as_ref()
                .map(|d| (Handle::new(i as u32, s.generation), d))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            s.data
                .as_mut()
                .map(|d| (Handle::new(i as u32, s.generation), d))
        })
    }

    /// All live handles, in slot order.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(h, _)| h).collect()
    }
}

/*====================================================================*/
/*                               Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut pool: Pool<i32> = Pool::new();
        let a = pool.insert(1);
        let b = pool.insert(2);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(a), Some(&1));
        assert_eq!(pool.remove(a), Some(1));
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.get(b), Some(&2));
    }

    #[test]
    fn stale_handle_detected_after_reuse() {
        let mut pool: Pool<i32> = Pool::new();
        let _keep = pool.insert(0); // pin slot 0 so slot 1 gets recycled
        let a = pool.insert(10);
        pool.remove(a);
        let b = pool.insert(20);
        // slot reused, generation bumped
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.get(b), Some(&20));
    }

    #[test]
    fn double_remove_is_noop() {
        let mut pool: Pool<i32> = Pool::new();
        let a = pool.insert(5);
        assert_eq!(pool.remove(a), Some(5));
        assert_eq!(pool.remove(a), None);
        assert_eq!(pool.len(), 0);
    }
}
