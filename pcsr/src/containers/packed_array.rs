//! Packed edge array with leaf-grained synchronization.
//!
//! The array is a single contiguous sequence of edge slots, logically
//! partitioned into fixed-size *leaves*. Adjacent leaves compose aligned
//! *windows* up the implicit complete binary tree over the array; each tree
//! level has a permitted occupancy band, loosest at the leaves and tightest
//! at the root.
//!
//! Each slot stores its fields in independent atomics so that readers in
//! lock-free search mode never observe garbage. Torn (mixed-generation)
//! slots are rejected through the per-leaf version counters, which form a
//! seqlock: a writer holding a leaf's exclusive lock bumps the counter once
//! before its first write (odd = mutation in flight) and once on release
//! (even = stable). Readers load versions with `Acquire` and writers bump
//! with `Release`.

use crate::types::EdgeSlot;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::time::Duration;

/// Smallest array size; halving never goes below this.
pub const MIN_CAPACITY: usize = 16;

/// How long to wait when extending an already-held range of leaf locks.
/// Expiry releases everything and retries the whole operation, so this only
/// bounds how long two overlapping lock plans can stall each other.
const EXTEND_TIMEOUT: Duration = Duration::from_millis(1);

/// One slot with independently atomic fields.
///
/// Mutation happens only under the owning leaf's exclusive lock; the atomics
/// exist so concurrent lock-free readers get well-defined values.
struct PackedSlot {
    src: AtomicU32,
    dest: AtomicU32,
    value: AtomicU32,
}

impl PackedSlot {
    fn empty() -> Self {
        Self {
            src: AtomicU32::new(0),
            dest: AtomicU32::new(0),
            value: AtomicU32::new(0),
        }
    }

    #[inline]
    fn load(&self) -> EdgeSlot {
        EdgeSlot {
            src: self.src.load(Ordering::Acquire),
            dest: self.dest.load(Ordering::Acquire),
            value: self.value.load(Ordering::Acquire),
        }
    }

    #[inline]
    fn store(&self, slot: EdgeSlot) {
        // Value goes last: a slot never reads as occupied before src/dest land.
        self.src.store(slot.src, Ordering::Release);
        self.dest.store(slot.dest, Ordering::Release);
        self.value.store(slot.value, Ordering::Release);
    }

    #[inline]
    fn clear(&self) {
        // Value goes first: the slot reads as null for the rest of the wipe.
        self.value.store(0, Ordering::Release);
        self.src.store(0, Ordering::Release);
        self.dest.store(0, Ordering::Release);
    }
}

/// The packed edge array: slot storage plus per-leaf locks and versions.
///
/// Replaced wholesale on doubling/halving, which the owner performs under its
/// global exclusive lock.
pub struct PackedArray {
    slots: Box<[PackedSlot]>,
    leaf_size: usize,
    height: u32,
    leaf_locks: Box<[RwLock<()>]>,
    leaf_versions: Box<[AtomicU32]>,
}

impl PackedArray {
    /// Create an empty array of `capacity` slots.
    ///
    /// `capacity` must be a power of two, at least [`MIN_CAPACITY`]. The leaf
    /// size is the largest power of two not exceeding `log2(capacity) + 1`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity >= MIN_CAPACITY);
        let log_n = capacity.trailing_zeros() as usize;
        let leaf_size = prev_power_of_two(log_n + 1);
        let leaf_count = capacity / leaf_size;
        let height = leaf_count.trailing_zeros();

        let slots: Vec<PackedSlot> = (0..capacity).map(|_| PackedSlot::empty()).collect();
        let leaf_locks: Vec<RwLock<()>> = (0..leaf_count).map(|_| RwLock::new(())).collect();
        let leaf_versions: Vec<AtomicU32> = (0..leaf_count).map(|_| AtomicU32::new(0)).collect();

        Self {
            slots: slots.into_boxed_slice(),
            leaf_size,
            height,
            leaf_locks: leaf_locks.into_boxed_slice(),
            leaf_versions: leaf_versions.into_boxed_slice(),
        }
    }

    /// Total number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the array holds no slots (never true in practice).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots per leaf.
    #[inline]
    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Number of leaves.
    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.leaf_locks.len()
    }

    /// Height of the implicit tree: level 0 are the leaves, level `height()`
    /// is the root window spanning the whole array.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Leaf containing slot `index`.
    #[inline]
    pub fn leaf_of(&self, index: usize) -> usize {
        index / self.leaf_size
    }

    /// Slot range `[start, end)` of a leaf.
    #[inline]
    pub fn leaf_bounds(&self, leaf: usize) -> (usize, usize) {
        (leaf * self.leaf_size, (leaf + 1) * self.leaf_size)
    }

    /// Start of the level-`level` window containing slot `index`.
    #[inline]
    pub fn window_start(&self, index: usize, level: u32) -> usize {
        let len = self.window_len(level);
        index / len * len
    }

    /// Slot length of a level-`level` window.
    #[inline]
    pub fn window_len(&self, level: u32) -> usize {
        self.leaf_size << level
    }

    /// Permitted occupancy band `(lower, upper)` for a window at `level`.
    ///
    /// Interpolates linearly from `[1/8, 1]` at the leaves to `[1/4, 1/2]`
    /// at the root.
    pub fn density_bounds(&self, level: u32) -> (f64, f64) {
        if self.height == 0 {
            return (0.25, 0.5);
        }
        let depth = (self.height - level) as f64;
        let h = self.height as f64;
        let lower = 0.25 - depth / (8.0 * h);
        let upper = 0.5 + depth / (2.0 * h);
        (lower, upper)
    }

    /// Read a slot. The caller must hold a lock covering the slot's leaf, or
    /// the array's owner must be quiesced under its global exclusive lock.
    #[inline]
    pub fn slot(&self, index: usize) -> EdgeSlot {
        self.slots[index].load()
    }

    /// Whether a slot is currently empty (single atomic load).
    #[inline]
    pub fn is_null(&self, index: usize) -> bool {
        self.slots[index].value.load(Ordering::Acquire) == 0
    }

    /// Read a slot without holding any lock, validated against the owning
    /// leaf's version counter. Returns `None` when a mutation was in flight
    /// or completed mid-read; the caller retries.
    pub fn slot_validated(&self, index: usize) -> Option<EdgeSlot> {
        let leaf = self.leaf_of(index);
        let before = self.leaf_versions[leaf].load(Ordering::Acquire);
        if before & 1 != 0 {
            return None;
        }
        let slot = self.slots[index].load();
        fence(Ordering::Acquire);
        let after = self.leaf_versions[leaf].load(Ordering::Acquire);
        (after == before).then_some(slot)
    }

    /// Write a slot. The caller must hold the leaf's exclusive lock (or the
    /// global exclusive lock) and have announced the mutation.
    #[inline]
    pub fn write_slot(&self, index: usize, slot: EdgeSlot) {
        self.slots[index].store(slot);
    }

    /// Empty a slot, under the same locking obligations as [`write_slot`].
    ///
    /// [`write_slot`]: Self::write_slot
    #[inline]
    pub fn clear_slot(&self, index: usize) {
        self.slots[index].clear();
    }

    /// Current version of a leaf.
    #[inline]
    pub fn version(&self, leaf: usize) -> u32 {
        self.leaf_versions[leaf].load(Ordering::Acquire)
    }

    #[inline]
    fn bump_version(&self, leaf: usize) {
        self.leaf_versions[leaf].fetch_add(1, Ordering::Release);
    }

    /// Shared-lock a leaf (lock-assisted search, iteration).
    #[inline]
    pub fn read_leaf(&self, leaf: usize) -> RwLockReadGuard<'_, ()> {
        self.leaf_locks[leaf].read()
    }

    /// Exclusively lock a leaf, blocking. Used only for the first leaf of a
    /// lock plan; a thread holding no leaf locks cannot be part of a cycle.
    #[inline]
    fn write_leaf(&self, leaf: usize) -> RwLockWriteGuard<'_, ()> {
        self.leaf_locks[leaf].write()
    }

    #[inline]
    fn try_write_leaf(&self, leaf: usize) -> Option<RwLockWriteGuard<'_, ()>> {
        self.leaf_locks[leaf].try_write_for(EXTEND_TIMEOUT)
    }

    /// Count occupied slots in `[start, start + len)`.
    pub fn count_occupied(&self, start: usize, len: usize) -> usize {
        (start..start + len).filter(|&i| !self.is_null(i)).count()
    }
}

/// Largest power of two not exceeding `n`.
fn prev_power_of_two(n: usize) -> usize {
    debug_assert!(n > 0);
    1 << (usize::BITS - 1 - n.leading_zeros())
}

/// Signals that extending a lock plan timed out; the operation releases
/// everything it holds and retries from the top.
#[derive(Debug)]
pub(crate) struct LockTimeout;

/// A contiguous range of exclusively held leaves.
///
/// The first leaf is acquired blocking; every extension in either direction
/// uses a timed try-lock so overlapping plans cannot deadlock. Version
/// counters are bumped for the whole range when the holder announces its
/// mutation and again on drop, restoring even parity; plans abandoned before
/// any write leave the counters untouched.
pub(crate) struct LeafLockSet<'a> {
    arr: &'a PackedArray,
    lo: usize,
    hi: usize,
    guards: VecDeque<RwLockWriteGuard<'a, ()>>,
    guarded: bool,
    dirty: bool,
}

impl<'a> LeafLockSet<'a> {
    /// Exclusively lock `leaf` (blocking) as the start of a plan.
    pub fn new(arr: &'a PackedArray, leaf: usize) -> Self {
        let guard = arr.write_leaf(leaf);
        let mut guards = VecDeque::new();
        guards.push_back(guard);
        Self {
            arr,
            lo: leaf,
            hi: leaf,
            guards,
            guarded: true,
            dirty: false,
        }
    }

    /// A lock-free variant for callers that already hold the global exclusive
    /// lock: range tracking only, no leaf guards.
    pub fn unguarded(arr: &'a PackedArray, leaf: usize) -> Self {
        Self {
            arr,
            lo: leaf,
            hi: leaf,
            guards: VecDeque::new(),
            guarded: false,
            dirty: false,
        }
    }

    /// Grow the held range until it includes `leaf`.
    pub fn cover(&mut self, leaf: usize) -> Result<(), LockTimeout> {
        debug_assert!(!self.dirty, "lock plan extended after mutation started");
        while self.hi < leaf {
            if self.guarded {
                match self.arr.try_write_leaf(self.hi + 1) {
                    Some(g) => self.guards.push_back(g),
                    None => return Err(LockTimeout),
                }
            }
            self.hi += 1;
        }
        while self.lo > leaf {
            if self.guarded {
                match self.arr.try_write_leaf(self.lo - 1) {
                    Some(g) => self.guards.push_front(g),
                    None => return Err(LockTimeout),
                }
            }
            self.lo -= 1;
        }
        Ok(())
    }

    /// Grow the held range to cover the slot span `[start, start + len)`.
    pub fn cover_span(&mut self, start: usize, len: usize) -> Result<(), LockTimeout> {
        self.cover(self.arr.leaf_of(start))?;
        self.cover(self.arr.leaf_of(start + len - 1))
    }

    /// Announce that the held leaves are about to be mutated: flips every
    /// covered version counter to odd, making in-flight lock-free reads fail
    /// their recheck.
    pub fn begin_mutation(&mut self) {
        for leaf in self.lo..=self.hi {
            self.arr.bump_version(leaf);
        }
        self.dirty = true;
    }
}

impl Drop for LeafLockSet<'_> {
    fn drop(&mut self) {
        if self.dirty {
            for leaf in self.lo..=self.hi {
                self.arr.bump_version(leaf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EdgeSlot;

    #[test]
    fn test_geometry() {
        let arr = PackedArray::new(16);
        assert_eq!(arr.len(), 16);
        assert_eq!(arr.leaf_size(), 4);
        assert_eq!(arr.leaf_count(), 4);
        assert_eq!(arr.height(), 2);
        assert_eq!(arr.leaf_of(0), 0);
        assert_eq!(arr.leaf_of(7), 1);
        assert_eq!(arr.leaf_bounds(2), (8, 12));
        assert_eq!(arr.window_len(1), 8);
        assert_eq!(arr.window_start(13, 1), 8);
        assert_eq!(arr.window_start(13, 2), 0);
    }

    #[test]
    fn test_geometry_larger() {
        let arr = PackedArray::new(1024);
        assert_eq!(arr.leaf_size(), 8);
        assert_eq!(arr.leaf_count(), 128);
        assert_eq!(arr.height(), 7);
    }

    #[test]
    fn test_density_bounds_endpoints() {
        let arr = PackedArray::new(16);
        let (leaf_lo, leaf_hi) = arr.density_bounds(0);
        assert!((leaf_lo - 0.125).abs() < 1e-9);
        assert!((leaf_hi - 1.0).abs() < 1e-9);
        let (root_lo, root_hi) = arr.density_bounds(arr.height());
        assert!((root_lo - 0.25).abs() < 1e-9);
        assert!((root_hi - 0.5).abs() < 1e-9);
        // Intermediate levels interpolate monotonically.
        let (mid_lo, mid_hi) = arr.density_bounds(1);
        assert!(leaf_lo < mid_lo && mid_lo < root_lo);
        assert!(root_hi < mid_hi && mid_hi < leaf_hi);
    }

    #[test]
    fn test_slot_round_trip() {
        let arr = PackedArray::new(16);
        assert!(arr.is_null(3));
        arr.write_slot(3, EdgeSlot::edge(1, 2, 1));
        assert_eq!(arr.slot(3), EdgeSlot::edge(1, 2, 1));
        assert_eq!(arr.count_occupied(0, 16), 1);
        arr.clear_slot(3);
        assert!(arr.is_null(3));
        assert_eq!(arr.count_occupied(0, 16), 0);
    }

    #[test]
    fn test_validated_read_rejects_in_flight_mutation() {
        let arr = PackedArray::new(16);
        arr.write_slot(0, EdgeSlot::sentinel(0));
        assert_eq!(arr.slot_validated(0), Some(EdgeSlot::sentinel(0)));

        let mut locks = LeafLockSet::new(&arr, 0);
        locks.begin_mutation();
        // Odd version: an in-flight mutation must fail the recheck.
        assert_eq!(arr.slot_validated(0), None);
        drop(locks);
        // Parity restored on release.
        assert_eq!(arr.slot_validated(0), Some(EdgeSlot::sentinel(0)));
    }

    #[test]
    fn test_lock_set_covers_span() {
        let arr = PackedArray::new(16);
        let mut locks = LeafLockSet::new(&arr, 1);
        locks.cover_span(0, 16).expect("uncontended");
        locks.begin_mutation();
        drop(locks);
        for leaf in 0..arr.leaf_count() {
            assert_eq!(arr.version(leaf) % 2, 0);
            assert!(arr.version(leaf) >= 2);
        }
    }
}
