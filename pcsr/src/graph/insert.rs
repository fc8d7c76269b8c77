//! The insert protocol.
//!
//! An insert locates its position under the global shared lock, exclusively
//! locks the leaf holding that position, revalidates against the live slots,
//! then extends its lock range as needed: rightwards (or leftwards) to the
//! first empty slot it will slide into, and outwards to the smallest aligned
//! window whose occupancy stays inside its band once the edge lands. Lock
//! extension uses timed try-locks; a timeout or failed revalidation releases
//! everything and retries from the top. When the retry budget runs out, or
//! the plan would span the root, the operation re-runs under the global
//! exclusive lock, doubling the array there if the root band requires it.

use super::rebalance::{grow, redistribute, slide_left, slide_right};
use super::search::{locate, LocateError};
use super::{GraphError, Pcsr, VertexEntry};
use crate::containers::packed_array::{LeafLockSet, LockTimeout};
use crate::containers::PackedArray;
use crate::types::{EdgeSlot, EdgeValue, VertexId, SENTINEL_DEST};

/// Outcome of one locked attempt at a mutation.
pub(crate) enum Attempt {
    Done,
    Retry,
    NeedGlobalWrite,
}

/// Result of revalidating a located index under the leaf lock.
enum Validation {
    Valid,
    Duplicate,
    Stale,
}

/// Where the occupancy change lands in the implicit tree.
pub(crate) enum WindowPlan {
    /// The leaf absorbs the change; slide only.
    Local,
    /// Repack this aligned window after the change.
    Redistribute { start: usize, len: usize },
    /// Every window up to the root is outside its band.
    Root,
}

/// The empty slot a slide will shift into.
struct SlideTarget {
    right: bool,
    first_empty: usize,
}

impl Pcsr {
    /// Insert the edge `(src, dest)`. Inserting an edge that already exists
    /// is a no-op and never overwrites the stored value.
    pub fn add_edge(&self, src: VertexId, dest: VertexId, value: EdgeValue) -> Result<(), GraphError> {
        if value == 0 {
            // Zero marks empty slots; there is nothing to store.
            return Ok(());
        }
        if dest == SENTINEL_DEST {
            return Err(GraphError::VertexOutOfRange {
                vertex: dest,
                count: self.vertex_count(),
            });
        }
        let elem = EdgeSlot::edge(src, dest, value);
        for _ in 0..self.max_retries {
            let outcome = {
                let arr = self.storage.read();
                let verts = self.vertices.read();
                let entry = verts
                    .get(src as usize)
                    .ok_or(GraphError::VertexOutOfRange {
                        vertex: src,
                        count: verts.len(),
                    })?;
                match locate(&arr, entry, src, dest, self.lock_search) {
                    Ok(found) if found.duplicate => return Ok(()),
                    Ok(found) => try_insert(&arr, &verts, src, elem, found.index, false),
                    Err(LocateError::Gone) => {
                        return Err(GraphError::VertexOutOfRange {
                            vertex: src,
                            count: verts.len(),
                        })
                    }
                    Err(LocateError::Conflict) => Attempt::Retry,
                }
            };
            match outcome {
                Attempt::Done => return Ok(()),
                Attempt::Retry => std::thread::yield_now(),
                Attempt::NeedGlobalWrite => return self.add_edge_exclusive(src, elem),
            }
        }
        self.add_edge_exclusive(src, elem)
    }

    /// Insert with the array quiesced: the escalation path for exhausted
    /// retries and root-spanning plans. Doubles the array as often as the
    /// root band requires.
    fn add_edge_exclusive(&self, src: VertexId, elem: EdgeSlot) -> Result<(), GraphError> {
        tracing::debug!(src, dest = elem.dest, "edge insert escalated to the global write lock");
        let mut arr = self.storage.write();
        let verts = self.vertices.read();
        let entry = verts
            .get(src as usize)
            .ok_or(GraphError::VertexOutOfRange {
                vertex: src,
                count: verts.len(),
            })?;
        loop {
            let found = match locate(&arr, entry, src, elem.dest, false) {
                Ok(found) => found,
                Err(LocateError::Gone) => {
                    return Err(GraphError::VertexOutOfRange {
                        vertex: src,
                        count: verts.len(),
                    })
                }
                Err(LocateError::Conflict) => continue,
            };
            if found.duplicate {
                return Ok(());
            }
            match try_insert(&arr, &verts, src, elem, found.index, true) {
                Attempt::Done => return Ok(()),
                Attempt::Retry => continue,
                Attempt::NeedGlobalWrite => grow(&mut arr, &verts),
            }
        }
    }
}

/// One locked insertion attempt at a previously located index.
fn try_insert(
    arr: &PackedArray,
    verts: &[VertexEntry],
    src: VertexId,
    elem: EdgeSlot,
    index: usize,
    exclusive: bool,
) -> Attempt {
    let anchor = index.min(arr.len() - 1);
    let anchor_leaf = arr.leaf_of(anchor);
    let mut locks = if exclusive {
        LeafLockSet::unguarded(arr, anchor_leaf)
    } else {
        LeafLockSet::new(arr, anchor_leaf)
    };

    match validate_insertion_point(arr, verts, &mut locks, src, elem.dest, index) {
        Ok(Validation::Valid) => {}
        Ok(Validation::Duplicate) => return Attempt::Done,
        Ok(Validation::Stale) | Err(LockTimeout) => return Attempt::Retry,
    }
    let target = match find_slide_target(arr, &mut locks, index) {
        Ok(Some(target)) => target,
        Ok(None) => return Attempt::NeedGlobalWrite,
        Err(LockTimeout) => return Attempt::Retry,
    };
    let plan = match plan_insert_window(arr, &mut locks, anchor, target.first_empty) {
        Ok(WindowPlan::Root) => return Attempt::NeedGlobalWrite,
        Ok(plan) => plan,
        Err(LockTimeout) => return Attempt::Retry,
    };

    locks.begin_mutation();
    let final_pos = if target.right {
        slide_right(arr, verts, index, target.first_empty);
        arr.write_slot(index, elem);
        index
    } else {
        slide_left(arr, verts, target.first_empty, index);
        arr.write_slot(index - 1, elem);
        index - 1
    };
    let entry = &verts[src as usize];
    if final_pos as u32 >= entry.end() {
        entry.set_end(final_pos as u32 + 1);
    }
    entry.inc_degree();
    if let WindowPlan::Redistribute { start, len } = plan {
        redistribute(arr, verts, start, len);
    }
    Attempt::Done
}

/// Place the sentinel for a freshly appended vertex, with the array
/// quiesced under the global exclusive lock.
pub(crate) fn insert_sentinel_exclusive(arr: &mut PackedArray, verts: &[VertexEntry], id: VertexId) {
    let elem = EdgeSlot::sentinel(id);
    loop {
        let index = if id == 0 {
            0
        } else {
            verts[id as usize - 1].end() as usize
        };
        let anchor = index.min(arr.len() - 1);
        let mut locks = LeafLockSet::unguarded(arr, arr.leaf_of(anchor));
        let target = match find_slide_target(arr, &mut locks, index) {
            Ok(Some(target)) => target,
            Ok(None) => {
                drop(locks);
                grow(arr, verts);
                continue;
            }
            Err(LockTimeout) => continue,
        };
        let plan = match plan_insert_window(arr, &mut locks, anchor, target.first_empty) {
            Ok(WindowPlan::Root) => {
                drop(locks);
                grow(arr, verts);
                continue;
            }
            Ok(plan) => plan,
            Err(LockTimeout) => continue,
        };

        locks.begin_mutation();
        let final_pos = if target.right {
            slide_right(arr, verts, index, target.first_empty);
            arr.write_slot(index, elem);
            index
        } else {
            slide_left(arr, verts, target.first_empty, index);
            arr.write_slot(index - 1, elem);
            index - 1
        };
        let entry = &verts[id as usize];
        entry.set_begin(final_pos as u32);
        entry.set_end(final_pos as u32 + 1);
        if let WindowPlan::Redistribute { start, len } = plan {
            redistribute(arr, verts, start, len);
        }
        return;
    }
}

/// Re-check a located insertion index against the live slots, growing the
/// lock range to wherever the neighbouring real slots sit.
fn validate_insertion_point(
    arr: &PackedArray,
    verts: &[VertexEntry],
    locks: &mut LeafLockSet<'_>,
    src: VertexId,
    dest: VertexId,
    index: usize,
) -> Result<Validation, LockTimeout> {
    let entry = &verts[src as usize];
    if entry.tombstoned() {
        return Ok(Validation::Stale);
    }
    let begin = entry.begin() as usize;
    let end = entry.end() as usize;
    if begin >= arr.len() || end > arr.len() || index <= begin || index > end {
        return Ok(Validation::Stale);
    }

    // Forward: the next real slot must order at or after the new edge and
    // must not already hold it.
    let mut probe = index;
    while probe < arr.len() && probe < entry.end() as usize {
        locks.cover(arr.leaf_of(probe))?;
        let slot = arr.slot(probe);
        if slot.is_null() {
            probe += 1;
            continue;
        }
        if slot.is_sentinel() {
            break; // the next vertex's run begins here
        }
        if slot.src != src || slot.dest < dest {
            return Ok(Validation::Stale);
        }
        if slot.dest == dest {
            return Ok(Validation::Duplicate);
        }
        break;
    }

    // Backward: the closest preceding real slot must be this vertex's
    // sentinel or an edge ordering strictly before the new one.
    let mut probe = index;
    loop {
        if probe == 0 || probe <= begin {
            return Ok(Validation::Stale);
        }
        probe -= 1;
        locks.cover(arr.leaf_of(probe))?;
        let slot = arr.slot(probe);
        if slot.is_null() {
            continue;
        }
        if slot.is_sentinel() {
            return Ok(if slot.sentinel_vertex() == src {
                Validation::Valid
            } else {
                Validation::Stale
            });
        }
        if slot.src != src {
            return Ok(Validation::Stale);
        }
        if slot.dest == dest {
            return Ok(Validation::Duplicate);
        }
        return Ok(if slot.dest < dest {
            Validation::Valid
        } else {
            Validation::Stale
        });
    }
}

/// Scan for the empty slot a slide will consume, locking leaves in the scan
/// direction as it goes. Prefers the right; falls back to the left when the
/// array is packed to its upper edge. `None` means no empty slot exists.
fn find_slide_target(
    arr: &PackedArray,
    locks: &mut LeafLockSet<'_>,
    index: usize,
) -> Result<Option<SlideTarget>, LockTimeout> {
    if index < arr.len() {
        locks.cover(arr.leaf_of(index))?;
        if arr.is_null(index) {
            return Ok(Some(SlideTarget {
                right: true,
                first_empty: index,
            }));
        }
        for j in index + 1..arr.len() {
            locks.cover(arr.leaf_of(j))?;
            if arr.is_null(j) {
                return Ok(Some(SlideTarget {
                    right: true,
                    first_empty: j,
                }));
            }
        }
    }
    for j in (0..index.min(arr.len())).rev() {
        locks.cover(arr.leaf_of(j))?;
        if arr.is_null(j) {
            return Ok(Some(SlideTarget {
                right: false,
                first_empty: j,
            }));
        }
    }
    Ok(None)
}

/// Climb the implicit tree from the leaf holding `anchor` until a window
/// absorbs the occupancy change within its band. A slide changes the
/// occupancy bitmap at exactly the consumed empty slot, so a window's
/// occupancy grows only when `first_empty` falls inside it.
fn plan_insert_window(
    arr: &PackedArray,
    locks: &mut LeafLockSet<'_>,
    anchor: usize,
    first_empty: usize,
) -> Result<WindowPlan, LockTimeout> {
    let mut level = 0;
    loop {
        let len = arr.window_len(level);
        let start = arr.window_start(anchor, level);
        locks.cover_span(start, len)?;
        let mut occupied = arr.count_occupied(start, len);
        if first_empty >= start && first_empty < start + len {
            occupied += 1;
        }
        let (_, upper) = arr.density_bounds(level);
        if (occupied as f64) < upper * len as f64 {
            return Ok(if level == 0 {
                WindowPlan::Local
            } else {
                WindowPlan::Redistribute { start, len }
            });
        }
        if level == arr.height() {
            return Ok(WindowPlan::Root);
        }
        level += 1;
    }
}
