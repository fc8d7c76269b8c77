//! Insertion-point location within a vertex run.
//!
//! Both membership queries and the mutation protocols start here: a binary
//! search over the vertex's slot range that skips null padding by linear
//! probing. In lock-assisted mode every probed slot is read under the owning
//! leaf's shared lock; in lock-free mode probes go through version-validated
//! atomic reads and the whole search restarts when a leaf mutated underneath
//! it.

use super::{Pcsr, VertexEntry};
use crate::containers::PackedArray;
use crate::types::{VertexId, SENTINEL_DEST};

/// The search found the run location for `(src, dest)`.
pub(crate) struct Located {
    /// Valid insertion index for the edge; when `duplicate` is set, the index
    /// of the existing slot instead.
    pub index: usize,
    /// Whether the edge is already present at `index`.
    pub duplicate: bool,
}

/// Outcomes that make the caller restart or give up the search.
pub(crate) enum LocateError {
    /// A concurrent mutation raced the read; retry from the top.
    Conflict,
    /// The vertex has been removed from the index.
    Gone,
}

/// Locate the insertion point for `(src, dest)` inside `entry`'s run.
///
/// Returns the smallest index whose preceding real slots all order before
/// `dest` and whose following real slots all order at or after it; when the
/// edge already exists the returned index points at it.
pub(crate) fn locate(
    arr: &PackedArray,
    entry: &VertexEntry,
    src: VertexId,
    dest: VertexId,
    lock_search: bool,
) -> Result<Located, LocateError> {
    if entry.tombstoned() {
        return Err(LocateError::Gone);
    }
    let begin = entry.begin() as usize;
    let end = entry.end() as usize;
    if begin >= arr.len() || end > arr.len() || begin >= end {
        // Mid-flight descriptor update; the next attempt sees a settled pair.
        return Err(LocateError::Conflict);
    }

    let read = |i: usize| -> Result<crate::types::EdgeSlot, LocateError> {
        if lock_search {
            let _guard = arr.read_leaf(arr.leaf_of(i));
            Ok(arr.slot(i))
        } else {
            arr.slot_validated(i).ok_or(LocateError::Conflict)
        }
    };

    // Binary search over insertion positions in (begin, end]. A probe scans
    // forward past nulls; sentinels compare as +infinity through their
    // SENTINEL_DEST destination.
    let mut lo = begin + 1;
    let mut hi = end;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let mut probe = mid;
        loop {
            if probe >= hi {
                hi = mid;
                break;
            }
            let slot = read(probe)?;
            if slot.is_null() {
                probe += 1;
                continue;
            }
            if slot.dest >= dest {
                hi = mid;
            } else {
                lo = probe + 1;
            }
            break;
        }
    }

    // The first real slot at or after the insertion point decides between a
    // fresh insert and a duplicate.
    let mut probe = lo;
    while probe < end {
        let slot = read(probe)?;
        if slot.is_null() {
            probe += 1;
            continue;
        }
        if slot.is_edge() && slot.src == src && slot.dest == dest {
            return Ok(Located {
                index: probe,
                duplicate: true,
            });
        }
        break;
    }

    Ok(Located {
        index: lo,
        duplicate: false,
    })
}

impl Pcsr {
    /// Whether the edge `(src, dest)` is present.
    pub fn edge_exists(&self, src: VertexId, dest: VertexId) -> bool {
        if dest == SENTINEL_DEST {
            return false;
        }
        for _ in 0..self.max_retries {
            let arr = self.storage.read();
            let verts = self.vertices.read();
            let Some(entry) = verts.get(src as usize) else {
                return false;
            };
            match locate(&arr, entry, src, dest, self.lock_search) {
                Ok(found) => return found.duplicate,
                Err(LocateError::Gone) => return false,
                Err(LocateError::Conflict) => {
                    drop(verts);
                    drop(arr);
                    std::thread::yield_now();
                }
            }
        }
        // Contention exhausted the retry budget; answer under quiescence.
        let arr = self.storage.write();
        let verts = self.vertices.read();
        let Some(entry) = verts.get(src as usize) else {
            return false;
        };
        locate(&arr, entry, src, dest, false).map_or(false, |found| found.duplicate)
    }
}
