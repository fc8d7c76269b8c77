//! The remove protocol.
//!
//! Removal nulls the slot rather than compacting: the search layer steps
//! over null padding, so a cleared slot costs nothing until a later
//! redistribution reclaims it. The lock plan mirrors insertion with the
//! lower occupancy band: the smallest aligned window that stays above its
//! band after the clear is repacked; when even the root falls below band,
//! the operation escalates to the global write lock and halves the array.

use super::insert::{Attempt, WindowPlan};
use super::rebalance::{redistribute, shrink};
use super::search::{locate, LocateError};
use super::{GraphError, Pcsr, VertexEntry};
use crate::containers::packed_array::{LeafLockSet, LockTimeout};
use crate::containers::{PackedArray, MIN_CAPACITY};
use crate::types::{VertexId, SENTINEL_DEST};

impl Pcsr {
    /// Remove the edge `(src, dest)`; silent when the edge is absent.
    pub fn remove_edge(&self, src: VertexId, dest: VertexId) -> Result<(), GraphError> {
        if dest == SENTINEL_DEST {
            return Ok(());
        }
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
                    Ok(found) if !found.duplicate => return Ok(()),
                    Ok(found) => try_remove(&arr, &verts, src, dest, found.index, false),
                    Err(LocateError::Gone) => return Ok(()),
                    Err(LocateError::Conflict) => Attempt::Retry,
                }
            };
            match outcome {
                Attempt::Done => return Ok(()),
                Attempt::Retry => std::thread::yield_now(),
                Attempt::NeedGlobalWrite => return self.remove_edge_exclusive(src, dest),
            }
        }
        self.remove_edge_exclusive(src, dest)
    }

    /// Remove with the array quiesced, halving when the root band demands it.
    fn remove_edge_exclusive(&self, src: VertexId, dest: VertexId) -> Result<(), GraphError> {
        tracing::debug!(src, dest, "edge removal escalated to the global write lock");
        let mut arr = self.storage.write();
        let verts = self.vertices.read();
        let entry = verts
            .get(src as usize)
            .ok_or(GraphError::VertexOutOfRange {
                vertex: src,
                count: verts.len(),
            })?;
        loop {
            let found = match locate(&arr, entry, src, dest, false) {
                Ok(found) => found,
                Err(LocateError::Gone) => return Ok(()),
                Err(LocateError::Conflict) => continue,
            };
            if !found.duplicate {
                return Ok(());
            }
            match try_remove(&arr, &verts, src, dest, found.index, true) {
                Attempt::Done => return Ok(()),
                Attempt::Retry => continue,
                Attempt::NeedGlobalWrite => {
                    remove_below_root_band(&mut arr, &verts, src, found.index);
                    return Ok(());
                }
            }
        }
    }
}

/// One locked removal attempt at a previously located index.
fn try_remove(
    arr: &PackedArray,
    verts: &[VertexEntry],
    src: VertexId,
    dest: VertexId,
    index: usize,
    exclusive: bool,
) -> Attempt {
    let leaf = arr.leaf_of(index);
    let mut locks = if exclusive {
        LeafLockSet::unguarded(arr, leaf)
    } else {
        LeafLockSet::new(arr, leaf)
    };

    // Revalidate: the slot must still hold exactly this edge.
    let slot = arr.slot(index);
    if !(slot.is_edge() && slot.src == src && slot.dest == dest) {
        return Attempt::Retry;
    }
    let plan = match plan_remove_window(arr, &mut locks, index) {
        Ok(WindowPlan::Root) => return Attempt::NeedGlobalWrite,
        Ok(plan) => plan,
        Err(LockTimeout) => return Attempt::Retry,
    };

    locks.begin_mutation();
    arr.clear_slot(index);
    verts[src as usize].dec_degree();
    if let WindowPlan::Redistribute { start, len } = plan {
        redistribute(arr, verts, start, len);
    }
    Attempt::Done
}

/// Clear the slot and reshape the whole array: halve while the root stays
/// below its band, or spread the survivors when already at minimum size.
fn remove_below_root_band(arr: &mut PackedArray, verts: &[VertexEntry], src: VertexId, index: usize) {
    arr.clear_slot(index);
    verts[src as usize].dec_degree();
    let mut shrunk = false;
    loop {
        let occupied = arr.count_occupied(0, arr.len());
        let (lower, _) = arr.density_bounds(arr.height());
        if arr.len() > MIN_CAPACITY && (occupied as f64) < lower * arr.len() as f64 {
            shrink(arr, verts);
            shrunk = true;
        } else {
            break;
        }
    }
    if !shrunk {
        redistribute(arr, verts, 0, arr.len());
    }
}

/// Climb the implicit tree from the slot's leaf until a window stays at or
/// above its lower band after the clear. At minimum capacity the root window
/// is repacked in place instead of signalling a halve.
fn plan_remove_window(
    arr: &PackedArray,
    locks: &mut LeafLockSet<'_>,
    index: usize,
) -> Result<WindowPlan, LockTimeout> {
    let mut level = 0;
    loop {
        let len = arr.window_len(level);
        let start = arr.window_start(index, level);
        locks.cover_span(start, len)?;
        let occupied = arr.count_occupied(start, len) - 1;
        let (lower, _) = arr.density_bounds(level);
        if (occupied as f64) >= lower * len as f64 {
            return Ok(if level == 0 {
                WindowPlan::Local
            } else {
                WindowPlan::Redistribute { start, len }
            });
        }
        if level == arr.height() {
            return Ok(if arr.len() > MIN_CAPACITY {
                WindowPlan::Root
            } else {
                WindowPlan::Redistribute { start, len }
            });
        }
        level += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::remove_below_root_band;
    use crate::containers::PackedArray;
    use crate::graph::{Pcsr, VertexEntry};
    use crate::types::EdgeSlot;

    #[test]
    fn test_root_spill_halves_the_array() {
        // A 32-slot array holding only a sentinel and two edges: clearing one
        // leaves the root far below its band, so the array halves to minimum.
        let mut arr = PackedArray::new(32);
        arr.write_slot(0, EdgeSlot::sentinel(0));
        arr.write_slot(10, EdgeSlot::edge(0, 3, 1));
        arr.write_slot(20, EdgeSlot::edge(0, 8, 1));
        let verts = vec![VertexEntry::new(0, 21)];
        verts[0].inc_degree();
        verts[0].inc_degree();

        remove_below_root_band(&mut arr, &verts, 0, 20);

        assert_eq!(arr.len(), 16);
        assert_eq!(arr.count_occupied(0, arr.len()), 2);
        assert_eq!(verts[0].degree(), 1);
        assert_eq!(verts[0].begin() as usize, 0);
    }

    #[test]
    fn test_root_spill_at_minimum_respreads() {
        let mut arr = PackedArray::new(16);
        arr.write_slot(0, EdgeSlot::sentinel(0));
        arr.write_slot(1, EdgeSlot::edge(0, 3, 1));
        arr.write_slot(2, EdgeSlot::edge(0, 8, 1));
        let verts = vec![VertexEntry::new(0, 3)];
        verts[0].inc_degree();
        verts[0].inc_degree();

        remove_below_root_band(&mut arr, &verts, 0, 1);

        // No shrink below the floor; survivors are spread instead.
        assert_eq!(arr.len(), 16);
        assert_eq!(arr.count_occupied(0, arr.len()), 2);
        assert_eq!(verts[0].degree(), 1);
    }

    #[test]
    fn test_remove_is_silent_when_absent() {
        let graph = Pcsr::with_vertices(4);
        graph.remove_edge(0, 1).unwrap();
        graph.add_edge(0, 1, 1).unwrap();
        graph.remove_edge(0, 2).unwrap();
        assert!(graph.edge_exists(0, 1));
        assert!(graph.remove_edge(9, 1).is_err());
    }

    #[test]
    fn test_insert_remove_inverse() {
        let graph = Pcsr::with_vertices(4);
        for dest in [1u32, 3, 5] {
            graph.add_edge(2, dest, 1).unwrap();
        }
        graph.add_edge(2, 4, 1).unwrap();
        graph.remove_edge(2, 4).unwrap();
        assert_eq!(
            graph.neighbourhood(2).unwrap(),
            vec![(1, 1), (3, 1), (5, 1)]
        );
        assert_eq!(graph.degree(2).unwrap(), 3);
        graph.validate().expect("consistent after remove");
    }

    #[test]
    fn test_remove_everything() {
        let graph = Pcsr::with_vertices(4);
        for src in 0..4u32 {
            for dest in 0..4u32 {
                graph.add_edge(src, dest, 1).unwrap();
            }
        }
        for src in 0..4u32 {
            for dest in 0..4u32 {
                graph.remove_edge(src, dest).unwrap();
            }
        }
        assert_eq!(graph.edge_count(), 0);
        for src in 0..4u32 {
            assert_eq!(graph.degree(src).unwrap(), 0);
        }
        graph.validate().expect("consistent after draining");
    }
}
