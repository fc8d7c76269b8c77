//! Slides, window redistribution, and array doubling/halving.
//!
//! All functions here mutate slots and require the caller to hold exclusive
//! locks for every touched leaf (or the global exclusive lock). Whenever a
//! sentinel lands on a new index the owning vertex's `begin` and its
//! predecessor's `end` move with it, so descriptor consistency is a local
//! consequence of slot movement rather than a separate pass.

use super::VertexEntry;
use crate::containers::{PackedArray, MIN_CAPACITY};
use crate::types::{EdgeSlot, VertexId};

/// Point the descriptor table at a sentinel's new home.
pub(crate) fn fix_sentinel(verts: &[VertexEntry], slot: &EdgeSlot, pos: usize) {
    let vertex = slot.sentinel_vertex() as usize;
    verts[vertex].set_begin(pos as u32);
    if vertex > 0 {
        verts[vertex - 1].set_end(pos as u32);
    }
}

/// Shift `[index, first_empty)` one slot right, consuming the empty slot and
/// freeing `index`. The caller owns locks for the whole span.
pub(crate) fn slide_right(
    arr: &PackedArray,
    verts: &[VertexEntry],
    index: usize,
    first_empty: usize,
) {
    for j in (index + 1..=first_empty).rev() {
        let slot = arr.slot(j - 1);
        arr.write_slot(j, slot);
        if slot.is_sentinel() {
            fix_sentinel(verts, &slot, j);
        }
    }
}

/// Shift `[first_empty + 1, index)` one slot left, consuming the empty slot
/// and freeing `index - 1`. The caller owns locks for the whole span.
pub(crate) fn slide_left(
    arr: &PackedArray,
    verts: &[VertexEntry],
    first_empty: usize,
    index: usize,
) {
    for j in first_empty..index - 1 {
        let slot = arr.slot(j + 1);
        arr.write_slot(j, slot);
        if slot.is_sentinel() {
            fix_sentinel(verts, &slot, j);
        }
    }
}

/// Repack the aligned window `[start, start + len)` so its occupied slots
/// are evenly spaced, preserving order. The caller owns locks for every leaf
/// in the window.
pub(crate) fn redistribute(arr: &PackedArray, verts: &[VertexEntry], start: usize, len: usize) {
    let mut buf = Vec::with_capacity(len);
    for i in start..start + len {
        let slot = arr.slot(i);
        if !slot.is_null() {
            buf.push(slot);
        }
    }
    if buf.is_empty() {
        return;
    }
    for i in start..start + len {
        arr.clear_slot(i);
    }
    place_evenly(arr, verts, start, len, &buf);
}

/// Write `buf` back into `[start, start + len)` at an even stride and repair
/// every affected descriptor.
fn place_evenly(arr: &PackedArray, verts: &[VertexEntry], start: usize, len: usize, buf: &[EdgeSlot]) {
    debug_assert!(buf.len() <= len);
    let step = len as f64 / buf.len() as f64;
    let mut last: Option<(VertexId, usize)> = None;
    for (k, slot) in buf.iter().enumerate() {
        let pos = start + (k as f64 * step) as usize;
        arr.write_slot(pos, *slot);
        if slot.is_sentinel() {
            fix_sentinel(verts, slot, pos);
            last = Some((slot.sentinel_vertex(), pos));
        } else {
            last = Some((slot.src, pos));
        }
    }
    // The owner of the window's final slot has no successor sentinel inside
    // it; when its run ends within the window, its end stays tight. Full
    // placements (doubling/halving) always cover the run's tail.
    if let Some((vertex, pos)) = last {
        let entry = &verts[vertex as usize];
        if len == arr.len() || entry.end() as usize <= start + len {
            entry.set_end(pos as u32 + 1);
        }
    }
}

/// Double the array, spreading the survivors across the new capacity.
/// Requires the global exclusive lock.
pub(crate) fn grow(arr: &mut PackedArray, verts: &[VertexEntry]) {
    let buf = occupied_slots(arr);
    let next = PackedArray::new(arr.len() * 2);
    tracing::debug!(from = arr.len(), to = next.len(), "doubling edge array");
    place_evenly(&next, verts, 0, next.len(), &buf);
    *arr = next;
}

/// Halve the array. The caller guarantees the survivors fit the root band of
/// the smaller capacity. Requires the global exclusive lock.
pub(crate) fn shrink(arr: &mut PackedArray, verts: &[VertexEntry]) {
    let buf = occupied_slots(arr);
    let next = PackedArray::new((arr.len() / 2).max(MIN_CAPACITY));
    debug_assert!(buf.len() <= next.len() / 2);
    tracing::debug!(from = arr.len(), to = next.len(), "halving edge array");
    place_evenly(&next, verts, 0, next.len(), &buf);
    *arr = next;
}

fn occupied_slots(arr: &PackedArray) -> Vec<EdgeSlot> {
    let mut buf = Vec::new();
    for i in 0..arr.len() {
        let slot = arr.slot(i);
        if !slot.is_null() {
            buf.push(slot);
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::PackedArray;
    use crate::graph::VertexEntry;
    use crate::types::EdgeSlot;

    /// A hand-built two-vertex layout: sentinels plus a few edges packed at
    /// the front, nulls behind.
    fn packed_fixture() -> (PackedArray, Vec<VertexEntry>) {
        let arr = PackedArray::new(16);
        let slots = [
            EdgeSlot::sentinel(0),
            EdgeSlot::edge(0, 2, 1),
            EdgeSlot::edge(0, 5, 1),
            EdgeSlot::sentinel(1),
            EdgeSlot::edge(1, 3, 1),
            EdgeSlot::edge(1, 4, 1),
        ];
        for (i, slot) in slots.iter().enumerate() {
            arr.write_slot(i, *slot);
        }
        let verts = vec![VertexEntry::new(0, 3), VertexEntry::new(3, 6)];
        (arr, verts)
    }

    fn collect_occupied(arr: &PackedArray) -> Vec<(usize, EdgeSlot)> {
        (0..arr.len())
            .map(|i| (i, arr.slot(i)))
            .filter(|(_, s)| !s.is_null())
            .collect()
    }

    #[test]
    fn test_redistribute_spaces_evenly_and_preserves_order() {
        let (arr, verts) = packed_fixture();
        redistribute(&arr, &verts, 0, 16);

        let occupied = collect_occupied(&arr);
        assert_eq!(occupied.len(), 6);
        // Order preserved.
        let kinds: Vec<EdgeSlot> = occupied.iter().map(|(_, s)| *s).collect();
        assert_eq!(kinds[0], EdgeSlot::sentinel(0));
        assert_eq!(kinds[3], EdgeSlot::sentinel(1));
        // Even stride: 16 / 6 slots apart, so every leaf of four slots holds
        // one or two entries.
        for leaf in 0..4 {
            let in_leaf = occupied
                .iter()
                .filter(|(i, _)| i / 4 == leaf)
                .count();
            assert!((1..=2).contains(&in_leaf), "leaf {leaf} holds {in_leaf}");
        }
        // Descriptors follow the sentinels.
        assert_eq!(verts[0].begin() as usize, occupied[0].0);
        assert_eq!(verts[0].end() as usize, occupied[3].0);
        assert_eq!(verts[1].begin() as usize, occupied[3].0);
        // The tail run keeps a tight end.
        assert_eq!(verts[1].end() as usize, occupied[5].0 + 1);
    }

    #[test]
    fn test_redistribute_empty_window_is_noop() {
        let arr = PackedArray::new(16);
        let verts: Vec<VertexEntry> = Vec::new();
        redistribute(&arr, &verts, 8, 8);
        assert_eq!(arr.count_occupied(0, 16), 0);
    }

    #[test]
    fn test_slide_right_moves_sentinel_backrefs() {
        let (arr, verts) = packed_fixture();
        // Open a gap at index 2: shift [2, 6) into the null at 6.
        slide_right(&arr, &verts, 2, 6);
        assert_eq!(arr.slot(4), EdgeSlot::sentinel(1));
        assert_eq!(verts[1].begin(), 4);
        assert_eq!(verts[0].end(), 4);
        // Index 2 is free for the caller to overwrite; the old copy remains.
        assert_eq!(arr.slot(3), EdgeSlot::edge(0, 5, 1));
    }

    #[test]
    fn test_slide_left_moves_sentinel_backrefs() {
        let arr = PackedArray::new(16);
        // A gap at 0, then vertex data packed at 1..=3.
        arr.write_slot(1, EdgeSlot::sentinel(0));
        arr.write_slot(2, EdgeSlot::edge(0, 4, 1));
        arr.write_slot(3, EdgeSlot::edge(0, 9, 1));
        let verts = vec![VertexEntry::new(1, 4)];
        // Insert position 4 with the first empty at 0.
        slide_left(&arr, &verts, 0, 4);
        assert_eq!(arr.slot(0), EdgeSlot::sentinel(0));
        assert_eq!(verts[0].begin(), 0);
        assert_eq!(arr.slot(1), EdgeSlot::edge(0, 4, 1));
        assert_eq!(arr.slot(2), EdgeSlot::edge(0, 9, 1));
    }

    #[test]
    fn test_grow_doubles_and_respreads() {
        let (mut arr, verts) = packed_fixture();
        grow(&mut arr, &verts);
        assert_eq!(arr.len(), 32);
        let occupied = collect_occupied(&arr);
        assert_eq!(occupied.len(), 6);
        // Root band honoured after the double.
        assert!(occupied.len() * 2 <= arr.len());
        assert_eq!(verts[0].begin() as usize, occupied[0].0);
        assert_eq!(verts[1].end() as usize, occupied[5].0 + 1);
    }

    #[test]
    fn test_shrink_halves_and_respreads() {
        let arr = PackedArray::new(32);
        arr.write_slot(0, EdgeSlot::sentinel(0));
        arr.write_slot(9, EdgeSlot::edge(0, 1, 1));
        arr.write_slot(20, EdgeSlot::edge(0, 7, 1));
        let verts = vec![VertexEntry::new(0, 21)];
        let mut arr = arr;
        shrink(&mut arr, &verts);
        assert_eq!(arr.len(), 16);
        let occupied = collect_occupied(&arr);
        assert_eq!(occupied.len(), 3);
        assert_eq!(verts[0].begin() as usize, occupied[0].0);
        assert_eq!(verts[0].end() as usize, occupied[2].0 + 1);
    }
}
