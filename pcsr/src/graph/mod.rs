//! The concurrent PCSR graph structure.
//!
//! A directed graph stored as a packed, ordered array of edges with one
//! sentinel slot per vertex and a descriptor table mapping vertex ids to
//! their run in the array. Point insertions, deletions and membership
//! queries run concurrently from many threads: normal operations hold the
//! global lock shared and take exclusive locks only on the leaves their
//! plan touches, while structural reshapes (doubling, halving, vertex
//! creation) quiesce the array under the global exclusive lock.

pub mod insert;
pub mod rebalance;
pub mod remove;
pub mod search;
pub mod validate;

use crate::containers::{PackedArray, MIN_CAPACITY};
use crate::types::{EdgeValue, VertexId, TOMBSTONE};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Errors surfaced by graph operations.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("vertex {vertex} out of range (vertex count {count})")]
    VertexOutOfRange { vertex: VertexId, count: usize },

    #[error("graph structure corruption detected: {0}")]
    Corruption(String),
}

/// Parameters for creating a [`Pcsr`].
#[derive(Debug, Clone)]
pub struct PcsrParams {
    /// Number of vertices created up front.
    pub vertex_count: u32,
    /// Take shared leaf locks while binary-searching a run. When disabled,
    /// searches read slots through version-validated atomic loads instead.
    pub lock_search: bool,
    /// Conflict retries before an operation escalates to the global
    /// exclusive lock.
    pub max_retries: usize,
}

impl PcsrParams {
    /// Create parameters with the required vertex count.
    pub fn new(vertex_count: u32) -> Self {
        Self {
            vertex_count,
            lock_search: true,
            max_retries: 100,
        }
    }

    /// Enable or disable shared leaf locks during search.
    pub fn with_lock_search(mut self, enabled: bool) -> Self {
        self.lock_search = enabled;
        self
    }

    /// Set the conflict retry budget.
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Per-vertex descriptor: the vertex's sentinel position, the exclusive end
/// of its run, and its out-degree.
///
/// Fields are atomics because they are adjusted under leaf locks while other
/// threads read them without coordination; `end == begin(next)` for every
/// vertex with a successor, and the highest vertex keeps a tight end (one
/// past its last real edge).
pub(crate) struct VertexEntry {
    begin: AtomicU32,
    end: AtomicU32,
    degree: AtomicU32,
}

impl VertexEntry {
    pub(crate) fn new(begin: u32, end: u32) -> Self {
        Self {
            begin: AtomicU32::new(begin),
            end: AtomicU32::new(end),
            degree: AtomicU32::new(0),
        }
    }

    #[inline]
    pub(crate) fn begin(&self) -> u32 {
        self.begin.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn end(&self) -> u32 {
        self.end.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn degree(&self) -> u32 {
        self.degree.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_begin(&self, begin: u32) {
        self.begin.store(begin, Ordering::Release);
    }

    #[inline]
    pub(crate) fn set_end(&self, end: u32) {
        self.end.store(end, Ordering::Release);
    }

    #[inline]
    pub(crate) fn inc_degree(&self) {
        self.degree.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn dec_degree(&self) {
        self.degree.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn tombstoned(&self) -> bool {
        self.begin() == TOMBSTONE
    }
}

/// Concurrent dynamic graph on a Packed Compressed Sparse Row layout.
pub struct Pcsr {
    /// The packed edge array. Read-locked by every normal operation,
    /// write-locked for doubling/halving, vertex creation, and the bounded
    /// escalation path.
    storage: RwLock<PackedArray>,
    /// Vertex descriptors, indexed by vertex id. Write-locked only to append.
    vertices: RwLock<Vec<VertexEntry>>,
    lock_search: bool,
    max_retries: usize,
}

impl Pcsr {
    /// Create a graph with the given parameters.
    pub fn new(params: PcsrParams) -> Self {
        let mut arr = PackedArray::new(initial_capacity(params.vertex_count));
        let mut verts = Vec::with_capacity(params.vertex_count as usize);
        for id in 0..params.vertex_count {
            push_vertex(&mut arr, &mut verts, id);
        }
        Self {
            storage: RwLock::new(arr),
            vertices: RwLock::new(verts),
            lock_search: params.lock_search,
            max_retries: params.max_retries,
        }
    }

    /// Create a graph with `vertex_count` vertices and default parameters.
    pub fn with_vertices(vertex_count: u32) -> Self {
        Self::new(PcsrParams::new(vertex_count))
    }

    /// Append a new vertex and insert its sentinel immediately after the
    /// previous vertex's run. Returns the new vertex id.
    pub fn add_node(&self) -> VertexId {
        let mut arr = self.storage.write();
        let mut verts = self.vertices.write();
        let id = verts.len() as u32;
        push_vertex(&mut arr, &mut verts, id);
        tracing::trace!(vertex = id, "added vertex");
        id
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.read().len()
    }

    /// Total slot capacity of the edge array.
    pub fn capacity(&self) -> usize {
        self.storage.read().len()
    }

    /// Out-degree of a vertex.
    pub fn degree(&self, vertex: VertexId) -> Result<u32, GraphError> {
        let verts = self.vertices.read();
        let entry = verts
            .get(vertex as usize)
            .ok_or(GraphError::VertexOutOfRange {
                vertex,
                count: verts.len(),
            })?;
        Ok(entry.degree())
    }

    /// The neighbours of `src` as `(dest, value)` pairs in ascending
    /// destination order.
    pub fn neighbourhood(&self, src: VertexId) -> Result<Vec<(VertexId, EdgeValue)>, GraphError> {
        let arr = self.storage.read();
        let verts = self.vertices.read();
        let entry = verts.get(src as usize).ok_or(GraphError::VertexOutOfRange {
            vertex: src,
            count: verts.len(),
        })?;
        if entry.tombstoned() {
            return Ok(Vec::new());
        }
        let begin = entry.begin() as usize;
        let end = (entry.end() as usize).min(arr.len());
        let mut out = Vec::with_capacity(entry.degree() as usize);
        let mut i = begin;
        while i < end {
            let leaf = arr.leaf_of(i);
            let (_, leaf_end) = arr.leaf_bounds(leaf);
            let _guard = arr.read_leaf(leaf);
            while i < end.min(leaf_end) {
                let slot = arr.slot(i);
                if slot.is_edge() && slot.src == src {
                    out.push((slot.dest, slot.value));
                }
                i += 1;
            }
        }
        Ok(out)
    }

    /// All real edges as `(src, dest, value)` triples in array order.
    pub fn edges(&self) -> Vec<(VertexId, VertexId, EdgeValue)> {
        let arr = self.storage.read();
        let mut out = Vec::new();
        for leaf in 0..arr.leaf_count() {
            let (start, end) = arr.leaf_bounds(leaf);
            let _guard = arr.read_leaf(leaf);
            for i in start..end {
                let slot = arr.slot(i);
                if slot.is_edge() {
                    out.push((slot.src, slot.dest, slot.value));
                }
            }
        }
        out
    }

    /// Number of real edges currently stored.
    pub fn edge_count(&self) -> usize {
        let arr = self.storage.read();
        let mut count = 0;
        for leaf in 0..arr.leaf_count() {
            let (start, end) = arr.leaf_bounds(leaf);
            let _guard = arr.read_leaf(leaf);
            count += (start..end).filter(|&i| arr.slot(i).is_edge()).count();
        }
        count
    }

    /// Whether every vertex run holds its edges in strictly ascending
    /// destination order.
    pub fn is_sorted(&self) -> bool {
        let arr = self.storage.read();
        let mut current_src = None;
        let mut last_dest = None;
        for leaf in 0..arr.leaf_count() {
            let (start, end) = arr.leaf_bounds(leaf);
            let _guard = arr.read_leaf(leaf);
            for i in start..end {
                let slot = arr.slot(i);
                if slot.is_sentinel() {
                    current_src = Some(slot.sentinel_vertex());
                    last_dest = None;
                } else if slot.is_edge() {
                    if current_src != Some(slot.src) {
                        return false;
                    }
                    if last_dest.is_some_and(|prev| slot.dest <= prev) {
                        return false;
                    }
                    last_dest = Some(slot.dest);
                }
            }
        }
        true
    }

    /// Approximate memory footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        let arr = self.storage.read();
        let verts = self.vertices.read();
        let slot_bytes = arr.len() * (3 * std::mem::size_of::<u32>());
        let leaf_bytes =
            arr.leaf_count() * (std::mem::size_of::<RwLock<()>>() + std::mem::size_of::<u32>());
        let vertex_bytes = verts.len() * std::mem::size_of::<VertexEntry>();
        slot_bytes + leaf_bytes + vertex_bytes
    }

    /// Reset the graph to its freshly constructed state, keeping the vertex
    /// count.
    pub fn clear(&self) {
        let mut arr = self.storage.write();
        let mut verts = self.vertices.write();
        let vertex_count = verts.len() as u32;
        *arr = PackedArray::new(initial_capacity(vertex_count));
        verts.clear();
        for id in 0..vertex_count {
            push_vertex(&mut arr, &mut verts, id);
        }
    }
}

/// First edge-array size for `vertex_count` vertices: room for every sentinel
/// below the root occupancy bound, never smaller than [`MIN_CAPACITY`].
fn initial_capacity(vertex_count: u32) -> usize {
    let wanted = 2 * vertex_count as usize + 3;
    wanted.next_power_of_two().max(MIN_CAPACITY)
}

/// Append a descriptor for `id` and place its sentinel after the previous
/// vertex's run. Requires exclusive access to both the array and the table.
fn push_vertex(arr: &mut PackedArray, verts: &mut Vec<VertexEntry>, id: VertexId) {
    let begin = verts.last().map_or(0, |prev| prev.end());
    verts.push(VertexEntry::new(begin, begin + 1));
    insert::insert_sentinel_exclusive(arr, verts, id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_capacity() {
        assert_eq!(initial_capacity(2), 16);
        assert_eq!(initial_capacity(4), 16);
        assert_eq!(initial_capacity(7), 32);
        assert_eq!(initial_capacity(100), 256);
    }

    #[test]
    fn test_fresh_graph_shape() {
        let graph = Pcsr::with_vertices(4);
        assert_eq!(graph.vertex_count(), 4);
        assert_eq!(graph.capacity(), 16);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.is_sorted());
        graph.validate().expect("fresh graph is consistent");
    }

    #[test]
    fn test_add_node_appends() {
        let graph = Pcsr::with_vertices(2);
        let id = graph.add_node();
        assert_eq!(id, 2);
        assert_eq!(graph.vertex_count(), 3);
        graph.validate().expect("consistent after add_node");
    }

    #[test]
    fn test_clear_resets() {
        let graph = Pcsr::with_vertices(3);
        graph.add_edge(0, 1, 1).unwrap();
        graph.add_edge(2, 1, 1).unwrap();
        graph.clear();
        assert_eq!(graph.vertex_count(), 3);
        assert_eq!(graph.edge_count(), 0);
        graph.validate().expect("consistent after clear");
    }

    #[test]
    fn test_vertex_out_of_range() {
        let graph = Pcsr::with_vertices(2);
        assert!(matches!(
            graph.degree(9),
            Err(GraphError::VertexOutOfRange { vertex: 9, .. })
        ));
    }
}
