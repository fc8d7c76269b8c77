//! Graph algorithms over the iteration interface.
//!
//! These consume [`Pcsr::neighbourhood`] only; they hold no locks across
//! vertices and therefore see each run at its own serialization point, which
//! is the intended reading for online analytics over a live graph.

use crate::graph::Pcsr;
use crate::types::VertexId;
use std::collections::VecDeque;

/// Breadth-first search from `start`. Returns the parent of every reached
/// vertex (`u32::MAX` for unreached ones, the vertex itself for `start`).
pub fn bfs(graph: &Pcsr, start: VertexId) -> Vec<VertexId> {
    let n = graph.vertex_count();
    let mut parent = vec![u32::MAX; n];
    if (start as usize) >= n {
        return parent;
    }
    parent[start as usize] = start;
    let mut frontier = VecDeque::from([start]);
    while let Some(vertex) = frontier.pop_front() {
        for (dest, _) in graph.neighbourhood(vertex).unwrap_or_default() {
            let slot = dest as usize;
            if slot < n && parent[slot] == u32::MAX {
                parent[slot] = vertex;
                frontier.push_back(dest);
            }
        }
    }
    parent
}

/// PageRank by power iteration with uniform teleport.
pub fn pagerank(graph: &Pcsr, iterations: usize, damping: f32) -> Vec<f32> {
    let n = graph.vertex_count();
    if n == 0 {
        return Vec::new();
    }
    let uniform = 1.0 / n as f32;
    let mut ranks = vec![uniform; n];
    for _ in 0..iterations {
        let mut next = vec![0.0f32; n];
        let mut dangling = 0.0f32;
        for src in 0..n as u32 {
            let neighbours = graph.neighbourhood(src).unwrap_or_default();
            if neighbours.is_empty() {
                dangling += ranks[src as usize];
                continue;
            }
            let share = ranks[src as usize] / neighbours.len() as f32;
            for (dest, _) in neighbours {
                if (dest as usize) < n {
                    next[dest as usize] += share;
                }
            }
        }
        let teleport = (1.0 - damping) * uniform + damping * dangling * uniform;
        for rank in &mut next {
            *rank = teleport + damping * *rank;
        }
        ranks = next;
    }
    ranks
}

/// Sparse matrix–vector product: `out[src] = Σ value · input[dest]` over the
/// edges of each vertex.
pub fn spmv(graph: &Pcsr, input: &[u32]) -> Vec<u32> {
    let n = graph.vertex_count();
    let mut out = vec![0u32; n];
    for src in 0..n as u32 {
        let mut sum = 0u32;
        for (dest, value) in graph.neighbourhood(src).unwrap_or_default() {
            if let Some(x) = input.get(dest as usize) {
                sum = sum.wrapping_add(value.wrapping_mul(*x));
            }
        }
        out[src as usize] = sum;
    }
    out
}
