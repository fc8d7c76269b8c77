//! Structural validation of the packed layout.
//!
//! Walks the whole array under the global exclusive lock and cross-checks it
//! against the descriptor table: run ordering, sentinel placement, descriptor
//! chaining, and degree counts. Primarily exercised by the test suites after
//! every workload, but public because embedders running long online update
//! streams use it the same way.

use super::{GraphError, Pcsr};

impl Pcsr {
    /// Verify every structural invariant, returning the first violation as a
    /// [`GraphError::Corruption`].
    pub fn validate(&self) -> Result<(), GraphError> {
        let arr = self.storage.write();
        let verts = self.vertices.read();

        let mut current_vertex: Option<u32> = None;
        let mut last_dest: Option<u32> = None;
        let mut last_sentinel: Option<u32> = None;
        let mut sentinel_count = 0usize;
        let mut degree_counts = vec![0u32; verts.len()];

        for i in 0..arr.len() {
            let slot = arr.slot(i);
            if slot.is_null() {
                continue;
            }
            if slot.is_sentinel() {
                let vertex = slot.sentinel_vertex();
                if vertex as usize >= verts.len() {
                    return Err(GraphError::Corruption(format!(
                        "sentinel for unknown vertex {vertex} at slot {i}"
                    )));
                }
                if last_sentinel.is_some_and(|prev| vertex <= prev) {
                    return Err(GraphError::Corruption(format!(
                        "sentinel for vertex {vertex} at slot {i} out of vertex order"
                    )));
                }
                if verts[vertex as usize].begin() as usize != i {
                    return Err(GraphError::Corruption(format!(
                        "vertex {vertex} descriptor begin {} does not point at its sentinel slot {i}",
                        verts[vertex as usize].begin()
                    )));
                }
                last_sentinel = Some(vertex);
                sentinel_count += 1;
                current_vertex = Some(vertex);
                last_dest = None;
                continue;
            }

            // A real edge.
            let Some(vertex) = current_vertex else {
                return Err(GraphError::Corruption(format!(
                    "edge ({}, {}) at slot {i} before any sentinel",
                    slot.src, slot.dest
                )));
            };
            if slot.src != vertex {
                return Err(GraphError::Corruption(format!(
                    "edge ({}, {}) at slot {i} inside vertex {vertex}'s run",
                    slot.src, slot.dest
                )));
            }
            if last_dest.is_some_and(|prev| slot.dest <= prev) {
                return Err(GraphError::Corruption(format!(
                    "destinations out of order at slot {i} in vertex {vertex}'s run"
                )));
            }
            last_dest = Some(slot.dest);
            let entry = &verts[vertex as usize];
            if i < entry.begin() as usize || i >= entry.end() as usize {
                return Err(GraphError::Corruption(format!(
                    "edge at slot {i} outside vertex {vertex}'s descriptor range [{}, {})",
                    entry.begin(),
                    entry.end()
                )));
            }
            degree_counts[vertex as usize] += 1;
        }

        let live = verts.iter().filter(|entry| !entry.tombstoned()).count();
        if sentinel_count != live {
            return Err(GraphError::Corruption(format!(
                "{sentinel_count} sentinels for {live} live vertices"
            )));
        }

        for (vertex, entry) in verts.iter().enumerate() {
            if entry.tombstoned() {
                continue;
            }
            if entry.degree() != degree_counts[vertex] {
                return Err(GraphError::Corruption(format!(
                    "vertex {vertex} degree {} but {} edges stored",
                    entry.degree(),
                    degree_counts[vertex]
                )));
            }
            if entry.end() as usize > arr.len() || entry.begin() >= entry.end() {
                return Err(GraphError::Corruption(format!(
                    "vertex {vertex} descriptor range [{}, {}) out of bounds",
                    entry.begin(),
                    entry.end()
                )));
            }
            if let Some(next) = verts.get(vertex + 1) {
                if !next.tombstoned() && entry.end() != next.begin() {
                    return Err(GraphError::Corruption(format!(
                        "vertex {vertex} end {} does not meet vertex {} begin {}",
                        entry.end(),
                        vertex + 1,
                        next.begin()
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::Pcsr;

    #[test]
    fn test_validate_after_mixed_workload() {
        let graph = Pcsr::with_vertices(6);
        for src in 0..6u32 {
            for dest in (0..30u32).step_by((src + 1) as usize) {
                graph.add_edge(src, dest, 1).unwrap();
            }
        }
        for src in 0..6u32 {
            graph.remove_edge(src, 0).unwrap();
        }
        graph.validate().expect("mixed workload stays consistent");
    }
}
