//! PCSR - concurrent dynamic graph storage.
//!
//! This library maintains a directed graph in a *Packed Compressed Sparse
//! Row* layout: one contiguous array of edge slots, ordered by source and
//! destination, with null padding amortizing insertion cost and one sentinel
//! slot marking the start of each vertex's run. Point insertions, deletions
//! and membership queries run concurrently from many threads.
//!
//! # Structure
//!
//! - The array is partitioned into fixed-size **leaves**; aligned groups of
//!   leaves form **windows** up an implicit binary tree. Every level has a
//!   permitted occupancy band, loosest at the leaves and `[1/4, 1/2]` at the
//!   root. An insert that would push a window over its band repacks the
//!   smallest in-band ancestor window; pushing past the root doubles the
//!   array (deletion mirrors this with halving).
//! - Every leaf carries a reader-writer lock and a version counter. Mutators
//!   lock the leaves their plan touches in ascending order with timed
//!   try-locks and retry on conflict; searches either take shared leaf locks
//!   or run lock-free against the version counters.
//!
//! # Examples
//!
//! ```rust
//! use pcsr::prelude::*;
//!
//! let graph = Pcsr::with_vertices(4);
//! graph.add_edge(0, 1, 1).unwrap();
//! graph.add_edge(0, 2, 1).unwrap();
//! graph.add_edge(3, 0, 1).unwrap();
//!
//! assert!(graph.edge_exists(0, 1));
//! assert_eq!(graph.neighbourhood(0).unwrap(), vec![(1, 1), (2, 1)]);
//! assert_eq!(graph.edge_count(), 3);
//! ```
//!
//! Concurrent updates through the worker pool:
//!
//! ```rust
//! use pcsr::prelude::*;
//! use std::sync::Arc;
//!
//! let graph = Arc::new(Pcsr::with_vertices(8));
//! let mut pool = WorkerPool::new(Arc::clone(&graph), 4);
//! pool.submit_bulk((0..100u32).map(|i| (i % 8, 1 + i / 8)).collect());
//! pool.start();
//! pool.stop();
//!
//! assert_eq!(graph.edge_count(), 100);
//! ```

pub mod algo;
pub mod containers;
pub mod graph;
pub mod io;
pub mod pool;
pub mod types;


/// Prelude module for convenient imports.
///
/// Use `use pcsr::prelude::*;` to import commonly used types.
pub mod prelude {
    pub use crate::graph::{GraphError, Pcsr, PcsrParams};
    pub use crate::io::{load_edge_list, LoadError};
    pub use crate::pool::{GraphOp, WorkerPool};
    pub use crate::types::{EdgeSlot, EdgeValue, VertexId, SENTINEL_DEST};
}
