//! Worker pool dispatching graph updates.
//!
//! Each worker owns a private task queue; the driver shards updates across
//! queues however it likes (round-robin in practice). A bulk sequence can be
//! handed to the pool before `start`, in which case worker `t` of `T`
//! processes bulk indices `i ≡ t (mod T)` before draining its queue. Workers
//! stop cooperatively: `stop` raises the finished flag and joins, and each
//! worker exits once the flag is up and its queue is empty. A stopped pool
//! can be started again over the same graph.

use crate::graph::Pcsr;
use crate::types::VertexId;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// One graph update or read, dispatched in the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphOp {
    AddEdge { src: VertexId, dest: VertexId },
    RemoveEdge { src: VertexId, dest: VertexId },
    ReadNeighbourhood { src: VertexId },
}

struct PoolShared {
    graph: Arc<Pcsr>,
    queues: Vec<Mutex<VecDeque<GraphOp>>>,
    bulk: RwLock<Option<Arc<Vec<(VertexId, VertexId)>>>>,
    finished: AtomicBool,
}

/// A pool of update workers over a shared [`Pcsr`].
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool with `workers` private task queues.
    pub fn new(graph: Arc<Pcsr>, workers: usize) -> Self {
        assert!(workers > 0);
        let queues = (0..workers).map(|_| Mutex::new(VecDeque::new())).collect();
        Self {
            shared: Arc::new(PoolShared {
                graph,
                queues,
                bulk: RwLock::new(None),
                finished: AtomicBool::new(false),
            }),
            handles: Vec::new(),
        }
    }

    /// The graph the workers operate on.
    pub fn graph(&self) -> &Arc<Pcsr> {
        &self.shared.graph
    }

    /// Number of worker queues.
    pub fn workers(&self) -> usize {
        self.shared.queues.len()
    }

    /// Queue a task on worker `worker` (wrapped into range).
    pub fn submit(&self, worker: usize, op: GraphOp) {
        let queues = &self.shared.queues;
        queues[worker % queues.len()].lock().push_back(op);
    }

    /// Hand the pool a bulk edge sequence, processed by all workers at the
    /// start of the next run.
    pub fn submit_bulk(&self, edges: Vec<(VertexId, VertexId)>) {
        *self.shared.bulk.write() = Some(Arc::new(edges));
    }

    /// Spawn the workers. Tasks and bulk sequences submitted before this
    /// call are processed; the workers then keep draining their queues until
    /// [`stop`] is called.
    ///
    /// [`stop`]: Self::stop
    pub fn start(&mut self) {
        assert!(self.handles.is_empty(), "pool already running");
        self.shared.finished.store(false, Ordering::Release);
        let total = self.shared.queues.len();
        tracing::debug!(workers = total, "starting worker pool");
        for worker in 0..total {
            let shared = Arc::clone(&self.shared);
            self.handles
                .push(std::thread::spawn(move || run_worker(shared, worker, total)));
        }
    }

    /// Raise the finished flag, join every worker, and drop the bulk
    /// sequence. The pool can be started again afterwards.
    pub fn stop(&mut self) {
        self.shared.finished.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
        *self.shared.bulk.write() = None;
        tracing::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop();
        }
    }
}

fn run_worker(shared: Arc<PoolShared>, worker: usize, total: usize) {
    let bulk = shared.bulk.read().clone();
    if let Some(edges) = bulk {
        let mut index = worker;
        while index < edges.len() {
            let (src, dest) = edges[index];
            if let Err(error) = shared.graph.add_edge(src, dest, 1) {
                tracing::warn!(src, dest, %error, "bulk insert rejected");
            }
            index += total;
        }
    }

    loop {
        let op = shared.queues[worker].lock().pop_front();
        match op {
            Some(GraphOp::AddEdge { src, dest }) => {
                if let Err(error) = shared.graph.add_edge(src, dest, 1) {
                    tracing::warn!(src, dest, %error, "insert rejected");
                }
            }
            Some(GraphOp::RemoveEdge { src, dest }) => {
                if let Err(error) = shared.graph.remove_edge(src, dest) {
                    tracing::warn!(src, dest, %error, "removal rejected");
                }
            }
            Some(GraphOp::ReadNeighbourhood { src }) => {
                let _ = shared.graph.neighbourhood(src);
            }
            None => {
                if shared.finished.load(Ordering::Acquire) {
                    return;
                }
                std::thread::yield_now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Pcsr;

    #[test]
    fn test_bulk_load_round_robin() {
        let graph = Arc::new(Pcsr::with_vertices(8));
        let mut pool = WorkerPool::new(Arc::clone(&graph), 4);
        let edges: Vec<(u32, u32)> = (0..200u32).map(|i| (i % 8, 1 + i / 8)).collect();
        pool.submit_bulk(edges.clone());
        pool.start();
        pool.stop();
        for &(src, dest) in &edges {
            assert!(graph.edge_exists(src, dest), "missing ({src}, {dest})");
        }
        assert_eq!(graph.edge_count(), edges.len());
        graph.validate().expect("consistent after bulk load");
    }

    #[test]
    fn test_queued_tasks_drain_before_exit() {
        let graph = Arc::new(Pcsr::with_vertices(4));
        let mut pool = WorkerPool::new(Arc::clone(&graph), 2);
        for i in 0..50u32 {
            pool.submit(i as usize, GraphOp::AddEdge { src: i % 4, dest: 1 + i });
        }
        pool.submit(0, GraphOp::ReadNeighbourhood { src: 0 });
        pool.start();
        pool.stop();
        assert_eq!(graph.edge_count(), 50);
        graph.validate().expect("consistent after queued tasks");
    }

    #[test]
    fn test_pool_restarts_over_same_graph() {
        let graph = Arc::new(Pcsr::with_vertices(4));
        let mut pool = WorkerPool::new(Arc::clone(&graph), 2);
        pool.submit(0, GraphOp::AddEdge { src: 0, dest: 5 });
        pool.start();
        pool.stop();
        pool.submit(1, GraphOp::RemoveEdge { src: 0, dest: 5 });
        pool.submit(1, GraphOp::AddEdge { src: 1, dest: 6 });
        pool.start();
        pool.stop();
        assert!(!graph.edge_exists(0, 5));
        assert!(graph.edge_exists(1, 6));
    }
}
