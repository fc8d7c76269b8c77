//! Bulk-load and online-update driver for the PCSR engine.
//!
//! Loads a core graph through the worker pool, applies a stream of online
//! insertions or deletions from an update file, then verifies membership of
//! everything that should be present.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use pcsr::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Command-line configuration parsed via clap.
#[derive(Parser, Debug)]
#[command(
    name = "pcsr-bench",
    version,
    about = "Apply bulk loads and online updates to a concurrent PCSR graph.",
    long_about = "Apply bulk loads and online updates to a concurrent PCSR graph.\n\
\n\
The core graph and update files accept space-separated or comma-separated\n\
text edge lists (one edge per line; the separator is probed on the first\n\
line) and the packed .elog binary format of {u32 src; u32 dst} records.\n\
\n\
Example:\n\
  pcsr-bench --vertex-count 100000 --core-graph core.elog \\\n    --update-file updates.txt --threads 16 --size 500000"
)]
struct Config {
    /// Worker thread count.
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Number of update operations to apply from the update file.
    #[arg(long, default_value_t = 1_000_000)]
    size: usize,

    /// Disable shared leaf locks during search (version-validated reads).
    #[arg(long)]
    lock_free: bool,

    /// Apply the update file as deletions instead of insertions.
    #[arg(long)]
    delete: bool,

    /// Edge list to bulk-load as the core graph.
    #[arg(long, value_name = "PATH")]
    core_graph: Option<PathBuf>,

    /// Edge list supplying the online updates.
    #[arg(long, value_name = "PATH")]
    update_file: Option<PathBuf>,

    /// Initial vertex capacity.
    #[arg(long)]
    vertex_count: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    run(Config::parse())
}

fn run(config: Config) -> Result<()> {
    let core = match &config.core_graph {
        Some(path) => load_edge_list(path)
            .with_context(|| format!("loading core graph {}", path.display()))?,
        None => Vec::new(),
    };
    let updates = match &config.update_file {
        Some(path) => load_edge_list(path)
            .with_context(|| format!("loading update file {}", path.display()))?,
        None => Vec::new(),
    };
    info!(
        threads = config.threads,
        core = core.len(),
        updates = updates.len(),
        lock_free = config.lock_free,
        "inputs loaded"
    );

    let params = PcsrParams::new(config.vertex_count + 1).with_lock_search(!config.lock_free);
    let graph = Arc::new(Pcsr::new(params));
    let mut pool = WorkerPool::new(Arc::clone(&graph), config.threads);

    if !core.is_empty() {
        pool.submit_bulk(core.clone());
        let start = Instant::now();
        pool.start();
        pool.stop();
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            edges = core.len(),
            "core graph loaded"
        );
    }

    let count = config.size.min(updates.len());
    if count > 0 {
        for (i, &(src, dest)) in updates[..count].iter().enumerate() {
            let op = if config.delete {
                GraphOp::RemoveEdge { src, dest }
            } else {
                GraphOp::AddEdge { src, dest }
            };
            pool.submit(i % config.threads, op);
        }
        let start = Instant::now();
        pool.start();
        pool.stop();
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            ops = count,
            mode = if config.delete { "delete" } else { "insert" },
            "updates applied"
        );
    }

    let mut missing = 0usize;
    if !config.delete {
        for &(src, dest) in core.iter().chain(updates[..count].iter()) {
            if !graph.edge_exists(src, dest) {
                missing += 1;
            }
        }
        ensure!(missing == 0, "{missing} edges missing after load");
    }
    info!(
        edges = graph.edge_count(),
        capacity = graph.capacity(),
        "verification passed"
    );
    Ok(())
}
