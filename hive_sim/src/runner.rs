//! Parallel runner - fans independent work items out over a fixed worker pool.
//!
//! ```text
//! items ──► partition (ceil(N / W) per chunk) ──► job queue ──► W worker threads
//!                                                                    │
//!   results (completion order) ◄── result channel ◄── one chunk per job
//! ```
//!
//! Each worker runs its chunk sequentially. Every item gets a fresh
//! current-thread runtime and `LocalSet`, a hard timeout, and panic
//! isolation; an item that fails, panics or times out is logged and
//! omitted from the results without affecting its chunk siblings.

use crate::work::{run_encoded, ReasonerFactory, WorkItem, WorldReport};
use crossbeam::channel::{self, Receiver, Sender};
use hive_env::SwarmError;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default per-item bound.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(300);

/// Runner parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Worker threads (default: logical core count)
    pub workers: usize,

    /// Hard bound on one item's run (default: 300s)
    pub item_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }
}

/// Size of each contiguous chunk: `ceil(items / workers)`, at least 1.
pub fn chunk_size(items: usize, workers: usize) -> usize {
    let workers = workers.max(1);
    ((items + workers - 1) / workers).max(1)
}

/// Splits items into contiguous chunks of `chunk_size(len, workers)`.
pub fn partition<T>(items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let size = chunk_size(items.len(), workers);
    let mut chunks = Vec::with_capacity(workers.max(1));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

type Job = Box<dyn FnOnce() + Send + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-size pool of named worker threads fed from one job queue.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, SwarmError> {
        if size == 0 {
            return Err(SwarmError::config("worker count must be at least 1"));
        }

        let (sender, receiver) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver: Receiver<Job> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("hive-worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                    debug!(worker = index, "Worker exiting");
                })
                .map_err(|e| SwarmError::config(format!("spawn worker failed: {}", e)))?;
            workers.push(handle);
        }
        info!(workers = size, "Worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Queues a job. Fails with `PoolClosed` after `shutdown`.
    pub fn execute<F>(&self, job: F) -> Result<(), SwarmError>
    where
        F: FnOnce() + Send + 'static,
    {
        match lock(&self.sender).as_ref() {
            Some(sender) => sender.send(Box::new(job)).map_err(|_| SwarmError::PoolClosed),
            None => Err(SwarmError::PoolClosed),
        }
    }

    /// Lets queued jobs drain, then joins every worker. Idempotent.
    pub fn shutdown(&self) {
        let Some(sender) = lock(&self.sender).take() else {
            return;
        };
        drop(sender);

        let workers: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        info!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Why an item produced no result.
#[derive(Debug)]
enum ItemFailure {
    Error(SwarmError),
    Panicked,
}

/// Runs one item on a fresh current-thread runtime under a hard timeout.
fn run_isolated<T, R, F, Fut>(item: T, func: &F, timeout: Duration) -> Result<R, ItemFailure>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, SwarmError>> + 'static,
    R: 'static,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SwarmError::config(format!("runtime build failed: {}", e)))?;
        let local = tokio::task::LocalSet::new();
        local.block_on(&runtime, async {
            let handle = tokio::task::spawn_local(func(item));
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(SwarmError::agent(format!("item task failed: {}", join_error))),
                Err(_) => Err(SwarmError::timeout(timeout)),
            }
        })
    }));

    match outcome {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(ItemFailure::Error(e)),
        Err(_) => Err(ItemFailure::Panicked),
    }
}

/// Statically sharded fan-out over a `WorkerPool`.
pub struct ParallelRunner {
    config: RunnerConfig,
    pool: WorkerPool,
}

impl ParallelRunner {
    pub fn new(config: RunnerConfig) -> Result<Self, SwarmError> {
        let pool = WorkerPool::new(config.workers)?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs `func` over every item and returns the successful results in
    /// completion order.
    pub fn run_parallel<T, R, F, Fut>(&self, items: Vec<T>, func: F) -> Result<Vec<R>, SwarmError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, SwarmError>> + 'static,
    {
        if self.pool.is_closed() {
            return Err(SwarmError::PoolClosed);
        }

        let total = items.len();
        let chunks = partition(items, self.config.workers);
        info!(
            items = total,
            chunks = chunks.len(),
            chunk_size = chunk_size(total, self.config.workers),
            "Starting parallel execution"
        );

        let func = Arc::new(func);
        let timeout = self.config.item_timeout;
        let (results_tx, results_rx) = channel::unbounded::<Vec<R>>();

        let mut submitted = 0;
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let func = Arc::clone(&func);
            let results_tx = results_tx.clone();
            self.pool.execute(move || {
                debug!(chunk = chunk_index, items = chunk.len(), "Processing chunk");
                let mut results = Vec::with_capacity(chunk.len());
                for (offset, item) in chunk.into_iter().enumerate() {
                    match run_isolated(item, func.as_ref(), timeout) {
                        Ok(result) => results.push(result),
                        Err(ItemFailure::Error(e)) => {
                            warn!(chunk = chunk_index, item = offset, error = %e, "Item failed")
                        }
                        Err(ItemFailure::Panicked) => {
                            error!(chunk = chunk_index, item = offset, "Item panicked")
                        }
                    }
                }
                let _ = results_tx.send(results);
            })?;
            submitted += 1;
        }
        drop(results_tx);

        let mut results = Vec::with_capacity(total);
        for _ in 0..submitted {
            match results_rx.recv() {
                Ok(chunk_results) => {
                    results.extend(chunk_results);
                    debug!(completed = results.len(), "Chunk complete");
                }
                Err(_) => break,
            }
        }

        info!(items = total, succeeded = results.len(), "Parallel execution finished");
        Ok(results)
    }

    /// Runs one world per item. Items and reports cross the worker
    /// boundary as JSON bytes.
    pub fn run_worlds(
        &self,
        items: Vec<WorkItem>,
        factory: ReasonerFactory,
    ) -> Result<Vec<WorldReport>, SwarmError> {
        let encoded = items
            .iter()
            .map(WorkItem::to_bytes)
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = self.run_parallel(encoded, move |bytes| run_encoded(bytes, Arc::clone(&factory)))?;

        let mut reports = Vec::with_capacity(outputs.len());
        for bytes in outputs {
            match WorldReport::from_bytes(&bytes) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "Discarding undecodable report"),
            }
        }
        Ok(reports)
    }

    /// Drains and stops the pool. Idempotent.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
