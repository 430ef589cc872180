use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::statistic::Statistic;
use crate::worker::{Worker, WorkerContext, WorkerTimings};

/// Fixed set of workers bound to one test and one client.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    shutdown: CancellationToken,
    launched: AtomicBool,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        size: usize,
        context: WorkerContext,
        shutdown: CancellationToken,
        timings: WorkerTimings,
    ) -> Self {
        let workers = (0..size)
            .map(|id| Arc::new(Worker::new(id, context.clone(), &shutdown, timings)))
            .collect();
        Self {
            workers,
            shutdown,
            launched: AtomicBool::new(false),
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Every worker gets the same per-worker rate.
    pub fn broadcast_rate(&self, per_worker: u64) {
        for worker in &self.workers {
            worker.set_target_rate(per_worker);
        }
    }

    /// Start every worker loop. Only the first call has an effect.
    pub fn launch(&self) {
        if self.launched.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut loops = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        for worker in &self.workers {
            let worker = worker.clone();
            loops.push(tokio::spawn(async move { worker.launch().await }));
        }
        debug!(workers = self.workers.len(), "Worker loops started");
    }

    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::Acquire)
    }

    /// Sum of attempts dispatched by all workers.
    pub fn dispatched_total(&self) -> u64 {
        self.workers.iter().map(|w| w.dispatched_count()).sum()
    }

    /// Stop all workers concurrently and merge their batches.
    pub async fn stop(&self) -> Vec<Statistic> {
        self.shutdown.cancel();

        let mut stopping = JoinSet::new();
        for worker in &self.workers {
            let worker = worker.clone();
            stopping.spawn(async move { worker.stop().await });
        }

        let mut statistics = Vec::new();
        while let Some(batch) = stopping.join_next().await {
            match batch {
                Ok(batch) => statistics.extend(batch),
                Err(e) => warn!("Worker failed while stopping: {}", e),
            }
        }

        let loops = std::mem::take(&mut *self.loops.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in loops {
            if let Err(e) = handle.await {
                warn!("Worker loop failed: {}", e);
            }
        }

        statistics
    }
}
