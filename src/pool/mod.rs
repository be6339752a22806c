//! Fixed-size pool of worker threads with region-affinity routing.
//!
//! ```text
//! WorkerPool
//!   ├── admission lock
//!   │     ├── Router (sizes, per-region and global recency)
//!   │     └── slots: [JobQueue + Option<Worker>; N]  (workers created lazily)
//!   └── per task: queue on the chosen slot, await reply with a timeout
//! ```
//!
//! Routing and worker lifecycle changes happen only under the admission
//! lock; execution runs in parallel across workers, one job at a time per
//! worker.  A slot's queue outlives its worker, so recreating a worker
//! loses at most the job it was running.

pub mod error;
mod router;
mod worker;

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, info, warn};

pub use error::{PoolError, PoolResult};
pub use router::{Route, Router};
pub use worker::WorkerHandler;

use worker::{JobQueue, Ticket, Worker};

type Factory<H> = dyn Fn(usize) -> anyhow::Result<H> + Send + Sync;

struct Slot<H: WorkerHandler> {
    queue: Arc<JobQueue<H>>,
    worker: Option<Worker<H>>,
}

impl<H: WorkerHandler> Slot<H> {
    fn is_idle(&self) -> bool {
        match &self.worker {
            Some(worker) => worker.is_idle(),
            None => self.queue.len() == 0,
        }
    }
}

struct State<H: WorkerHandler> {
    router: Router,
    slots: Vec<Slot<H>>,
    shut_down: bool,
}

/// Diagnostic view of the pool's routing tables.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub budget: u64,
    /// Tracked bytes per worker.
    pub sizes: Vec<u64>,
    /// Whether each worker thread currently exists.
    pub live: Vec<bool>,
    pub idle: Vec<bool>,
    /// Workers holding each region, most recently used first.
    pub regions: BTreeMap<String, Vec<usize>>,
    /// Global recency, most recently used first.
    pub recent: Vec<usize>,
}

pub struct WorkerPool<H: WorkerHandler> {
    state: Mutex<State<H>>,
    factory: Box<Factory<H>>,
    task_timeout: Duration,
    generations: AtomicU64,
}

impl<H: WorkerHandler> WorkerPool<H> {
    /// A pool of `num_workers` workers (at least one), each allowed
    /// `worker_budget` bytes of region data.  `factory(index)` builds a
    /// worker's handler whenever the worker is (re)created.
    pub fn new(
        num_workers: usize,
        worker_budget: u64,
        task_timeout: Duration,
        factory: impl Fn(usize) -> anyhow::Result<H> + Send + Sync + 'static,
    ) -> Self {
        let router = Router::new(num_workers, worker_budget);
        let slots = (0..router.num_workers())
            .map(|_| Slot { queue: Arc::new(JobQueue::new()), worker: None })
            .collect();
        info!(
            workers = router.num_workers(),
            budget = worker_budget,
            max_per_region = router.max_per_region(),
            "worker pool created"
        );
        Self {
            state: Mutex::new(State { router, slots, shut_down: false }),
            factory: Box::new(factory),
            task_timeout,
            generations: AtomicU64::new(0),
        }
    }

    #[inline] pub fn task_timeout(&self) -> Duration { self.task_timeout }

    /// Run `request` on a worker chosen for `region`, whose data takes
    /// `size` bytes.  A worker that times out or fails is recreated and the
    /// error returned.
    pub async fn run(&self, region: &str, size: u64, request: H::Request) -> PoolResult<H::Response> {
        let (worker, Ticket { reply, started }) = self.dispatch(region, size, request)?;

        match tokio::time::timeout(self.task_timeout, reply).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(source))) => {
                warn!(worker, region = %region, error = %source, "task failed, recreating worker");
                self.recycle(worker, started.load(Ordering::Acquire));
                Err(PoolError::WorkerFailed { worker, source })
            }
            // The worker running it was already replaced, or recreation failed.
            Ok(Err(_)) => Err(PoolError::WorkerFailed { worker, source: anyhow::anyhow!("worker terminated before replying") }),
            Err(_) => {
                match started.load(Ordering::Acquire) {
                    // Still queued behind a slower job, which times out first.
                    0 => warn!(worker, region = %region, timeout = ?self.task_timeout, "task timed out while queued"),
                    generation => {
                        warn!(worker, region = %region, timeout = ?self.task_timeout, "task timed out, recreating worker");
                        self.recycle(worker, generation);
                    }
                }
                Err(PoolError::Timeout { worker, after: self.task_timeout })
            }
        }
    }

    /// Route and queue a job under the admission lock.
    fn dispatch(&self, region: &str, size: u64, request: H::Request) -> PoolResult<(usize, Ticket<H>)> {
        let mut state = self.lock();
        if state.shut_down { return Err(PoolError::ShutDown) }

        let idle: Vec<bool> = state.slots.iter().map(Slot::is_idle).collect();
        let Route { worker, reset } = state.router.route(region, size, |w| idle[w]);
        debug!(worker, region = %region, size, reset, "routed task");

        let State { router, slots, .. } = &mut *state;
        let slot = &mut slots[worker];
        if reset {
            if let Some(old) = slot.worker.take() {
                debug!(worker, generation = old.generation(), region = %region, "worker over budget, recreating");
                old.terminate();
            }
        }

        if slot.worker.is_none() {
            match self.spawn(worker, &slot.queue) {
                Ok(created) => slot.worker = Some(created),
                Err(e) => {
                    let dropped = slot.queue.clear();
                    warn!(worker, dropped, error = %e, "failed to create worker");
                    router.reset(worker);
                    return Err(PoolError::WorkerUnavailable { worker, reason: format!("{e:#}") });
                }
            }
        }

        Ok((worker, slot.queue.push(request)))
    }

    fn spawn(&self, index: usize, queue: &Arc<JobQueue<H>>) -> anyhow::Result<Worker<H>> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let handler = (self.factory)(index)?;
        let worker = Worker::spawn(index, generation, handler, queue.clone())?;
        debug!(worker = index, generation, "worker created");
        Ok(worker)
    }

    /// Terminate and recreate `worker` unless it was already replaced since
    /// `generation` started the failed job.  Jobs queued behind it move to
    /// the new worker.
    fn recycle(&self, worker: usize, generation: u64) {
        let mut state = self.lock();
        if state.shut_down { return }
        let State { router, slots, .. } = &mut *state;
        let slot = &mut slots[worker];
        if slot.worker.as_ref().is_none_or(|w| w.generation() != generation) { return }

        if let Some(old) = slot.worker.take() { old.terminate() }
        router.reset(worker);
        match self.spawn(worker, &slot.queue) {
            Ok(created) => slot.worker = Some(created),
            // Nothing would run them before their callers time out.
            Err(e) => {
                let dropped = slot.queue.clear();
                warn!(worker, dropped, error = %e, "failed to recreate worker");
            }
        }
    }

    /// Terminate every worker.  Later calls to `run` fail with `ShutDown`.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        for (index, slot) in state.slots.iter_mut().enumerate() {
            slot.queue.clear();
            if let Some(worker) = slot.worker.take() {
                debug!(worker = index, "terminating worker");
                worker.terminate();
            }
        }
        info!("worker pool shut down");
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.lock();
        PoolSnapshot {
            budget: state.router.budget(),
            sizes: state.router.sizes().to_vec(),
            live: state.slots.iter().map(|s| s.worker.is_some()).collect(),
            idle: state.slots.iter().map(Slot::is_idle).collect(),
            regions: state.router.regions().clone(),
            recent: state.router.recent().to_vec(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: WorkerHandler> Drop for WorkerPool<H> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in &mut state.slots {
            slot.queue.clear();
            if let Some(worker) = slot.worker.take() { worker.terminate() }
        }
    }
}
