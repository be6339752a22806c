use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use tokio::task::JoinSet;
use topomerge::{PoolError, WorkerHandler, WorkerPool};

#[derive(Debug)]
enum Task {
    Sleep(Duration),
    Fail,
    Panic,
}

/// Replies with its worker index and records how many tasks run at once.
struct Recorder {
    index: usize,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl WorkerHandler for Recorder {
    type Request = Task;
    type Response = usize;

    fn handle(&mut self, task: Task) -> Result<usize> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = match task {
            Task::Sleep(duration) => { std::thread::sleep(duration); Ok(self.index) }
            Task::Fail => Err(anyhow::anyhow!("task failed")),
            Task::Panic => panic!("task panicked"),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[derive(Clone, Default)]
struct Counters {
    created: Arc<AtomicUsize>,
    /// Per worker index, shared across recreations.
    active: Arc<Vec<Arc<AtomicUsize>>>,
    peak: Arc<AtomicUsize>,
}

fn pool(num_workers: usize, budget: u64, timeout: Duration) -> (Arc<WorkerPool<Recorder>>, Counters) {
    let counters = Counters {
        active: Arc::new((0..num_workers).map(|_| Arc::new(AtomicUsize::new(0))).collect()),
        ..Counters::default()
    };
    let shared = counters.clone();
    let pool = WorkerPool::new(num_workers, budget, timeout, move |index| {
        shared.created.fetch_add(1, Ordering::SeqCst);
        Ok(Recorder { index, active: shared.active[index].clone(), peak: shared.peak.clone() })
    });
    (Arc::new(pool), counters)
}

const SHORT: Duration = Duration::from_millis(5);

#[tokio::test]
async fn sequential_tasks_stay_on_one_worker() {
    let (pool, counters) = pool(4, 1000, Duration::from_secs(10));

    let mut used = BTreeSet::new();
    for _ in 0..6 {
        used.insert(pool.run("tx", 100, Task::Sleep(SHORT)).await.unwrap());
    }
    assert_eq!(used.len(), 1);
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.regions["tx"].len(), 1);
    assert_eq!(snapshot.sizes.iter().sum::<u64>(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_spreads_to_at_most_half_the_workers() {
    let (pool, _) = pool(4, 1000, Duration::from_secs(10));

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let pool = pool.clone();
        tasks.spawn(async move { pool.run("tx", 100, Task::Sleep(Duration::from_millis(200))).await });
    }
    let mut used = BTreeSet::new();
    while let Some(result) = tasks.join_next().await {
        used.insert(result.unwrap().unwrap());
    }

    assert_eq!(used.len(), 2);
    assert_eq!(pool.snapshot().regions["tx"].len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_run_one_task_at_a_time() {
    let (pool, counters) = pool(2, 1000, Duration::from_secs(10));

    let mut tasks = JoinSet::new();
    for i in 0..12 {
        let pool = pool.clone();
        let region = if i % 2 == 0 { "tx" } else { "ca" };
        tasks.spawn(async move { pool.run(region, 10, Task::Sleep(Duration::from_millis(10))).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(counters.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_regions_pick_the_best_fitting_worker() {
    let (pool, _) = pool(4, 1000, Duration::from_secs(10));

    let tx = pool.run("tx", 400, Task::Sleep(SHORT)).await.unwrap();
    // Fits beside "tx", leaving less room than an empty worker would.
    let ca = pool.run("ca", 400, Task::Sleep(SHORT)).await.unwrap();
    // No longer fits beside both.
    let ny = pool.run("ny", 500, Task::Sleep(SHORT)).await.unwrap();

    assert_eq!(tx, ca);
    assert_ne!(ny, tx);
    let sizes = pool.snapshot().sizes;
    assert_eq!(sizes[tx], 800);
    assert_eq!(sizes[ny], 500);
}

#[tokio::test]
async fn overflow_resets_worker_to_job_size() {
    let (pool, counters) = pool(1, 100, Duration::from_secs(10));

    pool.run("a", 60, Task::Sleep(SHORT)).await.unwrap();
    pool.run("b", 60, Task::Sleep(SHORT)).await.unwrap();

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.sizes, vec![60]);
    assert_eq!(snapshot.regions.keys().collect::<Vec<_>>(), vec!["b"]);
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);

    // Already holding "b": no reset.
    pool.run("b", 60, Task::Sleep(SHORT)).await.unwrap();
    assert_eq!(pool.snapshot().sizes, vec![60]);
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn eviction_keeps_jobs_queued_behind_the_running_one() {
    let (pool, counters) = pool(1, 100, Duration::from_secs(10));

    let running = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run("a", 60, Task::Sleep(Duration::from_millis(300))).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run("a", 60, Task::Sleep(SHORT)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.snapshot().idle, vec![false]);

    // Does not fit beside "a": the busy worker is recreated.
    let evicting = pool.run("b", 60, Task::Sleep(SHORT)).await;
    assert_eq!(evicting.unwrap(), 0);
    assert_eq!(queued.await.unwrap().unwrap(), 0);
    assert!(matches!(running.await.unwrap(), Err(PoolError::WorkerFailed { worker: 0, .. })));
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn timeout_fails_caller_and_recreates_worker() {
    let (pool, counters) = pool(1, 1000, Duration::from_millis(50));

    let err = pool.run("tx", 10, Task::Sleep(Duration::from_secs(1))).await.unwrap_err();
    assert!(matches!(err, PoolError::Timeout { worker: 0, .. }));
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    assert_eq!(pool.snapshot().sizes, vec![0]);
    assert!(pool.snapshot().regions.is_empty());

    assert_eq!(pool.run("tx", 10, Task::Sleep(SHORT)).await.unwrap(), 0);
}

#[tokio::test]
async fn failures_and_panics_recreate_worker() {
    let (pool, counters) = pool(1, 1000, Duration::from_secs(10));

    let err = pool.run("tx", 10, Task::Fail).await.unwrap_err();
    assert!(matches!(err, PoolError::WorkerFailed { worker: 0, .. }));
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);

    let err = pool.run("tx", 10, Task::Panic).await.unwrap_err();
    assert!(err.to_string().contains("task panicked"), "{err}");
    assert_eq!(counters.created.load(Ordering::SeqCst), 3);

    assert_eq!(pool.run("tx", 10, Task::Sleep(SHORT)).await.unwrap(), 0);
}

struct Flaky;

impl WorkerHandler for Flaky {
    type Request = ();
    type Response = ();

    fn handle(&mut self, _: ()) -> Result<()> { Ok(()) }
}

#[tokio::test]
async fn failed_creation_is_retried_by_next_task() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let pool = WorkerPool::new(1, 1000, Duration::from_secs(10), move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 { bail!("no memory") }
        Ok(Flaky)
    });

    let err = pool.run("tx", 10, ()).await.unwrap_err();
    assert!(matches!(err, PoolError::WorkerUnavailable { worker: 0, .. }));
    assert_eq!(pool.snapshot().live, vec![false]);

    pool.run("tx", 10, ()).await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(pool.snapshot().live, vec![true]);
}

#[tokio::test]
async fn shutdown_rejects_new_tasks() {
    let (pool, _) = pool(2, 1000, Duration::from_secs(10));
    pool.run("tx", 10, Task::Sleep(SHORT)).await.unwrap();

    pool.shutdown();
    assert!(matches!(pool.run("tx", 10, Task::Sleep(SHORT)).await, Err(PoolError::ShutDown)));
    assert_eq!(pool.snapshot().live, vec![false, false]);
}

#[tokio::test]
async fn snapshot_serializes() {
    let (pool, _) = pool(2, 1000, Duration::from_secs(10));
    pool.run("tx", 10, Task::Sleep(SHORT)).await.unwrap();

    let json = serde_json::to_value(pool.snapshot()).unwrap();
    assert_eq!(json["budget"], 1000);
    assert_eq!(json["regions"]["tx"].as_array().unwrap().len(), 1);
    assert_eq!(json["recent"][0], json["regions"]["tx"][0]);
}
