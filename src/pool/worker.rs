//! Worker threads.
//!
//! Each worker is an OS thread owning one handler and draining its slot's
//! [`JobQueue`] one job at a time.  Replies travel back on a oneshot
//! channel.  The queue belongs to the slot, not the thread: terminating a
//! worker only stops that thread from taking further jobs, so jobs still
//! queued are picked up by its replacement.  The job in hand finishes in
//! the background and its reply is dropped.

use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread,
};

use anyhow::{anyhow, Context, Result};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Work executed inside a worker thread.  Each worker owns its handler, so
/// handlers may keep per-worker caches without locking.
pub trait WorkerHandler: Send + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    fn handle(&mut self, request: Self::Request) -> Result<Self::Response>;
}

pub(crate) type ReplyReceiver<H> = oneshot::Receiver<Result<<H as WorkerHandler>::Response>>;

struct Job<H: WorkerHandler> {
    request: H::Request,
    reply: oneshot::Sender<Result<H::Response>>,
    started: Arc<AtomicU64>,
}

/// A queued job's reply channel, plus the generation of the worker that
/// started it (0 while still queued).
pub(crate) struct Ticket<H: WorkerHandler> {
    pub(crate) reply: ReplyReceiver<H>,
    pub(crate) started: Arc<AtomicU64>,
}

/// Pending jobs of one pool slot, shared by every generation of its worker.
pub(crate) struct JobQueue<H: WorkerHandler> {
    jobs: Mutex<VecDeque<Job<H>>>,
    ready: Condvar,
}

impl<H: WorkerHandler> JobQueue<H> {
    pub(crate) fn new() -> Self {
        Self { jobs: Mutex::new(VecDeque::new()), ready: Condvar::new() }
    }

    /// Queue a job behind any already waiting.
    pub(crate) fn push(&self, request: H::Request) -> Ticket<H> {
        let (reply, receiver) = oneshot::channel();
        let started = Arc::new(AtomicU64::new(0));
        self.lock().push_back(Job { request, reply, started: started.clone() });
        self.ready.notify_one();
        Ticket { reply: receiver, started }
    }

    pub(crate) fn len(&self) -> usize { self.lock().len() }

    /// Drop every queued job; their callers see a closed reply channel.
    pub(crate) fn clear(&self) -> usize {
        let dropped: Vec<_> = self.lock().drain(..).collect();
        dropped.len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Job<H>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle on a running worker thread.
pub(crate) struct Worker<H: WorkerHandler> {
    index: usize,
    queue: Arc<JobQueue<H>>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    generation: u64,
}

impl<H: WorkerHandler> Worker<H> {
    /// Start a worker thread running `handler` on jobs from `queue`.
    pub(crate) fn spawn(index: usize, generation: u64, mut handler: H, queue: Arc<JobQueue<H>>) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));

        let (jobs, thread_cancel, thread_running) = (queue.clone(), cancel.clone(), running.clone());
        thread::Builder::new()
            .name(format!("topomerge-worker-{index}"))
            .spawn(move || {
                while let Some(Job { request, reply, started }) = next_job(&jobs, &thread_cancel, &thread_running) {
                    // Its caller already gave up.
                    if reply.is_closed() {
                        thread_running.store(false, Ordering::Release);
                        continue;
                    }
                    started.store(generation, Ordering::Release);

                    let result = catch_unwind(AssertUnwindSafe(|| handler.handle(request)))
                        .unwrap_or_else(|panic| Err(anyhow!("worker panicked: {}", panic_message(panic.as_ref()))));
                    thread_running.store(false, Ordering::Release);

                    if thread_cancel.load(Ordering::Acquire) { break }
                    let _ = reply.send(result);
                }
                debug!(worker = index, generation, "worker thread exiting");
            })
            .with_context(|| format!("[pool::worker] Failed to spawn worker {index}"))?;

        Ok(Self { index, queue, cancel, running, generation })
    }

    #[inline] pub(crate) fn generation(&self) -> u64 { self.generation }

    /// Whether the worker has no job queued or running.
    pub(crate) fn is_idle(&self) -> bool {
        !self.running.load(Ordering::Acquire) && self.queue.len() == 0
    }

    /// Stop the worker from taking further jobs.  Queued jobs stay on the
    /// slot's queue; a running job finishes in the background and its reply
    /// is discarded.
    pub(crate) fn terminate(self) {
        {
            let _jobs = self.queue.lock();
            self.cancel.store(true, Ordering::Release);
        }
        self.queue.ready.notify_all();
        if self.running.load(Ordering::Acquire) {
            warn!(
                worker = self.index,
                generation = self.generation,
                "abandoning running job; its thread and memory are held until it returns"
            );
        }
    }
}

/// Block until a job is available or the worker is cancelled.  The running
/// flag is raised before the queue lock is released so the worker never
/// looks idle between taking a job and starting it.
fn next_job<H: WorkerHandler>(queue: &JobQueue<H>, cancel: &AtomicBool, running: &AtomicBool) -> Option<Job<H>> {
    let mut jobs = queue.lock();
    loop {
        if cancel.load(Ordering::Acquire) { return None }
        if let Some(job) = jobs.pop_front() {
            running.store(true, Ordering::Release);
            return Some(job);
        }
        jobs = queue.ready.wait(jobs).unwrap_or_else(PoisonError::into_inner);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic.downcast_ref::<&str>().map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
