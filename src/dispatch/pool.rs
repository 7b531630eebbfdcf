//! Elastic worker pool that runs event functions

use std::{
    cell::Cell,
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{EnsError, Result},
    sync::{CondvarExt, MutexExt},
};

use super::{
    config::DispatchConfig,
    stats::{AtomicDispatchStats, DispatchStats},
};

/// Unit of work executed by a worker
pub type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// Address of the pool the current thread works for, 0 elsewhere
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

/// A job the pool refused, handed back to the caller
pub struct Rejected {
    job: Job,
    error: EnsError,
}

impl Rejected {
    /// Why the job was refused
    pub fn error(&self) -> &EnsError {
        &self.error
    }

    /// Recover the job to run it elsewhere
    pub fn into_job(self) -> Job {
        self.job
    }

    /// Discard the job, keeping the error
    pub fn into_error(self) -> EnsError {
        self.error
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// A queued job and when it was queued
struct Queued {
    since: Instant,
    job: Job,
}

#[derive(Default)]
struct PoolState {
    jobs: VecDeque<Queued>,
    threads: usize,
    idle: usize,
    blocked: usize,
    running: usize,
    /// Workers started past `max_threads` because the queue stalled
    overflow: usize,
    shutdown: bool,
}

struct Shared {
    config: DispatchConfig,
    state: Mutex<PoolState>,
    work_ready: Condvar,
    drained: Condvar,
    watch_wake: Condvar,
    stats: Arc<AtomicDispatchStats>,
    next_worker: AtomicUsize,
}

impl Shared {
    fn spawn_worker(shared: &Arc<Shared>, state: &mut PoolState) -> Result<()> {
        let id = shared.next_worker.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", shared.config.thread_name_prefix, id);
        let worker = Arc::clone(shared);

        thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(|e| EnsError::platform(e, "Failed to spawn dispatch worker"))?;

        state.threads += 1;
        shared.stats.record_spawn();
        Ok(())
    }

    /// Whether another worker may start without exceeding the bound
    fn may_grow(&self, state: &PoolState) -> bool {
        state.threads.saturating_sub(state.blocked) < self.config.max_threads + state.overflow
    }

    /// Start an extra worker whenever the oldest queued job has waited
    /// `threshold` with no worker free to take it. At most `max_threads`
    /// such workers run at once.
    fn watch(self: Arc<Self>, threshold: Duration) {
        let mut state = self.state.lock_unpoisoned();
        while !state.shutdown {
            let stalled = state.idle == 0
                && state.overflow < self.config.max_threads
                && state
                    .jobs
                    .front()
                    .map_or(false, |queued| queued.since.elapsed() >= threshold);

            if stalled {
                match Shared::spawn_worker(&self, &mut state) {
                    Ok(()) => {
                        state.overflow += 1;
                        self.stats.record_stall_spawn();
                        log::debug!(
                            "dispatch queue stalled for {:?} with {} workers ({} blocked), added a worker",
                            threshold,
                            state.threads,
                            state.blocked
                        );
                    }
                    Err(e) => log::warn!("dispatch pool could not relieve a stalled queue: {}", e),
                }
            }

            state = self.watch_wake.wait_timeout_unpoisoned(state, threshold).0;
        }
        log::trace!("dispatch watchdog exiting");
    }

    fn run(self: Arc<Self>) {
        CURRENT_POOL.with(|pool| pool.set(Arc::as_ptr(&self) as usize));
        log::trace!("dispatch worker {:?} started", thread::current().name());

        let mut state = self.state.lock_unpoisoned();
        loop {
            if let Some(Queued { job, .. }) = state.jobs.pop_front() {
                state.running += 1;
                drop(state);

                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    self.stats.record_panic();
                    log::error!(
                        "dispatch job panicked on {:?}",
                        thread::current().name()
                    );
                }

                state = self.state.lock_unpoisoned();
                state.running -= 1;
                if state.jobs.is_empty() {
                    self.drained.notify_all();
                }
                continue;
            }

            if state.shutdown {
                break;
            }

            state.idle += 1;
            let (guard, timed_out) = self
                .work_ready
                .wait_timeout_unpoisoned(state, self.config.keep_alive);
            state = guard;
            state.idle -= 1;

            if timed_out
                && state.jobs.is_empty()
                && state.threads > self.config.min_threads
            {
                break;
            }
        }

        state.threads -= 1;
        state.overflow = state.overflow.saturating_sub(1);
        drop(state);

        self.stats.record_retire();
        CURRENT_POOL.with(|pool| pool.set(0));
        log::trace!("dispatch worker {:?} exiting", thread::current().name());
    }
}

/// Worker pool sized between `min_threads` and `max_threads`.
///
/// Workers parked in a blocking request do not count against the upper
/// bound, so a pool whose workers all wait on responses still grows to run
/// the events that produce those responses. Event functions that block
/// elsewhere without saying so are covered by a watchdog: once the oldest
/// queued job has waited `stall_threshold`, one more worker starts.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create the pool and start `min_threads` workers
    pub fn new(config: DispatchConfig, stats: Arc<AtomicDispatchStats>) -> Result<Self> {
        config.validate()?;

        let pool = Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState::default()),
                work_ready: Condvar::new(),
                drained: Condvar::new(),
                watch_wake: Condvar::new(),
                stats,
                next_worker: AtomicUsize::new(0),
            }),
        };

        {
            let mut state = pool.shared.state.lock_unpoisoned();
            for _ in 0..pool.shared.config.min_threads {
                Shared::spawn_worker(&pool.shared, &mut state)?;
            }
        }

        if let Some(threshold) = pool.shared.config.stall_threshold {
            let watcher = Arc::clone(&pool.shared);
            thread::Builder::new()
                .name(format!("{}-watch", pool.shared.config.thread_name_prefix))
                .spawn(move || watcher.watch(threshold))
                .map_err(|e| EnsError::platform(e, "Failed to spawn dispatch watchdog"))?;
        }

        Ok(pool)
    }

    /// Queue a job, growing the pool if no worker is free
    pub fn submit(&self, job: Job) -> std::result::Result<(), Rejected> {
        let mut state = self.shared.state.lock_unpoisoned();

        if state.shutdown {
            self.shared.stats.record_rejection();
            return Err(Rejected {
                job,
                error: EnsError::dispatch_rejected("worker pool is shut down"),
            });
        }

        if state.jobs.len() >= self.shared.config.max_queue_depth {
            self.shared.stats.record_rejection();
            return Err(Rejected {
                job,
                error: EnsError::dispatch_rejected(format!(
                    "dispatch queue is full ({} jobs)",
                    state.jobs.len()
                )),
            });
        }

        state.jobs.push_back(Queued {
            since: Instant::now(),
            job,
        });

        if state.jobs.len() > state.idle && self.shared.may_grow(&state) {
            if let Err(e) = Shared::spawn_worker(&self.shared, &mut state) {
                log::warn!("dispatch pool could not grow: {}", e);
                if state.threads == 0 {
                    if let Some(Queued { job, .. }) = state.jobs.pop_back() {
                        self.shared.stats.record_rejection();
                        return Err(Rejected { job, error: e });
                    }
                }
            }
        }

        self.shared.work_ready.notify_one();
        Ok(())
    }

    /// Mark the current worker as blocked until the guard drops.
    ///
    /// Has no effect on threads that do not belong to this pool.
    pub fn enter_blocking(&self) -> BlockingGuard {
        if !self.is_worker_thread() {
            return BlockingGuard { shared: None };
        }

        let mut state = self.shared.state.lock_unpoisoned();
        state.blocked += 1;
        if !state.jobs.is_empty() && state.idle == 0 && self.shared.may_grow(&state) {
            if let Err(e) = Shared::spawn_worker(&self.shared, &mut state) {
                log::warn!("dispatch pool could not replace a blocked worker: {}", e);
            }
        }

        BlockingGuard {
            shared: Some(Arc::clone(&self.shared)),
        }
    }

    /// Whether the calling thread is one of this pool's workers
    pub fn is_worker_thread(&self) -> bool {
        let this = Arc::as_ptr(&self.shared) as usize;
        CURRENT_POOL.with(|pool| pool.get() == this)
    }

    /// Wait until no job is queued or running, up to `timeout`.
    ///
    /// When called from a worker, the caller's own job is not counted.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let own = usize::from(self.is_worker_thread());
        let deadline = Instant::now() + timeout;

        let mut state = self.shared.state.lock_unpoisoned();
        while state.running > own || !state.jobs.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .drained
                .wait_timeout_unpoisoned(state, deadline - now)
                .0;
        }
        true
    }

    /// Stop accepting jobs. Queued jobs still run, then workers exit.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock_unpoisoned();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        log::debug!(
            "dispatch pool shutting down ({} workers, {} queued)",
            state.threads,
            state.jobs.len()
        );
        drop(state);
        self.shared.work_ready.notify_all();
        self.shared.watch_wake.notify_all();
    }

    /// Whether `shutdown` was called
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock_unpoisoned().shutdown
    }

    /// Get current statistics
    pub fn stats(&self) -> DispatchStats {
        let state = self.shared.state.lock_unpoisoned();
        let mut stats = self.shared.stats.snapshot();
        stats.threads = state.threads;
        stats.idle_threads = state.idle;
        stats.blocked_threads = state.blocked;
        stats.queued = state.jobs.len();
        stats.running = state.running;
        stats
    }

    /// Get pool configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.shared.config
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Keeps a worker counted as blocked while alive
#[must_use = "the worker counts as blocked only while the guard is alive"]
pub struct BlockingGuard {
    shared: Option<Arc<Shared>>,
}

impl Drop for BlockingGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut state = shared.state.lock_unpoisoned();
            state.blocked = state.blocked.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::AtomicBool, mpsc};

    fn pool(min: usize, max: usize) -> WorkerPool {
        let config = DispatchConfig::new(min, max).with_keep_alive(Duration::from_millis(50));
        WorkerPool::new(config, Arc::new(AtomicDispatchStats::new())).unwrap()
    }

    #[test]
    fn test_runs_jobs() {
        let pool = pool(1, 4);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(Box::new(move || tx.send(i).unwrap())).unwrap();
        }

        let mut seen: Vec<i32> = (0..10).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(pool.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_queue_limit_rejects() {
        let config = DispatchConfig::new(1, 1).with_queue_depth(1);
        let pool = WorkerPool::new(config, Arc::new(AtomicDispatchStats::new())).unwrap();

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // One slot in the queue, then refusals
        pool.submit(Box::new(|| {})).unwrap();
        let rejected = pool.submit(Box::new(|| {})).unwrap_err();
        assert!(matches!(rejected.error(), EnsError::DispatchRejected { .. }));
        assert_eq!(pool.stats().jobs_rejected, 1);

        release_tx.send(()).unwrap();
        assert!(pool.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_rejected_job_can_run_inline() {
        let pool = pool(0, 1);
        pool.shutdown();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let rejected = pool
            .submit(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap_err();
        (rejected.into_job())();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_blocked_workers_do_not_count() {
        let pool = Arc::new(pool(1, 1));
        let (tx, rx) = mpsc::channel();

        let inner_pool = Arc::clone(&pool);
        pool.submit(Box::new(move || {
            let _blocking = inner_pool.enter_blocking();
            let (inner_tx, inner_rx) = mpsc::channel();
            inner_pool
                .submit(Box::new(move || inner_tx.send("inner").unwrap()))
                .unwrap();
            // With max_threads = 1 this only completes if the pool grew
            let value = inner_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            tx.send(value).unwrap();
        }))
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), "inner");
        assert!(pool.stats().threads_spawned >= 2);
    }

    #[test]
    fn test_panicking_job_keeps_worker() {
        let pool = pool(1, 1);
        pool.submit(Box::new(|| panic!("boom"))).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || tx.send(7).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert_eq!(pool.stats().handler_panics, 1);
    }

    #[test]
    fn test_surplus_workers_retire() {
        let pool = pool(0, 4);
        pool.submit(Box::new(|| {})).unwrap();
        assert!(pool.wait_idle(Duration::from_secs(5)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.stats().threads > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.stats().threads, 0);
        assert!(pool.stats().threads_retired >= 1);
    }

    #[test]
    fn test_stalled_queue_adds_worker() {
        let config = DispatchConfig::new(1, 1)
            .with_keep_alive(Duration::from_millis(50))
            .with_stall_threshold(Some(Duration::from_millis(50)));
        let pool = WorkerPool::new(config, Arc::new(AtomicDispatchStats::new())).unwrap();

        // Occupies the only worker without marking itself blocked
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.submit(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();

        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || tx.send("queued").unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "queued");

        let stats = pool.stats();
        assert!(stats.stall_spawns >= 1);
        assert!(stats.threads_spawned >= 2);

        release_tx.send(()).unwrap();
        assert!(pool.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_no_stall_growth_when_disabled() {
        let config = DispatchConfig::new(1, 1).with_stall_threshold(None);
        let pool = WorkerPool::new(config, Arc::new(AtomicDispatchStats::new())).unwrap();

        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.submit(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();

        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || tx.send(()).unwrap())).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(pool.stats().stall_spawns, 0);

        release_tx.send(()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_not_a_worker() {
        let pool = pool(0, 1);
        assert!(!pool.is_worker_thread());
        let guard = pool.enter_blocking();
        drop(guard);
        assert_eq!(pool.stats().blocked_threads, 0);
    }
}
