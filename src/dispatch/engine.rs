//! Event delivery onto the worker pool
//!
//! The engine owns the per-session ordering rules: START runs before any
//! data event, data events run concurrently, and the single terminal event
//! runs once the last admitted data event has returned.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use crate::{
    error::{EnsError, Result},
    runtime::Runtime,
    sessions::{Admission, Session, Termination},
};

use super::{
    config::DispatchConfig,
    event::{Event, EventHandler, EventType},
    pool::{BlockingGuard, Job, WorkerPool},
    stats::{AtomicDispatchStats, DispatchStats},
};

/// Called once a data event's handler has returned, with the event as the
/// handler left it, or with an error if the handler panicked
pub type Completion = Box<dyn FnOnce(Result<Event>) + Send + 'static>;

/// A data event on its way to a session, with an optional completion
pub struct Delivery {
    event: Event,
    completion: Option<Completion>,
}

impl Delivery {
    /// Fire-and-forget delivery
    pub fn new(event: Event) -> Self {
        Self {
            event,
            completion: None,
        }
    }

    /// Delivery whose outcome is reported to `completion`
    pub fn with_completion<F>(event: Event, completion: F) -> Self
    where
        F: FnOnce(Result<Event>) + Send + 'static,
    {
        Self {
            event,
            completion: Some(Box::new(completion)),
        }
    }

    /// The event being delivered
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Abandon the delivery, reporting `error` to the completion
    pub fn fail(self, error: EnsError) {
        if let Some(completion) = self.completion {
            completion(Err(error));
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("event", &self.event)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

/// Runs event functions for every session of a runtime
pub struct Dispatcher {
    workers: WorkerPool,
    stats: Arc<AtomicDispatchStats>,
}

impl Dispatcher {
    /// Create a dispatcher and its worker pool
    pub fn new(config: DispatchConfig) -> Result<Self> {
        let stats = Arc::new(AtomicDispatchStats::new());
        let workers = WorkerPool::new(config, Arc::clone(&stats))?;
        Ok(Self { workers, stats })
    }

    /// Deliver a data event to `session`.
    ///
    /// Fails when the session has no event function, is no longer open, or
    /// the worker pool refuses the job. On failure the event's buffer is
    /// returned to the pool and the completion is not called.
    pub fn deliver(&self, rt: &Runtime, session: &Arc<Session>, delivery: Delivery) -> Result<()> {
        if !session.has_handler() {
            self.stats.record_failure();
            log::warn!(
                "dropping {} for session {}: no event function",
                delivery.event.kind,
                session.id()
            );
            return Err(EnsError::NoEventFunction {
                session_id: session.id(),
            });
        }

        match session.admit(delivery) {
            Ok(Admission::Deliver(delivery)) => self.submit_data(rt, session, delivery),
            Ok(Admission::Queued) => {
                log::trace!("session {} still starting, event queued", session.id());
                Ok(())
            }
            Err(e) => {
                self.stats.record_failure();
                log::debug!("dropping event for session {}: {}", session.id(), e);
                Err(e)
            }
        }
    }

    /// Deliver SESSION_START to a freshly created incoming session
    pub fn dispatch_start(&self, rt: &Runtime, session: &Arc<Session>) {
        let rt = rt.clone();
        let session = Arc::clone(session);
        self.submit_or_run(Box::new(move || {
            rt.dispatcher().run_start(&rt, &session);
        }));
    }

    /// Deliver the terminal event of `session`
    pub fn dispatch_terminal(&self, rt: &Runtime, session: &Arc<Session>, kind: Termination) {
        let rt = rt.clone();
        let session = Arc::clone(session);
        self.submit_or_run(Box::new(move || {
            rt.dispatcher().run_terminal(&rt, &session, kind);
        }));
    }

    /// Count the current worker as blocked while the guard lives
    pub fn enter_blocking(&self) -> BlockingGuard {
        self.workers.enter_blocking()
    }

    /// Whether the calling thread runs event functions for this dispatcher
    pub fn is_worker_thread(&self) -> bool {
        self.workers.is_worker_thread()
    }

    /// Wait until every queued event has run
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.workers.wait_idle(timeout)
    }

    /// Stop accepting new jobs
    pub fn shutdown(&self) {
        self.workers.shutdown();
    }

    /// Get current statistics
    pub fn stats(&self) -> DispatchStats {
        self.workers.stats()
    }

    /// Get pool configuration
    pub fn config(&self) -> &DispatchConfig {
        self.workers.config()
    }

    fn submit_data(&self, rt: &Runtime, session: &Arc<Session>, delivery: Delivery) -> Result<()> {
        match self.workers.submit(data_job(rt, session, delivery)) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                self.stats.record_failure();
                let error = rejected.into_error();
                log::warn!("event for session {} rejected: {}", session.id(), error);
                if let Some(kind) = session.complete_delivery() {
                    self.dispatch_terminal(rt, session, kind);
                }
                Err(error)
            }
        }
    }

    /// Events that were already accepted never get lost: when the pool
    /// refuses them they run on the current thread
    fn submit_or_run(&self, job: Job) {
        if let Err(rejected) = self.workers.submit(job) {
            log::warn!("running event inline: {}", rejected.error());
            self.stats.record_inline();
            (rejected.into_job())();
        }
    }

    fn run_start(&self, rt: &Runtime, session: &Arc<Session>) {
        if let Some(handler) = session.handler() {
            let mut event = Event::lifecycle(session.id(), EventType::SessionStart);
            self.stats.record_lifecycle();
            self.invoke(handler.as_ref(), rt, &mut event);
        }

        let (ready, terminal) = session.activated();
        log::debug!(
            "session {} on '{}' started ({} queued events)",
            session.id(),
            session.interface(),
            ready.len()
        );

        for delivery in ready {
            self.submit_or_run(data_job(rt, session, delivery));
        }

        if let Some(kind) = terminal {
            self.dispatch_terminal(rt, session, kind);
        }
    }

    fn run_data(&self, rt: &Runtime, session: &Arc<Session>, delivery: Delivery) {
        let Delivery {
            mut event,
            completion,
        } = delivery;

        let completed = match session.handler() {
            Some(handler) => {
                log::trace!(
                    "delivering {} sqn {} to session {}",
                    event.kind,
                    event.sqn,
                    event.session_id
                );
                self.stats.record_delivery();
                self.invoke(handler.as_ref(), rt, &mut event)
            }
            None => false,
        };

        let outcome = if completed {
            Ok(event)
        } else {
            drop(event);
            Err(EnsError::dispatch_rejected(format!(
                "event function of session {} did not complete",
                session.id()
            )))
        };

        // Dropping an unclaimed outcome returns its buffer to the pool
        if let Some(completion) = completion {
            completion(outcome);
        }

        if let Some(kind) = session.complete_delivery() {
            self.dispatch_terminal(rt, session, kind);
        }
    }

    fn run_terminal(&self, rt: &Runtime, session: &Arc<Session>, kind: Termination) {
        if let Some(handler) = session.handler() {
            let mut event = Event::lifecycle(session.id(), kind.event_type());
            self.stats.record_lifecycle();
            self.invoke(handler.as_ref(), rt, &mut event);
        }

        session.finish(kind);
        rt.sessions().retire(session.id(), kind);
        log::debug!("session {} closed with {}", session.id(), kind.event_type());
    }

    /// Run an event function, containing panics. Returns false if it panicked.
    fn invoke(&self, handler: &dyn EventHandler, rt: &Runtime, event: &mut Event) -> bool {
        let session_id = event.session_id;
        let kind = event.kind;
        match panic::catch_unwind(AssertUnwindSafe(|| handler.on_event(rt, event))) {
            Ok(()) => true,
            Err(payload) => {
                self.stats.record_panic();
                log::error!(
                    "event function panicked on session {} ({}): {}",
                    session_id,
                    kind,
                    panic_message(payload.as_ref())
                );
                false
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers)
            .finish()
    }
}

fn data_job(rt: &Runtime, session: &Arc<Session>, delivery: Delivery) -> Job {
    let rt = rt.clone();
    let session = Arc::clone(session);
    Box::new(move || {
        rt.dispatcher().run_data(&rt, &session, delivery);
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
