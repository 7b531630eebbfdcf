//! The runtime handle workloads talk to

use std::{
    fmt,
    iter,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    buffers::{Buffer, BufferPool},
    dispatch::{BlockingGuard, Delivery, Dispatcher, Event, EventHandler, Sqn},
    error::{EnsError, Result},
    sessions::{
        AbortReason, InterfaceRegistry, Session, SessionId, SessionState, SessionTable,
        Termination, TerminationStep,
    },
    transactions::TransactionTracker,
};

use super::{config::RuntimeConfig, stats::RuntimeStats};

struct RuntimeInner {
    config: RuntimeConfig,
    pool: BufferPool,
    sessions: SessionTable,
    interfaces: InterfaceRegistry,
    transactions: Arc<TransactionTracker>,
    dispatcher: Dispatcher,
    shutdown: AtomicBool,
}

/// Session and event runtime.
///
/// Owns the buffer pool, the session table, the worker pool and the
/// transaction tracker. Cloning yields another handle to the same runtime;
/// event functions receive a reference to it.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let pool = BufferPool::new(config.pool.clone())?;
        let dispatcher = Dispatcher::new(config.dispatch.clone())?;

        log::info!(
            "runtime '{}' ready: {} buffers, {}..{} workers, request timeout {:?}",
            config.name,
            pool.capacity(),
            config.dispatch.min_threads,
            config.dispatch.max_threads,
            config.request_timeout
        );

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                pool,
                sessions: SessionTable::new(),
                interfaces: InterfaceRegistry::new(),
                transactions: Arc::new(TransactionTracker::new()),
                dispatcher,
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Create a runtime with the default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(RuntimeConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Publish `handler` under `<microservice>.<interface>`
    pub fn register_interface<H>(&self, name: &str, handler: H) -> Result<()>
    where
        H: EventHandler + 'static,
    {
        self.inner.interfaces.register(name, Arc::new(handler))
    }

    /// Publish an already shared handler
    pub fn register_interface_arc(&self, name: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        self.inner.interfaces.register(name, handler)
    }

    /// Withdraw an interface. Open sessions keep running.
    pub fn unregister_interface(&self, name: &str) -> bool {
        self.inner.interfaces.unregister(name)
    }

    /// Registered interface names, oldest first
    pub fn interfaces(&self) -> Vec<String> {
        self.inner.interfaces.names()
    }

    /// Start a session to `interface`.
    ///
    /// `handler` receives the events of the caller's endpoint; without one
    /// the first registered interface's handler is used. The target
    /// receives SESSION_START before any data. Returns the caller's session
    /// id.
    pub fn session_start(
        &self,
        interface: &str,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Result<SessionId> {
        self.ensure_running()?;

        let target = self.inner.interfaces.resolve(interface).map_err(|e| {
            self.inner.sessions.counters().record_start_failure();
            e
        })?;
        let caller = handler.or_else(|| self.inner.interfaces.default_handler());

        let (outgoing, incoming) = self.inner.sessions.create_pair(interface, caller, target)?;
        log::debug!(
            "session {} -> {} started on '{}'",
            outgoing.id(),
            incoming.id(),
            interface
        );

        self.inner.dispatcher.dispatch_start(self, &incoming);
        Ok(outgoing.id())
    }

    /// Start a session with a dedicated event function for the caller side
    pub fn session_start_with<H>(&self, interface: &str, handler: H) -> Result<SessionId>
    where
        H: EventHandler + 'static,
    {
        self.session_start(interface, Some(Arc::new(handler)))
    }

    /// End a session from either endpoint.
    ///
    /// Both endpoints receive SESSION_END once their in-flight events have
    /// returned, and pending requests on either side fail. Ending a session
    /// that is already ending is a no-op.
    pub fn session_end(&self, session_id: SessionId) -> Result<()> {
        self.terminate(session_id, Termination::End)
    }

    /// End a session, recording a reason code and text
    #[deprecated(note = "use `session_end`; the reason is only logged")]
    pub fn session_abort(&self, session_id: SessionId, reason: u32, info: Option<&str>) -> Result<()> {
        let session = self.inner.sessions.lookup(session_id)?;
        log::info!(
            "session {} aborted with reason {}: {}",
            session_id,
            reason,
            info.unwrap_or("")
        );

        let reason = AbortReason {
            code: reason,
            info: info.map(str::to_string),
        };
        if let Some(peer) = self.inner.sessions.get(session.peer_id()) {
            peer.set_abort_reason(reason.clone());
        }
        session.set_abort_reason(reason);
        self.inner.sessions.counters().record_abort();

        self.terminate(session_id, Termination::End)
    }

    /// Report a transport failure: both endpoints receive SESSION_DISCONNECT
    pub fn session_disconnect(&self, session_id: SessionId) -> Result<()> {
        self.terminate(session_id, Termination::Disconnect)
    }

    /// Send a request and block until the response arrives.
    ///
    /// Ownership of `data` moves to the runtime. Returns the buffer the
    /// responder left in the event, if any. Fails when the session ends
    /// first, the sqn is still pending, or `request_timeout` expires.
    pub fn request(&self, session_id: SessionId, sqn: Sqn, data: Buffer) -> Result<Option<Buffer>> {
        let tracker = &self.inner.transactions;
        let session = self.inner.sessions.lookup(session_id)?;
        session.check_open()?;
        let peer = self.peer_of(&session)?;

        let transaction = tracker.register(session_id, sqn)?;
        // A concurrent end either cancels the registration or is seen here
        if let Err(e) = session.check_open() {
            tracker.abandon(session_id, sqn, transaction.id());
            return Err(e);
        }

        let id = transaction.id();
        let responder = Arc::clone(tracker);
        let delivery = Delivery::with_completion(Event::request(peer.id(), sqn, data), move |outcome| {
            responder.complete(session_id, sqn, id, outcome.map(|mut event| event.take_data()));
        });

        if let Err(e) = self.inner.dispatcher.deliver(self, &peer, delivery) {
            tracker.abandon(session_id, sqn, id);
            tracker.counters().record_failure();
            return Err(e);
        }
        tracker.counters().record_request();

        let _blocking = self.enter_blocking();
        tracker.wait(&transaction, self.inner.config.request_timeout)
    }

    /// Mark the calling event function as blocked until the guard drops.
    ///
    /// Wrap waits on channels, locks or I/O in this so the worker pool
    /// starts another worker for other sessions' events. `request` does this
    /// on its own. Outside a worker thread the guard does nothing.
    pub fn enter_blocking(&self) -> BlockingGuard {
        self.inner.dispatcher.enter_blocking()
    }

    /// Send a notify. Reports only whether the send itself succeeded.
    pub fn notify(&self, session_id: SessionId, sqn: Sqn, data: Buffer) -> Result<()> {
        if sqn == 0 {
            return Err(EnsError::InvalidSequence { sqn });
        }

        let session = self.inner.sessions.lookup(session_id)?;
        session.check_open()?;
        let peer = self.peer_of(&session)?;

        self.inner
            .dispatcher
            .deliver(self, &peer, Delivery::new(Event::notify(peer.id(), sqn, data)))?;
        self.inner.transactions.counters().record_notify();
        Ok(())
    }

    /// Allocate a buffer of `length` bytes from the runtime pool
    pub fn alloc(&self, length: usize) -> Result<Buffer> {
        self.inner.pool.alloc(length)
    }

    /// Allocate a buffer holding a copy of `data`
    pub fn alloc_from(&self, data: &[u8]) -> Result<Buffer> {
        self.inner.pool.alloc_from(data)
    }

    /// Return a buffer to the pool
    pub fn free(&self, buffer: Buffer) {
        self.inner.pool.free(buffer);
    }

    pub fn pool(&self) -> &BufferPool {
        &self.inner.pool
    }

    /// Live endpoint, if the session has not closed
    pub fn session(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.inner.sessions.get(session_id)
    }

    pub fn session_state(&self, session_id: SessionId) -> Option<SessionState> {
        self.session(session_id).map(|session| session.state())
    }

    /// Sequence numbers of requests pending on `session_id`
    pub fn pending_requests(&self, session_id: SessionId) -> Vec<Sqn> {
        self.inner.transactions.pending_for(session_id)
    }

    /// Get current statistics
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            name: self.inner.config.name.clone(),
            pool: self.inner.pool.stats(),
            dispatch: self.inner.dispatcher.stats(),
            sessions: self.inner.sessions.stats(),
            transactions: self.inner.transactions.stats(),
        }
    }

    /// Wait until no event is queued or running
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.dispatcher.wait_idle(timeout)
    }

    /// End every session and stop accepting work. Queued events still run.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let ids = self.inner.sessions.ids();
        log::info!(
            "runtime '{}' shutting down, ending {} endpoints",
            self.inner.config.name,
            ids.len()
        );
        for id in ids {
            // The peer may already have taken this endpoint down
            if let Err(e) = self.terminate(id, Termination::End) {
                log::trace!("shutdown: {}", e);
            }
        }

        self.inner.dispatcher.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn sessions(&self) -> &SessionTable {
        &self.inner.sessions
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(EnsError::dispatch_rejected(format!(
                "runtime '{}' is shut down",
                self.inner.config.name
            )));
        }
        Ok(())
    }

    fn peer_of(&self, session: &Session) -> Result<Arc<Session>> {
        self.inner
            .sessions
            .get(session.peer_id())
            .ok_or_else(|| EnsError::session_terminated(session.id()))
    }

    fn terminate(&self, session_id: SessionId, kind: Termination) -> Result<()> {
        let session = self.inner.sessions.lookup(session_id)?;
        let peer = self.inner.sessions.get(session.peer_id());

        for endpoint in iter::once(session).chain(peer) {
            let step = endpoint.begin_termination(kind);
            log::debug!(
                "session {} {:?}: {:?}",
                endpoint.id(),
                kind,
                step
            );

            self.inner.transactions.cancel_session(endpoint.id());
            if let TerminationStep::Deliver(kind) = step {
                self.inner.dispatcher.dispatch_terminal(self, &endpoint, kind);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.inner.config.name)
            .field("sessions", &self.inner.sessions)
            .field("interfaces", &self.inner.interfaces)
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}
