//! Per-session lifecycle state

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{
    dispatch::{Delivery, EventHandler, EventType},
    error::{EnsError, Result},
    sync::MutexExt,
};

/// Runtime-local session identifier, never 0
pub type SessionId = u32;

/// Which side of the session this endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Created by `session_start` on the caller's side
    Outgoing,
    /// Created for the target interface
    Incoming,
}

/// Lifecycle state of a session endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// SESSION_START not yet handled
    Starting,
    /// Data events flow
    Active,
    /// Waiting for in-flight events before the terminal event
    Ending,
    /// Closed gracefully
    Ended,
    /// Closed by transport failure
    Disconnected,
}

impl SessionState {
    /// Whether data may still be sent on the session
    pub fn is_open(self) -> bool {
        matches!(self, Self::Starting | Self::Active)
    }

    /// Whether the terminal event has been delivered
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Ended | Self::Disconnected)
    }
}

/// How a session terminates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Termination {
    End,
    Disconnect,
}

impl Termination {
    /// Event delivered to the workload
    pub fn event_type(self) -> EventType {
        match self {
            Self::End => EventType::SessionEnd,
            Self::Disconnect => EventType::SessionDisconnect,
        }
    }

    /// State after the terminal event
    pub fn final_state(self) -> SessionState {
        match self {
            Self::End => SessionState::Ended,
            Self::Disconnect => SessionState::Disconnected,
        }
    }
}

/// Reason recorded by a deprecated session abort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReason {
    pub code: u32,
    pub info: Option<String>,
}

/// Outcome of offering a data event to a session
#[derive(Debug)]
pub enum Admission {
    /// Run it now
    Deliver(Delivery),
    /// Held until SESSION_START returns
    Queued,
}

/// Outcome of asking a session to terminate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStep {
    /// Nothing in flight, deliver the terminal event now
    Deliver(Termination),
    /// Terminal event follows the last in-flight event
    Deferred,
    /// A pending END was replaced by DISCONNECT
    Upgraded,
    /// Termination already under way
    AlreadyEnding,
    /// Terminal event already delivered
    AlreadyClosed,
}

struct SessionInner {
    state: SessionState,
    /// Events handed to a worker whose handler has not returned, START included
    in_flight: usize,
    /// Data events that arrived while starting
    backlog: VecDeque<Delivery>,
    termination: Option<Termination>,
    terminal_sent: bool,
    abort_reason: Option<AbortReason>,
}

impl SessionInner {
    fn take_terminal(&mut self) -> Option<Termination> {
        if self.state != SessionState::Ending || self.in_flight > 0 || self.terminal_sent {
            return None;
        }
        self.terminal_sent = true;
        self.termination
    }
}

/// One endpoint of a session
pub struct Session {
    id: SessionId,
    peer: SessionId,
    direction: Direction,
    interface: String,
    handler: Option<Arc<dyn EventHandler>>,
    created_at: Instant,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Caller side: active at once, no SESSION_START
    pub(crate) fn outgoing(
        id: SessionId,
        peer: SessionId,
        interface: impl Into<String>,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Self {
        Self::with_state(id, peer, Direction::Outgoing, interface.into(), handler, SessionState::Active, 0)
    }

    /// Target side: starting, with SESSION_START counted as in flight
    pub(crate) fn incoming(
        id: SessionId,
        peer: SessionId,
        interface: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self::with_state(
            id,
            peer,
            Direction::Incoming,
            interface.into(),
            Some(handler),
            SessionState::Starting,
            1,
        )
    }

    fn with_state(
        id: SessionId,
        peer: SessionId,
        direction: Direction,
        interface: String,
        handler: Option<Arc<dyn EventHandler>>,
        state: SessionState,
        in_flight: usize,
    ) -> Self {
        Self {
            id,
            peer,
            direction,
            interface,
            handler,
            created_at: Instant::now(),
            inner: Mutex::new(SessionInner {
                state,
                in_flight,
                backlog: VecDeque::new(),
                termination: None,
                terminal_sent: false,
                abort_reason: None,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The other endpoint of this session
    pub fn peer_id(&self) -> SessionId {
        self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Interface the session is bound to
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn handler(&self) -> Option<&Arc<dyn EventHandler>> {
        self.handler.as_ref()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock_unpoisoned().state
    }

    /// Events whose handler is still running
    pub fn in_flight(&self) -> usize {
        self.inner.lock_unpoisoned().in_flight
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.inner.lock_unpoisoned().abort_reason.clone()
    }

    /// Fails unless data may be sent from this endpoint
    pub fn check_open(&self) -> Result<()> {
        let inner = self.inner.lock_unpoisoned();
        if inner.state.is_open() {
            return Ok(());
        }
        Err(self.closed_error(&inner))
    }

    fn closed_error(&self, inner: &SessionInner) -> EnsError {
        if inner.termination == Some(Termination::Disconnect) {
            EnsError::Disconnected {
                session_id: self.id,
            }
        } else {
            EnsError::session_terminated(self.id)
        }
    }

    /// Offer a data event to this endpoint
    pub(crate) fn admit(&self, delivery: Delivery) -> Result<Admission> {
        let mut inner = self.inner.lock_unpoisoned();
        match inner.state {
            SessionState::Starting => {
                inner.backlog.push_back(delivery);
                Ok(Admission::Queued)
            }
            SessionState::Active => {
                inner.in_flight += 1;
                Ok(Admission::Deliver(delivery))
            }
            _ => {
                let error = self.closed_error(&inner);
                drop(inner);
                drop(delivery);
                Err(error)
            }
        }
    }

    /// SESSION_START returned. Yields the queued events, already counted
    /// as in flight, or the terminal event if the session ended meanwhile.
    pub(crate) fn activated(&self) -> (Vec<Delivery>, Option<Termination>) {
        let mut inner = self.inner.lock_unpoisoned();
        inner.in_flight = inner.in_flight.saturating_sub(1);

        match inner.state {
            SessionState::Starting => {
                inner.state = SessionState::Active;
                let ready: Vec<Delivery> = inner.backlog.drain(..).collect();
                inner.in_flight += ready.len();
                (ready, None)
            }
            _ => (Vec::new(), inner.take_terminal()),
        }
    }

    /// A data event's handler returned
    pub(crate) fn complete_delivery(&self) -> Option<Termination> {
        let mut inner = self.inner.lock_unpoisoned();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.take_terminal()
    }

    /// Move the session towards its terminal event
    pub(crate) fn begin_termination(&self, kind: Termination) -> TerminationStep {
        let mut inner = self.inner.lock_unpoisoned();

        let step = match inner.state {
            SessionState::Ended | SessionState::Disconnected => TerminationStep::AlreadyClosed,
            SessionState::Ending => {
                if kind == Termination::Disconnect
                    && inner.termination == Some(Termination::End)
                    && !inner.terminal_sent
                {
                    inner.termination = Some(Termination::Disconnect);
                    TerminationStep::Upgraded
                } else {
                    TerminationStep::AlreadyEnding
                }
            }
            SessionState::Starting | SessionState::Active => {
                inner.state = SessionState::Ending;
                inner.termination = Some(kind);
                match inner.take_terminal() {
                    Some(kind) => TerminationStep::Deliver(kind),
                    None => TerminationStep::Deferred,
                }
            }
        };

        let dropped: Vec<Delivery> = inner.backlog.drain(..).collect();
        drop(inner);

        if !dropped.is_empty() {
            log::debug!(
                "session {} closing before start completed, dropping {} queued events",
                self.id,
                dropped.len()
            );
        }
        for delivery in dropped {
            delivery.fail(EnsError::session_terminated(self.id));
        }

        step
    }

    /// Terminal event delivered
    pub(crate) fn finish(&self, kind: Termination) {
        self.inner.lock_unpoisoned().state = kind.final_state();
    }

    pub(crate) fn set_abort_reason(&self, reason: AbortReason) {
        self.inner.lock_unpoisoned().abort_reason = Some(reason);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock_unpoisoned();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("direction", &self.direction)
            .field("interface", &self.interface)
            .field("has_handler", &self.handler.is_some())
            .field("state", &inner.state)
            .field("in_flight", &inner.in_flight)
            .field("backlog", &inner.backlog.len())
            .finish()
    }
}
