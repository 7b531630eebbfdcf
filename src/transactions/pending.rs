//! A request waiting for its response

use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::{
    buffers::Buffer,
    dispatch::Sqn,
    error::Result,
    sessions::SessionId,
    sync::{CondvarExt, MutexExt},
};

/// What a request resolves to: the response buffer, if the responder left one
pub type Outcome = Result<Option<Buffer>>;

/// Response slot of one outstanding request
#[derive(Debug)]
pub struct PendingTransaction {
    id: u64,
    session_id: SessionId,
    sqn: Sqn,
    created_at: Instant,
    slot: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl PendingTransaction {
    pub(crate) fn new(id: u64, session_id: SessionId, sqn: Sqn) -> Self {
        Self {
            id,
            session_id,
            sqn,
            created_at: Instant::now(),
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Tracker-unique transaction id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn sqn(&self) -> Sqn {
        self.sqn
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Store the outcome and wake the requester. The first outcome wins.
    pub(crate) fn fulfil(&self, outcome: Outcome) {
        let mut slot = self.slot.lock_unpoisoned();
        if slot.is_none() {
            *slot = Some(outcome);
            self.ready.notify_all();
        }
    }

    /// Wait for the outcome. `None` means the timeout expired first.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<Outcome> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut slot = self.slot.lock_unpoisoned();

        loop {
            if let Some(outcome) = slot.take() {
                return Some(outcome);
            }

            match deadline {
                None => slot = self.ready.wait_unpoisoned(slot),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    slot = self.ready.wait_timeout_unpoisoned(slot, deadline - now).0;
                }
            }
        }
    }
}
