//! Session table mapping identifiers to live endpoints

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    dispatch::EventHandler,
    error::{EnsError, Result},
    sync::RwLockExt,
};

use super::{
    session::{Session, SessionId, Termination},
    stats::{AtomicSessionStats, SessionStats},
};

struct TableInner {
    sessions: HashMap<SessionId, Arc<Session>>,
    next_id: SessionId,
}

impl TableInner {
    /// Next id that is neither 0 nor still in the table
    fn allocate_id(&mut self) -> Result<SessionId> {
        if self.sessions.len() >= SessionId::MAX as usize {
            return Err(EnsError::invalid_parameter(
                "session_id",
                "Session id space exhausted",
            ));
        }

        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id != 0 && !self.sessions.contains_key(&id) {
                return Ok(id);
            }
        }
    }
}

/// Table of every session endpoint in the runtime
pub struct SessionTable {
    inner: RwLock<TableInner>,
    stats: AtomicSessionStats,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Table whose first allocated id is `first_id` (0 is skipped)
    pub fn starting_at(first_id: SessionId) -> Self {
        Self {
            inner: RwLock::new(TableInner {
                sessions: HashMap::new(),
                next_id: first_id,
            }),
            stats: AtomicSessionStats::new(),
        }
    }

    /// Create the linked outgoing and incoming endpoints of a new session
    pub(crate) fn create_pair(
        &self,
        interface: &str,
        caller: Option<Arc<dyn EventHandler>>,
        target: Arc<dyn EventHandler>,
    ) -> Result<(Arc<Session>, Arc<Session>)> {
        let mut inner = self.inner.write_unpoisoned();
        let outgoing_id = inner.allocate_id()?;
        // Reserve the first id before allocating the second
        inner.sessions.insert(
            outgoing_id,
            Arc::new(Session::outgoing(outgoing_id, 0, interface, None)),
        );
        let incoming_id = match inner.allocate_id() {
            Ok(id) => id,
            Err(e) => {
                inner.sessions.remove(&outgoing_id);
                return Err(e);
            }
        };

        let outgoing = Arc::new(Session::outgoing(outgoing_id, incoming_id, interface, caller));
        let incoming = Arc::new(Session::incoming(incoming_id, outgoing_id, interface, target));
        inner.sessions.insert(outgoing_id, Arc::clone(&outgoing));
        inner.sessions.insert(incoming_id, Arc::clone(&incoming));
        drop(inner);

        self.stats.record_start();
        Ok((outgoing, incoming))
    }

    /// Look up a live endpoint
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.read_unpoisoned().sessions.get(&id).cloned()
    }

    /// Look up a live endpoint, failing with `SessionNotFound`
    pub fn lookup(&self, id: SessionId) -> Result<Arc<Session>> {
        self.get(id).ok_or_else(|| EnsError::session_not_found(id))
    }

    /// Remove an endpoint after its terminal event
    pub(crate) fn retire(&self, id: SessionId, kind: Termination) -> Option<Arc<Session>> {
        let removed = self.inner.write_unpoisoned().sessions.remove(&id);
        if removed.is_some() {
            match kind {
                Termination::End => self.stats.record_end(),
                Termination::Disconnect => self.stats.record_disconnect(),
            }
        }
        removed
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.read_unpoisoned().sessions.contains_key(&id)
    }

    /// Ids of all live endpoints
    pub fn ids(&self) -> Vec<SessionId> {
        self.inner.read_unpoisoned().sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read_unpoisoned().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn counters(&self) -> &AtomicSessionStats {
        &self.stats
    }

    /// Get current statistics
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot(self.len())
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTable")
            .field("endpoints", &self.len())
            .finish()
    }
}
