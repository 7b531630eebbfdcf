//! Request/response matching by (session, sqn)

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    dispatch::Sqn,
    error::{EnsError, Result},
    sessions::SessionId,
    sync::MutexExt,
};

use super::{
    pending::{Outcome, PendingTransaction},
    stats::{AtomicTransactionStats, TransactionStats},
};

type Key = (SessionId, Sqn);

/// Tracks every outstanding request of the runtime
pub struct TransactionTracker {
    pending: Mutex<HashMap<Key, Arc<PendingTransaction>>>,
    next_id: AtomicU64,
    stats: AtomicTransactionStats,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: AtomicTransactionStats::new(),
        }
    }

    /// Open a transaction for `sqn` on `session_id`.
    ///
    /// Fails with `InvalidSequence` for sqn 0 and with `SequenceInUse` while
    /// another request with the same sqn is pending on the session.
    pub fn register(&self, session_id: SessionId, sqn: Sqn) -> Result<Arc<PendingTransaction>> {
        if sqn == 0 {
            return Err(EnsError::InvalidSequence { sqn });
        }

        let mut pending = self.pending.lock_unpoisoned();
        if pending.contains_key(&(session_id, sqn)) {
            drop(pending);
            self.stats.record_conflict();
            return Err(EnsError::SequenceInUse { session_id, sqn });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let transaction = Arc::new(PendingTransaction::new(id, session_id, sqn));
        pending.insert((session_id, sqn), Arc::clone(&transaction));
        Ok(transaction)
    }

    /// Resolve transaction `id`. Returns false if it is no longer pending,
    /// in which case a response buffer is dropped back into the pool.
    pub fn complete(&self, session_id: SessionId, sqn: Sqn, id: u64, outcome: Outcome) -> bool {
        let Some(transaction) = self.take_if(session_id, sqn, id) else {
            if matches!(outcome, Ok(Some(_))) {
                self.stats.record_orphan();
                log::debug!(
                    "response for session {} sqn {} arrived after its requester gave up",
                    session_id,
                    sqn
                );
            }
            return false;
        };

        match outcome {
            Ok(_) => self.stats.record_match(),
            Err(_) => self.stats.record_failure(),
        }
        transaction.fulfil(outcome);
        true
    }

    /// Withdraw transaction `id`. False if it was already resolved.
    pub fn abandon(&self, session_id: SessionId, sqn: Sqn, id: u64) -> bool {
        self.take_if(session_id, sqn, id).is_some()
    }

    /// Block until `transaction` resolves or `timeout` expires
    pub fn wait(&self, transaction: &PendingTransaction, timeout: Option<Duration>) -> Outcome {
        if let Some(outcome) = transaction.wait(timeout) {
            return outcome;
        }

        let timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
        let expired = EnsError::RequestTimeout {
            session_id: transaction.session_id(),
            sqn: transaction.sqn(),
            timeout_ms,
        };

        if self.abandon(transaction.session_id(), transaction.sqn(), transaction.id()) {
            self.stats.record_timeout();
            log::debug!(
                "request on session {} sqn {} timed out after {} ms",
                transaction.session_id(),
                transaction.sqn(),
                timeout_ms
            );
            return Err(expired);
        }

        // Resolved between the timeout and the withdrawal; the outcome is on its way
        transaction.wait(None).unwrap_or(Err(expired))
    }

    /// Fail every request pending on `session_id`
    pub fn cancel_session(&self, session_id: SessionId) -> usize {
        let cancelled: Vec<Arc<PendingTransaction>> = {
            let mut pending = self.pending.lock_unpoisoned();
            let keys: Vec<Key> = pending
                .keys()
                .filter(|(session, _)| *session == session_id)
                .copied()
                .collect();
            keys.iter().filter_map(|key| pending.remove(key)).collect()
        };

        for transaction in &cancelled {
            self.stats.record_failure();
            transaction.fulfil(Err(EnsError::session_terminated(session_id)));
        }

        if !cancelled.is_empty() {
            log::debug!(
                "cancelled {} pending requests on session {}",
                cancelled.len(),
                session_id
            );
        }
        cancelled.len()
    }

    /// Sequence numbers pending on `session_id`
    pub fn pending_for(&self, session_id: SessionId) -> Vec<Sqn> {
        let mut sqns: Vec<Sqn> = self
            .pending
            .lock_unpoisoned()
            .keys()
            .filter(|(session, _)| *session == session_id)
            .map(|(_, sqn)| *sqn)
            .collect();
        sqns.sort_unstable();
        sqns
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock_unpoisoned().len()
    }

    pub(crate) fn counters(&self) -> &AtomicTransactionStats {
        &self.stats
    }

    /// Get current statistics
    pub fn stats(&self) -> TransactionStats {
        self.stats.snapshot(self.pending_count())
    }

    fn take_if(&self, session_id: SessionId, sqn: Sqn, id: u64) -> Option<Arc<PendingTransaction>> {
        let mut pending = self.pending.lock_unpoisoned();
        match pending.get(&(session_id, sqn)) {
            Some(transaction) if transaction.id() == id => pending.remove(&(session_id, sqn)),
            _ => None,
        }
    }
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionTracker")
            .field("pending", &self.pending_count())
            .finish()
    }
}
