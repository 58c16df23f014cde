//! Per-session shard transaction and reserved-connection state.
//!
//! A `Session` lives as long as its logical client connection. Every
//! shard touched under a transaction or reservation gets one
//! `ShardSession` entry, ordered by first use; the entry is cleared on
//! commit, rollback, or explicit release.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use kestrel_common::{
    KestrelError, KestrelResult, ReservedId, Target, TransactionId, TransactionMode,
};
use kestrel_gateway::ShardGateway;

/// Per-(session, target) state, derived from the two ids.
///
/// Transitions: `None → Begun | Reserved | ReservedBegun`,
/// `Begun → ReservedBegun`, `Reserved → ReservedBegun`; commit, rollback,
/// or release transition back to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    None,
    Begun,
    Reserved,
    ReservedBegun,
}

/// One shard's accumulated state under a session: its transaction id,
/// reservation id, and the gateway that was used to establish them.
#[derive(Clone)]
pub struct ShardSession {
    pub target: Target,
    /// Shard-side transaction id; zero means none.
    pub transaction_id: TransactionId,
    /// Shard-side reserved-connection id; zero means none.
    pub reserved_id: ReservedId,
    /// Endpoint identity last used for this shard.
    pub endpoint: String,
    /// Gateway handle for commit/rollback/release of the accumulated ids.
    pub gateway: Arc<dyn ShardGateway>,
}

impl ShardSession {
    pub fn state(&self) -> ShardState {
        match (self.transaction_id.is_none(), self.reserved_id.is_none()) {
            (true, true) => ShardState::None,
            (false, true) => ShardState::Begun,
            (true, false) => ShardState::Reserved,
            (false, false) => ShardState::ReservedBegun,
        }
    }
}

impl fmt::Debug for ShardSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardSession")
            .field("target", &self.target)
            .field("transaction_id", &self.transaction_id)
            .field("reserved_id", &self.reserved_id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Caller-owned session state, exclusively owned by its client context.
///
/// Invariant: the session-level flags are the union across shard
/// sessions — a non-zero transaction id requires `in_transaction`, a
/// non-zero reservation id requires `in_reserved_conn`. Violations are
/// programming errors, not user-facing failures.
#[derive(Default)]
pub struct Session {
    pub in_transaction: bool,
    pub in_reserved_conn: bool,
    pub transaction_mode: TransactionMode,
    shard_sessions: Vec<ShardSession>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shard sessions in first-use order.
    pub fn shard_sessions(&self) -> &[ShardSession] {
        &self.shard_sessions
    }

    pub fn find(&self, target: &Target) -> Option<&ShardSession> {
        self.shard_sessions.iter().find(|ss| ss.target == *target)
    }

    /// Record state established on a shard: update the existing entry for
    /// the target, or append a new one at the end (first-use order).
    pub fn append_or_update(&mut self, shard_session: ShardSession) -> KestrelResult<()> {
        if !shard_session.transaction_id.is_none() && !self.in_transaction {
            return Err(KestrelError::internal(
                "E-SESSION-001",
                format!(
                    "shard session for {} carries {} but session is not in a transaction",
                    shard_session.target, shard_session.transaction_id
                ),
            ));
        }
        if !shard_session.reserved_id.is_none() && !self.in_reserved_conn {
            return Err(KestrelError::internal(
                "E-SESSION-002",
                format!(
                    "shard session for {} carries {} but session holds no reserved connections",
                    shard_session.target, shard_session.reserved_id
                ),
            ));
        }
        match self
            .shard_sessions
            .iter_mut()
            .find(|ss| ss.target == shard_session.target)
        {
            Some(existing) => *existing = shard_session,
            None => self.shard_sessions.push(shard_session),
        }
        Ok(())
    }

    /// End the transaction: zero every transaction id, drop entries that
    /// hold no reservation, and clear the transaction flag. Reserved
    /// entries survive a commit or rollback.
    pub fn clear_transaction(&mut self) {
        for ss in &mut self.shard_sessions {
            ss.transaction_id = TransactionId::NONE;
        }
        self.shard_sessions.retain(|ss| !ss.reserved_id.is_none());
        self.in_transaction = false;
    }

    /// Drop all shard state and both flags (explicit release path).
    pub fn clear_all(&mut self) {
        self.shard_sessions.clear();
        self.in_transaction = false;
        self.in_reserved_conn = false;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("in_transaction", &self.in_transaction)
            .field("in_reserved_conn", &self.in_reserved_conn)
            .field("transaction_mode", &self.transaction_mode)
            .field("shard_sessions", &self.shard_sessions)
            .finish()
    }
}

/// Mutex-guarded session handle shared between the executor and the
/// transaction coordinator.
///
/// The caller serializes its own scatter calls; the lock exists so the
/// executor's snapshot and consolidation steps are atomic with respect to
/// commit/rollback, and is never held across gateway I/O.
#[derive(Clone)]
pub struct SafeSession {
    inner: Arc<Mutex<Session>>,
}

impl SafeSession {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.lock().in_transaction
    }

    pub fn shard_session_count(&self) -> usize {
        self.inner.lock().shard_sessions().len()
    }
}

impl Default for SafeSession {
    fn default() -> Self {
        Self::new(Session::new())
    }
}
