//! Transaction coordination: commit, rollback, and release of the shard
//! state a session accumulated through scatter calls.
//!
//! Commit strategy is decided here, not at execute time: one participant
//! commits directly; several participants commit per the effective
//! transaction mode — `Single` rejects, `Multi` commits each shard
//! independently with best-effort semantics (a failure on one shard does
//! not roll back the others), `TwoPc` runs prepare on every participant
//! and only commits once all prepared, rolling everything back otherwise.

use std::sync::atomic::{AtomicU64, Ordering};

use kestrel_common::{CallContext, KestrelError, KestrelResult, TransactionMode};

use crate::error_agg::{aggregate, ShardError};
use crate::session::{SafeSession, ShardSession};

/// Coordinates transaction endings across the shards a session touched.
pub struct TxConn {
    /// Coordinator default and ceiling: sessions may request a stricter
    /// mode, never a laxer one.
    mode: TransactionMode,
    attempted: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl TxConn {
    pub fn new(mode: TransactionMode) -> Self {
        let mode = match mode {
            TransactionMode::Unspecified => TransactionMode::Multi,
            m => m,
        };
        Self {
            mode,
            attempted: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn total_attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }
    pub fn total_committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }
    pub fn total_rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }

    /// Resolve the mode governing this session: a session override wins
    /// over the coordinator default but cannot relax past the ceiling.
    fn effective_mode(&self, session_mode: TransactionMode) -> KestrelResult<TransactionMode> {
        let requested = match session_mode {
            TransactionMode::Unspecified => self.mode,
            m => m,
        };
        if requested.strictness() > self.mode.strictness() {
            return Err(KestrelError::ModeCeilingExceeded {
                requested: requested.to_string(),
                ceiling: self.mode.to_string(),
            });
        }
        Ok(requested)
    }

    /// Commit the session's open transaction across all participants.
    ///
    /// No-op when the session is not in a transaction. Policy errors
    /// (`Single` with several participants, mode above the ceiling) leave
    /// the session untouched so the caller can still roll back; actual
    /// commit attempts always end the transaction state.
    pub fn commit(&self, ctx: &CallContext, session: &SafeSession) -> KestrelResult<()> {
        let (in_transaction, session_mode, participants) = session.with(|s| {
            let participants: Vec<ShardSession> = s
                .shard_sessions()
                .iter()
                .filter(|ss| !ss.transaction_id.is_none())
                .cloned()
                .collect();
            (s.in_transaction, s.transaction_mode, participants)
        });
        if !in_transaction {
            return Ok(());
        }
        self.attempted.fetch_add(1, Ordering::Relaxed);

        let result = if participants.len() <= 1 {
            self.commit_normal(ctx, &participants)
        } else {
            match self.effective_mode(session_mode)? {
                TransactionMode::Single => {
                    let targets = participants
                        .iter()
                        .map(|p| p.target.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(KestrelError::MultiDbTransaction(targets));
                }
                TransactionMode::Multi => self.commit_normal(ctx, &participants),
                TransactionMode::TwoPc => self.commit_two_phase(ctx, &participants),
                TransactionMode::Unspecified => {
                    return Err(KestrelError::internal(
                        "E-TXCONN-001",
                        "effective transaction mode resolved to UNSPECIFIED",
                    ))
                }
            }
        };

        session.with(|s| s.clear_transaction());
        match result {
            Ok(()) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                kestrel_observability::record_txn_metrics("commit", true);
                Ok(())
            }
            Err(e) => {
                kestrel_observability::record_txn_metrics("commit", false);
                Err(e)
            }
        }
    }

    /// Commit each participant independently, best-effort: a failure does
    /// not roll back the shards that already committed — a deliberate
    /// availability-over-atomicity tradeoff the caller must understand.
    fn commit_normal(&self, ctx: &CallContext, participants: &[ShardSession]) -> KestrelResult<()> {
        let mut errors: Vec<ShardError> = Vec::new();
        for (i, p) in participants.iter().enumerate() {
            if let Err(e) = p.gateway.commit(ctx, &p.target, p.transaction_id) {
                tracing::warn!("commit failed on shard {}: {}", p.target, e);
                errors.push(ShardError {
                    index: i,
                    target: p.target.clone(),
                    endpoint: p.endpoint.clone(),
                    error: e,
                });
            }
        }
        match aggregate(&errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Two-phase commit: every participant prepares, and only if all
    /// prepared are they committed, else all are rolled back. The prepare
    /// failure is reported as a single aggregate error.
    fn commit_two_phase(
        &self,
        ctx: &CallContext,
        participants: &[ShardSession],
    ) -> KestrelResult<()> {
        let mut prepare_errors: Vec<ShardError> = Vec::new();
        for (i, p) in participants.iter().enumerate() {
            if let Err(e) = p.gateway.prepare(ctx, &p.target, p.transaction_id) {
                tracing::warn!("2pc prepare failed on shard {}: {}", p.target, e);
                prepare_errors.push(ShardError {
                    index: i,
                    target: p.target.clone(),
                    endpoint: p.endpoint.clone(),
                    error: e,
                });
                break;
            }
        }

        if let Some(agg) = aggregate(&prepare_errors) {
            for p in participants {
                if let Err(e) = p.gateway.rollback(ctx, &p.target, p.transaction_id) {
                    tracing::warn!("2pc abort: rollback failed on shard {}: {}", p.target, e);
                }
            }
            self.rolled_back.fetch_add(1, Ordering::Relaxed);
            kestrel_observability::record_txn_metrics("prepare", false);
            return Err(KestrelError::PrepareFailed(agg.to_string()));
        }
        kestrel_observability::record_txn_metrics("prepare", true);

        // All prepared — commit everywhere. A failure past this point
        // cannot undo the commits that already landed; it is logged and
        // surfaced, and an external resolver reconciles the shard.
        let mut commit_errors: Vec<ShardError> = Vec::new();
        for (i, p) in participants.iter().enumerate() {
            if let Err(e) = p.gateway.commit(ctx, &p.target, p.transaction_id) {
                tracing::error!("2pc commit failed on shard {} after prepare: {}", p.target, e);
                commit_errors.push(ShardError {
                    index: i,
                    target: p.target.clone(),
                    endpoint: p.endpoint.clone(),
                    error: e,
                });
            }
        }
        match aggregate(&commit_errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Roll back the session's open transaction on every participant,
    /// best-effort. Reservations survive; transaction state clears even
    /// when a shard's rollback fails, so the session is never wedged.
    pub fn rollback(&self, ctx: &CallContext, session: &SafeSession) -> KestrelResult<()> {
        let participants: Vec<ShardSession> = session.with(|s| {
            s.shard_sessions()
                .iter()
                .filter(|ss| !ss.transaction_id.is_none())
                .cloned()
                .collect()
        });
        if participants.is_empty() {
            session.with(|s| s.clear_transaction());
            return Ok(());
        }

        let mut errors: Vec<ShardError> = Vec::new();
        for (i, p) in participants.iter().enumerate() {
            if let Err(e) = p.gateway.rollback(ctx, &p.target, p.transaction_id) {
                tracing::warn!("rollback failed on shard {}: {}", p.target, e);
                errors.push(ShardError {
                    index: i,
                    target: p.target.clone(),
                    endpoint: p.endpoint.clone(),
                    error: e,
                });
            }
        }
        session.with(|s| s.clear_transaction());
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
        kestrel_observability::record_txn_metrics("rollback", errors.is_empty());
        match aggregate(&errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// End every reservation (and any transaction still open on it) and
    /// drop all shard state from the session.
    pub fn release(&self, ctx: &CallContext, session: &SafeSession) -> KestrelResult<()> {
        let shard_sessions: Vec<ShardSession> =
            session.with(|s| s.shard_sessions().to_vec());

        let mut errors: Vec<ShardError> = Vec::new();
        for (i, ss) in shard_sessions.iter().enumerate() {
            if !ss.transaction_id.is_none() {
                if let Err(e) = ss.gateway.rollback(ctx, &ss.target, ss.transaction_id) {
                    tracing::warn!("release: rollback failed on shard {}: {}", ss.target, e);
                    errors.push(ShardError {
                        index: i,
                        target: ss.target.clone(),
                        endpoint: ss.endpoint.clone(),
                        error: e,
                    });
                }
            }
            if !ss.reserved_id.is_none() {
                if let Err(e) = ss.gateway.release(ctx, &ss.target, ss.reserved_id) {
                    tracing::warn!("release failed on shard {}: {}", ss.target, e);
                    errors.push(ShardError {
                        index: i,
                        target: ss.target.clone(),
                        endpoint: ss.endpoint.clone(),
                        error: e,
                    });
                }
            }
        }
        session.with(|s| s.clear_all());
        kestrel_observability::record_txn_metrics("release", errors.is_empty());
        match aggregate(&errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspecified_coordinator_mode_normalizes_to_multi() {
        let tc = TxConn::new(TransactionMode::Unspecified);
        assert_eq!(tc.mode(), TransactionMode::Multi);
    }

    #[test]
    fn test_session_single_override_wins() {
        let tc = TxConn::new(TransactionMode::TwoPc);
        assert_eq!(
            tc.effective_mode(TransactionMode::Single).unwrap(),
            TransactionMode::Single
        );
    }

    #[test]
    fn test_unspecified_session_uses_coordinator_default() {
        let tc = TxConn::new(TransactionMode::TwoPc);
        assert_eq!(
            tc.effective_mode(TransactionMode::Unspecified).unwrap(),
            TransactionMode::TwoPc
        );
    }

    #[test]
    fn test_mode_cannot_relax_past_ceiling() {
        let tc = TxConn::new(TransactionMode::Single);
        let err = tc.effective_mode(TransactionMode::Multi).unwrap_err();
        assert!(matches!(err, KestrelError::ModeCeilingExceeded { .. }));
        assert!(err.to_string().contains("MULTI"));
        assert!(err.to_string().contains("SINGLE"));
    }
}
