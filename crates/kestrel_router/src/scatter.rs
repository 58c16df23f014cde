//! Scatter phase: dispatch one logical statement to N shard gateways in
//! parallel and gather the per-shard outcomes deterministically.
//!
//! Dispatch spawns one unit of work per **distinct** target using
//! `std::thread::scope`; outcomes land in a pre-sized slot vector joined
//! in input order, so reported results and errors follow the caller's
//! target order regardless of completion order. The session is only read
//! in the pre-dispatch snapshot and only written in the post-join
//! consolidation step — never from a per-target worker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use kestrel_common::{
    CallContext, KestrelError, KestrelResult, QueryResult, ReservedId, RouterConfig, Target,
    TransactionId, TransactionMode, Value,
};
use kestrel_gateway::{BoundQuery, ResolvedShard, StreamSink};

use crate::accumulate::ResultAccumulator;
use crate::error_agg::{aggregate, ShardError};
use crate::session::{SafeSession, ShardSession};
use crate::tx_conn::TxConn;

/// Lifetime counters for one `ScatterConn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScatterStats {
    pub scatter_calls: u64,
    pub shard_calls: u64,
    pub shard_errors: u64,
}

/// The scatter-gather executor.
///
/// Safe to share across concurrent calls on independent sessions; a
/// single session's calls are serialized by its owning client context.
pub struct ScatterConn {
    max_memory_rows: usize,
    tx_conn: Arc<TxConn>,
    scatter_calls: AtomicU64,
    shard_calls: AtomicU64,
    shard_errors: AtomicU64,
}

/// One dispatchable unit: a distinct target, its query, and the session
/// transitions it must perform first.
struct WorkUnit<'a> {
    /// Position in the caller's dispatch list (first occurrence).
    index: usize,
    rs: &'a ResolvedShard,
    sql: &'a str,
    bind_vars: &'a HashMap<String, Value>,
    need_begin: bool,
    need_reserve: bool,
    transaction_id: TransactionId,
    reserved_id: ReservedId,
}

/// What came back from one unit: a result or an error, plus whatever
/// shard state was actually established (kept even on failure — the
/// session retains it for the explicit commit/rollback step).
struct UnitOutcome {
    index: usize,
    target: Target,
    endpoint: String,
    result: Option<QueryResult>,
    error: Option<KestrelError>,
    transaction_id: TransactionId,
    reserved_id: ReservedId,
}

impl ScatterConn {
    pub fn new(config: RouterConfig) -> Self {
        let tx_conn = Arc::new(TxConn::new(config.transaction_mode));
        Self::with_tx_conn(config, tx_conn)
    }

    /// Build with a shared transaction coordinator (one coordinator can
    /// serve several executors).
    pub fn with_tx_conn(config: RouterConfig, tx_conn: Arc<TxConn>) -> Self {
        Self {
            max_memory_rows: config.max_memory_rows,
            tx_conn,
            scatter_calls: AtomicU64::new(0),
            shard_calls: AtomicU64::new(0),
            shard_errors: AtomicU64::new(0),
        }
    }

    pub fn tx_conn(&self) -> &Arc<TxConn> {
        &self.tx_conn
    }

    pub fn stats(&self) -> ScatterStats {
        ScatterStats {
            scatter_calls: self.scatter_calls.load(Ordering::Relaxed),
            shard_calls: self.shard_calls.load(Ordering::Relaxed),
            shard_errors: self.shard_errors.load(Ordering::Relaxed),
        }
    }

    /// Execute one bound query per target across all targets concurrently.
    ///
    /// `queries[i]` is sent to `rss[i]`; duplicate targets are
    /// deduplicated so at most one gateway call reaches each distinct
    /// target. `autocommit` asserts that no target is already in a
    /// transaction; a target violating that is rejected with an
    /// argument-class error without being dispatched, while the remaining
    /// targets still execute.
    ///
    /// Returns the merged result plus the per-target errors in dispatch
    /// order. Use [`aggregate`] to fold the errors into one.
    pub fn execute_multi_shard(
        &self,
        ctx: &CallContext,
        rss: &[ResolvedShard],
        queries: &[BoundQuery],
        session: &SafeSession,
        autocommit: bool,
    ) -> (QueryResult, Vec<ShardError>) {
        let start = Instant::now();
        self.scatter_calls.fetch_add(1, Ordering::Relaxed);

        if rss.is_empty() {
            return (QueryResult::new(), Vec::new());
        }
        if rss.len() != queries.len() {
            let err = ShardError {
                index: 0,
                target: rss[0].target.clone(),
                endpoint: rss[0].gateway.endpoint(),
                error: KestrelError::InvalidArgument(format!(
                    "got {} queries for {} targets",
                    queries.len(),
                    rss.len()
                )),
            };
            return (QueryResult::new(), vec![err]);
        }

        // ── Pre-dispatch snapshot: plan per-target transitions under the
        // session lock, rejecting argument-class violations before any
        // gateway is touched. Duplicate targets are dropped here.
        let mut units: Vec<WorkUnit<'_>> = Vec::with_capacity(rss.len());
        let mut errors: Vec<ShardError> = Vec::new();
        session.with(|s| {
            let coordinator_single = self.tx_conn.mode() == TransactionMode::Single;
            let effective_single =
                coordinator_single || s.transaction_mode == TransactionMode::Single;
            let mut pinned: Option<Target> = s.shard_sessions().first().map(|ss| ss.target.clone());
            let mut seen: HashSet<&Target> = HashSet::with_capacity(rss.len());

            for (i, (rs, query)) in rss.iter().zip(queries.iter()).enumerate() {
                if !seen.insert(&rs.target) {
                    // later duplicates are dropped for dispatch purposes
                    continue;
                }
                let (transaction_id, reserved_id) = s
                    .find(&rs.target)
                    .map(|ss| (ss.transaction_id, ss.reserved_id))
                    .unwrap_or((TransactionId::NONE, ReservedId::NONE));

                if autocommit && !transaction_id.is_none() {
                    errors.push(ShardError {
                        index: i,
                        target: rs.target.clone(),
                        endpoint: rs.gateway.endpoint(),
                        error: KestrelError::InvalidArgument(
                            "in autocommit mode, transactionID is non-zero".into(),
                        ),
                    });
                    continue;
                }

                if s.in_transaction && effective_single {
                    match &pinned {
                        Some(p) if *p != rs.target => {
                            errors.push(ShardError {
                                index: i,
                                target: rs.target.clone(),
                                endpoint: rs.gateway.endpoint(),
                                error: KestrelError::MultiDbTransaction(format!(
                                    "from {} to {}",
                                    p, rs.target
                                )),
                            });
                            continue;
                        }
                        Some(_) => {}
                        None => pinned = Some(rs.target.clone()),
                    }
                }

                units.push(WorkUnit {
                    index: i,
                    rs,
                    sql: &query.sql,
                    bind_vars: &query.bind_vars,
                    // an autocommit call never opens a shard transaction
                    need_begin: s.in_transaction && !autocommit && transaction_id.is_none(),
                    need_reserve: s.in_reserved_conn && reserved_id.is_none(),
                    transaction_id,
                    reserved_id,
                });
            }
        });

        // ── Scatter: one unit per distinct target, in parallel. Slots are
        // pre-sized and joined in unit order, so output ordering is the
        // caller's target order, never completion order.
        let outcomes: Vec<UnitOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = units
                .iter()
                .map(|unit| {
                    let ctx = ctx.clone();
                    scope.spawn(move || self.execute_unit(&ctx, unit))
                })
                .collect();
            handles
                .into_iter()
                .zip(units.iter())
                .map(|(handle, unit)| {
                    handle.join().unwrap_or_else(|_| UnitOutcome {
                        index: unit.index,
                        target: unit.rs.target.clone(),
                        endpoint: unit.rs.gateway.endpoint(),
                        result: None,
                        error: Some(KestrelError::internal(
                            "E-SCATTER-001",
                            format!("shard worker panicked for target {}", unit.rs.target),
                        )),
                        transaction_id: unit.transaction_id,
                        reserved_id: unit.reserved_id,
                    })
                })
                .collect()
        });

        // ── Consolidate: fold established shard state back into the
        // session (single-threaded, post-join), then merge results under
        // the row ceiling and collect errors in dispatch order.
        session.with(|s| {
            for outcome in &outcomes {
                if outcome.transaction_id.is_none() && outcome.reserved_id.is_none() {
                    continue;
                }
                let appended = s.append_or_update(ShardSession {
                    target: outcome.target.clone(),
                    transaction_id: outcome.transaction_id,
                    reserved_id: outcome.reserved_id,
                    endpoint: outcome.endpoint.clone(),
                    gateway: rss[outcome.index].gateway.clone(),
                });
                if let Err(e) = appended {
                    e.log_if_internal();
                    errors.push(ShardError {
                        index: outcome.index,
                        target: outcome.target.clone(),
                        endpoint: outcome.endpoint.clone(),
                        error: e,
                    });
                }
            }
        });

        let mut acc = ResultAccumulator::new(self.max_memory_rows);
        let mut ceiling_tripped = false;
        for outcome in &outcomes {
            if let Some(err) = &outcome.error {
                errors.push(ShardError {
                    index: outcome.index,
                    target: outcome.target.clone(),
                    endpoint: outcome.endpoint.clone(),
                    error: err.clone(),
                });
            } else if let Some(partial) = &outcome.result {
                if !ceiling_tripped {
                    if let Err(e) = acc.append(partial) {
                        ceiling_tripped = true;
                        errors.push(ShardError {
                            index: outcome.index,
                            target: outcome.target.clone(),
                            endpoint: outcome.endpoint.clone(),
                            error: e,
                        });
                    }
                }
            }
        }
        errors.sort_by_key(|e| e.index);

        self.shard_errors
            .fetch_add(errors.len() as u64, Ordering::Relaxed);
        kestrel_observability::record_rows_gathered(acc.row_count());
        kestrel_observability::record_scatter_metrics(
            "execute_multi_shard",
            start.elapsed().as_micros() as u64,
            rss.len(),
            errors.is_empty(),
        );
        (acc.into_result(), errors)
    }

    /// Run one unit: session transitions first (reserve, then begin, each
    /// only when newly required), then the query itself. Exactly one
    /// gateway execute attempt, no internal retry. Whatever ids were
    /// established are reported back even when a later step fails.
    fn execute_unit(&self, ctx: &CallContext, unit: &WorkUnit<'_>) -> UnitOutcome {
        self.shard_calls.fetch_add(1, Ordering::Relaxed);
        let gateway = &unit.rs.gateway;
        let target = &unit.rs.target;
        let mut transaction_id = unit.transaction_id;
        let mut reserved_id = unit.reserved_id;

        let result = (|| -> KestrelResult<QueryResult> {
            ctx.check()?;
            if unit.need_reserve {
                reserved_id = gateway.reserve(ctx, target)?;
            }
            if unit.need_begin {
                transaction_id = gateway.begin(ctx, target)?;
            }
            gateway.execute(
                ctx,
                target,
                unit.sql,
                unit.bind_vars,
                transaction_id,
                reserved_id,
            )
        })();

        let (result, error) = match result {
            Ok(r) => {
                kestrel_observability::record_shard_call("execute", true);
                (Some(r), None)
            }
            Err(e) => {
                tracing::warn!("shard {} failed during scatter: {}", target, e);
                kestrel_observability::record_shard_call("execute", false);
                (None, Some(e))
            }
        };
        UnitOutcome {
            index: unit.index,
            target: target.clone(),
            endpoint: gateway.endpoint(),
            result,
            error,
            transaction_id,
            reserved_id,
        }
    }

    /// Stream one query across all targets, delivering chunks to `sink`
    /// as they arrive. Chunks from a single target keep their arrival
    /// order; there is no ordering across targets. A sink error aborts
    /// the stream and is surfaced verbatim.
    pub fn stream_execute(
        &self,
        ctx: &CallContext,
        sql: &str,
        bind_vars: &HashMap<String, Value>,
        rss: &[ResolvedShard],
        sink: &mut StreamSink<'_>,
    ) -> KestrelResult<()> {
        let per_shard: Vec<&HashMap<String, Value>> = rss.iter().map(|_| bind_vars).collect();
        self.stream_on_targets(ctx, "stream_execute", sql, rss, &per_shard, sink)
    }

    /// Stream one query with per-target bind variables: `bind_vars[i]`
    /// pairs with `rss[i]`.
    pub fn stream_execute_multi(
        &self,
        ctx: &CallContext,
        sql: &str,
        rss: &[ResolvedShard],
        bind_vars: &[HashMap<String, Value>],
        sink: &mut StreamSink<'_>,
    ) -> KestrelResult<()> {
        if rss.len() != bind_vars.len() {
            return Err(KestrelError::InvalidArgument(format!(
                "got {} bind variable maps for {} targets",
                bind_vars.len(),
                rss.len()
            )));
        }
        let per_shard: Vec<&HashMap<String, Value>> = bind_vars.iter().collect();
        self.stream_on_targets(ctx, "stream_execute_multi", sql, rss, &per_shard, sink)
    }

    fn stream_on_targets(
        &self,
        ctx: &CallContext,
        op: &str,
        sql: &str,
        rss: &[ResolvedShard],
        bind_vars: &[&HashMap<String, Value>],
        sink: &mut StreamSink<'_>,
    ) -> KestrelResult<()> {
        let start = Instant::now();
        self.scatter_calls.fetch_add(1, Ordering::Relaxed);

        // Child scope: a sink failure cancels the sibling units without
        // cancelling the caller's outer context.
        let ctx = ctx.child();
        let shared_sink = Mutex::new(sink);
        let sink_error: Mutex<Option<KestrelError>> = Mutex::new(None);

        let mut seen: HashSet<&Target> = HashSet::with_capacity(rss.len());
        let units: Vec<(usize, &ResolvedShard, &HashMap<String, Value>)> = rss
            .iter()
            .zip(bind_vars.iter())
            .enumerate()
            .filter(|(_, (rs, _))| seen.insert(&rs.target))
            .map(|(i, (rs, bv))| (i, rs, *bv))
            .collect();

        let errors: Vec<ShardError> = std::thread::scope(|scope| {
            let handles: Vec<_> = units
                .iter()
                .map(|&(_, rs, bv)| {
                    let ctx = ctx.clone();
                    let shared_sink = &shared_sink;
                    let sink_error = &sink_error;
                    scope.spawn(move || {
                        self.shard_calls.fetch_add(1, Ordering::Relaxed);
                        ctx.check()?;
                        let mut shard_sink = |chunk: QueryResult| -> KestrelResult<()> {
                            let mut guard = shared_sink.lock();
                            match (*guard)(chunk) {
                                Ok(()) => Ok(()),
                                Err(e) => {
                                    let mut first = sink_error.lock();
                                    if first.is_none() {
                                        *first = Some(e.clone());
                                    }
                                    // abort the other streams promptly
                                    ctx.cancel();
                                    Err(e)
                                }
                            }
                        };
                        rs.gateway.stream_execute(
                            &ctx,
                            &rs.target,
                            sql,
                            bv,
                            TransactionId::NONE,
                            ReservedId::NONE,
                            &mut shard_sink,
                        )
                    })
                })
                .collect();
            handles
                .into_iter()
                .zip(units.iter())
                .filter_map(|(handle, &(i, rs, _))| {
                    let joined = handle.join().unwrap_or_else(|_| {
                        Err(KestrelError::internal(
                            "E-SCATTER-002",
                            format!("stream worker panicked for target {}", rs.target),
                        ))
                    });
                    joined.err().map(|error| {
                        tracing::warn!("shard {} failed during stream: {}", rs.target, error);
                        ShardError {
                            index: i,
                            target: rs.target.clone(),
                            endpoint: rs.gateway.endpoint(),
                            error,
                        }
                    })
                })
                .collect()
        });

        self.shard_errors
            .fetch_add(errors.len() as u64, Ordering::Relaxed);
        let sink_error = sink_error.into_inner();
        kestrel_observability::record_scatter_metrics(
            op,
            start.elapsed().as_micros() as u64,
            rss.len(),
            errors.is_empty() && sink_error.is_none(),
        );

        // A sink error is the call's error, verbatim.
        if let Some(e) = sink_error {
            return Err(e);
        }
        match aggregate(&errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
