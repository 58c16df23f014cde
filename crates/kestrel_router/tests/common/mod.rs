//! Shared test fixture: an in-process sandbox gateway with per-operation
//! counters, scripted results, and scripted failures.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use kestrel_common::{
    CallContext, ErrorCode, Field, KestrelError, KestrelResult, QueryResult, ReservedId,
    ShardRole, Target, TransactionId, Value, ValueType,
};
use kestrel_gateway::{BoundQuery, ResolvedShard, ShardGateway, StreamSink};

/// The result every sandbox call returns unless results were scripted:
/// one row, one affected row.
pub fn single_row_result() -> QueryResult {
    QueryResult {
        fields: vec![Field::new("id", ValueType::Int64)],
        rows: vec![vec![Value::Int64(1)]],
        rows_affected: 1,
        insert_id: 0,
    }
}

/// One shard's fake gateway. Counters observe the dispatch policy
/// (exactly one attempt per distinct target per call); scripted failures
/// consume one charge per call.
pub struct SandboxGateway {
    endpoint: String,
    pub exec_count: AtomicU64,
    pub begin_count: AtomicU64,
    pub reserve_count: AtomicU64,
    pub commit_count: AtomicU64,
    pub rollback_count: AtomicU64,
    pub prepare_count: AtomicU64,
    pub release_count: AtomicU64,
    next_transaction_id: AtomicU64,
    next_reserved_id: AtomicU64,
    /// Queries this gateway actually received, in arrival order.
    pub queries: Mutex<Vec<(Target, BoundQuery)>>,
    results: Mutex<VecDeque<QueryResult>>,
    fail_ops: Mutex<HashMap<&'static str, (ErrorCode, u32)>>,
}

impl SandboxGateway {
    pub fn new(endpoint: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            exec_count: AtomicU64::new(0),
            begin_count: AtomicU64::new(0),
            reserve_count: AtomicU64::new(0),
            commit_count: AtomicU64::new(0),
            rollback_count: AtomicU64::new(0),
            prepare_count: AtomicU64::new(0),
            release_count: AtomicU64::new(0),
            next_transaction_id: AtomicU64::new(1),
            next_reserved_id: AtomicU64::new(1),
            queries: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
            fail_ops: Mutex::new(HashMap::new()),
        })
    }

    /// Script the results returned by the next execute/stream calls.
    pub fn set_results(&self, results: Vec<QueryResult>) {
        *self.results.lock() = results.into();
    }

    /// Make the next `times` calls of `op` fail with `code`.
    /// `op` is one of execute, begin, reserve, commit, rollback, prepare,
    /// release.
    pub fn set_fail(&self, op: &'static str, code: ErrorCode, times: u32) {
        self.fail_ops.lock().insert(op, (code, times));
    }

    pub fn reset_counts(&self) {
        self.exec_count.store(0, Ordering::SeqCst);
        self.begin_count.store(0, Ordering::SeqCst);
        self.reserve_count.store(0, Ordering::SeqCst);
        self.commit_count.store(0, Ordering::SeqCst);
        self.rollback_count.store(0, Ordering::SeqCst);
        self.prepare_count.store(0, Ordering::SeqCst);
        self.release_count.store(0, Ordering::SeqCst);
    }

    fn check_fail(&self, op: &'static str) -> KestrelResult<()> {
        let mut fails = self.fail_ops.lock();
        if let Some((code, times)) = fails.get_mut(op) {
            if *times > 0 {
                *times -= 1;
                return Err(KestrelError::gateway(*code, format!("{code} error")));
            }
        }
        Ok(())
    }

    fn next_result(&self) -> QueryResult {
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(single_row_result)
    }
}

impl ShardGateway for SandboxGateway {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn execute(
        &self,
        _ctx: &CallContext,
        target: &Target,
        sql: &str,
        bind_vars: &HashMap<String, Value>,
        _transaction_id: TransactionId,
        _reserved_id: ReservedId,
    ) -> KestrelResult<QueryResult> {
        self.exec_count.fetch_add(1, Ordering::SeqCst);
        self.check_fail("execute")?;
        self.queries.lock().push((
            target.clone(),
            BoundQuery {
                sql: sql.to_string(),
                bind_vars: bind_vars.clone(),
            },
        ));
        Ok(self.next_result())
    }

    fn stream_execute(
        &self,
        _ctx: &CallContext,
        target: &Target,
        sql: &str,
        bind_vars: &HashMap<String, Value>,
        _transaction_id: TransactionId,
        _reserved_id: ReservedId,
        sink: &mut StreamSink<'_>,
    ) -> KestrelResult<()> {
        self.exec_count.fetch_add(1, Ordering::SeqCst);
        self.check_fail("execute")?;
        self.queries.lock().push((
            target.clone(),
            BoundQuery {
                sql: sql.to_string(),
                bind_vars: bind_vars.clone(),
            },
        ));
        sink(self.next_result())
    }

    fn begin(&self, _ctx: &CallContext, _target: &Target) -> KestrelResult<TransactionId> {
        self.begin_count.fetch_add(1, Ordering::SeqCst);
        self.check_fail("begin")?;
        Ok(TransactionId(
            self.next_transaction_id.fetch_add(1, Ordering::SeqCst),
        ))
    }

    fn reserve(&self, _ctx: &CallContext, _target: &Target) -> KestrelResult<ReservedId> {
        self.reserve_count.fetch_add(1, Ordering::SeqCst);
        self.check_fail("reserve")?;
        Ok(ReservedId(
            self.next_reserved_id.fetch_add(1, Ordering::SeqCst),
        ))
    }

    fn commit(
        &self,
        _ctx: &CallContext,
        _target: &Target,
        _transaction_id: TransactionId,
    ) -> KestrelResult<()> {
        self.commit_count.fetch_add(1, Ordering::SeqCst);
        self.check_fail("commit")
    }

    fn rollback(
        &self,
        _ctx: &CallContext,
        _target: &Target,
        _transaction_id: TransactionId,
    ) -> KestrelResult<()> {
        self.rollback_count.fetch_add(1, Ordering::SeqCst);
        self.check_fail("rollback")
    }

    fn prepare(
        &self,
        _ctx: &CallContext,
        _target: &Target,
        _transaction_id: TransactionId,
    ) -> KestrelResult<()> {
        self.prepare_count.fetch_add(1, Ordering::SeqCst);
        self.check_fail("prepare")
    }

    fn release(
        &self,
        _ctx: &CallContext,
        _target: &Target,
        _reserved_id: ReservedId,
    ) -> KestrelResult<()> {
        self.release_count.fetch_add(1, Ordering::SeqCst);
        self.check_fail("release")
    }
}

/// Build resolved shards for `database` over the given (shard, gateway)
/// pairs, all with the same role.
pub fn resolved_shards(
    database: &str,
    role: ShardRole,
    shards: &[(&str, Arc<SandboxGateway>)],
) -> Vec<ResolvedShard> {
    shards
        .iter()
        .map(|(shard, gateway)| ResolvedShard {
            target: Target::new(database, *shard, role),
            gateway: gateway.clone(),
        })
        .collect()
}

/// One plain query per resolved shard.
pub fn plain_queries(n: usize) -> Vec<BoundQuery> {
    (0..n).map(|_| BoundQuery::new("query1")).collect()
}
