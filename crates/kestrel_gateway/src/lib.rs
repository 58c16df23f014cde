//! Shard gateway and resolver boundary.
//!
//! The router core never talks to a shard directly; it goes through the
//! [`ShardGateway`] trait, one implementation per transport. Likewise it
//! never decides which shards exist — a [`Resolver`] maps a logical
//! routing specification to concrete [`ResolvedShard`]s.

pub mod resolver;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kestrel_common::{
    CallContext, KestrelResult, QueryResult, ReservedId, Target, TransactionId, Value,
};

pub use resolver::{Destination, Resolver, StaticResolver};

/// An SQL text plus its named bind variables. One `BoundQuery` is
/// associated with exactly one resolved shard in a multi-query scatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundQuery {
    pub sql: String,
    pub bind_vars: HashMap<String, Value>,
}

impl BoundQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bind_vars: HashMap::new(),
        }
    }

    pub fn with_bind_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bind_vars.insert(name.into(), value);
        self
    }
}

/// Streaming sink: receives result chunks as they arrive. Returning an
/// error aborts the stream; the error is surfaced verbatim to the caller.
pub type StreamSink<'a> = dyn FnMut(QueryResult) -> KestrelResult<()> + Send + 'a;

/// Per-shard client capability set consumed by the router.
///
/// Implementations own transport, connection pooling, and any retry or
/// backoff policy. The router guarantees at most one call per distinct
/// target per scatter invocation and never retries on its own.
pub trait ShardGateway: Send + Sync {
    /// Stable identity of the endpoint behind this gateway, used in
    /// aggregated error messages and recorded on shard sessions.
    fn endpoint(&self) -> String;

    /// Execute one statement. `transaction_id` / `reserved_id` of zero
    /// mean "outside a transaction" / "no reserved connection".
    fn execute(
        &self,
        ctx: &CallContext,
        target: &Target,
        sql: &str,
        bind_vars: &HashMap<String, Value>,
        transaction_id: TransactionId,
        reserved_id: ReservedId,
    ) -> KestrelResult<QueryResult>;

    /// Execute one statement, delivering result chunks to `sink` as they
    /// arrive. A sink error aborts the stream and is returned unmodified.
    fn stream_execute(
        &self,
        ctx: &CallContext,
        target: &Target,
        sql: &str,
        bind_vars: &HashMap<String, Value>,
        transaction_id: TransactionId,
        reserved_id: ReservedId,
        sink: &mut StreamSink<'_>,
    ) -> KestrelResult<()>;

    /// Open a shard-side transaction, returning its id.
    fn begin(&self, ctx: &CallContext, target: &Target) -> KestrelResult<TransactionId>;

    /// Pin a stateful connection to the calling session, returning its id.
    fn reserve(&self, ctx: &CallContext, target: &Target) -> KestrelResult<ReservedId>;

    fn commit(
        &self,
        ctx: &CallContext,
        target: &Target,
        transaction_id: TransactionId,
    ) -> KestrelResult<()>;

    fn rollback(
        &self,
        ctx: &CallContext,
        target: &Target,
        transaction_id: TransactionId,
    ) -> KestrelResult<()>;

    /// First phase of two-phase commit: make the transaction durable and
    /// commit-ready without committing.
    fn prepare(
        &self,
        ctx: &CallContext,
        target: &Target,
        transaction_id: TransactionId,
    ) -> KestrelResult<()>;

    /// Release a reserved connection back to the shard.
    fn release(
        &self,
        ctx: &CallContext,
        target: &Target,
        reserved_id: ReservedId,
    ) -> KestrelResult<()>;
}

/// A routing target bound to the gateway that can reach it. Produced by a
/// [`Resolver`]; consumed, never mutated, by the executor.
#[derive(Clone)]
pub struct ResolvedShard {
    pub target: Target,
    pub gateway: Arc<dyn ShardGateway>,
}

impl std::fmt::Debug for ResolvedShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedShard")
            .field("target", &self.target)
            .field("gateway", &self.gateway.endpoint())
            .finish()
    }
}
