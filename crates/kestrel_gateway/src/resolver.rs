//! Destination resolution: logical routing destinations → concrete shards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use kestrel_common::{ErrorCode, KestrelError, KestrelResult, ShardRole, Target};

use crate::{ResolvedShard, ShardGateway};

/// Which shards of a database a statement should reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A single named shard.
    Shard(String),
    /// An explicit list of shards, dispatched in list order.
    Shards(Vec<String>),
    /// Every shard of the database, in registration order.
    AllShards,
}

/// Maps a logical routing specification to concrete shard targets.
/// Resolution errors are surfaced to the caller unmodified.
pub trait Resolver: Send + Sync {
    fn resolve_destination(
        &self,
        database: &str,
        role: ShardRole,
        destination: &Destination,
    ) -> KestrelResult<Vec<ResolvedShard>>;
}

/// In-process resolver over a registered shard map. The production
/// deployment plugs a topology-watching resolver in behind the same
/// trait; tests and single-process embeddings use this one.
#[derive(Default)]
pub struct StaticResolver {
    /// database → ordered list of (shard name, gateway).
    shards: RwLock<HashMap<String, Vec<(String, Arc<dyn ShardGateway>)>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shard of `database` served by `gateway`. Registration
    /// order is the `AllShards` dispatch order.
    pub fn add_shard(
        &self,
        database: impl Into<String>,
        shard: impl Into<String>,
        gateway: Arc<dyn ShardGateway>,
    ) {
        self.shards
            .write()
            .entry(database.into())
            .or_default()
            .push((shard.into(), gateway));
    }

    fn lookup(
        &self,
        database: &str,
        shard: &str,
        role: ShardRole,
    ) -> KestrelResult<ResolvedShard> {
        let shards = self.shards.read();
        let entries = shards.get(database).ok_or_else(|| {
            KestrelError::gateway(
                ErrorCode::NotFound,
                format!("database {database} not found in shard map"),
            )
        })?;
        let (name, gateway) = entries
            .iter()
            .find(|(name, _)| name == shard)
            .ok_or_else(|| {
                KestrelError::gateway(
                    ErrorCode::NotFound,
                    format!("shard {database}.{shard} not found in shard map"),
                )
            })?;
        Ok(ResolvedShard {
            target: Target::new(database, name.clone(), role),
            gateway: gateway.clone(),
        })
    }
}

impl Resolver for StaticResolver {
    fn resolve_destination(
        &self,
        database: &str,
        role: ShardRole,
        destination: &Destination,
    ) -> KestrelResult<Vec<ResolvedShard>> {
        match destination {
            Destination::Shard(shard) => Ok(vec![self.lookup(database, shard, role)?]),
            Destination::Shards(names) => names
                .iter()
                .map(|shard| self.lookup(database, shard, role))
                .collect(),
            Destination::AllShards => {
                let shards = self.shards.read();
                let entries = shards.get(database).ok_or_else(|| {
                    KestrelError::gateway(
                        ErrorCode::NotFound,
                        format!("database {database} not found in shard map"),
                    )
                })?;
                Ok(entries
                    .iter()
                    .map(|(name, gateway)| ResolvedShard {
                        target: Target::new(database, name.clone(), role),
                        gateway: gateway.clone(),
                    })
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use kestrel_common::{
        CallContext, KestrelResult, QueryResult, ReservedId, TransactionId, Value,
    };

    use super::*;
    use crate::StreamSink;

    struct NullGateway;

    impl ShardGateway for NullGateway {
        fn endpoint(&self) -> String {
            "null:0".into()
        }
        fn execute(
            &self,
            _ctx: &CallContext,
            _target: &Target,
            _sql: &str,
            _bind_vars: &HashMap<String, Value>,
            _transaction_id: TransactionId,
            _reserved_id: ReservedId,
        ) -> KestrelResult<QueryResult> {
            Ok(QueryResult::new())
        }
        fn stream_execute(
            &self,
            _ctx: &CallContext,
            _target: &Target,
            _sql: &str,
            _bind_vars: &HashMap<String, Value>,
            _transaction_id: TransactionId,
            _reserved_id: ReservedId,
            _sink: &mut StreamSink<'_>,
        ) -> KestrelResult<()> {
            Ok(())
        }
        fn begin(&self, _ctx: &CallContext, _target: &Target) -> KestrelResult<TransactionId> {
            Ok(TransactionId(1))
        }
        fn reserve(&self, _ctx: &CallContext, _target: &Target) -> KestrelResult<ReservedId> {
            Ok(ReservedId(1))
        }
        fn commit(
            &self,
            _ctx: &CallContext,
            _target: &Target,
            _transaction_id: TransactionId,
        ) -> KestrelResult<()> {
            Ok(())
        }
        fn rollback(
            &self,
            _ctx: &CallContext,
            _target: &Target,
            _transaction_id: TransactionId,
        ) -> KestrelResult<()> {
            Ok(())
        }
        fn prepare(
            &self,
            _ctx: &CallContext,
            _target: &Target,
            _transaction_id: TransactionId,
        ) -> KestrelResult<()> {
            Ok(())
        }
        fn release(
            &self,
            _ctx: &CallContext,
            _target: &Target,
            _reserved_id: ReservedId,
        ) -> KestrelResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_resolve_single_shard() {
        let res = StaticResolver::new();
        res.add_shard("commerce", "0", Arc::new(NullGateway));
        let rss = res
            .resolve_destination(
                "commerce",
                ShardRole::Replica,
                &Destination::Shard("0".into()),
            )
            .unwrap();
        assert_eq!(rss.len(), 1);
        assert_eq!(rss[0].target.to_string(), "commerce.0.replica");
    }

    #[test]
    fn test_resolve_all_shards_in_registration_order() {
        let res = StaticResolver::new();
        res.add_shard("commerce", "-80", Arc::new(NullGateway));
        res.add_shard("commerce", "80-", Arc::new(NullGateway));
        let rss = res
            .resolve_destination("commerce", ShardRole::Primary, &Destination::AllShards)
            .unwrap();
        let shards: Vec<&str> = rss.iter().map(|r| r.target.shard.as_str()).collect();
        assert_eq!(shards, vec!["-80", "80-"]);
    }

    #[test]
    fn test_unknown_shard_is_not_found() {
        let res = StaticResolver::new();
        res.add_shard("commerce", "0", Arc::new(NullGateway));
        let err = res
            .resolve_destination(
                "commerce",
                ShardRole::Replica,
                &Destination::Shard("9".into()),
            )
            .unwrap_err();
        assert_eq!(err.code(), kestrel_common::ErrorCode::NotFound);
    }

    #[test]
    fn test_unknown_database_is_not_found() {
        let res = StaticResolver::new();
        let err = res
            .resolve_destination("nope", ShardRole::Replica, &Destination::AllShards)
            .unwrap_err();
        assert_eq!(err.code(), kestrel_common::ErrorCode::NotFound);
    }
}
