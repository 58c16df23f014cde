use std::fmt;

use serde::{Deserialize, Serialize};

/// Replication role of a shard endpoint.
///
/// Routing decisions pick a role per statement: writes go to `Primary`,
/// reads may go to `Replica` or `ReadOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardRole {
    Primary,
    Replica,
    ReadOnly,
}

impl fmt::Display for ShardRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardRole::Primary => write!(f, "primary"),
            ShardRole::Replica => write!(f, "replica"),
            ShardRole::ReadOnly => write!(f, "readonly"),
        }
    }
}

/// Routing identity of one shard-plus-role destination.
///
/// Equality of `Target` is the dispatch key: a scatter call issues at most
/// one gateway call per distinct `Target` per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Logical database (keyspace) name.
    pub database: String,
    /// Shard identifier within the database.
    pub shard: String,
    /// Replication role tag.
    pub role: ShardRole,
}

impl Target {
    pub fn new(database: impl Into<String>, shard: impl Into<String>, role: ShardRole) -> Self {
        Self {
            database: database.into(),
            shard: shard.into(),
            role,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.shard, self.role)
    }
}

/// Commit policy for a cross-shard transaction.
///
/// `Single` permits one participating shard only; `Multi` commits each
/// participant independently with best-effort semantics; `TwoPc` runs a
/// two-phase protocol across participants. A session may override the
/// coordinator default but cannot relax past the coordinator's ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Defer to the coordinator's configured default.
    #[default]
    Unspecified,
    Single,
    Multi,
    #[serde(rename = "twopc")]
    TwoPc,
}

impl TransactionMode {
    /// Strictness rank: `Single` is strictest, `TwoPc` most permissive.
    /// `Unspecified` carries no rank of its own and must be resolved first.
    pub fn strictness(self) -> u8 {
        match self {
            TransactionMode::Unspecified => 0,
            TransactionMode::Single => 1,
            TransactionMode::Multi => 2,
            TransactionMode::TwoPc => 3,
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::Unspecified => write!(f, "UNSPECIFIED"),
            TransactionMode::Single => write!(f, "SINGLE"),
            TransactionMode::Multi => write!(f, "MULTI"),
            TransactionMode::TwoPc => write!(f, "TWOPC"),
        }
    }
}

/// Shard-side transaction identifier. Zero means no transaction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub const NONE: TransactionId = TransactionId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Shard-side reserved-connection identifier. Zero means no reservation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ReservedId(pub u64);

impl ReservedId {
    pub const NONE: ReservedId = ReservedId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ReservedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rsv:{}", self.0)
    }
}
