//! Scatter-gather execution engine and session/transaction state machine.
//!
//! One logical statement fans out to the set of shards that must execute
//! it; per-shard results and errors are gathered back into a single
//! consolidated outcome with deterministic ordering. Cross-shard
//! transactions and reserved connections are tracked per session and
//! resolved by the transaction coordinator at commit/rollback time.
//!
//! - [`ScatterConn`] — parallel dispatch, one gateway call per distinct
//!   target, input-order result/error reporting
//! - [`SafeSession`] — per-session shard transaction/reservation state
//! - [`TxConn`] — single-shard, best-effort multi, and two-phase commit
//! - [`ResultAccumulator`] — row-ceiling-bounded result merging
//! - [`aggregate`] — dispatch-order error merging with priority codes

pub mod accumulate;
pub mod error_agg;
pub mod scatter;
pub mod session;
pub mod tx_conn;

pub use accumulate::ResultAccumulator;
pub use error_agg::{aggregate, ShardError};
pub use scatter::{ScatterConn, ScatterStats};
pub use session::{SafeSession, Session, ShardSession, ShardState};
pub use tx_conn::TxConn;
