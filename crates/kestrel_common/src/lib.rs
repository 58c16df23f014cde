//! Shared vocabulary for the kestrel query router: routing identifiers,
//! the wire value model, the error taxonomy with its priority table,
//! call context (deadline + cancellation), and configuration.

pub mod config;
pub mod context;
pub mod error;
pub mod types;
pub mod value;

pub use config::RouterConfig;
pub use context::CallContext;
pub use error::{ErrorCode, ErrorContext, KestrelError, KestrelResult, CODE_RANK};
pub use types::{ReservedId, ShardRole, Target, TransactionId, TransactionMode};
pub use value::{Field, QueryResult, Value, ValueType};
