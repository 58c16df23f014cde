use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias for `Result<T, KestrelError>`.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Wire-level error code attached to every failure that crosses the
/// gateway boundary or is reported to a caller.
///
/// The set is fixed; the relative priority of codes lives in [`CODE_RANK`],
/// not in the enum order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    Internal,
    Unavailable,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Ok => "OK",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unavailable => "UNAVAILABLE",
        };
        write!(f, "{s}")
    }
}

/// Total priority order over error codes, highest priority first.
///
/// Transport/internal codes rank above resource/backoff codes, which rank
/// above client-argument codes. Both the error aggregator and any caller-
/// facing formatting consult this single table; ties resolve to the first
/// code reached in rank order.
pub const CODE_RANK: [ErrorCode; 13] = [
    ErrorCode::Unavailable,
    ErrorCode::Internal,
    ErrorCode::Aborted,
    ErrorCode::FailedPrecondition,
    ErrorCode::ResourceExhausted,
    ErrorCode::DeadlineExceeded,
    ErrorCode::NotFound,
    ErrorCode::AlreadyExists,
    ErrorCode::PermissionDenied,
    ErrorCode::InvalidArgument,
    ErrorCode::Unknown,
    ErrorCode::Cancelled,
    ErrorCode::Ok,
];

impl ErrorCode {
    /// Rank of this code in [`CODE_RANK`]; lower is higher priority.
    pub fn rank(self) -> usize {
        CODE_RANK
            .iter()
            .position(|c| *c == self)
            .unwrap_or(CODE_RANK.len())
    }

    /// The higher-priority of two codes; `self` wins ties.
    pub fn max_priority(self, other: ErrorCode) -> ErrorCode {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }
}

/// Top-level error type for the kestrel router.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KestrelError {
    /// Caller passed inconsistent arguments; rejected before dispatch and
    /// never retried.
    #[error("{0}")]
    InvalidArgument(String),

    /// The in-memory result buffer ceiling was exceeded while accumulating
    /// shard partials. Already-executed shard work is not undone.
    #[error("in-memory row count exceeded allowed limit of {limit}")]
    MemoryRowsExceeded { limit: usize },

    /// A transaction under effective SINGLE mode attempted to touch a
    /// second database/shard.
    #[error("multi-db transaction attempted: {0}")]
    MultiDbTransaction(String),

    /// Session requested a transaction mode laxer than the coordinator's
    /// configured ceiling.
    #[error("requested transaction mode {requested} exceeds coordinator ceiling {ceiling}")]
    ModeCeilingExceeded { requested: String, ceiling: String },

    /// Two-phase commit could not get every participant prepared; all
    /// participants were rolled back.
    #[error("two-phase commit prepare failed: {0}")]
    PrepareFailed(String),

    /// Caller-supplied deadline expired before all shard units completed.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Call was cancelled by the caller or by a sibling failure.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Error surfaced from a shard gateway, carrying its wire code.
    #[error("{message}")]
    Gateway { code: ErrorCode, message: String },

    /// Several per-target errors merged into one caller-facing failure.
    /// `code` is the highest-priority contributing code per [`CODE_RANK`].
    #[error("{message}")]
    Aggregate { code: ErrorCode, message: String },

    /// Should never happen; carries a unique error code for post-mortem.
    #[error("internal [{error_code}]: {message}")]
    Internal {
        error_code: &'static str,
        message: String,
    },
}

impl KestrelError {
    /// The wire-level code of this error, used for priority selection.
    pub fn code(&self) -> ErrorCode {
        match self {
            KestrelError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            KestrelError::MemoryRowsExceeded { .. } => ErrorCode::ResourceExhausted,
            KestrelError::MultiDbTransaction(_) => ErrorCode::Aborted,
            KestrelError::ModeCeilingExceeded { .. } => ErrorCode::FailedPrecondition,
            KestrelError::PrepareFailed(_) => ErrorCode::Aborted,
            KestrelError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            KestrelError::Cancelled(_) => ErrorCode::Cancelled,
            KestrelError::Gateway { code, .. } => *code,
            KestrelError::Aggregate { code, .. } => *code,
            KestrelError::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Construct a gateway-surfaced error.
    pub fn gateway(code: ErrorCode, message: impl Into<String>) -> Self {
        KestrelError::Gateway {
            code,
            message: message.into(),
        }
    }

    /// Construct an internal bug error with a stable error code.
    pub fn internal(error_code: &'static str, message: impl Into<String>) -> Self {
        KestrelError::Internal {
            error_code,
            message: message.into(),
        }
    }

    /// Add context to the message, preserving the error's classification.
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        match self {
            KestrelError::InvalidArgument(m) => {
                KestrelError::InvalidArgument(format!("{ctx}: {m}"))
            }
            KestrelError::MultiDbTransaction(m) => {
                KestrelError::MultiDbTransaction(format!("{ctx}: {m}"))
            }
            KestrelError::PrepareFailed(m) => KestrelError::PrepareFailed(format!("{ctx}: {m}")),
            KestrelError::DeadlineExceeded(m) => {
                KestrelError::DeadlineExceeded(format!("{ctx}: {m}"))
            }
            KestrelError::Cancelled(m) => KestrelError::Cancelled(format!("{ctx}: {m}")),
            KestrelError::Gateway { code, message } => KestrelError::Gateway {
                code,
                message: format!("{ctx}: {message}"),
            },
            KestrelError::Aggregate { code, message } => KestrelError::Aggregate {
                code,
                message: format!("{ctx}: {message}"),
            },
            KestrelError::Internal {
                error_code,
                message,
            } => KestrelError::Internal {
                error_code,
                message: format!("{ctx}: {message}"),
            },
            // Structured variants keep their fields; context would lose them.
            other => other,
        }
    }

    /// Emit a structured log entry for internal-bug errors.
    pub fn log_if_internal(&self) {
        if let KestrelError::Internal {
            error_code,
            message,
        } = self
        {
            tracing::error!(error_code, "INTERNAL [{}]: {}", error_code, message);
        }
    }
}

/// Add context to a Result, preserving error classification.
/// Usage: `some_result.ctx("stage=commit")?`
pub trait ErrorContext<T> {
    fn ctx(self, context: &str) -> KestrelResult<T>;
    fn ctx_with(self, f: impl FnOnce() -> String) -> KestrelResult<T>;
}

impl<T> ErrorContext<T> for KestrelResult<T> {
    fn ctx(self, context: &str) -> KestrelResult<T> {
        self.map_err(|e| e.with_context(context))
    }
    fn ctx_with(self, f: impl FnOnce() -> String) -> KestrelResult<T> {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod error_classification {
    use super::*;

    #[test]
    fn test_rank_table_orders_transport_above_resource_above_argument() {
        assert!(ErrorCode::Unavailable.rank() < ErrorCode::ResourceExhausted.rank());
        assert!(ErrorCode::Internal.rank() < ErrorCode::ResourceExhausted.rank());
        assert!(ErrorCode::ResourceExhausted.rank() < ErrorCode::InvalidArgument.rank());
        assert!(ErrorCode::InvalidArgument.rank() < ErrorCode::Ok.rank());
    }

    #[test]
    fn test_max_priority_picks_higher_ranked_code() {
        assert_eq!(
            ErrorCode::InvalidArgument.max_priority(ErrorCode::ResourceExhausted),
            ErrorCode::ResourceExhausted
        );
        assert_eq!(
            ErrorCode::Internal.max_priority(ErrorCode::ResourceExhausted),
            ErrorCode::Internal
        );
    }

    #[test]
    fn test_max_priority_ties_keep_first() {
        assert_eq!(
            ErrorCode::Aborted.max_priority(ErrorCode::Aborted),
            ErrorCode::Aborted
        );
    }

    #[test]
    fn test_memory_rows_exceeded_message_names_limit() {
        let e = KestrelError::MemoryRowsExceeded { limit: 3 };
        assert_eq!(
            e.to_string(),
            "in-memory row count exceeded allowed limit of 3"
        );
        assert_eq!(e.code(), ErrorCode::ResourceExhausted);
    }

    #[test]
    fn test_multi_db_message() {
        let e = KestrelError::MultiDbTransaction("from commerce.0 to commerce.1".into());
        assert!(e.to_string().contains("multi-db transaction attempted"));
        assert_eq!(e.code(), ErrorCode::Aborted);
    }

    #[test]
    fn test_gateway_error_keeps_code() {
        let e = KestrelError::gateway(ErrorCode::ResourceExhausted, "RESOURCE_EXHAUSTED error");
        assert_eq!(e.code(), ErrorCode::ResourceExhausted);
        assert_eq!(e.to_string(), "RESOURCE_EXHAUSTED error");
    }

    #[test]
    fn test_with_context_preserves_classification() {
        let e = KestrelError::gateway(ErrorCode::Unavailable, "connection refused");
        let e2 = e.with_context("stage=dispatch");
        assert_eq!(e2.code(), ErrorCode::Unavailable);
        assert!(e2.to_string().contains("stage=dispatch"));
        assert!(e2.to_string().contains("connection refused"));
    }

    #[test]
    fn test_error_context_trait() {
        let r: KestrelResult<()> = Err(KestrelError::Cancelled("caller gave up".into()));
        let err = r.ctx("stage=stream").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);
        assert!(err.to_string().contains("stage=stream"));
    }

    #[test]
    fn test_error_context_ok_passthrough() {
        let r: KestrelResult<i32> = Ok(42);
        assert_eq!(r.ctx("should not appear").unwrap(), 42);
    }
}
