//! Per-target error aggregation.
//!
//! A scatter call collects at most one error per target. Aggregation
//! concatenates messages in target-dispatch order, each prefixed with the
//! target identity and the endpoint that was used, and reports the single
//! highest-priority code among contributors per the shared
//! [`CODE_RANK`](kestrel_common::CODE_RANK) table.

use std::fmt;

use kestrel_common::{ErrorCode, KestrelError, Target};

/// One target's failure within a scatter call, attributable by input
/// position even when duplicate targets were deduplicated for dispatch.
#[derive(Debug, Clone)]
pub struct ShardError {
    /// Position of the target in the caller's dispatch list.
    pub index: usize,
    pub target: Target,
    /// Gateway endpoint the call was (or would have been) sent through.
    pub endpoint: String,
    pub error: KestrelError,
}

impl fmt::Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target: {}, used endpoint: {}: {}",
            self.target, self.endpoint, self.error
        )
    }
}

/// Merge per-target errors into one representative error.
///
/// Returns `None` when no target failed, regardless of how many were
/// attempted. The caller sees one message that is deterministic given a
/// fixed dispatch order and suitable for direct display.
pub fn aggregate(errors: &[ShardError]) -> Option<KestrelError> {
    if errors.is_empty() {
        return None;
    }
    let mut code = ErrorCode::Ok;
    for se in errors {
        code = code.max_priority(se.error.code());
    }
    let message = errors
        .iter()
        .map(|se| se.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    Some(KestrelError::Aggregate { code, message })
}
