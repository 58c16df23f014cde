use serde::{Deserialize, Serialize};

use crate::types::TransactionMode;

fn default_max_memory_rows() -> usize {
    300_000
}

fn default_transaction_mode() -> TransactionMode {
    TransactionMode::Multi
}

/// Router configuration, constructed at process scope and passed by value
/// to the executor. Overridable per test or per tenant; there is no
/// process-global tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Maximum number of rows buffered in memory while merging shard
    /// partials. Exceeding this fails the call with a clear error.
    #[serde(default = "default_max_memory_rows")]
    pub max_memory_rows: usize,

    /// Coordinator transaction-mode ceiling and default. Sessions may
    /// request a stricter mode but cannot relax past this.
    #[serde(default = "default_transaction_mode")]
    pub transaction_mode: TransactionMode,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_memory_rows: default_max_memory_rows(),
            transaction_mode: default_transaction_mode(),
        }
    }
}
