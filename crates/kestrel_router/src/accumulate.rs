//! Result accumulation with an in-memory row ceiling.

use kestrel_common::{KestrelError, KestrelResult, QueryResult};

/// Merges per-shard partial results into one logical result, enforcing a
/// maximum buffered row count on every append so excess memory is never
/// held.
#[derive(Debug)]
pub struct ResultAccumulator {
    max_rows: usize,
    result: QueryResult,
}

impl ResultAccumulator {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows,
            result: QueryResult::new(),
        }
    }

    /// Append one partial result. Fails before buffering when the
    /// combined row count would exceed the ceiling; the accumulated
    /// result never holds more than `max_rows` rows.
    pub fn append(&mut self, partial: &QueryResult) -> KestrelResult<()> {
        if self.result.rows.len() + partial.rows.len() > self.max_rows {
            return Err(KestrelError::MemoryRowsExceeded {
                limit: self.max_rows,
            });
        }
        self.result.append_result(partial);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.result.rows.len()
    }

    pub fn into_result(self) -> QueryResult {
        self.result
    }
}
