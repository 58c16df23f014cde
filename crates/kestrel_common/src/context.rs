//! Per-call context: deadline plus cooperative cancellation.
//!
//! A `CallContext` is cloned into every per-target unit of work. Workers
//! check it before suspending into gateway I/O, and gateways receive it so
//! in-flight calls can abandon waiting promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{KestrelError, KestrelResult};

/// Cancellation and deadline scope for one logical call.
///
/// Clones share the cancel flag: cancelling any clone cancels them all.
/// [`CallContext::child`] opens a nested scope with its own flag that
/// still observes every ancestor's cancellation.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
    /// Ancestor cancel flags, observed read-only.
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CallContext {
    /// A context with no deadline that is never cancelled implicitly.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            ancestors: Vec::new(),
        }
    }

    /// Derive a context that also expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(match self.deadline {
                Some(d) => d.min(deadline),
                None => deadline,
            }),
            cancelled: self.cancelled.clone(),
            ancestors: self.ancestors.clone(),
        }
    }

    /// Derive a context that expires `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Open a nested scope: same deadline, a fresh cancel flag. The child
    /// observes cancellation of this context (and its ancestors), but
    /// cancelling the child leaves this context live.
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.cancelled.clone());
        Self {
            deadline: self.deadline,
            cancelled: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    /// Cancel this context and every clone sharing its flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.ancestors.iter().any(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn deadline_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// True when the call should stop: cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline_expired()
    }

    /// Time remaining until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Err with a cancellation-class error when the context is done.
    pub fn check(&self) -> KestrelResult<()> {
        if self.is_cancelled() {
            return Err(KestrelError::Cancelled("context cancelled".into()));
        }
        if self.deadline_expired() {
            return Err(KestrelError::DeadlineExceeded(
                "context deadline expired".into(),
            ));
        }
        Ok(())
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}
