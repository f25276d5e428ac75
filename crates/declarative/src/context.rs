//! Run context: progress reporting and cancellation
//!
//! These keep the engine free of any terminal or signal-handling
//! dependency; the caller plugs in its own implementations.

use crate::types::{AbortReason, NodeId, NodeReport, Operation, RunSummary};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Progress callback for a run
///
/// All methods are called from the coordinating thread.
pub trait ProgressCallback: Send {
    /// Called once the plan is known, with the number of tasks
    fn on_run_start(&mut self, total: usize);

    /// Called when a provider operation is dispatched to a worker
    fn on_node_start(&mut self, id: &NodeId, operation: Operation);

    /// Called when a task reaches a terminal status
    fn on_node_complete(&mut self, report: &NodeReport);

    /// Called when the run finishes, aborted or not
    fn on_run_complete(&mut self, summary: &RunSummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_node_start(&mut self, _id: &NodeId, _operation: Operation) {}
    fn on_node_complete(&mut self, _report: &NodeReport) {}
    fn on_run_complete(&mut self, _summary: &RunSummary) {}
}

/// Shared cancellation flag with an optional deadline
///
/// Clones share the flag, so a signal handler can hold one while the
/// engine polls another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also fire once `timeout` has elapsed from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Request an abort
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Why the run should stop, if it should
    pub fn check(&self) -> Option<AbortReason> {
        if self.is_cancelled() {
            return Some(AbortReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(AbortReason::TimedOut),
            _ => None,
        }
    }

    /// Time left before the deadline, if there is one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_shared_between_clones() {
        let token = CancelToken::new();
        let handler = token.clone();
        assert_eq!(token.check(), None);

        handler.cancel();
        assert_eq!(token.check(), Some(AbortReason::Cancelled));
    }

    #[test]
    fn test_deadline() {
        let token = CancelToken::new().with_timeout(Duration::ZERO);
        assert_eq!(token.check(), Some(AbortReason::TimedOut));
        assert_eq!(token.remaining(), Some(Duration::ZERO));

        let open = CancelToken::new().with_timeout(Duration::from_secs(3600));
        assert_eq!(open.check(), None);
    }
}
