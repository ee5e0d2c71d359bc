//! Deterministic FIFO executor driven by an explicit drain loop.

use super::{Executor, Work};
use crossbeam_queue::SegQueue;

/// Collects submitted work in a lock-free FIFO; the owner drains it.
///
/// Submission is safe from any thread. Nothing runs until the owner calls
/// [`run_one`](Self::run_one) or [`run_until_idle`](Self::run_until_idle),
/// which makes the interleaving of continuations fully explicit — the
/// property the test suites rely on for ordering assertions.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use handover::{ExecutorHandle, QueueExecutor};
///
/// let queue = Arc::new(QueueExecutor::new());
/// let exec: ExecutorHandle = queue.clone();
/// exec.submit(Box::new(|| {}));
/// assert_eq!(queue.run_until_idle(), 1);
/// ```
#[derive(Debug, Default)]
pub struct QueueExecutor {
    queue: SegQueue<Work>,
}

impl QueueExecutor {
    /// Creates an empty queue executor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Runs the oldest queued callable, if any. Returns whether one ran.
    pub fn run_one(&self) -> bool {
        match self.queue.pop() {
            Some(work) => {
                work();
                true
            }
            None => false,
        }
    }

    /// Runs queued callables until the queue is empty, including work that
    /// running callables submit. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        tracing::trace!(ran, "queue executor drained");
        ran
    }

    /// Returns the number of callables currently queued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Executor for QueueExecutor {
    fn submit(&self, work: Work) {
        self.queue.push(work);
    }
}
