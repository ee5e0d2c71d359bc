//! Executor that runs work immediately on the submitting thread.

use super::{Executor, Work};

/// Runs every submitted callable synchronously, inside `submit` itself.
///
/// Useful for tests and for pipelines that need no thread hops. Long
/// continuation chains dispatch recursively through the stack, so very deep
/// chains should prefer [`super::QueueExecutor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl InlineExecutor {
    /// Creates an inline executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Executor for InlineExecutor {
    fn submit(&self, work: Work) {
        work();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn submit_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        InlineExecutor::new().submit(Box::new(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
