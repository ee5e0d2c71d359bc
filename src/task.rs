//! Producer handle: runs the deferred function and settles the state.

use crate::error::Error;
use crate::executor::ExecutorHandle;
use crate::state::SharedState;
use std::sync::{Arc, Weak};

/// The producer half of a packaged computation.
///
/// Holds a weak reference to the shared state and contributes one to its
/// producer count. Cloning adds a producer; dropping removes one, and when
/// the last producer disappears while the state is still pending, the state
/// settles to a broken-promise failure.
///
/// Running the task evaluates the deferred function exactly once; further
/// runs are no-ops, as is running a task whose consumers have all vanished.
pub struct PackagedTask<T> {
    state: Weak<SharedState<T>>,
}

impl<T> PackagedTask<T> {
    pub(crate) fn from_state(state: &Arc<SharedState<T>>) -> Self {
        state.add_producer();
        Self {
            state: Arc::downgrade(state),
        }
    }
}

impl<T: Send + 'static> PackagedTask<T> {
    /// Runs the deferred function without capturing a scheduler.
    ///
    /// Continuations attached to the resulting state with no explicit
    /// executor will have nowhere to run; prefer [`run_on`](Self::run_on)
    /// unless every continuation names its executor.
    pub fn run(&self) {
        self.run_inner(None);
    }

    /// Runs the deferred function, capturing `exec` as the state's default
    /// scheduler for continuations attached without an explicit executor.
    pub fn run_on(&self, exec: &ExecutorHandle) {
        self.run_inner(Some(Arc::clone(exec)));
    }

    fn run_inner(&self, sched: Option<ExecutorHandle>) {
        match self.state.upgrade() {
            Some(state) => state.execute(sched),
            None => tracing::trace!("no consumers remain; skipping task run"),
        }
    }

    /// Settles the state with a failure without running the function.
    pub(crate) fn fail(&self, error: Error) {
        if let Some(state) = self.state.upgrade() {
            state.abandon(error);
        }
    }
}

impl<T> Clone for PackagedTask<T> {
    fn clone(&self) -> Self {
        if let Some(state) = self.state.upgrade() {
            state.add_producer();
        }
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Drop for PackagedTask<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.release_producer();
        }
    }
}

impl<T> std::fmt::Debug for PackagedTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagedTask")
            .field("connected", &(self.state.strong_count() > 0))
            .finish()
    }
}
