//! Consumer handle: polling and continuation attachment.

use crate::error::{Error, Result};
use crate::executor::ExecutorHandle;
use crate::state::{Claimed, ClaimMode, DeferredFn, Position, SharedState};
use std::sync::Arc;

/// The consumer half of a packaged computation.
///
/// Holds a strong reference to the shared state and contributes one to its
/// consumer count; `Clone` and `Drop` maintain the count. A future always
/// has a backing state, so there is no disconnected configuration to guard
/// against.
///
/// # Reading
///
/// [`try_get`](Self::try_get) polls without blocking: `Ok(None)` while
/// pending, the value once settled, or the stored failure re-raised. The
/// last consumer standing receives the value by move and the slot empties.
/// [`try_take`](Self::try_take) moves the value out unconditionally — the
/// read for non-cloneable payloads, destructive by design.
///
/// # Chaining
///
/// The `then*` family derives a future from the value arm; the `on_error*`
/// family recovers from the failure arm and passes successes through
/// untouched. Each family comes in clone-claim (`then`, `on_error`; require
/// `T: Clone`, any number may attach) and move-claim (`then_take`,
/// `on_error_take`; exclusive) variants, and each in default-executor and
/// explicit-executor (`*_on`) spellings. The default executor is the one
/// captured when the producing task ran; with neither that nor an explicit
/// executor, attachment fails with [`crate::ErrorKind::NoExecutor`].
pub struct Future<T> {
    state: Arc<SharedState<T>>,
}

/// Creates a future already settled with `value`.
///
/// The unit form of the original API is simply `make_ready_future(())`.
pub fn make_ready_future<T: Send + 'static>(value: T) -> Future<T> {
    Future::from_state(SharedState::new_value(value))
}

/// Creates a future already settled with a failure.
pub fn make_failed_future<T: Send + 'static>(error: Error) -> Future<T> {
    Future::from_state(SharedState::new_failure(error))
}

impl<T> Future<T> {
    pub(crate) fn from_state(state: Arc<SharedState<T>>) -> Self {
        state.add_consumer();
        Self { state }
    }

    pub(crate) fn state(&self) -> &Arc<SharedState<T>> {
        &self.state
    }
}

impl<T: Send + 'static> Future<T> {
    /// Polls for the outcome without blocking.
    ///
    /// Returns `Ok(None)` while pending, `Ok(Some(value))` once settled —
    /// cloned, unless this is the last consumer, which drains the slot —
    /// and re-raises the stored failure otherwise.
    ///
    /// # Errors
    ///
    /// The stored failure, if the state settled on the failure arm.
    pub fn try_get(&self) -> Result<Option<T>>
    where
        T: Clone,
    {
        self.state.try_get()
    }

    /// Polls for the outcome, taking the value by move.
    ///
    /// Destructive: the slot empties on success and a second call returns
    /// `Ok(None)`. This is the read for non-cloneable payloads.
    ///
    /// # Errors
    ///
    /// The stored failure, if the state settled on the failure arm.
    pub fn try_take(&self) -> Result<Option<T>> {
        self.state.try_take()
    }

    /// Chains `f` on the value arm, on the default executor.
    ///
    /// The derived future settles with `f`'s result once this future
    /// settles with a value, and adopts an upstream failure unchanged
    /// without invoking `f`.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorKind::Spent`] on a drained state,
    /// [`crate::ErrorKind::MultipleValueContinuations`] if an exclusive
    /// claimer is already attached, [`crate::ErrorKind::NoExecutor`] if the
    /// state is settled and no scheduler was ever captured.
    pub fn then<U, F>(&self, f: F) -> Result<Future<U>>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        self.then_impl(None, f)
    }

    /// Chains `f` on the value arm, on an explicit executor.
    ///
    /// # Errors
    ///
    /// As [`then`](Self::then), except `NoExecutor` cannot occur.
    pub fn then_on<U, F>(&self, exec: &ExecutorHandle, f: F) -> Result<Future<U>>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        self.then_impl(Some(Arc::clone(exec)), f)
    }

    /// Chains `f` on the value arm, claiming the value by move.
    ///
    /// Exclusive: no other claimer may be attached before or after.
    ///
    /// # Errors
    ///
    /// As [`then`](Self::then).
    pub fn then_take<U, F>(&self, f: F) -> Result<Future<U>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        self.then_take_impl(None, f)
    }

    /// Chains `f` on the value arm by move, on an explicit executor.
    ///
    /// # Errors
    ///
    /// As [`then_take`](Self::then_take), except `NoExecutor` cannot occur.
    pub fn then_take_on<U, F>(&self, exec: &ExecutorHandle, f: F) -> Result<Future<U>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        self.then_take_impl(Some(Arc::clone(exec)), f)
    }

    /// Recovers from the failure arm on the default executor.
    ///
    /// The derived future adopts an upstream success unchanged — the
    /// handler is never invoked for it. On an upstream failure, `f` maps
    /// the error to a replacement value (or to a new failure).
    ///
    /// # Errors
    ///
    /// As [`then`](Self::then), plus
    /// [`crate::ErrorKind::MultipleErrorContinuations`] if the failure slot
    /// is already occupied.
    pub fn on_error<F>(&self, f: F) -> Result<Future<T>>
    where
        T: Clone,
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        self.on_error_impl(None, f)
    }

    /// Recovers from the failure arm on an explicit executor.
    ///
    /// # Errors
    ///
    /// As [`on_error`](Self::on_error), except `NoExecutor` cannot occur.
    pub fn on_error_on<F>(&self, exec: &ExecutorHandle, f: F) -> Result<Future<T>>
    where
        T: Clone,
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        self.on_error_impl(Some(Arc::clone(exec)), f)
    }

    /// Recovers from the failure arm, claiming a passed-through value by
    /// move. Exclusive, like [`then_take`](Self::then_take).
    ///
    /// # Errors
    ///
    /// As [`on_error`](Self::on_error).
    pub fn on_error_take<F>(&self, f: F) -> Result<Future<T>>
    where
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        self.on_error_take_impl(None, f)
    }

    /// Recovers from the failure arm by move, on an explicit executor.
    ///
    /// # Errors
    ///
    /// As [`on_error_take`](Self::on_error_take), except `NoExecutor`
    /// cannot occur.
    pub fn on_error_take_on<F>(&self, exec: &ExecutorHandle, f: F) -> Result<Future<T>>
    where
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        self.on_error_take_impl(Some(Arc::clone(exec)), f)
    }

    fn then_impl<U, F>(&self, exec: Option<ExecutorHandle>, f: F) -> Result<Future<U>>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let upstream = Arc::clone(&self.state);
        let thunk: DeferredFn<U> = Box::new(move || match upstream.claim_clone() {
            Claimed::Value(value) => f(value),
            Claimed::Failure(error) => Err(error),
            Claimed::Gone => Err(drained()),
        });
        SharedState::derive(&self.state, exec, Position::Success, ClaimMode::Clone, thunk)
    }

    fn then_take_impl<U, F>(&self, exec: Option<ExecutorHandle>, f: F) -> Result<Future<U>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let upstream = Arc::clone(&self.state);
        let thunk: DeferredFn<U> = Box::new(move || match upstream.claim_take() {
            Claimed::Value(value) => f(value),
            Claimed::Failure(error) => Err(error),
            Claimed::Gone => Err(drained()),
        });
        SharedState::derive(&self.state, exec, Position::Success, ClaimMode::Move, thunk)
    }

    fn on_error_impl<F>(&self, exec: Option<ExecutorHandle>, f: F) -> Result<Future<T>>
    where
        T: Clone,
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        let upstream = Arc::clone(&self.state);
        let thunk: DeferredFn<T> = Box::new(move || match upstream.claim_clone() {
            Claimed::Value(value) => Ok(value),
            Claimed::Failure(error) => f(error),
            Claimed::Gone => Err(drained()),
        });
        SharedState::derive(&self.state, exec, Position::FailureSlot, ClaimMode::Clone, thunk)
    }

    fn on_error_take_impl<F>(&self, exec: Option<ExecutorHandle>, f: F) -> Result<Future<T>>
    where
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        let upstream = Arc::clone(&self.state);
        let thunk: DeferredFn<T> = Box::new(move || match upstream.claim_take() {
            Claimed::Value(value) => Ok(value),
            Claimed::Failure(error) => f(error),
            Claimed::Gone => Err(drained()),
        });
        SharedState::derive(&self.state, exec, Position::FailureSlot, ClaimMode::Move, thunk)
    }
}

fn drained() -> Error {
    Error::new(crate::error::ErrorKind::Spent)
        .with_context("value was drained before the continuation ran")
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        self.state.add_consumer();
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Drop for Future<T> {
    fn drop(&mut self) {
        self.state.release_consumer();
    }
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future").finish_non_exhaustive()
    }
}
