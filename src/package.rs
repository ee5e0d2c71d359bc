//! Factory: packages a deferred computation into a task/future pair.

use crate::error::Result;
use crate::future::Future;
use crate::state::SharedState;
use crate::task::PackagedTask;

/// A producer/consumer pair over one shared state.
///
/// Callers typically move the task to wherever the work should run and
/// retain the future.
#[derive(Debug)]
pub struct PackagePair<T> {
    /// The producer handle.
    pub task: PackagedTask<T>,
    /// The consumer handle.
    pub future: Future<T>,
}

/// Packages `f` into a task/future pair.
///
/// The shared state starts pending with producer and consumer counts of
/// one (the returned task and future). Running the task evaluates `f`
/// exactly once and settles the future with its result; a panic in `f`
/// settles the failure arm instead.
///
/// # Example
///
/// ```
/// use handover::package;
///
/// let pair = package(|| Ok(21 * 2));
/// pair.task.run();
/// assert_eq!(pair.future.try_get().unwrap(), Some(42));
/// ```
pub fn package<T, F>(f: F) -> PackagePair<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let state = SharedState::new_pending(Box::new(f));
    let task = PackagedTask::from_state(&state);
    let future = Future::from_state(state);
    PackagePair { task, future }
}

/// Maps a future's value through `f`: an alias for [`Future::then`].
///
/// # Errors
///
/// As [`Future::then`].
pub fn fmap<T, U, F>(future: &Future<T>, f: F) -> Result<Future<U>>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
    F: FnOnce(T) -> Result<U> + Send + 'static,
{
    future.then(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::executor::{handle, InlineExecutor};

    #[test]
    fn packaged_value_round_trips() {
        let pair = package(|| Ok(42));
        assert!(matches!(pair.future.try_get(), Ok(None)));

        pair.task.run();
        assert_eq!(pair.future.try_get().expect("settled"), Some(42));
        // Sole consumer: the first read drained the slot.
        assert!(matches!(pair.future.try_get(), Ok(None)));
    }

    #[test]
    fn packaged_error_settles_the_failure_arm() {
        let pair = package(|| Err::<i32, _>(Error::msg("boom")));
        pair.task.run();
        assert_eq!(
            pair.future.try_get().expect_err("failed").kind(),
            ErrorKind::User
        );
    }

    #[test]
    fn fmap_is_then() {
        let pair = package(|| Ok(6));
        let exec = handle(InlineExecutor::new());
        pair.task.run_on(&exec);

        let mapped = fmap(&pair.future, |x| Ok(x * 7)).expect("attach");
        assert_eq!(mapped.try_get().expect("settled"), Some(42));
    }
}
