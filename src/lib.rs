//! Handover: an executor-driven value-propagation core.
//!
//! # Overview
//!
//! Handover is a library of composable deferred computations. A
//! [`package`]d closure yields a producer handle ([`PackagedTask`]) and a
//! consumer handle ([`Future`]) bound to one shared state; running the task
//! settles the future, firing any continuations attached through
//! [`Future::then`] and [`Future::on_error`]. Work placement is always
//! explicit: continuations run on user-supplied [`Executor`]s, never on
//! threads the library owns.
//!
//! The model is strictly callback-based. There is no `async`/`await`, no
//! event loop, and no blocking wait: [`Future::try_get`] polls, `then`
//! chains, and [`when_all`] aggregates.
//!
//! # Core Guarantees
//!
//! - **Settle-once**: a state transitions exactly once to a value or a
//!   failure; task runs beyond the first are no-ops
//! - **No silent orphans**: dropping the last producer of a pending state
//!   settles it to a broken-promise failure, observable on the failure path
//! - **Ordered firing**: success continuations attached before settle fire
//!   in attachment order
//! - **Failure propagation**: a `then` chain adopts upstream failures
//!   unchanged; only `on_error` consumes one
//! - **Panic isolation**: a panicking user callable settles its state's
//!   failure arm instead of unwinding through the core
//!
//! # Module Structure
//!
//! - [`error`]: Typed errors, the aggregation error list, panic payloads
//! - [`executor`]: The executor trait plus inline and queued test drivers
//! - [`future`]: Consumer handle, ready/failed constructors
//! - [`task`]: Producer handle
//! - [`package`]: The task/future factory and `fmap`
//! - [`when_all`]: The aggregation combinator and its exception policies
//!
//! # Example
//!
//! ```
//! use handover::{package, QueueExecutor};
//! use std::sync::Arc;
//!
//! let queue = Arc::new(QueueExecutor::new());
//! let exec: handover::ExecutorHandle = queue.clone();
//!
//! let pair = package(|| Ok("hello".to_string()));
//! let shouted = pair
//!     .future
//!     .then_on(&exec, |s| Ok(s.to_uppercase()))
//!     .unwrap();
//!
//! pair.task.run_on(&exec);
//! queue.run_until_idle();
//! assert_eq!(shouted.try_get().unwrap().as_deref(), Some("HELLO"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod executor;
pub mod future;
pub mod package;
mod state;
pub mod task;
pub mod when_all;

// Re-exports for convenient access to core types
pub use error::{Error, ErrorKind, ErrorList, PanicPayload, Result, ResultExt};
pub use executor::{handle, Executor, ExecutorHandle, InlineExecutor, QueueExecutor, Work};
pub use future::{make_failed_future, make_ready_future, Future};
pub use package::{fmap, package, PackagePair};
pub use task::PackagedTask;
pub use when_all::{when_all, ExceptionPolicy, TuplePush, WhenAll};
