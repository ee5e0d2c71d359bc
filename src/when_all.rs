//! Joins many futures into one future of their combined values.
//!
//! # Semantics
//!
//! `when_all` collects N inputs of possibly-mixed value types into a single
//! future of their tuple, with unit-typed inputs counted but elided from
//! the output:
//!
//! ```
//! use handover::{make_ready_future, when_all, ExceptionPolicy};
//!
//! let fut = when_all(ExceptionPolicy::Aggregate)
//!     .and(make_ready_future(1))
//!     .and(make_ready_future("a".to_string()))
//!     .and_unit(make_ready_future(()))
//!     .join()
//!     .unwrap();
//!
//! assert_eq!(fut.try_get().unwrap(), Some((1, "a".to_string())));
//! ```
//!
//! The aggregate completes only when every input has resolved — by value
//! *or* by failure — under [`ExceptionPolicy::Aggregate`], failing with an
//! [`ErrorList`] whose length equals the number of failed inputs. Under
//! [`ExceptionPolicy::AbortOnFirstFailure`] the first failure completes the
//! aggregate immediately with that single error and later results are
//! discarded.
//!
//! # Mechanics
//!
//! Each input gets two bookkeeping watchers: one on the value arm that
//! move-claims the payload into its slot, one on the failure arm that
//! records the error. Both decrement a remaining-count; the holder that
//! reaches zero (or the first failure, under abort) fires a held packaged
//! task that assembles the tuple. The watchers run inline, so joining
//! already-settled inputs needs no executor; the resulting future likewise
//! has no captured scheduler, so chain onto it with the explicit `*_on`
//! methods.

use crate::error::{Error, ErrorKind, ErrorList, Result};
use crate::future::Future;
use crate::package::{package, PackagePair};
use crate::state::Claimed;
use std::sync::{Arc, Mutex};

/// How an aggregation responds to failing inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionPolicy {
    /// Wait for every input; fail with the collected [`ErrorList`] if any
    /// input failed.
    Aggregate,
    /// Complete immediately on the first failure, with that single error;
    /// later results are discarded.
    AbortOnFirstFailure,
}

/// Grows a tuple type by one element; implemented for arities 0 through 7.
pub trait TuplePush<N> {
    /// The tuple with `N` appended.
    type Output;
    /// Appends `item` to the tuple.
    fn push(self, item: N) -> Self::Output;
}

macro_rules! impl_tuple_push {
    ($($t:ident),*) => {
        impl<$($t,)* N> TuplePush<N> for ($($t,)*) {
            type Output = ($($t,)* N,);
            #[allow(non_snake_case)]
            fn push(self, item: N) -> Self::Output {
                let ($($t,)*) = self;
                ($($t,)* item,)
            }
        }
    };
}

impl_tuple_push!();
impl_tuple_push!(T1);
impl_tuple_push!(T1, T2);
impl_tuple_push!(T1, T2, T3);
impl_tuple_push!(T1, T2, T3, T4);
impl_tuple_push!(T1, T2, T3, T4, T5);
impl_tuple_push!(T1, T2, T3, T4, T5, T6);
impl_tuple_push!(T1, T2, T3, T4, T5, T6, T7);

struct AggInner {
    remaining: usize,
    errors: ErrorList,
    fire: Option<Box<dyn FnOnce() + Send>>,
}

/// Shared bookkeeping between the input watchers and the held task.
struct AggCore {
    policy: ExceptionPolicy,
    inner: Mutex<AggInner>,
}

impl AggCore {
    /// Records one resolved input and fires the held task when the
    /// aggregate is complete.
    fn arrive(&self, failure: Option<Error>) {
        let fire = {
            let mut inner = self.inner.lock().expect("aggregate lock poisoned");
            let failed = failure.is_some();
            if let Some(error) = failure {
                tracing::trace!(error = %error, "aggregate input failed");
                inner.errors.push(error);
            }
            inner.remaining = inner.remaining.saturating_sub(1);
            let complete = inner.remaining == 0
                || (failed && matches!(self.policy, ExceptionPolicy::AbortOnFirstFailure));
            if complete {
                inner.fire.take()
            } else {
                tracing::trace!(remaining = inner.remaining, "aggregate input resolved");
                None
            }
        };
        if let Some(fire) = fire {
            tracing::trace!("aggregate complete; firing held task");
            fire();
        }
    }
}

type Attacher = Box<dyn FnOnce(&Arc<AggCore>) -> Result<()> + Send>;

/// Builder accumulating the inputs of a [`when_all`] aggregation.
///
/// `Out` is the output tuple assembled so far; [`and`](Self::and) grows it,
/// [`and_unit`](Self::and_unit) counts a unit input without growing it, and
/// [`join`](Self::join) produces the aggregate future.
pub struct WhenAll<Out> {
    policy: ExceptionPolicy,
    count: usize,
    attachers: Vec<Attacher>,
    collect: Box<dyn FnOnce() -> Result<Out> + Send>,
}

/// Starts an aggregation under the given policy.
///
/// With no inputs, [`WhenAll::join`] produces a ready unit future.
#[must_use]
pub fn when_all(policy: ExceptionPolicy) -> WhenAll<()> {
    WhenAll {
        policy,
        count: 0,
        attachers: Vec::new(),
        collect: Box::new(|| Ok(())),
    }
}

impl<Out: Send + 'static> WhenAll<Out> {
    /// Adds a value input; its payload joins the output tuple.
    ///
    /// The input is consumed and its value claimed by move when it
    /// resolves, so the input must not have other claimers attached —
    /// conflicts surface as errors from [`join`](Self::join).
    #[must_use]
    pub fn and<N>(mut self, input: Future<N>) -> WhenAll<<Out as TuplePush<N>>::Output>
    where
        N: Send + 'static,
        Out: TuplePush<N>,
        <Out as TuplePush<N>>::Output: Send + 'static,
    {
        let slot: Arc<Mutex<Option<N>>> = Arc::new(Mutex::new(None));
        let state = Arc::clone(input.state());

        let slot_store = Arc::clone(&slot);
        self.attachers.push(Box::new(move |core| {
            let on_value = Arc::clone(core);
            let claim_state = Arc::clone(&state);
            state.watch_value(
                true,
                Box::new(move || match claim_state.claim_take() {
                    Claimed::Value(value) => {
                        *slot_store.lock().expect("aggregate slot lock poisoned") = Some(value);
                        on_value.arrive(None);
                    }
                    Claimed::Failure(error) => on_value.arrive(Some(error)),
                    Claimed::Gone => on_value.arrive(Some(Error::new(ErrorKind::Spent))),
                }),
            )?;

            let on_failure = Arc::clone(core);
            let peek_state = Arc::clone(&state);
            state.watch_failure(Box::new(move || {
                let error = peek_state
                    .stored_failure()
                    .unwrap_or_else(|| Error::new(ErrorKind::Internal));
                on_failure.arrive(Some(error));
            }))?;
            Ok(())
        }));

        let prev = self.collect;
        WhenAll {
            policy: self.policy,
            count: self.count + 1,
            attachers: self.attachers,
            collect: Box::new(move || {
                let acc = prev()?;
                let value = slot
                    .lock()
                    .expect("aggregate slot lock poisoned")
                    .take()
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Internal)
                            .with_context("aggregate slot empty at fire")
                    })?;
                Ok(acc.push(value))
            }),
        }
    }

    /// Adds a unit input: counted towards completion, elided from the
    /// output tuple.
    #[must_use]
    pub fn and_unit(mut self, input: Future<()>) -> Self {
        let state = Arc::clone(input.state());
        self.attachers.push(Box::new(move |core| {
            let on_value = Arc::clone(core);
            state.watch_value(false, Box::new(move || on_value.arrive(None)))?;

            let on_failure = Arc::clone(core);
            let peek_state = Arc::clone(&state);
            state.watch_failure(Box::new(move || {
                let error = peek_state
                    .stored_failure()
                    .unwrap_or_else(|| Error::new(ErrorKind::Internal));
                on_failure.arrive(Some(error));
            }))?;
            Ok(())
        }));
        self.count += 1;
        self
    }

    /// Attaches the bookkeeping watchers and returns the aggregate future.
    ///
    /// If every input is already settled (including the zero-input case),
    /// the returned future is settled too.
    ///
    /// # Errors
    ///
    /// Attachment conflicts on the inputs: an input with another claimer
    /// ([`ErrorKind::MultipleValueContinuations`]), an occupied failure
    /// slot ([`ErrorKind::MultipleErrorContinuations`]), or a spent input
    /// ([`ErrorKind::Spent`]).
    pub fn join(self) -> Result<Future<Out>> {
        let Self {
            policy,
            count,
            attachers,
            collect,
        } = self;

        let core = Arc::new(AggCore {
            policy,
            inner: Mutex::new(AggInner {
                remaining: count,
                errors: ErrorList::new(),
                fire: None,
            }),
        });

        let task_core = Arc::clone(&core);
        let PackagePair { task, future } = package(move || {
            let errors = {
                let mut inner = task_core.inner.lock().expect("aggregate lock poisoned");
                std::mem::take(&mut inner.errors)
            };
            let first = errors.first().cloned();
            match (policy, first) {
                (_, None) => collect(),
                (ExceptionPolicy::Aggregate, Some(_)) => Err(Error::aggregate(errors)),
                (ExceptionPolicy::AbortOnFirstFailure, Some(error)) => Err(error),
            }
        });

        core.inner
            .lock()
            .expect("aggregate lock poisoned")
            .fire = Some(Box::new(move || task.run()));

        for attach in attachers {
            attach(&core)?;
        }

        // The zero-input aggregate never sees an arrival; fire it here.
        let fire = {
            let mut inner = core.inner.lock().expect("aggregate lock poisoned");
            if inner.remaining == 0 {
                inner.fire.take()
            } else {
                None
            }
        };
        if let Some(fire) = fire {
            fire();
        }

        Ok(future)
    }
}
