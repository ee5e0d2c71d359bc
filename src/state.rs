//! The shared rendezvous state between producers and consumers.
//!
//! One `SharedState` sits behind every future/task pair:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SHARED STATE                              │
//! │                                                                  │
//! │  PackagedTask (weak) ──run──► slot: Empty ─► Value | Failure     │
//! │                                │                                 │
//! │  Future (strong) ──then──────► entries ──settle──► batch ──────► │
//! │                  ──on_error──► failure entry        │            │
//! │                                                     ▼            │
//! │                                            executor.submit(...)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lock discipline
//!
//! All mutation happens under one mutex, except the two reference counters,
//! which are plain atomics. User code never runs under the lock: a deferred
//! function executes between two short critical sections (take-function /
//! settle), with a `running` flag keeping the state observably pending in
//! between, and settling collects the continuation batch under the lock but
//! dispatches it only after release.
//!
//! # Claim discipline
//!
//! Continuations read the settled value through one of two claim modes:
//! clone claims (any number may attach; each receives a clone unless it is
//! the last consumer standing, which takes the value by move) and move
//! claims (exclusive: attaching one alongside any other claimer fails with
//! [`ErrorKind::MultipleValueContinuations`]).

use crate::error::{Error, ErrorKind, PanicPayload, Result};
use crate::executor::{ExecutorHandle, Work};
use crate::future::Future;
use crate::task::PackagedTask;
use smallvec::SmallVec;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A deferred computation stored in a shared state until it runs.
pub(crate) type DeferredFn<T> = Box<dyn FnOnce() -> Result<T> + Send>;

/// A recorded scheduling callback; receives the state's captured scheduler
/// at fire time so executor resolution can stay lazy.
type EntryFn = Box<dyn FnOnce(Option<ExecutorHandle>) + Send>;

/// Which settle arms an entry subscribes to.
#[derive(Debug, Clone, Copy)]
struct Arms {
    value: bool,
    failure: bool,
}

impl Arms {
    /// Derived-future entries: the thunk adopts either outcome.
    const BOTH: Self = Self {
        value: true,
        failure: true,
    };
    /// Aggregation bookkeeping on the value arm only.
    const VALUE_ONLY: Self = Self {
        value: true,
        failure: false,
    };
    /// Aggregation bookkeeping on the failure arm only.
    const FAILURE_ONLY: Self = Self {
        value: false,
        failure: true,
    };
}

struct Entry {
    arms: Arms,
    /// Claim registered at attach time; released if the entry is bypassed
    /// without its claim ever running.
    claim: Option<ClaimMode>,
    run: EntryFn,
}

/// The three-way value slot.
pub(crate) enum Slot<T> {
    /// No outcome yet (pending), or drained after the last consumer's read.
    Empty,
    /// The producer's result.
    Value(T),
    /// A captured failure; re-raised to every reader.
    Failure(Error),
}

/// Outcome of a registered claim, observed by a continuation thunk.
pub(crate) enum Claimed<T> {
    /// The value, cloned or moved per the claim mode.
    Value(T),
    /// The stored failure.
    Failure(Error),
    /// The value was drained before this claim ran.
    Gone,
}

/// Where a derived continuation is recorded while the state is pending.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Position {
    /// The ordered success-continuation list.
    Success,
    /// The at-most-one failure-continuation slot.
    FailureSlot,
}

/// How a continuation will read the settled value.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ClaimMode {
    /// Clone unless last consumer; any number may attach.
    Clone,
    /// Move the value out; exclusive.
    Move,
}

struct Guts<T> {
    slot: Slot<T>,
    func: Option<DeferredFn<T>>,
    /// True while the deferred function executes outside the lock.
    running: bool,
    /// Executor captured when the producing task ran; the default for
    /// continuations attached without an explicit executor.
    scheduler: Option<ExecutorHandle>,
    entries: SmallVec<[Entry; 2]>,
    failure_entry: Option<Entry>,
    /// An exclusive move claim has been registered.
    move_claimed: bool,
    /// Number of clone claims registered.
    clone_claimers: usize,
}

impl<T> Guts<T> {
    fn is_settled(&self) -> bool {
        !matches!(self.slot, Slot::Empty)
    }

    fn is_pending(&self) -> bool {
        matches!(self.slot, Slot::Empty) && (self.func.is_some() || self.running)
    }

    /// A state is valid iff settled or pending; anything else is spent.
    fn is_valid(&self) -> bool {
        self.is_settled() || self.is_pending()
    }
}

/// The rendezvous object binding producers and consumers.
pub(crate) struct SharedState<T> {
    producers: AtomicUsize,
    consumers: AtomicUsize,
    guts: Mutex<Guts<T>>,
}

impl<T> SharedState<T> {
    fn with_guts(guts: Guts<T>) -> Arc<Self> {
        Arc::new(Self {
            producers: AtomicUsize::new(0),
            consumers: AtomicUsize::new(0),
            guts: Mutex::new(guts),
        })
    }

    /// Creates a pending state holding a deferred function.
    pub(crate) fn new_pending(func: DeferredFn<T>) -> Arc<Self> {
        Self::with_guts(Guts {
            slot: Slot::Empty,
            func: Some(func),
            running: false,
            scheduler: None,
            entries: SmallVec::new(),
            failure_entry: None,
            move_claimed: false,
            clone_claimers: 0,
        })
    }

    /// Creates a state already settled with a value.
    pub(crate) fn new_value(value: T) -> Arc<Self> {
        Self::with_guts(Guts {
            slot: Slot::Value(value),
            func: None,
            running: false,
            scheduler: None,
            entries: SmallVec::new(),
            failure_entry: None,
            move_claimed: false,
            clone_claimers: 0,
        })
    }

    /// Creates a state already settled with a failure.
    pub(crate) fn new_failure(error: Error) -> Arc<Self> {
        Self::with_guts(Guts {
            slot: Slot::Failure(error),
            func: None,
            running: false,
            scheduler: None,
            entries: SmallVec::new(),
            failure_entry: None,
            move_claimed: false,
            clone_claimers: 0,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Guts<T>> {
        self.guts.lock().expect("state lock poisoned")
    }

    pub(crate) fn add_producer(&self) {
        self.producers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_consumer(&self) {
        self.consumers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release_consumer(&self) {
        self.consumers.fetch_sub(1, Ordering::AcqRel);
    }

    #[cfg(test)]
    pub(crate) fn producer_count(&self) -> usize {
        self.producers.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::Acquire)
    }

    /// Drops a producer reference; the zero edge breaks the promise.
    pub(crate) fn release_producer(&self) {
        if self.producers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let settled = {
            let mut guts = self.lock();
            // Only a never-run function can be orphaned; a running task
            // still holds the producer handle that invoked it.
            if matches!(guts.slot, Slot::Empty) && guts.func.is_some() {
                tracing::debug!("last producer dropped while pending; breaking promise");
                guts.func = None;
                Some(self.settle_locked(&mut guts, Err(Error::new(ErrorKind::BrokenPromise))))
            } else {
                None
            }
        };
        if let Some((batch, inherited)) = settled {
            dispatch(batch, inherited);
        }
    }

    /// Runs the deferred function and settles the state.
    ///
    /// Captures `sched` as the state's default scheduler. A second call, or
    /// a call on a state with no function, is a no-op.
    pub(crate) fn execute(&self, sched: Option<ExecutorHandle>) {
        let func = {
            let mut guts = self.lock();
            let Some(func) = guts.func.take() else {
                tracing::trace!("deferred function already consumed; ignoring run");
                return;
            };
            guts.running = true;
            guts.scheduler = sched;
            func
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(func)) {
            Ok(result) => result,
            Err(payload) => Err(Error::panicked(PanicPayload::from_any(payload.as_ref()))),
        };

        let (batch, inherited) = {
            let mut guts = self.lock();
            guts.running = false;
            self.settle_locked(&mut guts, outcome)
        };
        dispatch(batch, inherited);
    }

    /// Settles a pending state with a failure without running its function.
    ///
    /// Used when a recorded continuation cannot be scheduled (no executor
    /// anywhere). No-op on settled or spent states.
    pub(crate) fn abandon(&self, error: Error) {
        let settled = {
            let mut guts = self.lock();
            if matches!(guts.slot, Slot::Empty) && guts.func.is_some() {
                guts.func = None;
                Some(self.settle_locked(&mut guts, Err(error)))
            } else {
                None
            }
        };
        if let Some((batch, inherited)) = settled {
            dispatch(batch, inherited);
        }
    }

    /// Writes the outcome and collects the continuation batch, in order.
    ///
    /// On a failure settle the failure entry fires first, then the recorded
    /// entries that subscribe to the failure arm; on a value settle the
    /// recorded entries fire in attachment order, then the failure entry if
    /// it passes values through. Entries for the other arm are dropped,
    /// which releases their derived tasks and any claim they registered.
    fn settle_locked(
        &self,
        guts: &mut Guts<T>,
        outcome: Result<T>,
    ) -> (Vec<EntryFn>, Option<ExecutorHandle>) {
        debug_assert!(guts.func.is_none() && !guts.running);
        let inherited = guts.scheduler.clone();
        let failed = outcome.is_err();
        match outcome {
            Ok(value) => {
                tracing::trace!("state settled: value");
                guts.slot = Slot::Value(value);
            }
            Err(error) => {
                tracing::debug!(error = %error, "state settled: failure");
                guts.slot = Slot::Failure(error);
            }
        }

        let entries = std::mem::take(&mut guts.entries);
        let failure_entry = guts.failure_entry.take();

        let mut batch = Vec::with_capacity(entries.len() + 1);
        let mut push_or_discard = |guts: &mut Guts<T>, entry: Entry| {
            let fires = if failed {
                entry.arms.failure
            } else {
                entry.arms.value
            };
            if fires {
                batch.push(entry.run);
            } else {
                Self::unregister_claim(guts, &self.consumers, entry.claim);
            }
        };

        if failed {
            if let Some(entry) = failure_entry {
                push_or_discard(guts, entry);
            }
            for entry in entries {
                push_or_discard(guts, entry);
            }
        } else {
            for entry in entries {
                push_or_discard(guts, entry);
            }
            if let Some(entry) = failure_entry {
                push_or_discard(guts, entry);
            }
        }
        (batch, inherited)
    }

    /// Undoes a claim registration whose continuation will never run.
    fn unregister_claim(guts: &mut Guts<T>, consumers: &AtomicUsize, claim: Option<ClaimMode>) {
        match claim {
            None => {}
            Some(ClaimMode::Clone) => {
                guts.clone_claimers = guts.clone_claimers.saturating_sub(1);
                consumers.fetch_sub(1, Ordering::AcqRel);
            }
            Some(ClaimMode::Move) => {
                guts.move_claimed = false;
                consumers.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Releases the claim of a recorded entry whose thunk was bypassed at
    /// fire time (no executor could be resolved).
    fn release_bypassed_claim(&self, mode: ClaimMode) {
        let mut guts = self.lock();
        Self::unregister_claim(&mut guts, &self.consumers, Some(mode));
    }
}

impl<T: Send + 'static> SharedState<T> {
    /// Non-destructive read for cloneable values.
    ///
    /// Moves the payload out (emptying the slot) only when this is the last
    /// consumer; otherwise clones. Failures are re-raised; a pending or
    /// drained slot reads as `None`.
    pub(crate) fn try_get(&self) -> Result<Option<T>>
    where
        T: Clone,
    {
        let mut guts = self.lock();
        match std::mem::replace(&mut guts.slot, Slot::Empty) {
            Slot::Empty => Ok(None),
            Slot::Failure(error) => {
                guts.slot = Slot::Failure(error.clone());
                Err(error)
            }
            Slot::Value(value) => {
                if self.consumers.load(Ordering::Acquire) > 1 {
                    let out = value.clone();
                    guts.slot = Slot::Value(value);
                    Ok(Some(out))
                } else {
                    Ok(Some(value))
                }
            }
        }
    }

    /// Destructive read: always moves the payload out.
    ///
    /// The second call observes `None`.
    pub(crate) fn try_take(&self) -> Result<Option<T>> {
        let mut guts = self.lock();
        match std::mem::replace(&mut guts.slot, Slot::Empty) {
            Slot::Empty => Ok(None),
            Slot::Failure(error) => {
                guts.slot = Slot::Failure(error.clone());
                Err(error)
            }
            Slot::Value(value) => Ok(Some(value)),
        }
    }

    /// Claim for a registered clone-mode continuation.
    pub(crate) fn claim_clone(&self) -> Claimed<T>
    where
        T: Clone,
    {
        let claimed = {
            let mut guts = self.lock();
            match std::mem::replace(&mut guts.slot, Slot::Empty) {
                Slot::Empty => Claimed::Gone,
                Slot::Failure(error) => {
                    guts.slot = Slot::Failure(error.clone());
                    Claimed::Failure(error)
                }
                Slot::Value(value) => {
                    if self.consumers.load(Ordering::Acquire) > 1 {
                        let out = value.clone();
                        guts.slot = Slot::Value(value);
                        Claimed::Value(out)
                    } else {
                        Claimed::Value(value)
                    }
                }
            }
        };
        self.release_consumer();
        claimed
    }

    /// Claim for a registered move-mode continuation.
    pub(crate) fn claim_take(&self) -> Claimed<T> {
        let claimed = {
            let mut guts = self.lock();
            match std::mem::replace(&mut guts.slot, Slot::Empty) {
                Slot::Empty => Claimed::Gone,
                Slot::Failure(error) => {
                    guts.slot = Slot::Failure(error.clone());
                    Claimed::Failure(error)
                }
                Slot::Value(value) => Claimed::Value(value),
            }
        };
        self.release_consumer();
        claimed
    }

    /// Returns the stored failure, if the state settled on the failure arm.
    pub(crate) fn stored_failure(&self) -> Option<Error> {
        match &self.lock().slot {
            Slot::Failure(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Creates a derived future whose task evaluates `thunk` once this
    /// state settles.
    ///
    /// On a settled state the chosen executor is resolved eagerly (explicit
    /// argument, else the captured scheduler, else the attach fails with
    /// [`ErrorKind::NoExecutor`]) and the derived task is submitted
    /// immediately. On a pending state a scheduling entry is recorded;
    /// executor resolution happens at fire time, and a missing executor
    /// settles the derived state to a `NoExecutor` failure instead,
    /// releasing the claim the bypassed thunk would have consumed.
    pub(crate) fn derive<U: Send + 'static>(
        this: &Arc<Self>,
        provided: Option<ExecutorHandle>,
        position: Position,
        mode: ClaimMode,
        thunk: DeferredFn<U>,
    ) -> Result<Future<U>> {
        let mut guts = this.lock();

        if !guts.is_valid() {
            return Err(Error::new(ErrorKind::Spent));
        }
        match mode {
            ClaimMode::Clone if guts.move_claimed => {
                return Err(Error::new(ErrorKind::MultipleValueContinuations));
            }
            ClaimMode::Move if guts.move_claimed || guts.clone_claimers > 0 => {
                return Err(Error::new(ErrorKind::MultipleValueContinuations));
            }
            _ => {}
        }

        let settled = guts.is_settled();
        if matches!(position, Position::FailureSlot) && !settled && guts.failure_entry.is_some() {
            return Err(Error::new(ErrorKind::MultipleErrorContinuations));
        }

        let immediate = if settled {
            let sched = provided
                .clone()
                .or_else(|| guts.scheduler.clone())
                .ok_or_else(|| Error::new(ErrorKind::NoExecutor))?;
            Some(sched)
        } else {
            None
        };

        // All checks passed; commit the claim registration.
        match mode {
            ClaimMode::Clone => guts.clone_claimers += 1,
            ClaimMode::Move => guts.move_claimed = true,
        }
        this.add_consumer();

        let derived = SharedState::new_pending(thunk);
        let task = PackagedTask::from_state(&derived);
        let future = Future::from_state(derived);

        if let Some(sched) = immediate {
            drop(guts);
            submit_task(task, &sched);
        } else {
            let upstream = Arc::clone(this);
            let entry = Entry {
                arms: Arms::BOTH,
                claim: Some(mode),
                run: Box::new(move |inherited| match provided.or(inherited) {
                    Some(sched) => submit_task(task, &sched),
                    None => {
                        // The thunk never runs, so its claim must not
                        // outlive it.
                        upstream.release_bypassed_claim(mode);
                        task.fail(Error::new(ErrorKind::NoExecutor));
                    }
                }),
            };
            match position {
                Position::Success => guts.entries.push(entry),
                Position::FailureSlot => guts.failure_entry = Some(entry),
            }
        }
        Ok(future)
    }

    /// Subscribes an inline watcher to the value arm.
    ///
    /// With `claims` set the watcher registers an exclusive move claim and
    /// is expected to call [`claim_take`](Self::claim_take) when it runs.
    /// If the state already settled with a value, the watcher runs before
    /// this returns; if it settled with a failure, the watcher is dropped.
    pub(crate) fn watch_value(&self, claims: bool, watcher: Work) -> Result<()> {
        let run_now = {
            let mut guts = self.lock();
            if !guts.is_valid() {
                return Err(Error::new(ErrorKind::Spent));
            }
            if claims && (guts.move_claimed || guts.clone_claimers > 0) {
                return Err(Error::new(ErrorKind::MultipleValueContinuations));
            }
            match &guts.slot {
                Slot::Failure(_) => None,
                Slot::Value(_) => {
                    if claims {
                        guts.move_claimed = true;
                        self.add_consumer();
                    }
                    Some(watcher)
                }
                Slot::Empty => {
                    if claims {
                        guts.move_claimed = true;
                        self.add_consumer();
                    }
                    guts.entries.push(Entry {
                        arms: Arms::VALUE_ONLY,
                        claim: claims.then_some(ClaimMode::Move),
                        run: Box::new(move |_| watcher()),
                    });
                    None
                }
            }
        };
        if let Some(watcher) = run_now {
            watcher();
        }
        Ok(())
    }

    /// Subscribes an inline watcher to the failure arm.
    ///
    /// Occupies the at-most-one failure slot while pending; a second
    /// subscription fails with [`ErrorKind::MultipleErrorContinuations`].
    /// If the state already settled with a failure, the watcher runs before
    /// this returns; if it settled with a value, the watcher is dropped.
    pub(crate) fn watch_failure(&self, watcher: Work) -> Result<()> {
        let run_now = {
            let mut guts = self.lock();
            if !guts.is_valid() {
                return Err(Error::new(ErrorKind::Spent));
            }
            match &guts.slot {
                Slot::Value(_) => None,
                Slot::Failure(_) => Some(watcher),
                Slot::Empty => {
                    if guts.failure_entry.is_some() {
                        return Err(Error::new(ErrorKind::MultipleErrorContinuations));
                    }
                    guts.failure_entry = Some(Entry {
                        arms: Arms::FAILURE_ONLY,
                        claim: None,
                        run: Box::new(move |_| watcher()),
                    });
                    None
                }
            }
        };
        if let Some(watcher) = run_now {
            watcher();
        }
        Ok(())
    }
}

/// Hands a derived task to an executor, which will run it with itself as
/// the captured scheduler.
fn submit_task<U: Send + 'static>(task: PackagedTask<U>, sched: &ExecutorHandle) {
    let on = Arc::clone(sched);
    sched.submit(Box::new(move || task.run_on(&on)));
}

/// Runs a continuation batch after the state lock has been released.
fn dispatch(batch: Vec<EntryFn>, inherited: Option<ExecutorHandle>) {
    if batch.is_empty() {
        return;
    }
    tracing::trace!(count = batch.len(), "dispatching continuation batch");
    for run in batch {
        run(inherited.clone());
    }
}
