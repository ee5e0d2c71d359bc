//! End-to-end scenarios for the `when_all` aggregation combinator.
//!
//! Drives aggregations over mixed-type inputs resolving across executors
//! and threads, under both exception policies.

use handover::{
    make_failed_future, make_ready_future, package, when_all, Error, ErrorKind, ExceptionPolicy,
    ExecutorHandle, QueueExecutor,
};
use std::sync::Arc;

mod common;

fn queue_pair() -> (Arc<QueueExecutor>, ExecutorHandle) {
    let queue = Arc::new(QueueExecutor::new());
    let exec: ExecutorHandle = queue.clone();
    (queue, exec)
}

#[test]
fn ready_inputs_of_mixed_types_join_immediately() {
    common::init_test_logging();
    let fut = when_all(ExceptionPolicy::Aggregate)
        .and(make_ready_future(1))
        .and(make_ready_future("a".to_string()))
        .and_unit(make_ready_future(()))
        .join()
        .expect("join");

    assert_eq!(fut.try_get().expect("ready"), Some((1, "a".to_string())));
}

#[test]
fn aggregate_collects_every_failure() {
    common::init_test_logging();
    let fut = when_all(ExceptionPolicy::Aggregate)
        .and(make_ready_future(1))
        .and(make_failed_future::<i32>(Error::msg("e1")))
        .and(make_failed_future::<i32>(Error::msg("e2")))
        .join()
        .expect("join");

    let err = fut.try_get().expect_err("failed");
    assert_eq!(err.kind(), ErrorKind::Aggregate);
    assert_eq!(err.aggregate_list().expect("list").len(), 2);
}

#[test]
fn pending_inputs_resolve_in_any_order() {
    common::init_test_logging();
    let a = package(|| Ok(10));
    let b = package(|| Ok("b".to_string()));
    let c = package(|| Ok(()));

    let fut = when_all(ExceptionPolicy::Aggregate)
        .and(a.future.clone())
        .and(b.future.clone())
        .and_unit(c.future.clone())
        .join()
        .expect("join");

    c.task.run();
    b.task.run();
    assert!(matches!(fut.try_get(), Ok(None)));
    a.task.run();

    assert_eq!(fut.try_get().expect("complete"), Some((10, "b".to_string())));
}

#[test]
fn inputs_resolved_on_worker_threads_complete_the_aggregate() {
    common::init_test_logging();
    let a = package(|| Ok(1));
    let b = package(|| Ok(2));

    let fut = when_all(ExceptionPolicy::Aggregate)
        .and(a.future.clone())
        .and(b.future.clone())
        .join()
        .expect("join");

    let workers: Vec<_> = [a.task.clone(), b.task.clone()]
        .into_iter()
        .map(|task| std::thread::spawn(move || task.run()))
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    assert_eq!(fut.try_get().expect("complete"), Some((1, 2)));
}

#[test]
fn mixed_failures_across_pending_inputs_are_all_counted() {
    common::init_test_logging();
    let good = package(|| Ok(5));
    let bad = package(|| Err::<i32, _>(Error::msg("late")));

    let fut = when_all(ExceptionPolicy::Aggregate)
        .and(good.future.clone())
        .and(bad.future.clone())
        .and(make_failed_future::<i32>(Error::msg("early")))
        .join()
        .expect("join");

    assert!(matches!(fut.try_get(), Ok(None)));
    good.task.run();
    bad.task.run();

    let err = fut.try_get().expect_err("failed");
    assert_eq!(err.aggregate_list().expect("list").len(), 2);
}

#[test]
fn abort_policy_fires_before_slow_inputs_resolve() {
    common::init_test_logging();
    let slow = package(|| Ok(1));

    let fut = when_all(ExceptionPolicy::AbortOnFirstFailure)
        .and(slow.future.clone())
        .and(make_failed_future::<i32>(Error::msg("fatal")))
        .join()
        .expect("join");

    let err = fut.try_get().expect_err("aborted");
    // The single offending error, not an aggregate list.
    assert_eq!(err.kind(), ErrorKind::User);
    assert!(err.aggregate_list().is_none());

    slow.task.run();
    assert!(fut.try_get().is_err());
}

#[test]
fn broken_promise_input_counts_as_a_failure() {
    common::init_test_logging();
    let abandoned = package(|| Ok(1));
    let fut = when_all(ExceptionPolicy::Aggregate)
        .and(abandoned.future.clone())
        .and(make_ready_future(2))
        .join()
        .expect("join");

    drop(abandoned.task);

    let err = fut.try_get().expect_err("failed");
    let list = err.aggregate_list().expect("list");
    assert_eq!(list.len(), 1);
    assert!(list.first().expect("entry").is_broken_promise());
}

#[test]
fn aggregate_future_chains_with_explicit_executors() {
    common::init_test_logging();
    let (queue, exec) = queue_pair();

    let fut = when_all(ExceptionPolicy::Aggregate)
        .and(make_ready_future(6))
        .and(make_ready_future(7))
        .join()
        .expect("join");

    // The aggregate settles with no captured scheduler; chaining requires
    // an explicit executor.
    let product = fut.then_on(&exec, |(a, b)| Ok(a * b)).expect("attach");
    queue.run_until_idle();
    assert_eq!(product.try_get().expect("settled"), Some(42));

    let err = fut.then(|_: (i32, i32)| Ok(0)).expect_err("no executor");
    assert_eq!(err.kind(), ErrorKind::NoExecutor);
}

#[test]
fn nested_aggregates_compose() {
    common::init_test_logging();
    let inner = when_all(ExceptionPolicy::Aggregate)
        .and(make_ready_future(1))
        .and(make_ready_future(2))
        .join()
        .expect("inner join");

    let outer = when_all(ExceptionPolicy::Aggregate)
        .and(inner)
        .and(make_ready_future(3))
        .join()
        .expect("outer join");

    assert_eq!(outer.try_get().expect("ready"), Some(((1, 2), 3)));
}
