//! Combinator semantics: catch filtering, finally outcomes, quorums,
//! aggregate failures, and the timeout composition pattern.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use adefer::test_utils::{expect_value, expect_values, init_test_logging, never};
use adefer::{
    constant, delay, rejected, run_command, synchronise, when_all, when_any, when_some,
    AllFailed, CommandSpec, Error, ErrorKind, ProcessOutput, Step, WorkerPool,
};

fn short() -> Duration {
    Duration::from_millis(20)
}

#[test]
fn catch_kinds_only_handles_matching_kinds() {
    init_test_logging();
    let result = synchronise(|| {
        rejected(Error::new(ErrorKind::Timeout))?
            .catch_kinds(&[ErrorKind::User], |_| Ok(Step::of("wrong handler")))?
            .catch_kinds(&[ErrorKind::Timeout], |_| Ok(Step::of("timeout handler")))
    });
    assert_eq!(expect_value::<&str>(result), "timeout handler");
}

#[test]
fn catch_passes_fulfilment_through_unchanged() {
    init_test_logging();
    let result = synchronise(|| {
        constant(5_i32)?.catch(|_| Ok(Step::of(0_i32)))
    });
    assert_eq!(expect_value::<i32>(result), 5);
}

#[test]
fn cancelled_settlements_expose_a_cancelled_error_face() {
    init_test_logging();
    let seen_kind = Rc::new(Cell::new(None));
    let probe = Rc::clone(&seen_kind);

    let result = synchronise(move || {
        let fast = delay(short())?.then(|_| Ok(Step::of(1_i32)))?;
        let hung = never()?;
        hung.watch(move |settlement| {
            probe.set(settlement.as_error().map(|e| e.kind()));
        })?;
        when_any(&[fast, hung])
    });

    assert_eq!(expect_value::<i32>(result), 1);
    assert_eq!(seen_kind.get(), Some(ErrorKind::Cancelled));
}

#[test]
fn finally_runs_on_both_outcomes_and_preserves_them() {
    init_test_logging();
    let ran = Rc::new(Cell::new(0_u32));

    let ok_probe = Rc::clone(&ran);
    let ok = synchronise(move || {
        constant(7_i32)?.finally(move || {
            ok_probe.set(ok_probe.get() + 1);
            Ok(Step::of("discarded"))
        })
    });
    assert_eq!(expect_value::<i32>(ok), 7);

    let err_probe = Rc::clone(&ran);
    let err = synchronise(move || {
        rejected(Error::user("broken"))?.finally(move || {
            err_probe.set(err_probe.get() + 1);
            Ok(Step::of("discarded"))
        })
    });
    let err = err.expect_err("parent rejection survives finally");
    assert_eq!(err.kind(), ErrorKind::User);
    assert_eq!(ran.get(), 2);
}

#[test]
fn finally_error_replaces_parent_outcome() {
    init_test_logging();
    let result = synchronise(|| {
        constant(7_i32)?.finally(|| Err(Error::user("cleanup failed")))
    });
    let err = result.expect_err("finally error wins");
    assert_eq!(err.kind(), ErrorKind::User);
    assert!(err.to_string().contains("cleanup failed"));
}

#[test]
fn finally_absorbing_rejecting_deferred_replaces_outcome() {
    init_test_logging();
    let result = synchronise(|| {
        constant(7_i32)?.finally(|| Ok(Step::absorb(rejected(Error::user("late failure"))?)))
    });
    let err = result.expect_err("rejecting deferred from finally wins");
    assert!(err.to_string().contains("late failure"));
}

#[test]
fn finally_absorbing_fulfilling_deferred_keeps_parent_outcome() {
    init_test_logging();
    let result = synchronise(|| {
        constant(7_i32)?.finally(|| Ok(Step::absorb(constant("ignored")?)))
    });
    assert_eq!(expect_value::<i32>(result), 7);
}

#[test]
fn when_some_fulfils_in_settlement_order() {
    init_test_logging();
    let result = synchronise(|| {
        let slow = delay(Duration::from_millis(80))?.then(|_| Ok(Step::of(1_i32)))?;
        let fast = delay(Duration::from_millis(10))?.then(|_| Ok(Step::of(2_i32)))?;
        let middle = delay(Duration::from_millis(30))?.then(|_| Ok(Step::of(3_i32)))?;
        when_some(2, &[slow, fast, middle])
    });
    assert_eq!(expect_values::<i32>(result), vec![2, 3]);
}

#[test]
fn when_some_rejects_once_quorum_is_impossible() {
    init_test_logging();
    let result = synchronise(|| {
        let ok = constant(1_i32)?;
        let bad1 = rejected(Error::user("a"))?;
        let bad2 = rejected(Error::user("b"))?;
        when_some(2, &[ok, bad1, bad2])
    });
    let err = result.expect_err("two branches cannot fulfil");
    assert_eq!(err.kind(), ErrorKind::Insufficient);
}

#[test]
fn when_some_construction_edge_cases() {
    init_test_logging();
    let empty = synchronise(|| when_some(0, &[]));
    assert!(expect_values::<i32>(empty).is_empty());

    let impossible = synchronise(|| {
        let only = constant(1_i32)?;
        when_some(2, &[only])
    });
    assert_eq!(
        impossible.expect_err("quorum larger than input").kind(),
        ErrorKind::Insufficient
    );
}

#[test]
fn when_any_exhaustion_aggregates_causes_in_index_order() {
    init_test_logging();
    let result = synchronise(|| {
        let a = rejected(Error::user("first"))?;
        let b = rejected(Error::user("second"))?;
        when_any(&[a, b])
    });
    let err = result.expect_err("every branch rejected");
    assert_eq!(err.kind(), ErrorKind::AllFailed);

    let source = std::error::Error::source(&err).expect("aggregate attached");
    let aggregate = source
        .downcast_ref::<AllFailed>()
        .expect("source is the aggregate");
    let messages: Vec<String> = aggregate.errors().iter().map(ToString::to_string).collect();
    assert_eq!(messages, vec!["user: first", "user: second"]);
}

#[test]
fn when_all_rejects_with_first_failure_and_cancels_siblings() {
    init_test_logging();
    let sibling_cancelled = Rc::new(Cell::new(false));
    let probe = Rc::clone(&sibling_cancelled);

    let result = synchronise(move || {
        let failing = delay(short())?.then(|_| Err(Error::user("boom")))?;
        let pending = never()?;
        pending.watch(move |s| probe.set(s.is_cancelled()))?;
        when_all(&[failing, pending])
    });

    let err = result.expect_err("join rejects with the first failure");
    assert_eq!(err.kind(), ErrorKind::User);
    assert!(sibling_cancelled.get());
}

#[test]
fn empty_joins_settle_at_construction() {
    init_test_logging();
    let all = synchronise(|| when_all(&[]));
    assert!(expect_values::<i32>(all).is_empty());

    let any = synchronise(|| when_any(&[]));
    assert_eq!(
        any.expect_err("nothing to race").kind(),
        ErrorKind::AllFailed
    );
}

#[test]
fn timeout_pattern_produces_timeout_kind() {
    init_test_logging();

    struct TimedOut;

    let result = synchronise(|| {
        let op = never()?;
        let fuse = delay(short())?.then(|_| Ok(Step::of(TimedOut)))?;
        when_any(&[op, fuse])?.then(|v| {
            if v.is::<TimedOut>() {
                Ok(Step::absorb(rejected(
                    Error::new(ErrorKind::Timeout).with_context("operation timed out"),
                )?))
            } else {
                Ok(Step::from_value(v))
            }
        })
    });

    let err = result.expect_err("fuse fired first");
    assert!(err.is_timeout());
}

#[test]
fn worker_pool_jobs_settle_through_the_wakeup_channel() {
    init_test_logging();
    let pool = WorkerPool::new(2);
    let result = synchronise(|| {
        pool.call(|| Ok::<_, Error>(6_i32 * 7))?.then(|v| {
            let n = v.extract::<i32>().expect("worker payload");
            Ok(Step::of(n))
        })
    });
    assert_eq!(expect_value::<i32>(result), 42);
}

#[test]
fn process_source_captures_output() {
    init_test_logging();
    let result = synchronise(|| {
        run_command(CommandSpec::new("sh").arg("-c").arg("printf barrier"))
    })
    .expect("process fulfils");
    let output = result.extract::<ProcessOutput>().expect("process payload");
    assert!(output.success());
    assert_eq!(output.stdout, b"barrier");
}

#[test]
fn process_spawn_failure_rejects() {
    init_test_logging();
    let result = synchronise(|| {
        run_command(CommandSpec::new("adefer-definitely-missing-binary"))
    });
    let err = result.expect_err("spawn fails");
    assert_eq!(err.kind(), ErrorKind::User);
}
