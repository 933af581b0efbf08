//! Universal engine invariants, exercised through the public API.

use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use adefer::test_utils::{expect_value, expect_values, init_test_logging, never};
use adefer::{
    constant, delay, synchronise, synchronise_with, when_all, when_any, CancelKind, ErrorKind,
    InterruptController, NodeState, Settlement, Step, SyncOptions, Value,
};

fn short() -> Duration {
    Duration::from_millis(20)
}

#[test]
fn every_node_settles_at_most_once() {
    init_test_logging();
    let winner_settlements = Rc::new(Cell::new(0_u32));
    let loser_settlements = Rc::new(Cell::new(0_u32));
    let winner_probe = Rc::clone(&winner_settlements);
    let loser_probe = Rc::clone(&loser_settlements);

    let result = synchronise(move || {
        let fast = delay(short())?.then(|_| Ok(Step::of(1_i32)))?;
        let slow = delay(Duration::from_secs(5))?.then(|_| Ok(Step::of(2_i32)))?;
        // Observers are FnOnce, so a double settlement would be a second
        // invocation the engine cannot even express; counting still guards
        // the teardown path re-cancelling terminal nodes.
        fast.watch(move |s| {
            assert!(s.is_fulfilled());
            winner_probe.set(winner_probe.get() + 1);
        })?;
        slow.watch(move |s| {
            assert!(s.is_cancelled());
            loser_probe.set(loser_probe.get() + 1);
        })?;
        when_any(&[fast, slow])
    });

    assert_eq!(expect_value::<i32>(result), 1);
    assert_eq!(winner_settlements.get(), 1);
    assert_eq!(loser_settlements.get(), 1);
}

#[test]
fn unconsumed_deferred_is_never_started() {
    init_test_logging();
    let result = synchronise(|| {
        let orphan = delay(Duration::from_millis(1))?;
        let root = delay(short())?.then(move |_| {
            // The orphan had ample wall-clock time; if it had been started
            // its timer would have fired by now.
            assert_eq!(orphan.state()?, NodeState::Pending);
            Ok(Step::of(true))
        })?;
        Ok(root)
    });
    assert!(expect_value::<bool>(result));
}

#[test]
fn long_then_chains_settle_iteratively() {
    init_test_logging();
    let result = synchronise(|| {
        let mut d = constant(0_i32)?;
        for _ in 0..2_000 {
            d = d.then(|v| {
                let n = v.extract::<i32>().expect("chain carries i32");
                Ok(Step::of(n + 1))
            })?;
        }
        Ok(d)
    });
    assert_eq!(expect_value::<i32>(result), 2_000);
}

#[test]
fn repeated_absorption_settles_iteratively() {
    init_test_logging();
    let result = synchronise(|| {
        let mut d = constant(0_i32)?;
        for _ in 0..500 {
            d = d.then(|v| {
                let n = v.extract::<i32>().expect("chain carries i32");
                Ok(Step::absorb(constant(n + 1)?))
            })?;
        }
        Ok(d)
    });
    assert_eq!(expect_value::<i32>(result), 500);
}

#[test]
fn constant_fulfils_with_its_value() {
    init_test_logging();
    let result = synchronise(|| constant("payload"));
    assert_eq!(expect_value::<&str>(result), "payload");
}

#[test]
fn when_all_orders_by_input_not_settlement() {
    init_test_logging();
    let result = synchronise(|| {
        let slowest = delay(Duration::from_millis(60))?.then(|_| Ok(Step::of(1_i32)))?;
        let fastest = delay(Duration::from_millis(10))?.then(|_| Ok(Step::of(2_i32)))?;
        let middle = delay(Duration::from_millis(30))?.then(|_| Ok(Step::of(3_i32)))?;
        when_all(&[slowest, fastest, middle])
    });
    assert_eq!(expect_values::<i32>(result), vec![1, 2, 3]);
}

#[test]
fn pending_siblings_are_cancelled_before_synchronise_returns() {
    init_test_logging();
    let sibling_cancelled = Rc::new(Cell::new(false));
    let probe = Rc::clone(&sibling_cancelled);

    let result = synchronise(move || {
        let fast = delay(short())?.then(|_| Ok(Step::of('w')))?;
        let hung = never()?;
        hung.watch(move |s| probe.set(s.is_cancelled()))?;
        when_any(&[fast, hung])
    });

    assert_eq!(expect_value::<char>(result), 'w');
    assert!(sibling_cancelled.get());
}

#[test]
fn shared_node_multicasts_one_outcome_to_every_child() {
    init_test_logging();
    let invocations = Rc::new(Cell::new(0_u32));

    let result = synchronise(|| {
        let base = constant(10_i32)?.share()?;
        let children: Vec<_> = (0..3)
            .map(|offset| {
                let counter = Rc::clone(&invocations);
                base.then(move |v| {
                    counter.set(counter.get() + 1);
                    let n = v.extract::<i32>().expect("shared payload is i32");
                    Ok(Step::of(n + offset))
                })
            })
            .collect::<adefer::Result<_>>()?;
        when_all(&children)
    });

    assert_eq!(expect_values::<i32>(result), vec![10, 11, 12]);
    assert_eq!(invocations.get(), 3, "exactly one invocation per child");
}

#[test]
fn shared_race_loser_keeps_strongest_cancel_reason() {
    init_test_logging();
    let seen_kind = Rc::new(Cell::new(None));
    let probe = Rc::clone(&seen_kind);

    let result = synchronise(move || {
        let base = never()?.share()?;
        base.watch(move |settlement| {
            if let Settlement::Cancelled(reason) = settlement {
                probe.set(Some(reason.kind()));
            }
        })?;
        let fast = delay(short())?.then(|_| Ok(Step::of('w')))?;
        when_any(&[fast, base])
    });

    assert_eq!(expect_value::<char>(result), 'w');
    // The race loss only records a request on the shared node; the
    // teardown sweep settles it, and its stronger reason wins.
    assert_eq!(seen_kind.get(), Some(CancelKind::RootSettled));
}

#[test]
fn cross_barrier_use_is_refused() {
    init_test_logging();
    let result = synchronise(|| {
        let outer = constant(1_i32)?;
        constant(())?.then(move |_| {
            let inner = synchronise(|| {
                let err = outer
                    .then(|v| Ok(Step::from_value(v)))
                    .expect_err("operation on a foreign deferred must fail");
                assert_eq!(err.kind(), ErrorKind::CrossBarrier);
                constant('i')
            })?;
            Ok(Step::from_value(inner))
        })
    });
    assert_eq!(expect_value::<char>(result), 'i');
}

#[test]
fn operations_require_an_active_barrier() {
    init_test_logging();
    let err = constant(1_i32).expect_err("no barrier is active");
    assert_eq!(err.kind(), ErrorKind::CrossBarrier);
}

#[test]
fn join_payload_is_a_value_vector() {
    init_test_logging();
    let result = synchronise(|| {
        let a = constant(1_i32)?;
        let b = constant("two")?;
        when_all(&[a, b])
    })
    .expect("mixed join fulfils");
    let items = result.extract::<Vec<Value>>().expect("vector payload");
    assert_eq!(items[0].extract::<i32>(), Some(1));
    assert_eq!(items[1].extract::<&str>(), Some("two"));
}

#[test]
fn interrupt_cancels_the_root_and_surfaces_interrupted() {
    init_test_logging();
    let controller = InterruptController::new();
    let handle = controller.handle();

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.interrupt();
    });

    let result = synchronise_with(SyncOptions::new().with_interrupt(controller), || {
        delay(Duration::from_secs(30))
    });

    trigger.join().expect("trigger thread");
    let err = result.expect_err("interrupt must fail the barrier");
    assert_eq!(err.kind(), ErrorKind::Interrupted);
}
