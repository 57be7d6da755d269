//! Integration Tests for Reactive System
//!
//! These tests verify that cells, memos, effects, scopes and selectors work
//! together correctly through the public API.

use std::cell::{Cell as Counter, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use proptest::prelude::*;
use ripple_core::{Cell, Error, HalfEdge, Memo, MemoState, Runtime, RuntimeConfig};

fn counter() -> Rc<Counter<usize>> {
    Rc::new(Counter::new(0))
}

fn bump(counter: &Counter<usize>) {
    counter.set(counter.get() + 1);
}

/// Test that a batch of writes recomputes a derivation exactly once.
#[test]
fn batched_writes_recompute_once() {
    let rt = Runtime::new();
    let calls = counter();
    let ((), _scope) = rt.create_scope(|| {
        let a = rt.create_cell(2);
        let b = rt.create_cell(3);
        let c = rt
            .create_memo({
                let (a, b, calls) = (a.clone(), b.clone(), calls.clone());
                move || {
                    bump(&calls);
                    a.get() * b.get()
                }
            })
            .unwrap();

        assert_eq!(c.get(), 6);
        assert_eq!(calls.get(), 1);

        rt.batch(|| {
            a.set(3);
            b.set(4);
        });
        assert_eq!(c.get(), 12);
        assert_eq!(calls.get(), 2);
    });
}

/// Test that dependencies follow the branch actually taken.
#[test]
fn conditional_dependencies_are_pruned() {
    let rt = Runtime::new();
    let calls = counter();
    let ((), _scope) = rt.create_scope(|| {
        let cond = rt.create_cell(true);
        let x = rt.create_cell(1);
        let y = rt.create_cell(2);
        let d = rt
            .create_memo({
                let (cond, x, y, calls) = (cond.clone(), x.clone(), y.clone(), calls.clone());
                move || {
                    bump(&calls);
                    if cond.get() {
                        x.get()
                    } else {
                        y.get()
                    }
                }
            })
            .unwrap();
        // Observe `d` so it is recomputed eagerly on every change.
        rt.create_effect({
            let d = d.clone();
            move || {
                d.get();
            }
        })
        .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(y.subscriber_count(), 0);

        y.set(20);
        assert_eq!(calls.get(), 1);

        cond.set(false);
        assert_eq!(calls.get(), 2);
        assert_eq!(d.get(), 20);
        assert_eq!(x.subscriber_count(), 0);
        assert_eq!(y.subscriber_count(), 1);

        y.set(30);
        assert_eq!(calls.get(), 3);
        assert_eq!(d.get(), 30);
    });
}

/// Test that a selection change re-runs only the consumers of the two keys
/// whose membership flipped.
#[test]
fn selector_flips_exactly_two_keys() {
    let rt = Runtime::new();
    let runs: Vec<Rc<Counter<usize>>> = (0..5).map(|_| counter()).collect();
    let ((), _scope) = rt.create_scope(|| {
        let selected = rt.create_cell(1);
        let selector = rt
            .create_selector({
                let selected = selected.clone();
                move || selected.get()
            })
            .unwrap();

        let states = Rc::new(RefCell::new(vec![false; 5]));
        for key in 0..5 {
            let (selector, runs, states) = (selector.clone(), runs[key].clone(), states.clone());
            rt.create_effect(move || {
                let selected = selector.is_selected(&key);
                states.borrow_mut()[key] = selected;
                bump(&runs);
            })
            .unwrap();
        }
        assert_eq!(*states.borrow(), vec![false, true, false, false, false]);

        selected.set(2);
        assert_eq!(*states.borrow(), vec![false, false, true, false, false]);
        let counts: Vec<usize> = runs.iter().map(|r| r.get()).collect();
        assert_eq!(counts, vec![1, 2, 2, 1, 1]);
        assert_eq!(selector.tracked_keys(), vec![0, 1, 2, 3, 4]);
    });
}

/// Test that evicted selector entries are removed only after the flush.
#[test]
fn selector_evicts_after_flush() {
    let rt = Runtime::new();
    let ((), _scope) = rt.create_scope(|| {
        let selector = rt.create_selector(|| 0).unwrap();
        let show = rt.create_cell(true);
        rt.create_effect({
            let (selector, show) = (selector.clone(), show.clone());
            move || {
                if show.get() {
                    selector.is_selected(&7);
                }
            }
        })
        .unwrap();
        assert_eq!(selector.tracked_keys(), vec![7]);

        rt.batch(|| {
            show.set(false);
            assert_eq!(selector.tracked_keys(), vec![7]);
        });
        assert!(selector.tracked_keys().is_empty());
        assert_eq!(rt.deferred_len(), 0);
    });
}

/// Test that an empty batch performs no work.
#[test]
fn empty_batch_is_free() {
    let rt = Runtime::new();
    let ((), _scope) = rt.create_scope(|| {
        let a = rt.create_cell(1);
        rt.create_effect(move || {
            a.get();
        })
        .unwrap();

        let before = rt.stats();
        rt.batch(|| {});
        assert_eq!(rt.stats(), before);
    });
}

/// Test that writing the current value does nothing.
#[test]
fn equal_write_is_noop() {
    let rt = Runtime::new();
    let runs = counter();
    let ((), _scope) = rt.create_scope(|| {
        let a = rt.create_cell(5);
        rt.create_effect({
            let (a, runs) = (a.clone(), runs.clone());
            move || {
                a.get();
                bump(&runs);
            }
        })
        .unwrap();

        a.set(5);
        assert_eq!(runs.get(), 1);
        assert_eq!(rt.stats().pending, 0);
    });
}

/// Test that a diamond never exposes a mix of old and new values.
#[test]
fn diamond_is_glitch_free() {
    let rt = Runtime::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let d_calls = counter();
    let ((), _scope) = rt.create_scope(|| {
        let a = rt.create_cell(1);
        let b = rt
            .create_memo({
                let a = a.clone();
                move || a.get() + 1
            })
            .unwrap();
        let c = rt
            .create_memo({
                let a = a.clone();
                move || a.get() * 2
            })
            .unwrap();
        let d = rt
            .create_memo({
                let d_calls = d_calls.clone();
                move || {
                    bump(&d_calls);
                    (b.get(), c.get())
                }
            })
            .unwrap();
        rt.create_effect({
            let seen = seen.clone();
            move || seen.borrow_mut().push(d.get())
        })
        .unwrap();

        a.set(5);
        a.set(10);
    });

    assert_eq!(*seen.borrow(), vec![(2, 2), (6, 10), (11, 20)]);
    assert_eq!(d_calls.get(), 3);
}

/// Test that derivations run in height order within one flush.
#[test]
fn recomputation_follows_height_order() {
    let rt = Runtime::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let ((), _scope) = rt.create_scope(|| {
        let source = rt.create_cell(0);
        let log = |name: &'static str| {
            let order = order.clone();
            move || order.borrow_mut().push(name)
        };

        let low = rt
            .create_memo({
                let (source, log) = (source.clone(), log("low"));
                move || {
                    log();
                    source.get()
                }
            })
            .unwrap();
        let high = rt
            .create_memo({
                let (low, log) = (low.clone(), log("high"));
                move || {
                    log();
                    low.get() + 1
                }
            })
            .unwrap();
        // Reads the deeper node first, then the shallower one.
        rt.create_effect({
            let (low, high, log) = (low.clone(), high.clone(), log("effect"));
            move || {
                log();
                high.get();
                low.get();
            }
        })
        .unwrap();
        assert_eq!(high.height().unwrap(), 2);

        order.borrow_mut().clear();
        source.set(1);
        assert_eq!(*order.borrow(), vec!["low", "high", "effect"]);
    });
}

/// Test that a read in the middle of a batch is consistent and the
/// resolved node is not recomputed again by the closing flush.
#[test]
fn mid_batch_read_resolves_out_of_band() {
    let rt = Runtime::new();
    let sum_calls = counter();
    let effect_runs = counter();
    let ((), _scope) = rt.create_scope(|| {
        let a = rt.create_cell(1);
        let b = rt
            .create_memo({
                let a = a.clone();
                move || a.get() + 1
            })
            .unwrap();
        let c = rt
            .create_memo({
                let a = a.clone();
                move || a.get() * 2
            })
            .unwrap();
        let sum = rt
            .create_memo({
                let sum_calls = sum_calls.clone();
                move || {
                    bump(&sum_calls);
                    b.get() + c.get()
                }
            })
            .unwrap();
        rt.create_effect({
            let (sum, effect_runs) = (sum.clone(), effect_runs.clone());
            move || {
                sum.get();
                bump(&effect_runs);
            }
        })
        .unwrap();
        assert_eq!(sum_calls.get(), 1);

        rt.batch(|| {
            a.set(10);
            assert_eq!(sum.state(), MemoState::Clean);
            assert_eq!(sum.get(), 31);
            assert_eq!(sum_calls.get(), 2);
            assert_eq!(effect_runs.get(), 1);
        });
        assert_eq!(sum_calls.get(), 2);
        assert_eq!(effect_runs.get(), 2);
    });
}

/// Test that a panicking compute keeps the old value and leaves the runtime
/// usable.
#[test]
fn compute_panic_is_contained() {
    let rt = Runtime::new();
    let ((), _scope) = rt.create_scope(|| {
        let input = rt.create_cell(1);
        let checked = rt
            .create_memo({
                let input = input.clone();
                move || {
                    let n = input.get();
                    if n < 0 {
                        panic!("negative input");
                    }
                    n
                }
            })
            .unwrap();
        assert_eq!(checked.get(), 1);

        input.set(-1);
        let result = panic::catch_unwind(AssertUnwindSafe(|| checked.get()));
        assert!(result.is_err());
        assert_eq!(checked.state(), MemoState::Dirty);
        assert!(!rt.is_tracking());
        assert_eq!(rt.batch_depth(), 0);

        input.set(4);
        assert_eq!(checked.get(), 4);
    });
}

/// Test that a panic inside an effect aborts the flush without losing the
/// rest of the queued work.
#[test]
fn effect_panic_keeps_remaining_work_queued() {
    let rt = Runtime::new();
    let seen = counter();
    let ((), _scope) = rt.create_scope(|| {
        let a = rt.create_cell(0);
        rt.create_effect({
            let a = a.clone();
            move || {
                if a.get() == 1 {
                    panic!("effect failed");
                }
            }
        })
        .unwrap();
        let deep = rt
            .create_memo({
                let a = a.clone();
                move || a.get()
            })
            .unwrap();
        rt.create_effect({
            let seen = seen.clone();
            move || seen.set(deep.get())
        })
        .unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| a.set(1)));
        assert!(result.is_err());
        assert!(rt.stats().pending > 0);

        rt.stabilize().unwrap();
        assert_eq!(seen.get(), 1);
        assert_eq!(rt.stats().pending, 0);
    });
}

/// Test that re-reading a dependency after a nested recomputation that also
/// read it does not link it twice.
#[test]
fn repeated_read_around_nested_recompute_links_once() {
    let rt = Runtime::new();
    let seen = counter();
    let ((), _scope) = rt.create_scope(|| {
        let a = rt.create_cell(1);
        let n = rt
            .create_memo({
                let a = a.clone();
                move || a.get() + 1
            })
            .unwrap();
        let m = rt
            .create_memo({
                let (a, n) = (a.clone(), n.clone());
                move || a.get() + n.get() + a.get()
            })
            .unwrap();
        rt.create_effect({
            let (m, seen) = (m.clone(), seen.clone());
            move || seen.set(m.get() as usize)
        })
        .unwrap();
        assert_eq!(seen.get(), 4);
        assert_eq!(a.subscriber_count(), 2);
        assert_eq!(rt.stats().edges, 4);

        a.set(2);
        assert_eq!(seen.get(), 7);
        assert_eq!(a.subscriber_count(), 2);
        assert_eq!(rt.stats().edges, 4);
    });
}

/// Test that a half edge keeps its side effects current for a subscriber
/// without re-running the subscriber.
#[test]
fn half_edge_updates_without_waking_subscriber() {
    let rt = Runtime::new();
    let mirror = Rc::new(RefCell::new(Vec::new()));
    let reader_runs = counter();
    let ((), _scope) = rt.create_scope(|| {
        let source = rt.create_cell(1);
        let edge: HalfEdge = rt
            .create_half_edge({
                let (source, mirror) = (source.clone(), mirror.clone());
                move || mirror.borrow_mut().push(source.get())
            })
            .unwrap();
        rt.create_effect({
            let (edge, reader_runs) = (edge.clone(), reader_runs.clone());
            move || {
                edge.trigger();
                bump(&reader_runs);
            }
        })
        .unwrap();

        source.set(2);
        source.set(3);
        assert_eq!(*mirror.borrow(), vec![1, 2, 3]);
        assert_eq!(reader_runs.get(), 1);
        assert_eq!(edge.run_count().unwrap(), 3);
    });
}

/// Test that creation outside a scope is rejected.
#[test]
fn creation_outside_scope_fails() {
    let rt = Runtime::new();
    assert_eq!(
        rt.create_memo(|| 1).err(),
        Some(Error::NoOwner { operation: "create_memo" })
    );
    assert_eq!(
        rt.create_effect(|| {}).err(),
        Some(Error::NoOwner { operation: "create_effect" })
    );
    assert_eq!(
        rt.create_half_edge(|| {}).err(),
        Some(Error::NoOwner { operation: "create_half_edge" })
    );
    assert_eq!(
        rt.on_cleanup(|| {}),
        Err(Error::NoOwner { operation: "on_cleanup" })
    );
    assert_eq!(rt.stats().nodes, 0);
}

/// Test that a derivation reading itself reports a cycle.
#[test]
fn self_read_is_a_cycle() {
    let rt = Runtime::new();
    let ((), _scope) = rt.create_scope(|| {
        let slot: Rc<RefCell<Option<Memo<i32>>>> = Rc::new(RefCell::new(None));
        let errors = Rc::new(RefCell::new(Vec::new()));
        let me = rt
            .create_memo({
                let (slot, errors) = (slot.clone(), errors.clone());
                move || match slot.borrow().as_ref().map(|me| me.try_get()) {
                    Some(Err(err)) => {
                        errors.borrow_mut().push(err);
                        -1
                    }
                    Some(Ok(n)) => n + 1,
                    None => 0,
                }
            })
            .unwrap();
        *slot.borrow_mut() = Some(me.clone());

        assert_eq!(me.get(), -1);
        assert_eq!(*errors.borrow(), vec![Error::Cycle(me.id())]);
        slot.borrow_mut().take();
    });
}

/// Test that exceeding the configured height is reported.
#[test]
fn height_limit_is_reported() {
    let config = RuntimeConfig {
        initial_heap_capacity: 4,
        max_height: 3,
    };
    let rt = Runtime::with_config(config).unwrap();
    let ((), _scope) = rt.create_scope(|| {
        let source = rt.create_cell(0);
        let mut top = rt
            .create_memo({
                let source = source.clone();
                move || source.get()
            })
            .unwrap();
        for _ in 0..2 {
            let below = top.clone();
            top = rt.create_memo(move || below.get() + 1).unwrap();
        }
        assert_eq!(top.get(), 2);
        assert_eq!(top.height().unwrap(), 3);

        let below = top.clone();
        let too_deep = rt.create_memo(move || below.get() + 1).unwrap();
        assert!(matches!(
            too_deep.try_get(),
            Err(Error::HeightLimit { limit: 3, .. })
        ));
    });
}

/// Test that disposing a scope tears down everything created in it.
#[test]
fn scope_disposal_is_transitive() {
    let rt = Runtime::new();
    let cleanups = Rc::new(RefCell::new(Vec::new()));
    let runs = counter();

    let (source, scope) = rt.create_scope(|| {
        let source = rt.create_cell(0);
        let doubled = rt
            .create_memo({
                let source = source.clone();
                move || source.get() * 2
            })
            .unwrap();
        let (rt2, cleanups2, runs2) = (rt.clone(), cleanups.clone(), runs.clone());
        rt.create_effect(move || {
            doubled.get();
            bump(&runs2);
            let cleanups = cleanups2.clone();
            rt2.on_cleanup(move || cleanups.borrow_mut().push("effect"))
                .unwrap();
        })
        .unwrap();
        let cleanups = cleanups.clone();
        rt.on_cleanup(move || cleanups.borrow_mut().push("scope")).unwrap();
        source
    });
    assert!(rt.stats().edges > 0);

    scope.dispose();
    assert_eq!(*cleanups.borrow(), vec!["effect", "scope"]);
    assert_eq!(rt.stats().nodes, 0);
    assert_eq!(rt.stats().edges, 0);

    source.set(5);
    assert_eq!(runs.get(), 1);
}

/// Test that a memo that loses its last subscriber detaches from its
/// dependencies and relinks on the next read.
#[test]
fn unobserved_memo_detaches_and_relinks() {
    let rt = Runtime::new();
    let ((), _scope) = rt.create_scope(|| {
        let source = rt.create_cell(1);
        let inner = rt
            .create_memo({
                let source = source.clone();
                move || source.get() * 10
            })
            .unwrap();
        let (effect_value, effect_scope) = rt.create_scope(|| {
            let inner = inner.clone();
            rt.create_effect(move || {
                inner.get();
            })
        });
        effect_value.unwrap();
        assert_eq!(source.subscriber_count(), 1);
        assert_eq!(inner.subscriber_count(), 1);

        effect_scope.dispose();
        assert_eq!(inner.subscriber_count(), 0);
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(inner.state(), MemoState::Dirty);

        source.set(2);
        assert_eq!(inner.get(), 20);
        assert_eq!(source.subscriber_count(), 1);
    });
}

/// Test that an effect may write cells read by other nodes in the same
/// flush.
#[test]
fn writes_inside_effects_settle_in_one_flush() {
    let rt = Runtime::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let ((), _scope) = rt.create_scope(|| {
        let input = rt.create_cell(1);
        let mirror = rt.create_cell(0);
        rt.create_effect({
            let (input, mirror) = (input.clone(), mirror.clone());
            move || mirror.set(input.get() * 100)
        })
        .unwrap();
        rt.create_effect({
            let (mirror, seen) = (mirror.clone(), seen.clone());
            move || seen.borrow_mut().push(mirror.get())
        })
        .unwrap();

        input.set(2);
    });
    assert_eq!(*seen.borrow(), vec![100, 200]);
}

/// Test that untracked reads create no dependency.
#[test]
fn untracked_reads_do_not_subscribe() {
    let rt = Runtime::new();
    let runs = counter();
    let ((), _scope) = rt.create_scope(|| {
        let tracked = rt.create_cell(0);
        let ignored = rt.create_cell(0);
        rt.create_effect({
            let (rt2, tracked, ignored, runs) =
                (rt.clone(), tracked.clone(), ignored.clone(), runs.clone());
            move || {
                tracked.get();
                rt2.untracked(|| ignored.get());
                bump(&runs);
            }
        })
        .unwrap();

        ignored.set(1);
        assert_eq!(runs.get(), 1);
        tracked.set(1);
        assert_eq!(runs.get(), 2);
        assert_eq!(ignored.subscriber_count(), 0);
    });
}

/// Test that handles report a dropped runtime instead of panicking.
#[test]
fn handles_outlive_runtime() {
    let rt = Runtime::new();
    let (memo, _scope) = rt.create_scope(|| rt.create_memo(|| 1).unwrap());
    drop(rt);
    assert_eq!(memo.try_get(), Err(Error::RuntimeDropped));
    assert_eq!(memo.state(), MemoState::Disposed);
}

/// Test that statistics serialize for diagnostics.
#[test]
fn stats_serialize_to_json() {
    let rt = Runtime::new();
    let _cell = rt.create_cell(1);
    let json = serde_json::to_value(rt.stats()).unwrap();
    assert_eq!(json["nodes"], 1);
    assert_eq!(json["pending"], 0);
}

/// Test that configuration documents are validated.
#[test]
fn config_from_json() {
    let config = RuntimeConfig::from_json(r#"{ "initial_heap_capacity": 8 }"#).unwrap();
    assert!(Runtime::with_config(config).is_ok());

    let err = RuntimeConfig::from_json(r#"{ "max_height": "tall" }"#).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

// ----------------------------------------------------------------------------
// Properties
// ----------------------------------------------------------------------------

fn sum_of(cells: &[Cell<i64>]) -> i64 {
    cells.iter().map(|cell| cell.get()).sum()
}

proptest! {
    /// Every value an effect observes is consistent with the cells it was
    /// derived from, and each derivation runs at most once per flush.
    #[test]
    fn propagation_is_glitch_free(
        batches in prop::collection::vec(
            prop::collection::vec((0usize..4, -20i64..20), 1..6),
            1..16,
        )
    ) {
        let rt = Runtime::new();
        let violations = counter();
        let total_calls = counter();

        let (cells, _scope) = rt.create_scope(|| {
            let cells: Vec<Cell<i64>> = (0..4).map(|i| rt.create_cell(i as i64)).collect();
            let left = rt.create_memo({
                let cells = cells[..2].to_vec();
                move || sum_of(&cells)
            }).unwrap();
            let right = rt.create_memo({
                let cells = cells[2..].to_vec();
                move || sum_of(&cells)
            }).unwrap();
            let total = rt.create_memo({
                let (left, right, total_calls) = (left.clone(), right.clone(), total_calls.clone());
                move || {
                    bump(&total_calls);
                    left.get() + right.get()
                }
            }).unwrap();
            rt.create_effect({
                let (cells, violations) = (cells.clone(), violations.clone());
                move || {
                    let observed = (left.get(), right.get(), total.get());
                    let raw: Vec<i64> = cells.iter().map(|c| c.get_untracked()).collect();
                    let expected = (raw[0] + raw[1], raw[2] + raw[3], raw.iter().sum());
                    if observed != expected {
                        bump(&violations);
                    }
                }
            }).unwrap();
            cells
        });

        for batch in &batches {
            let before = total_calls.get();
            rt.batch(|| {
                for &(index, value) in batch {
                    cells[index].set(value);
                }
            });
            prop_assert!(total_calls.get() - before <= 1);
        }
        prop_assert_eq!(violations.get(), 0);
        prop_assert_eq!(rt.stats().pending, 0);
    }
}
