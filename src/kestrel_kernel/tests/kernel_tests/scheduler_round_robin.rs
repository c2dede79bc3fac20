//! Tasks of the same priority share the processor. Higher priority tasks that
//! never block starve lower priority ones.
use kestrel_kernel::{Kernel, RunOutcome, Ticks};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crate::run;

const NUM_TASKS: usize = 3;
const TICK_LIMIT: Ticks = 300;

#[test]
fn time_slices_are_fair() {
    let kernel = Kernel::builder().tick_limit(TICK_LIMIT).build();
    let counters: Arc<Vec<AtomicU64>> =
        Arc::new((0..NUM_TASKS).map(|_| AtomicU64::new(0)).collect());

    for i in 0..NUM_TASKS {
        let (k, counters) = (kernel.clone(), Arc::clone(&counters));
        kernel
            .task_builder("worker")
            .priority(1)
            .spawn(move || loop {
                k.busy_wait(1).unwrap();
                counters[i].fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
    }

    assert_eq!(run(&kernel), RunOutcome::TickLimit);

    let counts: Vec<u64> = counters.iter().map(|c| c.load(Ordering::Relaxed)).collect();
    log::info!("counts = {counts:?}");
    let min = *counts.iter().min().unwrap();
    let max = *counts.iter().max().unwrap();
    assert!(max - min <= 1, "unfair distribution: {counts:?}");
    assert!(counts.iter().sum::<u64>() >= TICK_LIMIT - NUM_TASKS as u64);
}

#[test]
fn yield_alternates_equal_priority_tasks() {
    let kernel = Kernel::builder().time_slicing(false).build();
    let trace = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b"] {
        let (k, trace) = (kernel.clone(), Arc::clone(&trace));
        kernel
            .task_builder(name)
            .spawn(move || {
                for _ in 0..3 {
                    trace.lock().push(name);
                    k.yield_now().unwrap();
                }
            })
            .unwrap();
    }

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(*trace.lock(), ["a", "b", "a", "b", "a", "b"]);
}

#[test]
fn no_time_slicing_without_yield() {
    let kernel = Kernel::builder().time_slicing(false).build();
    let trace = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b"] {
        let (k, trace) = (kernel.clone(), Arc::clone(&trace));
        kernel
            .task_builder(name)
            .spawn(move || {
                trace.lock().push((name, k.tick_count()));
                k.busy_wait(5).unwrap();
                trace.lock().push((name, k.tick_count()));
            })
            .unwrap();
    }

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(*trace.lock(), [("a", 0), ("a", 5), ("b", 5), ("b", 10)]);
}

/// Documents the scheduling policy rather than a defect: a task that never
/// blocks keeps every lower priority task from running.
#[test]
fn higher_priority_busy_task_starves_lower() {
    let kernel = Kernel::builder().tick_limit(50).build();
    let low_ran = Arc::new(AtomicBool::new(false));

    let k = kernel.clone();
    kernel
        .task_builder("hog")
        .priority(2)
        .spawn(move || loop {
            k.busy_wait(1).unwrap();
        })
        .unwrap();

    let low_ran2 = Arc::clone(&low_ran);
    kernel
        .task_builder("starved")
        .priority(1)
        .spawn(move || low_ran2.store(true, Ordering::Relaxed))
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::TickLimit);
    assert_eq!(kernel.tick_count(), 50);
    assert!(!low_ran.load(Ordering::Relaxed));
}
