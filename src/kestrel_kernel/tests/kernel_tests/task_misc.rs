//! Checks miscellaneous properties of tasks.
use assert_matches::assert_matches;
use kestrel_kernel::{
    CreateTaskError, DelayError, GetCurrentTaskError, InterruptTaskError, Kernel,
    ResumeTaskError, RunOutcome, SetTaskPriorityError, TaskHandle, TaskState, MAX_NAME_LEN,
};
use std::{
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use wyhash::WyHash;

use crate::{run, SeqTracker};

#[test]
fn suspend_and_resume() {
    let kernel = Kernel::builder().build();
    let seq = SeqTracker::new();

    let (k, seq2) = (kernel.clone(), Arc::clone(&seq));
    let worker = kernel
        .task_builder("worker")
        .priority(2)
        .spawn(move || {
            seq2.expect_and_replace(0, 1);
            k.current_task().unwrap().suspend().unwrap();

            seq2.expect_and_replace(2, 3);
            k.delay(10).unwrap();

            // Resumed at tick 20, not when the delay ended
            seq2.expect_and_replace(5, 6);
            assert_eq!(k.tick_count(), 20);
        })
        .unwrap();

    let (k, seq2) = (kernel.clone(), Arc::clone(&seq));
    kernel
        .task_builder("controller")
        .priority(1)
        .spawn(move || {
            seq2.expect_and_replace(1, 2);
            assert_eq!(worker.state(), TaskState::Suspended);
            // No effect
            worker.suspend().unwrap();
            worker.resume().unwrap();

            seq2.expect_and_replace(3, 4);
            assert_eq!(worker.state(), TaskState::Waiting);

            // A pending suspension can be cancelled
            worker.suspend().unwrap();
            worker.resume().unwrap();
            assert_eq!(worker.resume(), Err(ResumeTaskError::BadObjectState));

            // The worker enters the Suspended state when its delay ends
            worker.suspend().unwrap();
            k.delay(20).unwrap();

            seq2.expect_and_replace(4, 5);
            assert_eq!(worker.state(), TaskState::Suspended);
            worker.resume().unwrap();

            seq2.expect_and_replace(6, 7);
            assert_eq!(worker.state(), TaskState::Deleted);
            assert_eq!(worker.resume(), Err(ResumeTaskError::NoAccess));

            let me = k.current_task().unwrap();
            assert_eq!(me.state(), TaskState::Running);
            assert_eq!(me.resume(), Err(ResumeTaskError::BadObjectState));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(seq.get(), 7);
}

#[test]
fn set_priority_preempts() {
    let kernel = Kernel::builder().time_slicing(false).build();
    let seq = SeqTracker::new();

    let (k, seq2) = (kernel.clone(), Arc::clone(&seq));
    kernel
        .task_builder("a")
        .priority(1)
        .spawn(move || {
            seq2.expect_and_replace(0, 1);

            let (k2, seq3) = (k.clone(), Arc::clone(&seq2));
            let b = k
                .task_builder("b")
                .priority(1)
                .spawn(move || {
                    seq3.expect_and_replace(1, 2);
                    let me = k2.current_task().unwrap();
                    assert_eq!(me.priority(), Ok(3));

                    // Lowering our priority lets `a` run
                    me.set_priority(0).unwrap();

                    seq3.expect_and_replace(3, 4);
                    assert_eq!(me.priority(), Ok(0));
                    assert_eq!(me.effective_priority(), Ok(0));
                })
                .unwrap();

            // Same priority, so `b` doesn't run yet
            assert_eq!(b.state(), TaskState::Ready);
            b.set_priority(3).unwrap();

            seq2.expect_and_replace(2, 3);
            assert_eq!(b.priority(), Ok(0));
            assert_eq!(
                b.set_priority(k.max_priorities()),
                Err(SetTaskPriorityError::BadParam)
            );
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(seq.get(), 4);
}

#[test]
fn abort_wait_interrupts_delay() {
    let kernel = Kernel::builder().build();
    let seq = SeqTracker::new();

    let (k, seq2) = (kernel.clone(), Arc::clone(&seq));
    let sleeper = kernel
        .task_builder("sleeper")
        .priority(2)
        .spawn(move || {
            seq2.expect_and_replace(0, 1);
            assert_eq!(k.delay(100), Err(DelayError::Interrupted));

            seq2.expect_and_replace(2, 3);
            assert_eq!(k.tick_count(), 0);
            k.delay(5).unwrap();

            seq2.expect_and_replace(4, 5);
            assert_eq!(k.tick_count(), 5);
        })
        .unwrap();

    let (k, seq2) = (kernel.clone(), Arc::clone(&seq));
    kernel
        .task_builder("waker")
        .priority(1)
        .spawn(move || {
            seq2.expect_and_replace(1, 2);
            sleeper.abort_wait().unwrap();

            seq2.expect_and_replace(3, 4);
            let me = k.current_task().unwrap();
            assert_eq!(me.abort_wait(), Err(InterruptTaskError::BadObjectState));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(seq.get(), 5);
}

#[test]
fn delay_until_keeps_the_period() {
    let kernel = Kernel::builder().build();

    let k = kernel.clone();
    kernel
        .task_builder("periodic")
        .spawn(move || {
            let mut last_wake = k.tick_count();
            for expected in [10, 20, 30] {
                // The work takes some time, which doesn't shift the period
                k.busy_wait(3).unwrap();
                k.delay_until(&mut last_wake, 10).unwrap();
                assert_eq!(k.tick_count(), expected);
                assert_eq!(last_wake, expected);
            }

            // Overran the period; returns immediately
            k.busy_wait(15).unwrap();
            k.delay_until(&mut last_wake, 10).unwrap();
            assert_eq!(last_wake, 40);
            assert_eq!(k.tick_count(), 45);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}

#[test]
fn names_and_handles() {
    let kernel = Kernel::builder().build();

    let task1 = kernel
        .task_builder("a_very_long_task_name")
        .spawn(|| {})
        .unwrap();
    let task2 = kernel.task_builder("short").spawn(|| {}).unwrap();

    let name = task1.name().unwrap();
    assert_eq!(name.len(), MAX_NAME_LEN);
    assert_eq!(name, "a_very_long_task");
    assert_eq!(task2.name().as_deref(), Some("short"));
    assert_eq!(task1.state(), TaskState::Ready);

    let hash = |x: &TaskHandle| {
        let mut hasher = WyHash::with_seed(42);
        x.hash(&mut hasher);
        hasher.finish()
    };
    assert_eq!(hash(&task1), hash(&task1.clone()));
    assert_ne!(task1, task2);

    assert_matches!(
        kernel.task_builder("bad").priority(8).spawn(|| {}),
        Err(CreateTaskError::BadParam)
    );
    assert_matches!(
        kernel.task_builder("big").stack_size(1 << 20).spawn(|| {}),
        Err(CreateTaskError::OutOfMemory)
    );

    // Not a task
    assert_matches!(kernel.current_task(), Err(GetCurrentTaskError::BadContext));
    assert_eq!(kernel.delay(1), Err(DelayError::BadContext));
    assert_eq!(kernel.yield_now(), Err(DelayError::BadContext));

    assert_eq!(run(&kernel), RunOutcome::Quiescent);

    assert_eq!(task1.state(), TaskState::Deleted);
    assert_eq!(task1.name(), None);
}

#[test]
fn idle_hook_runs_while_tasks_sleep() {
    let idle_count = Arc::new(AtomicUsize::new(0));
    let idle_count2 = Arc::clone(&idle_count);
    let kernel = Kernel::builder()
        .idle_hook(move || {
            idle_count2.fetch_add(1, Ordering::Relaxed);
        })
        .build();

    let (k, idle_count2) = (kernel.clone(), Arc::clone(&idle_count));
    kernel
        .task_builder("sleeper")
        .spawn(move || {
            assert_eq!(idle_count2.load(Ordering::Relaxed), 0);
            k.delay(10).unwrap();
            assert!(idle_count2.load(Ordering::Relaxed) > 0);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert!(idle_count.load(Ordering::Relaxed) > 0);
}

/// The idle task and application tasks at priority 0 take turns.
#[test]
fn idle_takes_turns_with_priority_zero_tasks() {
    let idle_count = Arc::new(AtomicUsize::new(0));
    let idle_count2 = Arc::clone(&idle_count);
    let kernel = Kernel::builder()
        .time_slicing(false)
        .idle_hook(move || {
            idle_count2.fetch_add(1, Ordering::Relaxed);
        })
        .build();

    let (k, idle_count2) = (kernel.clone(), Arc::clone(&idle_count));
    kernel
        .task_builder("background")
        .priority(0)
        .spawn(move || {
            for _ in 0..3 {
                let before = idle_count2.load(Ordering::Relaxed);
                k.yield_now().unwrap();
                assert_eq!(idle_count2.load(Ordering::Relaxed), before + 1);
            }
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert!(idle_count.load(Ordering::Relaxed) >= 4);
}
