//! Deleted tasks are detached immediately, but their stacks are freed later by
//! the idle task.
use kestrel_kernel::{DeleteTaskError, GetTaskPriorityError, Kernel, RunOutcome, TaskState};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{run, SeqTracker};

#[test]
fn stack_is_freed_by_the_idle_task() {
    let kernel = Kernel::builder().build();
    let seq = SeqTracker::new();

    let (k, seq2) = (kernel.clone(), Arc::clone(&seq));
    kernel
        .task_builder("controller")
        .priority(2)
        .spawn(move || {
            seq2.expect_and_replace(0, 1);
            let free_bytes = || k.heap_stats().free_bytes;
            let before = free_bytes();

            let k2 = k.clone();
            let victim = k
                .task_builder("victim")
                .priority(1)
                .stack_size(4096)
                .spawn(move || loop {
                    k2.delay(1).unwrap();
                })
                .unwrap();
            assert_eq!(free_bytes(), before - 4096);

            // Never ran
            victim.delete().unwrap();
            assert_eq!(victim.state(), TaskState::Deleted);
            assert_eq!(victim.delete(), Err(DeleteTaskError::NoAccess));
            assert_eq!(victim.priority(), Err(GetTaskPriorityError::NoAccess));
            assert_eq!(free_bytes(), before - 4096);

            k.delay(1).unwrap();
            assert_eq!(free_bytes(), before);

            // Deleted while waiting
            let (k2, seq3) = (k.clone(), Arc::clone(&seq2));
            let victim = k
                .task_builder("victim")
                .priority(1)
                .stack_size(4096)
                .spawn(move || {
                    seq3.expect_and_replace(1, 2);
                    k2.delay(100).unwrap();
                    unreachable!();
                })
                .unwrap();
            k.delay(5).unwrap();

            seq2.expect_and_replace(2, 3);
            assert_eq!(victim.state(), TaskState::Waiting);
            victim.delete().unwrap();
            assert_eq!(victim.state(), TaskState::Deleted);

            k.delay(1).unwrap();
            assert_eq!(free_bytes(), before);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(seq.get(), 3);
}

#[test]
fn exited_task_is_reclaimed() {
    let kernel = Kernel::builder().build();
    let resumed = Arc::new(AtomicBool::new(false));

    let (k, resumed2) = (kernel.clone(), Arc::clone(&resumed));
    kernel
        .task_builder("parent")
        .priority(1)
        .spawn(move || {
            let before = k.heap_stats().free_bytes;

            // Runs to completion before `spawn` returns
            let child = k.task_builder("returns").priority(2).spawn(|| {}).unwrap();
            assert_eq!(child.state(), TaskState::Deleted);

            let (k2, resumed3) = (k.clone(), Arc::clone(&resumed2));
            let child = k
                .task_builder("exits")
                .priority(2)
                .spawn(move || {
                    k2.exit_task().unwrap();
                    resumed3.store(true, Ordering::Relaxed);
                })
                .unwrap();
            assert_eq!(child.state(), TaskState::Deleted);
            assert!(before > k.heap_stats().free_bytes);

            k.delay(1).unwrap();
            assert_eq!(k.heap_stats().free_bytes, before);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert!(!resumed.load(Ordering::Relaxed));
}

#[test]
fn delete_before_start() {
    let kernel = Kernel::builder().build();
    let ran = Arc::new(AtomicBool::new(false));

    let ran2 = Arc::clone(&ran);
    let task = kernel
        .task_builder("task")
        .spawn(move || ran2.store(true, Ordering::Relaxed))
        .unwrap();
    task.delete().unwrap();
    assert_eq!(task.state(), TaskState::Deleted);

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert!(!ran.load(Ordering::Relaxed));
}
