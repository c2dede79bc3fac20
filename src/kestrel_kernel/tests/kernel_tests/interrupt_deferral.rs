//! Deferred interrupt processing: a handler wakes up a high-priority task that
//! does the actual work. Without a yield request, the task runs at the
//! interrupted task's next preemption point. With one, it runs as soon as the
//! handler returns.
use kestrel_kernel::{Interrupt, Kernel, RunOutcome, Semaphore, Timeout};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{run, SeqTracker};

#[test]
fn deferred_handler_task() {
    let kernel = Kernel::builder().build();
    let semaphore = Semaphore::new_binary(&kernel);
    let seq = SeqTracker::new();
    let woken = Arc::new(AtomicBool::new(false));

    let (sem, seq2) = (semaphore.clone(), Arc::clone(&seq));
    kernel
        .task_builder("handler task")
        .priority(2)
        .spawn(move || {
            seq2.expect_and_replace(0, 1);
            sem.take(Timeout::FOREVER).unwrap();
            seq2.expect_and_replace(3, 4);
            sem.take(Timeout::FOREVER).unwrap();
            seq2.expect_and_replace(5, 6);
        })
        .unwrap();

    let (sem, woken2) = (semaphore.clone(), Arc::clone(&woken));
    let irq_lazy = Interrupt::new(&kernel, move |cx| {
        sem.give_from_isr(cx).unwrap();
        woken2.store(cx.higher_priority_task_woken(), Ordering::Relaxed);
    });

    let sem = semaphore.clone();
    let irq_eager = Interrupt::new(&kernel, move |cx| {
        sem.give_from_isr(cx).unwrap();
        if cx.higher_priority_task_woken() {
            cx.request_yield();
        }
    });

    let (k, seq2) = (kernel.clone(), Arc::clone(&seq));
    kernel
        .task_builder("background")
        .priority(1)
        .spawn(move || {
            seq2.expect_and_replace(1, 2);
            irq_lazy.pend();
            assert!(woken.load(Ordering::Relaxed));

            // The handler task is ready but hasn't run yet
            seq2.expect_and_replace(2, 3);
            k.busy_wait(1).unwrap();

            seq2.expect_and_replace(4, 5);
            irq_eager.pend();
            seq2.expect_and_replace(6, 7);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(seq.get(), 7);
}

/// An interrupt scheduled for a future tick fires while every task is
/// waiting. The idle task skips ahead to it.
#[test]
fn scheduled_interrupt_wakes_sleeping_system() {
    let kernel = Kernel::builder().build();
    let semaphore = Semaphore::new_counting(&kernel, 10, 0).unwrap();

    let sem = semaphore.clone();
    let irq = Interrupt::new(&kernel, move |cx| {
        sem.give_from_isr(cx).unwrap();
    });

    let (k, sem) = (kernel.clone(), semaphore.clone());
    kernel
        .task_builder("task")
        .spawn(move || {
            irq.pend_after(25);
            sem.take(Timeout::FOREVER).unwrap();
            assert_eq!(k.tick_count(), 25);

            irq.pend_at(40);
            irq.pend_at(40);
            sem.take(Timeout::FOREVER).unwrap();
            assert_eq!(k.tick_count(), 40);
            assert_eq!(sem.count(), Ok(1));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}

/// Interrupts pended by a critical section's owner are delivered when the
/// critical section ends.
#[test]
fn critical_section_masks_interrupts() {
    let kernel = Kernel::builder().build();
    let fired = Arc::new(AtomicBool::new(false));

    let fired2 = Arc::clone(&fired);
    let irq = Interrupt::new(&kernel, move |_| {
        fired2.store(true, Ordering::Relaxed);
    });

    let (k, fired2) = (kernel.clone(), Arc::clone(&fired));
    kernel
        .task_builder("task")
        .spawn(move || {
            {
                let _outer = k.enter_critical();
                {
                    let _inner = k.enter_critical();
                    irq.pend();
                }
                // Still inside the outer critical section
                k.busy_wait(2).unwrap();
                assert!(!fired2.load(Ordering::Relaxed));
            }
            assert!(fired2.load(Ordering::Relaxed));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}
