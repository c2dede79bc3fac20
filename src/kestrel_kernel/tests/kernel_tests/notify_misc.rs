//! Task notifications used as a counting semaphore, an event group, and a
//! mailbox.
use assert_matches::assert_matches;
use kestrel_kernel::{
    Interrupt, Kernel, NotifyAction, NotifyError, RunOutcome, TakeMode, Timeout,
    WaitNotificationError,
};
use std::sync::Arc;

use crate::{run, SeqTracker};

#[test]
fn lightweight_counting_semaphore() {
    let kernel = Kernel::builder().build();
    let seq = SeqTracker::new();

    let (k, seq2) = (kernel.clone(), Arc::clone(&seq));
    let receiver = kernel
        .task_builder("receiver")
        .priority(2)
        .spawn(move || {
            seq2.expect_and_replace(0, 1);
            assert_eq!(k.notify_take(TakeMode::Clear, Timeout::FOREVER), Ok(1));

            // Sleeping isn't interrupted by notifications
            seq2.expect_and_replace(2, 3);
            k.delay(10).unwrap();

            seq2.expect_and_replace(4, 5);
            for expected in (1..=3).rev() {
                assert_eq!(
                    k.notify_take(TakeMode::Decrement, Timeout::NO_WAIT),
                    Ok(expected)
                );
            }
            assert_eq!(
                k.notify_take(TakeMode::Decrement, Timeout::NO_WAIT),
                Err(WaitNotificationError::Timeout)
            );
            assert_eq!(
                k.notify_take(TakeMode::Clear, Timeout::ticks(2)),
                Err(WaitNotificationError::Timeout)
            );
        })
        .unwrap();

    let seq2 = Arc::clone(&seq);
    kernel
        .task_builder("giver")
        .priority(1)
        .spawn(move || {
            seq2.expect_and_replace(1, 2);
            receiver.notify_give().unwrap();

            seq2.expect_and_replace(3, 4);
            for _ in 0..3 {
                receiver.notify_give().unwrap();
            }
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(seq.get(), 5);
}

#[test]
fn actions() {
    let kernel = Kernel::builder().build();

    // Not a task
    assert_eq!(
        kernel.notify_take(TakeMode::Clear, Timeout::NO_WAIT),
        Err(WaitNotificationError::BadContext)
    );

    let k = kernel.clone();
    kernel
        .task_builder("task")
        .spawn(move || {
            let me = k.current_task().unwrap();

            me.notify(NotifyAction::SetBits(0b001)).unwrap();
            me.notify(NotifyAction::SetBits(0b100)).unwrap();
            assert_eq!(k.notify_wait(0, u32::MAX, Timeout::NO_WAIT), Ok(0b101));
            // Cleared on exit
            assert_eq!(me.notify_and_query(NotifyAction::NoAction), Ok(0));
            assert_eq!(k.notify_wait(0, 0, Timeout::NO_WAIT), Ok(0));

            me.notify(NotifyAction::Overwrite(7)).unwrap();
            me.notify(NotifyAction::Overwrite(9)).unwrap();
            assert_eq!(k.notify_wait(0, 0, Timeout::NO_WAIT), Ok(9));

            // Nothing pending, so the value is set
            me.notify(NotifyAction::SetIfNoPending(1)).unwrap();
            assert_eq!(
                me.notify(NotifyAction::SetIfNoPending(2)),
                Err(NotifyError::QueueOverflow)
            );
            assert_eq!(me.notify_and_query(NotifyAction::Increment), Ok(1));

            assert_eq!(me.clear_notification(), Ok(true));
            assert_eq!(me.clear_notification(), Ok(false));

            // Bits are cleared on entry only if nothing is pending
            assert_eq!(
                k.notify_wait(u32::MAX, 0, Timeout::NO_WAIT),
                Err(WaitNotificationError::Timeout)
            );
            assert_eq!(me.notify_and_query(NotifyAction::NoAction), Ok(0));
            assert_eq!(k.notify_wait(u32::MAX, 0, Timeout::NO_WAIT), Ok(0));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}

#[test]
fn wake_up_from_task_and_interrupt() {
    let kernel = Kernel::builder().build();
    let seq = SeqTracker::new();

    let (k, seq2) = (kernel.clone(), Arc::clone(&seq));
    let waiter = kernel
        .task_builder("waiter")
        .priority(3)
        .spawn(move || {
            seq2.expect_and_replace(0, 1);
            assert_eq!(k.notify_wait(0, u32::MAX, Timeout::FOREVER), Ok(0x30));

            seq2.expect_and_replace(2, 3);
            assert_eq!(k.notify_take(TakeMode::Clear, Timeout::FOREVER), Ok(1));
            seq2.expect_and_replace(4, 5);
        })
        .unwrap();

    let w = waiter.clone();
    let irq = Interrupt::new(&kernel, move |cx| {
        w.notify_give_from_isr(cx).unwrap();
        if cx.higher_priority_task_woken() {
            cx.request_yield();
        }
    });

    let seq2 = Arc::clone(&seq);
    kernel
        .task_builder("notifier")
        .priority(1)
        .spawn(move || {
            seq2.expect_and_replace(1, 2);
            waiter.notify(NotifyAction::SetBits(0x30)).unwrap();

            seq2.expect_and_replace(3, 4);
            irq.pend();

            seq2.expect_and_replace(5, 6);
            assert_matches!(waiter.notify_give(), Err(NotifyError::NoAccess));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(seq.get(), 6);
}
