//! Checks the wait conditions and the return values of event group
//! operations.
use kestrel_kernel::{
    EventGroup, Interrupt, Kernel, RunOutcome, Timeout, WaitEventGroupError, WaitFlags,
};
use std::sync::Arc;

use crate::{run, SeqTracker};

#[test]
fn wait_any_all_and_clear() {
    let kernel = Kernel::builder().build();
    let group = EventGroup::new(&kernel);
    let seq = SeqTracker::new();

    let (k, g, seq2) = (kernel.clone(), group.clone(), Arc::clone(&seq));
    kernel
        .task_builder("waiter")
        .priority(2)
        .spawn(move || {
            seq2.expect_and_replace(0, 1);
            assert_eq!(
                g.wait_bits(0b11, WaitFlags::ALL, Timeout::ticks(5)),
                Err(WaitEventGroupError::Timeout(0b01))
            );
            assert_eq!(k.tick_count(), 5);

            seq2.expect_and_replace(2, 3);
            assert_eq!(g.wait_bits(0b110, WaitFlags::CLEAR, Timeout::FOREVER), Ok(0b101));

            seq2.expect_and_replace(4, 5);
            assert_eq!(g.clear_bits(0b1), Ok(0b001));
            assert_eq!(g.bits(), Ok(0));

            assert_eq!(
                g.wait_bits(0, WaitFlags::empty(), Timeout::NO_WAIT),
                Err(WaitEventGroupError::BadParam)
            );
            assert_eq!(
                g.wait_bits(0b1, WaitFlags::empty(), Timeout::NO_WAIT),
                Err(WaitEventGroupError::Timeout(0))
            );

            // Already satisfied
            g.set_bits(0b1010).unwrap();
            assert_eq!(g.wait_bits(0b0010, WaitFlags::ALL, Timeout::NO_WAIT), Ok(0b1010));
            assert_eq!(
                g.wait_bits(0b1010, WaitFlags::ALL | WaitFlags::CLEAR, Timeout::NO_WAIT),
                Ok(0b1010)
            );
            assert_eq!(g.bits(), Ok(0));
        })
        .unwrap();

    let (k, g, seq2) = (kernel.clone(), group.clone(), Arc::clone(&seq));
    kernel
        .task_builder("setter")
        .priority(1)
        .spawn(move || {
            seq2.expect_and_replace(1, 2);
            // Not enough for the waiter
            assert_eq!(g.set_bits(0b01), Ok(0b01));
            k.delay(10).unwrap();

            // The waiter's bits are cleared on its behalf
            seq2.expect_and_replace(3, 4);
            assert_eq!(g.set_bits(0b100), Ok(0b001));
            seq2.expect_and_replace(5, 6);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(seq.get(), 6);
}

/// Every waiter is evaluated against the same value, so two waiters that
/// both clear the same bit are both released.
#[test]
fn one_update_releases_all_matching_waiters() {
    let kernel = Kernel::builder().build();
    let group = EventGroup::new(&kernel);

    for priority in [2, 3] {
        let g = group.clone();
        kernel
            .task_builder("waiter")
            .priority(priority)
            .spawn(move || {
                let value = g
                    .wait_bits(0b1, WaitFlags::CLEAR, Timeout::FOREVER)
                    .unwrap();
                assert_eq!(value, 0b11);
            })
            .unwrap();
    }

    let g = group.clone();
    let irq = Interrupt::new(&kernel, move |cx| {
        assert_eq!(g.set_bits_from_isr(cx, 0b11), Ok(0b10));
        assert!(cx.higher_priority_task_woken());
        assert_eq!(g.clear_bits_from_isr(cx, 0b10), Ok(0b10));
    });

    let g = group.clone();
    kernel
        .task_builder("setter")
        .priority(1)
        .spawn(move || {
            irq.pend();
            assert_eq!(g.bits(), Ok(0));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}
