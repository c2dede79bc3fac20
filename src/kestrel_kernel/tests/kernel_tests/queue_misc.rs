//! Validates the error codes returned by queue operations, and checks the
//! bounds, the timeouts, and the queue's bookkeeping.
use assert_matches::assert_matches;
use kestrel_kernel::{
    CreateQueueError, DeleteQueueError, Interrupt, Kernel, OverwriteError, Queue,
    QueryQueueError, ReceiveError, RunOutcome, SendError, Timeout, TryReceiveError,
    TrySendError,
};
use std::sync::Arc;

use crate::{run, SeqTracker};

#[test]
fn bounds_and_timeouts() {
    let kernel = Kernel::builder().build();
    assert_matches!(
        Queue::<u32>::new(&kernel, 0),
        Err(CreateQueueError::BadParam)
    );

    let k = kernel.clone();
    kernel
        .task_builder("task")
        .spawn(move || {
            let q = Queue::<u32>::new(&k, 3).unwrap();
            assert_eq!(q.spaces_available().unwrap(), 3);

            q.send_to_back(1, Timeout::NO_WAIT).unwrap();
            q.send_to_back(2, Timeout::NO_WAIT).unwrap();
            q.send_to_front(0, Timeout::NO_WAIT).unwrap();
            assert_eq!(q.messages_waiting().unwrap(), 3);
            assert_eq!(q.spaces_available().unwrap(), 0);

            // Full
            assert_eq!(q.send_to_back(3, Timeout::NO_WAIT), Err(SendError::Timeout));
            let t0 = k.tick_count();
            assert_eq!(q.send_to_back(3, Timeout::ticks(5)), Err(SendError::Timeout));
            assert_eq!(k.tick_count(), t0 + 5);

            // Only a queue of length 1 can be overwritten
            assert_eq!(q.overwrite(9), Err(OverwriteError::BadParam));

            assert_eq!(q.peek(Timeout::NO_WAIT), Ok(0));
            assert_eq!(q.receive(Timeout::NO_WAIT), Ok(0));
            assert_eq!(q.receive(Timeout::NO_WAIT), Ok(1));
            assert_eq!(q.receive(Timeout::NO_WAIT), Ok(2));

            // Empty
            assert_eq!(q.receive(Timeout::NO_WAIT), Err(ReceiveError::Timeout));
            assert_eq!(q.peek(Timeout::NO_WAIT), Err(ReceiveError::Timeout));
            let t0 = k.tick_count();
            assert_eq!(q.receive(Timeout::ticks(3)), Err(ReceiveError::Timeout));
            assert_eq!(k.tick_count(), t0 + 3);

            // Reset discards the items
            q.send_to_back(4, Timeout::NO_WAIT).unwrap();
            q.send_to_back(5, Timeout::NO_WAIT).unwrap();
            q.reset().unwrap();
            assert_eq!(q.messages_waiting().unwrap(), 0);
            assert_eq!(q.receive(Timeout::NO_WAIT), Err(ReceiveError::Timeout));

            // The ring buffer wraps around
            for i in 10..20 {
                q.send_to_back(i, Timeout::NO_WAIT).unwrap();
                assert_eq!(q.receive(Timeout::NO_WAIT), Ok(i));
            }

            let free_before = k.heap_stats().free_bytes;
            q.delete().unwrap();
            assert!(k.heap_stats().free_bytes > free_before);
            assert_eq!(q.send_to_back(0, Timeout::NO_WAIT), Err(SendError::NoAccess));
            assert_eq!(q.receive(Timeout::NO_WAIT), Err(ReceiveError::NoAccess));
            assert_eq!(q.messages_waiting(), Err(QueryQueueError::NoAccess));
            assert_eq!(q.delete(), Err(DeleteQueueError::NoAccess));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}

#[test]
fn blocked_sender_is_admitted() {
    let kernel = Kernel::builder().build();
    let queue = Queue::<u32>::new(&kernel, 1).unwrap();
    let seq = SeqTracker::new();

    let (q, seq2) = (queue.clone(), Arc::clone(&seq));
    kernel
        .task_builder("sender")
        .priority(2)
        .spawn(move || {
            seq2.expect_and_replace(0, 1);
            q.send_to_back(10, Timeout::NO_WAIT).unwrap();
            // Blocks until the receiver makes room
            q.send_to_back(11, Timeout::FOREVER).unwrap();
            seq2.expect_and_replace(2, 3);
        })
        .unwrap();

    let (q, seq2) = (queue.clone(), Arc::clone(&seq));
    kernel
        .task_builder("receiver")
        .priority(1)
        .spawn(move || {
            seq2.expect_and_replace(1, 2);
            assert_eq!(q.delete(), Err(DeleteQueueError::BadObjectState));

            // Taking an item stores the sender's item, and the sender
            // preempts us
            assert_eq!(q.receive(Timeout::NO_WAIT), Ok(10));
            seq2.expect_and_replace(3, 4);
            assert_eq!(q.receive(Timeout::NO_WAIT), Ok(11));
            q.delete().unwrap();
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(seq.get(), 4);
}

#[test]
fn interrupt_handler_services() {
    let kernel = Kernel::builder().build();
    let queue = Queue::<u16>::new(&kernel, 2).unwrap();

    let q = queue.clone();
    let fill = Interrupt::new(&kernel, move |cx| {
        q.send_to_back_from_isr(cx, 1).unwrap();
        q.send_to_front_from_isr(cx, 0).unwrap();
        assert_eq!(q.send_to_back_from_isr(cx, 2), Err(TrySendError::Timeout));
        // Nobody is waiting
        assert!(!cx.higher_priority_task_woken());
    });

    let q = queue.clone();
    let drain = Interrupt::new(&kernel, move |cx| {
        assert_eq!(q.receive_from_isr(cx), Ok(0));
        assert_eq!(q.receive_from_isr(cx), Ok(1));
        assert_eq!(q.receive_from_isr(cx), Err(TryReceiveError::Timeout));
        // Non-blocking calls are allowed, too
        assert_eq!(q.receive(Timeout::NO_WAIT), Err(ReceiveError::Timeout));
    });

    let q = queue.clone();
    kernel
        .task_builder("task")
        .spawn(move || {
            fill.pend();
            assert_eq!(q.messages_waiting().unwrap(), 2);
            drain.pend();
            assert_eq!(q.messages_waiting().unwrap(), 0);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}
