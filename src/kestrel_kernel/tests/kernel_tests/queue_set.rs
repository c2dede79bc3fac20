//! A task blocks on a queue and a semaphore at once through a queue set.
use assert_matches::assert_matches;
use kestrel_kernel::{
    CreateQueueSetError, DeleteQueueError, Kernel, Queue, QueueSet, QueueSetMemberError,
    ReceiveError, RunOutcome, Semaphore, Timeout,
};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::run;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Item(u32),
    Permit,
}

#[test]
fn select_returns_members_in_order() {
    let kernel = Kernel::builder().build();
    assert_matches!(QueueSet::new(&kernel, 0), Err(CreateQueueSetError::BadParam));

    let queue = Queue::<u32>::new(&kernel, 2).unwrap();
    let semaphore = Semaphore::new_binary(&kernel);
    let set = QueueSet::new(&kernel, 3).unwrap();
    set.add(&queue).unwrap();
    set.add(&semaphore).unwrap();

    // A member can belong to only one set
    let other_set = QueueSet::new(&kernel, 1).unwrap();
    assert_eq!(other_set.add(&queue), Err(QueueSetMemberError::BadObjectState));
    // Members of a set can't be deleted
    assert_eq!(queue.delete(), Err(DeleteQueueError::BadObjectState));

    let events = Arc::new(Mutex::new(Vec::new()));

    let (q, sem, s, events2) = (
        queue.clone(),
        semaphore.clone(),
        set.clone(),
        Arc::clone(&events),
    );
    kernel
        .task_builder("receiver")
        .priority(2)
        .spawn(move || {
            for _ in 0..4 {
                let member = s.select(Timeout::FOREVER).unwrap();
                let event = if member == q.as_set_member() {
                    Event::Item(q.receive(Timeout::NO_WAIT).unwrap())
                } else {
                    assert_eq!(member, sem.as_set_member());
                    sem.take(Timeout::NO_WAIT).unwrap();
                    Event::Permit
                };
                events2.lock().push(event);
            }
            assert_eq!(s.select(Timeout::NO_WAIT), Err(ReceiveError::Timeout));
            assert_eq!(s.select(Timeout::ticks(4)), Err(ReceiveError::Timeout));
        })
        .unwrap();

    let (q, sem, events2, k) = (
        queue.clone(),
        semaphore.clone(),
        Arc::clone(&events),
        kernel.clone(),
    );
    kernel
        .task_builder("sender")
        .priority(1)
        .spawn(move || {
            // Each of these wakes up the receiver
            q.send_to_back(7, Timeout::FOREVER).unwrap();
            sem.give().unwrap();
            assert_eq!(events2.lock().len(), 2);

            // Entries accumulate while the receiver can't run
            {
                let _guard = k.suspend_all();
                q.send_to_back(8, Timeout::FOREVER).unwrap();
                q.send_to_back(9, Timeout::FOREVER).unwrap();
            }
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert_eq!(
        *events.lock(),
        [Event::Item(7), Event::Permit, Event::Item(8), Event::Item(9)]
    );

    // Empty members can be moved
    set.remove(&queue).unwrap();
    assert_eq!(set.remove(&queue), Err(QueueSetMemberError::BadObjectState));
    other_set.add(&queue).unwrap();
}
