//! Wait queues and the Waiting state
//!
//! A task in the Waiting state is linked into the wait queue of the object it
//! waits on (if the object has one) and, if the wait has a timeout, registered
//! in [`State::timeouts`]. The wait ends in one of three ways:
//!
//!  - A waker completes the operation on the waiter's behalf and calls
//!    [`complete_wait`] with `Ok(())`. For example, a sender hands its item
//!    directly to a waiting receiver.
//!  - The timeout expires.
//!  - [`TaskHandle::abort_wait`] interrupts it.
//!
//! [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
use crate::{
    error::WaitTimeoutError,
    event_group::{EventBits, WaitFlags},
    klock::CpuLockGuard,
    mutex,
    queue::SendPosition,
    queue_set::SetMember,
    state::State,
    task::{self, TaskCb, TaskSt},
    utils::{intrusive_list::ListHead, Arena, Id},
    Timeout,
};

/// A queue of waiting tasks, sorted by effective priority. Tasks of the same
/// priority are kept in the order they started waiting.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    head: ListHead,
}

impl WaitQueue {
    /// Get the task to be woken up first.
    #[inline]
    pub(crate) fn first(&self) -> Option<Id> {
        self.head.first()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    pub(crate) fn iter<'a>(&self, tasks: &'a Arena<TaskCb>) -> impl Iterator<Item = Id> + 'a {
        self.head.iter(tasks)
    }

    fn insert(&mut self, tasks: &mut Arena<TaskCb>, task: Id) {
        let priority = tasks[task].effective_priority;
        let at = self
            .head
            .iter(tasks)
            .find(|&other| tasks[other].effective_priority < priority);
        match at {
            Some(at) => self.head.insert_before(tasks, task, at),
            None => self.head.push_back(tasks, task),
        }
    }

    fn remove(&mut self, tasks: &mut Arena<TaskCb>, task: Id) {
        self.head.remove(tasks, task);
    }
}

/// What a task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitObject {
    /// Free space in a queue
    QueueSend(Id),
    /// An item in a queue
    QueueReceive(Id),
    QueueSet(Id),
    Semaphore(Id),
    Mutex(Id),
    EventGroup(Id),
    Notification,
    /// Nothing but the timeout
    Sleep,
}

/// The data exchanged between a waiter and its waker.
#[derive(Debug)]
pub(crate) enum WaitPayload {
    None,
    QueueSend {
        item: Box<[u8]>,
        position: SendPosition,
    },
    QueueReceive {
        peek: bool,
        /// Filled by the waker
        item: Option<Box<[u8]>>,
    },
    EventGroupBits {
        bits: EventBits,
        flags: WaitFlags,
        /// The group's value when the wait completed or timed out
        orig_bits: Option<EventBits>,
    },
    QueueSet {
        /// Filled by the waker
        member: Option<SetMember>,
    },
}

/// The wait state of a task.
#[derive(Debug)]
pub(crate) struct Wait {
    pub(crate) object: WaitObject,
    pub(crate) payload: WaitPayload,
    pub(crate) result: Result<(), WaitTimeoutError>,
}

/// Get the wait queue of `object` along with the task pool, which the caller
/// needs to manipulate the queue.
fn split_wait_queue(
    state: &mut State,
    object: WaitObject,
) -> (Option<&mut WaitQueue>, &mut Arena<TaskCb>) {
    let State {
        tasks,
        queues,
        queue_sets,
        semaphores,
        mutexes,
        event_groups,
        ..
    } = state;
    let wait_queue = match object {
        WaitObject::QueueSend(id) => queues.get_mut(id).map(|cb| &mut cb.send_waiters),
        WaitObject::QueueReceive(id) => queues.get_mut(id).map(|cb| &mut cb.recv_waiters),
        WaitObject::QueueSet(id) => queue_sets.get_mut(id).map(|cb| &mut cb.wait_queue),
        WaitObject::Semaphore(id) => semaphores.get_mut(id).map(|cb| &mut cb.wait_queue),
        WaitObject::Mutex(id) => mutexes.get_mut(id).map(|cb| &mut cb.wait_queue),
        WaitObject::EventGroup(id) => event_groups.get_mut(id).map(|cb| &mut cb.wait_queue),
        WaitObject::Notification | WaitObject::Sleep => None,
    };
    (wait_queue, tasks)
}

/// Transition the running task `task` into the Waiting state.
///
/// This doesn't switch away from the task. The caller can adjust other state
/// (e.g., a mutex owner's priority) before calling [`block`].
///
/// A task deleted by another thread exits here instead of waiting. A pending
/// suspension takes effect when the wait ends.
pub(crate) fn enqueue_wait(
    lock: &mut CpuLockGuard<'_>,
    task: Id,
    object: WaitObject,
    payload: WaitPayload,
    timeout: Timeout,
) {
    debug_assert!(!timeout.is_no_wait());
    task::exit_if_delete_pending(lock, task);

    let state: &mut State = lock;
    let tcb = &mut state.tasks[task];
    debug_assert_eq!(tcb.st, TaskSt::Running);
    tcb.st = TaskSt::Waiting;
    tcb.wait = Some(Wait {
        object,
        payload,
        result: Ok(()),
    });

    if let (Some(wait_queue), tasks) = split_wait_queue(state, object) {
        wait_queue.insert(tasks, task);
    }

    if let Some(deadline) = state.deadline(timeout) {
        let seq = state.next_seq();
        state.timeouts.insert((deadline, seq, task));
        state.tasks[task].timeout = Some((deadline, seq));
    }

    log::trace!("{task:?}: waiting on {object:?}");
}

/// Switch away from the task `task`, which has just entered the Waiting state.
/// Returns when the wait has ended and `task` is running again.
pub(crate) fn block(
    lock: &mut CpuLockGuard<'_>,
    task: Id,
) -> (Result<(), WaitTimeoutError>, WaitPayload) {
    task::switch_away(lock, task);

    match lock.tasks[task].wait.take() {
        Some(wait) => (wait.result, wait.payload),
        None => unreachable!("task resumed without a wait result"),
    }
}

/// [`enqueue_wait`] followed by [`block`].
pub(crate) fn wait_until_woken_up(
    lock: &mut CpuLockGuard<'_>,
    task: Id,
    object: WaitObject,
    payload: WaitPayload,
    timeout: Timeout,
) -> (Result<(), WaitTimeoutError>, WaitPayload) {
    enqueue_wait(lock, task, object, payload, timeout);
    block(lock, task)
}

/// End the wait of `task` with `result`, and make it Ready (or Suspended if a
/// suspension was requested while it was waiting).
pub(crate) fn complete_wait(state: &mut State, task: Id, result: Result<(), WaitTimeoutError>) {
    let tcb = &mut state.tasks[task];
    debug_assert_eq!(tcb.st, TaskSt::Waiting);
    let Some(wait) = tcb.wait.as_mut() else {
        unreachable!("waiting task has no wait state");
    };
    wait.result = result;
    let object = wait.object;

    if let Some((deadline, seq)) = tcb.timeout.take() {
        state.timeouts.remove(&(deadline, seq, task));
    }

    if let (Some(wait_queue), tasks) = split_wait_queue(state, object) {
        wait_queue.remove(tasks, task);
    }

    if result.is_err() {
        match object {
            WaitObject::EventGroup(group) => {
                let bits = state.event_groups.get(group).map(|cb| cb.bits);
                if let Some(Wait {
                    payload: WaitPayload::EventGroupBits { orig_bits, .. },
                    ..
                }) = &mut state.tasks[task].wait
                {
                    *orig_bits = bits;
                }
            }
            WaitObject::Mutex(mutex) => {
                // The owner might have been inheriting this task's priority
                if let Some(owner) = state.mutexes.get(mutex).and_then(|cb| cb.owner) {
                    mutex::update_effective_priority(state, owner);
                }
            }
            _ => {}
        }
    }

    task::make_ready(state, task);
}

/// Detach a waiting task that is being deleted from everything related to its
/// wait. The task is left in the Waiting state.
pub(crate) fn abandon_wait(state: &mut State, task: Id) {
    let tcb = &mut state.tasks[task];
    let Some(wait) = tcb.wait.take() else {
        return;
    };
    if let Some((deadline, seq)) = tcb.timeout.take() {
        state.timeouts.remove(&(deadline, seq, task));
    }
    if let (Some(wait_queue), tasks) = split_wait_queue(state, wait.object) {
        wait_queue.remove(tasks, task);
    }
    if let WaitObject::Mutex(mutex) = wait.object {
        if let Some(owner) = state.mutexes.get(mutex).and_then(|cb| cb.owner) {
            mutex::update_effective_priority(state, owner);
        }
    }
}

/// Reposition `task` in the wait queue it's waiting on after a change in its
/// effective priority. Returns the object it's waiting on.
pub(crate) fn reorder_wait_of_task(state: &mut State, task: Id) -> Option<WaitObject> {
    let object = state.tasks[task].wait.as_ref()?.object;
    if let (Some(wait_queue), tasks) = split_wait_queue(state, object) {
        wait_queue.remove(tasks, task);
        wait_queue.insert(tasks, task);
    }
    Some(object)
}

/// Get a mutable reference to the payload of a waiting task.
pub(crate) fn payload_mut(state: &mut State, task: Id) -> &mut WaitPayload {
    match &mut state.tasks[task].wait {
        Some(wait) => &mut wait.payload,
        None => unreachable!("task is not waiting"),
    }
}
