//! Queue sets
use std::{collections::VecDeque, fmt};

use crate::{
    error::{CreateQueueSetError, NoAccessError, QueueSetMemberError, ReceiveError},
    state::{self, State},
    task,
    utils::Id,
    wait::{self, WaitObject, WaitPayload, WaitQueue},
    Kernel, Timeout,
};

/// Identifies a queue or a semaphore that can be added to a [`QueueSet`].
///
/// Obtained by [`Queue::as_set_member`] or [`Semaphore::as_set_member`] and
/// returned by [`QueueSet::select`].
///
/// [`Queue::as_set_member`]: crate::Queue::as_set_member
/// [`Semaphore::as_set_member`]: crate::Semaphore::as_set_member
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetMember(Member);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Member {
    Queue(Id),
    Semaphore(Id),
}

impl fmt::Debug for SetMember {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Member::Queue(id) => f.debug_tuple("Queue").field(&id).finish(),
            Member::Semaphore(id) => f.debug_tuple("Semaphore").field(&id).finish(),
        }
    }
}

impl SetMember {
    pub(crate) fn queue(id: Id) -> Self {
        Self(Member::Queue(id))
    }

    pub(crate) fn semaphore(id: Id) -> Self {
        Self(Member::Semaphore(id))
    }

    /// Get the member's `set` field.
    fn set_mut(self, state: &mut State) -> Result<&mut Option<Id>, NoAccessError> {
        let set = match self.0 {
            Member::Queue(id) => state.queues.get_mut(id).map(|cb| &mut cb.set),
            Member::Semaphore(id) => state.semaphores.get_mut(id).map(|cb| &mut cb.set),
        };
        set.ok_or(NoAccessError::NoAccess)
    }

    fn is_empty(self, state: &State) -> bool {
        match self.0 {
            Member::Queue(id) => state.queues[id].is_empty(),
            Member::Semaphore(id) => state.semaphores[id].count == 0,
        }
    }
}

/// *Queue set control block*
#[derive(Debug)]
pub(crate) struct QueueSetCb {
    /// Members that received an item (or a count), one entry per item.
    ready: VecDeque<SetMember>,
    capacity: usize,
    pub(crate) wait_queue: WaitQueue,
}

fn queue_set_cb(state: &mut State, id: Id) -> Result<&mut QueueSetCb, NoAccessError> {
    state.queue_sets.get_mut(id).ok_or(NoAccessError::NoAccess)
}

/// Record that `member` of `set` received an item. A task blocked in
/// [`QueueSet::select`] is given the member directly.
pub(crate) fn post(state: &mut State, set: Id, member: SetMember) {
    let set_cb = &mut state.queue_sets[set];
    if let Some(waiter) = set_cb.wait_queue.first() {
        let WaitPayload::QueueSet { member: slot } = wait::payload_mut(state, waiter) else {
            unreachable!("set waiter without a set payload");
        };
        *slot = Some(member);
        wait::complete_wait(state, waiter, Ok(()));
        return;
    }

    if set_cb.ready.len() >= set_cb.capacity {
        log::warn!(
            "queue set {set:?} holds more than {} entries; its capacity should cover \
            every member's length",
            set_cb.capacity
        );
    }
    set_cb.ready.push_back(member);
}

/// Drop the entries of `member`, whose items were discarded.
pub(crate) fn forget(state: &mut State, set: Id, member: SetMember) {
    state.queue_sets[set].ready.retain(|&m| m != member);
}

/// A set of queues and semaphores that a task can block on at once.
///
/// An entry is recorded each time an item is sent to a member queue or a
/// member semaphore is given. [`Self::select`] returns the member of the
/// oldest entry. The caller is then expected to receive from (or take) that
/// member with [`Timeout::NO_WAIT`].
///
/// Members must be empty when they are added or removed.
#[derive(Clone, PartialEq, Eq)]
pub struct QueueSet {
    kernel: Kernel,
    id: Id,
}

impl fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("QueueSet").field(&self.id).finish()
    }
}

impl QueueSet {
    /// Create a queue set. `capacity` should be at least the sum of the
    /// lengths of the members (a binary semaphore counts as one).
    pub fn new(kernel: &Kernel, capacity: usize) -> Result<Self, CreateQueueSetError> {
        if capacity == 0 {
            return Err(CreateQueueSetError::BadParam);
        }
        let id = kernel.lock_cpu().queue_sets.insert(QueueSetCb {
            ready: VecDeque::with_capacity(capacity),
            capacity,
            wait_queue: WaitQueue::default(),
        });
        log::debug!("created queue set {id:?} (capacity = {capacity})");
        Ok(Self {
            kernel: kernel.clone(),
            id,
        })
    }

    /// Add an empty member that doesn't belong to any set.
    pub fn add(&self, member: impl Into<SetMember>) -> Result<(), QueueSetMemberError> {
        let member = member.into();
        let mut lock = self.kernel.lock_cpu();
        queue_set_cb(&mut lock, self.id)?;
        if member.set_mut(&mut lock)?.is_some() || !member.is_empty(&lock) {
            return Err(QueueSetMemberError::BadObjectState);
        }
        *member.set_mut(&mut lock)? = Some(self.id);
        log::trace!("queue set {:?}: added {member:?}", self.id);
        Ok(())
    }

    /// Remove an empty member.
    pub fn remove(&self, member: impl Into<SetMember>) -> Result<(), QueueSetMemberError> {
        let member = member.into();
        let mut lock = self.kernel.lock_cpu();
        queue_set_cb(&mut lock, self.id)?;
        if *member.set_mut(&mut lock)? != Some(self.id) || !member.is_empty(&lock) {
            return Err(QueueSetMemberError::BadObjectState);
        }
        *member.set_mut(&mut lock)? = None;
        forget(&mut lock, self.id, member);
        log::trace!("queue set {:?}: removed {member:?}", self.id);
        Ok(())
    }

    /// Wait for at most `timeout` for a member to receive an item, and return
    /// that member.
    pub fn select(&self, timeout: Timeout) -> Result<SetMember, ReceiveError> {
        let mut lock = self.kernel.lock_cpu();
        state::check_blocking_call(&lock, timeout);

        let member = queue_set_cb(&mut lock, self.id)?.ready.pop_front();
        if let Some(member) = member {
            task::unlock_cpu_and_check_preemption(lock);
            return Ok(member);
        }

        if timeout.is_no_wait() {
            return Err(ReceiveError::Timeout);
        }
        let task = state::expect_waitable_context(&lock)?;

        let (result, payload) = wait::wait_until_woken_up(
            &mut lock,
            task,
            WaitObject::QueueSet(self.id),
            WaitPayload::QueueSet { member: None },
            timeout,
        );
        result?;

        match payload {
            WaitPayload::QueueSet {
                member: Some(member),
            } => Ok(member),
            _ => unreachable!("set waiter woken up without a member"),
        }
    }
}
