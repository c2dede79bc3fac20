//! Mutexes with priority inheritance
//!
//! A task's effective priority is its base priority raised to the highest
//! effective priority among the tasks waiting for the mutexes it holds. It's
//! recalculated by [`update_effective_priority`] whenever one of the inputs
//! changes: a task starts or stops waiting for a mutex, a mutex changes hands,
//! or a base priority is changed. A change propagates along the chain of
//! owners (a waiter raises the owner, which may itself be waiting for another
//! mutex, and so on).
use std::fmt;

use crate::{
    error::{LockMutexError, NoAccessError, QueryMutexError, UnlockMutexError},
    klock::CpuLockGuard,
    state::{self, Context, State},
    task::{self, TaskHandle, TaskSt},
    utils::Id,
    wait::{self, WaitObject, WaitPayload, WaitQueue},
    Kernel, Timeout,
};

/// *Mutex control block*
#[derive(Debug)]
pub(crate) struct MutexCb {
    pub(crate) owner: Option<Id>,
    pub(crate) recursive: bool,
    /// The number of times the owner has locked the mutex.
    pub(crate) nest_count: u32,
    pub(crate) wait_queue: WaitQueue,
}

fn mutex_cb(state: &mut State, id: Id) -> Result<&mut MutexCb, NoAccessError> {
    state.mutexes.get_mut(id).ok_or(NoAccessError::NoAccess)
}

/// Calculate the effective priority of `task` from its base priority and the
/// waiters of the mutexes it holds. Each wait queue is sorted, so only the
/// first waiter needs to be examined.
pub(crate) fn evaluate_task_effective_priority(state: &State, task: Id) -> usize {
    let tcb = &state.tasks[task];
    tcb.held_mutexes
        .iter()
        .filter_map(|&mutex| state.mutexes.get(mutex)?.wait_queue.first())
        .map(|waiter| state.tasks[waiter].effective_priority)
        .fold(tcb.base_priority, usize::max)
}

/// Recalculate the effective priority of `task` and reposition it in the
/// ready queue or the wait queue it's in. If it's waiting for a mutex, the
/// owner's effective priority is updated in turn.
pub(crate) fn update_effective_priority(state: &mut State, task: Id) {
    let mut task = task;
    loop {
        let Some(tcb) = state.tasks.get(task) else {
            return;
        };
        let old_priority = tcb.effective_priority;
        let new_priority = evaluate_task_effective_priority(state, task);
        if new_priority == old_priority {
            return;
        }

        let tcb = &mut state.tasks[task];
        tcb.effective_priority = new_priority;
        let st = tcb.st;
        log::trace!("{task:?}: effective priority {old_priority} -> {new_priority}");

        match st {
            TaskSt::Ready => state.ready.reorder_task(&mut state.tasks, task, old_priority),
            TaskSt::Waiting => {
                if let Some(WaitObject::Mutex(mutex)) = wait::reorder_wait_of_task(state, task) {
                    if let Some(owner) = state.mutexes.get(mutex).and_then(|cb| cb.owner) {
                        task = owner;
                        continue;
                    }
                }
            }
            TaskSt::Running | TaskSt::Suspended | TaskSt::Deleted => {}
        }
        return;
    }
}

/// Give the ownership of the mutex to `task`.
fn lock_core(state: &mut State, mutex: Id, task: Id) {
    let mutex_cb = &mut state.mutexes[mutex];
    debug_assert!(mutex_cb.owner.is_none());
    mutex_cb.owner = Some(task);
    mutex_cb.nest_count = 1;
    state.tasks[task].held_mutexes.push(mutex);
}

#[track_caller]
fn deny_interrupt_context(lock: &CpuLockGuard<'_>) {
    if lock.context() == Context::Isr {
        panic!("mutexes cannot be used from interrupt context");
    }
}

fn lock_mutex(kernel: &Kernel, mutex: Id, timeout: Timeout) -> Result<(), LockMutexError> {
    let mut lock = kernel.lock_cpu();
    deny_interrupt_context(&lock);
    let task = state::expect_task_context(&lock)?;

    let mutex_cb = mutex_cb(&mut lock, mutex)?;
    let (owner, recursive) = (mutex_cb.owner, mutex_cb.recursive);
    let owner = match owner {
        None => {
            lock_core(&mut lock, mutex, task);
            return Ok(());
        }
        Some(owner) if owner == task => {
            if !recursive {
                return Err(LockMutexError::WouldDeadlock);
            }
            lock.mutexes[mutex].nest_count += 1;
            return Ok(());
        }
        Some(owner) => owner,
    };

    if timeout.is_no_wait() {
        return Err(LockMutexError::Timeout);
    }
    state::expect_waitable_context(&lock)?;

    // The owner inherits the priority of the new waiter. The wake-upper is
    // responsible for using `lock_core` to complete the effect of the wait
    // operation.
    wait::enqueue_wait(
        &mut lock,
        task,
        WaitObject::Mutex(mutex),
        WaitPayload::None,
        timeout,
    );
    update_effective_priority(&mut lock, owner);

    let (result, _) = wait::block(&mut lock, task);
    result?;
    debug_assert_eq!(lock.mutexes[mutex].owner, Some(task));
    Ok(())
}

fn unlock_mutex(kernel: &Kernel, mutex: Id) -> Result<(), UnlockMutexError> {
    let mut lock = kernel.lock_cpu();
    deny_interrupt_context(&lock);
    let task = state::expect_task_context(&lock)?;

    let mutex_cb = mutex_cb(&mut lock, mutex)?;
    if mutex_cb.owner != Some(task) {
        return Err(UnlockMutexError::NotOwner);
    }
    if mutex_cb.nest_count > 1 {
        mutex_cb.nest_count -= 1;
        return Ok(());
    }

    // Mutexes may be released in any order
    let held_mutexes = &mut lock.tasks[task].held_mutexes;
    if let Some(i) = held_mutexes.iter().rposition(|&m| m == mutex) {
        held_mutexes.remove(i);
    }

    unlock_mutex_unchecked(&mut lock, mutex);

    // Drop the priority this task inherited through the mutex. This may
    // cause preemption.
    update_effective_priority(&mut lock, task);

    task::unlock_cpu_and_check_preemption(lock);
    Ok(())
}

/// Hand the mutex over to the next waiter, or release it if there's none.
fn unlock_mutex_unchecked(state: &mut State, mutex: Id) {
    let mutex_cb = &mut state.mutexes[mutex];
    mutex_cb.owner = None;
    mutex_cb.nest_count = 0;

    if let Some(next_task) = mutex_cb.wait_queue.first() {
        wait::complete_wait(state, next_task, Ok(()));
        lock_core(state, mutex, next_task);
        // The remaining waiters now raise the new owner
        update_effective_priority(state, next_task);
    }
}

fn owner(kernel: &Kernel, mutex: Id) -> Result<Option<TaskHandle>, QueryMutexError> {
    let mut lock = kernel.lock_cpu();
    let owner = mutex_cb(&mut lock, mutex)?.owner;
    Ok(owner.map(|id| TaskHandle::from_id(kernel, id)))
}

fn create(kernel: &Kernel, recursive: bool) -> Id {
    let id = kernel.lock_cpu().mutexes.insert(MutexCb {
        owner: None,
        recursive,
        nest_count: 0,
        wait_queue: WaitQueue::default(),
    });
    log::debug!("created mutex {id:?} (recursive = {recursive})");
    id
}

/// A mutex with priority inheritance.
///
/// While a task waits for the mutex, the owner runs at least at the waiter's
/// priority. Locking a mutex the calling task already owns fails with
/// [`LockMutexError::WouldDeadlock`]. Use [`RecursiveMutex`] to allow it.
///
/// Mutexes can't be used by interrupt handlers.
#[derive(Clone, PartialEq, Eq)]
pub struct Mutex {
    kernel: Kernel,
    id: Id,
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Mutex").field(&self.id).finish()
    }
}

impl Mutex {
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            kernel: kernel.clone(),
            id: create(kernel, false),
        }
    }

    /// Lock the mutex, waiting for at most `timeout`.
    pub fn lock(&self, timeout: Timeout) -> Result<(), LockMutexError> {
        lock_mutex(&self.kernel, self.id, timeout)
    }

    /// Unlock the mutex. Fails with [`UnlockMutexError::NotOwner`] if the
    /// calling task doesn't own it.
    pub fn unlock(&self) -> Result<(), UnlockMutexError> {
        unlock_mutex(&self.kernel, self.id)
    }

    pub fn is_locked(&self) -> Result<bool, QueryMutexError> {
        Ok(self.owner()?.is_some())
    }

    /// Get the task owning the mutex.
    pub fn owner(&self) -> Result<Option<TaskHandle>, QueryMutexError> {
        owner(&self.kernel, self.id)
    }
}

/// A mutex that can be locked repeatedly by its owner. It's released when
/// it has been unlocked as many times as it was locked.
///
/// Priority inheritance applies as with [`Mutex`].
#[derive(Clone, PartialEq, Eq)]
pub struct RecursiveMutex {
    kernel: Kernel,
    id: Id,
}

impl fmt::Debug for RecursiveMutex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("RecursiveMutex").field(&self.id).finish()
    }
}

impl RecursiveMutex {
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            kernel: kernel.clone(),
            id: create(kernel, true),
        }
    }

    /// Lock the mutex, waiting for at most `timeout` if another task owns
    /// it.
    pub fn lock(&self, timeout: Timeout) -> Result<(), LockMutexError> {
        lock_mutex(&self.kernel, self.id, timeout)
    }

    /// Undo one [`Self::lock`].
    pub fn unlock(&self) -> Result<(), UnlockMutexError> {
        unlock_mutex(&self.kernel, self.id)
    }

    pub fn is_locked(&self) -> Result<bool, QueryMutexError> {
        Ok(self.owner()?.is_some())
    }

    pub fn owner(&self) -> Result<Option<TaskHandle>, QueryMutexError> {
        owner(&self.kernel, self.id)
    }

    /// Get the number of times the owner has locked the mutex. Returns `0`
    /// if the mutex is free.
    pub fn lock_count(&self) -> Result<u32, QueryMutexError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(mutex_cb(&mut lock, self.id)?.nest_count)
    }
}
