//! Semaphores
use std::fmt;

use crate::{
    error::{
        CreateSemaphoreError, GiveSemaphoreError, NoAccessError, QuerySemaphoreError,
        TakeSemaphoreError, TryTakeSemaphoreError,
    },
    interrupt::IsrContext,
    queue_set::{self, SetMember},
    state::{self, State},
    task,
    utils::Id,
    wait::{self, WaitObject, WaitPayload, WaitQueue},
    Kernel, Timeout,
};

/// *Semaphore control block*
#[derive(Debug)]
pub(crate) struct SemaphoreCb {
    pub(crate) count: u32,
    max: u32,
    pub(crate) wait_queue: WaitQueue,
    /// The queue set this semaphore belongs to.
    pub(crate) set: Option<Id>,
}

fn semaphore_cb(state: &mut State, id: Id) -> Result<&mut SemaphoreCb, NoAccessError> {
    state.semaphores.get_mut(id).ok_or(NoAccessError::NoAccess)
}

/// Release one permit. A blocked taker receives it directly.
fn give_core(state: &mut State, semaphore: Id) -> Result<(), GiveSemaphoreError> {
    let semaphore_cb = semaphore_cb(state, semaphore)?;
    if let Some(waiter) = semaphore_cb.wait_queue.first() {
        wait::complete_wait(state, waiter, Ok(()));
        return Ok(());
    }

    if semaphore_cb.count >= semaphore_cb.max {
        return Err(GiveSemaphoreError::QueueOverflow);
    }
    semaphore_cb.count += 1;
    if let Some(set) = semaphore_cb.set {
        queue_set::post(state, set, SetMember::semaphore(semaphore));
    }
    Ok(())
}

/// Take a permit without blocking. Returns `false` if there's none.
fn poll_core(semaphore_cb: &mut SemaphoreCb) -> bool {
    if semaphore_cb.count > 0 {
        semaphore_cb.count -= 1;
        true
    } else {
        false
    }
}

/// A counting semaphore.
///
/// A binary semaphore is a counting semaphore whose maximum count is `1`.
/// Waiting takers are served in the order of priority, and in FIFO order
/// among tasks of the same priority.
#[derive(Clone, PartialEq, Eq)]
pub struct Semaphore {
    kernel: Kernel,
    id: Id,
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Semaphore").field(&self.id).finish()
    }
}

impl Semaphore {
    /// Create a binary semaphore. It starts empty, so it must be given
    /// before it can be taken.
    pub fn new_binary(kernel: &Kernel) -> Self {
        match Self::new_counting(kernel, 1, 0) {
            Ok(semaphore) => semaphore,
            Err(_) => unreachable!(),
        }
    }

    /// Create a counting semaphore.
    pub fn new_counting(
        kernel: &Kernel,
        max: u32,
        initial: u32,
    ) -> Result<Self, CreateSemaphoreError> {
        if max == 0 || initial > max {
            return Err(CreateSemaphoreError::BadParam);
        }
        let id = kernel.lock_cpu().semaphores.insert(SemaphoreCb {
            count: initial,
            max,
            wait_queue: WaitQueue::default(),
            set: None,
        });
        log::debug!("created semaphore {id:?} ({initial}/{max})");
        Ok(Self {
            kernel: kernel.clone(),
            id,
        })
    }

    /// Take a permit, waiting for at most `timeout` for one to be given.
    pub fn take(&self, timeout: Timeout) -> Result<(), TakeSemaphoreError> {
        let mut lock = self.kernel.lock_cpu();
        state::check_blocking_call(&lock, timeout);

        if poll_core(semaphore_cb(&mut lock, self.id)?) {
            return Ok(());
        }

        if timeout.is_no_wait() {
            return Err(TakeSemaphoreError::Timeout);
        }
        let task = state::expect_waitable_context(&lock)?;

        // The giver hands the permit over without touching the count
        let (result, _) = wait::wait_until_woken_up(
            &mut lock,
            task,
            WaitObject::Semaphore(self.id),
            WaitPayload::None,
            timeout,
        );
        Ok(result?)
    }

    /// Release a permit. Fails with `QueueOverflow` if the count is already
    /// at its maximum.
    pub fn give(&self) -> Result<(), GiveSemaphoreError> {
        let mut lock = self.kernel.lock_cpu();
        give_core(&mut lock, self.id)?;
        task::unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    pub fn give_from_isr(&self, cx: &mut IsrContext<'_>) -> Result<(), GiveSemaphoreError> {
        cx.check_kernel(&self.kernel);
        let mut lock = self.kernel.lock_cpu();
        give_core(&mut lock, self.id)?;
        cx.check_woken(&lock);
        Ok(())
    }

    pub fn take_from_isr(&self, cx: &mut IsrContext<'_>) -> Result<(), TryTakeSemaphoreError> {
        cx.check_kernel(&self.kernel);
        let mut lock = self.kernel.lock_cpu();
        if poll_core(semaphore_cb(&mut lock, self.id)?) {
            Ok(())
        } else {
            Err(TryTakeSemaphoreError::Timeout)
        }
    }

    /// Get the current count.
    pub fn count(&self) -> Result<u32, QuerySemaphoreError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(semaphore_cb(&mut lock, self.id)?.count)
    }

    /// Get the identity of this semaphore as a member of a [`QueueSet`].
    ///
    /// [`QueueSet`]: crate::QueueSet
    pub fn as_set_member(&self) -> SetMember {
        SetMember::semaphore(self.id)
    }
}

impl From<&Semaphore> for SetMember {
    fn from(semaphore: &Semaphore) -> Self {
        semaphore.as_set_member()
    }
}
