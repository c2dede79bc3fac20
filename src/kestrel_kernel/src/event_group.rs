//! Event groups
use bitflags::bitflags;
use std::fmt;

use crate::{
    error::{NoAccessError, UpdateEventGroupError, WaitEventGroupError, WaitTimeoutError},
    interrupt::IsrContext,
    klock::CpuLockGuard,
    state::{self, State},
    task,
    utils::Id,
    wait::{self, WaitObject, WaitPayload, WaitQueue},
    Kernel, Timeout,
};

/// The value of an event group.
pub type EventBits = u32;

bitflags! {
    /// Options for [`EventGroup::wait_bits`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WaitFlags: u8 {
        /// Wait for all of the bits in the mask. Without this flag, any one
        /// bit is enough.
        const ALL = 1 << 0;
        /// Clear the bits in the mask when the wait is satisfied.
        const CLEAR = 1 << 1;
    }
}

/// *Event group control block*
#[derive(Debug)]
pub(crate) struct EventGroupCb {
    pub(crate) bits: EventBits,
    pub(crate) wait_queue: WaitQueue,
}

fn event_group_cb(state: &mut State, id: Id) -> Result<&mut EventGroupCb, NoAccessError> {
    state.event_groups.get_mut(id).ok_or(NoAccessError::NoAccess)
}

fn is_satisfied(value: EventBits, mask: EventBits, flags: WaitFlags) -> bool {
    if flags.contains(WaitFlags::ALL) {
        value & mask == mask
    } else {
        value & mask != 0
    }
}

/// Set bits and release the waiters whose conditions are met.
///
/// Every waiter is evaluated against the value right after the bits are set.
/// The bits to be cleared on the waiters' behalf are cleared only after all
/// of them are evaluated, so that all parties of a barrier are released.
fn set_bits_core(state: &mut State, group: Id, mask: EventBits) -> EventBits {
    let group_cb = &mut state.event_groups[group];
    group_cb.bits |= mask;
    let value = group_cb.bits;

    let waiters: Vec<Id> = group_cb.wait_queue.iter(&state.tasks).collect();
    let mut bits_to_clear = 0;
    for waiter in waiters {
        let WaitPayload::EventGroupBits {
            bits,
            flags,
            orig_bits,
        } = wait::payload_mut(state, waiter)
        else {
            unreachable!("event group waiter without a bits payload");
        };
        if !is_satisfied(value, *bits, *flags) {
            continue;
        }
        *orig_bits = Some(value);
        if flags.contains(WaitFlags::CLEAR) {
            bits_to_clear |= *bits;
        }
        wait::complete_wait(state, waiter, Ok(()));
    }

    let group_cb = &mut state.event_groups[group];
    group_cb.bits &= !bits_to_clear;
    group_cb.bits
}

/// Block the calling task until the condition is met, and return the value
/// that satisfied it.
fn wait_core(
    lock: &mut CpuLockGuard<'_>,
    group: Id,
    mask: EventBits,
    flags: WaitFlags,
    timeout: Timeout,
) -> Result<EventBits, WaitEventGroupError> {
    let task = state::expect_waitable_context(lock)?;
    let (result, payload) = wait::wait_until_woken_up(
        lock,
        task,
        WaitObject::EventGroup(group),
        WaitPayload::EventGroupBits {
            bits: mask,
            flags,
            orig_bits: None,
        },
        timeout,
    );

    let WaitPayload::EventGroupBits { orig_bits, .. } = payload else {
        unreachable!("event group waiter without a bits payload");
    };
    let value = orig_bits.unwrap_or_default();
    match result {
        Ok(()) => Ok(value),
        Err(WaitTimeoutError::Timeout) => Err(WaitEventGroupError::Timeout(value)),
        Err(WaitTimeoutError::Interrupted) => Err(WaitEventGroupError::Interrupted),
    }
}

/// A set of event flags that tasks can wait on.
#[derive(Clone, PartialEq, Eq)]
pub struct EventGroup {
    kernel: Kernel,
    id: Id,
}

impl fmt::Debug for EventGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("EventGroup").field(&self.id).finish()
    }
}

impl EventGroup {
    /// Create an event group with all bits cleared.
    pub fn new(kernel: &Kernel) -> Self {
        let id = kernel.lock_cpu().event_groups.insert(EventGroupCb {
            bits: 0,
            wait_queue: WaitQueue::default(),
        });
        log::debug!("created event group {id:?}");
        Self {
            kernel: kernel.clone(),
            id,
        }
    }

    /// Set the bits in `mask`, releasing the tasks whose wait conditions are
    /// met. Returns the value after the waiters' bits were cleared.
    pub fn set_bits(&self, mask: EventBits) -> Result<EventBits, UpdateEventGroupError> {
        let mut lock = self.kernel.lock_cpu();
        event_group_cb(&mut lock, self.id)?;
        let value = set_bits_core(&mut lock, self.id, mask);
        task::unlock_cpu_and_check_preemption(lock);
        Ok(value)
    }

    /// Clear the bits in `mask`. Returns the value before clearing.
    pub fn clear_bits(&self, mask: EventBits) -> Result<EventBits, UpdateEventGroupError> {
        let mut lock = self.kernel.lock_cpu();
        let group_cb = event_group_cb(&mut lock, self.id)?;
        let value = group_cb.bits;
        group_cb.bits &= !mask;
        Ok(value)
    }

    /// Get the current value.
    pub fn bits(&self) -> Result<EventBits, UpdateEventGroupError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(event_group_cb(&mut lock, self.id)?.bits)
    }

    pub fn set_bits_from_isr(
        &self,
        cx: &mut IsrContext<'_>,
        mask: EventBits,
    ) -> Result<EventBits, UpdateEventGroupError> {
        cx.check_kernel(&self.kernel);
        let mut lock = self.kernel.lock_cpu();
        event_group_cb(&mut lock, self.id)?;
        let value = set_bits_core(&mut lock, self.id, mask);
        cx.check_woken(&lock);
        Ok(value)
    }

    pub fn clear_bits_from_isr(
        &self,
        cx: &mut IsrContext<'_>,
        mask: EventBits,
    ) -> Result<EventBits, UpdateEventGroupError> {
        cx.check_kernel(&self.kernel);
        self.clear_bits(mask)
    }

    /// Wait for at most `timeout` for the bits in `mask` to be set (all of
    /// them with [`WaitFlags::ALL`], any of them otherwise).
    ///
    /// Returns the value that satisfied the condition, before the bits were
    /// cleared by [`WaitFlags::CLEAR`]. On timeout, the error carries the
    /// value at that moment.
    pub fn wait_bits(
        &self,
        mask: EventBits,
        flags: WaitFlags,
        timeout: Timeout,
    ) -> Result<EventBits, WaitEventGroupError> {
        if mask == 0 {
            return Err(WaitEventGroupError::BadParam);
        }
        let mut lock = self.kernel.lock_cpu();
        state::check_blocking_call(&lock, timeout);

        let group_cb = event_group_cb(&mut lock, self.id)?;
        let value = group_cb.bits;
        if is_satisfied(value, mask, flags) {
            if flags.contains(WaitFlags::CLEAR) {
                group_cb.bits &= !mask;
            }
            return Ok(value);
        }

        if timeout.is_no_wait() {
            return Err(WaitEventGroupError::Timeout(value));
        }
        wait_core(&mut lock, self.id, mask, flags, timeout)
    }

    /// Set the bits in `set`, then wait for all of the bits in `wait` to be
    /// set, and clear them. Used to make a group of tasks meet at a barrier,
    /// each task setting its own bit and waiting for everyone's.
    ///
    /// Returns the value that satisfied the condition.
    pub fn sync(
        &self,
        set: EventBits,
        wait: EventBits,
        timeout: Timeout,
    ) -> Result<EventBits, WaitEventGroupError> {
        if wait == 0 {
            return Err(WaitEventGroupError::BadParam);
        }
        let mut lock = self.kernel.lock_cpu();
        state::check_blocking_call(&lock, timeout);
        state::expect_task_context(&lock)?;

        let orig_bits = event_group_cb(&mut lock, self.id)?.bits;
        let value = set_bits_core(&mut lock, self.id, set);

        if (orig_bits | set) & wait == wait {
            // This task completed the barrier
            lock.event_groups[self.id].bits &= !wait;
            task::unlock_cpu_and_check_preemption(lock);
            return Ok(orig_bits | set);
        }

        if timeout.is_no_wait() {
            task::unlock_cpu_and_check_preemption(lock);
            return Err(WaitEventGroupError::Timeout(value));
        }
        wait_core(
            &mut lock,
            self.id,
            wait,
            WaitFlags::ALL | WaitFlags::CLEAR,
            timeout,
        )
    }
}
