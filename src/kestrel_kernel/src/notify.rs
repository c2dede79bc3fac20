//! Task notifications
//!
//! Each task has a 32-bit notification value and a pending flag. A
//! notification updates the value and wakes up the task if it's waiting for
//! one, which makes notifications a lightweight replacement for a binary or
//! counting semaphore, an event group, or a single-item mailbox dedicated to
//! one receiving task.
use crate::{
    error::{NotifyError, WaitNotificationError, WaitTimeoutError},
    interrupt::IsrContext,
    klock::CpuLockGuard,
    state::{self, State},
    task::{self, TaskHandle, TaskSt},
    utils::Id,
    wait::{self, Wait, WaitObject, WaitPayload},
    Kernel, Timeout,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum NotifyState {
    #[default]
    NotWaiting,
    Waiting,
    /// A notification is pending.
    Received,
}

/// The notification state of a task.
#[derive(Debug, Default)]
pub(crate) struct NotificationCb {
    value: u32,
    state: NotifyState,
}

/// How [`TaskHandle::notify`] updates the notification value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyAction {
    /// Leave the value unchanged.
    NoAction,
    /// Bitwise-OR the value with the given bits.
    SetBits(u32),
    /// Increment the value, wrapping around.
    Increment,
    /// Replace the value.
    Overwrite(u32),
    /// Replace the value unless a notification is already pending, in which
    /// case the call fails with [`NotifyError::QueueOverflow`].
    SetIfNoPending(u32),
}

/// How [`Kernel::notify_take`] consumes the notification value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TakeMode {
    /// Reset the value to zero (binary semaphore).
    Clear,
    /// Decrement the value (counting semaphore).
    Decrement,
}

/// Update the notification value of `task` and wake it up if it's waiting
/// for a notification. Returns the previous value.
fn notify_core(state: &mut State, task: Id, action: NotifyAction) -> Result<u32, NotifyError> {
    let tcb = task::task_cb(state, task)?;
    let notification = &mut tcb.notification;
    let prev_value = notification.value;
    let prev_state = notification.state;

    match action {
        NotifyAction::NoAction => {}
        NotifyAction::SetBits(bits) => notification.value |= bits,
        NotifyAction::Increment => notification.value = notification.value.wrapping_add(1),
        NotifyAction::Overwrite(value) => notification.value = value,
        NotifyAction::SetIfNoPending(value) => {
            if prev_state == NotifyState::Received {
                return Err(NotifyError::QueueOverflow);
            }
            notification.value = value;
        }
    }
    notification.state = NotifyState::Received;

    // The task may have stopped waiting (e.g., timed out) without having run
    // yet to reset its state
    let is_waiting = tcb.st == TaskSt::Waiting
        && matches!(
            tcb.wait,
            Some(Wait {
                object: WaitObject::Notification,
                ..
            })
        );
    if prev_state == NotifyState::Waiting && is_waiting {
        log::trace!("{task:?}: notified, waking up");
        wait::complete_wait(state, task, Ok(()));
    }

    Ok(prev_value)
}

impl TaskHandle {
    /// Send a notification to the task.
    pub fn notify(&self, action: NotifyAction) -> Result<(), NotifyError> {
        self.notify_and_query(action).map(drop)
    }

    /// Send a notification to the task, and get the notification value it
    /// had before.
    pub fn notify_and_query(&self, action: NotifyAction) -> Result<u32, NotifyError> {
        let mut lock = self.kernel().lock_cpu();
        let prev_value = notify_core(&mut lock, self.id(), action)?;
        task::unlock_cpu_and_check_preemption(lock);
        Ok(prev_value)
    }

    /// Increment the notification value. Used with [`Kernel::notify_take`] to
    /// treat the notification value as a counting semaphore.
    pub fn notify_give(&self) -> Result<(), NotifyError> {
        self.notify(NotifyAction::Increment)
    }

    pub fn notify_from_isr(
        &self,
        cx: &mut IsrContext<'_>,
        action: NotifyAction,
    ) -> Result<(), NotifyError> {
        cx.check_kernel(self.kernel());
        let mut lock = self.kernel().lock_cpu();
        notify_core(&mut lock, self.id(), action)?;
        cx.check_woken(&lock);
        Ok(())
    }

    pub fn notify_give_from_isr(&self, cx: &mut IsrContext<'_>) -> Result<(), NotifyError> {
        self.notify_from_isr(cx, NotifyAction::Increment)
    }

    /// Clear the pending notification of the task without changing the
    /// value. Returns `true` if one was pending.
    pub fn clear_notification(&self) -> Result<bool, NotifyError> {
        let mut lock = self.kernel().lock_cpu();
        let notification = &mut task::task_cb(&mut lock, self.id())?.notification;
        let was_pending = notification.state == NotifyState::Received;
        if was_pending {
            notification.state = NotifyState::NotWaiting;
        }
        Ok(was_pending)
    }
}

/// Block the calling task until a notification arrives.
fn wait_for_notification(
    lock: &mut CpuLockGuard<'_>,
    task: Id,
    timeout: Timeout,
) -> Result<(), WaitTimeoutError> {
    lock.tasks[task].notification.state = NotifyState::Waiting;
    let (result, _) = wait::wait_until_woken_up(
        lock,
        task,
        WaitObject::Notification,
        WaitPayload::None,
        timeout,
    );
    result
}

/// Notification services for the calling task
impl Kernel {
    /// Wait for at most `timeout` for the notification value to become
    /// non-zero, and then clear or decrement it according to `mode`. Returns
    /// the value before it was cleared or decremented.
    pub fn notify_take(&self, mode: TakeMode, timeout: Timeout) -> Result<u32, WaitNotificationError> {
        let mut lock = self.lock_cpu();
        state::check_blocking_call(&lock, timeout);
        let task = state::expect_task_context(&lock)?;

        let mut result = Ok(());
        if lock.tasks[task].notification.value == 0 {
            if timeout.is_no_wait() {
                return Err(WaitNotificationError::Timeout);
            }
            state::expect_waitable_context(&lock)?;
            result = wait_for_notification(&mut lock, task, timeout);
        }

        // A notification may have arrived after the wait timed out
        let notification = &mut lock.tasks[task].notification;
        notification.state = NotifyState::NotWaiting;
        let value = notification.value;
        if value == 0 {
            result?;
            return Ok(0);
        }
        notification.value = match mode {
            TakeMode::Clear => 0,
            TakeMode::Decrement => value - 1,
        };
        Ok(value)
    }

    /// Wait for at most `timeout` for a notification to be pending, and
    /// consume it. Returns the notification value.
    ///
    /// The bits in `clear_on_entry` are cleared if no notification is pending
    /// when the call is made. The bits in `clear_on_exit` are cleared after
    /// the value is read.
    pub fn notify_wait(
        &self,
        clear_on_entry: u32,
        clear_on_exit: u32,
        timeout: Timeout,
    ) -> Result<u32, WaitNotificationError> {
        let mut lock = self.lock_cpu();
        state::check_blocking_call(&lock, timeout);
        let task = state::expect_task_context(&lock)?;

        let mut result = Ok(());
        let notification = &mut lock.tasks[task].notification;
        if notification.state != NotifyState::Received {
            notification.value &= !clear_on_entry;
            if timeout.is_no_wait() {
                return Err(WaitNotificationError::Timeout);
            }
            state::expect_waitable_context(&lock)?;
            result = wait_for_notification(&mut lock, task, timeout);
        }

        let notification = &mut lock.tasks[task].notification;
        if notification.state != NotifyState::Received {
            notification.state = NotifyState::NotWaiting;
            result?;
            unreachable!("woken up without a notification");
        }
        notification.state = NotifyState::NotWaiting;
        let value = notification.value;
        notification.value &= !clear_on_exit;
        Ok(value)
    }
}
