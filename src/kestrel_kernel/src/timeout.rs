//! Virtual time and tick processing
use crate::{
    error::WaitTimeoutError, klock::CpuLockGuard, port, task::TaskSt, wait, RunOutcome,
};

/// A point in time or a duration, measured in ticks.
///
/// Time is virtual and 64 bits wide, so it never wraps around in practice.
pub type Ticks = u64;

/// The maximum duration a blocking call waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Give up after the specified number of ticks. Zero means "don't wait".
    Ticks(Ticks),
    /// Wait indefinitely.
    Forever,
}

impl Timeout {
    /// Poll without blocking.
    pub const NO_WAIT: Self = Self::Ticks(0);

    /// Wait indefinitely.
    pub const FOREVER: Self = Self::Forever;

    /// Wait for at most `n` ticks.
    #[inline]
    pub const fn ticks(n: Ticks) -> Self {
        Self::Ticks(n)
    }

    #[inline]
    pub(crate) fn is_no_wait(self) -> bool {
        self == Self::NO_WAIT
    }
}

/// Process one tick.
///
/// While the scheduler is suspended, the tick is only counted; it's replayed
/// when the scheduler resumes.
pub(crate) fn process_tick(lock: &mut CpuLockGuard<'_>) {
    if lock.scheduler_suspended > 0 {
        lock.pended_ticks += 1;
        return;
    }

    lock.tick += 1;
    let now = lock.tick;

    // Expire timeouts
    while let Some(&key) = lock.timeouts.first() {
        if key.0 > now {
            break;
        }
        let task = key.2;
        log::trace!("{task:?}: wait timed out at {now}");
        wait::complete_wait(lock, task, Err(WaitTimeoutError::Timeout));
    }

    // Pend scheduled interrupts
    while let Some(&key) = lock.scheduled_interrupts.first() {
        if key.0 > now {
            break;
        }
        lock.scheduled_interrupts.remove(&key);
        lock.pending_interrupts.push_back(key.2);
    }

    // Time slicing
    if lock.kernel().inner.config.time_slicing {
        if let Some(running) = lock.running {
            let tcb = &lock.tasks[running];
            if tcb.st == TaskSt::Running && lock.ready.has_ready_task_at(tcb.effective_priority) {
                lock.rotate_pending = true;
            }
        }
    }

    if let Some(limit) = lock.kernel().inner.config.tick_limit {
        if now >= limit {
            log::debug!("tick limit {limit} reached");
            port::begin_shutdown(lock, RunOutcome::TickLimit);
        }
    }
}

/// Get the time of the next event that would make a task ready: a timeout or
/// a scheduled interrupt.
pub(crate) fn next_event_time(lock: &CpuLockGuard<'_>) -> Option<Ticks> {
    let timeout = lock.timeouts.first().map(|key| key.0);
    let interrupt = lock.scheduled_interrupts.first().map(|key| key.0);
    match (timeout, interrupt) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Skip ahead to `at` without processing the ticks in between, which must
/// not contain any event. The tick at `at` is processed normally.
///
/// Used by the idle task when nothing is ready.
pub(crate) fn advance_to(lock: &mut CpuLockGuard<'_>, at: Ticks) {
    let mut target = at;
    if let Some(limit) = lock.kernel().inner.config.tick_limit {
        target = target.min(limit);
    }
    if target > lock.tick + 1 {
        log::trace!("idle: skipping from tick {} to {}", lock.tick, target);
        lock.tick = target - 1;
    }
    process_tick(lock);
}
