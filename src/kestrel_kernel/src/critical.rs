//! Critical sections and scheduler suspension
use std::{fmt, marker::PhantomData};

use crate::{state::Context, task, timeout, Kernel};

/// RAII guard of a critical section, created by [`Kernel::enter_critical`].
///
/// Interrupts are masked and no context switch happens until the outermost
/// guard is dropped. Critical sections nest.
///
/// Blocking inside a critical section is a usage error and panics.
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CriticalSection<'a> {
    kernel: &'a Kernel,
    _no_send: PhantomData<*mut ()>,
}

/// RAII guard of a scheduler suspension, created by [`Kernel::suspend_all`].
///
/// Interrupts are still delivered, but tasks they wake up don't run until the
/// outermost guard is dropped. Ticks that elapse in the meantime are counted
/// and processed when the scheduler resumes. Suspensions nest.
///
/// Blocking while the scheduler is suspended is a usage error and panics.
#[must_use = "the scheduler resumes when the guard is dropped"]
pub struct SchedulerSuspension<'a> {
    kernel: &'a Kernel,
    _no_send: PhantomData<*mut ()>,
}

impl fmt::Debug for CriticalSection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("CriticalSection")
    }
}

impl fmt::Debug for SchedulerSuspension<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SchedulerSuspension")
    }
}

impl Kernel {
    /// Enter a critical section.
    pub fn enter_critical(&self) -> CriticalSection<'_> {
        let mut lock = self.lock_cpu();
        lock.critical_nesting += 1;
        CriticalSection {
            kernel: self,
            _no_send: PhantomData,
        }
    }

    /// Suspend the scheduler.
    pub fn suspend_all(&self) -> SchedulerSuspension<'_> {
        let mut lock = self.lock_cpu();
        lock.scheduler_suspended += 1;
        SchedulerSuspension {
            kernel: self,
            _no_send: PhantomData,
        }
    }

    /// Check whether the scheduler is suspended.
    pub fn is_scheduler_suspended(&self) -> bool {
        self.lock_cpu().scheduler_suspended > 0
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        let mut lock = self.kernel.lock_cpu();
        lock.critical_nesting -= 1;
        if lock.critical_nesting == 0 && !std::thread::panicking() {
            // Masked interrupts and deferred switches take effect now
            task::unlock_cpu_and_check_preemption(lock);
        }
    }
}

impl Drop for SchedulerSuspension<'_> {
    fn drop(&mut self) {
        let mut lock = self.kernel.lock_cpu();
        lock.scheduler_suspended -= 1;
        if lock.scheduler_suspended > 0 || std::thread::panicking() {
            return;
        }

        let pended_ticks = std::mem::take(&mut lock.pended_ticks);
        if pended_ticks > 0 {
            log::trace!("replaying {pended_ticks} pended tick(s)");
        }
        for _ in 0..pended_ticks {
            timeout::process_tick(&mut lock);
        }

        if let Context::Task(me) = lock.context() {
            task::preemption_point(&mut lock, me);
        }
    }
}
