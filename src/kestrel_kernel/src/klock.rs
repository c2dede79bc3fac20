//! Kernel state locking mechanism
use parking_lot::MutexGuard;
use std::ops;

use crate::{state::State, Kernel};

/// RAII guard representing CPU Lock, i.e., exclusive access to the kernel
/// state. Interrupts are not delivered and no context switch happens while it
/// exists.
///
/// Every kernel service acquires one on entry and releases it on every exit
/// path by dropping it, usually through
/// [`unlock_cpu_and_check_preemption`](crate::task::unlock_cpu_and_check_preemption).
pub(crate) struct CpuLockGuard<'a> {
    kernel: &'a Kernel,
    guard: MutexGuard<'a, State>,
}

/// Acquire CPU Lock. Blocks the calling thread if another thread is in the
/// middle of a kernel service.
///
/// The lock is not reentrant. Kernel code never calls into user code while
/// holding it.
pub(crate) fn lock_cpu(kernel: &Kernel) -> CpuLockGuard<'_> {
    CpuLockGuard {
        kernel,
        guard: kernel.inner.state.lock(),
    }
}

impl<'a> CpuLockGuard<'a> {
    #[inline]
    pub(crate) fn kernel(&self) -> &'a Kernel {
        self.kernel
    }

    /// Release CPU Lock while calling `f`.
    ///
    /// This is how the kernel runs user code (interrupt handlers, timer
    /// callbacks, the idle hook) from inside a kernel service.
    pub(crate) fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        MutexGuard::unlocked(&mut self.guard, f)
    }

    /// Park the calling thread until another thread signals the dispatch
    /// condition variable. CPU Lock is released while parked.
    pub(crate) fn wait_for_dispatch(&mut self) {
        self.kernel.inner.dispatch.wait(&mut self.guard);
    }

    /// Wake up every parked thread so that each can check whether it was
    /// chosen to run.
    pub(crate) fn notify_dispatch(&self) {
        self.kernel.inner.dispatch.notify_all();
    }

    /// Park the calling thread until the last task thread exits.
    pub(crate) fn wait_for_finish(&mut self) {
        self.kernel.inner.finished.wait(&mut self.guard);
    }

    pub(crate) fn notify_finish(&self) {
        self.kernel.inner.finished.notify_all();
    }
}

impl ops::Deref for CpuLockGuard<'_> {
    type Target = State;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl ops::DerefMut for CpuLockGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
