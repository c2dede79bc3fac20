//! Simulated interrupts
//!
//! An interrupt handler runs on the thread of the task it interrupts, with the
//! kernel in interrupt context. Blocking services are off-limits there; the
//! `*_from_isr` services, which take an [`IsrContext`], are the way to
//! communicate with tasks.
use std::{fmt, sync::Arc};

use crate::{
    klock::CpuLockGuard,
    state::{Context, State},
    task,
    utils::Id,
    Kernel, Ticks,
};

type Handler = Arc<dyn Fn(&mut IsrContext<'_>) + Send + Sync>;

/// *Interrupt control block*
pub(crate) struct InterruptCb {
    /// `None` after the kernel has stopped.
    pub(crate) handler: Option<Handler>,
}

/// A simulated interrupt line with a registered handler.
#[derive(Clone)]
pub struct Interrupt {
    kernel: Kernel,
    id: Id,
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Interrupt").field(&self.id).finish()
    }
}

impl Interrupt {
    /// Register an interrupt handler.
    pub fn new(kernel: &Kernel, handler: impl Fn(&mut IsrContext<'_>) + Send + Sync + 'static) -> Self {
        let id = kernel.lock_cpu().interrupts.insert(InterruptCb {
            handler: Some(Arc::new(handler)),
        });
        log::debug!("created interrupt {id:?}");
        Self {
            kernel: kernel.clone(),
            id,
        }
    }

    /// Pend the interrupt.
    ///
    /// When called by a task, the handler runs before this method returns,
    /// unless interrupts are masked by a critical section, in which case it
    /// runs when the outermost critical section ends. When called by another
    /// interrupt handler, it runs after that handler returns. When called by
    /// an unrelated thread, it runs at the next preemption point of the
    /// running task.
    pub fn pend(&self) {
        let mut lock = self.kernel.lock_cpu();
        lock.pending_interrupts.push_back(self.id);
        deliver_now(lock);
    }

    /// Pend the interrupt when the tick count reaches `at`. If `at` has
    /// already passed, this is equivalent to [`Self::pend`].
    pub fn pend_at(&self, at: Ticks) {
        self.schedule(|_| at);
    }

    /// Pend the interrupt `ticks` ticks from now.
    pub fn pend_after(&self, ticks: Ticks) {
        self.schedule(|now| now.saturating_add(ticks));
    }

    /// `at` maps the current tick count to the pend time.
    fn schedule(&self, at: impl FnOnce(Ticks) -> Ticks) {
        let mut lock = self.kernel.lock_cpu();
        let at = at(lock.tick);
        if at <= lock.tick {
            lock.pending_interrupts.push_back(self.id);
            deliver_now(lock);
        } else {
            let seq = lock.next_seq();
            lock.scheduled_interrupts.insert((at, seq, self.id));
        }
    }
}

/// Deliver the pending interrupts if the caller is a task. The switch to a
/// woken task happens immediately only if a handler requested it.
fn deliver_now(mut lock: CpuLockGuard<'_>) {
    let Context::Task(me) = lock.context() else {
        return;
    };
    if deliver_pending_interrupts(&mut lock) && lock.scheduler_suspended == 0 {
        task::switch_away(&mut lock, me);
    }
}

/// Run the handlers of the pending interrupts. Must be called by the running
/// task. Returns `true` if any handler called [`IsrContext::request_yield`].
///
/// Does nothing inside a critical section or a handler.
pub(crate) fn deliver_pending_interrupts(lock: &mut CpuLockGuard<'_>) -> bool {
    if lock.in_isr || lock.critical_nesting > 0 {
        return false;
    }

    let kernel = lock.kernel();
    let mut yield_requested = false;
    while let Some(id) = lock.pending_interrupts.pop_front() {
        let Some(handler) = lock.interrupts.get(id).and_then(|cb| cb.handler.clone()) else {
            continue;
        };
        log::trace!("interrupt {id:?}: enter");

        let mut cx = IsrContext {
            kernel,
            higher_priority_task_woken: false,
            yield_requested: false,
        };
        lock.in_isr = true;
        lock.unlocked(|| handler(&mut cx));
        lock.in_isr = false;

        log::trace!(
            "interrupt {id:?}: exit (woken = {}, yield = {})",
            cx.higher_priority_task_woken,
            cx.yield_requested
        );
        yield_requested |= cx.yield_requested;
    }
    yield_requested
}

/// The context of a running interrupt handler.
///
/// Only the kernel can create one, and the `*_from_isr` services require one,
/// so they can be used only by interrupt handlers.
pub struct IsrContext<'a> {
    kernel: &'a Kernel,
    higher_priority_task_woken: bool,
    yield_requested: bool,
}

impl fmt::Debug for IsrContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IsrContext")
            .field("higher_priority_task_woken", &self.higher_priority_task_woken)
            .field("yield_requested", &self.yield_requested)
            .finish()
    }
}

impl<'a> IsrContext<'a> {
    /// Get the kernel the handler belongs to.
    pub fn kernel(&self) -> &'a Kernel {
        self.kernel
    }

    /// Check whether a service called by this handler woke up a task that
    /// has a higher priority than the interrupted task.
    pub fn higher_priority_task_woken(&self) -> bool {
        self.higher_priority_task_woken
    }

    /// Request a context switch when the handler returns. Without it, a woken
    /// task starts running at the interrupted task's next preemption point.
    ///
    /// Typically called with the value of
    /// [`Self::higher_priority_task_woken`].
    pub fn request_yield(&mut self) {
        self.yield_requested = true;
    }

    /// Check that this context belongs to `kernel`.
    #[track_caller]
    pub(crate) fn check_kernel(&self, kernel: &Kernel) {
        assert!(
            self.kernel == kernel,
            "the object belongs to a different kernel"
        );
    }

    /// Update [`Self::higher_priority_task_woken`] after a service has
    /// possibly woken up tasks.
    pub(crate) fn check_woken(&mut self, state: &State) {
        let woken = match state.running_priority() {
            Some(priority) => state.ready.has_ready_task_above(priority),
            None => state.ready.highest_priority().is_some(),
        };
        self.higher_priority_task_woken |= woken;
    }
}
