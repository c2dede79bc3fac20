//! The kernel state and the calling-context checks
use std::{
    any::Any,
    cell::Cell,
    collections::{BTreeSet, VecDeque},
    thread::JoinHandle,
};

use kestrel_heap::Tlsf;

use crate::{
    error::BadContextError,
    event_group::EventGroupCb,
    interrupt::InterruptCb,
    klock::CpuLockGuard,
    mutex::MutexCb,
    queue::QueueCb,
    queue_set::QueueSetCb,
    semaphore::SemaphoreCb,
    task::{readyqueue::ReadyQueue, TaskCb},
    timer::{TimerCb, TimerService},
    utils::{Arena, Id},
    Kernel, RunOutcome, Ticks, Timeout,
};

/// An entry of an ordered event list: `(time, sequence number, object)`.
///
/// The sequence number keeps entries with the same time in insertion order.
pub(crate) type EventKey = (Ticks, u64, Id);

/// The lifecycle of a kernel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Objects are being created. No task has run yet.
    Setup,
    Running,
    /// Every task thread is being torn down.
    ShuttingDown(RunOutcome),
    Finished(RunOutcome),
}

/// Everything protected by CPU Lock.
pub(crate) struct State {
    pub(crate) phase: Phase,
    pub(crate) tick: Ticks,
    seq: u64,

    pub(crate) tasks: Arena<TaskCb>,
    pub(crate) ready: ReadyQueue,
    /// The task that owns the processor. Only its thread is allowed to
    /// proceed.
    pub(crate) running: Option<Id>,
    /// Deleted tasks waiting for the idle task to reclaim them.
    pub(crate) terminated: Vec<Id>,
    pub(crate) idle_task: Option<Id>,

    /// Wait timeouts, ordered by deadline.
    pub(crate) timeouts: BTreeSet<EventKey>,

    pub(crate) queues: Arena<QueueCb>,
    pub(crate) queue_sets: Arena<QueueSetCb>,
    pub(crate) semaphores: Arena<SemaphoreCb>,
    pub(crate) mutexes: Arena<MutexCb>,
    pub(crate) event_groups: Arena<EventGroupCb>,

    pub(crate) timers: Arena<TimerCb>,
    /// Active timers, ordered by expiration time.
    pub(crate) active_timers: BTreeSet<EventKey>,
    pub(crate) timer_service: Option<TimerService>,

    pub(crate) interrupts: Arena<InterruptCb>,
    /// Interrupts waiting to be delivered, in the order they were pended.
    pub(crate) pending_interrupts: VecDeque<Id>,
    /// Interrupts to be pended by tick processing.
    pub(crate) scheduled_interrupts: BTreeSet<EventKey>,
    pub(crate) in_isr: bool,

    pub(crate) heap: Tlsf,

    pub(crate) critical_nesting: u32,
    pub(crate) scheduler_suspended: u32,
    /// Ticks that elapsed while the scheduler was suspended.
    pub(crate) pended_ticks: u64,
    /// Set by tick processing when the running task's time slice ends.
    pub(crate) rotate_pending: bool,

    pub(crate) live_threads: usize,
    pub(crate) join_handles: Vec<JoinHandle<()>>,
    pub(crate) panic_payload: Option<Box<dyn Any + Send>>,
}

impl State {
    pub(crate) fn new(num_priorities: usize, heap: Tlsf) -> Self {
        Self {
            phase: Phase::Setup,
            tick: 0,
            seq: 0,
            tasks: Arena::default(),
            ready: ReadyQueue::new(num_priorities),
            running: None,
            terminated: Vec::new(),
            idle_task: None,
            timeouts: BTreeSet::new(),
            queues: Arena::default(),
            queue_sets: Arena::default(),
            semaphores: Arena::default(),
            mutexes: Arena::default(),
            event_groups: Arena::default(),
            timers: Arena::default(),
            active_timers: BTreeSet::new(),
            timer_service: None,
            interrupts: Arena::default(),
            pending_interrupts: VecDeque::new(),
            scheduled_interrupts: BTreeSet::new(),
            in_isr: false,
            heap,
            critical_nesting: 0,
            scheduler_suspended: 0,
            pended_ticks: 0,
            rotate_pending: false,
            live_threads: 0,
            join_handles: Vec::new(),
            panic_payload: None,
        }
    }

    /// Get a fresh sequence number for an [`EventKey`].
    pub(crate) fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Get the deadline of a wait that starts now.
    pub(crate) fn deadline(&self, timeout: Timeout) -> Option<Ticks> {
        match timeout {
            Timeout::Ticks(n) => Some(self.tick.saturating_add(n)),
            Timeout::Forever => None,
        }
    }

    /// Check whether `task` is one of the system tasks, which cannot be
    /// suspended or deleted.
    pub(crate) fn is_system_task(&self, task: Id) -> bool {
        self.idle_task == Some(task) || self.timer_service.map(|s| s.task) == Some(task)
    }

    /// The effective priority of the running task, if it's still in the
    /// Running state.
    pub(crate) fn running_priority(&self) -> Option<usize> {
        let running = self.running?;
        let tcb = &self.tasks[running];
        (tcb.st == crate::task::TaskSt::Running).then_some(tcb.effective_priority)
    }
}

thread_local! {
    /// The task executed by the current thread, keyed by the address of the
    /// owning kernel.
    static THREAD_TASK: Cell<Option<(usize, Id)>> = Cell::new(None);
}

pub(crate) fn set_thread_task(kernel: &Kernel, task: Id) {
    THREAD_TASK.with(|x| x.set(Some((kernel.addr(), task))));
}

/// Get the task executed by the current thread.
pub(crate) fn thread_task(kernel: &Kernel) -> Option<Id> {
    THREAD_TASK
        .with(|x| x.get())
        .filter(|&(addr, _)| addr == kernel.addr())
        .map(|(_, task)| task)
}

/// The kind of the code calling a kernel service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Context {
    /// The running task.
    Task(Id),
    /// An interrupt handler. Handlers run on the thread of the task they
    /// interrupted.
    Isr,
    /// Any other thread, including the one that called
    /// [`Kernel::run`](crate::Kernel::run).
    Other,
}

impl CpuLockGuard<'_> {
    pub(crate) fn context(&self) -> Context {
        match thread_task(self.kernel()) {
            Some(task) if self.running == Some(task) => {
                if self.in_isr {
                    Context::Isr
                } else {
                    Context::Task(task)
                }
            }
            _ => Context::Other,
        }
    }
}

/// Get the calling task.
pub(crate) fn expect_task_context(lock: &CpuLockGuard<'_>) -> Result<Id, BadContextError> {
    match lock.context() {
        Context::Task(task) => Ok(task),
        _ => Err(BadContextError::BadContext),
    }
}

/// Panic if a call that blocks for up to `timeout` is made from an interrupt
/// handler. Interrupt handlers may only poll.
#[track_caller]
pub(crate) fn check_blocking_call(lock: &CpuLockGuard<'_>, timeout: Timeout) {
    if timeout != Timeout::NO_WAIT && lock.context() == Context::Isr {
        panic!("blocking call from interrupt context");
    }
}

/// Get the calling task, checking that it is allowed to enter the Waiting
/// state.
///
/// Blocking inside a critical section or while the scheduler is suspended is
/// a usage error, which panics.
#[track_caller]
pub(crate) fn expect_waitable_context(lock: &CpuLockGuard<'_>) -> Result<Id, BadContextError> {
    match lock.context() {
        Context::Isr => panic!("blocking call from interrupt context"),
        Context::Other => Err(BadContextError::BadContext),
        Context::Task(task) => {
            assert!(
                lock.critical_nesting == 0,
                "blocking call inside a critical section"
            );
            assert!(
                lock.scheduler_suspended == 0,
                "blocking call while the scheduler is suspended"
            );
            Ok(task)
        }
    }
}
