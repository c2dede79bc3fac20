//! The hosted port: task threads and the dispatcher
//!
//! Each task runs on a dedicated OS thread, which is spawned the first time
//! the task is chosen to run. All of them are parked on
//! `KernelInner::dispatch` except the one whose task is in
//! `State::running`. To switch tasks, the outgoing thread updates
//! `State::running`, wakes up the parked threads, and parks itself.
//!
//! A thread that must not continue (its task was deleted, or the system is
//! shutting down) unwinds its stack with a [`ThreadExit`] payload.
use std::{
    mem,
    panic::{self, AssertUnwindSafe},
    thread,
};

use crate::{
    klock::CpuLockGuard,
    state::{self, Phase},
    task::{self, TaskSt},
    utils::Id,
    Kernel, RunOutcome,
};

/// The panic payload used to unwind a task thread that has to stop.
pub(crate) struct ThreadExit;

/// Make sure the thread for `task` has been spawned.
pub(crate) fn ensure_thread_started(lock: &mut CpuLockGuard<'_>, task: Id) {
    let tcb = &mut lock.tasks[task];
    let Some(entry) = tcb.entry.take() else {
        return;
    };
    let name = format!("kestrel:{}", tcb.name);
    let kernel = lock.kernel().clone();

    let join_handle = thread::Builder::new()
        .name(name)
        .spawn(move || thread_main(kernel, task, entry));
    match join_handle {
        Ok(join_handle) => {
            lock.live_threads += 1;
            lock.join_handles.push(join_handle);
            log::trace!("{task:?}: thread started");
        }
        Err(e) => panic!("failed to spawn the thread for task {task:?}: {e}"),
    }
}

fn thread_main(kernel: Kernel, task: Id, entry: Box<dyn FnOnce() + Send>) {
    state::set_thread_task(&kernel, task);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        wait_until_dispatched(&mut kernel.lock_cpu(), task);
        entry();
        // Returning from the entry point terminates the task
        let _ = task::exit_task(&kernel);
    }));

    let mut lock = kernel.lock_cpu();
    if let Err(payload) = result {
        if !payload.is::<ThreadExit>() {
            log::warn!("{task:?}: task panicked, shutting down");
            if lock.panic_payload.is_none() {
                lock.panic_payload = Some(payload);
            }
            begin_shutdown(&mut lock, RunOutcome::Shutdown);
        }
    }

    log::trace!("{task:?}: thread exited");
    lock.live_threads -= 1;
    if lock.live_threads == 0 {
        lock.notify_finish();
    }
}

/// Park the calling thread until its task `me` is chosen to run.
///
/// Unwinds with [`ThreadExit`] if the task is deleted or the system is
/// shutting down.
pub(crate) fn wait_until_dispatched(lock: &mut CpuLockGuard<'_>, me: Id) {
    loop {
        exit_if_shutting_down(lock);
        if lock.running == Some(me) {
            log::trace!("{me:?}: dispatched");
            return;
        }
        if lock.tasks.get(me).map_or(true, |tcb| tcb.st == TaskSt::Deleted) {
            panic::resume_unwind(Box::new(ThreadExit));
        }
        lock.wait_for_dispatch();
    }
}

/// Unwind the calling thread if the system is shutting down. Does nothing
/// for threads that don't belong to a task or are already unwinding.
pub(crate) fn exit_if_shutting_down(lock: &mut CpuLockGuard<'_>) {
    if thread::panicking() {
        return;
    }
    if matches!(lock.phase, Phase::ShuttingDown(_) | Phase::Finished(_))
        && state::thread_task(lock.kernel()).is_some()
    {
        panic::resume_unwind(Box::new(ThreadExit));
    }
}

/// Hand the processor over to the task chosen by
/// [`task::choose_next_running_task`] and terminate the calling thread.
/// The guard is released as the thread unwinds.
pub(crate) fn exit_thread(lock: &mut CpuLockGuard<'_>) -> ! {
    if let Some(next) = lock.running {
        ensure_thread_started(lock, next);
    }
    lock.notify_dispatch();
    panic::resume_unwind(Box::new(ThreadExit))
}

/// Stop every task. Each thread unwinds when it's next woken up or reaches a
/// preemption point.
pub(crate) fn begin_shutdown(lock: &mut CpuLockGuard<'_>, outcome: RunOutcome) {
    if lock.phase != Phase::Running {
        return;
    }
    log::debug!("shutting down ({outcome:?})");
    lock.phase = Phase::ShuttingDown(outcome);
    lock.notify_dispatch();
    if lock.live_threads == 0 {
        lock.notify_finish();
    }
}

impl Kernel {
    /// Start scheduling tasks and block the calling thread until the system
    /// stops.
    ///
    /// If a task panics, the system stops and the panic is resumed here.
    ///
    /// # Panics
    ///
    /// Panics if the kernel has already been started.
    pub fn run(&self) -> RunOutcome {
        let mut lock = self.lock_cpu();
        assert_eq!(lock.phase, Phase::Setup, "the kernel has already been started");
        assert!(
            state::thread_task(self).is_none(),
            "`run` cannot be called from a task"
        );

        log::debug!("starting the scheduler");
        lock.phase = Phase::Running;
        task::choose_next_running_task(&mut lock, false);
        if let Some(first) = lock.running {
            ensure_thread_started(&mut lock, first);
        }
        lock.notify_dispatch();

        let outcome = loop {
            match lock.phase {
                Phase::ShuttingDown(outcome) if lock.live_threads == 0 => break outcome,
                _ => lock.wait_for_finish(),
            }
        };
        lock.phase = Phase::Finished(outcome);
        log::debug!("stopped ({outcome:?}) at tick {}", lock.tick);

        let join_handles = mem::take(&mut lock.join_handles);
        let panic_payload = lock.panic_payload.take();

        // User closures may hold `Kernel`s. Drop them to break the reference
        // cycles, but outside CPU Lock.
        let garbage = take_closures(&mut lock);
        drop(lock);
        drop(garbage);

        for join_handle in join_handles {
            // Panics were caught by `thread_main`
            let _ = join_handle.join();
        }

        if let Some(payload) = panic_payload {
            panic::resume_unwind(payload);
        }

        outcome
    }

    /// Stop the system. [`Kernel::run`] returns [`RunOutcome::Shutdown`].
    ///
    /// # Panics
    ///
    /// Panics if the caller is not a task or an interrupt handler of this
    /// kernel.
    pub fn shutdown(&self) -> ! {
        let mut lock = self.lock_cpu();
        assert!(
            state::thread_task(self).is_some(),
            "`shutdown` must be called from a task or an interrupt handler"
        );
        begin_shutdown(&mut lock, RunOutcome::Shutdown);
        drop(lock);
        panic::resume_unwind(Box::new(ThreadExit))
    }
}

/// Remove every user closure still owned by the kernel.
fn take_closures(lock: &mut CpuLockGuard<'_>) -> Vec<Box<dyn Send>> {
    let mut garbage: Vec<Box<dyn Send>> = Vec::new();
    for (_, tcb) in lock.tasks.iter_mut() {
        if let Some(entry) = tcb.entry.take() {
            garbage.push(Box::new(entry));
        }
    }
    for (_, timer) in lock.timers.iter_mut() {
        if let Some(callback) = timer.callback.take() {
            garbage.push(Box::new(callback));
        }
    }
    for (_, interrupt) in lock.interrupts.iter_mut() {
        if let Some(handler) = interrupt.handler.take() {
            garbage.push(Box::new(handler));
        }
    }
    garbage
}
