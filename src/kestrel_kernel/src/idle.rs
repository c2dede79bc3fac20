//! The idle task
use std::mem;

use crate::{
    klock::CpuLockGuard,
    port,
    state::{self, Phase},
    task, timeout, Kernel, RunOutcome,
};

/// The entry point of the idle task, which runs at priority 0 and never
/// blocks.
///
/// Each iteration reclaims deleted tasks, calls the idle hook, and then gives
/// the processor to another priority-0 task if there is one. Otherwise nothing
/// can run until the next timeout or scheduled interrupt, so the idle task
/// skips time ahead to it. If there's no such event, the system can never make
/// progress again and it stops with [`RunOutcome::Quiescent`].
pub(crate) fn idle_main(kernel: Kernel, mut hook: Option<Box<dyn FnMut() + Send>>) {
    loop {
        reclaim_deleted_tasks(&kernel);

        if let Some(hook) = &mut hook {
            hook();
        }

        let mut lock = kernel.lock_cpu();
        let Ok(me) = state::expect_task_context(&lock) else {
            unreachable!("the idle task is not running");
        };
        port::exit_if_shutting_down(&mut lock);

        if lock.ready.has_ready_task_at(0) {
            drop(lock);
            let Ok(()) = kernel.yield_now() else {
                unreachable!("the idle task failed to yield");
            };
            continue;
        }

        if !lock.pending_interrupts.is_empty() || lock.ready.highest_priority().is_some() {
            task::preemption_point(&mut lock, me);
            continue;
        }

        if !lock.terminated.is_empty() {
            // Reclaim them before stopping or skipping ahead
            continue;
        }

        match timeout::next_event_time(&lock) {
            Some(at) => {
                timeout::advance_to(&mut lock, at);
                task::preemption_point(&mut lock, me);
            }
            None => stop_quiescent(lock),
        }
    }
}

fn stop_quiescent(mut lock: CpuLockGuard<'_>) {
    debug_assert_eq!(lock.phase, Phase::Running);
    log::debug!("no task can make progress at tick {}", lock.tick);
    port::begin_shutdown(&mut lock, RunOutcome::Quiescent);
    port::exit_if_shutting_down(&mut lock);
}

/// Free the stacks of the deleted tasks and remove their control blocks.
fn reclaim_deleted_tasks(kernel: &Kernel) {
    let mut lock = kernel.lock_cpu();
    if lock.terminated.is_empty() {
        return;
    }

    let mut garbage = Vec::new();
    for task in mem::take(&mut lock.terminated) {
        let Some(mut tcb) = lock.tasks.remove(task) else {
            continue;
        };
        if let Some(stack) = tcb.stack.take() {
            log::trace!("{task:?}: freeing {} bytes of stack", stack.size());
            lock.heap.free(stack);
        }
        log::debug!("reclaimed task {task:?} {:?}", tcb.name);
        // The entry point of a task that never ran may own anything
        garbage.push(tcb.entry.take());
    }

    drop(lock);
    drop(garbage);
}
