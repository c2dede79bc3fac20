//! The task ready queue
use super::TaskCb;
use crate::utils::{intrusive_list::ListHead, Arena, Id, PrioBitmap};

/// One FIFO queue per priority level plus a bitmap of the non-empty ones.
///
/// The running task is not a member. [`choose_next_running_task`] puts it back
/// when it loses the processor.
///
/// [`choose_next_running_task`]: super::choose_next_running_task
#[derive(Debug)]
pub(crate) struct ReadyQueue {
    queues: Vec<ListHead>,
    bitmap: PrioBitmap,
}

/// The result of [`ReadyQueue::pop_front_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScheduleDecision {
    /// The current task should keep running.
    Keep,
    /// The specified task (or no task if `None`) should take over.
    SwitchTo(Option<Id>),
}

impl ReadyQueue {
    pub(crate) fn new(num_priorities: usize) -> Self {
        Self {
            queues: vec![ListHead::default(); num_priorities],
            bitmap: PrioBitmap::default(),
        }
    }

    /// Insert a task at the back of its priority band.
    pub(crate) fn push_back(&mut self, tasks: &mut Arena<TaskCb>, task: Id) {
        let priority = tasks[task].effective_priority;
        self.queues[priority].push_back(tasks, task);
        self.bitmap.set(priority);
    }

    /// Insert a task at the front of its priority band. Used for a task that
    /// was preempted so that it resumes before its peers.
    pub(crate) fn push_front(&mut self, tasks: &mut Arena<TaskCb>, task: Id) {
        let priority = tasks[task].effective_priority;
        self.queues[priority].push_front(tasks, task);
        self.bitmap.set(priority);
    }

    /// Remove a task. `priority` is the band it was inserted into.
    pub(crate) fn remove(&mut self, tasks: &mut Arena<TaskCb>, task: Id, priority: usize) {
        let queue = &mut self.queues[priority];
        queue.remove(tasks, task);
        if queue.is_empty() {
            self.bitmap.clear(priority);
        }
    }

    /// Move a task whose effective priority changed from `old_priority` to
    /// the back of its new band.
    pub(crate) fn reorder_task(&mut self, tasks: &mut Arena<TaskCb>, task: Id, old_priority: usize) {
        self.remove(tasks, task, old_priority);
        self.push_back(tasks, task);
    }

    #[inline]
    pub(crate) fn highest_priority(&self) -> Option<usize> {
        self.bitmap.find_highest()
    }

    #[inline]
    pub(crate) fn has_ready_task_at(&self, priority: usize) -> bool {
        self.bitmap.get(priority)
    }

    /// Check whether a task more urgent than `priority` is ready.
    #[inline]
    pub(crate) fn has_ready_task_above(&self, priority: usize) -> bool {
        self.highest_priority().map_or(false, |p| p > priority)
    }

    /// Decide the next task to run.
    ///
    /// `prev_task_priority` is the effective priority of the task that is
    /// still in the Running state, or `None` if there is no such task. With
    /// `rotate`, a ready task of the same priority also takes over.
    ///
    /// The chosen task is removed from the queue.
    pub(crate) fn pop_front_task(
        &mut self,
        tasks: &mut Arena<TaskCb>,
        prev_task_priority: Option<usize>,
        rotate: bool,
    ) -> ScheduleDecision {
        let highest = self.highest_priority();

        if let Some(prev) = prev_task_priority {
            match highest {
                Some(p) if p > prev || (rotate && p == prev) => {}
                _ => return ScheduleDecision::Keep,
            }
        }

        let Some(priority) = highest else {
            return ScheduleDecision::SwitchTo(None);
        };

        let queue = &mut self.queues[priority];
        let task = queue.pop_front(tasks);
        if queue.is_empty() {
            self.bitmap.clear(priority);
        }
        ScheduleDecision::SwitchTo(task)
    }
}
