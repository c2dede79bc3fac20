//! Tasks
use arrayvec::ArrayString;
use kestrel_heap::Allocation;
use std::{
    convert::Infallible,
    fmt,
    hash::{Hash, Hasher},
    mem,
};

use crate::{
    error::{
        CreateTaskError, DelayError, DeleteTaskError, ExitTaskError,
        GetCurrentTaskError, GetTaskPriorityError, InterruptTaskError, NoAccessError,
        ResumeTaskError, SetTaskPriorityError, SuspendTaskError, WaitTimeoutError,
    },
    interrupt,
    klock::CpuLockGuard,
    mutex,
    notify::NotificationCb,
    port,
    state::{self, Context, Phase, State},
    timeout,
    utils::{
        intrusive_list::{Link, Linked},
        Id,
    },
    wait::{self, Wait, WaitObject, WaitPayload},
    Kernel, Ticks, Timeout, MAX_NAME_LEN,
};

pub(crate) mod readyqueue;

/// The byte a fresh stack is filled with.
const STACK_FILL_BYTE: u8 = 0xa5;

/// Truncate `name` to at most [`MAX_NAME_LEN`] bytes at a character
/// boundary.
pub(crate) fn truncate_name(name: &str) -> ArrayString<MAX_NAME_LEN> {
    let mut out = ArrayString::new();
    for c in name.chars() {
        if out.try_push(c).is_err() {
            break;
        }
    }
    out
}

/// Task state machine
///
/// The Running task is not in the ready queue. A Waiting task is linked into
/// the wait queue of the object it waits on, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskSt {
    Ready,
    Running,
    Waiting,
    Suspended,
    /// The task was deleted but the idle task hasn't reclaimed it yet.
    Deleted,
}

/// The state of a task, as reported by [`TaskHandle::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Ready,
    Running,
    /// The task is waiting for an object, a notification, or the end of a
    /// delay.
    Waiting,
    Suspended,
    /// The task was deleted or has exited.
    Deleted,
}

/// *Task control block* - the state data of a task.
pub(crate) struct TaskCb {
    pub(crate) name: ArrayString<MAX_NAME_LEN>,

    /// The priority assigned by the application.
    pub(crate) base_priority: usize,

    /// The priority used for scheduling. It's calculated from `base_priority`
    /// and the waiters of the held mutexes by
    /// [`mutex::update_effective_priority`].
    ///
    /// This determines the task's position within the ready queue and wait
    /// queues. Use `update_effective_priority` instead of assigning to this
    /// directly so that the task is repositioned.
    pub(crate) effective_priority: usize,

    pub(crate) st: TaskSt,

    /// The task should enter the Suspended state instead of the Ready state
    /// when its current wait ends. If set while the task is Running, the task
    /// is suspended at its next preemption point, or when its next wait ends
    /// if it blocks first.
    pub(crate) suspend_pending: bool,

    /// Another thread deleted the task while it was Running. The task exits
    /// at its next preemption point or blocking call.
    pub(crate) delete_pending: bool,

    /// Allows `TaskCb` to participate in one of linked lists.
    ///
    ///  - In the Ready state, this forms one of the lists in
    ///    [`State::ready`].
    ///  - In the Waiting state, this forms the wait queue of the object the
    ///    task waits on.
    pub(crate) link: Option<Link>,

    /// The wait state of the task. `Some(_)` while waiting and until the
    /// task picks up the result.
    pub(crate) wait: Option<Wait>,

    /// The key of the task's entry in [`State::timeouts`].
    pub(crate) timeout: Option<(Ticks, u64)>,

    /// The mutexes held by the task, in the locking order.
    pub(crate) held_mutexes: Vec<Id>,

    pub(crate) notification: NotificationCb,

    /// The simulated stack region.
    pub(crate) stack: Option<Allocation>,

    /// The entry point. Taken when the task's thread starts.
    pub(crate) entry: Option<Box<dyn FnOnce() + Send>>,
}

impl TaskCb {
    pub(crate) fn new(name: &str, priority: usize, stack: Option<Allocation>) -> Self {
        Self {
            name: truncate_name(name),
            base_priority: priority,
            effective_priority: priority,
            st: TaskSt::Ready,
            suspend_pending: false,
            delete_pending: false,
            link: None,
            wait: None,
            timeout: None,
            held_mutexes: Vec::new(),
            notification: NotificationCb::default(),
            stack,
            entry: None,
        }
    }
}

impl fmt::Debug for TaskCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("name", &self.name)
            .field("base_priority", &self.base_priority)
            .field("effective_priority", &self.effective_priority)
            .field("st", &self.st)
            .field("suspend_pending", &self.suspend_pending)
            .field("delete_pending", &self.delete_pending)
            .field("wait", &self.wait)
            .field("timeout", &self.timeout)
            .field("held_mutexes", &self.held_mutexes)
            .field("notification", &self.notification)
            .field("stack_size", &self.stack.as_ref().map(|s| s.size()))
            .finish_non_exhaustive()
    }
}

impl Linked for TaskCb {
    #[inline]
    fn link(&self) -> &Option<Link> {
        &self.link
    }

    #[inline]
    fn link_mut(&mut self) -> &mut Option<Link> {
        &mut self.link
    }
}

/// Configures and creates a task. Created by [`Kernel::task_builder`].
#[must_use = "a task is created only when `spawn` is called"]
pub struct TaskBuilder<'a> {
    kernel: &'a Kernel,
    name: ArrayString<MAX_NAME_LEN>,
    priority: usize,
    stack_size: Option<usize>,
}

impl<'a> TaskBuilder<'a> {
    pub(crate) fn new(kernel: &'a Kernel, name: &str) -> Self {
        Self {
            kernel,
            name: truncate_name(name),
            priority: 1,
            stack_size: None,
        }
    }

    /// Set the initial priority. Defaults to `1`.
    pub fn priority(mut self, priority: usize) -> Self {
        self.priority = priority;
        self
    }

    /// Set the size of the stack allocated from the kernel heap. Defaults to
    /// [`KernelBuilder::default_stack_size`](crate::KernelBuilder::default_stack_size).
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Create the task with entry point `f`. The task is created in the Ready
    /// state.
    ///
    /// When `f` returns, the task exits as if it called
    /// [`Kernel::exit_task`].
    pub fn spawn(self, f: impl FnOnce() + Send + 'static) -> Result<TaskHandle, CreateTaskError> {
        let kernel = self.kernel;
        let mut lock = kernel.lock_cpu();

        if self.priority >= kernel.inner.config.num_priorities {
            return Err(CreateTaskError::BadParam);
        }
        if matches!(lock.phase, Phase::ShuttingDown(_) | Phase::Finished(_)) {
            return Err(CreateTaskError::BadContext);
        }

        let stack_size = self
            .stack_size
            .unwrap_or(kernel.inner.config.default_stack_size);
        let state: &mut State = &mut lock;
        let Some(stack) = state.heap.allocate(stack_size) else {
            log::warn!("no memory for the stack of task {:?} ({stack_size} bytes)", self.name);
            return Err(CreateTaskError::OutOfMemory);
        };
        state.heap.bytes_mut(&stack).fill(STACK_FILL_BYTE);

        let mut tcb = TaskCb::new(&self.name, self.priority, Some(stack));
        tcb.entry = Some(Box::new(f));
        let id = state.tasks.insert(tcb);
        state.ready.push_back(&mut state.tasks, id);

        log::debug!("created task {id:?} {:?} at priority {}", self.name, self.priority);

        // A task created by a running task may preempt it
        unlock_cpu_and_check_preemption(lock);

        Ok(TaskHandle::from_id(kernel, id))
    }
}

/// A handle to a task.
///
/// The handle stays valid after the task is deleted. Operations on a deleted
/// task fail with `NoAccess`.
#[derive(Clone, PartialEq, Eq)]
pub struct TaskHandle {
    kernel: Kernel,
    id: Id,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.id).finish()
    }
}

impl Hash for TaskHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kernel.hash(state);
        self.id.hash(state);
    }
}

/// Get a live task.
pub(crate) fn task_cb(state: &mut State, id: Id) -> Result<&mut TaskCb, NoAccessError> {
    match state.tasks.get_mut(id) {
        Some(tcb) if tcb.st != TaskSt::Deleted => Ok(tcb),
        _ => Err(NoAccessError::NoAccess),
    }
}

impl TaskHandle {
    pub(crate) fn from_id(kernel: &Kernel, id: Id) -> Self {
        Self {
            kernel: kernel.clone(),
            id,
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub(crate) fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Get the task's name. Returns `None` if the task was deleted.
    pub fn name(&self) -> Option<String> {
        let mut lock = self.kernel.lock_cpu();
        task_cb(&mut lock, self.id).ok().map(|tcb| tcb.name.to_string())
    }

    pub fn state(&self) -> TaskState {
        let lock = self.kernel.lock_cpu();
        match lock.tasks.get(self.id).map(|tcb| tcb.st) {
            Some(TaskSt::Ready) => TaskState::Ready,
            Some(TaskSt::Running) => TaskState::Running,
            Some(TaskSt::Waiting) => TaskState::Waiting,
            Some(TaskSt::Suspended) => TaskState::Suspended,
            Some(TaskSt::Deleted) | None => TaskState::Deleted,
        }
    }

    /// Get the base priority.
    pub fn priority(&self) -> Result<usize, GetTaskPriorityError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(task_cb(&mut lock, self.id)?.base_priority)
    }

    /// Get the effective priority, which is the base priority raised by
    /// priority inheritance.
    pub fn effective_priority(&self) -> Result<usize, GetTaskPriorityError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(task_cb(&mut lock, self.id)?.effective_priority)
    }

    /// Change the base priority. The effective priority is recalculated, and
    /// the task is repositioned in the ready queue or the wait queue it's in.
    pub fn set_priority(&self, priority: usize) -> Result<(), SetTaskPriorityError> {
        let mut lock = self.kernel.lock_cpu();
        if lock.context() == Context::Isr {
            return Err(SetTaskPriorityError::BadContext);
        }
        if priority >= self.kernel.inner.config.num_priorities {
            return Err(SetTaskPriorityError::BadParam);
        }
        task_cb(&mut lock, self.id)?.base_priority = priority;
        mutex::update_effective_priority(&mut lock, self.id);

        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Suspend the task. A waiting task finishes its wait first and then
    /// enters the Suspended state. Suspending a suspended task has no effect.
    pub fn suspend(&self) -> Result<(), SuspendTaskError> {
        let mut lock = self.kernel.lock_cpu();
        let context = lock.context();
        if context == Context::Isr {
            return Err(SuspendTaskError::BadContext);
        }
        let st = task_cb(&mut lock, self.id)?.st;
        if lock.is_system_task(self.id) {
            return Err(SuspendTaskError::BadObjectState);
        }

        match st {
            TaskSt::Ready => {
                let state: &mut State = &mut lock;
                let priority = state.tasks[self.id].effective_priority;
                state.ready.remove(&mut state.tasks, self.id, priority);
                state.tasks[self.id].st = TaskSt::Suspended;
            }
            TaskSt::Running if context == Context::Task(self.id) => {
                state::expect_waitable_context(&lock)?;
                lock.tasks[self.id].st = TaskSt::Suspended;
                log::trace!("{:?}: suspended itself", self.id);
                switch_away(&mut lock, self.id);
                return Ok(());
            }
            // Another thread suspends the running task. It gives up the
            // processor at its next preemption point.
            TaskSt::Running | TaskSt::Waiting => lock.tasks[self.id].suspend_pending = true,
            TaskSt::Suspended | TaskSt::Deleted => {}
        }

        log::trace!("{:?}: suspended", self.id);
        Ok(())
    }

    /// Resume a suspended task.
    pub fn resume(&self) -> Result<(), ResumeTaskError> {
        let mut lock = self.kernel.lock_cpu();
        if lock.context() == Context::Isr {
            return Err(ResumeTaskError::BadContext);
        }
        let tcb = task_cb(&mut lock, self.id)?;
        let (st, suspend_pending) = (tcb.st, tcb.suspend_pending);
        match st {
            TaskSt::Suspended => {
                make_ready(&mut lock, self.id);
                log::trace!("{:?}: resumed", self.id);
                unlock_cpu_and_check_preemption(lock);
                Ok(())
            }
            TaskSt::Running | TaskSt::Waiting if suspend_pending => {
                lock.tasks[self.id].suspend_pending = false;
                Ok(())
            }
            _ => Err(ResumeTaskError::BadObjectState),
        }
    }

    /// Delete the task. If the task is the calling task, this doesn't return.
    /// If another thread deletes the running task, the task exits at its next
    /// preemption point or blocking call.
    ///
    /// The task's stack is reclaimed later by the idle task.
    ///
    /// # Panics
    ///
    /// Panics if the task holds a mutex.
    pub fn delete(&self) -> Result<(), DeleteTaskError> {
        let mut lock = self.kernel.lock_cpu();
        let context = lock.context();
        if context == Context::Isr {
            return Err(DeleteTaskError::BadContext);
        }
        task_cb(&mut lock, self.id)?;
        if lock.is_system_task(self.id) {
            return Err(DeleteTaskError::BadObjectState);
        }

        if context == Context::Task(self.id) {
            exit_current_task(lock, self.id);
        }

        let tcb = &mut lock.tasks[self.id];
        if tcb.st == TaskSt::Running {
            assert_no_held_mutexes(tcb);
            tcb.delete_pending = true;
            log::trace!("{:?}: deletion requested", self.id);
            return Ok(());
        }

        terminate_task(&mut lock, self.id);
        // Let the task's thread (if any) exit
        lock.notify_dispatch();
        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Interrupt the task's wait. The interrupted call returns `Interrupted`.
    pub fn abort_wait(&self) -> Result<(), InterruptTaskError> {
        let mut lock = self.kernel.lock_cpu();
        if task_cb(&mut lock, self.id)?.st != TaskSt::Waiting {
            return Err(InterruptTaskError::BadObjectState);
        }
        wait::complete_wait(&mut lock, self.id, Err(WaitTimeoutError::Interrupted));
        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }
}

/// Detach a task from every kernel structure and put it in the Deleted
/// state.
fn terminate_task(state: &mut State, task: Id) {
    let tcb = &state.tasks[task];
    assert_no_held_mutexes(tcb);

    let (st, priority) = (tcb.st, tcb.effective_priority);
    match st {
        TaskSt::Ready => state.ready.remove(&mut state.tasks, task, priority),
        TaskSt::Waiting => wait::abandon_wait(state, task),
        TaskSt::Running | TaskSt::Suspended | TaskSt::Deleted => {}
    }

    let tcb = &mut state.tasks[task];
    tcb.st = TaskSt::Deleted;
    tcb.suspend_pending = false;
    tcb.delete_pending = false;
    state.terminated.push(task);
    log::debug!("deleted task {task:?}");
}

fn assert_no_held_mutexes(tcb: &TaskCb) {
    assert!(
        tcb.held_mutexes.is_empty(),
        "deleting task {:?} that holds a mutex",
        tcb.name
    );
}

/// Carry out a deletion of the running task `me` requested by another
/// thread. Doesn't return if there is one.
pub(crate) fn exit_if_delete_pending(lock: &mut CpuLockGuard<'_>, me: Id) {
    if !lock.tasks[me].delete_pending || std::thread::panicking() {
        return;
    }
    log::trace!("{me:?}: exiting on a deletion request");
    terminate_task(lock, me);
    choose_next_running_task(lock, false);
    port::exit_thread(lock)
}

/// Carry out a deletion or suspension of the running task `me` requested by
/// another thread.
fn apply_stop_requests(lock: &mut CpuLockGuard<'_>, me: Id) {
    exit_if_delete_pending(lock, me);
    let tcb = &mut lock.tasks[me];
    if tcb.st == TaskSt::Running && mem::take(&mut tcb.suspend_pending) {
        tcb.st = TaskSt::Suspended;
        log::trace!("{me:?}: entering the Suspended state on request");
    }
}

/// Delete the calling task. Doesn't return.
fn exit_current_task(mut lock: CpuLockGuard<'_>, task: Id) -> ! {
    assert!(
        lock.critical_nesting == 0 && lock.scheduler_suspended == 0,
        "a task cannot exit inside a critical section or while the scheduler is suspended"
    );
    terminate_task(&mut lock, task);
    choose_next_running_task(&mut lock, false);
    port::exit_thread(&mut lock)
}

/// Implements [`Kernel::exit_task`] and the return from a task's entry
/// point.
pub(crate) fn exit_task(kernel: &Kernel) -> Result<Infallible, ExitTaskError> {
    let lock = kernel.lock_cpu();
    let task = state::expect_task_context(&lock)?;
    exit_current_task(lock, task)
}

/// Transition a task into the Ready state, or into the Suspended state if a
/// suspension is pending.
pub(crate) fn make_ready(state: &mut State, task: Id) {
    let tcb = &mut state.tasks[task];
    if mem::take(&mut tcb.suspend_pending) {
        tcb.st = TaskSt::Suspended;
        log::trace!("{task:?}: wait ended, entering the Suspended state");
    } else {
        tcb.st = TaskSt::Ready;
        state.ready.push_back(&mut state.tasks, task);
    }
}

/// Decide the next task to run and update [`State::running`].
///
/// The previous task, if still Running, goes back to the ready queue: to the
/// back of its band if it's rotated (by `yield_now` or the end of a time
/// slice), or to the front if it's preempted by a higher priority task.
pub(crate) fn choose_next_running_task(state: &mut State, yield_now: bool) {
    let rotate = mem::take(&mut state.rotate_pending) || yield_now;
    let prev = state.running;
    let prev_priority = state.running_priority();

    let next = match state
        .ready
        .pop_front_task(&mut state.tasks, prev_priority, rotate)
    {
        readyqueue::ScheduleDecision::Keep => return,
        readyqueue::ScheduleDecision::SwitchTo(next) => next,
    };

    if let (Some(prev), Some(prev_priority)) = (prev, prev_priority) {
        let next_priority = next.map(|task| state.tasks[task].effective_priority);
        state.tasks[prev].st = TaskSt::Ready;
        if next_priority == Some(prev_priority) {
            state.ready.push_back(&mut state.tasks, prev);
        } else {
            state.ready.push_front(&mut state.tasks, prev);
        }
    }

    if let Some(next) = next {
        state.tasks[next].st = TaskSt::Running;
    }
    state.running = next;

    log::trace!("dispatch: {prev:?} -> {next:?}");
}

/// Make the thread of the calling task `me` follow the scheduling decision
/// in [`State::running`]. Returns when `me` is chosen to run again.
fn dispatch(lock: &mut CpuLockGuard<'_>, me: Id) {
    if lock.running == Some(me) {
        return;
    }
    if let Some(next) = lock.running {
        port::ensure_thread_started(lock, next);
    }
    lock.notify_dispatch();
    port::wait_until_dispatched(lock, me);
}

/// Let the scheduler decide whether the calling task `me` keeps running. Used
/// when `me` has left the Running state or has just woken up a task. Returns
/// when `me` is running again.
pub(crate) fn switch_away(lock: &mut CpuLockGuard<'_>, me: Id) {
    choose_next_running_task(lock, false);
    dispatch(lock, me);
}

/// The preemption point of the calling task `me`. Delivers pending interrupts
/// and switches to a higher priority task if there is one.
///
/// Inside a critical section, nothing happens until the outermost section
/// ends. While the scheduler is suspended, interrupts are delivered but the
/// switch is deferred until it resumes.
pub(crate) fn preemption_point(lock: &mut CpuLockGuard<'_>, me: Id) {
    port::exit_if_shutting_down(lock);
    if lock.critical_nesting > 0 {
        return;
    }
    interrupt::deliver_pending_interrupts(lock);
    if lock.scheduler_suspended > 0 {
        return;
    }
    apply_stop_requests(lock, me);
    choose_next_running_task(lock, false);
    dispatch(lock, me);
}

/// Relinquish CPU Lock. If the caller is the running task, the call is a
/// preemption point.
///
/// System services that transition a task into the Ready state should call
/// this before returning to the caller. In an interrupt handler, the switch
/// happens when the handler returns.
pub(crate) fn unlock_cpu_and_check_preemption(mut lock: CpuLockGuard<'_>) {
    if let Context::Task(me) = lock.context() {
        preemption_point(&mut lock, me);
    }
}

/// Current-task services
impl Kernel {
    /// Start building a task named `name`.
    pub fn task_builder(&self, name: &str) -> TaskBuilder<'_> {
        TaskBuilder::new(self, name)
    }

    /// Get the calling task.
    pub fn current_task(&self) -> Result<TaskHandle, GetCurrentTaskError> {
        let lock = self.lock_cpu();
        let id = state::expect_task_context(&lock)?;
        Ok(TaskHandle::from_id(self, id))
    }

    /// Block the calling task for `ticks` ticks. `delay(0)` is equivalent to
    /// [`Self::yield_now`].
    pub fn delay(&self, ticks: Ticks) -> Result<(), DelayError> {
        let mut lock = self.lock_cpu();
        state::check_blocking_call(&lock, Timeout::FOREVER);
        let task = state::expect_waitable_context(&lock)?;

        if ticks == 0 {
            drop(lock);
            return self.yield_now();
        }

        let (result, _) = wait::wait_until_woken_up(
            &mut lock,
            task,
            WaitObject::Sleep,
            WaitPayload::None,
            Timeout::ticks(ticks),
        );
        match result {
            Ok(()) | Err(WaitTimeoutError::Timeout) => Ok(()),
            Err(WaitTimeoutError::Interrupted) => Err(DelayError::Interrupted),
        }
    }

    /// Block the calling task until `*last_wake + period`, and advance
    /// `*last_wake` by `period`. This produces a fixed execution frequency
    /// regardless of how long the task runs in each period.
    ///
    /// If the wake time has already passed, returns without blocking.
    pub fn delay_until(&self, last_wake: &mut Ticks, period: Ticks) -> Result<(), DelayError> {
        let now = self.tick_count();
        let wake = last_wake.saturating_add(period);
        *last_wake = wake;
        if wake > now {
            self.delay(wake - now)
        } else {
            let lock = self.lock_cpu();
            state::expect_task_context(&lock)?;
            Ok(())
        }
    }

    /// Move the calling task to the back of its priority band, letting other
    /// ready tasks of the same priority run.
    pub fn yield_now(&self) -> Result<(), DelayError> {
        let mut lock = self.lock_cpu();
        let task = state::expect_task_context(&lock)?;
        port::exit_if_shutting_down(&mut lock);
        if lock.critical_nesting > 0 || lock.scheduler_suspended > 0 {
            return Ok(());
        }
        interrupt::deliver_pending_interrupts(&mut lock);
        apply_stop_requests(&mut lock, task);
        choose_next_running_task(&mut lock, true);
        dispatch(&mut lock, task);
        Ok(())
    }

    /// Model `ticks` ticks of computation by the calling task. Each tick is a
    /// preemption point, so higher priority tasks, interrupts, and time
    /// slicing all take effect in the middle.
    pub fn busy_wait(&self, ticks: Ticks) -> Result<(), DelayError> {
        let mut lock = self.lock_cpu();
        let task = state::expect_task_context(&lock)?;
        for _ in 0..ticks {
            timeout::process_tick(&mut lock);
            preemption_point(&mut lock, task);
        }
        Ok(())
    }

    /// Terminate the calling task. Equivalent to deleting the calling task.
    ///
    /// # Panics
    ///
    /// Panics if the calling task holds a mutex.
    pub fn exit_task(&self) -> Result<Infallible, ExitTaskError> {
        exit_task(self)
    }
}
