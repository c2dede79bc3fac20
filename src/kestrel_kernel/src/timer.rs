//! Software timers
//!
//! Timers are managed by the timer service task. API calls don't touch the
//! active timer list directly; they post commands stamped with the current
//! tick count to the service task's command queue. The service task applies
//! the commands in order and runs the callbacks of expired timers.
//!
//! Expiration times are computed from the tick at which a command was issued,
//! not the tick at which it was processed. If the computed time has already
//! passed, the timer fires as soon as the command is processed.
use arrayvec::ArrayString;
use bytemuck::{Pod, Zeroable};
use std::{fmt, mem};

use crate::{
    error::{
        CreateTimerError, NoAccessError, QueryTimerError, ReceiveError, ResultCode,
        TimerCommandError, TryTimerCommandError,
    },
    interrupt::IsrContext,
    queue::{self, SendPosition},
    state::State,
    task,
    utils::Id,
    Kernel, Ticks, Timeout, MAX_NAME_LEN,
};

type Callback = Box<dyn FnMut(&Timer) + Send>;

/// Whether a timer restarts itself after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerMode {
    /// Fire once and then become dormant.
    OneShot,
    /// Fire every period until stopped.
    AutoReload,
}

/// *Timer control block*
pub(crate) struct TimerCb {
    name: ArrayString<MAX_NAME_LEN>,
    period: Ticks,
    mode: TimerMode,
    tag: usize,
    /// Taken while the callback is running, and after the kernel has
    /// stopped.
    pub(crate) callback: Option<Callback>,
    /// The key of the timer's entry in [`State::active_timers`].
    expiry: Option<(Ticks, u64)>,
}

impl fmt::Debug for TimerCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerCb")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("mode", &self.mode)
            .field("tag", &self.tag)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// The timer service task and its command queue.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerService {
    pub(crate) task: Id,
    pub(crate) queue: Id,
}

const OP_START: u64 = 1;
const OP_STOP: u64 = 2;
const OP_CHANGE_PERIOD: u64 = 3;
const OP_DELETE: u64 = 4;

/// An item of the command queue.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct TimerCommand {
    opcode: u64,
    timer: [u64; 2],
    issued_at: Ticks,
    /// The new period for `OP_CHANGE_PERIOD`
    value: u64,
}

fn timer_cb(state: &mut State, id: Id) -> Result<&mut TimerCb, NoAccessError> {
    state.timers.get_mut(id).ok_or(NoAccessError::NoAccess)
}

/// Create the command queue and the service task.
pub(crate) fn start_timer_service(
    kernel: &Kernel,
    priority: usize,
    queue_length: usize,
    stack_size: usize,
) -> Result<(), ResultCode> {
    let queue = queue::create(kernel, queue_length, mem::size_of::<TimerCommand>())?;

    let service_kernel = kernel.clone();
    let task = kernel
        .task_builder("TIMER")
        .priority(priority)
        .stack_size(stack_size)
        .spawn(move || service_main(service_kernel, queue))?;

    kernel.lock_cpu().timer_service = Some(TimerService {
        task: task.id(),
        queue,
    });
    log::debug!("timer service started at priority {priority}");
    Ok(())
}

/// The entry point of the timer service task.
fn service_main(kernel: Kernel, queue: Id) {
    loop {
        process_expired_timers(&kernel);

        let timeout = {
            let lock = kernel.lock_cpu();
            match lock.active_timers.first() {
                Some(&(at, _, _)) => Timeout::ticks(at.saturating_sub(lock.tick)),
                None => Timeout::FOREVER,
            }
        };

        let mut command = TimerCommand::zeroed();
        let result = queue::receive(
            &kernel,
            queue,
            bytemuck::bytes_of_mut(&mut command),
            false,
            timeout,
        );
        match result {
            Ok(()) => process_command(&kernel, &command),
            Err(ReceiveError::Timeout) => {}
            Err(e) => log::warn!("timer service: failed to receive a command: {e}"),
        }
    }
}

/// Put a timer in the active timer list.
fn activate(state: &mut State, id: Id, at: Ticks) {
    let seq = state.next_seq();
    state.active_timers.insert((at, seq, id));
    state.timers[id].expiry = Some((at, seq));
}

fn deactivate(state: &mut State, id: Id) {
    if let Some((at, seq)) = state.timers[id].expiry.take() {
        state.active_timers.remove(&(at, seq, id));
    }
}

/// Fire the timers whose expiration times have come. An auto-reload timer
/// that has missed several periods fires once for each.
fn process_expired_timers(kernel: &Kernel) {
    loop {
        let mut lock = kernel.lock_cpu();
        let now = lock.tick;
        let Some(&(at, seq, id)) = lock.active_timers.first() else {
            return;
        };
        if at > now {
            return;
        }

        let state: &mut State = &mut lock;
        state.active_timers.remove(&(at, seq, id));
        let timer_cb = &mut state.timers[id];
        timer_cb.expiry = None;
        let (mode, period) = (timer_cb.mode, timer_cb.period);
        let callback = timer_cb.callback.take();
        if mode == TimerMode::AutoReload {
            activate(state, id, at.saturating_add(period));
        }
        log::trace!("timer {id:?}: fired at {now} (due at {at})");

        let Some(mut callback) = callback else {
            continue;
        };
        let timer = Timer {
            kernel: kernel.clone(),
            id,
        };
        drop(lock);
        callback(&timer);

        // The callback may have deleted the timer
        let mut lock = kernel.lock_cpu();
        if let Some(timer_cb) = lock.timers.get_mut(id) {
            if timer_cb.callback.is_none() {
                timer_cb.callback = Some(callback);
                continue;
            }
        }
        drop(lock);
        drop(callback);
    }
}

fn process_command(kernel: &Kernel, command: &TimerCommand) {
    let id = Id::from_raw(command.timer);
    let mut lock = kernel.lock_cpu();
    let state: &mut State = &mut lock;
    let Ok(timer_cb) = timer_cb(state, id) else {
        log::debug!("timer {id:?}: discarding a command for a deleted timer");
        return;
    };

    match command.opcode {
        OP_START => {
            let period = timer_cb.period;
            deactivate(state, id);
            activate(state, id, command.issued_at.saturating_add(period));
        }
        OP_STOP => deactivate(state, id),
        OP_CHANGE_PERIOD => {
            timer_cb.period = command.value;
            deactivate(state, id);
            activate(state, id, command.issued_at.saturating_add(command.value));
        }
        OP_DELETE => {
            deactivate(state, id);
            let timer_cb = state.timers.remove(id);
            log::debug!("deleted timer {id:?}");
            drop(lock);
            drop(timer_cb);
        }
        opcode => unreachable!("unknown timer command {opcode}"),
    }
}

/// A software timer.
///
/// The callback runs in the timer service task, so it must not block for
/// long, and it must not wait for the command queue to have space (which
/// only the service task can make).
#[derive(Clone, PartialEq, Eq)]
pub struct Timer {
    kernel: Kernel,
    id: Id,
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Timer").field(&self.id).finish()
    }
}

impl Timer {
    /// Create a dormant timer. `tag` is an arbitrary value that the callback
    /// can use to tell timers sharing the same code apart.
    pub fn new(
        kernel: &Kernel,
        name: &str,
        period: Ticks,
        mode: TimerMode,
        tag: usize,
        callback: impl FnMut(&Timer) + Send + 'static,
    ) -> Result<Self, CreateTimerError> {
        if period == 0 {
            return Err(CreateTimerError::BadParam);
        }
        let id = kernel.lock_cpu().timers.insert(TimerCb {
            name: task::truncate_name(name),
            period,
            mode,
            tag,
            callback: Some(Box::new(callback)),
            expiry: None,
        });
        log::debug!("created timer {id:?} {name:?} (period = {period}, {mode:?})");
        Ok(Self {
            kernel: kernel.clone(),
            id,
        })
    }

    fn command(&self, opcode: u64, value: u64) -> Result<(TimerCommand, TimerService), NoAccessError> {
        let mut lock = self.kernel.lock_cpu();
        timer_cb(&mut lock, self.id)?;
        let Some(service) = lock.timer_service else {
            unreachable!("the timer service is not running");
        };
        let command = TimerCommand {
            opcode,
            timer: self.id.to_raw(),
            issued_at: lock.tick,
            value,
        };
        Ok((command, service))
    }

    fn post(&self, opcode: u64, value: u64, timeout: Timeout) -> Result<(), TimerCommandError> {
        let (command, service) = self.command(opcode, value)?;
        queue::send(
            &self.kernel,
            service.queue,
            bytemuck::bytes_of(&command),
            SendPosition::Back,
            timeout,
        )?;
        Ok(())
    }

    fn post_from_isr(
        &self,
        cx: &mut IsrContext<'_>,
        opcode: u64,
        value: u64,
    ) -> Result<(), TryTimerCommandError> {
        let (command, service) = self.command(opcode, value)?;
        queue::send_from_isr(
            cx,
            &self.kernel,
            service.queue,
            bytemuck::bytes_of(&command),
            SendPosition::Back,
        )?;
        Ok(())
    }

    /// Start the timer. It expires one period after this call. Starting an
    /// active timer restarts it.
    ///
    /// `timeout` limits the wait for space in the command queue.
    pub fn start(&self, timeout: Timeout) -> Result<(), TimerCommandError> {
        self.post(OP_START, 0, timeout)
    }

    /// Stop the timer.
    pub fn stop(&self, timeout: Timeout) -> Result<(), TimerCommandError> {
        self.post(OP_STOP, 0, timeout)
    }

    /// Restart the timer. Equivalent to [`Self::start`].
    pub fn reset(&self, timeout: Timeout) -> Result<(), TimerCommandError> {
        self.post(OP_START, 0, timeout)
    }

    /// Change the period and restart the timer with it.
    pub fn change_period(&self, period: Ticks, timeout: Timeout) -> Result<(), TimerCommandError> {
        if period == 0 {
            return Err(TimerCommandError::BadParam);
        }
        self.post(OP_CHANGE_PERIOD, period, timeout)
    }

    /// Delete the timer. The handle becomes invalid once the service task
    /// processes the command.
    pub fn delete(&self, timeout: Timeout) -> Result<(), TimerCommandError> {
        self.post(OP_DELETE, 0, timeout)
    }

    pub fn start_from_isr(&self, cx: &mut IsrContext<'_>) -> Result<(), TryTimerCommandError> {
        cx.check_kernel(&self.kernel);
        self.post_from_isr(cx, OP_START, 0)
    }

    pub fn stop_from_isr(&self, cx: &mut IsrContext<'_>) -> Result<(), TryTimerCommandError> {
        cx.check_kernel(&self.kernel);
        self.post_from_isr(cx, OP_STOP, 0)
    }

    pub fn reset_from_isr(&self, cx: &mut IsrContext<'_>) -> Result<(), TryTimerCommandError> {
        cx.check_kernel(&self.kernel);
        self.post_from_isr(cx, OP_START, 0)
    }

    pub fn change_period_from_isr(
        &self,
        cx: &mut IsrContext<'_>,
        period: Ticks,
    ) -> Result<(), TryTimerCommandError> {
        cx.check_kernel(&self.kernel);
        if period == 0 {
            return Err(TryTimerCommandError::BadParam);
        }
        self.post_from_isr(cx, OP_CHANGE_PERIOD, period)
    }

    /// Check whether the timer is running. Commands take effect when the
    /// service task processes them, not when they are posted.
    pub fn is_active(&self) -> Result<bool, QueryTimerError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(timer_cb(&mut lock, self.id)?.expiry.is_some())
    }

    pub fn period(&self) -> Result<Ticks, QueryTimerError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(timer_cb(&mut lock, self.id)?.period)
    }

    pub fn mode(&self) -> Result<TimerMode, QueryTimerError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(timer_cb(&mut lock, self.id)?.mode)
    }

    pub fn tag(&self) -> Result<usize, QueryTimerError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(timer_cb(&mut lock, self.id)?.tag)
    }

    pub fn set_tag(&self, tag: usize) -> Result<(), QueryTimerError> {
        let mut lock = self.kernel.lock_cpu();
        timer_cb(&mut lock, self.id)?.tag = tag;
        Ok(())
    }

    /// Get the tick count at which the timer expires next, or `None` if it's
    /// dormant.
    pub fn expiry_time(&self) -> Result<Option<Ticks>, QueryTimerError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(timer_cb(&mut lock, self.id)?.expiry.map(|(at, _)| at))
    }

    pub fn name(&self) -> Result<String, QueryTimerError> {
        let mut lock = self.kernel.lock_cpu();
        Ok(timer_cb(&mut lock, self.id)?.name.to_string())
    }
}
