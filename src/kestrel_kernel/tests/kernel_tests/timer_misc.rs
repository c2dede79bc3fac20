//! Checks miscellaneous properties of `Timer`.
use assert_matches::assert_matches;
use kestrel_kernel::{
    CreateTimerError, DeleteTaskError, Interrupt, Kernel, QueryTimerError, RunOutcome,
    SuspendTaskError, Ticks, Timeout, Timer, TimerCommandError, TimerMode, TryTimerCommandError,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::run;

type Log = Arc<Mutex<Vec<(usize, Ticks)>>>;

/// Create a timer that records its tag and the firing time in `log`.
fn recording_timer(kernel: &Kernel, log: &Log, period: Ticks, mode: TimerMode, tag: usize) -> Timer {
    let (k, log) = (kernel.clone(), Arc::clone(log));
    Timer::new(kernel, "recorder", period, mode, tag, move |timer| {
        log.lock().push((timer.tag().unwrap(), k.tick_count()));
    })
    .unwrap()
}

#[test]
fn one_shot_and_auto_reload() {
    let kernel = Kernel::builder().build();
    let log = Log::default();
    let once = recording_timer(&kernel, &log, 10, TimerMode::OneShot, 1);
    let periodic = recording_timer(&kernel, &log, 5, TimerMode::AutoReload, 2);

    let (k, log2) = (kernel.clone(), Arc::clone(&log));
    kernel
        .task_builder("task")
        .spawn(move || {
            assert_eq!(once.is_active(), Ok(false));
            assert_eq!(once.expiry_time(), Ok(None));

            once.start(Timeout::FOREVER).unwrap();
            periodic.start(Timeout::FOREVER).unwrap();
            assert_eq!(once.is_active(), Ok(true));
            assert_eq!(once.expiry_time(), Ok(Some(10)));
            assert_eq!(periodic.expiry_time(), Ok(Some(5)));

            k.delay(22).unwrap();
            assert_eq!(*log2.lock(), [(2, 5), (1, 10), (2, 10), (2, 15), (2, 20)]);
            assert_eq!(once.is_active(), Ok(false));
            assert_eq!(periodic.expiry_time(), Ok(Some(25)));

            periodic.stop(Timeout::FOREVER).unwrap();
            assert_eq!(periodic.is_active(), Ok(false));
            k.delay(10).unwrap();
            assert_eq!(log2.lock().len(), 5);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}

#[test]
fn restart_and_change_period() {
    let kernel = Kernel::builder().build();
    let log = Log::default();
    let watchdog = recording_timer(&kernel, &log, 10, TimerMode::OneShot, 1);
    let periodic = recording_timer(&kernel, &log, 10, TimerMode::AutoReload, 2);

    let (k, log2) = (kernel.clone(), Arc::clone(&log));
    kernel
        .task_builder("task")
        .spawn(move || {
            watchdog.start(Timeout::FOREVER).unwrap();
            k.delay(6).unwrap();

            // Kick the watchdog
            watchdog.reset(Timeout::FOREVER).unwrap();
            assert_eq!(watchdog.expiry_time(), Ok(Some(16)));
            k.delay(20).unwrap();
            assert_eq!(*log2.lock(), [(1, 16)]);

            periodic.start(Timeout::FOREVER).unwrap();
            assert_eq!(periodic.expiry_time(), Ok(Some(36)));
            k.delay(3).unwrap();

            // Restarts with the new period
            periodic.change_period(4, Timeout::FOREVER).unwrap();
            assert_eq!(periodic.period(), Ok(4));
            assert_eq!(periodic.expiry_time(), Ok(Some(33)));
            assert_eq!(
                periodic.change_period(0, Timeout::FOREVER),
                Err(TimerCommandError::BadParam)
            );

            k.delay(13).unwrap();
            periodic.stop(Timeout::FOREVER).unwrap();
            assert_eq!(*log2.lock(), [(1, 16), (2, 33), (2, 37), (2, 41)]);
            assert_eq!(periodic.mode(), Ok(TimerMode::AutoReload));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}

#[test]
fn properties_and_delete() {
    let kernel = Kernel::builder().build();
    let log = Log::default();

    assert_matches!(
        Timer::new(&kernel, "zero", 0, TimerMode::OneShot, 0, |_| {}),
        Err(CreateTimerError::BadParam)
    );

    let timer = Timer::new(
        &kernel,
        "a_timer_with_a_long_name",
        3,
        TimerMode::OneShot,
        42,
        |_| unreachable!(),
    )
    .unwrap();
    assert_eq!(timer.name().as_deref(), Ok("a_timer_with_a_l"));
    assert_eq!(timer.tag(), Ok(42));
    timer.set_tag(7).unwrap();
    assert_eq!(timer.tag(), Ok(7));
    assert_eq!(timer.period(), Ok(3));
    assert_eq!(timer.mode(), Ok(TimerMode::OneShot));

    // Started before the kernel runs. The command is processed at startup.
    let early = recording_timer(&kernel, &log, 3, TimerMode::OneShot, 1);
    early.start(Timeout::NO_WAIT).unwrap();

    let (k, log2) = (kernel.clone(), Arc::clone(&log));
    kernel
        .task_builder("task")
        .spawn(move || {
            timer.start(Timeout::FOREVER).unwrap();
            assert_eq!(timer.is_active(), Ok(true));

            timer.delete(Timeout::FOREVER).unwrap();
            assert_eq!(timer.is_active(), Err(QueryTimerError::NoAccess));
            assert_eq!(timer.start(Timeout::FOREVER), Err(TimerCommandError::NoAccess));

            k.delay(10).unwrap();
            assert_eq!(*log2.lock(), [(1, 3)]);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}

#[test]
fn callback_runs_in_the_service_task() {
    let kernel = Kernel::builder().timer_task_priority(5).build();
    let fired = Arc::new(AtomicBool::new(false));

    let (k, fired2) = (kernel.clone(), Arc::clone(&fired));
    let timer = Timer::new(&kernel, "timer", 1, TimerMode::OneShot, 0, move |_| {
        let me = k.current_task().unwrap();
        assert_eq!(me.name().as_deref(), Some("TIMER"));
        assert_eq!(me.priority(), Ok(5));
        assert_eq!(me.delete(), Err(DeleteTaskError::BadObjectState));
        assert_eq!(me.suspend(), Err(SuspendTaskError::BadObjectState));
        fired2.store(true, Ordering::Relaxed);
    })
    .unwrap();

    let k = kernel.clone();
    kernel
        .task_builder("task")
        .spawn(move || {
            timer.start(Timeout::FOREVER).unwrap();
            k.delay(2).unwrap();
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
    assert!(fired.load(Ordering::Relaxed));
}

/// Commands posted by an interrupt handler are processed when the service
/// task gets to run, but the expiration time counts from when they were
/// posted.
#[test]
fn commands_from_interrupt_handler() {
    let kernel = Kernel::builder().build();
    let log = Log::default();
    let timer = recording_timer(&kernel, &log, 5, TimerMode::OneShot, 1);

    let t = timer.clone();
    let irq = Interrupt::new(&kernel, move |cx| {
        assert_eq!(
            t.change_period_from_isr(cx, 0),
            Err(TryTimerCommandError::BadParam)
        );
        t.start_from_isr(cx).unwrap();
    });

    let (k, log2) = (kernel.clone(), Arc::clone(&log));
    kernel
        .task_builder("task")
        .spawn(move || {
            irq.pend();
            // No yield was requested
            assert_eq!(timer.is_active(), Ok(false));

            k.busy_wait(2).unwrap();
            assert_eq!(timer.expiry_time(), Ok(Some(5)));

            k.delay(10).unwrap();
            assert_eq!(*log2.lock(), [(1, 5)]);
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::Quiescent);
}

/// Expiration times beyond the range of `Ticks` saturate instead of
/// overflowing.
#[test]
fn very_long_periods_saturate() {
    let kernel = Kernel::builder().tick_limit(100).build();
    let timer = Timer::new(
        &kernel,
        "far",
        Ticks::MAX,
        TimerMode::AutoReload,
        0,
        |_| unreachable!(),
    )
    .unwrap();

    let k = kernel.clone();
    kernel
        .task_builder("task")
        .spawn(move || {
            k.delay(1).unwrap();
            timer.start(Timeout::FOREVER).unwrap();
            assert_eq!(timer.expiry_time(), Ok(Some(Ticks::MAX)));

            k.delay(1).unwrap();
            timer.change_period(Ticks::MAX - 1, Timeout::FOREVER).unwrap();
            assert_eq!(timer.expiry_time(), Ok(Some(Ticks::MAX)));
            assert_eq!(timer.is_active(), Ok(true));
        })
        .unwrap();

    assert_eq!(run(&kernel), RunOutcome::TickLimit);
}
