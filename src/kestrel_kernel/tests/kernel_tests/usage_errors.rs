//! Usage errors that can't be reported as error codes. They panic, and the
//! panic stops the system and is resumed by `Kernel::run`.
use kestrel_kernel::{Interrupt, Kernel, Mutex, Queue, Timeout};

use crate::run;

#[test]
#[should_panic(expected = "that holds a mutex")]
fn deleting_mutex_owner() {
    let kernel = Kernel::builder().build();
    let mutex = Mutex::new(&kernel);

    let (k, m) = (kernel.clone(), mutex.clone());
    let owner = kernel
        .task_builder("owner")
        .priority(2)
        .spawn(move || {
            m.lock(Timeout::FOREVER).unwrap();
            k.delay(10).unwrap();
        })
        .unwrap();

    kernel
        .task_builder("deleter")
        .priority(1)
        .spawn(move || {
            let _ = owner.delete();
        })
        .unwrap();

    run(&kernel);
}

#[test]
#[should_panic(expected = "blocking call from interrupt context")]
fn blocking_in_interrupt_handler() {
    let kernel = Kernel::builder().build();
    let queue = Queue::<u32>::new(&kernel, 1).unwrap();

    let irq = Interrupt::new(&kernel, move |_| {
        let _ = queue.receive(Timeout::ticks(1));
    });

    kernel
        .task_builder("task")
        .spawn(move || irq.pend())
        .unwrap();

    run(&kernel);
}

#[test]
#[should_panic(expected = "blocking call inside a critical section")]
fn blocking_in_critical_section() {
    let kernel = Kernel::builder().build();

    let k = kernel.clone();
    kernel
        .task_builder("task")
        .spawn(move || {
            let _guard = k.enter_critical();
            let _ = k.delay(1);
        })
        .unwrap();

    run(&kernel);
}

#[test]
#[should_panic(expected = "blocking call while the scheduler is suspended")]
fn blocking_while_scheduler_suspended() {
    let kernel = Kernel::builder().build();

    let k = kernel.clone();
    kernel
        .task_builder("task")
        .spawn(move || {
            let _guard = k.suspend_all();
            let _ = k.delay(1);
        })
        .unwrap();

    run(&kernel);
}

#[test]
#[should_panic(expected = "mutexes cannot be used from interrupt context")]
fn mutex_in_interrupt_handler() {
    let kernel = Kernel::builder().build();
    let mutex = Mutex::new(&kernel);

    let irq = Interrupt::new(&kernel, move |_| {
        let _ = mutex.lock(Timeout::NO_WAIT);
    });

    kernel
        .task_builder("task")
        .spawn(move || irq.pend())
        .unwrap();

    run(&kernel);
}
