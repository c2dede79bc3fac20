//! A preemptive, priority-based real-time kernel that runs on a hosted
//! simulation.
//!
//! Each task runs on its own OS thread, but the kernel lets exactly one of them
//! proceed at a time, just like a single-core processor. Time is a virtual
//! tick count that advances when tasks model computation with
//! [`Kernel::busy_wait`] or when every task is waiting and the idle task skips
//! ahead to the next pending event. As a result, a run is deterministic.
//!
//! # Kernel objects
//!
//!  - [Tasks](TaskHandle) are created by [`Kernel::task_builder`]. Priorities
//!    range over `0..max_priorities`, and a larger value means a higher
//!    priority. Priority 0 is shared with the idle task.
//!  - [`Queue`]s copy fixed-size items. [`Mailbox`] is a length-1 queue
//!    holding the latest value, and [`QueueSet`] lets a task wait on several
//!    queues and semaphores at once.
//!  - [`Semaphore`]s, and [`Mutex`]es and [`RecursiveMutex`]es with priority
//!    inheritance.
//!  - [`EventGroup`]s for broadcast and barrier synchronization.
//!  - [Task notifications](TaskHandle::notify).
//!  - Software [`Timer`]s, serviced by a dedicated task.
//!  - Simulated [`Interrupt`]s, which are the only way to reach the `*_from_isr`
//!    services.
//!
//! Memory for task stacks and queue storage comes from a [TLSF
//! heap](kestrel_heap) seeded from one or more regions.
//!
//! # Example
//!
//! ```
//! use kestrel_kernel::{Kernel, Queue, RunOutcome, Timeout};
//!
//! let kernel = Kernel::builder().build();
//! let queue = Queue::<u32>::new(&kernel, 1).unwrap();
//!
//! let q = queue.clone();
//! kernel
//!     .task_builder("producer")
//!     .priority(1)
//!     .spawn(move || {
//!         for i in 0..10 {
//!             q.send_to_back(i, Timeout::FOREVER).unwrap();
//!         }
//!     })
//!     .unwrap();
//!
//! let (q, k) = (queue.clone(), kernel.clone());
//! kernel
//!     .task_builder("consumer")
//!     .priority(2)
//!     .spawn(move || {
//!         for i in 0..10 {
//!             assert_eq!(q.receive(Timeout::FOREVER).unwrap(), i);
//!         }
//!         k.shutdown();
//!     })
//!     .unwrap();
//!
//! assert_eq!(kernel.run(), RunOutcome::Shutdown);
//! ```
//!
//! # Errors
//!
//! Fallible services return an error type specific to the operation. Every
//! error type converts into [`ResultCode`]. Usage errors, such as a blocking
//! call from an interrupt handler or deleting a task that holds a mutex,
//! panic instead.
use std::sync::Arc;

use parking_lot::{Condvar, Mutex as PlMutex};

mod cfg;
mod critical;
mod error;
mod event_group;
mod idle;
mod interrupt;
mod klock;
mod mutex;
mod notify;
mod port;
mod queue;
mod queue_set;
mod semaphore;
mod state;
mod task;
mod timeout;
mod timer;
mod utils;
mod wait;

pub use kestrel_heap::HeapStats;

pub use self::{
    cfg::KernelBuilder,
    critical::{CriticalSection, SchedulerSuspension},
    error::*,
    event_group::{EventBits, EventGroup, WaitFlags},
    interrupt::{Interrupt, IsrContext},
    mutex::{Mutex, RecursiveMutex},
    notify::{NotifyAction, TakeMode},
    queue::{Mailbox, Queue, Stamped},
    queue_set::{QueueSet, SetMember},
    semaphore::Semaphore,
    task::{TaskBuilder, TaskHandle, TaskState},
    timeout::{Ticks, Timeout},
    timer::{Timer, TimerMode},
};

/// The maximum length of a task or timer name, in bytes. Longer names are
/// truncated.
pub const MAX_NAME_LEN: usize = 16;

/// How [`Kernel::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunOutcome {
    /// [`Kernel::shutdown`] was called.
    Shutdown,
    /// The tick count reached the limit set by
    /// [`KernelBuilder::tick_limit`].
    TickLimit,
    /// Every task is waiting for something that will never happen, or has
    /// exited.
    Quiescent,
}

/// A handle to a kernel instance.
///
/// Handles are cheap to clone. Kernel objects created on a kernel keep a
/// handle to it.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

struct KernelInner {
    state: PlMutex<state::State>,
    /// Signaled whenever `State::running` changes.
    dispatch: Condvar,
    /// Signaled when the last task thread exits.
    finished: Condvar,
    config: cfg::Config,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Kernel").field(&self.addr()).finish()
    }
}

impl PartialEq for Kernel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Kernel {}

impl std::hash::Hash for Kernel {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl Kernel {
    /// Start configuring a kernel.
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    /// Get the current tick count.
    pub fn tick_count(&self) -> Ticks {
        self.lock_cpu().tick
    }

    /// Get the statistics of the kernel heap.
    pub fn heap_stats(&self) -> HeapStats {
        self.lock_cpu().heap.stats()
    }

    /// Get the number of task priority levels.
    pub fn max_priorities(&self) -> usize {
        self.inner.config.num_priorities
    }

    #[inline]
    fn lock_cpu(&self) -> klock::CpuLockGuard<'_> {
        klock::lock_cpu(self)
    }

    /// An identifier of this instance, used to tell apart the task threads of
    /// different kernels.
    #[inline]
    fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}
