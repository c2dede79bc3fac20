//! Kernel configuration
use std::{fmt, sync::Arc};

use kestrel_heap::Tlsf;
use parking_lot::{Condvar, Mutex};

use crate::{
    idle, state::State, task, timer, utils::PRIO_BITMAP_MAX_LEN, Kernel, KernelInner, Ticks,
};

/// The immutable part of the kernel configuration.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) num_priorities: usize,
    pub(crate) time_slicing: bool,
    pub(crate) default_stack_size: usize,
    pub(crate) tick_limit: Option<Ticks>,
}

/// Builds a [`Kernel`]. Created by [`Kernel::builder`].
///
/// # Examples
///
/// ```
/// use kestrel_kernel::Kernel;
///
/// let kernel = Kernel::builder()
///     .max_priorities(5)
///     .time_slicing(false)
///     .heap_region(16 * 1024)
///     .heap_region(4 * 1024)
///     .build();
///
/// assert_eq!(kernel.heap_stats().total_bytes, 20 * 1024);
/// ```
pub struct KernelBuilder {
    max_priorities: usize,
    time_slicing: bool,
    heap_regions: Vec<usize>,
    default_stack_size: usize,
    idle_stack_size: usize,
    timer_task_priority: Option<usize>,
    timer_queue_length: usize,
    timer_stack_size: usize,
    tick_limit: Option<Ticks>,
    idle_hook: Option<Box<dyn FnMut() + Send>>,
}

impl fmt::Debug for KernelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KernelBuilder")
            .field("max_priorities", &self.max_priorities)
            .field("time_slicing", &self.time_slicing)
            .field("heap_regions", &self.heap_regions)
            .field("default_stack_size", &self.default_stack_size)
            .field("idle_stack_size", &self.idle_stack_size)
            .field("timer_task_priority", &self.timer_task_priority)
            .field("timer_queue_length", &self.timer_queue_length)
            .field("timer_stack_size", &self.timer_stack_size)
            .field("tick_limit", &self.tick_limit)
            .field("idle_hook", &self.idle_hook.is_some())
            .finish()
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self {
            max_priorities: 8,
            time_slicing: true,
            heap_regions: Vec::new(),
            default_stack_size: 1024,
            idle_stack_size: 512,
            timer_task_priority: None,
            timer_queue_length: 10,
            timer_stack_size: 1024,
            tick_limit: None,
            idle_hook: None,
        }
    }
}

impl KernelBuilder {
    /// The default size of the heap region used when [`Self::heap_region`] is
    /// never called.
    pub const DEFAULT_HEAP_SIZE: usize = 64 * 1024;

    /// Set the number of task priority levels. Priorities range over
    /// `0..max_priorities`. Must be in range `2..=64`.
    pub fn max_priorities(mut self, x: usize) -> Self {
        self.max_priorities = x;
        self
    }

    /// Enable or disable round-robin scheduling among ready tasks of the same
    /// priority.
    pub fn time_slicing(mut self, x: bool) -> Self {
        self.time_slicing = x;
        self
    }

    /// Add a heap region of the specified size. Can be called more than once
    /// to seed the heap from multiple disjoint regions.
    pub fn heap_region(mut self, size: usize) -> Self {
        self.heap_regions.push(size);
        self
    }

    /// Set the stack size used by [`TaskBuilder`](crate::TaskBuilder)s that
    /// don't specify one.
    pub fn default_stack_size(mut self, x: usize) -> Self {
        self.default_stack_size = x;
        self
    }

    pub fn idle_stack_size(mut self, x: usize) -> Self {
        self.idle_stack_size = x;
        self
    }

    /// Set the priority of the timer service task. Defaults to the highest
    /// priority.
    pub fn timer_task_priority(mut self, x: usize) -> Self {
        self.timer_task_priority = Some(x);
        self
    }

    /// Set the capacity of the timer command queue.
    pub fn timer_queue_length(mut self, x: usize) -> Self {
        self.timer_queue_length = x;
        self
    }

    pub fn timer_stack_size(mut self, x: usize) -> Self {
        self.timer_stack_size = x;
        self
    }

    /// Stop the system with [`RunOutcome::TickLimit`] when the tick count
    /// reaches `x`.
    ///
    /// [`RunOutcome::TickLimit`]: crate::RunOutcome::TickLimit
    pub fn tick_limit(mut self, x: Ticks) -> Self {
        self.tick_limit = Some(x);
        self
    }

    /// Register a function the idle task calls on every iteration. It runs in
    /// the idle task's context and must not block.
    pub fn idle_hook(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.idle_hook = Some(Box::new(f));
        self
    }

    /// Construct the kernel, creating the idle task and the timer service.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid or the heap cannot hold the
    /// system tasks.
    pub fn build(self) -> Kernel {
        assert!(
            (2..=PRIO_BITMAP_MAX_LEN).contains(&self.max_priorities),
            "`max_priorities` must be in range `2..={PRIO_BITMAP_MAX_LEN}`"
        );
        let timer_task_priority = self.timer_task_priority.unwrap_or(self.max_priorities - 1);
        assert!(
            timer_task_priority < self.max_priorities,
            "`timer_task_priority` must be less than `max_priorities`"
        );
        assert!(
            self.timer_queue_length > 0,
            "`timer_queue_length` must not be zero"
        );

        let mut heap = Tlsf::new();
        let regions = if self.heap_regions.is_empty() {
            vec![Self::DEFAULT_HEAP_SIZE]
        } else {
            self.heap_regions
        };
        for size in regions {
            if let Err(e) = heap.add_region(size) {
                panic!("invalid heap region of size {size}: {e}");
            }
        }

        let config = Config {
            num_priorities: self.max_priorities,
            time_slicing: self.time_slicing,
            default_stack_size: self.default_stack_size,
            tick_limit: self.tick_limit,
        };

        let kernel = Kernel {
            inner: Arc::new(KernelInner {
                state: Mutex::new(State::new(self.max_priorities, heap)),
                dispatch: Condvar::new(),
                finished: Condvar::new(),
                config,
            }),
        };

        let idle_hook = self.idle_hook;
        let idle_kernel = kernel.clone();
        let idle = match task::TaskBuilder::new(&kernel, "IDLE")
            .priority(0)
            .stack_size(self.idle_stack_size)
            .spawn(move || idle::idle_main(idle_kernel, idle_hook))
        {
            Ok(task) => task,
            Err(e) => panic!("failed to create the idle task: {e}"),
        };

        if let Err(e) = timer::start_timer_service(
            &kernel,
            timer_task_priority,
            self.timer_queue_length,
            self.timer_stack_size,
        ) {
            panic!("failed to create the timer service: {e}");
        }

        kernel.lock_cpu().idle_task = Some(idle.id());

        log::debug!(
            "kernel built with {} priorities, time slicing {}",
            self.max_priorities,
            if self.time_slicing { "on" } else { "off" },
        );

        kernel
    }
}
