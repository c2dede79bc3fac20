//! Error types
//!
//! Every fallible kernel service returns a dedicated error enum whose variants
//! are a subset of [`ResultCode`]. The discriminants are shared, so converting
//! to [`ResultCode`] is free. Usage errors that leave the kernel in an
//! undefined state (e.g., blocking in an interrupt handler) are not reported
//! through these types; they panic.
use std::fmt;

use crate::EventBits;

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use kestrel_kernel::ResultCode;
            /// assert_eq!(ResultCode::BadObjectState.as_str(), "BadObjectState");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Display for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that kernel services can report.
    ///
    /// The error codes follow their closest equivalents in μITRON4.0.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// A parameter is invalid in a way that is no covered by any other error
        /// codes.
        BadParam = -17,
        /// The specified object handle is stale. The object was deleted.
        NoAccess = -18,
        /// The current context disallows the operation.
        BadContext = -25,
        /// The caller does not own the resource.
        NotOwner = -29,
        /// Resource deadlock would occur.
        WouldDeadlock = -30,
        /// The kernel heap could not supply the memory for a new object.
        OutOfMemory = -33,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// An operation or an object couldn't be enqueued because there are too
        /// many of such things that already have been enqueued.
        QueueOverflow = -43,
        /// The wait operation was interrupted by [`TaskHandle::abort_wait`].
        ///
        /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
        Interrupted = -49,
        /// The operation timed out.
        Timeout = -50,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

impl std::error::Error for ResultCode {}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Debug::fmt(&ResultCode::from(*self), f)
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(&ResultCode::from(*self), f)
            }
        }

        impl std::error::Error for $name {}

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                match x {
                    $( $name::$vname => Self::$vname, )*
                }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname as i8,
                        $name::$vname as i8,
                    );
                    assert_eq!(ResultCode::$vname, ResultCode::from($name::$vname));
                )*
            }
        }
    };
}

/// Define an internal error type that is a subset of one or more public error
/// types and can be converted to them with `?`.
macro_rules! define_suberror {
    (
        $( #[doc $( $doc:tt )*] )*
        $( #[into( $Supererror:path )] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[repr(i8)]
        #[derive(PartialEq, Eq, Copy, Clone)]
        $vis enum $Name {
            $( $Variant = ResultCode::$Variant as _ ),*
        }

        impl fmt::Debug for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Debug::fmt(&ResultCode::from(*self), f)
            }
        }

        define_suberror! {
            @into
            #[into(ResultCode)]
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    (
        @into
        #[into( $Supererror0:path )]
        $( #[into( $Supererror:path )] )*
        enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        impl From<$Name> for $Supererror0 {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }

        define_suberror! {
            @into
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    ( @into enum $($_:tt)* ) => {};
}

// Task management
// ---------------------------------------------------------------------------

define_error! {
    mod create_task_error {}
    /// Error type for [`TaskBuilder::spawn`].
    ///
    /// [`TaskBuilder::spawn`]: crate::TaskBuilder::spawn
    pub enum CreateTaskError {
        /// The priority is out of range.
        BadParam,
        /// The kernel heap could not hold the task's stack.
        OutOfMemory,
        /// The kernel has already shut down.
        BadContext,
    }
}

define_error! {
    mod get_current_task_error {}
    /// Error type for [`Kernel::current_task`].
    ///
    /// [`Kernel::current_task`]: crate::Kernel::current_task
    pub enum GetCurrentTaskError {
        /// The current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod get_task_priority_error {}
    /// Error type for [`TaskHandle::priority`] and
    /// [`TaskHandle::effective_priority`].
    ///
    /// [`TaskHandle::priority`]: crate::TaskHandle::priority
    /// [`TaskHandle::effective_priority`]: crate::TaskHandle::effective_priority
    pub enum GetTaskPriorityError {
        /// The task was deleted.
        NoAccess,
    }
}

define_error! {
    mod set_task_priority_error {}
    /// Error type for [`TaskHandle::set_priority`].
    ///
    /// [`TaskHandle::set_priority`]: crate::TaskHandle::set_priority
    pub enum SetTaskPriorityError {
        /// The task was deleted.
        NoAccess,
        /// The current context is an interrupt context.
        BadContext,
        /// The priority is out of range.
        BadParam,
    }
}

define_error! {
    mod suspend_task_error {}
    /// Error type for [`TaskHandle::suspend`].
    ///
    /// [`TaskHandle::suspend`]: crate::TaskHandle::suspend
    pub enum SuspendTaskError {
        /// The task was deleted.
        NoAccess,
        /// The current context is an interrupt context.
        BadContext,
        /// The task is the idle task or the timer service task.
        BadObjectState,
    }
}

define_error! {
    mod resume_task_error {}
    /// Error type for [`TaskHandle::resume`].
    ///
    /// [`TaskHandle::resume`]: crate::TaskHandle::resume
    pub enum ResumeTaskError {
        /// The task was deleted.
        NoAccess,
        /// The current context is an interrupt context.
        BadContext,
        /// The task is not suspended.
        BadObjectState,
    }
}

define_error! {
    mod delete_task_error {}
    /// Error type for [`TaskHandle::delete`].
    ///
    /// [`TaskHandle::delete`]: crate::TaskHandle::delete
    pub enum DeleteTaskError {
        /// The task was already deleted.
        NoAccess,
        /// The current context is an interrupt context.
        BadContext,
        /// The task is the idle task or the timer service task.
        BadObjectState,
    }
}

define_error! {
    mod interrupt_task_error {}
    /// Error type for [`TaskHandle::abort_wait`].
    ///
    /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
    pub enum InterruptTaskError {
        /// The task was deleted.
        NoAccess,
        /// The task is not in the Waiting state.
        BadObjectState,
    }
}

define_error! {
    mod exit_task_error {}
    /// Error type for [`Kernel::exit_task`].
    ///
    /// [`Kernel::exit_task`]: crate::Kernel::exit_task
    pub enum ExitTaskError {
        /// The current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod delay_error {}
    /// Error type for [`Kernel::delay`], [`Kernel::delay_until`],
    /// [`Kernel::yield_now`], and [`Kernel::busy_wait`].
    ///
    /// [`Kernel::delay`]: crate::Kernel::delay
    /// [`Kernel::delay_until`]: crate::Kernel::delay_until
    /// [`Kernel::yield_now`]: crate::Kernel::yield_now
    /// [`Kernel::busy_wait`]: crate::Kernel::busy_wait
    pub enum DelayError {
        /// The current context is not a task context.
        BadContext,
        /// The delay was cut short by [`TaskHandle::abort_wait`].
        ///
        /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
        Interrupted,
    }
}

// Queues
// ---------------------------------------------------------------------------

define_error! {
    mod create_queue_error {}
    /// Error type for [`Queue::new`] and friends.
    ///
    /// [`Queue::new`]: crate::Queue::new
    pub enum CreateQueueError {
        /// The length is zero.
        BadParam,
        /// The kernel heap could not hold the queue storage.
        OutOfMemory,
    }
}

define_error! {
    mod send_error {}
    /// Error type for [`Queue::send_to_back`] and [`Queue::send_to_front`].
    ///
    /// [`Queue::send_to_back`]: crate::Queue::send_to_back
    /// [`Queue::send_to_front`]: crate::Queue::send_to_front
    pub enum SendError {
        /// The queue was deleted.
        NoAccess,
        /// The queue is full and the current context cannot block.
        BadContext,
        /// The queue stayed full until the timeout.
        Timeout,
        /// The wait was interrupted by [`TaskHandle::abort_wait`].
        ///
        /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
        Interrupted,
    }
}

define_error! {
    mod receive_error {}
    /// Error type for [`Queue::receive`], [`Queue::peek`], and
    /// [`QueueSet::select`].
    ///
    /// [`Queue::receive`]: crate::Queue::receive
    /// [`Queue::peek`]: crate::Queue::peek
    /// [`QueueSet::select`]: crate::QueueSet::select
    pub enum ReceiveError {
        /// The object was deleted.
        NoAccess,
        /// The object is empty and the current context cannot block.
        BadContext,
        /// The object stayed empty until the timeout.
        Timeout,
        /// The wait was interrupted by [`TaskHandle::abort_wait`].
        ///
        /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
        Interrupted,
    }
}

define_error! {
    mod try_send_error {}
    /// Error type for the non-blocking queue operations usable in an
    /// interrupt handler.
    pub enum TrySendError {
        /// The queue was deleted.
        NoAccess,
        /// The queue is full.
        Timeout,
    }
}

define_error! {
    mod try_receive_error {}
    /// Error type for [`Queue::receive_from_isr`].
    ///
    /// [`Queue::receive_from_isr`]: crate::Queue::receive_from_isr
    pub enum TryReceiveError {
        /// The queue was deleted.
        NoAccess,
        /// The queue is empty.
        Timeout,
    }
}

define_error! {
    mod overwrite_error {}
    /// Error type for [`Queue::overwrite`].
    ///
    /// [`Queue::overwrite`]: crate::Queue::overwrite
    pub enum OverwriteError {
        /// The queue was deleted.
        NoAccess,
        /// The queue's length is not one.
        BadParam,
    }
}

define_error! {
    mod query_queue_error {}
    /// Error type for [`Queue::messages_waiting`], [`Queue::reset`], and
    /// other queries and control operations.
    ///
    /// [`Queue::messages_waiting`]: crate::Queue::messages_waiting
    /// [`Queue::reset`]: crate::Queue::reset
    pub enum QueryQueueError {
        /// The queue was deleted.
        NoAccess,
    }
}

define_error! {
    mod delete_queue_error {}
    /// Error type for [`Queue::delete`].
    ///
    /// [`Queue::delete`]: crate::Queue::delete
    pub enum DeleteQueueError {
        /// The queue was already deleted.
        NoAccess,
        /// Tasks are blocked on the queue, or the queue belongs to a queue set.
        BadObjectState,
    }
}

define_error! {
    mod create_queue_set_error {}
    /// Error type for [`QueueSet::new`].
    ///
    /// [`QueueSet::new`]: crate::QueueSet::new
    pub enum CreateQueueSetError {
        /// The capacity is zero.
        BadParam,
    }
}

define_error! {
    mod queue_set_member_error {}
    /// Error type for [`QueueSet::add`] and [`QueueSet::remove`].
    ///
    /// [`QueueSet::add`]: crate::QueueSet::add
    /// [`QueueSet::remove`]: crate::QueueSet::remove
    pub enum QueueSetMemberError {
        /// The set or the member was deleted.
        NoAccess,
        /// On addition, the member is not empty or already belongs to a set.
        /// On removal, the member is not empty or does not belong to this set.
        BadObjectState,
    }
}

// Semaphores and mutexes
// ---------------------------------------------------------------------------

define_error! {
    mod create_semaphore_error {}
    /// Error type for [`Semaphore::new_counting`].
    ///
    /// [`Semaphore::new_counting`]: crate::Semaphore::new_counting
    pub enum CreateSemaphoreError {
        /// The maximum count is zero, or the initial count exceeds it.
        BadParam,
    }
}

define_error! {
    mod take_semaphore_error {}
    /// Error type for [`Semaphore::take`].
    ///
    /// [`Semaphore::take`]: crate::Semaphore::take
    pub enum TakeSemaphoreError {
        /// The semaphore was deleted.
        NoAccess,
        /// The count is zero and the current context cannot block.
        BadContext,
        /// The count stayed zero until the timeout.
        Timeout,
        /// The wait was interrupted by [`TaskHandle::abort_wait`].
        ///
        /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
        Interrupted,
    }
}

define_error! {
    mod try_take_semaphore_error {}
    /// Error type for [`Semaphore::take_from_isr`].
    ///
    /// [`Semaphore::take_from_isr`]: crate::Semaphore::take_from_isr
    pub enum TryTakeSemaphoreError {
        /// The semaphore was deleted.
        NoAccess,
        /// The count is zero.
        Timeout,
    }
}

define_error! {
    mod give_semaphore_error {}
    /// Error type for [`Semaphore::give`].
    ///
    /// [`Semaphore::give`]: crate::Semaphore::give
    pub enum GiveSemaphoreError {
        /// The semaphore was deleted.
        NoAccess,
        /// The count is already at its maximum.
        QueueOverflow,
    }
}

define_error! {
    mod query_semaphore_error {}
    /// Error type for [`Semaphore::count`].
    ///
    /// [`Semaphore::count`]: crate::Semaphore::count
    pub enum QuerySemaphoreError {
        /// The semaphore was deleted.
        NoAccess,
    }
}

define_error! {
    mod lock_mutex_error {}
    /// Error type for [`Mutex::lock`] and [`RecursiveMutex::lock`].
    ///
    /// [`Mutex::lock`]: crate::Mutex::lock
    /// [`RecursiveMutex::lock`]: crate::RecursiveMutex::lock
    pub enum LockMutexError {
        /// The mutex was deleted.
        NoAccess,
        /// The current context is not a task context, or the mutex is held
        /// and the current context cannot block.
        BadContext,
        /// The mutex stayed held by another task until the timeout.
        Timeout,
        /// The wait was interrupted by [`TaskHandle::abort_wait`].
        ///
        /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
        Interrupted,
        /// The calling task already owns the (non-recursive) mutex.
        WouldDeadlock,
    }
}

define_error! {
    mod unlock_mutex_error {}
    /// Error type for [`Mutex::unlock`] and [`RecursiveMutex::unlock`].
    ///
    /// [`Mutex::unlock`]: crate::Mutex::unlock
    /// [`RecursiveMutex::unlock`]: crate::RecursiveMutex::unlock
    pub enum UnlockMutexError {
        /// The mutex was deleted.
        NoAccess,
        /// The current context is not a task context.
        BadContext,
        /// The calling task does not own the mutex.
        NotOwner,
    }
}

define_error! {
    mod query_mutex_error {}
    /// Error type for [`Mutex::owner`] and [`Mutex::is_locked`].
    ///
    /// [`Mutex::owner`]: crate::Mutex::owner
    /// [`Mutex::is_locked`]: crate::Mutex::is_locked
    pub enum QueryMutexError {
        /// The mutex was deleted.
        NoAccess,
    }
}

// Event groups
// ---------------------------------------------------------------------------

define_error! {
    mod update_event_group_error {}
    /// Error type for [`EventGroup::set_bits`], [`EventGroup::clear_bits`],
    /// and [`EventGroup::bits`].
    ///
    /// [`EventGroup::set_bits`]: crate::EventGroup::set_bits
    /// [`EventGroup::clear_bits`]: crate::EventGroup::clear_bits
    /// [`EventGroup::bits`]: crate::EventGroup::bits
    pub enum UpdateEventGroupError {
        /// The event group was deleted.
        NoAccess,
    }
}

/// Error type for [`EventGroup::wait_bits`] and [`EventGroup::sync`].
///
/// Unlike most error types, [`Self::Timeout`] carries a payload: the event
/// group's value at the moment the wait timed out.
///
/// [`EventGroup::wait_bits`]: crate::EventGroup::wait_bits
/// [`EventGroup::sync`]: crate::EventGroup::sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitEventGroupError {
    /// The event group was deleted.
    NoAccess,
    /// The condition is not met and the current context cannot block.
    BadContext,
    /// The wait mask is empty.
    BadParam,
    /// The wait was interrupted by [`TaskHandle::abort_wait`].
    ///
    /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
    Interrupted,
    /// The condition was not met before the timeout. Carries the value of the
    /// event group at that moment.
    Timeout(EventBits),
}

impl From<WaitEventGroupError> for ResultCode {
    #[inline]
    fn from(x: WaitEventGroupError) -> Self {
        match x {
            WaitEventGroupError::NoAccess => Self::NoAccess,
            WaitEventGroupError::BadContext => Self::BadContext,
            WaitEventGroupError::BadParam => Self::BadParam,
            WaitEventGroupError::Interrupted => Self::Interrupted,
            WaitEventGroupError::Timeout(_) => Self::Timeout,
        }
    }
}

impl fmt::Display for WaitEventGroupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Timeout(bits) => write!(f, "Timeout (bits = {bits:#x})"),
            _ => fmt::Display::fmt(&ResultCode::from(*self), f),
        }
    }
}

impl std::error::Error for WaitEventGroupError {}

// Task notifications
// ---------------------------------------------------------------------------

define_error! {
    mod notify_error {}
    /// Error type for [`TaskHandle::notify`] and friends.
    ///
    /// [`TaskHandle::notify`]: crate::TaskHandle::notify
    pub enum NotifyError {
        /// The task was deleted.
        NoAccess,
        /// [`NotifyAction::SetIfNoPending`] was requested but the task already
        /// has a pending notification.
        ///
        /// [`NotifyAction::SetIfNoPending`]: crate::NotifyAction::SetIfNoPending
        QueueOverflow,
    }
}

define_error! {
    mod wait_notification_error {}
    /// Error type for [`Kernel::notify_take`] and [`Kernel::notify_wait`].
    ///
    /// [`Kernel::notify_take`]: crate::Kernel::notify_take
    /// [`Kernel::notify_wait`]: crate::Kernel::notify_wait
    pub enum WaitNotificationError {
        /// The current context is not a task context.
        BadContext,
        /// No notification arrived before the timeout.
        Timeout,
        /// The wait was interrupted by [`TaskHandle::abort_wait`].
        ///
        /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
        Interrupted,
    }
}

// Software timers
// ---------------------------------------------------------------------------

define_error! {
    mod create_timer_error {}
    /// Error type for [`Timer::new`].
    ///
    /// [`Timer::new`]: crate::Timer::new
    pub enum CreateTimerError {
        /// The period is zero.
        BadParam,
    }
}

define_error! {
    mod timer_command_error {}
    /// Error type for the timer commands such as [`Timer::start`].
    ///
    /// [`Timer::start`]: crate::Timer::start
    pub enum TimerCommandError {
        /// The timer was deleted.
        NoAccess,
        /// The command queue is full and the current context cannot block.
        BadContext,
        /// The new period is zero.
        BadParam,
        /// The command queue stayed full until the timeout.
        Timeout,
        /// The wait was interrupted by [`TaskHandle::abort_wait`].
        ///
        /// [`TaskHandle::abort_wait`]: crate::TaskHandle::abort_wait
        Interrupted,
    }
}

define_error! {
    mod try_timer_command_error {}
    /// Error type for the timer commands usable in an interrupt handler.
    pub enum TryTimerCommandError {
        /// The timer was deleted.
        NoAccess,
        /// The new period is zero.
        BadParam,
        /// The command queue is full.
        Timeout,
    }
}

define_error! {
    mod query_timer_error {}
    /// Error type for [`Timer::is_active`] and other timer queries.
    ///
    /// [`Timer::is_active`]: crate::Timer::is_active
    pub enum QueryTimerError {
        /// The timer was deleted.
        NoAccess,
    }
}

// Internal error types
// ---------------------------------------------------------------------------

define_suberror! {
    /// `NoAccess`
    #[into(GetTaskPriorityError)]
    #[into(SetTaskPriorityError)]
    #[into(SuspendTaskError)]
    #[into(ResumeTaskError)]
    #[into(DeleteTaskError)]
    #[into(InterruptTaskError)]
    #[into(SendError)]
    #[into(ReceiveError)]
    #[into(TrySendError)]
    #[into(TryReceiveError)]
    #[into(OverwriteError)]
    #[into(QueryQueueError)]
    #[into(DeleteQueueError)]
    #[into(QueueSetMemberError)]
    #[into(TakeSemaphoreError)]
    #[into(TryTakeSemaphoreError)]
    #[into(GiveSemaphoreError)]
    #[into(QuerySemaphoreError)]
    #[into(LockMutexError)]
    #[into(UnlockMutexError)]
    #[into(QueryMutexError)]
    #[into(UpdateEventGroupError)]
    #[into(WaitEventGroupError)]
    #[into(NotifyError)]
    #[into(TimerCommandError)]
    #[into(TryTimerCommandError)]
    #[into(QueryTimerError)]
    pub(crate) enum NoAccessError {
        NoAccess,
    }
}

define_suberror! {
    /// `BadContext`
    #[into(CreateTaskError)]
    #[into(GetCurrentTaskError)]
    #[into(SetTaskPriorityError)]
    #[into(SuspendTaskError)]
    #[into(ResumeTaskError)]
    #[into(DeleteTaskError)]
    #[into(ExitTaskError)]
    #[into(DelayError)]
    #[into(SendError)]
    #[into(ReceiveError)]
    #[into(TakeSemaphoreError)]
    #[into(LockMutexError)]
    #[into(UnlockMutexError)]
    #[into(WaitEventGroupError)]
    #[into(WaitNotificationError)]
    #[into(TimerCommandError)]
    pub(crate) enum BadContextError {
        BadContext,
    }
}

define_suberror! {
    /// The outcome of a wait that did not complete.
    #[into(SendError)]
    #[into(ReceiveError)]
    #[into(TakeSemaphoreError)]
    #[into(LockMutexError)]
    #[into(WaitNotificationError)]
    #[into(TimerCommandError)]
    pub(crate) enum WaitTimeoutError {
        Interrupted,
        Timeout,
    }
}

impl From<SendError> for TimerCommandError {
    #[inline]
    fn from(x: SendError) -> Self {
        match x {
            SendError::NoAccess => Self::NoAccess,
            SendError::BadContext => Self::BadContext,
            SendError::Timeout => Self::Timeout,
            SendError::Interrupted => Self::Interrupted,
        }
    }
}

impl From<TrySendError> for TryTimerCommandError {
    #[inline]
    fn from(x: TrySendError) -> Self {
        match x {
            TrySendError::NoAccess => Self::NoAccess,
            TrySendError::Timeout => Self::Timeout,
        }
    }
}
