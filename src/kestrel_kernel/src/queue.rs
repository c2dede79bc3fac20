//! Queues
//!
//! A queue stores fixed-size items by copy in a ring buffer allocated from the
//! kernel heap. The item type of [`Queue`] is restricted to [`Pod`] types,
//! which can be copied in and out as plain bytes.
//!
//! Items are handed over directly when possible: a sender gives its item to a
//! blocked receiver (and copies to blocked peekers), and a receiver that frees
//! a slot moves a blocked sender's item into it. Either way, the woken task
//! finds the operation already done.
use bytemuck::Pod;
use kestrel_heap::Allocation;
use std::{fmt, marker::PhantomData, mem};

use crate::{
    error::{
        CreateQueueError, DeleteQueueError, NoAccessError, OverwriteError, QueryQueueError,
        ReceiveError, SendError, TryReceiveError, TrySendError,
    },
    interrupt::IsrContext,
    queue_set::{self, SetMember},
    state::{self, State},
    task,
    utils::Id,
    wait::{self, WaitObject, WaitPayload, WaitQueue},
    Kernel, Ticks, Timeout,
};

/// Where [`Queue::send_to_back`] and [`Queue::send_to_front`] put the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendPosition {
    Back,
    Front,
}

/// *Queue control block*
pub(crate) struct QueueCb {
    /// `None` if the storage is empty (zero-sized items).
    storage: Option<Allocation>,
    item_size: usize,
    length: usize,
    /// The slot of the front item.
    head: usize,
    count: usize,
    /// Tasks waiting for free space
    pub(crate) send_waiters: WaitQueue,
    /// Tasks waiting for an item
    pub(crate) recv_waiters: WaitQueue,
    /// The queue set this queue belongs to.
    pub(crate) set: Option<Id>,
}

impl fmt::Debug for QueueCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("QueueCb")
            .field("item_size", &self.item_size)
            .field("length", &self.length)
            .field("head", &self.head)
            .field("count", &self.count)
            .field("send_waiters", &self.send_waiters)
            .field("recv_waiters", &self.recv_waiters)
            .field("set", &self.set)
            .finish()
    }
}

impl QueueCb {
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }
}

fn queue_cb(state: &mut State, id: Id) -> Result<&mut QueueCb, NoAccessError> {
    state.queues.get_mut(id).ok_or(NoAccessError::NoAccess)
}

/// Get the control block and the storage of a queue.
fn split_storage(state: &mut State, queue: Id) -> (&mut QueueCb, &mut [u8]) {
    let State { heap, queues, .. } = state;
    let queue_cb = &mut queues[queue];
    let storage = match &queue_cb.storage {
        Some(allocation) => {
            let len = queue_cb.item_size * queue_cb.length;
            &mut heap.bytes_mut(allocation)[..len]
        }
        None => &mut [][..],
    };
    (queue_cb, storage)
}

/// Store `item`. The queue must have a free slot.
fn store_item(state: &mut State, queue: Id, item: &[u8], position: SendPosition) {
    let (queue_cb, storage) = split_storage(state, queue);
    debug_assert!(queue_cb.count < queue_cb.length);
    debug_assert_eq!(item.len(), queue_cb.item_size);

    let slot = match position {
        SendPosition::Back => (queue_cb.head + queue_cb.count) % queue_cb.length,
        SendPosition::Front => {
            queue_cb.head = (queue_cb.head + queue_cb.length - 1) % queue_cb.length;
            queue_cb.head
        }
    };
    let size = queue_cb.item_size;
    storage[slot * size..][..size].copy_from_slice(item);
    queue_cb.count += 1;
}

/// Copy the front item to `out`, removing it unless `peek` is set. The queue
/// must not be empty.
fn load_item(state: &mut State, queue: Id, out: &mut [u8], peek: bool) {
    let (queue_cb, storage) = split_storage(state, queue);
    debug_assert!(queue_cb.count > 0);

    let size = queue_cb.item_size;
    out.copy_from_slice(&storage[queue_cb.head * size..][..size]);
    if !peek {
        queue_cb.head = (queue_cb.head + 1) % queue_cb.length;
        queue_cb.count -= 1;
    }
}

/// Tell the queue set (if any) that an item was added to `queue`.
fn notify_set(state: &mut State, queue: Id) {
    if let Some(set) = state.queues[queue].set {
        queue_set::post(state, set, SetMember::queue(queue));
    }
}

/// Deliver `item` without blocking. Returns `false` if the queue is full.
fn send_core(state: &mut State, queue: Id, item: &[u8], position: SendPosition) -> bool {
    // Blocked receivers imply an empty queue. Peekers get a copy, and the
    // first receiver takes the item.
    while let Some(waiter) = state.queues[queue].recv_waiters.first() {
        let WaitPayload::QueueReceive { peek, item: slot } = wait::payload_mut(state, waiter) else {
            unreachable!("receiver without a receive payload");
        };
        let peek = *peek;
        *slot = Some(item.into());
        wait::complete_wait(state, waiter, Ok(()));
        if !peek {
            return true;
        }
    }

    let queue_cb = &state.queues[queue];
    if queue_cb.count == queue_cb.length {
        return false;
    }
    store_item(state, queue, item, position);
    notify_set(state, queue);
    true
}

/// Move the items of blocked senders into free slots.
fn admit_blocked_senders(state: &mut State, queue: Id) {
    loop {
        let queue_cb = &state.queues[queue];
        if queue_cb.count == queue_cb.length {
            return;
        }
        let Some(sender) = queue_cb.send_waiters.first() else {
            return;
        };
        let WaitPayload::QueueSend { item, position } =
            mem::replace(wait::payload_mut(state, sender), WaitPayload::None)
        else {
            unreachable!("sender without a send payload");
        };
        store_item(state, queue, &item, position);
        wait::complete_wait(state, sender, Ok(()));
        notify_set(state, queue);
    }
}

/// Take (or peek) an item without blocking. Returns `false` if the queue is
/// empty.
fn receive_core(state: &mut State, queue: Id, out: &mut [u8], peek: bool) -> bool {
    if state.queues[queue].is_empty() {
        return false;
    }
    load_item(state, queue, out, peek);
    if !peek {
        admit_blocked_senders(state, queue);
    }
    true
}

pub(crate) fn create(
    kernel: &Kernel,
    length: usize,
    item_size: usize,
) -> Result<Id, CreateQueueError> {
    if length == 0 {
        return Err(CreateQueueError::BadParam);
    }
    let bytes = length
        .checked_mul(item_size)
        .ok_or(CreateQueueError::OutOfMemory)?;

    let mut lock = kernel.lock_cpu();
    let storage = if bytes == 0 {
        None
    } else {
        Some(lock.heap.allocate(bytes).ok_or_else(|| {
            log::warn!("no memory for a queue of {length} x {item_size} bytes");
            CreateQueueError::OutOfMemory
        })?)
    };

    let id = lock.queues.insert(QueueCb {
        storage,
        item_size,
        length,
        head: 0,
        count: 0,
        send_waiters: WaitQueue::default(),
        recv_waiters: WaitQueue::default(),
        set: None,
    });
    log::debug!("created queue {id:?} ({length} x {item_size} bytes)");
    Ok(id)
}

pub(crate) fn send(
    kernel: &Kernel,
    queue: Id,
    item: &[u8],
    position: SendPosition,
    timeout: Timeout,
) -> Result<(), SendError> {
    let mut lock = kernel.lock_cpu();
    state::check_blocking_call(&lock, timeout);
    queue_cb(&mut lock, queue)?;

    if send_core(&mut lock, queue, item, position) {
        task::unlock_cpu_and_check_preemption(lock);
        return Ok(());
    }

    if timeout.is_no_wait() {
        return Err(SendError::Timeout);
    }
    let task = state::expect_waitable_context(&lock)?;

    // The receiver that frees a slot stores the item for us
    let (result, _) = wait::wait_until_woken_up(
        &mut lock,
        task,
        WaitObject::QueueSend(queue),
        WaitPayload::QueueSend {
            item: item.into(),
            position,
        },
        timeout,
    );
    Ok(result?)
}

pub(crate) fn send_from_isr(
    cx: &mut IsrContext<'_>,
    kernel: &Kernel,
    queue: Id,
    item: &[u8],
    position: SendPosition,
) -> Result<(), TrySendError> {
    cx.check_kernel(kernel);
    let mut lock = kernel.lock_cpu();
    queue_cb(&mut lock, queue)?;
    let sent = send_core(&mut lock, queue, item, position);
    cx.check_woken(&lock);
    if sent {
        Ok(())
    } else {
        Err(TrySendError::Timeout)
    }
}

pub(crate) fn receive(
    kernel: &Kernel,
    queue: Id,
    out: &mut [u8],
    peek: bool,
    timeout: Timeout,
) -> Result<(), ReceiveError> {
    let mut lock = kernel.lock_cpu();
    state::check_blocking_call(&lock, timeout);
    queue_cb(&mut lock, queue)?;

    if receive_core(&mut lock, queue, out, peek) {
        task::unlock_cpu_and_check_preemption(lock);
        return Ok(());
    }

    if timeout.is_no_wait() {
        return Err(ReceiveError::Timeout);
    }
    let task = state::expect_waitable_context(&lock)?;

    let (result, payload) = wait::wait_until_woken_up(
        &mut lock,
        task,
        WaitObject::QueueReceive(queue),
        WaitPayload::QueueReceive { peek, item: None },
        timeout,
    );
    result?;

    match payload {
        WaitPayload::QueueReceive {
            item: Some(item), ..
        } => out.copy_from_slice(&item),
        _ => unreachable!("receiver woken up without an item"),
    }
    Ok(())
}

pub(crate) fn receive_from_isr(
    cx: &mut IsrContext<'_>,
    kernel: &Kernel,
    queue: Id,
    out: &mut [u8],
) -> Result<(), TryReceiveError> {
    cx.check_kernel(kernel);
    let mut lock = kernel.lock_cpu();
    queue_cb(&mut lock, queue)?;
    let received = receive_core(&mut lock, queue, out, false);
    cx.check_woken(&lock);
    if received {
        Ok(())
    } else {
        Err(TryReceiveError::Timeout)
    }
}

/// Replace the item of a length-1 queue, or store it if the queue is empty.
fn overwrite_core(state: &mut State, queue: Id, item: &[u8]) -> Result<(), OverwriteError> {
    let queue_cb = queue_cb(state, queue)?;
    if queue_cb.length != 1 {
        return Err(OverwriteError::BadParam);
    }
    if queue_cb.count == 1 {
        let (_, storage) = split_storage(state, queue);
        storage.copy_from_slice(item);
    } else {
        let sent = send_core(state, queue, item, SendPosition::Back);
        debug_assert!(sent);
    }
    Ok(())
}

/// `make_item` is given the tick count at the time of the overwrite.
pub(crate) fn overwrite<I: AsRef<[u8]>>(
    kernel: &Kernel,
    queue: Id,
    make_item: impl FnOnce(Ticks) -> I,
) -> Result<(), OverwriteError> {
    let mut lock = kernel.lock_cpu();
    let item = make_item(lock.tick);
    overwrite_core(&mut lock, queue, item.as_ref())?;
    task::unlock_cpu_and_check_preemption(lock);
    Ok(())
}

pub(crate) fn overwrite_from_isr<I: AsRef<[u8]>>(
    cx: &mut IsrContext<'_>,
    kernel: &Kernel,
    queue: Id,
    make_item: impl FnOnce(Ticks) -> I,
) -> Result<(), OverwriteError> {
    cx.check_kernel(kernel);
    let mut lock = kernel.lock_cpu();
    let item = make_item(lock.tick);
    overwrite_core(&mut lock, queue, item.as_ref())?;
    cx.check_woken(&lock);
    Ok(())
}

fn reset(kernel: &Kernel, queue: Id) -> Result<(), QueryQueueError> {
    let mut lock = kernel.lock_cpu();
    let queue_cb = queue_cb(&mut lock, queue)?;
    queue_cb.head = 0;
    queue_cb.count = 0;
    let set = queue_cb.set;
    log::trace!("queue {queue:?}: reset");

    if let Some(set) = set {
        queue_set::forget(&mut lock, set, SetMember::queue(queue));
    }
    admit_blocked_senders(&mut lock, queue);

    task::unlock_cpu_and_check_preemption(lock);
    Ok(())
}

fn delete(kernel: &Kernel, queue: Id) -> Result<(), DeleteQueueError> {
    let mut lock = kernel.lock_cpu();
    let queue_cb = queue_cb(&mut lock, queue)?;
    if !queue_cb.send_waiters.is_empty() || !queue_cb.recv_waiters.is_empty() {
        return Err(DeleteQueueError::BadObjectState);
    }
    if queue_cb.set.is_some() {
        return Err(DeleteQueueError::BadObjectState);
    }

    let queue_cb = lock.queues.remove(queue);
    if let Some(storage) = queue_cb.and_then(|cb| cb.storage) {
        lock.heap.free(storage);
    }
    log::debug!("deleted queue {queue:?}");
    Ok(())
}

fn messages_waiting(kernel: &Kernel, queue: Id) -> Result<usize, QueryQueueError> {
    let mut lock = kernel.lock_cpu();
    Ok(queue_cb(&mut lock, queue)?.count)
}

fn spaces_available(kernel: &Kernel, queue: Id) -> Result<usize, QueryQueueError> {
    let mut lock = kernel.lock_cpu();
    let queue_cb = queue_cb(&mut lock, queue)?;
    Ok(queue_cb.length - queue_cb.count)
}

/// A bounded FIFO queue of `T`.
///
/// Items are copied in and out. A blocked sender or receiver is woken up in
/// the order of priority, and in FIFO order among tasks of the same priority.
///
/// Non-blocking calls (with [`Timeout::NO_WAIT`]) can also be made from an
/// interrupt handler, but the `*_from_isr` methods should be preferred there.
pub struct Queue<T> {
    kernel: Kernel,
    id: Id,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            id: self.id,
            _phantom: PhantomData,
        }
    }
}

impl<T> PartialEq for Queue<T> {
    fn eq(&self, other: &Self) -> bool {
        self.kernel == other.kernel && self.id == other.id
    }
}

impl<T> Eq for Queue<T> {}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Queue").field(&self.id).finish()
    }
}

impl<T: Pod> Queue<T> {
    /// Create a queue that can hold `length` items. The storage is allocated
    /// from the kernel heap.
    pub fn new(kernel: &Kernel, length: usize) -> Result<Self, CreateQueueError> {
        let id = create(kernel, length, mem::size_of::<T>())?;
        Ok(Self {
            kernel: kernel.clone(),
            id,
            _phantom: PhantomData,
        })
    }

    /// Append `item`, waiting for at most `timeout` for free space.
    pub fn send_to_back(&self, item: T, timeout: Timeout) -> Result<(), SendError> {
        send(
            &self.kernel,
            self.id,
            bytemuck::bytes_of(&item),
            SendPosition::Back,
            timeout,
        )
    }

    /// Prepend `item`, waiting for at most `timeout` for free space. The item
    /// is received before the ones already in the queue.
    pub fn send_to_front(&self, item: T, timeout: Timeout) -> Result<(), SendError> {
        send(
            &self.kernel,
            self.id,
            bytemuck::bytes_of(&item),
            SendPosition::Front,
            timeout,
        )
    }

    /// Remove the front item, waiting for at most `timeout` for one to
    /// arrive.
    pub fn receive(&self, timeout: Timeout) -> Result<T, ReceiveError> {
        let mut item = T::zeroed();
        receive(
            &self.kernel,
            self.id,
            bytemuck::bytes_of_mut(&mut item),
            false,
            timeout,
        )?;
        Ok(item)
    }

    /// Get a copy of the front item without removing it.
    pub fn peek(&self, timeout: Timeout) -> Result<T, ReceiveError> {
        let mut item = T::zeroed();
        receive(
            &self.kernel,
            self.id,
            bytemuck::bytes_of_mut(&mut item),
            true,
            timeout,
        )?;
        Ok(item)
    }

    /// Replace the item of a queue of length 1. Never blocks.
    pub fn overwrite(&self, item: T) -> Result<(), OverwriteError> {
        overwrite(&self.kernel, self.id, |_| bytemuck::bytes_of(&item))
    }

    pub fn send_to_back_from_isr(
        &self,
        cx: &mut IsrContext<'_>,
        item: T,
    ) -> Result<(), TrySendError> {
        send_from_isr(
            cx,
            &self.kernel,
            self.id,
            bytemuck::bytes_of(&item),
            SendPosition::Back,
        )
    }

    pub fn send_to_front_from_isr(
        &self,
        cx: &mut IsrContext<'_>,
        item: T,
    ) -> Result<(), TrySendError> {
        send_from_isr(
            cx,
            &self.kernel,
            self.id,
            bytemuck::bytes_of(&item),
            SendPosition::Front,
        )
    }

    pub fn overwrite_from_isr(
        &self,
        cx: &mut IsrContext<'_>,
        item: T,
    ) -> Result<(), OverwriteError> {
        overwrite_from_isr(cx, &self.kernel, self.id, |_| bytemuck::bytes_of(&item))
    }

    pub fn receive_from_isr(&self, cx: &mut IsrContext<'_>) -> Result<T, TryReceiveError> {
        let mut item = T::zeroed();
        receive_from_isr(cx, &self.kernel, self.id, bytemuck::bytes_of_mut(&mut item))?;
        Ok(item)
    }
}

impl<T> Queue<T> {
    /// Get the number of stored items.
    pub fn messages_waiting(&self) -> Result<usize, QueryQueueError> {
        messages_waiting(&self.kernel, self.id)
    }

    /// Get the number of free slots.
    pub fn spaces_available(&self) -> Result<usize, QueryQueueError> {
        spaces_available(&self.kernel, self.id)
    }

    /// Discard all items. Blocked senders are let into the free space.
    pub fn reset(&self) -> Result<(), QueryQueueError> {
        reset(&self.kernel, self.id)
    }

    /// Delete the queue and return its storage to the kernel heap.
    ///
    /// Fails with `BadObjectState` if any task is blocked on the queue or the
    /// queue belongs to a queue set.
    pub fn delete(&self) -> Result<(), DeleteQueueError> {
        delete(&self.kernel, self.id)
    }

    /// Get the identity of this queue as a member of a [`QueueSet`].
    ///
    /// [`QueueSet`]: crate::QueueSet
    pub fn as_set_member(&self) -> SetMember {
        SetMember::queue(self.id)
    }
}

impl<T> From<&Queue<T>> for SetMember {
    fn from(queue: &Queue<T>) -> Self {
        queue.as_set_member()
    }
}

/// A value read from a [`Mailbox`], with the tick count at which it was
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stamped<T> {
    pub tick: Ticks,
    pub value: T,
}

const STAMP_SIZE: usize = mem::size_of::<Ticks>();

/// A single-slot queue holding the latest value written.
///
/// Writers never block; a write replaces the previous value. Readers peek, so
/// every reader sees the value until it's replaced.
pub struct Mailbox<T> {
    kernel: Kernel,
    id: Id,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            id: self.id,
            _phantom: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Mailbox").field(&self.id).finish()
    }
}

impl<T: Pod> Mailbox<T> {
    const RECORD_SIZE: usize = STAMP_SIZE + mem::size_of::<T>();

    pub fn new(kernel: &Kernel) -> Result<Self, CreateQueueError> {
        let id = create(kernel, 1, Self::RECORD_SIZE)?;
        Ok(Self {
            kernel: kernel.clone(),
            id,
            _phantom: PhantomData,
        })
    }

    fn encode(tick: Ticks, value: &T) -> Vec<u8> {
        let mut record = Vec::with_capacity(Self::RECORD_SIZE);
        record.extend_from_slice(&tick.to_le_bytes());
        record.extend_from_slice(bytemuck::bytes_of(value));
        record
    }

    fn decode(record: &[u8]) -> Stamped<T> {
        let (stamp, value) = record.split_at(STAMP_SIZE);
        let mut tick = [0; STAMP_SIZE];
        tick.copy_from_slice(stamp);
        Stamped {
            tick: Ticks::from_le_bytes(tick),
            value: bytemuck::pod_read_unaligned(value),
        }
    }

    /// Replace the value, stamping it with the current tick count.
    pub fn write(&self, value: T) -> Result<(), OverwriteError> {
        overwrite(&self.kernel, self.id, |tick| Self::encode(tick, &value))
    }

    pub fn write_from_isr(&self, cx: &mut IsrContext<'_>, value: T) -> Result<(), OverwriteError> {
        overwrite_from_isr(cx, &self.kernel, self.id, |tick| Self::encode(tick, &value))
    }

    /// Read the value without removing it, waiting for at most `timeout` if
    /// nothing has been written yet.
    pub fn read(&self, timeout: Timeout) -> Result<Stamped<T>, ReceiveError> {
        let mut record = vec![0; Self::RECORD_SIZE];
        receive(&self.kernel, self.id, &mut record, true, timeout)?;
        Ok(Self::decode(&record))
    }
}
