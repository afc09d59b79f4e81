//! Bounded event queues for `no_std` environments.
//!
//! A multi-producer queue built on `critical-section` and `heapless::Deque`.
//! It is safe to enqueue from interrupt context while the cooperative
//! scheduler drains it.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;

/// Error returned when trying to send to a full channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrySendError<T>(pub T);

/// Error returned when trying to receive from an empty channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryReceiveError;

/// Signal that a data item accepted a new value.
///
/// Queues carry the change signal only. Whoever drains the queue reads the
/// item's value at drain time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeEvent {
    /// Change count of the item right after the accepted write.
    pub change_count: u32,
}

impl ChangeEvent {
    pub const fn new(change_count: u32) -> Self {
        Self { change_count }
    }
}

/// Queue handle consumed by data items and the serial link.
///
/// Capacity and overflow behaviour belong to the implementor.
pub trait EventQueue {
    /// Number of events waiting to be dequeued
    fn count_waiting(&self) -> usize;

    /// Maximum number of events the queue can hold
    fn capacity(&self) -> usize;

    /// Enqueue an event without blocking
    fn try_enqueue(&self, event: ChangeEvent) -> Result<(), TrySendError<ChangeEvent>>;

    /// Dequeue the oldest event without blocking
    fn try_dequeue(&self) -> Option<ChangeEvent>;

    /// Drop every waiting event, returning how many were drained
    fn drain(&self) -> usize {
        let mut drained = 0;
        while self.try_dequeue().is_some() {
            drained += 1;
        }
        drained
    }
}

/// A bounded, interrupt-safe channel backed by a fixed-size `heapless::Deque`.
pub struct Channel<T, const SIZE: usize> {
    inner: Mutex<RefCell<Deque<T, SIZE>>>,
}

impl<T, const SIZE: usize> Channel<T, SIZE> {
    /// Create a new empty channel.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Try to send a value into the channel.
    ///
    /// Returns `Err(TrySendError(value))` if the channel is full.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        critical_section::with(|cs| {
            let mut queue = self.inner.borrow(cs).borrow_mut();
            queue.push_back(value).map_err(TrySendError)
        })
    }

    /// Try to receive a value from the channel.
    ///
    /// Returns `Err(TryReceiveError)` if the channel is empty.
    pub fn try_receive(&self) -> Result<T, TryReceiveError> {
        critical_section::with(|cs| {
            let mut queue = self.inner.borrow(cs).borrow_mut();
            queue.pop_front().ok_or(TryReceiveError)
        })
    }

    /// Number of queued values.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, const SIZE: usize> Default for Channel<T, SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> EventQueue for Channel<ChangeEvent, SIZE> {
    fn count_waiting(&self) -> usize {
        self.len()
    }

    fn capacity(&self) -> usize {
        SIZE
    }

    fn try_enqueue(&self, event: ChangeEvent) -> Result<(), TrySendError<ChangeEvent>> {
        self.try_send(event)
    }

    fn try_dequeue(&self) -> Option<ChangeEvent> {
        self.try_receive().ok()
    }
}

/// Queue of change events with a fixed depth.
pub type EventChannel<const DEPTH: usize> = Channel<ChangeEvent, DEPTH>;
