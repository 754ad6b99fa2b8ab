//! The task ready queue.
//!
//! Unlike a priority-aware kernel, this core has exactly one scheduling class
//! (run-to-completion basic tasks, preemptible only by Idle), so the ready
//! queue is nothing more than a FIFO: a ring buffer of task ids with one slot
//! permanently unused to tell empty apart from full.
use crate::{
    klock::CpuLockTokenRefMut,
    port::Port,
    task::TaskId,
};

/// A fixed-capacity FIFO of [`TaskId`]s. `N` is the ring's slot count; it
/// is `num_tasks` (one slot is always kept empty to tell the full ring, with
/// every non-Idle task Ready at once, apart from the empty-queue encoding).
pub struct ReadyQueue<P, const N: usize> {
    slots: [core::cell::Cell<TaskId>; N],
    head: core::cell::Cell<usize>,
    tail: core::cell::Cell<usize>,
    _port: core::marker::PhantomData<P>,
}

// Safety: every access to the cells inside goes through a `CpuLockTokenRefMut`
// borrow, so there's never concurrent unsynchronized access despite the
// `Cell`s.
unsafe impl<P, const N: usize> Sync for ReadyQueue<P, N> {}

impl<P: Port, const N: usize> ReadyQueue<P, N> {
    pub const fn new() -> Self {
        Self {
            slots: [const { core::cell::Cell::new(TaskId::new(0)) }; N],
            head: core::cell::Cell::new(0),
            tail: core::cell::Cell::new(0),
            _port: core::marker::PhantomData,
        }
    }

    /// Empty the queue, discarding any ids already in it.
    pub(crate) fn reset(&self, _lock: &mut CpuLockTokenRefMut<'_, P>) {
        self.head.set(0);
        self.tail.set(0);
    }

    pub(crate) fn is_empty(&self, _lock: &CpuLockTokenRefMut<'_, P>) -> bool {
        self.head.get() == self.tail.get()
    }

    pub(crate) fn is_full(&self, _lock: &CpuLockTokenRefMut<'_, P>) -> bool {
        (self.tail.get() + 1) % N == self.head.get()
    }

    /// Push `tid` to the back of the queue. A push into a full queue is
    /// silently dropped: activation is idempotent (a task already Ready or
    /// Running never reaches this call), so a full ring can only mean every
    /// non-Idle task is already accounted for.
    pub(crate) fn push(&self, lock: &mut CpuLockTokenRefMut<'_, P>, tid: TaskId) {
        if self.is_full(lock) {
            return;
        }
        let tail = self.tail.get();
        self.slots[tail].set(tid);
        self.tail.set((tail + 1) % N);
    }

    /// Pop the task at the front of the queue, or `None` if empty.
    pub(crate) fn pop(&self, lock: &mut CpuLockTokenRefMut<'_, P>) -> Option<TaskId> {
        if self.is_empty(lock) {
            return None;
        }
        let head = self.head.get();
        let tid = self.slots[head].get();
        self.head.set((head + 1) % N);
        Some(tid)
    }
}
