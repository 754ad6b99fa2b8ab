//! A host-only mock [`Port`] used by unit tests throughout the crate.
//!
//! Satisfies the five-operation `Port` trait without driving a real
//! dispatcher. CPU Lock is modeled with a plain `Cell<bool>` since tests are
//! single-threaded.
#![cfg(test)]

use core::cell::Cell;
use core::mem::MaybeUninit;

use crate::port::Port;
use crate::util::Init;

pub(crate) struct MockPort;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MockTaskState {
    pub entry_point: Option<fn(usize)>,
    pub entry_param: usize,
}

impl Init for MockTaskState {
    const INIT: Self = Self {
        entry_point: None,
        entry_param: 0,
    };
}

// Safety: tests are single-threaded; there is never real concurrent access.
unsafe impl Send for MockTaskState {}
unsafe impl Sync for MockTaskState {}

std::thread_local! {
    static CPU_LOCK: Cell<bool> = const { Cell::new(false) };
    static PENDED: Cell<bool> = const { Cell::new(false) };
    static TICK_PERIOD_US: Cell<u32> = const { Cell::new(0) };
}

unsafe impl Port for MockPort {
    type TaskState = MockTaskState;

    unsafe fn configure_tick(period_us: u32) {
        TICK_PERIOD_US.with(|c| c.set(period_us));
    }

    unsafe fn pend_dispatch() {
        PENDED.with(|c| c.set(true));
    }

    unsafe fn acquire_cpu_lock() {
        assert!(!CPU_LOCK.with(|c| c.get()), "CPU Lock acquired while already active");
        CPU_LOCK.with(|c| c.set(true));
    }

    unsafe fn release_cpu_lock() {
        CPU_LOCK.with(|c| c.set(false));
    }

    fn is_cpu_lock_active() -> bool {
        CPU_LOCK.with(|c| c.get())
    }

    unsafe fn build_initial_task_state(
        _stack: &'static mut [MaybeUninit<u8>],
        entry_point: fn(usize),
        entry_param: usize,
    ) -> Self::TaskState {
        MockTaskState {
            entry_point: Some(entry_point),
            entry_param,
        }
    }

    fn idle_cpu() {}
}

impl MockPort {
    /// Clear and return whether a context switch was pended since the last
    /// call.
    pub(crate) fn take_pended() -> bool {
        PENDED.with(|c| c.replace(false))
    }
}

/// A single shared scratch stack region handed out to every task in every
/// test. Sound because [`MockPort::build_initial_task_state`] never reads
/// the stack's contents and never retains the slice past the call that
/// builds it, and tests are single-threaded with respect to any one kernel
/// instance (each integration test declares its own kernel type via
/// [`crate::build_kernel!`], so distinct tests never share this buffer's
/// backing statics either).
pub(crate) fn dummy_stack(_tid: crate::task::TaskId) -> &'static mut [MaybeUninit<u8>] {
    static mut STACK: [MaybeUninit<u8>; 256] = [MaybeUninit::uninit(); 256];
    // Safety: see above; no two live references are ever held concurrently.
    unsafe { &mut *core::ptr::addr_of_mut!(STACK) }
}

/// Simulate the port's dispatcher completing a pended context switch: moves
/// `next` into `current` unconditionally, including the "switch to Idle"
/// case where `next` is `None` (Idle has no TCB of its own, so its target
/// value and "no switch pending" share the same `None` representation —
/// gate on whether [`MockPort::pend_dispatch`] actually fired instead of on
/// `next`'s value). Stands in for the real MCU port's assembly trampoline,
/// which is what would actually perform this on real hardware once the
/// pended low-priority interrupt runs.
pub(crate) fn drain_pending_switch<K: crate::cfg::KernelObjects>() {
    if !MockPort::take_pended() {
        return;
    }
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    let next = K::scheduler().next.get(&lock);
    K::scheduler().current.set(&mut lock, next);
    K::scheduler().next.set(&mut lock, None);
}
