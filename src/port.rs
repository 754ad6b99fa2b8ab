//! The port interface.
//!
//! A port is the piece of target-specific glue code that sits underneath
//! this crate: it owns the tick source, the dispatcher that actually swaps
//! stacks, and the CPU's interrupt mask. Everything above this trait is
//! written against the five operations below and knows nothing about any
//! particular MCU or host environment.
//!
//! # Safety
//!
//! Implementing this trait is inherently unsafe: a bad implementation (an
//! interrupt mask that doesn't actually mask interrupts, a stack that isn't
//! aligned, a pended switch that never fires) can corrupt the kernel's
//! internal state in ways no amount of safe code above it can detect.
//!
//! These methods are only meant to be called by the kernel core, never by
//! application code directly.
pub unsafe trait Port {
    /// Per-task, port-owned scheduling state (typically a saved stack
    /// pointer). Opaque to everything above this trait.
    type TaskState: Send + Sync + crate::util::Init + 'static;

    /// Default stack size, in bytes, used when a task's static configuration
    /// doesn't specify one.
    const STACK_DEFAULT_SIZE: usize = 1024;

    /// Required alignment for a task's stack region.
    const STACK_ALIGN: usize = core::mem::size_of::<usize>();

    /// Program the periodic tick source so that it fires [`crate::on_tick`]
    /// once per system tick. Called exactly once, during [`crate::init`].
    ///
    /// Precondition: boot phase, CPU Lock active.
    unsafe fn configure_tick(period_us: u32);

    /// Request a deferred context switch: arrange for the lowest-priority
    /// exception handler in the system to run and dispatch whichever task is
    /// now current once every higher-priority handler currently on the stack
    /// has returned.
    ///
    /// Calling this when a switch is already pending is a no-op. Calling it
    /// from the task that's already current is harmless; the scheduler
    /// filters out no-op switches before this is ever reached.
    ///
    /// Precondition: CPU Lock active.
    unsafe fn pend_dispatch();

    /// Raise the CPU's interrupt mask to the level that excludes all
    /// kernel-managed interrupt sources, and return a token proving it's
    /// raised. This is the kernel's only critical-section primitive; there
    /// is no separate fine-grained locking.
    ///
    /// Nesting is the caller's responsibility: the kernel's lock helper
    /// never calls this while a lock is already held.
    unsafe fn acquire_cpu_lock();

    /// Undo a previous [`acquire_cpu_lock`](Self::acquire_cpu_lock), restoring
    /// whatever mask level was active before it.
    ///
    /// Precondition: CPU Lock active.
    unsafe fn release_cpu_lock();

    /// Return whether CPU Lock is currently active. [`crate::klock::lock_cpu`]
    /// checks this before acquiring, since OSEK critical sections never nest;
    /// a few `debug_assert!`s elsewhere also rely on it.
    fn is_cpu_lock_active() -> bool;

    /// Build the initial saved state for a task so that, the next time it's
    /// dispatched, it begins execution at `entry_point(entry_param)` on a
    /// fresh stack carved out of `stack`.
    ///
    /// Called on every Dormant/Waiting → Ready transition, so a task that
    /// terminates and is reactivated gets a clean stack each time.
    ///
    /// Precondition: CPU Lock active.
    unsafe fn build_initial_task_state(
        stack: &'static mut [core::mem::MaybeUninit<u8>],
        entry_point: fn(usize),
        entry_param: usize,
    ) -> Self::TaskState;

    /// Put the CPU into a low-power wait state until the next interrupt.
    /// Called by the kernel only when the ready queue is empty and no task
    /// is current; must return as soon as an interrupt becomes pending so
    /// the kernel can re-evaluate the ready queue.
    fn idle_cpu();
}
