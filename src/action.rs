//! The action fired when an alarm or schedule-table expiry point matures.
use crate::{cfg::KernelObjects, klock::CpuLockTokenRefMut, task::TaskId};

/// What happens when an [`crate::alarm::AlarmCb`] or
/// [`crate::schedtable::ExpiryPoint`] matures.
///
/// Both the alarm engine and the schedule-table engine dispatch through this
/// same enum rather than each growing their own duplicate of it, since OSEK
/// gives both the same three choices of action.
#[derive(Debug, Clone, Copy)]
pub enum Action {
    /// Activate the named task (as if `ActivateTask` had been called).
    ActivateTask(TaskId),
    /// Set the given event mask on the named task.
    SetEvent(TaskId, u32),
    /// Invoke an application-supplied callback. Runs with CPU Lock held, the
    /// same ISR-like context an alarm callback runs in under OSEK, so it must
    /// be bounded and non-blocking — a contract this crate cannot enforce.
    Callback(fn()),
}

impl crate::util::Init for Action {
    const INIT: Self = Action::Callback(|| {});
}

/// Fire `action`, under the same critical section the alarm/schedule-table
/// engine is already running in.
///
/// `ActivateTask` and `SetEvent` are dispatched through the regular Task/
/// Event API (so they get the same "wake Idle" fast path and the same
/// idempotence rules as an application calling them directly); `Callback` is
/// invoked directly, with CPU Lock still held, so it must be bounded and
/// non-blocking — a contract this crate cannot enforce.
pub(crate) fn dispatch<K: KernelObjects>(lock: &mut CpuLockTokenRefMut<'_, K>, action: &Action) {
    match *action {
        Action::ActivateTask(tid) => crate::task::activate_task_locked::<K>(lock, tid),
        Action::SetEvent(tid, mask) => crate::event::set_event_locked::<K>(lock, tid, mask),
        Action::Callback(f) => f(),
    }
}
