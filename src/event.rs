//! The event subsystem.
//!
//! Events are sticky bitfields living directly on the extended task's TCB
//! (`set_events`/`wait_events`); there's no separate event-group object the
//! way a more general kernel might have one, because OSEK binds an event
//! mask one-to-one with the (extended) task that owns it.
use log::debug;

use crate::{
    cfg::KernelObjects,
    klock::CpuLockTokenRefMut,
    task::{task_cb, TaskId, TaskState},
};

/// `WaitEvent(mask)`. Called by the currently running task.
///
/// If none of the requested bits are already pending, the task blocks:
/// `wait_events` is recorded, state becomes Waiting, and — since the only
/// task that can ever be preempted into is Idle — a schedule is requested
/// if Idle happens to be current (it normally is not: a task calling
/// `WaitEvent` is by definition the one currently running).
pub fn wait_event<K: KernelObjects>(mask: u32) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();

    let Some(cb) = K::scheduler().current.get(&lock) else {
        // Idle has no events to wait on.
        return;
    };
    if !cb.attr.is_extended {
        return;
    }

    if cb.set_events.get(&lock) & mask != 0 {
        // A requested bit is already pending; return immediately without
        // blocking.
        return;
    }

    cb.wait_events.set(&mut lock, mask);
    cb.state.set(&mut lock, TaskState::Waiting);
    debug!("task {} waiting on events {:#x}", cb.id().get(), mask);

    // The task that just blocked is, tautologically, the one that was
    // current (never Idle), so unlike ActivateTask's "only if Idle is
    // running" fast path there's no condition to check here: a task that
    // stops running always needs a replacement picked, exactly as
    // TerminateTask does.
    crate::task::schedule::<K>(&mut lock);
}

/// `SetEvent(tid, mask)`: OR `mask` into `tid`'s `set_events`, and if
/// `tid` was Waiting on any now-satisfied bit, wake it.
pub fn set_event<K: KernelObjects>(tid: TaskId, mask: u32) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    set_event_locked::<K>(&mut lock, tid, mask);
}

pub(crate) fn set_event_locked<K: KernelObjects>(
    lock: &mut CpuLockTokenRefMut<'_, K>,
    tid: TaskId,
    mask: u32,
) {
    let Some(cb) = task_cb::<K>(tid) else {
        return;
    };
    if !cb.attr.is_extended {
        return;
    }

    let new_set = cb.set_events.get(lock) | mask;
    cb.set_events.set(lock, new_set);

    if cb.state.get(lock) == TaskState::Waiting && cb.wait_events.get(lock) & new_set != 0 {
        cb.wait_events.set(lock, 0);
        debug!("task {} woken by events {:#x}", tid.get(), mask);
        crate::task::activate_task_locked::<K>(lock, tid);
    }
}

/// `GetEvent(tid, &out)`. Writes through the out-parameter only; there is no
/// meaningful status return beyond that.
pub fn get_event<K: KernelObjects>(tid: TaskId, out: &mut u32) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let lock = guard.borrow_mut();
    if let Some(cb) = task_cb::<K>(tid) {
        *out = cb.set_events.get(&lock);
    }
}

/// `ClearEvent(mask)` on the currently running task.
pub fn clear_event<K: KernelObjects>(mask: u32) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    if let Some(cb) = K::scheduler().current.get(&lock) {
        let new_set = cb.set_events.get(&lock) & !mask;
        cb.set_events.set(&mut lock, new_set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskAttr, TaskCb, TaskState};
    use crate::testutil::{drain_pending_switch, dummy_stack};

    // Three tasks: Init (0, basic), an extended task (1), Idle (2). Each test
    // declares its own kernel type so parallel test threads never share the
    // static task table.
    macro_rules! three_task_kernel {
        ($name:ident) => {
            static ATTRS: [TaskAttr; 3] = [
                TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: false },
                TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: true },
                TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: false },
            ];
            static TASK_CBS: [TaskCb<$name>; 3] = [
                TaskCb::new(TaskId::new(0), &ATTRS[0]),
                TaskCb::new(TaskId::new(1), &ATTRS[1]),
                TaskCb::new(TaskId::new(2), &ATTRS[2]),
            ];
            static COUNTER_CBS: [crate::counter::CounterCb<$name>; 0] = [];
            static ALARM_CBS: [crate::alarm::AlarmCb<$name>; 0] = [];
            static SCHEDTABLE_CBS: [crate::schedtable::ScheduleTableCb<$name>; 0] = [];

            crate::build_kernel! {
                kernel $name: crate::testutil::MockPort;
                num_tasks = 3,
                idle_id = TaskId::new(2),
                init_id = TaskId::new(0),
                task_cbs = TASK_CBS,
                task_stack_fn = dummy_stack,
                tick_period_us = 1000,
                num_counters = 0,
                counter_cbs = COUNTER_CBS,
                num_alarms = 0,
                alarm_cbs = ALARM_CBS,
                num_schedule_tables = 0,
                schedtable_cbs = SCHEDTABLE_CBS,
            }
        };
    }

    #[test]
    fn wait_then_set_wakes_task() {
        three_task_kernel!(K);

        let ext = TaskId::new(1);
        // Bring `ext` up through the normal path: Idle is current by
        // default (nothing set `current` yet), so activating it pends an
        // immediate switch, which we drain to make it genuinely current.
        crate::task::activate_task::<K>(ext);
        drain_pending_switch::<K>();

        let mut state = TaskState::Dormant;
        crate::task::get_task_state::<K>(ext, &mut state);
        assert_eq!(state, TaskState::Running);

        wait_event::<K>(0x1);
        crate::task::get_task_state::<K>(ext, &mut state);
        assert_eq!(state, TaskState::Waiting);

        let mut out = 0;
        get_event::<K>(ext, &mut out);
        assert_eq!(out, 0);

        set_event::<K>(ext, 0x1);
        drain_pending_switch::<K>();

        get_event::<K>(ext, &mut out);
        assert_eq!(out, 0x1);
    }

    #[test]
    fn set_event_without_matching_wait_bit_does_not_wake() {
        three_task_kernel!(K);

        let ext = TaskId::new(1);
        crate::task::activate_task::<K>(ext);
        drain_pending_switch::<K>();

        wait_event::<K>(0x2);
        set_event::<K>(ext, 0x1);

        let mut state = TaskState::Dormant;
        crate::task::get_task_state::<K>(ext, &mut state);
        assert_eq!(state, TaskState::Waiting);
    }

    #[test]
    fn clear_event_on_current_task() {
        three_task_kernel!(K);

        let ext = TaskId::new(1);
        crate::task::activate_task::<K>(ext);
        drain_pending_switch::<K>();

        set_event::<K>(ext, 0x3);
        clear_event::<K>(0x1);

        let mut out = 0;
        get_event::<K>(ext, &mut out);
        assert_eq!(out, 0x2);
    }
}
