//! Bootstrap: `OS_Init` wires static state, `OS_Start` launches the Init
//! task, and `on_tick` is the single entry point the port's tick ISR calls
//! every period.
use log::info;

use crate::{cfg::KernelObjects, counter, klock::lock_cpu, task::TaskId, task::TaskState};

/// `OS_Init`. Call once, before interrupts are enabled and before [`start`].
///
/// Every counter, alarm, and schedule table is already in its quiescent
/// state (`current_value = 0`, inactive, Stopped) purely by virtue of how
/// [`crate::counter::CounterCb::new`] / [`crate::alarm::AlarmCb::new`] /
/// [`crate::schedtable::ScheduleTableCb::new`] initialize their `const`s;
/// there is no separate "reset the tables" step to run here. What `OS_Init`
/// does is: reset every task to Dormant except Init (which it brings up
/// directly as `current`, bypassing `ActivateTask`'s ready-queue path — it
/// sets `current` to the Init TCB directly), reset the ready queue, and
/// program the tick source.
pub fn init<K: KernelObjects>() {
    let Ok(mut guard) = lock_cpu::<K>() else {
        panic!("OS_Init: CPU Lock already active");
    };
    let mut lock = guard.borrow_mut();

    K::ready_queue().reset(&mut lock);
    K::scheduler().next.set(&mut lock, None);
    K::scheduler().current.set(&mut lock, None);

    for raw in 0..K::NUM_TASKS as u8 {
        let tid = TaskId::new(raw);
        if tid.get() == K::IDLE_ID.get() {
            continue;
        }
        let Some(cb) = K::task_cb(tid) else { continue };
        cb.state.set(&mut lock, TaskState::Dormant);
        cb.set_events.set(&mut lock, 0);
        cb.wait_events.set(&mut lock, 0);
    }

    if let Some(init_cb) = K::task_cb(K::INIT_ID) {
        let stack = K::task_stack(K::INIT_ID);
        // Safety: Init is Dormant (just reset above), so the port isn't
        // mid-switch into or out of it; this is the boot path, CPU Lock is
        // active.
        let port_state = unsafe {
            K::build_initial_task_state(stack, init_cb.attr.entry_point, init_cb.attr.entry_param)
        };
        init_cb.port_state.set(&mut lock, port_state);
        init_cb.state.set(&mut lock, TaskState::Running);
        K::scheduler().current.set(&mut lock, Some(init_cb));
        info!("OS_Init: task {} (Init) brought up as current", K::INIT_ID.get());
    }

    // Safety: boot phase, CPU Lock active, called exactly once.
    unsafe { K::configure_tick(K::TICK_PERIOD_US) };
}

/// `OS_Start`. Never returns.
///
/// The real MCU port launches Init via a software trap whose handler loads
/// `current->sp` directly; that trap mechanism is entirely the port's
/// responsibility. What this crate can model is the uniform part of the
/// contract every other transition already uses: publish a pending switch to
/// `current` and pend the port's dispatch, exactly as [`crate::task::schedule`]
/// does for every later context switch. Once the pended interrupt fires and
/// the port's dispatcher (external to this crate) observes `next`, it
/// performs the very first jump into Init's initial stack frame the same way
/// it performs every subsequent one.
pub fn start<K: KernelObjects>() -> ! {
    {
        let Ok(mut guard) = lock_cpu::<K>() else {
            panic!("OS_Start: CPU Lock already active");
        };
        let mut lock = guard.borrow_mut();
        let current = K::scheduler().current.get(&lock);
        debug_assert!(current.is_some(), "OS_Start called before OS_Init");
        K::scheduler().next.set(&mut lock, current);
        // Safety: CPU Lock is held, as required by `pend_dispatch`.
        unsafe { K::pend_dispatch() };
    }
    loop {
        K::idle_cpu();
    }
}

/// The tick ISR's single entry point: increments counter 0, runs the alarm
/// engine and the schedule-table engine bound to it (in that order), and,
/// if Idle is currently running and no switch is pending, pends one.
pub fn on_tick<K: KernelObjects>() {
    let Ok(mut guard) = lock_cpu::<K>() else {
        // A tick delivered while CPU Lock is already held by the very code
        // that's about to release it and re-enable interrupts is a port
        // bug, not something this crate can recover from; OSEK ticks are
        // never reentrant with their own handler.
        return;
    };
    let mut lock = guard.borrow_mut();

    counter::tick::<K>(&mut lock, crate::counter::CounterId::new(0));

    let current_is_idle = K::scheduler().current.get(&lock).is_none();
    if current_is_idle && K::scheduler().next.get(&lock).is_none() {
        crate::task::schedule::<K>(&mut lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alarm::{set_rel_alarm, AlarmAttr, AlarmCb},
        counter::{CounterAttr, CounterCb},
        task::{TaskAttr, TaskCb},
        testutil::{drain_pending_switch, dummy_stack},
    };

    // Tasks: Init(0), A(1), B(2), C(3), Idle(4). One counter, no alarms
    // wired by default (tests call `set_rel_alarm` themselves where needed).
    macro_rules! boot_kernel {
        ($name:ident) => {
            static TASK_ATTRS: [TaskAttr; 5] = [
                TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: false },
                TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: false },
                TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: false },
                TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: false },
                TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: false },
            ];
            static TASK_CBS: [TaskCb<$name>; 5] = [
                TaskCb::new(TaskId::new(0), &TASK_ATTRS[0]),
                TaskCb::new(TaskId::new(1), &TASK_ATTRS[1]),
                TaskCb::new(TaskId::new(2), &TASK_ATTRS[2]),
                TaskCb::new(TaskId::new(3), &TASK_ATTRS[3]),
                TaskCb::new(TaskId::new(4), &TASK_ATTRS[4]),
            ];
            static COUNTER_ATTRS: [CounterAttr; 1] = [CounterAttr {
                max_allowed_value: 1_000_000,
                ticks_per_base: 1000,
                min_cycle: 1,
            }];
            static COUNTER_CBS: [CounterCb<$name>; 1] = [CounterCb::new(&COUNTER_ATTRS[0])];
            static ALARM_ATTRS: [AlarmAttr; 1] = [AlarmAttr {
                counter: crate::counter::CounterId::new(0),
                action: crate::action::Action::ActivateTask(TaskId::new(1)),
            }];
            static ALARM_CBS: [AlarmCb<$name>; 1] = [AlarmCb::new(&ALARM_ATTRS[0])];
            static SCHEDTABLE_CBS: [crate::schedtable::ScheduleTableCb<$name>; 0] = [];

            crate::build_kernel! {
                kernel $name: crate::testutil::MockPort;
                num_tasks = 5,
                idle_id = TaskId::new(4),
                init_id = TaskId::new(0),
                task_cbs = TASK_CBS,
                task_stack_fn = dummy_stack,
                tick_period_us = 1000,
                num_counters = 1,
                counter_cbs = COUNTER_CBS,
                num_alarms = 1,
                alarm_cbs = ALARM_CBS,
                num_schedule_tables = 0,
                schedtable_cbs = SCHEDTABLE_CBS,
            }
        };
    }

    #[test]
    fn init_brings_up_init_task_as_current() {
        boot_kernel!(K);
        init::<K>();

        let mut state = TaskState::Dormant;
        crate::task::get_task_state::<K>(TaskId::new(0), &mut state);
        assert_eq!(state, TaskState::Running);
    }

    #[test]
    fn start_pends_a_switch_to_current() {
        boot_kernel!(K);
        init::<K>();
        assert!(!crate::testutil::MockPort::take_pended());

        // `start` never returns, so exercise its pre-loop effect directly
        // rather than calling it.
        {
            let mut guard = lock_cpu::<K>().unwrap();
            let mut lock = guard.borrow_mut();
            let current = K::scheduler().current.get(&lock);
            K::scheduler().next.set(&mut lock, current);
            unsafe { K::pend_dispatch() };
        }
        assert!(crate::testutil::MockPort::take_pended());
    }

    #[test]
    fn ready_queue_fifo_order_end_to_end() {
        boot_kernel!(K);
        init::<K>();
        drain_pending_switch::<K>(); // Init becomes genuinely current

        let (a, b, c) = (TaskId::new(1), TaskId::new(2), TaskId::new(3));
        crate::task::activate_task::<K>(a);
        crate::task::activate_task::<K>(b);
        crate::task::activate_task::<K>(c);
        crate::task::terminate_task::<K>(); // Init terminates
        drain_pending_switch::<K>();

        let mut state = TaskState::Dormant;
        crate::task::get_task_state::<K>(a, &mut state);
        assert_eq!(state, TaskState::Running, "A runs first (FIFO order)");

        crate::task::terminate_task::<K>();
        drain_pending_switch::<K>();
        crate::task::get_task_state::<K>(b, &mut state);
        assert_eq!(state, TaskState::Running, "then B");

        crate::task::terminate_task::<K>();
        drain_pending_switch::<K>();
        crate::task::get_task_state::<K>(c, &mut state);
        assert_eq!(state, TaskState::Running, "then C");
    }

    #[test]
    fn one_shot_alarm_end_to_end_scenario() {
        boot_kernel!(K);
        init::<K>();
        drain_pending_switch::<K>();

        set_rel_alarm::<K>(crate::alarm::AlarmId::new(0), 5, 0);
        crate::task::terminate_task::<K>(); // Init terminates -> Idle runs
        drain_pending_switch::<K>();

        let mut state = TaskState::Dormant;
        crate::task::get_task_state::<K>(TaskId::new(1), &mut state);
        assert_eq!(state, TaskState::Dormant);

        for _ in 0..4 {
            on_tick::<K>();
        }
        crate::task::get_task_state::<K>(TaskId::new(1), &mut state);
        assert_eq!(state, TaskState::Dormant, "not yet at tick 4");

        on_tick::<K>(); // tick 5: fires
        drain_pending_switch::<K>();
        crate::task::get_task_state::<K>(TaskId::new(1), &mut state);
        assert_eq!(state, TaskState::Running);
    }

    #[test]
    fn idle_preemption_by_tick_driven_set_event() {
        // Init(0, basic), B(1, extended), Idle(2); one alarm SetEvent(B, 0x1).
        static TASK_ATTRS: [TaskAttr; 3] = [
            TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: false },
            TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: true },
            TaskAttr { entry_point: |_| {}, entry_param: 0, is_extended: false },
        ];
        static TASK_CBS: [TaskCb<K>; 3] = [
            TaskCb::new(TaskId::new(0), &TASK_ATTRS[0]),
            TaskCb::new(TaskId::new(1), &TASK_ATTRS[1]),
            TaskCb::new(TaskId::new(2), &TASK_ATTRS[2]),
        ];
        static COUNTER_ATTRS: [CounterAttr; 1] = [CounterAttr {
            max_allowed_value: 1_000_000,
            ticks_per_base: 1000,
            min_cycle: 1,
        }];
        static COUNTER_CBS: [CounterCb<K>; 1] = [CounterCb::new(&COUNTER_ATTRS[0])];
        static ALARM_ATTRS: [AlarmAttr; 1] = [AlarmAttr {
            counter: crate::counter::CounterId::new(0),
            action: crate::action::Action::SetEvent(TaskId::new(1), 0x1),
        }];
        static ALARM_CBS: [AlarmCb<K>; 1] = [AlarmCb::new(&ALARM_ATTRS[0])];
        static SCHEDTABLE_CBS: [crate::schedtable::ScheduleTableCb<K>; 0] = [];

        crate::build_kernel! {
            kernel K: crate::testutil::MockPort;
            num_tasks = 3,
            idle_id = TaskId::new(2),
            init_id = TaskId::new(0),
            task_cbs = TASK_CBS,
            task_stack_fn = dummy_stack,
            tick_period_us = 1000,
            num_counters = 1,
            counter_cbs = COUNTER_CBS,
            num_alarms = 1,
            alarm_cbs = ALARM_CBS,
            num_schedule_tables = 0,
            schedtable_cbs = SCHEDTABLE_CBS,
        }

        init::<K>();

        let b = TaskId::new(1);
        crate::task::activate_task::<K>(b); // Init (current) activates B
        crate::task::terminate_task::<K>(); // Init terminates -> B runs
        drain_pending_switch::<K>();

        let mut state = TaskState::Dormant;
        crate::task::get_task_state::<K>(b, &mut state);
        assert_eq!(state, TaskState::Running);

        crate::event::wait_event::<K>(0x1); // B blocks -> Idle runs
        drain_pending_switch::<K>();
        crate::task::get_task_state::<K>(b, &mut state);
        assert_eq!(state, TaskState::Waiting);
        {
            let mut guard = lock_cpu::<K>().unwrap();
            let lock = guard.borrow_mut();
            assert!(
                K::scheduler().current.get(&lock).is_none(),
                "Idle (current == None) should now be running"
            );
        }

        set_rel_alarm::<K>(crate::alarm::AlarmId::new(0), 3, 0);
        for _ in 0..3 {
            on_tick::<K>(); // tick 3: alarm fires SetEvent(B, 0x1), waking B
        }
        // If the ISR hadn't pended a switch, `drain_pending_switch` would be
        // a no-op and the state check below would still show Waiting.
        drain_pending_switch::<K>();

        crate::task::get_task_state::<K>(b, &mut state);
        assert_eq!(state, TaskState::Running, "B runs once the pended switch completes");
        let mut out = 0;
        crate::event::get_event::<K>(b, &mut out);
        assert_eq!(out, 0x1);
    }
}
