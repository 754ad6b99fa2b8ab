//! Static configuration: the trait the generic kernel code is bound by, and
//! the macro that wires an application's task/counter/alarm/schedule-table
//! declarations into an implementation of it.
//!
//! There's no builder object and no runtime registration step: every object
//! table is `static`, laid out once at link time. [`build_kernel!`] exists
//! only to avoid hand-writing the boilerplate that ties those statics to
//! [`KernelObjects`] — it generates no scheduling behavior of its own.
use core::mem::MaybeUninit;

use crate::{
    alarm::{AlarmCb, AlarmId},
    counter::{CounterCb, CounterId},
    klock::CpuLockTokenRefMut,
    port::Port,
    schedtable::{ScheduleTableCb, ScheduleTableId},
    task::{SchedulerState, TaskCb, TaskId},
};

/// Ready-queue operations, type-erased over the ring buffer's capacity so
/// that [`KernelObjects::ready_queue`] can return a plain reference instead
/// of threading a const generic through every signature in the crate.
pub trait ReadyQueueOps<P: Port>: Sync {
    fn reset(&self, lock: &mut CpuLockTokenRefMut<'_, P>);
    fn is_empty(&self, lock: &CpuLockTokenRefMut<'_, P>) -> bool;
    fn push(&self, lock: &mut CpuLockTokenRefMut<'_, P>, tid: TaskId);
    fn pop(&self, lock: &mut CpuLockTokenRefMut<'_, P>) -> Option<TaskId>;
}

impl<P: Port, const N: usize> ReadyQueueOps<P> for crate::readyqueue::ReadyQueue<P, N> {
    fn reset(&self, lock: &mut CpuLockTokenRefMut<'_, P>) {
        crate::readyqueue::ReadyQueue::reset(self, lock)
    }
    fn is_empty(&self, lock: &CpuLockTokenRefMut<'_, P>) -> bool {
        crate::readyqueue::ReadyQueue::is_empty(self, lock)
    }
    fn push(&self, lock: &mut CpuLockTokenRefMut<'_, P>, tid: TaskId) {
        crate::readyqueue::ReadyQueue::push(self, lock, tid)
    }
    fn pop(&self, lock: &mut CpuLockTokenRefMut<'_, P>) -> Option<TaskId> {
        crate::readyqueue::ReadyQueue::pop(self, lock)
    }
}

/// Implemented once per application by [`build_kernel!`]. Every module in
/// this crate that needs to find "the" task table, ready queue, or counter
/// table goes through this trait rather than assuming a single global.
pub trait KernelObjects: Port + Sized + Sync + 'static {
    /// Number of declared tasks, Idle included.
    const NUM_TASKS: usize;
    /// The id reserved for the Idle task (conventionally `NUM_TASKS - 1`).
    const IDLE_ID: TaskId;
    /// The id of the task `OS_Init` brings up directly as `current`, bypassing
    /// the ready queue (conventionally `0`).
    const INIT_ID: TaskId;
    const NUM_COUNTERS: usize;
    const NUM_ALARMS: usize;
    const NUM_SCHEDULE_TABLES: usize;
    /// Period, in microseconds, between ticks of counter 0. Passed to
    /// [`Port::configure_tick`] once during [`crate::os::init`].
    const TICK_PERIOD_US: u32;

    fn task_cb(tid: TaskId) -> Option<&'static TaskCb<Self>>;

    /// Return the statically allocated stack region for `tid`. Called only
    /// from within a critical section on a Dormant or Waiting task, so the
    /// exclusive `&mut` this hands out never aliases a live one.
    fn task_stack(tid: TaskId) -> &'static mut [MaybeUninit<u8>];

    fn scheduler() -> &'static SchedulerState<Self>;
    fn ready_queue() -> &'static dyn ReadyQueueOps<Self>;

    fn counter_cb(cid: CounterId) -> Option<&'static CounterCb<Self>>;
    fn alarm_cb(aid: AlarmId) -> Option<&'static AlarmCb<Self>>;
    fn schedtable_cb(sid: ScheduleTableId) -> Option<&'static ScheduleTableCb<Self>>;
}

/// Lay out an application's static task/counter/alarm/schedule-table tables
/// and implement [`KernelObjects`] over them.
///
/// ```ignore
/// build_kernel! {
///     kernel Demo: MyPort;
///     num_tasks = 3,
///     idle_id = TaskId::new(2),
///     init_id = TaskId::new(0),
///     task_cbs = TASK_CBS,
///     task_stack_fn = task_stack,
///     tick_period_us = 1000,
///     num_counters = 1,
///     counter_cbs = COUNTER_CBS,
///     num_alarms = 1,
///     alarm_cbs = ALARM_CBS,
///     num_schedule_tables = 0,
///     schedtable_cbs = SCHEDTABLE_CBS,
/// }
/// ```
///
/// This is deliberately a thin layout macro, not a builder: every field is
/// filled in from `const` values the application already wrote out, and the
/// macro's only job is emitting the `static` arrays and the trait impl that
/// points at them.
#[macro_export]
macro_rules! build_kernel {
    (
        kernel $name:ident : $port:ty;
        num_tasks = $num_tasks:expr,
        idle_id = $idle_id:expr,
        init_id = $init_id:expr,
        task_cbs = $task_cbs:expr,
        task_stack_fn = $task_stack_fn:path,
        tick_period_us = $tick_period_us:expr,
        num_counters = $num_counters:expr,
        counter_cbs = $counter_cbs:expr,
        num_alarms = $num_alarms:expr,
        alarm_cbs = $alarm_cbs:expr,
        num_schedule_tables = $num_tables:expr,
        schedtable_cbs = $schedtable_cbs:expr,
    ) => {
        pub struct $name;

        static READY_QUEUE: $crate::readyqueue::ReadyQueue<$name, { $num_tasks }> =
            $crate::readyqueue::ReadyQueue::new();
        static SCHEDULER: $crate::task::SchedulerState<$name> =
            $crate::task::SchedulerState::new();

        unsafe impl $crate::port::Port for $name {
            type TaskState = <$port as $crate::port::Port>::TaskState;
            const STACK_DEFAULT_SIZE: usize = <$port as $crate::port::Port>::STACK_DEFAULT_SIZE;
            const STACK_ALIGN: usize = <$port as $crate::port::Port>::STACK_ALIGN;

            unsafe fn configure_tick(period_us: u32) {
                unsafe { <$port as $crate::port::Port>::configure_tick(period_us) }
            }
            unsafe fn pend_dispatch() {
                unsafe { <$port as $crate::port::Port>::pend_dispatch() }
            }
            unsafe fn acquire_cpu_lock() {
                unsafe { <$port as $crate::port::Port>::acquire_cpu_lock() }
            }
            unsafe fn release_cpu_lock() {
                unsafe { <$port as $crate::port::Port>::release_cpu_lock() }
            }
            fn is_cpu_lock_active() -> bool {
                <$port as $crate::port::Port>::is_cpu_lock_active()
            }
            unsafe fn build_initial_task_state(
                stack: &'static mut [core::mem::MaybeUninit<u8>],
                entry_point: fn(usize),
                entry_param: usize,
            ) -> Self::TaskState {
                unsafe {
                    <$port as $crate::port::Port>::build_initial_task_state(
                        stack,
                        entry_point,
                        entry_param,
                    )
                }
            }
            fn idle_cpu() {
                <$port as $crate::port::Port>::idle_cpu()
            }
        }

        impl $crate::cfg::KernelObjects for $name {
            const NUM_TASKS: usize = $num_tasks;
            const IDLE_ID: $crate::task::TaskId = $idle_id;
            const INIT_ID: $crate::task::TaskId = $init_id;
            const NUM_COUNTERS: usize = $num_counters;
            const NUM_ALARMS: usize = $num_alarms;
            const NUM_SCHEDULE_TABLES: usize = $num_tables;
            const TICK_PERIOD_US: u32 = $tick_period_us;

            fn task_cb(tid: $crate::task::TaskId) -> Option<&'static $crate::task::TaskCb<Self>> {
                $task_cbs.get(tid.get() as usize)
            }
            fn task_stack(tid: $crate::task::TaskId) -> &'static mut [core::mem::MaybeUninit<u8>] {
                $task_stack_fn(tid)
            }
            fn scheduler() -> &'static $crate::task::SchedulerState<Self> {
                &SCHEDULER
            }
            fn ready_queue() -> &'static dyn $crate::cfg::ReadyQueueOps<Self> {
                &READY_QUEUE
            }
            fn counter_cb(
                cid: $crate::counter::CounterId,
            ) -> Option<&'static $crate::counter::CounterCb<Self>> {
                $counter_cbs.get(cid.get() as usize)
            }
            fn alarm_cb(
                aid: $crate::alarm::AlarmId,
            ) -> Option<&'static $crate::alarm::AlarmCb<Self>> {
                $alarm_cbs.get(aid.get() as usize)
            }
            fn schedtable_cb(
                sid: $crate::schedtable::ScheduleTableId,
            ) -> Option<&'static $crate::schedtable::ScheduleTableCb<Self>> {
                $schedtable_cbs.get(sid.get() as usize)
            }
        }
    };
}
