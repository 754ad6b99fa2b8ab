//! Task control blocks, the ready-queue-driven scheduler, and the Task API.
use log::{debug, warn};

use crate::{
    cfg::KernelObjects,
    klock::{CpuLockCell, CpuLockTokenRefMut},
    util::Init,
};

/// A task identifier. Equal to the task's index in the application's static
/// task table; the Idle task's id is whatever [`KernelObjects::IDLE_ID`]
/// names (conventionally the last slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(u8);

impl TaskId {
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Init for TaskId {
    const INIT: Self = Self(0);
}

/// A task's scheduling state. See the crate-level docs for the transition
/// diagram; the only states reachable at runtime are the four listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Dormant,
    Ready,
    Running,
    Waiting,
}

impl Init for TaskState {
    const INIT: Self = TaskState::Dormant;
}

/// The static, compile-time-declared properties of a task: its entry point,
/// the argument passed to it, and whether it's extended (permitted to call
/// [`crate::wait_event`]).
pub struct TaskAttr {
    pub entry_point: fn(usize),
    pub entry_param: usize,
    pub is_extended: bool,
}

/// *Task control block* — the mutable runtime state of a task.
pub struct TaskCb<K: KernelObjects> {
    /// Port-owned scheduling state (conventionally a saved stack pointer).
    /// The port's switch handler is the only code that touches this outside
    /// of [`initialize`](Self::initialize).
    pub(crate) port_state: CpuLockCell<K, K::TaskState>,
    pub(crate) attr: &'static TaskAttr,
    pub(crate) id: TaskId,
    pub(crate) state: CpuLockCell<K, TaskState>,
    pub(crate) set_events: CpuLockCell<K, u32>,
    pub(crate) wait_events: CpuLockCell<K, u32>,
}

impl<K: KernelObjects> TaskCb<K> {
    pub const fn new(id: TaskId, attr: &'static TaskAttr) -> Self {
        Self {
            port_state: CpuLockCell::new(K::TaskState::INIT),
            attr,
            id,
            state: CpuLockCell::new(TaskState::Dormant),
            set_events: CpuLockCell::new(0),
            wait_events: CpuLockCell::new(0),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

/// The kernel's process-wide `(current, next)` pair. Both are `CpuLockCell`s
/// because both are read and written only from within interrupt-masked
/// critical sections.
pub struct SchedulerState<K: KernelObjects> {
    pub(crate) current: CpuLockCell<K, Option<&'static TaskCb<K>>>,
    pub(crate) next: CpuLockCell<K, Option<&'static TaskCb<K>>>,
}

impl<K: KernelObjects> SchedulerState<K> {
    pub const fn new() -> Self {
        Self {
            current: CpuLockCell::new(None),
            next: CpuLockCell::new(None),
        }
    }
}

/// Look up a task's TCB by id, silently ignoring an out-of-range id.
///
/// Returns `None` for the Idle id too: Idle has no TCB of its own and is
/// represented purely as "ready queue empty, `current` points nowhere
/// schedulable".
pub(crate) fn task_cb<K: KernelObjects>(tid: TaskId) -> Option<&'static TaskCb<K>> {
    if tid.get() == K::IDLE_ID.get() {
        return None;
    }
    K::task_cb(tid)
}

/// `schedule()` — select the next task to run and, if it differs from
/// `current`, pend a context switch.
///
/// Callable from ISR or task context with CPU Lock already held by the
/// caller.
pub(crate) fn schedule<K: KernelObjects>(lock: &mut CpuLockTokenRefMut<'_, K>) {
    if K::scheduler().next.get(lock).is_some() {
        // A switch is already pending; let it run first.
        return;
    }

    let popped = K::ready_queue().pop(lock);
    let chosen = match popped {
        Some(tid) => {
            let Some(cb) = task_cb::<K>(tid) else {
                warn!("schedule: popped id {} names no task, falling back to Idle", tid.get());
                None
            };
            match cb {
                Some(cb) if cb.state.get(lock) == TaskState::Ready => Some(cb),
                Some(cb) => {
                    warn!(
                        "schedule: popped task {} was not Ready (programming error), falling back to Idle",
                        cb.id.get()
                    );
                    None
                }
                None => None,
            }
        }
        None => None,
    };

    if let Some(cb) = chosen {
        cb.state.set(lock, TaskState::Running);
    }

    K::scheduler().next.set(lock, chosen);
    // Safety: CPU Lock is held by the caller, as required by `pend_dispatch`.
    unsafe { K::pend_dispatch() };
}

/// `ActivateTask(tid)`.
pub fn activate_task<K: KernelObjects>(tid: TaskId) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    activate_task_locked::<K>(&mut lock, tid);
}

pub(crate) fn activate_task_locked<K: KernelObjects>(
    lock: &mut CpuLockTokenRefMut<'_, K>,
    tid: TaskId,
) {
    if tid.get() == K::IDLE_ID.get() {
        return;
    }
    let Some(cb) = task_cb::<K>(tid) else {
        return;
    };

    let was_dormant = match cb.state.get(lock) {
        TaskState::Dormant => true,
        TaskState::Waiting => false,
        TaskState::Ready | TaskState::Running => return,
    };

    let stack = K::task_stack(tid);
    // Safety: the task is Dormant or Waiting, so the port isn't mid-switch
    // into or out of it.
    let new_port_state =
        unsafe { K::build_initial_task_state(stack, cb.attr.entry_point, cb.attr.entry_param) };
    cb.port_state.set(lock, new_port_state);

    cb.state.set(lock, TaskState::Ready);
    // A fresh Dormant start begins with a clean event mask. A Waiting->Ready
    // wake must NOT clear `set_events` here: the caller (e.g. `SetEvent`) has
    // already OR'd in the bit that woke this task, and the task is meant to
    // observe it via `GetEvent`.
    if was_dormant {
        cb.set_events.set(lock, 0);
        cb.wait_events.set(lock, 0);
    }
    K::ready_queue().push(lock, tid);
    debug!("task {} activated", tid.get());

    let current_is_idle = K::scheduler().current.get(lock).is_none();
    if current_is_idle && K::scheduler().next.get(lock).is_none() {
        schedule::<K>(lock);
    }
}

/// `TerminateTask()`. The caller never returns from this in a real port; in
/// this crate it simply marks `current` Dormant and schedules.
pub fn terminate_task<K: KernelObjects>() {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    terminate_task_locked::<K>(&mut lock);
}

pub(crate) fn terminate_task_locked<K: KernelObjects>(lock: &mut CpuLockTokenRefMut<'_, K>) {
    if let Some(cb) = K::scheduler().current.get(lock) {
        cb.state.set(lock, TaskState::Dormant);
        debug!("task {} terminated", cb.id.get());
    }
    schedule::<K>(lock);
}

/// `ChainTask(tid)`: `ActivateTask(tid)` then `TerminateTask()`, in that
/// order, under a single critical section.
pub fn chain_task<K: KernelObjects>(tid: TaskId) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    activate_task_locked::<K>(&mut lock, tid);
    terminate_task_locked::<K>(&mut lock);
}

/// `GetTaskState(tid, &out)`. Out-of-range ids leave `out` untouched.
pub fn get_task_state<K: KernelObjects>(tid: TaskId, out: &mut TaskState) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let lock = guard.borrow_mut();
    if tid.get() == K::IDLE_ID.get() {
        *out = TaskState::Ready;
        return;
    }
    if let Some(cb) = task_cb::<K>(tid) {
        *out = cb.state.get(&lock);
    }
}
