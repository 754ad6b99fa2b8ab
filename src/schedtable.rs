//! The schedule-table engine: cyclic/finite tables of ordered expiry points
//! on a counter, with modulo-wrapped catch-up semantics.
#[cfg(feature = "trace")]
use log::trace;
use log::{debug, warn};

use crate::{
    action::{self, Action},
    cfg::KernelObjects,
    counter::{self, CounterId},
    error::BadId,
    klock::{CpuLockCell, CpuLockTokenRefMut},
    util::{diff_wrap, Init},
};

/// A schedule-table identifier; equal to the table's index in the
/// application's static schedule-table table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTableId(u8);

impl ScheduleTableId {
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Init for ScheduleTableId {
    const INIT: Self = Self(0);
}

/// A single offset-triggered action within a schedule table.
#[derive(Clone, Copy)]
pub struct ExpiryPoint {
    /// `0 <= offset < duration`.
    pub offset: u32,
    pub action: Action,
}

/// The static, compile-time-declared properties of a schedule table.
///
/// `eps` MUST be sorted by strictly increasing `offset`; this is a
/// precondition of the firing loop ([`advance`]), not something this crate
/// checks at runtime (it's compile-time application data, not user input).
pub struct ScheduleTableAttr {
    pub counter: CounterId,
    pub duration: u32,
    pub cyclic: bool,
    pub eps: &'static [ExpiryPoint],
}

impl Init for ScheduleTableAttr {
    const INIT: Self = Self {
        counter: CounterId::INIT,
        duration: 1,
        cyclic: false,
        eps: &[],
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScheduleTableState {
    Stopped,
    WaitingStart,
    Running,
}

impl Init for ScheduleTableState {
    const INIT: Self = ScheduleTableState::Stopped;
}

/// *Schedule-table control block* — the mutable runtime state of a schedule
/// table.
pub struct ScheduleTableCb<K: KernelObjects> {
    pub(crate) attr: &'static ScheduleTableAttr,
    pub(crate) state: CpuLockCell<K, ScheduleTableState>,
    pub(crate) start: CpuLockCell<K, u32>,
    pub(crate) current_ep: CpuLockCell<K, u16>,
}

impl<K: KernelObjects> ScheduleTableCb<K> {
    pub const fn new(attr: &'static ScheduleTableAttr) -> Self {
        Self {
            attr,
            state: CpuLockCell::new(ScheduleTableState::Stopped),
            start: CpuLockCell::new(0),
            current_ep: CpuLockCell::new(0),
        }
    }
}

fn schedtable_cb<K: KernelObjects>(
    sid: ScheduleTableId,
) -> crate::error::Result<&'static ScheduleTableCb<K>> {
    K::schedtable_cb(sid).ok_or(BadId)
}

/// `StartScheduleTableRel(sid, offset)`. `offset` is in the bound counter's
/// own tick units (already converted by the caller, same as `SetAbsAlarm`'s
/// `abs` parameter).
pub fn start_rel<K: KernelObjects>(sid: ScheduleTableId, offset: u32) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    let Ok(cb) = schedtable_cb::<K>(sid) else {
        return;
    };
    let Ok(counter_cb) = counter::counter_cb::<K>(cb.attr.counter) else {
        return;
    };
    if cb.state.get(&lock) != ScheduleTableState::Stopped {
        return; // wrong state to start from: silently ignored
    }

    let max = counter_cb.attr.max_allowed_value.max(1);
    let current = counter_cb.current_value.get(&lock);
    let start = (current + offset % max) % max;
    begin(&mut lock, cb, start, current, max);
}

/// `StartScheduleTableAbs(sid, start)`.
pub fn start_abs<K: KernelObjects>(sid: ScheduleTableId, start_value: u32) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    let Ok(cb) = schedtable_cb::<K>(sid) else {
        return;
    };
    let Ok(counter_cb) = counter::counter_cb::<K>(cb.attr.counter) else {
        return;
    };
    if cb.state.get(&lock) != ScheduleTableState::Stopped {
        return;
    }

    let max = counter_cb.attr.max_allowed_value.max(1);
    let current = counter_cb.current_value.get(&lock);
    begin(&mut lock, cb, start_value % max, current, max);
}

fn begin<K: KernelObjects>(
    lock: &mut CpuLockTokenRefMut<'_, K>,
    cb: &'static ScheduleTableCb<K>,
    start: u32,
    current: u32,
    max: u32,
) {
    cb.start.set(lock, start);
    cb.current_ep.set(lock, 0);
    cb.state.set(lock, ScheduleTableState::WaitingStart);
    debug!("schedule table started, origin={}", start);
    // Evaluate immediately so a `start` already in the past doesn't get
    // stuck in WaitingStart until the next tick.
    advance(lock, cb, current, max);
}

/// `StopScheduleTable(sid)`.
pub fn stop<K: KernelObjects>(sid: ScheduleTableId) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    let Ok(cb) = schedtable_cb::<K>(sid) else {
        return;
    };
    cb.state.set(&mut lock, ScheduleTableState::Stopped);
    debug!("schedule table stopped");
}

/// `SyncScheduleTable(sid, new_offset)`: re-origin the table's `start` and
/// return to WaitingStart from either WaitingStart or Running.
pub fn sync<K: KernelObjects>(sid: ScheduleTableId, new_offset: u32) {
    let Ok(mut guard) = crate::klock::lock_cpu::<K>() else {
        return;
    };
    let mut lock = guard.borrow_mut();
    let Ok(cb) = schedtable_cb::<K>(sid) else {
        return;
    };
    let Ok(counter_cb) = counter::counter_cb::<K>(cb.attr.counter) else {
        return;
    };
    match cb.state.get(&lock) {
        ScheduleTableState::Stopped => return,
        ScheduleTableState::WaitingStart | ScheduleTableState::Running => {}
    }

    let max = counter_cb.attr.max_allowed_value.max(1);
    let current = counter_cb.current_value.get(&lock);
    let start = (current + new_offset % max) % max;
    cb.start.set(&mut lock, start);
    cb.current_ep.set(&mut lock, 0);
    cb.state.set(&mut lock, ScheduleTableState::WaitingStart);
    debug!("schedule table resynced, new origin={}", start);
    advance(&mut lock, cb, current, max);
}

/// The firing loop, including the one-shot catch-up re-evaluation after a
/// cyclic period rolls over. Bounded to two passes: a single catch-up jump
/// can only ever need one re-evaluation, because `periods_skipped` already
/// folds in every full period that elapsed.
fn advance<K: KernelObjects>(
    lock: &mut CpuLockTokenRefMut<'_, K>,
    cb: &'static ScheduleTableCb<K>,
    current: u32,
    max: u32,
) {
    let duration = cb.attr.duration.max(1);

    for _pass in 0..2 {
        if cb.state.get(lock) == ScheduleTableState::Stopped {
            return;
        }

        let elapsed = diff_wrap(current, cb.start.get(lock), max);

        if cb.state.get(lock) == ScheduleTableState::WaitingStart && elapsed < duration {
            cb.state.set(lock, ScheduleTableState::Running);
        }

        if cb.state.get(lock) == ScheduleTableState::Running {
            let eps = cb.attr.eps;
            let mut ep_idx = cb.current_ep.get(lock) as usize;
            while ep_idx < eps.len() && eps[ep_idx].offset <= elapsed {
                #[cfg(feature = "trace")]
                trace!("schedule table EP {} fired at elapsed={}", ep_idx, elapsed);
                action::dispatch::<K>(lock, &eps[ep_idx].action);
                ep_idx += 1;
            }
            cb.current_ep.set(lock, ep_idx as u16);
        }

        if elapsed >= duration {
            if cb.attr.cyclic {
                let periods_skipped = elapsed / duration;
                let new_start = (cb.start.get(lock) + periods_skipped * duration) % max;
                cb.start.set(lock, new_start);
                cb.current_ep.set(lock, 0);
                cb.state.set(lock, ScheduleTableState::WaitingStart);
                // Loop again to catch up expiry points within the new
                // period.
                continue;
            } else {
                cb.state.set(lock, ScheduleTableState::Stopped);
                debug!("schedule table finished (non-cyclic)");
                return;
            }
        }

        return;
    }

    warn!("schedule table advance exhausted its catch-up budget (programming error: duration may be 0)");
}

/// Run the schedule-table engine for the tick that just advanced `cid` to
/// `new_value`. Runs after the alarm engine.
pub(crate) fn tick_schedtables<K: KernelObjects>(
    lock: &mut CpuLockTokenRefMut<'_, K>,
    cid: CounterId,
    new_value: u32,
    max: u32,
) {
    for raw in 0..K::NUM_SCHEDULE_TABLES as u8 {
        let sid = ScheduleTableId::new(raw);
        let Some(cb) = K::schedtable_cb(sid) else { continue };
        if cb.attr.counter.get() != cid.get() {
            continue;
        }
        if cb.state.get(lock) == ScheduleTableState::Stopped {
            continue;
        }
        advance::<K>(lock, cb, new_value, max);
    }
}
