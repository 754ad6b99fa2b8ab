//! Modulo tick counters.
//!
//! A counter is nothing more than a value that wraps at a configured modulus,
//! advanced by exactly one per tick of its driving source. Counter 0 is
//! hardwired to the port's tick source; any further counters this
//! application declares are software-chained and advanced by application
//! code calling [`tick`] directly (out of scope for the core itself, but the
//! data model doesn't special-case counter 0 beyond `on_tick` driving it).
#[cfg(feature = "trace")]
use log::trace;

use crate::{
    alarm, cfg::KernelObjects, error::BadId, klock::CpuLockTokenRefMut, schedtable, util::Init,
};

/// A counter identifier; equal to the counter's index in the application's
/// static counter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterId(u8);

impl CounterId {
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Init for CounterId {
    const INIT: Self = Self(0);
}

/// The static, compile-time-declared properties of a counter.
pub struct CounterAttr {
    /// The counter wraps back to 0 when it would otherwise reach this value.
    /// `current_value < max_allowed_value` always holds.
    pub max_allowed_value: u32,
    /// Ticks per "tick source base", used by [`ms_to_ticks`] to convert a
    /// millisecond delay into a tick count. For counter 0 this is the OS
    /// tick frequency in Hz.
    pub ticks_per_base: u32,
    /// The smallest cycle value [`crate::alarm::set_rel_alarm`] /
    /// [`crate::alarm::set_abs_alarm`] will arm a cyclic alarm with; a
    /// smaller request is clamped up to this (the OSEK `OSMINCYCLE`
    /// convention — see DESIGN.md).
    pub min_cycle: u32,
}

impl Init for CounterAttr {
    const INIT: Self = Self {
        max_allowed_value: 1,
        ticks_per_base: 1,
        min_cycle: 1,
    };
}

/// *Counter control block* — the mutable runtime state of a counter.
pub struct CounterCb<K: KernelObjects> {
    pub(crate) attr: &'static CounterAttr,
    pub(crate) current_value: crate::klock::CpuLockCell<K, u32>,
}

impl<K: KernelObjects> CounterCb<K> {
    pub const fn new(attr: &'static CounterAttr) -> Self {
        Self {
            attr,
            current_value: crate::klock::CpuLockCell::new(0),
        }
    }
}

pub(crate) fn counter_cb<K: KernelObjects>(cid: CounterId) -> crate::error::Result<&'static CounterCb<K>> {
    K::counter_cb(cid).ok_or(BadId)
}

/// Convert a millisecond delay to a tick count on `attr`'s counter: rounds
/// up, clamps to a minimum of 1 tick for a strictly positive input, and
/// reduces modulo `max_allowed_value`. Deliberately preserves the behavior of
/// silently collapsing long delays on a small-modulus counter rather than
/// saturating or rejecting them (see DESIGN.md).
pub(crate) fn ms_to_ticks(attr: &CounterAttr, delay_ms: u32) -> u32 {
    if delay_ms == 0 {
        return 0;
    }
    let numerator = delay_ms as u64 * attr.ticks_per_base as u64;
    let ticks = numerator.div_ceil(1000).max(1);
    (ticks % attr.max_allowed_value as u64) as u32
}

/// Reduce a requested cyclic reload value modulo the counter's modulus, then
/// clamp it up to [`CounterAttr::min_cycle`] if it's nonzero and below it.
pub(crate) fn clamp_cycle(attr: &CounterAttr, cycle_ticks: u32) -> u32 {
    if cycle_ticks == 0 {
        return 0;
    }
    cycle_ticks.max(attr.min_cycle)
}

/// Advance counter `cid` by one tick, then run the alarm engine and the
/// schedule-table engine bound to it, in that order. Called by
/// [`crate::os::on_tick`] for counter 0; may also be called by application
/// code driving a software-chained counter.
pub(crate) fn tick<K: KernelObjects>(lock: &mut CpuLockTokenRefMut<'_, K>, cid: CounterId) {
    let Ok(cb) = counter_cb::<K>(cid) else {
        return;
    };

    let max = cb.attr.max_allowed_value.max(1);
    let new_value = (cb.current_value.get(lock) + 1) % max;
    cb.current_value.set(lock, new_value);
    #[cfg(feature = "trace")]
    trace!("counter {} advanced to {}", cid.get(), new_value);

    alarm::tick_alarms::<K>(lock, cid, new_value, max);
    schedtable::tick_schedtables::<K>(lock, cid, new_value, max);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_ticks_rounds_up_and_floors_to_one() {
        let attr = CounterAttr {
            max_allowed_value: 1000,
            ticks_per_base: 1000, // 1 tick == 1 ms
            min_cycle: 1,
        };
        assert_eq!(ms_to_ticks(&attr, 0), 0);
        assert_eq!(ms_to_ticks(&attr, 1), 1);
        assert_eq!(ms_to_ticks(&attr, 5), 5);

        let coarse = CounterAttr {
            max_allowed_value: 1000,
            ticks_per_base: 100, // 1 tick == 10 ms
            min_cycle: 1,
        };
        assert_eq!(ms_to_ticks(&coarse, 1), 1); // rounds up, not down to 0
        assert_eq!(ms_to_ticks(&coarse, 10), 1);
        assert_eq!(ms_to_ticks(&coarse, 11), 2);
    }

    #[test]
    fn ms_to_ticks_wraps_on_small_modulus() {
        let attr = CounterAttr {
            max_allowed_value: 10,
            ticks_per_base: 1000,
            min_cycle: 1,
        };
        // 15000ms would be 15000 ticks, collapsed mod 10 -> 0.
        assert_eq!(ms_to_ticks(&attr, 15000), 0);
    }

    #[test]
    fn clamp_cycle_respects_min() {
        let attr = CounterAttr {
            max_allowed_value: 1000,
            ticks_per_base: 1,
            min_cycle: 5,
        };
        assert_eq!(clamp_cycle(&attr, 0), 0);
        assert_eq!(clamp_cycle(&attr, 3), 5);
        assert_eq!(clamp_cycle(&attr, 7), 7);
    }
}
