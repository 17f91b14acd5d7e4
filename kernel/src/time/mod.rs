//! Timekeeping framework.
//!
//! Hardware timer drivers plug into three consumers:
//! - [`clockevents`]: programmable interrupt sources that drive the tick.
//! - [`clocksource`]: free-running counters used for timekeeping.
//! - [`sched_clock`]: the fast nanosecond clock used for scheduling.
//!
//! All of them convert between counter cycles and nanoseconds with a
//! `(mult, shift)` pair computed by [`clocks_calc_mult_shift`], so that
//! `ns = (cycles * mult) >> shift` needs no division.

pub mod clockevents;
pub mod clocksource;
pub mod sched_clock;
pub mod tick;

use alloc::sync::Arc;

pub use self::{
    clockevents::{
        ClockEventDevice, ClockEventFeatures, ClockEventOps, ClockEventRegistry, ClockEventState,
    },
    clocksource::{Clocksource, ClocksourceRegistry, CounterRead},
    sched_clock::{SchedClock, SchedClockRegistry},
    tick::{PeriodicTick, TickHandler},
};

pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Compute a `(mult, shift)` pair converting `from` Hz to `to` Hz.
///
/// `maxsec` is the longest interval, in seconds of the `from` clock, that
/// must convert without overflowing 64 bits. Larger values give smaller
/// shifts and thus less precision.
pub fn clocks_calc_mult_shift(from: u32, to: u32, maxsec: u32) -> (u32, u32) {
    // Bits of headroom left for the multiplication.
    let mut tmp = (maxsec as u64 * from as u64) >> 32;
    let mut sftacc = 32u32;
    while tmp != 0 {
        tmp >>= 1;
        sftacc -= 1;
    }

    let mut sft = 32u32;
    while sft > 0 {
        tmp = ((to as u64) << sft) + from as u64 / 2;
        tmp /= from as u64;
        if tmp >> sftacc == 0 {
            break;
        }
        sft -= 1;
    }
    (tmp as u32, sft)
}

/// `(cycles * mult) >> shift`, computed without intermediate overflow.
#[inline]
pub fn cyc_to_ns(cycles: u64, mult: u32, shift: u32) -> u64 {
    ((cycles as u128 * mult as u128) >> shift) as u64
}

/// Bitmask covering a counter of `bits` bits.
pub fn counter_mask(bits: u32) -> u64 {
    match bits {
        0 => 0,
        b if b >= 64 => u64::MAX,
        _ => (1u64 << bits) - 1,
    }
}

/// Consumers a timer driver registers with during probe.
pub struct TimeServices {
    pub clockevents: ClockEventRegistry,
    pub clocksources: ClocksourceRegistry,
    pub sched_clock: SchedClockRegistry,
    pub tick: Arc<dyn TickHandler>,
}

impl TimeServices {
    pub fn new(tick: Arc<dyn TickHandler>) -> Self {
        Self {
            clockevents: ClockEventRegistry::new(),
            clocksources: ClocksourceRegistry::new(),
            sched_clock: SchedClockRegistry::new(),
            tick,
        }
    }
}
