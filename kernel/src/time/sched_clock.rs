//! Scheduler clock.
//!
//! Extends a narrow free-running counter into a monotonic 64-bit nanosecond
//! clock. Every read folds the cycles elapsed since the previous read into
//! an epoch, so the clock stays correct as long as it is read at least once
//! per counter wrap period.

use alloc::sync::Arc;

use log::info;
use spin::Mutex;

use super::{
    clocks_calc_mult_shift, clocksource::CounterRead, counter_mask, cyc_to_ns, NSEC_PER_SEC,
};
use crate::error::{KernelError, KernelResult};

#[derive(Debug, Clone, Copy, Default)]
struct Epoch {
    cycles: u64,
    ns: u64,
}

pub struct SchedClock {
    reader: Arc<dyn CounterRead>,
    bits: u32,
    mask: u64,
    rate: u32,
    mult: u32,
    shift: u32,
    epoch: Mutex<Epoch>,
}

impl SchedClock {
    /// Build a clock over a `bits`-wide counter running at `rate` Hz.
    ///
    /// The current counter value becomes time zero.
    pub fn new(reader: Arc<dyn CounterRead>, bits: u32, rate: u32) -> KernelResult<Self> {
        if rate == 0 {
            return Err(KernelError::OutOfRange {
                name: "sched_clock rate",
                value: 0,
                max: u32::MAX as u64,
            });
        }
        if bits == 0 || bits > 64 {
            return Err(KernelError::OutOfRange {
                name: "sched_clock width",
                value: bits as u64,
                max: 64,
            });
        }
        let mask = counter_mask(bits);
        let (mult, shift) = clocks_calc_mult_shift(rate, NSEC_PER_SEC as u32, 3600);
        let start = reader.read_counter() & mask;

        Ok(Self {
            reader,
            bits,
            mask,
            rate,
            mult,
            shift,
            epoch: Mutex::new(Epoch {
                cycles: start,
                ns: 0,
            }),
        })
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Nanoseconds until the counter wraps.
    pub fn wrap_ns(&self) -> u64 {
        cyc_to_ns(self.mask, self.mult, self.shift)
    }

    /// Nanoseconds since the clock was created.
    pub fn read_ns(&self) -> u64 {
        let mut epoch = self.epoch.lock();
        let now = self.reader.read_counter() & self.mask;
        let delta = now.wrapping_sub(epoch.cycles) & self.mask;
        epoch.ns += cyc_to_ns(delta, self.mult, self.shift);
        epoch.cycles = now;
        epoch.ns
    }
}

/// Holder of the system scheduler clock.
pub struct SchedClockRegistry {
    current: Mutex<Option<Arc<SchedClock>>>,
}

impl SchedClockRegistry {
    pub const fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Install `clock` unless a faster one is already installed.
    ///
    /// Returns whether `clock` is now the scheduler clock.
    pub fn register(&self, clock: Arc<SchedClock>) -> bool {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|cur| cur.rate > clock.rate) {
            return false;
        }
        info!(
            "[TIMER] sched_clock: {} bits at {} Hz, wraps every {} ns",
            clock.bits,
            clock.rate,
            clock.wrap_ns()
        );
        *current = Some(clock);
        true
    }

    pub fn current(&self) -> Option<Arc<SchedClock>> {
        self.current.lock().clone()
    }
}

impl Default for SchedClockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
