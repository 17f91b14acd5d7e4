//! Tick handling.
//!
//! The active clock-event device calls its [`TickHandler`] from interrupt
//! context on every expiry.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use log::{trace, warn};
use spin::Mutex;

use super::{ClockEventDevice, ClockEventState, NSEC_PER_SEC};
use crate::config::TICK_HZ;

/// Callback run on every clock-event expiry.
pub trait TickHandler: Send + Sync {
    fn handle_tick(&self, dev: &ClockEventDevice);
}

/// Jiffies-style periodic tick.
///
/// Counts expiries. When the device runs one-shot it is re-armed for the
/// next tick period, so the tick keeps going in either mode.
pub struct PeriodicTick {
    period_ns: u64,
    jiffies: AtomicU64,
    last_device: Mutex<Option<&'static str>>,
}

impl PeriodicTick {
    pub fn new(period_ns: u64) -> Self {
        Self {
            period_ns,
            jiffies: AtomicU64::new(0),
            last_device: Mutex::new(None),
        }
    }

    /// A tick at the configured `TICK_HZ`.
    pub fn with_default_rate() -> Arc<Self> {
        Arc::new(Self::new(NSEC_PER_SEC / TICK_HZ as u64))
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    /// Ticks handled so far.
    pub fn jiffies(&self) -> u64 {
        self.jiffies.load(Ordering::Relaxed)
    }

    /// Name of the device that delivered the most recent tick.
    pub fn last_device(&self) -> Option<&'static str> {
        *self.last_device.lock()
    }
}

impl TickHandler for PeriodicTick {
    fn handle_tick(&self, dev: &ClockEventDevice) {
        let jiffies = self.jiffies.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_device.lock() = Some(dev.name());
        trace!("[TIMER] tick {} from {}", jiffies, dev.name());

        if dev.state() == ClockEventState::OneShot {
            if let Err(e) = dev.set_next_event_ns(self.period_ns) {
                warn!("[TIMER] {}: unable to re-arm tick: {}", dev.name(), e);
            }
        }
    }
}
