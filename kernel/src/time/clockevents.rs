//! Clock-event devices: programmable timer interrupt sources.
//!
//! A [`ClockEventDevice`] wraps the driver callbacks ([`ClockEventOps`]) in
//! a small state machine:
//!
//! ```text
//!   Shutdown --set_periodic--> Periodic --shutdown--> Shutdown
//!   Shutdown --set_next_event--> OneShot --shutdown--> Shutdown
//!   Periodic --set_periodic--> Periodic   (re-arm)
//!   OneShot --set_next_event--> OneShot   (reprogram)
//!   any --tick_resume--> Shutdown
//! ```
//!
//! Switching directly between `Periodic` and `OneShot` is refused; the
//! device has to be shut down first. The state lock is held across the
//! driver callback, so register sequences of concurrent transitions never
//! interleave.

use alloc::{sync::Arc, vec::Vec};

use bitflags::bitflags;
use log::{debug, info, warn};
use spin::Mutex;

use super::{clocks_calc_mult_shift, cyc_to_ns, NSEC_PER_SEC};
use crate::error::{KernelError, KernelResult};

bitflags! {
    /// Modes a clock-event device can operate in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClockEventFeatures: u32 {
        const PERIODIC = 1 << 0;
        const ONESHOT = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEventState {
    Shutdown,
    Periodic,
    OneShot,
}

impl ClockEventState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Periodic => "periodic",
            Self::OneShot => "oneshot",
        }
    }
}

/// Driver callbacks behind a clock-event device.
///
/// Called with the device state lock held and only for valid transitions;
/// `cycles` is already range-checked.
pub trait ClockEventOps: Send + Sync {
    fn set_next_event(&self, cycles: u32) -> KernelResult<()>;
    fn set_state_periodic(&self) -> KernelResult<()>;
    fn set_state_shutdown(&self) -> KernelResult<()>;

    fn tick_resume(&self) -> KernelResult<()> {
        self.set_state_shutdown()
    }
}

/// A timer interrupt source registered with the tick layer.
pub struct ClockEventDevice {
    name: &'static str,
    features: ClockEventFeatures,
    rating: u32,
    cpumask: u32,
    freq_hz: u32,
    mult: u32,
    shift: u32,
    min_delta_ticks: u64,
    max_delta_ticks: u64,
    min_delta_ns: u64,
    max_delta_ns: u64,
    state: Mutex<ClockEventState>,
    ops: Arc<dyn ClockEventOps>,
}

impl ClockEventDevice {
    /// Create an unconfigured device in the `Shutdown` state.
    pub fn new(
        name: &'static str,
        features: ClockEventFeatures,
        rating: u32,
        ops: Arc<dyn ClockEventOps>,
    ) -> Self {
        Self {
            name,
            features,
            rating,
            cpumask: 1,
            freq_hz: 0,
            mult: 0,
            shift: 0,
            min_delta_ticks: 0,
            max_delta_ticks: 0,
            min_delta_ns: 0,
            max_delta_ns: 0,
            state: Mutex::new(ClockEventState::Shutdown),
            ops,
        }
    }

    /// CPUs the device can interrupt, one bit per CPU.
    pub fn with_cpumask(mut self, cpumask: u32) -> Self {
        self.cpumask = cpumask;
        self
    }

    /// Set the input frequency and the programmable delta range.
    ///
    /// Derives the nanosecond-to-cycle conversion and the delta range in
    /// nanoseconds.
    pub fn configure(&mut self, freq_hz: u32, min_delta: u64, max_delta: u64) -> KernelResult<()> {
        if freq_hz == 0 {
            return Err(KernelError::OutOfRange {
                name: "clockevent frequency",
                value: 0,
                max: u32::MAX as u64,
            });
        }
        if min_delta == 0 || min_delta > max_delta || max_delta > u32::MAX as u64 {
            return Err(KernelError::OutOfRange {
                name: "clockevent delta range",
                value: max_delta,
                max: u32::MAX as u64,
            });
        }

        let mut sec = max_delta / freq_hz as u64;
        if sec == 0 {
            sec = 1;
        }
        let (mult, shift) = clocks_calc_mult_shift(NSEC_PER_SEC as u32, freq_hz, sec as u32);

        self.freq_hz = freq_hz;
        self.mult = mult;
        self.shift = shift;
        self.min_delta_ticks = min_delta;
        self.max_delta_ticks = max_delta;
        self.min_delta_ns = self.delta_to_ns(min_delta);
        self.max_delta_ns = self.delta_to_ns(max_delta);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.mult != 0
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn features(&self) -> ClockEventFeatures {
        self.features
    }

    pub fn rating(&self) -> u32 {
        self.rating
    }

    pub fn cpumask(&self) -> u32 {
        self.cpumask
    }

    pub fn freq_hz(&self) -> u32 {
        self.freq_hz
    }

    pub fn mult_shift(&self) -> (u32, u32) {
        (self.mult, self.shift)
    }

    pub fn min_delta_ticks(&self) -> u64 {
        self.min_delta_ticks
    }

    pub fn max_delta_ticks(&self) -> u64 {
        self.max_delta_ticks
    }

    pub fn min_delta_ns(&self) -> u64 {
        self.min_delta_ns
    }

    pub fn max_delta_ns(&self) -> u64 {
        self.max_delta_ns
    }

    pub fn state(&self) -> ClockEventState {
        *self.state.lock()
    }

    /// Nanoseconds covered by `latch` cycles, rounded up, at least 1 us.
    pub fn delta_to_ns(&self, latch: u64) -> u64 {
        if self.mult == 0 {
            return 0;
        }
        let clc = (latch as u128) << self.shift;
        let ns = clc.div_ceil(self.mult as u128);
        (ns.min(u64::MAX as u128) as u64).max(1000)
    }

    /// Cycles covered by `ns` nanoseconds.
    pub fn ns_to_cycles(&self, ns: u64) -> u64 {
        cyc_to_ns(ns, self.mult, self.shift)
    }

    /// Arm a single expiry `cycles` from now and enter `OneShot`.
    ///
    /// Refused in `Periodic`. Out-of-range deltas are rejected with nothing
    /// written and the state unchanged.
    pub fn set_next_event(&self, cycles: u64) -> KernelResult<()> {
        self.require(ClockEventFeatures::ONESHOT, "one-shot clock events")?;
        let mut state = self.state.lock();
        if *state == ClockEventState::Periodic {
            return Err(KernelError::InvalidState {
                expected: "shutdown or oneshot",
                actual: state.as_str(),
            });
        }
        if cycles < self.min_delta_ticks || cycles > self.max_delta_ticks {
            return Err(KernelError::OutOfRange {
                name: "clockevent cycles",
                value: cycles,
                max: self.max_delta_ticks,
            });
        }
        self.ops.set_next_event(cycles as u32)?;
        *state = ClockEventState::OneShot;
        Ok(())
    }

    /// Arm a single expiry `delta_ns` nanoseconds from now.
    pub fn set_next_event_ns(&self, delta_ns: u64) -> KernelResult<()> {
        if delta_ns < self.min_delta_ns || delta_ns > self.max_delta_ns {
            return Err(KernelError::OutOfRange {
                name: "clockevent delta ns",
                value: delta_ns,
                max: self.max_delta_ns,
            });
        }
        let cycles = self
            .ns_to_cycles(delta_ns)
            .clamp(self.min_delta_ticks, self.max_delta_ticks);
        self.set_next_event(cycles)
    }

    /// Enter `Periodic`, from `Shutdown` or to re-arm while already periodic.
    pub fn set_periodic(&self) -> KernelResult<()> {
        self.require(ClockEventFeatures::PERIODIC, "periodic clock events")?;
        let mut state = self.state.lock();
        if *state == ClockEventState::OneShot {
            return Err(KernelError::InvalidState {
                expected: "shutdown or periodic",
                actual: state.as_str(),
            });
        }
        self.ops.set_state_periodic()?;
        *state = ClockEventState::Periodic;
        debug!("[TIMER] {}: periodic", self.name);
        Ok(())
    }

    /// Stop the device. Valid from any state.
    pub fn shutdown(&self) -> KernelResult<()> {
        let mut state = self.state.lock();
        self.ops.set_state_shutdown()?;
        *state = ClockEventState::Shutdown;
        debug!("[TIMER] {}: shutdown", self.name);
        Ok(())
    }

    /// Bring the device back after suspend. Valid from any state.
    pub fn tick_resume(&self) -> KernelResult<()> {
        let mut state = self.state.lock();
        self.ops.tick_resume()?;
        *state = ClockEventState::Shutdown;
        Ok(())
    }

    fn require(&self, feature: ClockEventFeatures, operation: &'static str) -> KernelResult<()> {
        if self.features.contains(feature) {
            Ok(())
        } else {
            Err(KernelError::OperationNotSupported { operation })
        }
    }
}

impl core::fmt::Debug for ClockEventDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClockEventDevice")
            .field("name", &self.name)
            .field("features", &self.features)
            .field("rating", &self.rating)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct RegistryInner {
    devices: Vec<Arc<ClockEventDevice>>,
    active: Option<Arc<ClockEventDevice>>,
}

/// Registered clock-event devices and the one driving the tick.
pub struct ClockEventRegistry {
    inner: Mutex<RegistryInner>,
}

impl ClockEventRegistry {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                devices: Vec::new(),
                active: None,
            }),
        }
    }

    /// Register `dev`. Returns whether it became the active device.
    ///
    /// A device replaces the active one only with a strictly higher rating;
    /// the replaced device is shut down. Errors are only returned before the
    /// registry is changed.
    pub fn register(&self, dev: Arc<ClockEventDevice>) -> KernelResult<bool> {
        if !dev.is_configured() {
            return Err(KernelError::NotInitialized {
                subsystem: "clockevent frequency",
            });
        }

        let replaced = {
            let mut inner = self.inner.lock();
            if inner.devices.iter().any(|d| Arc::ptr_eq(d, &dev)) {
                return Err(KernelError::AlreadyExists {
                    resource: "clockevent device",
                    id: inner.devices.len() as u64,
                });
            }
            inner.devices.push(dev.clone());

            let preferred = inner
                .active
                .as_ref()
                .map_or(true, |active| dev.rating > active.rating);
            if !preferred {
                info!(
                    "[TIMER] clockevent {} registered (standby, rating {})",
                    dev.name, dev.rating
                );
                return Ok(false);
            }
            inner.active.replace(dev.clone())
        };

        if let Some(old) = replaced {
            if let Err(e) = old.shutdown() {
                warn!("[TIMER] clockevent {}: shutdown failed: {}", old.name, e);
            }
        }
        info!(
            "[TIMER] clockevent {} active: rating {}, delta {}..{} ns",
            dev.name, dev.rating, dev.min_delta_ns, dev.max_delta_ns
        );
        Ok(true)
    }

    pub fn active(&self) -> Option<Arc<ClockEventDevice>> {
        self.inner.lock().active.clone()
    }

    pub fn is_active(&self, dev: &Arc<ClockEventDevice>) -> bool {
        self.inner
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, dev))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClockEventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use alloc::{string::String, vec::Vec};

    use super::*;

    #[derive(Default)]
    struct RecordingOps {
        calls: Mutex<Vec<String>>,
    }

    impl ClockEventOps for RecordingOps {
        fn set_next_event(&self, cycles: u32) -> KernelResult<()> {
            self.calls.lock().push(alloc::format!("next {}", cycles));
            Ok(())
        }

        fn set_state_periodic(&self) -> KernelResult<()> {
            self.calls.lock().push("periodic".into());
            Ok(())
        }

        fn set_state_shutdown(&self) -> KernelResult<()> {
            self.calls.lock().push("shutdown".into());
            Ok(())
        }
    }

    fn device(rating: u32) -> (Arc<RecordingOps>, Arc<ClockEventDevice>) {
        let ops = Arc::new(RecordingOps::default());
        let mut dev = ClockEventDevice::new(
            "test",
            ClockEventFeatures::PERIODIC | ClockEventFeatures::ONESHOT,
            rating,
            ops.clone(),
        );
        dev.configure(1_000_000, 1, u32::MAX as u64).unwrap();
        (ops, Arc::new(dev))
    }

    #[test]
    fn test_configure_1mhz() {
        let (_, dev) = device(300);
        assert_eq!(dev.mult_shift(), (2_147_484, 31));
        assert_eq!(dev.min_delta_ns(), 1000);
        assert!(dev.max_delta_ns() >= 4_294_967_295_000 - 1_000_000);
        assert_eq!(dev.ns_to_cycles(1_000_000), 1000);
    }

    #[test]
    fn test_oneshot_then_periodic_refused() {
        let (ops, dev) = device(300);
        dev.set_next_event(500).unwrap();
        assert_eq!(dev.state(), ClockEventState::OneShot);
        assert!(matches!(
            dev.set_periodic(),
            Err(KernelError::InvalidState { .. })
        ));
        dev.shutdown().unwrap();
        dev.set_periodic().unwrap();
        assert!(matches!(
            dev.set_next_event(10),
            Err(KernelError::InvalidState { .. })
        ));
        assert_eq!(dev.state(), ClockEventState::Periodic);
        assert_eq!(*ops.calls.lock(), ["next 500", "shutdown", "periodic"]);
    }

    #[test]
    fn test_out_of_range_cycles_write_nothing() {
        let (ops, dev) = device(300);
        assert_eq!(
            dev.set_next_event(0),
            Err(KernelError::OutOfRange {
                name: "clockevent cycles",
                value: 0,
                max: u32::MAX as u64
            })
        );
        assert!(dev.set_next_event(u32::MAX as u64 + 1).is_err());
        assert_eq!(dev.state(), ClockEventState::Shutdown);
        assert!(ops.calls.lock().is_empty());
    }

    #[test]
    fn test_set_next_event_ns() {
        let (ops, dev) = device(300);
        dev.set_next_event_ns(10_000).unwrap();
        assert_eq!(*ops.calls.lock(), ["next 10"]);
        assert!(dev.set_next_event_ns(10).is_err());
    }

    #[test]
    fn test_tick_resume_from_any_state() {
        let (_, dev) = device(300);
        dev.set_periodic().unwrap();
        dev.tick_resume().unwrap();
        assert_eq!(dev.state(), ClockEventState::Shutdown);
    }

    #[test]
    fn test_registry_prefers_higher_rating() {
        let registry = ClockEventRegistry::new();
        let (low_ops, low) = device(100);
        let (_, high) = device(300);
        let (_, same) = device(300);

        assert_eq!(registry.register(low.clone()), Ok(true));
        low.set_periodic().unwrap();
        assert_eq!(registry.register(high.clone()), Ok(true));
        assert_eq!(low.state(), ClockEventState::Shutdown);
        assert_eq!(*low_ops.calls.lock(), ["periodic", "shutdown"]);

        assert_eq!(registry.register(same), Ok(false));
        assert!(registry.is_active(&high));
        assert!(registry.register(high).is_err());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unconfigured_device_rejected() {
        let registry = ClockEventRegistry::new();
        let dev = ClockEventDevice::new(
            "raw",
            ClockEventFeatures::ONESHOT,
            1,
            Arc::new(RecordingOps::default()),
        );
        assert!(matches!(
            registry.register(Arc::new(dev)),
            Err(KernelError::NotInitialized { .. })
        ));
    }
}
