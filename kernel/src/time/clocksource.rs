//! Clocksources: free-running counters used for timekeeping.

use alloc::{sync::Arc, vec::Vec};

use log::info;
use spin::Mutex;

use super::{clocks_calc_mult_shift, counter_mask, cyc_to_ns, NSEC_PER_SEC};
use crate::error::{KernelError, KernelResult};

/// Raw access to a free-running hardware counter.
pub trait CounterRead: Send + Sync {
    fn read_counter(&self) -> u64;
}

/// A registered counter with its cycle-to-nanosecond conversion.
pub struct Clocksource {
    name: &'static str,
    rating: u32,
    freq_hz: u32,
    bits: u32,
    mask: u64,
    mult: u32,
    shift: u32,
    reader: Arc<dyn CounterRead>,
}

impl Clocksource {
    pub fn new(
        name: &'static str,
        rating: u32,
        freq_hz: u32,
        bits: u32,
        reader: Arc<dyn CounterRead>,
    ) -> KernelResult<Self> {
        if freq_hz == 0 {
            return Err(KernelError::OutOfRange {
                name: "clocksource frequency",
                value: 0,
                max: u32::MAX as u64,
            });
        }
        if bits == 0 || bits > 64 {
            return Err(KernelError::OutOfRange {
                name: "clocksource width",
                value: bits as u64,
                max: 64,
            });
        }
        let mask = counter_mask(bits);

        // Conversion must hold over a full wrap period, clamped to
        // [1 s, 600 s] for counters wider than 32 bits.
        let mut maxsec = mask / freq_hz as u64;
        if maxsec == 0 {
            maxsec = 1;
        } else if maxsec > 600 && mask > u32::MAX as u64 {
            maxsec = 600;
        }
        let (mult, shift) = clocks_calc_mult_shift(freq_hz, NSEC_PER_SEC as u32, maxsec as u32);

        Ok(Self {
            name,
            rating,
            freq_hz,
            bits,
            mask,
            mult,
            shift,
            reader,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rating(&self) -> u32 {
        self.rating
    }

    pub fn freq_hz(&self) -> u32 {
        self.freq_hz
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn mult_shift(&self) -> (u32, u32) {
        (self.mult, self.shift)
    }

    /// Current counter value, truncated to the declared width.
    pub fn read(&self) -> u64 {
        self.reader.read_counter() & self.mask
    }

    /// Cycles elapsed from `prev` to `now`, across at most one wrap.
    pub fn delta(&self, prev: u64, now: u64) -> u64 {
        now.wrapping_sub(prev) & self.mask
    }

    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        cyc_to_ns(cycles, self.mult, self.shift)
    }

    /// Nanoseconds until the counter wraps.
    pub fn wrap_ns(&self) -> u64 {
        self.cycles_to_ns(self.mask)
    }
}

impl core::fmt::Debug for Clocksource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Clocksource")
            .field("name", &self.name)
            .field("rating", &self.rating)
            .field("freq_hz", &self.freq_hz)
            .field("bits", &self.bits)
            .finish()
    }
}

/// Registered clocksources; the best-rated one is current.
pub struct ClocksourceRegistry {
    sources: Mutex<Vec<Arc<Clocksource>>>,
}

impl ClocksourceRegistry {
    pub const fn new() -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
        }
    }

    /// Register `source`. Names must be unique.
    pub fn register(&self, source: Arc<Clocksource>) -> KernelResult<()> {
        let mut sources = self.sources.lock();
        if let Some(index) = sources.iter().position(|s| s.name == source.name) {
            return Err(KernelError::AlreadyExists {
                resource: "clocksource",
                id: index as u64,
            });
        }
        info!(
            "[TIMER] clocksource {}: {} Hz, {} bits, rating {}, wraps every {} ns",
            source.name,
            source.freq_hz,
            source.bits,
            source.rating,
            source.wrap_ns()
        );
        sources.push(source);
        Ok(())
    }

    /// Remove `source` again.
    pub fn unregister(&self, source: &Arc<Clocksource>) -> KernelResult<()> {
        let mut sources = self.sources.lock();
        let index = sources
            .iter()
            .position(|s| Arc::ptr_eq(s, source))
            .ok_or(KernelError::NotFound {
                resource: "clocksource",
                id: 0,
            })?;
        sources.remove(index);
        info!("[TIMER] clocksource {} unregistered", source.name);
        Ok(())
    }

    /// Highest-rated source; the earliest registered wins ties.
    pub fn current(&self) -> Option<Arc<Clocksource>> {
        let sources = self.sources.lock();
        let mut best: Option<&Arc<Clocksource>> = None;
        for source in sources.iter() {
            if best.map_or(true, |b| source.rating > b.rating) {
                best = Some(source);
            }
        }
        best.cloned()
    }

    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClocksourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    struct FakeCounter(AtomicU64);

    impl CounterRead for FakeCounter {
        fn read_counter(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn source(name: &'static str, rating: u32, value: u64) -> Arc<Clocksource> {
        Arc::new(
            Clocksource::new(
                name,
                rating,
                1_000_000,
                24,
                Arc::new(FakeCounter(AtomicU64::new(value))),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_read_masks_and_delta_wraps() {
        let cs = source("cs", 300, 0x1_23_4567);
        assert_eq!(cs.read(), 0x23_4567);
        assert_eq!(cs.delta(0xFF_FFF0, 0x10), 0x20);
        assert_eq!(cs.cycles_to_ns(1_000_000), NSEC_PER_SEC);
    }

    #[test]
    fn test_registry_prefers_rating_and_rejects_duplicates() {
        let registry = ClocksourceRegistry::new();
        assert!(registry.current().is_none());
        registry.register(source("a", 200, 0)).unwrap();
        registry.register(source("b", 300, 0)).unwrap();
        registry.register(source("c", 300, 0)).unwrap();
        assert_eq!(registry.current().map(|s| s.name()), Some("b"));
        assert!(matches!(
            registry.register(source("a", 400, 0)),
            Err(KernelError::AlreadyExists { .. })
        ));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unregister() {
        let registry = ClocksourceRegistry::new();
        let a = source("a", 300, 0);
        let b = source("b", 200, 0);
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        registry.unregister(&a).unwrap();
        assert_eq!(registry.current().map(|s| s.name()), Some("b"));
        assert!(matches!(
            registry.unregister(&a),
            Err(KernelError::NotFound { .. })
        ));
        // Same name, different source.
        assert!(registry.unregister(&source("b", 200, 0)).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let counter = Arc::new(FakeCounter(AtomicU64::new(0)));
        assert!(Clocksource::new("x", 1, 0, 24, counter.clone()).is_err());
        assert!(Clocksource::new("x", 1, 1000, 0, counter.clone()).is_err());
        assert!(Clocksource::new("x", 1, 1000, 65, counter).is_err());
    }
}
