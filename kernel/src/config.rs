//! Compile-time platform configuration.
//!
//! The TRACE32 simulator exposes a fixed hardware layout, so everything the
//! drivers need to know about it lives here as constants.

// ---------------------------------------------------------------------------
// SoC memory map
// ---------------------------------------------------------------------------

/// Virtual address of the SoC MMIO window.
pub const SOC_MMIO_VIRT: usize = 0xFE00_0000;

/// Physical address of the SoC MMIO window.
pub const SOC_MMIO_PHYS: usize = 0xFF00_0000;

/// Length of the SoC MMIO window (covers every chip variant).
pub const SOC_MMIO_LEN: usize = 0x00FF_FFFF;

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

/// Number of hardware lines on the simulated interrupt controller.
pub const IC_NR_LINES: u32 = 4;

/// Number of logical IRQ descriptors available to the dispatcher.
///
/// Logical IRQ 0 is reserved as "no interrupt"; usable numbers are
/// `1..=NR_IRQS`.
pub const NR_IRQS: u32 = 16;

// ---------------------------------------------------------------------------
// System timer
// ---------------------------------------------------------------------------

/// Input clock of the timer and of its free-running counter, in Hz.
pub const TIMER_FREQ_HZ: u32 = 1_000_000;

/// Compare value programmed at reset, on shutdown, and in periodic mode.
pub const TIMER_DEFAULT_PERIOD: u32 = 1000;

/// Declared width of the free-running counter.
pub const TIMER_COUNTER_BITS: u32 = 24;

/// Rating of the timer as a clock-event device.
pub const TIMER_CLOCKEVENT_RATING: u32 = 300;

/// Rating of the timer counter as a clocksource.
pub const TIMER_CLOCKSOURCE_RATING: u32 = 300;

/// Smallest programmable one-shot delta, in cycles.
pub const TIMER_MIN_DELTA: u64 = 1;

/// Largest programmable one-shot delta, in cycles.
pub const TIMER_MAX_DELTA: u64 = u32::MAX as u64;

/// Tick rate of the periodic tick handler.
pub const TICK_HZ: u32 = 100;
