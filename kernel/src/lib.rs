//! SimSoC Kernel Library
//!
//! Interrupt controller, system timer and timekeeping support for the
//! TRACE32 simulated SoC.
//!
//! - [`drivers::InterruptController`] is the top-level interrupt entry. It
//!   drains the controller's pending flag and dispatches each source through
//!   its [`irq::IrqDomain`] into the generic [`irq::IrqDescTable`].
//! - [`drivers::Trace32Timer`] provides the tick clock-event device, a
//!   clocksource and the scheduler clock.
//! - [`platform::probe`] brings both up from device nodes.
//!
//! Register access goes through [`mmio::RegisterBus`], so the whole stack
//! runs unchanged against [`mmio::sim::SimBus`] in tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod irq;
pub mod mmio;
pub mod platform;
pub mod sync;
pub mod time;

pub use error::{KernelError, KernelResult};
