//! Device drivers for the TRACE32 simulated SoC.
//!
//! Both drivers are probed by the platform layer from device-tree style
//! nodes. Probe input is a [`ProbeResources`] record; register windows are
//! obtained through an [`MmioMapper`](crate::mmio::MmioMapper).

pub mod irqchip;
pub mod timer;

use alloc::vec::Vec;

pub use irqchip::InterruptController;
pub use timer::Trace32Timer;

/// Resources the discovery layer resolved for one device node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResources {
    /// Physical base of the register window.
    pub base: Option<usize>,
    /// Length of the register window. Drivers fall back to the size of
    /// their register block.
    pub size: Option<usize>,
    /// Interrupt specifier cells: `<line>` or `<line trigger>`.
    pub interrupts: Vec<u32>,
}

impl ProbeResources {
    pub fn new(base: usize, size: usize) -> Self {
        Self {
            base: Some(base),
            size: Some(size),
            interrupts: Vec::new(),
        }
    }

    pub fn with_interrupts(mut self, cells: &[u32]) -> Self {
        self.interrupts = cells.to_vec();
        self
    }
}
