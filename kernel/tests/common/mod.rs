//! Common fixtures for the SoC integration tests.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use simsoc_kernel::{
    config::{SOC_MMIO_PHYS, SOC_MMIO_VIRT},
    drivers::{irqchip, timer, ProbeResources},
    irq::{IrqHandler, IrqReturn, LogicalIrq, TrapVector},
    mmio::sim::SimBus,
    platform::{self, DeviceNode, Platform, TRACE32_MACHINE},
    time::{PeriodicTick, TimeServices},
    KernelResult,
};

pub const IC_PHYS: usize = SOC_MMIO_PHYS;
pub const IC_VIRT: usize = SOC_MMIO_VIRT;
pub const TIMER_PHYS: usize = SOC_MMIO_PHYS + 0x1000;
pub const TIMER_VIRT: usize = SOC_MMIO_VIRT + 0x1000;

/// Controller line the timer is wired to.
pub const TIMER_LINE: u32 = 2;

pub const IC_SOURCE: usize = IC_VIRT;
pub const IC_PENDING: usize = IC_VIRT + 0x04;
pub const IC_UNMASK: usize = IC_VIRT + 0x0C;
pub const IC_MASK: usize = IC_VIRT + 0x10;

pub const TIMER_COMPARE: usize = TIMER_VIRT;
pub const TIMER_CONTROL: usize = TIMER_VIRT + 0x08;
pub const TIMER_STATUS: usize = TIMER_VIRT + 0x0C;
pub const TIMER_COUNTER: usize = TIMER_VIRT + 0x50;

/// A booted simulated SoC.
pub struct Soc {
    pub bus: Arc<SimBus>,
    pub tick: Arc<PeriodicTick>,
    pub vector: TrapVector,
    pub platform: Platform,
}

impl Soc {
    /// Make the controller report `line` pending for `times` consecutive
    /// polls.
    pub fn raise(&self, line: u32, times: usize) {
        let mut script = vec![1; times];
        script.push(0);
        self.bus.script_reads(IC_PENDING, &script);
        self.bus.poke(IC_SOURCE, line);
    }

    /// Take an IRQ exception.
    pub fn trap(&self) -> usize {
        self.vector.enter()
    }
}

pub fn ic_node() -> DeviceNode {
    DeviceNode::new(
        irqchip::COMPATIBLE,
        ProbeResources::new(IC_PHYS, 0x100),
    )
}

pub fn timer_node() -> DeviceNode {
    DeviceNode::new(
        timer::COMPATIBLE,
        ProbeResources::new(TIMER_PHYS, 0x100).with_interrupts(&[TIMER_LINE]),
    )
}

pub fn boot_with(nodes: &[DeviceNode]) -> KernelResult<Soc> {
    let bus = Arc::new(SimBus::new());
    let tick = PeriodicTick::with_default_rate();
    let vector = TrapVector::new();
    let platform = platform::probe(
        &TRACE32_MACHINE,
        "TRACE32,simulator",
        nodes,
        bus.clone(),
        &vector,
        TimeServices::new(tick.clone()),
    )?;
    Ok(Soc {
        bus,
        tick,
        vector,
        platform,
    })
}

/// Boot the stock controller + timer configuration.
pub fn boot() -> Soc {
    boot_with(&[ic_node(), timer_node()]).expect("SoC bring-up failed")
}

/// Handler that records its tag on every invocation.
pub struct Tagged {
    pub tag: &'static str,
    pub log: Arc<Mutex<Vec<&'static str>>>,
}

impl IrqHandler for Tagged {
    fn handle_irq(&self, _irq: LogicalIrq) -> IrqReturn {
        self.log.lock().unwrap().push(self.tag);
        IrqReturn::Handled
    }
}

/// Handler that only counts invocations.
#[derive(Default)]
pub struct Counting(pub AtomicUsize);

impl Counting {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl IrqHandler for Counting {
    fn handle_irq(&self, _irq: LogicalIrq) -> IrqReturn {
        self.0.fetch_add(1, Ordering::SeqCst);
        IrqReturn::Handled
    }
}
