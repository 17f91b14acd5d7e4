//! TRACE32 simulator machine support.
//!
//! Describes the fixed I/O mapping of the simulated SoC and brings up its
//! interrupt controller and system timer from a list of device nodes.
//!
//! Bring-up order matters: the controller must be live before the timer
//! can map its interrupt line. A controller failure aborts bring-up; a
//! timer failure is logged and the system continues without a tick.

use alloc::{sync::Arc, vec::Vec};

use log::{error, info, warn};

use crate::{
    config::{SOC_MMIO_LEN, SOC_MMIO_PHYS, SOC_MMIO_VIRT},
    drivers::{irqchip, timer, InterruptController, ProbeResources, Trace32Timer},
    error::{KernelError, KernelResult},
    irq::{IrqDescTable, TrapToken, TrapVector},
    mmio::{MmioMapper, RegisterBus, RegisterWindow},
    time::TimeServices,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemType {
    /// Strongly ordered, uncached device memory.
    Device,
}

/// One static virtual-to-physical I/O mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapDesc {
    pub virt: usize,
    pub phys: usize,
    pub length: usize,
    pub mem_type: MemType,
}

impl MapDesc {
    /// Virtual address of `[phys, phys + size)` if this mapping covers it.
    pub fn translate(&self, phys: usize, size: usize) -> Option<usize> {
        let offset = phys.checked_sub(self.phys)?;
        let end = offset.checked_add(size)?;
        (end <= self.length).then(|| self.virt + offset)
    }
}

/// I/O mappings established at boot.
pub const TRACE32_IO_DESC: &[MapDesc] = &[MapDesc {
    virt: SOC_MMIO_VIRT,
    phys: SOC_MMIO_PHYS,
    length: SOC_MMIO_LEN,
    mem_type: MemType::Device,
}];

/// Static I/O table: resolves physical register ranges through the boot
/// mappings.
pub struct IoTable {
    descs: &'static [MapDesc],
    bus: Arc<dyn RegisterBus>,
}

impl IoTable {
    pub fn new(descs: &'static [MapDesc], bus: Arc<dyn RegisterBus>) -> Self {
        Self { descs, bus }
    }

    pub fn phys_to_virt(&self, phys: usize, size: usize) -> Option<usize> {
        self.descs.iter().find_map(|desc| desc.translate(phys, size))
    }
}

impl MmioMapper for IoTable {
    fn iomap(&self, phys: usize, size: usize) -> KernelResult<RegisterWindow> {
        let virt = self
            .phys_to_virt(phys, size)
            .ok_or(KernelError::MapError { phys, size })?;
        Ok(RegisterWindow::new(virt, size, self.bus.clone()))
    }
}

/// Machine descriptor matched against the root node's compatible string.
#[derive(Debug)]
pub struct MachineDesc {
    pub name: &'static str,
    pub dt_compat: &'static [&'static str],
    pub io_desc: &'static [MapDesc],
}

impl MachineDesc {
    pub fn matches(&self, compatible: &str) -> bool {
        self.dt_compat.iter().any(|c| *c == compatible)
    }

    /// Build the I/O table for this machine on `bus`.
    pub fn map_io(&self, bus: Arc<dyn RegisterBus>) -> IoTable {
        IoTable::new(self.io_desc, bus)
    }
}

pub static TRACE32_MACHINE: MachineDesc = MachineDesc {
    name: "TRACE32 simulator (Device Tree)",
    dt_compat: &["TRACE32,simulator"],
    io_desc: TRACE32_IO_DESC,
};

/// A discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    pub compatible: &'static str,
    pub resources: ProbeResources,
}

impl DeviceNode {
    pub fn new(compatible: &'static str, resources: ProbeResources) -> Self {
        Self {
            compatible,
            resources,
        }
    }
}

/// Everything brought up by [`probe`].
pub struct Platform {
    pub io: IoTable,
    pub descs: Arc<IrqDescTable>,
    pub controller: Arc<InterruptController>,
    pub trap: TrapToken,
    pub timer: Option<Arc<Trace32Timer>>,
    pub time: TimeServices,
}

/// Bring up the machine described by `root_compat` and `nodes`.
///
/// Probes the interrupt controller, installing it into `vector`, then the
/// timer. Once the timer is the active clock-event device it is switched
/// to periodic mode.
pub fn probe(
    machine: &MachineDesc,
    root_compat: &str,
    nodes: &[DeviceNode],
    bus: Arc<dyn RegisterBus>,
    vector: &TrapVector,
    time: TimeServices,
) -> KernelResult<Platform> {
    if !machine.matches(root_compat) {
        return Err(KernelError::OperationNotSupported {
            operation: "unknown machine",
        });
    }
    info!("[PLATFORM] {}", machine.name);

    let io = machine.map_io(bus);
    let descs = Arc::new(IrqDescTable::new());

    let ic_node =
        find_node(nodes, irqchip::COMPATIBLE).ok_or(KernelError::UnresolvedResource {
            device: irqchip::CHIP_NAME,
            resource: "device node",
        })?;
    let (controller, trap) =
        InterruptController::init(&io, &ic_node.resources, descs.clone(), vector)
            .inspect_err(|e| error!("[PLATFORM] interrupt controller probe failed: {}", e))?;

    let timer = match find_node(nodes, timer::COMPATIBLE) {
        Some(node) => match Trace32Timer::init(&io, &node.resources, &controller, &time) {
            Ok(timer) => Some(timer),
            Err(e) => {
                error!("[PLATFORM] timer probe failed: {}", e);
                None
            }
        },
        None => {
            warn!("[PLATFORM] no timer node");
            None
        }
    };

    if let Some(timer) = &timer {
        if time.clockevents.is_active(timer.clock_event()) {
            if let Err(e) = timer.set_periodic() {
                error!("[PLATFORM] unable to start periodic tick: {}", e);
            }
        }
    }

    Ok(Platform {
        io,
        descs,
        controller,
        trap,
        timer,
        time,
    })
}

fn find_node<'a>(nodes: &'a [DeviceNode], compatible: &str) -> Option<&'a DeviceNode> {
    nodes.iter().find(|node| node.compatible == compatible)
}

/// Device nodes of the stock simulator configuration.
pub fn default_nodes() -> Vec<DeviceNode> {
    alloc::vec![
        DeviceNode::new(
            irqchip::COMPATIBLE,
            ProbeResources::new(SOC_MMIO_PHYS, 0x100),
        ),
        DeviceNode::new(
            timer::COMPATIBLE,
            ProbeResources::new(SOC_MMIO_PHYS + 0x1000, 0x100).with_interrupts(&[0]),
        ),
    ]
}
