//! TRACE32 simulator interrupt controller.
//!
//! A flat controller with four level-triggered lines:
//!
//! | Offset | Register | Access | Meaning                                |
//! |--------|----------|--------|----------------------------------------|
//! | 0x00   | SOURCE   | RO     | line of the interrupt being signalled  |
//! | 0x04   | PENDING  | RO     | non-zero while an interrupt is pending |
//! | 0x0C   | UNMASK   | WO     | write 1 to unmask the signalled line   |
//! | 0x10   | MASK     | WO     | write 1 to mask the signalled line     |
//!
//! MASK and UNMASK take no line number: the controller applies them to the
//! line it is currently signalling, so every mask, unmask and ack writes
//! [`LINE_SELECT`]. Writing 0 to MASK at init puts the controller in its
//! global-enable state with no line unmasked.
//!
//! The controller is the system's top-level IRQ entry: on each exception it
//! drains the pending flag, translates SOURCE through its domain and hands
//! the logical IRQ to the [`IrqDescTable`].

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, trace, warn};
use spin::Mutex;

use super::ProbeResources;
use crate::{
    config::IC_NR_LINES,
    error::{KernelError, KernelResult},
    irq::{
        FlowHandler, IrqChip, IrqData, IrqDescTable, IrqDomain, IrqEntry, IrqLine, IrqStatus,
        IrqTrigger, LogicalIrq, TrapToken, TrapVector,
    },
    mmio::{register_block, MmioMapper},
};

/// Device-tree compatible string.
pub const COMPATIBLE: &str = "TRACE32,simulator-interrupt-controller";

/// Chip name reported for mapped lines.
pub const CHIP_NAME: &str = "TRACE32-SIMULATOR";

/// Value written to MASK/UNMASK to act on the signalled line.
pub const LINE_SELECT: u32 = 1;

register_block! {
    /// Register block of the interrupt controller.
    pub struct IcRegs {
        [0x00; ro] SOURCE => source;
        [0x04; ro] PENDING => pending;
        [0x0C; wo] UNMASK => set_unmask;
        [0x10; wo] MASK => set_mask;
    }
}

/// Per-line chip operations.
struct Trace32Chip {
    regs: IcRegs,
}

impl IrqChip for Trace32Chip {
    fn name(&self) -> &'static str {
        CHIP_NAME
    }

    fn mask(&self, data: &IrqData) {
        self.regs.barrier();
        self.regs.set_mask(LINE_SELECT);
        trace!("[IC] mask {}", data.hwirq);
    }

    fn unmask(&self, data: &IrqData) {
        self.regs.barrier();
        self.regs.set_unmask(LINE_SELECT);
        trace!("[IC] unmask {}", data.hwirq);
    }

    fn set_type(&self, data: &IrqData, trigger: IrqTrigger) -> KernelResult<Option<FlowHandler>> {
        if trigger.is_empty() {
            return Ok(None);
        }
        if trigger == IrqTrigger::LEVEL_HIGH {
            return Ok(Some(FlowHandler::Level));
        }
        warn!(
            "[IC] {}: unsupported trigger {:#x}",
            data.hwirq,
            trigger.bits()
        );
        Err(KernelError::OperationNotSupported {
            operation: "trigger type other than level-high",
        })
    }
}

/// The controller instance: registers, domain and dispatcher.
pub struct InterruptController {
    regs: IcRegs,
    chip: Arc<Trace32Chip>,
    domain: Mutex<IrqDomain>,
    descs: Arc<IrqDescTable>,
    unrouted: AtomicU64,
}

impl InterruptController {
    /// Probe the controller.
    ///
    /// Maps the register window, globally enables the controller with all
    /// lines masked, creates the line domain and installs the controller
    /// as the entry of `vector`.
    pub fn init(
        mapper: &dyn MmioMapper,
        res: &ProbeResources,
        descs: Arc<IrqDescTable>,
        vector: &TrapVector,
    ) -> KernelResult<(Arc<Self>, TrapToken)> {
        let base = res.base.ok_or(KernelError::UnresolvedResource {
            device: CHIP_NAME,
            resource: "register window",
        })?;
        let window = mapper.iomap(base, res.size.unwrap_or(IcRegs::SIZE))?;
        let regs = IcRegs::new(window)?;

        regs.barrier();
        regs.set_mask(0);

        let ic = Arc::new(Self {
            chip: Arc::new(Trace32Chip { regs: regs.clone() }),
            regs,
            domain: Mutex::new(IrqDomain::new(CHIP_NAME, IC_NR_LINES)),
            descs,
            unrouted: AtomicU64::new(0),
        });
        let token = vector.install(ic.clone())?;

        info!(
            "[IC] {} at {:#x}: {} lines",
            CHIP_NAME,
            ic.regs.window().base(),
            IC_NR_LINES
        );
        Ok((ic, token))
    }

    /// Assign a fresh logical IRQ to `line` and install the level flow.
    ///
    /// Fails with `AlreadyExists` if the line is mapped.
    pub fn map(&self, line: IrqLine) -> KernelResult<LogicalIrq> {
        let mut domain = self.domain.lock();
        self.map_locked(&mut domain, line)
    }

    /// Return the mapping of `line`, creating it if needed.
    pub fn create_mapping(&self, line: IrqLine) -> KernelResult<LogicalIrq> {
        self.find_or_map(line).map(|(irq, _)| irq)
    }

    /// Like [`create_mapping`](Self::create_mapping), also reporting whether
    /// the mapping is new.
    fn find_or_map(&self, line: IrqLine) -> KernelResult<(LogicalIrq, bool)> {
        let mut domain = self.domain.lock();
        domain.check_line(line)?;
        match domain.find_mapping(line) {
            Some(irq) => Ok((irq, false)),
            None => self.map_locked(&mut domain, line).map(|irq| (irq, true)),
        }
    }

    fn map_locked(&self, domain: &mut IrqDomain, line: IrqLine) -> KernelResult<LogicalIrq> {
        domain.check_line(line)?;
        if domain.find_mapping(line).is_some() {
            return Err(KernelError::AlreadyExists {
                resource: "IRQ mapping",
                id: line.as_u32() as u64,
            });
        }

        let irq = self.descs.alloc_desc()?;
        if let Err(e) = domain.associate(line, irq) {
            self.release_desc(irq);
            return Err(e);
        }

        let chip: Arc<dyn IrqChip> = self.chip.clone();
        let attached = self
            .descs
            .set_chip_and_handler(irq, chip, line, Some(FlowHandler::Level))
            .and_then(|()| {
                self.descs
                    .clear_status_flags(irq, IrqStatus::NOPROBE | IrqStatus::NOREQUEST)
            });
        if let Err(e) = attached {
            if let Err(undo) = domain.disassociate(irq) {
                warn!("[IC] unable to drop {} -> {}: {}", line, irq, undo);
            }
            self.release_desc(irq);
            return Err(e);
        }

        debug!("[IC] {} -> {}", line, irq);
        Ok(irq)
    }

    fn release_desc(&self, irq: LogicalIrq) {
        if let Err(e) = self.descs.free_desc(irq) {
            warn!("[IC] unable to free descriptor of {}: {}", irq, e);
        }
    }

    /// Mask the line of `irq`, remove its mapping and release its
    /// descriptor.
    ///
    /// The line is masked first: a level line left unmasked with no mapping
    /// would keep PENDING set.
    pub fn unmap(&self, irq: LogicalIrq) -> KernelResult<()> {
        let mut domain = self.domain.lock();
        let hwirq = domain.hwirq_of(irq).ok_or(KernelError::NotFound {
            resource: "IRQ mapping",
            id: irq.as_u32() as u64,
        })?;
        self.chip.mask(&IrqData { irq, hwirq });
        domain.disassociate(irq)?;
        self.descs.free_desc(irq)?;
        drop(domain);

        debug!("[IC] {} unmapped from {}", irq, hwirq);
        Ok(())
    }

    pub fn find_mapping(&self, line: IrqLine) -> Option<LogicalIrq> {
        self.domain.lock().find_mapping(line)
    }

    pub fn hwirq(&self, irq: LogicalIrq) -> Option<IrqLine> {
        self.domain.lock().hwirq_of(irq)
    }

    pub fn mask(&self, irq: LogicalIrq) -> KernelResult<()> {
        self.irq_data(irq)?;
        self.descs.disable_irq(irq)
    }

    pub fn unmask(&self, irq: LogicalIrq) -> KernelResult<()> {
        self.irq_data(irq)?;
        self.descs.enable_irq(irq)
    }

    /// Acknowledge `irq`. The controller has no separate ack register, so
    /// this masks the line.
    pub fn ack(&self, irq: LogicalIrq) -> KernelResult<()> {
        let data = self.irq_data(irq)?;
        self.chip.ack(&data);
        Ok(())
    }

    /// Apply a trigger mode to a mapped line.
    ///
    /// Only level-high is supported; an empty request keeps the current
    /// configuration.
    pub fn set_trigger_type(&self, irq: LogicalIrq, trigger: IrqTrigger) -> KernelResult<()> {
        self.irq_data(irq)?;
        self.descs.set_irq_type(irq, trigger)
    }

    /// Resolve an interrupt specifier of `device` to a logical IRQ.
    ///
    /// Maps the line on first use and applies the trigger cell if present.
    /// A mapping created here is removed again if the trigger is refused.
    pub fn irq_of_parse_and_map(
        &self,
        device: &'static str,
        cells: &[u32],
    ) -> KernelResult<LogicalIrq> {
        if cells.is_empty() {
            return Err(KernelError::NoIrq { device });
        }
        let (line, trigger) = self.domain.lock().xlate(cells)?;
        let (irq, created) = self.find_or_map(line)?;
        if trigger.is_empty() {
            return Ok(irq);
        }
        if let Err(e) = self.set_trigger_type(irq, trigger) {
            if created {
                if let Err(undo) = self.unmap(irq) {
                    warn!("[IC] {}: unable to unmap {}: {}", device, irq, undo);
                }
            }
            return Err(e);
        }
        Ok(irq)
    }

    /// Deliver every pending interrupt.
    ///
    /// Loops until PENDING reads zero. Returns the number of interrupts
    /// handed to the dispatcher.
    pub fn drain_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            let pending = self.regs.pending();
            self.regs.barrier();
            if pending == 0 {
                break;
            }

            let source = self.regs.source();
            self.regs.barrier();

            let line = IrqLine::new(source);
            match self.find_mapping(line) {
                Some(irq) => {
                    self.descs.handle_irq(irq);
                    delivered += 1;
                }
                None => {
                    self.unrouted.fetch_add(1, Ordering::Relaxed);
                    warn!("[IC] unexpected interrupt on {}", line);
                }
            }
        }
        delivered
    }

    /// Pending interrupts whose line had no mapping.
    pub fn unrouted_count(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    pub fn descs(&self) -> &Arc<IrqDescTable> {
        &self.descs
    }

    pub fn nr_lines(&self) -> u32 {
        self.domain.lock().size()
    }

    fn irq_data(&self, irq: LogicalIrq) -> KernelResult<IrqData> {
        let hwirq = self.hwirq(irq).ok_or(KernelError::NotFound {
            resource: "IRQ mapping",
            id: irq.as_u32() as u64,
        })?;
        Ok(IrqData { irq, hwirq })
    }
}

impl IrqEntry for InterruptController {
    fn handle_irq(&self) -> usize {
        self.drain_pending()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{
        irq::{IrqActionFlags, IrqHandler, IrqReturn},
        mmio::{
            sim::{BusEvent, SimBus},
            RegisterWindow,
        },
    };

    const BASE: usize = 0x4000;

    struct FixedMapper(Arc<SimBus>);

    impl MmioMapper for FixedMapper {
        fn iomap(&self, phys: usize, size: usize) -> KernelResult<RegisterWindow> {
            Ok(RegisterWindow::new(phys, size, self.0.clone()))
        }
    }

    struct Counter(AtomicUsize);

    impl IrqHandler for Counter {
        fn handle_irq(&self, _irq: LogicalIrq) -> IrqReturn {
            self.0.fetch_add(1, Ordering::SeqCst);
            IrqReturn::Handled
        }
    }

    fn probe() -> (Arc<SimBus>, Arc<InterruptController>, TrapToken) {
        let bus = Arc::new(SimBus::new());
        let vector = TrapVector::new();
        let (ic, token) = InterruptController::init(
            &FixedMapper(bus.clone()),
            &ProbeResources::new(BASE, 0x100),
            Arc::new(IrqDescTable::new()),
            &vector,
        )
        .unwrap();
        (bus, ic, token)
    }

    #[test]
    fn test_init_masks_everything() {
        let (bus, _ic, _) = probe();
        assert_eq!(
            bus.events(),
            [
                BusEvent::Barrier,
                BusEvent::Write {
                    addr: BASE + IcRegs::MASK,
                    value: 0
                },
            ]
        );
    }

    #[test]
    fn test_init_requires_base() {
        let bus = Arc::new(SimBus::new());
        let err = InterruptController::init(
            &FixedMapper(bus),
            &ProbeResources::default(),
            Arc::new(IrqDescTable::new()),
            &TrapVector::new(),
        )
        .err();
        assert!(matches!(
            err,
            Some(KernelError::UnresolvedResource { .. })
        ));
    }

    #[test]
    fn test_second_install_fails() {
        let bus = Arc::new(SimBus::new());
        let vector = TrapVector::new();
        let descs = Arc::new(IrqDescTable::new());
        let res = ProbeResources::new(BASE, 0x100);
        InterruptController::init(&FixedMapper(bus.clone()), &res, descs.clone(), &vector)
            .unwrap();
        let err = InterruptController::init(&FixedMapper(bus), &res, descs, &vector).err();
        assert!(matches!(
            err,
            Some(KernelError::AlreadyInitialized { .. })
        ));
    }

    #[test]
    fn test_map_unmap_and_remap() {
        let (_, ic, _) = probe();
        let irq = ic.map(IrqLine::new(1)).unwrap();
        assert_ne!(irq.as_u32(), 0);
        assert_eq!(ic.find_mapping(IrqLine::new(1)), Some(irq));
        assert_eq!(ic.hwirq(irq), Some(IrqLine::new(1)));
        assert!(matches!(
            ic.map(IrqLine::new(1)),
            Err(KernelError::AlreadyExists { .. })
        ));
        assert_eq!(ic.create_mapping(IrqLine::new(1)), Ok(irq));
        assert!(matches!(
            ic.map(IrqLine::new(4)),
            Err(KernelError::OutOfRange { .. })
        ));

        ic.unmap(irq).unwrap();
        assert_eq!(ic.find_mapping(IrqLine::new(1)), None);
        assert!(!ic.descs().is_allocated(irq));
        assert!(ic.unmap(irq).is_err());
        assert!(ic.map(IrqLine::new(1)).is_ok());
    }

    #[test]
    fn test_mask_unmask_write_line_select() {
        let (bus, ic, _) = probe();
        let irq = ic.map(IrqLine::new(2)).unwrap();
        bus.clear_events();
        ic.mask(irq).unwrap();
        ic.unmask(irq).unwrap();
        ic.ack(irq).unwrap();
        assert_eq!(
            bus.writes(),
            [
                (BASE + IcRegs::MASK, LINE_SELECT),
                (BASE + IcRegs::UNMASK, LINE_SELECT),
                (BASE + IcRegs::MASK, LINE_SELECT),
            ]
        );
        assert!(ic.mask(LogicalIrq::new(9)).is_err());
    }

    #[test]
    fn test_trigger_types() {
        let (_, ic, _) = probe();
        let irq = ic.map(IrqLine::new(0)).unwrap();
        assert_eq!(ic.set_trigger_type(irq, IrqTrigger::empty()), Ok(()));
        assert_eq!(ic.set_trigger_type(irq, IrqTrigger::LEVEL_HIGH), Ok(()));
        assert!(matches!(
            ic.set_trigger_type(irq, IrqTrigger::EDGE_RISING),
            Err(KernelError::OperationNotSupported { .. })
        ));
        assert_eq!(
            ic.descs().flow_handler(irq),
            Ok(Some(FlowHandler::Level))
        );
    }

    #[test]
    fn test_drain_dispatches_until_not_pending() {
        let (bus, ic, token) = probe();
        let irq = ic.map(IrqLine::new(3)).unwrap();
        let handler = Arc::new(Counter(AtomicUsize::new(0)));
        ic.descs()
            .request_irq(irq, "test", IrqActionFlags::empty(), handler.clone())
            .unwrap();

        bus.script_reads(BASE + IcRegs::PENDING, &[1, 1, 0]);
        bus.poke(BASE + IcRegs::SOURCE, 3);
        assert_eq!(token.enter(), 2);
        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
        assert_eq!(bus.reads_of(BASE + IcRegs::PENDING), 3);
        assert_eq!(bus.reads_of(BASE + IcRegs::SOURCE), 2);
    }

    #[test]
    fn test_unmapped_source_is_counted() {
        let (bus, ic, _) = probe();
        bus.script_reads(BASE + IcRegs::PENDING, &[1, 0]);
        bus.poke(BASE + IcRegs::SOURCE, 2);
        assert_eq!(ic.drain_pending(), 0);
        assert_eq!(ic.unrouted_count(), 1);
        assert_eq!(ic.descs().dispatch_count(), 0);
    }

    #[test]
    fn test_parse_and_map() {
        let (_, ic, _) = probe();
        assert_eq!(
            ic.irq_of_parse_and_map("dev", &[]),
            Err(KernelError::NoIrq { device: "dev" })
        );
        let irq = ic.irq_of_parse_and_map("dev", &[2, 4]).unwrap();
        assert_eq!(ic.irq_of_parse_and_map("dev", &[2]), Ok(irq));
        assert!(ic.irq_of_parse_and_map("dev", &[1, 1]).is_err());
    }

    #[test]
    fn test_refused_trigger_drops_new_mapping() {
        let (_, ic, _) = probe();
        assert!(matches!(
            ic.irq_of_parse_and_map("dev", &[1, 1]),
            Err(KernelError::OperationNotSupported { .. })
        ));
        assert_eq!(ic.find_mapping(IrqLine::new(1)), None);
        assert!(!ic.descs().is_allocated(LogicalIrq::new(1)));

        // An existing mapping survives a refused trigger.
        let irq = ic.map(IrqLine::new(3)).unwrap();
        assert!(ic.irq_of_parse_and_map("dev", &[3, 2]).is_err());
        assert_eq!(ic.find_mapping(IrqLine::new(3)), Some(irq));
    }

    #[test]
    fn test_unmap_masks_line_first() {
        let (bus, ic, _) = probe();
        let irq = ic.map(IrqLine::new(1)).unwrap();
        ic.unmask(irq).unwrap();
        bus.clear_events();

        ic.unmap(irq).unwrap();
        assert_eq!(
            bus.events(),
            [
                BusEvent::Barrier,
                BusEvent::Write {
                    addr: BASE + IcRegs::MASK,
                    value: LINE_SELECT
                },
            ]
        );
        assert!(ic.unmap(irq).is_err());
        assert_eq!(bus.writes().len(), 1);
    }
}
