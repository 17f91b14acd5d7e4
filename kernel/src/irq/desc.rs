//! IRQ descriptor table and flow handling.
//!
//! The table owns one descriptor per logical IRQ. A descriptor records the
//! chip that controls its line, the flow handler that sequences chip calls
//! around the action, and at most one installed action.
//!
//! The table lock is never held while a chip callback or an action runs:
//! the dispatch path snapshots what it needs and releases the lock first,
//! so handlers may call back into the table.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace, warn};
use spin::Mutex;

use super::{
    IrqActionFlags, IrqChip, IrqData, IrqHandler, IrqLine, IrqReturn, IrqStatus, IrqTrigger,
    LogicalIrq,
};
use crate::{
    config::NR_IRQS,
    error::{KernelError, KernelResult},
};

/// Sequencing of chip operations around an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowHandler {
    /// Mask and acknowledge the line, run the action, unmask it again.
    Level,
}

/// Handler attached to a logical IRQ.
#[derive(Clone)]
pub struct IrqAction {
    pub name: &'static str,
    pub flags: IrqActionFlags,
    pub handler: Arc<dyn IrqHandler>,
}

impl core::fmt::Debug for IrqAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqAction")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

struct IrqDesc {
    allocated: bool,
    chip: Option<Arc<dyn IrqChip>>,
    hwirq: Option<IrqLine>,
    flow: Option<FlowHandler>,
    action: Option<IrqAction>,
    status: IrqStatus,
    count: u64,
}

impl IrqDesc {
    const fn empty() -> Self {
        Self {
            allocated: false,
            chip: None,
            hwirq: None,
            flow: None,
            action: None,
            status: IrqStatus::empty(),
            count: 0,
        }
    }

    fn reset(&mut self) {
        *self = Self::empty();
    }

    fn data(&self, irq: LogicalIrq) -> Option<(Arc<dyn IrqChip>, IrqData)> {
        let chip = self.chip.clone()?;
        let hwirq = self.hwirq?;
        Some((chip, IrqData { irq, hwirq }))
    }
}

/// What the dispatch path needs from a descriptor, copied out under the lock.
struct FlowSnapshot {
    chip: Arc<dyn IrqChip>,
    data: IrqData,
    flow: FlowHandler,
    action: Option<IrqAction>,
}

/// The generic dispatcher: logical IRQ descriptors plus their flows.
pub struct IrqDescTable {
    descs: Mutex<Vec<IrqDesc>>,
    dispatched: AtomicU64,
    spurious: AtomicU64,
}

impl IrqDescTable {
    /// Create a table with `NR_IRQS` free descriptors.
    pub fn new() -> Self {
        Self::with_capacity(NR_IRQS)
    }

    /// Create a table whose logical IRQs are `1..=nr_irqs`.
    pub fn with_capacity(nr_irqs: u32) -> Self {
        // Slot 0 stays unused so that 0 is never a valid logical IRQ.
        let descs = (0..=nr_irqs).map(|_| IrqDesc::empty()).collect();
        Self {
            descs: Mutex::new(descs),
            dispatched: AtomicU64::new(0),
            spurious: AtomicU64::new(0),
        }
    }

    /// Number of logical IRQs the table can hand out.
    pub fn capacity(&self) -> u32 {
        (self.descs.lock().len() - 1) as u32
    }

    /// Allocate the lowest free logical IRQ.
    ///
    /// New descriptors start out `NOPROBE | NOREQUEST`; the mapping code
    /// clears both once a chip is attached.
    pub fn alloc_desc(&self) -> KernelResult<LogicalIrq> {
        let mut descs = self.descs.lock();
        let (index, desc) = descs
            .iter_mut()
            .enumerate()
            .skip(1)
            .find(|(_, desc)| !desc.allocated)
            .ok_or(KernelError::ResourceExhausted {
                resource: "IRQ descriptors",
            })?;
        desc.allocated = true;
        desc.status = IrqStatus::NOPROBE | IrqStatus::NOREQUEST;
        trace!("[IRQ] allocated descriptor {}", index);
        Ok(LogicalIrq::new(index as u32))
    }

    /// Release a descriptor together with its chip, flow and action.
    pub fn free_desc(&self, irq: LogicalIrq) -> KernelResult<()> {
        let mut descs = self.descs.lock();
        let desc = Self::lookup(&mut descs, irq)?;
        desc.reset();
        trace!("[IRQ] freed descriptor {}", irq.as_u32());
        Ok(())
    }

    /// Whether `irq` currently names an allocated descriptor.
    pub fn is_allocated(&self, irq: LogicalIrq) -> bool {
        let mut descs = self.descs.lock();
        Self::lookup(&mut descs, irq).is_ok()
    }

    /// Attach a chip and hardware line to a descriptor and install `flow`.
    pub fn set_chip_and_handler(
        &self,
        irq: LogicalIrq,
        chip: Arc<dyn IrqChip>,
        hwirq: IrqLine,
        flow: Option<FlowHandler>,
    ) -> KernelResult<()> {
        let mut descs = self.descs.lock();
        let desc = Self::lookup(&mut descs, irq)?;
        debug!(
            "[IRQ] {}: chip {} {} flow {:?}",
            irq,
            chip.name(),
            hwirq,
            flow
        );
        desc.chip = Some(chip);
        desc.hwirq = Some(hwirq);
        desc.flow = flow;
        Ok(())
    }

    pub fn set_flow_handler(&self, irq: LogicalIrq, flow: FlowHandler) -> KernelResult<()> {
        let mut descs = self.descs.lock();
        Self::lookup(&mut descs, irq)?.flow = Some(flow);
        Ok(())
    }

    pub fn flow_handler(&self, irq: LogicalIrq) -> KernelResult<Option<FlowHandler>> {
        let mut descs = self.descs.lock();
        Ok(Self::lookup(&mut descs, irq)?.flow)
    }

    pub fn clear_status_flags(&self, irq: LogicalIrq, flags: IrqStatus) -> KernelResult<()> {
        let mut descs = self.descs.lock();
        Self::lookup(&mut descs, irq)?.status.remove(flags);
        Ok(())
    }

    pub fn status(&self, irq: LogicalIrq) -> KernelResult<IrqStatus> {
        let mut descs = self.descs.lock();
        Ok(Self::lookup(&mut descs, irq)?.status)
    }

    /// Configure the trigger mode of `irq` through its chip.
    ///
    /// On success the flow handler returned by the chip replaces the
    /// current one; on failure the descriptor is left untouched.
    pub fn set_irq_type(&self, irq: LogicalIrq, trigger: IrqTrigger) -> KernelResult<()> {
        let (chip, data) = self.chip_data(irq)?;
        if let Some(flow) = chip.set_type(&data, trigger)? {
            self.set_flow_handler(irq, flow)?;
        }
        Ok(())
    }

    /// Install the action of `irq`.
    ///
    /// Only one action per line is supported.
    pub fn request_irq(
        &self,
        irq: LogicalIrq,
        name: &'static str,
        flags: IrqActionFlags,
        handler: Arc<dyn IrqHandler>,
    ) -> KernelResult<()> {
        let mut descs = self.descs.lock();
        let desc = Self::lookup(&mut descs, irq)?;
        if desc.status.contains(IrqStatus::NOREQUEST) {
            return Err(KernelError::InvalidState {
                expected: "requestable IRQ",
                actual: "NOREQUEST",
            });
        }
        if desc.action.is_some() {
            return Err(KernelError::AlreadyExists {
                resource: "IRQ action",
                id: irq.as_u32() as u64,
            });
        }
        desc.action = Some(IrqAction {
            name,
            flags,
            handler,
        });
        debug!("[IRQ] {}: action '{}' flags {:#x}", irq, name, flags.bits());
        Ok(())
    }

    /// Remove the action of `irq`.
    pub fn free_irq(&self, irq: LogicalIrq) -> KernelResult<()> {
        let mut descs = self.descs.lock();
        let desc = Self::lookup(&mut descs, irq)?;
        desc.action.take().map(|_| ()).ok_or(KernelError::NotFound {
            resource: "IRQ action",
            id: irq.as_u32() as u64,
        })
    }

    pub fn action(&self, irq: LogicalIrq) -> KernelResult<Option<IrqAction>> {
        let mut descs = self.descs.lock();
        Ok(Self::lookup(&mut descs, irq)?.action.clone())
    }

    /// Mask `irq` at its chip.
    pub fn disable_irq(&self, irq: LogicalIrq) -> KernelResult<()> {
        let (chip, data) = self.chip_data(irq)?;
        chip.mask(&data);
        Ok(())
    }

    /// Unmask `irq` at its chip.
    pub fn enable_irq(&self, irq: LogicalIrq) -> KernelResult<()> {
        let (chip, data) = self.chip_data(irq)?;
        chip.unmask(&data);
        Ok(())
    }

    /// Run the flow of one delivered interrupt.
    ///
    /// Returns `true` when an action handled it. Interrupts on descriptors
    /// without a chip or flow, or without an action, count as spurious.
    pub fn handle_irq(&self, irq: LogicalIrq) -> bool {
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        let snapshot = {
            let mut descs = self.descs.lock();
            Self::lookup(&mut descs, irq).ok().and_then(|desc| {
                desc.count += 1;
                let (chip, data) = desc.data(irq)?;
                Some(FlowSnapshot {
                    chip,
                    data,
                    flow: desc.flow?,
                    action: desc.action.clone(),
                })
            })
        };

        let Some(snapshot) = snapshot else {
            self.spurious.fetch_add(1, Ordering::Relaxed);
            warn!("[IRQ] {}: no flow installed", irq);
            return false;
        };

        match snapshot.flow {
            FlowHandler::Level => self.handle_level(snapshot),
        }
    }

    fn handle_level(&self, snapshot: FlowSnapshot) -> bool {
        let FlowSnapshot {
            chip, data, action, ..
        } = snapshot;

        chip.ack(&data);

        // Without an action the line stays masked so it cannot storm.
        let Some(action) = action else {
            self.spurious.fetch_add(1, Ordering::Relaxed);
            warn!("[IRQ] {}: no action, leaving {} masked", data.irq, data.hwirq);
            return false;
        };

        let ret = action.handler.handle_irq(data.irq);
        if ret == IrqReturn::None {
            trace!("[IRQ] {}: '{}' did not claim", data.irq, action.name);
        }

        chip.unmask(&data);
        ret == IrqReturn::Handled
    }

    /// Interrupts handed to [`handle_irq`](Self::handle_irq) so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Deliveries that found no flow or no action.
    pub fn spurious_count(&self) -> u64 {
        self.spurious.load(Ordering::Relaxed)
    }

    /// Deliveries to one descriptor since it was allocated.
    pub fn irq_count(&self, irq: LogicalIrq) -> u64 {
        let mut descs = self.descs.lock();
        Self::lookup(&mut descs, irq).map_or(0, |desc| desc.count)
    }

    fn chip_data(&self, irq: LogicalIrq) -> KernelResult<(Arc<dyn IrqChip>, IrqData)> {
        let mut descs = self.descs.lock();
        Self::lookup(&mut descs, irq)?
            .data(irq)
            .ok_or(KernelError::NotInitialized {
                subsystem: "IRQ chip",
            })
    }

    fn lookup(descs: &mut [IrqDesc], irq: LogicalIrq) -> KernelResult<&mut IrqDesc> {
        let index = irq.as_u32() as usize;
        match descs.get_mut(index) {
            Some(desc) if index != 0 && desc.allocated => Ok(desc),
            _ => Err(KernelError::NotFound {
                resource: "IRQ descriptor",
                id: irq.as_u32() as u64,
            }),
        }
    }
}

impl Default for IrqDescTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use alloc::{string::String, vec::Vec};
    use core::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct RecordingChip {
        log: Mutex<Vec<String>>,
    }

    impl IrqChip for RecordingChip {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn mask(&self, data: &IrqData) {
            self.log.lock().push(alloc::format!("mask {}", data.hwirq.as_u32()));
        }

        fn unmask(&self, data: &IrqData) {
            self.log
                .lock()
                .push(alloc::format!("unmask {}", data.hwirq.as_u32()));
        }

        fn set_type(
            &self,
            _data: &IrqData,
            trigger: IrqTrigger,
        ) -> KernelResult<Option<FlowHandler>> {
            if trigger == IrqTrigger::LEVEL_HIGH {
                Ok(Some(FlowHandler::Level))
            } else {
                Err(KernelError::OperationNotSupported { operation: "trigger" })
            }
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
    }

    impl IrqHandler for CountingHandler {
        fn handle_irq(&self, _irq: LogicalIrq) -> IrqReturn {
            self.calls.fetch_add(1, Ordering::SeqCst);
            IrqReturn::Handled
        }
    }

    fn mapped(table: &IrqDescTable, chip: Arc<RecordingChip>, line: u32) -> LogicalIrq {
        let irq = table.alloc_desc().unwrap();
        table
            .set_chip_and_handler(irq, chip, IrqLine::new(line), Some(FlowHandler::Level))
            .unwrap();
        table
            .clear_status_flags(irq, IrqStatus::NOPROBE | IrqStatus::NOREQUEST)
            .unwrap();
        irq
    }

    #[test]
    fn test_alloc_starts_at_one_and_exhausts() {
        let table = IrqDescTable::with_capacity(2);
        assert_eq!(table.alloc_desc(), Ok(LogicalIrq::new(1)));
        assert_eq!(table.alloc_desc(), Ok(LogicalIrq::new(2)));
        assert!(matches!(
            table.alloc_desc(),
            Err(KernelError::ResourceExhausted { .. })
        ));
        table.free_desc(LogicalIrq::new(1)).unwrap();
        assert_eq!(table.alloc_desc(), Ok(LogicalIrq::new(1)));
    }

    #[test]
    fn test_new_descriptor_is_not_requestable() {
        let table = IrqDescTable::new();
        let irq = table.alloc_desc().unwrap();
        assert_eq!(
            table.status(irq),
            Ok(IrqStatus::NOPROBE | IrqStatus::NOREQUEST)
        );
        let handler = Arc::new(CountingHandler::default());
        assert!(matches!(
            table.request_irq(irq, "t", IrqActionFlags::empty(), handler),
            Err(KernelError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_level_flow_masks_runs_unmasks() {
        let table = IrqDescTable::new();
        let chip = Arc::new(RecordingChip::default());
        let irq = mapped(&table, chip.clone(), 2);
        let handler = Arc::new(CountingHandler::default());
        table
            .request_irq(irq, "t", IrqActionFlags::TIMER, handler.clone())
            .unwrap();

        assert!(table.handle_irq(irq));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*chip.log.lock(), ["mask 2", "unmask 2"]);
        assert_eq!(table.dispatch_count(), 1);
        assert_eq!(table.irq_count(irq), 1);
        assert_eq!(table.spurious_count(), 0);
    }

    #[test]
    fn test_no_action_is_spurious_and_stays_masked() {
        let table = IrqDescTable::new();
        let chip = Arc::new(RecordingChip::default());
        let irq = mapped(&table, chip.clone(), 1);

        assert!(!table.handle_irq(irq));
        assert_eq!(*chip.log.lock(), ["mask 1"]);
        assert_eq!(table.spurious_count(), 1);
    }

    #[test]
    fn test_unallocated_irq_is_spurious() {
        let table = IrqDescTable::new();
        assert!(!table.handle_irq(LogicalIrq::new(5)));
        assert!(!table.handle_irq(LogicalIrq::new(0)));
        assert_eq!(table.spurious_count(), 2);
    }

    #[test]
    fn test_request_twice_then_free() {
        let table = IrqDescTable::new();
        let irq = mapped(&table, Arc::new(RecordingChip::default()), 0);
        let handler = Arc::new(CountingHandler::default());
        table
            .request_irq(irq, "a", IrqActionFlags::empty(), handler.clone())
            .unwrap();
        assert!(matches!(
            table.request_irq(irq, "b", IrqActionFlags::empty(), handler),
            Err(KernelError::AlreadyExists { .. })
        ));
        table.free_irq(irq).unwrap();
        assert!(matches!(
            table.free_irq(irq),
            Err(KernelError::NotFound { .. })
        ));
    }

    #[test]
    fn test_set_irq_type_failure_keeps_flow() {
        let table = IrqDescTable::new();
        let irq = table.alloc_desc().unwrap();
        table
            .set_chip_and_handler(
                irq,
                Arc::new(RecordingChip::default()),
                IrqLine::new(0),
                None,
            )
            .unwrap();
        assert!(table.set_irq_type(irq, IrqTrigger::EDGE_RISING).is_err());
        assert_eq!(table.flow_handler(irq), Ok(None));
        table.set_irq_type(irq, IrqTrigger::LEVEL_HIGH).unwrap();
        assert_eq!(table.flow_handler(irq), Ok(Some(FlowHandler::Level)));
    }
}
