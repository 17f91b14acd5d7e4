//! Linear IRQ domain.
//!
//! Maps the hardware lines of one controller onto logical IRQs. Each line
//! has at most one logical IRQ and each logical IRQ belongs to at most one
//! line.

use alloc::{vec, vec::Vec};

use super::{IrqLine, IrqTrigger, LogicalIrq};
use crate::error::{KernelError, KernelResult};

/// Line-indexed table of logical IRQ assignments.
#[derive(Debug)]
pub struct IrqDomain {
    name: &'static str,
    lines: Vec<Option<LogicalIrq>>,
}

impl IrqDomain {
    pub fn new(name: &'static str, size: u32) -> Self {
        Self {
            name,
            lines: vec![None; size as usize],
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of hardware lines covered.
    pub fn size(&self) -> u32 {
        self.lines.len() as u32
    }

    /// Reject lines the controller does not have.
    pub fn check_line(&self, line: IrqLine) -> KernelResult<()> {
        if line.as_u32() >= self.size() {
            return Err(KernelError::OutOfRange {
                name: "hardware IRQ line",
                value: line.as_u32() as u64,
                max: self.size().saturating_sub(1) as u64,
            });
        }
        Ok(())
    }

    /// Logical IRQ currently assigned to `line`.
    pub fn find_mapping(&self, line: IrqLine) -> Option<LogicalIrq> {
        self.lines.get(line.as_u32() as usize).copied().flatten()
    }

    /// Hardware line that `irq` is assigned to.
    pub fn hwirq_of(&self, irq: LogicalIrq) -> Option<IrqLine> {
        self.lines
            .iter()
            .position(|slot| *slot == Some(irq))
            .map(|index| IrqLine::new(index as u32))
    }

    /// Record `line -> irq`.
    pub fn associate(&mut self, line: IrqLine, irq: LogicalIrq) -> KernelResult<()> {
        self.check_line(line)?;
        if self.find_mapping(line).is_some() {
            return Err(KernelError::AlreadyExists {
                resource: "IRQ mapping",
                id: line.as_u32() as u64,
            });
        }
        if self.hwirq_of(irq).is_some() {
            return Err(KernelError::AlreadyExists {
                resource: "logical IRQ",
                id: irq.as_u32() as u64,
            });
        }
        self.lines[line.as_u32() as usize] = Some(irq);
        Ok(())
    }

    /// Drop the assignment of `irq`, returning the line it was on.
    pub fn disassociate(&mut self, irq: LogicalIrq) -> KernelResult<IrqLine> {
        let line = self.hwirq_of(irq).ok_or(KernelError::NotFound {
            resource: "IRQ mapping",
            id: irq.as_u32() as u64,
        })?;
        self.lines[line.as_u32() as usize] = None;
        Ok(line)
    }

    pub fn mapped_count(&self) -> usize {
        self.lines.iter().filter(|slot| slot.is_some()).count()
    }

    /// Decode interrupt specifier cells: `<line>` or `<line trigger>`.
    pub fn xlate(&self, cells: &[u32]) -> KernelResult<(IrqLine, IrqTrigger)> {
        let (line, trigger) = match *cells {
            [line] => (line, IrqTrigger::empty()),
            [line, trigger, ..] => (
                line,
                IrqTrigger::from_bits(trigger).ok_or(KernelError::OperationNotSupported {
                    operation: "undefined trigger bits",
                })?,
            ),
            [] => {
                return Err(KernelError::UnresolvedResource {
                    device: self.name,
                    resource: "interrupt specifier",
                })
            }
        };
        let line = IrqLine::new(line);
        self.check_line(line)?;
        Ok((line, trigger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_associate_and_lookup_both_ways() {
        let mut domain = IrqDomain::new("test", 4);
        domain
            .associate(IrqLine::new(2), LogicalIrq::new(1))
            .unwrap();
        assert_eq!(domain.find_mapping(IrqLine::new(2)), Some(LogicalIrq::new(1)));
        assert_eq!(domain.hwirq_of(LogicalIrq::new(1)), Some(IrqLine::new(2)));
        assert_eq!(domain.find_mapping(IrqLine::new(3)), None);
        assert_eq!(domain.find_mapping(IrqLine::new(9)), None);
        assert_eq!(domain.mapped_count(), 1);
    }

    #[test]
    fn test_associate_rejects_duplicates_and_range() {
        let mut domain = IrqDomain::new("test", 4);
        domain
            .associate(IrqLine::new(0), LogicalIrq::new(1))
            .unwrap();
        assert!(matches!(
            domain.associate(IrqLine::new(0), LogicalIrq::new(2)),
            Err(KernelError::AlreadyExists { .. })
        ));
        assert!(matches!(
            domain.associate(IrqLine::new(1), LogicalIrq::new(1)),
            Err(KernelError::AlreadyExists { .. })
        ));
        assert_eq!(
            domain.associate(IrqLine::new(4), LogicalIrq::new(3)),
            Err(KernelError::OutOfRange {
                name: "hardware IRQ line",
                value: 4,
                max: 3
            })
        );
    }

    #[test]
    fn test_disassociate() {
        let mut domain = IrqDomain::new("test", 4);
        domain
            .associate(IrqLine::new(3), LogicalIrq::new(7))
            .unwrap();
        assert_eq!(domain.disassociate(LogicalIrq::new(7)), Ok(IrqLine::new(3)));
        assert_eq!(domain.find_mapping(IrqLine::new(3)), None);
        assert!(domain.disassociate(LogicalIrq::new(7)).is_err());
    }

    #[test]
    fn test_xlate_one_and_two_cells() {
        let domain = IrqDomain::new("test", 4);
        assert_eq!(
            domain.xlate(&[2]),
            Ok((IrqLine::new(2), IrqTrigger::empty()))
        );
        assert_eq!(
            domain.xlate(&[1, 4]),
            Ok((IrqLine::new(1), IrqTrigger::LEVEL_HIGH))
        );
        assert!(domain.xlate(&[]).is_err());
        assert!(domain.xlate(&[8]).is_err());
    }

    #[test]
    fn test_xlate_rejects_undefined_trigger_bits() {
        let domain = IrqDomain::new("test", 4);
        for trigger in [0x10, 0x14, 0x8000_0000] {
            assert!(matches!(
                domain.xlate(&[2, trigger]),
                Err(KernelError::OperationNotSupported { .. })
            ));
        }
    }
}
