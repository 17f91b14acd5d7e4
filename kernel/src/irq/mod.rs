//! Interrupt handling core.
//!
//! Separates three concerns:
//! - [`domain`]: translation between hardware lines and logical IRQs for one
//!   interrupt controller.
//! - [`desc`]: the generic dispatcher. Owns one descriptor per logical IRQ
//!   (chip, flow handler, action) and runs the flow when an interrupt is
//!   delivered.
//! - [`entry`]: the trap vector that the low-level exception code enters on
//!   every external interrupt.
//!
//! Interrupt controller drivers implement [`IrqChip`]; device drivers
//! implement [`IrqHandler`] and attach it with
//! [`IrqDescTable::request_irq`](desc::IrqDescTable::request_irq).

pub mod desc;
pub mod domain;
pub mod entry;

use bitflags::bitflags;

pub use self::{
    desc::{FlowHandler, IrqDescTable},
    domain::IrqDomain,
    entry::{IrqEntry, TrapToken, TrapVector, TRAP_VECTOR},
};
use crate::error::KernelResult;

// ---------------------------------------------------------------------------
// IRQ number newtypes
// ---------------------------------------------------------------------------

/// Dispatcher-facing interrupt number.
///
/// Obtained from a domain mapping; never equal to the hardware line number
/// by construction. `0` is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalIrq(u32);

impl LogicalIrq {
    pub const fn new(irq: u32) -> Self {
        Self(irq)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for LogicalIrq {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IRQ#{}", self.0)
    }
}

/// Hardware interrupt line of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqLine(u32);

impl IrqLine {
    pub const fn new(line: u32) -> Self {
        Self(line)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for IrqLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "hwirq {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

bitflags! {
    /// Trigger mode requested for an interrupt line.
    ///
    /// The empty set means "leave the current configuration".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqTrigger: u32 {
        const EDGE_RISING = 1 << 0;
        const EDGE_FALLING = 1 << 1;
        const LEVEL_HIGH = 1 << 2;
        const LEVEL_LOW = 1 << 3;
    }
}

bitflags! {
    /// Descriptor status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqStatus: u32 {
        /// Excluded from autoprobing.
        const NOPROBE = 1 << 10;
        /// No action may be requested.
        const NOREQUEST = 1 << 11;
    }
}

bitflags! {
    /// Properties of an installed action.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqActionFlags: u32 {
        /// The action services a system timer.
        const TIMER = 0x0000_0200;
        /// Polled when another line is stuck.
        const IRQPOLL = 0x0000_1000;
        /// Kept enabled across suspend.
        const NO_SUSPEND = 0x0000_4000;
        /// Never moved to a thread.
        const NO_THREAD = 0x0001_0000;
    }
}

// ---------------------------------------------------------------------------
// Driver contracts
// ---------------------------------------------------------------------------

/// Outcome reported by an [`IrqHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt did not come from this device.
    None,
    Handled,
}

/// Per-interrupt data handed to chip callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqData {
    pub irq: LogicalIrq,
    pub hwirq: IrqLine,
}

/// Interrupt controller operations for one mapped line.
pub trait IrqChip: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stop the line from being signalled.
    fn mask(&self, data: &IrqData);

    /// Allow the line to be signalled again.
    fn unmask(&self, data: &IrqData);

    /// Acknowledge the line at the start of the flow.
    fn ack(&self, data: &IrqData) {
        self.mask(data);
    }

    /// Validate a trigger request and return the flow handler it needs.
    ///
    /// `Ok(None)` keeps the current flow.
    fn set_type(&self, data: &IrqData, trigger: IrqTrigger) -> KernelResult<Option<FlowHandler>>;
}

/// Device interrupt service routine.
pub trait IrqHandler: Send + Sync {
    fn handle_irq(&self, irq: LogicalIrq) -> IrqReturn;
}
