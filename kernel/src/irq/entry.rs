//! Trap vector for external interrupts.
//!
//! Exactly one top-level interrupt entry may be installed. The low-level
//! exception path calls [`TrapVector::enter`] (or the [`TrapToken`] handed
//! out at installation) each time the CPU takes an IRQ exception.

use alloc::sync::Arc;

use log::{info, trace};

use crate::{
    error::{KernelError, KernelResult},
    sync::GlobalState,
};

/// Top-level handler run on IRQ exceptions.
pub trait IrqEntry: Send + Sync {
    /// Service everything pending; returns the number of interrupts
    /// dispatched.
    fn handle_irq(&self) -> usize;
}

/// Proof that an entry was installed, usable to enter it directly.
#[derive(Clone)]
pub struct TrapToken {
    entry: Arc<dyn IrqEntry>,
}

impl TrapToken {
    pub fn enter(&self) -> usize {
        self.entry.handle_irq()
    }
}

impl core::fmt::Debug for TrapToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrapToken").finish_non_exhaustive()
    }
}

/// Once-only slot for the interrupt entry point.
pub struct TrapVector {
    entry: GlobalState<Arc<dyn IrqEntry>>,
}

impl TrapVector {
    pub const fn new() -> Self {
        Self {
            entry: GlobalState::new(),
        }
    }

    /// Install `entry`.
    ///
    /// Fails with [`KernelError::AlreadyInitialized`] if another entry is
    /// installed; the existing one stays in place.
    pub fn install(&self, entry: Arc<dyn IrqEntry>) -> KernelResult<TrapToken> {
        self.entry
            .init(entry.clone())
            .map_err(|_| KernelError::AlreadyInitialized {
                subsystem: "IRQ trap vector",
            })?;
        info!("[IRQ] trap vector installed");
        Ok(TrapToken { entry })
    }

    pub fn is_installed(&self) -> bool {
        self.entry.is_initialized()
    }

    /// Run the installed entry. Returns 0 when nothing is installed.
    pub fn enter(&self) -> usize {
        // Clone out so the slot lock is not held while handlers run.
        match self.entry.get_cloned() {
            Some(entry) => entry.handle_irq(),
            None => {
                trace!("[IRQ] exception with no trap vector installed");
                0
            }
        }
    }
}

impl Default for TrapVector {
    fn default() -> Self {
        Self::new()
    }
}

/// The system trap vector.
pub static TRAP_VECTOR: TrapVector = TrapVector::new();
